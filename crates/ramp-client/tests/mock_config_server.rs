//! Mock configuration service for integration testing.
//!
//! Binds a localhost port and answers the JSON-lines protocol from a
//! shared configuration map, with switchable fault injection so tests
//! can exercise the client against a real socket.

#![allow(dead_code)]

use ramp_client::protocol::{decode_line, encode_line, Request, Response};
use ramp_client::Configuration;
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Configurable behavior for fault injection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockBehavior {
    /// Answer every request correctly.
    Normal,
    /// Sleep before answering.
    DelayMs(u64),
    /// Answer every update with an error response.
    RejectUpdates(String),
    /// Read the request, then close the connection without answering.
    DropConnection,
    /// Answer with a line that is not valid JSON.
    CorruptResponse,
}

#[derive(Debug, Default)]
struct ServerState {
    config: Configuration,
    received: Vec<Request>,
}

type SharedState = Arc<Mutex<ServerState>>;

/// A mock configuration service on `127.0.0.1:<ephemeral>`.
pub struct MockConfigServer {
    local_addr: SocketAddr,
    service: String,
    stop_signal: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    state: SharedState,
    behavior: Arc<Mutex<MockBehavior>>,
}

impl MockConfigServer {
    /// Start a server for `service` with the given behavior.
    pub fn start(service: &str, behavior: MockBehavior) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let local_addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let stop_signal = Arc::new(AtomicBool::new(false));
        let state: SharedState = Arc::new(Mutex::new(ServerState::default()));
        let behavior = Arc::new(Mutex::new(behavior));

        let stop_clone = stop_signal.clone();
        let state_clone = state.clone();
        let behavior_clone = behavior.clone();
        let service_clone = service.to_string();

        let thread_handle = thread::spawn(move || {
            Self::server_loop(listener, service_clone, stop_clone, state_clone, behavior_clone);
        });

        Ok(Self {
            local_addr,
            service: service.to_string(),
            stop_signal,
            thread_handle: Some(thread_handle),
            state,
            behavior,
        })
    }

    /// Address to connect to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Change behavior at runtime.
    pub fn set_behavior(&self, behavior: MockBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    /// Current configuration held by the server.
    pub fn config(&self) -> Configuration {
        self.state.lock().unwrap().config.clone()
    }

    /// Seed a configuration value.
    pub fn set_value(&self, field: &str, value: ramp_client::ParamValue) {
        self.state
            .lock()
            .unwrap()
            .config
            .insert(field.to_string(), value);
    }

    /// Every request received, in order.
    pub fn received(&self) -> Vec<Request> {
        self.state.lock().unwrap().received.clone()
    }

    /// Stop the server and join its thread.
    pub fn stop(mut self) {
        self.stop_signal.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    fn server_loop(
        listener: TcpListener,
        service: String,
        stop_signal: Arc<AtomicBool>,
        state: SharedState,
        behavior: Arc<Mutex<MockBehavior>>,
    ) {
        while !stop_signal.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, _addr)) => {
                    let service = service.clone();
                    let stop_clone = stop_signal.clone();
                    let state_clone = state.clone();
                    let behavior_clone = behavior.clone();
                    thread::spawn(move || {
                        Self::handle_connection(
                            stream,
                            &service,
                            &stop_clone,
                            &state_clone,
                            &behavior_clone,
                        );
                    });
                }
                Err(_) => thread::sleep(Duration::from_millis(10)),
            }
        }
    }

    fn handle_connection(
        stream: TcpStream,
        service: &str,
        stop_signal: &AtomicBool,
        state: &SharedState,
        behavior: &Mutex<MockBehavior>,
    ) {
        let _ = stream.set_nonblocking(false);
        let _ = stream.set_read_timeout(Some(Duration::from_millis(100)));
        let Ok(mut writer) = stream.try_clone() else {
            return;
        };
        let mut reader = BufReader::new(stream);
        let mut line = String::new();

        while !stop_signal.load(Ordering::SeqCst) {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => return,
                Ok(_) => {}
                Err(ref e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    continue;
                }
                Err(_) => return,
            }

            let Ok(request) = decode_line::<Request>(&line) else {
                let _ = writer.write_all(&encode_line(&Response::Error {
                    message: "malformed request".into(),
                })
                .unwrap_or_default());
                continue;
            };
            state.lock().unwrap().received.push(request.clone());

            let current = behavior.lock().unwrap().clone();
            let response = match current {
                MockBehavior::DelayMs(ms) => {
                    thread::sleep(Duration::from_millis(ms));
                    Self::process(&request, service, state)
                }
                MockBehavior::DropConnection => return,
                MockBehavior::CorruptResponse => {
                    let _ = writer.write_all(b"{\"status\":\n");
                    continue;
                }
                MockBehavior::RejectUpdates(message) => match request {
                    Request::UpdateConfiguration { .. } => Response::Error { message },
                    Request::GetConfiguration { .. } => Self::process(&request, service, state),
                },
                MockBehavior::Normal => Self::process(&request, service, state),
            };

            let Ok(frame) = encode_line(&response) else {
                return;
            };
            if writer.write_all(&frame).is_err() {
                return;
            }
        }
    }

    fn process(request: &Request, service: &str, state: &SharedState) -> Response {
        if request.service() != service {
            return Response::Error {
                message: format!("unknown service '{}'", request.service()),
            };
        }

        let mut state = state.lock().unwrap();
        if let Request::UpdateConfiguration { changes, .. } = request {
            for (field, value) in changes {
                state.config.insert(field.clone(), value.clone());
            }
        }
        Response::Ok {
            config: state.config.clone(),
        }
    }
}
