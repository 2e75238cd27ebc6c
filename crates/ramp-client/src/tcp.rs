//! JSON-lines TCP client.
//!
//! Talks the [`protocol`](crate::protocol) message format to a configuration
//! service bridge. One request is in flight at a time; each waits for its
//! response under the configured I/O timeout. A broken connection is
//! reported, never repaired: there is no reconnect.

use crate::protocol::{decode_line, encode_line, Request, Response, MAX_LINE_BYTES};
use crate::{ConfigClient, Configuration};
use ramp_common::config::TcpClientConfig;
use ramp_common::{RampError, RampResult};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use tracing::{debug, info, trace, warn};

/// Open connection: buffered read half plus a cloned write half.
struct Connection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    peer: SocketAddr,
}

/// TCP client for a single configuration service.
pub struct TcpConfigClient {
    /// Logical service name sent with every request.
    service: String,
    /// Address and timeouts.
    config: TcpClientConfig,
    /// Live connection (None if disconnected).
    connection: Option<Connection>,
    /// Reused line buffer.
    line: String,
}

impl TcpConfigClient {
    /// Create a client with default TCP settings.
    pub fn new(service: impl Into<String>) -> Self {
        Self::with_config(service, TcpClientConfig::default())
    }

    /// Create a client with custom TCP settings.
    pub fn with_config(service: impl Into<String>, config: TcpClientConfig) -> Self {
        Self {
            service: service.into(),
            config,
            connection: None,
            line: String::with_capacity(256),
        }
    }

    /// Address of the connected peer, if any.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.connection.as_ref().map(|c| c.peer)
    }

    /// Open the TCP stream, trying every resolved address in turn.
    fn open_stream(&self) -> RampResult<TcpStream> {
        let addrs: Vec<SocketAddr> = self
            .config
            .address
            .to_socket_addrs()
            .map_err(|e| {
                RampError::connection(
                    &self.service,
                    format!("cannot resolve '{}': {e}", self.config.address),
                )
            })?
            .collect();

        let mut last_error = None;
        for addr in &addrs {
            debug!(%addr, "Trying configuration service address");
            match TcpStream::connect_timeout(addr, self.config.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_error = Some(format!("{addr}: {e}")),
            }
        }

        Err(RampError::connection(
            &self.service,
            last_error.unwrap_or_else(|| format!("'{}' resolved to no addresses", self.config.address)),
        ))
    }

    /// Configure timeouts and split the stream into read/write halves.
    fn establish(&self, stream: TcpStream) -> RampResult<Connection> {
        let io_err = |what: &str, e: std::io::Error| {
            RampError::connection(&self.service, format!("failed to {what}: {e}"))
        };

        stream
            .set_read_timeout(Some(self.config.io_timeout))
            .map_err(|e| io_err("set read timeout", e))?;
        stream
            .set_write_timeout(Some(self.config.io_timeout))
            .map_err(|e| io_err("set write timeout", e))?;
        stream
            .set_nodelay(true)
            .map_err(|e| io_err("set TCP_NODELAY", e))?;

        let peer = stream.peer_addr().map_err(|e| io_err("read peer address", e))?;
        let writer = stream.try_clone().map_err(|e| io_err("clone stream", e))?;

        Ok(Connection {
            reader: BufReader::new(stream),
            writer,
            peer,
        })
    }

    /// Drop the connection after an unrecoverable error.
    fn disconnect(&mut self) {
        if let Some(conn) = self.connection.take() {
            let _ = conn.writer.shutdown(Shutdown::Both);
        }
    }

    /// Send one request and read its response.
    fn round_trip(&mut self, request: &Request) -> RampResult<Configuration> {
        let frame = encode_line(request)?;

        let Some(conn) = self.connection.as_mut() else {
            return Err(RampError::connection(&self.service, "not connected"));
        };

        trace!(bytes = frame.len(), "Sending configuration request");

        if let Err(e) = conn.writer.write_all(&frame).and_then(|()| conn.writer.flush()) {
            self.disconnect();
            return Err(RampError::connection(&self.service, format!("send failed: {e}")));
        }

        self.line.clear();
        let limit = u64::try_from(MAX_LINE_BYTES).unwrap_or(u64::MAX) + 1;
        let read = (&mut conn.reader).take(limit).read_line(&mut self.line);

        match read {
            Ok(0) => {
                self.disconnect();
                return Err(RampError::connection(&self.service, "connection closed by peer"));
            }
            Ok(_) if !self.line.ends_with('\n') => {
                self.disconnect();
                return Err(RampError::Protocol(format!(
                    "response truncated or longer than {MAX_LINE_BYTES} bytes"
                )));
            }
            Ok(_) => {}
            Err(e) => {
                self.disconnect();
                return Err(RampError::connection(&self.service, format!("receive failed: {e}")));
            }
        }

        trace!(bytes = self.line.len(), "Received configuration response");

        let response: Response = match decode_line(&self.line) {
            Ok(response) => response,
            Err(e) => {
                // Stream position is unknown after a bad frame
                self.disconnect();
                return Err(e);
            }
        };

        match response {
            Response::Ok { config } => Ok(config),
            Response::Error { message } => Err(RampError::update(&self.service, message)),
        }
    }
}

impl ConfigClient for TcpConfigClient {
    fn service_name(&self) -> &str {
        &self.service
    }

    fn connect(&mut self) -> RampResult<Configuration> {
        self.disconnect();
        info!(address = %self.config.address, service = %self.service, "Connecting to configuration service");

        let stream = self.open_stream()?;
        let connection = self.establish(stream)?;
        let peer = connection.peer;
        self.connection = Some(connection);

        let request = Request::GetConfiguration {
            service: self.service.clone(),
        };
        match self.round_trip(&request) {
            Ok(config) => {
                info!(%peer, fields = config.len(), "Connected to configuration service");
                Ok(config)
            }
            Err(e) => {
                self.disconnect();
                Err(match e {
                    RampError::Update { service, reason } => RampError::Connection { service, reason },
                    other => other,
                })
            }
        }
    }

    fn update_configuration(&mut self, changes: &Configuration) -> RampResult<Configuration> {
        let request = Request::UpdateConfiguration {
            service: self.service.clone(),
            changes: changes.clone(),
        };
        self.round_trip(&request)
    }

    fn shutdown(&mut self) -> RampResult<()> {
        if self.connection.is_some() {
            debug!(service = %self.service, "Closing configuration service connection");
            self.disconnect();
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connection.is_some()
    }
}

impl Drop for TcpConfigClient {
    fn drop(&mut self) {
        if self.connection.is_some() {
            warn!(service = %self.service, "Client dropped while connected");
            self.disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_new_client_is_disconnected() {
        let client = TcpConfigClient::new("filter");
        assert!(!client.is_connected());
        assert_eq!(client.service_name(), "filter");
        assert!(client.peer_addr().is_none());
    }

    #[test]
    fn test_update_without_connection() {
        let mut client = TcpConfigClient::new("filter");
        let result = client.update_configuration(&crate::single_change("x", 1.0));
        assert!(matches!(result, Err(RampError::Connection { .. })));
    }

    #[test]
    fn test_connect_refused() {
        // Bind then drop to get a port nobody listens on
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();

        let config = TcpClientConfig {
            address: format!("127.0.0.1:{port}"),
            connect_timeout: Duration::from_millis(200),
            io_timeout: Duration::from_millis(200),
        };
        let mut client = TcpConfigClient::with_config("filter", config);

        let err = client.connect().unwrap_err();
        assert!(matches!(err, RampError::Connection { .. }));
        assert!(!client.is_connected());
    }

    #[test]
    fn test_unresolvable_address() {
        let config = TcpClientConfig {
            address: "not an address".into(),
            ..Default::default()
        };
        let mut client = TcpConfigClient::with_config("filter", config);
        assert!(matches!(client.connect(), Err(RampError::Connection { .. })));
    }

    #[test]
    fn test_shutdown_when_disconnected() {
        let mut client = TcpConfigClient::new("filter");
        assert!(client.shutdown().is_ok());
    }
}
