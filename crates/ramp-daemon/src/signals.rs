//! Signal handling for graceful ramp shutdown.
//!
//! SIGTERM and SIGINT stop the ramp at the next tick boundary. SIGHUP is
//! recorded and logged but does not affect a running ramp. Handlers only
//! touch atomics; a poll thread mirrors them into [`SignalState`].
//!
//! Once shutdown is requested SIGTERM and SIGINT revert to their default
//! disposition, so a second Ctrl-C terminates the process even while the
//! ramp is blocked in a slow remote write.

use ramp_common::ShutdownSignal;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Interval at which the poll thread checks the handler flags.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Signal types that the daemon handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SignalKind {
    /// SIGTERM - Graceful termination request.
    Terminate = 1,
    /// SIGINT - Interrupt (Ctrl+C).
    Interrupt = 2,
    /// SIGHUP - Hangup.
    Hangup = 3,
}

impl SignalKind {
    fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::Terminate),
            2 => Some(Self::Interrupt),
            3 => Some(Self::Hangup),
            _ => None,
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Terminate => write!(f, "SIGTERM"),
            SignalKind::Interrupt => write!(f, "SIGINT"),
            SignalKind::Hangup => write!(f, "SIGHUP"),
        }
    }
}

/// State shared between the poll thread and the ramp loop.
#[derive(Debug, Default)]
pub struct SignalState {
    shutdown_requested: AtomicBool,
    hangup_count: AtomicU32,
    signal_count: AtomicU32,
    last_signal: AtomicU32,
}

impl SignalState {
    /// Create a new signal state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if shutdown has been requested.
    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Relaxed)
    }

    /// Request shutdown (can be called from any thread).
    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::Relaxed);
    }

    fn record_signal(&self, kind: SignalKind) {
        self.signal_count.fetch_add(1, Ordering::Relaxed);
        self.last_signal.store(kind as u32, Ordering::Relaxed);
        match kind {
            SignalKind::Terminate | SignalKind::Interrupt => self.request_shutdown(),
            SignalKind::Hangup => {
                self.hangup_count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Total number of signals received.
    pub fn signal_count(&self) -> u32 {
        self.signal_count.load(Ordering::Relaxed)
    }

    /// Number of SIGHUPs received.
    pub fn hangup_count(&self) -> u32 {
        self.hangup_count.load(Ordering::Relaxed)
    }

    /// The most recent signal, if any.
    pub fn last_signal(&self) -> Option<SignalKind> {
        SignalKind::from_code(self.last_signal.load(Ordering::Relaxed))
    }
}

/// Handle for signal management.
#[derive(Debug, Clone)]
pub struct SignalHandler {
    state: Arc<SignalState>,
}

impl SignalHandler {
    /// Create a handler and register process signal handlers.
    ///
    /// On non-Unix platforms only [`request_shutdown`](Self::request_shutdown)
    /// stops the ramp.
    pub fn new() -> std::io::Result<Self> {
        let handler = Self {
            state: Arc::new(SignalState::new()),
        };

        #[cfg(unix)]
        handler.register_unix_handlers()?;

        Ok(handler)
    }

    #[cfg(unix)]
    fn register_unix_handlers(&self) -> std::io::Result<()> {
        use std::os::raw::c_int;

        static SIGTERM_FLAG: AtomicBool = AtomicBool::new(false);
        static SIGINT_FLAG: AtomicBool = AtomicBool::new(false);
        static SIGHUP_FLAG: AtomicBool = AtomicBool::new(false);

        extern "C" fn sigterm_handler(_: c_int) {
            SIGTERM_FLAG.store(true, Ordering::Relaxed);
        }

        extern "C" fn sigint_handler(_: c_int) {
            SIGINT_FLAG.store(true, Ordering::Relaxed);
        }

        extern "C" fn sighup_handler(_: c_int) {
            SIGHUP_FLAG.store(true, Ordering::Relaxed);
        }

        let handlers: [(c_int, extern "C" fn(c_int)); 3] = [
            (libc::SIGTERM, sigterm_handler),
            (libc::SIGINT, sigint_handler),
            (libc::SIGHUP, sighup_handler),
        ];
        for (signum, handler) in handlers {
            // SAFETY: the handlers only store to static atomics, which is async-signal-safe.
            #[allow(unsafe_code)]
            let previous = unsafe { libc::signal(signum, handler as libc::sighandler_t) };
            if previous == libc::SIG_ERR {
                return Err(std::io::Error::last_os_error());
            }
        }

        let state = Arc::clone(&self.state);
        std::thread::Builder::new()
            .name("signal-poll".into())
            .spawn(move || loop {
                for (flag, kind) in [
                    (&SIGTERM_FLAG, SignalKind::Terminate),
                    (&SIGINT_FLAG, SignalKind::Interrupt),
                    (&SIGHUP_FLAG, SignalKind::Hangup),
                ] {
                    if flag.swap(false, Ordering::Relaxed) {
                        match kind {
                            SignalKind::Hangup => {
                                info!(signal = %kind, "Signal received, ignored while ramping");
                            }
                            _ => info!(signal = %kind, "Shutdown signal received"),
                        }
                        state.record_signal(kind);
                    }
                }
                if state.shutdown_requested() {
                    if let Err(e) = restore_default_dispositions() {
                        warn!(error = %e, "Failed to restore default signal dispositions");
                    }
                    break;
                }
                std::thread::sleep(POLL_INTERVAL);
            })?;

        debug!("Unix signal handlers registered");
        Ok(())
    }

    /// Check if shutdown has been requested.
    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        self.state.shutdown_requested()
    }

    /// Manually request shutdown.
    pub fn request_shutdown(&self) {
        info!("Manual shutdown requested");
        self.state.request_shutdown();
    }

    /// Get the signal state for inspection.
    pub fn state(&self) -> &SignalState {
        &self.state
    }
}

/// Put SIGTERM and SIGINT back to their default (terminating) action.
#[cfg(unix)]
fn restore_default_dispositions() -> std::io::Result<()> {
    for signum in [libc::SIGTERM, libc::SIGINT] {
        // SAFETY: SIG_DFL installs no handler code.
        #[allow(unsafe_code)]
        let previous = unsafe { libc::signal(signum, libc::SIG_DFL) };
        if previous == libc::SIG_ERR {
            return Err(std::io::Error::last_os_error());
        }
    }
    debug!("Default SIGTERM/SIGINT dispositions restored");
    Ok(())
}

impl ShutdownSignal for SignalHandler {
    fn shutdown_requested(&self) -> bool {
        self.state.shutdown_requested()
    }
}
