//! In-memory configuration service.
//!
//! [`SimulatedConfigService`] stands in for the remote node. It applies
//! changes to a local configuration map, records every accepted update,
//! and can inject the failures a real service exhibits: unreachable at
//! startup, rejected writes, dropped connections, and slow replies.

use crate::{ConfigClient, Configuration};
use ramp_common::{Clock, RampError, RampResult};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, trace};

/// An update accepted by the simulated service.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedUpdate {
    /// Service clock reading when the update was applied, if a clock was attached.
    pub at: Option<Duration>,
    /// The change set as received.
    pub changes: Configuration,
}

#[derive(Debug, Default)]
struct ServiceState {
    config: Configuration,
    updates: Vec<RecordedUpdate>,
    unreachable: bool,
    reject_after: Option<usize>,
    drop_after: Option<usize>,
    latency: Duration,
    connections: u64,
}

/// Handle to an in-memory configuration service.
///
/// Cloning the handle shares the service, so a test can keep one handle
/// for inspection while the driver owns a [`SimulatedClient`].
#[derive(Clone)]
pub struct SimulatedConfigService {
    name: String,
    state: Arc<Mutex<ServiceState>>,
    clock: Option<Arc<dyn Clock>>,
}

impl std::fmt::Debug for SimulatedConfigService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedConfigService")
            .field("name", &self.name)
            .field("clock", &self.clock.as_ref().map(|c| c.name()))
            .finish_non_exhaustive()
    }
}

impl SimulatedConfigService {
    /// Create a reachable service with an empty configuration.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(ServiceState::default())),
            clock: None,
        }
    }

    /// Timestamp updates with `clock` and use it to simulate latency.
    #[must_use]
    pub fn with_clock<K: Clock + 'static>(mut self, clock: K) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(clock);
        self.clock = Some(clock);
        self
    }

    /// Seed the configuration the service starts with.
    #[must_use]
    pub fn with_initial(self, config: Configuration) -> Self {
        self.lock().config = config;
        self
    }

    /// Service name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Create a client bound to this service.
    pub fn client(&self) -> SimulatedClient {
        SimulatedClient {
            service: self.clone(),
            connected: false,
        }
    }

    /// Make `connect` fail (or succeed again).
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().unreachable = !reachable;
    }

    /// Accept `count` more updates, then reject every further one.
    pub fn reject_updates_after(&self, count: usize) {
        let mut state = self.lock();
        state.reject_after = Some(state.updates.len() + count);
    }

    /// Accept `count` more updates, then drop the connection on the next one.
    pub fn drop_connection_after(&self, count: usize) {
        let mut state = self.lock();
        state.drop_after = Some(state.updates.len() + count);
    }

    /// Time each update takes to apply.
    ///
    /// With a clock attached the clock sleeps, so a [`ramp_common::ManualClock`]
    /// advances instead of blocking.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// All accepted updates, oldest first.
    pub fn updates(&self) -> Vec<RecordedUpdate> {
        self.lock().updates.clone()
    }

    /// Number of accepted updates.
    pub fn update_count(&self) -> usize {
        self.lock().updates.len()
    }

    /// Numeric values written to `field`, oldest first.
    pub fn values_of(&self, field: &str) -> Vec<f64> {
        self.lock()
            .updates
            .iter()
            .filter_map(|u| u.changes.get(field).and_then(crate::ParamValue::as_f64))
            .collect()
    }

    /// Current configuration.
    pub fn current(&self) -> Configuration {
        self.lock().config.clone()
    }

    /// Number of successful connects.
    pub fn connection_count(&self) -> u64 {
        self.lock().connections
    }

    fn lock(&self) -> MutexGuard<'_, ServiceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open(&self) -> RampResult<Configuration> {
        let mut state = self.lock();
        if state.unreachable {
            return Err(RampError::connection(&self.name, "service not available"));
        }
        state.connections += 1;
        Ok(state.config.clone())
    }

    fn apply(&self, changes: &Configuration) -> RampResult<ApplyOutcome> {
        let latency = self.lock().latency;
        if !latency.is_zero() {
            match &self.clock {
                Some(clock) => clock.sleep(latency),
                None => std::thread::sleep(latency),
            }
        }

        let mut state = self.lock();
        let accepted = state.updates.len();

        if state.drop_after.is_some_and(|limit| accepted >= limit) {
            return Ok(ApplyOutcome::Dropped);
        }
        if state.reject_after.is_some_and(|limit| accepted >= limit) {
            return Err(RampError::update(&self.name, "update rejected by service"));
        }

        for (field, value) in changes {
            state.config.insert(field.clone(), value.clone());
        }
        state.updates.push(RecordedUpdate {
            at: self.clock.as_ref().map(|c| c.now()),
            changes: changes.clone(),
        });

        Ok(ApplyOutcome::Applied(state.config.clone()))
    }
}

enum ApplyOutcome {
    Applied(Configuration),
    Dropped,
}

/// Client half of a [`SimulatedConfigService`].
#[derive(Debug)]
pub struct SimulatedClient {
    service: SimulatedConfigService,
    connected: bool,
}

impl ConfigClient for SimulatedClient {
    fn service_name(&self) -> &str {
        self.service.name()
    }

    fn connect(&mut self) -> RampResult<Configuration> {
        let config = self.service.open()?;
        self.connected = true;
        debug!(service = %self.service.name(), "Connected to simulated service");
        Ok(config)
    }

    fn update_configuration(&mut self, changes: &Configuration) -> RampResult<Configuration> {
        if !self.connected {
            return Err(RampError::connection(self.service.name(), "not connected"));
        }

        match self.service.apply(changes)? {
            ApplyOutcome::Applied(config) => {
                for (field, value) in changes {
                    trace!(service = %self.service.name(), %field, %value, "Field updated");
                }
                Ok(config)
            }
            ApplyOutcome::Dropped => {
                self.connected = false;
                Err(RampError::connection(
                    self.service.name(),
                    "connection dropped by service",
                ))
            }
        }
    }

    fn shutdown(&mut self) -> RampResult<()> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{single_change, ParamValue};
    use ramp_common::ManualClock;

    #[test]
    fn test_simulated_client_lifecycle() {
        let service = SimulatedConfigService::new("filter");
        let mut client = service.client();
        assert!(!client.is_connected());

        client.connect().unwrap();
        assert!(client.is_connected());
        assert_eq!(service.connection_count(), 1);

        let config = client
            .update_configuration(&single_change("filter_limit_max", 0.3))
            .unwrap();
        assert_eq!(config["filter_limit_max"], ParamValue::Double(0.3));

        client.shutdown().unwrap();
        assert!(!client.is_connected());
        assert_eq!(service.values_of("filter_limit_max"), vec![0.3]);
    }

    #[test]
    fn test_update_requires_connection() {
        let service = SimulatedConfigService::new("filter");
        let mut client = service.client();
        let result = client.update_configuration(&single_change("x", 1.0));
        assert!(matches!(result, Err(RampError::Connection { .. })));
        assert_eq!(service.update_count(), 0);
    }

    #[test]
    fn test_unreachable_service() {
        let service = SimulatedConfigService::new("filter");
        service.set_reachable(false);

        let mut client = service.client();
        let err = client.connect().unwrap_err();
        assert!(err.is_connection_loss());
        assert!(!client.is_connected());
    }

    #[test]
    fn test_initial_configuration_is_merged() {
        let initial = single_change("filter_limit_min", -1.0);
        let service = SimulatedConfigService::new("filter").with_initial(initial);
        let mut client = service.client();

        let config = client.connect().unwrap();
        assert_eq!(config["filter_limit_min"], ParamValue::Double(-1.0));

        client
            .update_configuration(&single_change("filter_limit_max", 2.0))
            .unwrap();
        let current = service.current();
        assert_eq!(current.len(), 2);
        assert_eq!(current["filter_limit_max"], ParamValue::Double(2.0));
    }

    #[test]
    fn test_reject_after() {
        let service = SimulatedConfigService::new("filter");
        let mut client = service.client();
        client.connect().unwrap();
        service.reject_updates_after(2);

        client.update_configuration(&single_change("x", 1.0)).unwrap();
        client.update_configuration(&single_change("x", 2.0)).unwrap();
        let err = client.update_configuration(&single_change("x", 3.0)).unwrap_err();

        assert!(matches!(err, RampError::Update { .. }));
        // Rejection leaves the connection usable
        assert!(client.is_connected());
        assert_eq!(service.values_of("x"), vec![1.0, 2.0]);
    }

    #[test]
    fn test_drop_after() {
        let service = SimulatedConfigService::new("filter");
        let mut client = service.client();
        client.connect().unwrap();
        service.drop_connection_after(1);

        client.update_configuration(&single_change("x", 1.0)).unwrap();
        let err = client.update_configuration(&single_change("x", 2.0)).unwrap_err();

        assert!(err.is_connection_loss());
        assert!(!client.is_connected());
    }

    #[test]
    fn test_latency_advances_manual_clock() {
        let clock = ManualClock::new();
        let service = SimulatedConfigService::new("filter").with_clock(clock.clone());
        service.set_latency(Duration::from_millis(30));

        let mut client = service.client();
        client.connect().unwrap();
        client.update_configuration(&single_change("x", 1.0)).unwrap();
        client.update_configuration(&single_change("x", 2.0)).unwrap();

        assert_eq!(clock.now(), Duration::from_millis(60));
        let stamps: Vec<_> = service.updates().iter().map(|u| u.at).collect();
        assert_eq!(
            stamps,
            vec![Some(Duration::from_millis(30)), Some(Duration::from_millis(60))]
        );
    }
}
