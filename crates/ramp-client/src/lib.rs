//! Configuration service clients.
//!
//! This crate provides:
//! - [`ConfigClient`] trait for pushing live configuration changes to a remote node
//! - [`simulated`] module with an in-memory service for tests and dry runs
//! - [`tcp`] module with a JSON-lines TCP client
//! - [`protocol`] module with the wire messages shared by client and server

pub mod protocol;
pub mod simulated;
pub mod tcp;

pub use simulated::*;
pub use tcp::*;

use ramp_common::RampResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single configuration value as understood by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Boolean parameter.
    Bool(bool),
    /// Integer parameter.
    Int(i64),
    /// Floating-point parameter.
    Double(f64),
    /// String parameter.
    Str(String),
}

impl ParamValue {
    /// Numeric view of the value, if it has one.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::Bool(_) | Self::Str(_) => None,
        }
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v:?}"),
        }
    }
}

/// Field name to value mapping, used for both change sets and full configurations.
pub type Configuration = BTreeMap<String, ParamValue>;

/// Build a change set that sets a single field.
#[must_use]
pub fn single_change(field: &str, value: impl Into<ParamValue>) -> Configuration {
    let mut changes = Configuration::new();
    changes.insert(field.to_string(), value.into());
    changes
}

/// Client for a remote node's live configuration.
///
/// One client talks to one logical service. Calls are blocking and
/// carry no retry logic; a failure is returned to the caller as-is.
pub trait ConfigClient: Send {
    /// Logical service name this client targets.
    fn service_name(&self) -> &str;

    /// Open the connection and check the service answers.
    ///
    /// Returns the service's current configuration.
    ///
    /// # Errors
    ///
    /// Returns `RampError::Connection` if the service cannot be reached.
    fn connect(&mut self) -> RampResult<Configuration>;

    /// Apply `changes` to the remote configuration.
    ///
    /// Returns the configuration the service reports after applying them.
    ///
    /// # Errors
    ///
    /// `RampError::Connection` or `RampError::Protocol` if the link is gone,
    /// `RampError::Update` if the service rejected the change.
    fn update_configuration(&mut self, changes: &Configuration) -> RampResult<Configuration>;

    /// Release the connection.
    ///
    /// # Errors
    ///
    /// Implementation-specific; releasing an unconnected client is not an error.
    fn shutdown(&mut self) -> RampResult<()>;

    /// Check if the client currently holds a connection.
    fn is_connected(&self) -> bool;
}

impl<C: ConfigClient + ?Sized> ConfigClient for Box<C> {
    fn service_name(&self) -> &str {
        (**self).service_name()
    }

    fn connect(&mut self) -> RampResult<Configuration> {
        (**self).connect()
    }

    fn update_configuration(&mut self, changes: &Configuration) -> RampResult<Configuration> {
        (**self).update_configuration(changes)
    }

    fn shutdown(&mut self) -> RampResult<()> {
        (**self).shutdown()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
}
