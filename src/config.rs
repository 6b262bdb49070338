/// Client configuration
///
/// [`ClientConfig`] carries everything needed to build and tune a client.
/// It derives `serde` so applications can embed it in their own
/// configuration files; every field has a default, so a partial section
/// deserializes cleanly.

use serde::{Deserialize, Serialize};

use crate::errno;
use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{is_valid_slave, ErrorRecoveryMode, SlaveId, Timeout, TCP_SLAVE};
use crate::DEFAULT_TCP_PORT;

/// Default number of queued fallible jobs an async client accepts
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Connection and adapter settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Remote host name or IP address
    pub host: String,
    /// Remote TCP port
    pub port: u16,
    /// Unit identifier (0-247, or 255)
    pub slave: SlaveId,
    /// Engine-level request logging
    pub debug: bool,
    /// Response timeout in seconds
    pub response_timeout: f64,
    /// Inter-byte timeout in seconds, zero disables it
    pub byte_timeout: f64,
    /// Error-recovery flags handed to the engine
    pub error_recovery: ErrorRecoveryMode,
    /// Fallible jobs an async client queues before rejecting with `EAGAIN`
    pub queue_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_TCP_PORT,
            slave: TCP_SLAVE,
            debug: false,
            response_timeout: 0.5,
            byte_timeout: 0.5,
            error_recovery: ErrorRecoveryMode::NONE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl ClientConfig {
    /// Default configuration for `host:port`
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Check every field before it is applied
    pub fn validate(&self) -> ModbusResult<()> {
        let invalid = |what: &str| {
            ModbusError::new(format!("{}: {}", errno::describe(errno::EINVAL), what), errno::EINVAL)
        };

        if self.host.is_empty() {
            return Err(invalid("empty host"));
        }
        if !is_valid_slave(self.slave) {
            return Err(invalid("slave must be 0-247 or 255"));
        }
        match Timeout::from_secs_f64(self.response_timeout) {
            Some(timeout) if !timeout.is_zero() => {}
            _ => return Err(invalid("response timeout must be positive")),
        }
        if Timeout::from_secs_f64(self.byte_timeout).is_none() {
            return Err(invalid("byte timeout must not be negative"));
        }
        if self.queue_capacity == 0 {
            return Err(invalid("queue capacity must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.port, 502);
        assert_eq!(config.slave, 0xFF);
        assert_eq!(config.response_timeout, 0.5);
        assert_eq!(config.byte_timeout, 0.5);
        assert_eq!(config.queue_capacity, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut config = ClientConfig::new("plc.local", 1502);
        config.slave = 250;
        assert_eq!(config.validate().unwrap_err().code(), errno::EINVAL);

        let mut config = ClientConfig::new("plc.local", 1502);
        config.response_timeout = 0.0;
        assert!(config.validate().is_err());

        let mut config = ClientConfig::new("plc.local", 1502);
        config.byte_timeout = -0.5;
        assert!(config.validate().is_err());

        let mut config = ClientConfig::new("plc.local", 1502);
        config.queue_capacity = 0;
        assert!(config.validate().is_err());

        let config = ClientConfig::new("", 1502);
        let err = config.validate().unwrap_err();
        assert!(err.message().starts_with("Invalid argument"));
    }

    #[test]
    fn test_partial_json() {
        let config: ClientConfig = serde_json::from_str(
            r#"{ "host": "10.0.0.7", "slave": 3, "error_recovery": { "link": true } }"#,
        )
        .unwrap();
        assert_eq!(config.host, "10.0.0.7");
        assert_eq!(config.port, 502);
        assert_eq!(config.slave, 3);
        assert_eq!(config.error_recovery, ErrorRecoveryMode::LINK);
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
    }
}
