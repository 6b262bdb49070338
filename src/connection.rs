//! # Connection Handle
//!
//! A [`Connection`] owns exactly one protocol engine session for its whole
//! lifetime and is the only path from the calling-convention adapters to
//! the engine. Lifecycle, per-connection properties and diagnostics live
//! here; the data operations are in [`operations`](crate::operations).
//!
//! A connection is not safe for concurrent use. Share it across threads
//! or tasks through an [`AsyncClient`](crate::AsyncClient), which
//! serializes every call on one worker.
//!
//! ```rust
//! use modbus_master::{Connection, SimulatedDevice};
//!
//! let device = SimulatedDevice::new();
//! let mut conn = Connection::with_engine(device.engine());
//! conn.set_response_timeout(1.5).unwrap();
//! assert_eq!(conn.response_timeout(), 1.5);
//!
//! conn.connect().unwrap();
//! conn.write_register(3, 0x00FF).unwrap();
//! assert_eq!(conn.read_register(3).unwrap(), 0x00FF);
//! ```

use std::fmt;

use tracing::debug;

use crate::config::ClientConfig;
use crate::engine::{EngineResult, Errno, ProtocolEngine, TcpEngine};
use crate::errno;
use crate::error::{translate, ModbusResult};
use crate::protocol::{ErrorRecoveryMode, SlaveId, Timeout};
use crate::stats::OperationStats;

/// One logical link to a remote Modbus device
pub struct Connection<E: ProtocolEngine = TcpEngine> {
    pub(crate) engine: E,
    pub(crate) stats: OperationStats,
}

impl Connection<TcpEngine> {
    /// Create a Modbus TCP connection to `address:port`
    ///
    /// Never fails; resolution and connection errors surface on
    /// [`connect`](Connection::connect).
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self::with_engine(TcpEngine::new(address, port.to_string()))
    }

    /// Create a Modbus TCP connection and apply `config` to it
    pub fn from_config(config: &ClientConfig) -> ModbusResult<Self> {
        let mut connection = Self::new(config.host.clone(), config.port);
        connection.configure(config)?;
        Ok(connection)
    }
}

impl<E: ProtocolEngine> Connection<E> {
    /// Wrap an engine session
    pub fn with_engine(engine: E) -> Self {
        Self {
            engine,
            stats: OperationStats::new(),
        }
    }

    /// Apply the per-connection properties from `config`
    ///
    /// The host and port are fixed at construction and are not touched.
    pub fn configure(&mut self, config: &ClientConfig) -> ModbusResult<()> {
        config.validate()?;
        self.set_slave(config.slave)?;
        self.set_debug(config.debug);
        self.set_response_timeout(config.response_timeout)?;
        self.set_byte_timeout(config.byte_timeout)?;
        self.set_error_recovery(config.error_recovery)
    }

    fn check<T>(&self, result: EngineResult<T>) -> ModbusResult<T> {
        result.map_err(|code| translate(&self.engine, code))
    }

    /// Engine behind this connection
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Mutable access to the engine behind this connection
    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Establish the session
    pub fn connect(&mut self) -> ModbusResult<()> {
        let result = self.engine.connect();
        match &result {
            Ok(()) => debug!("modbus session established"),
            Err(code) => debug!(code = code.0, "modbus connect failed"),
        }
        self.check(result)
    }

    /// Close the session. Safe when not connected.
    pub fn disconnect(&mut self) {
        if self.engine.is_connected() {
            debug!("closing modbus session");
        }
        self.engine.close();
    }

    /// Check if a session is open
    pub fn is_connected(&self) -> bool {
        self.engine.is_connected()
    }

    /// Discard buffered bytes on the session, returning how many were dropped
    pub fn flush(&mut self) -> ModbusResult<usize> {
        let result = self.engine.flush();
        self.check(result)
    }

    /// Bytes prepended to each frame (7 for Modbus TCP)
    pub fn header_length(&self) -> usize {
        self.engine.header_length()
    }

    /// Operation statistics collected so far
    pub fn stats(&self) -> OperationStats {
        self.stats.clone()
    }

    /// Clear the operation statistics
    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }

    pub fn slave(&self) -> SlaveId {
        self.engine.slave()
    }

    /// Set the unit identifier used by subsequent requests
    pub fn set_slave(&mut self, slave: SlaveId) -> ModbusResult<()> {
        let result = self.engine.set_slave(slave);
        self.check(result)
    }

    /// Raw socket descriptor of the session, -1 without one
    pub fn socket(&self) -> i32 {
        self.engine.socket()
    }

    /// Low-level socket passthrough
    ///
    /// `-1` closes the session. Engines may refuse other descriptors with
    /// `ENOTSUP`.
    pub fn set_socket(&mut self, socket: i32) -> ModbusResult<()> {
        let result = self.engine.set_socket(socket);
        self.check(result)
    }

    /// Response timeout in seconds
    pub fn response_timeout(&self) -> f64 {
        self.engine.response_timeout().as_secs_f64()
    }

    /// Set the response timeout in seconds, with microsecond precision
    pub fn set_response_timeout(&mut self, seconds: f64) -> ModbusResult<()> {
        let result = timeout_from_secs(seconds).and_then(|timeout| self.engine.set_response_timeout(timeout));
        self.check(result)
    }

    /// Inter-byte timeout in seconds
    pub fn byte_timeout(&self) -> f64 {
        self.engine.byte_timeout().as_secs_f64()
    }

    /// Set the inter-byte timeout in seconds; zero disables it
    ///
    /// `TcpEngine` only reports this value; replies are bounded by the
    /// response timeout.
    pub fn set_byte_timeout(&mut self, seconds: f64) -> ModbusResult<()> {
        let result = timeout_from_secs(seconds).and_then(|timeout| self.engine.set_byte_timeout(timeout));
        self.check(result)
    }

    pub fn debug(&self) -> bool {
        self.engine.debug()
    }

    /// Toggle engine-level request logging
    pub fn set_debug(&mut self, enabled: bool) {
        self.engine.set_debug(enabled);
    }

    pub fn error_recovery(&self) -> ErrorRecoveryMode {
        self.engine.error_recovery()
    }

    /// Store the error-recovery flags on the engine
    pub fn set_error_recovery(&mut self, mode: ErrorRecoveryMode) -> ModbusResult<()> {
        let result = self.engine.set_error_recovery(mode);
        self.check(result)
    }
}

fn timeout_from_secs(seconds: f64) -> EngineResult<Timeout> {
    Timeout::from_secs_f64(seconds).ok_or(Errno(errno::EINVAL))
}

impl<E: ProtocolEngine> Drop for Connection<E> {
    fn drop(&mut self) {
        self.engine.close();
    }
}

impl<E: ProtocolEngine + fmt::Debug> fmt::Debug for Connection<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("engine", &self.engine)
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{SimulatedDevice, SimulatedEngine};

    fn simulated() -> (Connection<SimulatedEngine>, SimulatedDevice) {
        let device = SimulatedDevice::new();
        (Connection::with_engine(device.engine()), device)
    }

    #[test]
    fn test_construct_never_connects() {
        let conn = Connection::new("192.0.2.1", 1502);
        assert!(!conn.is_connected());
        assert_eq!(conn.engine().port(), "1502");
        assert_eq!(conn.engine().host(), "192.0.2.1");
        assert_eq!(conn.header_length(), 7);
    }

    #[test]
    fn test_timeout_round_trip() {
        let (mut conn, _device) = simulated();
        conn.set_response_timeout(1.5).unwrap();
        assert_eq!(conn.engine().response_timeout(), Timeout { sec: 1, usec: 500_000 });
        assert_eq!(conn.response_timeout(), 1.5);

        conn.set_byte_timeout(0.000_25).unwrap();
        assert_eq!(conn.engine().byte_timeout(), Timeout { sec: 0, usec: 250 });
        assert_eq!(conn.byte_timeout(), 0.000_25);
    }

    #[test]
    fn test_invalid_timeouts() {
        let (mut conn, _device) = simulated();
        assert_eq!(conn.set_response_timeout(-1.0).unwrap_err().code(), errno::EINVAL);
        assert_eq!(conn.set_response_timeout(f64::NAN).unwrap_err().code(), errno::EINVAL);
        assert_eq!(conn.set_response_timeout(0.0).unwrap_err().code(), errno::EINVAL);
        assert_eq!(conn.response_timeout(), 0.5);
        assert!(conn.set_byte_timeout(0.0).is_ok());
    }

    #[test]
    fn test_lifecycle() {
        let (mut conn, device) = simulated();
        conn.disconnect();
        assert_eq!(conn.flush().unwrap_err().code(), errno::EBADF);

        conn.connect().unwrap();
        assert!(conn.is_connected());
        assert_eq!(conn.flush().unwrap(), 0);

        conn.disconnect();
        conn.disconnect();
        assert!(!conn.is_connected());
        assert_eq!(device.close_count(), 1);
    }

    #[test]
    fn test_connect_failure_is_translated() {
        let (mut conn, device) = simulated();
        device.fail_connect(errno::ECONNREFUSED);
        let err = conn.connect().unwrap_err();
        assert_eq!(err.code(), errno::ECONNREFUSED);
        assert_eq!(err.message(), "Connection refused");
    }

    #[test]
    fn test_drop_closes_session_once() {
        let device = SimulatedDevice::new();
        {
            let mut conn = Connection::with_engine(device.engine());
            conn.connect().unwrap();
        }
        assert_eq!(device.close_count(), 1);
    }

    #[test]
    fn test_properties() {
        let (mut conn, _device) = simulated();
        conn.set_slave(17).unwrap();
        assert_eq!(conn.slave(), 17);
        assert_eq!(conn.set_slave(249).unwrap_err().code(), errno::EINVAL);
        assert_eq!(conn.slave(), 17);

        conn.set_debug(true);
        assert!(conn.debug());

        let mode = ErrorRecoveryMode::LINK | ErrorRecoveryMode::PROTOCOL;
        conn.set_error_recovery(mode).unwrap();
        assert_eq!(conn.error_recovery(), mode);
    }

    #[test]
    fn test_configure() {
        let (mut conn, _device) = simulated();
        let config = ClientConfig {
            slave: 5,
            response_timeout: 2.25,
            byte_timeout: 0.0,
            error_recovery: ErrorRecoveryMode::LINK,
            ..ClientConfig::default()
        };
        conn.configure(&config).unwrap();
        assert_eq!(conn.slave(), 5);
        assert_eq!(conn.response_timeout(), 2.25);
        assert_eq!(conn.byte_timeout(), 0.0);
        assert_eq!(conn.error_recovery(), ErrorRecoveryMode::LINK);
    }

    #[test]
    fn test_stats_follow_operations() {
        let (mut conn, device) = simulated();
        conn.connect().unwrap();
        conn.write_register(0, 1).unwrap();
        device.fail_next(errno::EMBXSFAIL);
        assert!(conn.read_register(0).is_err());

        let stats = conn.stats();
        assert_eq!(stats.total_operations, 2);
        assert_eq!(stats.failed_operations, 1);
        assert_eq!(stats.last_error_code, Some(errno::EMBXSFAIL));

        conn.reset_stats();
        assert_eq!(conn.stats().total_operations, 0);
    }
}
