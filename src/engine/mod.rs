//! # Protocol Engines
//!
//! A protocol engine owns the session with the remote device: it frames
//! requests, applies the configured timeouts and reports each outcome as a
//! bare success value or an [`Errno`]. The client facade never touches the
//! wire itself; everything below the [`ProtocolEngine`] trait is the
//! engine's business.
//!
//! ## Shipped Engines
//!
//! ### Modbus TCP (`TcpEngine`)
//! - Backed by `tokio-modbus`, driven on a private current-thread runtime
//! - Response timeout applied to connect and to every request
//! - Link/protocol error recovery
//!
//! ### Simulated device (`SimulatedEngine`)
//! - In-memory register bank shared through [`SimulatedDevice`]
//! - Scripted failures and latency, request journal
//! - Same validation and limits as the TCP engine
//!
//! ## Usage Example
//!
//! ```rust
//! use modbus_master::engine::{ProtocolEngine, SimulatedDevice};
//! use modbus_master::operations::{Reply, Request};
//!
//! let device = SimulatedDevice::new();
//! device.bank().write_holding_registers(0, &[7, 8]);
//!
//! let mut engine = device.engine();
//! engine.connect().unwrap();
//! let reply = engine.execute(&Request::ReadRegisters { address: 0, count: 2 }).unwrap();
//! assert_eq!(reply, Reply::Registers(vec![7, 8]));
//! ```

mod simulated;
mod tcp;

pub use simulated::{SimulatedDevice, SimulatedEngine};
pub use tcp::TcpEngine;

use std::fmt;

use crate::errno;
use crate::operations::{Reply, Request};
use crate::protocol::{is_valid_slave, ErrorRecoveryMode, SlaveId, Timeout};

/// Failure code reported by a protocol engine
///
/// Either a POSIX code or one of the Modbus codes from [`errno`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Errno(pub i32);

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", errno::describe(self.0), self.0)
    }
}

/// Result of an engine call
pub type EngineResult<T> = Result<T, Errno>;

/// Session-owning Modbus protocol engine
///
/// Engines are driven from one thread at a time through `&mut self`; they
/// only need to be movable to the async adapter's worker thread.
///
/// Property changes take effect on the next request.
pub trait ProtocolEngine: Send + 'static {
    /// Establish the session; an existing session is replaced
    fn connect(&mut self) -> EngineResult<()>;

    /// Close the session. Idempotent.
    fn close(&mut self);

    /// Check if a session is currently open
    fn is_connected(&self) -> bool;

    /// Discard bytes buffered on the session, returning how many were dropped
    fn flush(&mut self) -> EngineResult<usize>;

    /// Issue one request and wait for its outcome
    fn execute(&mut self, request: &Request<'_>) -> EngineResult<Reply>;

    /// Bytes prepended to every PDU on this transport
    fn header_length(&self) -> usize;

    fn slave(&self) -> SlaveId;
    fn set_slave(&mut self, slave: SlaveId) -> EngineResult<()>;

    /// Raw socket descriptor, or -1 without a session
    fn socket(&self) -> i32;

    /// Replace the session's socket descriptor
    ///
    /// `-1` closes the session and setting the descriptor already in use is
    /// a no-op. An engine may refuse to adopt any other descriptor with
    /// `ENOTSUP`; `TcpEngine` and `SimulatedEngine` both do.
    fn set_socket(&mut self, socket: i32) -> EngineResult<()>;

    fn response_timeout(&self) -> Timeout;
    fn set_response_timeout(&mut self, timeout: Timeout) -> EngineResult<()>;

    fn byte_timeout(&self) -> Timeout;

    /// Set the inter-byte timeout
    ///
    /// Engines that read whole frames under the response timeout store the
    /// value for reporting only.
    fn set_byte_timeout(&mut self, timeout: Timeout) -> EngineResult<()>;

    fn debug(&self) -> bool;
    fn set_debug(&mut self, enabled: bool);

    fn error_recovery(&self) -> ErrorRecoveryMode;
    fn set_error_recovery(&mut self, mode: ErrorRecoveryMode) -> EngineResult<()>;

    /// Render a failure code as a human-readable message
    fn strerror(&self, code: Errno) -> String {
        errno::describe(code.0)
    }
}

/// Slave id check shared by the engines
pub(crate) fn check_slave(slave: SlaveId) -> EngineResult<()> {
    if is_valid_slave(slave) {
        Ok(())
    } else {
        Err(Errno(errno::EINVAL))
    }
}

/// Response timeout check shared by the engines: non-zero, normalized
pub(crate) fn check_response_timeout(timeout: Timeout) -> EngineResult<()> {
    if timeout.usec > 999_999 || timeout.is_zero() {
        Err(Errno(errno::EINVAL))
    } else {
        Ok(())
    }
}

/// Byte timeout check shared by the engines: zero disables it
pub(crate) fn check_byte_timeout(timeout: Timeout) -> EngineResult<()> {
    if timeout.usec > 999_999 {
        Err(Errno(errno::EINVAL))
    } else {
        Ok(())
    }
}

/// Default response timeout (0.5 s)
pub const DEFAULT_RESPONSE_TIMEOUT: Timeout = Timeout { sec: 0, usec: 500_000 };

/// Default inter-byte timeout (0.5 s)
pub const DEFAULT_BYTE_TIMEOUT: Timeout = Timeout { sec: 0, usec: 500_000 };

/// Modbus TCP MBAP header length
pub const TCP_HEADER_LENGTH: usize = 7;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_checks() {
        assert!(check_slave(0).is_ok());
        assert!(check_slave(247).is_ok());
        assert!(check_slave(255).is_ok());
        assert_eq!(check_slave(250), Err(Errno(errno::EINVAL)));

        assert!(check_response_timeout(Timeout::new(1, 0)).is_ok());
        assert_eq!(check_response_timeout(Timeout::ZERO), Err(Errno(errno::EINVAL)));
        assert_eq!(
            check_response_timeout(Timeout { sec: 0, usec: 1_000_000 }),
            Err(Errno(errno::EINVAL))
        );
        assert!(check_byte_timeout(Timeout::ZERO).is_ok());
    }

    #[test]
    fn test_errno_display() {
        assert_eq!(Errno(errno::EINVAL).to_string(), "Invalid argument (code 22)");
    }
}
