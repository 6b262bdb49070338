//! # Modbus Master Error Handling
//!
//! Every failure surfaced by this crate, whatever the calling convention,
//! is a [`ModbusError`]: a human-readable message paired with the numeric
//! engine code it was produced from.
//!
//! ## Overview
//!
//! Protocol engines report failures as a bare [`Errno`]. The error
//! translator ([`translate`]) turns that code into a `ModbusError` using the
//! engine's own rendering of the code, so the message a caller sees is the
//! one the engine would print. Translation is pure: the same code always
//! yields the same error, whichever adapter carried the call.
//!
//! ## Error Classification
//!
//! The numeric code keeps the error machine-checkable:
//!
//! ```rust
//! use modbus_master::{errno, ModbusError, ModbusException};
//!
//! let err = ModbusError::new("Illegal data address", errno::EMBXILADD);
//! assert!(err.is_exception());
//! assert_eq!(err.exception(), Some(ModbusException::IllegalDataAddress));
//! assert!(!err.is_transport_error());
//! ```
//!
//! ## Retry Logic
//!
//! Nothing in this crate retries. Callers that want to can key off
//! [`ModbusError::is_recoverable`]:
//!
//! ```rust
//! use modbus_master::{ModbusResult, ResultClient, SimulatedEngine};
//!
//! fn read_with_retry(client: &ResultClient<SimulatedEngine>, attempts: usize) -> ModbusResult<Vec<u16>> {
//!     let mut last = None;
//!     for _ in 0..attempts {
//!         match client.read_registers(0, 4) {
//!             Ok(values) => return Ok(values),
//!             Err(error) if error.is_recoverable() => last = Some(error),
//!             Err(error) => return Err(error),
//!         }
//!     }
//!     Err(last.unwrap_or_else(|| modbus_master::ModbusError::new("no attempt made", modbus_master::errno::EINVAL)))
//! }
//! ```

use thiserror::Error;

use crate::engine::{Errno, ProtocolEngine};
use crate::errno;
use crate::protocol::ModbusException;

/// Result type alias for Modbus operations
///
/// Used by the explicit-result calling convention and by the
/// [`Connection`](crate::Connection) operation set.
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Structured failure of a Modbus operation
///
/// Carries the message rendered by the protocol engine and the numeric
/// code it was rendered from. Immutable once constructed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ModbusError {
    message: String,
    code: i32,
}

impl ModbusError {
    /// Create an error from a message and an engine code
    pub fn new<S: Into<String>>(message: S, code: i32) -> Self {
        Self {
            message: message.into(),
            code,
        }
    }

    /// Create an error rendered with the built-in code catalog
    ///
    /// Used for failures that never reach an engine, such as a full
    /// worker queue.
    pub fn from_code(code: i32) -> Self {
        Self::new(errno::describe(code), code)
    }

    /// Human-readable description of the failure
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Numeric engine code
    pub fn code(&self) -> i32 {
        self.code
    }

    /// Exception reported by the remote device, if this is an exception response
    pub fn exception(&self) -> Option<ModbusException> {
        let offset = self.code.checked_sub(errno::MODBUS_ENOBASE)?;
        u8::try_from(offset).ok().and_then(ModbusException::from_u8)
    }

    /// Check if the remote device answered with an exception response
    pub fn is_exception(&self) -> bool {
        self.exception().is_some()
    }

    /// Check if the operation ran out of time
    pub fn is_timeout(&self) -> bool {
        self.code == errno::ETIMEDOUT
    }

    /// Check if the error is a network/transport issue
    ///
    /// # Examples
    ///
    /// ```rust
    /// use modbus_master::{errno, ModbusError};
    ///
    /// assert!(ModbusError::from_code(errno::ECONNREFUSED).is_transport_error());
    /// assert!(!ModbusError::from_code(errno::EMBXILVAL).is_transport_error());
    /// ```
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self.code,
            errno::EIO
                | errno::EBADF
                | errno::EPIPE
                | errno::EADDRNOTAVAIL
                | errno::ECONNABORTED
                | errno::ECONNRESET
                | errno::ENOTCONN
                | errno::ETIMEDOUT
                | errno::ECONNREFUSED
                | errno::EHOSTUNREACH
        )
    }

    /// Check if the error is recoverable (can retry)
    ///
    /// Transport failures, a full queue and the busy/acknowledge exceptions
    /// may succeed on a later attempt. Argument and limit errors never will.
    pub fn is_recoverable(&self) -> bool {
        if self.is_transport_error() || self.code == errno::EAGAIN || self.code == errno::EBUSY {
            return true;
        }
        matches!(
            self.exception(),
            Some(ModbusException::Acknowledge) | Some(ModbusException::ServerDeviceBusy)
        )
    }
}

/// Error translator: turn an engine failure code into a [`ModbusError`]
///
/// The message is the engine's own rendering of the code.
pub fn translate<E: ProtocolEngine + ?Sized>(engine: &E, code: Errno) -> ModbusError {
    ModbusError::new(engine.strerror(code), code.0)
}
