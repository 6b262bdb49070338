/// Modbus protocol definitions
///
/// This module contains the protocol-level vocabulary shared by the
/// engines and the client facade: function codes, exception codes, slave
/// identifiers, the timeout value type and the error-recovery flag set.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::time::Duration;

use crate::errno;

/// Modbus address type (0-65535)
pub type ModbusAddress = u16;

/// Modbus value type (16-bit register value)
pub type ModbusValue = u16;

/// Modbus slave/unit identifier (0-247, or 255 for TCP)
pub type SlaveId = u8;

/// Broadcast slave address
pub const BROADCAST_ADDRESS: SlaveId = 0;

/// Highest addressable slave on a Modbus network
pub const MAX_SLAVE_ADDRESS: SlaveId = 247;

/// Unit identifier used when the TCP device does not route by unit id
pub const TCP_SLAVE: SlaveId = 0xFF;

/// Check if `slave` is accepted as a unit identifier
pub fn is_valid_slave(slave: SlaveId) -> bool {
    slave <= MAX_SLAVE_ADDRESS || slave == TCP_SLAVE
}

/// Modbus function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ModbusFunction {
    /// Read Coils (0x01)
    ReadCoils = 0x01,
    /// Read Discrete Inputs (0x02)
    ReadDiscreteInputs = 0x02,
    /// Read Holding Registers (0x03)
    ReadHoldingRegisters = 0x03,
    /// Read Input Registers (0x04)
    ReadInputRegisters = 0x04,
    /// Write Single Coil (0x05)
    WriteSingleCoil = 0x05,
    /// Write Single Register (0x06)
    WriteSingleRegister = 0x06,
    /// Write Multiple Coils (0x0F)
    WriteMultipleCoils = 0x0F,
    /// Write Multiple Registers (0x10)
    WriteMultipleRegisters = 0x10,
    /// Mask Write Register (0x16)
    MaskWriteRegister = 0x16,
    /// Read/Write Multiple Registers (0x17)
    ReadWriteMultipleRegisters = 0x17,
}

impl ModbusFunction {
    /// Convert from u8 to ModbusFunction
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(ModbusFunction::ReadCoils),
            0x02 => Some(ModbusFunction::ReadDiscreteInputs),
            0x03 => Some(ModbusFunction::ReadHoldingRegisters),
            0x04 => Some(ModbusFunction::ReadInputRegisters),
            0x05 => Some(ModbusFunction::WriteSingleCoil),
            0x06 => Some(ModbusFunction::WriteSingleRegister),
            0x0F => Some(ModbusFunction::WriteMultipleCoils),
            0x10 => Some(ModbusFunction::WriteMultipleRegisters),
            0x16 => Some(ModbusFunction::MaskWriteRegister),
            0x17 => Some(ModbusFunction::ReadWriteMultipleRegisters),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Check if this function reads data back from the device
    pub fn is_read_function(self) -> bool {
        matches!(
            self,
            ModbusFunction::ReadCoils
                | ModbusFunction::ReadDiscreteInputs
                | ModbusFunction::ReadHoldingRegisters
                | ModbusFunction::ReadInputRegisters
                | ModbusFunction::ReadWriteMultipleRegisters
        )
    }

    /// Check if this function changes device state
    pub fn is_write_function(self) -> bool {
        matches!(
            self,
            ModbusFunction::WriteSingleCoil
                | ModbusFunction::WriteSingleRegister
                | ModbusFunction::WriteMultipleCoils
                | ModbusFunction::WriteMultipleRegisters
                | ModbusFunction::MaskWriteRegister
                | ModbusFunction::ReadWriteMultipleRegisters
        )
    }
}

impl fmt::Display for ModbusFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModbusFunction::ReadCoils => "Read Coils",
            ModbusFunction::ReadDiscreteInputs => "Read Discrete Inputs",
            ModbusFunction::ReadHoldingRegisters => "Read Holding Registers",
            ModbusFunction::ReadInputRegisters => "Read Input Registers",
            ModbusFunction::WriteSingleCoil => "Write Single Coil",
            ModbusFunction::WriteSingleRegister => "Write Single Register",
            ModbusFunction::WriteMultipleCoils => "Write Multiple Coils",
            ModbusFunction::WriteMultipleRegisters => "Write Multiple Registers",
            ModbusFunction::MaskWriteRegister => "Mask Write Register",
            ModbusFunction::ReadWriteMultipleRegisters => "Read/Write Multiple Registers",
        };
        write!(f, "{} (0x{:02X})", name, *self as u8)
    }
}

/// Modbus exception codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ModbusException {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    ServerDeviceFailure = 0x04,
    Acknowledge = 0x05,
    ServerDeviceBusy = 0x06,
    NegativeAcknowledge = 0x07,
    MemoryParityError = 0x08,
    GatewayPathUnavailable = 0x0A,
    GatewayTargetDeviceFailedToRespond = 0x0B,
}

impl ModbusException {
    /// Convert from u8 to ModbusException
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(ModbusException::IllegalFunction),
            0x02 => Some(ModbusException::IllegalDataAddress),
            0x03 => Some(ModbusException::IllegalDataValue),
            0x04 => Some(ModbusException::ServerDeviceFailure),
            0x05 => Some(ModbusException::Acknowledge),
            0x06 => Some(ModbusException::ServerDeviceBusy),
            0x07 => Some(ModbusException::NegativeAcknowledge),
            0x08 => Some(ModbusException::MemoryParityError),
            0x0A => Some(ModbusException::GatewayPathUnavailable),
            0x0B => Some(ModbusException::GatewayTargetDeviceFailedToRespond),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Engine error code reported for this exception
    pub fn errno(self) -> i32 {
        errno::MODBUS_ENOBASE + self.to_u8() as i32
    }

    /// Get human-readable description
    pub fn description(self) -> &'static str {
        match self {
            ModbusException::IllegalFunction => "The function code received in the query is not an allowable action for the server",
            ModbusException::IllegalDataAddress => "The data address received in the query is not an allowable address for the server",
            ModbusException::IllegalDataValue => "A value contained in the query data field is not an allowable value for server",
            ModbusException::ServerDeviceFailure => "An unrecoverable error occurred while the server was attempting to perform the requested action",
            ModbusException::Acknowledge => "The server has accepted the request and is processing it, but a long duration of time will be required to do so",
            ModbusException::ServerDeviceBusy => "The server is engaged in processing a long-duration program command",
            ModbusException::NegativeAcknowledge => "The server cannot perform the program function received in the query",
            ModbusException::MemoryParityError => "The server attempted to read record file, but detected a parity error in the memory",
            ModbusException::GatewayPathUnavailable => "Gateway was unable to allocate an internal communication path",
            ModbusException::GatewayTargetDeviceFailedToRespond => "No response was obtained from the target device",
        }
    }
}

impl fmt::Display for ModbusException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Modbus Exception 0x{:02X}: {}", self.to_u8(), self.description())
    }
}

/// Timeout with microsecond resolution, as engines store it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timeout {
    /// Whole seconds
    pub sec: u32,
    /// Microseconds, always below one second
    pub usec: u32,
}

impl Timeout {
    /// Disabled timeout
    pub const ZERO: Timeout = Timeout { sec: 0, usec: 0 };

    /// Build from whole seconds and microseconds, carrying overflowing microseconds
    pub fn new(sec: u32, usec: u32) -> Self {
        Self {
            sec: sec.saturating_add(usec / 1_000_000),
            usec: usec % 1_000_000,
        }
    }

    /// Decompose floating seconds, rounded to the nearest microsecond
    ///
    /// Returns `None` for negative, non-finite or unrepresentable values.
    pub fn from_secs_f64(seconds: f64) -> Option<Self> {
        if !seconds.is_finite() || seconds < 0.0 {
            return None;
        }
        let micros = (seconds * 1_000_000.0).round();
        if micros > (u32::MAX as f64) * 1_000_000.0 + 999_999.0 {
            return None;
        }
        let micros = micros as u64;
        Some(Self {
            sec: (micros / 1_000_000) as u32,
            usec: (micros % 1_000_000) as u32,
        })
    }

    /// Compose back into floating seconds
    pub fn as_secs_f64(&self) -> f64 {
        self.sec as f64 + self.usec as f64 / 1_000_000.0
    }

    /// Check if the timeout is disabled
    pub fn is_zero(&self) -> bool {
        self.sec == 0 && self.usec == 0
    }

    /// Convert to a std duration
    pub fn as_duration(&self) -> Duration {
        Duration::new(self.sec as u64, self.usec.min(999_999) * 1_000)
    }
}

impl From<Timeout> for Duration {
    fn from(timeout: Timeout) -> Self {
        timeout.as_duration()
    }
}

impl TryFrom<Duration> for Timeout {
    type Error = std::num::TryFromIntError;

    fn try_from(duration: Duration) -> Result<Self, Self::Error> {
        Ok(Self {
            sec: u32::try_from(duration.as_secs())?,
            usec: duration.subsec_micros(),
        })
    }
}

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}s", self.sec, self.usec)
    }
}

/// Error-recovery flags consulted by the protocol engine
///
/// The facade only stores and forwards the set; recovery itself is the
/// engine's business.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorRecoveryMode {
    /// Re-establish the link after a transport failure
    pub link: bool,
    /// Discard pending bytes after a timeout or malformed response
    pub protocol: bool,
}

impl ErrorRecoveryMode {
    /// No recovery
    pub const NONE: ErrorRecoveryMode = ErrorRecoveryMode { link: false, protocol: false };
    /// Link-level recovery
    pub const LINK: ErrorRecoveryMode = ErrorRecoveryMode { link: true, protocol: false };
    /// Protocol-level recovery
    pub const PROTOCOL: ErrorRecoveryMode = ErrorRecoveryMode { link: false, protocol: true };

    const LINK_BIT: u32 = 1 << 1;
    const PROTOCOL_BIT: u32 = 1 << 2;

    /// Check if every flag in `other` is set
    pub fn contains(self, other: ErrorRecoveryMode) -> bool {
        (!other.link || self.link) && (!other.protocol || self.protocol)
    }

    /// Check if no flag is set
    pub fn is_none(self) -> bool {
        self == Self::NONE
    }

    /// Bit representation (`LINK = 1 << 1`, `PROTOCOL = 1 << 2`)
    pub fn bits(self) -> u32 {
        let mut bits = 0;
        if self.link {
            bits |= Self::LINK_BIT;
        }
        if self.protocol {
            bits |= Self::PROTOCOL_BIT;
        }
        bits
    }

    /// Parse a bit representation, rejecting unknown bits
    pub fn from_bits(bits: u32) -> Option<Self> {
        if bits & !(Self::LINK_BIT | Self::PROTOCOL_BIT) != 0 {
            return None;
        }
        Some(Self {
            link: bits & Self::LINK_BIT != 0,
            protocol: bits & Self::PROTOCOL_BIT != 0,
        })
    }
}

impl BitOr for ErrorRecoveryMode {
    type Output = ErrorRecoveryMode;

    fn bitor(self, rhs: Self) -> Self::Output {
        ErrorRecoveryMode {
            link: self.link || rhs.link,
            protocol: self.protocol || rhs.protocol,
        }
    }
}

impl BitOrAssign for ErrorRecoveryMode {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = *self | rhs;
    }
}

impl fmt::Display for ErrorRecoveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.link, self.protocol) {
            (false, false) => write!(f, "none"),
            (true, false) => write!(f, "link"),
            (false, true) => write!(f, "protocol"),
            (true, true) => write!(f, "link|protocol"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_conversion() {
        assert_eq!(ModbusFunction::from_u8(0x03), Some(ModbusFunction::ReadHoldingRegisters));
        assert_eq!(ModbusFunction::from_u8(0x17), Some(ModbusFunction::ReadWriteMultipleRegisters));
        assert_eq!(ModbusFunction::MaskWriteRegister.to_u8(), 0x16);
        assert!(ModbusFunction::from_u8(0xFF).is_none());
        assert!(ModbusFunction::ReadWriteMultipleRegisters.is_read_function());
        assert!(ModbusFunction::ReadWriteMultipleRegisters.is_write_function());
    }

    #[test]
    fn test_exception_conversion() {
        assert_eq!(ModbusException::from_u8(0x02), Some(ModbusException::IllegalDataAddress));
        assert_eq!(ModbusException::from_u8(0x07), Some(ModbusException::NegativeAcknowledge));
        assert_eq!(ModbusException::IllegalDataAddress.errno(), errno::EMBXILADD);
        assert_eq!(ModbusException::GatewayTargetDeviceFailedToRespond.errno(), errno::EMBXGTAR);
        assert!(ModbusException::from_u8(0x09).is_none());
    }

    #[test]
    fn test_slave_validation() {
        assert!(is_valid_slave(BROADCAST_ADDRESS));
        assert!(is_valid_slave(1));
        assert!(is_valid_slave(247));
        assert!(is_valid_slave(TCP_SLAVE));
        assert!(!is_valid_slave(248));
        assert!(!is_valid_slave(254));
    }

    #[test]
    fn test_timeout_decomposition() {
        let t = Timeout::from_secs_f64(1.5).unwrap();
        assert_eq!(t, Timeout { sec: 1, usec: 500_000 });
        assert_eq!(t.as_secs_f64(), 1.5);

        let t = Timeout::from_secs_f64(0.0000014).unwrap();
        assert_eq!(t, Timeout { sec: 0, usec: 1 });

        assert!(Timeout::from_secs_f64(-0.1).is_none());
        assert!(Timeout::from_secs_f64(f64::NAN).is_none());
        assert!(Timeout::from_secs_f64(f64::INFINITY).is_none());
        assert!(Timeout::from_secs_f64(1e12).is_none());
    }

    #[test]
    fn test_timeout_duration() {
        let t = Timeout::new(2, 1_250_000);
        assert_eq!(t, Timeout { sec: 3, usec: 250_000 });
        assert_eq!(Duration::from(t), Duration::from_millis(3250));
        assert_eq!(Timeout::try_from(Duration::from_micros(500_001)).unwrap(), Timeout { sec: 0, usec: 500_001 });
        assert_eq!(t.to_string(), "3.250000s");
    }

    #[test]
    fn test_recovery_flags() {
        let both = ErrorRecoveryMode::LINK | ErrorRecoveryMode::PROTOCOL;
        assert!(both.contains(ErrorRecoveryMode::LINK));
        assert!(both.contains(ErrorRecoveryMode::PROTOCOL));
        assert!(!ErrorRecoveryMode::LINK.contains(ErrorRecoveryMode::PROTOCOL));
        assert!(ErrorRecoveryMode::NONE.is_none());

        assert_eq!(ErrorRecoveryMode::NONE.bits(), 0);
        assert_eq!(ErrorRecoveryMode::LINK.bits(), 2);
        assert_eq!(ErrorRecoveryMode::PROTOCOL.bits(), 4);
        assert_eq!(both.bits(), 6);
        assert_eq!(ErrorRecoveryMode::from_bits(6), Some(both));
        assert_eq!(ErrorRecoveryMode::from_bits(1), None);
        assert_eq!(both.to_string(), "link|protocol");
    }
}
