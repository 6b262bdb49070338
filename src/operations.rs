//! # Operation Set
//!
//! The fixed catalog of Modbus data operations a [`Connection`] can issue,
//! and the [`Request`] value each one is lowered to before it reaches the
//! protocol engine.
//!
//! | Operation | Function | Result |
//! |-----------|----------|--------|
//! | [`read_bits`](Connection::read_bits) | 0x01 | `count` bytes, each 0 or 1 |
//! | [`read_input_bits`](Connection::read_input_bits) | 0x02 | `count` bytes, each 0 or 1 |
//! | [`read_register`](Connection::read_register) | 0x03 | one value |
//! | [`read_registers`](Connection::read_registers) | 0x03 | `count` values |
//! | [`read_input_registers`](Connection::read_input_registers) | 0x04 | `count` values |
//! | [`write_bit`](Connection::write_bit) | 0x05 | - |
//! | [`write_bits`](Connection::write_bits) | 0x0F | - |
//! | [`write_register`](Connection::write_register) | 0x06 | - |
//! | [`write_registers`](Connection::write_registers) | 0x10 | - |
//! | [`mask_write_register`](Connection::mask_write_register) | 0x16 | - |
//! | [`write_and_read_registers`](Connection::write_and_read_registers) | 0x17 | `read_count` values |
//!
//! Every operation is validated before the engine sees it: zero counts and
//! empty payloads fail with `EINVAL`. Protocol size limits are enforced by
//! the engines (`EMBMDATA`).

use std::borrow::Cow;
use std::fmt;

use tracing::debug;

use crate::connection::Connection;
use crate::engine::{Errno, ProtocolEngine};
use crate::errno;
use crate::error::{translate, ModbusResult};
use crate::protocol::{ModbusAddress, ModbusFunction, ModbusValue};
use crate::stats::OperationTimer;
use crate::{
    MAX_READ_BITS, MAX_READ_REGISTERS, MAX_WRITE_BITS, MAX_WRITE_REGISTERS, MAX_WR_READ_REGISTERS,
    MAX_WR_WRITE_REGISTERS,
};

/// A validated intent handed to the protocol engine
///
/// Payloads borrow from the caller where possible; [`Request::into_owned`]
/// detaches them, which is what request journals store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request<'a> {
    ReadBits {
        address: ModbusAddress,
        count: u16,
    },
    ReadInputBits {
        address: ModbusAddress,
        count: u16,
    },
    ReadRegisters {
        address: ModbusAddress,
        count: u16,
    },
    ReadInputRegisters {
        address: ModbusAddress,
        count: u16,
    },
    WriteBit {
        address: ModbusAddress,
        value: bool,
    },
    WriteBits {
        address: ModbusAddress,
        values: Cow<'a, [u8]>,
    },
    WriteRegister {
        address: ModbusAddress,
        value: ModbusValue,
    },
    WriteRegisters {
        address: ModbusAddress,
        values: Cow<'a, [u16]>,
    },
    MaskWriteRegister {
        address: ModbusAddress,
        and_mask: u16,
        or_mask: u16,
    },
    WriteAndReadRegisters {
        write_address: ModbusAddress,
        values: Cow<'a, [u16]>,
        read_address: ModbusAddress,
        read_count: u16,
    },
}

impl<'a> Request<'a> {
    /// Function code this request is issued with
    pub fn function(&self) -> ModbusFunction {
        match self {
            Request::ReadBits { .. } => ModbusFunction::ReadCoils,
            Request::ReadInputBits { .. } => ModbusFunction::ReadDiscreteInputs,
            Request::ReadRegisters { .. } => ModbusFunction::ReadHoldingRegisters,
            Request::ReadInputRegisters { .. } => ModbusFunction::ReadInputRegisters,
            Request::WriteBit { .. } => ModbusFunction::WriteSingleCoil,
            Request::WriteBits { .. } => ModbusFunction::WriteMultipleCoils,
            Request::WriteRegister { .. } => ModbusFunction::WriteSingleRegister,
            Request::WriteRegisters { .. } => ModbusFunction::WriteMultipleRegisters,
            Request::MaskWriteRegister { .. } => ModbusFunction::MaskWriteRegister,
            Request::WriteAndReadRegisters { .. } => ModbusFunction::ReadWriteMultipleRegisters,
        }
    }

    /// Reject zero counts and empty payloads
    pub fn validate(&self) -> Result<(), Errno> {
        let valid = match self {
            Request::ReadBits { count, .. }
            | Request::ReadInputBits { count, .. }
            | Request::ReadRegisters { count, .. }
            | Request::ReadInputRegisters { count, .. } => *count > 0,
            Request::WriteBits { values, .. } => !values.is_empty(),
            Request::WriteRegisters { values, .. } => !values.is_empty(),
            Request::WriteAndReadRegisters { values, read_count, .. } => {
                !values.is_empty() && *read_count > 0
            }
            Request::WriteBit { .. }
            | Request::WriteRegister { .. }
            | Request::MaskWriteRegister { .. } => true,
        };
        if valid {
            Ok(())
        } else {
            Err(Errno(errno::EINVAL))
        }
    }

    /// Reject requests larger than a single Modbus PDU can carry
    pub fn check_limits(&self) -> Result<(), Errno> {
        let within = match self {
            Request::ReadBits { count, .. } | Request::ReadInputBits { count, .. } => {
                *count <= MAX_READ_BITS
            }
            Request::ReadRegisters { count, .. } | Request::ReadInputRegisters { count, .. } => {
                *count <= MAX_READ_REGISTERS
            }
            Request::WriteBits { values, .. } => values.len() <= MAX_WRITE_BITS as usize,
            Request::WriteRegisters { values, .. } => values.len() <= MAX_WRITE_REGISTERS as usize,
            Request::WriteAndReadRegisters { values, read_count, .. } => {
                values.len() <= MAX_WR_WRITE_REGISTERS as usize && *read_count <= MAX_WR_READ_REGISTERS
            }
            Request::WriteBit { .. }
            | Request::WriteRegister { .. }
            | Request::MaskWriteRegister { .. } => true,
        };
        if within {
            Ok(())
        } else {
            Err(Errno(errno::EMBMDATA))
        }
    }

    /// Detach the payload from the caller's buffers
    pub fn into_owned(self) -> Request<'static> {
        match self {
            Request::ReadBits { address, count } => Request::ReadBits { address, count },
            Request::ReadInputBits { address, count } => Request::ReadInputBits { address, count },
            Request::ReadRegisters { address, count } => Request::ReadRegisters { address, count },
            Request::ReadInputRegisters { address, count } => {
                Request::ReadInputRegisters { address, count }
            }
            Request::WriteBit { address, value } => Request::WriteBit { address, value },
            Request::WriteBits { address, values } => Request::WriteBits {
                address,
                values: Cow::Owned(values.into_owned()),
            },
            Request::WriteRegister { address, value } => Request::WriteRegister { address, value },
            Request::WriteRegisters { address, values } => Request::WriteRegisters {
                address,
                values: Cow::Owned(values.into_owned()),
            },
            Request::MaskWriteRegister {
                address,
                and_mask,
                or_mask,
            } => Request::MaskWriteRegister {
                address,
                and_mask,
                or_mask,
            },
            Request::WriteAndReadRegisters {
                write_address,
                values,
                read_address,
                read_count,
            } => Request::WriteAndReadRegisters {
                write_address,
                values: Cow::Owned(values.into_owned()),
                read_address,
                read_count,
            },
        }
    }
}

impl fmt::Display for Request<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::ReadBits { address, count } => write!(f, "read_bits addr={} count={}", address, count),
            Request::ReadInputBits { address, count } => {
                write!(f, "read_input_bits addr={} count={}", address, count)
            }
            Request::ReadRegisters { address, count } => {
                write!(f, "read_registers addr={} count={}", address, count)
            }
            Request::ReadInputRegisters { address, count } => {
                write!(f, "read_input_registers addr={} count={}", address, count)
            }
            Request::WriteBit { address, value } => write!(f, "write_bit addr={} value={}", address, value),
            Request::WriteBits { address, values } => {
                write!(f, "write_bits addr={} count={}", address, values.len())
            }
            Request::WriteRegister { address, value } => {
                write!(f, "write_register addr={} value=0x{:04X}", address, value)
            }
            Request::WriteRegisters { address, values } => {
                write!(f, "write_registers addr={} count={}", address, values.len())
            }
            Request::MaskWriteRegister {
                address,
                and_mask,
                or_mask,
            } => write!(
                f,
                "mask_write_register addr={} and=0x{:04X} or=0x{:04X}",
                address, and_mask, or_mask
            ),
            Request::WriteAndReadRegisters {
                write_address,
                values,
                read_address,
                read_count,
            } => write!(
                f,
                "write_and_read_registers write_addr={} write_count={} read_addr={} read_count={}",
                write_address,
                values.len(),
                read_address,
                read_count
            ),
        }
    }
}

/// Successful engine outcome of a [`Request`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Coil or discrete input states, one byte (0 or 1) per bit
    Bits(Vec<u8>),
    /// Register values
    Registers(Vec<u16>),
    /// Write acknowledged
    Written,
}

impl Reply {
    fn bits(self, count: u16) -> Option<Vec<u8>> {
        match self {
            Reply::Bits(bits) if bits.len() == count as usize => Some(bits),
            _ => None,
        }
    }

    fn registers(self, count: u16) -> Option<Vec<u16>> {
        match self {
            Reply::Registers(values) if values.len() == count as usize => Some(values),
            _ => None,
        }
    }

    fn written(self) -> Option<()> {
        matches!(self, Reply::Written).then_some(())
    }
}

impl<E: ProtocolEngine> Connection<E> {
    /// Validate, issue and account for one request
    ///
    /// `extract` pulls the expected payload out of the reply; a reply of the
    /// wrong shape or length is reported as `EMBBADDATA`.
    fn run<T>(&mut self, request: Request<'_>, extract: impl FnOnce(Reply) -> Option<T>) -> ModbusResult<T> {
        let timer = OperationTimer::start(request.function());
        let outcome = request
            .validate()
            .and_then(|()| self.engine.execute(&request))
            .and_then(|reply| extract(reply).ok_or(Errno(errno::EMBBADDATA)));
        let elapsed = timer.elapsed();

        match outcome {
            Ok(value) => {
                debug!(function = %timer.function(), %request, ?elapsed, "modbus operation completed");
                self.stats.record_success(elapsed);
                Ok(value)
            }
            Err(code) => {
                let error = translate(&self.engine, code);
                debug!(
                    function = %timer.function(),
                    %request,
                    ?elapsed,
                    code = code.0,
                    %error,
                    "modbus operation failed"
                );
                self.stats.record_failure(elapsed, code.0);
                Err(error)
            }
        }
    }

    /// Read `count` coils starting at `address` (function code 0x01)
    pub fn read_bits(&mut self, address: ModbusAddress, count: u16) -> ModbusResult<Vec<u8>> {
        self.run(Request::ReadBits { address, count }, |reply| reply.bits(count))
    }

    /// Read `count` discrete inputs starting at `address` (function code 0x02)
    pub fn read_input_bits(&mut self, address: ModbusAddress, count: u16) -> ModbusResult<Vec<u8>> {
        self.run(Request::ReadInputBits { address, count }, |reply| reply.bits(count))
    }

    /// Read one holding register (function code 0x03, count 1)
    pub fn read_register(&mut self, address: ModbusAddress) -> ModbusResult<u16> {
        self.run(Request::ReadRegisters { address, count: 1 }, |reply| {
            reply.registers(1).and_then(|values| values.first().copied())
        })
    }

    /// Read `count` holding registers starting at `address` (function code 0x03)
    pub fn read_registers(&mut self, address: ModbusAddress, count: u16) -> ModbusResult<Vec<u16>> {
        self.run(Request::ReadRegisters { address, count }, |reply| reply.registers(count))
    }

    /// Read `count` input registers starting at `address` (function code 0x04)
    pub fn read_input_registers(&mut self, address: ModbusAddress, count: u16) -> ModbusResult<Vec<u16>> {
        self.run(Request::ReadInputRegisters { address, count }, |reply| reply.registers(count))
    }

    /// Force a single coil (function code 0x05)
    pub fn write_bit(&mut self, address: ModbusAddress, value: bool) -> ModbusResult<()> {
        self.run(Request::WriteBit { address, value }, Reply::written)
    }

    /// Force consecutive coils (function code 0x0F)
    ///
    /// One byte per coil; any non-zero byte is sent as 1.
    pub fn write_bits(&mut self, address: ModbusAddress, values: &[u8]) -> ModbusResult<()> {
        let values: Cow<'_, [u8]> = if values.iter().all(|&bit| bit <= 1) {
            Cow::Borrowed(values)
        } else {
            Cow::Owned(values.iter().map(|&bit| u8::from(bit != 0)).collect())
        };
        self.run(Request::WriteBits { address, values }, Reply::written)
    }

    /// Preset a single holding register (function code 0x06)
    pub fn write_register(&mut self, address: ModbusAddress, value: ModbusValue) -> ModbusResult<()> {
        self.run(Request::WriteRegister { address, value }, Reply::written)
    }

    /// Preset consecutive holding registers (function code 0x10)
    pub fn write_registers(&mut self, address: ModbusAddress, values: &[u16]) -> ModbusResult<()> {
        let values = Cow::Borrowed(values);
        self.run(Request::WriteRegisters { address, values }, Reply::written)
    }

    /// Modify one holding register through AND/OR masks (function code 0x16)
    ///
    /// The device stores `(current & and_mask) | (or_mask & !and_mask)`.
    pub fn mask_write_register(&mut self, address: ModbusAddress, and_mask: u16, or_mask: u16) -> ModbusResult<()> {
        self.run(
            Request::MaskWriteRegister {
                address,
                and_mask,
                or_mask,
            },
            Reply::written,
        )
    }

    /// Write `values` at `write_address`, then read `read_count` registers at
    /// `read_address` in one transaction (function code 0x17)
    ///
    /// The read reflects the state after the write. Whether the device
    /// performs both halves atomically is up to the device.
    pub fn write_and_read_registers(
        &mut self,
        write_address: ModbusAddress,
        values: &[u16],
        read_address: ModbusAddress,
        read_count: u16,
    ) -> ModbusResult<Vec<u16>> {
        self.run(
            Request::WriteAndReadRegisters {
                write_address,
                values: Cow::Borrowed(values),
                read_address,
                read_count,
            },
            |reply| reply.registers(read_count),
        )
    }
}
