//! # Engine Error Codes
//!
//! Numeric failure codes exchanged across the protocol engine boundary.
//!
//! Two families share one `i32` space, following the libmodbus convention:
//!
//! - **POSIX codes** (`EINVAL`, `ETIMEDOUT`, `ECONNREFUSED`, ...) for transport
//!   and argument failures. The values are the Linux ones; engines produce them
//!   from [`std::io::ErrorKind`] so they stay stable across platforms.
//! - **Modbus codes** offset from [`MODBUS_ENOBASE`]: one per exception
//!   response a device can send back, plus framing/data failures detected by
//!   the engine itself.
//!
//! [`describe`] renders any code as a human-readable message.

use std::io;

/// Base of the Modbus specific code range
pub const MODBUS_ENOBASE: i32 = 112_345_678;

/// Exception 0x01: illegal function
pub const EMBXILFUN: i32 = MODBUS_ENOBASE + 0x01;
/// Exception 0x02: illegal data address
pub const EMBXILADD: i32 = MODBUS_ENOBASE + 0x02;
/// Exception 0x03: illegal data value
pub const EMBXILVAL: i32 = MODBUS_ENOBASE + 0x03;
/// Exception 0x04: slave device or server failure
pub const EMBXSFAIL: i32 = MODBUS_ENOBASE + 0x04;
/// Exception 0x05: acknowledge
pub const EMBXACK: i32 = MODBUS_ENOBASE + 0x05;
/// Exception 0x06: slave device or server busy
pub const EMBXSBUSY: i32 = MODBUS_ENOBASE + 0x06;
/// Exception 0x07: negative acknowledge
pub const EMBXNACK: i32 = MODBUS_ENOBASE + 0x07;
/// Exception 0x08: memory parity error
pub const EMBXMEMPAR: i32 = MODBUS_ENOBASE + 0x08;
/// Exception 0x0A: gateway path unavailable
pub const EMBXGPATH: i32 = MODBUS_ENOBASE + 0x0A;
/// Exception 0x0B: gateway target device failed to respond
pub const EMBXGTAR: i32 = MODBUS_ENOBASE + 0x0B;
/// Invalid CRC
pub const EMBBADCRC: i32 = EMBXGTAR + 1;
/// Invalid or malformed response data
pub const EMBBADDATA: i32 = EMBXGTAR + 2;
/// Invalid exception code in a response
pub const EMBBADEXC: i32 = EMBXGTAR + 3;
/// Unknown exception code
pub const EMBUNKEXC: i32 = EMBXGTAR + 4;
/// Request exceeds the protocol limits
pub const EMBMDATA: i32 = EMBXGTAR + 5;
/// Response not from the requested slave
pub const EMBBADSLAVE: i32 = EMBXGTAR + 6;

/// Input/output error
pub const EIO: i32 = 5;
/// Bad file descriptor (no open session)
pub const EBADF: i32 = 9;
/// Resource temporarily unavailable
pub const EAGAIN: i32 = 11;
/// Device or resource busy
pub const EBUSY: i32 = 16;
/// Invalid argument
pub const EINVAL: i32 = 22;
/// Broken pipe
pub const EPIPE: i32 = 32;
/// Function not implemented
pub const ENOSYS: i32 = 38;
/// Operation not supported
pub const ENOTSUP: i32 = 95;
/// Cannot assign requested address
pub const EADDRNOTAVAIL: i32 = 99;
/// Software caused connection abort
pub const ECONNABORTED: i32 = 103;
/// Connection reset by peer
pub const ECONNRESET: i32 = 104;
/// Transport endpoint is not connected
pub const ENOTCONN: i32 = 107;
/// Connection timed out
pub const ETIMEDOUT: i32 = 110;
/// Connection refused
pub const ECONNREFUSED: i32 = 111;
/// No route to host
pub const EHOSTUNREACH: i32 = 113;
/// Operation canceled
pub const ECANCELED: i32 = 125;

/// Render an engine error code as a human-readable message
///
/// Codes outside the catalog fall back to the operating system's rendering.
pub fn describe(code: i32) -> String {
    let known = match code {
        EMBXILFUN => "Illegal function",
        EMBXILADD => "Illegal data address",
        EMBXILVAL => "Illegal data value",
        EMBXSFAIL => "Slave device or server failure",
        EMBXACK => "Acknowledge",
        EMBXSBUSY => "Slave device or server is busy",
        EMBXNACK => "Negative acknowledge",
        EMBXMEMPAR => "Memory parity error",
        EMBXGPATH => "Gateway path unavailable",
        EMBXGTAR => "Target device failed to respond",
        EMBBADCRC => "Invalid CRC",
        EMBBADDATA => "Invalid data",
        EMBBADEXC => "Invalid exception code",
        EMBUNKEXC => "Unknown exception code",
        EMBMDATA => "Too many data",
        EMBBADSLAVE => "Response not from requested slave",
        EIO => "Input/output error",
        EBADF => "Bad file descriptor",
        EAGAIN => "Resource temporarily unavailable",
        EBUSY => "Device or resource busy",
        EINVAL => "Invalid argument",
        EPIPE => "Broken pipe",
        ENOSYS => "Function not implemented",
        ENOTSUP => "Operation not supported",
        EADDRNOTAVAIL => "Cannot assign requested address",
        ECONNABORTED => "Software caused connection abort",
        ECONNRESET => "Connection reset by peer",
        ENOTCONN => "Transport endpoint is not connected",
        ETIMEDOUT => "Connection timed out",
        ECONNREFUSED => "Connection refused",
        EHOSTUNREACH => "No route to host",
        ECANCELED => "Operation canceled",
        _ => return io::Error::from_raw_os_error(code).to_string(),
    };
    known.to_string()
}

/// Code for a Modbus exception response carrying `exception_code`
pub fn from_exception(exception_code: u8) -> i32 {
    match exception_code {
        0x01..=0x08 | 0x0A | 0x0B => MODBUS_ENOBASE + exception_code as i32,
        _ => EMBUNKEXC,
    }
}

/// Code for an I/O failure reported by the transport
///
/// Mapping goes through the error kind first so the result does not depend
/// on the platform's raw errno values.
pub fn from_io(err: &io::Error) -> i32 {
    match err.kind() {
        io::ErrorKind::TimedOut => ETIMEDOUT,
        io::ErrorKind::ConnectionRefused => ECONNREFUSED,
        io::ErrorKind::ConnectionReset => ECONNRESET,
        io::ErrorKind::ConnectionAborted => ECONNABORTED,
        io::ErrorKind::NotConnected => ENOTCONN,
        io::ErrorKind::BrokenPipe => EPIPE,
        io::ErrorKind::UnexpectedEof => ECONNRESET,
        io::ErrorKind::AddrNotAvailable => EADDRNOTAVAIL,
        io::ErrorKind::InvalidInput => EINVAL,
        io::ErrorKind::InvalidData => EMBBADDATA,
        io::ErrorKind::WouldBlock => EAGAIN,
        io::ErrorKind::Unsupported => ENOTSUP,
        _ => err.raw_os_error().unwrap_or(EIO),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_catalog() {
        assert_eq!(describe(EMBXILADD), "Illegal data address");
        assert_eq!(describe(EMBMDATA), "Too many data");
        assert_eq!(describe(ETIMEDOUT), "Connection timed out");
        assert_eq!(describe(EINVAL), "Invalid argument");
    }

    #[test]
    fn test_describe_unknown_falls_back_to_os() {
        let message = describe(4242);
        assert!(!message.is_empty());
    }

    #[test]
    fn test_exception_codes() {
        assert_eq!(from_exception(0x02), EMBXILADD);
        assert_eq!(from_exception(0x0B), EMBXGTAR);
        assert_eq!(from_exception(0x09), EMBUNKEXC);
        assert_eq!(from_exception(0x42), EMBUNKEXC);
    }

    #[test]
    fn test_io_mapping() {
        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(from_io(&refused), ECONNREFUSED);

        let timeout = io::Error::new(io::ErrorKind::TimedOut, "slow");
        assert_eq!(from_io(&timeout), ETIMEDOUT);

        let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "closed");
        assert_eq!(from_io(&eof), ECONNRESET);
    }
}
