/// Modbus TCP protocol engine
///
/// Wraps a `tokio-modbus` client context and drives it to completion on a
/// private current-thread runtime, so the engine presents a blocking
/// interface. It must not be called from inside another tokio runtime;
/// the async adapter runs it on its own worker thread instead.

use std::fmt;

use tokio::net::TcpStream;
use tokio::runtime::{Builder, Runtime};
use tokio::time::error::Elapsed;
use tokio_modbus::client::{tcp, Context};
use tokio_modbus::prelude::{Reader, Slave, SlaveContext, Writer};
use tokio_modbus::ExceptionCode;
use tracing::{info, warn};

use super::{
    check_byte_timeout, check_response_timeout, check_slave, EngineResult, Errno, ProtocolEngine,
    DEFAULT_BYTE_TIMEOUT, DEFAULT_RESPONSE_TIMEOUT, TCP_HEADER_LENGTH,
};
use crate::errno;
use crate::operations::{Reply, Request};
use crate::protocol::{ErrorRecoveryMode, SlaveId, Timeout, TCP_SLAVE};
use crate::stats::format::{bytes_to_hex, registers_to_hex};

type Outcome<T> = Result<Result<Result<T, ExceptionCode>, tokio_modbus::Error>, Elapsed>;

/// Run one context call on the engine's runtime under the response timeout
macro_rules! drive {
    ($engine:ident, |$ctx:ident| $call:expr) => {{
        let limit = $engine.response_timeout.as_duration();
        match ($engine.runtime.as_ref(), $engine.ctx.as_mut()) {
            // The timer must be created inside the runtime that drives it.
            (Some(runtime), Some($ctx)) => runtime.block_on(async { tokio::time::timeout(limit, $call).await }),
            _ => return Err(Errno(errno::EBADF)),
        }
    }};
}

/// Modbus TCP engine backed by `tokio-modbus`
pub struct TcpEngine {
    host: String,
    port: String,
    // Dropped before the runtime that registered its socket.
    ctx: Option<Context>,
    runtime: Option<Runtime>,
    socket: i32,
    /// A request was abandoned mid-flight; late bytes may still arrive
    stale: bool,
    slave: SlaveId,
    response_timeout: Timeout,
    byte_timeout: Timeout,
    debug: bool,
    error_recovery: ErrorRecoveryMode,
}

impl TcpEngine {
    /// Create a disconnected engine for `host:port`
    ///
    /// Nothing is resolved or opened until [`connect`](ProtocolEngine::connect).
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
            ctx: None,
            runtime: None,
            socket: -1,
            stale: false,
            slave: TCP_SLAVE,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            byte_timeout: DEFAULT_BYTE_TIMEOUT,
            debug: false,
            error_recovery: ErrorRecoveryMode::NONE,
        }
    }

    /// Remote host as configured
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Remote port as configured
    pub fn port(&self) -> &str {
        &self.port
    }

    /// `host:port` with IPv6 literals bracketed
    fn endpoint(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    fn runtime(&mut self) -> EngineResult<&Runtime> {
        if self.runtime.is_none() {
            let runtime = Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|err| Errno(errno::from_io(&err)))?;
            self.runtime = Some(runtime);
        }
        self.runtime.as_ref().ok_or(Errno(errno::EIO))
    }

    fn open(&mut self) -> EngineResult<()> {
        self.port.parse::<u16>().map_err(|_| Errno(errno::EINVAL))?;
        let endpoint = self.endpoint();
        let limit = self.response_timeout.as_duration();
        let slave = Slave(self.slave);

        let runtime = self.runtime()?;
        let connecting = async { tokio::time::timeout(limit, TcpStream::connect(endpoint.as_str())).await };
        let stream = match runtime.block_on(connecting) {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => return Err(Errno(errno::from_io(&err))),
            Err(_) => return Err(Errno(errno::ETIMEDOUT)),
        };
        let _ = stream.set_nodelay(true);

        self.socket = raw_socket(&stream);
        self.ctx = Some(tcp::attach_slave(stream, slave));
        self.stale = false;
        if self.debug {
            info!("[MODBUS-TCP] connected {} socket:{}", endpoint, self.socket);
        }
        Ok(())
    }

    fn reconnect(&mut self) {
        self.close();
        if let Err(code) = self.open() {
            warn!("[MODBUS-TCP] reconnect to {} failed: {}", self.endpoint(), code);
        }
    }

    /// Map a driven call to an engine result, applying error recovery
    fn finish<T>(&mut self, outcome: Outcome<T>) -> EngineResult<T> {
        let code = match outcome {
            Ok(Ok(Ok(value))) => return Ok(value),
            Ok(Ok(Err(exception))) => errno::from_exception(u8::from(exception)),
            Ok(Err(tokio_modbus::Error::Transport(err))) => {
                let code = errno::from_io(&err);
                self.stale = true;
                if self.error_recovery.link {
                    self.reconnect();
                }
                code
            }
            Ok(Err(other)) => {
                if self.debug {
                    info!("[MODBUS-TCP] protocol error: {}", other);
                }
                self.stale = true;
                self.recover_protocol();
                errno::EMBBADDATA
            }
            Err(_) => {
                self.stale = true;
                self.recover_protocol();
                errno::ETIMEDOUT
            }
        };
        Err(Errno(code))
    }

    fn recover_protocol(&mut self) {
        if self.error_recovery.protocol {
            if let Err(code) = self.flush() {
                warn!("[MODBUS-TCP] flush after protocol error failed: {}", code);
            }
        }
    }

    fn issue(&mut self, request: &Request<'_>) -> EngineResult<Reply> {
        match request {
            Request::ReadBits { address, count } => {
                let (address, count) = (*address, *count);
                let outcome = drive!(self, |ctx| ctx.read_coils(address, count));
                self.finish(outcome).map(|bits| Reply::Bits(to_bytes(&bits, count)))
            }
            Request::ReadInputBits { address, count } => {
                let (address, count) = (*address, *count);
                let outcome = drive!(self, |ctx| ctx.read_discrete_inputs(address, count));
                self.finish(outcome).map(|bits| Reply::Bits(to_bytes(&bits, count)))
            }
            Request::ReadRegisters { address, count } => {
                let (address, count) = (*address, *count);
                let outcome = drive!(self, |ctx| ctx.read_holding_registers(address, count));
                self.finish(outcome).map(Reply::Registers)
            }
            Request::ReadInputRegisters { address, count } => {
                let (address, count) = (*address, *count);
                let outcome = drive!(self, |ctx| ctx.read_input_registers(address, count));
                self.finish(outcome).map(Reply::Registers)
            }
            Request::WriteBit { address, value } => {
                let (address, value) = (*address, *value);
                let outcome = drive!(self, |ctx| ctx.write_single_coil(address, value));
                self.finish(outcome).map(|()| Reply::Written)
            }
            Request::WriteBits { address, values } => {
                let address = *address;
                let coils: Vec<bool> = values.iter().map(|&bit| bit != 0).collect();
                let outcome = drive!(self, |ctx| ctx.write_multiple_coils(address, &coils));
                self.finish(outcome).map(|()| Reply::Written)
            }
            Request::WriteRegister { address, value } => {
                let (address, value) = (*address, *value);
                let outcome = drive!(self, |ctx| ctx.write_single_register(address, value));
                self.finish(outcome).map(|()| Reply::Written)
            }
            Request::WriteRegisters { address, values } => {
                let address = *address;
                let outcome = drive!(self, |ctx| ctx.write_multiple_registers(address, values.as_ref()));
                self.finish(outcome).map(|()| Reply::Written)
            }
            Request::MaskWriteRegister {
                address,
                and_mask,
                or_mask,
            } => {
                let (address, and_mask, or_mask) = (*address, *and_mask, *or_mask);
                let outcome = drive!(self, |ctx| ctx.masked_write_register(address, and_mask, or_mask));
                self.finish(outcome).map(|()| Reply::Written)
            }
            Request::WriteAndReadRegisters {
                write_address,
                values,
                read_address,
                read_count,
            } => {
                let (write_address, read_address, read_count) = (*write_address, *read_address, *read_count);
                let outcome = drive!(self, |ctx| ctx.read_write_multiple_registers(
                    read_address,
                    read_count,
                    write_address,
                    values.as_ref()
                ));
                self.finish(outcome).map(Reply::Registers)
            }
        }
    }

    fn log_reply(&self, reply: &EngineResult<Reply>) {
        match reply {
            Ok(Reply::Bits(bits)) => info!("[MODBUS-TCP] receive slave:{} bits {}", self.slave, bytes_to_hex(bits)),
            Ok(Reply::Registers(values)) => {
                info!("[MODBUS-TCP] receive slave:{} registers {}", self.slave, registers_to_hex(values))
            }
            Ok(Reply::Written) => info!("[MODBUS-TCP] receive slave:{} ack", self.slave),
            Err(code) => info!("[MODBUS-TCP] error slave:{} {}", self.slave, code),
        }
    }
}

/// One byte per coil, trimmed to the requested count
fn to_bytes(bits: &[bool], count: u16) -> Vec<u8> {
    bits.iter().take(count as usize).map(|&bit| u8::from(bit)).collect()
}

#[cfg(unix)]
fn raw_socket(stream: &TcpStream) -> i32 {
    use std::os::unix::io::AsRawFd;
    stream.as_raw_fd()
}

#[cfg(windows)]
fn raw_socket(stream: &TcpStream) -> i32 {
    use std::os::windows::io::AsRawSocket;
    stream.as_raw_socket() as i32
}

#[cfg(not(any(unix, windows)))]
fn raw_socket(_stream: &TcpStream) -> i32 {
    0
}

impl ProtocolEngine for TcpEngine {
    fn connect(&mut self) -> EngineResult<()> {
        self.close();
        let result = self.open();
        if let Err(code) = result {
            if self.debug {
                info!("[MODBUS-TCP] connect to {} failed: {}", self.endpoint(), code);
            }
        }
        result
    }

    fn close(&mut self) {
        if self.ctx.take().is_some() && self.debug {
            info!("[MODBUS-TCP] closed socket:{}", self.socket);
        }
        self.socket = -1;
        self.stale = false;
    }

    fn is_connected(&self) -> bool {
        self.ctx.is_some()
    }

    fn flush(&mut self) -> EngineResult<usize> {
        if self.ctx.is_none() {
            return Err(Errno(errno::EBADF));
        }
        if self.stale {
            // tokio-modbus exposes no read buffer; a fresh session drops late replies.
            self.close();
            self.open()?;
        }
        Ok(0)
    }

    fn execute(&mut self, request: &Request<'_>) -> EngineResult<Reply> {
        request.check_limits()?;
        if self.ctx.is_none() {
            return Err(Errno(errno::EBADF));
        }
        if self.debug {
            info!("[MODBUS-TCP] send slave:{} {}", self.slave, request);
        }
        let reply = self.issue(request);
        if self.debug {
            self.log_reply(&reply);
        }
        reply
    }

    fn header_length(&self) -> usize {
        TCP_HEADER_LENGTH
    }

    fn slave(&self) -> SlaveId {
        self.slave
    }

    fn set_slave(&mut self, slave: SlaveId) -> EngineResult<()> {
        check_slave(slave)?;
        self.slave = slave;
        if let Some(ctx) = self.ctx.as_mut() {
            ctx.set_slave(Slave(slave));
        }
        Ok(())
    }

    fn socket(&self) -> i32 {
        self.socket
    }

    fn set_socket(&mut self, socket: i32) -> EngineResult<()> {
        match socket {
            -1 => {
                self.close();
                Ok(())
            }
            fd if self.ctx.is_some() && fd == self.socket => Ok(()),
            _ => Err(Errno(errno::ENOTSUP)),
        }
    }

    fn response_timeout(&self) -> Timeout {
        self.response_timeout
    }

    fn set_response_timeout(&mut self, timeout: Timeout) -> EngineResult<()> {
        check_response_timeout(timeout)?;
        self.response_timeout = timeout;
        Ok(())
    }

    fn byte_timeout(&self) -> Timeout {
        self.byte_timeout
    }

    /// Stored for reporting; tokio-modbus reads whole frames under the
    /// response timeout.
    fn set_byte_timeout(&mut self, timeout: Timeout) -> EngineResult<()> {
        check_byte_timeout(timeout)?;
        self.byte_timeout = timeout;
        Ok(())
    }

    fn debug(&self) -> bool {
        self.debug
    }

    fn set_debug(&mut self, enabled: bool) {
        self.debug = enabled;
    }

    fn error_recovery(&self) -> ErrorRecoveryMode {
        self.error_recovery
    }

    fn set_error_recovery(&mut self, mode: ErrorRecoveryMode) -> EngineResult<()> {
        self.error_recovery = mode;
        Ok(())
    }
}

impl Drop for TcpEngine {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for TcpEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpEngine")
            .field("endpoint", &self.endpoint())
            .field("connected", &self.ctx.is_some())
            .field("socket", &self.socket)
            .field("slave", &self.slave)
            .field("response_timeout", &self.response_timeout)
            .field("byte_timeout", &self.byte_timeout)
            .field("error_recovery", &self.error_recovery)
            .finish()
    }
}
