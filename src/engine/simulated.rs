/// In-memory protocol engine
///
/// [`SimulatedDevice`] is the remote side: a [`RegisterBank`] plus the
/// knobs tests use to script failures and latency. Every engine created
/// from a device shares its state, so a test can keep the device handle
/// while the engine is moved into a connection or onto a worker thread.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::info;

use super::{
    check_byte_timeout, check_response_timeout, check_slave, EngineResult, Errno, ProtocolEngine,
    DEFAULT_BYTE_TIMEOUT, DEFAULT_RESPONSE_TIMEOUT, TCP_HEADER_LENGTH,
};
use crate::errno;
use crate::operations::{Reply, Request};
use crate::protocol::{ErrorRecoveryMode, SlaveId, Timeout, TCP_SLAVE};
use crate::register_bank::RegisterBank;

/// Socket descriptor reported by a connected simulated session
const SIMULATED_SOCKET: i32 = 3;

#[derive(Debug, Default)]
struct DeviceState {
    journal: Vec<Request<'static>>,
    failures: VecDeque<Errno>,
    connect_failure: Option<Errno>,
    delays: VecDeque<Duration>,
    latency: Duration,
    connects: usize,
    closes: usize,
}

/// Simulated remote Modbus device
///
/// Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct SimulatedDevice {
    bank: RegisterBank,
    state: Arc<Mutex<DeviceState>>,
}

impl SimulatedDevice {
    /// Create a device with empty address spaces
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a device backed by an existing register bank
    pub fn with_bank(bank: RegisterBank) -> Self {
        Self {
            bank,
            state: Arc::default(),
        }
    }

    /// New disconnected engine talking to this device
    pub fn engine(&self) -> SimulatedEngine {
        SimulatedEngine::new(self.clone())
    }

    /// Storage behind the device
    pub fn bank(&self) -> &RegisterBank {
        &self.bank
    }

    /// Every request that reached the device, in arrival order
    pub fn journal(&self) -> Vec<Request<'static>> {
        self.lock().journal.clone()
    }

    /// Forget recorded requests
    pub fn clear_journal(&self) {
        self.lock().journal.clear();
    }

    /// Fail the next request that reaches the device with `code`
    ///
    /// Calls queue up: each scripted failure is consumed by one request.
    pub fn fail_next(&self, code: i32) {
        self.lock().failures.push_back(Errno(code));
    }

    /// Fail the next connect attempt with `code`
    pub fn fail_connect(&self, code: i32) {
        self.lock().connect_failure = Some(Errno(code));
    }

    /// Delay the next request by `delay` on top of the base latency
    pub fn delay_next(&self, delay: Duration) {
        self.lock().delays.push_back(delay);
    }

    /// Base latency applied to every request
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Number of sessions opened so far
    pub fn connect_count(&self) -> usize {
        self.lock().connects
    }

    /// Number of sessions closed so far
    pub fn close_count(&self) -> usize {
        self.lock().closes
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn serve(&self, request: &Request<'_>) -> Reply {
        let bank = &self.bank;
        match request {
            Request::ReadBits { address, count } => Reply::Bits(to_bytes(&bank.read_coils(*address, *count))),
            Request::ReadInputBits { address, count } => {
                Reply::Bits(to_bytes(&bank.read_discrete_inputs(*address, *count)))
            }
            Request::ReadRegisters { address, count } => {
                Reply::Registers(bank.read_holding_registers(*address, *count))
            }
            Request::ReadInputRegisters { address, count } => {
                Reply::Registers(bank.read_input_registers(*address, *count))
            }
            Request::WriteBit { address, value } => {
                bank.write_coils(*address, &[*value]);
                Reply::Written
            }
            Request::WriteBits { address, values } => {
                let coils: Vec<bool> = values.iter().map(|&bit| bit != 0).collect();
                bank.write_coils(*address, &coils);
                Reply::Written
            }
            Request::WriteRegister { address, value } => {
                bank.write_holding_registers(*address, &[*value]);
                Reply::Written
            }
            Request::WriteRegisters { address, values } => {
                bank.write_holding_registers(*address, values);
                Reply::Written
            }
            Request::MaskWriteRegister {
                address,
                and_mask,
                or_mask,
            } => {
                bank.mask_write_holding_register(*address, *and_mask, *or_mask);
                Reply::Written
            }
            Request::WriteAndReadRegisters {
                write_address,
                values,
                read_address,
                read_count,
            } => Reply::Registers(bank.write_read_holding_registers(
                *write_address,
                values,
                *read_address,
                *read_count,
            )),
        }
    }
}

fn to_bytes(bits: &[bool]) -> Vec<u8> {
    bits.iter().map(|&bit| u8::from(bit)).collect()
}

/// Protocol engine session on a [`SimulatedDevice`]
#[derive(Debug)]
pub struct SimulatedEngine {
    device: SimulatedDevice,
    connected: bool,
    slave: SlaveId,
    response_timeout: Timeout,
    byte_timeout: Timeout,
    debug: bool,
    error_recovery: ErrorRecoveryMode,
}

impl SimulatedEngine {
    /// Create a disconnected session on `device`
    pub fn new(device: SimulatedDevice) -> Self {
        Self {
            device,
            connected: false,
            slave: TCP_SLAVE,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            byte_timeout: DEFAULT_BYTE_TIMEOUT,
            debug: false,
            error_recovery: ErrorRecoveryMode::NONE,
        }
    }

    /// Device this session talks to
    pub fn device(&self) -> &SimulatedDevice {
        &self.device
    }
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::new(SimulatedDevice::new())
    }
}

impl ProtocolEngine for SimulatedEngine {
    fn connect(&mut self) -> EngineResult<()> {
        let mut state = self.device.lock();
        if let Some(code) = state.connect_failure.take() {
            return Err(code);
        }
        if self.connected {
            state.closes += 1;
        }
        state.connects += 1;
        self.connected = true;
        if self.debug {
            info!("[MODBUS-SIM] connected slave:{}", self.slave);
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.connected {
            self.connected = false;
            self.device.lock().closes += 1;
            if self.debug {
                info!("[MODBUS-SIM] closed");
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn flush(&mut self) -> EngineResult<usize> {
        if self.connected {
            Ok(0)
        } else {
            Err(Errno(errno::EBADF))
        }
    }

    fn execute(&mut self, request: &Request<'_>) -> EngineResult<Reply> {
        request.check_limits()?;
        if !self.connected {
            return Err(Errno(errno::EBADF));
        }

        let (delay, failure) = {
            let mut state = self.device.lock();
            state.journal.push(request.clone().into_owned());
            let delay = state.latency + state.delays.pop_front().unwrap_or_default();
            (delay, state.failures.pop_front())
        };
        if self.debug {
            info!("[MODBUS-SIM] send slave:{} {}", self.slave, request);
        }
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        if let Some(code) = failure {
            if self.debug {
                info!("[MODBUS-SIM] error slave:{} {}", self.slave, code);
            }
            return Err(code);
        }

        let reply = self.device.serve(request);
        if self.debug {
            info!("[MODBUS-SIM] receive slave:{} {:?}", self.slave, reply);
        }
        Ok(reply)
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
        Ok(())
    }

    fn socket(&self) -> i32 {
        if self.connected {
            SIMULATED_SOCKET
        } else {
            -1
        }
    }

    fn set_socket(&mut self, socket: i32) -> EngineResult<()> {
        match socket {
            -1 => {
                self.close();
                Ok(())
            }
            fd if fd == self.socket() => Ok(()),
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

impl Drop for SimulatedEngine {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;
    use std::time::Instant;

    #[test]
    fn test_requires_session() {
        let mut engine = SimulatedEngine::default();
        let request = Request::ReadRegisters { address: 0, count: 1 };
        assert_eq!(engine.execute(&request), Err(Errno(errno::EBADF)));
        assert_eq!(engine.flush(), Err(Errno(errno::EBADF)));
        assert!(engine.device().journal().is_empty());
    }

    #[test]
    fn test_limits_checked_before_journal() {
        let device = SimulatedDevice::new();
        let mut engine = device.engine();
        engine.connect().unwrap();

        let request = Request::ReadRegisters { address: 0, count: 126 };
        assert_eq!(engine.execute(&request), Err(Errno(errno::EMBMDATA)));
        assert!(device.journal().is_empty());
    }

    #[test]
    fn test_scripted_failures_are_consumed_in_order() {
        let device = SimulatedDevice::new();
        let mut engine = device.engine();
        engine.connect().unwrap();
        device.fail_next(errno::EMBXILADD);
        device.fail_next(errno::ETIMEDOUT);

        let request = Request::WriteRegister { address: 1, value: 9 };
        assert_eq!(engine.execute(&request), Err(Errno(errno::EMBXILADD)));
        assert_eq!(engine.execute(&request), Err(Errno(errno::ETIMEDOUT)));
        assert_eq!(engine.execute(&request), Ok(Reply::Written));
        assert_eq!(device.journal().len(), 3);
        assert_eq!(device.bank().read_holding_registers(1, 1), vec![9]);
    }

    #[test]
    fn test_connect_failure() {
        let device = SimulatedDevice::new();
        device.fail_connect(errno::ECONNREFUSED);
        let mut engine = device.engine();

        assert_eq!(engine.connect(), Err(Errno(errno::ECONNREFUSED)));
        assert!(!engine.is_connected());
        assert_eq!(engine.connect(), Ok(()));
        assert_eq!(device.connect_count(), 1);
    }

    #[test]
    fn test_latency() {
        let device = SimulatedDevice::new();
        let mut engine = device.engine();
        engine.connect().unwrap();
        device.delay_next(Duration::from_millis(30));

        let start = Instant::now();
        engine.execute(&Request::ReadBits { address: 0, count: 1 }).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_socket_passthrough() {
        let device = SimulatedDevice::new();
        let mut engine = device.engine();
        assert_eq!(engine.socket(), -1);
        engine.connect().unwrap();

        let fd = engine.socket();
        assert_eq!(engine.set_socket(fd), Ok(()));
        assert!(engine.is_connected());
        assert_eq!(engine.set_socket(fd + 10), Err(Errno(errno::ENOTSUP)));
        assert_eq!(engine.set_socket(-1), Ok(()));
        assert!(!engine.is_connected());
        assert_eq!(device.close_count(), 1);
    }

    #[test]
    fn test_drop_closes_once() {
        let device = SimulatedDevice::new();
        {
            let mut engine = device.engine();
            engine.connect().unwrap();
            engine.close();
        }
        assert_eq!(device.close_count(), 1);
    }

    #[test]
    fn test_reconnect_replaces_session() {
        let device = SimulatedDevice::new();
        let mut engine = device.engine();
        engine.connect().unwrap();
        engine.connect().unwrap();
        assert_eq!(device.connect_count(), 2);
        assert_eq!(device.close_count(), 1);
    }

    #[test]
    fn test_journal_owns_payload() {
        let device = SimulatedDevice::new();
        let mut engine = device.engine();
        engine.connect().unwrap();
        {
            let values = vec![1u16, 2, 3];
            engine
                .execute(&Request::WriteRegisters { address: 5, values: Cow::Borrowed(&values) })
                .unwrap();
        }
        assert_eq!(
            device.journal(),
            vec![Request::WriteRegisters { address: 5, values: Cow::Owned(vec![1, 2, 3]) }]
        );
        device.clear_journal();
        assert!(device.journal().is_empty());
    }
}
