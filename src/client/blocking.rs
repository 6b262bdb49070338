/// Synchronous dispatchers
///
/// Both run each operation on the calling thread, holding the connection
/// lock for the duration of the engine call. They differ only in how a
/// failure reaches the caller.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::Dispatcher;
use crate::connection::Connection;
use crate::engine::ProtocolEngine;
use crate::error::ModbusResult;

/// Connection behind a lock, shared by the blocking dispatchers
struct Exclusive<E: ProtocolEngine> {
    connection: Mutex<Connection<E>>,
}

impl<E: ProtocolEngine> Exclusive<E> {
    fn new(connection: Connection<E>) -> Self {
        Self {
            connection: Mutex::new(connection),
        }
    }

    /// A panic in an earlier call leaves the connection usable
    fn lock(&self) -> MutexGuard<'_, Connection<E>> {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Blocking dispatcher that raises failures as `anyhow::Error`
///
/// The typed error is recovered with
/// `error.downcast_ref::<ModbusError>()`.
pub struct Raise<E: ProtocolEngine> {
    inner: Exclusive<E>,
}

impl<E: ProtocolEngine> Dispatcher for Raise<E> {
    type Engine = E;
    type Fallible<T: Send + 'static> = anyhow::Result<T>;
    type Infallible<T: Send + 'static> = T;

    fn attach(connection: Connection<E>, _queue_capacity: usize) -> Self {
        Self {
            inner: Exclusive::new(connection),
        }
    }

    fn call<T, F>(&self, op: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection<E>) -> ModbusResult<T> + Send + 'static,
    {
        Ok(op(&mut *self.inner.lock())?)
    }

    fn query<T, F>(&self, op: F) -> T
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection<E>) -> T + Send + 'static,
    {
        op(&mut *self.inner.lock())
    }
}

/// Blocking dispatcher that returns failures as [`ModbusResult`] values
pub struct Explicit<E: ProtocolEngine> {
    inner: Exclusive<E>,
}

impl<E: ProtocolEngine> Dispatcher for Explicit<E> {
    type Engine = E;
    type Fallible<T: Send + 'static> = ModbusResult<T>;
    type Infallible<T: Send + 'static> = T;

    fn attach(connection: Connection<E>, _queue_capacity: usize) -> Self {
        Self {
            inner: Exclusive::new(connection),
        }
    }

    fn call<T, F>(&self, op: F) -> ModbusResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection<E>) -> ModbusResult<T> + Send + 'static,
    {
        op(&mut *self.inner.lock())
    }

    fn query<T, F>(&self, op: F) -> T
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection<E>) -> T + Send + 'static,
    {
        op(&mut *self.inner.lock())
    }
}

impl<E: ProtocolEngine> fmt::Debug for Raise<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Raise").finish_non_exhaustive()
    }
}

impl<E: ProtocolEngine> fmt::Debug for Explicit<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Explicit").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use crate::client::Dispatcher;
    use crate::engine::{SimulatedDevice, SimulatedEngine};
    use crate::errno;
    use crate::{ModbusError, ResultClient, SyncClient};

    #[test]
    fn test_raise_wraps_modbus_error() {
        let device = SimulatedDevice::new();
        let client = SyncClient::<SimulatedEngine>::with_engine(device.engine());
        client.connect().unwrap();
        device.fail_next(errno::EMBXILVAL);

        let err = client.write_register(1, 2).unwrap_err();
        let modbus = err.downcast_ref::<ModbusError>().unwrap();
        assert_eq!(modbus.code(), errno::EMBXILVAL);
        assert_eq!(err.to_string(), "Illegal data value");
    }

    #[test]
    fn test_explicit_returns_error_value() {
        let device = SimulatedDevice::new();
        let client = ResultClient::<SimulatedEngine>::with_engine(device.engine());
        assert_eq!(client.read_register(0).unwrap_err().code(), errno::EBADF);

        client.connect().unwrap();
        client.write_bit(4, true).unwrap();
        assert_eq!(client.read_bits(4, 1).unwrap(), vec![1]);
    }

    #[test]
    fn test_connection_survives_panicking_call() {
        let device = SimulatedDevice::new();
        let client = ResultClient::<SimulatedEngine>::with_engine(device.engine());
        client.connect().unwrap();

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            client.dispatcher().query::<(), _>(|_conn| panic!("boom"))
        }));
        assert!(outcome.is_err());
        assert!(client.is_connected());
    }
}
