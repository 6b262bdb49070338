//! # Modbus Client Implementations
//!
//! One operation catalog, three calling conventions.
//!
//! [`Client`] implements every operation and property exactly once, on top
//! of a [`Dispatcher`] that decides how a call against the
//! [`Connection`] is executed and how its outcome is delivered:
//!
//! | Alias | Dispatcher | Fallible calls return | Other calls return |
//! |-------|------------|-----------------------|--------------------|
//! | [`SyncClient`] | [`Raise`] | `anyhow::Result<T>` | `T` |
//! | [`ResultClient`] | [`Explicit`] | [`ModbusResult<T>`] | `T` |
//! | [`AsyncClient`] | [`Deferred`] | [`Pending<T>`] | [`Completion<T>`] |
//!
//! For the same sequence of calls, all three issue the same engine
//! requests and surface the same [`ModbusError`](crate::ModbusError)
//! codes and messages.
//!
//! ## Usage Examples
//!
//! ### Exception-raising
//!
//! ```rust
//! use modbus_master::{errno, ModbusError, SimulatedDevice, SimulatedEngine, SyncClient};
//!
//! fn main() -> anyhow::Result<()> {
//!     let device = SimulatedDevice::new();
//!     let client = SyncClient::<SimulatedEngine>::with_engine(device.engine());
//!     client.connect()?;
//!     client.write_registers(0, &[1, 2, 3])?;
//!     assert_eq!(client.read_registers(0, 3)?, vec![1, 2, 3]);
//!
//!     let err = client.read_registers(0, 0).unwrap_err();
//!     let modbus = err.downcast_ref::<ModbusError>().unwrap();
//!     assert_eq!(modbus.code(), errno::EINVAL);
//!     Ok(())
//! }
//! ```
//!
//! ### Explicit result
//!
//! ```rust
//! use modbus_master::{ResultClient, SimulatedDevice, SimulatedEngine};
//!
//! let device = SimulatedDevice::new();
//! let client = ResultClient::<SimulatedEngine>::with_engine(device.engine());
//! client.connect().unwrap();
//! match client.read_bits(0, 8) {
//!     Ok(bits) => assert_eq!(bits.len(), 8),
//!     Err(error) => panic!("{} ({})", error, error.code()),
//! }
//! ```
//!
//! ### Futures on a serialized worker
//!
//! ```rust
//! use modbus_master::{AsyncClient, SimulatedDevice, SimulatedEngine};
//!
//! #[tokio::main]
//! async fn main() {
//!     let device = SimulatedDevice::new();
//!     let client = AsyncClient::<SimulatedEngine>::with_engine(device.engine());
//!     client.connect().await.unwrap();
//!
//!     let write = client.write_register(7, 42);
//!     let read = client.read_register(7);
//!     write.await.unwrap();
//!     assert_eq!(read.await.unwrap(), 42);
//! }
//! ```

mod blocking;
mod deferred;

pub use blocking::{Explicit, Raise};
pub use deferred::{Completion, Deferred, Pending};

use crate::config::{ClientConfig, DEFAULT_QUEUE_CAPACITY};
use crate::connection::Connection;
use crate::engine::{ProtocolEngine, TcpEngine};
use crate::error::ModbusResult;
use crate::protocol::{ErrorRecoveryMode, ModbusAddress, ModbusValue, SlaveId};
use crate::stats::OperationStats;

/// Execution strategy behind a [`Client`]
///
/// A dispatcher owns the [`Connection`] and runs operations against it.
/// `Fallible<T>` is what a caller receives for an operation that can fail,
/// `Infallible<T>` for one that cannot.
pub trait Dispatcher: Sized {
    type Engine: ProtocolEngine;
    type Fallible<T: Send + 'static>;
    type Infallible<T: Send + 'static>;

    /// Take ownership of `connection`
    ///
    /// `queue_capacity` bounds the fallible jobs a queueing dispatcher
    /// holds; synchronous dispatchers ignore it.
    fn attach(connection: Connection<Self::Engine>, queue_capacity: usize) -> Self;

    /// Run an operation that can fail
    fn call<T, F>(&self, op: F) -> Self::Fallible<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection<Self::Engine>) -> ModbusResult<T> + Send + 'static;

    /// Run an operation that cannot fail
    fn query<T, F>(&self, op: F) -> Self::Infallible<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection<Self::Engine>) -> T + Send + 'static;
}

/// Exception-raising client: failures are `anyhow::Error`s wrapping a `ModbusError`
pub type SyncClient<E = TcpEngine> = Client<Raise<E>>;

/// Explicit-result client: failures are `ModbusError` values
pub type ResultClient<E = TcpEngine> = Client<Explicit<E>>;

/// Future-returning client serialized on a dedicated worker thread
pub type AsyncClient<E = TcpEngine> = Client<Deferred<E>>;

/// Modbus master facade over a [`Dispatcher`]
#[derive(Debug, Clone)]
pub struct Client<D> {
    dispatcher: D,
}

impl<D: Dispatcher<Engine = TcpEngine>> Client<D> {
    /// Client for the Modbus TCP device at `address:port`
    ///
    /// Nothing is opened until [`connect`](Client::connect).
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self::from_connection(Connection::new(address, port))
    }

    /// Client for the device described by `config`, with its settings applied
    pub fn from_config(config: &ClientConfig) -> ModbusResult<Self> {
        let connection = Connection::from_config(config)?;
        Ok(Self::with_queue_capacity(connection, config.queue_capacity))
    }
}

impl<D: Dispatcher> Client<D> {
    /// Take ownership of an existing connection
    pub fn from_connection(connection: Connection<D::Engine>) -> Self {
        Self::with_queue_capacity(connection, DEFAULT_QUEUE_CAPACITY)
    }

    /// Take ownership of an existing connection with a custom queue bound
    pub fn with_queue_capacity(connection: Connection<D::Engine>, queue_capacity: usize) -> Self {
        Self {
            dispatcher: D::attach(connection, queue_capacity.max(1)),
        }
    }

    /// Client over a bare engine session
    pub fn with_engine(engine: D::Engine) -> Self {
        Self::from_connection(Connection::with_engine(engine))
    }

    /// Dispatcher carrying this client's calls
    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    // Lifecycle

    /// Establish the session
    pub fn connect(&self) -> D::Fallible<()> {
        self.dispatcher.call(|conn| conn.connect())
    }

    /// Close the session; safe when not connected
    pub fn disconnect(&self) -> D::Infallible<()> {
        self.dispatcher.query(|conn| conn.disconnect())
    }

    pub fn is_connected(&self) -> D::Infallible<bool> {
        self.dispatcher.query(|conn| conn.is_connected())
    }

    /// Discard buffered bytes on the session
    pub fn flush(&self) -> D::Fallible<usize> {
        self.dispatcher.call(|conn| conn.flush())
    }

    /// Apply the per-connection settings from `config`
    pub fn configure(&self, config: &ClientConfig) -> D::Fallible<()> {
        let config = config.clone();
        self.dispatcher.call(move |conn| conn.configure(&config))
    }

    // Diagnostics

    pub fn header_length(&self) -> D::Infallible<usize> {
        self.dispatcher.query(|conn| conn.header_length())
    }

    pub fn stats(&self) -> D::Infallible<OperationStats> {
        self.dispatcher.query(|conn| conn.stats())
    }

    // Properties

    pub fn slave(&self) -> D::Infallible<SlaveId> {
        self.dispatcher.query(|conn| conn.slave())
    }

    pub fn set_slave(&self, slave: SlaveId) -> D::Fallible<()> {
        self.dispatcher.call(move |conn| conn.set_slave(slave))
    }

    pub fn socket(&self) -> D::Infallible<i32> {
        self.dispatcher.query(|conn| conn.socket())
    }

    /// Low-level socket passthrough
    ///
    /// `-1` closes the session. Engines may refuse to adopt a descriptor
    /// they do not already own (`ENOTSUP`).
    pub fn set_socket(&self, socket: i32) -> D::Fallible<()> {
        self.dispatcher.call(move |conn| conn.set_socket(socket))
    }

    /// Response timeout in seconds
    pub fn response_timeout(&self) -> D::Infallible<f64> {
        self.dispatcher.query(|conn| conn.response_timeout())
    }

    pub fn set_response_timeout(&self, seconds: f64) -> D::Fallible<()> {
        self.dispatcher.call(move |conn| conn.set_response_timeout(seconds))
    }

    /// Inter-byte timeout in seconds
    pub fn byte_timeout(&self) -> D::Infallible<f64> {
        self.dispatcher.query(|conn| conn.byte_timeout())
    }

    /// Set the inter-byte timeout in seconds; zero disables it
    ///
    /// `TcpEngine` stores and reports this value but does not apply it:
    /// tokio-modbus reads each reply frame as a whole, bounded only by the
    /// response timeout.
    pub fn set_byte_timeout(&self, seconds: f64) -> D::Fallible<()> {
        self.dispatcher.call(move |conn| conn.set_byte_timeout(seconds))
    }

    pub fn debug(&self) -> D::Infallible<bool> {
        self.dispatcher.query(|conn| conn.debug())
    }

    pub fn set_debug(&self, enabled: bool) -> D::Infallible<()> {
        self.dispatcher.query(move |conn| conn.set_debug(enabled))
    }

    pub fn error_recovery(&self) -> D::Infallible<ErrorRecoveryMode> {
        self.dispatcher.query(|conn| conn.error_recovery())
    }

    pub fn set_error_recovery(&self, mode: ErrorRecoveryMode) -> D::Fallible<()> {
        self.dispatcher.call(move |conn| conn.set_error_recovery(mode))
    }

    // Data operations

    /// Read coils (0x01)
    pub fn read_bits(&self, address: ModbusAddress, count: u16) -> D::Fallible<Vec<u8>> {
        self.dispatcher.call(move |conn| conn.read_bits(address, count))
    }

    /// Read discrete inputs (0x02)
    pub fn read_input_bits(&self, address: ModbusAddress, count: u16) -> D::Fallible<Vec<u8>> {
        self.dispatcher.call(move |conn| conn.read_input_bits(address, count))
    }

    /// Read one holding register (0x03)
    pub fn read_register(&self, address: ModbusAddress) -> D::Fallible<u16> {
        self.dispatcher.call(move |conn| conn.read_register(address))
    }

    /// Read holding registers (0x03)
    pub fn read_registers(&self, address: ModbusAddress, count: u16) -> D::Fallible<Vec<u16>> {
        self.dispatcher.call(move |conn| conn.read_registers(address, count))
    }

    /// Read input registers (0x04)
    pub fn read_input_registers(&self, address: ModbusAddress, count: u16) -> D::Fallible<Vec<u16>> {
        self.dispatcher.call(move |conn| conn.read_input_registers(address, count))
    }

    /// Write a single coil (0x05)
    pub fn write_bit(&self, address: ModbusAddress, value: bool) -> D::Fallible<()> {
        self.dispatcher.call(move |conn| conn.write_bit(address, value))
    }

    /// Write coils (0x0F), one byte per coil
    pub fn write_bits(&self, address: ModbusAddress, values: &[u8]) -> D::Fallible<()> {
        let values = values.to_vec();
        self.dispatcher.call(move |conn| conn.write_bits(address, &values))
    }

    /// Write a single holding register (0x06)
    pub fn write_register(&self, address: ModbusAddress, value: ModbusValue) -> D::Fallible<()> {
        self.dispatcher.call(move |conn| conn.write_register(address, value))
    }

    /// Write holding registers (0x10)
    pub fn write_registers(&self, address: ModbusAddress, values: &[u16]) -> D::Fallible<()> {
        let values = values.to_vec();
        self.dispatcher.call(move |conn| conn.write_registers(address, &values))
    }

    /// Mask-write a holding register (0x16)
    pub fn mask_write_register(&self, address: ModbusAddress, and_mask: u16, or_mask: u16) -> D::Fallible<()> {
        self.dispatcher
            .call(move |conn| conn.mask_write_register(address, and_mask, or_mask))
    }

    /// Write then read holding registers in one transaction (0x17)
    pub fn write_and_read_registers(
        &self,
        write_address: ModbusAddress,
        values: &[u16],
        read_address: ModbusAddress,
        read_count: u16,
    ) -> D::Fallible<Vec<u16>> {
        let values = values.to_vec();
        self.dispatcher.call(move |conn| {
            conn.write_and_read_registers(write_address, &values, read_address, read_count)
        })
    }
}
