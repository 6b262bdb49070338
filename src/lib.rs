//! # Modbus Master - Modbus TCP Client Facade
//!
//! **Author:** Evan Liu <evan.liu@voltageenergy.com>
//! **Version:** 0.3.0
//! **License:** MIT
//!
//! A Modbus TCP master for industrial automation and data acquisition. One
//! connection type, one operation catalog, three ways to call it.
//!
//! ## Features
//!
//! - **Three calling conventions**: error-raising (`anyhow`), explicit
//!   `Result`, and futures serialized on a dedicated worker thread
//! - **Identical semantics**: every convention issues the same requests and
//!   reports the same error codes and messages
//! - **Pluggable engine**: Modbus TCP via `tokio-modbus`, plus an in-memory
//!   simulated device for tests
//! - **Error recovery**: optional automatic reconnect and flush
//! - **Built-in Monitoring**: per-connection operation statistics
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Operation |
//! |------|----------|-----------|
//! | 0x01 | Read Coils | `read_bits` |
//! | 0x02 | Read Discrete Inputs | `read_input_bits` |
//! | 0x03 | Read Holding Registers | `read_register`, `read_registers` |
//! | 0x04 | Read Input Registers | `read_input_registers` |
//! | 0x05 | Write Single Coil | `write_bit` |
//! | 0x06 | Write Single Register | `write_register` |
//! | 0x0F | Write Multiple Coils | `write_bits` |
//! | 0x10 | Write Multiple Registers | `write_registers` |
//! | 0x16 | Mask Write Register | `mask_write_register` |
//! | 0x17 | Read/Write Multiple Registers | `write_and_read_registers` |
//!
//! ## Quick Start
//!
//! ### Blocking Client
//!
//! ```rust,no_run
//! use modbus_master::SyncClient;
//!
//! fn main() -> anyhow::Result<()> {
//!     let client: SyncClient = SyncClient::new("127.0.0.1", 502);
//!     client.set_slave(1)?;
//!     client.set_response_timeout(1.5)?;
//!     client.connect()?;
//!
//!     let values = client.read_registers(0, 10)?;
//!     println!("Read registers: {:?}", values);
//!
//!     client.write_register(100, 0x1234)?;
//!     client.disconnect();
//!     Ok(())
//! }
//! ```
//!
//! ### Async Client
//!
//! ```rust,no_run
//! use modbus_master::{AsyncClient, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new("192.168.1.10", 502);
//!     let client: AsyncClient = AsyncClient::from_config(&config)?;
//!     client.connect().await?;
//!
//!     // Queued in order on the worker; awaited in any order.
//!     let coils = client.read_bits(0, 16);
//!     let registers = client.read_input_registers(0, 4);
//!     println!("{:?} {:?}", coils.await?, registers.await?);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐ ┌──────────────┐ ┌──────────────┐
//! │  SyncClient  │ │ ResultClient │ │ AsyncClient  │
//! │   (Raise)    │ │  (Explicit)  │ │  (Deferred)  │
//! └──────────────┘ └──────────────┘ └──────────────┘
//!         │                │                │
//!         └────────────────┼────────────────┘
//!                          │
//!                 ┌─────────────────┐
//!                 │   Connection    │
//!                 │  (operations)   │
//!                 └─────────────────┘
//!                          │
//!                 ┌─────────────────┐
//!                 │ ProtocolEngine  │
//!                 │ (TCP/Simulated) │
//!                 └─────────────────┘
//! ```

/// Error codes and their messages
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod errno;

/// Core error types and result handling
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod error;

/// Modbus protocol definitions
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod protocol;

/// Protocol engines: the boundary to the wire
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod engine;

/// Thread-safe register storage backing the simulated device
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod register_bank;

/// Request and reply model plus the data operations
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod operations;

/// Connection handle owning one engine session
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod connection;

/// Calling-convention adapters
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod client;

/// Client configuration
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod config;

/// Operation statistics and formatting helpers
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod stats;

// Re-export main types for convenience
pub use error::{translate, ModbusError, ModbusResult};
pub use protocol::{
    ErrorRecoveryMode, ModbusAddress, ModbusException, ModbusFunction, ModbusValue, SlaveId, Timeout,
    BROADCAST_ADDRESS, MAX_SLAVE_ADDRESS, TCP_SLAVE,
};
pub use engine::{Errno, ProtocolEngine, SimulatedDevice, SimulatedEngine, TcpEngine};
pub use register_bank::{RegisterBank, RegisterBankStats};
pub use operations::{Reply, Request};
pub use connection::Connection;
pub use client::{
    AsyncClient, Client, Completion, Deferred, Dispatcher, Explicit, Pending, Raise, ResultClient, SyncClient,
};
pub use config::{ClientConfig, DEFAULT_QUEUE_CAPACITY};
pub use stats::{OperationStats, OperationTimer};

/// Maximum number of coils or discrete inputs in one read
pub const MAX_READ_BITS: u16 = 2000;

/// Maximum number of coils in one write
pub const MAX_WRITE_BITS: u16 = 1968;

/// Maximum number of registers in one read
pub const MAX_READ_REGISTERS: u16 = 125;

/// Maximum number of registers in one write
pub const MAX_WRITE_REGISTERS: u16 = 123;

/// Maximum number of registers written by one write-and-read request
pub const MAX_WR_WRITE_REGISTERS: u16 = 121;

/// Maximum number of registers read by one write-and-read request
pub const MAX_WR_READ_REGISTERS: u16 = 125;

/// Modbus TCP default port
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("Modbus Master v{} - Modbus TCP client facade by Evan Liu", VERSION)
}
