//! Configuration exchange with the tunnel network driver.
//!
//! Typed interface and peer settings are laid out as a flat little-endian
//! buffer of fixed-size records, handed to the driver through an
//! [`driver::Exchange`], and read back with a size-retry loop.
//!
//! - [`proto`]: record layout, bounds-checked walker and buffer builder
//! - [`model`]: typed configuration and the encode/decode between it and buffers
//! - [`driver`]: per-adapter apply, fetch and up/down
//! - [`config`], [`logging`]: ambient settings and `tracing` setup

pub mod config;
pub mod driver;
pub mod logging;
pub mod model;
pub mod proto;

// Re-export commonly used items for convenience
pub use config::{Config, ConfigError, ExchangeConfig};
pub use driver::{Adapter, AdapterHandle, AdapterState, DriverError, Exchange, ExchangeError};
pub use model::{build_set_request, decode_config, DriverConfig, Interface, Key, Peer};
pub use proto::{ConfigBuffer, ProtoError};
