//! Driver adapter: moves configuration buffers across the privileged
//! exchange call.
//!
//! [`Adapter`] owns the size-retry loop for reading configuration and the
//! single-shot apply and state calls. The call itself is abstracted by the
//! [`Exchange`] trait.

pub mod adapter;
pub mod error;
pub mod exchange;

pub use adapter::Adapter;
pub use error::{DriverError, DriverResult, ExchangeError};
pub use exchange::{AdapterHandle, AdapterState, Exchange, Operation};
