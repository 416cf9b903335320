//! The privileged call that moves configuration buffers to and from the
//! driver.
//!
//! Implementations wrap whatever the platform offers (an ioctl, a vendored
//! library, a test double). The adapter only sees the [`Exchange`] trait.

use std::fmt;
use std::sync::Arc;

use super::error::ExchangeError;

/// Opaque identifier of one tunnel adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AdapterHandle(u64);

impl AdapterHandle {
    pub const fn from_raw(raw: u64) -> Self {
        AdapterHandle(raw)
    }

    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AdapterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Requested adapter state. Discriminants are the values the driver expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum AdapterState {
    Down = 0,
    Up = 1,
}

impl AdapterState {
    pub fn as_raw(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterState::Down => f.write_str("down"),
            AdapterState::Up => f.write_str("up"),
        }
    }
}

/// One driver request.
#[derive(Debug)]
pub enum Operation<'a> {
    /// Send an assembled configuration buffer
    SetConfiguration(&'a [u8]),
    /// Fill the buffer with the current configuration
    GetConfiguration(&'a mut [u8]),
    SetAdapterState(AdapterState),
}

impl Operation<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::SetConfiguration(_) => "set_configuration",
            Operation::GetConfiguration(_) => "get_configuration",
            Operation::SetAdapterState(_) => "set_adapter_state",
        }
    }
}

/// Transport for driver requests.
///
/// Returns the number of bytes the driver produced or consumed. A
/// `GetConfiguration` whose buffer is too short must fail with
/// [`ExchangeError::BufferTooSmall`] carrying the size the driver needs.
pub trait Exchange: Send + Sync {
    fn exchange(
        &self,
        handle: AdapterHandle,
        operation: Operation<'_>,
    ) -> Result<u32, ExchangeError>;
}

impl<T: Exchange + ?Sized> Exchange for &T {
    fn exchange(
        &self,
        handle: AdapterHandle,
        operation: Operation<'_>,
    ) -> Result<u32, ExchangeError> {
        (**self).exchange(handle, operation)
    }
}

impl<T: Exchange + ?Sized> Exchange for Box<T> {
    fn exchange(
        &self,
        handle: AdapterHandle,
        operation: Operation<'_>,
    ) -> Result<u32, ExchangeError> {
        (**self).exchange(handle, operation)
    }
}

impl<T: Exchange + ?Sized> Exchange for Arc<T> {
    fn exchange(
        &self,
        handle: AdapterHandle,
        operation: Operation<'_>,
    ) -> Result<u32, ExchangeError> {
        (**self).exchange(handle, operation)
    }
}
