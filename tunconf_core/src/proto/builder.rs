//! Incremental assembly of a set-configuration buffer.
//!
//! The builder appends records in the order it is given them. Callers write
//! the interface record first, then each peer record followed by its allowed
//! IPs, and are responsible for the `peer_count` and `allowed_ip_count` fields
//! agreeing with what they append. [`crate::model::build_set_request`] does
//! this bookkeeping for typed configuration.

use std::fmt;

use tracing::debug;

use super::error::{ProtoError, ProtoResult};
use super::layout::{AllowedIpRecord, InterfaceRecord, PeerRecord};

/// Forward-only builder for a configuration buffer.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    buffer: Option<Vec<u8>>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        ConfigBuilder { buffer: None }
    }

    /// Pre-allocate `capacity` bytes. Does nothing once storage exists.
    pub fn reserve(&mut self, capacity: usize) {
        if self.buffer.is_none() {
            self.buffer = Some(Vec::with_capacity(capacity));
        }
    }

    pub fn append_interface(&mut self, interface: &InterfaceRecord) {
        self.append(&interface.to_bytes());
    }

    pub fn append_peer(&mut self, peer: &PeerRecord) {
        self.append(&peer.to_bytes());
    }

    pub fn append_allowed_ip(&mut self, allowed_ip: &AllowedIpRecord) {
        self.append(&allowed_ip.to_bytes());
    }

    /// Bytes appended so far
    pub fn len(&self) -> usize {
        self.buffer.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hand over the assembled buffer, or `None` if nothing was appended
    pub fn finalize(self) -> Option<ConfigBuffer> {
        let buffer = self.buffer.filter(|b| !b.is_empty())?;
        debug!(len = buffer.len(), "Configuration buffer assembled");
        Some(ConfigBuffer(buffer))
    }

    fn append(&mut self, bytes: &[u8]) {
        self.buffer
            .get_or_insert_with(Vec::new)
            .extend_from_slice(bytes);
    }
}

/// An assembled, ready-to-send configuration buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct ConfigBuffer(Vec<u8>);

impl ConfigBuffer {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Length as the driver call expects it
    pub fn len_u32(&self) -> ProtoResult<u32> {
        u32::try_from(self.0.len()).map_err(|_| ProtoError::BufferTooLarge(self.0.len()))
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }
}

impl AsRef<[u8]> for ConfigBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ConfigBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigBuffer")
            .field("len", &self.0.len())
            .finish()
    }
}
