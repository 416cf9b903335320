//! Wire format shared with the tunnel driver.
//!
//! This module defines the byte layout of the configuration buffer exchanged
//! with the driver, a builder that assembles set-configuration requests, and a
//! walker that reads get-configuration responses.

pub mod builder;
pub mod error;
pub mod layout;
pub mod walker;

pub use builder::{ConfigBuffer, ConfigBuilder};
pub use error::{ProtoError, ProtoResult};
pub use layout::{
    AddressFamily, AllowedIpRecord, Field, InterfaceFlags, InterfaceRecord, PeerFlags, PeerRecord,
    RawEndpoint,
};
pub use walker::{AllowedIpOffset, AllowedIps, BufferWalker, PeerEntry, PeerOffset, Peers};
