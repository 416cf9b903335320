//! Typed tunnel configuration.
//!
//! These types are what callers build and what a fetch returns. Peer flags
//! are modelled as [`PeerChange`], so a peer is either set, updated or removed
//! and contradictory flag combinations cannot be constructed.

mod allowed_ip;
mod codec;
mod key;

use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub use allowed_ip::{AllowedIp, AllowedIpParseError};
pub use codec::{build_set_request, decode_config};
pub use key::{Key, KeyError};

/// 100ns intervals between 1601-01-01 and 1970-01-01.
const FILETIME_UNIX_EPOCH: u64 = 116_444_736_000_000_000;

/// Local interface settings.
///
/// `None` fields are left untouched by the driver on the set path and were
/// not reported on the get path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<Key>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<Key>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen_port: Option<u16>,

    /// The peers sent alongside replace the driver's whole peer set
    #[serde(default)]
    pub replace_peers: bool,
}

/// A remote peer, identified by its public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub public_key: Key,
    pub change: PeerChange,
}

impl Peer {
    /// Create the peer or replace it entirely
    pub fn set(public_key: Key, settings: PeerSettings) -> Self {
        Peer {
            public_key,
            change: PeerChange::Set(settings),
        }
    }

    /// Modify only the fields present in `settings`
    pub fn update(public_key: Key, settings: PeerSettings) -> Self {
        Peer {
            public_key,
            change: PeerChange::Update(settings),
        }
    }

    /// Delete the peer
    pub fn remove(public_key: Key) -> Self {
        Peer {
            public_key,
            change: PeerChange::Remove,
        }
    }

    pub fn settings(&self) -> Option<&PeerSettings> {
        match &self.change {
            PeerChange::Set(settings) | PeerChange::Update(settings) => Some(settings),
            PeerChange::Remove => None,
        }
    }

    /// Allowed IPs carried by this peer; always empty for a removal
    pub fn allowed_ips(&self) -> &[AllowedIp] {
        match self.settings() {
            Some(settings) => &settings.allowed_ips,
            None => &[],
        }
    }
}

/// What a peer record asks the driver to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum PeerChange {
    /// Create or fully replace the peer
    Set(PeerSettings),
    /// Patch only the fields that are present
    Update(PeerSettings),
    /// Delete the peer
    Remove,
}

/// Per-peer fields. `None` means absent, not zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preshared_key: Option<Key>,

    /// Seconds between keepalives, 0 disables them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_keepalive: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<SocketAddr>,

    /// `allowed_ips` replaces the peer's set instead of extending it
    #[serde(default)]
    pub replace_allowed_ips: bool,

    #[serde(default)]
    pub allowed_ips: Vec<AllowedIp>,

    #[serde(default)]
    pub stats: PeerStats,
}

/// Counters reported by the driver. Ignored by the driver on the set path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerStats {
    #[serde(default)]
    pub tx_bytes: u64,

    #[serde(default)]
    pub rx_bytes: u64,

    /// FILETIME of the last handshake, 0 when none happened
    #[serde(default)]
    pub last_handshake: u64,
}

impl PeerStats {
    /// Last handshake as wall-clock time
    pub fn last_handshake_time(&self) -> Option<SystemTime> {
        if self.last_handshake == 0 {
            return None;
        }
        let ticks = self.last_handshake.checked_sub(FILETIME_UNIX_EPOCH)?;
        UNIX_EPOCH.checked_add(Duration::from_nanos(ticks.saturating_mul(100)))
    }
}

/// Interface plus peers, as fetched from or sent to the driver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverConfig {
    pub interface: Interface,

    #[serde(default)]
    pub peers: Vec<Peer>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_handshake_time() {
        let stats = PeerStats::default();
        assert_eq!(stats.last_handshake_time(), None);

        let stats = PeerStats {
            last_handshake: FILETIME_UNIX_EPOCH + 10_000_000,
            ..Default::default()
        };
        assert_eq!(
            stats.last_handshake_time(),
            Some(UNIX_EPOCH + Duration::from_secs(1))
        );

        let stats = PeerStats {
            last_handshake: 1,
            ..Default::default()
        };
        assert_eq!(stats.last_handshake_time(), None);
    }

    #[test]
    fn test_removed_peer_has_no_allowed_ips() {
        let peer = Peer::remove(Key::new([3; 32]));
        assert!(peer.settings().is_none());
        assert!(peer.allowed_ips().is_empty());
    }

    #[test]
    fn test_json_shape() {
        let peer = Peer::update(
            Key::new([1; 32]),
            PeerSettings {
                persistent_keepalive: Some(25),
                allowed_ips: vec!["10.0.0.0/8".parse().unwrap()],
                ..Default::default()
            },
        );
        let json = serde_json::to_value(&peer).unwrap();
        assert_eq!(json["change"]["action"], "update");
        assert_eq!(json["change"]["persistent_keepalive"], 25);
        assert_eq!(json["change"]["allowed_ips"][0], "10.0.0.0/8");

        let back: Peer = serde_json::from_value(json).unwrap();
        assert_eq!(back, peer);
    }
}
