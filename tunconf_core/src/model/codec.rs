//! Conversion between typed configuration and driver buffers.

use tracing::{debug, instrument, trace};

use super::{AllowedIp, DriverConfig, Interface, Key, Peer, PeerChange, PeerSettings, PeerStats};
use crate::proto::builder::{ConfigBuffer, ConfigBuilder};
use crate::proto::error::{ProtoError, ProtoResult};
use crate::proto::layout::{
    AllowedIpRecord, InterfaceFlags, InterfaceRecord, PeerFlags, PeerRecord, RawEndpoint,
};
use crate::proto::walker::{BufferWalker, PeerEntry};

/// Serialize an interface and its peers into a set-configuration buffer.
///
/// Peer and allowed-IP counts are derived from `peers`, so the result is
/// always consistent with the records it contains.
#[instrument(level = "debug", skip_all, fields(peers = peers.len()))]
pub fn build_set_request(interface: &Interface, peers: &[Peer]) -> ProtoResult<ConfigBuffer> {
    let peer_count = count_u32("peers", peers.len())?;
    let size = peers.iter().fold(InterfaceRecord::SIZE, |acc, peer| {
        acc.saturating_add(PeerRecord::SIZE)
            .saturating_add(peer.allowed_ips().len().saturating_mul(AllowedIpRecord::SIZE))
    });
    let size = u32::try_from(size).map_err(|_| ProtoError::BufferTooLarge(size))?;

    let mut builder = ConfigBuilder::new();
    builder.reserve(size as usize);
    builder.append_interface(&interface_record(interface, peer_count));
    for peer in peers {
        let allowed_ips = peer.allowed_ips();
        let allowed_ip_count = count_u32("allowed IPs", allowed_ips.len())?;
        builder.append_peer(&peer_record(peer, allowed_ip_count));
        for allowed_ip in allowed_ips {
            builder.append_allowed_ip(&allowed_ip.to_record());
        }
    }

    builder.finalize().ok_or(ProtoError::TruncatedBuffer {
        offset: 0,
        needed: InterfaceRecord::SIZE,
        available: 0,
    })
}

/// Reconstruct typed configuration from a get-configuration buffer.
///
/// `buf` must be exactly the bytes the driver reported. Bytes after the last
/// record are ignored.
#[instrument(level = "debug", skip(buf), fields(len = buf.len()))]
pub fn decode_config(buf: &[u8]) -> ProtoResult<DriverConfig> {
    let walker = BufferWalker::new(buf);
    let interface = interface_from_record(&walker.interface()?);

    let mut entries = walker.peers()?;
    let mut peers = Vec::new();
    for entry in entries.by_ref() {
        peers.push(peer_from_entry(&entry?)?);
    }

    let end = entries.position();
    if end < buf.len() {
        debug!(
            trailing = buf.len() - end,
            "Ignoring bytes after the last record"
        );
    }

    Ok(DriverConfig { interface, peers })
}

fn count_u32(what: &'static str, count: usize) -> ProtoResult<u32> {
    u32::try_from(count).map_err(|_| ProtoError::CountOverflow { what, count })
}

fn interface_record(interface: &Interface, peer_count: u32) -> InterfaceRecord {
    let mut record = InterfaceRecord {
        peer_count,
        ..Default::default()
    };
    if let Some(key) = &interface.private_key {
        record.flags.insert(InterfaceFlags::HAS_PRIVATE_KEY);
        record.private_key = *key.as_bytes();
    }
    if let Some(key) = &interface.public_key {
        record.flags.insert(InterfaceFlags::HAS_PUBLIC_KEY);
        record.public_key = *key.as_bytes();
    }
    if let Some(port) = interface.listen_port {
        record.flags.insert(InterfaceFlags::HAS_LISTEN_PORT);
        record.listen_port = port;
    }
    record
        .flags
        .set(InterfaceFlags::REPLACE_PEERS, interface.replace_peers);
    record
}

fn interface_from_record(record: &InterfaceRecord) -> Interface {
    let flags = record.flags;
    Interface {
        private_key: flags
            .contains(InterfaceFlags::HAS_PRIVATE_KEY)
            .then(|| Key::new(record.private_key)),
        public_key: flags
            .contains(InterfaceFlags::HAS_PUBLIC_KEY)
            .then(|| Key::new(record.public_key)),
        listen_port: flags
            .contains(InterfaceFlags::HAS_LISTEN_PORT)
            .then_some(record.listen_port),
        replace_peers: flags.contains(InterfaceFlags::REPLACE_PEERS),
    }
}

fn peer_record(peer: &Peer, allowed_ip_count: u32) -> PeerRecord {
    let mut record = PeerRecord {
        flags: PeerFlags::HAS_PUBLIC_KEY,
        public_key: *peer.public_key.as_bytes(),
        ..Default::default()
    };
    let settings = match &peer.change {
        PeerChange::Remove => {
            record.flags.insert(PeerFlags::REMOVE);
            return record;
        }
        PeerChange::Update(settings) => {
            record.flags.insert(PeerFlags::UPDATE);
            settings
        }
        PeerChange::Set(settings) => settings,
    };

    if let Some(key) = &settings.preshared_key {
        record.flags.insert(PeerFlags::HAS_PRESHARED_KEY);
        record.preshared_key = *key.as_bytes();
    }
    if let Some(keepalive) = settings.persistent_keepalive {
        record.flags.insert(PeerFlags::HAS_PERSISTENT_KEEPALIVE);
        record.persistent_keepalive = keepalive;
    }
    if let Some(endpoint) = &settings.endpoint {
        record.flags.insert(PeerFlags::HAS_ENDPOINT);
        record.endpoint = RawEndpoint::from_socket_addr(endpoint);
    }
    record
        .flags
        .set(PeerFlags::REPLACE_ALLOWED_IPS, settings.replace_allowed_ips);
    record.tx_bytes = settings.stats.tx_bytes;
    record.rx_bytes = settings.stats.rx_bytes;
    record.last_handshake = settings.stats.last_handshake;
    record.allowed_ip_count = allowed_ip_count;
    record
}

fn peer_from_entry(entry: &PeerEntry<'_>) -> ProtoResult<Peer> {
    let record = &entry.record;
    let offset = entry.offset.get();
    let flags = record.flags;
    trace!(offset, flags = flags.bits(), "Decoding peer record");

    if !flags.contains(PeerFlags::HAS_PUBLIC_KEY) {
        return Err(ProtoError::MissingPublicKey { offset });
    }
    let public_key = Key::new(record.public_key);

    if flags.contains(PeerFlags::REMOVE) {
        let conflicting = PeerFlags::UPDATE | PeerFlags::REPLACE_ALLOWED_IPS | PeerFlags::FIELD_BITS;
        if flags.intersects(conflicting) || record.allowed_ip_count != 0 {
            return Err(ProtoError::ContradictoryFlags {
                offset,
                flags: flags.bits(),
            });
        }
        return Ok(Peer::remove(public_key));
    }

    let allowed_ips = entry
        .allowed_ips()
        .map(|item| item.and_then(|(at, ip)| AllowedIp::from_record(&ip, at.get())))
        .collect::<ProtoResult<Vec<_>>>()?;

    let endpoint = if flags.contains(PeerFlags::HAS_ENDPOINT) {
        record.endpoint.to_socket_addr(offset)?
    } else {
        None
    };

    let settings = PeerSettings {
        preshared_key: flags
            .contains(PeerFlags::HAS_PRESHARED_KEY)
            .then(|| Key::new(record.preshared_key)),
        persistent_keepalive: flags
            .contains(PeerFlags::HAS_PERSISTENT_KEEPALIVE)
            .then_some(record.persistent_keepalive),
        endpoint,
        replace_allowed_ips: flags.contains(PeerFlags::REPLACE_ALLOWED_IPS),
        allowed_ips,
        stats: PeerStats {
            tx_bytes: record.tx_bytes,
            rx_bytes: record.rx_bytes,
            last_handshake: record.last_handshake,
        },
    };

    if flags.contains(PeerFlags::UPDATE) {
        Ok(Peer::update(public_key, settings))
    } else {
        Ok(Peer::set(public_key, settings))
    }
}
