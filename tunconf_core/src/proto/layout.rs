//! Record layout for the driver configuration buffer.
//!
//! A configuration buffer is one interface record, followed by `peer_count`
//! peer records, each of which is immediately followed by its
//! `allowed_ip_count` allowed-IP records. There is no external length table;
//! every boundary is derived from the counts embedded in earlier records.
//!
//! # Record Formats
//!
//! All integers are little-endian unless noted otherwise.
//!
//! ```text
//! Interface (80 bytes)
//! +--------+--------+----------------+----------------+-----+-----------+----------+
//! | flags  | port   | private key    | public key     | pad | peer count| reserved |
//! | 0..4   | 4..6   | 6..38          | 38..70         |70.. | 72..76    | 76..80   |
//! +--------+--------+----------------+----------------+-----+-----------+----------+
//!
//! Peer (136 bytes)
//! +-------+------+---------+---------+-----------+------+----------+
//! | flags | rsvd | pub key | psk     | keepalive | rsvd | endpoint |
//! | 0..4  | 4..8 | 8..40   | 40..72  | 72..74    |74..76| 76..104  |
//! +-------+------+---------+---------+-----------+------+----------+
//! | tx bytes | rx bytes | last handshake | allowed ip count | pad     |
//! | 104..112 | 112..120 | 120..128       | 128..132         | 132..136|
//! +----------+----------+----------------+------------------+---------+
//!
//! Allowed IP (24 bytes)
//! +-----------+--------+------+----------+
//! | address   | family | cidr | reserved |
//! | 0..16     | 16..18 | 18   | 19..24   |
//! +-----------+--------+------+----------+
//! ```
//!
//! The endpoint is a `SOCKADDR_INET`: family (LE) at 0, port (big-endian) at 2,
//! then either an IPv4 address at 4..8, or the IPv6 flow info (big-endian) at
//! 4..8, the IPv6 address at 8..24 and the scope id (LE) at 24..28.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::ops::BitOr;

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use super::error::{ProtoError, ProtoResult};

/// Length of every key field.
pub const KEY_LEN: usize = 32;

/// Size of a `SOCKADDR_INET` endpoint.
pub const SOCKADDR_INET_SIZE: usize = 28;

/// Unspecified address family (no endpoint).
pub const AF_UNSPEC: u16 = 0;
/// IPv4 address family as the driver numbers it.
pub const AF_INET: u16 = 2;
/// IPv6 address family as the driver numbers it.
pub const AF_INET6: u16 = 23;

/// Raw 32-byte key as stored in a record.
pub type RawKey = [u8; KEY_LEN];

/// Flags carried by the interface record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct InterfaceFlags(u32);

impl InterfaceFlags {
    /// The public key field is meaningful
    pub const HAS_PUBLIC_KEY: Self = Self(1 << 0);
    /// The private key field is meaningful
    pub const HAS_PRIVATE_KEY: Self = Self(1 << 1);
    /// The listen port field is meaningful
    pub const HAS_LISTEN_PORT: Self = Self(1 << 2);
    /// The peers in this buffer replace the driver's whole peer set
    pub const REPLACE_PEERS: Self = Self(1 << 3);

    /// Create a flag set with no flags set
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Create a flag set from raw bits, keeping bits this crate does not know
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw bits as written to the record
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Check whether every flag in `other` is set
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set every flag in `other`
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Set or clear every flag in `other`
    pub fn set(&mut self, other: Self, value: bool) {
        if value {
            self.0 |= other.0;
        } else {
            self.0 &= !other.0;
        }
    }
}

impl BitOr for InterfaceFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Flags carried by a peer record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PeerFlags(u32);

impl PeerFlags {
    /// The public key field is meaningful
    pub const HAS_PUBLIC_KEY: Self = Self(1 << 0);
    /// The preshared key field is meaningful
    pub const HAS_PRESHARED_KEY: Self = Self(1 << 1);
    /// The persistent keepalive field is meaningful
    pub const HAS_PERSISTENT_KEEPALIVE: Self = Self(1 << 2);
    /// The endpoint field is meaningful
    pub const HAS_ENDPOINT: Self = Self(1 << 3);
    /// The trailing allowed IPs replace the peer's whole allowed-IP set
    pub const REPLACE_ALLOWED_IPS: Self = Self(1 << 5);
    /// Delete the peer identified by the public key
    pub const REMOVE: Self = Self(1 << 6);
    /// Modify only the fields whose has-X bit is set
    pub const UPDATE: Self = Self(1 << 7);

    /// Field-presence bits other than the public key.
    pub const FIELD_BITS: Self = Self(
        Self::HAS_PRESHARED_KEY.0 | Self::HAS_PERSISTENT_KEEPALIVE.0 | Self::HAS_ENDPOINT.0,
    );

    /// Create a flag set with no flags set
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Create a flag set from raw bits, keeping bits this crate does not know
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw bits as written to the record
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Check whether every flag in `other` is set
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Check whether any flag in `other` is set
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Set every flag in `other`
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Set or clear every flag in `other`
    pub fn set(&mut self, other: Self, value: bool) {
        if value {
            self.0 |= other.0;
        } else {
            self.0 &= !other.0;
        }
    }
}

impl BitOr for PeerFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Address family of an allowed IP or endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    /// IPv4, 4 significant address bytes
    Ipv4,
    /// IPv6, 16 significant address bytes
    Ipv6,
}

impl AddressFamily {
    /// Convert a raw driver family value
    pub fn from_raw(value: u16) -> Option<Self> {
        match value {
            AF_INET => Some(AddressFamily::Ipv4),
            AF_INET6 => Some(AddressFamily::Ipv6),
            _ => None,
        }
    }

    /// Raw value as written to a record
    pub fn to_raw(self) -> u16 {
        match self {
            AddressFamily::Ipv4 => AF_INET,
            AddressFamily::Ipv6 => AF_INET6,
        }
    }

    /// Family of an IP address
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => AddressFamily::Ipv4,
            IpAddr::V6(_) => AddressFamily::Ipv6,
        }
    }

    /// Longest prefix an address of this family can carry
    pub fn max_prefix_len(self) -> u8 {
        match self {
            AddressFamily::Ipv4 => 32,
            AddressFamily::Ipv6 => 128,
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::Ipv4 => f.write_str("IPv4"),
            AddressFamily::Ipv6 => f.write_str("IPv6"),
        }
    }
}

/// Endpoint in `SOCKADDR_INET` form.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawEndpoint([u8; SOCKADDR_INET_SIZE]);

impl RawEndpoint {
    /// Endpoint with family `AF_UNSPEC`
    pub const fn unspecified() -> Self {
        Self([0; SOCKADDR_INET_SIZE])
    }

    /// Wrap raw `SOCKADDR_INET` bytes
    pub const fn from_bytes(bytes: [u8; SOCKADDR_INET_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw `SOCKADDR_INET` bytes
    pub const fn as_bytes(&self) -> &[u8; SOCKADDR_INET_SIZE] {
        &self.0
    }

    /// Raw family field
    pub fn family(&self) -> u16 {
        LittleEndian::read_u16(&self.0[0..2])
    }

    /// Encode a socket address
    pub fn from_socket_addr(addr: &SocketAddr) -> Self {
        let mut bytes = [0u8; SOCKADDR_INET_SIZE];
        match addr {
            SocketAddr::V4(v4) => {
                LittleEndian::write_u16(&mut bytes[0..2], AF_INET);
                BigEndian::write_u16(&mut bytes[2..4], v4.port());
                bytes[4..8].copy_from_slice(&v4.ip().octets());
            }
            SocketAddr::V6(v6) => {
                LittleEndian::write_u16(&mut bytes[0..2], AF_INET6);
                BigEndian::write_u16(&mut bytes[2..4], v6.port());
                BigEndian::write_u32(&mut bytes[4..8], v6.flowinfo());
                bytes[8..24].copy_from_slice(&v6.ip().octets());
                LittleEndian::write_u32(&mut bytes[24..28], v6.scope_id());
            }
        }
        Self(bytes)
    }

    /// Decode into a socket address.
    ///
    /// Returns `Ok(None)` for `AF_UNSPEC`. `record_offset` locates the owning
    /// peer record in error reports.
    pub fn to_socket_addr(&self, record_offset: usize) -> ProtoResult<Option<SocketAddr>> {
        let port = BigEndian::read_u16(&self.0[2..4]);
        match self.family() {
            AF_UNSPEC => Ok(None),
            AF_INET => {
                let mut octets = [0u8; 4];
                octets.copy_from_slice(&self.0[4..8]);
                Ok(Some(SocketAddr::V4(SocketAddrV4::new(
                    Ipv4Addr::from(octets),
                    port,
                ))))
            }
            AF_INET6 => {
                let flowinfo = BigEndian::read_u32(&self.0[4..8]);
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&self.0[8..24]);
                let scope_id = LittleEndian::read_u32(&self.0[24..28]);
                Ok(Some(SocketAddr::V6(SocketAddrV6::new(
                    Ipv6Addr::from(octets),
                    port,
                    flowinfo,
                    scope_id,
                ))))
            }
            family => Err(ProtoError::UnknownAddressFamily {
                offset: record_offset + peer::ENDPOINT,
                family,
            }),
        }
    }
}

impl Default for RawEndpoint {
    fn default() -> Self {
        Self::unspecified()
    }
}

impl fmt::Debug for RawEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_socket_addr(0) {
            Ok(Some(addr)) => write!(f, "RawEndpoint({addr})"),
            Ok(None) => f.write_str("RawEndpoint(unspecified)"),
            Err(_) => write!(f, "RawEndpoint(family={})", self.family()),
        }
    }
}

mod interface {
    pub const FLAGS: usize = 0;
    pub const LISTEN_PORT: usize = 4;
    pub const PRIVATE_KEY: usize = 6;
    pub const PUBLIC_KEY: usize = 38;
    pub const PEER_COUNT: usize = 72;
    pub const SIZE: usize = 80;
}

mod peer {
    pub const FLAGS: usize = 0;
    pub const PUBLIC_KEY: usize = 8;
    pub const PRESHARED_KEY: usize = 40;
    pub const PERSISTENT_KEEPALIVE: usize = 72;
    pub const ENDPOINT: usize = 76;
    pub const TX_BYTES: usize = 104;
    pub const RX_BYTES: usize = 112;
    pub const LAST_HANDSHAKE: usize = 120;
    pub const ALLOWED_IP_COUNT: usize = 128;
    pub const SIZE: usize = 136;
}

mod allowed_ip {
    pub const ADDRESS: usize = 0;
    pub const FAMILY: usize = 16;
    pub const CIDR: usize = 18;
    pub const SIZE: usize = 24;
}

/// Location of one named field inside a record, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub offset: usize,
    pub size: usize,
}

const fn field(name: &'static str, offset: usize, size: usize) -> Field {
    Field { name, offset, size }
}

/// Fixed-size header describing the local tunnel interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterfaceRecord {
    pub flags: InterfaceFlags,
    pub listen_port: u16,
    pub private_key: RawKey,
    pub public_key: RawKey,
    pub peer_count: u32,
}

impl InterfaceRecord {
    /// Encoded size in bytes
    pub const SIZE: usize = interface::SIZE;

    pub const FIELDS: &'static [Field] = &[
        field("flags", interface::FLAGS, 4),
        field("listen_port", interface::LISTEN_PORT, 2),
        field("private_key", interface::PRIVATE_KEY, KEY_LEN),
        field("public_key", interface::PUBLIC_KEY, KEY_LEN),
        field("peer_count", interface::PEER_COUNT, 4),
    ];

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        LittleEndian::write_u32(&mut out[interface::FLAGS..], self.flags.bits());
        LittleEndian::write_u16(&mut out[interface::LISTEN_PORT..], self.listen_port);
        out[interface::PRIVATE_KEY..interface::PRIVATE_KEY + KEY_LEN]
            .copy_from_slice(&self.private_key);
        out[interface::PUBLIC_KEY..interface::PUBLIC_KEY + KEY_LEN]
            .copy_from_slice(&self.public_key);
        LittleEndian::write_u32(&mut out[interface::PEER_COUNT..], self.peer_count);
        out
    }

    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        InterfaceRecord {
            flags: InterfaceFlags::from_bits(LittleEndian::read_u32(&bytes[interface::FLAGS..])),
            listen_port: LittleEndian::read_u16(&bytes[interface::LISTEN_PORT..]),
            private_key: read_key(bytes, interface::PRIVATE_KEY),
            public_key: read_key(bytes, interface::PUBLIC_KEY),
            peer_count: LittleEndian::read_u32(&bytes[interface::PEER_COUNT..]),
        }
    }
}

/// Fixed-size description of one remote peer. Its allowed IPs follow it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PeerRecord {
    pub flags: PeerFlags,
    pub public_key: RawKey,
    pub preshared_key: RawKey,
    pub persistent_keepalive: u16,
    pub endpoint: RawEndpoint,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    /// FILETIME of the most recent handshake, 0 when none happened
    pub last_handshake: u64,
    pub allowed_ip_count: u32,
}

impl PeerRecord {
    /// Encoded size in bytes
    pub const SIZE: usize = peer::SIZE;

    pub const FIELDS: &'static [Field] = &[
        field("flags", peer::FLAGS, 4),
        field("public_key", peer::PUBLIC_KEY, KEY_LEN),
        field("preshared_key", peer::PRESHARED_KEY, KEY_LEN),
        field("persistent_keepalive", peer::PERSISTENT_KEEPALIVE, 2),
        field("endpoint", peer::ENDPOINT, SOCKADDR_INET_SIZE),
        field("tx_bytes", peer::TX_BYTES, 8),
        field("rx_bytes", peer::RX_BYTES, 8),
        field("last_handshake", peer::LAST_HANDSHAKE, 8),
        field("allowed_ip_count", peer::ALLOWED_IP_COUNT, 4),
    ];

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        LittleEndian::write_u32(&mut out[peer::FLAGS..], self.flags.bits());
        out[peer::PUBLIC_KEY..peer::PUBLIC_KEY + KEY_LEN].copy_from_slice(&self.public_key);
        out[peer::PRESHARED_KEY..peer::PRESHARED_KEY + KEY_LEN]
            .copy_from_slice(&self.preshared_key);
        LittleEndian::write_u16(
            &mut out[peer::PERSISTENT_KEEPALIVE..],
            self.persistent_keepalive,
        );
        out[peer::ENDPOINT..peer::ENDPOINT + SOCKADDR_INET_SIZE]
            .copy_from_slice(self.endpoint.as_bytes());
        LittleEndian::write_u64(&mut out[peer::TX_BYTES..], self.tx_bytes);
        LittleEndian::write_u64(&mut out[peer::RX_BYTES..], self.rx_bytes);
        LittleEndian::write_u64(&mut out[peer::LAST_HANDSHAKE..], self.last_handshake);
        LittleEndian::write_u32(&mut out[peer::ALLOWED_IP_COUNT..], self.allowed_ip_count);
        out
    }

    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let mut endpoint = [0u8; SOCKADDR_INET_SIZE];
        endpoint.copy_from_slice(&bytes[peer::ENDPOINT..peer::ENDPOINT + SOCKADDR_INET_SIZE]);
        PeerRecord {
            flags: PeerFlags::from_bits(LittleEndian::read_u32(&bytes[peer::FLAGS..])),
            public_key: read_key(bytes, peer::PUBLIC_KEY),
            preshared_key: read_key(bytes, peer::PRESHARED_KEY),
            persistent_keepalive: LittleEndian::read_u16(&bytes[peer::PERSISTENT_KEEPALIVE..]),
            endpoint: RawEndpoint::from_bytes(endpoint),
            tx_bytes: LittleEndian::read_u64(&bytes[peer::TX_BYTES..]),
            rx_bytes: LittleEndian::read_u64(&bytes[peer::RX_BYTES..]),
            last_handshake: LittleEndian::read_u64(&bytes[peer::LAST_HANDSHAKE..]),
            allowed_ip_count: LittleEndian::read_u32(&bytes[peer::ALLOWED_IP_COUNT..]),
        }
    }
}

/// One network prefix permitted for a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AllowedIpRecord {
    /// Address bytes; only the first 4 are significant for IPv4
    pub address: [u8; 16],
    /// Raw family value, see [`AddressFamily`]
    pub address_family: u16,
    pub cidr: u8,
}

impl AllowedIpRecord {
    /// Encoded size in bytes
    pub const SIZE: usize = allowed_ip::SIZE;

    pub const FIELDS: &'static [Field] = &[
        field("address", allowed_ip::ADDRESS, 16),
        field("address_family", allowed_ip::FAMILY, 2),
        field("cidr", allowed_ip::CIDR, 1),
    ];

    /// Record for an address and prefix length. The prefix is not validated here.
    pub fn from_ip(addr: IpAddr, cidr: u8) -> Self {
        let mut address = [0u8; 16];
        match addr {
            IpAddr::V4(v4) => address[..4].copy_from_slice(&v4.octets()),
            IpAddr::V6(v6) => address.copy_from_slice(&v6.octets()),
        }
        AllowedIpRecord {
            address,
            address_family: AddressFamily::of(&addr).to_raw(),
            cidr,
        }
    }

    /// Decoded family, `None` when the raw value is unknown
    pub fn family(&self) -> Option<AddressFamily> {
        AddressFamily::from_raw(self.address_family)
    }

    /// Address in the record's family, `None` when the family is unknown
    pub fn ip(&self) -> Option<IpAddr> {
        match self.family()? {
            AddressFamily::Ipv4 => {
                let mut octets = [0u8; 4];
                octets.copy_from_slice(&self.address[..4]);
                Some(IpAddr::V4(Ipv4Addr::from(octets)))
            }
            AddressFamily::Ipv6 => Some(IpAddr::V6(Ipv6Addr::from(self.address))),
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[allowed_ip::ADDRESS..allowed_ip::ADDRESS + 16].copy_from_slice(&self.address);
        LittleEndian::write_u16(&mut out[allowed_ip::FAMILY..], self.address_family);
        out[allowed_ip::CIDR] = self.cidr;
        out
    }

    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let mut address = [0u8; 16];
        address.copy_from_slice(&bytes[allowed_ip::ADDRESS..allowed_ip::ADDRESS + 16]);
        AllowedIpRecord {
            address,
            address_family: LittleEndian::read_u16(&bytes[allowed_ip::FAMILY..]),
            cidr: bytes[allowed_ip::CIDR],
        }
    }
}

fn read_key(bytes: &[u8], offset: usize) -> RawKey {
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&bytes[offset..offset + KEY_LEN]);
    key
}
