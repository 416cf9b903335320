//! Allowed network prefixes.

use std::fmt;
use std::net::{AddrParseError, IpAddr};
use std::num::ParseIntError;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::proto::error::{ProtoError, ProtoResult};
use crate::proto::layout::{AddressFamily, AllowedIpRecord};

/// Errors parsing an `addr/cidr` string.
#[derive(Debug, Error)]
pub enum AllowedIpParseError {
    #[error("Missing '/prefix' in {0:?}")]
    MissingPrefix(String),

    #[error("Invalid address: {0}")]
    Address(#[from] AddrParseError),

    #[error("Invalid prefix length: {0}")]
    Prefix(#[from] ParseIntError),

    #[error(transparent)]
    Range(#[from] ProtoError),
}

/// A network prefix permitted for a peer. The prefix length always fits the
/// address family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllowedIp {
    addr: IpAddr,
    cidr: u8,
}

impl AllowedIp {
    pub fn new(addr: IpAddr, cidr: u8) -> ProtoResult<Self> {
        let family = AddressFamily::of(&addr);
        if cidr > family.max_prefix_len() {
            return Err(ProtoError::InvalidPrefixLength {
                family,
                cidr,
            });
        }
        Ok(AllowedIp { addr, cidr })
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    pub fn cidr(&self) -> u8 {
        self.cidr
    }

    pub fn family(&self) -> AddressFamily {
        AddressFamily::of(&self.addr)
    }

    pub(crate) fn to_record(self) -> AllowedIpRecord {
        AllowedIpRecord::from_ip(self.addr, self.cidr)
    }

    pub(crate) fn from_record(record: &AllowedIpRecord, offset: usize) -> ProtoResult<Self> {
        let addr = record.ip().ok_or(ProtoError::UnknownAddressFamily {
            offset,
            family: record.address_family,
        })?;
        AllowedIp::new(addr, record.cidr)
    }
}

impl fmt::Display for AllowedIp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.cidr)
    }
}

impl FromStr for AllowedIp {
    type Err = AllowedIpParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, cidr) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| AllowedIpParseError::MissingPrefix(s.to_string()))?;
        Ok(AllowedIp::new(addr.parse()?, cidr.parse()?)?)
    }
}

impl Serialize for AllowedIp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AllowedIp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
