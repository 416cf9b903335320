//! Bounds-checked traversal of a configuration buffer.
//!
//! Record boundaries are computed from the counts embedded in earlier records.
//! Every read is checked against the declared buffer length first, so a
//! malformed or short buffer produces [`ProtoError::TruncatedBuffer`] or
//! [`ProtoError::InconsistentCounts`] rather than an out-of-bounds access.

use tracing::trace;

use super::error::{ProtoError, ProtoResult};
use super::layout::{AllowedIpRecord, InterfaceRecord, PeerRecord};

/// Byte offset of a peer record inside the walked buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerOffset(usize);

impl PeerOffset {
    pub fn get(self) -> usize {
        self.0
    }
}

/// Byte offset of an allowed-IP record inside the walked buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AllowedIpOffset(usize);

impl AllowedIpOffset {
    pub fn get(self) -> usize {
        self.0
    }
}

/// Read-only view over a buffer returned by the driver.
#[derive(Debug, Clone, Copy)]
pub struct BufferWalker<'a> {
    buf: &'a [u8],
}

impl<'a> BufferWalker<'a> {
    /// Walk `buf`; its length is the declared length of the configuration
    pub fn new(buf: &'a [u8]) -> Self {
        BufferWalker { buf }
    }

    /// Declared buffer length
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Read the interface record at the start of the buffer
    pub fn interface(&self) -> ProtoResult<InterfaceRecord> {
        self.record::<{ InterfaceRecord::SIZE }>(0)
            .map(InterfaceRecord::from_bytes)
    }

    /// Offset immediately past the interface record
    pub fn first_peer(&self) -> PeerOffset {
        PeerOffset(InterfaceRecord::SIZE)
    }

    /// Read the peer record at `at`
    pub fn peer(&self, at: PeerOffset) -> ProtoResult<PeerRecord> {
        self.record::<{ PeerRecord::SIZE }>(at.0)
            .map(PeerRecord::from_bytes)
    }

    /// Offset past the peer at `at` and every allowed-IP record trailing it.
    ///
    /// Fails when the peer record itself is truncated, or when its allowed-IP
    /// count reaches past the end of the buffer.
    pub fn next_peer(&self, at: PeerOffset) -> ProtoResult<PeerOffset> {
        let record = self.peer(at)?;
        let ips_start = at.0 + PeerRecord::SIZE;
        let remaining = self.buf.len() - ips_start;
        let count = record.allowed_ip_count;
        let next = (count as usize)
            .checked_mul(AllowedIpRecord::SIZE)
            .filter(|span| *span <= remaining)
            .map(|span| ips_start + span)
            .ok_or(ProtoError::InconsistentCounts {
                record: "allowed IP",
                offset: at.0,
                count: u64::from(count),
                remaining,
            })?;
        Ok(PeerOffset(next))
    }

    /// Offset immediately past the peer record at `at`
    pub fn first_allowed_ip(&self, at: PeerOffset) -> ProtoResult<AllowedIpOffset> {
        at.0.checked_add(PeerRecord::SIZE)
            .map(AllowedIpOffset)
            .ok_or_else(|| self.truncated(at.0, PeerRecord::SIZE))
    }

    /// Offset past the allowed-IP record at `at`
    pub fn next_allowed_ip(&self, at: AllowedIpOffset) -> ProtoResult<AllowedIpOffset> {
        at.0.checked_add(AllowedIpRecord::SIZE)
            .map(AllowedIpOffset)
            .ok_or_else(|| self.truncated(at.0, AllowedIpRecord::SIZE))
    }

    /// Read the allowed-IP record at `at`
    pub fn allowed_ip(&self, at: AllowedIpOffset) -> ProtoResult<AllowedIpRecord> {
        self.record::<{ AllowedIpRecord::SIZE }>(at.0)
            .map(AllowedIpRecord::from_bytes)
    }

    /// Iterate the peers declared by the interface record.
    ///
    /// The declared peer count is checked against the bytes left after the
    /// interface record before any peer is read.
    pub fn peers(&self) -> ProtoResult<Peers<'a>> {
        let interface = self.interface()?;
        let remaining = self.buf.len() - InterfaceRecord::SIZE;
        let fits = (interface.peer_count as usize)
            .checked_mul(PeerRecord::SIZE)
            .is_some_and(|span| span <= remaining);
        if !fits {
            return Err(ProtoError::InconsistentCounts {
                record: "peer",
                offset: 0,
                count: u64::from(interface.peer_count),
                remaining,
            });
        }
        Ok(Peers {
            walker: *self,
            next: self.first_peer(),
            remaining: interface.peer_count,
            failed: false,
        })
    }

    fn record<const N: usize>(&self, offset: usize) -> ProtoResult<&'a [u8; N]> {
        let end = offset
            .checked_add(N)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| self.truncated(offset, N))?;
        trace!(offset, size = N, "Reading record");
        <&[u8; N]>::try_from(&self.buf[offset..end]).map_err(|_| self.truncated(offset, N))
    }

    fn truncated(&self, offset: usize, needed: usize) -> ProtoError {
        ProtoError::TruncatedBuffer {
            offset,
            needed,
            available: self.buf.len().saturating_sub(offset),
        }
    }
}

/// Iterator over the peer records of a buffer.
#[derive(Debug)]
pub struct Peers<'a> {
    walker: BufferWalker<'a>,
    next: PeerOffset,
    remaining: u32,
    failed: bool,
}

impl<'a> Peers<'a> {
    /// Offset of the next record; once exhausted, the end of the last record
    pub fn position(&self) -> usize {
        self.next.0
    }
}

impl<'a> Iterator for Peers<'a> {
    type Item = ProtoResult<PeerEntry<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 || self.failed {
            return None;
        }
        let at = self.next;
        let entry = self.walker.peer(at).and_then(|record| {
            let next = self.walker.next_peer(at)?;
            Ok((record, next))
        });
        match entry {
            Ok((record, next)) => {
                self.next = next;
                self.remaining -= 1;
                Some(Ok(PeerEntry {
                    offset: at,
                    record,
                    walker: self.walker,
                }))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// A decoded peer record and the location of its allowed IPs.
#[derive(Debug, Clone, Copy)]
pub struct PeerEntry<'a> {
    pub offset: PeerOffset,
    pub record: PeerRecord,
    walker: BufferWalker<'a>,
}

impl<'a> PeerEntry<'a> {
    /// Iterate the allowed-IP records trailing this peer
    pub fn allowed_ips(&self) -> AllowedIps<'a> {
        AllowedIps {
            walker: self.walker,
            next: self.walker.first_allowed_ip(self.offset),
            remaining: self.record.allowed_ip_count,
        }
    }
}

/// Iterator over the allowed-IP records of one peer.
#[derive(Debug)]
pub struct AllowedIps<'a> {
    walker: BufferWalker<'a>,
    next: ProtoResult<AllowedIpOffset>,
    remaining: u32,
}

impl<'a> Iterator for AllowedIps<'a> {
    type Item = ProtoResult<(AllowedIpOffset, AllowedIpRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let at = match &self.next {
            Ok(at) => *at,
            Err(e) => {
                let e = e.clone();
                self.remaining = 0;
                return Some(Err(e));
            }
        };
        match self.walker.allowed_ip(at) {
            Ok(record) => {
                self.remaining -= 1;
                self.next = self.walker.next_allowed_ip(at);
                Some(Ok((at, record)))
            }
            Err(e) => {
                self.remaining = 0;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::layout::{InterfaceFlags, PeerFlags};

    fn interface(peer_count: u32) -> Vec<u8> {
        InterfaceRecord {
            flags: InterfaceFlags::HAS_LISTEN_PORT,
            listen_port: 51820,
            peer_count,
            ..Default::default()
        }
        .to_bytes()
        .to_vec()
    }

    fn peer(fill: u8, allowed_ip_count: u32) -> [u8; PeerRecord::SIZE] {
        PeerRecord {
            flags: PeerFlags::HAS_PUBLIC_KEY,
            public_key: [fill; 32],
            allowed_ip_count,
            ..Default::default()
        }
        .to_bytes()
    }

    fn allowed_ip(last_octet: u8) -> [u8; AllowedIpRecord::SIZE] {
        AllowedIpRecord::from_ip([10, 0, 0, last_octet].into(), 32).to_bytes()
    }

    #[test]
    fn test_next_peer_skips_allowed_ips() {
        let mut buf = interface(2);
        buf.extend_from_slice(&peer(1, 3));
        for i in 0..3 {
            buf.extend_from_slice(&allowed_ip(i));
        }
        buf.extend_from_slice(&peer(2, 0));

        let walker = BufferWalker::new(&buf);
        let first = walker.first_peer();
        assert_eq!(first.get(), 80);
        let second = walker.next_peer(first).unwrap();
        assert_eq!(second.get(), 80 + 136 + 3 * 24);
        assert_eq!(walker.peer(second).unwrap().public_key, [2; 32]);
        assert_eq!(walker.next_peer(second).unwrap().get(), buf.len());
    }

    #[test]
    fn test_allowed_ip_traversal() {
        let mut buf = interface(1);
        buf.extend_from_slice(&peer(1, 2));
        buf.extend_from_slice(&allowed_ip(5));
        buf.extend_from_slice(&allowed_ip(6));

        let walker = BufferWalker::new(&buf);
        let first = walker.first_allowed_ip(walker.first_peer()).unwrap();
        assert_eq!(first.get(), 216);
        let second = walker.next_allowed_ip(first).unwrap();
        assert_eq!(walker.allowed_ip(second).unwrap().address[3], 6);
        let past = walker.next_allowed_ip(second).unwrap();
        assert!(matches!(
            walker.allowed_ip(past),
            Err(ProtoError::TruncatedBuffer { offset: 264, needed: 24, available: 0 })
        ));
    }

    #[test]
    fn test_iterators() {
        let mut buf = interface(2);
        buf.extend_from_slice(&peer(1, 1));
        buf.extend_from_slice(&allowed_ip(1));
        buf.extend_from_slice(&peer(2, 2));
        buf.extend_from_slice(&allowed_ip(2));
        buf.extend_from_slice(&allowed_ip(3));

        let walker = BufferWalker::new(&buf);
        let mut peers = walker.peers().unwrap();
        let first = peers.next().unwrap().unwrap();
        let ips: Vec<_> = first.allowed_ips().map(|r| r.unwrap().1.address[3]).collect();
        assert_eq!(ips, vec![1]);
        let second = peers.next().unwrap().unwrap();
        let ips: Vec<_> = second.allowed_ips().map(|r| r.unwrap().1.address[3]).collect();
        assert_eq!(ips, vec![2, 3]);
        assert!(peers.next().is_none());
        assert_eq!(peers.position(), buf.len());
    }

    #[test]
    fn test_truncated_interface() {
        let buf = interface(0);
        let walker = BufferWalker::new(&buf[..79]);
        assert_eq!(
            walker.interface(),
            Err(ProtoError::TruncatedBuffer {
                offset: 0,
                needed: 80,
                available: 79
            })
        );
    }

    #[test]
    fn test_peer_count_beyond_buffer() {
        let mut buf = interface(3);
        buf.extend_from_slice(&peer(1, 0));
        let walker = BufferWalker::new(&buf);
        assert!(matches!(
            walker.peers(),
            Err(ProtoError::InconsistentCounts { record: "peer", count: 3, .. })
        ));
    }

    #[test]
    fn test_huge_peer_count_does_not_overflow() {
        let buf = interface(u32::MAX);
        let walker = BufferWalker::new(&buf);
        assert!(matches!(
            walker.peers(),
            Err(ProtoError::InconsistentCounts { .. })
        ));
    }

    #[test]
    fn test_allowed_ip_count_beyond_buffer() {
        let mut buf = interface(1);
        buf.extend_from_slice(&peer(1, 4));
        buf.extend_from_slice(&allowed_ip(1));

        let walker = BufferWalker::new(&buf);
        assert_eq!(
            walker.next_peer(walker.first_peer()),
            Err(ProtoError::InconsistentCounts {
                record: "allowed IP",
                offset: 80,
                count: 4,
                remaining: 24,
            })
        );

        let mut peers = walker.peers().unwrap();
        assert!(peers.next().unwrap().is_err());
        assert!(peers.next().is_none());
    }

    #[test]
    fn test_truncated_peer_record() {
        let mut buf = interface(1);
        buf.extend_from_slice(&peer(1, 0)[..100]);
        let walker = BufferWalker::new(&buf);
        // Peer count check passes only when the full record fits
        assert!(walker.peers().is_err());
        assert!(matches!(
            walker.peer(walker.first_peer()),
            Err(ProtoError::TruncatedBuffer { offset: 80, needed: 136, available: 100 })
        ));
    }

    #[test]
    fn test_maximal_allowed_ip_count() {
        let count = u16::MAX as u32;
        let mut buf = interface(1);
        buf.extend_from_slice(&peer(1, count));
        for i in 0..count {
            buf.extend_from_slice(&allowed_ip(i as u8));
        }

        let walker = BufferWalker::new(&buf);
        let entry = walker.peers().unwrap().next().unwrap().unwrap();
        assert_eq!(entry.allowed_ips().filter(|r| r.is_ok()).count(), count as usize);
        assert_eq!(walker.next_peer(entry.offset).unwrap().get(), buf.len());

        let short = BufferWalker::new(&buf[..buf.len() - 1]);
        assert!(matches!(
            short.next_peer(short.first_peer()),
            Err(ProtoError::InconsistentCounts { .. })
        ));
    }
}
