//! Packet-id allocation and the in-flight side-table.
//!
//! The side-table is the authoritative "in flight" set: an id is live from
//! `next` until `free`, and every ack is only acted upon if an origin is
//! still present under its id.

use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::codec::Publish;
use crate::types::{PacketId, Topic, TopicFilter};

/// The packet that opened an outbound flow, keyed by its packet id.
#[derive(Debug, Clone)]
pub enum OutboundOrigin {
    Publish(Publish),
    Subscribe(Vec<Topic>),
    Unsubscribe(Vec<TopicFilter>),
}

/// Thread-safe 16-bit id generator with an origin side-table.
#[derive(Default)]
pub struct PacketIdAllocator {
    next: AtomicU32,
    in_flight: DashMap<PacketId, OutboundOrigin>,
}

impl PacketIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the next free id and records `origin` under it.
    ///
    /// Returns 0 iff the whole id space is in flight; the caller must treat
    /// 0 as retry-later.
    pub fn next(&self, origin: OutboundOrigin) -> PacketId {
        // counter wrap is safe, the probe below checks for collisions
        for _ in 0..=u16::MAX as u32 {
            let id = self.bump();
            match self.in_flight.entry(id) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(entry) => {
                    entry.insert(origin);
                    return id;
                }
            }
        }
        0
    }

    /// Ends the flow opened under `id`.
    pub fn free(&self, id: PacketId) {
        self.in_flight.remove(&id);
    }

    /// Looks up the origin of an in-flight id.
    pub fn get(&self, id: PacketId) -> Option<OutboundOrigin> {
        self.in_flight.get(&id).map(|entry| entry.value().clone())
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    #[inline]
    fn bump(&self) -> PacketId {
        let id = self.next.fetch_add(1, Ordering::SeqCst).wrapping_add(1) as PacketId;
        if id == 0 {
            // skip the reserved "unassigned" value
            self.next.store(1, Ordering::SeqCst);
            1
        } else {
            id
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::QoS;

    fn origin() -> OutboundOrigin {
        OutboundOrigin::Subscribe(vec![Topic::new("t", QoS::AtMostOnce)])
    }

    #[test]
    fn test_sequential_ids() {
        let alloc = PacketIdAllocator::new();
        assert_eq!(alloc.next(origin()), 1);
        assert_eq!(alloc.next(origin()), 2);
        assert_eq!(alloc.next(origin()), 3);
        assert_eq!(alloc.in_flight_len(), 3);
    }

    #[test]
    fn test_free_and_lookup() {
        let alloc = PacketIdAllocator::new();
        let id = alloc.next(OutboundOrigin::Unsubscribe(vec!["a/b".into()]));
        assert!(matches!(alloc.get(id), Some(OutboundOrigin::Unsubscribe(_))));
        alloc.free(id);
        assert!(alloc.get(id).is_none());
        assert_eq!(alloc.in_flight_len(), 0);
    }

    #[test]
    fn test_collision_probe() {
        let alloc = PacketIdAllocator::new();
        let a = alloc.next(origin());
        let b = alloc.next(origin());
        assert_ne!(a, b);

        // force the counter just before `a`; the next allocation must skip it
        alloc.next.store(u32::from(a) - 1, Ordering::SeqCst);
        let c = alloc.next(origin());
        assert_ne!(c, a);
        assert_ne!(c, b);
    }

    #[test]
    fn test_wrap_skips_zero() {
        let alloc = PacketIdAllocator::new();
        alloc.next.store(u32::from(u16::MAX), Ordering::SeqCst);
        assert_eq!(alloc.next(origin()), 1);
    }

    #[test]
    fn test_exhaustion_returns_zero() {
        let alloc = PacketIdAllocator::new();
        for _ in 0..u16::MAX {
            assert_ne!(alloc.next(origin()), 0);
        }
        assert_eq!(alloc.in_flight_len(), u16::MAX as usize);
        assert_eq!(alloc.next(origin()), 0);

        // freeing one id makes allocation possible again
        alloc.free(7);
        assert_eq!(alloc.next(origin()), 7);
    }

    #[test]
    fn test_concurrent_next_is_collision_free() {
        use std::sync::Arc;

        let alloc = Arc::new(PacketIdAllocator::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let alloc = alloc.clone();
            handles.push(std::thread::spawn(move || {
                (0..500).map(|_| alloc.next(origin())).collect::<Vec<_>>()
            }));
        }
        let mut all: Vec<PacketId> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort_unstable();
        let before = all.len();
        all.dedup();
        assert_eq!(before, all.len());
        assert!(!all.contains(&0));
    }
}
