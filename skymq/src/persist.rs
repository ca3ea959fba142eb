//! Persistence capability for in-flight packets.
//!
//! Two key namespaces: `S<id>` for outbound flows, `R<id>` for inbound
//! flows, `<id>` being the decimal packet id. Implementations must be safe
//! under concurrent use; failures are reported to the persist handler and
//! are never fatal to a session.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::codec::Packet;
use crate::types::PacketId;
use crate::Result;

/// Key of an outbound-flow record.
#[inline]
pub fn send_key(id: PacketId) -> String {
    format!("S{id}")
}

/// Key of an inbound-flow record.
#[inline]
pub fn recv_key(id: PacketId) -> String {
    format!("R{id}")
}

#[async_trait]
pub trait Persist: Send + Sync {
    async fn store(&self, key: &str, packet: Packet) -> Result<()>;

    async fn load(&self, key: &str) -> Result<Option<Packet>>;

    async fn remove(&self, key: &str) -> Result<()>;

    /// Drops every record of both namespaces; invoked when a clean session
    /// is established and prior flow state has become meaningless.
    async fn clear(&self) -> Result<()>;
}

/// Discards everything; the default when the application configures no store.
pub struct NoopPersist;

#[async_trait]
impl Persist for NoopPersist {
    async fn store(&self, _key: &str, _packet: Packet) -> Result<()> {
        Ok(())
    }

    async fn load(&self, _key: &str) -> Result<Option<Packet>> {
        Ok(None)
    }

    async fn remove(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        Ok(())
    }
}

/// In-memory store, useful for tests and single-process deployments.
#[derive(Default)]
pub struct MemPersist {
    entries: DashMap<String, Packet>,
}

impl MemPersist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

#[async_trait]
impl Persist for MemPersist {
    async fn store(&self, key: &str, packet: Packet) -> Result<()> {
        self.entries.insert(key.to_owned(), packet);
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<Packet>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys() {
        assert_eq!(send_key(1), "S1");
        assert_eq!(send_key(65535), "S65535");
        assert_eq!(recv_key(9), "R9");
    }

    #[tokio::test]
    async fn test_mem_persist() {
        let persist = MemPersist::new();
        persist.store(&send_key(3), Packet::PingReq).await.unwrap();
        assert!(persist.contains("S3"));
        assert_eq!(persist.load("S3").await.unwrap(), Some(Packet::PingReq));
        assert_eq!(persist.load("R3").await.unwrap(), None);

        persist.remove("S3").await.unwrap();
        assert!(persist.is_empty());

        persist.store(&recv_key(1), Packet::PingReq).await.unwrap();
        persist.clear().await.unwrap();
        assert!(persist.is_empty());
    }
}
