use std::{collections::HashMap, sync::Arc, time::Duration};

use time::OffsetDateTime;
use tokio::{sync::RwLock, task::JoinHandle};
use tracing::debug;
use uuid::Uuid;

const PURGE_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Token ids that were signed out, kept until the token would have expired anyway.
///
/// Process-local: instances behind a load balancer do not share it.
#[derive(Debug, Default)]
pub struct RevocationList {
    // jti -> exp (unix seconds)
    entries: RwLock<HashMap<Uuid, i64>>,
}

impl RevocationList {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Idempotent: revoking twice keeps a single entry.
    pub async fn revoke(&self, jti: Uuid, exp: i64) {
        self.entries.write().await.insert(jti, exp);
    }

    pub async fn is_revoked(&self, jti: Uuid) -> bool {
        self.entries.read().await.contains_key(&jti)
    }

    /// Drops entries whose token has expired; returns how many were removed.
    pub async fn purge_expired(&self, now: OffsetDateTime) -> usize {
        let now = now.unix_timestamp();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, exp| *exp > now);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub fn spawn_purge_task(self: &Arc<Self>) -> JoinHandle<()> {
        let list = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PURGE_INTERVAL);
            loop {
                ticker.tick().await;
                let removed = list.purge_expired(OffsetDateTime::now_utc()).await;
                if removed > 0 {
                    let remaining = list.len().await;
                    debug!(removed, remaining, "purged expired revocations");
                }
            }
        })
    }
}
