//! Valkey (Redis-compatible) acknowledgment store.
//!
//! Data model:
//!   {prefix}:ack:{profile}   → SET of acknowledged notification keys
//!
//! Keys never expire; acknowledgment is permanent.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use tracing::{debug, info};

use crate::notify::{AcknowledgmentStore, NotifyError};

/// Valkey-backed acknowledgment store.
///
/// All keys are namespaced under a configurable prefix and profile, so the
/// acknowledgments of several jurors can share one Valkey.
#[derive(Clone)]
pub struct ValkeyAckStore {
    conn: MultiplexedConnection,
    set_key: String,
}

impl ValkeyAckStore {
    /// Connect to Valkey/Redis.
    pub async fn connect(url: &str, prefix: &str, profile: &str) -> anyhow::Result<Self> {
        let client = Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!(url = url, prefix = prefix, profile = profile, "connected to Valkey");
        Ok(Self {
            conn,
            set_key: ack_set_key(prefix, profile),
        })
    }

    /// Test connectivity.
    pub async fn ping(&self) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        debug!(response = %pong, "Valkey ping");
        Ok(())
    }

    /// Number of acknowledged keys in this profile.
    pub async fn count(&self) -> anyhow::Result<usize> {
        let mut conn = self.conn.clone();
        let count: usize = conn.scard(&self.set_key).await?;
        Ok(count)
    }
}

#[async_trait]
impl AcknowledgmentStore for ValkeyAckStore {
    async fn is_acknowledged(&self, key: &str) -> Result<bool, NotifyError> {
        let mut conn = self.conn.clone();
        conn.sismember(&self.set_key, key)
            .await
            .map_err(NotifyError::ack_store)
    }

    async fn acknowledge(&self, key: &str) -> Result<(), NotifyError> {
        let mut conn = self.conn.clone();
        conn.sadd::<_, _, ()>(&self.set_key, key)
            .await
            .map_err(NotifyError::ack_store)?;
        debug!(key = %key, set = %self.set_key, "stored acknowledgment");
        Ok(())
    }
}

/// Build the namespaced set key: "{prefix}:ack:{profile}"
fn ack_set_key(prefix: &str, profile: &str) -> String {
    format!("{}:ack:{}", prefix, profile)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_key_is_scoped_per_profile() {
        assert_eq!(ack_set_key("juror-notify", "alice"), "juror-notify:ack:alice");
        assert_ne!(
            ack_set_key("juror-notify", "alice"),
            ack_set_key("juror-notify", "bob")
        );
    }
}
