//! Sync job queue port

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::result::Result;
use crate::domain::SyncType;

/// Fire-and-forget submission of bank sync jobs
///
/// `Ok` means the job was accepted, not that it ran. Implementations run jobs
/// at least once and retry retryable failures, so jobs must be idempotent.
#[async_trait]
pub trait SyncQueue: Send + Sync {
    async fn enqueue_bank_sync(
        &self,
        user_id: Uuid,
        connection_id: Uuid,
        sync_type: SyncType,
    ) -> Result<()>;
}
