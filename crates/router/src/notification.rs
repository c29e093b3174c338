use common::traits::NotificationSystem;
use common::BlobId;
use tracing::debug;

/// Notification sink that only logs blob lifecycle events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotificationSystem;

impl NotificationSystem for LoggingNotificationSystem {
    fn on_blob_created(&self, blob_id: &BlobId, size: u64) {
        debug!(%blob_id, size, "blob created");
    }

    fn on_blob_deleted(&self, blob_id: &BlobId) {
        debug!(%blob_id, "blob deleted");
    }
}
