use crate::error::{SinkError, StagingError};
use crate::services::sink::{DurableSink, content_type_for};
use crate::services::staging::{StagedFile, StagingStore};
use std::sync::Arc;
use std::time::Duration;

/// Where a single migration attempt left its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Durable and removed from staging.
    Migrated,
    /// Durable, but the local copy could not be removed.
    Orphaned,
    /// The put failed or timed out; the file stays staged for the next sweep.
    Retained,
    /// The path was written again while its previous content was being
    /// uploaded. The newer copy stays staged.
    Superseded,
    /// The staged file could not be opened, usually because another
    /// migration already removed it.
    Skipped,
}

/// Moves one staged file to the durable sink and deletes it locally on
/// success. Shared by the upload worker and the reconciler.
#[derive(Clone)]
pub struct Migrator {
    staging: Arc<dyn StagingStore>,
    sink: Arc<dyn DurableSink>,
    upload_timeout: Option<Duration>,
}

impl Migrator {
    pub fn new(staging: Arc<dyn StagingStore>, sink: Arc<dyn DurableSink>) -> Self {
        Self {
            staging,
            sink,
            upload_timeout: None,
        }
    }

    /// Bounds every put; an upload still running after `timeout` counts as failed.
    pub fn with_upload_timeout(mut self, timeout: Duration) -> Self {
        self.upload_timeout = Some(timeout);
        self
    }

    pub async fn migrate(&self, relative_path: &str) -> MigrationOutcome {
        let before = match self.staging.stat(relative_path).await {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!("Failed to stat staged file {}: {}", relative_path, e);
                return MigrationOutcome::Skipped;
            }
        };
        let body = match self.staging.open(relative_path).await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!("Failed to open staged file {}: {}", relative_path, e);
                return MigrationOutcome::Skipped;
            }
        };

        let content_type = content_type_for(relative_path);
        let key = self.sink.key_for(relative_path);
        let put = self.sink.put(relative_path, body, &content_type);
        let result = match self.upload_timeout {
            Some(limit) => match tokio::time::timeout(limit, put).await {
                Ok(result) => result,
                Err(_) => Err(SinkError::Timeout(limit)),
            },
            None => put.await,
        };
        if let Err(e) = result {
            tracing::error!("Failed to upload {} to {}: {}", relative_path, key, e);
            return MigrationOutcome::Retained;
        }

        match self.staging.stat(relative_path).await {
            Ok(after) if unchanged(&before, &after) => {}
            Ok(_) => {
                tracing::warn!(
                    "🔁 {} was rewritten during upload, keeping the newer copy staged",
                    relative_path
                );
                return MigrationOutcome::Superseded;
            }
            Err(StagingError::NotFound(_)) => {
                tracing::info!("{} uploaded, staged copy already gone", relative_path);
                return MigrationOutcome::Skipped;
            }
            Err(e) => {
                tracing::error!("Uploaded {} but failed to re-check it: {}", relative_path, e);
                return MigrationOutcome::Retained;
            }
        }

        if let Err(e) = self.staging.remove(relative_path).await {
            tracing::error!(
                "Uploaded {} but failed to remove staged copy: {}",
                relative_path,
                e
            );
            return MigrationOutcome::Orphaned;
        }

        tracing::info!("✅ {} uploaded to {}", relative_path, key);
        MigrationOutcome::Migrated
    }
}

fn unchanged(before: &StagedFile, after: &StagedFile) -> bool {
    before.size == after.size && before.modified == after.modified
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::sink::MemorySink;
    use crate::services::staging::{MemoryStaging, StagedBody};
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};

    fn setup() -> (Arc<MemoryStaging>, Arc<MemorySink>, Migrator) {
        let staging = Arc::new(MemoryStaging::new());
        let sink = Arc::new(MemorySink::new("prefix"));
        let migrator = Migrator::new(staging.clone(), sink.clone());
        (staging, sink, migrator)
    }

    #[tokio::test]
    async fn test_migrate_removes_on_success() {
        let (staging, sink, migrator) = setup();
        staging.insert("a/b.txt", "hello", Utc::now());

        assert_eq!(migrator.migrate("a/b.txt").await, MigrationOutcome::Migrated);
        assert!(!staging.contains("a/b.txt"));
        let object = sink.object("prefix/a/b.txt").unwrap();
        assert_eq!(&object.data[..], b"hello");
        assert_eq!(object.content_type, "text/plain");
    }

    #[tokio::test]
    async fn test_failed_put_keeps_file() {
        let (staging, sink, migrator) = setup();
        staging.insert("a.pdf", "%PDF", Utc::now());
        sink.fail_next(1);

        assert_eq!(migrator.migrate("a.pdf").await, MigrationOutcome::Retained);
        assert!(staging.contains("a.pdf"));
        assert!(sink.keys().is_empty());

        assert_eq!(migrator.migrate("a.pdf").await, MigrationOutcome::Migrated);
        assert!(!staging.contains("a.pdf"));
    }

    #[tokio::test]
    async fn test_failed_remove_orphans_file() {
        let (staging, sink, migrator) = setup();
        staging.insert("o.bin", "x", Utc::now());
        staging.fail_removals(true);

        assert_eq!(migrator.migrate("o.bin").await, MigrationOutcome::Orphaned);
        assert!(staging.contains("o.bin"));
        assert!(sink.object("prefix/o.bin").is_some());
    }

    #[tokio::test]
    async fn test_missing_file_is_skipped() {
        let (_staging, sink, migrator) = setup();
        assert_eq!(migrator.migrate("gone.txt").await, MigrationOutcome::Skipped);
        assert_eq!(sink.put_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_put_times_out_and_keeps_file() {
        let (staging, sink, migrator) = setup();
        let migrator = migrator.with_upload_timeout(Duration::from_secs(5));
        staging.insert("slow.bin", "x", Utc::now());
        sink.set_latency(Duration::from_secs(60));

        assert_eq!(migrator.migrate("slow.bin").await, MigrationOutcome::Retained);
        assert!(staging.contains("slow.bin"));
        assert!(sink.keys().is_empty());

        sink.set_latency(Duration::ZERO);
        assert_eq!(migrator.migrate("slow.bin").await, MigrationOutcome::Migrated);
    }

    /// Simulates a client re-uploading the same path while the old
    /// content is on its way to the sink.
    struct RewriteDuringPut {
        staging: Arc<MemoryStaging>,
        inner: MemorySink,
    }

    #[async_trait]
    impl DurableSink for RewriteDuringPut {
        fn key_for(&self, relative_path: &str) -> String {
            self.inner.key_for(relative_path)
        }

        async fn put(
            &self,
            relative_path: &str,
            body: StagedBody,
            content_type: &str,
        ) -> Result<(), SinkError> {
            self.staging.insert(
                relative_path,
                "second upload",
                Utc::now() + ChronoDuration::seconds(1),
            );
            self.inner.put(relative_path, body, content_type).await
        }
    }

    #[tokio::test]
    async fn test_rewrite_during_put_is_not_deleted() {
        let staging = Arc::new(MemoryStaging::new());
        let sink = Arc::new(RewriteDuringPut {
            staging: staging.clone(),
            inner: MemorySink::new("prefix"),
        });
        let migrator = Migrator::new(staging.clone(), sink.clone());
        staging.insert("r.txt", "first", Utc::now() - ChronoDuration::minutes(1));

        assert_eq!(migrator.migrate("r.txt").await, MigrationOutcome::Superseded);
        assert_eq!(&staging.contents("r.txt").unwrap()[..], b"second upload");
        assert_eq!(&sink.inner.object("prefix/r.txt").unwrap().data[..], b"first");

        // The next attempt ships the newer content.
        assert_eq!(migrator.migrate("r.txt").await, MigrationOutcome::Migrated);
        assert_eq!(
            &sink.inner.object("prefix/r.txt").unwrap().data[..],
            b"second upload"
        );
        assert!(!staging.contains("r.txt"));
    }
}
