use crate::config::Credentials;
use crate::error::DriverError;
use crate::services::queue::UploadQueue;
use crate::services::staging::{StagedReader, StagingStore};
use crate::utils::path::normalize_relative;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Directory entry reported to the protocol engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub is_dir: bool,
}

/// Storage contract the FTP protocol engine drives, one instance per
/// client connection.
#[async_trait]
pub trait FtpDriver: Send + Sync {
    fn authenticate(&self, user: &str, pass: &str) -> bool;

    /// Size of `path` in bytes, `None` when unknown.
    fn file_size(&self, path: &str) -> Option<u64>;

    fn modified_time(&self, path: &str) -> Result<DateTime<Utc>, DriverError>;

    fn change_dir(&self, path: &str) -> bool;

    fn dir_contents(&self, path: &str) -> Vec<DirEntry>;

    fn delete_dir(&self, path: &str) -> bool;

    fn delete_file(&self, path: &str) -> bool;

    fn rename(&self, from: &str, to: &str) -> bool;

    fn make_dir(&self, path: &str) -> bool;

    async fn get_file(&self, path: &str) -> Result<StagedReader, DriverError>;

    /// Accepts an uploaded file. `true` means the bytes are safely staged.
    async fn put_file(&self, path: &str, data: StagedReader) -> bool;
}

/// Creates a driver for each new client connection.
pub trait FtpDriverFactory: Send + Sync {
    fn new_driver(&self) -> Result<Box<dyn FtpDriver>, DriverError>;
}

/// Write-only driver: uploads land in the staging area and are queued for
/// migration. Listing is empty; downloads, deletes, renames and mkdir are
/// refused.
pub struct BridgeDriver {
    staging: Arc<dyn StagingStore>,
    queue: UploadQueue,
    credentials: Credentials,
}

impl BridgeDriver {
    pub fn new(staging: Arc<dyn StagingStore>, queue: UploadQueue, credentials: Credentials) -> Self {
        Self {
            staging,
            queue,
            credentials,
        }
    }

    /// Stages `data` at `path`, then offers the path to the upload queue.
    /// A full queue is not an error: the reconciler picks the file up later.
    pub async fn accept_upload(&self, path: &str, data: StagedReader) -> Result<String, DriverError> {
        let relative = normalize_relative(path)?;
        let written = self.staging.write(&relative, data).await?;
        tracing::info!("Writing to {} ({} bytes)", relative, written);
        self.queue.try_enqueue(&relative);
        Ok(relative)
    }
}

#[async_trait]
impl FtpDriver for BridgeDriver {
    fn authenticate(&self, user: &str, pass: &str) -> bool {
        user == self.credentials.username && pass == self.credentials.password
    }

    fn file_size(&self, _path: &str) -> Option<u64> {
        None
    }

    fn modified_time(&self, _path: &str) -> Result<DateTime<Utc>, DriverError> {
        Ok(Utc::now())
    }

    fn change_dir(&self, _path: &str) -> bool {
        true
    }

    fn dir_contents(&self, _path: &str) -> Vec<DirEntry> {
        Vec::new()
    }

    fn delete_dir(&self, _path: &str) -> bool {
        false
    }

    fn delete_file(&self, _path: &str) -> bool {
        false
    }

    fn rename(&self, _from: &str, _to: &str) -> bool {
        false
    }

    fn make_dir(&self, _path: &str) -> bool {
        false
    }

    async fn get_file(&self, _path: &str) -> Result<StagedReader, DriverError> {
        Err(DriverError::NotSupported("GET"))
    }

    async fn put_file(&self, path: &str, data: StagedReader) -> bool {
        match self.accept_upload(path, data).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!("Error staging upload {}: {}", path, e);
                false
            }
        }
    }
}

/// Hands every connection the shared staging area, queue and login.
#[derive(Clone)]
pub struct BridgeDriverFactory {
    staging: Arc<dyn StagingStore>,
    queue: UploadQueue,
    credentials: Credentials,
}

impl BridgeDriverFactory {
    pub fn new(staging: Arc<dyn StagingStore>, queue: UploadQueue, credentials: Credentials) -> Self {
        Self {
            staging,
            queue,
            credentials,
        }
    }
}

impl FtpDriverFactory for BridgeDriverFactory {
    fn new_driver(&self) -> Result<Box<dyn FtpDriver>, DriverError> {
        Ok(Box::new(BridgeDriver::new(
            self.staging.clone(),
            self.queue.clone(),
            self.credentials.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::staging::MemoryStaging;

    fn credentials() -> Credentials {
        Credentials {
            username: "scanner".to_string(),
            password: "s3cret".to_string(),
        }
    }

    #[test]
    fn test_authenticate() {
        let (queue, _rx) = UploadQueue::bounded(1);
        let driver = BridgeDriver::new(Arc::new(MemoryStaging::new()), queue, credentials());
        assert!(driver.authenticate("scanner", "s3cret"));
        assert!(!driver.authenticate("scanner", "wrong"));
        assert!(!driver.authenticate("other", "s3cret"));
    }

    #[tokio::test]
    async fn test_unsupported_operations() {
        let (queue, _rx) = UploadQueue::bounded(1);
        let factory = BridgeDriverFactory::new(Arc::new(MemoryStaging::new()), queue, credentials());
        let driver = factory.new_driver().unwrap();

        assert!(driver.change_dir("/anything"));
        assert!(driver.dir_contents("/").is_empty());
        assert_eq!(driver.file_size("/a.txt"), None);
        assert!(driver.modified_time("/a.txt").is_ok());
        assert!(!driver.delete_dir("/a"));
        assert!(!driver.delete_file("/a.txt"));
        assert!(!driver.rename("/a.txt", "/b.txt"));
        assert!(!driver.make_dir("/new"));
        assert!(matches!(
            driver.get_file("/a.txt").await,
            Err(DriverError::NotSupported("GET"))
        ));
    }

    #[tokio::test]
    async fn test_put_file_stages_and_enqueues() {
        let staging = Arc::new(MemoryStaging::new());
        let (queue, mut rx) = UploadQueue::bounded(4);
        let driver = BridgeDriver::new(staging.clone(), queue, credentials());

        assert!(driver.put_file("/a/b.txt", Box::pin(&b"hello"[..])).await);
        assert_eq!(&staging.contents("a/b.txt").unwrap()[..], b"hello");
        assert_eq!(rx.dequeue().await.as_deref(), Some("a/b.txt"));
    }

    #[tokio::test]
    async fn test_put_file_succeeds_when_queue_full() {
        let staging = Arc::new(MemoryStaging::new());
        let (queue, _rx) = UploadQueue::bounded(1);
        assert!(queue.try_enqueue("occupied"));
        let driver = BridgeDriver::new(staging.clone(), queue.clone(), credentials());

        assert!(driver.put_file("/late.txt", Box::pin(&b"late"[..])).await);
        assert!(staging.contains("late.txt"));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_put_file_rejects_traversal() {
        let staging = Arc::new(MemoryStaging::new());
        let (queue, _rx) = UploadQueue::bounded(1);
        let driver = BridgeDriver::new(staging.clone(), queue.clone(), credentials());

        assert!(!driver.put_file("/../etc/passwd", Box::pin(&b"x"[..])).await);
        assert!(staging.paths().is_empty());
        assert!(queue.is_empty());
    }
}
