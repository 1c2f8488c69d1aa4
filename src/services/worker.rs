use crate::services::migrator::Migrator;
use crate::services::queue::UploadReceiver;
use tokio::sync::watch;

/// Fast path: drains the upload queue one path at a time. Failures are
/// logged and left to the reconciler; nothing is retried here.
pub struct UploadWorker {
    migrator: Migrator,
    queue: UploadReceiver,
    shutdown: watch::Receiver<bool>,
}

impl UploadWorker {
    pub fn new(migrator: Migrator, queue: UploadReceiver, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            migrator,
            queue,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!("🚀 Upload worker started");

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    tracing::info!("🛑 Upload worker shutting down");
                    break;
                }
                next = self.queue.dequeue() => {
                    let Some(path) = next else {
                        tracing::info!("Upload queue closed, worker exiting");
                        break;
                    };
                    tracing::info!("Uploading {}", path);
                    self.migrator.migrate(&path).await;
                }
            }
        }
    }
}
