use tokio::sync::mpsc::{self, error::TrySendError};

/// Producer side of the bounded upload queue. Cheap to clone; every
/// connection's driver holds one.
#[derive(Clone)]
pub struct UploadQueue {
    tx: mpsc::Sender<String>,
}

/// Consumer side of the upload queue, owned by the single upload worker.
pub struct UploadReceiver {
    rx: mpsc::Receiver<String>,
}

impl UploadQueue {
    /// Creates a queue holding at most `capacity` pending paths.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn bounded(capacity: usize) -> (UploadQueue, UploadReceiver) {
        let (tx, rx) = mpsc::channel(capacity);
        (UploadQueue { tx }, UploadReceiver { rx })
    }

    /// Queues `relative_path` for migration without waiting. When the queue
    /// is full the new path is dropped and `false` returned; the file stays
    /// staged for the reconciler.
    pub fn try_enqueue(&self, relative_path: &str) -> bool {
        match self.tx.try_send(relative_path.to_string()) {
            Ok(()) => true,
            Err(TrySendError::Full(path)) => {
                tracing::warn!("Queue full, skipping upload of {}", path);
                false
            }
            Err(TrySendError::Closed(path)) => {
                tracing::warn!("Upload worker gone, leaving {} for reconciliation", path);
                false
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Paths currently waiting.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl UploadReceiver {
    /// Waits for the next path. `None` once every producer is dropped and the
    /// queue is drained.
    pub async fn dequeue(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_order() {
        let (queue, mut receiver) = UploadQueue::bounded(4);
        assert!(queue.try_enqueue("a.txt"));
        assert!(queue.try_enqueue("b.txt"));
        assert_eq!(queue.len(), 2);

        assert_eq!(receiver.dequeue().await.as_deref(), Some("a.txt"));
        assert_eq!(receiver.dequeue().await.as_deref(), Some("b.txt"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_drops_newest() {
        let (queue, mut receiver) = UploadQueue::bounded(2);
        assert!(queue.try_enqueue("first"));
        assert!(queue.try_enqueue("second"));
        assert!(!queue.try_enqueue("third"));
        assert_eq!(queue.len(), 2);

        assert_eq!(receiver.dequeue().await.as_deref(), Some("first"));
        assert_eq!(receiver.dequeue().await.as_deref(), Some("second"));
        assert!(queue.try_enqueue("fourth"));
        assert_eq!(receiver.dequeue().await.as_deref(), Some("fourth"));
    }

    #[tokio::test]
    async fn test_duplicates_allowed() {
        let (queue, mut receiver) = UploadQueue::bounded(4);
        assert!(queue.try_enqueue("same"));
        assert!(queue.try_enqueue("same"));
        assert_eq!(receiver.dequeue().await.as_deref(), Some("same"));
        assert_eq!(receiver.dequeue().await.as_deref(), Some("same"));
    }

    #[tokio::test]
    async fn test_closed_queue() {
        let (queue, receiver) = UploadQueue::bounded(1);
        drop(receiver);
        assert!(!queue.try_enqueue("orphan"));

        let (queue, mut receiver) = UploadQueue::bounded(1);
        drop(queue);
        assert_eq!(receiver.dequeue().await, None);
    }

    #[tokio::test]
    async fn test_many_producers() {
        let (queue, mut receiver) = UploadQueue::bounded(100);
        let handles: Vec<_> = (0..10)
            .map(|i| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    for j in 0..5 {
                        assert!(queue.try_enqueue(&format!("{}/{}", i, j)));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        drop(queue);

        let mut seen = 0;
        while receiver.dequeue().await.is_some() {
            seen += 1;
        }
        assert_eq!(seen, 50);
    }
}
