use crate::error::SinkError;
use crate::services::staging::StagedBody;
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::{ByteStream, Length};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::AsyncReadExt;

/// Object key of a staged file: `prefix/relative_path`.
pub fn object_key(prefix: &str, relative_path: &str) -> String {
    format!(
        "{}/{}",
        prefix.trim_end_matches('/'),
        relative_path.trim_start_matches('/')
    )
}

/// Content type guessed from the file extension, `application/octet-stream`
/// when unknown.
pub fn content_type_for(relative_path: &str) -> String {
    mime_guess::from_path(relative_path)
        .first()
        .unwrap_or(mime::APPLICATION_OCTET_STREAM)
        .essence_str()
        .to_string()
}

/// Remote, durable destination of staged files.
///
/// Keys are a pure function of the relative path, so putting the same path
/// twice overwrites one object instead of creating two.
#[async_trait]
pub trait DurableSink: Send + Sync {
    fn key_for(&self, relative_path: &str) -> String;

    async fn put(
        &self,
        relative_path: &str,
        body: StagedBody,
        content_type: &str,
    ) -> Result<(), SinkError>;
}

pub struct S3Sink {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3Sink {
    pub fn new(client: Client, bucket: String, prefix: String) -> Self {
        Self {
            client,
            bucket,
            prefix,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl DurableSink for S3Sink {
    fn key_for(&self, relative_path: &str) -> String {
        object_key(&self.prefix, relative_path)
    }

    async fn put(
        &self,
        relative_path: &str,
        mut body: StagedBody,
        content_type: &str,
    ) -> Result<(), SinkError> {
        let key = self.key_for(relative_path);

        // Files on disk are streamed; only in-memory bodies are buffered.
        let stream = match &body.local_path {
            Some(path) => ByteStream::read_from()
                .path(path)
                .length(Length::Exact(body.size))
                .build()
                .await
                .map_err(|e| SinkError::Body(std::io::Error::other(e)))?,
            None => {
                let mut data = Vec::with_capacity(body.size as usize);
                body.reader.read_to_end(&mut data).await?;
                ByteStream::from(data)
            }
        };

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(content_type)
            .content_length(body.size as i64)
            .body(stream)
            .send()
            .await
            .map_err(|e| {
                SinkError::Upload(format!(
                    "s3://{}/{}: {}",
                    self.bucket,
                    key,
                    DisplayErrorContext(&e)
                ))
            })?;
        Ok(())
    }
}

/// An object held by [`MemorySink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub data: Bytes,
    pub content_type: String,
}

/// In-memory sink for tests, with failure injection.
#[derive(Default)]
pub struct MemorySink {
    prefix: String,
    objects: Mutex<HashMap<String, StoredObject>>,
    puts: AtomicUsize,
    failures_pending: AtomicUsize,
    unavailable: AtomicBool,
    latency: Mutex<Duration>,
}

impl MemorySink {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Self::default()
        }
    }

    fn objects(&self) -> MutexGuard<'_, HashMap<String, StoredObject>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.objects().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of successful puts, overwrites included.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Fails the next `count` puts.
    pub fn fail_next(&self, count: usize) {
        self.failures_pending.store(count, Ordering::SeqCst);
    }

    /// Makes every put take `latency` before it completes.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    /// Fails every put until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl DurableSink for MemorySink {
    fn key_for(&self, relative_path: &str) -> String {
        object_key(&self.prefix, relative_path)
    }

    async fn put(
        &self,
        relative_path: &str,
        mut body: StagedBody,
        content_type: &str,
    ) -> Result<(), SinkError> {
        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SinkError::Upload("sink unavailable".to_string()));
        }
        let injected = self
            .failures_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(SinkError::Upload("injected failure".to_string()));
        }

        let mut data = Vec::new();
        body.reader.read_to_end(&mut data).await?;
        self.objects().insert(
            self.key_for(relative_path),
            StoredObject {
                data: Bytes::from(data),
                content_type: content_type.to_string(),
            },
        );
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key() {
        assert_eq!(object_key("prefix", "a/b.txt"), "prefix/a/b.txt");
        assert_eq!(object_key("prefix/", "a/b.txt"), "prefix/a/b.txt");
        assert_eq!(object_key("prefix", "/a/b.txt"), "prefix/a/b.txt");
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("a/b.txt"), "text/plain");
        assert_eq!(content_type_for("scan.PDF"), "application/pdf");
        assert_eq!(content_type_for("photos/cat.jpg"), "image/jpeg");
        assert_eq!(content_type_for("data.csv"), "text/csv");
        assert_eq!(content_type_for("noextension"), "application/octet-stream");
        assert_eq!(content_type_for("blob.zzqx"), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_memory_sink_overwrites_same_key() {
        let sink = MemorySink::new("prefix");
        sink.put("a/b.txt", StagedBody::from_bytes("one"), "text/plain")
            .await
            .unwrap();
        sink.put("a/b.txt", StagedBody::from_bytes("two"), "text/plain")
            .await
            .unwrap();

        assert_eq!(sink.keys(), vec!["prefix/a/b.txt".to_string()]);
        assert_eq!(sink.put_count(), 2);
        let object = sink.object("prefix/a/b.txt").unwrap();
        assert_eq!(object.data, Bytes::from_static(b"two"));
        assert_eq!(object.content_type, "text/plain");
    }

    #[tokio::test]
    async fn test_memory_sink_failure_injection() {
        let sink = MemorySink::new("p");
        sink.fail_next(1);
        assert!(
            sink.put("x.bin", StagedBody::from_bytes("x"), "application/octet-stream")
                .await
                .is_err()
        );
        assert!(
            sink.put("x.bin", StagedBody::from_bytes("x"), "application/octet-stream")
                .await
                .is_ok()
        );

        sink.set_unavailable(true);
        assert!(
            sink.put("y.bin", StagedBody::from_bytes("y"), "application/octet-stream")
                .await
                .is_err()
        );
        assert!(sink.object("p/y.bin").is_none());
    }
}
