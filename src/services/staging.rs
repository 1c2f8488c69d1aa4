use crate::error::StagingError;
use crate::utils::path::{PARTIAL_PREFIX, is_partial, normalize_relative};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use uuid::Uuid;
use walkdir::WalkDir;

/// Byte stream of an upload entering, or a staged file leaving, the staging area.
pub type StagedReader = Pin<Box<dyn AsyncRead + Send>>;

/// An opened staged file.
pub struct StagedBody {
    pub reader: StagedReader,
    pub size: u64,
    /// Location on the local filesystem, when the bytes live there.
    pub local_path: Option<PathBuf>,
}

impl StagedBody {
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            size: data.len() as u64,
            reader: Box::pin(std::io::Cursor::new(data)),
            local_path: None,
        }
    }
}

/// A file waiting in the staging area for migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    /// Slash-separated path relative to the staging root
    pub path: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// Local holding area for uploads that are not yet durable.
///
/// Presence of a file means "not yet migrated"; absence means "migrated".
/// Implementations hold no other state.
#[async_trait]
pub trait StagingStore: Send + Sync {
    /// Stores `content` at `relative_path`, creating parent directories.
    /// Leaves either the complete file or no file. Returns the bytes written.
    async fn write(&self, relative_path: &str, content: StagedReader) -> Result<u64, StagingError>;

    async fn open(&self, relative_path: &str) -> Result<StagedBody, StagingError>;

    /// Current size and modification time of one staged file.
    async fn stat(&self, relative_path: &str) -> Result<StagedFile, StagingError>;

    async fn remove(&self, relative_path: &str) -> Result<(), StagingError>;

    /// Lazily walks every complete staged file. Each call starts a fresh walk.
    /// Unreadable entries are yielded as errors; the walk itself carries on.
    fn list(&self) -> BoxStream<'static, Result<StagedFile, StagingError>>;

    /// Deletes leftovers of interrupted writes last touched before `older_than`.
    async fn purge_partials(&self, older_than: DateTime<Utc>) -> Result<usize, StagingError>;
}

const LIST_BUFFER: usize = 64;

/// Staging area rooted at a directory on the local filesystem.
pub struct LocalStaging {
    root: PathBuf,
}

impl LocalStaging {
    /// Opens the staging root, creating it if needed.
    pub async fn open_root(root: impl Into<PathBuf>) -> Result<Self, StagingError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| StagingError::io(root.display().to_string(), e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, relative_path: &str) -> Result<PathBuf, StagingError> {
        let relative = normalize_relative(relative_path)?;
        Ok(self.root.join(relative))
    }
}

async fn copy_into(path: &Path, mut content: StagedReader) -> std::io::Result<u64> {
    let mut file = fs::File::create(path).await?;
    let written = tokio::io::copy(&mut content, &mut file).await?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

#[async_trait]
impl StagingStore for LocalStaging {
    async fn write(&self, relative_path: &str, content: StagedReader) -> Result<u64, StagingError> {
        let target = self.resolve(relative_path)?;
        let dir = target.parent().unwrap_or(self.root.as_path()).to_path_buf();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StagingError::io(dir.display().to_string(), e))?;

        let partial = dir.join(format!("{}{}", PARTIAL_PREFIX, Uuid::new_v4()));
        let written = match copy_into(&partial, content).await {
            Ok(written) => written,
            Err(e) => {
                let _ = fs::remove_file(&partial).await;
                return Err(StagingError::io(relative_path, e));
            }
        };

        if let Err(e) = fs::rename(&partial, &target).await {
            let _ = fs::remove_file(&partial).await;
            return Err(StagingError::io(relative_path, e));
        }

        Ok(written)
    }

    async fn open(&self, relative_path: &str) -> Result<StagedBody, StagingError> {
        let path = self.resolve(relative_path)?;
        let file = fs::File::open(&path)
            .await
            .map_err(|e| StagingError::io(relative_path, e))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| StagingError::io(relative_path, e))?
            .len();
        Ok(StagedBody {
            reader: Box::pin(file),
            size,
            local_path: Some(path),
        })
    }

    async fn stat(&self, relative_path: &str) -> Result<StagedFile, StagingError> {
        let path = self.resolve(relative_path)?;
        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| StagingError::io(relative_path, e))?;
        let modified = metadata
            .modified()
            .map_err(|e| StagingError::io(relative_path, e))?;
        Ok(StagedFile {
            path: normalize_relative(relative_path)?,
            size: metadata.len(),
            modified: DateTime::<Utc>::from(modified),
        })
    }

    async fn remove(&self, relative_path: &str) -> Result<(), StagingError> {
        let path = self.resolve(relative_path)?;
        fs::remove_file(&path)
            .await
            .map_err(|e| StagingError::io(relative_path, e))
    }

    fn list(&self) -> BoxStream<'static, Result<StagedFile, StagingError>> {
        let root = self.root.clone();
        let (tx, rx) = mpsc::channel(LIST_BUFFER);

        tokio::task::spawn_blocking(move || {
            for entry in WalkDir::new(&root).min_depth(1) {
                let item = match entry {
                    Ok(entry) => match staged_file(&root, &entry) {
                        Ok(Some(file)) => Ok(file),
                        Ok(None) => continue,
                        Err(e) => Err(e),
                    },
                    Err(e) => Err(StagingError::Walk(e.to_string())),
                };
                // Receiver gone: the sweep stopped consuming.
                if tx.blocking_send(item).is_err() {
                    break;
                }
            }
        });

        stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed()
    }

    async fn purge_partials(&self, older_than: DateTime<Utc>) -> Result<usize, StagingError> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || {
            let mut purged = 0;
            for entry in WalkDir::new(&root).min_depth(1).into_iter().flatten() {
                if !entry.file_type().is_file()
                    || !entry.file_name().to_string_lossy().starts_with(PARTIAL_PREFIX)
                {
                    continue;
                }
                let modified = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .map(DateTime::<Utc>::from);
                if modified.is_some_and(|m| m < older_than) {
                    match std::fs::remove_file(entry.path()) {
                        Ok(()) => purged += 1,
                        Err(e) => tracing::warn!(
                            "Failed to purge partial upload {}: {}",
                            entry.path().display(),
                            e
                        ),
                    }
                }
            }
            purged
        })
        .await
        .map_err(|e| StagingError::Walk(e.to_string()))
    }
}

fn staged_file(root: &Path, entry: &walkdir::DirEntry) -> Result<Option<StagedFile>, StagingError> {
    if !entry.file_type().is_file() {
        return Ok(None);
    }
    if entry.file_name().to_string_lossy().starts_with(PARTIAL_PREFIX) {
        return Ok(None);
    }
    let Some(relative) = relative_key(root, entry.path()) else {
        tracing::warn!(
            "Skipping staged file with non UTF-8 path: {}",
            entry.path().display()
        );
        return Ok(None);
    };
    let metadata = entry
        .metadata()
        .map_err(|e| StagingError::Walk(e.to_string()))?;
    let modified = metadata
        .modified()
        .map_err(|e| StagingError::io(relative.clone(), e))?;

    Ok(Some(StagedFile {
        path: relative,
        size: metadata.len(),
        modified: DateTime::<Utc>::from(modified),
    }))
}

fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join("/"))
}

/// In-memory staging area for tests and dry runs.
#[derive(Default)]
pub struct MemoryStaging {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    files: BTreeMap<String, MemoryFile>,
    fail_removals: bool,
    walk_error_at: Option<usize>,
}

struct MemoryFile {
    data: Bytes,
    modified: DateTime<Utc>,
}

impl MemoryStaging {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stages a file with an explicit modification time.
    pub fn insert(&self, relative_path: &str, data: impl Into<Bytes>, modified: DateTime<Utc>) {
        self.state().files.insert(
            relative_path.to_string(),
            MemoryFile {
                data: data.into(),
                modified,
            },
        );
    }

    pub fn contents(&self, relative_path: &str) -> Option<Bytes> {
        self.state().files.get(relative_path).map(|f| f.data.clone())
    }

    pub fn contains(&self, relative_path: &str) -> bool {
        self.state().files.contains_key(relative_path)
    }

    pub fn paths(&self) -> Vec<String> {
        self.state().files.keys().cloned().collect()
    }

    /// Makes every `remove` fail, leaving files in place.
    pub fn fail_removals(&self, fail: bool) {
        self.state().fail_removals = fail;
    }

    /// Makes `list` yield a walk error in place of the entry at `index`.
    pub fn fail_listing_at(&self, index: Option<usize>) {
        self.state().walk_error_at = index;
    }
}

#[async_trait]
impl StagingStore for MemoryStaging {
    async fn write(&self, relative_path: &str, mut content: StagedReader) -> Result<u64, StagingError> {
        let relative = normalize_relative(relative_path)?;
        let mut data = Vec::new();
        content
            .read_to_end(&mut data)
            .await
            .map_err(|e| StagingError::io(relative.clone(), e))?;
        let written = data.len() as u64;
        self.insert(&relative, data, Utc::now());
        Ok(written)
    }

    async fn open(&self, relative_path: &str) -> Result<StagedBody, StagingError> {
        let relative = normalize_relative(relative_path)?;
        self.contents(&relative)
            .map(StagedBody::from_bytes)
            .ok_or(StagingError::NotFound(relative))
    }

    async fn stat(&self, relative_path: &str) -> Result<StagedFile, StagingError> {
        let relative = normalize_relative(relative_path)?;
        let state = self.state();
        let file = state
            .files
            .get(&relative)
            .ok_or_else(|| StagingError::NotFound(relative.clone()))?;
        Ok(StagedFile {
            size: file.data.len() as u64,
            modified: file.modified,
            path: relative,
        })
    }

    async fn remove(&self, relative_path: &str) -> Result<(), StagingError> {
        let relative = normalize_relative(relative_path)?;
        let mut state = self.state();
        if state.fail_removals {
            return Err(StagingError::Io {
                path: relative_path.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "removal refused"),
            });
        }
        state
            .files
            .remove(&relative)
            .map(|_| ())
            .ok_or(StagingError::NotFound(relative))
    }

    fn list(&self) -> BoxStream<'static, Result<StagedFile, StagingError>> {
        let state = self.state();
        let mut items: Vec<_> = state
            .files
            .iter()
            .filter(|(path, _)| !is_partial(path))
            .map(|(path, file)| {
                Ok(StagedFile {
                    path: path.clone(),
                    size: file.data.len() as u64,
                    modified: file.modified,
                })
            })
            .collect();
        if let Some(index) = state.walk_error_at.filter(|i| *i <= items.len()) {
            items.insert(
                index,
                Err(StagingError::Walk(format!("injected walk error at entry {}", index))),
            );
        }
        stream::iter(items).boxed()
    }

    async fn purge_partials(&self, older_than: DateTime<Utc>) -> Result<usize, StagingError> {
        let mut state = self.state();
        let before = state.files.len();
        state
            .files
            .retain(|path, file| !(is_partial(path) && file.modified < older_than));
        Ok(before - state.files.len())
    }
}
