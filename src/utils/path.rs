use crate::error::StagingError;

/// File name prefix of in-progress staging writes. Files carrying it are
/// never listed as staged and never accepted from protocol clients.
pub const PARTIAL_PREFIX: &str = ".ftp2s3-partial-";

/// Normalizes a client-supplied upload path into the slash-separated,
/// root-relative form used for both staging paths and object keys.
///
/// Leading, trailing and repeated slashes and `.` segments are dropped.
/// Empty paths, `..` segments, NUL bytes and partial-file names are rejected.
pub fn normalize_relative(path: &str) -> Result<String, StagingError> {
    if path.contains('\0') {
        return Err(StagingError::InvalidPath(path.to_string()));
    }

    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                tracing::warn!("Path traversal attempt detected: {}", path);
                return Err(StagingError::InvalidPath(path.to_string()));
            }
            s if s.starts_with(PARTIAL_PREFIX) => {
                return Err(StagingError::InvalidPath(path.to_string()));
            }
            s => segments.push(s),
        }
    }

    if segments.is_empty() {
        return Err(StagingError::InvalidPath(path.to_string()));
    }

    Ok(segments.join("/"))
}

/// True when the final component of `name` marks an unfinished write.
pub fn is_partial(name: &str) -> bool {
    name.rsplit('/')
        .next()
        .is_some_and(|file| file.starts_with(PARTIAL_PREFIX))
}
