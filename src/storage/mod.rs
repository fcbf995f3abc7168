//! Blocking access to bucket/key object storage.
//!
//! The pipeline only needs a handful of operations, captured by
//! [`ObjectStorage`]. [`BucketStore`] implements it on top of the
//! `object_store` crate, either against Amazon S3 or against a local directory
//! holding one subdirectory per bucket.

use std::{error::Error, fmt, fs, path::Path};

mod bucket_store;

pub use bucket_store::*;

/// The content type attached to text uploads (FASTQ data and run reports).
pub const TEXT_PLAIN: &str = "text/plain";

/// A reference to a single object: a bucket and a `/`-separated key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub bucket: String,
    pub key:    String,
}

impl ObjectRef {
    #[inline]
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key:    key.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// Errors arising from object storage, classified by what the caller can do
/// about them.
#[non_exhaustive]
#[derive(Debug)]
pub enum StorageError {
    /// The object or bucket does not exist.
    NotFound { object: ObjectRef },
    /// Credentials are missing, invalid, or lack permission.
    Unauthenticated { object: ObjectRef, message: String },
    /// Any other failure reported by the storage service.
    Other { object: ObjectRef, message: String },
    /// A local file could not be read or written while staging an object.
    Io { path: String, source: std::io::Error },
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StorageError::NotFound { object } => write!(f, "{object} does not exist"),
            StorageError::Unauthenticated { object, message } => write!(
                f,
                "Unable to access {object}, check the storage credentials:\n{message}"
            ),
            StorageError::Other { object, message } => write!(f, "Storage request for {object} failed:\n{message}"),
            StorageError::Io { path, source } => write!(f, "Failed to stage the local file {path:#?}:\n{source}"),
        }
    }
}

impl Error for StorageError {
    #[inline]
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StorageError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<StorageError> for std::io::Error {
    #[inline]
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::Io { source, .. } => source,
            StorageError::NotFound { .. } => std::io::Error::new(std::io::ErrorKind::NotFound, error),
            StorageError::Unauthenticated { .. } => std::io::Error::new(std::io::ErrorKind::PermissionDenied, error),
            _ => std::io::Error::other(error),
        }
    }
}

impl StorageError {
    #[inline]
    fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

/// The storage operations consumed by the pipeline.
///
/// Keys are `/`-separated strings. Listing is by plain string prefix, so a
/// prefix of `data` matches both `data/a` and `dataset/b`.
pub trait ObjectStorage {
    /// Lists every key in `bucket` starting with `prefix`, in sorted order.
    fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Fetches the full contents of an object.
    fn get(&self, object: &ObjectRef) -> Result<Vec<u8>, StorageError>;

    /// Creates or overwrites an object. The content type is attached only if
    /// the backend supports object attributes.
    fn put(&self, object: &ObjectRef, data: Vec<u8>, content_type: Option<&str>) -> Result<(), StorageError>;

    /// Fetches an object into a local file, replacing any existing file.
    fn download_to_file(&self, object: &ObjectRef, path: &Path) -> Result<(), StorageError> {
        let data = self.get(object)?;
        fs::write(path, data).map_err(|e| StorageError::io(path, e))
    }

    /// Uploads a local file as an object.
    fn upload_from_file(&self, object: &ObjectRef, path: &Path, content_type: Option<&str>) -> Result<(), StorageError> {
        let data = fs::read(path).map_err(|e| StorageError::io(path, e))?;
        self.put(object, data, content_type)
    }
}

/// Lists the keys in `bucket` under `prefix` that end with `suffix`.
pub fn list_with_suffix<S>(storage: &S, bucket: &str, prefix: &str, suffix: &str) -> Result<Vec<String>, StorageError>
where
    S: ObjectStorage + ?Sized, {
    Ok(storage
        .list(bucket, prefix)?
        .into_iter()
        .filter(|key| key.ends_with(suffix))
        .collect())
}
