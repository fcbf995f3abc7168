use crate::storage::{ObjectRef, ObjectStorage, StorageError};
use foldhash::fast::RandomState;
use futures::TryStreamExt;
use http::{HeaderMap, HeaderValue, header::InvalidHeaderValue};
use object_store::{
    Attribute, Attributes, ClientOptions, ObjectMeta, ObjectStore, PutOptions, PutPayload, aws::AmazonS3Builder,
    local::LocalFileSystem, path::Path as ObjectPath,
};
use std::{
    collections::HashMap,
    fs,
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
};
use tokio::runtime::{Builder, Runtime};
use zoe::data::err::ResultWithErrorContext;

/// The canned ACL granting the bucket owner full control of uploaded objects.
pub const BUCKET_OWNER_FULL_CONTROL: &str = "bucket-owner-full-control";

const ACL_HEADER: &str = "x-amz-acl";

/// Where the buckets of a [`BucketStore`] live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// Amazon S3, configured from the standard `AWS_*` environment variables.
    /// Uploads carry the canned ACL if one is given.
    AmazonS3 { canned_acl: Option<String> },
    /// A local directory, with one subdirectory per bucket.
    LocalDirectory(PathBuf),
}

/// Whether a client is used to read or to upload. Upload clients carry the
/// ACL header, and a missing local bucket is only created for uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Access {
    Read,
    Write,
}

/// An [`ObjectStorage`] implementation backed by the `object_store` crate.
///
/// The async client is driven by a private current-thread runtime, so every
/// method blocks until the request completes. One client is built lazily per
/// bucket and reused.
pub struct BucketStore {
    backend:        StorageBackend,
    upload_headers: Option<HeaderMap>,
    runtime:        Runtime,
    stores:         Mutex<HashMap<(String, Access), Arc<dyn ObjectStore>, RandomState>>,
}

impl BucketStore {
    /// Creates a new [`BucketStore`] for the given backend.
    ///
    /// ## Errors
    ///
    /// Fails if the canned ACL is not a valid header value, or if the runtime
    /// for driving storage requests cannot be started.
    pub fn new(backend: StorageBackend) -> std::io::Result<Self> {
        let upload_headers = match &backend {
            StorageBackend::AmazonS3 { canned_acl: Some(acl) } => Some(acl_headers(acl).map_err(|e| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("The canned ACL {acl:?} is not a valid header value: {e}"),
                )
            })?),
            _ => None,
        };

        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .with_context("Failed to start the runtime for object storage requests")?;

        Ok(Self {
            backend,
            upload_headers,
            runtime,
            stores: Mutex::new(HashMap::with_hasher(RandomState::default())),
        })
    }

    /// Creates a [`BucketStore`] serving buckets from subdirectories of `root`.
    #[inline]
    pub fn local(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        Self::new(StorageBackend::LocalDirectory(root.into()))
    }

    /// The local backend rejects object attributes, so content types are only
    /// sent to S3.
    #[inline]
    fn supports_attributes(&self) -> bool {
        matches!(self.backend, StorageBackend::AmazonS3 { .. })
    }

    /// Returns the client for `bucket` and `access`, building it on first use.
    fn store_for(&self, bucket: &str, access: Access) -> Result<Arc<dyn ObjectStore>, StorageError> {
        let mut stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
        let cache_key = (bucket.to_string(), access);
        if let Some(store) = stores.get(&cache_key) {
            return Ok(Arc::clone(store));
        }

        let bucket_ref = ObjectRef::new(bucket, "");
        let store: Arc<dyn ObjectStore> = match &self.backend {
            StorageBackend::AmazonS3 { .. } => {
                let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
                if access == Access::Write
                    && let Some(headers) = &self.upload_headers
                {
                    builder = builder.with_client_options(ClientOptions::new().with_default_headers(headers.clone()));
                }
                Arc::new(builder.build().map_err(|e| classify(e, &bucket_ref))?)
            }
            StorageBackend::LocalDirectory(root) => {
                let dir = root.join(bucket);
                if !dir.is_dir() {
                    if access == Access::Read {
                        return Err(StorageError::NotFound { object: bucket_ref });
                    }
                    fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;
                }
                Arc::new(LocalFileSystem::new_with_prefix(&dir).map_err(|e| classify(e, &bucket_ref))?)
            }
        };

        stores.insert(cache_key, Arc::clone(&store));
        Ok(store)
    }
}

impl ObjectStorage for BucketStore {
    fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
        let store = self.store_for(bucket, Access::Read)?;

        // object_store lists by whole path segments, so list the enclosing
        // directory and apply the string prefix afterwards
        let directory = prefix.rsplit_once('/').map_or("", |(dir, _)| dir);
        let list_root = (!directory.is_empty()).then(|| ObjectPath::from(directory));

        let metas: Vec<ObjectMeta> = self
            .runtime
            .block_on(store.list(list_root.as_ref()).try_collect())
            .map_err(|e| classify(e, &ObjectRef::new(bucket, prefix)))?;

        let mut keys = metas
            .into_iter()
            .map(|meta| meta.location.to_string())
            .filter(|key| key.starts_with(prefix))
            .collect::<Vec<_>>();
        keys.sort_unstable();
        Ok(keys)
    }

    fn get(&self, object: &ObjectRef) -> Result<Vec<u8>, StorageError> {
        let store = self.store_for(&object.bucket, Access::Read)?;
        let location = ObjectPath::from(object.key.as_str());

        self.runtime
            .block_on(async { store.get(&location).await?.bytes().await })
            .map(|bytes| bytes.to_vec())
            .map_err(|e| classify(e, object))
    }

    fn put(&self, object: &ObjectRef, data: Vec<u8>, content_type: Option<&str>) -> Result<(), StorageError> {
        let store = self.store_for(&object.bucket, Access::Write)?;
        let location = ObjectPath::from(object.key.as_str());

        let mut attributes = Attributes::new();
        if self.supports_attributes()
            && let Some(content_type) = content_type
        {
            attributes.insert(Attribute::ContentType, content_type.to_string().into());
        }
        let options = PutOptions {
            attributes,
            ..Default::default()
        };

        self.runtime
            .block_on(store.put_opts(&location, PutPayload::from(data), options))
            .map(|_| ())
            .map_err(|e| classify(e, object))
    }
}

/// The default headers of upload clients, setting the canned ACL.
fn acl_headers(acl: &str) -> Result<HeaderMap, InvalidHeaderValue> {
    let mut headers = HeaderMap::new();
    headers.insert(ACL_HEADER, HeaderValue::from_str(acl)?);
    Ok(headers)
}

fn classify(error: object_store::Error, object: &ObjectRef) -> StorageError {
    let object = object.clone();
    match error {
        object_store::Error::NotFound { .. } => StorageError::NotFound { object },
        object_store::Error::Unauthenticated { .. } | object_store::Error::PermissionDenied { .. } => {
            StorageError::Unauthenticated {
                object,
                message: error.to_string(),
            }
        }
        _ => StorageError::Other {
            object,
            message: error.to_string(),
        },
    }
}
