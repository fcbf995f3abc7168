use crate::storage::{BUCKET_OWNER_FULL_CONTROL, BucketStore, StorageBackend};
use clap::{Args, ValueHint};
use log::info;
use std::path::PathBuf;

/// The bucket used for inputs, outputs, and references unless overridden.
pub(crate) const DEFAULT_BUCKET: &str = "alucloud76-genomic";

/// Arguments selecting the object storage backend, shared by all subcommands.
#[derive(Args, Debug)]
pub struct StorageArgs {
    #[arg(long, env = "SEQSTAGE_STORAGE_ROOT", value_hint = ValueHint::DirPath)]
    /// Serve buckets from subdirectories of this local directory instead of
    /// Amazon S3. S3 is configured from the standard AWS environment
    /// variables.
    storage_root: Option<PathBuf>,

    #[arg(long, env = "SEQSTAGE_S3_ACL", default_value = BUCKET_OWNER_FULL_CONTROL)]
    /// Canned ACL sent with every S3 upload. An empty value sends none.
    s3_acl: String,
}

impl StorageArgs {
    /// Opens the selected storage backend.
    ///
    /// ## Errors
    ///
    /// A local storage root which is not an existing directory, or a failure
    /// to start the storage client.
    pub(crate) fn open(self) -> std::io::Result<BucketStore> {
        BucketStore::new(self.backend()?)
    }

    fn backend(self) -> std::io::Result<StorageBackend> {
        let backend = match self.storage_root {
            Some(root) if !root.is_dir() => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("The storage root {root:#?} is not a directory"),
                ));
            }
            Some(root) => {
                info!("Using local object storage under {}", root.display());
                StorageBackend::LocalDirectory(root)
            }
            None => {
                let canned_acl = (!self.s3_acl.is_empty()).then_some(self.s3_acl);
                info!(
                    "Using Amazon S3 object storage with canned ACL {acl}",
                    acl = canned_acl.as_deref().unwrap_or("(none)")
                );
                StorageBackend::AmazonS3 { canned_acl }
            }
        };

        Ok(backend)
    }
}
