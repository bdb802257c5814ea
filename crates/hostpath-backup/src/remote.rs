//! Archive copies in an object store.
//!

use core::num::TryFromIntError;
use std::{io, path::Path, sync::Arc};

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use object_store::{
    ObjectMeta, ObjectStore, aws::AmazonS3Builder, buffered::BufWriter, path::Path as ObjectPath,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::warn;

use crate::{config::RemoteCredentials, context::Context};

/// An object listed from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    /// The object key.
    pub key: String,

    /// The object size in bytes.
    pub size: u64,

    /// When the object was last modified.
    pub last_modified: DateTime<Utc>,
}

impl TryFrom<ObjectMeta> for RemoteObject {
    type Error = TryFromIntError;

    fn try_from(meta: ObjectMeta) -> Result<Self, Self::Error> {
        Ok(Self {
            key: meta.location.to_string(),
            size: u64::try_from(meta.size)?,
            last_modified: meta.last_modified,
        })
    }
}

/// A bucket holding archive copies, keyed by archive file name.
pub struct RemoteStore {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl RemoteStore {
    /// Create a remote store over an object store.
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    /// Create a remote store for an S3 compatible bucket.
    pub fn from_credentials(credentials: &RemoteCredentials) -> Result<Self, RemoteError> {
        let store = AmazonS3Builder::new()
            .with_endpoint(credentials.endpoint())
            .with_region("auto")
            .with_bucket_name(&credentials.bucket)
            .with_access_key_id(&credentials.access_key_id)
            .with_secret_access_key(&credentials.secret_access_key)
            .build()?;

        Ok(Self::new(Arc::new(store), &credentials.bucket))
    }

    /// The bucket name.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Stream a local file to `key`. Returns the bytes uploaded.
    pub async fn upload(
        &self,
        context: &Context,
        path: &Path,
        key: &str,
    ) -> Result<u64, RemoteError> {
        context.detail(format_args!(
            "Uploading {} -> {}/{key}",
            path.display(),
            self.bucket
        ));

        let mut file = File::open(path)
            .await
            .map_err(|e| RemoteError::Io(e, "open archive"))?;
        let mut writer = BufWriter::new(Arc::clone(&self.store), ObjectPath::from(key));

        let bytes = match tokio::io::copy(&mut file, &mut writer).await {
            Ok(bytes) => bytes,
            Err(e) => {
                // Drops any multipart upload already started.
                if let Err(abort_error) = writer.abort().await {
                    warn!("{context}Failed to abort upload of {key}: {abort_error}");
                }
                return Err(RemoteError::Io(e, "upload archive"));
            }
        };
        writer
            .shutdown()
            .await
            .map_err(|e| RemoteError::Io(e, "complete upload"))?;

        context.detail(format_args!("Uploaded {key} ({bytes} bytes)"));
        Ok(bytes)
    }

    /// Stream the object at `key` to a local file. Returns the bytes downloaded.
    pub async fn download(
        &self,
        context: &Context,
        key: &str,
        destination: &Path,
    ) -> Result<u64, RemoteError> {
        context.detail(format_args!(
            "Downloading {}/{key} -> {}",
            self.bucket,
            destination.display()
        ));

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| RemoteError::Io(e, "create download directory"))?;
        }

        let object = self.store.get(&ObjectPath::from(key)).await?;
        let mut stream = object.into_stream();

        let mut file = File::create(destination)
            .await
            .map_err(|e| RemoteError::Io(e, "create download file"))?;
        let mut bytes = 0;
        while let Some(chunk) = stream.try_next().await? {
            file.write_all(&chunk)
                .await
                .map_err(|e| RemoteError::Io(e, "write download file"))?;
            bytes += u64::try_from(chunk.len())?;
        }
        file.flush()
            .await
            .map_err(|e| RemoteError::Io(e, "flush download file"))?;

        context.detail(format_args!("Downloaded {key} ({bytes} bytes)"));
        Ok(bytes)
    }

    /// Every object whose key starts with `prefix`, newest first.
    pub async fn list_by_prefix(
        &self,
        context: &Context,
        prefix: &str,
    ) -> Result<Vec<RemoteObject>, RemoteError> {
        context.detail(format_args!(
            "Listing objects with prefix '{prefix}' in {}",
            self.bucket
        ));

        // Store listings are by path segment, narrow to the prefix's directory then by string.
        let directory = prefix
            .rsplit_once('/')
            .map(|(directory, _)| ObjectPath::from(directory));

        let metas: Vec<ObjectMeta> = self.store.list(directory.as_ref()).try_collect().await?;

        let mut objects = metas
            .into_iter()
            .filter(|meta| meta.location.as_ref().starts_with(prefix))
            .map(RemoteObject::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        objects.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));

        context.detail(format_args!(
            "Found {} objects with prefix '{prefix}'",
            objects.len()
        ));
        Ok(objects)
    }

    /// Delete the object at `key`.
    pub async fn delete(&self, context: &Context, key: &str) -> Result<(), RemoteError> {
        context.detail(format_args!("Deleting {}/{key}", self.bucket));
        self.store.delete(&ObjectPath::from(key)).await?;
        Ok(())
    }

    /// Keep the newest `keep_last` objects under `prefix` and delete the rest.
    ///
    /// Returns the deleted keys. A `keep_last` of zero keeps everything. A failed deletion stops
    /// the rotation, the keys deleted before it are part of the error.
    pub async fn rotate(
        &self,
        context: &Context,
        prefix: &str,
        keep_last: usize,
    ) -> Result<Vec<String>, RotateError> {
        if keep_last == 0 {
            return Ok(Vec::new());
        }

        let objects = self
            .list_by_prefix(context, prefix)
            .await
            .map_err(|source| RotateError {
                deleted: Vec::new(),
                source,
            })?;

        if objects.len() <= keep_last {
            return Ok(Vec::new());
        }

        let mut deleted = Vec::new();
        for object in objects.into_iter().skip(keep_last) {
            if let Err(source) = self.delete(context, &object.key).await {
                return Err(RotateError { deleted, source });
            }
            deleted.push(object.key);
        }

        context.detail(format_args!(
            "Rotated prefix '{prefix}': kept {keep_last}, deleted {}",
            deleted.len()
        ));
        Ok(deleted)
    }
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Object store request failed:\n{0}")]
    Store(#[from] object_store::Error),

    #[error("Failed to {1}: {0}")]
    Io(#[source] io::Error, &'static str),

    #[error("Object was larger than u64::MAX: {0}")]
    TooLarge(#[from] TryFromIntError),
}

/// A rotation that stopped part way.
#[derive(Debug, Error)]
#[error("Rotation stopped after deleting {} objects:\n{source}", .deleted.len())]
pub struct RotateError {
    /// The keys deleted before the failure.
    pub deleted: Vec<String>,

    /// The failure.
    #[source]
    pub source: RemoteError,
}
