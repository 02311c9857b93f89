use std::fmt::Display;
use std::sync::Arc;

use axum::body::Bytes;
use chrono::Duration;
use futures_util::Stream;
use tokio::fs::File;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use super::blob::BlobStore;
use super::identity::{generate_file_id, is_valid_file_id};
use super::locks::IdLocks;
use super::models::{FileDescriptor, FileRecord, FileStatus};
use super::repository::FileRepositoryTrait;
use super::validation::{resolve_content_type, FileValidationConfig, FileValidator};

#[derive(Clone)]
pub struct FileManagerConfig {
    pub max_file_size: u64,
    pub ttl: Duration,
    pub public_url: String,
    pub delete_on_download: bool,
    pub validation: FileValidationConfig,
}

impl Default for FileManagerConfig {
    fn default() -> Self {
        Self {
            max_file_size: 100 * 1024 * 1024,
            ttl: Duration::hours(1),
            public_url: "http://localhost:3000".to_string(),
            delete_on_download: false,
            validation: FileValidationConfig::default(),
        }
    }
}

impl From<&AppConfig> for FileManagerConfig {
    fn from(config: &AppConfig) -> Self {
        let validation = FileValidationConfig {
            allowed_content_types: config
                .storage
                .allowed_content_types
                .iter()
                .map(|ct| ct.trim().to_ascii_lowercase())
                .filter(|ct| !ct.is_empty())
                .collect(),
            ..FileValidationConfig::default()
        };

        Self {
            max_file_size: config.storage.max_file_size,
            ttl: config.file_ttl(),
            public_url: config.storage.public_url.clone(),
            delete_on_download: config.storage.delete_on_download,
            validation,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub partials_removed: u64,
    pub orphan_blobs_removed: u64,
    pub orphan_records_removed: u64,
}

/// Upload and retrieval engine over the blob store and the ledger.
#[derive(Clone)]
pub struct FileManager {
    config: FileManagerConfig,
    blobs: BlobStore,
    repository: Arc<dyn FileRepositoryTrait>,
    validator: FileValidator,
    locks: Arc<IdLocks>,
    clock: Arc<dyn Clock>,
}

impl FileManager {
    pub fn new(
        config: FileManagerConfig,
        blobs: BlobStore,
        repository: Arc<dyn FileRepositoryTrait>,
    ) -> Self {
        Self::with_clock(config, blobs, repository, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: FileManagerConfig,
        blobs: BlobStore,
        repository: Arc<dyn FileRepositoryTrait>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let validator = FileValidator::new(config.validation.clone());

        Self {
            config,
            blobs,
            repository,
            validator,
            locks: Arc::new(IdLocks::default()),
            clock,
        }
    }

    pub fn config(&self) -> &FileManagerConfig {
        &self.config
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    /// Prepares storage and reconciles blobs with ledger entries left
    /// inconsistent by a crash.
    pub async fn initialize(&self) -> Result<RecoveryReport> {
        self.blobs.initialize().await?;

        let mut report = RecoveryReport {
            partials_removed: self.blobs.purge_partials().await?,
            ..RecoveryReport::default()
        };

        let blob_ids = self.blobs.list_ids().await?;
        for id in &blob_ids {
            if self.repository.get(id).await?.is_some() {
                continue;
            }
            warn!("Removing blob {} with no ledger entry", id);
            match self.blobs.delete(id).await {
                Ok(()) => report.orphan_blobs_removed += 1,
                Err(e) => error!("Failed to remove orphaned blob {}: {}", id, e),
            }
        }

        for id in self.repository.list_ids().await? {
            if self.blobs.exists(&id).await {
                continue;
            }
            warn!("Removing ledger entry {} whose blob is missing", id);
            match self.repository.delete(&id).await {
                Ok(()) => report.orphan_records_removed += 1,
                Err(e) => error!("Failed to remove orphaned record {}: {}", id, e),
            }
        }

        info!(
            partials = report.partials_removed,
            orphan_blobs = report.orphan_blobs_removed,
            orphan_records = report.orphan_records_removed,
            "File storage recovered"
        );

        Ok(report)
    }

    /// Stores an upload and returns its descriptor. Nothing is left behind
    /// on failure.
    pub async fn accept<S, E>(
        &self,
        original_name: &str,
        content_type: Option<&str>,
        stream: S,
        declared_size: Option<u64>,
    ) -> Result<FileDescriptor>
    where
        S: Stream<Item = std::result::Result<Bytes, E>>,
        E: Display,
    {
        let content_type = resolve_content_type(original_name, content_type);
        let original_name = self
            .validator
            .validate_upload(original_name, &content_type)
            .map_err(|e| AppError::BadRequest(e.to_string()))?;

        if let Some(size) = declared_size {
            if size > self.config.max_file_size {
                debug!(declared = size, max = self.config.max_file_size, "Rejecting upload by declared size");
                return Err(AppError::TooLarge {
                    max_size: self.config.max_file_size,
                });
            }
        }

        let id = generate_file_id();
        let size_bytes = self
            .blobs
            .write(&id, stream, self.config.max_file_size)
            .await?;

        let created_at = self.clock.now();
        let Some(expires_at) = created_at.checked_add_signed(self.config.ttl) else {
            self.discard_blob(&id).await;
            return Err(AppError::Other(anyhow::anyhow!(
                "expiry out of range: {} + {}",
                created_at,
                self.config.ttl
            )));
        };

        let record = FileRecord {
            id: id.clone(),
            original_name,
            size_bytes,
            content_type,
            created_at,
            expires_at,
        };

        {
            let _guard = self.locks.lock(&id).await;
            if let Err(e) = self.repository.insert(&record).await {
                if matches!(e, AppError::Conflict(_)) {
                    error!("File id collision on {} - identifier entropy failure", id);
                }
                self.discard_blob(&id).await;
                return Err(e);
            }
        }

        info!(
            id = %record.id,
            name = %record.original_name,
            size = record.size_bytes,
            expires_at = %record.expires_at.to_rfc3339(),
            "File stored"
        );

        Ok(FileDescriptor::from_record(&record, &self.config.public_url))
    }

    /// Live record for `id`, without opening the blob.
    pub async fn metadata(&self, id: &str) -> Result<FileRecord> {
        if !is_valid_file_id(id) {
            return Err(AppError::NotFound("File not found".to_string()));
        }
        self.live_record(id).await
    }

    /// Opens a live file for streaming.
    pub async fn fetch(&self, id: &str) -> Result<(FileRecord, File)> {
        if !is_valid_file_id(id) {
            return Err(AppError::NotFound("File not found".to_string()));
        }

        let _guard = self.locks.lock(id).await;
        let record = self.live_record(id).await?;

        let (file, len) = match self.blobs.read(id).await {
            Ok(opened) => opened,
            Err(AppError::NotFound(_)) => {
                error!("Ledger entry {} is live but its blob is missing", id);
                return Err(AppError::NotFound("File not found".to_string()));
            }
            Err(e) => return Err(e),
        };

        if len != record.size_bytes {
            error!(
                "Blob {} has {} bytes but ledger recorded {}",
                id, len, record.size_bytes
            );
            return Err(AppError::Storage(format!("Blob {} is corrupt", id)));
        }

        if self.config.delete_on_download {
            self.purge_locked(id).await?;
            info!("File {} deleted after first download", id);
        }

        Ok((record, file))
    }

    /// Lifecycle state of `id`. A live entry whose blob is already gone is
    /// mid-purge and counts as deleted.
    pub async fn status(&self, id: &str) -> Result<FileStatus> {
        if !is_valid_file_id(id) {
            return Ok(FileStatus::Deleted);
        }

        match self.repository.get(id).await? {
            None => Ok(FileStatus::Deleted),
            Some(record) if record.is_expired_at(self.clock.now()) => Ok(FileStatus::Expired),
            Some(_) if self.blobs.exists(id).await => Ok(FileStatus::Active),
            Some(_) => Ok(FileStatus::Deleted),
        }
    }

    pub async fn expired_records(&self) -> Result<Vec<FileRecord>> {
        self.repository.list_expired(self.clock.now()).await
    }

    /// Removes blob then ledger entry under the id lock. Already-missing
    /// parts count as removed.
    pub async fn purge(&self, id: &str) -> Result<()> {
        let _guard = self.locks.lock(id).await;
        self.purge_locked(id).await
    }

    pub async fn count(&self) -> Result<u64> {
        self.repository.count().await
    }

    async fn purge_locked(&self, id: &str) -> Result<()> {
        match self.blobs.delete(id).await {
            Ok(()) => {}
            Err(AppError::NotFound(_)) => debug!("Blob {} already removed", id),
            Err(e) => return Err(e),
        }

        match self.repository.delete(id).await {
            Ok(()) => {}
            Err(AppError::NotFound(_)) => debug!("Ledger entry {} already removed", id),
            Err(e) => return Err(e),
        }

        Ok(())
    }

    /// Rolls back a blob written by a failed `accept`.
    async fn discard_blob(&self, id: &str) {
        if let Err(e) = self.blobs.delete(id).await {
            error!("Failed to roll back blob {}: {}", id, e);
        }
    }

    async fn live_record(&self, id: &str) -> Result<FileRecord> {
        let record = match self.repository.get(id).await? {
            Some(record) => record,
            None => return Err(AppError::NotFound("File not found".to_string())),
        };

        if record.is_expired_at(self.clock.now()) {
            return Err(AppError::Gone("File has expired".to_string()));
        }

        Ok(record)
    }
}
