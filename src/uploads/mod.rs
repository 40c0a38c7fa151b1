//! Upload registration.
//!
//! Stores metadata for an uploaded project archive at `upload:{id}` (expiring
//! with the upload TTL), indexes it in `uploads_index`, and queues an analysis
//! job for the analyzer agent. Receiving and storing the bytes themselves is
//! the caller's concern.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::agents::ANALYZER_AGENT;
use crate::error::{ForgeError, Result};
use crate::index::{score_of, IndexKind, IndexManager};
use crate::results::sanitize_filename;
use crate::scheduler::{Job, JobQueue};
use crate::store::{keys, Store};

/// Largest accepted archive.
pub const MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

/// An upload to register.
#[derive(Debug, Clone)]
pub struct NewUpload {
    pub filename: String,
    pub size: u64,
    /// Where the caller stored the bytes.
    pub file_path: Option<String>,
    pub project: Option<String>,
}

/// Stored upload metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadRecord {
    pub upload_id: Uuid,
    /// Sanitized filename.
    pub filename: String,
    pub original_filename: String,
    pub size: u64,
    #[serde(default)]
    pub file_path: Option<String>,
    /// Analysis job queued for this upload.
    pub job_id: Uuid,
    pub project: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Registers and lists uploads.
#[derive(Clone)]
pub struct UploadRegistry {
    store: Arc<dyn Store>,
    index: IndexManager,
    queue: JobQueue,
    ttl: Duration,
}

impl UploadRegistry {
    pub fn new(store: Arc<dyn Store>, index: IndexManager, queue: JobQueue, ttl: Duration) -> Self {
        Self {
            store,
            index,
            queue,
            ttl,
        }
    }

    /// Registers an upload and queues its analysis.
    ///
    /// # Errors
    ///
    /// - `ForgeError::InvalidInput` if the file is not a `.zip` or is too large
    /// - `ForgeError::Store` if the job or the record cannot be written
    pub async fn register(&self, upload: NewUpload) -> Result<UploadRecord> {
        if !upload.filename.to_lowercase().ends_with(".zip") {
            return Err(ForgeError::InvalidInput(
                "only ZIP archives are accepted".to_string(),
            ));
        }
        if upload.size > MAX_UPLOAD_BYTES {
            return Err(ForgeError::InvalidInput(format!(
                "file too large (max {} MB)",
                MAX_UPLOAD_BYTES / (1024 * 1024)
            )));
        }

        let project = upload
            .project
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| "unknown".to_string());

        let job = Job::new(format!("Analyze uploaded archive: {}", upload.filename))
            .with_agent(ANALYZER_AGENT)
            .with_metadata(serde_json::json!({
                "project": project,
                "file_path": upload.file_path,
            }));
        self.queue.enqueue(&job).await?;

        let record = UploadRecord {
            upload_id: Uuid::new_v4(),
            filename: sanitize_filename(&upload.filename),
            original_filename: upload.filename,
            size: upload.size,
            file_path: upload.file_path,
            job_id: job.id,
            project,
            uploaded_at: Utc::now(),
        };

        let raw = serde_json::to_string(&record)?;
        self.store
            .set(&keys::upload_key(record.upload_id), &raw, Some(self.ttl))
            .await?;
        self.index
            .index_or_report(
                IndexKind::Uploads,
                &record.upload_id.to_string(),
                score_of(record.uploaded_at),
            )
            .await;

        info!(
            upload_id = %record.upload_id,
            job_id = %record.job_id,
            filename = %record.filename,
            "Upload registered"
        );
        Ok(record)
    }

    pub async fn get(&self, upload_id: Uuid) -> Result<Option<UploadRecord>> {
        match self.store.get(&keys::upload_key(upload_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Newest-first page of live uploads.
    pub async fn list(&self, offset: u64, limit: u64) -> Result<Vec<UploadRecord>> {
        let ids = self.index.list(IndexKind::Uploads, offset, limit).await?;
        let record_keys: Vec<String> = ids.iter().map(keys::upload_key).collect();
        let raws = self.store.get_many(&record_keys).await?;

        let mut uploads = Vec::with_capacity(raws.len());
        for raw in raws.into_iter().flatten() {
            uploads.push(serde_json::from_str(&raw)?);
        }
        Ok(uploads)
    }
}
