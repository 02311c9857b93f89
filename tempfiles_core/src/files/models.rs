use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ledger entry for one stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub original_name: String,
    pub size_bytes: u64,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> chrono::Duration {
        (self.expires_at - now).max(chrono::Duration::zero())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Active,
    Expired,
    Deleted,
}

/// What an uploader gets back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub id: String,
    pub original_name: String,
    pub size_bytes: u64,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub download_url: String,
}

impl FileDescriptor {
    pub fn from_record(record: &FileRecord, public_url: &str) -> Self {
        Self {
            id: record.id.clone(),
            original_name: record.original_name.clone(),
            size_bytes: record.size_bytes,
            content_type: record.content_type.clone(),
            created_at: record.created_at,
            expires_at: record.expires_at,
            download_url: format!("{}/{}", public_url.trim_end_matches('/'), record.id),
        }
    }
}
