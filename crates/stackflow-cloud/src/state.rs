//! Deployment record persistence
//!
//! Manages `.stackflow/deployment.env`, a flat `KEY=value` record of the
//! identifiers created by a provisioning run. The file is diff-friendly and
//! meant to be editable by hand when an operator has to recover.
//!
//! ```text
//! # stackflow deployment record, created 2023-11-14T22:13:20Z
//! AWS_REGION=us-east-1
//! TIMESTAMP=1700000000
//! S3_BUCKET=portfolio-app-1700000000
//! ```

use crate::error::{CloudError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;

const STATE_FILE: &str = "deployment.env";
const LOCK_FILE: &str = "lock.json";
const HEADER_PREFIX: &str = "# stackflow deployment record, created";

/// Keys of the deployment record, in file order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RecordKey {
    Region,
    Timestamp,
    Bucket,
    Role,
    RolePolicy,
    InstanceProfile,
    WebSecurityGroup,
    DbSecurityGroup,
    DbSubnetGroup,
    DbInstance,
    DbEndpoint,
    Instance,
    PublicIp,
}

impl RecordKey {
    pub const ALL: [RecordKey; 13] = [
        RecordKey::Region,
        RecordKey::Timestamp,
        RecordKey::Bucket,
        RecordKey::Role,
        RecordKey::RolePolicy,
        RecordKey::InstanceProfile,
        RecordKey::WebSecurityGroup,
        RecordKey::DbSecurityGroup,
        RecordKey::DbSubnetGroup,
        RecordKey::DbInstance,
        RecordKey::DbEndpoint,
        RecordKey::Instance,
        RecordKey::PublicIp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKey::Region => "AWS_REGION",
            RecordKey::Timestamp => "TIMESTAMP",
            RecordKey::Bucket => "S3_BUCKET",
            RecordKey::Role => "IAM_ROLE",
            RecordKey::RolePolicy => "IAM_POLICY",
            RecordKey::InstanceProfile => "INSTANCE_PROFILE",
            RecordKey::WebSecurityGroup => "WEB_SG_ID",
            RecordKey::DbSecurityGroup => "DB_SG_ID",
            RecordKey::DbSubnetGroup => "DB_SUBNET_GROUP",
            RecordKey::DbInstance => "DB_INSTANCE_ID",
            RecordKey::DbEndpoint => "DB_ENDPOINT",
            RecordKey::Instance => "EC2_INSTANCE_ID",
            RecordKey::PublicIp => "PUBLIC_IP",
        }
    }

    pub fn parse(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == key)
    }
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifiers of the resources a provisioning run created
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentRecord {
    /// When the record was started, taken from the header line
    pub created_at: Option<DateTime<Utc>>,
    values: BTreeMap<RecordKey, String>,
}

impl DeploymentRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: RecordKey) -> Option<&str> {
        self.values.get(&key).map(String::as_str)
    }

    pub fn contains(&self, key: RecordKey) -> bool {
        self.values.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (RecordKey, &str)> {
        self.values.iter().map(|(k, v)| (*k, v.as_str()))
    }

    /// Set a key. Returns `true` if the record changed.
    ///
    /// A key is write-once: the identical value is accepted again, a different
    /// one is rejected.
    pub fn insert(&mut self, key: RecordKey, value: impl Into<String>) -> Result<bool> {
        let value = value.into();
        if value.is_empty() || value.contains(['\n', '\r']) {
            return Err(CloudError::StateError(format!(
                "invalid value for {}: {:?}",
                key, value
            )));
        }

        match self.values.get(&key) {
            Some(existing) if *existing == value => Ok(false),
            Some(existing) => Err(CloudError::RecordConflict {
                key: key.to_string(),
                existing: existing.clone(),
                new: value,
            }),
            None => {
                self.values.insert(key, value);
                Ok(true)
            }
        }
    }

    /// Parse the `KEY=value` file format. Unknown keys are skipped.
    pub fn parse(content: &str) -> Self {
        let mut record = Self::new();

        for line in content.lines() {
            let line = line.trim_end_matches('\r');

            if let Some(header) = line.strip_prefix(HEADER_PREFIX) {
                record.created_at = DateTime::parse_from_rfc3339(header.trim())
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc));
                continue;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let Some((key, value)) = trimmed.split_once('=') else {
                tracing::warn!("Ignoring malformed record line: {}", trimmed);
                continue;
            };

            match RecordKey::parse(key.trim()) {
                Some(k) => {
                    // Hand edits win over nothing; last occurrence wins
                    record.values.insert(k, value.trim().to_string());
                }
                None => tracing::warn!("Ignoring unknown record key: {}", key.trim()),
            }
        }

        record
    }

    /// Render in canonical key order
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(created_at) = self.created_at {
            out.push_str(&format!(
                "{} {}\n",
                HEADER_PREFIX,
                created_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
            ));
        }
        for (key, value) in &self.values {
            out.push_str(&format!("{}={}\n", key, value));
        }
        out
    }
}

/// Reads and writes the deployment record
pub struct StateStore {
    /// Directory holding the record and the lock
    state_dir: PathBuf,
}

impl StateStore {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            state_dir: state_dir.as_ref().to_path_buf(),
        }
    }

    /// Path of the active record
    pub fn record_path(&self) -> PathBuf {
        self.state_dir.join(STATE_FILE)
    }

    /// Path the record is moved to when teardown finishes
    pub fn backup_path(&self, timestamp: u64) -> PathBuf {
        self.state_dir
            .join(format!("{}.{}.backup", STATE_FILE, timestamp))
    }

    fn lock_path(&self) -> PathBuf {
        self.state_dir.join(LOCK_FILE)
    }

    async fn ensure_state_dir(&self) -> Result<()> {
        if !self.state_dir.exists() {
            fs::create_dir_all(&self.state_dir).await?;
            tracing::debug!("Created state directory: {}", self.state_dir.display());
        }
        Ok(())
    }

    pub fn exists(&self) -> bool {
        self.record_path().exists()
    }

    /// Load the current record
    pub async fn load(&self) -> Result<DeploymentRecord> {
        let path = self.record_path();
        if !path.exists() {
            return Err(CloudError::StateStoreMissing(path));
        }

        let content = fs::read_to_string(&path).await?;
        let record = DeploymentRecord::parse(&content);

        tracing::debug!("Loaded deployment record with {} keys", record.len());
        Ok(record)
    }

    /// Start a fresh record for a provisioning run
    pub async fn begin(&self, region: &str, timestamp: u64) -> Result<DeploymentRecord> {
        if self.exists() {
            return Err(CloudError::RecordExists(self.record_path()));
        }

        let created_at = DateTime::<Utc>::from_timestamp(timestamp as i64, 0).ok_or_else(|| {
            CloudError::StateError(format!("timestamp {} is out of range", timestamp))
        })?;

        let mut record = DeploymentRecord {
            created_at: Some(created_at),
            ..Default::default()
        };
        record.insert(RecordKey::Region, region)?;
        record.insert(RecordKey::Timestamp, timestamp.to_string())?;

        self.write(&record).await?;
        tracing::info!("Started deployment record at {}", self.record_path().display());
        Ok(record)
    }

    /// Persist one key right away
    ///
    /// Re-reads the file so that the on-disk record stays the single source,
    /// then rewrites it atomically.
    pub async fn save(&self, key: RecordKey, value: &str) -> Result<DeploymentRecord> {
        let mut record = match self.load().await {
            Ok(record) => record,
            Err(CloudError::StateStoreMissing(_)) => DeploymentRecord::new(),
            Err(e) => return Err(e),
        };

        if record.insert(key, value)? {
            self.write(&record).await?;
            tracing::debug!("Recorded {}={}", key, value);
        }

        Ok(record)
    }

    async fn write(&self, record: &DeploymentRecord) -> Result<()> {
        self.ensure_state_dir().await?;

        let path = self.record_path();
        let tmp = path.with_extension("env.tmp");
        fs::write(&tmp, record.render()).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Keep a timestamped copy of the record, then remove the active one
    pub async fn finalize(&self, timestamp: u64) -> Result<PathBuf> {
        let path = self.record_path();
        if !path.exists() {
            return Err(CloudError::StateStoreMissing(path));
        }

        let backup = self.backup_path(timestamp);
        fs::copy(&path, &backup).await?;
        fs::remove_file(&path).await?;

        tracing::info!("Deployment record backed up to {}", backup.display());
        Ok(backup)
    }

    /// Acquire an advisory lock so only one run touches the record
    pub async fn acquire_lock(&self, holder: &str) -> Result<StateLock> {
        self.ensure_state_dir().await?;

        let lock_path = self.lock_path();

        if lock_path.exists() {
            let content = fs::read_to_string(&lock_path).await?;
            let lock_info: LockInfo = serde_json::from_str(&content)?;

            // Check if lock is stale (older than 1 hour)
            let age = Utc::now().signed_duration_since(lock_info.acquired_at);
            if age.num_hours() < 1 {
                return Err(CloudError::LockError(format!(
                    "State is locked by {} since {}",
                    lock_info.holder, lock_info.acquired_at
                )));
            }

            tracing::warn!("Removing stale lock from {}", lock_info.holder);
        }

        let lock_info = LockInfo {
            holder: holder.to_string(),
            acquired_at: Utc::now(),
        };

        let content = serde_json::to_string_pretty(&lock_info)?;
        fs::write(&lock_path, content).await?;

        tracing::debug!("Acquired state lock");
        Ok(StateLock {
            lock_path,
            released: false,
        })
    }
}

/// Lock information
#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    acquired_at: DateTime<Utc>,
}

/// RAII guard for state lock
pub struct StateLock {
    lock_path: PathBuf,
    released: bool,
}

impl StateLock {
    /// Release the lock
    pub async fn release(mut self) -> Result<()> {
        if !self.released {
            if self.lock_path.exists() {
                fs::remove_file(&self.lock_path).await?;
                tracing::debug!("Released state lock");
            }
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if !self.released && self.lock_path.exists() {
            // Synchronous cleanup in drop - not ideal but necessary
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_record_round_trip() {
        let temp_dir = tempdir().unwrap();
        let store = StateStore::new(temp_dir.path());

        store.begin("us-east-1", 1700000000).await.unwrap();
        let values = [
            (RecordKey::Bucket, "portfolio-app-1700000000"),
            (RecordKey::Role, "portfolio-app-ec2-role"),
            (RecordKey::RolePolicy, "portfolio-app-s3-access"),
            (RecordKey::InstanceProfile, "portfolio-app-ec2-profile"),
            (RecordKey::WebSecurityGroup, "sg-0123"),
            (RecordKey::DbSecurityGroup, "sg-0456"),
            (RecordKey::DbSubnetGroup, "portfolio-app-db-subnets"),
            (RecordKey::DbInstance, "portfolio-app-db-1700000000"),
            (RecordKey::DbEndpoint, "db.example.internal"),
            (RecordKey::Instance, "i-0abc"),
            (RecordKey::PublicIp, "203.0.113.10"),
        ];
        for (key, value) in values {
            store.save(key, value).await.unwrap();
        }

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.len(), RecordKey::ALL.len());
        assert_eq!(loaded.get(RecordKey::Region), Some("us-east-1"));
        assert_eq!(loaded.get(RecordKey::Timestamp), Some("1700000000"));
        for (key, value) in values {
            assert_eq!(loaded.get(key), Some(value), "{}", key);
        }
        assert_eq!(
            loaded.created_at,
            DateTime::<Utc>::from_timestamp(1700000000, 0)
        );
    }

    #[tokio::test]
    async fn test_file_format() {
        let temp_dir = tempdir().unwrap();
        let store = StateStore::new(temp_dir.path());

        store.begin("us-east-1", 1700000000).await.unwrap();
        store
            .save(RecordKey::Bucket, "portfolio-app-1700000000")
            .await
            .unwrap();

        let content = std::fs::read_to_string(store.record_path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert!(lines[0].starts_with("# "));
        assert!(lines[0].contains("2023-11-14T22:13:20Z"));
        assert_eq!(
            &lines[1..],
            &[
                "AWS_REGION=us-east-1",
                "TIMESTAMP=1700000000",
                "S3_BUCKET=portfolio-app-1700000000"
            ]
        );
    }

    #[tokio::test]
    async fn test_save_is_write_once() {
        let temp_dir = tempdir().unwrap();
        let store = StateStore::new(temp_dir.path());

        store.save(RecordKey::Bucket, "bucket-a").await.unwrap();
        // Identical value is a no-op
        store.save(RecordKey::Bucket, "bucket-a").await.unwrap();

        let result = store.save(RecordKey::Bucket, "bucket-b").await;
        assert!(matches!(result, Err(CloudError::RecordConflict { .. })));

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.get(RecordKey::Bucket), Some("bucket-a"));
    }

    #[tokio::test]
    async fn test_begin_refuses_existing_record() {
        let temp_dir = tempdir().unwrap();
        let store = StateStore::new(temp_dir.path());

        store.begin("us-east-1", 1700000000).await.unwrap();
        let result = store.begin("us-east-1", 1700000100).await;
        assert!(matches!(result, Err(CloudError::RecordExists(_))));
    }

    #[tokio::test]
    async fn test_load_missing() {
        let temp_dir = tempdir().unwrap();
        let store = StateStore::new(temp_dir.path());

        assert!(!store.exists());
        assert!(matches!(
            store.load().await,
            Err(CloudError::StateStoreMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_finalize_leaves_backup() {
        let temp_dir = tempdir().unwrap();
        let store = StateStore::new(temp_dir.path());

        store.begin("us-east-1", 1700000000).await.unwrap();
        let backup = store.finalize(1700003600).await.unwrap();

        assert!(!store.exists());
        assert!(backup.ends_with("deployment.env.1700003600.backup"));
        let content = std::fs::read_to_string(&backup).unwrap();
        assert!(content.contains("TIMESTAMP=1700000000"));
    }

    #[test]
    fn test_parse_tolerates_hand_edits() {
        let content = "\
# stackflow deployment record, created 2023-11-14T22:13:20Z
# operator note: db removed manually
AWS_REGION = us-east-1
UNKNOWN_KEY=whatever
not a key value line
S3_BUCKET=portfolio-app-1700000000
";
        let record = DeploymentRecord::parse(content);
        assert_eq!(record.len(), 2);
        assert_eq!(record.get(RecordKey::Region), Some("us-east-1"));
        assert!(record.created_at.is_some());
    }

    #[test]
    fn test_insert_rejects_multiline_values() {
        let mut record = DeploymentRecord::new();
        assert!(record.insert(RecordKey::Bucket, "a\nS3_BUCKET=b").is_err());
        assert!(record.insert(RecordKey::Bucket, "").is_err());
    }

    #[tokio::test]
    async fn test_lock_blocks_second_holder() {
        let temp_dir = tempdir().unwrap();
        let store = StateStore::new(temp_dir.path());

        let lock = store.acquire_lock("first").await.unwrap();
        assert!(matches!(
            store.acquire_lock("second").await,
            Err(CloudError::LockError(_))
        ));

        lock.release().await.unwrap();
        let again = store.acquire_lock("second").await;
        assert!(again.is_ok());
    }
}
