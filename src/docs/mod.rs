pub mod extract;
pub mod types;

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use cnidarium::{StateDelta, StateRead, StateWrite, Storage};
use futures::StreamExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::fingerprint::Fingerprint;
use types::{HistoryFilter, MetadataRecord};

// Key prefixes (no trailing slashes, cnidarium convention)
const CONTENT_PREFIX: &str = "doc/content";
const META_PREFIX: &str = "doc/meta";
const FINGERPRINT_PREFIX: &str = "doc/fingerprint";

// Owners are caller-supplied strings, so they are hex-encoded to keep
// '/' and ':' out of key segments.
fn owner_segment(owner: &str) -> String {
    hex::encode(owner.as_bytes())
}
fn content_key(fingerprint: &Fingerprint) -> String {
    format!("{}/{}", CONTENT_PREFIX, fingerprint.to_hex())
}
fn meta_key(owner: &str, upload_id: &str) -> String {
    format!("{}/{}/{}", META_PREFIX, owner_segment(owner), upload_id)
}
fn fingerprint_key(fingerprint: &Fingerprint, owner: &str, upload_id: &str) -> String {
    format!(
        "{}/{}:{}/{}",
        FINGERPRINT_PREFIX,
        fingerprint.to_hex(),
        owner_segment(owner),
        upload_id
    )
}

/// Persistence for uploaded content and per-upload metadata.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Store raw content under its fingerprint. Returns the storage reference.
    async fn put_content(&self, fingerprint: Fingerprint, content: &[u8]) -> Result<String>;
    /// Insert or replace a record.
    async fn put(&self, record: &MetadataRecord) -> Result<()>;
    async fn get(&self, owner: &str, upload_id: &str) -> Result<Option<MetadataRecord>>;
    /// An owner's records, newest first.
    async fn list_by_owner(&self, owner: &str, filter: &HistoryFilter) -> Result<Vec<MetadataRecord>>;
    /// Every record (any owner) carrying this fingerprint.
    async fn find_by_fingerprint(&self, fingerprint: Fingerprint) -> Result<Vec<MetadataRecord>>;
}

pub struct DocumentStore {
    storage: Storage,
    /// Concurrent deltas forked from the same snapshot would conflict.
    write_lock: Mutex<()>,
}

impl DocumentStore {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data dir {}", data_dir.display()))?;
        let prefixes = vec![
            CONTENT_PREFIX.to_string(),
            META_PREFIX.to_string(),
            FINGERPRINT_PREFIX.to_string(),
        ];
        let storage = Storage::load(data_dir.to_path_buf(), prefixes)
            .await
            .context("Failed to init cnidarium storage")?;
        Ok(Self {
            storage,
            write_lock: Mutex::new(()),
        })
    }

    async fn records_under(&self, prefix: &str) -> Result<Vec<MetadataRecord>> {
        let snapshot = self.storage.latest_snapshot();
        let mut stream = snapshot.prefix_raw(prefix);
        let mut results = Vec::new();

        while let Some(entry) = stream.next().await {
            match entry {
                Ok((key, value)) => match serde_json::from_slice::<MetadataRecord>(&value) {
                    Ok(record) => results.push(record),
                    Err(e) => warn!(key = %key, error = %e, "skipping unreadable metadata record"),
                },
                Err(e) => {
                    warn!("Error reading metadata stream: {}", e);
                }
            }
        }
        Ok(results)
    }
}

#[async_trait]
impl MetadataStore for DocumentStore {
    async fn put_content(&self, fingerprint: Fingerprint, content: &[u8]) -> Result<String> {
        let key = content_key(&fingerprint);
        let _guard = self.write_lock.lock().await;
        let snapshot = self.storage.latest_snapshot();
        // Content-addressed: identical bytes are already stored.
        if snapshot.get_raw(&key).await?.is_none() {
            let mut delta = StateDelta::new(snapshot);
            delta.put_raw(key.clone(), content.to_vec());
            self.storage.commit(delta).await.context("commit content")?;
            debug!(%fingerprint, size = content.len(), "document content stored");
        }
        Ok(key)
    }

    async fn put(&self, record: &MetadataRecord) -> Result<()> {
        let bytes = serde_json::to_vec(record).context("serialize metadata record")?;
        let _guard = self.write_lock.lock().await;
        let snapshot = self.storage.latest_snapshot();
        let mut delta = StateDelta::new(snapshot);
        delta.put_raw(meta_key(&record.owner, &record.upload_id), bytes);
        // Index entry (empty value; presence is the index)
        delta.put_raw(
            fingerprint_key(&record.fingerprint, &record.owner, &record.upload_id),
            vec![],
        );
        self.storage.commit(delta).await.context("commit metadata record")?;
        debug!(
            owner = %record.owner,
            upload_id = %record.upload_id,
            status = %record.status,
            "metadata record stored"
        );
        Ok(())
    }

    async fn get(&self, owner: &str, upload_id: &str) -> Result<Option<MetadataRecord>> {
        let snapshot = self.storage.latest_snapshot();
        let Some(bytes) = snapshot.get_raw(&meta_key(owner, upload_id)).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&bytes).context("decode metadata record")?))
    }

    async fn list_by_owner(&self, owner: &str, filter: &HistoryFilter) -> Result<Vec<MetadataRecord>> {
        let prefix = format!("{}/{}/", META_PREFIX, owner_segment(owner));
        let mut results: Vec<MetadataRecord> = self
            .records_under(&prefix)
            .await?
            .into_iter()
            .filter(|r| filter.accepts(r))
            .collect();
        results.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(results)
    }

    async fn find_by_fingerprint(&self, fingerprint: Fingerprint) -> Result<Vec<MetadataRecord>> {
        let snapshot = self.storage.latest_snapshot();
        let prefix = format!("{}/{}:", FINGERPRINT_PREFIX, fingerprint.to_hex());
        let mut stream = snapshot.prefix_raw(&prefix);
        let mut locations = Vec::new();

        while let Some(entry) = stream.next().await {
            match entry {
                Ok((key, _)) => {
                    // Key format: "doc/fingerprint/{fp}:{owner_hex}/{upload_id}"
                    if let Some((owner_hex, upload_id)) =
                        key.strip_prefix(&prefix).and_then(|rest| rest.split_once('/'))
                    {
                        locations.push(format!("{}/{}/{}", META_PREFIX, owner_hex, upload_id));
                    }
                }
                Err(e) => {
                    warn!("Error reading fingerprint index: {}", e);
                }
            }
        }

        let mut results = Vec::with_capacity(locations.len());
        for key in locations {
            match snapshot.get_raw(&key).await? {
                Some(bytes) => results.push(serde_json::from_slice(&bytes).context("decode metadata record")?),
                None => warn!(key = %key, "fingerprint index points at a missing record"),
            }
        }
        Ok(results)
    }
}
