use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ErrorBody;
use crate::fingerprint::Fingerprint;
use crate::heuristics::Verdict;
use crate::ledger::abi::Address;
use crate::ledger::NotarizationRecord;
use crate::llm::ComplianceAnalysis;

/// Identifies one upload attempt of one owner.
pub type UploadId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VerificationStatus {
    Verified,
    Rejected,
    InProgress,
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Verified => "Verified",
            Self::Rejected => "Rejected",
            Self::InProgress => "InProgress",
        })
    }
}

impl FromStr for VerificationStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "verified" => Ok(Self::Verified),
            "rejected" => Ok(Self::Rejected),
            "inprogress" | "in_progress" | "in-progress" => Ok(Self::InProgress),
            other => anyhow::bail!("unknown verification status '{}'", other),
        }
    }
}

/// Outcome of heuristic and AI checks for one upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRecord {
    pub fingerprint: Fingerprint,
    pub status: VerificationStatus,
    pub verdict: Verdict,
    /// `None` when the collaborator was skipped or did not answer in time.
    pub ai_analysis: Option<ComplianceAnalysis>,
    /// Why the upload was rejected or left in progress, in the API error shape.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    pub completed_at: i64,
}

/// Cached copy of what the ledger last said about a fingerprint.
/// The ledger stays authoritative; this is refreshed on every event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSnapshot {
    pub network: String,
    pub notary: Option<Address>,
    pub notarization_time: Option<u64>,
    pub expiration_time: Option<u64>,
    pub revoked: bool,
    pub tx_hash: Option<String>,
    #[serde(default)]
    pub revocation_tx_hash: Option<String>,
    /// Set while a confirmed transaction still awaits a metadata write.
    #[serde(default)]
    pub reconciliation_pending: bool,
    pub observed_at: i64,
}

impl LedgerSnapshot {
    pub fn from_record(network: &str, record: &NotarizationRecord, tx_hash: Option<String>) -> Self {
        Self {
            network: network.to_string(),
            notary: record.exists.then_some(record.notary),
            notarization_time: record.exists.then_some(record.notarization_time),
            expiration_time: record.exists.then_some(record.expiration_time),
            revoked: record.revoked,
            tx_hash,
            revocation_tx_hash: None,
            reconciliation_pending: false,
            observed_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn is_expired_at(&self, now: u64) -> bool {
        self.expiration_time.is_some_and(|exp| now > exp)
    }

    /// Equal ledger state, ignoring when it was observed.
    pub fn same_state(&self, other: &LedgerSnapshot) -> bool {
        self.network == other.network
            && self.notary == other.notary
            && self.notarization_time == other.notarization_time
            && self.expiration_time == other.expiration_time
            && self.revoked == other.revoked
            && self.tx_hash == other.tx_hash
            && self.revocation_tx_hash == other.revocation_tx_hash
            && self.reconciliation_pending == other.reconciliation_pending
    }
}

/// Off-ledger record per (owner, upload). Never authoritative for
/// notarization truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRecord {
    pub owner: String,
    pub upload_id: UploadId,
    pub file_name: String,
    pub content_type: String,
    pub size: usize,
    pub uploaded_at: i64,
    pub fingerprint: Fingerprint,
    /// Network key the upload targets.
    pub network: String,
    pub status: VerificationStatus,
    pub verification: Option<VerificationRecord>,
    pub notarization: Option<LedgerSnapshot>,
    /// Store key of the raw content.
    pub storage_ref: String,
    pub updated_at: i64,
}

impl MetadataRecord {
    pub fn new(
        owner: &str,
        file_name: &str,
        content_type: &str,
        size: usize,
        fingerprint: Fingerprint,
        network: &str,
        storage_ref: String,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            owner: owner.to_string(),
            upload_id: uuid::Uuid::new_v4().to_string(),
            file_name: file_name.to_string(),
            content_type: content_type.to_string(),
            size,
            uploaded_at: now,
            fingerprint,
            network: network.to_string(),
            status: VerificationStatus::InProgress,
            verification: None,
            notarization: None,
            storage_ref,
            updated_at: now,
        }
    }

    pub fn matches_query(&self, query: &str) -> bool {
        let q = query.to_lowercase();
        self.file_name.to_lowercase().contains(&q) || self.fingerprint.to_hex().contains(&q)
    }
}

/// Filter for an owner's history listing.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub status: Option<VerificationStatus>,
    pub q: Option<String>,
}

impl HistoryFilter {
    pub fn accepts(&self, record: &MetadataRecord) -> bool {
        self.status.map_or(true, |s| s == record.status)
            && self
                .q
                .as_deref()
                .map(str::trim)
                .filter(|q| !q.is_empty())
                .map_or(true, |q| record.matches_query(q))
    }
}
