use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use super::abi::{self, Address};
use super::error::LedgerError;
use crate::fingerprint::Fingerprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    DocumentNotarized,
    NotarizationRevoked,
}

impl EventKind {
    pub fn signature(&self) -> &'static str {
        match self {
            EventKind::DocumentNotarized => abi::DOCUMENT_NOTARIZED_EVENT,
            EventKind::NotarizationRevoked => abi::NOTARIZATION_REVOKED_EVENT,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EventKind::DocumentNotarized => "DocumentNotarized",
            EventKind::NotarizationRevoked => "NotarizationRevoked",
        }
    }

    pub fn topic(&self) -> String {
        abi::event_topic(self.signature())
    }

    pub fn from_topic(topic: &str) -> Option<Self> {
        [EventKind::DocumentNotarized, EventKind::NotarizationRevoked]
            .into_iter()
            .find(|kind| kind.topic().eq_ignore_ascii_case(topic))
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded contract log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEvent {
    pub kind: EventKind,
    pub network: String,
    pub fingerprint: Fingerprint,
    /// Notary for `DocumentNotarized`, revoker for `NotarizationRevoked`.
    pub account: Address,
    pub notarization_time: Option<u64>,
    pub expiration_time: Option<u64>,
    pub tx_hash: String,
    pub log_index: u64,
    pub block_number: u64,
}

impl LedgerEvent {
    /// Identity of a single delivery; re-delivered logs share it.
    pub fn delivery_key(&self) -> (String, u64) {
        (self.tx_hash.to_ascii_lowercase(), self.log_index)
    }

    pub fn from_log(network: &str, log: &Value) -> Result<Self, LedgerError> {
        let topics: Vec<&str> = log["topics"]
            .as_array()
            .ok_or_else(|| LedgerError::Decode("log without topics".into()))?
            .iter()
            .filter_map(Value::as_str)
            .collect();
        if topics.len() < 3 {
            return Err(LedgerError::Decode(format!("expected 3 topics, got {}", topics.len())));
        }
        let kind = EventKind::from_topic(topics[0])
            .ok_or_else(|| LedgerError::Decode(format!("unknown event topic {}", topics[0])))?;
        let fingerprint = Fingerprint::from_bytes(abi::parse_word(topics[1])?);
        let account = Address::from_word(&abi::parse_word(topics[2])?);

        let data = abi::from_hex(log["data"].as_str().unwrap_or("0x"))?;
        let (notarization_time, expiration_time) = match kind {
            EventKind::DocumentNotarized => (
                Some(abi::decode_uint(&abi::word_at(&data, 0)?)?),
                Some(abi::decode_uint(&abi::word_at(&data, 1)?)?),
            ),
            EventKind::NotarizationRevoked => (None, None),
        };

        Ok(Self {
            kind,
            network: network.to_string(),
            fingerprint,
            account,
            notarization_time,
            expiration_time,
            tx_hash: log["transactionHash"].as_str().unwrap_or_default().to_string(),
            log_index: abi::parse_quantity(&log["logIndex"])?,
            block_number: abi::parse_quantity(&log["blockNumber"])?,
        })
    }
}

/// Receives ledger events on the subscription's own task. Handlers must
/// tolerate re-delivery of the same event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: LedgerEvent);
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct SubscriptionKey {
    pub network: String,
    pub kind: EventKind,
    pub listener: String,
}

pub(crate) type Registry = Arc<Mutex<HashMap<SubscriptionKey, u64>>>;

/// Live event subscription. Dropping the handle or calling
/// [`SubscriptionHandle::unsubscribe`] stops the polling task and frees the
/// listener slot so the same listener can register again.
pub struct SubscriptionHandle {
    id: u64,
    key: SubscriptionKey,
    registry: Registry,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    pub(crate) fn new(
        id: u64,
        key: SubscriptionKey,
        registry: Registry,
        shutdown: oneshot::Sender<()>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            id,
            key,
            registry,
            shutdown: Some(shutdown),
            task: Some(task),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> EventKind {
        self.key.kind
    }

    /// Stop delivery and wait for the polling task to exit.
    pub async fn unsubscribe(mut self) {
        self.release();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    fn release(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Ok(mut registry) = self.registry.lock() {
            if registry.get(&self.key) == Some(&self.id) {
                registry.remove(&self.key);
            }
        }
        debug!(id = self.id, kind = %self.key.kind, network = %self.key.network, "subscription released");
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.release();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
