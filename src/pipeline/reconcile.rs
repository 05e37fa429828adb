//! Keeps off-ledger metadata in line with ledger truth.
//!
//! Two inputs feed it: contract events delivered by ledger subscriptions,
//! and a retry queue of fingerprints whose metadata write failed after a
//! confirmed transaction. Applying the same state twice changes nothing,
//! and a revoked snapshot is never reverted to active.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::docs::types::LedgerSnapshot;
use crate::docs::MetadataStore;
use crate::fingerprint::Fingerprint;
use crate::ledger::events::{EventHandler, EventKind, LedgerEvent};
use crate::ledger::network::NetworkContext;
use crate::ledger::{fold_history, LedgerClient};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingReconciliation {
    pub network: String,
    pub fingerprint: Fingerprint,
    pub tx_hash: Option<String>,
    pub attempts: u32,
    pub queued_at: i64,
}

pub struct Reconciler {
    ledger: Arc<LedgerClient>,
    store: Arc<dyn MetadataStore>,
    pending: Mutex<HashMap<(String, Fingerprint), PendingReconciliation>>,
}

impl Reconciler {
    pub fn new(ledger: Arc<LedgerClient>, store: Arc<dyn MetadataStore>) -> Self {
        Self {
            ledger,
            store,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub async fn enqueue(&self, network: &str, fingerprint: Fingerprint, tx_hash: Option<String>) {
        let mut pending = self.pending.lock().await;
        let entry = pending
            .entry((network.to_string(), fingerprint))
            .or_insert_with(|| PendingReconciliation {
                network: network.to_string(),
                fingerprint,
                tx_hash: None,
                attempts: 0,
                queued_at: chrono::Utc::now().timestamp(),
            });
        if tx_hash.is_some() {
            entry.tx_hash = tx_hash;
        }
        warn!(%fingerprint, network, "reconciliation pending");
    }

    pub async fn pending(&self) -> Vec<PendingReconciliation> {
        let mut items: Vec<_> = self.pending.lock().await.values().cloned().collect();
        items.sort_by_key(|p| p.queued_at);
        items
    }

    /// Rebuild the snapshot for `fingerprint` from the ledger's event log
    /// and write it to every record carrying it. Returns records changed.
    pub async fn reconcile(&self, ctx: &NetworkContext, fingerprint: Fingerprint) -> Result<usize> {
        let events = self.ledger.history(ctx, fingerprint).await?;
        let record = match fold_history(fingerprint, &events) {
            Some(record) => record,
            None => self.ledger.query(ctx, fingerprint).await?,
        };
        if !record.exists {
            debug!(%fingerprint, network = %ctx.key(), "nothing on ledger to reconcile");
            return Ok(0);
        }

        let notarized_tx = events
            .iter()
            .rev()
            .find(|e| e.kind == EventKind::DocumentNotarized)
            .map(|e| e.tx_hash.clone());
        let mut snapshot = LedgerSnapshot::from_record(ctx.key(), &record, notarized_tx);
        snapshot.revocation_tx_hash = events
            .iter()
            .rev()
            .find(|e| e.kind == EventKind::NotarizationRevoked)
            .map(|e| e.tx_hash.clone());

        self.apply(ctx.key(), fingerprint, |_| snapshot.clone()).await
    }

    /// Fold one contract event into the stored snapshots.
    pub async fn apply_event(&self, event: &LedgerEvent) -> Result<usize> {
        self.apply(&event.network, event.fingerprint, |current| {
            let mut next = current.cloned().unwrap_or_else(|| LedgerSnapshot {
                network: event.network.clone(),
                notary: None,
                notarization_time: None,
                expiration_time: None,
                revoked: false,
                tx_hash: None,
                revocation_tx_hash: None,
                reconciliation_pending: false,
                observed_at: 0,
            });
            match event.kind {
                EventKind::DocumentNotarized => {
                    next.notary = Some(event.account);
                    next.notarization_time = event.notarization_time;
                    next.expiration_time = event.expiration_time;
                    next.tx_hash = Some(event.tx_hash.clone());
                }
                EventKind::NotarizationRevoked => {
                    next.revoked = true;
                    next.revocation_tx_hash = Some(event.tx_hash.clone());
                }
            }
            next.reconciliation_pending = false;
            next
        })
        .await
    }

    async fn apply<F>(&self, network: &str, fingerprint: Fingerprint, build: F) -> Result<usize>
    where
        F: Fn(Option<&LedgerSnapshot>) -> LedgerSnapshot + Send + Sync,
    {
        let mut changed = 0;
        for mut record in self.store.find_by_fingerprint(fingerprint).await? {
            if record.network != network {
                continue;
            }
            let current = record.notarization.as_ref();
            let mut next = build(current);
            if current.is_some_and(|c| c.revoked) && !next.revoked {
                next.revoked = true;
                next.revocation_tx_hash = current.and_then(|c| c.revocation_tx_hash.clone());
            }
            if current.is_some_and(|c| c.same_state(&next)) {
                continue;
            }
            next.observed_at = chrono::Utc::now().timestamp();
            record.notarization = Some(next);
            record.updated_at = chrono::Utc::now().timestamp();
            self.store.put(&record).await?;
            changed += 1;
        }
        if changed > 0 {
            info!(%fingerprint, network, records = changed, "metadata reconciled with ledger");
        }
        Ok(changed)
    }

    /// Retry every queued reconciliation once. Returns how many cleared.
    pub async fn run_pending(&self) -> usize {
        let queued = self.pending().await;
        let mut cleared = 0;
        for item in queued {
            let result = match self.ledger.context(&item.network) {
                Ok(ctx) => self.reconcile(&ctx, item.fingerprint).await,
                Err(e) => Err(e.into()),
            };
            let key = (item.network.clone(), item.fingerprint);
            match result {
                Ok(_) => {
                    self.pending.lock().await.remove(&key);
                    cleared += 1;
                }
                Err(e) => {
                    if let Some(entry) = self.pending.lock().await.get_mut(&key) {
                        entry.attempts += 1;
                    }
                    warn!(fingerprint = %item.fingerprint, network = %item.network, error = %e, "reconciliation retry failed");
                }
            }
        }
        cleared
    }

    pub fn spawn_retry_loop(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let cleared = self.run_pending().await;
                if cleared > 0 {
                    info!(cleared, "pending reconciliations resolved");
                }
            }
        })
    }
}

#[async_trait]
impl EventHandler for Reconciler {
    async fn handle(&self, event: LedgerEvent) {
        debug!(kind = %event.kind, fingerprint = %event.fingerprint, tx = %event.tx_hash, "ledger event received");
        if let Err(e) = self.apply_event(&event).await {
            warn!(fingerprint = %event.fingerprint, error = %e, "could not apply ledger event");
            self.enqueue(&event.network, event.fingerprint, Some(event.tx_hash.clone())).await;
        }
    }
}
