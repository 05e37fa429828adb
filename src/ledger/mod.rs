pub mod abi;
pub mod error;
pub mod events;
#[cfg(test)]
pub mod mock;
pub mod network;
pub mod provider;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::fingerprint::Fingerprint;
use abi::Address;
use events::{EventHandler, EventKind, LedgerEvent, Registry, SubscriptionHandle, SubscriptionKey};
use network::{ChainId, NetworkContext, NetworkTable};
use provider::{HttpProvider, ProviderError, RpcProvider};

pub use error::LedgerError;

pub const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Fixed gas ceiling for contract writes.
pub const DEFAULT_GAS_LIMIT: u64 = 6_000_000;

#[derive(Debug, Clone)]
pub struct LedgerSettings {
    pub gas_limit: u64,
    pub connect_timeout: Duration,
    pub confirmation_timeout: Duration,
    pub receipt_poll_interval: Duration,
    pub event_poll_interval: Duration,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            gas_limit: DEFAULT_GAS_LIMIT,
            connect_timeout: Duration::from_secs(60),
            confirmation_timeout: Duration::from_secs(120),
            receipt_poll_interval: Duration::from_secs(1),
            event_poll_interval: Duration::from_secs(4),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    pub tx_hash: String,
    pub block_number: u64,
    pub gas_used: u64,
    pub success: bool,
}

/// Ledger-resident notarization state for one fingerprint, plus the
/// read-time `is_expired` flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotarizationRecord {
    pub fingerprint: Fingerprint,
    pub notary: Address,
    pub notarization_time: u64,
    pub expiration_time: u64,
    pub exists: bool,
    pub revoked: bool,
    pub is_expired: bool,
}

impl NotarizationRecord {
    pub fn is_expired_at(&self, now: u64) -> bool {
        self.exists && now > self.expiration_time
    }

    /// Exists and not revoked. Expiry does not free the fingerprint.
    pub fn is_active(&self) -> bool {
        self.exists && !self.revoked
    }

    pub fn is_validly_notarized(&self) -> bool {
        self.is_active() && !self.is_expired
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NetworkSwitch {
    AlreadyActive,
    Switched,
    AddedAndSwitched,
}

type ConnectFuture = Shared<BoxFuture<'static, Result<Address, LedgerError>>>;

pub fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

pub struct LedgerClient {
    networks: NetworkTable,
    wallet: Option<Arc<dyn RpcProvider>>,
    readers: HashMap<String, Arc<dyn RpcProvider>>,
    settings: LedgerSettings,
    /// Single in-flight wallet connection shared by concurrent callers.
    connecting: Mutex<Option<ConnectFuture>>,
    account: RwLock<Option<Address>>,
    subscriptions: Registry,
    next_subscription: AtomicU64,
}

impl LedgerClient {
    pub fn new(
        networks: NetworkTable,
        wallet: Option<Arc<dyn RpcProvider>>,
        readers: HashMap<String, Arc<dyn RpcProvider>>,
        settings: LedgerSettings,
    ) -> Self {
        Self {
            networks,
            wallet,
            readers,
            settings,
            connecting: Mutex::new(None),
            account: RwLock::new(None),
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            next_subscription: AtomicU64::new(1),
        }
    }

    /// One HTTP reader per network rpcUrl, and an optional HTTP wallet.
    pub fn over_http(
        networks: NetworkTable,
        wallet_url: Option<&str>,
        settings: LedgerSettings,
    ) -> anyhow::Result<Self> {
        let mut readers: HashMap<String, Arc<dyn RpcProvider>> = HashMap::new();
        for descriptor in networks.descriptors() {
            readers.insert(descriptor.key.clone(), Arc::new(HttpProvider::new(&descriptor.rpc_url)?));
        }
        let wallet = match wallet_url {
            Some(url) => Some(Arc::new(HttpProvider::new(url)?) as Arc<dyn RpcProvider>),
            None => None,
        };
        Ok(Self::new(networks, wallet, readers, settings))
    }

    pub fn networks(&self) -> &NetworkTable {
        &self.networks
    }

    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    /// Build the explicit call context for a network key.
    pub fn context(&self, key: &str) -> Result<NetworkContext, LedgerError> {
        let descriptor = self.networks.get(key)?;
        let reader = self
            .readers
            .get(key)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownNetwork(key.to_string()))?;
        Ok(NetworkContext { descriptor, reader })
    }

    fn wallet(&self) -> Result<&Arc<dyn RpcProvider>, LedgerError> {
        self.wallet.as_ref().ok_or(LedgerError::WalletUnavailable)
    }

    pub fn cached_account(&self) -> Option<Address> {
        self.account.read().ok().and_then(|a| *a)
    }

    /// Request account access from the wallet. Concurrent callers join the
    /// attempt already in flight instead of prompting again.
    pub async fn connect(&self) -> Result<Address, LedgerError> {
        let wallet = self.wallet()?.clone();
        let pending = {
            let mut slot = self
                .connecting
                .lock()
                .map_err(|_| LedgerError::chain("connection slot poisoned"))?;
            match slot.as_ref() {
                Some(in_flight) => {
                    debug!("joining in-flight wallet connection");
                    in_flight.clone()
                }
                None => {
                    let attempt = request_accounts(wallet, self.settings.connect_timeout)
                        .boxed()
                        .shared();
                    *slot = Some(attempt.clone());
                    attempt
                }
            }
        };

        let result = pending.await;

        if let Ok(mut slot) = self.connecting.lock() {
            if slot.as_ref().is_some_and(|f| f.peek().is_some()) {
                *slot = None;
            }
        }

        if let Ok(address) = &result {
            if let Ok(mut cached) = self.account.write() {
                if cached.is_some_and(|previous| previous != *address) {
                    info!(account = %address, "wallet account changed");
                }
                *cached = Some(*address);
            }
        }
        result
    }

    /// The account transactions are sent from. Re-reads `eth_accounts` so an
    /// account switched in the wallet since the last connect is picked up.
    async fn active_account(&self) -> Result<Address, LedgerError> {
        let Some(cached) = self.cached_account() else {
            return self.connect().await;
        };
        let current = self
            .wallet()?
            .request("eth_accounts", json!([]))
            .await
            .ok()
            .and_then(|v| v.as_array()?.first()?.as_str().map(str::to_string))
            .and_then(|s| Address::parse(&s).ok());

        match current {
            Some(address) if address == cached => Ok(cached),
            Some(address) => {
                info!(previous = %cached, account = %address, "wallet account changed");
                if let Ok(mut slot) = self.account.write() {
                    *slot = Some(address);
                }
                Ok(address)
            }
            None => {
                info!(previous = %cached, "wallet reports no accounts, reconnecting");
                if let Ok(mut slot) = self.account.write() {
                    *slot = None;
                }
                self.connect().await
            }
        }
    }

    /// Make the wallet's chain match the context's network, adding the
    /// chain to the wallet first if it does not know it.
    pub async fn ensure_network(&self, ctx: &NetworkContext) -> Result<NetworkSwitch, LedgerError> {
        let wallet = self.wallet()?;
        let target = &ctx.descriptor;
        let failed = |reason: String| LedgerError::NetworkSwitchFailed {
            network: target.key.clone(),
            reason,
        };

        let raw = wallet
            .request("eth_chainId", json!([]))
            .await
            .map_err(|e| failed(e.message))?;
        let current = ChainId::parse(raw.as_str().unwrap_or_default()).map_err(|e| failed(e.to_string()))?;
        if current == target.chain_id {
            debug!(network = %target.key, chain_id = %current, "wallet already on target network");
            return Ok(NetworkSwitch::AlreadyActive);
        }

        let switch_params = json!([{ "chainId": target.chain_id.to_hex() }]);
        match wallet.request("wallet_switchEthereumChain", switch_params.clone()).await {
            Ok(_) => {
                info!(network = %target.key, from = %current, to = %target.chain_id, "switched wallet network");
                Ok(NetworkSwitch::Switched)
            }
            Err(e) if e.code == ProviderError::UNRECOGNIZED_CHAIN => {
                info!(network = %target.key, "wallet does not know network, adding it");
                wallet
                    .request("wallet_addEthereumChain", target.add_chain_params())
                    .await
                    .map_err(|e| failed(format!("add chain: {}", e.message)))?;
                wallet
                    .request("wallet_switchEthereumChain", switch_params)
                    .await
                    .map_err(|e| failed(format!("switch after add: {}", e.message)))?;
                Ok(NetworkSwitch::AddedAndSwitched)
            }
            Err(e) if e.code == ProviderError::USER_REJECTED => {
                Err(failed("user rejected the network switch".into()))
            }
            Err(e) => Err(failed(e.message)),
        }
    }

    /// Anchor a fingerprint and wait for the receipt.
    pub async fn notarize(
        &self,
        ctx: &NetworkContext,
        fingerprint: Fingerprint,
        expiration_days: u32,
    ) -> Result<TxReceipt, LedgerError> {
        let tx_hash = self.submit_notarization(ctx, fingerprint, expiration_days).await?;
        let receipt = self.wait_for_receipt(ctx, &tx_hash).await?;
        if receipt.success {
            info!(%fingerprint, tx = %receipt.tx_hash, block = receipt.block_number, "document notarized");
            return Ok(receipt);
        }

        // Reverted. The existence check is not atomic, so a concurrent
        // submission for the same document may have landed first.
        let record = self.query(ctx, fingerprint).await?;
        if record.is_active() {
            warn!(%fingerprint, tx = %tx_hash, "lost notarization race; record already on ledger");
            return Err(LedgerError::AlreadyNotarized(fingerprint));
        }
        Err(LedgerError::Chain {
            message: "notarization transaction reverted".into(),
            tx_hash: Some(tx_hash),
        })
    }

    /// Broadcast a notarization without waiting for it. Returns the tx hash.
    pub async fn submit_notarization(
        &self,
        ctx: &NetworkContext,
        fingerprint: Fingerprint,
        expiration_days: u32,
    ) -> Result<String, LedgerError> {
        if expiration_days == 0 {
            return Err(LedgerError::InvalidArgument("expiration must be at least one day".into()));
        }
        let expiration_seconds = u64::from(expiration_days) * SECONDS_PER_DAY;

        let existing = self.query(ctx, fingerprint).await?;
        if existing.is_active() {
            info!(%fingerprint, network = %ctx.key(), "already notarized, not submitting");
            return Err(LedgerError::AlreadyNotarized(fingerprint));
        }

        let from = self.active_account().await?;
        self.ensure_network(ctx).await?;
        let data = abi::encode_call(
            abi::NOTARIZE_DOCUMENT,
            &[*fingerprint.as_bytes(), abi::uint_word(expiration_seconds)],
        );
        let tx_hash = self.send_transaction(ctx, from, data).await?;
        info!(%fingerprint, tx = %tx_hash, expiration_days, "notarization submitted");
        Ok(tx_hash)
    }

    /// Revoke an active notarization. Revocation is permanent.
    pub async fn revoke(&self, ctx: &NetworkContext, fingerprint: Fingerprint) -> Result<TxReceipt, LedgerError> {
        let record = self.query(ctx, fingerprint).await?;
        if !record.is_active() {
            return Err(LedgerError::NotNotarized(fingerprint));
        }

        let from = self.active_account().await?;
        self.ensure_network(ctx).await?;
        let data = abi::encode_call(abi::REVOKE_NOTARIZATION, &[*fingerprint.as_bytes()]);
        let tx_hash = self.send_transaction(ctx, from, data).await?;
        let receipt = self.wait_for_receipt(ctx, &tx_hash).await?;
        if !receipt.success {
            return Err(LedgerError::Chain {
                message: "revocation transaction reverted".into(),
                tx_hash: Some(tx_hash),
            });
        }
        info!(%fingerprint, tx = %receipt.tx_hash, "notarization revoked");
        Ok(receipt)
    }

    /// Poll for a receipt. Dropping the returned future abandons the wait;
    /// the transaction itself stays broadcast.
    pub async fn wait_for_receipt(&self, ctx: &NetworkContext, tx_hash: &str) -> Result<TxReceipt, LedgerError> {
        let poll = async {
            loop {
                let raw = ctx
                    .reader
                    .request("eth_getTransactionReceipt", json!([tx_hash]))
                    .await
                    .map_err(|e| LedgerError::Chain {
                        message: e.message,
                        tx_hash: Some(tx_hash.to_string()),
                    })?;
                if !raw.is_null() {
                    return parse_receipt(tx_hash, &raw);
                }
                tokio::time::sleep(self.settings.receipt_poll_interval).await;
            }
        };
        tokio::time::timeout(self.settings.confirmation_timeout, poll)
            .await
            .map_err(|_| LedgerError::ConfirmationTimeout {
                tx_hash: tx_hash.to_string(),
            })?
    }

    pub async fn query(&self, ctx: &NetworkContext, fingerprint: Fingerprint) -> Result<NotarizationRecord, LedgerError> {
        let data = self
            .call(ctx, abi::encode_call(abi::DOCUMENTS, &[*fingerprint.as_bytes()]))
            .await?;
        let mut record = NotarizationRecord {
            fingerprint,
            notary: Address::from_word(&abi::word_at(&data, 0)?),
            notarization_time: abi::decode_uint(&abi::word_at(&data, 1)?)?,
            expiration_time: abi::decode_uint(&abi::word_at(&data, 2)?)?,
            exists: abi::decode_bool(&abi::word_at(&data, 3)?)?,
            revoked: abi::decode_bool(&abi::word_at(&data, 4)?)?,
            is_expired: false,
        };
        record.is_expired = record.is_expired_at(unix_now());
        Ok(record)
    }

    pub async fn is_document_notarized(&self, ctx: &NetworkContext, fingerprint: Fingerprint) -> Result<bool, LedgerError> {
        let data = self
            .call(ctx, abi::encode_call(abi::IS_DOCUMENT_NOTARIZED, &[*fingerprint.as_bytes()]))
            .await?;
        abi::decode_bool(&abi::word_at(&data, 0)?)
    }

    pub async fn is_document_expired(&self, ctx: &NetworkContext, fingerprint: Fingerprint) -> Result<bool, LedgerError> {
        let data = self
            .call(ctx, abi::encode_call(abi::IS_DOCUMENT_EXPIRED, &[*fingerprint.as_bytes()]))
            .await?;
        abi::decode_bool(&abi::word_at(&data, 0)?)
    }

    pub async fn search_by_notary(&self, ctx: &NetworkContext, notary: &str) -> Result<Vec<Fingerprint>, LedgerError> {
        let address = Address::parse(notary)?;
        let data = self
            .call(ctx, abi::encode_call(abi::SEARCH_DOCUMENTS_BY_NOTARY, &[address.to_word()]))
            .await?;
        let hashes = abi::decode_word_array(&data)?;
        debug!(notary = %address, count = hashes.len(), "documents found for notary");
        Ok(hashes.into_iter().map(Fingerprint::from_bytes).collect())
    }

    /// Every notarization and revocation event ever logged for a fingerprint,
    /// in chain order.
    pub async fn history(&self, ctx: &NetworkContext, fingerprint: Fingerprint) -> Result<Vec<LedgerEvent>, LedgerError> {
        let topics = json!([
            [EventKind::DocumentNotarized.topic(), EventKind::NotarizationRevoked.topic()],
            abi::to_hex(fingerprint.as_bytes()),
        ]);
        let mut events = fetch_logs(ctx, topics, "0x0".into(), "latest".into()).await?;
        events.sort_by_key(|e| (e.block_number, e.log_index));
        Ok(events)
    }

    /// Register a listener for one event kind on one network. A listener
    /// name may hold only one live subscription per network and kind.
    pub async fn subscribe(
        &self,
        ctx: &NetworkContext,
        kind: EventKind,
        listener: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionHandle, LedgerError> {
        let key = SubscriptionKey {
            network: ctx.key().to_string(),
            kind,
            listener: listener.to_string(),
        };
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        {
            let mut registry = self
                .subscriptions
                .lock()
                .map_err(|_| LedgerError::chain("subscription registry poisoned"))?;
            if registry.contains_key(&key) {
                return Err(LedgerError::DuplicateSubscription {
                    network: key.network,
                    kind: kind.name(),
                    listener: key.listener,
                });
            }
            registry.insert(key.clone(), id);
        }

        // With the node unreachable there is no head to start from, so the
        // poller scans from genesis once it answers. Handlers are idempotent.
        let start = match block_number(ctx).await {
            Ok(head) => head + 1,
            Err(e) => {
                warn!(network = %ctx.key(), %kind, error = %e, "node unreachable; events will be replayed from genesis");
                0
            }
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(poll_events(
            ctx.clone(),
            kind,
            handler,
            start,
            self.settings.event_poll_interval,
            shutdown_rx,
        ));
        info!(id, %kind, network = %ctx.key(), listener, from_block = start, "subscribed to ledger events");
        Ok(SubscriptionHandle::new(id, key, self.subscriptions.clone(), shutdown_tx, task))
    }

    async fn call(&self, ctx: &NetworkContext, data: String) -> Result<Vec<u8>, LedgerError> {
        let params = json!([{ "to": ctx.descriptor.contract_address, "data": data }, "latest"]);
        let result = ctx
            .reader
            .request("eth_call", params)
            .await
            .map_err(|e| LedgerError::chain(format!("eth_call failed: {}", e.message)))?;
        let hex = result
            .as_str()
            .ok_or_else(|| LedgerError::Decode(format!("eth_call returned {result}")))?;
        abi::from_hex(hex)
    }

    async fn send_transaction(&self, ctx: &NetworkContext, from: Address, data: String) -> Result<String, LedgerError> {
        let wallet = self.wallet()?;
        let tx = json!([{
            "from": from.to_checksum(),
            "to": ctx.descriptor.contract_address,
            "data": data,
            "gas": abi::quantity(self.settings.gas_limit),
            "chainId": ctx.descriptor.chain_id.to_hex(),
        }]);
        let result = wallet.request("eth_sendTransaction", tx).await.map_err(|e| {
            if e.code == ProviderError::USER_REJECTED {
                LedgerError::TransactionRejected
            } else {
                LedgerError::chain(e.message)
            }
        })?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| LedgerError::Decode(format!("eth_sendTransaction returned {result}")))
    }
}

async fn request_accounts(wallet: Arc<dyn RpcProvider>, timeout: Duration) -> Result<Address, LedgerError> {
    let response = tokio::time::timeout(timeout, wallet.request("eth_requestAccounts", json!([])))
        .await
        .map_err(|_| LedgerError::Timeout {
            operation: "wallet connect",
        })?
        .map_err(|e| match e.code {
            ProviderError::USER_REJECTED => LedgerError::ConnectionRejected,
            ProviderError::REQUEST_PENDING => LedgerError::ConnectionInProgress,
            _ => LedgerError::chain(format!("failed to connect to the wallet: {}", e.message)),
        })?;
    let first = response
        .as_array()
        .and_then(|accounts| accounts.first())
        .and_then(Value::as_str)
        .ok_or(LedgerError::NoAccounts)?;
    let address = Address::parse(first)?;
    info!(account = %address, "wallet connected");
    Ok(address)
}

fn parse_receipt(tx_hash: &str, raw: &Value) -> Result<TxReceipt, LedgerError> {
    Ok(TxReceipt {
        tx_hash: raw["transactionHash"].as_str().unwrap_or(tx_hash).to_string(),
        block_number: abi::parse_quantity(&raw["blockNumber"])?,
        gas_used: abi::parse_quantity(&raw["gasUsed"]).unwrap_or_default(),
        success: abi::parse_quantity(&raw["status"])? == 1,
    })
}

async fn block_number(ctx: &NetworkContext) -> Result<u64, LedgerError> {
    let raw = ctx
        .reader
        .request("eth_blockNumber", json!([]))
        .await
        .map_err(|e| LedgerError::chain(e.message))?;
    abi::parse_quantity(&raw)
}

async fn fetch_logs(ctx: &NetworkContext, topics: Value, from: String, to: String) -> Result<Vec<LedgerEvent>, LedgerError> {
    let filter = json!([{
        "address": ctx.descriptor.contract_address,
        "fromBlock": from,
        "toBlock": to,
        "topics": topics,
    }]);
    let raw = ctx
        .reader
        .request("eth_getLogs", filter)
        .await
        .map_err(|e| LedgerError::chain(format!("eth_getLogs failed: {}", e.message)))?;
    let logs = raw
        .as_array()
        .ok_or_else(|| LedgerError::Decode(format!("eth_getLogs returned {raw}")))?;

    let mut events = Vec::with_capacity(logs.len());
    for log in logs {
        match LedgerEvent::from_log(ctx.key(), log) {
            Ok(event) => events.push(event),
            Err(e) => warn!(error = %e, "skipping undecodable log"),
        }
    }
    Ok(events)
}

/// Deliveries remembered for this many blocks behind the cursor.
const DEDUP_WINDOW_BLOCKS: u64 = 64;

async fn poll_events(
    ctx: NetworkContext,
    kind: EventKind,
    handler: Arc<dyn EventHandler>,
    start: u64,
    interval: Duration,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut next_block = start;
    let mut delivered: HashMap<(String, u64), u64> = HashMap::new();
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {}
        }

        let head = match block_number(&ctx).await {
            Ok(head) => head,
            Err(e) => {
                warn!(network = %ctx.key(), %kind, error = %e, "event poll: block number unavailable");
                continue;
            }
        };
        if head < next_block {
            continue;
        }

        let topics = json!([kind.topic()]);
        match fetch_logs(&ctx, topics, abi::quantity(next_block), abi::quantity(head)).await {
            Ok(events) => {
                for event in events {
                    if delivered.insert(event.delivery_key(), event.block_number).is_some() {
                        debug!(tx = %event.tx_hash, log_index = event.log_index, "duplicate delivery skipped");
                        continue;
                    }
                    handler.handle(event).await;
                }
                next_block = head + 1;
                delivered.retain(|_, block| *block + DEDUP_WINDOW_BLOCKS >= next_block);
            }
            Err(e) => warn!(network = %ctx.key(), %kind, error = %e, "event poll failed"),
        }
    }
    debug!(network = %ctx.key(), %kind, "event polling stopped");
}

/// Collapse a fingerprint's event log into its current notarization state.
/// Revocation is absorbing: a later notarized event never clears it.
pub fn fold_history(fingerprint: Fingerprint, events: &[LedgerEvent]) -> Option<NotarizationRecord> {
    let mut record: Option<NotarizationRecord> = None;
    let mut seen = HashSet::new();
    for event in events {
        if event.fingerprint != fingerprint || !seen.insert(event.delivery_key()) {
            continue;
        }
        match event.kind {
            EventKind::DocumentNotarized => {
                let revoked = record.as_ref().is_some_and(|r| r.revoked);
                record = Some(NotarizationRecord {
                    fingerprint,
                    notary: event.account,
                    notarization_time: event.notarization_time.unwrap_or_default(),
                    expiration_time: event.expiration_time.unwrap_or_default(),
                    exists: true,
                    revoked,
                    is_expired: false,
                });
            }
            EventKind::NotarizationRevoked => {
                if let Some(r) = record.as_mut() {
                    r.revoked = true;
                }
            }
        }
    }
    if let Some(r) = record.as_mut() {
        r.is_expired = r.is_expired_at(unix_now());
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::mock::MockLedger;
    use tokio::sync::mpsc;

    fn deed() -> Fingerprint {
        Fingerprint::of(b"QUITCLAIM DEED between the parties")
    }

    struct Collect(mpsc::UnboundedSender<LedgerEvent>);

    #[async_trait::async_trait]
    impl EventHandler for Collect {
        async fn handle(&self, event: LedgerEvent) {
            let _ = self.0.send(event);
        }
    }

    #[test]
    fn expiration_boundary() {
        let t = 1_700_000_000;
        let d = 30 * SECONDS_PER_DAY;
        let record = NotarizationRecord {
            fingerprint: deed(),
            notary: Address::from_word(&[0u8; 32]),
            notarization_time: t,
            expiration_time: t + d,
            exists: true,
            revoked: false,
            is_expired: false,
        };
        assert!(!record.is_expired_at(t + d - 1));
        assert!(record.is_expired_at(t + d + 1));
    }

    #[tokio::test]
    async fn notarize_query_revoke_cycle() {
        let mock = MockLedger::new();
        let client = mock.client();
        let ctx = client.context("ganache1").unwrap();

        let receipt = client.notarize(&ctx, deed(), 30).await.unwrap();
        assert!(receipt.success);

        let record = client.query(&ctx, deed()).await.unwrap();
        assert!(record.exists && !record.revoked && !record.is_expired);
        assert_eq!(record.expiration_time - record.notarization_time, 30 * SECONDS_PER_DAY);
        assert_eq!(record.notary, mock.account());
        assert!(client.is_document_notarized(&ctx, deed()).await.unwrap());

        client.revoke(&ctx, deed()).await.unwrap();
        let record = client.query(&ctx, deed()).await.unwrap();
        assert!(record.exists);
        assert!(record.revoked);
        assert!(!record.is_validly_notarized());
    }

    #[tokio::test]
    async fn existing_record_short_circuits_without_transaction() {
        let mock = MockLedger::new();
        let client = mock.client();
        let ctx = client.context("ganache1").unwrap();
        client.notarize(&ctx, deed(), 10).await.unwrap();
        let sent = mock.count("eth_sendTransaction");

        let err = client.notarize(&ctx, deed(), 10).await.unwrap_err();
        assert_eq!(err, LedgerError::AlreadyNotarized(deed()));
        assert_eq!(mock.count("eth_sendTransaction"), sent);
    }

    #[tokio::test]
    async fn losing_race_reports_already_notarized() {
        let mock = MockLedger::new();
        let client = mock.client();
        let ctx = client.context("ganache1").unwrap();

        // Another notary lands the same document between our existence
        // check and our transaction, so ours reverts.
        let rival = Address::parse("0x00000000000000000000000000000000000000aa").unwrap();
        mock.front_run_with(rival);
        let err = client.notarize(&ctx, deed(), 5).await.unwrap_err();
        assert_eq!(err, LedgerError::AlreadyNotarized(deed()));
        assert_eq!(client.query(&ctx, deed()).await.unwrap().notary, rival);
    }

    #[tokio::test]
    async fn revoke_requires_active_record() {
        let mock = MockLedger::new();
        let client = mock.client();
        let ctx = client.context("ganache1").unwrap();
        assert_eq!(
            client.revoke(&ctx, deed()).await.unwrap_err(),
            LedgerError::NotNotarized(deed())
        );
        client.notarize(&ctx, deed(), 1).await.unwrap();
        client.revoke(&ctx, deed()).await.unwrap();
        assert_eq!(
            client.revoke(&ctx, deed()).await.unwrap_err(),
            LedgerError::NotNotarized(deed())
        );
    }

    #[tokio::test]
    async fn revoked_fingerprint_stays_revoked() {
        let mock = MockLedger::new();
        let client = mock.client();
        let ctx = client.context("ganache1").unwrap();
        client.notarize(&ctx, deed(), 1).await.unwrap();
        client.revoke(&ctx, deed()).await.unwrap();

        // A fresh notarization attempt is refused by the contract.
        let err = client.notarize(&ctx, deed(), 1).await.unwrap_err();
        assert!(matches!(err, LedgerError::Chain { tx_hash: Some(_), .. }), "{err:?}");
        assert!(client.query(&ctx, deed()).await.unwrap().revoked);
    }

    #[tokio::test]
    async fn user_declining_transaction_is_reported() {
        let mock = MockLedger::new();
        let client = mock.client();
        let ctx = client.context("ganache1").unwrap();
        mock.reject_transactions(true);
        assert_eq!(
            client.notarize(&ctx, deed(), 1).await.unwrap_err(),
            LedgerError::TransactionRejected
        );
    }

    #[tokio::test]
    async fn zero_day_expiration_is_invalid() {
        let mock = MockLedger::new();
        let client = mock.client();
        let ctx = client.context("ganache1").unwrap();
        assert!(matches!(
            client.notarize(&ctx, deed(), 0).await.unwrap_err(),
            LedgerError::InvalidArgument(_)
        ));
    }

    #[tokio::test]
    async fn active_network_needs_no_switch() {
        let mock = MockLedger::new();
        let client = mock.client();
        let ctx = client.context("ganache1").unwrap();
        assert_eq!(client.ensure_network(&ctx).await.unwrap(), NetworkSwitch::AlreadyActive);
        assert_eq!(mock.count("wallet_switchEthereumChain"), 0);
        assert_eq!(mock.count("wallet_addEthereumChain"), 0);
    }

    #[tokio::test]
    async fn known_network_switches_once() {
        let mock = MockLedger::new();
        let client = mock.client();
        let ctx = client.context("ganache2").unwrap();
        assert_eq!(client.ensure_network(&ctx).await.unwrap(), NetworkSwitch::Switched);
        assert_eq!(mock.count("wallet_switchEthereumChain"), 1);
        assert_eq!(mock.count("wallet_addEthereumChain"), 0);
    }

    #[tokio::test]
    async fn unknown_network_is_added_then_switched() {
        let mock = MockLedger::new();
        let client = mock.client();
        let ctx = client.context("ganache3").unwrap();
        assert_eq!(client.ensure_network(&ctx).await.unwrap(), NetworkSwitch::AddedAndSwitched);
        assert_eq!(mock.count("wallet_addEthereumChain"), 1);
        // failed attempt + retry after adding
        assert_eq!(mock.count("wallet_switchEthereumChain"), 2);
        assert_eq!(client.ensure_network(&ctx).await.unwrap(), NetworkSwitch::AlreadyActive);
    }

    #[tokio::test]
    async fn rejected_switch_is_surfaced() {
        let mock = MockLedger::new();
        mock.reject_switches(true);
        let client = mock.client();
        let ctx = client.context("ganache2").unwrap();
        assert!(matches!(
            client.ensure_network(&ctx).await.unwrap_err(),
            LedgerError::NetworkSwitchFailed { .. }
        ));
    }

    #[tokio::test]
    async fn concurrent_connects_share_one_prompt() {
        let mock = MockLedger::new();
        mock.connect_delay(Duration::from_millis(50));
        let client = Arc::new(mock.client());

        let attempts: Vec<_> = (0..5)
            .map(|_| {
                let client = client.clone();
                tokio::spawn(async move { client.connect().await })
            })
            .collect();
        for attempt in attempts {
            assert_eq!(attempt.await.unwrap().unwrap(), mock.account());
        }
        assert_eq!(mock.count("eth_requestAccounts"), 1);

        // The slot is cleared once settled, so a later connect prompts again.
        client.connect().await.unwrap();
        assert_eq!(mock.count("eth_requestAccounts"), 2);
    }

    #[tokio::test]
    async fn connect_failures_map_to_taxonomy() {
        let mock = MockLedger::new();
        mock.reject_connect(true);
        let client = mock.client();
        assert_eq!(client.connect().await.unwrap_err(), LedgerError::ConnectionRejected);

        let no_wallet = LedgerClient::new(NetworkTable::builtin(), None, HashMap::new(), LedgerSettings::default());
        assert_eq!(no_wallet.connect().await.unwrap_err(), LedgerError::WalletUnavailable);
    }

    #[tokio::test]
    async fn account_switch_in_wallet_is_followed() {
        let mock = MockLedger::new();
        let client = mock.client();
        let ctx = client.context("ganache1").unwrap();
        client.notarize(&ctx, deed(), 1).await.unwrap();

        let second = Address::parse("0xffcf8fdee72ac11b5c542428b35eef5769c409f0").unwrap();
        mock.switch_account(second);
        let other = Fingerprint::of(b"power of attorney");
        client.notarize(&ctx, other, 1).await.unwrap();
        assert_eq!(client.query(&ctx, other).await.unwrap().notary, second);
        assert_eq!(client.cached_account(), Some(second));
        assert_eq!(mock.count("eth_requestAccounts"), 1);
    }

    #[tokio::test]
    async fn search_by_notary_validates_and_lists() {
        let mock = MockLedger::new();
        let client = mock.client();
        let ctx = client.context("ganache1").unwrap();
        let other = Fingerprint::of(b"affidavit of residence");
        client.notarize(&ctx, deed(), 3).await.unwrap();
        client.notarize(&ctx, other, 3).await.unwrap();

        let found = client
            .search_by_notary(&ctx, &mock.account().to_checksum())
            .await
            .unwrap();
        assert_eq!(found, vec![deed(), other]);
        assert!(matches!(
            client.search_by_notary(&ctx, "0xnot-an-address").await.unwrap_err(),
            LedgerError::InvalidAddress(_)
        ));
    }

    #[tokio::test]
    async fn networks_are_isolated_by_context() {
        let mock = MockLedger::new();
        let client = mock.client();
        let one = client.context("ganache1").unwrap();
        let two = client.context("ganache2").unwrap();
        client.notarize(&one, deed(), 2).await.unwrap();
        assert!(client.query(&one, deed()).await.unwrap().exists);
        assert!(!client.query(&two, deed()).await.unwrap().exists);
        assert!(matches!(client.context("mainnet"), Err(LedgerError::UnknownNetwork(_))));
    }

    #[tokio::test]
    async fn expired_flag_follows_contract_clock() {
        let mock = MockLedger::new();
        let client = mock.client();
        let ctx = client.context("ganache1").unwrap();
        client.notarize(&ctx, deed(), 1).await.unwrap();
        let record = client.query(&ctx, deed()).await.unwrap();

        mock.set_now(record.expiration_time - 1);
        assert!(!client.is_document_expired(&ctx, deed()).await.unwrap());
        mock.set_now(record.expiration_time + 1);
        assert!(client.is_document_expired(&ctx, deed()).await.unwrap());
    }

    #[tokio::test]
    async fn subscription_delivers_and_unsubscribes() {
        let mock = MockLedger::new();
        let client = mock.client();
        let ctx = client.context("ganache1").unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = client
            .subscribe(&ctx, EventKind::DocumentNotarized, "test", Arc::new(Collect(tx.clone())))
            .await
            .unwrap();

        let dup = client
            .subscribe(&ctx, EventKind::DocumentNotarized, "test", Arc::new(Collect(tx.clone())))
            .await;
        assert!(matches!(dup, Err(LedgerError::DuplicateSubscription { .. })));

        client.notarize(&ctx, deed(), 7).await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, EventKind::DocumentNotarized);
        assert_eq!(event.fingerprint, deed());
        assert_eq!(event.account, mock.account());

        handle.unsubscribe().await;
        // The listener slot is free again.
        let again = client
            .subscribe(&ctx, EventKind::DocumentNotarized, "test", Arc::new(Collect(tx)))
            .await
            .unwrap();
        drop(again);
    }

    #[tokio::test]
    async fn subscription_outlives_node_down_at_startup() {
        let mock = MockLedger::new();
        let client = mock.client();
        let ctx = client.context("ganache1").unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        mock.fail_reads(true);
        let _handle = client
            .subscribe(&ctx, EventKind::DocumentNotarized, "reconciler", Arc::new(Collect(tx)))
            .await
            .unwrap();
        tokio::time::sleep(client.settings().event_poll_interval * 2).await;
        mock.fail_reads(false);

        client.notarize(&ctx, deed(), 7).await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.fingerprint, deed());
    }

    #[tokio::test]
    async fn history_folds_to_revoked() {
        let mock = MockLedger::new();
        let client = mock.client();
        let ctx = client.context("ganache1").unwrap();
        client.notarize(&ctx, deed(), 4).await.unwrap();
        client.revoke(&ctx, deed()).await.unwrap();

        let events = client.history(&ctx, deed()).await.unwrap();
        assert_eq!(events.len(), 2);
        let mut replayed = events.clone();
        replayed.extend(events.iter().cloned());
        let folded = fold_history(deed(), &replayed).unwrap();
        assert!(folded.exists && folded.revoked);
        assert_eq!(folded.notary, mock.account());
    }
}
