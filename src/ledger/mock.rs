//! In-memory wallet and node that emulate the notarization contract.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::abi::{self, Address, Word};
use super::events::EventKind;
use super::network::{ChainId, NetworkTable};
use super::provider::{ProviderError, RpcProvider};
use super::{unix_now, LedgerClient, LedgerSettings};

const GANACHE_ACCOUNT: &str = "0x90f8bf6a479f320ead074411a4b0e7944ea8c9c1";

#[derive(Debug, Clone, Default)]
struct Doc {
    notary: Option<Address>,
    notarization_time: u64,
    expiration_time: u64,
    exists: bool,
    revoked: bool,
}

#[derive(Default)]
struct Chain {
    documents: HashMap<Word, Doc>,
    order: Vec<Word>,
    logs: Vec<Value>,
    receipts: HashMap<String, Value>,
    block: u64,
}

impl Chain {
    fn mine(&mut self, tx_hash: &str, success: bool, log: Option<(Vec<String>, String)>) {
        self.block += 1;
        if let Some((topics, data)) = log {
            self.logs.push(json!({
                "topics": topics,
                "data": data,
                "transactionHash": tx_hash,
                "logIndex": "0x0",
                "blockNumber": abi::quantity(self.block),
            }));
        }
        self.receipts.insert(
            tx_hash.to_string(),
            json!({
                "transactionHash": tx_hash,
                "blockNumber": abi::quantity(self.block),
                "gasUsed": abi::quantity(if success { 68_000 } else { 23_000 }),
                "status": if success { "0x1" } else { "0x0" },
            }),
        );
    }

    fn notarize(&mut self, tx_hash: &str, from: Address, hash: Word, seconds: u64, now: u64) {
        if self.documents.get(&hash).is_some_and(|d| d.exists) {
            self.mine(tx_hash, false, None);
            return;
        }
        self.documents.insert(
            hash,
            Doc {
                notary: Some(from),
                notarization_time: now,
                expiration_time: now + seconds,
                exists: true,
                revoked: false,
            },
        );
        self.order.push(hash);
        let topics = vec![
            EventKind::DocumentNotarized.topic(),
            abi::to_hex(&hash),
            abi::to_hex(&from.to_word()),
        ];
        let data = abi::encode_words(&[abi::uint_word(now), abi::uint_word(now + seconds)]);
        self.mine(tx_hash, true, Some((topics, data)));
    }

    fn revoke(&mut self, tx_hash: &str, from: Address, hash: Word) {
        match self.documents.get_mut(&hash) {
            Some(doc) if doc.exists && !doc.revoked && doc.notary == Some(from) => {
                doc.revoked = true;
                let topics = vec![
                    EventKind::NotarizationRevoked.topic(),
                    abi::to_hex(&hash),
                    abi::to_hex(&from.to_word()),
                ];
                self.mine(tx_hash, true, Some((topics, "0x".into())));
            }
            _ => self.mine(tx_hash, false, None),
        }
    }
}

struct MockState {
    account: Address,
    wallet_chain: ChainId,
    known_chains: HashSet<ChainId>,
    chains: HashMap<ChainId, Chain>,
    calls: HashMap<String, usize>,
    reject_connect: bool,
    reject_transactions: bool,
    reject_switches: bool,
    fail_reads: bool,
    connect_delay: Duration,
    now: Option<u64>,
    front_run: Option<Address>,
    nonce: u64,
}

impl MockState {
    fn now(&self) -> u64 {
        self.now.unwrap_or_else(unix_now)
    }

    fn next_tx_hash(&mut self, chain: ChainId) -> String {
        self.nonce += 1;
        abi::to_hex(&abi::keccak256(format!("{}:{}", chain, self.nonce).as_bytes()))
    }

    fn wallet(&mut self, method: &str, params: &Value) -> Result<Value, ProviderError> {
        match method {
            "eth_requestAccounts" | "eth_accounts" => {
                if self.reject_connect {
                    return Err(ProviderError::new(ProviderError::USER_REJECTED, "User rejected the request."));
                }
                Ok(json!([self.account.to_checksum().to_lowercase()]))
            }
            "eth_chainId" => Ok(json!(self.wallet_chain.to_hex())),
            "wallet_switchEthereumChain" => {
                if self.reject_switches {
                    return Err(ProviderError::new(ProviderError::USER_REJECTED, "User rejected the request."));
                }
                let target = parse_chain(&params[0]["chainId"])?;
                if !self.known_chains.contains(&target) {
                    return Err(ProviderError::new(
                        ProviderError::UNRECOGNIZED_CHAIN,
                        format!("Unrecognized chain ID {}", target.to_hex()),
                    ));
                }
                self.wallet_chain = target;
                Ok(Value::Null)
            }
            "wallet_addEthereumChain" => {
                let chain = parse_chain(&params[0]["chainId"])?;
                self.known_chains.insert(chain);
                Ok(Value::Null)
            }
            "eth_sendTransaction" => {
                if self.reject_transactions {
                    return Err(ProviderError::new(
                        ProviderError::USER_REJECTED,
                        "User denied transaction signature.",
                    ));
                }
                let tx = &params[0];
                let chain = parse_chain(&tx["chainId"])?;
                if chain != self.wallet_chain {
                    return Err(ProviderError::new(-32000, "chainId does not match the active chain"));
                }
                let from = Address::parse(tx["from"].as_str().unwrap_or_default())
                    .map_err(|e| ProviderError::internal(e.to_string()))?;
                let data = abi::from_hex(tx["data"].as_str().unwrap_or_default())
                    .map_err(|e| ProviderError::internal(e.to_string()))?;
                self.execute(chain, from, &data)
            }
            other => Err(ProviderError::new(-32601, format!("method {other} not supported"))),
        }
    }

    fn execute(&mut self, chain: ChainId, from: Address, data: &[u8]) -> Result<Value, ProviderError> {
        let (sel, args) = abi::split_call(data).map_err(|e| ProviderError::internal(e.to_string()))?;
        let now = self.now();

        if sel == abi::selector(abi::NOTARIZE_DOCUMENT) && args.len() == 2 {
            let seconds = abi::decode_uint(&args[1]).map_err(|e| ProviderError::internal(e.to_string()))?;
            if let Some(rival) = self.front_run.take() {
                let rival_hash = self.next_tx_hash(chain);
                self.chains.entry(chain).or_default().notarize(&rival_hash, rival, args[0], seconds, now);
            }
            let tx_hash = self.next_tx_hash(chain);
            self.chains.entry(chain).or_default().notarize(&tx_hash, from, args[0], seconds, now);
            Ok(json!(tx_hash))
        } else if sel == abi::selector(abi::REVOKE_NOTARIZATION) && args.len() == 1 {
            let tx_hash = self.next_tx_hash(chain);
            self.chains.entry(chain).or_default().revoke(&tx_hash, from, args[0]);
            Ok(json!(tx_hash))
        } else {
            Err(ProviderError::internal("unknown contract function"))
        }
    }

    fn read(&mut self, chain_id: ChainId, method: &str, params: &Value) -> Result<Value, ProviderError> {
        if self.fail_reads {
            return Err(ProviderError::internal("node unreachable"));
        }
        let now = self.now();
        let chain = self.chains.entry(chain_id).or_default();
        match method {
            "eth_blockNumber" => Ok(json!(abi::quantity(chain.block))),
            "eth_getTransactionReceipt" => {
                let hash = params[0].as_str().unwrap_or_default();
                Ok(chain.receipts.get(hash).cloned().unwrap_or(Value::Null))
            }
            "eth_call" => {
                let data = abi::from_hex(params[0]["data"].as_str().unwrap_or_default())
                    .map_err(|e| ProviderError::internal(e.to_string()))?;
                let (sel, args) = abi::split_call(&data).map_err(|e| ProviderError::internal(e.to_string()))?;
                let doc = |hash: &Word| chain.documents.get(hash).cloned().unwrap_or_default();

                let out = if sel == abi::selector(abi::DOCUMENTS) {
                    let d = doc(&args[0]);
                    abi::encode_words(&[
                        d.notary.map(|a| a.to_word()).unwrap_or([0u8; 32]),
                        abi::uint_word(d.notarization_time),
                        abi::uint_word(d.expiration_time),
                        abi::bool_word(d.exists),
                        abi::bool_word(d.revoked),
                    ])
                } else if sel == abi::selector(abi::IS_DOCUMENT_NOTARIZED) {
                    let d = doc(&args[0]);
                    abi::encode_words(&[abi::bool_word(d.exists && !d.revoked)])
                } else if sel == abi::selector(abi::IS_DOCUMENT_EXPIRED) {
                    let d = doc(&args[0]);
                    abi::encode_words(&[abi::bool_word(d.exists && now > d.expiration_time)])
                } else if sel == abi::selector(abi::SEARCH_DOCUMENTS_BY_NOTARY) {
                    let notary = Address::from_word(&args[0]);
                    let hashes: Vec<Word> = chain
                        .order
                        .iter()
                        .filter(|h| doc(h).notary == Some(notary))
                        .copied()
                        .collect();
                    abi::encode_word_array(&hashes)
                } else {
                    return Err(ProviderError::internal("execution reverted"));
                };
                Ok(json!(out))
            }
            "eth_getLogs" => {
                let filter = &params[0];
                let from = block_param(&filter["fromBlock"], chain.block);
                let to = block_param(&filter["toBlock"], chain.block);
                let first_topics: Vec<String> = match &filter["topics"][0] {
                    Value::String(t) => vec![t.to_lowercase()],
                    Value::Array(ts) => ts.iter().filter_map(Value::as_str).map(str::to_lowercase).collect(),
                    _ => Vec::new(),
                };
                let hash_topic = filter["topics"][1].as_str().map(str::to_lowercase);

                let logs: Vec<Value> = chain
                    .logs
                    .iter()
                    .filter(|log| {
                        let block = abi::parse_quantity(&log["blockNumber"]).unwrap_or_default();
                        let topic0 = log["topics"][0].as_str().unwrap_or_default().to_lowercase();
                        let topic1 = log["topics"][1].as_str().unwrap_or_default().to_lowercase();
                        block >= from
                            && block <= to
                            && (first_topics.is_empty() || first_topics.contains(&topic0))
                            && hash_topic.as_ref().map_or(true, |h| *h == topic1)
                    })
                    .cloned()
                    .collect();
                Ok(Value::Array(logs))
            }
            other => Err(ProviderError::new(-32601, format!("method {other} not supported"))),
        }
    }
}

fn parse_chain(raw: &Value) -> Result<ChainId, ProviderError> {
    ChainId::parse(raw.as_str().unwrap_or_default()).map_err(|e| ProviderError::internal(e.to_string()))
}

fn block_param(raw: &Value, latest: u64) -> u64 {
    match raw.as_str() {
        Some("latest") | None => latest,
        Some(_) => abi::parse_quantity(raw).unwrap_or(latest),
    }
}

enum Role {
    Wallet,
    Reader(ChainId),
}

struct MockProvider {
    role: Role,
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl RpcProvider for MockProvider {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            *state.calls.entry(method.to_string()).or_default() += 1;
            if method == "eth_requestAccounts" {
                state.connect_delay
            } else {
                Duration::ZERO
            }
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        match self.role {
            Role::Wallet => state.wallet(method, &params),
            Role::Reader(chain) => state.read(chain, method, &params),
        }
    }
}

/// Shared wallet plus per-network nodes. The wallet starts on `ganache1`
/// and already knows `ganache2`; `ganache3` must be added.
#[derive(Clone)]
pub struct MockLedger {
    state: Arc<Mutex<MockState>>,
    networks: NetworkTable,
}

impl MockLedger {
    pub fn new() -> Self {
        let networks = NetworkTable::builtin();
        let chain_of = |key: &str| networks.get(key).unwrap().chain_id;
        let state = MockState {
            account: Address::parse(GANACHE_ACCOUNT).unwrap(),
            wallet_chain: chain_of("ganache1"),
            known_chains: [chain_of("ganache1"), chain_of("ganache2")].into_iter().collect(),
            chains: HashMap::new(),
            calls: HashMap::new(),
            reject_connect: false,
            reject_transactions: false,
            reject_switches: false,
            fail_reads: false,
            connect_delay: Duration::ZERO,
            now: None,
            front_run: None,
            nonce: 0,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            networks,
        }
    }

    pub fn settings() -> LedgerSettings {
        LedgerSettings {
            connect_timeout: Duration::from_secs(2),
            confirmation_timeout: Duration::from_secs(2),
            receipt_poll_interval: Duration::from_millis(5),
            event_poll_interval: Duration::from_millis(10),
            ..LedgerSettings::default()
        }
    }

    pub fn client(&self) -> LedgerClient {
        let readers = self
            .networks
            .descriptors()
            .map(|d| {
                let reader: Arc<dyn RpcProvider> = Arc::new(MockProvider {
                    role: Role::Reader(d.chain_id),
                    state: self.state.clone(),
                });
                (d.key.clone(), reader)
            })
            .collect();
        let wallet: Arc<dyn RpcProvider> = Arc::new(MockProvider {
            role: Role::Wallet,
            state: self.state.clone(),
        });
        LedgerClient::new(self.networks.clone(), Some(wallet), readers, Self::settings())
    }

    pub fn account(&self) -> Address {
        self.state.lock().unwrap().account
    }

    pub fn count(&self, method: &str) -> usize {
        self.state.lock().unwrap().calls.get(method).copied().unwrap_or_default()
    }

    pub fn reject_connect(&self, reject: bool) {
        self.state.lock().unwrap().reject_connect = reject;
    }

    pub fn reject_transactions(&self, reject: bool) {
        self.state.lock().unwrap().reject_transactions = reject;
    }

    pub fn reject_switches(&self, reject: bool) {
        self.state.lock().unwrap().reject_switches = reject;
    }

    pub fn fail_reads(&self, fail: bool) {
        self.state.lock().unwrap().fail_reads = fail;
    }

    pub fn connect_delay(&self, delay: Duration) {
        self.state.lock().unwrap().connect_delay = delay;
    }

    pub fn switch_account(&self, account: Address) {
        self.state.lock().unwrap().account = account;
    }

    pub fn set_now(&self, now: u64) {
        self.state.lock().unwrap().now = Some(now);
    }

    /// The next notarization is preceded by one from `rival` for the same hash.
    pub fn front_run_with(&self, rival: Address) {
        self.state.lock().unwrap().front_run = Some(rival);
    }
}
