use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::error::LedgerError;
use super::provider::RpcProvider;

/// EVM chain id. Wallets report it as a hex quantity ("0x539"), config
/// files sometimes as decimal; both normalise to the same integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainId(pub u64);

impl ChainId {
    pub fn parse(raw: &str) -> Result<Self, LedgerError> {
        let s = raw.trim();
        let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex_digits) => u64::from_str_radix(hex_digits, 16),
            None => s.parse::<u64>(),
        };
        parsed
            .map(ChainId)
            .map_err(|_| LedgerError::Decode(format!("invalid chain id '{}'", raw)))
    }

    pub fn to_hex(&self) -> String {
        format!("0x{:x}", self.0)
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for ChainId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ChainId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ChainId::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// Static description of one ledger network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkDescriptor {
    pub key: String,
    pub chain_id: ChainId,
    pub chain_name: String,
    pub rpc_url: String,
    pub contract_address: String,
    pub native_currency: NativeCurrency,
}

impl NetworkDescriptor {
    /// Params for `wallet_addEthereumChain`.
    pub fn add_chain_params(&self) -> serde_json::Value {
        serde_json::json!([{
            "chainId": self.chain_id.to_hex(),
            "chainName": self.chain_name,
            "nativeCurrency": self.native_currency,
            "rpcUrls": [self.rpc_url],
            "blockExplorerUrls": [],
        }])
    }
}

/// The configured networks, keyed by network key.
#[derive(Debug, Clone, Default)]
pub struct NetworkTable {
    networks: BTreeMap<String, Arc<NetworkDescriptor>>,
}

impl NetworkTable {
    pub fn new(descriptors: impl IntoIterator<Item = NetworkDescriptor>) -> Self {
        Self {
            networks: descriptors
                .into_iter()
                .map(|d| (d.key.clone(), Arc::new(d)))
                .collect(),
        }
    }

    /// Local development chains the notarization contract is deployed to.
    pub fn builtin() -> Self {
        let contract = "0x5fbdb2315678afecb367f032d93f642f64180aa3";
        Self::new([
            NetworkDescriptor {
                key: "ganache1".into(),
                chain_id: ChainId(0x539),
                chain_name: "Ethereum test".into(),
                rpc_url: "http://127.0.0.1:7545".into(),
                contract_address: contract.into(),
                native_currency: NativeCurrency {
                    name: "Ether".into(),
                    symbol: "ETH".into(),
                    decimals: 18,
                },
            },
            NetworkDescriptor {
                key: "ganache2".into(),
                chain_id: ChainId(0x562),
                chain_name: "Polygontest".into(),
                rpc_url: "http://127.0.0.1:8546".into(),
                contract_address: contract.into(),
                native_currency: NativeCurrency {
                    name: "Matic".into(),
                    symbol: "MATIC".into(),
                    decimals: 18,
                },
            },
            NetworkDescriptor {
                key: "ganache3".into(),
                chain_id: ChainId(0x15e0),
                chain_name: "Binancetest".into(),
                rpc_url: "http://127.0.0.1:8547".into(),
                contract_address: contract.into(),
                native_currency: NativeCurrency {
                    name: "Binance Coin".into(),
                    symbol: "BNB".into(),
                    decimals: 18,
                },
            },
        ])
    }

    pub fn get(&self, key: &str) -> Result<Arc<NetworkDescriptor>, LedgerError> {
        self.networks
            .get(key)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownNetwork(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.networks.contains_key(key)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &NetworkDescriptor> {
        self.networks.values().map(|d| d.as_ref())
    }
}

/// Explicit network target for a ledger call: the descriptor plus the
/// read-only RPC endpoint for that chain. Every pipeline carries its own
/// context, so documents on different networks never race on shared state.
#[derive(Clone)]
pub struct NetworkContext {
    pub descriptor: Arc<NetworkDescriptor>,
    pub reader: Arc<dyn RpcProvider>,
}

impl NetworkContext {
    pub fn key(&self) -> &str {
        &self.descriptor.key
    }
}

impl fmt::Debug for NetworkContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkContext")
            .field("key", &self.descriptor.key)
            .field("chain_id", &self.descriptor.chain_id)
            .finish()
    }
}
