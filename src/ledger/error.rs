//! Ledger client errors

use thiserror::Error;

use crate::fingerprint::Fingerprint;

/// Errors from the ledger notarization client.
///
/// `Clone` because a single in-flight wallet connection result is shared
/// by every caller awaiting it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("no wallet provider is available")]
    WalletUnavailable,

    #[error("user rejected the connection request")]
    ConnectionRejected,

    #[error("wallet is already processing a connection request")]
    ConnectionInProgress,

    #[error("wallet returned no accounts")]
    NoAccounts,

    #[error("network key '{0}' is not configured")]
    UnknownNetwork(String),

    #[error("failed to switch wallet to network '{network}': {reason}")]
    NetworkSwitchFailed { network: String, reason: String },

    #[error("document {0} is already notarized")]
    AlreadyNotarized(Fingerprint),

    #[error("document {0} has no active notarization")]
    NotNotarized(Fingerprint),

    #[error("user rejected the transaction")]
    TransactionRejected,

    #[error("chain error: {message}")]
    Chain {
        message: String,
        tx_hash: Option<String>,
    },

    #[error("timed out waiting for confirmation of {tx_hash}")]
    ConfirmationTimeout { tx_hash: String },

    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to decode ledger response: {0}")]
    Decode(String),

    #[error("a '{listener}' listener for {kind} events is already registered on '{network}'")]
    DuplicateSubscription {
        network: String,
        kind: &'static str,
        listener: String,
    },
}

impl LedgerError {
    pub fn chain(message: impl Into<String>) -> Self {
        Self::Chain {
            message: message.into(),
            tx_hash: None,
        }
    }

    pub fn tx_hash(&self) -> Option<&str> {
        match self {
            Self::Chain { tx_hash, .. } => tx_hash.as_deref(),
            Self::ConfirmationTimeout { tx_hash } => Some(tx_hash),
            _ => None,
        }
    }
}
