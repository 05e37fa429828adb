//! Errors surfaced by the notarization pipeline and the HTTP API.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::docs::extract::ExtractError;
use crate::ledger::LedgerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    InputError,
    HeuristicRejection,
    CollaboratorUnavailable,
    WalletUnavailable,
    ConnectionRejected,
    NetworkMismatch,
    AlreadyNotarized,
    TransactionFailure,
    PersistenceFailure,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    Input(String),

    #[error("document rejected: {}", reasons.join("; "))]
    HeuristicRejection { reasons: Vec<String> },

    #[error("compliance analysis unavailable: {0}")]
    CollaboratorUnavailable(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("metadata write failed: {message}")]
    Persistence {
        message: String,
        tx_hash: Option<String>,
    },
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Input(_) => ErrorKind::InputError,
            Self::HeuristicRejection { .. } => ErrorKind::HeuristicRejection,
            Self::CollaboratorUnavailable(_) => ErrorKind::CollaboratorUnavailable,
            Self::Persistence { .. } => ErrorKind::PersistenceFailure,
            Self::Ledger(e) => match e {
                LedgerError::WalletUnavailable | LedgerError::NoAccounts => ErrorKind::WalletUnavailable,
                LedgerError::ConnectionRejected | LedgerError::ConnectionInProgress => {
                    ErrorKind::ConnectionRejected
                }
                LedgerError::UnknownNetwork(_) | LedgerError::NetworkSwitchFailed { .. } => {
                    ErrorKind::NetworkMismatch
                }
                LedgerError::AlreadyNotarized(_) => ErrorKind::AlreadyNotarized,
                // Revoking or looking up a fingerprint the ledger never saw.
                LedgerError::NotNotarized(_)
                | LedgerError::InvalidAddress(_)
                | LedgerError::InvalidArgument(_) => ErrorKind::InputError,
                _ => ErrorKind::TransactionFailure,
            },
        }
    }

    pub fn tx_hash(&self) -> Option<&str> {
        match self {
            Self::Ledger(e) => e.tx_hash(),
            Self::Persistence { tx_hash, .. } => tx_hash.as_deref(),
            _ => None,
        }
    }

    /// Whether the caller can fix this by changing the upload.
    pub fn is_user_correctable(&self) -> bool {
        matches!(self.kind(), ErrorKind::InputError | ErrorKind::HeuristicRejection)
    }

    pub fn persistence(err: anyhow::Error, tx_hash: Option<String>) -> Self {
        Self::Persistence {
            message: format!("{err:#}"),
            tx_hash,
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            kind: self.kind(),
            message: self.to_string(),
            tx_hash: self.tx_hash().map(str::to_string),
        }
    }
}

impl From<ExtractError> for PipelineError {
    fn from(err: ExtractError) -> Self {
        Self::Input(err.to_string())
    }
}

/// Wire form of a surfaced error: `{kind, message, txHash?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
}
