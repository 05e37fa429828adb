use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::docs::MetadataStore;
use crate::heuristics::{NotaryPolicy, VerdictPolicy};
use crate::ledger::network::NetworkTable;
use crate::ledger::{LedgerClient, LedgerSettings};
use crate::pipeline::reconcile::Reconciler;
use crate::pipeline::Pipeline;

/// Whether the compliance analysis can block notarization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiGating {
    /// Stored alongside the verdict, never blocks.
    Advisory,
    /// A non-compliant opinion rejects; no opinion leaves the upload in progress.
    Gating,
}

impl FromStr for AiGating {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "advisory" => Ok(Self::Advisory),
            "gating" | "gate" => Ok(Self::Gating),
            other => anyhow::bail!("unknown AI gating mode '{}'", other),
        }
    }
}

impl fmt::Display for AiGating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Advisory => "advisory",
            Self::Gating => "gating",
        })
    }
}

/// Pipeline parameters (admins can modify at runtime).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    pub notary_policy: NotaryPolicy,
    pub verdict_policy: VerdictPolicy,
    pub ai_gating: AiGating,
    pub ai_timeout_secs: u64,
    pub default_expiration_days: u32,
    /// Network new uploads target unless they name one.
    pub network: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            notary_policy: NotaryPolicy::AllRequired,
            verdict_policy: VerdictPolicy::Strict,
            ai_gating: AiGating::Advisory,
            ai_timeout_secs: 60,
            default_expiration_days: 365,
            network: "ganache1".to_string(),
        }
    }
}

/// Partial update accepted by `PUT /api/config`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPatch {
    pub notary_policy: Option<NotaryPolicy>,
    pub verdict_policy: Option<VerdictPolicy>,
    pub ai_gating: Option<AiGating>,
    pub ai_timeout_secs: Option<u64>,
    pub default_expiration_days: Option<u32>,
    pub network: Option<String>,
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            notary_policy: env_or("NOTARY_POLICY", defaults.notary_policy)?,
            verdict_policy: env_or("VERDICT_POLICY", defaults.verdict_policy)?,
            ai_gating: env_or("AI_GATING", defaults.ai_gating)?,
            ai_timeout_secs: env_or("AI_TIMEOUT_SECS", defaults.ai_timeout_secs)?,
            default_expiration_days: env_or("DEFAULT_EXPIRATION_DAYS", defaults.default_expiration_days)?,
            network: dotenv::var("NETWORK").unwrap_or(defaults.network),
        })
    }

    pub fn ai_timeout(&self) -> Duration {
        Duration::from_secs(self.ai_timeout_secs)
    }

    pub fn validate(&self, networks: &NetworkTable) -> Result<()> {
        if self.ai_timeout_secs == 0 {
            anyhow::bail!("aiTimeoutSecs must be at least 1");
        }
        if self.default_expiration_days == 0 {
            anyhow::bail!("defaultExpirationDays must be at least 1");
        }
        if !networks.contains(&self.network) {
            anyhow::bail!("network '{}' is not configured", self.network);
        }
        Ok(())
    }

    /// Apply a patch, keeping the old values if the result is invalid.
    pub fn apply(&mut self, patch: ConfigPatch, networks: &NetworkTable) -> Result<()> {
        let mut next = self.clone();
        if let Some(v) = patch.notary_policy {
            next.notary_policy = v;
        }
        if let Some(v) = patch.verdict_policy {
            next.verdict_policy = v;
        }
        if let Some(v) = patch.ai_gating {
            next.ai_gating = v;
        }
        if let Some(v) = patch.ai_timeout_secs {
            next.ai_timeout_secs = v;
        }
        if let Some(v) = patch.default_expiration_days {
            next.default_expiration_days = v;
        }
        if let Some(v) = patch.network {
            next.network = v;
        }
        next.validate(networks)?;
        *self = next;
        Ok(())
    }
}

/// Process-level settings that do not change after startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub data_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub wallet_rpc_url: Option<String>,
    pub admin_token: Option<String>,
    pub ledger: LedgerSettings,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = LedgerSettings::default();
        let ledger = LedgerSettings {
            connect_timeout: Duration::from_secs(env_or("CONNECT_TIMEOUT_SECS", defaults.connect_timeout.as_secs())?),
            confirmation_timeout: Duration::from_secs(env_or(
                "CONFIRMATION_TIMEOUT_SECS",
                defaults.confirmation_timeout.as_secs(),
            )?),
            event_poll_interval: Duration::from_secs(env_or("EVENT_POLL_SECS", defaults.event_poll_interval.as_secs())?),
            ..defaults
        };
        Ok(Self {
            bind_addr: dotenv::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".to_string()),
            data_dir: PathBuf::from(dotenv::var("DATA_DIR").unwrap_or_else(|_| "./data/notary".to_string())),
            max_upload_bytes: env_or("MAX_UPLOAD_BYTES", 50 * 1024 * 1024)?,
            wallet_rpc_url: dotenv::var("WALLET_RPC_URL").ok().filter(|u| !u.is_empty()),
            admin_token: dotenv::var("ADMIN_TOKEN").ok().filter(|t| !t.is_empty()),
            ledger,
        })
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match dotenv::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("invalid value for {}", key)),
        _ => Ok(default),
    }
}

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub ledger: Arc<LedgerClient>,
    pub store: Arc<dyn MetadataStore>,
    pub reconciler: Arc<Reconciler>,
    pub config: Arc<RwLock<PipelineConfig>>,
    pub admin_token: Option<Arc<str>>,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn is_admin(&self, token: Option<&str>) -> bool {
        match &self.admin_token {
            None => true,
            Some(expected) => token == Some(expected.as_ref()),
        }
    }
}
