//! Upload → fingerprint → heuristics → optional AI review → ledger anchor
//! → metadata update, one run per upload.

pub mod reconcile;
pub mod stage;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

use crate::docs::extract::extract_text;
use crate::docs::types::{LedgerSnapshot, MetadataRecord, VerificationRecord, VerificationStatus};
use crate::docs::MetadataStore;
use crate::error::{ErrorBody, PipelineError};
use crate::fingerprint::Fingerprint;
use crate::heuristics::HeuristicEngine;
use crate::ledger::network::NetworkContext;
use crate::ledger::{LedgerClient, LedgerError, TxReceipt};
use crate::llm::{ComplianceAnalysis, ComplianceAnalyst, ComplianceOpinion};
use crate::state::{AiGating, PipelineConfig};
use reconcile::Reconciler;
use stage::{Stage, StageEvent, StageTrail};

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub owner: String,
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
    pub expiration_days: Option<u32>,
    /// Network key; the configured default when absent.
    pub network: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum NotarizationOutcome {
    NotAttempted,
    Notarized { receipt: TxReceipt },
    /// The ledger already held an active record for this fingerprint.
    AlreadyNotarized,
    Failed { error: ErrorBody },
    /// Anchored on the ledger but the metadata write has not landed yet.
    ReconciliationPending { tx_hash: Option<String> },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReport {
    pub record: MetadataRecord,
    pub stage: Stage,
    pub trail: Vec<Stage>,
    pub notarization: NotarizationOutcome,
}

impl PipelineReport {
    pub fn status(&self) -> VerificationStatus {
        self.record.status
    }
}

/// Drives one upload through the stage machine and publishes each stage.
struct Progress {
    trail: StageTrail,
    watcher: Option<watch::Sender<Stage>>,
}

impl Progress {
    fn advance(&mut self, event: StageEvent) {
        match self.trail.apply(event) {
            Ok(stage) => {
                debug!(%stage, "pipeline stage");
                if let Some(tx) = &self.watcher {
                    let _ = tx.send(stage);
                }
            }
            Err(e) => error!(error = %e, "pipeline took an invalid transition"),
        }
    }
}

pub struct Pipeline {
    ledger: Arc<LedgerClient>,
    store: Arc<dyn MetadataStore>,
    analyst: Option<Arc<dyn ComplianceAnalyst>>,
    reconciler: Arc<Reconciler>,
    config: Arc<RwLock<PipelineConfig>>,
}

impl Pipeline {
    pub fn new(
        ledger: Arc<LedgerClient>,
        store: Arc<dyn MetadataStore>,
        analyst: Option<Arc<dyn ComplianceAnalyst>>,
        reconciler: Arc<Reconciler>,
        config: Arc<RwLock<PipelineConfig>>,
    ) -> Self {
        Self {
            ledger,
            store,
            analyst,
            reconciler,
            config,
        }
    }

    pub async fn run(&self, request: UploadRequest) -> Result<PipelineReport, PipelineError> {
        self.run_with_progress(request, None).await
    }

    /// Run one upload. `Err` is returned only for input errors and for a
    /// metadata write that fails before anything touched the ledger; every
    /// later failure is reported in the outcome.
    pub async fn run_with_progress(
        &self,
        request: UploadRequest,
        watcher: Option<watch::Sender<Stage>>,
    ) -> Result<PipelineReport, PipelineError> {
        let config = self.config.read().await.clone();
        let mut progress = Progress {
            trail: StageTrail::default(),
            watcher,
        };

        if request.owner.trim().is_empty() {
            return Err(PipelineError::Input("owner is required".into()));
        }
        if request.file_name.trim().is_empty() {
            return Err(PipelineError::Input("file name is required".into()));
        }
        let expiration_days = request.expiration_days.unwrap_or(config.default_expiration_days);
        if expiration_days == 0 {
            return Err(PipelineError::Input("expiration must be at least one day".into()));
        }
        let network = request.network.clone().unwrap_or_else(|| config.network.clone());
        let ctx = self.ledger.context(&network)?;

        progress.advance(StageEvent::Start);
        let fingerprint = Fingerprint::of(&request.bytes);
        let text = extract_text(&request.bytes, &request.content_type, &request.file_name)?;
        info!(
            %fingerprint,
            owner = %request.owner,
            file = %request.file_name,
            size = request.bytes.len(),
            network = %network,
            "upload received"
        );

        let storage_ref = self
            .store
            .put_content(fingerprint, &request.bytes)
            .await
            .map_err(|e| PipelineError::persistence(e, None))?;
        let mut record = MetadataRecord::new(
            &request.owner,
            &request.file_name,
            &request.content_type,
            request.bytes.len(),
            fingerprint,
            &network,
            storage_ref,
        );
        self.persist(&record).await?;
        progress.advance(StageEvent::Hashed);

        let verdict = HeuristicEngine::new(config.notary_policy, config.verdict_policy).verify(&text);
        if !verdict.is_verified() {
            info!(%fingerprint, reasons = ?verdict.reasons, "document rejected by heuristics");
            progress.advance(StageEvent::HeuristicsFailed);
            let rejection = rejection_body(&verdict.reasons);
            self.finish_verification(&mut record, VerificationStatus::Rejected, verdict, None, Some(rejection))
                .await?;
            return Ok(report(record, progress, NotarizationOutcome::NotAttempted));
        }
        debug!(%fingerprint, warnings = verdict.warnings.len(), "heuristics passed");

        let consult_ai = self.analyst.is_some() || config.ai_gating == AiGating::Gating;
        progress.advance(StageEvent::HeuristicsPassed { consult_ai });
        let mut analysis = None;
        let mut collaborator_error = None;
        if consult_ai {
            match self.consult(&text, &config).await {
                Ok(a) => analysis = Some(a),
                Err(e) => {
                    warn!(%fingerprint, error = %e, "compliance analysis unavailable");
                    collaborator_error = Some(e.body());
                }
            }
            let opinion = analysis.as_ref().map(|a| a.opinion);
            match (config.ai_gating, opinion) {
                (AiGating::Gating, Some(ComplianceOpinion::NonCompliant)) => {
                    info!(%fingerprint, "compliance review rejected the document");
                    progress.advance(StageEvent::AiRejected);
                    let mut verdict = verdict;
                    verdict.reasons.push("compliance review: non-compliant".into());
                    let rejection = rejection_body(&verdict.reasons);
                    self.finish_verification(
                        &mut record,
                        VerificationStatus::Rejected,
                        verdict,
                        analysis,
                        Some(rejection),
                    )
                    .await?;
                    return Ok(report(record, progress, NotarizationOutcome::NotAttempted));
                }
                (AiGating::Gating, Some(ComplianceOpinion::Compliant)) | (AiGating::Advisory, _) => {
                    progress.advance(StageEvent::AiApproved);
                }
                (AiGating::Gating, _) => {
                    info!(%fingerprint, "no compliance opinion yet; upload left in progress");
                    let pending = collaborator_error.unwrap_or_else(|| {
                        PipelineError::CollaboratorUnavailable("no conclusive compliance opinion".into()).body()
                    });
                    self.finish_verification(
                        &mut record,
                        VerificationStatus::InProgress,
                        verdict,
                        analysis,
                        Some(pending),
                    )
                    .await?;
                    return Ok(report(record, progress, NotarizationOutcome::NotAttempted));
                }
            }
        }

        self.finish_verification(
            &mut record,
            VerificationStatus::Verified,
            verdict,
            analysis,
            collaborator_error,
        )
        .await?;

        if let Err(e) = self.ledger.ensure_network(&ctx).await {
            return Ok(self.ledger_failure(record, progress, e));
        }
        progress.advance(StageEvent::NetworkReady);

        let outcome = match self.ledger.notarize(&ctx, fingerprint, expiration_days).await {
            Ok(receipt) => {
                let tx_hash = Some(receipt.tx_hash.clone());
                self.record_anchor(&ctx, &mut record, tx_hash, NotarizationOutcome::Notarized { receipt })
                    .await
            }
            Err(LedgerError::AlreadyNotarized(_)) => {
                info!(%fingerprint, network = %ctx.key(), "fingerprint already anchored; treating as success");
                self.record_anchor(&ctx, &mut record, None, NotarizationOutcome::AlreadyNotarized)
                    .await
            }
            Err(e) => return Ok(self.ledger_failure(record, progress, e)),
        };
        progress.advance(StageEvent::Anchored);
        Ok(report(record, progress, outcome))
    }

    /// Revoke a fingerprint's notarization and refresh its metadata.
    pub async fn revoke(&self, network: &str, fingerprint: Fingerprint) -> Result<TxReceipt, PipelineError> {
        let ctx = self.ledger.context(network)?;
        let receipt = self.ledger.revoke(&ctx, fingerprint).await?;
        if let Err(e) = self.reconciler.reconcile(&ctx, fingerprint).await {
            warn!(%fingerprint, error = %e, "metadata refresh after revocation failed");
            self.reconciler
                .enqueue(ctx.key(), fingerprint, Some(receipt.tx_hash.clone()))
                .await;
        }
        Ok(receipt)
    }

    async fn consult(&self, text: &str, config: &PipelineConfig) -> Result<ComplianceAnalysis, PipelineError> {
        let Some(analyst) = &self.analyst else {
            return Err(PipelineError::CollaboratorUnavailable(
                "no compliance analyst configured".into(),
            ));
        };
        match tokio::time::timeout(config.ai_timeout(), analyst.analyze(text)).await {
            Ok(Ok(analysis)) => Ok(analysis),
            Ok(Err(e)) => Err(PipelineError::CollaboratorUnavailable(format!("{e:#}"))),
            Err(_) => Err(PipelineError::CollaboratorUnavailable(format!(
                "no answer within {}s",
                config.ai_timeout_secs
            ))),
        }
    }

    async fn persist(&self, record: &MetadataRecord) -> Result<(), PipelineError> {
        self.store
            .put(record)
            .await
            .map_err(|e| PipelineError::persistence(e, None))
    }

    async fn finish_verification(
        &self,
        record: &mut MetadataRecord,
        status: VerificationStatus,
        verdict: crate::heuristics::Verdict,
        ai_analysis: Option<ComplianceAnalysis>,
        error: Option<ErrorBody>,
    ) -> Result<(), PipelineError> {
        let now = chrono::Utc::now().timestamp();
        record.status = status;
        record.verification = Some(VerificationRecord {
            fingerprint: record.fingerprint,
            status,
            verdict,
            ai_analysis,
            error,
            completed_at: now,
        });
        record.updated_at = now;
        self.persist(record).await
    }

    /// Store what the ledger now says. A failed write after a confirmed
    /// transaction is queued for reconciliation instead of failing the run.
    async fn record_anchor(
        &self,
        ctx: &NetworkContext,
        record: &mut MetadataRecord,
        tx_hash: Option<String>,
        outcome: NotarizationOutcome,
    ) -> NotarizationOutcome {
        let fingerprint = record.fingerprint;
        let snapshot = match self.ledger.query(ctx, fingerprint).await {
            Ok(on_chain) => LedgerSnapshot::from_record(ctx.key(), &on_chain, tx_hash.clone()),
            Err(e) => {
                warn!(%fingerprint, error = %e, "could not read back ledger record");
                self.reconciler.enqueue(ctx.key(), fingerprint, tx_hash.clone()).await;
                LedgerSnapshot {
                    network: ctx.key().to_string(),
                    notary: None,
                    notarization_time: None,
                    expiration_time: None,
                    revoked: false,
                    tx_hash: tx_hash.clone(),
                    revocation_tx_hash: None,
                    reconciliation_pending: true,
                    observed_at: chrono::Utc::now().timestamp(),
                }
            }
        };
        record.notarization = Some(snapshot);
        record.updated_at = chrono::Utc::now().timestamp();

        match self.store.put(record).await {
            Ok(()) => outcome,
            Err(e) => {
                error!(%fingerprint, tx = ?tx_hash, error = %format!("{e:#}"), "metadata write failed after ledger confirmation");
                self.reconciler.enqueue(ctx.key(), fingerprint, tx_hash.clone()).await;
                if let Some(snapshot) = record.notarization.as_mut() {
                    snapshot.reconciliation_pending = true;
                }
                NotarizationOutcome::ReconciliationPending { tx_hash }
            }
        }
    }

    fn ledger_failure(&self, record: MetadataRecord, mut progress: Progress, err: LedgerError) -> PipelineReport {
        let err = PipelineError::from(err);
        error!(fingerprint = %record.fingerprint, kind = ?err.kind(), tx = ?err.tx_hash(), error = %err, "notarization failed");
        progress.advance(StageEvent::Failed);
        report(record, progress, NotarizationOutcome::Failed { error: err.body() })
    }
}

fn report(record: MetadataRecord, progress: Progress, notarization: NotarizationOutcome) -> PipelineReport {
    PipelineReport {
        record,
        stage: progress.trail.current(),
        trail: progress.trail.visited().to_vec(),
        notarization,
    }
}

fn rejection_body(reasons: &[String]) -> ErrorBody {
    PipelineError::HeuristicRejection {
        reasons: reasons.to_vec(),
    }
    .body()
}
