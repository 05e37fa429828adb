use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, HeaderMap};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{ApiError, ADMIN_HEADER};
use crate::docs::types::{HistoryFilter, LedgerSnapshot, VerificationRecord, VerificationStatus};
use crate::fingerprint::Fingerprint;
use crate::ledger::network::{NetworkContext, NetworkDescriptor};
use crate::ledger::NotarizationRecord;
use crate::pipeline::stage::Stage;
use crate::pipeline::{NotarizationOutcome, PipelineReport, UploadRequest};
use crate::state::{AppState, ConfigPatch};

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Default, Deserialize)]
pub struct NetworkQuery {
    pub network: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub status: Option<String>,
    pub q: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SelectNetwork {
    pub network: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub success: bool,
    pub file_name: String,
    pub upload_date: String,
    pub upload_time: String,
    pub status: VerificationStatus,
    pub details: VerifyDetails,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyDetails {
    pub upload_id: String,
    pub fingerprint: Fingerprint,
    pub network: String,
    pub stage: Stage,
    pub trail: Vec<Stage>,
    pub verification: Option<VerificationRecord>,
    pub notarization: NotarizationOutcome,
    pub ledger: Option<LedgerSnapshot>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentDetails {
    pub network: String,
    #[serde(flatten)]
    pub record: NotarizationRecord,
    pub validly_notarized: bool,
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let network = state.config.read().await.network.clone();
    Json(json!({
        "status": "ok",
        "network": network,
        "pendingReconciliations": state.reconciler.pending().await.len(),
    }))
}

/// `POST /api/verify` with multipart fields `file`, `owner`, and optional
/// `expirationDays` and `network`.
pub async fn verify(State(state): State<AppState>, mut multipart: Multipart) -> ApiResult<Json<VerifyResponse>> {
    let mut file = None;
    let mut owner = None;
    let mut expiration_days = None;
    let mut network = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field.bytes().await?;
                file = Some((file_name, content_type, bytes.to_vec()));
            }
            "owner" => owner = Some(field.text().await?),
            "expirationDays" => {
                let raw = field.text().await?;
                let days = raw
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| ApiError::input(format!("invalid expirationDays '{}'", raw)))?;
                expiration_days = Some(days);
            }
            "network" => network = Some(field.text().await?).filter(|n| !n.trim().is_empty()),
            other => warn!(field = other, "ignoring unknown upload field"),
        }
    }

    let (file_name, content_type, bytes) = file.ok_or_else(|| ApiError::input("No file uploaded"))?;
    let owner = owner.ok_or_else(|| ApiError::input("owner is required"))?;
    let report = state
        .pipeline
        .run(UploadRequest {
            owner,
            file_name,
            content_type,
            bytes,
            expiration_days,
            network,
        })
        .await?;
    Ok(Json(verify_response(report)))
}

pub fn verify_response(report: PipelineReport) -> VerifyResponse {
    let message = summary(&report);
    let uploaded = DateTime::from_timestamp(report.record.uploaded_at, 0).unwrap_or_default();
    let record = report.record;
    VerifyResponse {
        success: record.status == VerificationStatus::Verified,
        file_name: record.file_name,
        upload_date: uploaded.format("%Y-%m-%d").to_string(),
        upload_time: uploaded.format("%H:%M:%S").to_string(),
        status: record.status,
        details: VerifyDetails {
            upload_id: record.upload_id,
            fingerprint: record.fingerprint,
            network: record.network,
            stage: report.stage,
            trail: report.trail,
            verification: record.verification,
            notarization: report.notarization,
            ledger: record.notarization,
        },
        message,
    }
}

/// One-line human summary of a pipeline run.
pub fn summary(report: &PipelineReport) -> String {
    let record = &report.record;
    match (record.status, &report.notarization) {
        (VerificationStatus::Rejected, _) => {
            let reasons = record
                .verification
                .as_ref()
                .map(|v| v.verdict.reasons.join("; "))
                .unwrap_or_default();
            format!("Document rejected: {}", reasons)
        }
        (VerificationStatus::InProgress, _) => "Verification in progress: awaiting compliance review".to_string(),
        (VerificationStatus::Verified, NotarizationOutcome::Notarized { receipt }) => {
            format!("Document verified and notarized in transaction {}.", receipt.tx_hash)
        }
        (VerificationStatus::Verified, NotarizationOutcome::AlreadyNotarized) => {
            format!("Document verified; it is already notarized on {}.", record.network)
        }
        (VerificationStatus::Verified, NotarizationOutcome::ReconciliationPending { .. }) => {
            "Document notarized; metadata update is pending reconciliation.".to_string()
        }
        (VerificationStatus::Verified, NotarizationOutcome::Failed { error }) => {
            format!("Document verified but notarization failed: {}", error.message)
        }
        (VerificationStatus::Verified, NotarizationOutcome::NotAttempted) => "Document verified.".to_string(),
    }
}

pub async fn document(
    State(state): State<AppState>,
    Path(fingerprint): Path<String>,
    Query(query): Query<NetworkQuery>,
) -> ApiResult<Json<DocumentDetails>> {
    let fingerprint = parse_fingerprint(&fingerprint)?;
    let ctx = resolve_network(&state, query.network).await?;
    let record = state.ledger.query(&ctx, fingerprint).await?;
    Ok(Json(DocumentDetails {
        network: ctx.key().to_string(),
        validly_notarized: record.is_validly_notarized(),
        record,
    }))
}

pub async fn certificate(
    State(state): State<AppState>,
    Path(fingerprint): Path<String>,
    Query(query): Query<NetworkQuery>,
) -> ApiResult<impl IntoResponse> {
    let fingerprint = parse_fingerprint(&fingerprint)?;
    let ctx = resolve_network(&state, query.network).await?;
    let record = state.ledger.query(&ctx, fingerprint).await?;
    if !record.exists {
        return Err(ApiError::not_found(format!(
            "document {} is not notarized on {}",
            fingerprint,
            ctx.key()
        )));
    }
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        render_certificate(&ctx.descriptor, &record),
    ))
}

pub async fn revoke(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(fingerprint): Path<String>,
    Query(query): Query<NetworkQuery>,
) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers)?;
    let fingerprint = parse_fingerprint(&fingerprint)?;
    let network = match query.network {
        Some(network) => network,
        None => state.config.read().await.network.clone(),
    };
    let receipt = state.pipeline.revoke(&network, fingerprint).await?;
    info!(%fingerprint, network = %network, tx = %receipt.tx_hash, "revocation confirmed");
    Ok(Json(json!({
        "success": true,
        "network": network,
        "fingerprint": fingerprint,
        "receipt": receipt,
    })))
}

pub async fn history(
    State(state): State<AppState>,
    Path(owner): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Value>> {
    let status = query
        .status
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(str::parse::<VerificationStatus>)
        .transpose()
        .map_err(|e| ApiError::input(e.to_string()))?;
    let filter = HistoryFilter { status, q: query.q };
    let records = state
        .store
        .list_by_owner(&owner, &filter)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({
        "owner": owner,
        "count": records.len(),
        "records": records,
    })))
}

pub async fn documents_by_notary(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Query(query): Query<NetworkQuery>,
) -> ApiResult<Json<Value>> {
    let ctx = resolve_network(&state, query.network).await?;
    let documents = state.ledger.search_by_notary(&ctx, &address).await?;
    Ok(Json(json!({
        "notary": address,
        "network": ctx.key(),
        "documents": documents,
    })))
}

pub async fn networks(State(state): State<AppState>) -> Json<Value> {
    let current = state.config.read().await.network.clone();
    let networks: Vec<&NetworkDescriptor> = state.ledger.networks().descriptors().collect();
    Json(json!({
        "current": current,
        "networks": networks,
    }))
}

/// Switch the wallet to `network` and make it the default for new uploads.
pub async fn select_network(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SelectNetwork>,
) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers)?;
    let ctx = state.ledger.context(&body.network)?;
    let switch = state.ledger.ensure_network(&ctx).await?;

    let mut config = state.config.write().await;
    let patch = ConfigPatch {
        network: Some(body.network.clone()),
        ..ConfigPatch::default()
    };
    config
        .apply(patch, state.ledger.networks())
        .map_err(|e| ApiError::input(e.to_string()))?;
    info!(network = %body.network, ?switch, "default network changed");
    Ok(Json(json!({
        "current": body.network,
        "switch": switch,
    })))
}

pub async fn get_config(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers)?;
    let config = state.config.read().await.clone();
    Ok(Json(json!(config)))
}

/// Apply a partial update; an invalid patch changes nothing.
pub async fn put_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(patch): Json<ConfigPatch>,
) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers)?;
    let mut config = state.config.write().await;
    config
        .apply(patch, state.ledger.networks())
        .map_err(|e| ApiError::input(e.to_string()))?;
    info!(config = ?*config, "pipeline configuration updated");
    Ok(Json(json!(*config)))
}

pub async fn pending_reconciliation(State(state): State<AppState>) -> Json<Value> {
    let pending = state.reconciler.pending().await;
    Json(json!({ "pending": pending }))
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> ApiResult<()> {
    let token = headers.get(ADMIN_HEADER).and_then(|v| v.to_str().ok());
    if state.is_admin(token) {
        Ok(())
    } else {
        Err(ApiError::forbidden())
    }
}

fn parse_fingerprint(raw: &str) -> ApiResult<Fingerprint> {
    raw.parse().map_err(|e: crate::fingerprint::ParseFingerprintError| ApiError::input(e.to_string()))
}

async fn resolve_network(state: &AppState, requested: Option<String>) -> ApiResult<NetworkContext> {
    let key = match requested.filter(|n| !n.trim().is_empty()) {
        Some(key) => key,
        None => state.config.read().await.network.clone(),
    };
    Ok(state.ledger.context(&key)?)
}

fn format_time(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|s| DateTime::<Utc>::from_timestamp(s, 0))
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| secs.to_string())
}

/// Plain-text certificate for an existing notarization.
pub fn render_certificate(network: &NetworkDescriptor, record: &NotarizationRecord) -> String {
    let status = if record.revoked {
        "REVOKED"
    } else if record.is_expired {
        "EXPIRED"
    } else {
        "ACTIVE"
    };
    format!(
        "NOTARIZATION CERTIFICATE\n\
         \n\
         Document fingerprint: {fingerprint}\n\
         Notary account:       {notary}\n\
         Network:              {chain} ({key}, chain {chain_id})\n\
         Contract:             {contract}\n\
         Notarized at:         {notarized}\n\
         Expires at:           {expires}\n\
         Status:               {status}\n\
         \n\
         The document with the fingerprint above was notarized on the ledger\n\
         by the notary account shown, at the time shown.\n",
        fingerprint = record.fingerprint,
        notary = record.notary,
        chain = network.chain_name,
        key = network.key,
        chain_id = network.chain_id.to_hex(),
        contract = network.contract_address,
        notarized = format_time(record.notarization_time),
        expires = format_time(record.expiration_time),
    )
}
