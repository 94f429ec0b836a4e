use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use briefing_api::{
    AddAnalystRequest, AddBriefingRequest, BriefingApi, DueFilters, DueQuery, MigrateResult,
    OutreachSummary, Pagination, SchedulerSettings, TierSetFile, API_CONTRACT_VERSION,
};
use briefing_core::{
    Analyst, AnalystId, AnalystStatus, Briefing, BriefingId, BriefingTransition, ConversationId,
    DueAnalyst, Influence, InfluenceTier, SchedulingConversation, SchedulingError, SkippedAnalyst,
    SuggestedTime,
};
use briefing_store_sqlite::{IntegrityReport, SchemaStatus};
use clap::Parser;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{error, info};

const SERVICE_CONTRACT_VERSION: &str = "service.v1";

#[derive(Clone)]
struct ServiceState {
    api: BriefingApi,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    success: bool,
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pagination: Option<Pagination>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filters: Option<DueFilters>,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    #[serde(skip_serializing)]
    status: StatusCode,
    success: bool,
    service_contract_version: &'static str,
    error: String,
}

#[derive(Debug, Clone, Deserialize)]
struct MigrateRequest {
    dry_run: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct AnalystStatusRequest {
    status: String,
}

#[derive(Debug, Clone, Deserialize)]
struct AnalystInfluenceRequest {
    influence: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct AnalystListQuery {
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct AsOfQuery {
    #[serde(default, with = "time::serde::rfc3339::option")]
    as_of: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct AsOfRequest {
    #[serde(default, with = "time::serde::rfc3339::option")]
    as_of: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
struct DuePage {
    snapshot_id: String,
    items: Vec<DueAnalyst>,
    skipped: Vec<SkippedAnalyst>,
}

#[derive(Debug, Parser)]
#[command(name = "briefing-service")]
#[command(about = "Local HTTP service for analyst briefing scheduling")]
struct Args {
    #[arg(long, env = "ARBRIEF_DB", default_value = "./briefings.sqlite3")]
    db: PathBuf,
    #[arg(long, default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
    #[arg(long, env = "ARBRIEF_CONFIG")]
    config: Option<PathBuf>,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

impl ServiceError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            success: false,
            service_contract_version: SERVICE_CONTRACT_VERSION,
            error: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// Caller mistakes are 400; everything else is a store or runtime failure.
    fn from_api(err: &anyhow::Error) -> Self {
        if err.downcast_ref::<SchedulingError>().is_some() {
            return Self::bad_request(format!("{err:#}"));
        }
        let message = format!("{err:#}");
        error!(error = %message, "request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        success: true,
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
        pagination: None,
        filters: None,
    }
}

/// Run a store-backed API call off the async executor.
async fn run_blocking<T, F>(state: &ServiceState, operation: F) -> Result<T, ServiceError>
where
    F: FnOnce(&BriefingApi) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let api = state.api.clone();
    match tokio::task::spawn_blocking(move || operation(&api)).await {
        Ok(result) => result.map_err(|err| ServiceError::from_api(&err)),
        Err(err) => {
            error!(error = %err, "blocking task failed");
            Err(ServiceError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("task failed: {err}")))
        }
    }
}

fn parse_analyst_id(raw: &str) -> Result<AnalystId, ServiceError> {
    AnalystId::parse(raw).map_err(|err| ServiceError::bad_request(err.to_string()))
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/db/schema-version", post(db_schema_version))
        .route("/v1/db/migrate", post(db_migrate))
        .route("/v1/db/integrity", get(db_integrity))
        .route("/v1/tiers", get(tiers_list).put(tiers_replace))
        .route("/v1/analysts", get(analysts_list).post(analysts_add))
        .route("/v1/analysts/:analyst_id/status", post(analyst_set_status))
        .route("/v1/analysts/:analyst_id/influence", post(analyst_set_influence))
        .route("/v1/analysts/:analyst_id/briefings", get(analyst_briefings))
        .route("/v1/briefings", post(briefings_add))
        .route("/v1/briefings/due", get(briefings_due))
        .route("/v1/briefings/:briefing_id/status", post(briefing_set_status))
        .route("/v1/conversations", get(conversations_list))
        .route("/v1/conversations/:conversation_id/close", post(conversation_close))
        .route("/v1/outreach/run", post(outreach_run))
        .route("/v1/suggested-times", get(suggested_times))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let settings = SchedulerSettings::load(args.config.as_deref())?;
    let state = ServiceState { api: BriefingApi::with_settings(args.db.clone(), settings) };
    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    info!(bind = %args.bind, db = %args.db.display(), "briefing service listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn db_schema_version(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<SchemaStatus>>, ServiceError> {
    let status = run_blocking(&state, BriefingApi::schema_status).await?;
    Ok(Json(envelope(status)))
}

async fn db_migrate(
    State(state): State<ServiceState>,
    Json(request): Json<MigrateRequest>,
) -> Result<Json<ServiceEnvelope<MigrateResult>>, ServiceError> {
    let result = run_blocking(&state, move |api| api.migrate(request.dry_run)).await?;
    Ok(Json(envelope(result)))
}

async fn db_integrity(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<IntegrityReport>>, ServiceError> {
    let report = run_blocking(&state, BriefingApi::integrity_check).await?;
    Ok(Json(envelope(report)))
}

async fn tiers_list(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<Vec<InfluenceTier>>>, ServiceError> {
    let tiers = run_blocking(&state, BriefingApi::list_tiers).await?;
    Ok(Json(envelope(tiers)))
}

async fn tiers_replace(
    State(state): State<ServiceState>,
    Json(request): Json<TierSetFile>,
) -> Result<Json<ServiceEnvelope<Vec<InfluenceTier>>>, ServiceError> {
    let tiers = run_blocking(&state, move |api| api.replace_tiers(request.tiers)).await?;
    Ok(Json(envelope(tiers)))
}

async fn analysts_list(
    State(state): State<ServiceState>,
    Query(query): Query<AnalystListQuery>,
) -> Result<Json<ServiceEnvelope<Vec<Analyst>>>, ServiceError> {
    let status = match query.status.as_deref() {
        Some(raw) => Some(AnalystStatus::parse(raw).ok_or_else(|| {
            ServiceError::bad_request(format!("unknown analyst status `{raw}`"))
        })?),
        None => None,
    };
    let analysts = run_blocking(&state, move |api| api.list_analysts(status)).await?;
    Ok(Json(envelope(analysts)))
}

async fn analysts_add(
    State(state): State<ServiceState>,
    Json(request): Json<AddAnalystRequest>,
) -> Result<Json<ServiceEnvelope<Analyst>>, ServiceError> {
    let analyst = run_blocking(&state, move |api| api.add_analyst(request)).await?;
    Ok(Json(envelope(analyst)))
}

async fn analyst_set_status(
    State(state): State<ServiceState>,
    Path(analyst_id): Path<String>,
    Json(request): Json<AnalystStatusRequest>,
) -> Result<Json<ServiceEnvelope<Analyst>>, ServiceError> {
    let analyst_id = parse_analyst_id(&analyst_id)?;
    let status = AnalystStatus::parse(&request.status).ok_or_else(|| {
        ServiceError::bad_request(format!("unknown analyst status `{}`", request.status))
    })?;
    let analyst =
        run_blocking(&state, move |api| api.set_analyst_status(analyst_id, status)).await?;
    Ok(Json(envelope(analyst)))
}

async fn analyst_set_influence(
    State(state): State<ServiceState>,
    Path(analyst_id): Path<String>,
    Json(request): Json<AnalystInfluenceRequest>,
) -> Result<Json<ServiceEnvelope<Analyst>>, ServiceError> {
    let analyst_id = parse_analyst_id(&analyst_id)?;
    let influence = Influence::parse(&request.influence).ok_or_else(|| {
        ServiceError::bad_request(format!("unknown influence `{}`", request.influence))
    })?;
    let analyst =
        run_blocking(&state, move |api| api.set_analyst_influence(analyst_id, influence)).await?;
    Ok(Json(envelope(analyst)))
}

async fn analyst_briefings(
    State(state): State<ServiceState>,
    Path(analyst_id): Path<String>,
) -> Result<Json<ServiceEnvelope<Vec<Briefing>>>, ServiceError> {
    let analyst_id = parse_analyst_id(&analyst_id)?;
    let briefings =
        run_blocking(&state, move |api| api.list_briefings_for_analyst(analyst_id)).await?;
    Ok(Json(envelope(briefings)))
}

async fn briefings_add(
    State(state): State<ServiceState>,
    Json(request): Json<AddBriefingRequest>,
) -> Result<Json<ServiceEnvelope<Briefing>>, ServiceError> {
    let briefing = run_blocking(&state, move |api| api.add_briefing(request)).await?;
    Ok(Json(envelope(briefing)))
}

async fn briefing_set_status(
    State(state): State<ServiceState>,
    Path(briefing_id): Path<String>,
    Json(transition): Json<BriefingTransition>,
) -> Result<Json<ServiceEnvelope<Briefing>>, ServiceError> {
    let briefing_id =
        BriefingId::parse(&briefing_id).map_err(|err| ServiceError::bad_request(err.to_string()))?;
    let briefing =
        run_blocking(&state, move |api| api.set_briefing_status(briefing_id, transition)).await?;
    Ok(Json(envelope(briefing)))
}

async fn briefings_due(
    State(state): State<ServiceState>,
    Query(query): Query<DueQuery>,
) -> Result<Json<ServiceEnvelope<DuePage>>, ServiceError> {
    let listing = run_blocking(&state, move |api| api.briefings_due(query)).await?;
    let mut body = envelope(DuePage {
        snapshot_id: listing.snapshot_id,
        items: listing.items,
        skipped: listing.skipped,
    });
    body.pagination = Some(listing.pagination);
    body.filters = Some(listing.filters);
    Ok(Json(body))
}

async fn conversations_list(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<Vec<SchedulingConversation>>>, ServiceError> {
    let conversations = run_blocking(&state, BriefingApi::list_active_conversations).await?;
    Ok(Json(envelope(conversations)))
}

async fn conversation_close(
    State(state): State<ServiceState>,
    Path(conversation_id): Path<String>,
) -> Result<Json<ServiceEnvelope<SchedulingConversation>>, ServiceError> {
    let conversation_id = ConversationId::parse(&conversation_id)
        .map_err(|err| ServiceError::bad_request(err.to_string()))?;
    let conversation =
        run_blocking(&state, move |api| api.close_conversation(conversation_id, None)).await?;
    Ok(Json(envelope(conversation)))
}

async fn outreach_run(
    State(state): State<ServiceState>,
    request: Option<Json<AsOfRequest>>,
) -> Result<Json<ServiceEnvelope<OutreachSummary>>, ServiceError> {
    let as_of = request.and_then(|Json(request)| request.as_of);
    let summary = run_blocking(&state, move |api| api.run_outreach(as_of)).await?;
    Ok(Json(envelope(summary)))
}

async fn suggested_times(
    State(state): State<ServiceState>,
    Query(query): Query<AsOfQuery>,
) -> Result<Json<ServiceEnvelope<Vec<SuggestedTime>>>, ServiceError> {
    let slots = run_blocking(&state, move |api| api.suggested_times(query.as_of)).await?;
    Ok(Json(envelope(slots)))
}
