//! # API Handlers
//!
//! REST surface: buffered query execution, event ingestion, store status.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use dg_core::{EventKind, EventRecord};
use dg_query::{status, CollectingSink, QueryArgument, QueryRule};

use crate::AppState;

// =============================================================================
// Query
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub argument: QueryArgument,
    #[serde(default)]
    pub rules: Vec<QueryRule>,
}

#[derive(Serialize)]
pub struct Batch {
    pub events: Vec<String>,
    pub seqs: Vec<i64>,
}

#[derive(Serialize)]
pub struct QueryResponse {
    pub query_id: String,
    pub status: i32,
    pub total: i64,
    pub ignored: i64,
    pub max_seq: i64,
    pub batches: Vec<Batch>,
}

pub async fn execute_query(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QueryRequest>,
) -> Result<(StatusCode, Json<QueryResponse>), (StatusCode, String)> {
    let query_id = Uuid::new_v4().to_string();
    tracing::info!(query_id, rules = request.rules.len(), "query accepted");

    let worker_state = state.clone();
    let (report, sink) = tokio::task::spawn_blocking(move || {
        let mut sink = CollectingSink::new();
        let report = worker_state.engine.run(
            &*worker_state.store,
            &request.argument,
            &request.rules,
            &mut sink,
        );
        (report, sink)
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let http = match report.status {
        status::OK => StatusCode::OK,
        status::STORE_FAILURE => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    };
    let batches = sink
        .batches
        .into_iter()
        .map(|(events, seqs)| Batch { events, seqs })
        .collect();
    Ok((
        http,
        Json(QueryResponse {
            query_id,
            status: report.status,
            total: report.transported,
            ignored: report.ignored,
            max_seq: report.max_seq,
            batches,
        }),
    ))
}

// =============================================================================
// Ingestion
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct IngestEvent {
    pub domain: String,
    pub name: String,
    pub event_type: u32,
    /// Milliseconds since the epoch; defaults to now.
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub seqs: Vec<i64>,
}

/// Appends are not transactional across a batch; when one event fails,
/// everything before it has already landed. The error body carries the
/// sequences assigned so far so callers can tell what was stored.
#[derive(Debug, Serialize)]
pub struct IngestError {
    pub error: String,
    pub seqs: Vec<i64>,
}

pub async fn ingest_events(
    State(state): State<Arc<AppState>>,
    Json(events): Json<Vec<IngestEvent>>,
) -> Result<Json<IngestResponse>, (StatusCode, Json<IngestError>)> {
    let mut seqs = Vec::with_capacity(events.len());
    for event in events {
        let Some(kind) = EventKind::from_u32(event.event_type) else {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(IngestError {
                    error: format!("unknown event type {}", event.event_type),
                    seqs,
                }),
            ));
        };
        let time = event
            .time
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
        let mut record = EventRecord::new(event.domain, event.name, kind, time);
        record.params = event.params;
        match state.store.append(record) {
            Ok(seq) => seqs.push(seq),
            Err(error) => {
                return Err((
                    StatusCode::BAD_REQUEST,
                    Json(IngestError {
                        error: error.to_string(),
                        seqs,
                    }),
                ));
            }
        }
    }
    Ok(Json(IngestResponse { seqs }))
}

// =============================================================================
// Status
// =============================================================================

#[derive(Serialize)]
pub struct PartitionStat {
    pub kind: String,
    pub count: usize,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub max_seq: i64,
    pub partitions: Vec<PartitionStat>,
    pub transport_bytes: usize,
    pub page_cap: usize,
    pub max_rules: usize,
    pub cached_filters: usize,
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let partitions = state
        .store
        .counts()
        .into_iter()
        .map(|(kind, count)| PartitionStat {
            kind: kind.name().to_string(),
            count,
        })
        .collect();
    let limits = state.engine.limits();
    Json(StatusResponse {
        uptime_secs: state.start_time.elapsed().as_secs(),
        max_seq: state.store.max_seq(),
        partitions,
        transport_bytes: limits.transport_bytes,
        page_cap: limits.page_cap,
        max_rules: limits.max_rules,
        cached_filters: state.engine.parser().cache_len(),
    })
}
