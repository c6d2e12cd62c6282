//! Route handlers.

use super::error::ApiError;
use super::AppState;
use crate::analysis::{aggregate, summarize};
use crate::models::{
    new_run_id, AggregatedResult, Question, RunContext, RunStage, RunStatus, VisibilityAnswer,
    VisibilitySummary,
};
use crate::probe::ProbeRequest;
use crate::workflow::questions::id_is_usable;
use crate::workflow::DispatchMode;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextBody {
    pub run_id: Option<String>,
    pub brand: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ContextResponse {
    pub success: bool,
    pub context: RunContext,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionsBody {
    pub run_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QuestionsResponse {
    pub success: bool,
    pub questions: Vec<Question>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeBody {
    pub run_id: Option<String>,
    pub question_id: Option<String>,
    pub question: Option<String>,
    pub model: Option<String>,
    pub run: Option<i64>,
    pub brand: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProbeResponse {
    pub success: bool,
    pub answer: VisibilityAnswer,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunQuery {
    pub run_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRunBody {
    pub brand: Option<String>,
    pub run_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRunResponse {
    pub success: bool,
    pub run_id: String,
    pub brand: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsResponse {
    pub run_id: String,
    pub status: RunStage,
    pub results: Vec<AggregatedResult>,
    pub summary: VisibilitySummary,
}

/// Trimmed value of a required field, or a 400 naming it.
fn required(value: Option<String>, field: &str) -> Result<String, ApiError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("Missing required field: {}", field)))
}

/// A required field that becomes part of a store key.
fn key_segment(value: Option<String>, field: &str) -> Result<String, ApiError> {
    let value = required(value, field)?;
    if !id_is_usable(&value) {
        return Err(ApiError::BadRequest(format!(
            "{} must not contain ':' or whitespace: {}",
            field, value
        )));
    }
    Ok(value)
}

pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn create_context(
    State(state): State<AppState>,
    body: Result<Json<ContextBody>, JsonRejection>,
) -> Result<Json<ContextResponse>, ApiError> {
    let Json(body) = body?;
    let run_id = key_segment(body.run_id, "runId")?;
    let brand = required(body.brand, "brand")?;

    let context = state.workflow.create_context(&run_id, &brand).await?;
    Ok(Json(ContextResponse {
        success: true,
        context,
    }))
}

pub async fn generate_questions(
    State(state): State<AppState>,
    body: Result<Json<QuestionsBody>, JsonRejection>,
) -> Result<Json<QuestionsResponse>, ApiError> {
    let Json(body) = body?;
    let run_id = key_segment(body.run_id, "runId")?;

    let questions = state.workflow.generate_questions(&run_id).await?;
    Ok(Json(QuestionsResponse {
        success: true,
        questions,
    }))
}

/// Run one probe. Collaborator failures still answer 200 with a failed
/// record; only a failed store write is a 500.
pub async fn probe(
    State(state): State<AppState>,
    body: Result<Json<ProbeBody>, JsonRejection>,
) -> Result<Json<ProbeResponse>, ApiError> {
    let Json(body) = body?;
    let run = match body.run {
        Some(run) if run >= 1 => u32::try_from(run)
            .map_err(|_| ApiError::BadRequest(format!("run out of range: {}", run)))?,
        Some(run) => {
            return Err(ApiError::BadRequest(format!(
                "run must be at least 1, got {}",
                run
            )))
        }
        None => return Err(ApiError::BadRequest("Missing required field: run".to_string())),
    };

    let request = ProbeRequest {
        run_id: key_segment(body.run_id, "runId")?,
        question_id: key_segment(body.question_id, "questionId")?,
        question: required(body.question, "question")?,
        model: required(body.model, "model")?,
        run,
        brand: required(body.brand, "brand")?,
    };

    let answer = state.workflow.executor().try_probe(&request).await?;
    Ok(Json(ProbeResponse {
        success: true,
        answer,
    }))
}

pub async fn status(
    State(state): State<AppState>,
    query: Result<Query<RunQuery>, QueryRejection>,
) -> Result<Json<RunStatus>, ApiError> {
    let Query(query) = query?;
    let run_id = required(query.run_id, "runId")?;

    Ok(Json(state.status.read_status(&run_id).await?))
}

/// Aggregated per (question, model) results of a run so far.
pub async fn results(
    State(state): State<AppState>,
    query: Result<Query<RunQuery>, QueryRejection>,
) -> Result<Json<ResultsResponse>, ApiError> {
    let Query(query) = query?;
    let run_id = required(query.run_id, "runId")?;

    let status = state.status.read_status(&run_id).await?;
    let results = aggregate(&status, &state.workflow.settings().models);
    let summary = summarize(&status.answers);

    Ok(Json(ResultsResponse {
        run_id,
        status: status.status,
        results,
        summary,
    }))
}

/// Start a full run in the background and return its id at once.
pub async fn start_run(
    State(state): State<AppState>,
    body: Result<Json<StartRunBody>, JsonRejection>,
) -> Result<Json<StartRunResponse>, ApiError> {
    let Json(body) = body?;
    let brand = required(body.brand, "brand")?;
    let run_id = match body.run_id.filter(|id| !id.trim().is_empty()) {
        Some(id) => key_segment(Some(id), "runId")?,
        None => new_run_id(),
    };

    info!("Starting background run {} for \"{}\"", run_id, brand);

    let workflow = state.workflow.clone();
    let (task_run_id, task_brand) = (run_id.clone(), brand.clone());
    tokio::spawn(async move {
        if let Err(e) = workflow
            .run_full(&task_run_id, &task_brand, DispatchMode::Detached)
            .await
        {
            error!("Background run {} failed: {}", task_run_id, e);
        }
    });

    Ok(Json(StartRunResponse {
        success: true,
        message: format!("Brand visibility check started for {}", brand),
        run_id,
        brand,
    }))
}
