use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path as AxumPath, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use contextdoc_core::{GenerationRecord, GenerationStatus, InputRecord, RecordKey};
use contextdoc_pipeline::{
    run_blocking, GenerationRequest, PipelineError, ProgressEvent, RecordReporter, StreamReporter,
    Submission,
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::AppError;
use crate::AppState;

const USER_HEADER: &str = "x-user-id";
const EVENT_BUFFER: usize = 64;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/generate", post(handle_generate))
        .route("/triggers/submissions", post(handle_submission_trigger))
        .route("/generations/:wizard_id", get(handle_get_generation))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateBody {
    wizard_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmissionTrigger {
    user_id: String,
    wizard_id: String,
    document_type: Option<String>,
    inputs: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TriggerAccepted {
    user_id: String,
    wizard_id: String,
    status: GenerationStatus,
}

/// Streams progress of a generation over server-sent events.
///
/// Re-entry and quota are checked up front so those answers keep their HTTP
/// status; everything after that arrives as events. Dropping the response
/// stream cancels the run.
async fn handle_generate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<GenerateBody>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let key = RecordKey::new(user_id(&headers)?, body.wizard_id);
    let submission = load_submission(&state, &key).await?;
    ensure_not_started(&state, &key).await?;
    state.pipeline.gate().authorize(&key.owner_id).await?;

    let (reporter, rx) = StreamReporter::channel(EVENT_BUFFER);
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let pipeline = state.pipeline.clone();
    let request = GenerationRequest {
        key,
        document_type: submission.document_type,
        input: submission.input,
    };
    tokio::spawn(async move {
        if let Err(err) = pipeline.run(request, &reporter, &cancel).await {
            warn!(error = %err, "streamed generation failed");
        }
    });

    let events = stream::unfold((rx, guard), |(mut rx, guard)| async move {
        let event = rx.recv().await?;
        Some((Ok(sse_event(&event)), (rx, guard)))
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// Accepts a stored-submission trigger and runs it in the background; the
/// record carries the progress. A record that already left `pending` is
/// answered with 409 and its submission is left untouched.
async fn handle_submission_trigger(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SubmissionTrigger>,
) -> Result<(StatusCode, Json<TriggerAccepted>), AppError> {
    if body.user_id.trim().is_empty() || body.wizard_id.trim().is_empty() {
        return Err(AppError::bad_request("userId and wizardId are required"));
    }
    let input = InputRecord::from_json(body.inputs)?;
    let key = RecordKey::new(body.user_id, body.wizard_id);
    ensure_not_started(&state, &key).await?;
    let submission = Submission {
        document_type: body.document_type,
        input,
    };
    let (save_key, saved) = (key.clone(), submission.clone());
    run_blocking(&state.submissions, move |submissions| {
        submissions.save_submission(&save_key, &saved)
    })
    .await?;

    let pipeline = state.pipeline.clone();
    let reporter = RecordReporter::new(pipeline.records().clone(), key.clone());
    let request = GenerationRequest {
        key: key.clone(),
        document_type: submission.document_type,
        input: submission.input,
    };
    tokio::spawn(async move {
        match pipeline
            .run(request, &reporter, &CancellationToken::new())
            .await
        {
            Ok(record) => info!(key = %record.key, status = %record.status, "triggered generation done"),
            Err(err) => warn!(error = %err, "triggered generation failed"),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerAccepted {
            user_id: key.owner_id,
            wizard_id: key.wizard_id,
            status: GenerationStatus::Pending,
        }),
    ))
}

async fn handle_get_generation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath(wizard_id): AxumPath<String>,
) -> Result<Json<GenerationRecord>, AppError> {
    let key = RecordKey::new(user_id(&headers)?, wizard_id);
    let lookup = key.clone();
    let record = run_blocking(state.pipeline.records(), move |records| records.get(&lookup))
        .await?
        .ok_or_else(|| AppError::not_found(format!("no generation for {key}")))?;
    Ok(Json(record))
}

fn user_id(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::bad_request(format!("missing {USER_HEADER} header")))
}

async fn load_submission(state: &AppState, key: &RecordKey) -> Result<Submission, AppError> {
    let lookup = key.clone();
    run_blocking(&state.submissions, move |submissions| {
        submissions.load_submission(&lookup)
    })
    .await?
    .ok_or_else(|| AppError::not_found(format!("no submission for {key}")))
}

/// Refuses keys whose record is already processing or finished.
async fn ensure_not_started(state: &AppState, key: &RecordKey) -> Result<(), AppError> {
    let lookup = key.clone();
    let existing =
        run_blocking(state.pipeline.records(), move |records| records.get(&lookup)).await?;
    match existing {
        Some(record) if record.status != GenerationStatus::Pending => {
            Err(PipelineError::AlreadyStarted {
                key: key.clone(),
                status: record.status,
            }
            .into())
        }
        _ => Ok(()),
    }
}

fn sse_event(event: &ProgressEvent) -> Event {
    Event::default()
        .event(event.name())
        .json_data(event)
        .unwrap_or_else(|err| Event::default().event("error").data(err.to_string()))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use axum::http::HeaderValue;
    use chrono::Utc;
    use contextdoc_core::UsageLedger;
    use contextdoc_llm::LlmClient;
    use contextdoc_pipeline::{MemoryStore, Pipeline, PipelineConfig, RecordStore, SubmissionStore};

    fn app_state() -> (Arc<MemoryStore>, Arc<AppState>) {
        let store = Arc::new(MemoryStore::new());
        store.upsert_ledger(UsageLedger {
            user_id: "u1".to_string(),
            active: true,
            expires_at: None,
            token_count: 0,
            monthly_token_allowance: 100_000,
            documents_generated: 0,
            document_limit: 5,
            reset_date: Utc::now() + chrono::Duration::days(3),
        });
        let pipeline = Pipeline::new(
            PipelineConfig::default(),
            Arc::new(LlmClient::local()),
            store.clone(),
            store.clone(),
        );
        let state = Arc::new(AppState {
            pipeline: Arc::new(pipeline),
            submissions: store.clone(),
        });
        (store, state)
    }

    fn trigger(document_type: &str) -> SubmissionTrigger {
        SubmissionTrigger {
            user_id: "u1".to_string(),
            wizard_id: "w1".to_string(),
            document_type: Some(document_type.to_string()),
            inputs: serde_json::json!({ "brandName": "Acme", "voice": "warm and direct" }),
        }
    }

    async fn wait_for_terminal(store: &MemoryStore, key: &RecordKey) -> GenerationRecord {
        for _ in 0..200 {
            if let Some(record) = store.get(key).unwrap() {
                if record.status.is_terminal() {
                    return record;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("generation for {key} never finished");
    }

    #[tokio::test]
    async fn trigger_runs_generation_in_background() {
        let (store, state) = app_state();
        let (status, Json(accepted)) =
            handle_submission_trigger(State(state), Json(trigger("styleGuide")))
                .await
                .unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(accepted.status, GenerationStatus::Pending);

        let record = wait_for_terminal(&store, &RecordKey::new("u1", "w1")).await;
        assert_eq!(record.status, GenerationStatus::Complete);
        assert!(!record.generated_content.is_empty());
    }

    #[tokio::test]
    async fn trigger_for_finished_record_is_refused() {
        let (store, state) = app_state();
        handle_submission_trigger(State(state.clone()), Json(trigger("styleGuide")))
            .await
            .unwrap();
        let key = RecordKey::new("u1", "w1");
        let finished = wait_for_terminal(&store, &key).await;
        let original = store.load_submission(&key).unwrap();

        let err = handle_submission_trigger(State(state), Json(trigger("personalBio")))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(store.load_submission(&key).unwrap(), original);
        let after = store.get(&key).unwrap().unwrap();
        assert_eq!(after.status, finished.status);
        assert_eq!(after.generated_content, finished.generated_content);
    }

    #[tokio::test]
    async fn polling_unknown_generation_is_not_found() {
        let (_, state) = app_state();
        let mut headers = HeaderMap::new();
        headers.insert(USER_HEADER, HeaderValue::from_static("u1"));
        let err = handle_get_generation(State(state), headers, AxumPath("missing".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn user_header_is_required() {
        let mut headers = HeaderMap::new();
        assert!(matches!(user_id(&headers), Err(AppError::BadRequest(_))));
        headers.insert(USER_HEADER, HeaderValue::from_static("  "));
        assert!(user_id(&headers).is_err());
        headers.insert(USER_HEADER, HeaderValue::from_static("user-7"));
        assert_eq!(user_id(&headers).unwrap(), "user-7");
    }

    #[test]
    fn trigger_body_uses_camel_case() {
        let body: SubmissionTrigger = serde_json::from_value(serde_json::json!({
            "userId": "u1",
            "wizardId": "w1",
            "documentType": "styleGuide",
            "inputs": { "brand": { "voice": "warm" } }
        }))
        .unwrap();
        assert_eq!(body.wizard_id, "w1");
        assert_eq!(body.document_type.as_deref(), Some("styleGuide"));
        let input = InputRecord::from_json(body.inputs).unwrap();
        assert_eq!(input.get("brand.voice"), Some("warm"));
    }
}
