//! POST /events - apply one invite change event.

use axum::{extract::State, response::Json, routing::post, Router};
use serde_json::{json, Value};
use tracing::info;

use crate::api::error::ApiResult;
use crate::api::ApiState;
use crate::invite::InviteChangeEvent;
use crate::scheduler::{ReconcileOutcome, SkipReason};

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", post(apply_event))
        .with_state(state)
}

async fn apply_event(
    State(state): State<ApiState>,
    Json(event): Json<InviteChangeEvent>,
) -> ApiResult<Json<Value>> {
    info!(
        invite_id = %event.invite_id,
        "Change event received: {:?}",
        event.operation
    );
    let outcome = state.reconciler.apply(&event).await?;
    Ok(Json(outcome_json(&event.invite_id, &outcome)))
}

pub fn outcome_json(invite_id: &str, outcome: &ReconcileOutcome) -> Value {
    match outcome {
        ReconcileOutcome::Scheduled { fires_at } => json!({
            "inviteId": invite_id,
            "result": "scheduled",
            "firesAt": fires_at,
        }),
        ReconcileOutcome::Unscheduled { existed } => json!({
            "inviteId": invite_id,
            "result": "unscheduled",
            "existed": existed,
        }),
        ReconcileOutcome::Skipped(reason) => json!({
            "inviteId": invite_id,
            "result": "skipped",
            "reason": match reason {
                SkipReason::Duplicate => "duplicate",
                SkipReason::Stale => "stale",
                SkipReason::Removed => "removed",
            },
        }),
    }
}
