//! GET /schedules - live schedule entries, soonest first.

use axum::{extract::State, response::Json, routing::get, Router};

use crate::api::error::ApiResult;
use crate::api::ApiState;
use crate::scheduler::ScheduleEntry;

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(list_schedules))
        .with_state(state)
}

async fn list_schedules(State(state): State<ApiState>) -> ApiResult<Json<Vec<ScheduleEntry>>> {
    let entries = state.triggers.list().await?;
    Ok(Json(entries))
}
