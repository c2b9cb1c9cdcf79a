//! HTTP endpoint for the invite change feed.
//!
//! Provides HTTP endpoints for:
//! - Applying invite change events through the reconciler
//! - Listing live schedule entries

pub mod error;
pub mod routes;

use anyhow::{Context, Result};
use axum::{response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tracing::info;

use crate::config::ApiConfig;
use crate::scheduler::{ScheduleReconciler, TriggerBackend};

#[derive(Clone)]
pub struct ApiState {
    pub reconciler: Arc<ScheduleReconciler>,
    pub triggers: Arc<dyn TriggerBackend>,
}

pub struct ApiServer {
    host: String,
    port: u16,
    state: ApiState,
}

impl ApiServer {
    pub fn new(config: &ApiConfig, state: ApiState) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            state,
        }
    }

    pub fn router(state: ApiState) -> Router {
        Router::new()
            .route("/", get(status))
            .nest("/events", routes::events::router(state.clone()))
            .nest("/schedules", routes::schedules::router(state))
            .layer(ServiceBuilder::new())
    }

    pub async fn start(self, cancel: CancellationToken) -> Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind API server to {}", addr))?;

        info!("API server listening on http://{}", addr);
        info!("Endpoints:");
        info!("  GET  /              - Service info");
        info!("  POST /events        - Apply an invite change event");
        info!("  GET  /schedules     - List schedule entries");

        axum::serve(listener, Self::router(self.state))
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await?;

        Ok(())
    }
}

async fn status() -> Json<Value> {
    Json(json!({
        "service": "scribe",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::invite::{ChangeOperation, Invite, InviteChangeEvent, Platform};
    use crate::scheduler::{RetryPolicy, SqliteTriggerBackend};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn router() -> Router {
        let triggers = Arc::new(SqliteTriggerBackend::new(db::in_memory().unwrap()));
        let reconciler = Arc::new(ScheduleReconciler::new(
            triggers.clone(),
            RetryPolicy::immediate(3),
            10,
            "Scribe",
        ));
        ApiServer::router(ApiState {
            reconciler,
            triggers,
        })
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn post_event(event: &InviteChangeEvent) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/events")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(event).unwrap()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let (status, body) = send(&router(), get("/")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "scribe");
    }

    #[tokio::test]
    async fn test_events_schedule_and_unschedule() {
        let router = router();
        let mut invite = Invite::new("Standup", Platform::Chime, "1234567890", None);
        let insert = InviteChangeEvent::from_invite(ChangeOperation::Insert, &invite);

        let (status, body) = send(&router, post_event(&insert)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"], "scheduled");
        assert_eq!(body["inviteId"], invite.id.as_str());

        let (_, body) = send(&router, post_event(&insert)).await;
        assert_eq!(body["result"], "skipped");
        assert_eq!(body["reason"], "duplicate");

        let (status, body) = send(&router, get("/schedules")).await;
        assert_eq!(status, StatusCode::OK);
        let entries = body.as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["target"]["meetingId"], "1234567890");

        invite.updated_at += 1;
        let remove = InviteChangeEvent::from_invite(ChangeOperation::Remove, &invite);
        let (_, body) = send(&router, post_event(&remove)).await;
        assert_eq!(body["result"], "unscheduled");
        assert_eq!(body["existed"], true);

        let (_, body) = send(&router, get("/schedules")).await;
        assert!(body.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_event_is_rejected() {
        let request = Request::builder()
            .method("POST")
            .uri("/events")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"operation":"INSERT"}"#))
            .unwrap();
        let response = router().oneshot(request).await.unwrap();
        assert!(response.status().is_client_error());
    }
}
