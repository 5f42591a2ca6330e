use crate::error::ElectionError;
use crate::models::TieResolution;
use crate::results::{LiveSnapshot, OfficialReport, ResultsService};
use crate::voting::{EventStatistics, Standing};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::error;
use serde::{Deserialize, Serialize};

pub fn router(service: ResultsService) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/positions/{position_id}/standing", get(get_standing))
        .route("/positions/{position_id}/tie-resolution", post(resolve_tie))
        .route("/events/{event_id}/statistics", get(get_statistics))
        .route("/events/{event_id}/live", get(live))
        .route("/events/{event_id}/report", get(report))
        .with_state(service)
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

/// Maps core errors onto HTTP status codes.
pub struct ApiError(ElectionError);

impl From<ElectionError> for ApiError {
    fn from(e: ElectionError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ElectionError::NotFound(_) => StatusCode::NOT_FOUND,
            ElectionError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ElectionError::Conflict(_) => StatusCode::CONFLICT,
            ElectionError::Database(_) | ElectionError::Integrity(_) => {
                error!("Request failed: {}", self.0);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = ErrorBody {
            error: self.0.kind(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

async fn health() -> &'static str {
    "ok"
}

pub async fn get_standing(
    State(service): State<ResultsService>,
    Path(position_id): Path<String>,
) -> ApiResult<Standing> {
    Ok(Json(service.get_standing(&position_id).await?))
}

pub async fn get_statistics(
    State(service): State<ResultsService>,
    Path(event_id): Path<String>,
) -> ApiResult<EventStatistics> {
    Ok(Json(service.get_statistics(&event_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct ResolveTieRequest {
    pub candidate_id: String,
}

/// A body that does not parse as `ResolveTieRequest` is a validation error.
pub async fn resolve_tie(
    State(service): State<ResultsService>,
    Path(position_id): Path<String>,
    payload: Result<Json<ResolveTieRequest>, JsonRejection>,
) -> ApiResult<TieResolution> {
    let Json(request) =
        payload.map_err(|rejection| ElectionError::Validation(rejection.body_text()))?;
    Ok(Json(service.resolve_tie(&position_id, &request.candidate_id).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct LiveQuery {
    /// Comma-separated position ids; all positions of the event when absent.
    pub positions: Option<String>,
}

impl LiveQuery {
    fn position_ids(&self) -> Vec<String> {
        self.positions
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect()
    }
}

pub async fn live(
    State(service): State<ResultsService>,
    Path(event_id): Path<String>,
    Query(query): Query<LiveQuery>,
) -> ApiResult<LiveSnapshot> {
    Ok(Json(service.live_snapshot(&event_id, &query.position_ids()).await?))
}

pub async fn report(
    State(service): State<ResultsService>,
    Path(event_id): Path<String>,
) -> ApiResult<OfficialReport> {
    Ok(Json(service.official_report(&event_id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Branding;
    use crate::db::tests::{cast, seeded};
    use axum::body::{Body, to_bytes};
    use axum::extract::FromRequest;
    use axum::http::Request;
    use std::sync::Arc;

    #[test]
    fn live_query_splits_position_ids() {
        let query = LiveQuery {
            positions: Some("a, b,,c".to_string()),
        };
        assert_eq!(query.position_ids(), vec!["a", "b", "c"]);
        assert!(LiveQuery::default().position_ids().is_empty());
    }

    #[test]
    fn errors_map_to_status_codes() {
        let cases = [
            (ElectionError::NotFound("position x".into()), StatusCode::NOT_FOUND),
            (ElectionError::Validation("bad".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (ElectionError::Conflict("taken".into()), StatusCode::CONFLICT),
            (ElectionError::Integrity("broken".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError::from(error).into_response().status(), status);
        }
    }

    #[tokio::test]
    async fn tie_resolution_endpoint_reports_conflicts() {
        let s = seeded().await;
        cast(&s.db, &s.event, &s.mayor, &[0, 1]).await;
        let service = ResultsService::new(Arc::new(s.db), Branding::default());

        let standing = get_standing(State(service.clone()), Path(s.mayor.id.clone()))
            .await
            .ok()
            .unwrap();
        assert!(standing.0.has_unresolved_tie());

        let resolved = resolve_tie(
            State(service.clone()),
            Path(s.mayor.id.clone()),
            Ok(Json(ResolveTieRequest {
                candidate_id: s.mayor.candidates[0].id.clone(),
            })),
        )
        .await
        .ok()
        .unwrap();
        assert_eq!(resolved.0.candidate_id, s.mayor.candidates[0].id);

        let conflict = resolve_tie(
            State(service.clone()),
            Path(s.mayor.id.clone()),
            Ok(Json(ResolveTieRequest {
                candidate_id: s.mayor.candidates[1].id.clone(),
            })),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(conflict.into_response().status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn missing_position_is_404() {
        let s = seeded().await;
        let service = ResultsService::new(Arc::new(s.db), Branding::default());
        let err = get_standing(State(service), Path("missing".to_string()))
            .await
            .err()
            .unwrap();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_tie_resolution_body_gets_error_json() {
        let s = seeded().await;
        let service = ResultsService::new(Arc::new(s.db), Branding::default());

        let request = Request::builder()
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from("{\"candidate\": 7"))
            .unwrap();
        let rejection = Json::<ResolveTieRequest>::from_request(request, &())
            .await
            .err()
            .unwrap();

        let response = resolve_tie(State(service), Path(s.mayor.id.clone()), Err(rejection))
            .await
            .err()
            .unwrap()
            .into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "validation");
        assert!(body["message"].as_str().is_some_and(|m| !m.is_empty()));
    }

    #[tokio::test]
    async fn live_rejects_positions_of_another_event() {
        let s = seeded().await;
        let other = crate::models::Event::new("Other".to_string());
        s.db.create_event(&other).await.unwrap();
        let service = ResultsService::new(Arc::new(s.db), Branding::default());

        let err = live(
            State(service),
            Path(other.id.clone()),
            Query(LiveQuery {
                positions: Some(s.mayor.id.clone()),
            }),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.into_response().status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
