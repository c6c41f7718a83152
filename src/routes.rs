use std::sync::Arc;

use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::middleware;
use axum::routing::{get, post, MethodRouter};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};

use crate::auth::require_bearer;
use crate::config::AuthConfig;
use crate::error::{ApiResponse, AppError, QueryContext};
use crate::models::Program;
use crate::notifications::{Activity, ImportantDate, NotificationFeed};
use crate::overview::{CourseOverview, OverviewBuilder, OverviewFilter, SampleSummary};
use crate::programs::ProgramProfiles;
use crate::query::{QueryExecutor, Row};
use crate::report::{HomeSummary, ReportAssembler};
use crate::{applicants, schedule};

/// Shared handles cloned into every request.
#[derive(Clone)]
pub struct AppState {
    pub executor: QueryExecutor,
    pub reports: ReportAssembler,
    pub overview: OverviewBuilder,
    pub notifications: NotificationFeed,
    pub auth: Arc<AuthConfig>,
}

impl AppState {
    pub fn new(executor: QueryExecutor, profiles: ProgramProfiles, auth: AuthConfig) -> Self {
        Self {
            reports: ReportAssembler::new(executor.clone(), profiles),
            overview: OverviewBuilder::new(executor.clone()),
            notifications: NotificationFeed::new(executor.clone()),
            executor,
            auth: Arc::new(auth),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .nest("/dashboard", dashboard_router())
        .nest("/notifications", notifications_router())
        .nest("/applicants", applicants::router())
        .nest("/schedule", schedule::router())
        .layer(middleware::from_fn_with_state(state.auth.clone(), require_bearer));

    Router::new()
        .route("/health", get(healthcheck))
        .nest("/api", api)
        .with_state(state)
}

fn dashboard_router() -> Router<AppState> {
    Router::new()
        .route("/", get(dashboard_status))
        .route("/overview", get(overview))
        .route("/pgp-summary", summary_route(Program::Pgp))
        .route("/phd-summary", summary_route(Program::Phd))
        .route("/ephd-summary", summary_route(Program::Ephd))
        .route("/emba-summary", summary_route(Program::Emba))
        .route("/reports/:program", get(program_report))
        .route("/home-summary", get(home_summary))
        .route("/phase/:course_code/:phase_name", get(phase_progress))
        .route("/courses/:course_id/phases/:phase_id/progress", get(course_phase_progress))
        .route("/init-sample-data", post(init_sample_data))
}

fn notifications_router() -> Router<AppState> {
    Router::new()
        .route("/recent-activities", get(recent_activities))
        .route("/important-dates", get(important_dates))
}

async fn healthcheck() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn dashboard_status() -> &'static str {
    "Dashboard API is running"
}

async fn overview(
    State(state): State<AppState>,
    query: Result<Query<OverviewFilter>, QueryRejection>,
) -> Result<Json<ApiResponse<Vec<CourseOverview>>>, AppError> {
    let Query(filter) = query?;
    let courses = state
        .overview
        .overview(&filter)
        .await
        .context("Error fetching dashboard data")?;
    Ok(Json(ApiResponse::ok(courses)))
}

fn summary_route(program: Program) -> MethodRouter<AppState> {
    get(move |State(state): State<AppState>| async move { program_summary(&state, program).await })
}

async fn program_summary(state: &AppState, program: Program) -> Json<ApiResponse<Value>> {
    let report = state.reports.build(program).await;
    Json(ApiResponse::ok(report.data))
}

/// Unknown program names are rejected with a 400.
async fn program_report(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let Path(program) = path?;
    let program: Program = program.parse()?;
    Ok(program_summary(&state, program).await)
}

async fn home_summary(State(state): State<AppState>) -> Json<ApiResponse<HomeSummary>> {
    Json(ApiResponse::ok(state.reports.home_summary().await))
}

async fn phase_progress(
    State(state): State<AppState>,
    path: Result<Path<(String, String)>, PathRejection>,
) -> Result<Json<ApiResponse<Vec<Row>>>, AppError> {
    let Path((course_code, phase_name)) = path?;
    let rows = state
        .overview
        .phase_progress(&course_code, &phase_name)
        .await
        .context("Error fetching phase progress data")?;
    Ok(Json(ApiResponse::ok(rows)))
}

async fn course_phase_progress(
    State(state): State<AppState>,
    path: Result<Path<(i64, i64)>, PathRejection>,
) -> Result<Json<ApiResponse<Vec<Row>>>, AppError> {
    let Path((course_id, phase_id)) = path?;
    let rows = state
        .overview
        .phase_progress_by_id(course_id, phase_id)
        .await
        .context("Error fetching phase progress data")?;
    Ok(Json(ApiResponse::ok(rows)))
}

async fn init_sample_data(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<SampleSummary>>, AppError> {
    let summary = state
        .overview
        .init_sample_data()
        .await
        .context("Error initializing data")?;
    Ok(Json(
        ApiResponse::ok(summary).with_message("Sample data initialized with enrollments and phase progress"),
    ))
}

async fn recent_activities(State(state): State<AppState>) -> Json<ApiResponse<Vec<Activity>>> {
    let now = Utc::now().naive_utc();
    Json(ApiResponse::ok(state.notifications.recent_activities(now).await))
}

async fn important_dates(State(state): State<AppState>) -> Json<ApiResponse<Vec<ImportantDate>>> {
    Json(ApiResponse::ok(state.notifications.important_dates().await))
}

#[cfg(test)]
pub(crate) mod testing {
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request};
    use axum::response::Response;
    use tower::ServiceExt;

    use super::*;

    pub(crate) fn state_with(executor: QueryExecutor) -> AppState {
        AppState::new(executor, ProgramProfiles::default(), AuthConfig::default())
    }

    pub(crate) async fn send(router: Router, method: Method, uri: &str, body: Option<Value>) -> Response {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        };
        router
            .oneshot(request.expect("request builds"))
            .await
            .expect("router is infallible")
    }

    pub(crate) async fn read_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body readable");
        serde_json::from_slice(&bytes).expect("body is JSON")
    }
}
