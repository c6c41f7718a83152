use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::routing::{get, patch};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ApiResponse, AppError, QueryContext};
use crate::query::{Param, Row, RowExt};
use crate::routes::AppState;

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;

const LIST_COLUMNS: &str = "applicant_id, name, email, program_applied_for, application_status, \
     gender, source, offer_issued, fee_paid, applied_date, created_at, updated_at";

const STATS_SQL: &str = "SELECT \
     COUNT(*) AS total_applicants, \
     COUNT(CASE WHEN application_status = 'admitted' THEN 1 END) AS admitted, \
     COUNT(CASE WHEN application_status = 'under_review' THEN 1 END) AS under_review, \
     COUNT(CASE WHEN application_status = 'rejected' THEN 1 END) AS rejected, \
     COUNT(CASE WHEN offer_issued = 1 THEN 1 END) AS offers_issued, \
     COUNT(CASE WHEN fee_paid = 1 THEN 1 END) AS fees_paid, \
     COUNT(CASE WHEN program_applied_for = 'PGP' THEN 1 END) AS pgp_applicants, \
     COUNT(CASE WHEN program_applied_for = 'PhD' THEN 1 END) AS phd_applicants, \
     COUNT(CASE WHEN program_applied_for = 'EPhD' THEN 1 END) AS ephd_applicants, \
     COUNT(CASE WHEN program_applied_for = 'EMBA' THEN 1 END) AS emba_applicants \
     FROM applicants";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_applicants))
        .route("/stats/summary", get(applicant_stats))
        .route("/:id", get(get_applicant))
        .route("/:id/offer", patch(update_offer))
        .route("/:id/fee", patch(update_fee))
}

/// How a path segment addresses an applicant: all digits is the row id,
/// anything else the external applicant code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplicantKey {
    Id(i64),
    Code(String),
}

impl ApplicantKey {
    pub fn parse(raw: &str) -> Self {
        if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(id) = raw.parse() {
                return Self::Id(id);
            }
        }
        Self::Code(raw.to_string())
    }

    fn column(&self) -> &'static str {
        match self {
            Self::Id(_) => "id",
            Self::Code(_) => "applicant_id",
        }
    }

    fn param(&self) -> Param {
        match self {
            Self::Id(id) => Param::Int(*id),
            Self::Code(code) => Param::Text(code.clone()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl PageQuery {
    fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    fn limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    fn offset(&self) -> u64 {
        u64::from(self.page() - 1) * u64::from(self.limit())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub current_page: u32,
    pub total_pages: i64,
    pub total_applicants: i64,
    pub limit: u32,
}

impl Pagination {
    fn new(query: &PageQuery, total: i64) -> Self {
        let limit = query.limit();
        let per_page = i64::from(limit);
        Self {
            current_page: query.page(),
            total_pages: (total + per_page - 1) / per_page,
            total_applicants: total,
            limit,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApplicantPage {
    pub applicants: Vec<Row>,
    pub pagination: Pagination,
}

async fn list_applicants(
    State(state): State<AppState>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<ApplicantPage>>, AppError> {
    let Query(query) = query?;
    // Both bounds are clamped integers, so they are inlined rather than bound.
    let sql = format!(
        "SELECT {LIST_COLUMNS} FROM applicants ORDER BY created_at DESC LIMIT {} OFFSET {}",
        query.limit(),
        query.offset()
    );
    let applicants = state
        .executor
        .fetch_all(&sql, &[])
        .await
        .context("Error fetching applicants")?;
    let total = state
        .executor
        .fetch_one("SELECT COUNT(*) AS total FROM applicants", &[])
        .await
        .context("Error fetching applicants")?
        .map(|row| row.count("total"))
        .unwrap_or(0);

    Ok(Json(ApiResponse::ok(ApplicantPage {
        applicants,
        pagination: Pagination::new(&query, total),
    })))
}

async fn get_applicant(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
) -> Result<Json<ApiResponse<Row>>, AppError> {
    let Path(id) = path?;
    let key = ApplicantKey::parse(&id);
    let sql = format!("SELECT * FROM applicants WHERE {} = ?", key.column());
    let applicant = state
        .executor
        .fetch_one(&sql, &[key.param()])
        .await
        .context("Error fetching applicant")?
        .ok_or_else(|| AppError::not_found("Applicant not found"))?;
    Ok(Json(ApiResponse::ok(applicant)))
}

#[derive(Debug, Deserialize)]
pub struct OfferUpdate {
    pub offer_issued: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct FeeUpdate {
    pub fee_paid: Option<bool>,
}

async fn update_offer(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
    payload: Result<Json<OfferUpdate>, JsonRejection>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    let Path(id) = path?;
    let Json(body) = payload?;
    let offer_issued = body
        .offer_issued
        .ok_or_else(|| AppError::validation("offer_issued is required"))?;
    set_flag(&state, &id, "offer_issued", offer_issued, "Error updating offer status").await?;
    Ok(Json(ApiResponse::message("Offer status updated successfully")))
}

async fn update_fee(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
    payload: Result<Json<FeeUpdate>, JsonRejection>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    let Path(id) = path?;
    let Json(body) = payload?;
    let fee_paid = body
        .fee_paid
        .ok_or_else(|| AppError::validation("fee_paid is required"))?;
    set_flag(&state, &id, "fee_paid", fee_paid, "Error updating fee status").await?;
    Ok(Json(ApiResponse::message("Fee status updated successfully")))
}

async fn set_flag(
    state: &AppState,
    id: &str,
    column: &'static str,
    value: bool,
    failure: &str,
) -> Result<(), AppError> {
    let key = ApplicantKey::parse(id);
    let sql = format!(
        "UPDATE applicants SET {column} = ?, updated_at = CURRENT_TIMESTAMP WHERE {} = ?",
        key.column()
    );
    let outcome = state
        .executor
        .execute(&sql, &[Param::Bool(value), key.param()])
        .await
        .context(failure)?;
    if outcome.rows_affected == 0 {
        return Err(AppError::not_found("Applicant not found"));
    }
    Ok(())
}

async fn applicant_stats(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let stats = state
        .executor
        .fetch_one(STATS_SQL, &[])
        .await
        .context("Error fetching statistics")?
        .map(Value::Object)
        .unwrap_or(Value::Null);
    Ok(Json(ApiResponse::ok(stats)))
}
