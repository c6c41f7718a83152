use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::{ApiResponse, AppError, QueryContext};
use crate::query::{Param, Row};
use crate::routes::AppState;

const EVENT_COLUMNS: &str =
    "id, event_title, date, time, location, event_type, program_id, notes";

const REQUIRED_FIELDS: &str = "Event title, date, and time are required";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_events).post(create_event))
        .route("/calendar/:year/:month", get(calendar_month))
        .route("/upcoming/week", get(upcoming_week))
        .route("/:id", get(get_event).put(update_event).delete(delete_event))
}

/// Query-string filters for the event list. `all` disables the program and
/// type filters; a date range needs both ends.
#[derive(Debug, Default, Deserialize)]
pub struct EventFilter {
    pub date: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub program_id: Option<String>,
    pub event_type: Option<String>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn unless_all(value: &Option<String>) -> Option<&str> {
    present(value).filter(|v| *v != "all")
}

impl EventFilter {
    pub fn sql(&self) -> (String, Vec<Param>) {
        let mut conditions = Vec::new();
        let mut params = Vec::new();

        if let Some(date) = present(&self.date) {
            conditions.push("DATE(date) = ?");
            params.push(Param::from(date));
        }
        if let (Some(start), Some(end)) = (present(&self.start_date), present(&self.end_date)) {
            conditions.push("DATE(date) BETWEEN ? AND ?");
            params.push(Param::from(start));
            params.push(Param::from(end));
        }
        if let Some(program) = unless_all(&self.program_id) {
            conditions.push("program_id = ?");
            params.push(Param::from(program));
        }
        if let Some(kind) = unless_all(&self.event_type) {
            conditions.push("event_type = ?");
            params.push(Param::from(kind));
        }

        let mut sql = format!("SELECT {EVENT_COLUMNS}, created_at, updated_at FROM schedule_events");
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(" ORDER BY date ASC, time ASC");
        (sql, params)
    }
}

/// Body accepted by create and update.
#[derive(Debug, Default, Deserialize)]
pub struct EventPayload {
    pub event_title: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub location: Option<String>,
    pub event_type: Option<String>,
    pub program_id: Option<String>,
    pub notes: Option<String>,
}

/// A validated event with write defaults applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventWrite {
    pub event_title: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub location: String,
    pub event_type: String,
    pub program_id: String,
    pub notes: String,
}

impl EventPayload {
    pub fn validate(self) -> Result<EventWrite, AppError> {
        let (Some(title), Some(date), Some(time)) =
            (present(&self.event_title), present(&self.date), present(&self.time))
        else {
            return Err(AppError::validation(REQUIRED_FIELDS));
        };

        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|_| AppError::validation(format!("Invalid event date `{date}`, expected YYYY-MM-DD")))?;
        let time = NaiveTime::parse_from_str(time, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(time, "%H:%M"))
            .map_err(|_| AppError::validation(format!("Invalid event time `{time}`, expected HH:MM")))?;

        let or_default = |value: &Option<String>, fallback: &str| {
            present(value).unwrap_or(fallback).to_string()
        };

        Ok(EventWrite {
            event_title: title.to_string(),
            date,
            time,
            location: or_default(&self.location, ""),
            event_type: or_default(&self.event_type, "meeting"),
            program_id: or_default(&self.program_id, "all"),
            notes: or_default(&self.notes, ""),
        })
    }
}

impl EventWrite {
    fn params(&self) -> Vec<Param> {
        vec![
            Param::from(self.event_title.as_str()),
            Param::Text(self.date.format("%Y-%m-%d").to_string()),
            Param::Text(self.time.format("%H:%M:%S").to_string()),
            Param::from(self.location.as_str()),
            Param::from(self.event_type.as_str()),
            Param::from(self.program_id.as_str()),
            Param::from(self.notes.as_str()),
        ]
    }
}

#[derive(Debug, Serialize)]
pub struct CreatedEvent {
    pub id: u64,
    #[serde(flatten)]
    pub event: EventWrite,
}

async fn list_events(
    State(state): State<AppState>,
    query: Result<Query<EventFilter>, QueryRejection>,
) -> Result<Json<ApiResponse<Vec<Row>>>, AppError> {
    let Query(filter) = query?;
    let (sql, params) = filter.sql();
    let events = state
        .executor
        .fetch_all(&sql, &params)
        .await
        .context("Error fetching events")?;
    Ok(Json(ApiResponse::ok(events)))
}

async fn get_event(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<ApiResponse<Row>>, AppError> {
    let Path(id) = path?;
    let event = state
        .executor
        .fetch_one("SELECT * FROM schedule_events WHERE id = ?", &[Param::Int(id)])
        .await
        .context("Error fetching event")?
        .ok_or_else(|| AppError::not_found("Event not found"))?;
    Ok(Json(ApiResponse::ok(event)))
}

async fn create_event(
    State(state): State<AppState>,
    payload: Result<Json<EventPayload>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<CreatedEvent>>), AppError> {
    let Json(body) = payload?;
    let event = body.validate()?;
    let outcome = state
        .executor
        .execute(
            "INSERT INTO schedule_events \
             (event_title, date, time, location, event_type, program_id, notes) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            &event.params(),
        )
        .await
        .context("Error creating event")?;

    let created = CreatedEvent {
        id: outcome.last_insert_id,
        event,
    };
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(created).with_message("Event created successfully")),
    ))
}

async fn update_event(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<EventPayload>, JsonRejection>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    let Path(id) = path?;
    let Json(body) = payload?;
    let event = body.validate()?;
    let mut params = event.params();
    params.push(Param::Int(id));

    let outcome = state
        .executor
        .execute(
            "UPDATE schedule_events \
             SET event_title = ?, date = ?, time = ?, location = ?, \
             event_type = ?, program_id = ?, notes = ?, updated_at = CURRENT_TIMESTAMP \
             WHERE id = ?",
            &params,
        )
        .await
        .context("Error updating event")?;
    if outcome.rows_affected == 0 {
        return Err(AppError::not_found("Event not found"));
    }
    Ok(Json(ApiResponse::message("Event updated successfully")))
}

async fn delete_event(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    let Path(id) = path?;
    let outcome = state
        .executor
        .execute("DELETE FROM schedule_events WHERE id = ?", &[Param::Int(id)])
        .await
        .context("Error deleting event")?;
    if outcome.rows_affected == 0 {
        return Err(AppError::not_found("Event not found"));
    }
    Ok(Json(ApiResponse::message("Event deleted successfully")))
}

async fn calendar_month(
    State(state): State<AppState>,
    path: Result<Path<(i32, u32)>, PathRejection>,
) -> Result<Json<ApiResponse<Vec<Row>>>, AppError> {
    let Path((year, month)) = path?;
    if !(1..=12).contains(&month) {
        return Err(AppError::validation("Month must be between 1 and 12"));
    }
    let days = state
        .executor
        .fetch_all(
            "SELECT DATE(date) AS event_date, COUNT(*) AS event_count, \
             GROUP_CONCAT(event_title SEPARATOR ', ') AS event_titles \
             FROM schedule_events \
             WHERE YEAR(date) = ? AND MONTH(date) = ? \
             GROUP BY DATE(date) \
             ORDER BY event_date ASC",
            &[Param::from(year), Param::Int(i64::from(month))],
        )
        .await
        .context("Error fetching calendar events")?;
    Ok(Json(ApiResponse::ok(days)))
}

async fn upcoming_week(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<Row>>>, AppError> {
    let sql = format!(
        "SELECT {EVENT_COLUMNS} FROM schedule_events \
         WHERE date BETWEEN CURDATE() AND DATE_ADD(CURDATE(), INTERVAL 7 DAY) \
         ORDER BY date ASC, time ASC LIMIT 10"
    );
    let events = state
        .executor
        .fetch_all(&sql, &[])
        .await
        .context("Error fetching upcoming events")?;
    Ok(Json(ApiResponse::ok(events)))
}
