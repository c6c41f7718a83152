use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::models::ProgressStatus;
use crate::query::{Param, QueryError, QueryExecutor, Row, RowExt};

const OVERVIEW_SELECT: &str = r#"
    SELECT
        c.course_code,
        c.course_name,
        p.phase_name,
        p.phase_order,
        p.commitment_fee,
        COUNT(DISTINCT ue.user_id) AS total_enrolled,
        COUNT(CASE WHEN upp.status = 'not_started' THEN 1 END) AS not_started_count,
        COUNT(CASE WHEN upp.status = 'in_progress' THEN 1 END) AS in_progress_count,
        COUNT(CASE WHEN upp.status = 'completed' THEN 1 END) AS completed_count,
        COUNT(CASE WHEN upp.status = 'verification_pending' THEN 1 END) AS verification_pending_count,
        COUNT(CASE WHEN upp.status = 'verified' THEN 1 END) AS verified_count,
        ROUND(AVG(upp.progress_percentage), 2) AS avg_progress_percentage
    FROM courses c
    LEFT JOIN phases p ON c.id = p.course_id
    LEFT JOIN user_enrollments ue ON c.id = ue.course_id AND ue.status = 'active'
    LEFT JOIN user_phase_progress upp ON p.id = upp.phase_id AND ue.user_id = upp.user_id
"#;

const OVERVIEW_GROUPING: &str = r#"
    GROUP BY c.id, c.course_code, c.course_name, p.id, p.phase_name, p.phase_order, p.commitment_fee
    ORDER BY c.course_code, p.phase_order
"#;

const PROGRESS_SELECT: &str = r#"
    SELECT
        u.id AS user_id,
        u.email,
        u.username,
        upp.status,
        upp.started_at,
        upp.completed_at,
        upp.verified_at,
        upp.progress_percentage,
        upp.notes,
        ue.enrollment_date,
        c.course_code,
        c.course_name,
        p.phase_name
    FROM user_phase_progress upp
    JOIN phases p ON upp.phase_id = p.id
    JOIN courses c ON p.course_id = c.id
    JOIN users u ON upp.user_id = u.id
    JOIN user_enrollments ue ON u.id = ue.user_id AND c.id = ue.course_id
"#;

/// Optional narrowing of the overview to one course and/or phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct OverviewFilter {
    pub course_code: Option<String>,
    pub phase_name: Option<String>,
}

impl OverviewFilter {
    pub fn sql(&self) -> (String, Vec<Param>) {
        let mut clauses = Vec::new();
        let mut params = Vec::new();

        if let Some(code) = non_empty(&self.course_code) {
            clauses.push("c.course_code = ?");
            params.push(Param::from(code.to_ascii_uppercase()));
        }
        if let Some(phase) = non_empty(&self.phase_name) {
            clauses.push("p.phase_name = ?");
            params.push(Param::from(phase));
        }

        let mut sql = OVERVIEW_SELECT.to_string();
        if !clauses.is_empty() {
            sql.push_str("    WHERE ");
            sql.push_str(&clauses.join(" AND "));
            sql.push('\n');
        }
        sql.push_str(OVERVIEW_GROUPING);
        (sql, params)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Count(i64),
    Decimal(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metric {
    pub metric_name: &'static str,
    pub value: MetricValue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseOverview {
    pub phase_name: String,
    pub phase_order: i64,
    pub statistics: Vec<Metric>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CourseOverview {
    pub course_code: String,
    pub course_name: String,
    pub total_enrolled: i64,
    pub phases: Vec<PhaseOverview>,
}

fn statistics(row: &Row) -> Vec<Metric> {
    let count = |metric_name: &'static str, column: &str| Metric {
        metric_name,
        value: MetricValue::Count(row.count(column)),
    };
    let decimal = |metric_name: &'static str, column: &str| Metric {
        metric_name,
        value: MetricValue::Decimal(row.decimal(column)),
    };

    vec![
        decimal("Commitment Fee", "commitment_fee"),
        count("Not Started", "not_started_count"),
        count("In Progress", "in_progress_count"),
        count("Completed", "completed_count"),
        count("Verification Pending", "verification_pending_count"),
        count("Verified", "verified_count"),
        decimal("Average Progress %", "avg_progress_percentage"),
    ]
}

/// Groups the flat overview rows by course, keeping query order. A row with
/// no phase only registers its course.
pub fn pivot(rows: &[Row]) -> Vec<CourseOverview> {
    let mut courses: Vec<CourseOverview> = Vec::new();

    for row in rows {
        let Some(code) = row.text("course_code") else {
            continue;
        };

        let index = match courses.iter().position(|course| course.course_code == code) {
            Some(index) => index,
            None => {
                courses.push(CourseOverview {
                    course_code: code,
                    course_name: row.text("course_name").unwrap_or_default(),
                    total_enrolled: row.count("total_enrolled"),
                    phases: Vec::new(),
                });
                courses.len() - 1
            }
        };

        if let Some(phase_name) = row.text("phase_name") {
            courses[index].phases.push(PhaseOverview {
                phase_name,
                phase_order: row.count("phase_order"),
                statistics: statistics(row),
            });
        }
    }

    courses
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SampleSummary {
    pub enrollments: u64,
    pub progress_rows: u64,
}

/// Course/phase/enrollment/progress reads behind the dashboard overview.
#[derive(Clone)]
pub struct OverviewBuilder {
    executor: QueryExecutor,
}

impl OverviewBuilder {
    pub fn new(executor: QueryExecutor) -> Self {
        Self { executor }
    }

    pub async fn overview(&self, filter: &OverviewFilter) -> Result<Vec<CourseOverview>, QueryError> {
        let (sql, params) = filter.sql();
        let rows = self.executor.fetch_all(&sql, &params).await?;
        let courses = pivot(&rows);
        debug!(rows = rows.len(), courses = courses.len(), "pivoted overview");
        Ok(courses)
    }

    pub async fn phase_progress(&self, course_code: &str, phase_name: &str) -> Result<Vec<Row>, QueryError> {
        let sql = format!(
            "{PROGRESS_SELECT} WHERE c.course_code = ? AND p.phase_name = ? ORDER BY upp.updated_at DESC"
        );
        self.executor
            .fetch_all(
                &sql,
                &[
                    Param::from(course_code.to_ascii_uppercase()),
                    Param::from(phase_name),
                ],
            )
            .await
    }

    pub async fn phase_progress_by_id(&self, course_id: i64, phase_id: i64) -> Result<Vec<Row>, QueryError> {
        let sql = format!("{PROGRESS_SELECT} WHERE c.id = ? AND p.id = ? ORDER BY upp.updated_at DESC");
        self.executor
            .fetch_all(&sql, &[Param::from(course_id), Param::from(phase_id)])
            .await
    }

    /// Enrols users 1 to 4 in courses 1 to 4 and gives each a progress row
    /// per phase. Statuses cycle through every [`ProgressStatus`], so repeat
    /// runs produce the same data.
    pub async fn init_sample_data(&self) -> Result<SampleSummary, QueryError> {
        let mut summary = SampleSummary::default();

        for id in 1..=4_i64 {
            let enrolled = self
                .executor
                .execute(
                    "INSERT IGNORE INTO user_enrollments (user_id, course_id, status) VALUES (?, ?, ?)",
                    &[Param::from(id), Param::from(id), Param::from("active")],
                )
                .await?;
            summary.enrollments += enrolled.rows_affected;

            let phases = self
                .executor
                .fetch_all(
                    "SELECT id FROM phases WHERE course_id = ? ORDER BY phase_order",
                    &[Param::from(id)],
                )
                .await?;

            for (offset, phase) in phases.iter().enumerate() {
                let Some(phase_id) = phase.integer("id") else {
                    continue;
                };
                let (status, progress) = sample_progress(id as usize + offset);
                let inserted = self
                    .executor
                    .execute(
                        "INSERT IGNORE INTO user_phase_progress \
                         (user_id, phase_id, status, progress_percentage, updated_at) \
                         VALUES (?, ?, ?, ?, NOW())",
                        &[
                            Param::from(id),
                            Param::from(phase_id),
                            Param::from(status.as_str()),
                            Param::from(progress),
                        ],
                    )
                    .await?;
                summary.progress_rows += inserted.rows_affected;
            }
        }

        info!(
            enrollments = summary.enrollments,
            progress_rows = summary.progress_rows,
            "initialised sample progress data"
        );
        Ok(summary)
    }
}

fn sample_progress(step: usize) -> (ProgressStatus, i64) {
    let status = ProgressStatus::ALL[step % ProgressStatus::ALL.len()];
    let progress = match status {
        ProgressStatus::NotStarted => 0,
        ProgressStatus::InProgress => 45,
        ProgressStatus::Completed | ProgressStatus::VerificationPending | ProgressStatus::Verified => 100,
    };
    (status, progress)
}
