use std::cmp::Ordering;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::models::Program;
use crate::query::{QueryExecutor, Row, RowExt};
use crate::schema::SchemaInspector;

const MAX_ACTIVITIES: usize = 5;
const MAX_DATES: usize = 8;
const CALENDAR_LOOKBACK_DAYS: u32 = 180;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    pub time_ago: String,
    pub icon: &'static str,
    pub color: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportantDate {
    pub title: String,
    pub date: String,
    pub description: String,
    pub icon: &'static str,
    pub color: &'static str,
    pub category: String,
    pub formatted_date: String,
}

/// "3 days ago", "1 hour ago", "12 minutes ago". Never less than a minute.
pub fn time_ago(then: NaiveDateTime, now: NaiveDateTime) -> String {
    let elapsed = now - then;
    let hours = elapsed.num_hours();
    let days = hours / 24;

    if days > 0 {
        format!("{days} day{} ago", plural(days))
    } else if hours > 0 {
        format!("{hours} hour{} ago", plural(hours))
    } else {
        let minutes = elapsed.num_minutes().max(1);
        format!("{minutes} minute{} ago", plural(minutes))
    }
}

fn plural(count: i64) -> &'static str {
    if count > 1 {
        "s"
    } else {
        ""
    }
}

/// Accepts `2025-03-15`, `2025-03-15T10:00:00` and `2025-03-15 10:00:00`.
pub fn parse_day(value: &str) -> Option<NaiveDate> {
    value
        .get(..10)
        .and_then(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").ok())
}

fn parse_moment(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S"))
        .ok()
        .or_else(|| parse_day(value).and_then(|day| day.and_hms_opt(0, 0, 0)))
}

/// "March 15, 2025"
pub fn format_date(day: NaiveDate) -> String {
    day.format("%B %-d, %Y").to_string()
}

struct ActivityStyle {
    title: &'static str,
    icon: &'static str,
    color: &'static str,
}

const APPLICATION: ActivityStyle = ActivityStyle {
    title: "New Application Received",
    icon: "checkmark-circle",
    color: "#4CAF50",
};

const VERIFICATION: ActivityStyle = ActivityStyle {
    title: "Document Verification",
    icon: "document-text",
    color: "#2196F3",
};

const SLOT_BOOKING: ActivityStyle = ActivityStyle {
    title: "Interview Slots Booked",
    icon: "calendar",
    color: "#FF9800",
};

fn activity(row: &Row, style: &ActivityStyle, description: String) -> Activity {
    Activity {
        title: style.title.to_string(),
        description,
        program: row.text("program"),
        category: row.text("category"),
        time: row.text("activity_time"),
        time_ago: String::new(),
        icon: style.icon,
        color: style.color,
    }
}

fn fallback_activities() -> Vec<Activity> {
    [
        (&APPLICATION, "PGP - Computer Science", "2 hours ago"),
        (&VERIFICATION, "PhD - 5 Applications", "3 hours ago"),
        (&SLOT_BOOKING, "EMBA - 8 Students", "5 hours ago"),
    ]
    .into_iter()
    .map(|(style, description, ago)| Activity {
        title: style.title.to_string(),
        description: description.to_string(),
        program: None,
        category: None,
        time: None,
        time_ago: ago.to_string(),
        icon: style.icon,
        color: style.color,
    })
    .collect()
}

fn fallback_dates() -> Vec<ImportantDate> {
    [
        ("Application Deadline - PGP", "2025-03-15", "Final date for application submission", "calendar", "deadline"),
        ("Admission Committee Meeting", "2025-03-20", "Review of all applications", "school", "meeting"),
        ("Document Verification", "2025-03-25", "Final document verification process", "document-text", "verification"),
    ]
    .into_iter()
    .map(|(title, date, description, icon, category)| ImportantDate {
        title: title.to_string(),
        date: date.to_string(),
        description: description.to_string(),
        icon,
        color: "#8e2a6b",
        category: category.to_string(),
        formatted_date: String::new(),
    })
    .collect()
}

/// Newest first; rows without a readable time sink to the end.
fn newest_first(a: &Activity, b: &Activity) -> Ordering {
    let a = a.time.as_deref().and_then(parse_moment);
    let b = b.time.as_deref().and_then(parse_moment);
    match (a, b) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

struct CalendarSource {
    context: &'static str,
    table: &'static str,
    column: &'static str,
    event_type: &'static str,
    program: &'static str,
    category: &'static str,
    icon: &'static str,
    color: &'static str,
    /// Interview dates are titled without the program.
    titled_with_program: bool,
}

const CALENDAR_SOURCES: [CalendarSource; 7] = [
    CalendarSource {
        context: "PGP announcement dates",
        table: "iim_pgpmci_calendar",
        column: "announcement_offer_date",
        event_type: "Announcement Offer Date",
        program: "PGP",
        category: "announcement",
        icon: "calendar",
        color: "#8e2a6b",
        titled_with_program: true,
    },
    CalendarSource {
        context: "PGP commitment fee dates",
        table: "iim_pgpmci_calendar",
        column: "commitment_fee_date_offered",
        event_type: "Commitment Fee Deadline",
        program: "PGP",
        category: "fee",
        icon: "card",
        color: "#8e2a6b",
        titled_with_program: true,
    },
    CalendarSource {
        context: "PGP term fee dates",
        table: "iim_pgpmci_calendar",
        column: "term_fee_date",
        event_type: "Term Fee Deadline",
        program: "PGP",
        category: "fee",
        icon: "card",
        color: "#8e2a6b",
        titled_with_program: true,
    },
    CalendarSource {
        context: "PhD announcement dates",
        table: "iim_phd_calendar",
        column: "announcement_offer_date",
        event_type: "Announcement Offer Date",
        program: "PhD",
        category: "announcement",
        icon: "school",
        color: "#2196F3",
        titled_with_program: true,
    },
    CalendarSource {
        context: "PhD commitment fee dates",
        table: "iim_phd_calendar",
        column: "commitment_fee_last_date",
        event_type: "Commitment Fee Deadline",
        program: "PhD",
        category: "fee",
        icon: "card",
        color: "#2196F3",
        titled_with_program: true,
    },
    CalendarSource {
        context: "interview announcement dates",
        table: "iim_interview_calendar",
        column: "announcement_offer_date",
        event_type: "Interview Announcement",
        program: "Interview",
        category: "interview",
        icon: "people",
        color: "#FF9800",
        titled_with_program: false,
    },
    CalendarSource {
        context: "interview response deadlines",
        table: "iim_interview_calendar",
        column: "announcement_offer_last_date",
        event_type: "Interview Response Deadline",
        program: "Interview",
        category: "deadline",
        icon: "people",
        color: "#FF9800",
        titled_with_program: false,
    },
];

impl CalendarSource {
    fn sql(&self) -> String {
        format!(
            "SELECT {column} AS event_date, announcement_no FROM {table} \
             WHERE {column} >= DATE_SUB(CURDATE(), INTERVAL {CALENDAR_LOOKBACK_DAYS} DAY) \
             ORDER BY {column} DESC LIMIT 2",
            column = self.column,
            table = self.table,
        )
    }

    fn date(&self, row: &Row) -> Option<ImportantDate> {
        let date = row.text("event_date")?;
        let title = if self.titled_with_program {
            format!("{} - {}", self.event_type, self.program)
        } else {
            self.event_type.to_string()
        };
        Some(ImportantDate {
            title,
            date,
            description: format!(
                "Announcement #{}",
                row.text("announcement_no").unwrap_or_default()
            ),
            icon: self.icon,
            color: self.color,
            category: self.category.to_string(),
            formatted_date: String::new(),
        })
    }
}

/// Dashboard notifications assembled from several independent sources.
#[derive(Clone)]
pub struct NotificationFeed {
    executor: QueryExecutor,
    inspector: SchemaInspector,
}

impl NotificationFeed {
    pub fn new(executor: QueryExecutor) -> Self {
        Self {
            inspector: SchemaInspector::new(executor.clone()),
            executor,
        }
    }

    async fn recent_applications(&self, program: Program, limit: u32) -> Vec<Activity> {
        let table = program.table("application");
        let column = self.inspector.best_timestamp_column(&table).await;
        let sql = format!(
            "SELECT '{label}' AS program, {column} AS activity_time, 'application' AS category \
             FROM {table} WHERE {column} >= DATE_SUB(NOW(), INTERVAL 7 DAY) \
             ORDER BY {column} DESC LIMIT {limit}",
            label = program.label(),
        );
        let context = format!("{} activities query", program.label());

        self.executor
            .safe_fetch_all(&sql, &[], &context)
            .await
            .iter()
            .map(|row| activity(row, &APPLICATION, format!("{} - New Application", program.label())))
            .collect()
    }

    pub async fn recent_activities(&self, now: NaiveDateTime) -> Vec<Activity> {
        let mut activities = self.recent_applications(Program::Pgp, 5).await;
        activities.extend(self.recent_applications(Program::Phd, 3).await);

        // Older deployments log verifications without a timestamp.
        let verifications = if self.inspector.has_column("iim_pgpmci_verification", "created_at").await {
            self.executor
                .safe_fetch_all(
                    "SELECT 'PGP' AS program, MAX(created_at) AS activity_time, \
                     'verification' AS category, COUNT(*) AS count \
                     FROM iim_pgpmci_verification \
                     WHERE created_at >= DATE_SUB(NOW(), INTERVAL 1 DAY) \
                     GROUP BY DATE(created_at) ORDER BY MAX(created_at) DESC LIMIT 2",
                    &[],
                    "verification activities query",
                )
                .await
        } else {
            Vec::new()
        };
        activities.extend(verifications.iter().map(|row| {
            activity(row, &VERIFICATION, format!("PGP - {} Applications", row.count("count")))
        }));

        let bookings = self
            .executor
            .safe_fetch_all(
                "SELECT 'PGP' AS program, MAX(added_at) AS activity_time, \
                 'slot' AS category, COUNT(*) AS count \
                 FROM iim_pgpmci_slot_student \
                 WHERE added_at >= DATE_SUB(NOW(), INTERVAL 1 DAY) \
                 GROUP BY DATE(added_at) ORDER BY MAX(added_at) DESC LIMIT 2",
                &[],
                "slot activities query",
            )
            .await;
        activities.extend(bookings.iter().map(|row| {
            activity(row, &SLOT_BOOKING, format!("PGP - {} Students", row.count("count")))
        }));

        if activities.is_empty() {
            return fallback_activities();
        }

        activities.sort_by(newest_first);
        activities.truncate(MAX_ACTIVITIES);
        for activity in &mut activities {
            activity.time_ago = match activity.time.as_deref().and_then(parse_moment) {
                Some(then) => time_ago(then, now),
                None => time_ago(now, now),
            };
        }
        activities
    }

    pub async fn important_dates(&self) -> Vec<ImportantDate> {
        let mut dates = Vec::new();

        for source in &CALENDAR_SOURCES {
            let rows = self.executor.safe_fetch_all(&source.sql(), &[], source.context).await;
            dates.extend(rows.iter().filter_map(|row| source.date(row)));
        }

        let slots = self
            .executor
            .safe_fetch_all(
                "SELECT DATE(slot_date) AS event_date, COUNT(*) AS slot_count \
                 FROM iim_pgpmci_slot \
                 WHERE slot_date >= CURDATE() AND slot_date <= DATE_ADD(CURDATE(), INTERVAL 30 DAY) \
                 GROUP BY DATE(slot_date) ORDER BY event_date ASC LIMIT 2",
                &[],
                "upcoming slot dates",
            )
            .await;
        dates.extend(slots.iter().filter_map(|row| {
            Some(ImportantDate {
                title: "Interview Slots - PGP".to_string(),
                date: row.text("event_date")?,
                description: format!("{} slots available", row.count("slot_count")),
                icon: "calendar",
                color: "#4CAF50",
                category: "slot".to_string(),
                formatted_date: String::new(),
            })
        }));

        if dates.is_empty() {
            dates = fallback_dates();
        }

        dates.sort_by(|a, b| match (parse_day(&a.date), parse_day(&b.date)) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });
        dates.truncate(MAX_DATES);
        for date in &mut dates {
            date.formatted_date = parse_day(&date.date).map(format_date).unwrap_or_default();
        }
        dates
    }
}
