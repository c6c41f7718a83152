use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::query::{Degrade, Param, QueryExecutor, RowExt};

/// Timestamp columns tried, in order, when a table's activity time is needed.
pub const TIMESTAMP_PRIORITY: [&str; 4] = ["created_at", "updated_at", "submit_time", "added_at"];

const COLUMNS_SQL: &str = r#"
    SELECT COLUMN_NAME AS column_name
    FROM information_schema.columns
    WHERE table_schema = DATABASE() AND table_name = ?
    ORDER BY ORDINAL_POSITION
"#;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableColumns {
    pub exists: bool,
    pub columns: Vec<String>,
}

impl TableColumns {
    pub fn has(&self, column: &str) -> bool {
        self.columns.iter().any(|existing| existing.eq_ignore_ascii_case(column))
    }

    /// First candidate present in the table, in candidate order.
    pub fn first_of<'a>(&self, candidates: &[&'a str]) -> Option<&'a str> {
        candidates.iter().copied().find(|candidate| self.has(candidate))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableCheck {
    pub table: String,
    pub exists: bool,
    pub columns: Vec<String>,
    pub has_all_columns: bool,
    pub missing_columns: Vec<String>,
}

/// Column to use for a row's timestamp, or `NOW()` when the table has none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimestampColumn {
    Column(String),
    Now,
}

impl TimestampColumn {
    pub fn sql(&self) -> &str {
        match self {
            TimestampColumn::Column(name) => name,
            TimestampColumn::Now => "NOW()",
        }
    }
}

impl fmt::Display for TimestampColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql())
    }
}

/// Table and column names are spliced into SQL, so only plain identifiers
/// are accepted.
pub fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit())
}

#[derive(Clone)]
pub struct SchemaInspector {
    executor: QueryExecutor,
}

impl SchemaInspector {
    pub fn new(executor: QueryExecutor) -> Self {
        Self { executor }
    }

    /// Lists the table's columns. An absent table, an invalid name or a
    /// failing metadata query all come back as `exists: false`.
    pub async fn describe(&self, table: &str) -> TableColumns {
        if !is_identifier(table) {
            debug!(table, "refusing to describe non-identifier table name");
            return TableColumns::default();
        }

        let context = format!("describe {table}");
        let rows = self
            .executor
            .fetch_all(COLUMNS_SQL, &[Param::from(table)])
            .await
            .or_default_logged(&context);

        let columns: Vec<String> = rows
            .iter()
            .filter_map(|row| row.text("column_name"))
            .collect();

        TableColumns {
            exists: !columns.is_empty(),
            columns,
        }
    }

    pub async fn check_columns(&self, table: &str, required: &[&str]) -> TableCheck {
        let described = self.describe(table).await;
        let missing_columns: Vec<String> = required
            .iter()
            .filter(|column| !described.has(column))
            .map(|column| column.to_string())
            .collect();

        TableCheck {
            table: table.to_string(),
            exists: described.exists,
            has_all_columns: described.exists && missing_columns.is_empty(),
            missing_columns,
            columns: described.columns,
        }
    }

    pub async fn has_column(&self, table: &str, column: &str) -> bool {
        self.describe(table).await.has(column)
    }

    pub async fn first_existing<'a>(&self, table: &str, candidates: &[&'a str]) -> Option<&'a str> {
        self.describe(table).await.first_of(candidates)
    }

    pub async fn best_timestamp_column(&self, table: &str) -> TimestampColumn {
        match self.first_existing(table, &TIMESTAMP_PRIORITY).await {
            Some(column) => TimestampColumn::Column(column.to_string()),
            None => TimestampColumn::Now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::fake::FakeSource;
    use serde_json::json;
    use std::sync::Arc;

    fn columns(names: &[&str]) -> Vec<serde_json::Value> {
        names.iter().map(|name| json!({ "column_name": name })).collect()
    }

    #[tokio::test]
    async fn picks_added_at_when_it_is_the_only_timestamp() {
        let executor = FakeSource::new()
            .rows("information_schema.columns", columns(&["id", "slot_id", "added_at"]))
            .into_executor();
        let inspector = SchemaInspector::new(executor);

        let column = inspector.best_timestamp_column("iim_emba_slot_student").await;
        assert_eq!(column, TimestampColumn::Column("added_at".to_string()));
    }

    #[tokio::test]
    async fn respects_priority_order() {
        let executor = FakeSource::new()
            .rows(
                "information_schema.columns",
                columns(&["added_at", "updated_at", "created_at"]),
            )
            .into_executor();
        let inspector = SchemaInspector::new(executor);

        let column = inspector.best_timestamp_column("iim_phd_application").await;
        assert_eq!(column.sql(), "created_at");
    }

    #[tokio::test]
    async fn falls_back_to_now_without_timestamp_columns() {
        let executor = FakeSource::new()
            .rows("information_schema.columns", columns(&["id", "user_id"]))
            .into_executor();
        let inspector = SchemaInspector::new(executor);

        let column = inspector.best_timestamp_column("iim_payment").await;
        assert_eq!(column, TimestampColumn::Now);
        assert_eq!(column.to_string(), "NOW()");
    }

    #[tokio::test]
    async fn missing_table_reports_not_found() {
        let executor = FakeSource::new()
            .fail("information_schema", "Access denied")
            .into_executor();
        let inspector = SchemaInspector::new(executor);

        let described = inspector.describe("iim_pgpmci_withdraw").await;
        assert!(!described.exists);
        assert!(described.columns.is_empty());
        assert_eq!(
            inspector.best_timestamp_column("iim_pgpmci_withdraw").await,
            TimestampColumn::Now
        );
    }

    #[tokio::test]
    async fn check_columns_lists_missing() {
        let executor = FakeSource::new()
            .rows("information_schema.columns", columns(&["id", "slot_date"]))
            .into_executor();
        let inspector = SchemaInspector::new(executor);

        let check = inspector
            .check_columns("iim_phd_slot", &["slot_date", "slot_time", "slot_capacity"])
            .await;
        assert!(check.exists);
        assert!(!check.has_all_columns);
        assert_eq!(check.missing_columns, vec!["slot_time", "slot_capacity"]);
    }

    #[tokio::test]
    async fn invalid_table_name_never_reaches_the_store() {
        let fake = Arc::new(FakeSource::new());
        let inspector = SchemaInspector::new(QueryExecutor::new(fake.clone()));

        let described = inspector.describe("users; DROP TABLE users").await;
        assert!(!described.exists);
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn binds_table_name_as_parameter() {
        let fake = Arc::new(
            FakeSource::new().rows("information_schema.columns", columns(&["attendance"])),
        );
        let inspector = SchemaInspector::new(QueryExecutor::new(fake.clone()));

        assert!(inspector.has_column("iim_phd_slot_student", "attendance").await);
        let calls = fake.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, vec![Param::from("iim_phd_slot_student")]);
    }

    #[test]
    fn identifier_validation() {
        assert!(is_identifier("iim_phd_slot"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("1table"));
        assert!(!is_identifier("a.b"));
    }
}
