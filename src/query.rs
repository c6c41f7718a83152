use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

/// A decoded result row keyed by column label.
pub type Row = Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Int(i64),
    Text(String),
    Bool(bool),
    Null,
}

impl From<i64> for Param {
    fn from(value: i64) -> Self {
        Param::Int(value)
    }
}

impl From<i32> for Param {
    fn from(value: i32) -> Self {
        Param::Int(i64::from(value))
    }
}

impl From<bool> for Param {
    fn from(value: bool) -> Self {
        Param::Bool(value)
    }
}

impl From<&str> for Param {
    fn from(value: &str) -> Self {
        Param::Text(value.to_string())
    }
}

impl From<String> for Param {
    fn from(value: String) -> Self {
        Param::Text(value)
    }
}

impl<T: Into<Param>> From<Option<T>> for Param {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Param::Null)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecOutcome {
    pub rows_affected: u64,
    pub last_insert_id: u64,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum QueryError {
    #[error("database error: {0}")]
    Database(String),
    #[error("query timed out after {0:?}")]
    Timeout(Duration),
    #[error("unable to decode column `{column}`: {message}")]
    Decode { column: String, message: String },
}

/// Anything that can run parameterised SQL and hand back decoded rows.
#[async_trait]
pub trait RowSource: Send + Sync {
    async fn fetch_rows(&self, sql: &str, params: &[Param]) -> Result<Vec<Row>, QueryError>;

    async fn execute(&self, sql: &str, params: &[Param]) -> Result<ExecOutcome, QueryError>;
}

/// Shared handle over a [`RowSource`].
///
/// The strict methods propagate [`QueryError`]; the `safe_*` variants log the
/// failure under a caller-supplied context and return an empty result, so a
/// single broken query never aborts a whole dashboard.
#[derive(Clone)]
pub struct QueryExecutor {
    source: Arc<dyn RowSource>,
}

impl QueryExecutor {
    pub fn new(source: Arc<dyn RowSource>) -> Self {
        Self { source }
    }

    pub async fn fetch_all(&self, sql: &str, params: &[Param]) -> Result<Vec<Row>, QueryError> {
        self.source.fetch_rows(sql, params).await
    }

    pub async fn fetch_one(&self, sql: &str, params: &[Param]) -> Result<Option<Row>, QueryError> {
        Ok(self.fetch_all(sql, params).await?.into_iter().next())
    }

    pub async fn execute(&self, sql: &str, params: &[Param]) -> Result<ExecOutcome, QueryError> {
        self.source.execute(sql, params).await
    }

    pub async fn safe_fetch_all(&self, sql: &str, params: &[Param], context: &str) -> Vec<Row> {
        self.fetch_all(sql, params).await.or_default_logged(context)
    }

    pub async fn safe_fetch_one(&self, sql: &str, params: &[Param], context: &str) -> Option<Row> {
        self.fetch_one(sql, params).await.or_default_logged(context)
    }
}

/// Turns a failed query into a fallback value, leaving a log line behind.
pub trait Degrade<T> {
    fn or_logged(self, context: &str, fallback: T) -> T;

    fn or_default_logged(self, context: &str) -> T
    where
        T: Default;
}

impl<T> Degrade<T> for Result<T, QueryError> {
    fn or_logged(self, context: &str, fallback: T) -> T {
        match self {
            Ok(value) => value,
            Err(err) => {
                warn!(context, error = %err, "query failed, using default");
                fallback
            }
        }
    }

    fn or_default_logged(self, context: &str) -> T
    where
        T: Default,
    {
        self.or_logged(context, T::default())
    }
}

/// Lenient accessors over decoded rows. Missing columns and SQL NULL read as
/// zero for the numeric accessors.
pub trait RowExt {
    fn count(&self, column: &str) -> i64;
    fn decimal(&self, column: &str) -> f64;
    fn integer(&self, column: &str) -> Option<i64>;
    fn text(&self, column: &str) -> Option<String>;
}

impl RowExt for Row {
    fn count(&self, column: &str) -> i64 {
        self.integer(column).unwrap_or(0)
    }

    fn decimal(&self, column: &str) -> f64 {
        match self.get(column) {
            Some(Value::Number(number)) => number.as_f64().unwrap_or(0.0),
            Some(Value::String(text)) => text.trim().parse().unwrap_or(0.0),
            Some(Value::Bool(flag)) => f64::from(u8::from(*flag)),
            _ => 0.0,
        }
    }

    fn integer(&self, column: &str) -> Option<i64> {
        match self.get(column)? {
            Value::Number(number) => number
                .as_i64()
                .or_else(|| number.as_u64().map(|v| i64::try_from(v).unwrap_or(i64::MAX)))
                .or_else(|| number.as_f64().map(|v| v as i64)),
            Value::String(text) => {
                let text = text.trim();
                text.parse::<i64>()
                    .ok()
                    .or_else(|| text.parse::<f64>().ok().map(|v| v as i64))
            }
            Value::Bool(flag) => Some(i64::from(*flag)),
            _ => None,
        }
    }

    fn text(&self, column: &str) -> Option<String> {
        match self.get(column)? {
            Value::Null => None,
            Value::String(text) => Some(text.clone()),
            other => Some(other.to_string()),
        }
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::sync::Mutex;

    use super::*;

    enum Reply {
        Rows(Vec<Row>),
        Exec(ExecOutcome),
        Fail(String),
    }

    /// In-memory store answering by SQL substring. Statements that match no
    /// registered needle fail the way a missing table would.
    #[derive(Default)]
    pub(crate) struct FakeSource {
        replies: Mutex<Vec<(String, Reply)>>,
        calls: Mutex<Vec<(String, Vec<Param>)>>,
    }

    impl FakeSource {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn rows(self, needle: &str, rows: Vec<Value>) -> Self {
            let rows = rows.into_iter().map(row).collect();
            self.push(needle, Reply::Rows(rows))
        }

        pub(crate) fn exec(self, needle: &str, rows_affected: u64, last_insert_id: u64) -> Self {
            self.push(
                needle,
                Reply::Exec(ExecOutcome {
                    rows_affected,
                    last_insert_id,
                }),
            )
        }

        pub(crate) fn fail(self, needle: &str, message: &str) -> Self {
            self.push(needle, Reply::Fail(message.to_string()))
        }

        pub(crate) fn into_executor(self) -> QueryExecutor {
            QueryExecutor::new(Arc::new(self))
        }

        pub(crate) fn calls(&self) -> Vec<(String, Vec<Param>)> {
            self.calls.lock().expect("calls mutex").clone()
        }

        fn push(self, needle: &str, reply: Reply) -> Self {
            self.replies
                .lock()
                .expect("replies mutex")
                .push((needle.to_string(), reply));
            self
        }

        fn lookup<T>(
            &self,
            sql: &str,
            params: &[Param],
            pick: impl Fn(&Reply) -> Option<Result<T, QueryError>>,
        ) -> Result<T, QueryError> {
            self.calls
                .lock()
                .expect("calls mutex")
                .push((sql.to_string(), params.to_vec()));
            let replies = self.replies.lock().expect("replies mutex");
            for (needle, reply) in replies.iter() {
                if sql.contains(needle.as_str()) {
                    if let Some(result) = pick(reply) {
                        return result;
                    }
                }
            }
            Err(QueryError::Database(format!(
                "Table doesn't exist for statement: {}",
                sql.split_whitespace().collect::<Vec<_>>().join(" ")
            )))
        }
    }

    #[async_trait]
    impl RowSource for FakeSource {
        async fn fetch_rows(&self, sql: &str, params: &[Param]) -> Result<Vec<Row>, QueryError> {
            self.lookup(sql, params, |reply| match reply {
                Reply::Rows(rows) => Some(Ok(rows.clone())),
                Reply::Fail(message) => Some(Err(QueryError::Database(message.clone()))),
                Reply::Exec(_) => None,
            })
        }

        async fn execute(&self, sql: &str, params: &[Param]) -> Result<ExecOutcome, QueryError> {
            self.lookup(sql, params, |reply| match reply {
                Reply::Exec(outcome) => Some(Ok(*outcome)),
                Reply::Fail(message) => Some(Err(QueryError::Database(message.clone()))),
                Reply::Rows(_) => None,
            })
        }
    }

    pub(crate) fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            other => panic!("expected a JSON object for a row, got {other}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::{row, FakeSource};
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn safe_fetch_returns_empty_on_failure() {
        let executor = FakeSource::new()
            .fail("FROM broken", "Unknown column 'status'")
            .into_executor();

        let rows = executor
            .safe_fetch_all("SELECT status FROM broken", &[], "broken status query")
            .await;
        assert!(rows.is_empty());

        let strict = executor.fetch_all("SELECT status FROM broken", &[]).await;
        assert!(matches!(strict, Err(QueryError::Database(_))));
    }

    #[tokio::test]
    async fn fetch_one_takes_first_row() {
        let executor = FakeSource::new()
            .rows("FROM things", vec![json!({"n": 1}), json!({"n": 2})])
            .into_executor();

        let first = executor
            .fetch_one("SELECT n FROM things", &[])
            .await
            .expect("query succeeds")
            .expect("row present");
        assert_eq!(first.count("n"), 1);
    }

    #[test]
    fn degrade_uses_fallback_only_on_error() {
        let ok: Result<i64, QueryError> = Ok(7);
        assert_eq!(ok.or_logged("ok", 0), 7);

        let failed: Result<Vec<Row>, QueryError> =
            Err(QueryError::Timeout(Duration::from_millis(10)));
        assert!(failed.or_default_logged("slow").is_empty());
    }

    #[test]
    fn numeric_accessors_normalise_null_and_text() {
        let values = row(json!({
            "count": 3,
            "sum": null,
            "decimal_text": "41.50",
            "flag": true,
            "unsigned": 18446744073709551615u64
        }));

        assert_eq!(values.count("count"), 3);
        assert_eq!(values.count("sum"), 0);
        assert_eq!(values.count("missing"), 0);
        assert_eq!(values.count("decimal_text"), 41);
        assert_eq!(values.count("flag"), 1);
        assert_eq!(values.count("unsigned"), i64::MAX);
        assert!((values.decimal("decimal_text") - 41.5).abs() < f64::EPSILON);
        assert_eq!(values.decimal("sum"), 0.0);
        assert_eq!(values.text("sum"), None);
    }

    #[test]
    fn optional_params_become_null() {
        let missing: Option<String> = None;
        assert_eq!(Param::from(missing), Param::Null);
        assert_eq!(Param::from(Some("x")), Param::Text("x".to_string()));
    }
}
