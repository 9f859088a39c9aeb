use std::borrow::Cow;
use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::diagnostics::{DiagnosticEvent, DiagnosticLevel, DiagnosticsHub, Unsubscribe};
use crate::error::{PgClientError, Result};
use crate::types::{ExecStatus, RawQueryResult};

const SOURCE: &str = "pgclient::ResultView";

/// Expected top-level shape of a JSON column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JsonKind {
    Null,
    Boolean,
    Number,
    String,
    Array,
    Object,
}

impl JsonKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => JsonKind::Null,
            Value::Bool(_) => JsonKind::Boolean,
            Value::Number(_) => JsonKind::Number,
            Value::String(_) => JsonKind::String,
            Value::Array(_) => JsonKind::Array,
            Value::Object(_) => JsonKind::Object,
        }
    }

    fn name(self) -> &'static str {
        match self {
            JsonKind::Null => "null",
            JsonKind::Boolean => "boolean",
            JsonKind::Number => "number",
            JsonKind::String => "string",
            JsonKind::Array => "array",
            JsonKind::Object => "object",
        }
    }
}

impl fmt::Display for JsonKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Owns the result of one executed command and gives typed, null-aware access to it.
///
/// The wrapped result is released exactly once: when the view is dropped, or when
/// [`reset`](Self::reset) replaces it. Views are independent of the connection that
/// produced them.
///
/// Positional accessors (`data`, `length`, `is_null`, `view`) treat an out-of-range
/// row or column like a NULL cell: empty data, zero length, `is_null() == true`, and a
/// warning diagnostic.
pub struct ResultView {
    result: Option<RawQueryResult>,
    diagnostics: DiagnosticsHub,
}

impl ResultView {
    pub fn new(result: Option<RawQueryResult>) -> Self {
        Self {
            result,
            diagnostics: DiagnosticsHub::new(SOURCE),
        }
    }

    pub fn from_raw(raw: RawQueryResult) -> Self {
        Self::new(Some(raw))
    }

    /// The wrapped result, if any.
    pub fn raw(&self) -> Option<&RawQueryResult> {
        self.result.as_ref()
    }

    /// Gives up ownership of the wrapped result, leaving nothing to release.
    pub fn into_raw(mut self) -> Option<RawQueryResult> {
        self.result.take()
    }

    /// Releases the current result, then takes ownership of `result`.
    pub fn reset(&mut self, result: Option<RawQueryResult>) {
        self.result.take();
        self.result = result;
    }

    /// Returns true if no result is owned.
    pub fn is_empty(&self) -> bool {
        self.result.is_none()
    }

    pub fn rows(&self) -> usize {
        self.result.as_ref().map_or(0, |r| r.rows.len())
    }

    pub fn cols(&self) -> usize {
        self.result.as_ref().map_or(0, |r| r.columns.len())
    }

    /// Raw bytes of a cell. Empty for NULL cells.
    pub fn data(&self, row: usize, col: usize) -> &[u8] {
        self.view(row, col).as_bytes()
    }

    /// Byte length of a cell. Zero for NULL cells.
    pub fn length(&self, row: usize, col: usize) -> usize {
        self.view(row, col).len()
    }

    pub fn is_null(&self, row: usize, col: usize) -> bool {
        self.cell(row, col).is_none()
    }

    /// Looks up a column by name.
    ///
    /// Unquoted names are folded to lower case, as the server folds identifiers.
    /// Wrap the name in double quotes to match it verbatim.
    pub fn col_index(&self, name: &str) -> Option<usize> {
        let result = self.ensure()?;
        let wanted = fold_column_name(name);
        let index = result.columns.iter().position(|c| *c == *wanted);
        if index.is_none() {
            self.diagnostics.warning(format!("missing column {}", name));
        }
        index
    }

    pub fn column_name(&self, col: usize) -> Option<&str> {
        self.result
            .as_ref()
            .and_then(|r| r.columns.get(col))
            .map(String::as_str)
    }

    pub fn column_names(&self) -> &[String] {
        self.result.as_ref().map_or(&[], |r| r.columns.as_slice())
    }

    pub fn status(&self) -> ExecStatus {
        self.ensure().map_or(ExecStatus::Empty, |r| r.status)
    }

    /// Number of rows the command affected, from its completion tag.
    pub fn affected_rows(&self) -> Option<u64> {
        self.result.as_ref().and_then(|r| r.affected_rows)
    }

    pub fn error_message(&self) -> Option<&str> {
        self.result.as_ref().and_then(|r| r.error_message.as_deref())
    }

    /// Borrowed text of a cell. Empty for NULL cells.
    pub fn view(&self, row: usize, col: usize) -> &str {
        self.cell(row, col).unwrap_or_default()
    }

    /// Borrowed text of a named cell, or `default` if the cell is NULL or the
    /// column does not exist.
    pub fn view_by_name<'a>(&'a self, row: usize, name: &str, default: &'a str) -> &'a str {
        match self.col_index(name) {
            Some(col) => self.cell(row, col).unwrap_or(default),
            None => default,
        }
    }

    /// Owned copy of a named cell, or `default` if the cell is NULL or missing.
    pub fn text(&self, row: usize, name: &str, default: &str) -> String {
        self.view_by_name(row, name, default).to_owned()
    }

    /// Owned copy of a named cell that must not be NULL.
    pub fn text_required(&self, row: usize, name: &str) -> Result<String> {
        self.required(row, name).map(str::to_owned)
    }

    /// Parses a named cell as `i32`. NULL, empty, or missing cells yield `default`.
    pub fn int(&self, row: usize, name: &str, default: i32) -> Result<i32> {
        self.parse_cell(row, name, default, "integer", |s| s.parse().ok())
    }

    /// Parses a named cell as `i64`. NULL, empty, or missing cells yield `default`.
    pub fn int64(&self, row: usize, name: &str, default: i64) -> Result<i64> {
        self.parse_cell(row, name, default, "bigint", |s| s.parse().ok())
    }

    /// Parses a named cell as a boolean. Accepts `t`, `true`, `1`, `f`, `false`
    /// and `0`. NULL, empty, or missing cells yield `default`.
    pub fn bool(&self, row: usize, name: &str, default: bool) -> Result<bool> {
        self.parse_cell(row, name, default, "boolean", parse_bool)
    }

    /// Decodes a named JSON cell, requiring its top-level value to be of `kind`.
    pub fn json_value(&self, row: usize, name: &str, kind: JsonKind) -> Result<Value> {
        let value: Value = serde_json::from_str(self.required(row, name)?)?;
        let actual = JsonKind::of(&value);
        if actual != kind {
            return Err(PgClientError::JsonKindMismatch {
                column: name.to_string(),
                expected: kind.name(),
                actual: actual.name(),
            });
        }
        Ok(value)
    }

    /// Deserializes a named JSON cell into `T`.
    pub fn json<T: DeserializeOwned>(&self, row: usize, name: &str) -> Result<T> {
        Ok(serde_json::from_str(self.required(row, name)?)?)
    }

    pub fn subscribe_to_diagnostics<F>(
        &self,
        handler: F,
        min_level: DiagnosticLevel,
    ) -> Unsubscribe
    where
        F: Fn(&DiagnosticEvent) + Send + Sync + 'static,
    {
        self.diagnostics.subscribe(handler, min_level)
    }

    fn ensure(&self) -> Option<&RawQueryResult> {
        if self.result.is_none() {
            self.diagnostics.warning("result is absent");
        }
        self.result.as_ref()
    }

    fn cell(&self, row: usize, col: usize) -> Option<&str> {
        let cell = self.result.as_ref().and_then(|r| r.cell(row, col));
        match cell {
            Some(value) => value.as_deref(),
            None => {
                self.diagnostics.warning(format!(
                    "cell ({}, {}) is outside a {}x{} result",
                    row,
                    col,
                    self.rows(),
                    self.cols()
                ));
                None
            }
        }
    }

    fn required(&self, row: usize, name: &str) -> Result<&str> {
        let col = self
            .col_index(name)
            .ok_or_else(|| PgClientError::ColumnNotFound(name.to_string()))?;
        self.cell(row, col).ok_or_else(|| PgClientError::NullValue {
            column: name.to_string(),
            row,
        })
    }

    fn parse_cell<T>(
        &self,
        row: usize,
        name: &str,
        default: T,
        expected: &'static str,
        parse: impl FnOnce(&str) -> Option<T>,
    ) -> Result<T> {
        let value = self.view_by_name(row, name, "");
        if value.is_empty() {
            return Ok(default);
        }
        parse(value).ok_or_else(|| PgClientError::MalformedValue {
            column: name.to_string(),
            value: value.to_string(),
            expected,
        })
    }
}

impl Default for ResultView {
    fn default() -> Self {
        Self::new(None)
    }
}

impl From<RawQueryResult> for ResultView {
    fn from(raw: RawQueryResult) -> Self {
        Self::from_raw(raw)
    }
}

impl fmt::Debug for ResultView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultView")
            .field("result", &self.result)
            .finish()
    }
}

fn fold_column_name(name: &str) -> Cow<'_, str> {
    match name.strip_prefix('"').and_then(|n| n.strip_suffix('"')) {
        Some(quoted) => Cow::Owned(quoted.replace("\"\"", "\"")),
        None if name.bytes().any(|b| b.is_ascii_uppercase()) => {
            Cow::Owned(name.to_ascii_lowercase())
        }
        None => Cow::Borrowed(name),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "t" | "true" | "1" => Some(true),
        "f" | "false" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    fn users() -> RawQueryResult {
        RawQueryResult::new(
            ExecStatus::TuplesOk,
            vec![
                "id".to_string(),
                "name".to_string(),
                "active".to_string(),
                "Mixed".to_string(),
            ],
            vec![
                vec![
                    Some("1".to_string()),
                    Some("John".to_string()),
                    Some("t".to_string()),
                    Some("x".to_string()),
                ],
                vec![
                    Some("oops".to_string()),
                    None,
                    Some("maybe".to_string()),
                    Some(String::new()),
                ],
            ],
        )
    }

    fn warnings(view: &ResultView) -> (Arc<Mutex<Vec<String>>>, Unsubscribe) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let handle = view.subscribe_to_diagnostics(
            move |event| sink.lock().unwrap().push(event.message.clone()),
            DiagnosticLevel::Warning,
        );
        (events, handle)
    }

    #[test]
    fn test_counts_and_positional_access() {
        let view = ResultView::from_raw(users());
        assert_eq!(view.rows(), 2);
        assert_eq!(view.cols(), 4);
        assert_eq!(view.status(), ExecStatus::TuplesOk);
        assert_eq!(view.data(0, 1), b"John");
        assert_eq!(view.length(0, 1), 4);
        assert!(!view.is_null(0, 1));
        assert!(view.is_null(1, 1));
        assert_eq!(view.view(1, 1), "");
        assert_eq!(view.length(1, 1), 0);
    }

    #[test]
    fn test_column_names() {
        let view = ResultView::from_raw(users());
        assert_eq!(view.column_names(), ["id", "name", "active", "Mixed"]);
        assert_eq!(view.column_name(3), Some("Mixed"));
        assert_eq!(view.column_name(4), None);
        assert!(ResultView::new(None).column_names().is_empty());
    }

    #[test]
    fn test_out_of_range_behaves_like_null() {
        let view = ResultView::from_raw(users());
        let (events, _handle) = warnings(&view);

        assert!(view.is_null(5, 0));
        assert!(view.is_null(0, 9));
        assert_eq!(view.data(5, 0), b"");
        assert_eq!(view.length(0, 9), 0);
        assert!(events.lock().unwrap()[0].contains("outside a 2x4 result"));
    }

    #[test]
    fn test_col_index_folds_unquoted_names() {
        let view = ResultView::from_raw(users());
        assert_eq!(view.col_index("name"), Some(1));
        assert_eq!(view.col_index("NAME"), Some(1));
        assert_eq!(view.col_index("\"Mixed\""), Some(3));
        assert_eq!(view.col_index("Mixed"), None);
        assert_eq!(view.col_index("\"name\""), Some(1));
    }

    #[test]
    fn test_missing_column_emits_warning() {
        let view = ResultView::from_raw(users());
        let (events, _handle) = warnings(&view);

        assert_eq!(view.col_index("missing"), None);
        assert_eq!(view.text(0, "missing", "fallback"), "fallback");
        assert_eq!(view.int(0, "missing", 7).unwrap(), 7);

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e == "missing column missing"));
    }

    #[test]
    fn test_absent_result() {
        let view = ResultView::new(None);
        let (events, _handle) = warnings(&view);

        assert!(view.is_empty());
        assert_eq!(view.rows(), 0);
        assert_eq!(view.cols(), 0);
        assert_eq!(view.status(), ExecStatus::Empty);
        assert_eq!(view.col_index("id"), None);
        assert_eq!(events.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_text_and_defaults() {
        let view = ResultView::from_raw(users());
        assert_eq!(view.text(0, "name", "anon"), "John");
        assert_eq!(view.text(1, "name", "anon"), "anon");
        assert_eq!(view.view_by_name(1, "name", "-"), "-");
        assert_eq!(view.text(1, "\"Mixed\"", "anon"), "");
    }

    #[test]
    fn test_text_outlives_view() {
        let mut view = ResultView::from_raw(users());
        let name = view.text(0, "name", "");
        view.reset(None);
        assert_eq!(name, "John");
        assert_eq!(view.rows(), 0);
    }

    #[test]
    fn test_text_required() {
        let view = ResultView::from_raw(users());
        assert_eq!(view.text_required(0, "name").unwrap(), "John");

        match view.text_required(1, "name").unwrap_err() {
            PgClientError::NullValue { column, row } => {
                assert_eq!(column, "name");
                assert_eq!(row, 1);
            }
            other => panic!("Expected NullValue error, got {:?}", other),
        }
        assert!(matches!(
            view.text_required(0, "missing").unwrap_err(),
            PgClientError::ColumnNotFound(_)
        ));
    }

    #[test]
    fn test_int_parsing() {
        let view = ResultView::from_raw(users());
        assert_eq!(view.int(0, "id", -1).unwrap(), 1);
        assert_eq!(view.int64(0, "id", -1).unwrap(), 1);
        assert_eq!(view.int(1, "name", 42).unwrap(), 42);

        match view.int(1, "id", 0).unwrap_err() {
            PgClientError::MalformedValue {
                column,
                value,
                expected,
            } => {
                assert_eq!(column, "id");
                assert_eq!(value, "oops");
                assert_eq!(expected, "integer");
            }
            other => panic!("Expected MalformedValue error, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_text_yields_default() {
        let view = ResultView::from_raw(users());
        assert_eq!(view.int(1, "\"Mixed\"", 5).unwrap(), 5);
        assert!(view.bool(1, "\"Mixed\"", true).unwrap());
    }

    #[test]
    fn test_bool_parsing() {
        let raw = RawQueryResult::new(
            ExecStatus::TuplesOk,
            vec!["flag".to_string()],
            ["t", "true", "1", "f", "false", "0", "TRUE", "yes"]
                .iter()
                .map(|v| vec![Some(v.to_string())])
                .collect(),
        );
        let view = ResultView::from_raw(raw);

        for row in 0..3 {
            assert!(view.bool(row, "flag", false).unwrap());
        }
        for row in 3..6 {
            assert!(!view.bool(row, "flag", true).unwrap());
        }
        assert!(view.bool(6, "flag", false).is_err());
        assert!(view.bool(7, "flag", false).is_err());

        let view = ResultView::from_raw(users());
        assert!(view.bool(0, "active", false).unwrap());
        assert!(view.bool(1, "active", false).is_err());
    }

    #[test]
    fn test_json_value() {
        let raw = RawQueryResult::new(
            ExecStatus::TuplesOk,
            vec!["doc".to_string()],
            vec![
                vec![Some(r#"{"a": 1, "b": [true]}"#.to_string())],
                vec![Some("[1, 2]".to_string())],
                vec![Some("{broken".to_string())],
                vec![None],
            ],
        );
        let view = ResultView::from_raw(raw);

        let doc = view.json_value(0, "doc", JsonKind::Object).unwrap();
        assert_eq!(doc["a"], 1);
        assert_eq!(doc["b"][0], true);

        match view.json_value(1, "doc", JsonKind::Object).unwrap_err() {
            PgClientError::JsonKindMismatch { expected, actual, .. } => {
                assert_eq!(expected, "object");
                assert_eq!(actual, "array");
            }
            other => panic!("Expected JsonKindMismatch error, got {:?}", other),
        }
        assert!(matches!(
            view.json_value(2, "doc", JsonKind::Object).unwrap_err(),
            PgClientError::Json(_)
        ));
        assert!(matches!(
            view.json_value(3, "doc", JsonKind::Object).unwrap_err(),
            PgClientError::NullValue { .. }
        ));
    }

    #[test]
    fn test_json_deserialize() {
        #[derive(Debug, serde::Deserialize, PartialEq)]
        struct Settings {
            theme: String,
            size: u32,
        }

        let raw = RawQueryResult::new(
            ExecStatus::TuplesOk,
            vec!["settings".to_string()],
            vec![vec![Some(r#"{"theme": "dark", "size": 12}"#.to_string())]],
        );
        let view = ResultView::from_raw(raw);
        let settings: Settings = view.json(0, "settings").unwrap();
        assert_eq!(
            settings,
            Settings {
                theme: "dark".to_string(),
                size: 12
            }
        );
    }

    #[test]
    fn test_reset_twice_is_safe() {
        let mut view = ResultView::from_raw(users());
        view.reset(None);
        view.reset(None);
        assert_eq!(view.rows(), 0);
        assert_eq!(view.cols(), 0);
        assert!(view.raw().is_none());
    }

    #[test]
    fn test_reset_takes_new_result() {
        let mut view = ResultView::from_raw(users());
        view.reset(Some(RawQueryResult::command_ok(3)));
        assert_eq!(view.status(), ExecStatus::CommandOk);
        assert_eq!(view.affected_rows(), Some(3));
        assert_eq!(view.cols(), 0);
    }

    #[test]
    fn test_take_leaves_source_empty() {
        let mut view = ResultView::from_raw(users());
        let moved = std::mem::take(&mut view);
        assert_eq!(moved.rows(), 2);
        assert!(view.is_empty());
        assert_eq!(view.rows(), 0);
        assert_eq!(moved.into_raw().map(|r| r.rows.len()), Some(2));
    }

    #[test]
    fn test_fold_column_name() {
        assert_eq!(fold_column_name("abc"), "abc");
        assert_eq!(fold_column_name("AbC"), "abc");
        assert_eq!(fold_column_name("\"AbC\""), "AbC");
        assert_eq!(fold_column_name("\"a\"\"b\""), "a\"b");
    }
}
