//! PostgreSQL-to-MySQL dialect rewriting.
//!
//! Call sites write SQL once, in PostgreSQL conventions: `$n` placeholders,
//! double-quoted identifiers and a trailing `RETURNING *`. When the process
//! runs against MySQL every statement passes through [`DialectAdapter::adapt`]
//! first. The rewrites are plain text substitutions, applied in order:
//!
//! 1. every `$n` becomes `?`, left to right
//! 2. every `"` becomes `` ` ``
//! 3. ISO-8601 timestamp parameters become `YYYY-MM-DD HH:MM:SS`
//! 4. `RETURNING *` is stripped and remembered so the caller can emulate it
//!
//! None of the rewrites look inside string literals or comments. Call sites
//! must not put `"` or `$n` inside literals when targeting MySQL.

use crate::error::{DbError, DbResult};
use crate::models::{QueryParam, QuerySpec};
use sqlparser::ast::Statement;
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;
use std::borrow::Cow;
use tracing::warn;

/// Column used to read back a row inserted with `RETURNING *`.
pub const DEFAULT_KEY_COLUMN: &str = "ID_reglement";

/// Marker that triggers returning emulation. Matched case-sensitively.
pub const RETURNING_MARKER: &str = "RETURNING *";

/// Statement kind recorded for returning emulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Insert,
    Update,
    Other,
}

/// What the caller asked `RETURNING *` to give back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturningIntent {
    pub kind: StatementKind,
    /// Table named right after `INSERT INTO` / `UPDATE`, without quotes.
    pub table: Option<String>,
}

/// Whether the driver should be read for rows or for an affected count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    Rows,
    Count,
}

/// A statement ready for the MySQL driver.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptedQuery {
    pub text: String,
    pub params: Vec<QueryParam>,
    pub returning: Option<ReturningIntent>,
    pub shape: ResultShape,
}

/// Rewrites PostgreSQL-flavoured statements for MySQL.
#[derive(Debug, Clone)]
pub struct DialectAdapter {
    key_column: String,
}

impl Default for DialectAdapter {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_COLUMN)
    }
}

impl DialectAdapter {
    pub fn new(key_column: impl Into<String>) -> Self {
        Self {
            key_column: key_column.into(),
        }
    }

    pub fn key_column(&self) -> &str {
        &self.key_column
    }

    /// Apply every rewrite to `spec`. Pure: no I/O, no state.
    pub fn adapt(&self, spec: &QuerySpec) -> AdaptedQuery {
        let (text, indices) = rewrite_placeholders(&spec.text);
        if !indices_are_sequential(&indices) {
            warn!(
                placeholders = ?indices,
                params = spec.params.len(),
                "Placeholders are not numbered $1..$n in order; MySQL binds by position"
            );
        }
        let text = rewrite_identifier_quotes(&text).into_owned();

        let returning = detect_returning(&text);
        let text = if returning.is_some() {
            strip_returning(&text).into_owned()
        } else {
            text
        };

        let shape = result_shape(&text);
        AdaptedQuery {
            text,
            params: convert_params(&spec.params),
            returning,
            shape,
        }
    }

    /// Follow-up statement reading back the row a `RETURNING *` insert created.
    ///
    /// Fails when the generated key does not fit a signed 64-bit parameter.
    pub fn lookup_inserted(&self, table: &str, insert_id: u64) -> DbResult<AdaptedQuery> {
        let key = i64::try_from(insert_id).map_err(|_| {
            DbError::internal(format!(
                "Generated key {} of `{}` exceeds the signed 64-bit range",
                insert_id, table
            ))
        })?;
        Ok(AdaptedQuery {
            text: format!(
                "SELECT * FROM `{}` WHERE `{}` = ?",
                table, self.key_column
            ),
            params: vec![QueryParam::Int(key)],
            returning: None,
            shape: ResultShape::Rows,
        })
    }
}

/// Replace every `$<digits>` with `?`, returning the indices seen in order.
pub fn rewrite_placeholders(sql: &str) -> (Cow<'_, str>, Vec<u32>) {
    let bytes = sql.as_bytes();
    let mut out: Option<String> = None;
    let mut indices = Vec::new();
    let mut copied_to = 0;
    let mut idx = 0;

    while idx < bytes.len() {
        if bytes[idx] == b'$'
            && let Some((digits_end, digits)) = scan_digits(bytes, idx + 1)
        {
            let buf = out.get_or_insert_with(|| String::with_capacity(sql.len()));
            buf.push_str(&sql[copied_to..idx]);
            buf.push('?');
            indices.push(digits.parse().unwrap_or(u32::MAX));
            copied_to = digits_end;
            idx = digits_end;
            continue;
        }
        idx += 1;
    }

    match out {
        Some(mut buf) => {
            buf.push_str(&sql[copied_to..]);
            (Cow::Owned(buf), indices)
        }
        None => (Cow::Borrowed(sql), indices),
    }
}

fn scan_digits(bytes: &[u8], start: usize) -> Option<(usize, &str)> {
    let mut idx = start;
    while idx < bytes.len() && bytes[idx].is_ascii_digit() {
        idx += 1;
    }
    if idx == start {
        None
    } else {
        std::str::from_utf8(&bytes[start..idx])
            .ok()
            .map(|digits| (idx, digits))
    }
}

fn indices_are_sequential(indices: &[u32]) -> bool {
    indices
        .iter()
        .enumerate()
        .all(|(pos, &n)| n as usize == pos + 1)
}

/// Replace every double quote with a backtick.
pub fn rewrite_identifier_quotes(sql: &str) -> Cow<'_, str> {
    if sql.contains('"') {
        Cow::Owned(sql.replace('"', "`"))
    } else {
        Cow::Borrowed(sql)
    }
}

/// `YYYY-MM-DDTHH:MM:SS`, optionally followed by `.sss` and/or `Z`.
pub fn is_iso_timestamp(s: &str) -> bool {
    let b = s.as_bytes();
    let digits = |range: std::ops::Range<usize>| b[range].iter().all(u8::is_ascii_digit);

    let base_ok = b.len() >= 19
        && digits(0..4)
        && b[4] == b'-'
        && digits(5..7)
        && b[7] == b'-'
        && digits(8..10)
        && b[10] == b'T'
        && digits(11..13)
        && b[13] == b':'
        && digits(14..16)
        && b[16] == b':'
        && digits(17..19);
    if !base_ok {
        return false;
    }

    let mut rest = &b[19..];
    if rest.len() >= 4 && rest[0] == b'.' && rest[1..4].iter().all(u8::is_ascii_digit) {
        rest = &rest[4..];
    }
    rest.is_empty() || rest == b"Z"
}

/// Convert an ISO timestamp to MySQL `DATETIME` text, truncated to seconds.
///
/// Callers check [`is_iso_timestamp`] first; other strings come back unchanged.
pub fn convert_timestamp(s: &str) -> Cow<'_, str> {
    if is_iso_timestamp(s) {
        Cow::Owned(format!("{} {}", &s[..10], &s[11..19]))
    } else {
        Cow::Borrowed(s)
    }
}

pub fn convert_params(params: &[QueryParam]) -> Vec<QueryParam> {
    params
        .iter()
        .map(|p| match p {
            QueryParam::String(s) if is_iso_timestamp(s) => {
                QueryParam::String(convert_timestamp(s).into_owned())
            }
            other => other.clone(),
        })
        .collect()
}

/// Detect `RETURNING *` and the table it applies to.
///
/// Expects identifiers already rewritten to backticks.
pub fn detect_returning(sql: &str) -> Option<ReturningIntent> {
    if !sql.contains(RETURNING_MARKER) {
        return None;
    }

    let intent = if let Some(table) = quoted_table_after(sql, &["INSERT", "INTO"]) {
        ReturningIntent {
            kind: StatementKind::Insert,
            table: Some(table),
        }
    } else if let Some(table) = quoted_table_after(sql, &["UPDATE"]) {
        ReturningIntent {
            kind: StatementKind::Update,
            table: Some(table),
        }
    } else {
        ReturningIntent {
            kind: StatementKind::Other,
            table: None,
        }
    };
    Some(intent)
}

/// Find `<kw1> <kw2> ... `name`` anywhere in `sql` (keywords case-insensitive).
fn quoted_table_after(sql: &str, keywords: &[&str]) -> Option<String> {
    let upper = sql.to_ascii_uppercase();
    let first = keywords.first()?;

    let mut search_from = 0;
    while let Some(found) = upper[search_from..].find(first) {
        let start = search_from + found;
        search_from = start + first.len();

        let mut pos = start + first.len();
        let mut matched = true;
        for kw in &keywords[1..] {
            let after_ws = skip_whitespace(&upper, pos);
            if after_ws == pos || !upper[after_ws..].starts_with(kw) {
                matched = false;
                break;
            }
            pos = after_ws + kw.len();
        }
        if !matched {
            continue;
        }

        let name_start = skip_whitespace(&upper, pos);
        if name_start == pos || !sql[name_start..].starts_with('`') {
            continue;
        }
        let name: String = sql[name_start + 1..]
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        if !name.is_empty() && sql[name_start + 1 + name.len()..].starts_with('`') {
            return Some(name);
        }
    }
    None
}

fn skip_whitespace(s: &str, from: usize) -> usize {
    s[from..]
        .find(|c: char| !c.is_whitespace())
        .map_or(s.len(), |off| from + off)
}

/// Remove the first whitespace-preceded `RETURNING *` (case-insensitive).
pub fn strip_returning(sql: &str) -> Cow<'_, str> {
    let upper = sql.to_ascii_uppercase();
    let mut search_from = 0;
    while let Some(found) = upper[search_from..].find(RETURNING_MARKER) {
        let start = search_from + found;
        let ws_start = upper[..start].trim_end().len();
        if ws_start < start {
            let end = start + RETURNING_MARKER.len();
            return Cow::Owned(format!("{}{}", &sql[..ws_start], &sql[end..]));
        }
        search_from = start + RETURNING_MARKER.len();
    }
    Cow::Borrowed(sql)
}

/// Decide whether the driver result should be read as rows or as a count.
///
/// MySQL reports an empty row set and a zero-row write identically, so the
/// statement text decides.
pub fn result_shape(sql: &str) -> ResultShape {
    match Parser::parse_sql(&MySqlDialect {}, sql) {
        Ok(statements) => match statements.last() {
            Some(stmt) if returns_rows(stmt) => ResultShape::Rows,
            Some(_) => ResultShape::Count,
            None => ResultShape::Count,
        },
        Err(_) => shape_from_keyword(sql),
    }
}

fn returns_rows(stmt: &Statement) -> bool {
    matches!(
        stmt,
        Statement::Query(_)
            | Statement::ShowTables { .. }
            | Statement::ShowColumns { .. }
            | Statement::ShowDatabases { .. }
            | Statement::ShowCreate { .. }
            | Statement::ShowVariable { .. }
            | Statement::ShowVariables { .. }
            | Statement::ShowStatus { .. }
            | Statement::ExplainTable { .. }
            | Statement::Explain { .. }
    )
}

fn shape_from_keyword(sql: &str) -> ResultShape {
    let first = sql
        .trim_start_matches(|c: char| c.is_whitespace() || c == '(')
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or("")
        .to_ascii_uppercase();
    match first.as_str() {
        "SELECT" | "WITH" | "SHOW" | "EXPLAIN" | "DESCRIBE" | "DESC" | "VALUES" | "TABLE" => {
            ResultShape::Rows
        }
        _ => ResultShape::Count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders_rewritten_in_order() {
        let (sql, indices) = rewrite_placeholders("SELECT * FROM t WHERE a = $1 AND b = $2");
        assert_eq!(sql, "SELECT * FROM t WHERE a = ? AND b = ?");
        assert_eq!(indices, vec![1, 2]);
    }

    #[test]
    fn test_placeholders_multi_digit() {
        let sql = (1..=16)
            .map(|i| format!("${}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let (rewritten, indices) = rewrite_placeholders(&sql);
        assert_eq!(rewritten, vec!["?"; 16].join(", "));
        assert_eq!(indices.len(), 16);
        assert!(indices_are_sequential(&indices));
    }

    #[test]
    fn test_placeholders_untouched_without_dollar_digits() {
        let (sql, indices) = rewrite_placeholders("SELECT '$' || name FROM t");
        assert!(matches!(sql, Cow::Borrowed(_)));
        assert!(indices.is_empty());
    }

    #[test]
    fn test_out_of_order_placeholders_are_blind() {
        let (sql, indices) = rewrite_placeholders("SELECT $2, $1");
        assert_eq!(sql, "SELECT ?, ?");
        assert!(!indices_are_sequential(&indices));
    }

    #[test]
    fn test_identifier_quotes() {
        assert_eq!(
            rewrite_identifier_quotes(r#"SELECT "a" FROM "T""#),
            "SELECT `a` FROM `T`"
        );
    }

    #[test]
    fn test_iso_timestamp_detection() {
        assert!(is_iso_timestamp("2024-03-01T10:15:30"));
        assert!(is_iso_timestamp("2024-03-01T10:15:30Z"));
        assert!(is_iso_timestamp("2024-03-01T10:15:30.123"));
        assert!(is_iso_timestamp("2024-03-01T10:15:30.123Z"));
        assert!(!is_iso_timestamp("2024-03-01 10:15:30"));
        assert!(!is_iso_timestamp("2024-03-01"));
        assert!(!is_iso_timestamp("2024-03-01T10:15:30+02:00"));
        assert!(!is_iso_timestamp("2024-03-01T10:15:30.1Z"));
        assert!(!is_iso_timestamp("hello"));
    }

    #[test]
    fn test_convert_timestamp() {
        assert_eq!(
            convert_timestamp("2024-03-01T10:15:30.123Z"),
            "2024-03-01 10:15:30"
        );
        assert_eq!(convert_timestamp("2024-03-01T10:15:30"), "2024-03-01 10:15:30");
        assert_eq!(convert_timestamp("not a date"), "not a date");
    }

    #[test]
    fn test_convert_params_only_touches_timestamps() {
        let params = vec![
            QueryParam::Int(5),
            QueryParam::from("2024-03-01T10:15:30Z"),
            QueryParam::from("CLIENT A"),
            QueryParam::Null,
        ];
        assert_eq!(
            convert_params(&params),
            vec![
                QueryParam::Int(5),
                QueryParam::from("2024-03-01 10:15:30"),
                QueryParam::from("CLIENT A"),
                QueryParam::Null,
            ]
        );
    }

    #[test]
    fn test_detect_returning_insert() {
        let intent = detect_returning("INSERT INTO `API_user_reglement` (`a`) VALUES (?) RETURNING *")
            .unwrap();
        assert_eq!(intent.kind, StatementKind::Insert);
        assert_eq!(intent.table.as_deref(), Some("API_user_reglement"));
    }

    #[test]
    fn test_detect_returning_update_multiline() {
        let sql = "\n  UPDATE `API_user_reglement`\n  SET `CLIENT` = ?\n  WHERE `ID_reglement` = ?\n  RETURNING *\n";
        let intent = detect_returning(sql).unwrap();
        assert_eq!(intent.kind, StatementKind::Update);
        assert_eq!(intent.table.as_deref(), Some("API_user_reglement"));
    }

    #[test]
    fn test_detect_returning_delete_has_no_table() {
        let intent = detect_returning("DELETE FROM `t` WHERE `id` = ? RETURNING *").unwrap();
        assert_eq!(intent.kind, StatementKind::Other);
        assert!(intent.table.is_none());
    }

    #[test]
    fn test_detect_returning_requires_exact_marker() {
        assert!(detect_returning("INSERT INTO `t` (`a`) VALUES (?) returning *").is_none());
        assert!(detect_returning("SELECT * FROM `t`").is_none());
    }

    #[test]
    fn test_strip_returning() {
        assert_eq!(
            strip_returning("INSERT INTO `t` (`a`) VALUES (?)\n      RETURNING *\n    "),
            "INSERT INTO `t` (`a`) VALUES (?)\n    "
        );
        assert_eq!(strip_returning("DELETE FROM `t` returning *"), "DELETE FROM `t`");
        assert_eq!(strip_returning("SELECT 1"), "SELECT 1");
    }

    #[test]
    fn test_result_shape() {
        assert_eq!(result_shape("SELECT * FROM `t` WHERE `id` = ?"), ResultShape::Rows);
        assert_eq!(
            result_shape("SELECT r.*, s.name as salle_name FROM `a` r LEFT JOIN `b` s ON r.x = s.y ORDER BY r.`ID` DESC LIMIT ?"),
            ResultShape::Rows
        );
        assert_eq!(result_shape("INSERT INTO `t` (`a`) VALUES (?)"), ResultShape::Count);
        assert_eq!(result_shape("UPDATE `t` SET `a` = ?"), ResultShape::Count);
        assert_eq!(result_shape("BEGIN"), ResultShape::Count);
        assert_eq!(result_shape("SAVEPOINT item"), ResultShape::Count);
    }

    #[test]
    fn test_result_shape_falls_back_to_keyword() {
        assert_eq!(shape_from_keyword("  select weird !! syntax"), ResultShape::Rows);
        assert_eq!(shape_from_keyword("(SELECT 1)"), ResultShape::Rows);
        assert_eq!(shape_from_keyword("CALL proc()"), ResultShape::Count);
    }

    #[test]
    fn test_adapt_select() {
        let adapter = DialectAdapter::default();
        let spec = QuerySpec::new(r#"SELECT * FROM "T" WHERE "id" = $1"#).bind(5);
        let adapted = adapter.adapt(&spec);
        assert_eq!(adapted.text, "SELECT * FROM `T` WHERE `id` = ?");
        assert_eq!(adapted.params, vec![QueryParam::Int(5)]);
        assert!(adapted.returning.is_none());
        assert_eq!(adapted.shape, ResultShape::Rows);
    }

    #[test]
    fn test_adapt_insert_returning() {
        let adapter = DialectAdapter::default();
        let spec = QuerySpec::new(
            r#"INSERT INTO "API_user_reglement" ("CLIENT", "DATE_DEBUT") VALUES ($1, $2) RETURNING *"#,
        )
        .bind("ACME")
        .bind("2024-03-01T10:15:30.123Z");
        let adapted = adapter.adapt(&spec);
        assert_eq!(
            adapted.text,
            "INSERT INTO `API_user_reglement` (`CLIENT`, `DATE_DEBUT`) VALUES (?, ?)"
        );
        assert_eq!(adapted.params[1], QueryParam::from("2024-03-01 10:15:30"));
        assert_eq!(adapted.shape, ResultShape::Count);
        assert_eq!(
            adapted.returning,
            Some(ReturningIntent {
                kind: StatementKind::Insert,
                table: Some("API_user_reglement".to_string()),
            })
        );
    }

    #[test]
    fn test_lookup_inserted_uses_key_column() {
        let adapter = DialectAdapter::new("id");
        let lookup = adapter.lookup_inserted("items", 42).unwrap();
        assert_eq!(lookup.text, "SELECT * FROM `items` WHERE `id` = ?");
        assert_eq!(lookup.params, vec![QueryParam::Int(42)]);
        assert_eq!(lookup.shape, ResultShape::Rows);
    }

    #[test]
    fn test_lookup_inserted_rejects_key_beyond_i64() {
        let adapter = DialectAdapter::default();
        let max = i64::MAX as u64;
        assert!(adapter.lookup_inserted("items", max).is_ok());
        let err = adapter.lookup_inserted("items", max + 1).unwrap_err();
        assert!(matches!(err, DbError::Internal { .. }));
    }
}
