//! Request body validation for reglement records.
//!
//! Number and emptiness checks follow loose JSON client conventions: numeric
//! strings count as numbers, `0` and `""` count as missing for required
//! fields. All problems are collected before responding.

use crate::models::reglement::{FIELDS, VALIDATION_ORDER, find_field};
use crate::models::{Field, FieldKind, QueryParam, REGLEMENT_KEY, REGLEMENT_TABLE, QuerySpec, Row};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value as JsonValue;

const DATE_FORMAT_HINT: &str = "ISO format: YYYY-MM-DDTHH:mm:ssZ";

/// A record that passed full validation, values in insert column order.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidRecord {
    pub salle_id: i64,
    values: Vec<(&'static Field, QueryParam)>,
}

impl ValidRecord {
    /// `INSERT ... RETURNING *` for this record.
    pub fn insert_query(&self) -> QuerySpec {
        let columns: Vec<String> = self
            .values
            .iter()
            .map(|(f, _)| format!("\"{}\"", f.column))
            .collect();
        let placeholders: Vec<String> = (1..=self.values.len()).map(|i| format!("${i}")).collect();
        QuerySpec::with_params(
            format!(
                "INSERT INTO \"{}\" ({}) VALUES ({}) RETURNING *",
                REGLEMENT_TABLE,
                columns.join(", "),
                placeholders.join(", ")
            ),
            self.params(),
        )
    }

    /// `UPDATE ... RETURNING *` replacing every writable column of `id`.
    pub fn replace_query(&self, id: i64) -> QuerySpec {
        let sets: Vec<String> = self
            .values
            .iter()
            .enumerate()
            .map(|(i, (f, _))| format!("\"{}\" = ${}", f.column, i + 1))
            .collect();
        let mut params = self.params();
        params.push(QueryParam::Int(id));
        QuerySpec::with_params(
            format!(
                "UPDATE \"{}\" SET {} WHERE \"{}\" = ${} RETURNING *",
                REGLEMENT_TABLE,
                sets.join(", "),
                REGLEMENT_KEY,
                params.len()
            ),
            params,
        )
    }

    fn params(&self) -> Vec<QueryParam> {
        self.values.iter().map(|(_, v)| v.clone()).collect()
    }
}

/// Validate a complete record (create, replace, bulk create).
pub fn validate_full(data: &JsonValue) -> Result<ValidRecord, Vec<String>> {
    let empty = Row::new();
    let body = data.as_object().unwrap_or(&empty);
    let mut errors = Vec::new();

    for name in VALIDATION_ORDER {
        let Some(field) = find_field(name) else {
            continue;
        };
        let value = body.get(name).unwrap_or(&JsonValue::Null);
        let ok = match field.kind {
            FieldKind::Amount | FieldKind::Salle => is_truthy(value) && js_number(value).is_some(),
            FieldKind::Text => value.as_str().is_some_and(|s| !s.trim().is_empty()),
            FieldKind::Date => {
                if !is_truthy(value) {
                    errors.push(format!("{} is required", field.label));
                    continue;
                }
                normalize_date(value).is_some()
            }
        };
        if !ok {
            errors.push(required_message(field));
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    let mut values = Vec::with_capacity(FIELDS.len());
    let mut salle_id = 0;
    for field in &FIELDS {
        let value = body.get(field.name).unwrap_or(&JsonValue::Null);
        let param = match field.kind {
            FieldKind::Salle => {
                salle_id = js_int(value).unwrap_or_default();
                QueryParam::Int(salle_id)
            }
            FieldKind::Amount => QueryParam::Float(js_number(value).unwrap_or_default()),
            FieldKind::Text => QueryParam::String(value.as_str().unwrap_or_default().trim().to_string()),
            FieldKind::Date => QueryParam::String(normalize_date(value).unwrap_or_default()),
        };
        values.push((field, param));
    }
    Ok(ValidRecord { salle_id, values })
}

fn required_message(field: &Field) -> String {
    match field.kind {
        FieldKind::Amount | FieldKind::Salle => {
            format!("{} is required and must be a valid number", field.label)
        }
        FieldKind::Text => format!("{} is required and cannot be empty", field.label),
        FieldKind::Date => format!("{} must be a valid date ({})", field.label, DATE_FORMAT_HINT),
    }
}

/// New value of one column in a partial update.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchValue {
    Param(QueryParam),
    /// Written as a literal `NULL`: an untyped bound null is rejected by
    /// PostgreSQL for timestamp columns.
    Null,
}

/// One body entry of a partial update, checked without touching the database.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchStep {
    Reject(String),
    Set(&'static Field, PatchValue),
    /// Venue reference that still has to be looked up.
    CheckSalle(&'static Field, i64),
}

/// Check every entry of a partial update body, in body order.
///
/// Null text and amount values are skipped; a null date clears the column.
pub fn plan_patch(body: &Row) -> Vec<PatchStep> {
    let mut steps = Vec::new();
    for (key, value) in body {
        let Some(field) = find_field(key) else {
            steps.push(PatchStep::Reject(format!(
                "Field '{}' is not allowed to be updated",
                key
            )));
            continue;
        };

        match field.kind {
            FieldKind::Amount => {
                if value.is_null() {
                    continue;
                }
                match js_number(value) {
                    Some(n) => steps.push(PatchStep::Set(field, PatchValue::Param(QueryParam::Float(n)))),
                    None => steps.push(PatchStep::Reject("MONTANT must be a valid number".to_string())),
                }
            }
            FieldKind::Salle => {
                if value.is_null() {
                    continue;
                }
                match js_number(value).and(js_int(value)) {
                    Some(id) => steps.push(PatchStep::CheckSalle(field, id)),
                    None => steps.push(PatchStep::Reject("id_salle must be a valid number".to_string())),
                }
            }
            FieldKind::Date => {
                if value.is_null() {
                    steps.push(PatchStep::Set(field, PatchValue::Null));
                    continue;
                }
                match normalize_date(value) {
                    Some(date) => {
                        steps.push(PatchStep::Set(field, PatchValue::Param(QueryParam::String(date))))
                    }
                    None => steps.push(PatchStep::Reject(format!(
                        "{} must be a valid date ({})",
                        key, DATE_FORMAT_HINT
                    ))),
                }
            }
            FieldKind::Text => {
                if value.is_null() {
                    continue;
                }
                let trimmed = js_to_string(value).trim().to_string();
                if trimmed.is_empty() {
                    steps.push(PatchStep::Reject(format!("{} cannot be empty", key)));
                } else {
                    steps.push(PatchStep::Set(field, PatchValue::Param(QueryParam::String(trimmed))));
                }
            }
        }
    }
    steps
}

/// Columns to write in a partial update, in body order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdatePlan {
    fields: Vec<(&'static Field, PatchValue)>,
}

impl UpdatePlan {
    pub fn push(&mut self, field: &'static Field, value: PatchValue) {
        self.fields.push((field, value));
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// JSON names of the updated fields.
    pub fn field_names(&self) -> Vec<&'static str> {
        self.fields.iter().map(|(f, _)| f.name).collect()
    }

    /// `UPDATE ... RETURNING *` for `id`.
    pub fn update_query(&self, id: i64) -> QuerySpec {
        let mut sets = Vec::with_capacity(self.fields.len());
        let mut params = Vec::with_capacity(self.fields.len() + 1);
        for (field, value) in &self.fields {
            match value {
                PatchValue::Param(p) => {
                    params.push(p.clone());
                    sets.push(format!("\"{}\" = ${}", field.column, params.len()));
                }
                PatchValue::Null => sets.push(format!("\"{}\" = NULL", field.column)),
            }
        }
        params.push(QueryParam::Int(id));
        QuerySpec::with_params(
            format!(
                "UPDATE \"{}\" SET {} WHERE \"{}\" = ${} RETURNING *",
                REGLEMENT_TABLE,
                sets.join(", "),
                REGLEMENT_KEY,
                params.len()
            ),
            params,
        )
    }
}

/// Parse a date the way clients send them and render it as UTC ISO-8601
/// with milliseconds.
///
/// Accepts RFC 3339, `YYYY-MM-DDTHH:mm:ss[.f]`, `YYYY-MM-DD HH:mm:ss[.f]`
/// and `YYYY-MM-DD`. Zone-less values are taken as UTC.
pub fn normalize_date(value: &JsonValue) -> Option<String> {
    let s = value.as_str()?.trim();
    let parsed = if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        ts.with_timezone(&Utc)
    } else if let Ok(ts) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        ts.and_utc()
    } else if let Ok(ts) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        ts.and_utc()
    } else if let Ok(ts) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M") {
        ts.and_utc()
    } else {
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()?
            .and_hms_opt(0, 0, 0)?
            .and_utc()
    };
    Some(parsed.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// A numeric path segment or body id.
pub fn parse_id(raw: &str) -> Option<i64> {
    raw.trim().parse().ok()
}

/// Numeric value of a JSON scalar; numeric strings count, blanks are zero.
pub fn js_number(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Some(0.0);
            }
            s.parse::<f64>().ok().filter(|n| n.is_finite())
        }
        JsonValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Integer value of a JSON scalar, read like JavaScript `parseInt`.
///
/// Strings yield their leading integer (`"12abc"` is 12, `"5.7"` is 5, a
/// `0x` prefix reads hex); strings without one, booleans and null yield
/// `None`. Numbers are truncated.
pub fn js_int(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        JsonValue::String(s) => leading_int(s),
        _ => None,
    }
}

fn leading_int(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let (negative, rest) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let (radix, digits) = match rest.get(..2) {
        Some("0x" | "0X") => (16, &rest[2..]),
        _ => (10, rest),
    };
    let end = digits
        .find(|c: char| !c.is_digit(radix))
        .unwrap_or(digits.len());
    let n = i64::from_str_radix(&digits[..end], radix).ok()?;
    Some(if negative { -n } else { n })
}

/// Whether a value counts as present for a required field.
pub fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(_) | JsonValue::Object(_) => true,
    }
}

fn js_to_string(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}
