//! Parameter binding utilities for database queries.
//!
//! This module binds `QueryParam` values to backend-specific query objects.

use crate::models::QueryParam;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::{MySql, Postgres};

/// Bind a parameter to a MySQL query.
///
/// Timestamps have already been rewritten to `DATETIME` text by the adapter.
pub(crate) fn bind_mysql_param<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
    }
}

/// Bind a parameter to a PostgreSQL query.
///
/// PostgreSQL will not assign a `text` parameter to a timestamp column, so ISO
/// timestamp strings are bound as timestamps.
pub(crate) fn bind_postgres_param<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => match parse_pg_timestamp(v) {
            Some(PgTimestamp::Utc(ts)) => query.bind(ts),
            Some(PgTimestamp::Naive(ts)) => query.bind(ts),
            None => query.bind(v.as_str()),
        },
    }
}

#[derive(Debug, PartialEq)]
enum PgTimestamp {
    Utc(DateTime<Utc>),
    Naive(NaiveDateTime),
}

fn parse_pg_timestamp(s: &str) -> Option<PgTimestamp> {
    if !crate::db::dialect::is_iso_timestamp(s) {
        return None;
    }
    if s.ends_with('Z') {
        DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|ts| PgTimestamp::Utc(ts.with_timezone(&Utc)))
    } else {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(PgTimestamp::Naive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    #[test]
    fn test_parse_pg_timestamp_utc() {
        let parsed = parse_pg_timestamp("2024-03-01T10:15:30.123Z").unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 30).unwrap()
            + chrono::Duration::milliseconds(123);
        assert_eq!(parsed, PgTimestamp::Utc(expected));
    }

    #[test]
    fn test_parse_pg_timestamp_naive() {
        let parsed = parse_pg_timestamp("2024-03-01T10:15:30").unwrap();
        let expected = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(10, 15, 30)
            .unwrap();
        assert_eq!(parsed, PgTimestamp::Naive(expected));
    }

    #[test]
    fn test_parse_pg_timestamp_rejects_plain_text() {
        assert!(parse_pg_timestamp("ACME").is_none());
        assert!(parse_pg_timestamp("2024-02-30T10:15:30Z").is_none());
    }
}
