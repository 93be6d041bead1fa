//! Result normalization.
//!
//! Drivers hand back either a row set or an affected-row count. Both are
//! folded into [`ExecutionResult`] so handlers never look at the backend.

use crate::models::{ExecutionResult, Row};

/// What a driver returned for one statement, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeOutcome {
    /// Row set. `rows_affected` is whatever count the server reported with it.
    Rows { rows: Vec<Row>, rows_affected: u64 },
    /// Count-only outcome of a write.
    Affected {
        rows_affected: u64,
        last_insert_id: Option<u64>,
    },
}

impl NativeOutcome {
    pub fn rows(rows: Vec<Row>) -> Self {
        Self::Rows {
            rows,
            rows_affected: 0,
        }
    }

    pub fn affected(rows_affected: u64, last_insert_id: Option<u64>) -> Self {
        Self::Affected {
            rows_affected,
            last_insert_id,
        }
    }

    pub fn rows_affected(&self) -> u64 {
        match self {
            Self::Rows { rows_affected, .. } | Self::Affected { rows_affected, .. } => {
                *rows_affected
            }
        }
    }

    /// Generated key of an insert, if the driver reported a non-zero one.
    pub fn last_insert_id(&self) -> Option<u64> {
        match self {
            Self::Affected {
                last_insert_id: Some(id),
                ..
            } if *id > 0 => Some(*id),
            _ => None,
        }
    }
}

/// Fold a driver outcome into the uniform `{rows, rowCount}` contract.
///
/// A count-only outcome becomes a single synthetic row carrying
/// `affectedRows` (and `insertId` when known).
pub fn normalize(outcome: NativeOutcome) -> ExecutionResult {
    match outcome {
        NativeOutcome::Rows {
            rows,
            rows_affected,
        } => {
            // Equals `rows.len()` for selects and `RETURNING`. A PostgreSQL
            // write without `RETURNING` yields no rows but a real count.
            let row_count = rows_affected.max(rows.len() as u64);
            ExecutionResult { rows, row_count }
        }
        NativeOutcome::Affected {
            rows_affected,
            last_insert_id,
        } => {
            let mut row = Row::new();
            row.insert("affectedRows".to_string(), rows_affected.into());
            row.insert("insertId".to_string(), last_insert_id.unwrap_or(0).into());
            ExecutionResult {
                rows: vec![row],
                row_count: rows_affected,
            }
        }
    }
}
