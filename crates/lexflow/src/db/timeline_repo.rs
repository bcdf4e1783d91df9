//! Append-only matter timeline.

use chrono::Utc;
use rusqlite::{params, Row};

use super::{Database, DatabaseError};
use crate::model::format_timestamp;

#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEventRow {
    pub id: i64,
    pub firm_id: String,
    pub matter_id: String,
    pub event_type: String,
    pub run_id: Option<String>,
    pub stage: Option<String>,
    pub detail: serde_json::Value,
    pub created_at: String,
}

impl TimelineEventRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let detail: String = row.get("detail")?;
        Ok(Self {
            id: row.get("id")?,
            firm_id: row.get("firm_id")?,
            matter_id: row.get("matter_id")?,
            event_type: row.get("event_type")?,
            run_id: row.get("run_id")?,
            stage: row.get("stage")?,
            detail: serde_json::from_str(&detail).unwrap_or(serde_json::Value::Null),
            created_at: row.get("created_at")?,
        })
    }
}

pub fn append(
    db: &Database,
    firm_id: &str,
    matter_id: &str,
    event_type: &str,
    run_id: Option<&str>,
    stage: Option<&str>,
    detail: &serde_json::Value,
) -> Result<(), DatabaseError> {
    let detail = serde_json::to_string(detail).map_err(|e| DatabaseError::Json {
        column: "detail",
        source: e,
    })?;
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO timeline_events (firm_id, matter_id, event_type, run_id, stage, detail,
             created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                firm_id,
                matter_id,
                event_type,
                run_id,
                stage,
                detail,
                format_timestamp(Utc::now())
            ],
        )?;
        Ok(())
    })
}

/// Events of a matter in insertion order.
pub fn list_for_matter(
    db: &Database,
    firm_id: &str,
    matter_id: &str,
) -> Result<Vec<TimelineEventRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM timeline_events WHERE firm_id = ?1 AND matter_id = ?2 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![firm_id, matter_id], TimelineEventRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
