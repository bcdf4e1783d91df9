//! Human review tasks raised by the pipeline.

use chrono::Utc;
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use super::{Database, DatabaseError};
use crate::model::{format_timestamp, new_id};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewTaskRow {
    pub id: String,
    pub firm_id: String,
    pub matter_id: String,
    pub run_id: Option<String>,
    pub document_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub created_at: String,
}

impl ReviewTaskRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            firm_id: row.get("firm_id")?,
            matter_id: row.get("matter_id")?,
            run_id: row.get("run_id")?,
            document_id: row.get("document_id")?,
            title: row.get("title")?,
            description: row.get("description")?,
            status: row.get("status")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Data for a new open review task.
#[derive(Debug, Clone)]
pub struct NewReviewTask<'a> {
    pub firm_id: &'a str,
    pub matter_id: &'a str,
    pub run_id: Option<&'a str>,
    pub document_id: Option<&'a str>,
    pub title: &'a str,
    pub description: Option<&'a str>,
}

/// Inserts an open task and returns its id.
pub fn insert(db: &Database, task: &NewReviewTask<'_>) -> Result<String, DatabaseError> {
    let id = new_id();
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO review_tasks (id, firm_id, matter_id, run_id, document_id, title,
             description, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'open', ?8)",
            params![
                id,
                task.firm_id,
                task.matter_id,
                task.run_id,
                task.document_id,
                task.title,
                task.description,
                format_timestamp(Utc::now()),
            ],
        )?;
        Ok(())
    })?;
    Ok(id)
}

pub fn list_for_matter(db: &Database, matter_id: &str) -> Result<Vec<ReviewTaskRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM review_tasks WHERE matter_id = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map(params![matter_id], ReviewTaskRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
