//! Pipeline run repository.
//!
//! Stage bookkeeping lives in the `stage_statuses` JSON column and is
//! rewritten under the connection lock, so a read-modify-write never
//! interleaves with another writer.

use std::collections::BTreeMap;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{parse_column, parse_optional_column, Database, DatabaseError};
use crate::model::{format_timestamp, parse_timestamp};
use crate::model::{PipelineRun, RunStatus, StageStatus, StageStatusKind};
use crate::pipeline::stage::Stage;

fn from_row(row: &Row<'_>) -> rusqlite::Result<PipelineRun> {
    let statuses_raw: String = row.get("stage_statuses")?;
    let stage_statuses: BTreeMap<Stage, StageStatus> = serde_json::from_str(&statuses_raw)
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let started_at: Option<String> = row.get("started_at")?;
    let completed_at: Option<String> = row.get("completed_at")?;

    Ok(PipelineRun {
        id: row.get("id")?,
        firm_id: row.get("firm_id")?,
        matter_id: row.get("matter_id")?,
        document_id: row.get("document_id")?,
        status: parse_column(row, "status")?,
        current_stage: parse_optional_column(row, "current_stage")?,
        stage_statuses,
        document_hash: row.get("document_hash")?,
        classified_doc_type: row.get("classified_doc_type")?,
        classification_confidence: row.get("classification_confidence")?,
        taxonomy_pack_id: row.get("taxonomy_pack_id")?,
        findings_count: row.get("findings_count")?,
        actions_count: row.get("actions_count")?,
        total_tokens_used: row.get("total_tokens_used")?,
        error: row.get("error")?,
        triggered_by: row.get("triggered_by")?,
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
        started_at: started_at.as_deref().map(parse_timestamp),
        completed_at: completed_at.as_deref().map(parse_timestamp),
    })
}

fn encode_statuses(statuses: &BTreeMap<Stage, StageStatus>) -> Result<String, DatabaseError> {
    serde_json::to_string(statuses).map_err(|e| DatabaseError::Json {
        column: "stage_statuses",
        source: e,
    })
}

pub fn insert(db: &Database, run: &PipelineRun) -> Result<(), DatabaseError> {
    let statuses = encode_statuses(&run.stage_statuses)?;
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO pipeline_runs (id, firm_id, matter_id, document_id, status,
             current_stage, stage_statuses, document_hash, classified_doc_type,
             classification_confidence, taxonomy_pack_id, findings_count, actions_count,
             total_tokens_used, error, triggered_by, created_at, updated_at, started_at,
             completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
             ?17, ?18, ?19, ?20)",
            params![
                run.id,
                run.firm_id,
                run.matter_id,
                run.document_id,
                run.status.as_str(),
                run.current_stage.map(|s| s.as_str()),
                statuses,
                run.document_hash,
                run.classified_doc_type,
                run.classification_confidence,
                run.taxonomy_pack_id,
                run.findings_count,
                run.actions_count,
                run.total_tokens_used,
                run.error,
                run.triggered_by,
                format_timestamp(run.created_at),
                format_timestamp(run.updated_at),
                run.started_at.map(format_timestamp),
                run.completed_at.map(format_timestamp),
            ],
        )?;
        Ok(())
    })
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<PipelineRun>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM pipeline_runs WHERE id = ?1",
                params![id],
                from_row,
            )
            .optional()?)
    })
}

/// Id of another completed run in `matter_id` whose document hashed to `hash`.
pub fn find_completed_by_hash(
    db: &Database,
    matter_id: &str,
    hash: &str,
    exclude_run_id: &str,
) -> Result<Option<String>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT id FROM pipeline_runs
                 WHERE matter_id = ?1 AND document_hash = ?2 AND status = 'completed' AND id != ?3
                 ORDER BY completed_at DESC LIMIT 1",
                params![matter_id, hash, exclude_run_id],
                |r| r.get(0),
            )
            .optional()?)
    })
}

fn load_statuses(
    conn: &Connection,
    run_id: &str,
) -> Result<BTreeMap<Stage, StageStatus>, DatabaseError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT stage_statuses FROM pipeline_runs WHERE id = ?1",
            params![run_id],
            |r| r.get(0),
        )
        .optional()?;
    let raw = raw.ok_or_else(|| DatabaseError::NotFound {
        entity: "pipeline run",
        id: run_id.to_string(),
    })?;
    serde_json::from_str(&raw).map_err(|e| DatabaseError::Json {
        column: "stage_statuses",
        source: e,
    })
}

/// Moves an open run into `stage` and records the stage as running.
///
/// Returns `false` if the run is already completed, failed or cancelled.
pub fn mark_stage_running(db: &Database, run_id: &str, stage: Stage) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let now = Utc::now();
        let mut statuses = load_statuses(conn, run_id)?;
        statuses.insert(stage, StageStatus::running(now));
        let now = format_timestamp(now);
        let changed = conn.execute(
            "UPDATE pipeline_runs SET status = 'running', current_stage = ?2,
             stage_statuses = ?3, updated_at = ?4, started_at = COALESCE(started_at, ?4)
             WHERE id = ?1 AND status IN ('queued', 'running')",
            params![run_id, stage.as_str(), encode_statuses(&statuses)?, now],
        )?;
        Ok(changed > 0)
    })
}

/// Records the end of a stage as completed or skipped.
pub fn mark_stage_finished(
    db: &Database,
    run_id: &str,
    stage: Stage,
    outcome: StageStatusKind,
    note: Option<&str>,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let now = Utc::now();
        let mut statuses = load_statuses(conn, run_id)?;
        let entry = statuses
            .entry(stage)
            .or_insert_with(|| StageStatus::running(now));
        entry.status = outcome;
        entry.completed_at = Some(now);
        entry.error = None;
        entry.note = note.map(str::to_string);
        conn.execute(
            "UPDATE pipeline_runs SET stage_statuses = ?2, updated_at = ?3 WHERE id = ?1",
            params![run_id, encode_statuses(&statuses)?, format_timestamp(now)],
        )?;
        Ok(())
    })
}

/// Marks the run failed unless it already completed or was cancelled.
///
/// Returns `false` when the run was left untouched.
pub fn mark_failed(
    db: &Database,
    run_id: &str,
    stage: Option<Stage>,
    error: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let now = Utc::now();
        let mut statuses = load_statuses(conn, run_id)?;
        if let Some(stage) = stage {
            let entry = statuses
                .entry(stage)
                .or_insert_with(|| StageStatus::running(now));
            entry.status = StageStatusKind::Failed;
            entry.completed_at = Some(now);
            entry.error = Some(error.to_string());
        }
        let now = format_timestamp(now);
        let changed = conn.execute(
            "UPDATE pipeline_runs SET status = 'failed', error = ?2, stage_statuses = ?3,
             updated_at = ?4, completed_at = ?4
             WHERE id = ?1 AND status NOT IN ('completed', 'cancelled')",
            params![run_id, error, encode_statuses(&statuses)?, now],
        )?;
        Ok(changed > 0)
    })
}

/// Closes an open run as completed. Failed and cancelled runs are left alone.
pub fn mark_completed(db: &Database, run_id: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let now = format_timestamp(Utc::now());
        conn.execute(
            "UPDATE pipeline_runs SET status = 'completed', error = NULL, updated_at = ?2,
             completed_at = ?2 WHERE id = ?1 AND status IN ('queued', 'running')",
            params![run_id, now],
        )?;
        Ok(())
    })
}

/// Cancels a run that has not reached a terminal status.
pub fn mark_cancelled(db: &Database, run_id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let now = format_timestamp(Utc::now());
        let changed = conn.execute(
            "UPDATE pipeline_runs SET status = 'cancelled', updated_at = ?2, completed_at = ?2
             WHERE id = ?1 AND status IN ('queued', 'running')",
            params![run_id, now],
        )?;
        Ok(changed > 0)
    })
}

/// Puts a failed run back into `running` so a stage can be retried.
pub fn reopen(db: &Database, run_id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let now = format_timestamp(Utc::now());
        let changed = conn.execute(
            "UPDATE pipeline_runs SET status = 'running', error = NULL, completed_at = NULL,
             updated_at = ?2 WHERE id = ?1 AND status = 'failed'",
            params![run_id, now],
        )?;
        Ok(changed > 0)
    })
}

pub fn set_document_hash(db: &Database, run_id: &str, hash: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE pipeline_runs SET document_hash = ?2, updated_at = ?3 WHERE id = ?1",
            params![run_id, hash, format_timestamp(Utc::now())],
        )?;
        Ok(())
    })
}

/// Persists the classify stage's outcome. Confidence is stored with three
/// decimals.
pub fn set_classification(
    db: &Database,
    run_id: &str,
    doc_type: &str,
    confidence: f64,
    taxonomy_pack_id: &str,
    tokens_used: i64,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE pipeline_runs SET classified_doc_type = ?2, classification_confidence = ?3,
             taxonomy_pack_id = ?4, total_tokens_used = total_tokens_used + ?5, updated_at = ?6
             WHERE id = ?1",
            params![
                run_id,
                doc_type,
                format!("{:.3}", confidence),
                taxonomy_pack_id,
                tokens_used,
                format_timestamp(Utc::now())
            ],
        )?;
        Ok(())
    })
}

pub fn set_findings_count(
    db: &Database,
    run_id: &str,
    count: i64,
    tokens_used: i64,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE pipeline_runs SET findings_count = ?2,
             total_tokens_used = total_tokens_used + ?3, updated_at = ?4 WHERE id = ?1",
            params![run_id, count, tokens_used, format_timestamp(Utc::now())],
        )?;
        Ok(())
    })
}

pub fn set_actions_count(db: &Database, run_id: &str, count: i64) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE pipeline_runs SET actions_count = ?2, updated_at = ?3 WHERE id = ?1",
            params![run_id, count, format_timestamp(Utc::now())],
        )?;
        Ok(())
    })
}

pub fn add_tokens(db: &Database, run_id: &str, tokens_used: i64) -> Result<(), DatabaseError> {
    if tokens_used == 0 {
        return Ok(());
    }
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE pipeline_runs SET total_tokens_used = total_tokens_used + ?2, updated_at = ?3
             WHERE id = ?1",
            params![run_id, tokens_used, format_timestamp(Utc::now())],
        )?;
        Ok(())
    })
}

/// Runs currently in `status`, oldest first.
pub fn list_by_status(db: &Database, status: RunStatus) -> Result<Vec<PipelineRun>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM pipeline_runs WHERE status = ?1 ORDER BY created_at ASC")?;
        let rows = stmt
            .query_map(params![status.as_str()], from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
