//! Finding repository.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use super::{parse_column, Database, DatabaseError};
use crate::model::finding::qualified_key;
use crate::model::{format_timestamp, parse_timestamp};
use crate::model::{FindingStatus, PipelineFinding};

fn from_row(row: &Row<'_>) -> rusqlite::Result<PipelineFinding> {
    let resolved_at: Option<String> = row.get("resolved_at")?;
    let created_at: String = row.get("created_at")?;
    Ok(PipelineFinding {
        id: row.get("id")?,
        run_id: row.get("run_id")?,
        matter_id: row.get("matter_id")?,
        document_id: row.get("document_id")?,
        category_key: row.get("category_key")?,
        field_key: row.get("field_key")?,
        label: row.get("label")?,
        value: row.get("value")?,
        source_quote: row.get("source_quote")?,
        page_number: row.get("page_number")?,
        char_start: row.get("char_start")?,
        char_end: row.get("char_end")?,
        confidence: row.get("confidence")?,
        impact: parse_column(row, "impact")?,
        status: parse_column(row, "status")?,
        existing_value: row.get("existing_value")?,
        resolved_by: row.get("resolved_by")?,
        resolved_at: resolved_at.as_deref().map(parse_timestamp),
        created_at: parse_timestamp(&created_at),
    })
}

/// Replaces every finding of `run_id` with `findings` in one transaction.
///
/// Re-running extraction for a run therefore never duplicates rows.
pub fn replace_for_run(
    db: &Database,
    run_id: &str,
    findings: &[PipelineFinding],
) -> Result<(), DatabaseError> {
    db.with_tx(|tx| {
        tx.execute(
            "DELETE FROM pipeline_findings WHERE run_id = ?1",
            params![run_id],
        )?;
        let mut stmt = tx.prepare(
            "INSERT INTO pipeline_findings (id, run_id, matter_id, document_id, category_key,
             field_key, label, value, source_quote, page_number, char_start, char_end,
             confidence, impact, status, existing_value, resolved_by, resolved_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
             ?17, ?18, ?19)",
        )?;
        for f in findings {
            stmt.execute(params![
                f.id,
                f.run_id,
                f.matter_id,
                f.document_id,
                f.category_key,
                f.field_key,
                f.label,
                f.value,
                f.source_quote,
                f.page_number,
                f.char_start,
                f.char_end,
                f.confidence,
                f.impact.as_str(),
                f.status.as_str(),
                f.existing_value,
                f.resolved_by,
                f.resolved_at.map(format_timestamp),
                format_timestamp(f.created_at),
            ])?;
        }
        Ok(())
    })
}

pub fn list_for_run(db: &Database, run_id: &str) -> Result<Vec<PipelineFinding>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM pipeline_findings WHERE run_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt
            .query_map(params![run_id], from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn pending_for_run(db: &Database, run_id: &str) -> Result<Vec<PipelineFinding>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM pipeline_findings WHERE run_id = ?1 AND status = 'pending'
             ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt
            .query_map(params![run_id], from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Every finding recorded for a matter across all runs.
pub fn list_for_matter(
    db: &Database,
    matter_id: &str,
) -> Result<Vec<PipelineFinding>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM pipeline_findings WHERE matter_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt
            .query_map(params![matter_id], from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Latest established value per `category:field` for a matter, ignoring
/// findings produced by `exclude_run_id`.
///
/// "Latest" is by resolution time, falling back to creation time.
pub fn latest_established_values(
    db: &Database,
    matter_id: &str,
    exclude_run_id: &str,
) -> Result<HashMap<String, String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT category_key, field_key, value FROM pipeline_findings
             WHERE matter_id = ?1 AND run_id != ?2 AND status IN ('accepted', 'auto_applied')
             ORDER BY COALESCE(resolved_at, created_at) ASC, rowid ASC",
        )?;
        let mut values = HashMap::new();
        let rows = stmt.query_map(params![matter_id, exclude_run_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })?;
        for row in rows {
            let (category, field, value) = row?;
            // Ascending order: later rows overwrite earlier ones.
            values.insert(qualified_key(&category, &field), value);
        }
        Ok(values)
    })
}

/// Outcome of reconciling one finding.
#[derive(Debug, Clone, PartialEq)]
pub struct FindingResolution {
    pub finding_id: String,
    pub status: FindingStatus,
    pub existing_value: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Applies reconciliation outcomes in one transaction.
pub fn apply_resolutions(
    db: &Database,
    resolutions: &[FindingResolution],
) -> Result<(), DatabaseError> {
    db.with_tx(|tx| {
        let mut stmt = tx.prepare(
            "UPDATE pipeline_findings SET status = ?2, existing_value = ?3, resolved_at = ?4,
             resolved_by = CASE WHEN ?4 IS NULL THEN resolved_by ELSE 'pipeline' END
             WHERE id = ?1",
        )?;
        for r in resolutions {
            stmt.execute(params![
                r.finding_id,
                r.status.as_str(),
                r.existing_value,
                r.resolved_at.map(format_timestamp),
            ])?;
        }
        Ok(())
    })
}

/// Records a reviewer's decision on a finding.
pub fn resolve(
    db: &Database,
    finding_id: &str,
    status: FindingStatus,
    resolved_by: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE pipeline_findings SET status = ?2, resolved_by = ?3, resolved_at = ?4
             WHERE id = ?1",
            params![
                finding_id,
                status.as_str(),
                resolved_by,
                format_timestamp(Utc::now())
            ],
        )?;
        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "finding",
                id: finding_id.to_string(),
            });
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::run_repo;
    use crate::model::{Impact, PipelineRun};

    fn finding(run: &PipelineRun, field: &str, value: &str, status: FindingStatus) -> PipelineFinding {
        PipelineFinding {
            id: crate::model::new_id(),
            run_id: run.id.clone(),
            matter_id: run.matter_id.clone(),
            document_id: run.document_id.clone(),
            category_key: "dates".to_string(),
            field_key: field.to_string(),
            label: field.replace('_', " "),
            value: value.to_string(),
            source_quote: None,
            page_number: None,
            char_start: Some(0),
            char_end: Some(10),
            confidence: 0.9,
            impact: Impact::High,
            status,
            existing_value: None,
            resolved_by: None,
            resolved_at: None,
            created_at: Utc::now(),
        }
    }

    fn run(db: &Database) -> PipelineRun {
        let run = PipelineRun::new("firm-1", "matter-1", "doc-1", None);
        run_repo::insert(db, &run).unwrap();
        run
    }

    #[test]
    fn test_replace_for_run_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let r = run(&db);
        let findings = vec![
            finding(&r, "closing_date", "2024-06-01", FindingStatus::Pending),
            finding(&r, "signing_date", "2024-05-01", FindingStatus::Pending),
        ];
        replace_for_run(&db, &r.id, &findings).unwrap();
        replace_for_run(&db, &r.id, &findings).unwrap();

        let stored = list_for_run(&db, &r.id).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(pending_for_run(&db, &r.id).unwrap().len(), 2);
    }

    #[test]
    fn test_latest_established_values_excludes_run_and_pending() {
        let db = Database::open_in_memory().unwrap();
        let earlier = run(&db);
        let later = run(&db);
        let current = run(&db);

        replace_for_run(
            &db,
            &earlier.id,
            &[finding(&earlier, "closing_date", "2023-01-01", FindingStatus::Accepted)],
        )
        .unwrap();
        let mut newer = finding(&later, "closing_date", "2024-01-01", FindingStatus::AutoApplied);
        newer.resolved_at = Some(Utc::now() + chrono::Duration::seconds(5));
        replace_for_run(
            &db,
            &later.id,
            &[
                newer,
                finding(&later, "signing_date", "2024-02-02", FindingStatus::Pending),
            ],
        )
        .unwrap();
        replace_for_run(
            &db,
            &current.id,
            &[finding(&current, "closing_date", "2025-01-01", FindingStatus::Accepted)],
        )
        .unwrap();

        let values = latest_established_values(&db, "matter-1", &current.id).unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values["dates:closing_date"], "2024-01-01");
    }

    #[test]
    fn test_apply_resolutions() {
        let db = Database::open_in_memory().unwrap();
        let r = run(&db);
        let a = finding(&r, "closing_date", "2024-06-01", FindingStatus::Pending);
        let b = finding(&r, "signing_date", "2024-05-01", FindingStatus::Pending);
        replace_for_run(&db, &r.id, &[a.clone(), b.clone()]).unwrap();

        apply_resolutions(
            &db,
            &[
                FindingResolution {
                    finding_id: a.id.clone(),
                    status: FindingStatus::Conflict,
                    existing_value: Some("2024-01-01".to_string()),
                    resolved_at: Some(Utc::now()),
                },
                FindingResolution {
                    finding_id: b.id.clone(),
                    status: FindingStatus::Pending,
                    existing_value: None,
                    resolved_at: None,
                },
            ],
        )
        .unwrap();

        let stored = list_for_run(&db, &r.id).unwrap();
        let a = stored.iter().find(|f| f.id == a.id).unwrap();
        assert_eq!(a.status, FindingStatus::Conflict);
        assert_eq!(a.existing_value.as_deref(), Some("2024-01-01"));
        assert_eq!(a.resolved_by.as_deref(), Some("pipeline"));
        let b = stored.iter().find(|f| f.id == b.id).unwrap();
        assert_eq!(b.status, FindingStatus::Pending);
        assert!(b.resolved_at.is_none());
        assert!(b.resolved_by.is_none());
    }

    #[test]
    fn test_resolve_by_reviewer() {
        let db = Database::open_in_memory().unwrap();
        let r = run(&db);
        let a = finding(&r, "closing_date", "2024-06-01", FindingStatus::Pending);
        replace_for_run(&db, &r.id, &[a.clone()]).unwrap();

        resolve(&db, &a.id, FindingStatus::Accepted, "user-9").unwrap();
        let stored = &list_for_matter(&db, "matter-1").unwrap()[0];
        assert_eq!(stored.status, FindingStatus::Accepted);
        assert_eq!(stored.resolved_by.as_deref(), Some("user-9"));

        assert!(matches!(
            resolve(&db, "missing", FindingStatus::Rejected, "user-9"),
            Err(DatabaseError::NotFound { .. })
        ));
    }
}
