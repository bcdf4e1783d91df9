//! Action repository.

use rusqlite::{params, Row};

use super::{parse_column, Database, DatabaseError};
use crate::model::{format_timestamp, parse_timestamp, PipelineAction};

fn from_row(row: &Row<'_>) -> rusqlite::Result<PipelineAction> {
    let payload_raw: String = row.get("payload")?;
    let payload = serde_json::from_str(&payload_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let created_at: String = row.get("created_at")?;
    Ok(PipelineAction {
        id: row.get("id")?,
        run_id: row.get("run_id")?,
        matter_id: row.get("matter_id")?,
        action_type: parse_column(row, "action_type")?,
        title: row.get("title")?,
        description: row.get("description")?,
        priority: row.get("priority")?,
        status: parse_column(row, "status")?,
        is_deterministic: row.get("is_deterministic")?,
        payload,
        trigger_finding_id: row.get("trigger_finding_id")?,
        trigger_rule_id: row.get("trigger_rule_id")?,
        created_at: parse_timestamp(&created_at),
    })
}

/// Replaces the actions of `run_id` in one transaction.
pub fn replace_for_run(
    db: &Database,
    run_id: &str,
    actions: &[PipelineAction],
) -> Result<(), DatabaseError> {
    let payloads = actions
        .iter()
        .map(|a| {
            serde_json::to_string(&a.payload).map_err(|e| DatabaseError::Json {
                column: "payload",
                source: e,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    db.with_tx(|tx| {
        tx.execute(
            "DELETE FROM pipeline_actions WHERE run_id = ?1",
            params![run_id],
        )?;
        let mut stmt = tx.prepare(
            "INSERT INTO pipeline_actions (id, run_id, matter_id, action_type, title, description,
             priority, status, is_deterministic, payload, trigger_finding_id, trigger_rule_id,
             created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )?;
        for (action, payload) in actions.iter().zip(payloads) {
            stmt.execute(params![
                action.id,
                action.run_id,
                action.matter_id,
                action.action_type.as_str(),
                action.title,
                action.description,
                action.priority,
                action.status.as_str(),
                action.is_deterministic,
                payload,
                action.trigger_finding_id,
                action.trigger_rule_id,
                format_timestamp(action.created_at),
            ])?;
        }
        Ok(())
    })
}

/// Actions of a run, most urgent first.
pub fn list_for_run(db: &Database, run_id: &str) -> Result<Vec<PipelineAction>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM pipeline_actions WHERE run_id = ?1 ORDER BY priority ASC, rowid ASC",
        )?;
        let rows = stmt
            .query_map(params![run_id], from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::run_repo;
    use crate::model::{ActionType, PipelineRun};

    #[test]
    fn test_replace_and_list() {
        let db = Database::open_in_memory().unwrap();
        let run = PipelineRun::new("firm-1", "matter-1", "doc-1", None);
        run_repo::insert(&db, &run).unwrap();

        let mut deadline =
            PipelineAction::new(&run.id, &run.matter_id, ActionType::CreateDeadline, "File", 1);
        deadline.payload = serde_json::json!({"dueDate": "2024-06-01"});
        deadline.trigger_rule_id = Some("t1".to_string());
        let flag = PipelineAction::new(&run.id, &run.matter_id, ActionType::FlagRisk, "Conflict", 0);

        replace_for_run(&db, &run.id, &[deadline.clone(), flag.clone()]).unwrap();
        replace_for_run(&db, &run.id, &[deadline.clone(), flag.clone()]).unwrap();

        let stored = list_for_run(&db, &run.id).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].action_type, ActionType::FlagRisk);
        assert_eq!(stored[1].payload["dueDate"], "2024-06-01");
        assert_eq!(stored[1].trigger_rule_id.as_deref(), Some("t1"));
        assert!(stored[1].is_deterministic);
    }
}
