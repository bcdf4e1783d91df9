//! Matter repository. The pipeline only reads the taxonomy pack binding and
//! writes the aggregate risk assessment.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};
use crate::model::{format_timestamp, parse_timestamp, Matter};
use crate::risk::RiskAssessment;

fn from_row(row: &Row<'_>) -> rusqlite::Result<Matter> {
    let factors_raw: Option<String> = row.get("risk_factors")?;
    let risk_factors = match factors_raw {
        Some(raw) => serde_json::from_str(&raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
        None => Vec::new(),
    };
    let risk_updated_at: Option<String> = row.get("risk_updated_at")?;
    Ok(Matter {
        id: row.get("id")?,
        firm_id: row.get("firm_id")?,
        taxonomy_pack_id: row.get("taxonomy_pack_id")?,
        risk_score: row.get("risk_score")?,
        risk_factors,
        risk_updated_at: risk_updated_at.as_deref().map(parse_timestamp),
    })
}

pub fn insert(
    db: &Database,
    id: &str,
    firm_id: &str,
    taxonomy_pack_id: Option<&str>,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO matters (id, firm_id, taxonomy_pack_id) VALUES (?1, ?2, ?3)",
            params![id, firm_id, taxonomy_pack_id],
        )?;
        Ok(())
    })
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<Matter>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row("SELECT * FROM matters WHERE id = ?1", params![id], from_row)
            .optional()?)
    })
}

/// Pack id bound to the matter, if the matter exists and has one.
pub fn taxonomy_pack_id(db: &Database, id: &str) -> Result<Option<String>, DatabaseError> {
    db.with_conn(|conn| {
        let pack: Option<Option<String>> = conn
            .query_row(
                "SELECT taxonomy_pack_id FROM matters WHERE id = ?1",
                params![id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(pack.flatten())
    })
}

pub fn update_risk(
    db: &Database,
    id: &str,
    assessment: &RiskAssessment,
) -> Result<(), DatabaseError> {
    let factors = serde_json::to_string(&assessment.factors).map_err(|e| DatabaseError::Json {
        column: "risk_factors",
        source: e,
    })?;
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE matters SET risk_score = ?2, risk_factors = ?3, risk_updated_at = ?4
             WHERE id = ?1",
            params![id, assessment.score, factors, format_timestamp(Utc::now())],
        )?;
        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "matter",
                id: id.to_string(),
            });
        }
        Ok(())
    })
}
