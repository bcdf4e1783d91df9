//! Document repository: the document store collaborator backed by SQLite.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};
use crate::model::{format_timestamp, DocumentRecord};

fn from_row(row: &Row<'_>) -> rusqlite::Result<DocumentRecord> {
    Ok(DocumentRecord {
        id: row.get("id")?,
        firm_id: row.get("firm_id")?,
        matter_id: row.get("matter_id")?,
        filename: row.get("filename")?,
        mime_type: row.get("mime_type")?,
        storage_bucket: row.get("storage_bucket")?,
        storage_path: row.get("storage_path")?,
        extracted_text: row.get("extracted_text")?,
    })
}

pub fn insert(db: &Database, doc: &DocumentRecord) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let now = format_timestamp(Utc::now());
        conn.execute(
            "INSERT INTO documents (id, firm_id, matter_id, filename, mime_type, storage_bucket,
             storage_path, extracted_text, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                doc.id,
                doc.firm_id,
                doc.matter_id,
                doc.filename,
                doc.mime_type,
                doc.storage_bucket,
                doc.storage_path,
                doc.extracted_text,
                now,
            ],
        )?;
        Ok(())
    })
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<DocumentRecord>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM documents WHERE id = ?1",
                params![id],
                from_row,
            )
            .optional()?)
    })
}

pub fn set_extracted_text(db: &Database, id: &str, text: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE documents SET extracted_text = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, text, format_timestamp(Utc::now())],
        )?;
        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "document",
                id: id.to_string(),
            });
        }
        Ok(())
    })
}
