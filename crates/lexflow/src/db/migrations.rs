//! Schema migrations.
//!
//! Applied versions are recorded in `_migrations`; each migration runs at
//! most once. Column additions are skipped when the column is already there
//! so databases created by older builds upgrade cleanly.

use rusqlite::Connection;

use super::error::DatabaseError;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
    kind: MigrationKind,
}

enum MigrationKind {
    Standard,
    /// ALTER TABLE ADD COLUMN, skipped if the column exists.
    AddColumn {
        table: &'static str,
        column: &'static str,
    },
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_matters_and_documents",
        sql: include_str!("sql/001_create_matters_documents.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 2,
        description: "create_pipeline_runs",
        sql: include_str!("sql/002_create_pipeline_runs.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 3,
        description: "create_pipeline_findings",
        sql: include_str!("sql/003_create_pipeline_findings.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 4,
        description: "create_pipeline_actions",
        sql: include_str!("sql/004_create_pipeline_actions.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 5,
        description: "create_review_tasks_and_timeline",
        sql: include_str!("sql/005_create_review_tasks_timeline.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 6,
        description: "add_risk_updated_at_to_matters",
        sql: include_str!("sql/006_add_risk_updated_at.sql"),
        kind: MigrationKind::AddColumn {
            table: "matters",
            column: "risk_updated_at",
        },
    },
];

const CREATE_LEDGER: &str = "CREATE TABLE IF NOT EXISTS _migrations (
    version INTEGER PRIMARY KEY,
    description TEXT NOT NULL,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);";

/// Highest version recorded in `_migrations`, 0 on a fresh database.
fn recorded_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version = conn.query_row("SELECT MAX(version) FROM _migrations", [], |r| {
        r.get::<_, Option<u32>>(0)
    })?;
    Ok(version.unwrap_or(0))
}

/// Applies every migration newer than the recorded version. Each one runs in
/// its own transaction together with its ledger row.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(CREATE_LEDGER)?;
    let recorded = recorded_version(conn)?;

    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > recorded).collect();
    if pending.is_empty() {
        log::debug!("Database schema is at v{}", recorded);
        return Ok(());
    }

    for migration in pending {
        apply(conn, migration)?;
    }
    Ok(())
}

fn apply(conn: &Connection, migration: &Migration) -> Result<(), DatabaseError> {
    let failed = |e: rusqlite::Error| DatabaseError::Migration {
        version: migration.version,
        reason: e.to_string(),
    };

    let skip = match &migration.kind {
        MigrationKind::Standard => false,
        MigrationKind::AddColumn { table, column } => column_exists(conn, table, column)?,
    };

    let tx = conn.unchecked_transaction().map_err(failed)?;
    if skip {
        log::info!(
            "Migration v{} ({}) already satisfied, recording only",
            migration.version,
            migration.description
        );
    } else {
        log::info!("Applying migration v{}: {}", migration.version, migration.description);
        tx.execute_batch(migration.sql).map_err(failed)?;
    }
    tx.execute(
        "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
        rusqlite::params![migration.version, migration.description],
    )
    .map_err(failed)?;
    tx.commit().map_err(failed)
}

/// Whether `table` has a column named `column`. Table names are restricted
/// to identifier characters since they are interpolated into the pragma.
fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, DatabaseError> {
    if table.is_empty() || !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(DatabaseError::Migration {
            version: 0,
            reason: format!("Invalid table name: {}", table),
        });
    }
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}
