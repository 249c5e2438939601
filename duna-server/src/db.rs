//! SQLite persistence for DUNA records.
//!
//! One table, one row per record, keyed by ULID. The parameters map is
//! stored as JSON text. Uses WAL mode for concurrent reads during writes.

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::id;
use crate::record::{DunaRecord, NewRecord, RecordPatch};
use crate::transform::SourceTransform;

const COLUMNS: &str = "id, name, description, membership_status, compliance_level, \
     parameters_json, contract_generated, contract_source, contract_address, \
     created_at, updated_at, source_transform";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid record: {0}")]
    Invalid(String),
}

/// Record store handle wrapping a SQLite connection.
pub struct RecordStore {
    db: Mutex<Connection>,
}

impl RecordStore {
    /// Open (or create) the store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let store = Self {
            db: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub fn open_memory() -> Result<Self, StoreError> {
        let store = Self {
            db: Mutex::new(Connection::open_in_memory()?),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        let db = self.db.lock();
        db.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS duna_records (
                id                  TEXT PRIMARY KEY,
                name                TEXT NOT NULL,
                description         TEXT NOT NULL DEFAULT '',
                membership_status   TEXT NOT NULL DEFAULT 'pending',
                compliance_level    INTEGER NOT NULL DEFAULT 0,
                parameters_json     TEXT NOT NULL DEFAULT '{}',
                contract_generated  INTEGER NOT NULL DEFAULT 0,
                contract_source     TEXT NOT NULL DEFAULT '',
                contract_address    TEXT NOT NULL DEFAULT '',
                created_at          INTEGER NOT NULL,
                updated_at          INTEGER NOT NULL,
                source_transform    TEXT NOT NULL DEFAULT 'identity'
            );
            ",
        )?;

        // Databases created before a column existed get it added here.
        let migrations =
            ["ALTER TABLE duna_records ADD COLUMN source_transform TEXT NOT NULL DEFAULT 'identity'"];
        for sql in &migrations {
            // "duplicate column name" means it is already there
            let _ = db.execute(sql, []);
        }
        Ok(())
    }

    /// Insert a new record. The id and timestamps are assigned here.
    pub fn insert(&self, new: NewRecord) -> Result<DunaRecord, StoreError> {
        if new.name.trim().is_empty() {
            return Err(StoreError::Invalid("name must not be blank".into()));
        }
        let now = now_millis();
        let record = DunaRecord {
            id: id::new_record_id(),
            name: new.name,
            description: new.description,
            membership_status: new.membership_status,
            compliance_level: new.compliance_level,
            parameters: new.parameters,
            contract_generated: false,
            contract_source: String::new(),
            contract_address: String::new(),
            source_transform: SourceTransform::Identity,
            created_at: from_millis(now),
            updated_at: from_millis(now),
        };
        let params_json = serde_json::to_string(&record.parameters)?;

        let db = self.db.lock();
        db.execute(
            &format!("INSERT INTO duna_records ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, '', '', ?7, ?7, 'identity')"),
            params![
                record.id,
                record.name,
                record.description,
                record.membership_status,
                record.compliance_level,
                params_json,
                now,
            ],
        )?;
        Ok(record)
    }

    /// All records, oldest first. Records created in the same millisecond
    /// keep their insertion order.
    pub fn list(&self) -> Result<Vec<DunaRecord>, StoreError> {
        let db = self.db.lock();
        let mut stmt = db.prepare(&format!(
            "SELECT {COLUMNS} FROM duna_records ORDER BY created_at, rowid"
        ))?;
        let records = stmt
            .query_map([], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn get(&self, id: &str) -> Result<Option<DunaRecord>, StoreError> {
        let db = self.db.lock();
        Ok(fetch(&db, id)?)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let db = self.db.lock();
        let n: i64 = db.query_row("SELECT COUNT(*) FROM duna_records", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Apply a partial update to a record's descriptive fields.
    /// Returns `None` if the record does not exist.
    pub fn update(&self, id: &str, patch: RecordPatch) -> Result<Option<DunaRecord>, StoreError> {
        if patch.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(StoreError::Invalid("name must not be blank".into()));
        }
        let db = self.db.lock();
        let Some(mut record) = fetch(&db, id)? else {
            return Ok(None);
        };
        patch.apply(&mut record);
        let now = now_millis();
        record.updated_at = from_millis(now);

        db.execute(
            "UPDATE duna_records
             SET name = ?2, description = ?3, membership_status = ?4,
                 compliance_level = ?5, parameters_json = ?6, updated_at = ?7
             WHERE id = ?1",
            params![
                record.id,
                record.name,
                record.description,
                record.membership_status,
                record.compliance_level,
                serde_json::to_string(&record.parameters)?,
                now,
            ],
        )?;
        Ok(Some(record))
    }

    /// Delete a record. Returns whether a row was removed.
    pub fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let db = self.db.lock();
        let n = db.execute("DELETE FROM duna_records WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }

    /// Write the pipeline-state fields of a record in one statement.
    /// `transform` is the policy `contract_source` was encoded with.
    ///
    /// Only succeeds while `contract_generated` is still false, so two racing
    /// pipeline runs can never both record a deployment. Returns whether the
    /// row was updated.
    pub fn record_deployment(
        &self,
        id: &str,
        contract_source: &str,
        contract_address: &str,
        transform: SourceTransform,
    ) -> Result<bool, StoreError> {
        if contract_source.is_empty() || contract_address.is_empty() {
            return Err(StoreError::Invalid(
                "contract source and address must both be non-empty".into(),
            ));
        }
        let db = self.db.lock();
        let n = db.execute(
            "UPDATE duna_records
             SET contract_generated = 1, contract_source = ?2, contract_address = ?3,
                 source_transform = ?4, updated_at = ?5
             WHERE id = ?1 AND contract_generated = 0",
            params![
                id,
                contract_source,
                contract_address,
                transform.as_str(),
                now_millis()
            ],
        )?;
        Ok(n == 1)
    }
}

fn fetch(db: &Connection, id: &str) -> rusqlite::Result<Option<DunaRecord>> {
    db.query_row(
        &format!("SELECT {COLUMNS} FROM duna_records WHERE id = ?1"),
        params![id],
        row_to_record,
    )
    .optional()
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<DunaRecord> {
    let params_json: String = row.get(5)?;
    let parameters = serde_json::from_str(&params_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let transform: String = row.get(11)?;
    let source_transform = transform.parse::<SourceTransform>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(11, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(DunaRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        membership_status: row.get(3)?,
        compliance_level: row.get(4)?,
        parameters,
        contract_generated: row.get(6)?,
        contract_source: row.get(7)?,
        contract_address: row.get(8)?,
        source_transform,
        created_at: from_millis(row.get(9)?),
        updated_at: from_millis(row.get(10)?),
    })
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
