//! SQLite-backed template store.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row};

use super::{Database, db_err};
use crate::template::{TemplateId, TemplateRecord, TemplateSpec, TemplateStore};
use vmforge_shared::errors::{ForgeError, ForgeResult};

/// Row as stored, before the blob is decoded.
struct RawTemplateRow {
    id: String,
    name: String,
    created_at: String,
    engine_version: String,
    spec_json: String,
}

impl RawTemplateRow {
    const COLUMNS: &'static str = "id, name, created_at, engine_version, spec_json";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            created_at: row.get(2)?,
            engine_version: row.get(3)?,
            spec_json: row.get(4)?,
        })
    }

    /// Decode into a record, re-validating the spec.
    fn decode(self) -> ForgeResult<TemplateRecord> {
        let id: TemplateId = self
            .id
            .parse()
            .map_err(|_| ForgeError::corrupt(&self.id, "invalid template id"))?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| ForgeError::corrupt(&self.id, format!("invalid created_at: {}", e)))?
            .with_timezone(&Utc);
        let spec: TemplateSpec = serde_json::from_str(&self.spec_json)
            .map_err(|e| ForgeError::corrupt(&self.id, format!("invalid spec: {}", e)))?;
        spec.validate()
            .map_err(|e| ForgeError::corrupt(&self.id, e.to_string()))?;

        Ok(TemplateRecord {
            id,
            name: self.name,
            created_at,
            engine_version: self.engine_version,
            spec,
        })
    }
}

/// Template store persisting records in the `templates` table.
#[derive(Clone)]
pub struct SqliteTemplateStore {
    db: Database,
    engine_version: String,
}

impl SqliteTemplateStore {
    pub fn new(db: Database, engine_version: impl Into<String>) -> Self {
        Self {
            db,
            engine_version: engine_version.into(),
        }
    }
}

impl TemplateStore for SqliteTemplateStore {
    fn save(&self, name: &str, spec: &TemplateSpec) -> ForgeResult<TemplateRecord> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ForgeError::validation("name", "template name must not be empty"));
        }
        spec.validate()?;

        let record = TemplateRecord {
            id: TemplateId::new(),
            name: name.to_string(),
            created_at: Utc::now(),
            engine_version: self.engine_version.clone(),
            spec: spec.clone(),
        };
        let spec_json = serde_json::to_string(&record.spec)?;

        let conn = self.db.conn();
        db_err!(conn.execute(
            "INSERT INTO templates (id, name, workload, created_at, engine_version, spec_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                record.id.to_string(),
                record.name,
                record.spec.kind().as_str(),
                record.created_at.to_rfc3339(),
                record.engine_version,
                spec_json,
            ],
        ))?;

        tracing::info!(
            template_id = %record.id,
            name = %record.name,
            workload = %record.spec.kind(),
            "Saved template"
        );

        Ok(record)
    }

    fn load(&self, id: &TemplateId) -> ForgeResult<TemplateRecord> {
        let conn = self.db.conn();
        let raw = db_err!(
            conn.query_row(
                &format!(
                    "SELECT {} FROM templates WHERE id = ?1",
                    RawTemplateRow::COLUMNS
                ),
                [id.to_string()],
                RawTemplateRow::from_row,
            )
            .optional()
        )?
        .ok_or_else(|| ForgeError::NotFound(format!("template {}", id)))?;

        raw.decode()
    }

    fn list(&self) -> ForgeResult<Vec<TemplateRecord>> {
        let conn = self.db.conn();
        let mut stmt = db_err!(conn.prepare(&format!(
            "SELECT {} FROM templates ORDER BY seq ASC",
            RawTemplateRow::COLUMNS
        )))?;
        let rows = db_err!(stmt.query_map([], RawTemplateRow::from_row))?;

        let mut records = Vec::new();
        for row in rows {
            let raw = db_err!(row)?;
            let id = raw.id.clone();
            match raw.decode() {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(template_id = %id, error = %e, "Skipping unreadable template");
                }
            }
        }

        Ok(records)
    }

    fn delete(&self, id: &TemplateId) -> ForgeResult<()> {
        let conn = self.db.conn();
        let deleted = db_err!(conn.execute(
            "DELETE FROM templates WHERE id = ?1",
            [id.to_string()]
        ))?;
        if deleted == 0 {
            return Err(ForgeError::NotFound(format!("template {}", id)));
        }
        tracing::info!(template_id = %id, "Deleted template");
        Ok(())
    }
}
