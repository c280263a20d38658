//! Schema definitions.

pub(crate) const SCHEMA_VERSION: i32 = 1;

const SCHEMA_VERSION_TABLE: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL,
    updated_at TEXT NOT NULL
);
";

// `seq` preserves insertion order for listings; `id` is the public ULID.
const TEMPLATES_TABLE: &str = "
CREATE TABLE IF NOT EXISTS templates (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    workload TEXT NOT NULL,
    created_at TEXT NOT NULL,
    engine_version TEXT NOT NULL,
    spec_json TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_templates_name ON templates(name);
";

pub(crate) fn all_schemas() -> [&'static str; 2] {
    [SCHEMA_VERSION_TABLE, TEMPLATES_TABLE]
}
