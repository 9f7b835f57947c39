//! SQLite schema definitions
//!
//! Every logical collection shares one table per record class, keyed by
//! `(database, collection)`. Instants are stored as Unix milliseconds.

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Complete schema SQL
pub const SCHEMA: &str = r#"
-- =============================================================================
-- Infrastructure: Schema version tracking
-- =============================================================================
CREATE TABLE IF NOT EXISTS schema_version (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL,
    applied_at INTEGER NOT NULL,
    description TEXT
);

CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at INTEGER NOT NULL,
    checksum TEXT NOT NULL,
    execution_time_ms INTEGER,
    success INTEGER NOT NULL DEFAULT 1
);

-- =============================================================================
-- 1. Raw records (insertion order = id order)
-- =============================================================================
CREATE TABLE IF NOT EXISTS raw_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    database TEXT NOT NULL,
    collection TEXT NOT NULL,
    recv_time INTEGER NOT NULL,
    entity_id TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    attr_name TEXT NOT NULL,
    attr_type TEXT NOT NULL,
    attr_value TEXT NOT NULL,
    size_bytes INTEGER NOT NULL CHECK(size_bytes >= 0)
);

CREATE INDEX IF NOT EXISTS idx_raw_records_collection ON raw_records(database, collection, id);
CREATE INDEX IF NOT EXISTS idx_raw_records_recv_time ON raw_records(database, collection, recv_time);

-- =============================================================================
-- 2. Bounded collections (size / document caps on raw collections)
-- =============================================================================
CREATE TABLE IF NOT EXISTS bounded_collections (
    database TEXT NOT NULL,
    collection TEXT NOT NULL,
    max_bytes INTEGER CHECK(max_bytes IS NULL OR max_bytes > 0),
    max_docs INTEGER CHECK(max_docs IS NULL OR max_docs > 0),
    PRIMARY KEY (database, collection)
);

-- =============================================================================
-- 3. Aggregated buckets
-- =============================================================================
CREATE TABLE IF NOT EXISTS aggregated_buckets (
    database TEXT NOT NULL,
    collection TEXT NOT NULL,
    resolution TEXT NOT NULL CHECK(resolution IN ('second', 'minute', 'hour', 'day', 'month')),
    origin INTEGER NOT NULL,
    attr_name TEXT NOT NULL,
    attr_type TEXT NOT NULL,
    count INTEGER NOT NULL,
    n_count INTEGER NOT NULL DEFAULT 0,
    n_sum REAL,
    n_sum2 REAL,
    n_min REAL,
    n_max REAL,
    first_at INTEGER NOT NULL,
    last_at INTEGER NOT NULL,
    last_value TEXT NOT NULL,
    PRIMARY KEY (database, collection, resolution, origin, attr_name)
);

CREATE TABLE IF NOT EXISTS aggregated_occurrences (
    database TEXT NOT NULL,
    collection TEXT NOT NULL,
    resolution TEXT NOT NULL,
    origin INTEGER NOT NULL,
    attr_name TEXT NOT NULL,
    value TEXT NOT NULL,
    count INTEGER NOT NULL,
    PRIMARY KEY (database, collection, resolution, origin, attr_name, value)
);

-- =============================================================================
-- 4. Collection name mappings (insert once, never updated)
-- =============================================================================
CREATE TABLE IF NOT EXISTS name_mappings (
    database TEXT NOT NULL,
    readable TEXT NOT NULL,
    collection TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (database, readable)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_name_mappings_collection ON name_mappings(database, collection);
"#;
