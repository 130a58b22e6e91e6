//! SQL schema for the levy SQLite store.
//!
//! Executed once at connection startup via `PRAGMA user_version`. Future
//! migrations will be gated on that version number.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Content-addressed provenance. Immutable apart from metadata fill-in.
CREATE TABLE IF NOT EXISTS source_docs (
    id            TEXT PRIMARY KEY,
    origin_url    TEXT NOT NULL,
    content_hash  TEXT NOT NULL,     -- sha256, lowercase hex
    is_demo       INTEGER NOT NULL DEFAULT 0,
    retrieved_at  TEXT NOT NULL,     -- RFC 3339 UTC; first ingest of these bytes
    published_at  TEXT,              -- YYYY-MM-DD
    title         TEXT,
    mime_type     TEXT,
    UNIQUE (origin_url, content_hash)
);

-- Never deleted. A changed computation gets a new version string.
CREATE TABLE IF NOT EXISTS methodology_versions (
    id           TEXT PRIMARY KEY,
    kind         TEXT NOT NULL CHECK (kind IN ('fact', 'estimate', 'signal')),
    name         TEXT NOT NULL,
    version      TEXT NOT NULL,
    description  TEXT,
    UNIQUE (name, version)
);

-- Geometry is GeoJSON in EPSG:4326; only the latest shape is kept.
CREATE TABLE IF NOT EXISTS geo_units (
    id             TEXT PRIMARY KEY,
    unit_type      TEXT NOT NULL,
    geoid          TEXT NOT NULL,
    name           TEXT NOT NULL,
    state_code     TEXT,
    geometry       TEXT NOT NULL,
    srid           INTEGER NOT NULL DEFAULT 4326,
    area_m2        REAL NOT NULL,
    rep_lon        REAL,
    rep_lat        REAL,
    source_doc_id  TEXT NOT NULL REFERENCES source_docs(id),
    UNIQUE (unit_type, geoid)
);

-- state_code may be NULL (federal); upserts conflict on the derived id.
CREATE TABLE IF NOT EXISTS jurisdictions (
    id                      TEXT PRIMARY KEY,
    jurisdiction_type       TEXT NOT NULL,
    name                    TEXT NOT NULL,
    state_code              TEXT,
    external_id             TEXT NOT NULL,
    parent_jurisdiction_id  TEXT REFERENCES jurisdictions(id),
    geometry                TEXT,
    srid                    INTEGER NOT NULL DEFAULT 4326,
    rep_lon                 REAL,
    rep_lat                 REAL,
    source_doc_id           TEXT NOT NULL REFERENCES source_docs(id),
    CHECK (parent_jurisdiction_id IS NULL OR parent_jurisdiction_id != id)
);

-- Overlay edges; one row per methodology version.
CREATE TABLE IF NOT EXISTS geo_unit_jurisdictions (
    geo_unit_id             TEXT NOT NULL REFERENCES geo_units(id),
    jurisdiction_id         TEXT NOT NULL REFERENCES jurisdictions(id),
    methodology_version_id  TEXT NOT NULL REFERENCES methodology_versions(id),
    coverage_ratio          REAL NOT NULL CHECK (coverage_ratio >= 0 AND coverage_ratio <= 1),
    coverage_area           REAL NOT NULL,
    source_doc_id           TEXT NOT NULL REFERENCES source_docs(id),
    PRIMARY KEY (geo_unit_id, jurisdiction_id, methodology_version_id)
);

CREATE TABLE IF NOT EXISTS tax_instruments (
    id               TEXT PRIMARY KEY,
    jurisdiction_id  TEXT NOT NULL REFERENCES jurisdictions(id),
    tax_type         TEXT NOT NULL,
    name             TEXT NOT NULL,
    is_active        INTEGER NOT NULL DEFAULT 1,
    source_doc_id    TEXT NOT NULL REFERENCES source_docs(id),
    UNIQUE (jurisdiction_id, tax_type, name)
);

CREATE TABLE IF NOT EXISTS tax_rate_snapshots (
    id                      TEXT PRIMARY KEY,
    instrument_id           TEXT NOT NULL REFERENCES tax_instruments(id),
    methodology_version_id  TEXT NOT NULL REFERENCES methodology_versions(id),
    effective_date          TEXT NOT NULL,   -- YYYY-MM-DD
    end_date                TEXT,
    rate                    REAL,            -- headline rate; NULL if unparseable
    value_json              TEXT NOT NULL,   -- JSON-encoded RateValue
    metadata_json           TEXT NOT NULL DEFAULT '{}',
    source_doc_id           TEXT NOT NULL REFERENCES source_docs(id),
    UNIQUE (instrument_id, methodology_version_id, effective_date)
);

CREATE INDEX IF NOT EXISTS geo_units_state_idx      ON geo_units(state_code);
CREATE INDEX IF NOT EXISTS jurisdictions_state_idx  ON jurisdictions(state_code);
CREATE INDEX IF NOT EXISTS jurisdictions_parent_idx ON jurisdictions(parent_jurisdiction_id);
CREATE INDEX IF NOT EXISTS guj_unit_idx             ON geo_unit_jurisdictions(geo_unit_id, methodology_version_id);
CREATE INDEX IF NOT EXISTS instruments_juris_idx    ON tax_instruments(jurisdiction_id, tax_type);
CREATE INDEX IF NOT EXISTS snapshots_instrument_idx ON tax_rate_snapshots(instrument_id, effective_date);

PRAGMA user_version = 1;
";
