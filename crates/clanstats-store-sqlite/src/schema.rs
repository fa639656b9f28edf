//! SQL schema for the clan statistics SQLite store.
//!
//! Executed once at connection startup via `PRAGMA user_version`. Future
//! migrations will be gated on that version number.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Snapshots are strictly append-only.
-- No UPDATE or DELETE is ever issued against this table.
CREATE TABLE IF NOT EXISTS snapshots (
    snapshot_id    TEXT PRIMARY KEY,   -- UUIDv7 derived from taken_at
    tag            TEXT NOT NULL,
    taken_at       TEXT NOT NULL,      -- fixed-width RFC 3339 UTC, sortable as text
    record_json    TEXT NOT NULL,      -- record with heavy fields stripped
    payload        BLOB NOT NULL,      -- compact payload of heavy fields
    payload_digest TEXT NOT NULL,
    UNIQUE (tag, taken_at)
);

-- Denormalised per-clan fields, replaced wholesale by each refresh.
CREATE TABLE IF NOT EXISTS entities (
    tag             TEXT PRIMARY KEY,
    name            TEXT NOT NULL,
    slug            TEXT NOT NULL,     -- not unique: slugs may collide
    level_index     TEXT NOT NULL DEFAULT '{}',
    compact_payload BLOB NOT NULL,
    payload_digest  TEXT NOT NULL,
    snapshot_id     TEXT NOT NULL REFERENCES snapshots(snapshot_id),
    members         INTEGER NOT NULL DEFAULT 0,
    clan_points     INTEGER NOT NULL DEFAULT 0,
    country_code    TEXT,
    current_stats   TEXT NOT NULL,     -- JSON Stats
    day_delta       TEXT NOT NULL,     -- JSON Stats
    week_delta      TEXT NOT NULL,     -- JSON Stats
    page_views      INTEGER NOT NULL DEFAULT 0,
    updated_at      TEXT NOT NULL
);

-- Latest state of each player seen in a roster.
CREATE TABLE IF NOT EXISTS players (
    tag         TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    slug        TEXT NOT NULL,
    level_index TEXT NOT NULL DEFAULT '{}',
    record_json TEXT NOT NULL,
    payload     BLOB NOT NULL,
    updated_at  TEXT NOT NULL
);

-- Single-row status rollup.
CREATE TABLE IF NOT EXISTS status (
    id          INTEGER PRIMARY KEY CHECK (id = 1),
    status_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS snapshots_tag_time_idx ON snapshots(tag, taken_at);
CREATE INDEX IF NOT EXISTS entities_slug_idx      ON entities(slug);
CREATE INDEX IF NOT EXISTS players_slug_idx       ON players(slug);

PRAGMA user_version = 1;
";
