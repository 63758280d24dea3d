//! SQL schema for the Silo SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- The event log is strictly append-only.
-- No UPDATE or DELETE is ever issued against this table.
CREATE TABLE IF NOT EXISTS events (
    event_id       TEXT PRIMARY KEY,
    name           TEXT NOT NULL,    -- {family}.{action}.{phase}
    subject_id     TEXT NOT NULL,
    subject_type   TEXT NOT NULL,
    data           TEXT NOT NULL,    -- JSON payload
    user_id        TEXT NOT NULL,
    source         TEXT NOT NULL,    -- 'api' | 'automation' | 'sync' | 'migration'
    recorded_at    TEXT NOT NULL,    -- ISO 8601 UTC; server-assigned
    correlation_id TEXT,
    metadata       TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS events_subject_idx     ON events(subject_id);
CREATE INDEX IF NOT EXISTS events_correlation_idx ON events(correlation_id);
CREATE INDEX IF NOT EXISTS events_name_time_idx   ON events(name, recorded_at);

-- Projection tables. Derived state: rebuildable by replaying the log.

CREATE TABLE IF NOT EXISTS entities (
    entity_id    TEXT PRIMARY KEY,
    workspace_id TEXT,
    user_id      TEXT NOT NULL,
    title        TEXT NOT NULL,
    body         TEXT NOT NULL DEFAULT '{}',
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL,
    deleted_at   TEXT              -- soft delete
);

CREATE INDEX IF NOT EXISTS entities_user_idx      ON entities(user_id);
CREATE INDEX IF NOT EXISTS entities_workspace_idx ON entities(workspace_id, user_id);

CREATE TABLE IF NOT EXISTS projects (
    project_id   TEXT PRIMARY KEY,
    workspace_id TEXT NOT NULL,
    user_id      TEXT NOT NULL,
    name         TEXT NOT NULL,
    description  TEXT,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS projects_user_idx      ON projects(user_id);
CREATE INDEX IF NOT EXISTS projects_workspace_idx ON projects(workspace_id, user_id);

CREATE TABLE IF NOT EXISTS workspace_members (
    workspace_id TEXT NOT NULL,
    user_id      TEXT NOT NULL,
    role         TEXT NOT NULL,    -- 'viewer' | 'editor' | 'admin' | 'owner'
    added_by     TEXT,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL,
    PRIMARY KEY (workspace_id, user_id)
);

CREATE TABLE IF NOT EXISTS api_keys (
    api_key_id   TEXT PRIMARY KEY,
    user_id      TEXT NOT NULL,
    workspace_id TEXT,
    name         TEXT NOT NULL,
    prefix       TEXT NOT NULL,
    digest       TEXT NOT NULL,    -- SHA-256 hex of the secret; plaintext never stored
    created_at   TEXT NOT NULL,
    revoked_at   TEXT
);

CREATE INDEX IF NOT EXISTS api_keys_user_idx ON api_keys(user_id);

-- Proposals are artifacts of the requested→validated flow; no completed
-- events are ever appended for rows in this table.
CREATE TABLE IF NOT EXISTS proposals (
    proposal_id    TEXT PRIMARY KEY,
    workspace_id   TEXT NOT NULL,
    target_family  TEXT NOT NULL,
    target_id      TEXT NOT NULL,
    operation      TEXT NOT NULL,
    payload        TEXT NOT NULL,
    correlation_id TEXT,
    status         TEXT NOT NULL DEFAULT 'pending',
    proposed_by    TEXT NOT NULL,
    reviewed_by    TEXT,
    created_at     TEXT NOT NULL,
    reviewed_at    TEXT
);

CREATE INDEX IF NOT EXISTS proposals_workspace_idx ON proposals(workspace_id, status);

CREATE TABLE IF NOT EXISTS workspace_settings (
    workspace_id TEXT PRIMARY KEY,
    rules        TEXT NOT NULL DEFAULT '{}',   -- JSON-encoded WorkspaceRules
    updated_at   TEXT NOT NULL
);

-- Completed executor steps, keyed by (event_id, label). Lets redelivered
-- events skip work that already ran to completion.
CREATE TABLE IF NOT EXISTS executor_steps (
    event_id     TEXT NOT NULL,
    label        TEXT NOT NULL,
    completed_at TEXT NOT NULL,
    PRIMARY KEY (event_id, label)
);

PRAGMA user_version = 1;
";
