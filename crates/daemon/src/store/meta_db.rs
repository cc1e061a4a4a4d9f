use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::{params, Connection};

const MIGRATION_V1_SQL: &str = r#"
CREATE TABLE page_content (
    page_id         TEXT PRIMARY KEY,
    blocks          TEXT NOT NULL,
    version         INTEGER NOT NULL CHECK (version >= 1),
    created_by      TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    updated_by      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TABLE content_history (
    page_id         TEXT NOT NULL,
    version         INTEGER NOT NULL,
    blocks          TEXT NOT NULL,
    changed_by      TEXT NOT NULL,
    changed_at      TEXT NOT NULL,
    change_type     TEXT NOT NULL
        CHECK (change_type IN ('create', 'update', 'block-add', 'block-delete', 'restore')),
    change_summary  TEXT NULL,
    PRIMARY KEY (page_id, version)
);
"#;

const MIGRATION_V2_SQL: &str = r#"
CREATE TABLE content_locks (
    page_id         TEXT PRIMARY KEY,
    locked_by       TEXT NOT NULL,
    session_id      TEXT NOT NULL,
    locked_at       TEXT NOT NULL,
    expires_at      TEXT NOT NULL
);

CREATE INDEX content_locks_expires_idx
    ON content_locks (expires_at);
"#;

const MIGRATION_V3_SQL: &str = r#"
CREATE TABLE block_comments (
    id              TEXT PRIMARY KEY,
    page_id         TEXT NOT NULL,
    block_id        TEXT NOT NULL,
    parent_id       TEXT NULL,
    content         TEXT NOT NULL,
    created_by      TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NULL,
    resolved_at     TEXT NULL,
    resolved_by     TEXT NULL,
    CHECK ((resolved_at IS NULL) = (resolved_by IS NULL))
);

CREATE INDEX block_comments_page_block_idx
    ON block_comments (page_id, block_id);

CREATE INDEX block_comments_parent_idx
    ON block_comments (parent_id);

CREATE TABLE comment_mentions (
    comment_id          TEXT NOT NULL REFERENCES block_comments (id) ON DELETE CASCADE,
    mentioned_user_id   TEXT NOT NULL,
    created_at          TEXT NOT NULL,
    PRIMARY KEY (comment_id, mentioned_user_id)
);

CREATE INDEX comment_mentions_user_idx
    ON comment_mentions (mentioned_user_id);
"#;

const MIGRATION_V4_SQL: &str = r#"
CREATE TABLE event_outbox (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    page_id             TEXT NOT NULL,
    event_type          TEXT NOT NULL,
    payload             TEXT NOT NULL,
    retry_count         INTEGER NOT NULL DEFAULT 0,
    next_retry_at       TEXT NULL,
    state               TEXT NOT NULL DEFAULT 'pending',
    created_at          TEXT NOT NULL
);

CREATE INDEX event_outbox_state_idx
    ON event_outbox (state, id);
"#;

const MIGRATIONS: &[(i64, &str)] = &[
    (1, MIGRATION_V1_SQL),
    (2, MIGRATION_V2_SQL),
    (3, MIGRATION_V3_SQL),
    (4, MIGRATION_V4_SQL),
];

pub const LATEST_SCHEMA_VERSION: i64 = 4;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct MetaDb {
    conn: Connection,
}

impl MetaDb {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create meta.db parent directory `{}`", parent.display())
            })?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("failed to open meta.db at `{}`", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .context("failed to enable WAL journal for meta.db")?;
        conn.busy_timeout(BUSY_TIMEOUT).context("failed to set meta.db busy timeout")?;

        Self::init(conn)
    }

    /// Private in-memory database, used by tests and embedders.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory meta.db")?;
        Self::init(conn)
    }

    fn init(mut conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .context("failed to configure sqlite pragmas for meta.db")?;

        ensure_migration_table(&conn)?;
        apply_pending_migrations(&mut conn)?;

        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn schema_version(&self) -> Result<i64> {
        current_schema_version(&self.conn)
    }
}

fn ensure_migration_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY,
            applied_at  TEXT NOT NULL
        );
        ",
    )
    .context("failed to ensure schema_migrations table exists")
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| row.get(0))
        .context("failed to read current schema version")
}

fn apply_pending_migrations(conn: &mut Connection) -> Result<()> {
    let mut current_version = current_schema_version(conn)?;

    for (version, sql) in MIGRATIONS {
        if *version <= current_version {
            continue;
        }

        let tx = conn.transaction().context("failed to start migration transaction")?;
        tx.execute_batch(sql)
            .with_context(|| format!("failed to apply meta.db migration v{version}"))?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, datetime('now'))",
            params![version],
        )
        .with_context(|| format!("failed to record migration v{version}"))?;
        tx.commit().with_context(|| format!("failed to commit migration v{version}"))?;
        current_version = *version;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;
    use tempfile::TempDir;

    use super::{MetaDb, LATEST_SCHEMA_VERSION, MIGRATION_V1_SQL, MIGRATION_V2_SQL};

    const EXPECTED_TABLES: &[&str] = &[
        "schema_migrations",
        "page_content",
        "content_history",
        "content_locks",
        "block_comments",
        "comment_mentions",
        "event_outbox",
    ];

    fn table_exists(conn: &Connection, table: &str) -> bool {
        let exists: i64 = conn
            .query_row(
                "SELECT COUNT(1) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |row| row.get(0),
            )
            .expect("table existence query should succeed");
        exists == 1
    }

    #[test]
    fn open_creates_schema_and_records_latest_migration() {
        let tmp = TempDir::new().expect("tempdir should be created");
        let db = MetaDb::open(tmp.path().join("nested").join("meta.db"))
            .expect("meta db should open");

        for table in EXPECTED_TABLES {
            assert!(table_exists(db.connection(), table), "expected `{table}` table to exist");
        }
        assert_eq!(
            db.schema_version().expect("schema version should be readable"),
            LATEST_SCHEMA_VERSION
        );
    }

    #[test]
    fn opening_twice_is_idempotent_for_all_migrations() {
        let tmp = TempDir::new().expect("tempdir should be created");
        let path = tmp.path().join("meta.db");
        {
            let first = MetaDb::open(&path).expect("first open should succeed");
            assert_eq!(first.schema_version().expect("schema version"), LATEST_SCHEMA_VERSION);
        }

        let second = MetaDb::open(&path).expect("second open should succeed");
        let migration_rows: i64 = second
            .connection()
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .expect("schema migration count query should succeed");
        assert_eq!(migration_rows, LATEST_SCHEMA_VERSION);
    }

    #[test]
    fn existing_v2_schema_is_migrated_forward() {
        let tmp = TempDir::new().expect("tempdir should be created");
        let path = tmp.path().join("meta.db");
        {
            let conn = Connection::open(&path).expect("seed db should open");
            conn.execute_batch(
                "CREATE TABLE schema_migrations (version INTEGER PRIMARY KEY, applied_at TEXT NOT NULL);",
            )
            .expect("schema_migrations should be created");
            conn.execute_batch(MIGRATION_V1_SQL).expect("v1 schema should apply");
            conn.execute_batch(MIGRATION_V2_SQL).expect("v2 schema should apply");
            conn.execute_batch(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (1, datetime('now')), (2, datetime('now'));",
            )
            .expect("migration rows should insert");
        }

        let db = MetaDb::open(&path).expect("meta db should upgrade");
        assert_eq!(db.schema_version().expect("schema version"), LATEST_SCHEMA_VERSION);
        assert!(table_exists(db.connection(), "block_comments"));
        assert!(table_exists(db.connection(), "event_outbox"));
    }

    #[test]
    fn in_memory_database_enforces_mention_cascade() {
        let db = MetaDb::open_in_memory().expect("in-memory db should open");
        let conn = db.connection();
        conn.execute(
            "INSERT INTO block_comments (id, page_id, block_id, content, created_by, created_at) \
             VALUES ('c1', 'p1', 'b1', 'hi', 'alice', '2024-01-01T00:00:00Z')",
            [],
        )
        .expect("comment should insert");
        conn.execute(
            "INSERT INTO comment_mentions (comment_id, mentioned_user_id, created_at) \
             VALUES ('c1', 'bob', '2024-01-01T00:00:00Z')",
            [],
        )
        .expect("mention should insert");

        conn.execute("DELETE FROM block_comments WHERE id = 'c1'", [])
            .expect("comment should delete");
        let mentions: i64 = conn
            .query_row("SELECT COUNT(*) FROM comment_mentions", [], |row| row.get(0))
            .expect("count should succeed");
        assert_eq!(mentions, 0);
    }
}
