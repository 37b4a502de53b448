pub mod models;
pub mod repositories;

use crate::config::SyncPaths;
use anyhow::{anyhow, Context, Result};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};

pub(crate) const MIGRATIONS: &str = r#"
    PRAGMA journal_mode = WAL;
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS posts (
        group_id TEXT NOT NULL,
        id TEXT NOT NULL,
        trx_id TEXT NOT NULL,
        publisher TEXT NOT NULL,
        title TEXT,
        content TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        status TEXT NOT NULL DEFAULT 'synced',
        deleted INTEGER NOT NULL DEFAULT 0,
        hot_count INTEGER NOT NULL DEFAULT 0,
        comment_count INTEGER NOT NULL DEFAULT 0,
        like_count INTEGER NOT NULL DEFAULT 0,
        dislike_count INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (group_id, id)
    );

    CREATE TABLE IF NOT EXISTS comments (
        group_id TEXT NOT NULL,
        id TEXT NOT NULL,
        trx_id TEXT NOT NULL,
        post_id TEXT NOT NULL,
        thread_id TEXT NOT NULL DEFAULT '',
        reply_to TEXT NOT NULL DEFAULT '',
        publisher TEXT NOT NULL,
        content TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        status TEXT NOT NULL DEFAULT 'synced',
        deleted INTEGER NOT NULL DEFAULT 0,
        hot_count INTEGER NOT NULL DEFAULT 0,
        comment_count INTEGER NOT NULL DEFAULT 0,
        like_count INTEGER NOT NULL DEFAULT 0,
        dislike_count INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (group_id, id)
    );

    CREATE INDEX IF NOT EXISTS idx_posts_timestamp ON posts(group_id, timestamp);
    CREATE INDEX IF NOT EXISTS idx_comments_post ON comments(group_id, post_id);
    CREATE INDEX IF NOT EXISTS idx_comments_thread ON comments(group_id, thread_id);
    CREATE INDEX IF NOT EXISTS idx_comments_reply_to ON comments(group_id, reply_to);

    CREATE TABLE IF NOT EXISTS profiles (
        group_id TEXT NOT NULL,
        publisher TEXT NOT NULL,
        name TEXT NOT NULL,
        avatar TEXT,
        trx_id TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        status TEXT NOT NULL DEFAULT 'synced',
        PRIMARY KEY (group_id, publisher)
    );

    CREATE TABLE IF NOT EXISTS counters (
        group_id TEXT NOT NULL,
        trx_id TEXT NOT NULL,
        object_id TEXT NOT NULL,
        publisher TEXT NOT NULL,
        kind TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        PRIMARY KEY (group_id, trx_id)
    );

    CREATE INDEX IF NOT EXISTS idx_counters_object ON counters(group_id, object_id);

    CREATE TABLE IF NOT EXISTS relations (
        group_id TEXT NOT NULL,
        trx_id TEXT NOT NULL,
        from_publisher TEXT NOT NULL,
        to_publisher TEXT NOT NULL,
        kind TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        PRIMARY KEY (group_id, trx_id)
    );

    CREATE TABLE IF NOT EXISTS relation_summaries (
        group_id TEXT NOT NULL,
        from_publisher TEXT NOT NULL,
        to_publisher TEXT NOT NULL,
        relation TEXT NOT NULL,
        value INTEGER NOT NULL,
        trx_id TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        PRIMARY KEY (group_id, from_publisher, to_publisher, relation)
    );

    CREATE TABLE IF NOT EXISTS images (
        group_id TEXT NOT NULL,
        trx_id TEXT NOT NULL,
        publisher TEXT NOT NULL,
        object_id TEXT,
        name TEXT,
        media_type TEXT NOT NULL,
        size_bytes INTEGER,
        timestamp INTEGER NOT NULL,
        status TEXT NOT NULL DEFAULT 'synced',
        PRIMARY KEY (group_id, trx_id)
    );

    CREATE TABLE IF NOT EXISTS notifications (
        id TEXT PRIMARY KEY,
        group_id TEXT NOT NULL,
        object_id TEXT NOT NULL,
        from_publisher TEXT NOT NULL,
        kind TEXT NOT NULL,
        read INTEGER NOT NULL DEFAULT 0,
        timestamp INTEGER NOT NULL,
        UNIQUE (group_id, object_id, kind)
    );

    CREATE INDEX IF NOT EXISTS idx_notifications_unread
    ON notifications(group_id, read)
    WHERE read = 0;

    CREATE TABLE IF NOT EXISTS sync_cursors (
        group_id TEXT PRIMARY KEY,
        latest_trx_id TEXT,
        last_updated TEXT,
        unread_count INTEGER NOT NULL DEFAULT 0,
        log_tail TEXT NOT NULL DEFAULT '[]'
    );

    CREATE TABLE IF NOT EXISTS pending_trx (
        group_id TEXT NOT NULL,
        trx_id TEXT NOT NULL,
        item_json TEXT NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (group_id, trx_id)
    );

    CREATE TABLE IF NOT EXISTS empty_trx (
        group_id TEXT NOT NULL,
        trx_id TEXT NOT NULL,
        attempts INTEGER NOT NULL DEFAULT 0,
        last_attempt_at TEXT,
        PRIMARY KEY (group_id, trx_id)
    );

    CREATE TABLE IF NOT EXISTS deferred_contents (
        group_id TEXT NOT NULL,
        trx_id TEXT NOT NULL,
        waiting_on TEXT NOT NULL,
        item_json TEXT NOT NULL,
        PRIMARY KEY (group_id, trx_id)
    );

    CREATE INDEX IF NOT EXISTS idx_deferred_waiting ON deferred_contents(group_id, waiting_on);
"#;

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    newly_created: bool,
}

impl Database {
    pub fn connect(paths: &SyncPaths) -> Result<Self> {
        let newly_created = !paths.db_path.exists();
        let conn = Connection::open(&paths.db_path)
            .with_context(|| format!("failed to open {}", paths.db_path.display()))?;
        Ok(Self::from_connection(conn, newly_created))
    }

    pub fn from_connection(conn: Connection, newly_created: bool) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            newly_created,
        }
    }

    /// Opens a private in-memory store with the schema applied.
    pub fn open_in_memory() -> Result<Self> {
        let db = Self::from_connection(Connection::open_in_memory()?, true);
        db.ensure_migrations()?;
        Ok(db)
    }

    pub fn ensure_migrations(&self) -> Result<bool> {
        self.with_conn(|conn| {
            conn.execute_batch(MIGRATIONS)
                .context("failed to apply schema migrations")?;
            Ok(())
        })?;
        Ok(self.newly_created)
    }

    /// Read access outside of an explicit transaction.
    pub fn with_repositories<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(repositories::SqliteRepositories<'_>) -> Result<T>,
    {
        self.with_conn(|conn| {
            let repos = repositories::SqliteRepositories::new(conn);
            f(repos)
        })
    }

    /// Runs `f` inside one transaction. Any error rolls back every write the
    /// closure made; nothing is partially applied.
    pub fn with_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(repositories::SqliteRepositories<'_>) -> Result<T>,
    {
        self.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .context("failed to open transaction")?;
            let value = f(repositories::SqliteRepositories::new(&tx))?;
            tx.commit().context("failed to commit transaction")?;
            Ok(value)
        })
    }

    fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let guard = self
            .conn
            .lock()
            .map_err(|_| anyhow!("database mutex poisoned"))?;
        f(&guard)
    }
}
