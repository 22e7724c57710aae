//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS observatories (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            kind INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS seeds (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            acronym TEXT,
            dependency TEXT,
            urls TEXT NOT NULL DEFAULT '',
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS observatory_seeds (
            observatory_id INTEGER NOT NULL,
            seed_id INTEGER NOT NULL,
            PRIMARY KEY (observatory_id, seed_id),
            FOREIGN KEY (observatory_id) REFERENCES observatories(id),
            FOREIGN KEY (seed_id) REFERENCES seeds(id)
        );

        CREATE TABLE IF NOT EXISTS observatory_executions (
            id INTEGER PRIMARY KEY,
            observatory_id INTEGER NOT NULL,
            ordinal INTEGER NOT NULL,
            status TEXT NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            UNIQUE (observatory_id, ordinal),
            FOREIGN KEY (observatory_id) REFERENCES observatories(id)
        );

        CREATE TABLE IF NOT EXISTS crawls (
            id INTEGER PRIMARY KEY,
            seed_id INTEGER NOT NULL,
            guideline_id INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'created',
            execution_id INTEGER,
            started_at TEXT,
            finished_at TEXT,
            FOREIGN KEY (seed_id) REFERENCES seeds(id),
            FOREIGN KEY (execution_id) REFERENCES observatory_executions(id)
        );

        CREATE TABLE IF NOT EXISTS fulfilled_crawlings (
            id INTEGER PRIMARY KEY,
            crawl_id INTEGER NOT NULL,
            execution_id INTEGER NOT NULL,
            seed_id INTEGER NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (crawl_id, execution_id),
            FOREIGN KEY (crawl_id) REFERENCES crawls(id),
            FOREIGN KEY (execution_id) REFERENCES observatory_executions(id)
        );

        CREATE TABLE IF NOT EXISTS evaluations (
            id INTEGER PRIMARY KEY,
            fulfilled_crawling_id INTEGER NOT NULL,
            url TEXT NOT NULL,
            source TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY (fulfilled_crawling_id) REFERENCES fulfilled_crawlings(id)
        );

        CREATE TABLE IF NOT EXISTS css_resources (
            id INTEGER PRIMARY KEY,
            evaluation_id INTEGER NOT NULL,
            url TEXT NOT NULL,
            code TEXT NOT NULL,
            FOREIGN KEY (evaluation_id) REFERENCES evaluations(id)
        );

        CREATE TABLE IF NOT EXISTS mail_outbox (
            id INTEGER PRIMARY KEY,
            payload_json TEXT NOT NULL,
            dispatched INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_crawls_status ON crawls(status);
        CREATE INDEX IF NOT EXISTS idx_executions_status ON observatory_executions(status);
        CREATE INDEX IF NOT EXISTS idx_fulfilled_execution ON fulfilled_crawlings(execution_id);
        CREATE INDEX IF NOT EXISTS idx_evaluations_fulfilled ON evaluations(fulfilled_crawling_id);
        CREATE INDEX IF NOT EXISTS idx_css_evaluation ON css_resources(evaluation_id);
        CREATE INDEX IF NOT EXISTS idx_outbox_dispatched ON mail_outbox(dispatched);",
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        for table in [
            "observatories",
            "seeds",
            "observatory_executions",
            "crawls",
            "fulfilled_crawlings",
            "evaluations",
            "css_resources",
            "mail_outbox",
        ] {
            let count: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
                .unwrap();
            assert_eq!(count, 0, "table {table} should start empty");
        }
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap(); // Should not error
    }
}
