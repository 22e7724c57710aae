//! Observatories, seeds, executions and fulfilled crawlings.

use rusqlite::{params, OptionalExtension, TransactionBehavior};

use super::{
    now_rfc3339, parse_timestamp, FulfilledCrawling, Observatory, ObservatoryExecution,
    ObservatoryStore, Seed, SqliteStore, StoreError,
};
use crate::crawl::ExecutionStatus;

/// Seed URL lists are stored `;`-separated.
const URL_SEPARATOR: char = ';';

impl SqliteStore {
    pub fn register_observatory(&self, name: &str, kind: i64) -> Result<i64, StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO observatories (name, kind) VALUES (?1, ?2)",
            params![name, kind],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn register_seed(
        &self,
        name: &str,
        acronym: Option<&str>,
        dependency: Option<&str>,
        urls: &[String],
    ) -> Result<i64, StoreError> {
        let conn = self.pool.get()?;
        let joined = urls.join(&URL_SEPARATOR.to_string());
        conn.execute(
            "INSERT INTO seeds (name, acronym, dependency, urls) VALUES (?1, ?2, ?3, ?4)",
            params![name, acronym, dependency, joined],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn attach_seed(&self, observatory_id: i64, seed_id: i64) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT OR IGNORE INTO observatory_seeds (observatory_id, seed_id) VALUES (?1, ?2)",
            params![observatory_id, seed_id],
        )?;
        Ok(())
    }

    /// Start a new execution of an observatory with the next ordinal.
    pub fn launch_execution(&self, observatory_id: i64) -> Result<ObservatoryExecution, StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM observatories WHERE id = ?1)",
            params![observatory_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(StoreError::NotFound {
                entity: "observatory",
                id: observatory_id,
            });
        }

        let ordinal: i64 = tx.query_row(
            "SELECT COALESCE(MAX(ordinal), 0) + 1 FROM observatory_executions WHERE observatory_id = ?1",
            params![observatory_id],
            |row| row.get(0),
        )?;
        let started_at = now_rfc3339();
        tx.execute(
            "INSERT INTO observatory_executions (observatory_id, ordinal, status, started_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![observatory_id, ordinal, ExecutionStatus::Launched, started_at],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(ObservatoryExecution {
            id,
            observatory_id,
            ordinal,
            status: ExecutionStatus::Launched,
            started_at: parse_timestamp(Some(started_at)),
            finished_at: None,
        })
    }

    /// Mark a running execution as finished. Returns `false` if it was not
    /// running.
    pub fn finish_execution(&self, execution_id: i64) -> Result<bool, StoreError> {
        let conn = self.pool.get()?;
        let changed = conn.execute(
            "UPDATE observatory_executions SET status = ?1, finished_at = ?2
             WHERE id = ?3 AND status = ?4",
            params![
                ExecutionStatus::Finished,
                now_rfc3339(),
                execution_id,
                ExecutionStatus::Launched
            ],
        )?;
        if changed == 0 {
            // Distinguish "not running" from "no such execution".
            self.execution(execution_id)?;
        }
        Ok(changed > 0)
    }
}

impl ObservatoryStore for SqliteStore {
    fn observatory(&self, observatory_id: i64) -> Result<Observatory, StoreError> {
        let conn = self.pool.get()?;
        conn.query_row(
            "SELECT id, name, kind FROM observatories WHERE id = ?1",
            params![observatory_id],
            |row| {
                Ok(Observatory {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    kind: row.get(2)?,
                })
            },
        )
        .optional()?
        .ok_or(StoreError::NotFound {
            entity: "observatory",
            id: observatory_id,
        })
    }

    fn execution(&self, execution_id: i64) -> Result<ObservatoryExecution, StoreError> {
        let conn = self.pool.get()?;
        conn.query_row(
            "SELECT id, observatory_id, ordinal, status, started_at, finished_at
             FROM observatory_executions WHERE id = ?1",
            params![execution_id],
            |row| {
                Ok(ObservatoryExecution {
                    id: row.get(0)?,
                    observatory_id: row.get(1)?,
                    ordinal: row.get(2)?,
                    status: row.get(3)?,
                    started_at: parse_timestamp(row.get(4)?),
                    finished_at: parse_timestamp(row.get(5)?),
                })
            },
        )
        .optional()?
        .ok_or(StoreError::NotFound {
            entity: "execution",
            id: execution_id,
        })
    }

    fn seed(&self, seed_id: i64) -> Result<Seed, StoreError> {
        let conn = self.pool.get()?;
        conn.query_row(
            "SELECT id, name, acronym, dependency, urls, active FROM seeds WHERE id = ?1",
            params![seed_id],
            |row| {
                let urls: String = row.get(4)?;
                Ok(Seed {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    acronym: row.get(2)?,
                    dependency: row.get(3)?,
                    urls: urls
                        .split(URL_SEPARATOR)
                        .map(str::trim)
                        .filter(|u| !u.is_empty())
                        .map(String::from)
                        .collect(),
                    active: row.get::<_, i64>(5)? != 0,
                })
            },
        )
        .optional()?
        .ok_or(StoreError::NotFound {
            entity: "seed",
            id: seed_id,
        })
    }

    fn fulfilled_crawlings(&self, execution_id: i64) -> Result<Vec<FulfilledCrawling>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, crawl_id, execution_id, seed_id FROM fulfilled_crawlings
             WHERE execution_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![execution_id], |row| {
            Ok(FulfilledCrawling {
                id: row.get(0)?,
                crawl_id: row.get(1)?,
                execution_id: row.get(2)?,
                seed_id: row.get(3)?,
            })
        })?;

        let mut list = Vec::new();
        for r in rows {
            list.push(r?);
        }
        Ok(list)
    }

    fn previous_execution_id(
        &self,
        observatory_id: i64,
        execution_id: i64,
    ) -> Result<Option<i64>, StoreError> {
        let conn = self.pool.get()?;
        let previous = conn
            .query_row(
                "SELECT id FROM observatory_executions
                 WHERE observatory_id = ?1
                   AND ordinal < (SELECT ordinal FROM observatory_executions
                                  WHERE id = ?2 AND observatory_id = ?1)
                 ORDER BY ordinal DESC
                 LIMIT 1",
                params![observatory_id, execution_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(previous)
    }

    fn fulfilled_crawling_for_seed(
        &self,
        seed_id: i64,
        execution_id: i64,
    ) -> Result<Option<i64>, StoreError> {
        let conn = self.pool.get()?;
        let id = conn
            .query_row(
                "SELECT id FROM fulfilled_crawlings WHERE seed_id = ?1 AND execution_id = ?2
                 ORDER BY id DESC LIMIT 1",
                params![seed_id, execution_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }
}
