//! Evaluation results and their referenced stylesheets.

use rusqlite::{params, OptionalExtension};

use super::{CssResource, Evaluation, EvaluationStore, SqliteStore, StoreError};

impl SqliteStore {
    /// Record one page evaluation with the stylesheets it referenced.
    pub fn register_evaluation(
        &self,
        fulfilled_crawling_id: i64,
        url: &str,
        source: &str,
        css: &[CssResource],
    ) -> Result<i64, StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO evaluations (fulfilled_crawling_id, url, source) VALUES (?1, ?2, ?3)",
            params![fulfilled_crawling_id, url, source],
        )?;
        let evaluation_id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare(
                "INSERT INTO css_resources (evaluation_id, url, code) VALUES (?1, ?2, ?3)",
            )?;
            for resource in css {
                stmt.execute(params![evaluation_id, resource.url, resource.code])?;
            }
        }

        tx.commit()?;
        Ok(evaluation_id)
    }
}

impl EvaluationStore for SqliteStore {
    fn evaluation_ids(&self, fulfilled_crawling_id: i64) -> Result<Vec<i64>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id FROM evaluations WHERE fulfilled_crawling_id = ?1 ORDER BY id",
        )?;
        let ids = stmt
            .query_map(params![fulfilled_crawling_id], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    fn evaluation(&self, evaluation_id: i64) -> Result<Evaluation, StoreError> {
        let conn = self.pool.get()?;
        let (url, source): (String, String) = conn
            .query_row(
                "SELECT url, source FROM evaluations WHERE id = ?1",
                params![evaluation_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .ok_or(StoreError::NotFound {
                entity: "evaluation",
                id: evaluation_id,
            })?;

        let mut stmt = conn.prepare(
            "SELECT url, code FROM css_resources WHERE evaluation_id = ?1 ORDER BY id",
        )?;
        let css = stmt
            .query_map(params![evaluation_id], |row| {
                Ok(CssResource {
                    url: row.get(0)?,
                    code: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Evaluation {
            id: evaluation_id,
            url,
            source,
            css,
        })
    }
}
