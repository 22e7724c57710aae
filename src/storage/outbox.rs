//! Persistent mail outbox.
//!
//! Messages are written here as soon as the pipeline decides to send them. A
//! delivery worker drains pending rows and marks them dispatched, so a crash
//! between "batch complete" and "mail handed to the transport" loses nothing.

use anyhow::Result;
use rusqlite::{params, Connection};

use crate::mail::MailMessage;

/// Append a message to the outbox. Returns the outbox row id.
pub fn enqueue(conn: &Connection, message: &MailMessage) -> Result<i64> {
    let payload = serde_json::to_string(message)?;
    conn.execute(
        "INSERT INTO mail_outbox (payload_json) VALUES (?1)",
        params![payload],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Oldest undispatched messages, up to `limit`.
pub fn pending(conn: &Connection, limit: usize) -> Result<Vec<(i64, MailMessage)>> {
    let mut stmt = conn.prepare(
        "SELECT id, payload_json FROM mail_outbox WHERE dispatched = 0 ORDER BY id LIMIT ?1",
    )?;

    let rows: Vec<(i64, String)> = stmt
        .query_map(params![limit as i64], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<_, _>>()?;

    let mut messages = Vec::with_capacity(rows.len());
    for (id, json) in rows {
        match serde_json::from_str::<MailMessage>(&json) {
            Ok(message) => messages.push((id, message)),
            Err(e) => {
                // Unreadable rows stay in place for inspection.
                tracing::error!(outbox_id = id, error = %e, "failed to parse outbox entry");
            }
        }
    }
    Ok(messages)
}

/// Flag delivered messages so they are not picked up again.
pub fn mark_dispatched(conn: &mut Connection, ids: &[i64]) -> Result<usize> {
    let tx = conn.transaction()?;
    let mut changed = 0;
    {
        let mut stmt = tx.prepare("UPDATE mail_outbox SET dispatched = 1 WHERE id = ?1")?;
        for id in ids {
            changed += stmt.execute(params![id])?;
        }
    }
    tx.commit()?;
    Ok(changed)
}
