//! Namespaced key/value settings.

use rusqlite::{Connection, OptionalExtension, params};
use syncstore_proto::message::Settings;

use super::Transaction;
use crate::error::Result;
use crate::event::Event;

pub(crate) fn get(conn: &Connection, namespace: &str) -> Result<Settings> {
    let mut stmt =
        conn.prepare_cached("SELECT settingKey, value FROM settings WHERE namespace = ?")?;
    let rows = stmt.query_map([namespace], |r| Ok((r.get(0)?, r.get(1)?)))?;
    Ok(rows.collect::<rusqlite::Result<Settings>>()?)
}

/// Inserts or updates each entry. Returns whether anything changed.
pub(crate) fn merge(conn: &Connection, settings: &Settings, namespace: &str) -> Result<bool> {
    let mut changed = false;
    let mut select =
        conn.prepare_cached("SELECT value FROM settings WHERE namespace = ? AND settingKey = ?")?;
    for (key, value) in settings {
        let current: Option<String> = select
            .query_row(params![namespace, key], |r| r.get(0))
            .optional()?;
        match current {
            Some(ref v) if v == value => {}
            Some(_) => {
                conn.execute(
                    "UPDATE settings SET value = ? WHERE namespace = ? AND settingKey = ?",
                    params![value, namespace, key],
                )?;
                changed = true;
            }
            None => {
                conn.execute(
                    "INSERT INTO settings (namespace, settingKey, value) VALUES (?, ?, ?)",
                    params![namespace, key, value],
                )?;
                changed = true;
            }
        }
    }
    Ok(changed)
}

impl Transaction<'_> {
    /// All settings in `namespace`; empty if there are none.
    ///
    /// # Errors
    ///
    /// Returns an engine error.
    pub fn get_settings(&self, namespace: &str) -> Result<Settings> {
        get(self.conn()?, namespace)
    }

    /// Merges `settings` into `namespace`, emitting
    /// [`Event::SettingsUpdated`] if any value changed.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::ReadOnlyTransaction`](crate::DbError) or an engine
    /// error.
    pub fn merge_settings(&mut self, settings: &Settings, namespace: &str) -> Result<()> {
        let (conn, events) = self.write_parts()?;
        if merge(conn, settings, namespace)? {
            events.push(Event::SettingsUpdated {
                namespace: namespace.to_string(),
                settings: settings.clone(),
            });
        }
        Ok(())
    }
}
