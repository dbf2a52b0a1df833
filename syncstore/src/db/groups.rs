//! Groups and their metadata.

use rusqlite::{Connection, OptionalExtension, Row, params};
use syncstore_proto::ids::{ClientId, GroupId};
use syncstore_proto::message::{Group, Metadata};

use super::Transaction;
use super::{row, visibility};
use crate::error::{DbError, Result};
use crate::event::Event;

fn group_from_row(r: &Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        id: row::hash(r, 0)?,
        client_id: ClientId::new(r.get::<_, String>(1)?),
        descriptor: r.get(2)?,
    })
}

pub(crate) fn contains_group(conn: &Connection, g: &GroupId) -> Result<bool> {
    let found = conn
        .prepare_cached("SELECT NULL FROM groups WHERE groupId = ?")?
        .exists([&g.as_bytes()[..]])?;
    Ok(found)
}

/// Fails with [`DbError::NoSuchGroup`] unless `g` exists.
pub(crate) fn require_group(conn: &Connection, g: &GroupId) -> Result<()> {
    if contains_group(conn, g)? {
        Ok(())
    } else {
        Err(DbError::NoSuchGroup)
    }
}

/// Applies a metadata delta to the rows selected by `owner`.
///
/// Entries whose value is the removal sentinel are deleted, the rest are
/// updated where present and inserted otherwise. `insert` receives the key
/// and value of each entry that had no row.
pub(crate) fn merge_metadata(
    conn: &Connection,
    delete_sql: &str,
    update_sql: &str,
    owner: &[u8],
    meta: &Metadata,
    mut insert: impl FnMut(&str, &[u8]) -> Result<()>,
) -> Result<()> {
    let mut delete = conn.prepare_cached(delete_sql)?;
    let mut update = conn.prepare_cached(update_sql)?;
    for (key, value) in meta {
        if value.is_empty() {
            delete.execute(params![owner, key])?;
            continue;
        }
        let updated = update.execute(params![value, owner, key])?;
        row::expect_at_most_one(updated, "metadata update")?;
        if updated == 0 {
            insert(key, value)?;
        }
    }
    Ok(())
}

impl Transaction<'_> {
    /// Stores a group. Adding one that already exists does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::ReadOnlyTransaction`] or an engine error.
    pub fn add_group(&mut self, g: &Group) -> Result<()> {
        let (conn, events) = self.write_parts()?;
        if contains_group(conn, &g.id)? {
            return Ok(());
        }
        conn.execute(
            "INSERT INTO groups (groupId, clientId, descriptor) VALUES (?, ?, ?)",
            params![&g.id.as_bytes()[..], g.client_id.as_str(), g.descriptor],
        )?;
        events.push(Event::GroupAdded(g.id));
        Ok(())
    }

    pub fn contains_group(&self, g: &GroupId) -> Result<bool> {
        contains_group(self.conn()?, g)
    }

    /// # Errors
    ///
    /// Returns [`DbError::NoSuchGroup`] if `g` is unknown.
    pub fn get_group(&self, g: &GroupId) -> Result<Group> {
        self.conn()?
            .query_row(
                "SELECT groupId, clientId, descriptor FROM groups WHERE groupId = ?",
                [&g.as_bytes()[..]],
                group_from_row,
            )
            .optional()?
            .ok_or(DbError::NoSuchGroup)
    }

    /// All groups owned by `client`.
    pub fn get_groups(&self, client: &ClientId) -> Result<Vec<Group>> {
        let mut stmt = self.conn()?.prepare_cached(
            "SELECT groupId, clientId, descriptor FROM groups WHERE clientId = ?",
        )?;
        let groups = stmt
            .query_map([client.as_str()], group_from_row)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(groups)
    }

    /// Removes a group with its messages, metadata and visibilities.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoSuchGroup`] if `g` is unknown.
    pub fn remove_group(&mut self, g: &GroupId) -> Result<()> {
        let (conn, events) = self.write_parts()?;
        require_group(conn, g)?;
        let affected: Vec<_> = visibility::group_visibilities(conn, g)?
            .into_keys()
            .collect();
        conn.execute("DELETE FROM groups WHERE groupId = ?", [&g.as_bytes()[..]])?;
        events.push(Event::GroupRemoved(*g));
        if !affected.is_empty() {
            events.push(Event::GroupVisibilityUpdated(affected));
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`DbError::NoSuchGroup`] if `g` is unknown.
    pub fn get_group_metadata(&self, g: &GroupId) -> Result<Metadata> {
        let conn = self.conn()?;
        require_group(conn, g)?;
        let mut stmt =
            conn.prepare_cached("SELECT metaKey, value FROM groupMetadata WHERE groupId = ?")?;
        let meta = stmt
            .query_map([&g.as_bytes()[..]], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<rusqlite::Result<_>>()?;
        Ok(meta)
    }

    /// Merges `meta` into a group's metadata. An empty value removes its key.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoSuchGroup`] if `g` is unknown.
    pub fn merge_group_metadata(&mut self, g: &GroupId, meta: &Metadata) -> Result<()> {
        let (conn, _) = self.write_parts()?;
        require_group(conn, g)?;
        let owner = &g.as_bytes()[..];
        merge_metadata(
            conn,
            "DELETE FROM groupMetadata WHERE groupId = ? AND metaKey = ?",
            "UPDATE groupMetadata SET value = ? WHERE groupId = ? AND metaKey = ?",
            owner,
            meta,
            |key, value| {
                conn.execute(
                    "INSERT INTO groupMetadata (groupId, metaKey, value) VALUES (?, ?, ?)",
                    params![owner, key, value],
                )?;
                Ok(())
            },
        )
    }
}
