//! Per-contact group visibility and the status rows that follow it.

use std::collections::BTreeMap;

use rusqlite::{Connection, OptionalExtension, params};
use syncstore_proto::ids::{ContactId, GroupId, MessageId};
use syncstore_proto::message::Visibility;

use super::{Transaction, groups, identity, row, status, sync};
use crate::error::Result;
use crate::event::Event;

/// Contacts that can see `g`, each with its shared flag.
pub(crate) fn group_visibilities(
    conn: &Connection,
    g: &GroupId,
) -> Result<BTreeMap<ContactId, bool>> {
    let mut stmt =
        conn.prepare_cached("SELECT contactId, shared FROM groupVisibilities WHERE groupId = ?")?;
    let map = stmt
        .query_map([&g.as_bytes()[..]], |r| {
            Ok((ContactId::new(r.get(0)?), r.get(1)?))
        })?
        .collect::<rusqlite::Result<_>>()?;
    Ok(map)
}

pub(crate) fn group_visibility(conn: &Connection, c: ContactId, g: &GroupId) -> Result<Visibility> {
    let shared: Option<bool> = conn
        .prepare_cached("SELECT shared FROM groupVisibilities WHERE contactId = ? AND groupId = ?")?
        .query_row(params![c.as_u32(), &g.as_bytes()[..]], |r| r.get(0))
        .optional()?;
    Ok(match shared {
        None => Visibility::Invisible,
        Some(false) => Visibility::Visible,
        Some(true) => Visibility::Shared,
    })
}

fn group_message_ids(conn: &Connection, g: &GroupId) -> Result<Vec<MessageId>> {
    let mut stmt = conn.prepare_cached("SELECT messageId FROM messages WHERE groupId = ?")?;
    let ids = stmt
        .query_map([&g.as_bytes()[..]], |r| row::hash(r, 0))?
        .collect::<rusqlite::Result<_>>()?;
    Ok(ids)
}

impl Transaction<'_> {
    /// How `g` is exposed to `c`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoSuchContact`](crate::DbError::NoSuchContact) or
    /// [`DbError::NoSuchGroup`](crate::DbError::NoSuchGroup).
    pub fn get_group_visibility(&self, c: ContactId, g: &GroupId) -> Result<Visibility> {
        let conn = self.conn()?;
        identity::require_contact(conn, c)?;
        groups::require_group(conn, g)?;
        group_visibility(conn, c, g)
    }

    /// Every contact that can see `g`, with its visibility.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoSuchGroup`](crate::DbError::NoSuchGroup).
    pub fn get_group_visibility_map(&self, g: &GroupId) -> Result<BTreeMap<ContactId, Visibility>> {
        let conn = self.conn()?;
        groups::require_group(conn, g)?;
        Ok(group_visibilities(conn, g)?
            .into_iter()
            .map(|(c, shared)| {
                let v = if shared { Visibility::Shared } else { Visibility::Visible };
                (c, v)
            })
            .collect())
    }

    /// Moves `(c, g)` to visibility `v`.
    ///
    /// Becoming visible creates a status row for each message in the group,
    /// consuming any offer `c` made for it and marking it seen. Becoming
    /// invisible deletes those rows. Switching between visible and shared
    /// only flips the flag.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoSuchContact`](crate::DbError::NoSuchContact) or
    /// [`DbError::NoSuchGroup`](crate::DbError::NoSuchGroup).
    pub fn set_group_visibility(&mut self, c: ContactId, g: &GroupId, v: Visibility) -> Result<()> {
        let (conn, events) = self.write_parts()?;
        identity::require_contact(conn, c)?;
        groups::require_group(conn, g)?;
        let old = group_visibility(conn, c, g)?;
        if old == v {
            return Ok(());
        }
        let gid = &g.as_bytes()[..];
        match (old, v) {
            (Visibility::Invisible, _) => {
                conn.execute(
                    "INSERT INTO groupVisibilities (contactId, groupId, shared) VALUES (?, ?, ?)",
                    params![c.as_u32(), gid, v == Visibility::Shared],
                )?;
                let messages = group_message_ids(conn, g)?;
                for m in &messages {
                    let seen = sync::remove_offered(conn, c, m)?;
                    status::add_status(conn, m, c, seen, seen)?;
                }
                tracing::debug!(contact = %c, group = %g, count = messages.len(), "created statuses");
            }
            (_, Visibility::Invisible) => {
                let removed = conn.execute(
                    "DELETE FROM statuses WHERE contactId = ?
                     AND messageId IN (SELECT messageId FROM messages WHERE groupId = ?)",
                    params![c.as_u32(), gid],
                )?;
                conn.execute(
                    "DELETE FROM groupVisibilities WHERE contactId = ? AND groupId = ?",
                    params![c.as_u32(), gid],
                )?;
                tracing::debug!(contact = %c, group = %g, count = removed, "removed statuses");
            }
            _ => {
                let updated = conn.execute(
                    "UPDATE groupVisibilities SET shared = ? WHERE contactId = ? AND groupId = ?",
                    params![v == Visibility::Shared, c.as_u32(), gid],
                )?;
                row::expect_one(updated, "visibility update")?;
            }
        }
        events.push(Event::GroupVisibilityUpdated(vec![c]));
        Ok(())
    }
}
