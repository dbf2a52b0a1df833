//! Messages, their metadata and dependency graph.
//!
//! Metadata queries only see delivered messages. Validators get a separate
//! accessor that also covers pending ones. A deleted message keeps its row
//! (id, group, state and dependency edges) and loses its raw bytes.

use std::collections::{BTreeMap, BTreeSet};

use rusqlite::{Connection, OptionalExtension, params};
use syncstore_proto::ids::{ContactId, GroupId, MessageId};
use syncstore_proto::message::{Message, MessageState, Metadata};

use super::{Transaction, groups, row, status, sync, visibility};
use crate::error::{DbError, Result};
use crate::event::Event;

pub(crate) fn contains_message(conn: &Connection, m: &MessageId) -> Result<bool> {
    let found = conn
        .prepare_cached("SELECT NULL FROM messages WHERE messageId = ?")?
        .exists([&m.as_bytes()[..]])?;
    Ok(found)
}

/// Fails with [`DbError::NoSuchMessage`] unless `m` exists.
pub(crate) fn require_message(conn: &Connection, m: &MessageId) -> Result<()> {
    if contains_message(conn, m)? {
        Ok(())
    } else {
        Err(DbError::NoSuchMessage)
    }
}

fn group_and_state(conn: &Connection, m: &MessageId) -> Result<(GroupId, MessageState)> {
    conn.prepare_cached("SELECT groupId, state FROM messages WHERE messageId = ?")?
        .query_row([&m.as_bytes()[..]], |r| Ok((row::hash(r, 0)?, row::state(r, 1)?)))
        .optional()?
        .ok_or(DbError::NoSuchMessage)
}

/// Stores a message and creates a status row for every contact that can
/// see its group.
///
/// A contact that already offered the message, or that sent it, starts
/// with the message marked seen and due for acknowledgement.
pub(crate) fn add_message(
    conn: &Connection,
    m: &Message,
    state: MessageState,
    shared: bool,
    sender: Option<ContactId>,
) -> Result<()> {
    let length = u32::try_from(m.len())
        .map_err(|_| DbError::InvalidArgument("message too long".into()))?;
    conn.prepare_cached(
        "INSERT INTO messages (messageId, groupId, timestamp, state, shared, length, raw)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )?
    .execute(params![
        &m.id.as_bytes()[..],
        &m.group_id.as_bytes()[..],
        row::sql_time(m.timestamp.as_millis()),
        state.value(),
        shared,
        length,
        m.raw,
    ])?;
    for c in visibility::group_visibilities(conn, &m.group_id)?.into_keys() {
        let offered = sync::remove_offered(conn, c, &m.id)?;
        let seen = offered || sender == Some(c);
        status::add_status(conn, &m.id, c, seen, seen)?;
    }
    Ok(())
}

fn ids_in_state(conn: &Connection, state: MessageState) -> Result<Vec<MessageId>> {
    let mut stmt = conn.prepare_cached(
        "SELECT messageId FROM messages WHERE state = ? AND raw IS NOT NULL",
    )?;
    let ids = stmt
        .query_map([state.value()], |r| row::hash(r, 0))?
        .collect::<rusqlite::Result<_>>()?;
    Ok(ids)
}

fn metadata_where(conn: &Connection, sql: &str, param: &[u8], state: &[u8]) -> Result<Metadata> {
    let mut stmt = conn.prepare_cached(sql)?;
    let mut meta = Metadata::new();
    let mut rows = stmt.query([param])?;
    while let Some(r) = rows.next()? {
        let s: u8 = r.get(2)?;
        if state.contains(&s) {
            meta.insert(r.get(0)?, r.get(1)?);
        }
    }
    Ok(meta)
}

/// Metadata of a single message, if its state is in `states`.
fn message_metadata(conn: &Connection, m: &MessageId, states: &[MessageState]) -> Result<Metadata> {
    let wanted: Vec<u8> = states.iter().map(|s| s.value()).collect();
    metadata_where(
        conn,
        "SELECT metaKey, value, state FROM messageMetadata WHERE messageId = ?",
        &m.as_bytes()[..],
        &wanted,
    )
}

impl Transaction<'_> {
    /// Stores a message created on this device as delivered and merges its
    /// metadata. Adding a message that is already held only merges the
    /// metadata.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoSuchGroup`] if the message's group is unknown.
    pub fn add_local_message(&mut self, m: &Message, meta: &Metadata, shared: bool) -> Result<()> {
        let (conn, events) = self.write_parts()?;
        groups::require_group(conn, &m.group_id)?;
        if !contains_message(conn, &m.id)? {
            add_message(conn, m, MessageState::Delivered, shared, None)?;
            events.push(Event::MessageAdded {
                message_id: m.id,
                group_id: m.group_id,
                contact_id: None,
            });
            events.push(Event::MessageStateChanged {
                message_id: m.id,
                local: true,
                state: MessageState::Delivered,
            });
            if shared {
                events.push(Event::MessageShared(m.id));
            }
        }
        self.merge_message_metadata(&m.id, meta)
    }

    pub fn contains_message(&self, m: &MessageId) -> Result<bool> {
        contains_message(self.conn()?, m)
    }

    /// Raw bytes of a message, or `None` if it has been deleted.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoSuchMessage`] if `m` is unknown.
    pub fn get_raw_message(&self, m: &MessageId) -> Result<Option<Vec<u8>>> {
        self.conn()?
            .prepare_cached("SELECT raw FROM messages WHERE messageId = ?")?
            .query_row([&m.as_bytes()[..]], |r| r.get(0))
            .optional()?
            .ok_or(DbError::NoSuchMessage)
    }

    /// # Errors
    ///
    /// Returns [`DbError::NoSuchMessage`] if `m` is unknown.
    pub fn get_message_state(&self, m: &MessageId) -> Result<MessageState> {
        Ok(group_and_state(self.conn()?, m)?.1)
    }

    /// Records a validator's verdict on a message.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoSuchMessage`] if `m` is unknown.
    pub fn set_message_state(&mut self, m: &MessageId, state: MessageState) -> Result<()> {
        let (conn, events) = self.write_parts()?;
        require_message(conn, m)?;
        let id = &m.as_bytes()[..];
        let updated = conn.execute(
            "UPDATE messages SET state = ? WHERE messageId = ?",
            params![state.value(), id],
        )?;
        row::expect_one(updated, "message state update")?;
        conn.execute(
            "UPDATE messageMetadata SET state = ? WHERE messageId = ?",
            params![state.value(), id],
        )?;
        events.push(Event::MessageStateChanged {
            message_id: *m,
            local: false,
            state,
        });
        Ok(())
    }

    /// Approves a delivered message for sending to contacts.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoSuchMessage`] if `m` is unknown and
    /// [`DbError::InvalidArgument`] if it is not delivered.
    pub fn set_message_shared(&mut self, m: &MessageId) -> Result<()> {
        let (conn, events) = self.write_parts()?;
        let (_, state) = group_and_state(conn, m)?;
        if state != MessageState::Delivered {
            return Err(DbError::InvalidArgument(format!(
                "cannot share message in state {state:?}"
            )));
        }
        let updated = conn.execute(
            "UPDATE messages SET shared = TRUE WHERE messageId = ?",
            [&m.as_bytes()[..]],
        )?;
        row::expect_one(updated, "message share")?;
        events.push(Event::MessageShared(*m));
        Ok(())
    }

    /// Drops a message's raw bytes. The row stays so the id keeps
    /// resolving for dependency checks.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoSuchMessage`] if `m` is unknown.
    pub fn delete_message(&mut self, m: &MessageId) -> Result<()> {
        let (conn, _) = self.write_parts()?;
        let updated = conn.execute(
            "UPDATE messages SET raw = NULL WHERE messageId = ?",
            [&m.as_bytes()[..]],
        )?;
        if updated == 0 {
            return Err(DbError::NoSuchMessage);
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`DbError::NoSuchMessage`] if `m` is unknown.
    pub fn delete_message_metadata(&mut self, m: &MessageId) -> Result<()> {
        let (conn, _) = self.write_parts()?;
        require_message(conn, m)?;
        conn.execute(
            "DELETE FROM messageMetadata WHERE messageId = ?",
            [&m.as_bytes()[..]],
        )?;
        Ok(())
    }

    /// Removes a message row with its statuses, metadata and outgoing
    /// dependency edges.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoSuchMessage`] if `m` is unknown.
    pub fn remove_message(&mut self, m: &MessageId) -> Result<()> {
        let (conn, _) = self.write_parts()?;
        let removed = conn.execute(
            "DELETE FROM messages WHERE messageId = ?",
            [&m.as_bytes()[..]],
        )?;
        if removed == 0 {
            return Err(DbError::NoSuchMessage);
        }
        Ok(())
    }

    /// Delivered messages in `g` whose metadata contains every entry of
    /// `query`. An empty query matches every delivered message.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoSuchGroup`] if `g` is unknown.
    pub fn get_message_ids(&self, g: &GroupId, query: &Metadata) -> Result<BTreeSet<MessageId>> {
        let conn = self.conn()?;
        groups::require_group(conn, g)?;
        let gid = &g.as_bytes()[..];
        let delivered = MessageState::Delivered.value();
        if query.is_empty() {
            let mut stmt = conn.prepare_cached(
                "SELECT messageId FROM messages WHERE groupId = ? AND state = ?",
            )?;
            let ids = stmt
                .query_map(params![gid, delivered], |r| row::hash(r, 0))?
                .collect::<rusqlite::Result<_>>()?;
            return Ok(ids);
        }
        let mut stmt = conn.prepare_cached(
            "SELECT messageId FROM messageMetadata
             WHERE groupId = ? AND state = ? AND metaKey = ? AND value = ?",
        )?;
        let mut matches: Option<BTreeSet<MessageId>> = None;
        for (key, value) in query {
            let ids: BTreeSet<MessageId> = stmt
                .query_map(params![gid, delivered, key, value], |r| row::hash(r, 0))?
                .collect::<rusqlite::Result<_>>()?;
            let narrowed = match matches {
                None => ids,
                Some(prev) => prev.intersection(&ids).copied().collect(),
            };
            if narrowed.is_empty() {
                return Ok(narrowed);
            }
            matches = Some(narrowed);
        }
        Ok(matches.unwrap_or_default())
    }

    /// Metadata of every delivered message in `g` that has any.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoSuchGroup`] if `g` is unknown.
    pub fn get_message_metadata(&self, g: &GroupId) -> Result<BTreeMap<MessageId, Metadata>> {
        let conn = self.conn()?;
        groups::require_group(conn, g)?;
        let mut stmt = conn.prepare_cached(
            "SELECT messageId, metaKey, value FROM messageMetadata
             WHERE groupId = ? AND state = ?",
        )?;
        let mut all: BTreeMap<MessageId, Metadata> = BTreeMap::new();
        let mut rows = stmt.query(params![&g.as_bytes()[..], MessageState::Delivered.value()])?;
        while let Some(r) = rows.next()? {
            let m: MessageId = row::hash(r, 0)?;
            all.entry(m).or_default().insert(r.get(1)?, r.get(2)?);
        }
        Ok(all)
    }

    /// Metadata of the delivered messages matched by
    /// [`get_message_ids`](Self::get_message_ids).
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoSuchGroup`] if `g` is unknown.
    pub fn get_message_metadata_by_query(
        &self,
        g: &GroupId,
        query: &Metadata,
    ) -> Result<BTreeMap<MessageId, Metadata>> {
        if query.is_empty() {
            return self.get_message_metadata(g);
        }
        let conn = self.conn()?;
        let mut all = BTreeMap::new();
        for m in self.get_message_ids(g, query)? {
            let meta = message_metadata(conn, &m, &[MessageState::Delivered])?;
            all.insert(m, meta);
        }
        Ok(all)
    }

    /// Metadata of one message, empty unless it is delivered.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoSuchMessage`] if `m` is unknown.
    pub fn get_message_metadata_for_message(&self, m: &MessageId) -> Result<Metadata> {
        let conn = self.conn()?;
        require_message(conn, m)?;
        message_metadata(conn, m, &[MessageState::Delivered])
    }

    /// Metadata of one message for a validator, covering delivered and
    /// pending messages.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoSuchMessage`] if `m` is unknown.
    pub fn get_message_metadata_for_validator(&self, m: &MessageId) -> Result<Metadata> {
        let conn = self.conn()?;
        require_message(conn, m)?;
        message_metadata(conn, m, &[MessageState::Delivered, MessageState::Pending])
    }

    /// Merges `meta` into a message's metadata. An empty value removes its
    /// key.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoSuchMessage`] if `m` is unknown.
    pub fn merge_message_metadata(&mut self, m: &MessageId, meta: &Metadata) -> Result<()> {
        let (conn, _) = self.write_parts()?;
        let (g, state) = group_and_state(conn, m)?;
        let owner = &m.as_bytes()[..];
        groups::merge_metadata(
            conn,
            "DELETE FROM messageMetadata WHERE messageId = ? AND metaKey = ?",
            "UPDATE messageMetadata SET value = ? WHERE messageId = ? AND metaKey = ?",
            owner,
            meta,
            |key, value| {
                conn.execute(
                    "INSERT INTO messageMetadata (messageId, groupId, state, metaKey, value)
                     VALUES (?, ?, ?, ?, ?)",
                    params![owner, &g.as_bytes()[..], state.value(), key, value],
                )?;
                Ok(())
            },
        )
    }

    /// Records that `dependent` depends on each of `dependencies`. The
    /// dependencies need not be held yet.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoSuchMessage`] if `dependent` is not held.
    pub fn add_message_dependencies(
        &mut self,
        dependent: &Message,
        dependencies: &[MessageId],
    ) -> Result<()> {
        let (conn, _) = self.write_parts()?;
        require_message(conn, &dependent.id)?;
        let mut stmt = conn.prepare_cached(
            "INSERT OR IGNORE INTO messageDependencies (groupId, messageId, dependencyId)
             VALUES (?, ?, ?)",
        )?;
        for d in dependencies {
            stmt.execute(params![
                &dependent.group_id.as_bytes()[..],
                &dependent.id.as_bytes()[..],
                &d.as_bytes()[..],
            ])?;
        }
        Ok(())
    }

    /// States of the messages `m` depends on.
    ///
    /// A dependency that is not held is [`MessageState::Unknown`]. One that
    /// belongs to a different group than `m` is [`MessageState::Invalid`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoSuchMessage`] if `m` is unknown.
    pub fn get_message_dependencies(
        &self,
        m: &MessageId,
    ) -> Result<BTreeMap<MessageId, MessageState>> {
        let conn = self.conn()?;
        require_message(conn, m)?;
        let mut stmt = conn.prepare_cached(
            "SELECT d.dependencyId, m.state, m.groupId = d.groupId
             FROM messageDependencies AS d
             LEFT JOIN messages AS m ON m.messageId = d.dependencyId
             WHERE d.messageId = ?",
        )?;
        let mut deps = BTreeMap::new();
        let mut rows = stmt.query([&m.as_bytes()[..]])?;
        while let Some(r) = rows.next()? {
            let id: MessageId = row::hash(r, 0)?;
            let same_group: Option<bool> = r.get(2)?;
            let state = match same_group {
                None => MessageState::Unknown,
                Some(false) => MessageState::Invalid,
                Some(true) => row::state(r, 1)?,
            };
            deps.insert(id, state);
        }
        Ok(deps)
    }

    /// States of the messages in `m`'s group that depend on `m`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoSuchMessage`] if `m` is unknown.
    pub fn get_message_dependents(
        &self,
        m: &MessageId,
    ) -> Result<BTreeMap<MessageId, MessageState>> {
        let conn = self.conn()?;
        let (g, _) = group_and_state(conn, m)?;
        let mut stmt = conn.prepare_cached(
            "SELECT d.messageId, m.state
             FROM messageDependencies AS d
             JOIN messages AS m ON m.messageId = d.messageId
             WHERE d.dependencyId = ? AND d.groupId = ?",
        )?;
        let dependents = stmt
            .query_map(params![&m.as_bytes()[..], &g.as_bytes()[..]], |r| {
                Ok((row::hash(r, 0)?, row::state(r, 1)?))
            })?
            .collect::<rusqlite::Result<_>>()?;
        Ok(dependents)
    }

    /// Held messages no validator has looked at yet.
    pub fn get_messages_to_validate(&self) -> Result<Vec<MessageId>> {
        ids_in_state(self.conn()?, MessageState::Unknown)
    }

    /// Held messages waiting for their dependencies.
    pub fn get_pending_messages(&self) -> Result<Vec<MessageId>> {
        ids_in_state(self.conn()?, MessageState::Pending)
    }

    /// Delivered, unshared messages that a shared message in the same group
    /// depends on.
    pub fn get_messages_to_share(&self) -> Result<Vec<MessageId>> {
        let mut stmt = self.conn()?.prepare_cached(
            "SELECT DISTINCT m1.messageId
             FROM messages AS m1
             JOIN messageDependencies AS d ON d.dependencyId = m1.messageId
             JOIN messages AS m2 ON m2.messageId = d.messageId
             WHERE m1.state = ? AND m1.shared = FALSE
             AND m1.groupId = d.groupId AND m2.shared = TRUE",
        )?;
        let ids = stmt
            .query_map([MessageState::Delivered.value()], |r| row::hash(r, 0))?
            .collect::<rusqlite::Result<_>>()?;
        Ok(ids)
    }
}
