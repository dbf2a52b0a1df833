//! Per-contact message status and retransmission backoff.

use rusqlite::{Connection, OptionalExtension, params};
use syncstore_proto::ids::{ContactId, GroupId, MessageId};
use syncstore_proto::message::{MessageState, MessageStatus};

use super::{Transaction, groups, identity, messages, row};
use crate::error::{DbError, Result};

/// Expiry of a message that should never be retransmitted.
pub const MAX_EXPIRY: u64 = i64::MAX.unsigned_abs();

/// Time at which a message sent now should be sent again if not
/// acknowledged.
///
/// The wait is one round trip (twice `max_latency`) doubled for every
/// earlier transmission. Results that would not fit the store's time type
/// saturate at [`MAX_EXPIRY`].
///
/// ```
/// use syncstore::calculate_expiry;
///
/// assert_eq!(calculate_expiry(1000, 100, 0), 1200);
/// assert_eq!(calculate_expiry(1000, 100, 1), 1400);
/// ```
#[must_use]
pub fn calculate_expiry(now: u64, max_latency: u32, tx_count: u32) -> u64 {
    let round_trip = u64::from(max_latency) * 2;
    1u64.checked_shl(tx_count)
        .and_then(|factor| round_trip.checked_mul(factor))
        .and_then(|interval| now.checked_add(interval))
        .filter(|expiry| *expiry <= MAX_EXPIRY)
        .unwrap_or(MAX_EXPIRY)
}

/// Joins a status row to its message and the group's visibility. Rows
/// surviving the `WHERE` are messages that may be offered or sent to the
/// contact bound to the first parameter.
pub(crate) const SENDABLE: &str = "FROM statuses AS s
     JOIN messages AS m ON m.messageId = s.messageId
     JOIN groupVisibilities AS v ON v.contactId = s.contactId AND v.groupId = m.groupId
     WHERE s.contactId = ?
     AND m.state = 3 AND m.shared = TRUE AND m.raw IS NOT NULL
     AND v.shared = TRUE AND s.seen = FALSE";

pub(crate) fn add_status(
    conn: &Connection,
    m: &MessageId,
    c: ContactId,
    ack: bool,
    seen: bool,
) -> Result<()> {
    conn.prepare_cached(
        "INSERT INTO statuses (messageId, contactId, ack, seen, requested, expiry, txCount)
         VALUES (?, ?, ?, ?, FALSE, 0, 0)",
    )?
    .execute(params![&m.as_bytes()[..], c.as_u32(), ack, seen])?;
    Ok(())
}

/// Whether `m` is held, shared, and in a group shared with `c`.
pub(crate) fn is_exchangeable(conn: &Connection, c: ContactId, m: &MessageId) -> Result<bool> {
    let found = conn
        .prepare_cached(
            "SELECT NULL FROM statuses AS s
             JOIN messages AS m ON m.messageId = s.messageId
             JOIN groupVisibilities AS v ON v.contactId = s.contactId AND v.groupId = m.groupId
             WHERE s.messageId = ? AND s.contactId = ?
             AND m.shared = TRUE AND v.shared = TRUE",
        )?
        .exists(params![&m.as_bytes()[..], c.as_u32()])?;
    Ok(found)
}

fn set_flag(conn: &Connection, sql: &str, c: ContactId, m: &MessageId) -> Result<()> {
    let affected = conn
        .prepare_cached(sql)?
        .execute(params![&m.as_bytes()[..], c.as_u32()])?;
    row::expect_at_most_one(affected, sql)
}

pub(crate) fn raise_ack(conn: &Connection, c: ContactId, m: &MessageId) -> Result<()> {
    set_flag(
        conn,
        "UPDATE statuses SET ack = TRUE WHERE messageId = ? AND contactId = ?",
        c,
        m,
    )
}

pub(crate) fn raise_seen(conn: &Connection, c: ContactId, m: &MessageId) -> Result<()> {
    set_flag(
        conn,
        "UPDATE statuses SET seen = TRUE WHERE messageId = ? AND contactId = ?",
        c,
        m,
    )
}

pub(crate) fn raise_requested(conn: &Connection, c: ContactId, m: &MessageId) -> Result<()> {
    set_flag(
        conn,
        "UPDATE statuses SET requested = TRUE WHERE messageId = ? AND contactId = ?",
        c,
        m,
    )
}

pub(crate) fn lower_ack(conn: &Connection, c: ContactId, ids: &[MessageId]) -> Result<()> {
    for m in ids {
        set_flag(
            conn,
            "UPDATE statuses SET ack = FALSE WHERE messageId = ? AND contactId = ?",
            c,
            m,
        )?;
    }
    Ok(())
}

pub(crate) fn lower_requested(conn: &Connection, c: ContactId, ids: &[MessageId]) -> Result<()> {
    for m in ids {
        set_flag(
            conn,
            "UPDATE statuses SET requested = FALSE WHERE messageId = ? AND contactId = ?",
            c,
            m,
        )?;
    }
    Ok(())
}

/// Makes `m` immediately eligible for sending to `c` again.
pub(crate) fn reset_expiry(conn: &Connection, c: ContactId, m: &MessageId) -> Result<()> {
    set_flag(
        conn,
        "UPDATE statuses SET expiry = 0, txCount = 0 WHERE messageId = ? AND contactId = ?",
        c,
        m,
    )
}

/// Records a transmission of `m` to `c` at `now`.
pub(crate) fn update_expiry(
    conn: &Connection,
    c: ContactId,
    m: &MessageId,
    max_latency: u32,
    now: u64,
) -> Result<()> {
    let tx_count: u32 = conn
        .prepare_cached("SELECT txCount FROM statuses WHERE messageId = ? AND contactId = ?")?
        .query_row(params![&m.as_bytes()[..], c.as_u32()], |r| r.get(0))
        .optional()?
        .ok_or_else(|| DbError::state(format!("no status for {m} and {c}")))?;
    let expiry = calculate_expiry(now, max_latency, tx_count);
    let affected = conn
        .prepare_cached(
            "UPDATE statuses SET expiry = ?, txCount = txCount + 1
             WHERE messageId = ? AND contactId = ?",
        )?
        .execute(params![row::sql_time(expiry), &m.as_bytes()[..], c.as_u32()])?;
    row::expect_one(affected, "expiry update")
}

impl Transaction<'_> {
    /// Status of every delivered message in `g` with respect to `c`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoSuchContact`] or [`DbError::NoSuchGroup`].
    pub fn get_message_status(&self, c: ContactId, g: &GroupId) -> Result<Vec<MessageStatus>> {
        let conn = self.conn()?;
        identity::require_contact(conn, c)?;
        groups::require_group(conn, g)?;
        let mut stmt = conn.prepare_cached(
            "SELECT s.messageId, s.txCount > 0, s.seen
             FROM statuses AS s JOIN messages AS m ON m.messageId = s.messageId
             WHERE m.groupId = ? AND s.contactId = ? AND m.state = ?",
        )?;
        let statuses = stmt
            .query_map(
                params![&g.as_bytes()[..], c.as_u32(), MessageState::Delivered.value()],
                |r| {
                    Ok(MessageStatus {
                        message_id: row::hash(r, 0)?,
                        contact_id: c,
                        sent: r.get(1)?,
                        seen: r.get(2)?,
                    })
                },
            )?
            .collect::<rusqlite::Result<_>>()?;
        Ok(statuses)
    }

    /// Status of one delivered message with respect to `c`, or `None` if
    /// the contact cannot see it or it is not delivered.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoSuchContact`] or [`DbError::NoSuchMessage`].
    pub fn get_message_status_for(
        &self,
        c: ContactId,
        m: &MessageId,
    ) -> Result<Option<MessageStatus>> {
        let conn = self.conn()?;
        identity::require_contact(conn, c)?;
        messages::require_message(conn, m)?;
        let status = conn
            .prepare_cached(
                "SELECT s.txCount > 0, s.seen
                 FROM statuses AS s JOIN messages AS m ON m.messageId = s.messageId
                 WHERE s.messageId = ? AND s.contactId = ? AND m.state = ?",
            )?
            .query_row(
                params![&m.as_bytes()[..], c.as_u32(), MessageState::Delivered.value()],
                |r| {
                    Ok(MessageStatus {
                        message_id: *m,
                        contact_id: c,
                        sent: r.get(0)?,
                        seen: r.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(status)
    }

    /// Earliest time at which anything will be due for sending to `c`, or
    /// [`MAX_EXPIRY`] if nothing is waiting.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoSuchContact`].
    pub fn get_next_send_time(&self, c: ContactId) -> Result<u64> {
        let conn = self.conn()?;
        identity::require_contact(conn, c)?;
        let next = conn
            .prepare_cached(&format!("SELECT s.expiry {SENDABLE} ORDER BY s.expiry LIMIT 1"))?
            .query_row([c.as_u32()], |r| row::time(r, 0))
            .optional()?;
        Ok(next.unwrap_or(MAX_EXPIRY))
    }

    /// Clears the backoff of `m` for `c` so it is sent at the next
    /// opportunity.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoSuchContact`] or [`DbError::NoSuchMessage`].
    pub fn reset_expiry_time(&mut self, c: ContactId, m: &MessageId) -> Result<()> {
        let (conn, _) = self.write_parts()?;
        identity::require_contact(conn, c)?;
        messages::require_message(conn, m)?;
        reset_expiry(conn, c, m)
    }
}
