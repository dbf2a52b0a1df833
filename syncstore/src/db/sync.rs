//! Selection and reception of sync records.
//!
//! Every operation here needs a writable transaction: even generating an
//! offer or batch updates retransmission state. An empty selection is
//! reported as `None`.

use rusqlite::{Connection, params};
use syncstore_proto::ids::{ContactId, MessageId};
use syncstore_proto::message::{Message, MessageState};
use syncstore_proto::record::{Ack, Offer, Request};

use super::status::{self, SENDABLE};
use super::{Transaction, identity, messages, row, visibility};
use crate::error::Result;
use crate::event::Event;

/// Deletes the offer of `m` by `c`, returning whether there was one.
pub(crate) fn remove_offered(conn: &Connection, c: ContactId, m: &MessageId) -> Result<bool> {
    let removed = conn
        .prepare_cached("DELETE FROM offers WHERE contactId = ? AND messageId = ?")?
        .execute(params![c.as_u32(), &m.as_bytes()[..]])?;
    row::expect_at_most_one(removed, "offer removal")?;
    Ok(removed == 1)
}

fn count_offered(conn: &Connection, c: ContactId) -> Result<usize> {
    let count: i64 = conn
        .prepare_cached("SELECT COUNT(*) FROM offers WHERE contactId = ?")?
        .query_row([c.as_u32()], |r| r.get(0))?;
    Ok(usize::try_from(count).unwrap_or(0))
}

/// Records an offer, returning `false` if it was already recorded.
fn add_offered(conn: &Connection, c: ContactId, m: &MessageId) -> Result<bool> {
    let inserted = conn
        .prepare_cached("INSERT OR IGNORE INTO offers (messageId, contactId) VALUES (?, ?)")?
        .execute(params![&m.as_bytes()[..], c.as_u32()])?;
    Ok(inserted == 1)
}

fn limit(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// Sendable messages for `c` in timestamp order, each with its length,
/// restricted by `filter` and packed greedily into `max_length` bytes.
fn pack_batch(
    conn: &Connection,
    c: ContactId,
    filter: &str,
    now: Option<u64>,
    max_length: usize,
) -> Result<Vec<(MessageId, Vec<u8>)>> {
    let sql = format!("SELECT s.messageId, m.length, m.raw {SENDABLE} {filter} ORDER BY m.timestamp");
    let mut stmt = conn.prepare_cached(&sql)?;
    let mut rows = match now {
        Some(now) => stmt.query(params![c.as_u32(), row::sql_time(now)])?,
        None => stmt.query([c.as_u32()])?,
    };
    let mut batch = Vec::new();
    let mut total = 0usize;
    while let Some(r) = rows.next()? {
        let length: usize = r.get(1)?;
        if total.saturating_add(length) > max_length {
            break;
        }
        let raw: Vec<u8> = r.get(2)?;
        batch.push((row::hash(r, 0)?, raw));
        total += length;
    }
    Ok(batch)
}

impl Transaction<'_> {
    /// Takes up to `max_messages` messages waiting to be acknowledged to
    /// `c` and lowers their ack flags.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoSuchContact`](crate::DbError::NoSuchContact) if `c` is unknown.
    pub fn generate_ack(&mut self, c: ContactId, max_messages: usize) -> Result<Option<Ack>> {
        let (conn, _) = self.write_parts()?;
        identity::require_contact(conn, c)?;
        let mut stmt = conn.prepare_cached(
            "SELECT messageId FROM statuses WHERE contactId = ? AND ack = TRUE LIMIT ?",
        )?;
        let ids: Vec<MessageId> = stmt
            .query_map(params![c.as_u32(), limit(max_messages)], |r| row::hash(r, 0))?
            .collect::<rusqlite::Result<_>>()?;
        if ids.is_empty() {
            return Ok(None);
        }
        status::lower_ack(conn, c, &ids)?;
        tracing::debug!(contact = %c, count = ids.len(), "generated ack");
        Ok(Some(Ack { message_ids: ids }))
    }

    /// Offers up to `max_messages` due messages to `c`, oldest first. Each
    /// offer counts as a transmission for backoff.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoSuchContact`](crate::DbError::NoSuchContact) if `c` is unknown.
    pub fn generate_offer(
        &mut self,
        c: ContactId,
        max_messages: usize,
        max_latency: u32,
    ) -> Result<Option<Offer>> {
        let now = self.now();
        let (conn, _) = self.write_parts()?;
        identity::require_contact(conn, c)?;
        let sql = format!(
            "SELECT s.messageId {SENDABLE}
             AND s.requested = FALSE AND s.expiry <= ?
             ORDER BY m.timestamp LIMIT ?"
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let ids: Vec<MessageId> = stmt
            .query_map(
                params![c.as_u32(), row::sql_time(now), limit(max_messages)],
                |r| row::hash(r, 0),
            )?
            .collect::<rusqlite::Result<_>>()?;
        if ids.is_empty() {
            return Ok(None);
        }
        for m in &ids {
            status::update_expiry(conn, c, m, max_latency, now)?;
        }
        tracing::debug!(contact = %c, count = ids.len(), "generated offer");
        Ok(Some(Offer { message_ids: ids }))
    }

    /// Requests up to `max_messages` of the messages `c` has offered and
    /// forgets those offers.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoSuchContact`](crate::DbError::NoSuchContact) if `c` is unknown.
    pub fn generate_request(
        &mut self,
        c: ContactId,
        max_messages: usize,
    ) -> Result<Option<Request>> {
        let (conn, _) = self.write_parts()?;
        identity::require_contact(conn, c)?;
        let mut stmt =
            conn.prepare_cached("SELECT messageId FROM offers WHERE contactId = ? LIMIT ?")?;
        let ids: Vec<MessageId> = stmt
            .query_map(params![c.as_u32(), limit(max_messages)], |r| row::hash(r, 0))?
            .collect::<rusqlite::Result<_>>()?;
        if ids.is_empty() {
            return Ok(None);
        }
        for m in &ids {
            remove_offered(conn, c, m)?;
        }
        tracing::debug!(contact = %c, count = ids.len(), "generated request");
        Ok(Some(Request { message_ids: ids }))
    }

    /// Packs due messages for `c`, oldest first, into at most `max_length`
    /// bytes. Messages are never split.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoSuchContact`](crate::DbError::NoSuchContact) if `c` is unknown.
    pub fn generate_batch(
        &mut self,
        c: ContactId,
        max_length: usize,
        max_latency: u32,
    ) -> Result<Option<Vec<Vec<u8>>>> {
        self.send_batch(c, true, max_length, max_latency)
    }

    /// Like [`generate_batch`](Self::generate_batch) but only for messages
    /// `c` has requested, whether or not their backoff has expired.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoSuchContact`](crate::DbError::NoSuchContact) if `c` is unknown.
    pub fn generate_requested_batch(
        &mut self,
        c: ContactId,
        max_length: usize,
        max_latency: u32,
    ) -> Result<Option<Vec<Vec<u8>>>> {
        self.send_batch(c, false, max_length, max_latency)
    }

    /// Shared body of the two batch generators: `due` selects messages
    /// whose backoff has expired, otherwise requested ones.
    fn send_batch(
        &mut self,
        c: ContactId,
        due: bool,
        max_length: usize,
        max_latency: u32,
    ) -> Result<Option<Vec<Vec<u8>>>> {
        let now = self.now();
        let (conn, events) = self.write_parts()?;
        identity::require_contact(conn, c)?;
        let batch = if due {
            pack_batch(conn, c, "AND s.expiry <= ?", Some(now), max_length)?
        } else {
            pack_batch(conn, c, "AND s.requested = TRUE", None, max_length)?
        };
        if batch.is_empty() {
            return Ok(None);
        }
        let ids: Vec<MessageId> = batch.iter().map(|(m, _)| *m).collect();
        for m in &ids {
            status::update_expiry(conn, c, m, max_latency, now)?;
        }
        status::lower_requested(conn, c, &ids)?;
        tracing::debug!(contact = %c, count = ids.len(), "generated batch");
        events.push(Event::MessagesSent {
            contact_id: c,
            message_ids: ids,
        });
        Ok(Some(batch.into_iter().map(|(_, raw)| raw).collect()))
    }

    /// Applies an ack from `c`: each listed message it can see is marked
    /// seen.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoSuchContact`](crate::DbError::NoSuchContact) if `c` is unknown.
    pub fn receive_ack(&mut self, c: ContactId, ack: &Ack) -> Result<()> {
        let (conn, events) = self.write_parts()?;
        identity::require_contact(conn, c)?;
        let mut acked = Vec::new();
        for m in &ack.message_ids {
            if status::is_exchangeable(conn, c, m)? {
                status::raise_seen(conn, c, m)?;
                acked.push(*m);
            }
        }
        if !acked.is_empty() {
            events.push(Event::MessagesAcked {
                contact_id: c,
                message_ids: acked,
            });
        }
        Ok(())
    }

    /// Applies a message sent by `c`.
    ///
    /// Ignored unless `c` can see the message's group. A message already
    /// held is just marked seen and due for acknowledgement. A new one is
    /// stored unvalidated and unshared.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoSuchContact`](crate::DbError::NoSuchContact) if `c` is unknown.
    pub fn receive_message(&mut self, c: ContactId, m: &Message) -> Result<()> {
        let (conn, events) = self.write_parts()?;
        identity::require_contact(conn, c)?;
        if !visibility::group_visibility(conn, c, &m.group_id)?.is_visible() {
            tracing::debug!(contact = %c, message = %m.id, "ignoring message in invisible group");
            return Ok(());
        }
        if messages::contains_message(conn, &m.id)? {
            status::raise_seen(conn, c, &m.id)?;
            status::raise_ack(conn, c, &m.id)?;
        } else {
            messages::add_message(conn, m, MessageState::Unknown, false, Some(c))?;
            events.push(Event::MessageAdded {
                message_id: m.id,
                group_id: m.group_id,
                contact_id: Some(c),
            });
        }
        events.push(Event::MessageToAck(c));
        Ok(())
    }

    /// Applies an offer from `c`.
    ///
    /// Offered messages it can already see are marked seen and due for
    /// acknowledgement. The rest are remembered for requesting, up to the
    /// configured number of outstanding offers per contact; offers beyond
    /// that are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoSuchContact`](crate::DbError::NoSuchContact) if `c` is unknown.
    pub fn receive_offer(&mut self, c: ContactId, offer: &Offer) -> Result<()> {
        let cap = self.db().config().max_offered_messages;
        let (conn, events) = self.write_parts()?;
        identity::require_contact(conn, c)?;
        let mut count = count_offered(conn, c)?;
        let (mut ack, mut request) = (false, false);
        let mut dropped = 0usize;
        for m in &offer.message_ids {
            if status::is_exchangeable(conn, c, m)? {
                status::raise_seen(conn, c, m)?;
                status::raise_ack(conn, c, m)?;
                ack = true;
            } else if count < cap {
                if add_offered(conn, c, m)? {
                    count += 1;
                    request = true;
                }
            } else {
                dropped += 1;
            }
        }
        if dropped > 0 {
            tracing::debug!(contact = %c, dropped, cap, "offer cap reached");
        }
        if ack {
            events.push(Event::MessageToAck(c));
        }
        if request {
            events.push(Event::MessageToRequest(c));
        }
        Ok(())
    }

    /// Applies a request from `c`: each listed message it can see is marked
    /// requested and made due immediately.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoSuchContact`](crate::DbError::NoSuchContact) if `c` is unknown.
    pub fn receive_request(&mut self, c: ContactId, request: &Request) -> Result<()> {
        let (conn, events) = self.write_parts()?;
        identity::require_contact(conn, c)?;
        let mut requested = false;
        for m in &request.message_ids {
            if status::is_exchangeable(conn, c, m)? {
                status::raise_requested(conn, c, m)?;
                status::reset_expiry(conn, c, m)?;
                requested = true;
            }
        }
        if requested {
            events.push(Event::MessageRequested(c));
        }
        Ok(())
    }
}

/// Number of outstanding offers from `c`.
#[cfg(test)]
pub(crate) fn offered_count(conn: &Connection, c: ContactId) -> usize {
    count_offered(conn, c).unwrap_or(0)
}
