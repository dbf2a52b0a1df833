//! Transports and the per-contact transport keys used with them.

use std::collections::BTreeMap;

use rusqlite::{Connection, Row, params};
use syncstore_proto::ids::{ContactId, TransportId};
use syncstore_proto::keys::{IncomingKeys, OutgoingKeys, REORDERING_WINDOW_BYTES, TransportKeys};

use super::{Transaction, identity, row};
use crate::error::{DbError, Result};
use crate::event::Event;

fn contains_transport(conn: &Connection, t: &TransportId) -> Result<bool> {
    let found = conn
        .prepare_cached("SELECT NULL FROM transports WHERE transportId = ?")?
        .exists([t.as_str()])?;
    Ok(found)
}

fn require_transport(conn: &Connection, t: &TransportId) -> Result<()> {
    if contains_transport(conn, t)? {
        Ok(())
    } else {
        Err(DbError::NoSuchTransport)
    }
}

fn insert_keys(conn: &Connection, c: ContactId, k: &TransportKeys) -> Result<()> {
    let t = k.transport_id.as_str();
    let mut incoming = conn.prepare_cached(
        "INSERT INTO incomingKeys
         (contactId, transportId, period, tagKey, headerKey, base, bitmap)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )?;
    for keys in k.incoming() {
        incoming.execute(params![
            c.as_u32(),
            t,
            keys.rotation_period,
            &keys.tag_key.as_bytes()[..],
            &keys.header_key.as_bytes()[..],
            keys.window_base,
            keys.window_bitmap,
        ])?;
    }
    let out = &k.outgoing;
    conn.prepare_cached(
        "INSERT INTO outgoingKeys (contactId, transportId, period, tagKey, headerKey, stream)
         VALUES (?, ?, ?, ?, ?, ?)",
    )?
    .execute(params![
        c.as_u32(),
        t,
        out.rotation_period,
        &out.tag_key.as_bytes()[..],
        &out.header_key.as_bytes()[..],
        out.stream_counter,
    ])?;
    Ok(())
}

fn delete_keys(conn: &Connection, c: ContactId, t: &TransportId) -> Result<()> {
    conn.execute(
        "DELETE FROM incomingKeys WHERE contactId = ? AND transportId = ?",
        params![c.as_u32(), t.as_str()],
    )?;
    conn.execute(
        "DELETE FROM outgoingKeys WHERE contactId = ? AND transportId = ?",
        params![c.as_u32(), t.as_str()],
    )?;
    Ok(())
}

fn incoming_from_row(r: &Row<'_>) -> rusqlite::Result<(ContactId, IncomingKeys)> {
    Ok((
        ContactId::new(r.get(0)?),
        IncomingKeys {
            rotation_period: r.get(1)?,
            tag_key: row::hash(r, 2)?,
            header_key: row::hash(r, 3)?,
            window_base: r.get(4)?,
            window_bitmap: r.get(5)?,
        },
    ))
}

fn outgoing_from_row(r: &Row<'_>) -> rusqlite::Result<(ContactId, OutgoingKeys)> {
    Ok((
        ContactId::new(r.get(0)?),
        OutgoingKeys {
            rotation_period: r.get(1)?,
            tag_key: row::hash(r, 2)?,
            header_key: row::hash(r, 3)?,
            stream_counter: r.get(4)?,
        },
    ))
}

impl Transaction<'_> {
    /// Registers a transport with its maximum latency in milliseconds.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidArgument`] if the transport is already
    /// registered.
    pub fn add_transport(&mut self, t: &TransportId, max_latency: u32) -> Result<()> {
        let (conn, events) = self.write_parts()?;
        if contains_transport(conn, t)? {
            return Err(DbError::InvalidArgument(format!("transport {t} already exists")));
        }
        conn.execute(
            "INSERT INTO transports (transportId, maxLatency) VALUES (?, ?)",
            params![t.as_str(), max_latency],
        )?;
        events.push(Event::TransportAdded {
            transport_id: t.clone(),
            max_latency,
        });
        Ok(())
    }

    pub fn contains_transport(&self, t: &TransportId) -> Result<bool> {
        contains_transport(self.conn()?, t)
    }

    /// Removes a transport and every key used with it.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoSuchTransport`] if `t` is unknown.
    pub fn remove_transport(&mut self, t: &TransportId) -> Result<()> {
        let (conn, events) = self.write_parts()?;
        let removed = conn.execute("DELETE FROM transports WHERE transportId = ?", [t.as_str()])?;
        if removed == 0 {
            return Err(DbError::NoSuchTransport);
        }
        events.push(Event::TransportRemoved(t.clone()));
        Ok(())
    }

    /// Maximum latency of every registered transport.
    pub fn get_transport_latencies(&self) -> Result<BTreeMap<TransportId, u32>> {
        let mut stmt = self
            .conn()?
            .prepare_cached("SELECT transportId, maxLatency FROM transports")?;
        let latencies = stmt
            .query_map([], |r| Ok((TransportId::new(r.get::<_, String>(0)?), r.get(1)?)))?
            .collect::<rusqlite::Result<_>>()?;
        Ok(latencies)
    }

    /// Stores a contact's key set for the transport named in `keys`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoSuchContact`] or [`DbError::NoSuchTransport`].
    pub fn add_transport_keys(&mut self, c: ContactId, keys: &TransportKeys) -> Result<()> {
        let (conn, _) = self.write_parts()?;
        identity::require_contact(conn, c)?;
        require_transport(conn, &keys.transport_id)?;
        insert_keys(conn, c, keys)
    }

    /// Key sets of every contact for transport `t`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoSuchTransport`] if `t` is unknown, or
    /// [`DbError::State`] if a contact does not have exactly three incoming
    /// key sets and one outgoing set.
    pub fn get_transport_keys(&self, t: &TransportId) -> Result<BTreeMap<ContactId, TransportKeys>> {
        let conn = self.conn()?;
        require_transport(conn, t)?;

        let mut incoming: BTreeMap<ContactId, Vec<IncomingKeys>> = BTreeMap::new();
        let mut stmt = conn.prepare_cached(
            "SELECT contactId, period, tagKey, headerKey, base, bitmap FROM incomingKeys
             WHERE transportId = ? ORDER BY contactId, period",
        )?;
        for pair in stmt.query_map([t.as_str()], incoming_from_row)? {
            let (c, keys) = pair?;
            incoming.entry(c).or_default().push(keys);
        }

        let mut stmt = conn.prepare_cached(
            "SELECT contactId, period, tagKey, headerKey, stream FROM outgoingKeys
             WHERE transportId = ? ORDER BY contactId",
        )?;
        let outgoing: Vec<(ContactId, OutgoingKeys)> = stmt
            .query_map([t.as_str()], outgoing_from_row)?
            .collect::<rusqlite::Result<_>>()?;
        if outgoing.len() != incoming.len() {
            return Err(DbError::state(format!(
                "{} outgoing key sets for {} contacts",
                outgoing.len(),
                incoming.len()
            )));
        }

        let mut all = BTreeMap::new();
        for (c, out) in outgoing {
            let sets = incoming.remove(&c).unwrap_or_default();
            let [previous, current, next]: [IncomingKeys; 3] = sets
                .try_into()
                .map_err(|v: Vec<_>| DbError::state(format!("{} incoming key sets for {c}", v.len())))?;
            all.insert(
                c,
                TransportKeys {
                    transport_id: t.clone(),
                    previous,
                    current,
                    next,
                    outgoing: out,
                },
            );
        }
        Ok(all)
    }

    /// Advances the outgoing stream counter of `(c, t)` in `rotation_period`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoSuchContact`] or [`DbError::NoSuchTransport`].
    pub fn increment_stream_counter(
        &mut self,
        c: ContactId,
        t: &TransportId,
        rotation_period: u64,
    ) -> Result<()> {
        let (conn, _) = self.write_parts()?;
        identity::require_contact(conn, c)?;
        require_transport(conn, t)?;
        let updated = conn.execute(
            "UPDATE outgoingKeys SET stream = stream + 1
             WHERE contactId = ? AND transportId = ? AND period = ?",
            params![c.as_u32(), t.as_str(), rotation_period],
        )?;
        row::expect_at_most_one(updated, "stream counter update")
    }

    /// Replaces the replay window of one incoming rotation period.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoSuchContact`] or [`DbError::NoSuchTransport`],
    /// and [`DbError::InvalidArgument`] if `bitmap` has the wrong length.
    pub fn set_reordering_window(
        &mut self,
        c: ContactId,
        t: &TransportId,
        rotation_period: u64,
        base: u64,
        bitmap: &[u8],
    ) -> Result<()> {
        let (conn, _) = self.write_parts()?;
        identity::require_contact(conn, c)?;
        require_transport(conn, t)?;
        if bitmap.len() != REORDERING_WINDOW_BYTES {
            return Err(DbError::InvalidArgument(format!(
                "reordering window of {} bytes, expected {REORDERING_WINDOW_BYTES}",
                bitmap.len()
            )));
        }
        let updated = conn.execute(
            "UPDATE incomingKeys SET base = ?, bitmap = ?
             WHERE contactId = ? AND transportId = ? AND period = ?",
            params![base, bitmap, c.as_u32(), t.as_str(), rotation_period],
        )?;
        row::expect_at_most_one(updated, "reordering window update")
    }

    /// Replaces the key sets of several contacts at once. Keys for
    /// transports that are no longer registered are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoSuchContact`] if any contact is unknown.
    pub fn update_transport_keys(&mut self, keys: &BTreeMap<ContactId, TransportKeys>) -> Result<()> {
        let (conn, _) = self.write_parts()?;
        for (c, k) in keys {
            identity::require_contact(conn, *c)?;
            if !contains_transport(conn, &k.transport_id)? {
                tracing::debug!(contact = %c, transport = %k.transport_id, "skipping keys for removed transport");
                continue;
            }
            delete_keys(conn, *c, &k.transport_id)?;
            insert_keys(conn, *c, k)?;
        }
        Ok(())
    }
}
