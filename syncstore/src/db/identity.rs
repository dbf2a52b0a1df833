//! Local identities and contacts.

use rusqlite::{Connection, OptionalExtension, Row, params};
use syncstore_proto::identity::{Author, Contact, LocalAuthor};
use syncstore_proto::ids::{AuthorId, ContactId, Timestamp};

use super::Transaction;
use super::row;
use crate::error::{DbError, Result};
use crate::event::Event;

const CONTACT_COLUMNS: &str =
    "contactId, authorId, name, publicKey, localAuthorId, verified, active";

fn contact_from_row(r: &Row<'_>) -> rusqlite::Result<Contact> {
    Ok(Contact {
        id: ContactId::new(r.get(0)?),
        author: Author {
            id: row::hash(r, 1)?,
            name: r.get(2)?,
            public_key: r.get(3)?,
        },
        local_author_id: row::hash(r, 4)?,
        verified: r.get(5)?,
        active: r.get(6)?,
    })
}

fn local_author_from_row(r: &Row<'_>) -> rusqlite::Result<LocalAuthor> {
    Ok(LocalAuthor {
        author: Author {
            id: row::hash(r, 0)?,
            name: r.get(1)?,
            public_key: r.get(2)?,
        },
        private_key: r.get(3)?,
        created: Timestamp::from_millis(row::time(r, 4)?),
    })
}

pub(crate) fn contains_local_author(conn: &Connection, a: &AuthorId) -> Result<bool> {
    let found = conn
        .prepare_cached("SELECT NULL FROM localAuthors WHERE authorId = ?")?
        .exists([&a.as_bytes()[..]])?;
    Ok(found)
}

pub(crate) fn contains_contact(conn: &Connection, c: ContactId) -> Result<bool> {
    let found = conn
        .prepare_cached("SELECT NULL FROM contacts WHERE contactId = ?")?
        .exists([c.as_u32()])?;
    Ok(found)
}

fn contains_contact_by_author(conn: &Connection, remote: &AuthorId, local: &AuthorId) -> Result<bool> {
    let found = conn
        .prepare_cached("SELECT NULL FROM contacts WHERE authorId = ? AND localAuthorId = ?")?
        .exists([&remote.as_bytes()[..], &local.as_bytes()[..]])?;
    Ok(found)
}

pub(crate) fn contact_ids(conn: &Connection) -> Result<Vec<ContactId>> {
    let mut stmt = conn.prepare_cached("SELECT contactId FROM contacts")?;
    let ids = stmt
        .query_map([], |r| Ok(ContactId::new(r.get(0)?)))?
        .collect::<rusqlite::Result<_>>()?;
    Ok(ids)
}

/// Fails with [`DbError::NoSuchContact`] unless `c` exists.
pub(crate) fn require_contact(conn: &Connection, c: ContactId) -> Result<()> {
    if contains_contact(conn, c)? {
        Ok(())
    } else {
        Err(DbError::NoSuchContact)
    }
}

impl Transaction<'_> {
    /// Stores a local identity. Adding one that already exists does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::ReadOnlyTransaction`] or an engine error.
    pub fn add_local_author(&mut self, a: &LocalAuthor) -> Result<()> {
        let (conn, events) = self.write_parts()?;
        if contains_local_author(conn, &a.id())? {
            return Ok(());
        }
        conn.execute(
            "INSERT INTO localAuthors (authorId, name, publicKey, privateKey, created)
             VALUES (?, ?, ?, ?, ?)",
            params![
                &a.id().as_bytes()[..],
                a.author.name,
                a.author.public_key,
                a.private_key,
                row::sql_time(a.created.as_millis()),
            ],
        )?;
        events.push(Event::LocalAuthorAdded(a.id()));
        Ok(())
    }

    pub fn contains_local_author(&self, a: &AuthorId) -> Result<bool> {
        contains_local_author(self.conn()?, a)
    }

    /// # Errors
    ///
    /// Returns [`DbError::NoSuchLocalAuthor`] if `a` is unknown.
    pub fn get_local_author(&self, a: &AuthorId) -> Result<LocalAuthor> {
        self.conn()?
            .query_row(
                "SELECT authorId, name, publicKey, privateKey, created
                 FROM localAuthors WHERE authorId = ?",
                [&a.as_bytes()[..]],
                local_author_from_row,
            )
            .optional()?
            .ok_or(DbError::NoSuchLocalAuthor)
    }

    pub fn get_local_authors(&self) -> Result<Vec<LocalAuthor>> {
        let mut stmt = self.conn()?.prepare_cached(
            "SELECT authorId, name, publicKey, privateKey, created FROM localAuthors",
        )?;
        let authors = stmt
            .query_map([], local_author_from_row)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(authors)
    }

    /// Removes a local identity together with its contacts and everything
    /// that hangs off them.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoSuchLocalAuthor`] if `a` is unknown.
    pub fn remove_local_author(&mut self, a: &AuthorId) -> Result<()> {
        let (conn, events) = self.write_parts()?;
        let removed = conn.execute(
            "DELETE FROM localAuthors WHERE authorId = ?",
            [&a.as_bytes()[..]],
        )?;
        if removed == 0 {
            return Err(DbError::NoSuchLocalAuthor);
        }
        events.push(Event::LocalAuthorRemoved(*a));
        Ok(())
    }

    /// Adds `remote` as a contact of the local identity `local` and returns
    /// the new contact's id.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoSuchLocalAuthor`] if `local` is unknown, and
    /// [`DbError::InvalidArgument`] if `remote` is a local identity or is
    /// already a contact of `local`.
    pub fn add_contact(
        &mut self,
        remote: &Author,
        local: AuthorId,
        verified: bool,
        active: bool,
    ) -> Result<ContactId> {
        let (conn, events) = self.write_parts()?;
        if !contains_local_author(conn, &local)? {
            return Err(DbError::NoSuchLocalAuthor);
        }
        if contains_local_author(conn, &remote.id)? {
            return Err(DbError::InvalidArgument(
                "contact is a local identity".into(),
            ));
        }
        if contains_contact_by_author(conn, &remote.id, &local)? {
            return Err(DbError::InvalidArgument("contact already exists".into()));
        }
        conn.execute(
            "INSERT INTO contacts (authorId, name, publicKey, localAuthorId, verified, active)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                &remote.id.as_bytes()[..],
                remote.name,
                remote.public_key,
                &local.as_bytes()[..],
                verified,
                active,
            ],
        )?;
        let id = u32::try_from(conn.last_insert_rowid())
            .map_err(|_| DbError::state("contact id out of range"))?;
        let contact_id = ContactId::new(id);
        tracing::debug!(contact = %contact_id, "added contact");
        events.push(Event::ContactAdded { contact_id, active });
        Ok(contact_id)
    }

    pub fn contains_contact(&self, c: ContactId) -> Result<bool> {
        contains_contact(self.conn()?, c)
    }

    /// Whether `remote` is a contact of the local identity `local`.
    pub fn contains_contact_by_author(&self, remote: &AuthorId, local: &AuthorId) -> Result<bool> {
        contains_contact_by_author(self.conn()?, remote, local)
    }

    /// # Errors
    ///
    /// Returns [`DbError::NoSuchContact`] if `c` is unknown.
    pub fn get_contact(&self, c: ContactId) -> Result<Contact> {
        self.conn()?
            .query_row(
                &format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE contactId = ?"),
                [c.as_u32()],
                contact_from_row,
            )
            .optional()?
            .ok_or(DbError::NoSuchContact)
    }

    pub fn get_contacts(&self) -> Result<Vec<Contact>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!("SELECT {CONTACT_COLUMNS} FROM contacts"))?;
        let contacts = stmt
            .query_map([], contact_from_row)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(contacts)
    }

    /// Every contact, of any local identity, for the remote author `remote`.
    pub fn get_contacts_by_author(&self, remote: &AuthorId) -> Result<Vec<Contact>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts WHERE authorId = ?"
        ))?;
        let contacts = stmt
            .query_map([&remote.as_bytes()[..]], contact_from_row)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(contacts)
    }

    /// Marks a contact as verified.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoSuchContact`] if `c` is unknown.
    pub fn set_contact_verified(&mut self, c: ContactId) -> Result<()> {
        let (conn, events) = self.write_parts()?;
        let updated = conn.execute(
            "UPDATE contacts SET verified = TRUE WHERE contactId = ?",
            [c.as_u32()],
        )?;
        if updated == 0 {
            return Err(DbError::NoSuchContact);
        }
        events.push(Event::ContactVerified(c));
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`DbError::NoSuchContact`] if `c` is unknown.
    pub fn set_contact_active(&mut self, c: ContactId, active: bool) -> Result<()> {
        let (conn, events) = self.write_parts()?;
        let updated = conn.execute(
            "UPDATE contacts SET active = ? WHERE contactId = ?",
            params![active, c.as_u32()],
        )?;
        if updated == 0 {
            return Err(DbError::NoSuchContact);
        }
        events.push(Event::ContactStatusChanged { contact_id: c, active });
        Ok(())
    }

    /// Removes a contact along with its visibilities, statuses, offers and
    /// transport keys.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoSuchContact`] if `c` is unknown.
    pub fn remove_contact(&mut self, c: ContactId) -> Result<()> {
        let (conn, events) = self.write_parts()?;
        let removed = conn.execute("DELETE FROM contacts WHERE contactId = ?", [c.as_u32()])?;
        if removed == 0 {
            return Err(DbError::NoSuchContact);
        }
        tracing::debug!(contact = %c, "removed contact");
        events.push(Event::ContactRemoved(c));
        Ok(())
    }
}
