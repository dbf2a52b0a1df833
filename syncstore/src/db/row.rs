//! Conversions between domain types and SQLite columns.

use rusqlite::Row;
use rusqlite::types::Type;
use syncstore_proto::ids::InvalidIdLength;
use syncstore_proto::message::MessageState;

use crate::error::{DbError, Result};

/// Reads a fixed-length hash column into an identifier type.
pub(crate) fn hash<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: for<'b> TryFrom<&'b [u8], Error = InvalidIdLength>,
{
    let bytes: Vec<u8> = row.get(idx)?;
    T::try_from(bytes.as_slice())
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Blob, Box::new(e)))
}

/// Reads a validation state column.
pub(crate) fn state(row: &Row<'_>, idx: usize) -> rusqlite::Result<MessageState> {
    let value: u8 = row.get(idx)?;
    MessageState::from_value(value).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Integer,
            format!("unknown message state {value}").into(),
        )
    })
}

/// Reads a millisecond time column. Negative values read as zero.
pub(crate) fn time(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let value: i64 = row.get(idx)?;
    Ok(u64::try_from(value).unwrap_or(0))
}

/// Converts a millisecond time for storage, saturating at `i64::MAX`.
pub(crate) fn sql_time(millis: u64) -> i64 {
    i64::try_from(millis).unwrap_or(i64::MAX)
}

/// Fails unless an update or delete touched exactly one row.
pub(crate) fn expect_one(affected: usize, what: &str) -> Result<()> {
    if affected == 1 {
        Ok(())
    } else {
        Err(DbError::state(format!("{what}: {affected} rows affected, expected 1")))
    }
}

/// Fails if an update touched more than one row.
pub(crate) fn expect_at_most_one(affected: usize, what: &str) -> Result<()> {
    if affected <= 1 {
        Ok(())
    } else {
        Err(DbError::state(format!("{what}: {affected} rows affected, expected at most 1")))
    }
}
