// Database drivers
// One short-lived sqlx connection per request, no pools

pub mod mysql;
pub mod postgres;

use crate::engine::error::EngineError;

/// `YYYY-MM-DDTHH:MM:SS[.fraction]`
pub(crate) fn iso_datetime(dt: &chrono::NaiveDateTime) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
}

pub(crate) fn iso_date(d: &chrono::NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

pub(crate) fn iso_time(t: &chrono::NaiveTime) -> String {
    t.format("%H:%M:%S%.f").to_string()
}

pub(crate) fn closed_connection() -> EngineError {
    EngineError::query_failed("Connection is already closed")
}

/// SQL-level failure of a statement
pub(crate) fn query_error(e: sqlx::Error) -> EngineError {
    match e {
        sqlx::Error::Database(db) => EngineError::query_failed(db.message().to_string()),
        other => EngineError::query_failed(other.to_string()),
    }
}
