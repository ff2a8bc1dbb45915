//! Error kinds for rule lookup, overdue evaluation and table access.

use thiserror::Error;

use crate::models::MeasurementKind;

#[derive(Error, Debug)]
pub enum MaintenanceError {
    #[error("Connection error: {0}")]
    Connection(#[source] sqlx::Error),

    #[error("Query error: {0}")]
    Query(#[source] sqlx::Error),

    #[error("Query timed out after {0} seconds")]
    Timeout(u64),

    #[error("No repetition rule for {kind} at evaluation level {level}")]
    RuleNotFound { kind: MeasurementKind, level: i32 },

    #[error("Invalid date format: {0:?}")]
    InvalidDateFormat(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl MaintenanceError {
    /// Only a lost connection ends a pass; everything else is per metric.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MaintenanceError::Connection(_))
    }
}

impl From<sqlx::Error> for MaintenanceError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => MaintenanceError::Connection(err),
            other => MaintenanceError::Query(other),
        }
    }
}

impl From<config::ConfigError> for MaintenanceError {
    fn from(err: config::ConfigError) -> Self {
        MaintenanceError::Config(err.to_string())
    }
}

pub type MaintenanceResult<T> = Result<T, MaintenanceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connection_errors_are_fatal() {
        assert!(MaintenanceError::from(sqlx::Error::PoolClosed).is_fatal());
        assert!(!MaintenanceError::from(sqlx::Error::RowNotFound).is_fatal());
        assert!(!MaintenanceError::Timeout(10).is_fatal());
        assert!(!MaintenanceError::RuleNotFound {
            kind: MeasurementKind::Glucose,
            level: 2,
        }
        .is_fatal());
    }

    #[test]
    fn rule_not_found_names_the_metric() {
        let err = MaintenanceError::RuleNotFound {
            kind: MeasurementKind::Pressure,
            level: 3,
        };
        assert_eq!(
            err.to_string(),
            "No repetition rule for presion at evaluation level 3"
        );
    }
}
