use thiserror::Error;

#[derive(Debug, Error)]
pub enum SysdbError {
    #[error("storage error: {message}")]
    Storage { message: String },
    #[error("not found: {message}")]
    NotFound { message: String },
    #[error("already exists: {message}")]
    AlreadyExists { message: String },
    #[error("version stale: {message}")]
    VersionStale { message: String },
    #[error("log position stale: {message}")]
    LogPositionStale { message: String },
    #[error("version invalid: {message}")]
    VersionInvalid { message: String },
    #[error("not ready: {message}")]
    NotReady { message: String },
    #[error("unique constraint violation: {message}")]
    UniqueConstraintViolation { message: String },
    #[error("validation error: {message}")]
    Validation { message: String },
}

impl SysdbError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::AlreadyExists {
            message: message.into(),
        }
    }

    pub fn version_stale(message: impl Into<String>) -> Self {
        Self::VersionStale {
            message: message.into(),
        }
    }

    pub fn log_position_stale(message: impl Into<String>) -> Self {
        Self::LogPositionStale {
            message: message.into(),
        }
    }

    pub fn version_invalid(message: impl Into<String>) -> Self {
        Self::VersionInvalid {
            message: message.into(),
        }
    }

    pub fn not_ready(message: impl Into<String>) -> Self {
        Self::NotReady {
            message: message.into(),
        }
    }

    pub fn unique_violation(message: impl Into<String>) -> Self {
        Self::UniqueConstraintViolation {
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueConstraintViolation { .. })
    }

    /// Rewrites a backend unique-constraint violation into `AlreadyExists`,
    /// leaving every other error untouched.
    pub fn or_already_exists(self, message: impl Into<String>) -> Self {
        if self.is_unique_violation() {
            Self::already_exists(message)
        } else {
            self
        }
    }
}

pub type SysdbResult<T> = Result<T, SysdbError>;

impl From<sea_orm::DbErr> for SysdbError {
    fn from(value: sea_orm::DbErr) -> Self {
        match value.sql_err() {
            Some(sea_orm::SqlErr::UniqueConstraintViolation(message)) => {
                SysdbError::unique_violation(message)
            }
            _ => SysdbError::storage(value.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SysdbError;

    #[test]
    fn helper_constructors_set_variants() {
        let err = SysdbError::storage("disk");
        assert!(matches!(err, SysdbError::Storage { .. }));
        let err = SysdbError::not_found("missing");
        assert!(err.is_not_found());
        let err = SysdbError::already_exists("dup");
        assert!(matches!(err, SysdbError::AlreadyExists { .. }));
        let err = SysdbError::version_stale("behind");
        assert!(matches!(err, SysdbError::VersionStale { .. }));
        let err = SysdbError::log_position_stale("behind");
        assert!(matches!(err, SysdbError::LogPositionStale { .. }));
        let err = SysdbError::version_invalid("skipped");
        assert!(matches!(err, SysdbError::VersionInvalid { .. }));
        let err = SysdbError::not_ready("creating");
        assert!(matches!(err, SysdbError::NotReady { .. }));
        let err = SysdbError::invalid("bad");
        assert!(matches!(err, SysdbError::Validation { .. }));
    }

    #[test]
    fn unique_violation_becomes_already_exists() {
        let err =
            SysdbError::unique_violation("collections.name").or_already_exists("collection c1");
        match err {
            SysdbError::AlreadyExists { message } => assert_eq!(message, "collection c1"),
            other => panic!("unexpected error {other:?}"),
        }
        let err = SysdbError::storage("io").or_already_exists("collection c1");
        assert!(matches!(err, SysdbError::Storage { .. }));
    }
}
