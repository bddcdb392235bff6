//! Error types for cachewalk-core.

use std::fmt;

use cachewalk_fips::FipsError;

/// Errors produced by the harvester and the entropy pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Walk table size is not a power of two, or is outside the supported range.
    InvalidTableSize { words: usize },
    /// The self-test engine rejected its input.
    SelfTest(FipsError),
    /// The discard policy dropped too many consecutive flagged blocks.
    TooManyRejectedBlocks { consecutive: u64 },
    /// No registered source produced any bytes.
    NoSources,
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::InvalidTableSize { words } => write!(
                f,
                "walk table size {words} must be a power of two between {} and {} words",
                crate::walk::MIN_TABLE_WORDS,
                crate::walk::MAX_TABLE_WORDS
            ),
            CoreError::SelfTest(e) => write!(f, "self-test error: {e}"),
            CoreError::TooManyRejectedBlocks { consecutive } => write!(
                f,
                "{consecutive} consecutive blocks failed the FIPS 140-2 self-tests"
            ),
            CoreError::NoSources => write!(f, "no entropy source produced any bytes"),
        }
    }
}

impl std::error::Error for CoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CoreError::SelfTest(e) => Some(e),
            _ => None,
        }
    }
}

impl From<FipsError> for CoreError {
    fn from(e: FipsError) -> Self {
        CoreError::SelfTest(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_display_invalid_table_size() {
        let err = CoreError::InvalidTableSize { words: 100 };
        assert!(err.to_string().starts_with("walk table size 100 must be a power of two"));
    }

    #[test]
    fn test_display_rejected_blocks() {
        let err = CoreError::TooManyRejectedBlocks { consecutive: 3 };
        assert_eq!(
            err.to_string(),
            "3 consecutive blocks failed the FIPS 140-2 self-tests"
        );
    }

    #[test]
    fn test_from_fips_error_keeps_source() {
        let err: CoreError = FipsError::BlockLength {
            expected: 2500,
            actual: 1,
        }
        .into();
        assert!(matches!(err, CoreError::SelfTest(_)));
        assert!(err.source().is_some());
        assert!(CoreError::NoSources.source().is_none());
    }
}
