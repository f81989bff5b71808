use thiserror::Error;

/// Errors raised while loading phenotypes or computing association statistics.
#[derive(Error, Debug)]
pub enum StatsError {
    #[error("Malformed input: {0}")]
    Format(String),
    #[error("Duplicate feature id '{0}'")]
    DuplicateKey(String),
    #[error("Invalid region '{input}': {reason}")]
    Parse { input: String, reason: String },
    #[error("Feature '{id}' is degenerate: {reason}")]
    DegenerateFeature { id: String, reason: String },
    #[error("Degenerate input: {0}")]
    DegenerateInput(String),
    #[error("Insufficient samples: need at least {required}, found {found}")]
    InsufficientSamples { required: usize, found: usize },
    #[error("Cannot compute statistics on an empty vector")]
    EmptyVector,
    #[error("Vector length mismatch: expected {expected}, found {found}")]
    LengthMismatch { expected: usize, found: usize },
    #[error("Invalid degrees of freedom: {0}")]
    InvalidDegreesOfFreedom(f64),
    #[error("Phenotype store must be sorted before region queries")]
    UnsortedStore,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StatsError {
    /// True for errors confined to a single feature. The driver skips the
    /// feature and keeps going; anything else aborts the analysis.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StatsError::DegenerateFeature { .. }
                | StatsError::DegenerateInput(_)
                | StatsError::InsufficientSamples { .. }
                | StatsError::EmptyVector
        )
    }
}

pub type Result<T, E = StatsError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_split() {
        assert!(StatsError::EmptyVector.is_recoverable());
        assert!(StatsError::DegenerateInput("flat".into()).is_recoverable());
        assert!(StatsError::InsufficientSamples { required: 2, found: 1 }.is_recoverable());
        assert!(!StatsError::LengthMismatch { expected: 3, found: 2 }.is_recoverable());
        assert!(!StatsError::InvalidDegreesOfFreedom(0.0).is_recoverable());
        assert!(!StatsError::DuplicateKey("g1".into()).is_recoverable());
        assert!(!StatsError::UnsortedStore.is_recoverable());
    }

    #[test]
    fn messages_name_the_offender() {
        let e = StatsError::Parse { input: "chr1:9-3".into(), reason: "start > end".into() };
        assert_eq!(e.to_string(), "Invalid region 'chr1:9-3': start > end");
        assert_eq!(
            StatsError::DuplicateKey("ENSG1".into()).to_string(),
            "Duplicate feature id 'ENSG1'"
        );
    }
}
