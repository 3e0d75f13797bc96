//! Error types for the CLI crate.

use cutover_engine::MigrateError;

/// How a run failed, as far as the operator is concerned.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CliError {
    /// The run stopped before anything irreversible happened, or was reverted.
    #[error("migration failed: {0}")]
    Migrate(#[from] MigrateError),

    /// Post-migration failed; the host is half converted.
    #[error("post-migration failed, manual intervention required: {0}")]
    ManualIntervention(MigrateError),
}

impl CliError {
    #[must_use]
    pub fn needs_manual_intervention(&self) -> bool {
        matches!(self, Self::ManualIntervention(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_the_cause() {
        let err = CliError::ManualIntervention(MigrateError::Precondition("pouch did not start".to_owned()));
        let msg = err.to_string();
        assert!(msg.contains("manual intervention"));
        assert!(msg.contains("pouch did not start"));
        assert!(err.needs_manual_intervention());
    }

    #[test]
    fn engine_errors_convert() {
        let err: CliError = MigrateError::UnknownKind("warm".to_owned()).into();
        assert!(matches!(err, CliError::Migrate(MigrateError::UnknownKind(_))));
        assert!(!err.needs_manual_intervention());
    }
}
