use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the summarization and rendering core.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Invalid modes, bin parameters, fractions or family layouts.
    /// Always raised before any job is dispatched.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Histogram mass was lost and neither infinities nor range clipping explain it.
    #[error("data range error: {0}")]
    DataRange(String),

    /// A per-mode computation was not supplied by the concrete analyzer.
    #[error(
        "{class} does not compute plottable data \
         (group_label={group:?}, column_name={column:?}, render_mode={mode:?})"
    )]
    AbstractMethod {
        class: String,
        group: String,
        column: String,
        mode: String,
    },

    /// The input table does not honor a column contract.
    #[error("contract violation: {0}")]
    Contract(String),

    /// A rendering job failed; the batch was aborted.
    #[error("failed to render {}: {message}", path.display())]
    Render { path: PathBuf, message: String },
}

impl AnalysisError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        AnalysisError::Configuration(msg.into())
    }

    pub fn contract(msg: impl Into<String>) -> Self {
        AnalysisError::Contract(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, AnalysisError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abstract_method_message_names_everything() {
        let err = AnalysisError::AbstractMethod {
            class: "BareAnalyzer".to_string(),
            group: "all".to_string(),
            column: "bpppc".to_string(),
            mode: "histogram".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("BareAnalyzer"));
        assert!(msg.contains("\"all\""));
        assert!(msg.contains("\"bpppc\""));
        assert!(msg.contains("\"histogram\""));
    }

    #[test]
    fn test_converts_into_anyhow() {
        fn fails() -> anyhow::Result<()> {
            Err(AnalysisError::configuration("bad mode"))?;
            Ok(())
        }
        let err = fails().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AnalysisError>(),
            Some(AnalysisError::Configuration(_))
        ));
    }
}
