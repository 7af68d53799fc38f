use thiserror::Error;

/// Result type alias using [`FaultlineError`].
pub type Result<T> = std::result::Result<T, FaultlineError>;

#[derive(Error, Debug)]
pub enum FaultlineError {
    #[error("Input error: {0}")]
    Input(String),

    #[error("Mesher error: {0}")]
    Mesher(String),

    #[error("Mesh error: {0}")]
    Mesh(String),

    #[error("Material error: {0}")]
    Material(String),

    #[error("Solver error: {0}")]
    Solver(String),

    /// Zero-area elements, singular Jacobians and collapsed segments. Callers
    /// skip the offending item and continue.
    #[error("Degenerate geometry: {0}")]
    Degenerate(String),

    #[error("Post Processor error: {0}")]
    PostProcessor(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FaultlineError {
    pub fn is_degenerate(&self) -> bool {
        matches!(self, FaultlineError::Degenerate(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_stage() {
        let err = FaultlineError::Mesher("no ear found".to_owned());
        assert_eq!(err.to_string(), "Mesher error: no ear found");
        assert!(FaultlineError::Degenerate("det=0".to_owned()).is_degenerate());
        assert!(!err.is_degenerate());
    }
}
