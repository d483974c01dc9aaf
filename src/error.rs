use thiserror::Error;

// Unified error type for cpr_precond

#[derive(Error, Debug)]
pub enum CprError {
    #[error("unknown update interval: {0}")]
    BadScheduleConfig(String),
    #[error("unsupported weight strategy: {0}")]
    UnsupportedStrategy(String),
    #[error("singular weight system in cell {cell}")]
    WeightSolveFailure { cell: usize },
    #[error("structural nonzero count mismatch: pressure matrix has {expected}, jacobian has {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("factorization error: {0}")]
    FactorError(String),
    #[error("solve error: {0}")]
    SolveError(String),
}
