#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum ScreeningError {
    /// More than one active override exists for the same (issuer, attribute)
    /// pair. Never resolved by precedence guessing.
    #[error(
        "conflicting active overrides for {conflict_count} issuer/attribute pair(s); first: {first_issuer}/{first_attribute}"
    )]
    OverrideConflict {
        conflict_count: usize,
        first_issuer: String,
        first_attribute: String,
    },

    /// One strategy's impact computation failed; siblings keep running and
    /// the failure is recorded per-strategy in diagnostics.
    #[error("impact computation failed for strategy `{strategy}`: {message}")]
    StrategyFailed { strategy: String, message: String },

    #[error("invalid run configuration: {0}")]
    Config(String),
}
