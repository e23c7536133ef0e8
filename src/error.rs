//! The engine's error taxonomy.
//!
//! Per-page processing is best-effort: almost nothing here is ever returned
//! to a caller. The only raising condition is a malformed `EngineConfig`
//! discovered at construction.

/// Errors raised while building an [`Engine`](crate::engine::Engine).
///
/// Everything else the engine encounters while processing a page (an
/// undecodable glyph, a backend translation failure, a malformed
/// placeholder, a missing font glyph, an out-of-bounds label lookup) is
/// handled inline with a documented fallback and never reaches this type.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("unsupported translator service '{0}'")]
    UnsupportedTranslator(String),

    #[error("invalid engine config: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
