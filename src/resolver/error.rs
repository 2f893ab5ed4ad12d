//! Resolution error types

/// Failure to turn a source URL into a playable media URI
///
/// Always item-level: the relay worker logs it, skips the item and moves on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
    /// The source exposes no variants at all (deleted or private video)
    #[error("no streams found")]
    NoStreamsFound,

    /// Neither the requested quality nor `best` is available
    #[error("no playable variant for quality '{requested}' (available: {})", available.join(", "))]
    NoPlayableVariant {
        requested: String,
        available: Vec<String>,
    },

    /// The resolver tool could not be run or returned garbage
    #[error("resolver unavailable: {0}")]
    ResolverUnavailable(String),
}
