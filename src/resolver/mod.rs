//! Media resolution
//!
//! Turns a public video page URL plus a quality label into a direct,
//! fetchable media URI. The resolver itself is an external collaborator
//! behind [`MediaResolver`]; this module owns the selection policy:
//!
//! 1. the requested label, if the source offers it
//! 2. otherwise the `best` variant
//! 3. otherwise [`ResolutionError::NoPlayableVariant`]
//!
//! Nothing is cached between calls.

pub mod error;
pub mod streamlink;

use std::collections::BTreeMap;

use async_trait::async_trait;

pub use error::ResolutionError;
pub use streamlink::StreamlinkResolver;

/// Label of the fallback variant
pub const BEST_QUALITY: &str = "best";

/// Available variants of one source: quality label to direct media URI
pub type VariantMap = BTreeMap<String, String>;

/// A source URL resolved to a playable media URI
///
/// Immutable once produced; dropped after the item has been relayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedItem {
    /// Page URL the user queued
    pub source_url: String,
    /// Direct media URI handed to the decode process
    pub media_uri: String,
    /// Quality the user asked for
    pub quality: String,
    /// Variant label actually selected
    pub variant: String,
}

/// Source of quality variants for a video page URL
#[async_trait]
pub trait MediaResolver: Send + Sync {
    /// Query the available variants of `source_url`
    ///
    /// Returns an empty map or [`ResolutionError::NoStreamsFound`] when the
    /// source has nothing playable.
    async fn variants(&self, source_url: &str) -> Result<VariantMap, ResolutionError>;

    /// Resolve `source_url` at `quality` using the two-tier policy
    async fn resolve(
        &self,
        source_url: &str,
        quality: &str,
    ) -> Result<ResolvedItem, ResolutionError> {
        let variants = self.variants(source_url).await?;
        let (variant, media_uri) = select_variant(&variants, quality)?;

        Ok(ResolvedItem {
            source_url: source_url.to_string(),
            media_uri: media_uri.to_string(),
            quality: quality.to_string(),
            variant: variant.to_string(),
        })
    }
}

/// Pick a variant: exact label, else `best`, else fail
pub fn select_variant<'a>(
    variants: &'a VariantMap,
    quality: &str,
) -> Result<(&'a str, &'a str), ResolutionError> {
    if variants.is_empty() {
        return Err(ResolutionError::NoStreamsFound);
    }

    variants
        .get_key_value(quality)
        .or_else(|| variants.get_key_value(BEST_QUALITY))
        .map(|(label, uri)| (label.as_str(), uri.as_str()))
        .ok_or_else(|| ResolutionError::NoPlayableVariant {
            requested: quality.to_string(),
            available: variants.keys().cloned().collect(),
        })
}
