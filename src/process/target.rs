//! Publish destination
//!
//! The stream key is a secret: it is needed to build the outbound URL, but
//! must never reach logs or status responses. Both types here redact it in
//! `Debug` and `Display`; only [`PublishTarget::url`] exposes it.

use std::fmt;

use serde::Deserialize;

/// Destination credential (the stream key)
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    /// Wrap a stream key
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Whether the credential is empty or whitespace
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }

    pub(crate) fn expose(&self) -> &str {
        self.0.trim()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Outbound RTMP endpoint: `rtmp_base + "/" + stream_key`
#[derive(Clone)]
pub struct PublishTarget {
    rtmp_base: String,
    credential: Credential,
}

impl PublishTarget {
    /// Create a target from an ingest base and a credential
    pub fn new(rtmp_base: impl Into<String>, credential: Credential) -> Self {
        Self {
            rtmp_base: rtmp_base.into().trim_end_matches('/').to_string(),
            credential,
        }
    }

    /// Ingest base without the key
    pub fn base(&self) -> &str {
        &self.rtmp_base
    }

    /// The stream key alone, for masking it in tool output
    pub(crate) fn secret(&self) -> &str {
        self.credential.expose()
    }

    /// Full outbound URL, credential included. Pass it to the publish
    /// process only.
    pub fn url(&self) -> String {
        format!("{}/{}", self.rtmp_base, self.credential.expose())
    }
}

impl fmt::Debug for PublishTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublishTarget")
            .field("rtmp_base", &self.rtmp_base)
            .field("credential", &self.credential)
            .finish()
    }
}

impl fmt::Display for PublishTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/[REDACTED]", self.rtmp_base)
    }
}
