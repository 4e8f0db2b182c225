use thiserror::Error;

/// Parcel-level decode failures.
///
/// Both variants are fatal for the parcel being decoded: no partial message
/// delivery occurs. Message-level failures inside an otherwise valid parcel
/// are handled at the dispatch layer instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParcelParseError {
    /// The top-level object has no usable `message_id` field.
    #[error("inbound parcel is missing the `message_id` envelope field")]
    MissingEnvelopeId,

    /// Syntactically malformed JSON, a non-object top level, or a top-level
    /// key that is not a `t<N>` message type key.
    #[error("invalid parcel format: {detail}")]
    InvalidFormat { detail: String },
}

impl ParcelParseError {
    pub fn invalid_format(detail: impl Into<String>) -> Self {
        ParcelParseError::InvalidFormat {
            detail: detail.into(),
        }
    }
}
