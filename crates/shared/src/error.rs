//! Protocol error types.

/// Why an inbound frame could not be turned into a [`crate::ServerEvent`].
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[source] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("frame has no string `type` tag")]
    MissingTag,
    #[error("payload for `{tag}` does not decode: {source}")]
    Payload {
        tag: String,
        #[source]
        source: serde_json::Error,
    },
}
