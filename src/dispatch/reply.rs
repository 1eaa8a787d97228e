//! Handler results and their normalization into one reply stream.
//!
//! Handlers answer with a [`Reply`], which can be a plain value, nothing, a
//! deferred value, or a stream of values. [`normalize`] turns every shape
//! into a [`ReplyStream`] so the dispatcher only ever consumes one kind of
//! producer. Plain values go through a caller-supplied [`Transform`]; the
//! other shapes are adapted directly.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::stream::{self, BoxStream};
use futures_util::{FutureExt, Stream, StreamExt, TryStreamExt};
use serde_json::Value;

/// Message sent to the peer when a failure carries no description.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal error";

/// Failure raised by a handler, synchronously or from its reply stream.
///
/// The `Display` output is exactly the text sent to the peer in the `error`
/// packet.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    /// Failure with a human-readable description.
    #[error("{0}")]
    Failed(String),

    /// Failure without a description safe to expose.
    #[error("Internal error")]
    Internal,
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::Failed(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::Failed(message.to_string())
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        Self::Failed(err.to_string())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Failed(err.to_string())
    }
}

/// One emission of a reply stream. `Ok(None)` means "no response" and is
/// skipped by the dispatcher.
pub type ReplyItem = Result<Option<Value>, HandlerError>;

/// Uniform asynchronous sequence of reply values.
pub type ReplyStream = BoxStream<'static, ReplyItem>;

/// Fallback applied to plain handler results.
///
/// Receives `Some(value)` for [`Reply::Value`] and `None` for
/// [`Reply::Empty`]. Returning `None` suppresses any response.
pub type Transform = Arc<dyn Fn(Option<Value>) -> Option<ReplyStream> + Send + Sync>;

/// What a handler produced.
pub enum Reply {
    /// A value available right away.
    Value(Value),
    /// The handler has nothing to say.
    Empty,
    /// A single value that resolves later.
    Deferred(BoxFuture<'static, ReplyItem>),
    /// Zero or more values over time.
    Stream(ReplyStream),
}

impl Reply {
    /// Serializes `value` into a plain reply.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::Failed`] if `value` cannot be represented
    /// as JSON.
    pub fn json<T: serde::Serialize>(value: &T) -> Result<Self, HandlerError> {
        Ok(Self::Value(serde_json::to_value(value)?))
    }

    /// Wraps a future resolving to a single value.
    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        Self::Deferred(future.map(|result| result.map(Some)).boxed())
    }

    /// Wraps a stream of values.
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Value, HandlerError>> + Send + 'static,
    {
        Self::Stream(stream.map_ok(Some).boxed())
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<Option<Value>> for Reply {
    fn from(value: Option<Value>) -> Self {
        value.map_or(Self::Empty, Self::Value)
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Empty => f.write_str("Empty"),
            Self::Deferred(_) => f.write_str("Deferred(..)"),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Standard transform: a plain value becomes a one-element stream.
///
/// [`Reply::Empty`] becomes a single "no response" emission, so nothing is
/// written for it.
#[must_use]
pub fn of_value() -> Transform {
    Arc::new(|value: Option<Value>| -> Option<ReplyStream> {
        Some(stream::once(async move { Ok(value) }).boxed())
    })
}

/// Transform for handlers whose plain results carry no response.
#[must_use]
pub fn fire_and_forget() -> Transform {
    Arc::new(|_: Option<Value>| -> Option<ReplyStream> { None })
}

/// Adapts any [`Reply`] into a [`ReplyStream`].
///
/// Returns `None` when the transform declines a plain result.
pub fn normalize(reply: Reply, transform: &Transform) -> Option<ReplyStream> {
    match reply {
        Reply::Stream(stream) => Some(stream),
        Reply::Deferred(future) => Some(stream::once(future).boxed()),
        Reply::Value(value) => transform(Some(value)),
        Reply::Empty => transform(None),
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use serde_json::json;

    use super::*;

    async fn collect(reply: Reply, transform: &Transform) -> Option<Vec<ReplyItem>> {
        Some(normalize(reply, transform)?.collect().await)
    }

    #[tokio::test]
    async fn plain_value_emits_once() {
        let items = collect(Reply::Value(json!(1)), &of_value()).await;
        assert_eq!(items, Some(vec![Ok(Some(json!(1)))]));
    }

    #[tokio::test]
    async fn empty_emits_no_response_marker() {
        let items = collect(Reply::Empty, &of_value()).await;
        assert_eq!(items, Some(vec![Ok(None)]));
    }

    #[tokio::test]
    async fn deferred_resolves_to_one_item() {
        let reply = Reply::deferred(async { Ok(json!({ "done": true })) });
        let items = collect(reply, &of_value()).await;
        assert_eq!(items, Some(vec![Ok(Some(json!({ "done": true })))]));
    }

    #[tokio::test]
    async fn deferred_rejection_is_a_failure() {
        let reply = Reply::deferred(async { Err(HandlerError::from("boom")) });
        let items = collect(reply, &of_value()).await;
        assert_eq!(items, Some(vec![Err(HandlerError::Failed("boom".into()))]));
    }

    #[tokio::test]
    async fn stream_passes_through() {
        let reply = Reply::stream(stream::iter([Ok(json!(1)), Ok(json!(2)), Ok(json!(3))]));
        let items = collect(reply, &fire_and_forget()).await;
        assert_eq!(
            items,
            Some(vec![Ok(Some(json!(1))), Ok(Some(json!(2))), Ok(Some(json!(3)))])
        );
    }

    #[tokio::test]
    async fn fire_and_forget_declines_plain_values() {
        assert!(collect(Reply::Value(json!(1)), &fire_and_forget()).await.is_none());
        assert!(collect(Reply::Empty, &fire_and_forget()).await.is_none());
    }

    #[test]
    fn error_display_is_peer_message() {
        assert_eq!(HandlerError::from("boom").to_string(), "boom");
        assert_eq!(HandlerError::Internal.to_string(), INTERNAL_ERROR_MESSAGE);
        let err = HandlerError::from(anyhow::anyhow!("disk full"));
        assert_eq!(err.to_string(), "disk full");
    }

    #[test]
    fn option_converts_to_reply() {
        assert!(matches!(Reply::from(None), Reply::Empty));
        assert!(matches!(Reply::from(Some(json!(1))), Reply::Value(_)));
    }
}
