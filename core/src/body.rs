//! Request bodies and their transmission strategy.
//!
//! # Design
//! Callers build a [`RequestBody`] explicitly, so there is no guessing about
//! whether a value "looks like" a stream. At dispatch the body is classified
//! once into a [`Payload`]: text and bytes go out verbatim, a stream is piped
//! into the request, and any structured value is serialized to JSON.

use std::{fmt, io, pin::Pin};

use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::Error;

/// A live byte source piped into the outgoing request.
pub type BodyStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + Sync>>;

/// Body of an outgoing request.
pub enum RequestBody {
    Text(String),
    Bytes(Bytes),
    Stream(BodyStream),
    /// Serialized to JSON at dispatch. `Value::Null` means "no body".
    Json(serde_json::Value),
}

impl RequestBody {
    /// Wrap any byte stream. Errors it yields abort the upload.
    pub fn stream<S, B, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<B, E>> + Send + Sync + 'static,
        B: Into<Bytes>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        RequestBody::Stream(Box::pin(
            stream
                .map_ok(|chunk| -> Bytes { chunk.into() })
                .map_err(|err| io::Error::new(io::ErrorKind::Other, err)),
        ))
    }

    /// Structured body from any serializable value.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(value).map(RequestBody::Json)
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        RequestBody::Text(text)
    }
}

impl From<&str> for RequestBody {
    fn from(text: &str) -> Self {
        RequestBody::Text(text.to_string())
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        RequestBody::Bytes(bytes)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(bytes: Vec<u8>) -> Self {
        RequestBody::Bytes(Bytes::from(bytes))
    }
}

/// A JSON string is a text body; every other value is structured.
impl From<serde_json::Value> for RequestBody {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(text) => RequestBody::Text(text),
            other => RequestBody::Json(other),
        }
    }
}

impl<'de> Deserialize<'de> for RequestBody {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(RequestBody::from)
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Text(text) => f.debug_tuple("Text").field(text).finish(),
            RequestBody::Bytes(bytes) => f.debug_tuple("Bytes").field(bytes).finish(),
            RequestBody::Stream(_) => f.write_str("Stream(..)"),
            RequestBody::Json(value) => f.debug_tuple("Json").field(value).finish(),
        }
    }
}

/// Transmission strategy chosen at dispatch.
pub(crate) enum Payload {
    Empty,
    Verbatim(Bytes),
    Stream(BodyStream),
}

impl Payload {
    pub(crate) fn classify(body: Option<RequestBody>) -> Result<Self, Error> {
        let payload = match body {
            None | Some(RequestBody::Json(serde_json::Value::Null)) => Payload::Empty,
            Some(RequestBody::Text(text)) => Payload::Verbatim(Bytes::from(text)),
            Some(RequestBody::Bytes(bytes)) => Payload::Verbatim(bytes),
            Some(RequestBody::Stream(stream)) => Payload::Stream(stream),
            Some(RequestBody::Json(value)) => {
                let encoded = serde_json::to_vec(&value).map_err(|err| {
                    Error::precondition(format!("body is not serializable: {err}"))
                })?;
                Payload::Verbatim(Bytes::from(encoded))
            }
        };
        Ok(payload)
    }

    pub(crate) fn describe(&self) -> &'static str {
        match self {
            Payload::Empty => "no body",
            Payload::Verbatim(_) => "simple body",
            Payload::Stream(_) => "stream body",
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    fn verbatim(payload: Payload) -> Bytes {
        match payload {
            Payload::Verbatim(bytes) => bytes,
            other => panic!("expected verbatim payload, got {}", other.describe()),
        }
    }

    #[test]
    fn text_is_sent_verbatim() {
        let payload = Payload::classify(Some("test data".into())).unwrap();
        assert_eq!(verbatim(payload), "test data");
    }

    #[test]
    fn bytes_are_sent_verbatim() {
        let payload = Payload::classify(Some(b"test data".to_vec().into())).unwrap();
        assert_eq!(verbatim(payload), "test data");
    }

    #[test]
    fn structured_values_are_serialized() {
        let body = RequestBody::json(&serde_json::json!({ "test": "data" })).unwrap();
        let payload = Payload::classify(Some(body)).unwrap();
        assert_eq!(verbatim(payload), r#"{"test":"data"}"#);
    }

    #[test]
    fn json_null_and_absent_mean_no_body() {
        assert!(matches!(Payload::classify(None).unwrap(), Payload::Empty));
        let null = RequestBody::Json(serde_json::Value::Null);
        assert!(matches!(Payload::classify(Some(null)).unwrap(), Payload::Empty));
    }

    #[test]
    fn deserialized_string_is_text_and_object_is_json() {
        let text: RequestBody = serde_json::from_str(r#""test data""#).unwrap();
        assert!(matches!(text, RequestBody::Text(ref t) if t == "test data"));

        let object: RequestBody = serde_json::from_str(r#"{"test":"data"}"#).unwrap();
        assert!(matches!(object, RequestBody::Json(_)));
    }

    #[test]
    fn numbers_are_structured() {
        let body = RequestBody::from(serde_json::json!(42));
        assert_eq!(verbatim(Payload::classify(Some(body)).unwrap()), "42");
    }

    #[tokio::test]
    async fn stream_body_is_piped_unchanged() {
        let parts = ["te", "st", " ", "da", "ta"].map(|p| Ok::<_, io::Error>(p.as_bytes().to_vec()));
        let body = RequestBody::stream(futures::stream::iter(parts));
        let Payload::Stream(stream) = Payload::classify(Some(body)).unwrap() else {
            panic!("expected stream payload");
        };
        let chunks: Vec<Bytes> = stream.map(Result::unwrap).collect().await;
        assert_eq!(chunks.concat(), b"test data");
    }
}
