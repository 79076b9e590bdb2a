//! Response metadata, response bodies, and body decoding.

use std::{
    fmt,
    net::SocketAddr,
    pin::Pin,
    sync::Mutex,
    task::{Context, Poll},
};

use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use http::{HeaderMap, StatusCode, Version};
use url::Url;

use crate::error::{Error, Failure};

/// Everything known about a response once its head has arrived.
#[derive(Debug, Clone)]
pub struct ResponseMetadata {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub version: Version,
    pub url: Url,
    pub remote_addr: Option<SocketAddr>,
}

impl ResponseMetadata {
    pub(crate) fn from_response(response: &reqwest::Response) -> Self {
        Self {
            status: response.status(),
            headers: response.headers().clone(),
            version: response.version(),
            url: response.url().clone(),
            remote_addr: response.remote_addr(),
        }
    }
}

/// What the completion callback receives, exactly once per request.
pub type Completion = Result<Reply, Failure>;

/// A successful exchange.
#[derive(Debug)]
pub struct Reply {
    pub response: ResponseMetadata,
    pub body: ResponseBody,
}

/// Body of a successful exchange.
#[derive(Debug)]
pub enum ResponseBody {
    /// JSON was requested and the response had no body.
    Empty,
    /// The buffered body, byte for byte.
    Bytes(Bytes),
    /// The buffered body decoded as JSON.
    Json(serde_json::Value),
    /// The unbuffered body (streaming mode).
    Stream(ResponseStream),
}

impl ResponseBody {
    /// Buffered bytes, if this body was buffered without JSON decoding.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            ResponseBody::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            ResponseBody::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ResponseBody::Empty => true,
            ResponseBody::Bytes(bytes) => bytes.is_empty(),
            _ => false,
        }
    }

    pub fn into_stream(self) -> Option<ResponseStream> {
        match self {
            ResponseBody::Stream(stream) => Some(stream),
            _ => None,
        }
    }
}

type ChunkStream = Pin<Box<dyn Stream<Item = Result<Bytes, Error>> + Send>>;

/// Raw response body handed out in streaming mode.
///
/// Yields the server's bytes verbatim. The inner stream sits behind a mutex
/// only so the type is `Sync`; polling goes through `Mutex::get_mut` and never
/// locks.
pub struct ResponseStream {
    inner: Mutex<ChunkStream>,
}

impl ResponseStream {
    pub(crate) fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, Error>> + Send + 'static,
    {
        Self {
            inner: Mutex::new(Box::pin(stream)),
        }
    }

    pub(crate) fn from_reqwest(response: reqwest::Response) -> Self {
        Self::new(response.bytes_stream().map_err(Error::from_reqwest))
    }

    /// Drain the stream into one buffer.
    pub async fn collect_bytes(mut self) -> Result<Bytes, Error> {
        let mut chunks = Vec::new();
        while let Some(chunk) = self.next().await {
            chunks.push(chunk?);
        }
        Ok(crate::concat::concat_bytes(chunks))
    }
}

impl Stream for ResponseStream {
    type Item = Result<Bytes, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.get_mut().inner.get_mut() {
            Ok(stream) => stream.as_mut().poll_next(cx),
            Err(poisoned) => poisoned.into_inner().as_mut().poll_next(cx),
        }
    }
}

impl fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseStream").finish_non_exhaustive()
    }
}

/// Turn a buffered aggregate into the final body.
///
/// With `json` set an empty aggregate yields [`ResponseBody::Empty`] (a
/// bodiless redirect is not a parse failure); anything else must parse.
pub(crate) fn decode(content: Bytes, json: bool) -> Result<ResponseBody, Error> {
    if !json {
        return Ok(ResponseBody::Bytes(content));
    }
    if content.is_empty() {
        return Ok(ResponseBody::Empty);
    }
    serde_json::from_slice(&content)
        .map(ResponseBody::Json)
        .map_err(Error::ResponseParse)
}
