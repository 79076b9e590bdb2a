//! Chunk aggregator.
//!
//! [`Concat`] collects chunks pushed over time and, once told the sequence
//! is over, hands one aggregate to its consumer. Byte mode concatenates into
//! a single contiguous buffer; object mode hands over the chunks unchanged.
//! Chunks are never dropped or reordered.
//!
//! ```
//! use bytes::Bytes;
//! use client_request::concat::Concat;
//!
//! let mut out = None;
//! let mut sink = Concat::bytes(|all: Bytes| out = Some(all));
//! sink.push(Bytes::from_static(b"HELLO "));
//! sink.push(Bytes::from_static(b"THERE"));
//! sink.complete();
//! assert_eq!(out.unwrap(), "HELLO THERE");
//! ```

use std::marker::PhantomData;

use bytes::{Bytes, BytesMut};

/// How chunks are combined into the aggregate.
pub trait Mode {
    type Chunk;
    type Aggregate;

    fn aggregate(chunks: Vec<Self::Chunk>) -> Self::Aggregate;
}

/// Concatenate byte chunks into one buffer.
#[derive(Debug)]
pub enum ByteMode {}

/// Hand the chunks over as an ordered sequence.
#[derive(Debug)]
pub struct ObjectMode<T>(PhantomData<T>);

impl Mode for ByteMode {
    type Chunk = Bytes;
    type Aggregate = Bytes;

    fn aggregate(chunks: Vec<Bytes>) -> Bytes {
        concat_bytes(chunks)
    }
}

impl<T> Mode for ObjectMode<T> {
    type Chunk = T;
    type Aggregate = Vec<T>;

    fn aggregate(chunks: Vec<T>) -> Vec<T> {
        chunks
    }
}

/// Ordered chunk collector with a single consumer.
pub struct Concat<M: Mode, F = fn(<M as Mode>::Aggregate)> {
    chunks: Vec<M::Chunk>,
    consumer: Option<F>,
}

impl<F: FnOnce(Bytes)> Concat<ByteMode, F> {
    pub fn bytes(consumer: F) -> Self {
        Self {
            chunks: Vec::new(),
            consumer: Some(consumer),
        }
    }
}

impl<T, F: FnOnce(Vec<T>)> Concat<ObjectMode<T>, F> {
    pub fn objects(consumer: F) -> Self {
        Self {
            chunks: Vec::new(),
            consumer: Some(consumer),
        }
    }
}

impl<M: Mode> Concat<M> {
    /// An aggregator with nobody listening: chunks are retained and
    /// completion has no side effect.
    pub fn detached() -> Self {
        Self {
            chunks: Vec::new(),
            consumer: None,
        }
    }
}

impl<M: Mode, F: FnOnce(M::Aggregate)> Concat<M, F> {
    pub fn push(&mut self, chunk: M::Chunk) {
        self.chunks.push(chunk);
    }

    /// Number of chunks received so far.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// End of input: build the aggregate and hand it to the consumer.
    pub fn complete(self) {
        if let Some(consumer) = self.consumer {
            consumer(M::aggregate(self.chunks));
        }
    }
}

impl<M: Mode, F> std::fmt::Debug for Concat<M, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Concat")
            .field("chunks", &self.chunks.len())
            .field("consumer", &self.consumer.is_some())
            .finish()
    }
}

/// Join byte chunks, skipping the copy when there is at most one.
pub(crate) fn concat_bytes(chunks: Vec<Bytes>) -> Bytes {
    match chunks.len() {
        0 => Bytes::new(),
        1 => chunks.into_iter().next().unwrap_or_default(),
        _ => {
            let total = chunks.iter().map(Bytes::len).sum();
            let mut buf = BytesMut::with_capacity(total);
            for chunk in chunks {
                buf.extend_from_slice(&chunk);
            }
            buf.freeze()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn bytes_are_concatenated_in_order() {
        let mut out = None;
        let mut sink = Concat::bytes(|all: Bytes| out = Some(all));
        for part in ["te", "st", " ", "da", "ta"] {
            sink.push(Bytes::from_static(part.as_bytes()));
        }
        assert_eq!(sink.len(), 5);
        sink.complete();
        assert_eq!(out.unwrap(), "test data");
    }

    #[test]
    fn zero_chunks_yield_empty_buffer() {
        let mut out = None;
        let sink = Concat::bytes(|all: Bytes| out = Some(all));
        assert!(sink.is_empty());
        sink.complete();
        assert!(out.unwrap().is_empty());
    }

    #[test]
    fn single_chunk_is_passed_through() {
        let chunk = Bytes::from_static(b"HELLO THERE");
        let mut out = None;
        let mut sink = Concat::bytes(|all: Bytes| out = Some(all));
        sink.push(chunk.clone());
        sink.complete();
        assert_eq!(out.unwrap(), chunk);
    }

    #[test]
    fn objects_keep_their_order() {
        let mut out = Vec::new();
        let mut sink = Concat::objects(|all: Vec<serde_json::Value>| out = all);
        sink.push(serde_json::json!({ "n": 1 }));
        sink.push(serde_json::json!("two"));
        sink.push(serde_json::json!(3));
        sink.complete();
        assert_eq!(
            out,
            vec![
                serde_json::json!({ "n": 1 }),
                serde_json::json!("two"),
                serde_json::json!(3)
            ]
        );
    }

    #[test]
    fn consumer_runs_exactly_once() {
        let calls = Cell::new(0);
        let mut sink = Concat::bytes(|_| calls.set(calls.get() + 1));
        sink.push(Bytes::from_static(b"x"));
        sink.complete();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn detached_retains_chunks_without_side_effects() {
        let mut sink = Concat::<ByteMode>::detached();
        sink.push(Bytes::from_static(b"kept"));
        assert_eq!(sink.len(), 1);
        sink.complete();
    }
}
