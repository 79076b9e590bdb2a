//! The request lifecycle: dispatch, race, deliver.
//!
//! # Design
//! `dispatch` does all validation synchronously, then spawns one task per
//! request. The task owns the transport future, both timers and the body
//! aggregator, and waits on them in a single biased `select!`:
//!
//! 1. caller abort
//! 2. overall deadline
//! 3. idle timer (reset by every upload chunk, the response head and every
//!    response chunk)
//! 4. the exchange itself (send, read head, stream or buffer the body)
//!
//! Whichever branch wins, every other future is dropped with the `select!`
//! and the outcome goes through the [`Delivery`] gate. Response metadata is
//! kept in a slot outside the exchange so failures that happen after the
//! head arrived (bad JSON, a broken body stream) still carry it.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, OnceLock,
    },
    time::Duration,
};

use bytes::Bytes;
use log::debug;
use tokio::runtime::Handle;

use crate::{
    body::Payload,
    concat::Concat,
    delivery::{Delivery, RequestHandle},
    error::{Error, Failure, TimeoutKind},
    options::{Agent, RequestOptions},
    response::{decode, Completion, Reply, ResponseBody, ResponseMetadata, ResponseStream},
    target::Target,
    timer::IdleTimer,
    transport,
};

/// Request manager.
///
/// Holds the default connection pool, the runtime requests are spawned on,
/// and the correlation id sequence. Cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct Client {
    agent: Agent,
    runtime: Option<Handle>,
    prefix: String,
    counter: AtomicU64,
}

impl Client {
    /// A client with a default agent that does not follow redirects.
    /// Requests are spawned on the runtime current at dispatch time.
    pub fn new() -> Result<Self, Error> {
        Ok(Self::with_agent(Agent::new()?))
    }

    /// A client whose default pool is `agent`.
    pub fn with_agent(agent: Agent) -> Self {
        let prefix = uuid::Uuid::new_v4().simple().to_string()[..6].to_string();
        Self {
            agent,
            runtime: None,
            prefix,
            counter: AtomicU64::new(0),
        }
    }

    /// Spawn requests on `runtime` instead of the ambient one, so `dispatch`
    /// can be called from threads outside any runtime.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Issue a request and call `callback` exactly once with its outcome.
    ///
    /// Returns `Err(Error::Precondition)` without doing any I/O when the
    /// options are unusable or no runtime is available; the callback is not
    /// called in that case.
    pub fn dispatch<F>(
        &self,
        mut options: RequestOptions,
        callback: F,
    ) -> Result<RequestHandle, Error>
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        let runtime = match &self.runtime {
            Some(runtime) => runtime.clone(),
            None => Handle::try_current()
                .map_err(|_| Error::precondition("no tokio runtime to run the request on"))?,
        };

        let id: Arc<str> = Arc::from(self.next_id());
        let target = Target::resolve(&id, &options)?;
        let payload = Payload::classify(options.body.take())?;
        debug!(
            "[{id}] {} {} port {} with {}",
            target.method,
            target.url,
            target.port(),
            payload.describe()
        );

        let exchange = Exchange {
            id: Arc::clone(&id),
            target,
            payload,
            agent: options.agent.take(),
            default: self.agent.clone(),
            json: options.json,
            stream: options.stream,
        };
        let (delivery, handle) = Delivery::new(id, callback);
        runtime.spawn(run(exchange, options.timeout_duration(), delivery));
        Ok(handle)
    }

    fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{n}", self.prefix)
    }
}

/// One request's transport half, consumed by [`Exchange::perform`].
struct Exchange {
    id: Arc<str>,
    target: Target,
    payload: Payload,
    agent: Option<Agent>,
    default: Agent,
    json: bool,
    stream: bool,
}

async fn run<F>(exchange: Exchange, timeout: Option<Duration>, mut delivery: Delivery<F>)
where
    F: FnOnce(Completion) + Send + 'static,
{
    let id = Arc::clone(&exchange.id);
    let idle = timeout.map(|idle| Arc::new(IdleTimer::new(idle)));
    let metadata = OnceLock::new();
    let shared = delivery.shared();

    let outcome = {
        let perform = exchange.perform(&metadata, idle.clone());
        tokio::select! {
            biased;
            _ = shared.abort_requested() => Err(Error::aborted()),
            _ = deadline(timeout) => {
                delivery.mark_aborted();
                Err(Error::Timeout { kind: TimeoutKind::Deadline })
            }
            _ = idle_expired(idle.as_deref()) => {
                delivery.mark_aborted();
                Err(Error::Timeout { kind: TimeoutKind::Idle })
            }
            result = perform => result,
        }
    };

    let completion: Completion = outcome.map_err(|error| Failure {
        error,
        response: metadata.into_inner(),
    });
    match &completion {
        Ok(reply) => debug!("[{id}] done: {}", reply.response.status),
        Err(failure) => debug!(
            "[{id}] failed: {} (response {})",
            failure.error,
            if failure.response.is_some() { "seen" } else { "not seen" }
        ),
    }
    delivery.deliver(completion);
}

async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}

async fn idle_expired(idle: Option<&IdleTimer>) {
    match idle {
        Some(idle) => idle.expired().await,
        None => std::future::pending().await,
    }
}

impl Exchange {
    async fn perform(
        self,
        metadata: &OnceLock<ResponseMetadata>,
        idle: Option<Arc<IdleTimer>>,
    ) -> Result<Reply, Error> {
        let touch = |idle: &Option<Arc<IdleTimer>>| {
            if let Some(idle) = idle {
                idle.touch();
            }
        };

        let mut response = transport::open(
            &self.id,
            self.target,
            self.payload,
            self.agent,
            &self.default,
            idle.clone(),
        )
        .await?;
        touch(&idle);

        let head = metadata
            .get_or_init(|| ResponseMetadata::from_response(&response))
            .clone();
        debug!("[{}] response {} {:?}", self.id, head.status, head.version);

        if self.stream {
            return Ok(Reply {
                response: head,
                body: ResponseBody::Stream(ResponseStream::from_reqwest(response)),
            });
        }

        let mut content = None;
        let mut sink = Concat::bytes(|all: Bytes| content = Some(all));
        while let Some(chunk) = response.chunk().await.map_err(Error::from_reqwest)? {
            touch(&idle);
            sink.push(chunk);
        }
        debug!("[{}] body complete in {} chunk(s)", self.id, sink.len());
        sink.complete();

        let body = decode(content.unwrap_or_default(), self.json)?;
        Ok(Reply {
            response: head,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_share_a_prefix_and_count_up() {
        let client = Client::new().unwrap();
        let first = client.next_id();
        let second = client.next_id();
        let (prefix, n) = first.split_once('-').unwrap();
        assert_eq!(prefix.len(), 6);
        assert!(prefix.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(n, "1");
        assert_eq!(second, format!("{prefix}-2"));
    }

    #[test]
    fn dispatch_outside_a_runtime_is_a_precondition() {
        let client = Client::new().unwrap();
        let err = client
            .dispatch(RequestOptions::new("http://localhost/"), |_| {
                panic!("callback must not run")
            })
            .unwrap_err();
        assert!(matches!(err, Error::Precondition(_)));
    }

    #[tokio::test]
    async fn invalid_options_fail_synchronously() {
        let client = Client::new().unwrap();
        let err = client
            .dispatch(RequestOptions::default(), |_| panic!("callback must not run"))
            .unwrap_err();
        assert!(matches!(err, Error::Precondition(_)));
    }

    #[test]
    fn explicit_runtime_allows_dispatch_from_plain_threads() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let client = Client::new().unwrap().with_runtime(runtime.handle().clone());
        let (tx, rx) = std::sync::mpsc::channel();
        // Port 9 (discard) on localhost refuses connections.
        let handle = client
            .dispatch(RequestOptions::new("http://127.0.0.1:9/"), move |completion| {
                tx.send(completion.is_err()).unwrap();
            })
            .unwrap();
        assert!(rx.recv().unwrap());
        assert!(handle.is_finished());
    }
}
