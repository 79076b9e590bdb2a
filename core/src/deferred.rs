//! Future-based front end over [`Client::dispatch`].

use tokio::sync::oneshot;

use crate::{
    delivery::RequestHandle,
    error::Error,
    lifecycle::Client,
    options::RequestOptions,
    response::{Completion, Reply},
};

impl Client {
    /// Issue a request and wait for its outcome.
    ///
    /// Resolves with the reply for 2xx statuses. Any failure rejects with
    /// its error unchanged; any other status rejects with
    /// [`Error::Status`] carrying the response and body. Dropping the future
    /// before it resolves aborts the request.
    pub async fn request(&self, options: RequestOptions) -> Result<Reply, Error> {
        let (tx, rx) = oneshot::channel();
        let handle = self.dispatch(options, move |completion| {
            let _ = tx.send(completion);
        })?;
        let _guard = AbortOnDrop(handle);
        let completion = rx.await.map_err(|_| Error::aborted())?;
        settle(completion)
    }
}

/// Aborts the request if the waiting future goes away first. After delivery
/// the abort is a no-op.
struct AbortOnDrop(RequestHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn settle(completion: Completion) -> Result<Reply, Error> {
    let reply = completion?;
    if !reply.response.status.is_success() {
        return Err(Error::Status {
            response: Box::new(reply.response),
            body: Box::new(reply.body),
        });
    }
    Ok(reply)
}
