//! Typed request/response channels between the background service, the
//! capture agent and the editor.
//!
//! Each channel carries one request kind. A `Client` allows a single request
//! in flight at a time; a second caller waits for the first reply. There are
//! no retries: a closed channel or dropped reply is reported straight back.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};

/// A request plus the slot its reply goes into.
pub struct Envelope<Q, R> {
    pub body: Q,
    reply: oneshot::Sender<R>,
}

impl<Q, R> Envelope<Q, R> {
    /// Answer the request. A caller that stopped waiting is not an error.
    pub fn respond(self, response: R) {
        let _ = self.reply.send(response);
    }

    pub fn into_parts(self) -> (Q, Responder<R>) {
        (self.body, Responder { reply: self.reply })
    }
}

/// Reply half of an envelope, for handlers that answer later.
pub struct Responder<R> {
    reply: oneshot::Sender<R>,
}

impl<R> Responder<R> {
    pub fn respond(self, response: R) {
        let _ = self.reply.send(response);
    }
}

/// Sending side of a channel.
pub struct Client<Q, R> {
    tx: mpsc::Sender<Envelope<Q, R>>,
    in_flight: Arc<Mutex<()>>,
}

impl<Q, R> Clone for Client<Q, R> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            in_flight: self.in_flight.clone(),
        }
    }
}

/// Receiving side of a channel.
pub type Inbox<Q, R> = mpsc::Receiver<Envelope<Q, R>>;

/// Creates a connected client/inbox pair.
pub fn channel<Q, R>() -> (Client<Q, R>, Inbox<Q, R>) {
    let (tx, rx) = mpsc::channel(16);
    (
        Client {
            tx,
            in_flight: Arc::new(Mutex::new(())),
        },
        rx,
    )
}

impl<Q, R> Client<Q, R> {
    /// Send one request and wait for its reply.
    pub async fn call(&self, body: Q) -> Result<R, ChannelError> {
        let _guard = self.in_flight.lock().await;

        let (reply, response) = oneshot::channel();
        self.tx
            .send(Envelope { body, reply })
            .await
            .map_err(|_| ChannelError::NoReceiver)?;

        response.await.map_err(|_| ChannelError::NoResponse)
    }

    /// True once the receiving side has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("No receiver is listening on this channel")]
    NoReceiver,

    #[error("The receiver dropped the request without answering")]
    NoResponse,
}
