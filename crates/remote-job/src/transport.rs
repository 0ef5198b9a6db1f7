//! Owned, split ZMQ sockets.
//!
//! `tmq`'s ROUTER/DEALER sockets implement both `Stream` and `Sink`, but a
//! trait object can only name one of those at a time, so every endpoint is
//! split into a boxed send half and a boxed receive half right after it's
//! created -- the same shape the rest of this codebase's ZMQ listener code
//! uses for its bound sockets.

use std::pin::Pin;

use futures::{Sink, SinkExt, Stream, StreamExt};
use hooteproto::socket_config::{DealerSocket, Multipart, RouterSocket};
use tmq::TmqError;
use tokio::sync::Mutex;

type BoxedSink = Pin<Box<dyn Sink<Multipart, Error = TmqError> + Send>>;
type BoxedStream = Pin<Box<dyn Stream<Item = Result<Multipart, TmqError>> + Send>>;

/// A bound ROUTER endpoint, split into independently lockable halves.
///
/// Each endpoint in this process has exactly one owner, but that owner
/// still needs `&self` (not `&mut self`) access from async methods, so the
/// halves sit behind a `Mutex` each rather than requiring unique borrows.
pub struct RouterEndpoint {
    tx: Mutex<BoxedSink>,
    rx: Mutex<BoxedStream>,
}

impl RouterEndpoint {
    pub fn new<S: RouterSocket + 'static>(socket: S) -> Self {
        let (tx, rx) = socket.split();
        Self {
            tx: Mutex::new(Box::pin(tx)),
            rx: Mutex::new(Box::pin(rx)),
        }
    }

    pub async fn recv(&self) -> Option<Result<Multipart, TmqError>> {
        self.rx.lock().await.next().await
    }

    pub async fn send(&self, message: Multipart) -> Result<(), TmqError> {
        self.tx.lock().await.send(message).await
    }
}

/// A connected DEALER endpoint, split the same way.
pub struct DealerEndpoint {
    tx: Mutex<BoxedSink>,
    rx: Mutex<BoxedStream>,
}

impl DealerEndpoint {
    pub fn new<S: DealerSocket + 'static>(socket: S) -> Self {
        let (tx, rx) = socket.split();
        Self {
            tx: Mutex::new(Box::pin(tx)),
            rx: Mutex::new(Box::pin(rx)),
        }
    }

    pub async fn recv(&self) -> Option<Result<Multipart, TmqError>> {
        self.rx.lock().await.next().await
    }

    pub async fn send(&self, message: Multipart) -> Result<(), TmqError> {
        self.tx.lock().await.send(message).await
    }
}
