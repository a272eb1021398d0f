use std::net::SocketAddr;
use std::sync::Arc;

use crate::request::{NativeResult, Request};
use crate::types::{ClientId, WatchedEvent};

/// Receives the outcome of one submitted request. The native layer calls
/// `complete` at most once; dropping the box without calling it means the
/// request will never be delivered.
pub trait Completion: Send {
    fn complete(self: Box<Self>, rc: i32, result: NativeResult);
}

impl<F> Completion for F
where
    F: FnOnce(i32, NativeResult) + Send,
{
    fn complete(self: Box<Self>, rc: i32, result: NativeResult) {
        (*self)(rc, result)
    }
}

/// Session-wide watcher: connection state changes and default watches.
pub trait Watcher: Send + Sync {
    fn process(&self, event: WatchedEvent);
}

impl<F> Watcher for F
where
    F: Fn(WatchedEvent) + Send + Sync,
{
    fn process(&self, event: WatchedEvent) {
        self(event)
    }
}

pub trait OneShotWatcher: Send {
    fn fire(self: Box<Self>, event: WatchedEvent);
}

impl<F> OneShotWatcher for F
where
    F: FnOnce(WatchedEvent) + Send,
{
    fn fire(self: Box<Self>, event: WatchedEvent) {
        (*self)(event)
    }
}

#[derive(Debug, Clone, Default)]
pub struct InitParams {
    pub hosts: String,
    pub recv_timeout: i32,
    pub client_id: Option<ClientId>,
    pub flags: i32,
}

pub trait NativeSession: Send + Sync {
    /// Queues `request`; the returned code only reports submission.
    fn submit(&self, request: Request, completion: Box<dyn Completion>) -> i32;

    /// Runs `request` and blocks the calling thread until it finishes.
    fn execute(&self, request: Request) -> (i32, NativeResult);

    fn close(&self) -> i32;

    fn client_id(&self) -> ClientId;

    fn recv_timeout(&self) -> i32;

    fn state(&self) -> i32;

    fn connected_host(&self) -> Option<SocketAddr>;

    fn set_context(&self, context: u64);

    fn context(&self) -> u64;
}

pub trait NativeLibrary: Send + Sync {
    fn init(
        &self,
        params: InitParams,
        watcher: Arc<dyn Watcher>,
    ) -> Result<Arc<dyn NativeSession>, i32>;

    fn set_deterministic_conn_order(&self, yes: bool);
}
