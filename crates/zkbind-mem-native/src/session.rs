use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use zkbind_native_core::{
    ClientId, Completion, NativeResult, NativeSession, Request, Watcher, ZAPIERROR, ZINVALIDSTATE,
    ZOK, ZSYSTEMERROR,
};

use crate::hosts::HostList;
use crate::server::{Job, Shared};

pub(crate) struct SessionShared {
    pub id: i64,
    pub passwd: Vec<u8>,
    pub hosts: HostList,
    pub host: Option<SocketAddr>,
    pub recv_timeout: i32,
    pub state: AtomicI32,
    pub closed: AtomicBool,
    pub context: AtomicU64,
    pub watcher: Arc<dyn Watcher>,
}

impl SessionShared {
    pub(crate) fn state(&self) -> i32 {
        self.state.load(Ordering::Acquire)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

pub struct MemSession {
    pub(crate) inner: Arc<SessionShared>,
    pub(crate) shared: Arc<Shared>,
    pub(crate) tx: mpsc::UnboundedSender<Job>,
}

impl MemSession {
    fn refuse(&self) -> Option<i32> {
        if self.inner.is_closed() || self.inner.state() < 0 {
            return Some(ZINVALIDSTATE);
        }
        None
    }

    pub fn session_id(&self) -> i64 {
        self.inner.id
    }
}

impl NativeSession for MemSession {
    fn submit(&self, request: Request, completion: Box<dyn Completion>) -> i32 {
        if let Some(rc) = self.refuse() {
            return rc;
        }
        let job = Job::Submit {
            session: self.inner.clone(),
            request,
            completion,
        };
        if self.tx.send(job).is_err() {
            tracing::error!(session_id = self.inner.id, "event thread is gone");
            return ZSYSTEMERROR;
        }
        ZOK
    }

    fn execute(&self, request: Request) -> (i32, NativeResult) {
        let shape = request.shape();
        if let Some(rc) = self.refuse() {
            return (rc, NativeResult::empty(shape));
        }
        if self.shared.on_event_thread() {
            tracing::warn!(
                op = request.name(),
                "synchronous call issued from the event thread"
            );
            return (ZAPIERROR, NativeResult::empty(shape));
        }
        let (reply, rx) = oneshot::channel();
        let job = Job::Execute {
            session: self.inner.clone(),
            request,
            reply,
        };
        if self.tx.send(job).is_err() {
            return (ZSYSTEMERROR, NativeResult::empty(shape));
        }
        rx.blocking_recv()
            .unwrap_or((ZSYSTEMERROR, NativeResult::empty(shape)))
    }

    fn close(&self) -> i32 {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return ZOK;
        }
        if self.shared.on_event_thread() {
            return self.shared.close_session(&self.inner);
        }
        let (reply, rx) = oneshot::channel();
        let job = Job::Close {
            session: self.inner.clone(),
            reply: Some(reply),
        };
        if self.tx.send(job).is_err() {
            return ZSYSTEMERROR;
        }
        rx.blocking_recv().unwrap_or(ZSYSTEMERROR)
    }

    fn client_id(&self) -> ClientId {
        ClientId {
            session_id: self.inner.id,
            passwd: self.inner.passwd.clone(),
        }
    }

    fn recv_timeout(&self) -> i32 {
        self.inner.recv_timeout
    }

    fn state(&self) -> i32 {
        self.inner.state()
    }

    fn connected_host(&self) -> Option<SocketAddr> {
        if self.inner.is_closed() {
            return None;
        }
        self.inner.host
    }

    fn set_context(&self, context: u64) {
        self.inner.context.store(context, Ordering::Release);
    }

    fn context(&self) -> u64 {
        self.inner.context.load(Ordering::Acquire)
    }
}
