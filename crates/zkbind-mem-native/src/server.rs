use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hasher};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::ThreadId;

use once_cell::sync::OnceCell;
use tokio::sync::{mpsc, oneshot};
use zkbind_native_core::{
    env_u32_nonzero, Completion, InitParams, NativeLibrary, NativeResult, NativeSession, Request,
    WatchSpec, WatchedEvent, Watcher, CLIENT_PASSWD_LEN, ZAUTHFAILED, ZBADARGUMENTS, ZCLOSING,
    ZNONODE, ZOK, ZOO_AUTH_FAILED_STATE, ZOO_CONNECTED_STATE, ZOO_EXPIRED_SESSION_STATE,
    ZOO_SEQUENCE, ZOO_SESSION_EVENT, ZSESSIONEXPIRED,
};

use crate::hosts::{parse_hosts, HostList};
use crate::session::{MemSession, SessionShared};
use crate::tree::{validate_path, Change, DataTree};
use crate::watches::{WatchEntry, WatchKind, WatchManager, WatchTarget};

const FIRST_SESSION_ID: i64 = 0x0100_0000_0000_0000;

#[derive(Debug, Clone, Copy)]
pub struct MemNativeConfig {
    pub tick_time_ms: u32,
}

impl MemNativeConfig {
    pub fn from_env() -> MemNativeConfig {
        MemNativeConfig {
            tick_time_ms: env_u32_nonzero("ZKMEM_TICK_TIME_MS", 2_000),
        }
    }

    fn negotiate_timeout(&self, requested: i32) -> i32 {
        let tick = self.tick_time_ms.min(i32::MAX as u32 / 20) as i32;
        requested.clamp(2 * tick, 20 * tick)
    }
}

impl Default for MemNativeConfig {
    fn default() -> Self {
        MemNativeConfig { tick_time_ms: 2_000 }
    }
}

pub(crate) enum Job {
    Submit {
        session: Arc<SessionShared>,
        request: Request,
        completion: Box<dyn Completion>,
    },
    Execute {
        session: Arc<SessionShared>,
        request: Request,
        reply: oneshot::Sender<(i32, NativeResult)>,
    },
    Notify {
        watcher: Arc<dyn Watcher>,
        event: WatchedEvent,
    },
    Close {
        session: Arc<SessionShared>,
        reply: Option<oneshot::Sender<i32>>,
    },
    Expire {
        session_id: i64,
    },
    Barrier {
        reply: oneshot::Sender<()>,
    },
}

struct SessionRecord {
    session: Arc<SessionShared>,
    auths: Vec<(String, Vec<u8>)>,
}

struct EnsembleState {
    tree: DataTree,
    watches: WatchManager,
    sessions: HashMap<i64, SessionRecord>,
    next_session: i64,
}

type Fired = Vec<(WatchTarget, WatchedEvent)>;

struct Outcome {
    rc: i32,
    result: NativeResult,
    fired: Fired,
    unused_watch: Option<WatchSpec>,
    session_event: Option<WatchedEvent>,
}

impl Outcome {
    fn new(rc: i32, result: NativeResult) -> Outcome {
        Outcome {
            rc,
            result,
            fired: Vec::new(),
            unused_watch: None,
            session_event: None,
        }
    }
}

impl EnsembleState {
    fn register_watch(
        &mut self,
        kind: WatchKind,
        session: &SessionShared,
        server_path: &str,
        client_path: &str,
        watch: WatchSpec,
    ) {
        let target = match watch {
            WatchSpec::None => return,
            WatchSpec::Default => WatchTarget::Default(session.watcher.clone()),
            WatchSpec::OneShot(w) => WatchTarget::OneShot(w),
        };
        self.watches.add(
            kind,
            server_path,
            WatchEntry {
                session_id: session.id,
                client_path: client_path.to_string(),
                target,
            },
        );
    }

    /// Registers `watch` when `rc` allows it, hands it back otherwise.
    fn watch_if(
        &mut self,
        ok: bool,
        kind: WatchKind,
        session: &SessionShared,
        server_path: &str,
        client_path: &str,
        watch: WatchSpec,
    ) -> Option<WatchSpec> {
        if !ok {
            return Some(watch);
        }
        self.register_watch(kind, session, server_path, client_path, watch);
        None
    }

    fn detach_session(&mut self, session_id: i64) -> (Fired, Vec<WatchEntry>) {
        let mut changes: Vec<Change> = Vec::new();
        self.tree.purge_ephemerals(session_id, &mut changes);
        let dropped = self.watches.remove_session(session_id);
        let fired = self.watches.trigger(&changes);
        (fired, dropped)
    }

    fn apply(&mut self, session: &SessionShared, request: Request) -> Outcome {
        let hosts: &HostList = &session.hosts;
        let auths = self
            .sessions
            .get(&session.id)
            .map(|r| r.auths.clone())
            .unwrap_or_default();
        let mut changes: Vec<Change> = Vec::new();

        let mut out = match request {
            Request::Create {
                path,
                data,
                acl,
                flags,
            } => {
                let full = hosts.prepend_create(&path, flags & ZOO_SEQUENCE != 0);
                match self.tree.create(
                    &full,
                    data.unwrap_or_default(),
                    &acl,
                    flags,
                    session.id,
                    &auths,
                    &mut changes,
                ) {
                    Ok(created) => {
                        Outcome::new(ZOK, NativeResult::String(Some(hosts.strip(&created))))
                    }
                    Err(rc) => Outcome::new(rc, NativeResult::String(None)),
                }
            }
            Request::Delete { path, version } => {
                let full = hosts.prepend(&path);
                let rc = match self.tree.delete(&full, version, &auths, &mut changes) {
                    Ok(()) => ZOK,
                    Err(rc) => rc,
                };
                Outcome::new(rc, NativeResult::Void)
            }
            Request::Exists { path, watch } => {
                let full = hosts.prepend(&path);
                let (rc, stat) = match self.tree.exists(&full) {
                    Ok(stat) => (ZOK, Some(stat)),
                    Err(rc) => (rc, None),
                };
                let mut out = Outcome::new(rc, NativeResult::Stat(stat));
                out.unused_watch = self.watch_if(
                    rc == ZOK || rc == ZNONODE,
                    WatchKind::Data,
                    session,
                    &full,
                    &path,
                    watch,
                );
                out
            }
            Request::Get { path, watch } => {
                let full = hosts.prepend(&path);
                let mut out = match self.tree.get(&full, &auths) {
                    Ok((data, stat)) => Outcome::new(ZOK, NativeResult::Data(Some(data), Some(stat))),
                    Err(rc) => Outcome::new(rc, NativeResult::Data(None, None)),
                };
                out.unused_watch =
                    self.watch_if(out.rc == ZOK, WatchKind::Data, session, &full, &path, watch);
                out
            }
            Request::Set {
                path,
                data,
                version,
            } => {
                let full = hosts.prepend(&path);
                match self.tree.set(
                    &full,
                    data.unwrap_or_default(),
                    version,
                    &auths,
                    &mut changes,
                ) {
                    Ok(stat) => Outcome::new(ZOK, NativeResult::Stat(Some(stat))),
                    Err(rc) => Outcome::new(rc, NativeResult::Stat(None)),
                }
            }
            Request::GetChildren { path, watch } => {
                let full = hosts.prepend(&path);
                let mut out = match self.tree.children(&full, &auths) {
                    Ok((names, _)) => Outcome::new(ZOK, NativeResult::Children(Some(names))),
                    Err(rc) => Outcome::new(rc, NativeResult::Children(None)),
                };
                out.unused_watch =
                    self.watch_if(out.rc == ZOK, WatchKind::Child, session, &full, &path, watch);
                out
            }
            Request::GetChildren2 { path, watch } => {
                let full = hosts.prepend(&path);
                let mut out = match self.tree.children(&full, &auths) {
                    Ok((names, stat)) => {
                        Outcome::new(ZOK, NativeResult::ChildrenStat(Some(names), Some(stat)))
                    }
                    Err(rc) => Outcome::new(rc, NativeResult::ChildrenStat(None, None)),
                };
                out.unused_watch =
                    self.watch_if(out.rc == ZOK, WatchKind::Child, session, &full, &path, watch);
                out
            }
            Request::Sync { path } => match validate_path(&path, false) {
                Ok(()) => Outcome::new(ZOK, NativeResult::String(Some(path))),
                Err(rc) => Outcome::new(rc, NativeResult::String(None)),
            },
            Request::GetAcl { path } => {
                let full = hosts.prepend(&path);
                match self.tree.get_acl(&full) {
                    Ok((acl, stat)) => Outcome::new(ZOK, NativeResult::Acl(Some(acl), Some(stat))),
                    Err(rc) => Outcome::new(rc, NativeResult::Acl(None, None)),
                }
            }
            Request::SetAcl { path, version, acl } => {
                let full = hosts.prepend(&path);
                let rc = match self.tree.set_acl(&full, version, &acl, &auths) {
                    Ok(_) => ZOK,
                    Err(rc) => rc,
                };
                Outcome::new(rc, NativeResult::Void)
            }
            Request::AddAuth { scheme, cert } => {
                let valid = scheme == "digest" && cert.contains(&b':');
                if valid {
                    if let Some(record) = self.sessions.get_mut(&session.id) {
                        if !record.auths.iter().any(|(s, c)| s == &scheme && c == &cert) {
                            record.auths.push((scheme, cert));
                        }
                    }
                    Outcome::new(ZOK, NativeResult::Void)
                } else {
                    session
                        .state
                        .store(ZOO_AUTH_FAILED_STATE, Ordering::Release);
                    let mut out = Outcome::new(ZAUTHFAILED, NativeResult::Void);
                    out.session_event = Some(WatchedEvent {
                        event_type: ZOO_SESSION_EVENT,
                        state: ZOO_AUTH_FAILED_STATE,
                        path: String::new(),
                    });
                    out
                }
            }
        };

        out.fired = self.watches.trigger(&changes);
        out
    }
}

pub(crate) struct Shared {
    state: Mutex<EnsembleState>,
    notices: Mutex<Vec<(Arc<dyn Watcher>, WatchedEvent)>>,
    event_thread: OnceCell<ThreadId>,
    deterministic: AtomicBool,
    config: MemNativeConfig,
    hasher: RandomState,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, EnsembleState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn notices(&self) -> MutexGuard<'_, Vec<(Arc<dyn Watcher>, WatchedEvent)>> {
        self.notices.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn on_event_thread(&self) -> bool {
        self.event_thread
            .get()
            .is_some_and(|id| *id == std::thread::current().id())
    }

    fn passwd_for(&self, session_id: i64) -> Vec<u8> {
        let mut out = Vec::with_capacity(CLIENT_PASSWD_LEN);
        let mut salt = 0u64;
        while out.len() < CLIENT_PASSWD_LEN {
            let mut h = self.hasher.build_hasher();
            h.write_i64(session_id);
            h.write_u64(salt);
            out.extend_from_slice(&h.finish().to_le_bytes());
            salt += 1;
        }
        out.truncate(CLIENT_PASSWD_LEN);
        out
    }

    fn process(&self, session: &SessionShared, request: Request) -> (i32, NativeResult) {
        let shape = request.shape();
        if session.is_closed() {
            return (ZCLOSING, NativeResult::empty(shape));
        }
        if session.state() < 0 {
            return (ZSESSIONEXPIRED, NativeResult::empty(shape));
        }
        let op = request.name();
        let outcome = self.state().apply(session, request);
        drop(outcome.unused_watch);
        for (target, event) in outcome.fired {
            target.deliver(event);
        }
        tracing::trace!(session_id = session.id, op, rc = outcome.rc, "request done");
        if let Some(event) = outcome.session_event {
            // delivered after the reply of the request that caused it
            self.notices().push((session.watcher.clone(), event));
        }
        (outcome.rc, outcome.result)
    }

    pub(crate) fn close_session(&self, session: &SessionShared) -> i32 {
        let (fired, dropped) = {
            let mut st = self.state();
            st.sessions.remove(&session.id);
            st.detach_session(session.id)
        };
        session.state.store(0, Ordering::Release);
        drop(dropped);
        for (target, event) in fired {
            target.deliver(event);
        }
        tracing::debug!(session_id = session.id, "session closed");
        ZOK
    }

    fn expire_session(&self, session_id: i64) {
        let (record, fired, dropped) = {
            let mut st = self.state();
            let Some(record) = st.sessions.remove(&session_id) else {
                return;
            };
            let (fired, dropped) = st.detach_session(session_id);
            (record, fired, dropped)
        };
        record
            .session
            .state
            .store(ZOO_EXPIRED_SESSION_STATE, Ordering::Release);
        drop(dropped);
        for (target, event) in fired {
            target.deliver(event);
        }
        tracing::debug!(session_id, "session expired");
        record.session.watcher.process(WatchedEvent {
            event_type: ZOO_SESSION_EVENT,
            state: ZOO_EXPIRED_SESSION_STATE,
            path: String::new(),
        });
    }

    fn run(&self, job: Job) {
        match job {
            Job::Submit {
                session,
                request,
                completion,
            } => {
                let (rc, result) = self.process(&session, request);
                completion.complete(rc, result);
            }
            Job::Execute {
                session,
                request,
                reply,
            } => {
                let out = self.process(&session, request);
                let _ = reply.send(out);
            }
            Job::Notify { watcher, event } => watcher.process(event),
            Job::Close { session, reply } => {
                let rc = self.close_session(&session);
                if let Some(reply) = reply {
                    let _ = reply.send(rc);
                }
            }
            Job::Expire { session_id } => self.expire_session(session_id),
            Job::Barrier { reply } => {
                let _ = reply.send(());
            }
        }
        let notices: Vec<_> = self.notices().drain(..).collect();
        for (watcher, event) in notices {
            watcher.process(event);
        }
    }
}

/// In-process coordination service behind the native boundary. All
/// completions and watch events are delivered on one dedicated event thread.
pub struct MemNative {
    shared: Arc<Shared>,
    tx: mpsc::UnboundedSender<Job>,
}

impl MemNative {
    pub fn new() -> std::io::Result<MemNative> {
        MemNative::with_config(MemNativeConfig::from_env())
    }

    pub fn with_config(config: MemNativeConfig) -> std::io::Result<MemNative> {
        let shared = Arc::new(Shared {
            state: Mutex::new(EnsembleState {
                tree: DataTree::new(),
                watches: WatchManager::default(),
                sessions: HashMap::new(),
                next_session: FIRST_SESSION_ID,
            }),
            notices: Mutex::new(Vec::new()),
            event_thread: OnceCell::new(),
            deterministic: AtomicBool::new(false),
            config,
            hasher: RandomState::new(),
        });
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        let rt = tokio::runtime::Builder::new_current_thread().build()?;
        let thread_shared = shared.clone();
        std::thread::Builder::new()
            .name("zkmem-event".to_string())
            .spawn(move || {
                let _ = thread_shared
                    .event_thread
                    .set(std::thread::current().id());
                rt.block_on(async move {
                    while let Some(job) = rx.recv().await {
                        thread_shared.run(job);
                    }
                });
                tracing::debug!("event thread stopped");
            })?;

        Ok(MemNative { shared, tx })
    }

    /// Expires a session the way a server would after missing heartbeats.
    pub fn expire_session(&self, session_id: i64) {
        let _ = self.tx.send(Job::Expire { session_id });
    }

    /// Blocks until every job queued before this call has been handled.
    pub fn flush(&self) {
        if self.shared.on_event_thread() {
            return;
        }
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Job::Barrier { reply }).is_ok() {
            let _ = rx.blocking_recv();
        }
    }

    pub fn node_count(&self) -> usize {
        self.shared.state().tree.len()
    }

    pub fn watch_count(&self) -> usize {
        self.shared.state().watches.count()
    }

    pub fn live_sessions(&self) -> usize {
        self.shared.state().sessions.len()
    }
}

impl NativeLibrary for MemNative {
    fn init(
        &self,
        params: InitParams,
        watcher: Arc<dyn Watcher>,
    ) -> Result<Arc<dyn NativeSession>, i32> {
        let hosts = parse_hosts(&params.hosts)?;
        if params.recv_timeout < 0 {
            return Err(ZBADARGUMENTS);
        }
        let recv_timeout = self.shared.config.negotiate_timeout(params.recv_timeout);

        let mut st = self.shared.state();
        let resume = params.client_id.filter(|c| c.session_id != 0);
        let (id, passwd, state) = match resume {
            Some(cid) => {
                let live = st
                    .sessions
                    .get(&cid.session_id)
                    .is_some_and(|r| r.session.passwd == cid.passwd);
                let state = if live {
                    ZOO_CONNECTED_STATE
                } else {
                    ZOO_EXPIRED_SESSION_STATE
                };
                (cid.session_id, cid.passwd, state)
            }
            None => {
                let id = st.next_session;
                st.next_session += 1;
                (id, self.shared.passwd_for(id), ZOO_CONNECTED_STATE)
            }
        };

        let deterministic = self.shared.deterministic.load(Ordering::Acquire);
        let host = hosts.pick(deterministic, id);
        let inner = Arc::new(SessionShared {
            id,
            passwd,
            hosts,
            host,
            recv_timeout,
            state: AtomicI32::new(state),
            closed: AtomicBool::new(false),
            context: AtomicU64::new(0),
            watcher: watcher.clone(),
        });

        if state == ZOO_CONNECTED_STATE {
            let auths = st
                .sessions
                .remove(&id)
                .map(|r| r.auths)
                .unwrap_or_default();
            st.sessions.insert(
                id,
                SessionRecord {
                    session: inner.clone(),
                    auths,
                },
            );
        }
        drop(st);

        tracing::debug!(session_id = id, ?host, recv_timeout, state, "session opened");
        let _ = self.tx.send(Job::Notify {
            watcher,
            event: WatchedEvent {
                event_type: ZOO_SESSION_EVENT,
                state,
                path: String::new(),
            },
        });

        Ok(Arc::new(MemSession {
            inner,
            shared: self.shared.clone(),
            tx: self.tx.clone(),
        }))
    }

    fn set_deterministic_conn_order(&self, yes: bool) {
        self.shared.deterministic.store(yes, Ordering::Release);
    }
}
