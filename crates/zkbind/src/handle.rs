use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use once_cell::sync::OnceCell;
use zkbind_native_core::{InitParams, NativeLibrary, NativeSession};

use crate::config::{config, BindConfig};
use crate::error::BindError;
use crate::registry::{RefToken, Registry};
use crate::trampoline::SessionWatcher;
use crate::value::Value;

/// The native library plus the registry every handle opened through it
/// shares.
#[derive(Clone)]
pub struct Bridge {
    registry: Arc<Registry>,
    library: Arc<dyn NativeLibrary>,
}

static GLOBAL: OnceCell<Bridge> = OnceCell::new();

impl Bridge {
    pub fn new(library: Arc<dyn NativeLibrary>, registry: Arc<Registry>) -> Bridge {
        Bridge { registry, library }
    }

    pub fn with_config(library: Arc<dyn NativeLibrary>, config: &BindConfig) -> Bridge {
        library.set_deterministic_conn_order(config.deterministic_conn_order);
        Bridge::new(library, Arc::new(Registry::new(config.registry_capacity)))
    }

    /// Sets up the process-wide bridge and logging from the environment.
    /// Later calls return the first bridge and ignore `library`.
    pub fn install(library: Arc<dyn NativeLibrary>) -> &'static Bridge {
        GLOBAL.get_or_init(|| {
            let config = config();
            crate::logging::install(config);
            tracing::debug!(
                registry_capacity = config.registry_capacity,
                "bridge installed"
            );
            Bridge::with_config(library, config)
        })
    }

    pub fn global() -> Option<&'static Bridge> {
        GLOBAL.get()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn library(&self) -> &Arc<dyn NativeLibrary> {
        &self.library
    }
}

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

struct HandleInner {
    id: u64,
    bridge: Bridge,
    session: RwLock<Option<Arc<dyn NativeSession>>>,
}

/// Clears the user-context word and hands back the token it held.
fn detach_context(session: &dyn NativeSession) -> Option<RefToken> {
    let context = RefToken::from_raw(session.context());
    session.set_context(0);
    context
}

impl HandleInner {
    fn shutdown(&self, session: Arc<dyn NativeSession>, context: Option<RefToken>) -> i32 {
        let rc = session.close();
        let registry = &self.bridge.registry;
        let swept = registry.sweep_watches(self.id);
        if let Some(token) = context {
            if let Err(err) = registry.release(token) {
                tracing::error!(%err, handle = self.id, "user context release failed");
            }
        }
        tracing::debug!(handle = self.id, rc, swept, "handle closed");
        rc
    }
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        let session = self
            .session
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(session) = session {
            tracing::debug!(handle = self.id, "closing unreachable handle");
            let context = detach_context(&*session);
            self.shutdown(session, context);
        }
    }
}

/// Managed handle wrapping one native session. Closing clears it; every
/// later use fails with `InvalidHandle`.
///
/// A handle registered as the process-wide watcher is retained by that
/// registration, so dropping the last user reference does not close it.
/// Such handles must be closed explicitly.
#[derive(Clone)]
pub struct Handle(Arc<HandleInner>);

impl Handle {
    pub(crate) fn open(
        bridge: &Bridge,
        params: InitParams,
        watcher: Value,
        context: Value,
    ) -> Result<Result<Handle, i32>, BindError> {
        let handle = Handle(Arc::new(HandleInner {
            id: NEXT_HANDLE.fetch_add(1, Ordering::Relaxed),
            bridge: bridge.clone(),
            session: RwLock::new(None),
        }));
        let registry = &bridge.registry;
        // the slot must be in place before the native layer can report
        // the connection; the displaced registration is kept until init
        // succeeds
        let has_watcher = !watcher.is_nil();
        let previous = if has_watcher {
            registry.swap_global_watch(&handle, watcher, context.clone())?
        } else {
            None
        };
        let context_token = if context.is_nil() {
            None
        } else {
            match registry.retain(context) {
                Ok(t) => Some(t),
                Err(err) => {
                    if has_watcher {
                        registry.restore_global_watch(handle.id(), previous);
                    }
                    return Err(err);
                }
            }
        };

        let session_watcher = Arc::new(SessionWatcher::new(registry.clone(), handle.id()));
        let session = match bridge.library.init(params, session_watcher) {
            Ok(s) => s,
            Err(rc) => {
                tracing::debug!(rc, "native init failed");
                if let Some(t) = context_token {
                    if let Err(err) = registry.release(t) {
                        tracing::error!(%err, "user context release failed");
                    }
                }
                if has_watcher {
                    registry.restore_global_watch(handle.id(), previous);
                }
                return Ok(Err(rc));
            }
        };
        if let Some(previous) = previous {
            registry.release_global(previous);
        }
        if let Some(t) = context_token {
            session.set_context(t.raw());
        }
        *handle.0.session.write().unwrap_or_else(|e| e.into_inner()) = Some(session);
        tracing::debug!(handle = handle.id(), "handle opened");
        Ok(Ok(handle))
    }

    pub fn from_value(v: &Value) -> Result<&Handle, BindError> {
        v.as_handle()
            .ok_or_else(|| BindError::arg(format!("expected a handle, got {}", v.type_name())))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn bridge(&self) -> &Bridge {
        &self.0.bridge
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.0.bridge.registry
    }

    pub fn is_closed(&self) -> bool {
        self.0
            .session
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_none()
    }

    pub(crate) fn session(&self) -> Result<Arc<dyn NativeSession>, BindError> {
        self.0
            .session
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(BindError::InvalidHandle)
    }

    pub fn close(&self) -> Result<i32, BindError> {
        let (session, context) = {
            let mut slot = self.0.session.write().unwrap_or_else(|e| e.into_inner());
            let session = slot.take().ok_or(BindError::InvalidHandle)?;
            let context = detach_context(&*session);
            (session, context)
        };
        Ok(self.0.shutdown(session, context))
    }

    /// Stores `value` as the user context, releasing the previous one.
    pub fn set_context(&self, value: Value) -> Result<(), BindError> {
        let registry = self.registry();
        let fresh = if value.is_nil() {
            None
        } else {
            Some(registry.retain(value)?)
        };
        // the write lock orders this against close detaching the word
        let old = {
            let slot = self.0.session.write().unwrap_or_else(|e| e.into_inner());
            match slot.as_ref() {
                Some(session) => {
                    let old = session.context();
                    session.set_context(fresh.map_or(0, RefToken::raw));
                    Ok(old)
                }
                None => Err(BindError::InvalidHandle),
            }
        };
        let old = match old {
            Ok(old) => old,
            Err(err) => {
                if let Some(token) = fresh {
                    registry.release(token)?;
                }
                return Err(err);
            }
        };
        if let Some(token) = RefToken::from_raw(old) {
            registry.release(token)?;
        }
        Ok(())
    }

    pub fn context(&self) -> Result<Value, BindError> {
        let session = self.session()?;
        match RefToken::from_raw(session.context()) {
            Some(token) => self.registry().resolve(token),
            None => Ok(Value::Nil),
        }
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.id())
            .field("closed", &self.is_closed())
            .finish()
    }
}
