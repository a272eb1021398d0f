use std::sync::Arc;

use crate::error::BindError;
use crate::registry::{RefToken, Registry};
use crate::value::Value;

/// User payload handed back to a callback. Scalars travel by value;
/// tables, functions and handles are kept alive through the registry.
#[derive(Debug)]
pub enum Payload {
    Inline(Value),
    Retained(RefToken),
}

/// Per-call record pairing a retained callback with its payload. It is
/// consumed at most once; dropping it unconsumed releases its tokens.
pub struct CompletionContext {
    registry: Arc<Registry>,
    callback: Option<RefToken>,
    payload: Option<Payload>,
}

impl CompletionContext {
    pub fn create(
        registry: &Arc<Registry>,
        callback: &Value,
        payload: Value,
    ) -> Result<CompletionContext, BindError> {
        if !matches!(callback, Value::Function(_)) {
            return Err(BindError::arg(format!(
                "completion must be a function, got {}",
                callback.type_name()
            )));
        }
        let mut inner = registry.lock();
        let callback = inner.retain(callback.clone())?;
        let payload = match inner.retain_payload(payload) {
            Ok(p) => p,
            Err(err) => {
                let released = inner.release(callback);
                drop(inner);
                drop(released);
                return Err(err);
            }
        };
        Ok(CompletionContext {
            registry: registry.clone(),
            callback: Some(callback),
            payload: Some(payload),
        })
    }

    /// Invokes the callback with `args` followed by the payload, then
    /// releases everything the context retained.
    pub fn consume(mut self, mut args: Vec<Value>) -> Result<(), BindError> {
        let (callback, payload) = {
            let inner = self.registry.lock();
            let token = self
                .callback
                .ok_or(BindError::arg("completion context already consumed"))?;
            let callback = inner.resolve(token)?;
            let payload = match &self.payload {
                Some(p) => inner.resolve_payload(p)?,
                None => Value::Nil,
            };
            (callback, payload)
        };
        args.push(payload);
        if let Err(err) = callback.call(&args) {
            tracing::warn!(%err, "completion callback raised an error");
        }
        drop(args);
        drop(callback);
        self.release()
    }

    fn release(&mut self) -> Result<(), BindError> {
        let callback = self.callback.take();
        let payload = self.payload.take();
        if callback.is_none() && payload.is_none() {
            return Ok(());
        }
        let mut garbage = Vec::new();
        let mut first_err = None;
        {
            let mut inner = self.registry.lock();
            if let Some(token) = callback {
                match inner.release(token) {
                    Ok(v) => garbage.push(v),
                    Err(err) => first_err = first_err.or(Some(err)),
                }
            }
            if let Some(payload) = payload {
                match inner.release_payload(payload) {
                    Ok(v) => garbage.push(v),
                    Err(err) => first_err = first_err.or(Some(err)),
                }
            }
        }
        drop(garbage);
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for CompletionContext {
    fn drop(&mut self) {
        if self.callback.is_some() {
            tracing::debug!("completion context dropped without delivery");
        }
        if let Err(err) = self.release() {
            tracing::error!(%err, "completion context release failed");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Registered,
    Fired,
    HandleClosed,
    Released,
}

impl WatchState {
    fn can_become(self, next: WatchState) -> bool {
        matches!(
            (self, next),
            (WatchState::Registered, WatchState::Fired)
                | (WatchState::Registered, WatchState::HandleClosed)
                | (WatchState::Fired, WatchState::Released)
                | (WatchState::HandleClosed, WatchState::Released)
        )
    }
}

/// One-shot watch registration: owning handle, callback and payload.
#[derive(Debug)]
pub(crate) struct WatchContext {
    pub(crate) handle_id: u64,
    pub(crate) handle: RefToken,
    pub(crate) callback: RefToken,
    pub(crate) payload: Payload,
    state: WatchState,
}

impl WatchContext {
    pub(crate) fn new(
        handle_id: u64,
        handle: RefToken,
        callback: RefToken,
        payload: Payload,
    ) -> WatchContext {
        WatchContext {
            handle_id,
            handle,
            callback,
            payload,
            state: WatchState::Registered,
        }
    }

    pub(crate) fn transition(&mut self, next: WatchState) -> bool {
        if !self.state.can_become(next) {
            tracing::error!(from = ?self.state, to = ?next, "invalid watch transition");
            return false;
        }
        self.state = next;
        true
    }
}
