use std::sync::Arc;

use zkbind_native_core::{
    event_name, state_name, Completion, NativeResult, OneShotWatcher, ResultShape, WatchedEvent,
    Watcher,
};

use crate::context::{CompletionContext, WatchState};
use crate::marshal::result_args;
use crate::registry::Registry;
use crate::value::Value;

/// Pending asynchronous request. Whatever the shape, delivery goes through
/// the same path: marshal the result, call back, release the context.
pub struct PendingOperation {
    shape: ResultShape,
    ctx: CompletionContext,
}

impl PendingOperation {
    pub fn new(shape: ResultShape, ctx: CompletionContext) -> PendingOperation {
        PendingOperation { shape, ctx }
    }
}

impl Completion for PendingOperation {
    fn complete(self: Box<Self>, rc: i32, result: NativeResult) {
        let PendingOperation { shape, ctx } = *self;
        let result = if result.shape() == shape {
            result
        } else {
            tracing::error!(
                expected = ?shape,
                got = ?result.shape(),
                rc,
                "native result shape mismatch"
            );
            NativeResult::empty(shape)
        };
        if let Err(err) = ctx.consume(result_args(rc, result)) {
            tracing::error!(%err, "completion delivery failed");
        }
    }
}

/// Native side of a one-shot watch. The registration itself lives in the
/// registry under `id`; close may sweep it before this fires.
pub struct OneShotWatch {
    id: u64,
    registry: Arc<Registry>,
    fired: bool,
}

impl OneShotWatch {
    pub(crate) fn new(id: u64, registry: Arc<Registry>) -> OneShotWatch {
        OneShotWatch {
            id,
            registry,
            fired: false,
        }
    }
}

impl OneShotWatcher for OneShotWatch {
    fn fire(mut self: Box<Self>, event: WatchedEvent) {
        self.fired = true;
        let Some(mut ctx) = self.registry.take_watch(self.id) else {
            tracing::debug!(
                watch = self.id,
                event = event_name(event.event_type),
                path = %event.path,
                "watch fired after its handle was closed"
            );
            return;
        };
        ctx.transition(WatchState::Fired);
        match self.registry.resolve_watch(&ctx) {
            Ok((handle, callback, payload)) => {
                let args = [
                    handle,
                    Value::from(event.event_type),
                    Value::from(event.state),
                    Value::from(event.path),
                    payload,
                ];
                if let Err(err) = callback.call(&args) {
                    tracing::warn!(%err, watch = self.id, "watch callback raised an error");
                }
            }
            Err(err) => tracing::error!(%err, watch = self.id, "watch context is corrupt"),
        }
        self.registry.release_watch(ctx);
    }
}

impl Drop for OneShotWatch {
    fn drop(&mut self) {
        if !self.fired && self.registry.discard_watch(self.id) {
            tracing::debug!(watch = self.id, "unfired watch discarded by native layer");
        }
    }
}

/// Session watcher installed on every native session. Session events and
/// default watches all land in the process-wide watch slot.
pub struct SessionWatcher {
    registry: Arc<Registry>,
    handle_id: u64,
}

impl SessionWatcher {
    pub(crate) fn new(registry: Arc<Registry>, handle_id: u64) -> SessionWatcher {
        SessionWatcher {
            registry,
            handle_id,
        }
    }
}

impl Watcher for SessionWatcher {
    fn process(&self, event: WatchedEvent) {
        tracing::debug!(
            handle = self.handle_id,
            event = event_name(event.event_type),
            state = state_name(event.state),
            path = %event.path,
            "watch event"
        );
        let Some(global) = self.registry.global_watch() else {
            tracing::debug!(handle = self.handle_id, "no process-wide watcher, event dropped");
            return;
        };
        let (handle, callback, context) = match global {
            Ok(v) => v,
            Err(err) => {
                tracing::error!(%err, "process-wide watch is corrupt");
                return;
            }
        };
        let args = [
            handle,
            Value::from(event.event_type),
            Value::from(event.state),
            Value::from(event.path),
            context,
        ];
        if let Err(err) = callback.call(&args) {
            tracing::warn!(%err, "process-wide watcher raised an error");
        }
    }
}
