use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU64;
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard};

use crate::context::{Payload, WatchContext, WatchState};
use crate::error::BindError;
use crate::handle::Handle;
use crate::value::Value;

/// Registry key keeping one managed value alive. Packs the slot index and
/// the slot generation, so a token outlives neither a release nor a reuse
/// of its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RefToken(NonZeroU64);

impl RefToken {
    fn new(index: u32, generation: u32) -> RefToken {
        let raw = (u64::from(generation) << 32) | (u64::from(index) + 1);
        // low half is index + 1, never zero
        RefToken(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN))
    }

    pub fn from_raw(raw: u64) -> Option<RefToken> {
        NonZeroU64::new(raw).map(RefToken)
    }

    pub fn raw(self) -> u64 {
        self.0.get()
    }

    fn index(self) -> usize {
        ((self.0.get() & 0xffff_ffff) - 1) as usize
    }

    fn generation(self) -> u32 {
        (self.0.get() >> 32) as u32
    }
}

impl fmt::Display for RefToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.index(), self.generation())
    }
}

struct Slot {
    generation: u32,
    value: Option<Value>,
}

pub(crate) struct GlobalWatch {
    handle_id: u64,
    handle: RefToken,
    callback: RefToken,
    context: Payload,
}

pub(crate) struct Inner {
    capacity: usize,
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
    global: Option<GlobalWatch>,
    watches: HashMap<u64, WatchContext>,
    next_watch: u64,
    // values to drop once the lock is released
    garbage: Vec<Value>,
}

impl Inner {
    pub(crate) fn retain(&mut self, value: Value) -> Result<RefToken, BindError> {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            self.live += 1;
            return Ok(RefToken::new(index, slot.generation));
        }
        if self.slots.len() >= self.capacity {
            self.garbage.push(value);
            return Err(BindError::AllocationFailure);
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        self.live += 1;
        Ok(RefToken::new(index, 0))
    }

    fn slot(&self, token: RefToken) -> Option<&Slot> {
        self.slots
            .get(token.index())
            .filter(|s| s.generation == token.generation() && s.value.is_some())
    }

    pub(crate) fn resolve(&self, token: RefToken) -> Result<Value, BindError> {
        self.slot(token)
            .and_then(|s| s.value.clone())
            .ok_or(BindError::InvalidReference(token))
    }

    /// Frees the slot and hands back the value; callers drop it after
    /// unlocking.
    pub(crate) fn release(&mut self, token: RefToken) -> Result<Value, BindError> {
        if self.slot(token).is_none() {
            return Err(BindError::InvalidReference(token));
        }
        let index = token.index();
        let slot = &mut self.slots[index];
        let value = slot.value.take().unwrap_or_default();
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index as u32);
        self.live -= 1;
        Ok(value)
    }

    pub(crate) fn retain_payload(&mut self, value: Value) -> Result<Payload, BindError> {
        if value.is_reference() {
            Ok(Payload::Retained(self.retain(value)?))
        } else {
            Ok(Payload::Inline(value))
        }
    }

    pub(crate) fn resolve_payload(&self, payload: &Payload) -> Result<Value, BindError> {
        match payload {
            Payload::Inline(v) => Ok(v.clone()),
            Payload::Retained(token) => self.resolve(*token),
        }
    }

    pub(crate) fn release_payload(&mut self, payload: Payload) -> Result<Value, BindError> {
        match payload {
            Payload::Inline(v) => Ok(v),
            Payload::Retained(token) => self.release(token),
        }
    }

    fn release_logged(&mut self, token: RefToken, garbage: &mut Vec<Value>) {
        match self.release(token) {
            Ok(v) => garbage.push(v),
            Err(err) => tracing::error!(%err, "registry release failed"),
        }
    }

    /// Undoes a retain made under the same lock.
    fn rollback(&mut self, token: RefToken) {
        match self.release(token) {
            Ok(v) => self.garbage.push(v),
            Err(err) => tracing::error!(%err, "registry rollback failed"),
        }
    }

    fn release_watch(&mut self, mut ctx: WatchContext, garbage: &mut Vec<Value>) {
        self.release_logged(ctx.handle, garbage);
        self.release_logged(ctx.callback, garbage);
        let payload = std::mem::replace(&mut ctx.payload, Payload::Inline(Value::Nil));
        match self.release_payload(payload) {
            Ok(v) => garbage.push(v),
            Err(err) => tracing::error!(%err, "registry release failed"),
        }
        ctx.transition(WatchState::Released);
    }
}

/// Registry lock. Values parked in `Inner::garbage` are dropped after the
/// mutex is released, since dropping a handle value can re-enter the
/// registry.
pub(crate) struct Locked<'a> {
    inner: MutexGuard<'a, Inner>,
    garbage: Vec<Value>,
}

impl Deref for Locked<'_> {
    type Target = Inner;

    fn deref(&self) -> &Inner {
        &self.inner
    }
}

impl DerefMut for Locked<'_> {
    fn deref_mut(&mut self) -> &mut Inner {
        &mut self.inner
    }
}

impl Drop for Locked<'_> {
    fn drop(&mut self) {
        // fields drop in declaration order: unlock first, then the values
        self.garbage = std::mem::take(&mut self.inner.garbage);
    }
}

/// Process-wide store of retained managed values, plus the process-wide
/// watch slot and the outstanding one-shot watches. Everything sits behind
/// one mutex.
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    pub fn new(capacity: usize) -> Registry {
        Registry {
            inner: Mutex::new(Inner {
                capacity: capacity.clamp(1, u32::MAX as usize - 1),
                slots: Vec::new(),
                free: Vec::new(),
                live: 0,
                global: None,
                watches: HashMap::new(),
                next_watch: 1,
                garbage: Vec::new(),
            }),
        }
    }

    pub(crate) fn lock(&self) -> Locked<'_> {
        Locked {
            inner: self.inner.lock().unwrap_or_else(|e| e.into_inner()),
            garbage: Vec::new(),
        }
    }

    pub fn retain(&self, value: Value) -> Result<RefToken, BindError> {
        self.lock().retain(value)
    }

    pub fn resolve(&self, token: RefToken) -> Result<Value, BindError> {
        self.lock().resolve(token)
    }

    pub fn release(&self, token: RefToken) -> Result<(), BindError> {
        let value = self.lock().release(token)?;
        drop(value);
        Ok(())
    }

    pub fn live(&self) -> usize {
        self.lock().live
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    /// Replaces the process-wide watch. The previous registration, if any,
    /// is released.
    pub(crate) fn set_global_watch(
        &self,
        handle: &Handle,
        callback: Value,
        context: Value,
    ) -> Result<(), BindError> {
        if let Some(old) = self.swap_global_watch(handle, callback, context)? {
            self.release_global(old);
        }
        Ok(())
    }

    /// Installs a new process-wide watch and hands back the one it
    /// displaced, still retained, so it can be restored.
    pub(crate) fn swap_global_watch(
        &self,
        handle: &Handle,
        callback: Value,
        context: Value,
    ) -> Result<Option<GlobalWatch>, BindError> {
        let handle_id = handle.id();
        let mut inner = self.lock();
        let (handle, callback, context) =
            retain_triple(&mut inner, Value::Handle(handle.clone()), callback, context)?;
        Ok(inner.global.replace(GlobalWatch {
            handle_id,
            handle,
            callback,
            context,
        }))
    }

    /// Puts `previous` back if the slot still belongs to `handle_id`. If
    /// someone replaced the slot in the meantime, `previous` is released.
    pub(crate) fn restore_global_watch(&self, handle_id: u64, previous: Option<GlobalWatch>) {
        let stale = {
            let mut inner = self.lock();
            let owned = inner
                .global
                .as_ref()
                .is_some_and(|g| g.handle_id == handle_id);
            if owned {
                std::mem::replace(&mut inner.global, previous)
            } else {
                previous
            }
        };
        if let Some(stale) = stale {
            self.release_global(stale);
        }
    }

    pub(crate) fn release_global(&self, old: GlobalWatch) {
        let mut garbage = Vec::new();
        {
            let mut inner = self.lock();
            inner.release_logged(old.handle, &mut garbage);
            inner.release_logged(old.callback, &mut garbage);
            match inner.release_payload(old.context) {
                Ok(v) => garbage.push(v),
                Err(err) => tracing::error!(%err, "registry release failed"),
            }
        }
        drop(garbage);
    }

    /// Handle, callback and context of the process-wide watch.
    pub(crate) fn global_watch(&self) -> Option<Result<(Value, Value, Value), BindError>> {
        let inner = self.lock();
        let global = inner.global.as_ref()?;
        Some(inner.resolve(global.handle).and_then(|handle| {
            Ok((
                handle,
                inner.resolve(global.callback)?,
                inner.resolve_payload(&global.context)?,
            ))
        }))
    }

    pub fn has_global_watch(&self) -> bool {
        self.lock().global.is_some()
    }

    pub(crate) fn register_watch(
        &self,
        handle: &Handle,
        callback: Value,
        context: Value,
    ) -> Result<u64, BindError> {
        let mut inner = self.lock();
        let (handle_token, callback, payload) =
            retain_triple(&mut inner, Value::Handle(handle.clone()), callback, context)?;
        let id = inner.next_watch;
        inner.next_watch += 1;
        inner.watches.insert(
            id,
            WatchContext::new(handle.id(), handle_token, callback, payload),
        );
        Ok(id)
    }

    /// Detaches a watch for firing. `None` means it was already swept.
    pub(crate) fn take_watch(&self, id: u64) -> Option<WatchContext> {
        self.lock().watches.remove(&id)
    }

    pub(crate) fn resolve_watch(
        &self,
        ctx: &WatchContext,
    ) -> Result<(Value, Value, Value), BindError> {
        let inner = self.lock();
        Ok((
            inner.resolve(ctx.handle)?,
            inner.resolve(ctx.callback)?,
            inner.resolve_payload(&ctx.payload)?,
        ))
    }

    pub(crate) fn release_watch(&self, ctx: WatchContext) {
        let mut garbage = Vec::new();
        self.lock().release_watch(ctx, &mut garbage);
        drop(garbage);
    }

    /// Releases a watch the native layer dropped without firing.
    pub(crate) fn discard_watch(&self, id: u64) -> bool {
        let mut garbage = Vec::new();
        let found = {
            let mut inner = self.lock();
            match inner.watches.remove(&id) {
                Some(mut ctx) => {
                    ctx.transition(WatchState::HandleClosed);
                    inner.release_watch(ctx, &mut garbage);
                    true
                }
                None => false,
            }
        };
        drop(garbage);
        found
    }

    /// Releases every outstanding one-shot watch owned by `handle_id`.
    pub(crate) fn sweep_watches(&self, handle_id: u64) -> usize {
        let mut garbage = Vec::new();
        let swept = {
            let mut inner = self.lock();
            let ids: Vec<u64> = inner
                .watches
                .iter()
                .filter(|(_, ctx)| ctx.handle_id == handle_id)
                .map(|(id, _)| *id)
                .collect();
            for id in &ids {
                if let Some(mut ctx) = inner.watches.remove(id) {
                    ctx.transition(WatchState::HandleClosed);
                    inner.release_watch(ctx, &mut garbage);
                }
            }
            ids.len()
        };
        drop(garbage);
        swept
    }

    pub fn pending_watches(&self) -> usize {
        self.lock().watches.len()
    }
}

fn retain_triple(
    inner: &mut Inner,
    handle: Value,
    callback: Value,
    context: Value,
) -> Result<(RefToken, RefToken, Payload), BindError> {
    if !matches!(callback, Value::Function(_)) {
        let err = BindError::arg(format!(
            "watcher must be a function, got {}",
            callback.type_name()
        ));
        inner.garbage.extend([handle, callback, context]);
        return Err(err);
    }
    let handle = match inner.retain(handle) {
        Ok(t) => t,
        Err(err) => {
            inner.garbage.extend([callback, context]);
            return Err(err);
        }
    };
    let callback = match inner.retain(callback) {
        Ok(t) => t,
        Err(err) => {
            inner.rollback(handle);
            inner.garbage.push(context);
            return Err(err);
        }
    };
    match inner.retain_payload(context) {
        Ok(payload) => Ok((handle, callback, payload)),
        Err(err) => {
            inner.rollback(callback);
            inner.rollback(handle);
            Err(err)
        }
    }
}
