use std::collections::HashMap;
use std::sync::Arc;

use zkbind_native_core::{
    OneShotWatcher, WatchedEvent, Watcher, ZOO_CHANGED_EVENT, ZOO_CHILD_EVENT,
    ZOO_CONNECTED_STATE, ZOO_CREATED_EVENT, ZOO_DELETED_EVENT,
};

use crate::tree::Change;

pub(crate) enum WatchTarget {
    Default(Arc<dyn Watcher>),
    OneShot(Box<dyn OneShotWatcher>),
}

impl WatchTarget {
    pub(crate) fn deliver(self, event: WatchedEvent) {
        match self {
            WatchTarget::Default(w) => w.process(event),
            WatchTarget::OneShot(w) => w.fire(event),
        }
    }
}

pub(crate) struct WatchEntry {
    pub session_id: i64,
    pub client_path: String,
    pub target: WatchTarget,
}

#[derive(Clone, Copy)]
pub(crate) enum WatchKind {
    Data,
    Child,
}

#[derive(Default)]
pub(crate) struct WatchManager {
    data: HashMap<String, Vec<WatchEntry>>,
    child: HashMap<String, Vec<WatchEntry>>,
}

impl WatchManager {
    pub(crate) fn add(&mut self, kind: WatchKind, path: &str, entry: WatchEntry) {
        let table = match kind {
            WatchKind::Data => &mut self.data,
            WatchKind::Child => &mut self.child,
        };
        let list = table.entry(path.to_string()).or_default();
        if matches!(entry.target, WatchTarget::Default(_))
            && list.iter().any(|e| {
                e.session_id == entry.session_id && matches!(e.target, WatchTarget::Default(_))
            })
        {
            return;
        }
        list.push(entry);
    }

    /// Detaches every watch the changes trigger, paired with the event each
    /// one must see.
    pub(crate) fn trigger(&mut self, changes: &[Change]) -> Vec<(WatchTarget, WatchedEvent)> {
        let mut out = Vec::new();
        for (path, event_type) in changes {
            let mut hits: Vec<WatchEntry> = Vec::new();
            match *event_type {
                ZOO_CREATED_EVENT | ZOO_CHANGED_EVENT => {
                    hits.extend(self.data.remove(path).unwrap_or_default());
                }
                ZOO_DELETED_EVENT => {
                    hits.extend(self.data.remove(path).unwrap_or_default());
                    hits.extend(self.child.remove(path).unwrap_or_default());
                }
                ZOO_CHILD_EVENT => {
                    hits.extend(self.child.remove(path).unwrap_or_default());
                }
                _ => {}
            }
            for entry in hits {
                let event = WatchedEvent {
                    event_type: *event_type,
                    state: ZOO_CONNECTED_STATE,
                    path: entry.client_path,
                };
                out.push((entry.target, event));
            }
        }
        out
    }

    /// Detaches every watch owned by `session_id`. The caller drops them
    /// outside of any lock.
    pub(crate) fn remove_session(&mut self, session_id: i64) -> Vec<WatchEntry> {
        let mut out = Vec::new();
        for table in [&mut self.data, &mut self.child] {
            for list in table.values_mut() {
                let (gone, keep): (Vec<WatchEntry>, Vec<WatchEntry>) =
                    list.drain(..).partition(|e| e.session_id == session_id);
                *list = keep;
                out.extend(gone);
            }
            table.retain(|_, list| !list.is_empty());
        }
        out
    }

    pub(crate) fn count(&self) -> usize {
        self.data.values().map(Vec::len).sum::<usize>()
            + self.child.values().map(Vec::len).sum::<usize>()
    }
}
