use std::fmt;

use crate::session::OneShotWatcher;
use crate::types::{Acl, NodeStat};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    Void,
    Stat,
    Data,
    Children,
    ChildrenStat,
    String,
    Acl,
}

/// Watch requested alongside a read. `Default` routes the eventual event to
/// the session watcher given at init; `OneShot` carries its own target.
pub enum WatchSpec {
    None,
    Default,
    OneShot(Box<dyn OneShotWatcher>),
}

impl WatchSpec {
    pub fn from_flag(watch: bool) -> WatchSpec {
        if watch {
            WatchSpec::Default
        } else {
            WatchSpec::None
        }
    }

    pub fn is_set(&self) -> bool {
        !matches!(self, WatchSpec::None)
    }
}

impl fmt::Debug for WatchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchSpec::None => f.write_str("None"),
            WatchSpec::Default => f.write_str("Default"),
            WatchSpec::OneShot(_) => f.write_str("OneShot(..)"),
        }
    }
}

#[derive(Debug)]
pub enum Request {
    Create {
        path: String,
        data: Option<Vec<u8>>,
        acl: Vec<Acl>,
        flags: i32,
    },
    Delete {
        path: String,
        version: i32,
    },
    Exists {
        path: String,
        watch: WatchSpec,
    },
    Get {
        path: String,
        watch: WatchSpec,
    },
    Set {
        path: String,
        data: Option<Vec<u8>>,
        version: i32,
    },
    GetChildren {
        path: String,
        watch: WatchSpec,
    },
    GetChildren2 {
        path: String,
        watch: WatchSpec,
    },
    Sync {
        path: String,
    },
    GetAcl {
        path: String,
    },
    SetAcl {
        path: String,
        version: i32,
        acl: Vec<Acl>,
    },
    AddAuth {
        scheme: String,
        cert: Vec<u8>,
    },
}

impl Request {
    pub fn shape(&self) -> ResultShape {
        match self {
            Request::Create { .. } | Request::Sync { .. } => ResultShape::String,
            Request::Delete { .. } | Request::SetAcl { .. } | Request::AddAuth { .. } => {
                ResultShape::Void
            }
            Request::Exists { .. } | Request::Set { .. } => ResultShape::Stat,
            Request::Get { .. } => ResultShape::Data,
            Request::GetChildren { .. } => ResultShape::Children,
            Request::GetChildren2 { .. } => ResultShape::ChildrenStat,
            Request::GetAcl { .. } => ResultShape::Acl,
        }
    }

    pub fn path(&self) -> Option<&str> {
        match self {
            Request::Create { path, .. }
            | Request::Delete { path, .. }
            | Request::Exists { path, .. }
            | Request::Get { path, .. }
            | Request::Set { path, .. }
            | Request::GetChildren { path, .. }
            | Request::GetChildren2 { path, .. }
            | Request::Sync { path }
            | Request::GetAcl { path }
            | Request::SetAcl { path, .. } => Some(path),
            Request::AddAuth { .. } => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Request::Create { .. } => "create",
            Request::Delete { .. } => "delete",
            Request::Exists { .. } => "exists",
            Request::Get { .. } => "get",
            Request::Set { .. } => "set",
            Request::GetChildren { .. } => "get_children",
            Request::GetChildren2 { .. } => "get_children2",
            Request::Sync { .. } => "sync",
            Request::GetAcl { .. } => "get_acl",
            Request::SetAcl { .. } => "set_acl",
            Request::AddAuth { .. } => "add_auth",
        }
    }
}

/// What the native layer hands back. `None` members mirror the native
/// library passing null pointers, which it does on most failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeResult {
    Void,
    Stat(Option<NodeStat>),
    Data(Option<Vec<u8>>, Option<NodeStat>),
    Children(Option<Vec<String>>),
    ChildrenStat(Option<Vec<String>>, Option<NodeStat>),
    String(Option<String>),
    Acl(Option<Vec<Acl>>, Option<NodeStat>),
}

impl NativeResult {
    pub fn empty(shape: ResultShape) -> NativeResult {
        match shape {
            ResultShape::Void => NativeResult::Void,
            ResultShape::Stat => NativeResult::Stat(None),
            ResultShape::Data => NativeResult::Data(None, None),
            ResultShape::Children => NativeResult::Children(None),
            ResultShape::ChildrenStat => NativeResult::ChildrenStat(None, None),
            ResultShape::String => NativeResult::String(None),
            ResultShape::Acl => NativeResult::Acl(None, None),
        }
    }

    pub fn shape(&self) -> ResultShape {
        match self {
            NativeResult::Void => ResultShape::Void,
            NativeResult::Stat(_) => ResultShape::Stat,
            NativeResult::Data(..) => ResultShape::Data,
            NativeResult::Children(_) => ResultShape::Children,
            NativeResult::ChildrenStat(..) => ResultShape::ChildrenStat,
            NativeResult::String(_) => ResultShape::String,
            NativeResult::Acl(..) => ResultShape::Acl,
        }
    }
}
