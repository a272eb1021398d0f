//! Boundary types shared by the binding and every native client backend:
//! the wrapped library's numeric constants, its record shapes, and the
//! traits a backend implements to serve sessions.

mod consts;
mod env;
mod request;
mod session;
mod types;

pub use consts::*;
pub use env::{env_bool, env_i32, env_string, env_u32_nonzero, parse_flag};
pub use request::{NativeResult, Request, ResultShape, WatchSpec};
pub use session::{
    Completion, InitParams, NativeLibrary, NativeSession, OneShotWatcher, Watcher,
};
pub use types::{Acl, ClientId, NodeStat, WatchedEvent, CLIENT_PASSWD_LEN};
