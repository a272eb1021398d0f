//! Bridges an asynchronous, callback-driven coordination-service client
//! into a scripting runtime: retained references, per-call completion
//! contexts, one-shot and process-wide watches, and marshalling of the
//! native result shapes.

mod config;
mod context;
mod error;
mod handle;
pub mod logging;
pub mod marshal;
pub mod ops;
mod registry;
mod trampoline;
mod value;

pub use config::{config, BindConfig};
pub use context::{CompletionContext, Payload, WatchState};
pub use error::BindError;
pub use handle::{Bridge, Handle};
pub use registry::{RefToken, Registry};
pub use trampoline::{OneShotWatch, PendingOperation, SessionWatcher};
pub use value::{CallError, NativeFn, Table, Value};

pub use zkbind_native_core as native;
