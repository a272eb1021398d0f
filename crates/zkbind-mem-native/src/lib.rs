//! In-process stand-in for the coordination-service client library. It
//! keeps a single data tree, serves any number of sessions, and delivers
//! every completion and watch notification on one event thread, the same
//! threading contract the real client library gives its callers.

mod hosts;
mod server;
mod session;
mod tree;
mod watches;

pub use server::{MemNative, MemNativeConfig};
pub use session::MemSession;
