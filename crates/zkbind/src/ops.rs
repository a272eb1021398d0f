use zkbind_native_core::{
    parse_flag, zerror, InitParams, NativeResult, Request, WatchSpec, NAMED_CONSTANTS,
    ZINVALIDSTATE, ZOK,
};

use crate::context::CompletionContext;
use crate::error::BindError;
use crate::handle::{Bridge, Handle};
use crate::logging::{self, LogTarget};
use crate::marshal::{client_id_from_value, client_id_to_value, parse_acl_list, result_args};
use crate::trampoline::{OneShotWatch, PendingOperation};
use crate::value::{Table, Value};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DESCRIPTION: &str = "zkbind: scripting binding of the coordination service client";
pub const COPYRIGHT: &str = "Copyright (C) zkbind contributors";

fn submit(
    handle: &Handle,
    request: Request,
    completion: &Value,
    data: Value,
) -> Result<i32, BindError> {
    let session = handle.session()?;
    let ctx = CompletionContext::create(handle.registry(), completion, data)?;
    let op = PendingOperation::new(request.shape(), ctx);
    let path = request.path().map(str::to_string);
    let name = request.name();
    let rc = session.submit(request, Box::new(op));
    tracing::trace!(handle = handle.id(), op = name, path = ?path, rc, "submitted");
    Ok(rc)
}

fn execute(handle: &Handle, request: Request) -> Result<(i32, NativeResult), BindError> {
    let session = handle.session()?;
    Ok(session.execute(request))
}

/// Status code plus exactly `N` marshalled values for the result shape.
fn values<const N: usize>((rc, result): (i32, NativeResult)) -> (i32, [Value; N]) {
    let mut it = result_args(rc, result).into_iter().skip(1);
    (rc, std::array::from_fn(|_| it.next().unwrap_or_default()))
}

fn one_shot(handle: &Handle, watcher: Value, watcher_ctx: Value) -> Result<WatchSpec, BindError> {
    handle.session()?;
    let registry = handle.registry().clone();
    let id = registry.register_watch(handle, watcher, watcher_ctx)?;
    Ok(WatchSpec::OneShot(Box::new(OneShotWatch::new(id, registry))))
}

// session

pub fn init(
    bridge: &Bridge,
    host: &str,
    watcher: Value,
    recv_timeout: i32,
    client_id: &Value,
    context: Value,
    flags: i32,
) -> Result<(i32, Value), BindError> {
    if !watcher.is_nil() && !matches!(watcher, Value::Function(_)) {
        return Err(BindError::arg(format!(
            "watcher must be a function, got {}",
            watcher.type_name()
        )));
    }
    let params = InitParams {
        hosts: host.to_string(),
        recv_timeout,
        client_id: client_id_from_value(client_id)?,
        flags,
    };
    match Handle::open(bridge, params, watcher, context)? {
        Ok(handle) => Ok((ZOK, Value::Handle(handle))),
        Err(rc) => Ok((rc, Value::Nil)),
    }
}

pub fn close(handle: &Handle) -> Result<i32, BindError> {
    handle.close()
}

pub fn client_id(handle: &Handle) -> Result<Value, BindError> {
    Ok(client_id_to_value(&handle.session()?.client_id()))
}

pub fn recv_timeout(handle: &Handle) -> Result<i32, BindError> {
    Ok(handle.session()?.recv_timeout())
}

pub fn get_context(handle: &Handle) -> Result<Value, BindError> {
    handle.context()
}

pub fn set_context(handle: &Handle, context: Value) -> Result<(), BindError> {
    handle.set_context(context)
}

/// Replaces the process-wide watcher with `watcher`, bound to `handle`.
pub fn set_watcher(handle: &Handle, watcher: Value, context: Value) -> Result<(), BindError> {
    handle.session()?;
    handle.registry().set_global_watch(handle, watcher, context)
}

/// "ip:port" of the connected server, nil when not connected.
pub fn get_connected_host(handle: &Handle) -> Result<Value, BindError> {
    Ok(handle
        .session()?
        .connected_host()
        .map(|addr| Value::from(addr.to_string()))
        .unwrap_or_default())
}

pub fn state(handle: &Handle) -> Result<i32, BindError> {
    Ok(handle.session()?.state())
}

pub fn is_unrecoverable(handle: &Handle) -> Result<i32, BindError> {
    if handle.session()?.state() < 0 {
        Ok(ZINVALIDSTATE)
    } else {
        Ok(ZOK)
    }
}

// asynchronous node operations

pub fn acreate(
    handle: &Handle,
    path: &str,
    value: Option<&[u8]>,
    acl: &Value,
    flags: i32,
    completion: &Value,
    data: Value,
) -> Result<i32, BindError> {
    let acl = parse_acl_list(acl)?;
    let request = Request::Create {
        path: path.to_string(),
        data: value.map(<[u8]>::to_vec),
        acl,
        flags,
    };
    submit(handle, request, completion, data)
}

pub fn adelete(
    handle: &Handle,
    path: &str,
    version: i32,
    completion: &Value,
    data: Value,
) -> Result<i32, BindError> {
    let request = Request::Delete {
        path: path.to_string(),
        version,
    };
    submit(handle, request, completion, data)
}

pub fn aexists(
    handle: &Handle,
    path: &str,
    watch: bool,
    completion: &Value,
    data: Value,
) -> Result<i32, BindError> {
    let request = Request::Exists {
        path: path.to_string(),
        watch: WatchSpec::from_flag(watch),
    };
    submit(handle, request, completion, data)
}

pub fn awexists(
    handle: &Handle,
    path: &str,
    watcher: Value,
    watcher_ctx: Value,
    completion: &Value,
    data: Value,
) -> Result<i32, BindError> {
    let request = Request::Exists {
        path: path.to_string(),
        watch: one_shot(handle, watcher, watcher_ctx)?,
    };
    submit(handle, request, completion, data)
}

pub fn aget(
    handle: &Handle,
    path: &str,
    watch: bool,
    completion: &Value,
    data: Value,
) -> Result<i32, BindError> {
    let request = Request::Get {
        path: path.to_string(),
        watch: WatchSpec::from_flag(watch),
    };
    submit(handle, request, completion, data)
}

pub fn awget(
    handle: &Handle,
    path: &str,
    watcher: Value,
    watcher_ctx: Value,
    completion: &Value,
    data: Value,
) -> Result<i32, BindError> {
    let request = Request::Get {
        path: path.to_string(),
        watch: one_shot(handle, watcher, watcher_ctx)?,
    };
    submit(handle, request, completion, data)
}

pub fn aset(
    handle: &Handle,
    path: &str,
    buffer: Option<&[u8]>,
    version: i32,
    completion: &Value,
    data: Value,
) -> Result<i32, BindError> {
    let request = Request::Set {
        path: path.to_string(),
        data: buffer.map(<[u8]>::to_vec),
        version,
    };
    submit(handle, request, completion, data)
}

pub fn aget_children(
    handle: &Handle,
    path: &str,
    watch: bool,
    completion: &Value,
    data: Value,
) -> Result<i32, BindError> {
    let request = Request::GetChildren {
        path: path.to_string(),
        watch: WatchSpec::from_flag(watch),
    };
    submit(handle, request, completion, data)
}

pub fn aget_children2(
    handle: &Handle,
    path: &str,
    watch: bool,
    completion: &Value,
    data: Value,
) -> Result<i32, BindError> {
    let request = Request::GetChildren2 {
        path: path.to_string(),
        watch: WatchSpec::from_flag(watch),
    };
    submit(handle, request, completion, data)
}

pub fn awget_children(
    handle: &Handle,
    path: &str,
    watcher: Value,
    watcher_ctx: Value,
    completion: &Value,
    data: Value,
) -> Result<i32, BindError> {
    let request = Request::GetChildren {
        path: path.to_string(),
        watch: one_shot(handle, watcher, watcher_ctx)?,
    };
    submit(handle, request, completion, data)
}

pub fn awget_children2(
    handle: &Handle,
    path: &str,
    watcher: Value,
    watcher_ctx: Value,
    completion: &Value,
    data: Value,
) -> Result<i32, BindError> {
    let request = Request::GetChildren2 {
        path: path.to_string(),
        watch: one_shot(handle, watcher, watcher_ctx)?,
    };
    submit(handle, request, completion, data)
}

/// Round trip through the server pipeline; completes with the path.
pub fn r#async(
    handle: &Handle,
    path: &str,
    completion: &Value,
    data: Value,
) -> Result<i32, BindError> {
    let request = Request::Sync {
        path: path.to_string(),
    };
    submit(handle, request, completion, data)
}

pub fn aget_acl(
    handle: &Handle,
    path: &str,
    completion: &Value,
    data: Value,
) -> Result<i32, BindError> {
    let request = Request::GetAcl {
        path: path.to_string(),
    };
    submit(handle, request, completion, data)
}

pub fn aset_acl(
    handle: &Handle,
    path: &str,
    version: i32,
    acl: &Value,
    completion: &Value,
    data: Value,
) -> Result<i32, BindError> {
    let acl = parse_acl_list(acl)?;
    let request = Request::SetAcl {
        path: path.to_string(),
        version,
        acl,
    };
    submit(handle, request, completion, data)
}

/// The completion is optional here; nil means nobody is told the outcome.
pub fn add_auth(
    handle: &Handle,
    scheme: &str,
    cert: &[u8],
    completion: &Value,
    data: Value,
) -> Result<i32, BindError> {
    let request = Request::AddAuth {
        scheme: scheme.to_string(),
        cert: cert.to_vec(),
    };
    if completion.is_nil() {
        let session = handle.session()?;
        return Ok(session.submit(request, Box::new(|_: i32, _: NativeResult| {})));
    }
    submit(handle, request, completion, data)
}

// synchronous node operations

pub fn create(
    handle: &Handle,
    path: &str,
    value: Option<&[u8]>,
    acl: &Value,
    flags: i32,
) -> Result<(i32, Value), BindError> {
    let acl = parse_acl_list(acl)?;
    let request = Request::Create {
        path: path.to_string(),
        data: value.map(<[u8]>::to_vec),
        acl,
        flags,
    };
    let (rc, [created]) = values(execute(handle, request)?);
    Ok((rc, created))
}

pub fn delete(handle: &Handle, path: &str, version: i32) -> Result<i32, BindError> {
    let request = Request::Delete {
        path: path.to_string(),
        version,
    };
    Ok(execute(handle, request)?.0)
}

pub fn exists(handle: &Handle, path: &str, watch: bool) -> Result<(i32, Value), BindError> {
    let request = Request::Exists {
        path: path.to_string(),
        watch: WatchSpec::from_flag(watch),
    };
    let (rc, [stat]) = values(execute(handle, request)?);
    Ok((rc, stat))
}

pub fn wexists(
    handle: &Handle,
    path: &str,
    watcher: Value,
    watcher_ctx: Value,
) -> Result<(i32, Value), BindError> {
    let request = Request::Exists {
        path: path.to_string(),
        watch: one_shot(handle, watcher, watcher_ctx)?,
    };
    let (rc, [stat]) = values(execute(handle, request)?);
    Ok((rc, stat))
}

pub fn get(handle: &Handle, path: &str, watch: bool) -> Result<(i32, Value, Value), BindError> {
    let request = Request::Get {
        path: path.to_string(),
        watch: WatchSpec::from_flag(watch),
    };
    let (rc, [data, stat]) = values(execute(handle, request)?);
    Ok((rc, data, stat))
}

pub fn wget(
    handle: &Handle,
    path: &str,
    watcher: Value,
    watcher_ctx: Value,
) -> Result<(i32, Value, Value), BindError> {
    let request = Request::Get {
        path: path.to_string(),
        watch: one_shot(handle, watcher, watcher_ctx)?,
    };
    let (rc, [data, stat]) = values(execute(handle, request)?);
    Ok((rc, data, stat))
}

pub fn set(
    handle: &Handle,
    path: &str,
    buffer: Option<&[u8]>,
    version: i32,
) -> Result<i32, BindError> {
    Ok(set2(handle, path, buffer, version)?.0)
}

pub fn set2(
    handle: &Handle,
    path: &str,
    buffer: Option<&[u8]>,
    version: i32,
) -> Result<(i32, Value), BindError> {
    let request = Request::Set {
        path: path.to_string(),
        data: buffer.map(<[u8]>::to_vec),
        version,
    };
    let (rc, [stat]) = values(execute(handle, request)?);
    Ok((rc, stat))
}

pub fn get_children(handle: &Handle, path: &str, watch: bool) -> Result<(i32, Value), BindError> {
    let request = Request::GetChildren {
        path: path.to_string(),
        watch: WatchSpec::from_flag(watch),
    };
    let (rc, [children]) = values(execute(handle, request)?);
    Ok((rc, children))
}

pub fn wget_children(
    handle: &Handle,
    path: &str,
    watcher: Value,
    watcher_ctx: Value,
) -> Result<(i32, Value), BindError> {
    let request = Request::GetChildren {
        path: path.to_string(),
        watch: one_shot(handle, watcher, watcher_ctx)?,
    };
    let (rc, [children]) = values(execute(handle, request)?);
    Ok((rc, children))
}

pub fn get_children2(
    handle: &Handle,
    path: &str,
    watch: bool,
) -> Result<(i32, Value, Value), BindError> {
    let request = Request::GetChildren2 {
        path: path.to_string(),
        watch: WatchSpec::from_flag(watch),
    };
    let (rc, [children, stat]) = values(execute(handle, request)?);
    Ok((rc, children, stat))
}

pub fn wget_children2(
    handle: &Handle,
    path: &str,
    watcher: Value,
    watcher_ctx: Value,
) -> Result<(i32, Value, Value), BindError> {
    let request = Request::GetChildren2 {
        path: path.to_string(),
        watch: one_shot(handle, watcher, watcher_ctx)?,
    };
    let (rc, [children, stat]) = values(execute(handle, request)?);
    Ok((rc, children, stat))
}

pub fn get_acl(handle: &Handle, path: &str) -> Result<(i32, Value, Value), BindError> {
    let request = Request::GetAcl {
        path: path.to_string(),
    };
    let (rc, [acl, stat]) = values(execute(handle, request)?);
    Ok((rc, acl, stat))
}

pub fn set_acl(handle: &Handle, path: &str, version: i32, acl: &Value) -> Result<i32, BindError> {
    let acl = parse_acl_list(acl)?;
    let request = Request::SetAcl {
        path: path.to_string(),
        version,
        acl,
    };
    Ok(execute(handle, request)?.0)
}

// global

pub fn error(code: i32) -> &'static str {
    zerror(code)
}

pub fn set_debug_level(level: i32) {
    let effective = logging::set_level(level);
    tracing::debug!(requested = level, effective, "log level changed");
}

/// `None` or "stderr" logs to stderr, "stdout" to stdout, anything else
/// is a file path opened for append.
pub fn set_log_stream(target: Option<&str>) -> Result<(), BindError> {
    let target = LogTarget::parse(target);
    let shown = format!("{target:?}");
    logging::set_stream(target)
        .map_err(|err| BindError::arg(format!("cannot open log stream {shown}: {err}")))
}

pub fn deterministic_conn_order(bridge: &Bridge, flag: &str) -> Result<bool, BindError> {
    let yes = parse_flag(flag).ok_or_else(|| {
        BindError::arg(format!(
            "expected one of yes/true/on/1 or no/false/off/0, got {flag:?}"
        ))
    })?;
    bridge.library().set_deterministic_conn_order(yes);
    Ok(yes)
}

/// Named constants exported to the scripting side.
pub fn constants() -> Table {
    let mut t = Table::new();
    for (name, value) in NAMED_CONSTANTS {
        t.set(name, *value);
    }
    t.with("_VERSION", VERSION)
        .with("_DESCRIPTION", DESCRIPTION)
        .with("_COPYRIGHT", COPYRIGHT)
}
