use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use proptest::prelude::*;
use zkbind::marshal::{acl_list_to_value, stat_to_value};
use zkbind::native::{
    Acl, ZAPIERROR, ZCLOSING, ZINVALIDSTATE, ZNOAUTH, ZNONODE, ZOK, ZOO_CHANGED_EVENT,
    ZOO_CONNECTED_STATE, ZOO_CREATED_EVENT, ZOO_EPHEMERAL, ZOO_PERM_ALL, ZOO_SEQUENCE,
    ZOO_SESSION_EVENT,
};
use zkbind::{ops, BindError, Bridge, Handle, Registry, Table, Value};
use zkbind_mem_native::{MemNative, MemNativeConfig};

const WAIT: Duration = Duration::from_secs(5);
const HOSTS: &str = "127.0.0.1:2181,127.0.0.1:2182";

fn setup_with_capacity(capacity: usize) -> (Bridge, Arc<MemNative>) {
    let native = Arc::new(MemNative::with_config(MemNativeConfig::default()).unwrap());
    let bridge = Bridge::new(native.clone(), Arc::new(Registry::new(capacity)));
    (bridge, native)
}

fn setup() -> (Bridge, Arc<MemNative>) {
    setup_with_capacity(1024)
}

fn open(bridge: &Bridge, watcher: Value, context: Value) -> Handle {
    let (rc, h) = ops::init(bridge, HOSTS, watcher, 10_000, &Value::Nil, context, 0).unwrap();
    assert_eq!(rc, ZOK);
    Handle::from_value(&h).unwrap().clone()
}

/// Function value forwarding every call's arguments to a channel.
fn recorder() -> (Value, Receiver<Vec<Value>>) {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let f = Value::function(move |args| {
        let _ = tx.lock().unwrap().send(args.to_vec());
        Ok(())
    });
    (f, rx)
}

fn open_acl() -> Value {
    acl_list_to_value(Some(Acl::open_unsafe()))
}

#[test]
fn sequential_ephemeral_create_completes_with_generated_path() {
    let (bridge, _native) = setup();
    let h = open(&bridge, Value::Nil, Value::Nil);
    let (done, calls) = recorder();
    let acl: Value = Table::from_array(vec![Value::table(
        Table::new()
            .with("perms", 31)
            .with("scheme", "world")
            .with("id", "anyone"),
    )])
    .into();
    let flags = ZOO_EPHEMERAL | ZOO_SEQUENCE;
    for _ in 0..2 {
        let rc = ops::acreate(&h, "/a", Some(b"v"), &acl, flags, &done, Value::str("payload"))
            .unwrap();
        assert_eq!(rc, ZOK);
    }
    let first = calls.recv_timeout(WAIT).unwrap();
    let second = calls.recv_timeout(WAIT).unwrap();
    assert_eq!(
        first,
        vec![Value::from(ZOK), Value::str("/a0000000000"), Value::str("payload")]
    );
    assert_eq!(
        second,
        vec![Value::from(ZOK), Value::str("/a0000000001"), Value::str("payload")]
    );
    assert_eq!(bridge.registry().live(), 0);
}

#[test]
fn process_wide_watch_stays_registered_across_events() {
    let (bridge, _native) = setup();
    let (w, events) = recorder();
    let ctx = Value::table(Table::new().with("name", "ctx"));
    let h = open(&bridge, w, ctx.clone());
    let hv = Value::Handle(h.clone());

    let connected = events.recv_timeout(WAIT).unwrap();
    assert_eq!(
        connected,
        vec![
            hv.clone(),
            Value::from(ZOO_SESSION_EVENT),
            Value::from(ZOO_CONNECTED_STATE),
            Value::str(""),
            ctx.clone()
        ]
    );

    let (rc, stat) = ops::exists(&h, "/a", true).unwrap();
    assert_eq!(rc, ZNONODE);
    assert_eq!(stat, stat_to_value(None));
    let (rc, _) = ops::create(&h, "/a", None, &open_acl(), 0).unwrap();
    assert_eq!(rc, ZOK);
    let created = events.recv_timeout(WAIT).unwrap();
    assert_eq!(
        created,
        vec![
            hv.clone(),
            Value::from(ZOO_CREATED_EVENT),
            Value::from(ZOO_CONNECTED_STATE),
            Value::str("/a"),
            ctx.clone()
        ]
    );

    let (rc, _, _) = ops::get(&h, "/a", true).unwrap();
    assert_eq!(rc, ZOK);
    assert_eq!(ops::set(&h, "/a", Some(b"x"), -1).unwrap(), ZOK);
    let changed = events.recv_timeout(WAIT).unwrap();
    assert_eq!(changed[1], Value::from(ZOO_CHANGED_EVENT));
    assert_eq!(changed[3], Value::str("/a"));
    assert!(bridge.registry().has_global_watch());
}

#[test]
fn set_watcher_replaces_the_previous_registration() {
    let (bridge, _native) = setup();
    let (first, first_events) = recorder();
    let h = open(&bridge, first, Value::Nil);
    first_events.recv_timeout(WAIT).unwrap();
    let live = bridge.registry().live();

    let (second, second_events) = recorder();
    ops::set_watcher(&h, second, Value::str("two")).unwrap();
    assert_eq!(bridge.registry().live(), live);

    ops::exists(&h, "/w", true).unwrap();
    ops::create(&h, "/w", None, &open_acl(), 0).unwrap();
    let ev = second_events.recv_timeout(WAIT).unwrap();
    assert_eq!(ev[4], Value::str("two"));
    assert!(first_events.try_recv().is_err());
}

#[test]
fn one_shot_watch_fires_once_with_its_own_callback() {
    let (bridge, _native) = setup();
    let h = open(&bridge, Value::Nil, Value::Nil);
    let (watch, fired) = recorder();
    let (rc, _) = ops::wexists(&h, "/once", watch, Value::from(7)).unwrap();
    assert_eq!(rc, ZNONODE);
    assert_eq!(bridge.registry().pending_watches(), 1);

    ops::create(&h, "/once", None, &open_acl(), 0).unwrap();
    let ev = fired.recv_timeout(WAIT).unwrap();
    assert_eq!(
        ev,
        vec![
            Value::Handle(h.clone()),
            Value::from(ZOO_CREATED_EVENT),
            Value::from(ZOO_CONNECTED_STATE),
            Value::str("/once"),
            Value::from(7)
        ]
    );
    ops::set(&h, "/once", Some(b"again"), -1).unwrap();
    assert!(fired.recv_timeout(Duration::from_millis(200)).is_err());
    assert_eq!(bridge.registry().pending_watches(), 0);
    assert_eq!(bridge.registry().live(), 0);
}

#[test]
fn close_sweeps_unfired_one_shot_watches() {
    let (bridge, native) = setup();
    let h = open(&bridge, Value::Nil, Value::Nil);
    let baseline = bridge.registry().live();

    let (watch, fired) = recorder();
    let (done, calls) = recorder();
    let wctx = Value::table(Table::new().with("k", "v"));
    let rc = ops::awexists(&h, "/never", watch, wctx, &done, Value::Nil).unwrap();
    assert_eq!(rc, ZOK);
    let result = calls.recv_timeout(WAIT).unwrap();
    assert_eq!(result[0], Value::from(ZNONODE));
    assert!(bridge.registry().live() > baseline);
    assert_eq!(native.watch_count(), 1);

    assert_eq!(ops::close(&h).unwrap(), ZOK);
    assert_eq!(bridge.registry().live(), baseline);
    assert_eq!(bridge.registry().pending_watches(), 0);
    assert_eq!(native.watch_count(), 0);
    assert!(fired.try_recv().is_err());
}

#[test]
fn read_in_flight_at_close_completes_with_closing() {
    let (bridge, _native) = setup();
    let h = open(&bridge, Value::Nil, Value::Nil);
    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    let gate_rx = Mutex::new(gate_rx);
    let closer = {
        let h = h.clone();
        Value::function(move |_| {
            let _ = gate_rx.lock().unwrap().recv();
            let _ = h.close();
            Ok(())
        })
    };
    let (done, calls) = recorder();
    assert_eq!(ops::r#async(&h, "/", &closer, Value::Nil).unwrap(), ZOK);
    assert_eq!(ops::aget(&h, "/", false, &done, Value::str("p")).unwrap(), ZOK);
    gate_tx.send(()).unwrap();

    let result = calls.recv_timeout(WAIT).unwrap();
    assert_eq!(
        result,
        vec![
            Value::from(ZCLOSING),
            Value::Nil,
            stat_to_value(None),
            Value::str("p")
        ]
    );
    assert!(h.is_closed());
    drop(closer);
    assert_eq!(bridge.registry().live(), 0);
}

#[test]
fn closed_handle_is_rejected_before_submission() {
    let (bridge, _native) = setup();
    let h = open(&bridge, Value::Nil, Value::Nil);
    assert_eq!(ops::close(&h).unwrap(), ZOK);
    assert_eq!(ops::close(&h), Err(BindError::InvalidHandle));
    assert_eq!(ops::get(&h, "/", false), Err(BindError::InvalidHandle));
    let (done, calls) = recorder();
    assert_eq!(
        ops::aget(&h, "/", false, &done, Value::Nil),
        Err(BindError::InvalidHandle)
    );
    assert_eq!(
        ops::wexists(&h, "/x", done.clone(), Value::Nil),
        Err(BindError::InvalidHandle)
    );
    assert_eq!(ops::state(&h), Err(BindError::InvalidHandle));
    assert!(calls.try_recv().is_err());
    assert_eq!(bridge.registry().live(), 0);
}

#[test]
fn malformed_acl_is_rejected_before_any_native_call() {
    let (bridge, native) = setup();
    let h = open(&bridge, Value::Nil, Value::Nil);
    let (done, calls) = recorder();
    let acl: Value = Table::from_array(vec![Value::table(
        Table::new().with("perms", 31).with("scheme", "world"),
    )])
    .into();
    let err = ops::acreate(&h, "/bad", None, &acl, 0, &done, Value::Nil).unwrap_err();
    assert!(matches!(err, BindError::InvalidArgument(_)));
    assert!(calls.try_recv().is_err());
    assert_eq!(native.node_count(), 1);
    assert_eq!(bridge.registry().live(), 0);
}

#[test]
fn completion_must_be_a_function() {
    let (bridge, _native) = setup();
    let h = open(&bridge, Value::Nil, Value::Nil);
    let err = ops::aget(&h, "/", false, &Value::from(1), Value::Nil).unwrap_err();
    assert!(matches!(err, BindError::InvalidArgument(_)));
    assert_eq!(bridge.registry().live(), 0);
}

#[test]
fn full_registry_fails_the_call() {
    let (bridge, _native) = setup_with_capacity(1);
    let h = open(&bridge, Value::Nil, Value::Nil);
    let (done, _calls) = recorder();
    let payload = Value::table(Table::new());
    assert_eq!(
        ops::aget(&h, "/", false, &done, payload),
        Err(BindError::AllocationFailure)
    );
    assert_eq!(bridge.registry().live(), 0);
}

#[test]
fn synchronous_node_operations() {
    let (bridge, _native) = setup();
    let h = open(&bridge, Value::Nil, Value::Nil);

    let (rc, path) = ops::create(&h, "/app", Some(b"cfg"), &open_acl(), 0).unwrap();
    assert_eq!((rc, path), (ZOK, Value::str("/app")));
    ops::create(&h, "/app/b", None, &open_acl(), 0).unwrap();
    ops::create(&h, "/app/a", None, &open_acl(), 0).unwrap();

    let (rc, data, stat) = ops::get(&h, "/app", false).unwrap();
    assert_eq!((rc, data), (ZOK, Value::str("cfg")));
    let stat = stat.as_table().unwrap().clone();
    assert_eq!(stat.get("dataLength"), Some(&Value::from(3)));
    assert_eq!(stat.get("numChildren"), Some(&Value::from(2)));

    let (rc, stat) = ops::set2(&h, "/app", Some(b"cfg2"), 0).unwrap();
    assert_eq!(rc, ZOK);
    assert_eq!(
        stat.as_table().unwrap().get("version"),
        Some(&Value::from(1))
    );
    assert_eq!(ops::set(&h, "/app", None, 0).unwrap(), zkbind::native::ZBADVERSION);

    let (rc, children) = ops::get_children(&h, "/app", false).unwrap();
    assert_eq!(rc, ZOK);
    assert_eq!(
        children.as_table().unwrap().array(),
        &[Value::str("a"), Value::str("b")]
    );
    let (rc, children, stat) = ops::get_children2(&h, "/app", false).unwrap();
    assert_eq!(rc, ZOK);
    assert_eq!(children.as_table().unwrap().len(), 2);
    assert_eq!(
        stat.as_table().unwrap().get("numChildren"),
        Some(&Value::from(2))
    );

    assert_eq!(ops::delete(&h, "/app", -1).unwrap(), zkbind::native::ZNOTEMPTY);
    assert_eq!(ops::delete(&h, "/app/a", -1).unwrap(), ZOK);

    let (rc, data, stat) = ops::get(&h, "/missing", false).unwrap();
    assert_eq!((rc, data), (ZNONODE, Value::Nil));
    assert_eq!(stat, stat_to_value(None));
    let (rc, children) = ops::get_children(&h, "/missing", false).unwrap();
    assert_eq!(rc, ZNONODE);
    assert_eq!(children.as_table().map(Table::len), Some(0));
}

#[test]
fn asynchronous_reads_deliver_fixed_arity() {
    let (bridge, _native) = setup();
    let h = open(&bridge, Value::Nil, Value::Nil);
    ops::create(&h, "/n", Some(b"d"), &open_acl(), 0).unwrap();
    ops::create(&h, "/n/c", None, &open_acl(), 0).unwrap();
    let (done, calls) = recorder();

    ops::aexists(&h, "/n", false, &done, Value::from(1)).unwrap();
    ops::aget(&h, "/n", false, &done, Value::from(2)).unwrap();
    ops::aget_children(&h, "/n", false, &done, Value::from(3)).unwrap();
    ops::aget_children2(&h, "/n", false, &done, Value::from(4)).unwrap();
    ops::aget_acl(&h, "/n", &done, Value::from(5)).unwrap();
    ops::r#async(&h, "/n", &done, Value::from(6)).unwrap();
    ops::aset(&h, "/n", Some(b"e"), -1, &done, Value::from(7)).unwrap();
    ops::adelete(&h, "/n/c", -1, &done, Value::from(8)).unwrap();

    let lens: Vec<(usize, Value)> = (0..8)
        .map(|_| {
            let args = calls.recv_timeout(WAIT).unwrap();
            assert_eq!(args[0], Value::from(ZOK));
            (args.len(), args.last().cloned().unwrap())
        })
        .collect();
    assert_eq!(
        lens,
        vec![
            (3, Value::from(1)),
            (4, Value::from(2)),
            (3, Value::from(3)),
            (4, Value::from(4)),
            (4, Value::from(5)),
            (3, Value::from(6)),
            (3, Value::from(7)),
            (2, Value::from(8)),
        ]
    );
    assert_eq!(bridge.registry().live(), 0);
}

#[test]
fn one_shot_child_and_data_watches() {
    let (bridge, _native) = setup();
    let h = open(&bridge, Value::Nil, Value::Nil);
    ops::create(&h, "/p", None, &open_acl(), 0).unwrap();
    let (watch, fired) = recorder();

    let (rc, _) = ops::wget_children(&h, "/p", watch.clone(), Value::from(1)).unwrap();
    assert_eq!(rc, ZOK);
    let (rc, _, _) = ops::wget(&h, "/p", watch.clone(), Value::from(2)).unwrap();
    assert_eq!(rc, ZOK);
    let (rc, _, _) = ops::wget_children2(&h, "/p", watch.clone(), Value::from(3)).unwrap();
    assert_eq!(rc, ZOK);
    assert_eq!(bridge.registry().pending_watches(), 3);

    ops::create(&h, "/p/kid", None, &open_acl(), 0).unwrap();
    let mut tags: Vec<i64> = (0..2)
        .map(|_| fired.recv_timeout(WAIT).unwrap()[4].as_integer().unwrap())
        .collect();
    tags.sort();
    assert_eq!(tags, vec![1, 3]);
    assert_eq!(bridge.registry().pending_watches(), 1);

    ops::set(&h, "/p", Some(b"x"), -1).unwrap();
    let ev = fired.recv_timeout(WAIT).unwrap();
    assert_eq!(ev[1], Value::from(ZOO_CHANGED_EVENT));
    assert_eq!(ev[4], Value::from(2));
    assert_eq!(bridge.registry().live(), 0);
}

#[test]
fn async_one_shot_variants_register_watches() {
    let (bridge, _native) = setup();
    let h = open(&bridge, Value::Nil, Value::Nil);
    ops::create(&h, "/q", None, &open_acl(), 0).unwrap();
    let (watch, fired) = recorder();
    let (done, calls) = recorder();

    ops::awget(&h, "/q", watch.clone(), Value::Nil, &done, Value::Nil).unwrap();
    ops::awget_children(&h, "/q", watch.clone(), Value::Nil, &done, Value::Nil).unwrap();
    ops::awget_children2(&h, "/q", watch.clone(), Value::Nil, &done, Value::Nil).unwrap();
    for _ in 0..3 {
        assert_eq!(calls.recv_timeout(WAIT).unwrap()[0], Value::from(ZOK));
    }
    assert_eq!(bridge.registry().pending_watches(), 3);
    ops::delete(&h, "/q", -1).unwrap();
    for _ in 0..3 {
        fired.recv_timeout(WAIT).unwrap();
    }
    assert_eq!(bridge.registry().pending_watches(), 0);
}

#[test]
fn rejected_request_releases_its_watch() {
    let (bridge, _native) = setup();
    let h = open(&bridge, Value::Nil, Value::Nil);
    let (watch, fired) = recorder();
    let (rc, _, _) = ops::wget(&h, "/absent", watch, Value::Nil).unwrap();
    assert_eq!(rc, ZNONODE);
    assert_eq!(bridge.registry().pending_watches(), 0);
    assert_eq!(bridge.registry().live(), 0);
    assert!(fired.try_recv().is_err());
}

#[test]
fn acl_get_and_set() {
    let (bridge, _native) = setup();
    let h = open(&bridge, Value::Nil, Value::Nil);
    ops::create(&h, "/guarded", None, &open_acl(), 0).unwrap();
    let read_only = acl_list_to_value(Some(Acl::read_unsafe()));
    assert_eq!(ops::set_acl(&h, "/guarded", 0, &read_only).unwrap(), ZOK);
    let (rc, acl, stat) = ops::get_acl(&h, "/guarded").unwrap();
    assert_eq!(rc, ZOK);
    assert_eq!(acl, read_only);
    assert_eq!(
        stat.as_table().unwrap().get("aversion"),
        Some(&Value::from(1))
    );
    assert_eq!(ops::set(&h, "/guarded", Some(b"x"), -1).unwrap(), ZNOAUTH);

    let (done, calls) = recorder();
    ops::aset_acl(&h, "/guarded", 1, &open_acl(), &done, Value::Nil).unwrap();
    assert_eq!(calls.recv_timeout(WAIT).unwrap()[0], Value::from(ZNOAUTH));
}

#[test]
fn add_auth_grants_access_to_creator_only_nodes() {
    let (bridge, _native) = setup();
    let alice = open(&bridge, Value::Nil, Value::Nil);
    let mallory = open(&bridge, Value::Nil, Value::Nil);

    let rc = ops::add_auth(&alice, "digest", b"alice:pw", &Value::Nil, Value::Nil).unwrap();
    assert_eq!(rc, ZOK);
    let creator = acl_list_to_value(Some(vec![Acl::new(ZOO_PERM_ALL, "auth", "")]));
    let (rc, _) = ops::create(&alice, "/secret", Some(b"s"), &creator, 0).unwrap();
    assert_eq!(rc, ZOK);

    let (rc, data, _) = ops::get(&alice, "/secret", false).unwrap();
    assert_eq!((rc, data), (ZOK, Value::str("s")));
    let (rc, data, _) = ops::get(&mallory, "/secret", false).unwrap();
    assert_eq!((rc, data), (ZNOAUTH, Value::Nil));

    let (done, calls) = recorder();
    ops::add_auth(&mallory, "digest", b"alice:pw", &done, Value::str("auth")).unwrap();
    assert_eq!(
        calls.recv_timeout(WAIT).unwrap(),
        vec![Value::from(ZOK), Value::str("auth")]
    );
    let (rc, _, _) = ops::get(&mallory, "/secret", false).unwrap();
    assert_eq!(rc, ZOK);
}

#[test]
fn session_queries_and_user_context() {
    let (bridge, native) = setup();
    let ctx = Value::table(Table::new().with("owner", "test"));
    let h = open(&bridge, Value::Nil, ctx.clone());

    assert_eq!(ops::get_context(&h).unwrap(), ctx);
    assert_eq!(bridge.registry().live(), 1);
    ops::set_context(&h, Value::from(5)).unwrap();
    assert_eq!(ops::get_context(&h).unwrap(), Value::from(5));
    ops::set_context(&h, Value::Nil).unwrap();
    assert_eq!(ops::get_context(&h).unwrap(), Value::Nil);
    assert_eq!(bridge.registry().live(), 0);

    assert_eq!(ops::recv_timeout(&h).unwrap(), 10_000);
    assert_eq!(ops::state(&h).unwrap(), ZOO_CONNECTED_STATE);
    assert_eq!(ops::is_unrecoverable(&h).unwrap(), ZOK);

    let cid = ops::client_id(&h).unwrap();
    let table = cid.as_table().unwrap();
    let session_id = table.get("client_id").and_then(Value::as_integer).unwrap();
    assert_eq!(table.get("passwd").and_then(Value::as_bytes).map(<[u8]>::len), Some(16));

    let (rc, resumed) =
        ops::init(&bridge, HOSTS, Value::Nil, 10_000, &cid, Value::Nil, 0).unwrap();
    assert_eq!(rc, ZOK);
    let resumed = Handle::from_value(&resumed).unwrap().clone();
    let resumed_id = ops::client_id(&resumed).unwrap();
    assert_eq!(
        resumed_id.as_table().unwrap().get("client_id"),
        Some(&Value::from(session_id))
    );
    assert_eq!(ops::state(&resumed).unwrap(), ZOO_CONNECTED_STATE);

    native.expire_session(session_id);
    native.flush();
    assert_eq!(ops::is_unrecoverable(&resumed).unwrap(), ZINVALIDSTATE);
}

#[test]
fn init_reports_native_failure_without_leaking() {
    let (bridge, _native) = setup();
    let (w, _events) = recorder();
    let (rc, h) = ops::init(&bridge, "nonsense", w, 10_000, &Value::Nil, Value::str("c"), 0)
        .unwrap();
    assert_eq!(rc, zkbind::native::ZBADARGUMENTS);
    assert_eq!(h, Value::Nil);
    assert!(!bridge.registry().has_global_watch());
    assert_eq!(bridge.registry().live(), 0);

    let err = ops::init(&bridge, HOSTS, Value::from(1), 10_000, &Value::Nil, Value::Nil, 0)
        .unwrap_err();
    assert!(matches!(err, BindError::InvalidArgument(_)));
}

#[test]
fn failed_init_keeps_the_live_process_wide_watch() {
    let (bridge, _native) = setup();
    let (w, events) = recorder();
    let h = open(&bridge, w, Value::str("first"));
    events.recv_timeout(WAIT).unwrap();
    let live = bridge.registry().live();

    let (w2, events2) = recorder();
    let (rc, failed) =
        ops::init(&bridge, "bogus", w2, 10_000, &Value::Nil, Value::str("second"), 0).unwrap();
    assert_eq!(rc, zkbind::native::ZBADARGUMENTS);
    assert_eq!(failed, Value::Nil);
    assert!(bridge.registry().has_global_watch());
    assert_eq!(bridge.registry().live(), live);

    ops::exists(&h, "/x", true).unwrap();
    ops::create(&h, "/x", None, &open_acl(), 0).unwrap();
    let ev = events.recv_timeout(WAIT).unwrap();
    assert_eq!(ev[0], Value::Handle(h.clone()));
    assert_eq!(ev[1], Value::from(ZOO_CREATED_EVENT));
    assert_eq!(ev[4], Value::str("first"));
    assert!(events2.try_recv().is_err());
}

#[test]
fn successful_init_releases_the_displaced_watch() {
    let (bridge, _native) = setup();
    let (w, events) = recorder();
    let first = open(&bridge, w, Value::table(Table::new()));
    events.recv_timeout(WAIT).unwrap();
    let (w2, events2) = recorder();
    let second = open(&bridge, w2, Value::Nil);
    events2.recv_timeout(WAIT).unwrap();

    ops::close(&first).unwrap();
    ops::close(&second).unwrap();
    // the slot keeps only the second registration: handle and callback
    assert_eq!(bridge.registry().live(), 2);
}

#[test]
fn full_registry_rejects_a_sole_owner_handle_value() {
    let (bridge, native) = setup_with_capacity(1);
    let h = open(&bridge, Value::Nil, Value::Nil);
    let other = open(&bridge, Value::Nil, Value::Nil);
    assert_eq!(native.live_sessions(), 2);
    let filler = bridge.registry().retain(Value::from(1)).unwrap();

    let (tx, rx) = mpsc::channel();
    let worker = {
        let h = h.clone();
        std::thread::spawn(move || {
            let _ = tx.send(ops::set_context(&h, Value::Handle(other)));
        })
    };
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), Err(BindError::AllocationFailure));
    worker.join().unwrap();
    assert_eq!(native.live_sessions(), 1);
    assert_eq!(ops::get_context(&h).unwrap(), Value::Nil);
    bridge.registry().release(filler).unwrap();
    assert_eq!(bridge.registry().live(), 0);
}

#[test]
fn set_context_racing_close_leaks_nothing() {
    let (bridge, _native) = setup();
    let h = open(&bridge, Value::Nil, Value::table(Table::new()));
    let writers: Vec<_> = (0..4)
        .map(|_| {
            let h = h.clone();
            std::thread::spawn(move || {
                for i in 0..200 {
                    let ctx = Value::table(Table::new().with("i", i));
                    if ops::set_context(&h, ctx).is_err() {
                        break;
                    }
                }
            })
        })
        .collect();
    std::thread::sleep(Duration::from_millis(2));
    assert_eq!(ops::close(&h).unwrap(), ZOK);
    for w in writers {
        w.join().unwrap();
    }
    assert_eq!(
        ops::set_context(&h, Value::table(Table::new())),
        Err(BindError::InvalidHandle)
    );
    assert_eq!(bridge.registry().live(), 0);
}

#[test]
fn deterministic_connection_order_toggle() {
    let (bridge, _native) = setup();
    assert_eq!(ops::deterministic_conn_order(&bridge, "YES"), Ok(true));
    let h = open(&bridge, Value::Nil, Value::Nil);
    assert_eq!(
        ops::get_connected_host(&h).unwrap(),
        Value::str("127.0.0.1:2181")
    );
    assert_eq!(ops::deterministic_conn_order(&bridge, "off"), Ok(false));
    assert_eq!(ops::deterministic_conn_order(&bridge, "0"), Ok(false));
    assert!(matches!(
        ops::deterministic_conn_order(&bridge, "maybe"),
        Err(BindError::InvalidArgument(_))
    ));
    ops::close(&h).unwrap();
}

#[test]
fn synchronous_call_from_a_callback_is_refused() {
    let (bridge, _native) = setup();
    let h = open(&bridge, Value::Nil, Value::Nil);
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let inner = h.clone();
    let cb = Value::function(move |_| {
        let (rc, _, _) = ops::get(&inner, "/", false).map_err(|e| zkbind::CallError(e.to_string()))?;
        let _ = tx.lock().unwrap().send(rc);
        Ok(())
    });
    ops::r#async(&h, "/", &cb, Value::Nil).unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), ZAPIERROR);
    drop(cb);
    assert_eq!(bridge.registry().live(), 0);
}

#[test]
fn callback_errors_are_contained() {
    let (bridge, _native) = setup();
    let h = open(&bridge, Value::Nil, Value::Nil);
    let boom = Value::function(|_| Err(zkbind::CallError("boom".to_string())));
    ops::aexists(&h, "/", false, &boom, Value::Nil).unwrap();
    let (done, calls) = recorder();
    ops::aexists(&h, "/", false, &done, Value::Nil).unwrap();
    assert_eq!(calls.recv_timeout(WAIT).unwrap()[0], Value::from(ZOK));
    assert_eq!(bridge.registry().live(), 0);
}

static NODE: AtomicUsize = AtomicUsize::new(0);

fn arb_acl() -> impl Strategy<Value = Acl> {
    (1i32..=31, "[a-z]{1,8}", "[a-zA-Z0-9:._-]{0,16}")
        .prop_filter("auth is rewritten by the server", |(_, scheme, _)| {
            scheme != "auth"
        })
        .prop_map(|(perms, scheme, id)| Acl { perms, scheme, id })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn acl_lists_survive_a_native_round_trip(
        acl in proptest::collection::vec(arb_acl(), 1..6)
    ) {
        let (bridge, _native) = setup();
        let h = open(&bridge, Value::Nil, Value::Nil);
        let path = format!("/acl{}", NODE.fetch_add(1, Ordering::Relaxed));
        let managed = acl_list_to_value(Some(acl.clone()));
        let (rc, _) = ops::create(&h, &path, None, &managed, 0).unwrap();
        prop_assert_eq!(rc, ZOK);
        let (rc, back, _) = ops::get_acl(&h, &path).unwrap();
        prop_assert_eq!(rc, ZOK);
        prop_assert_eq!(zkbind::marshal::parse_acl_list(&back).unwrap(), acl);
        ops::close(&h).unwrap();
    }
}
