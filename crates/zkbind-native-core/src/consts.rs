pub const ZOK: i32 = 0;

pub const ZSYSTEMERROR: i32 = -1;
pub const ZRUNTIMEINCONSISTENCY: i32 = -2;
pub const ZDATAINCONSISTENCY: i32 = -3;
pub const ZCONNECTIONLOSS: i32 = -4;
pub const ZMARSHALLINGERROR: i32 = -5;
pub const ZUNIMPLEMENTED: i32 = -6;
pub const ZOPERATIONTIMEOUT: i32 = -7;
pub const ZBADARGUMENTS: i32 = -8;
pub const ZINVALIDSTATE: i32 = -9;

pub const ZAPIERROR: i32 = -100;
pub const ZNONODE: i32 = -101;
pub const ZNOAUTH: i32 = -102;
pub const ZBADVERSION: i32 = -103;
pub const ZNOCHILDRENFOREPHEMERALS: i32 = -108;
pub const ZNODEEXISTS: i32 = -110;
pub const ZNOTEMPTY: i32 = -111;
pub const ZSESSIONEXPIRED: i32 = -112;
pub const ZINVALIDCALLBACK: i32 = -113;
pub const ZINVALIDACL: i32 = -114;
pub const ZAUTHFAILED: i32 = -115;
pub const ZCLOSING: i32 = -116;
pub const ZNOTHING: i32 = -117;
pub const ZSESSIONMOVED: i32 = -118;

pub const ZOO_PERM_READ: i32 = 1 << 0;
pub const ZOO_PERM_WRITE: i32 = 1 << 1;
pub const ZOO_PERM_CREATE: i32 = 1 << 2;
pub const ZOO_PERM_DELETE: i32 = 1 << 3;
pub const ZOO_PERM_ADMIN: i32 = 1 << 4;
pub const ZOO_PERM_ALL: i32 = 0x1f;

pub const ZOO_LOG_LEVEL_ERROR: i32 = 1;
pub const ZOO_LOG_LEVEL_WARN: i32 = 2;
pub const ZOO_LOG_LEVEL_INFO: i32 = 3;
pub const ZOO_LOG_LEVEL_DEBUG: i32 = 4;

pub const ZOOKEEPER_WRITE: i32 = 1 << 0;
pub const ZOOKEEPER_READ: i32 = 1 << 1;

pub const ZOO_EPHEMERAL: i32 = 1 << 0;
pub const ZOO_SEQUENCE: i32 = 1 << 1;

pub const ZOO_EXPIRED_SESSION_STATE: i32 = -112;
pub const ZOO_AUTH_FAILED_STATE: i32 = -113;
pub const ZOO_CONNECTING_STATE: i32 = 1;
pub const ZOO_ASSOCIATING_STATE: i32 = 2;
pub const ZOO_CONNECTED_STATE: i32 = 3;

pub const ZOO_CREATED_EVENT: i32 = 1;
pub const ZOO_DELETED_EVENT: i32 = 2;
pub const ZOO_CHANGED_EVENT: i32 = 3;
pub const ZOO_CHILD_EVENT: i32 = 4;
pub const ZOO_SESSION_EVENT: i32 = -1;
pub const ZOO_NOTWATCHING_EVENT: i32 = -2;

/// Every exported integer constant, by the name the scripting side sees.
pub const NAMED_CONSTANTS: &[(&str, i32)] = &[
    ("ZOK", ZOK),
    ("ZSYSTEMERROR", ZSYSTEMERROR),
    ("ZRUNTIMEINCONSISTENCY", ZRUNTIMEINCONSISTENCY),
    ("ZDATAINCONSISTENCY", ZDATAINCONSISTENCY),
    ("ZCONNECTIONLOSS", ZCONNECTIONLOSS),
    ("ZMARSHALLINGERROR", ZMARSHALLINGERROR),
    ("ZUNIMPLEMENTED", ZUNIMPLEMENTED),
    ("ZOPERATIONTIMEOUT", ZOPERATIONTIMEOUT),
    ("ZBADARGUMENTS", ZBADARGUMENTS),
    ("ZINVALIDSTATE", ZINVALIDSTATE),
    ("ZAPIERROR", ZAPIERROR),
    ("ZNONODE", ZNONODE),
    ("ZNOAUTH", ZNOAUTH),
    ("ZBADVERSION", ZBADVERSION),
    ("ZNOCHILDRENFOREPHEMERALS", ZNOCHILDRENFOREPHEMERALS),
    ("ZNODEEXISTS", ZNODEEXISTS),
    ("ZNOTEMPTY", ZNOTEMPTY),
    ("ZSESSIONEXPIRED", ZSESSIONEXPIRED),
    ("ZINVALIDCALLBACK", ZINVALIDCALLBACK),
    ("ZINVALIDACL", ZINVALIDACL),
    ("ZAUTHFAILED", ZAUTHFAILED),
    ("ZCLOSING", ZCLOSING),
    ("ZNOTHING", ZNOTHING),
    ("ZSESSIONMOVED", ZSESSIONMOVED),
    ("ZOO_PERM_READ", ZOO_PERM_READ),
    ("ZOO_PERM_WRITE", ZOO_PERM_WRITE),
    ("ZOO_PERM_CREATE", ZOO_PERM_CREATE),
    ("ZOO_PERM_DELETE", ZOO_PERM_DELETE),
    ("ZOO_PERM_ADMIN", ZOO_PERM_ADMIN),
    ("ZOO_PERM_ALL", ZOO_PERM_ALL),
    ("ZOO_LOG_LEVEL_ERROR", ZOO_LOG_LEVEL_ERROR),
    ("ZOO_LOG_LEVEL_WARN", ZOO_LOG_LEVEL_WARN),
    ("ZOO_LOG_LEVEL_INFO", ZOO_LOG_LEVEL_INFO),
    ("ZOO_LOG_LEVEL_DEBUG", ZOO_LOG_LEVEL_DEBUG),
    ("ZOOKEEPER_WRITE", ZOOKEEPER_WRITE),
    ("ZOOKEEPER_READ", ZOOKEEPER_READ),
    ("ZOO_EPHEMERAL", ZOO_EPHEMERAL),
    ("ZOO_SEQUENCE", ZOO_SEQUENCE),
    ("ZOO_EXPIRED_SESSION_STATE", ZOO_EXPIRED_SESSION_STATE),
    ("ZOO_AUTH_FAILED_STATE", ZOO_AUTH_FAILED_STATE),
    ("ZOO_CONNECTING_STATE", ZOO_CONNECTING_STATE),
    ("ZOO_ASSOCIATING_STATE", ZOO_ASSOCIATING_STATE),
    ("ZOO_CONNECTED_STATE", ZOO_CONNECTED_STATE),
    ("ZOO_CREATED_EVENT", ZOO_CREATED_EVENT),
    ("ZOO_DELETED_EVENT", ZOO_DELETED_EVENT),
    ("ZOO_CHANGED_EVENT", ZOO_CHANGED_EVENT),
    ("ZOO_CHILD_EVENT", ZOO_CHILD_EVENT),
    ("ZOO_SESSION_EVENT", ZOO_SESSION_EVENT),
    ("ZOO_NOTWATCHING_EVENT", ZOO_NOTWATCHING_EVENT),
];

pub fn zerror(code: i32) -> &'static str {
    match code {
        ZOK => "ok",
        ZSYSTEMERROR => "system error",
        ZRUNTIMEINCONSISTENCY => "run time inconsistency",
        ZDATAINCONSISTENCY => "data inconsistency",
        ZCONNECTIONLOSS => "connection loss",
        ZMARSHALLINGERROR => "marshalling error",
        ZUNIMPLEMENTED => "unimplemented",
        ZOPERATIONTIMEOUT => "operation timeout",
        ZBADARGUMENTS => "bad arguments",
        ZINVALIDSTATE => "invalid zhandle state",
        ZAPIERROR => "api error",
        ZNONODE => "no node",
        ZNOAUTH => "not authenticated",
        ZBADVERSION => "bad version",
        ZNOCHILDRENFOREPHEMERALS => "no children for ephemerals",
        ZNODEEXISTS => "node exists",
        ZNOTEMPTY => "not empty",
        ZSESSIONEXPIRED => "session expired",
        ZINVALIDCALLBACK => "invalid callback",
        ZINVALIDACL => "invalid acl",
        ZAUTHFAILED => "authentication failed",
        ZCLOSING => "zookeeper is closing",
        ZNOTHING => "(not error) no server responses to process",
        ZSESSIONMOVED => "session moved to another server, so operation is ignored",
        _ => "unknown error",
    }
}

pub fn state_name(state: i32) -> &'static str {
    match state {
        0 => "CLOSED_STATE",
        ZOO_CONNECTING_STATE => "CONNECTING_STATE",
        ZOO_ASSOCIATING_STATE => "ASSOCIATING_STATE",
        ZOO_CONNECTED_STATE => "CONNECTED_STATE",
        ZOO_EXPIRED_SESSION_STATE => "EXPIRED_SESSION_STATE",
        ZOO_AUTH_FAILED_STATE => "AUTH_FAILED_STATE",
        _ => "INVALID_STATE",
    }
}

pub fn event_name(event_type: i32) -> &'static str {
    match event_type {
        ZOO_CREATED_EVENT => "CREATED_EVENT",
        ZOO_DELETED_EVENT => "DELETED_EVENT",
        ZOO_CHANGED_EVENT => "CHANGED_EVENT",
        ZOO_CHILD_EVENT => "CHILD_EVENT",
        ZOO_SESSION_EVENT => "SESSION_EVENT",
        ZOO_NOTWATCHING_EVENT => "NOTWATCHING_EVENT",
        _ => "UNKNOWN_EVENT_TYPE",
    }
}
