use crate::consts::{ZOO_PERM_ALL, ZOO_PERM_READ};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeStat {
    pub czxid: i64,
    pub mzxid: i64,
    pub ctime: i64,
    pub mtime: i64,
    pub version: i32,
    pub cversion: i32,
    pub aversion: i32,
    pub ephemeral_owner: i64,
    pub data_length: i32,
    pub num_children: i32,
    pub pzxid: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acl {
    pub perms: i32,
    pub scheme: String,
    pub id: String,
}

impl Acl {
    pub fn new(perms: i32, scheme: &str, id: &str) -> Acl {
        Acl {
            perms,
            scheme: scheme.to_string(),
            id: id.to_string(),
        }
    }

    pub fn open_unsafe() -> Vec<Acl> {
        vec![Acl::new(ZOO_PERM_ALL, "world", "anyone")]
    }

    pub fn read_unsafe() -> Vec<Acl> {
        vec![Acl::new(ZOO_PERM_READ, "world", "anyone")]
    }

    pub fn creator_all() -> Vec<Acl> {
        vec![Acl::new(ZOO_PERM_ALL, "auth", "")]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientId {
    pub session_id: i64,
    pub passwd: Vec<u8>,
}

pub const CLIENT_PASSWD_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedEvent {
    pub event_type: i32,
    pub state: i32,
    pub path: String,
}
