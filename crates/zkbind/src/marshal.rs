use zkbind_native_core::{Acl, ClientId, NativeResult, NodeStat};

use crate::error::BindError;
use crate::value::{Table, Value};

pub const STAT_FIELDS: [&str; 11] = [
    "czxid",
    "mzxid",
    "ctime",
    "mtime",
    "version",
    "cversion",
    "aversion",
    "ephemeralOwner",
    "dataLength",
    "numChildren",
    "pzxid",
];

/// A missing stat becomes the all-zero record, never nil.
pub fn stat_to_value(stat: Option<&NodeStat>) -> Value {
    let s = stat.copied().unwrap_or_default();
    Table::new()
        .with("czxid", s.czxid)
        .with("mzxid", s.mzxid)
        .with("ctime", s.ctime)
        .with("mtime", s.mtime)
        .with("version", s.version)
        .with("cversion", s.cversion)
        .with("aversion", s.aversion)
        .with("ephemeralOwner", s.ephemeral_owner)
        .with("dataLength", s.data_length)
        .with("numChildren", s.num_children)
        .with("pzxid", s.pzxid)
        .into()
}

fn int_field(t: &Table, name: &str) -> Result<i64, BindError> {
    match t.get(name) {
        Some(Value::Integer(n)) => Ok(*n),
        Some(other) => Err(BindError::arg(format!(
            "field {name:?} must be an integer, got {}",
            other.type_name()
        ))),
        None => Err(BindError::arg(format!("missing field {name:?}"))),
    }
}

fn i32_field(t: &Table, name: &str) -> Result<i32, BindError> {
    let n = int_field(t, name)?;
    i32::try_from(n).map_err(|_| BindError::arg(format!("field {name:?} out of range: {n}")))
}

fn str_field(t: &Table, name: &str) -> Result<String, BindError> {
    match t.get(name) {
        Some(Value::String(b)) => String::from_utf8(b.clone())
            .map_err(|_| BindError::arg(format!("field {name:?} is not valid UTF-8"))),
        Some(other) => Err(BindError::arg(format!(
            "field {name:?} must be a string, got {}",
            other.type_name()
        ))),
        None => Err(BindError::arg(format!("missing field {name:?}"))),
    }
}

pub fn stat_from_value(v: &Value) -> Result<NodeStat, BindError> {
    let t = v
        .as_table()
        .ok_or_else(|| BindError::arg(format!("stat must be a table, got {}", v.type_name())))?;
    Ok(NodeStat {
        czxid: int_field(t, "czxid")?,
        mzxid: int_field(t, "mzxid")?,
        ctime: int_field(t, "ctime")?,
        mtime: int_field(t, "mtime")?,
        version: i32_field(t, "version")?,
        cversion: i32_field(t, "cversion")?,
        aversion: i32_field(t, "aversion")?,
        ephemeral_owner: int_field(t, "ephemeralOwner")?,
        data_length: i32_field(t, "dataLength")?,
        num_children: i32_field(t, "numChildren")?,
        pzxid: int_field(t, "pzxid")?,
    })
}

pub fn strings_to_value(strings: Option<Vec<String>>) -> Value {
    let array: Vec<Value> = strings
        .unwrap_or_default()
        .into_iter()
        .map(Value::from)
        .collect();
    Table::from_array(array).into()
}

pub fn acl_list_to_value(acl: Option<Vec<Acl>>) -> Value {
    let array: Vec<Value> = acl
        .unwrap_or_default()
        .into_iter()
        .map(|a| {
            Value::table(
                Table::new()
                    .with("perms", a.perms)
                    .with("scheme", a.scheme)
                    .with("id", a.id),
            )
        })
        .collect();
    Table::from_array(array).into()
}

/// Parses a managed ACL list. Nothing is handed to the native layer when
/// any entry is malformed.
pub fn parse_acl_list(v: &Value) -> Result<Vec<Acl>, BindError> {
    let t = v
        .as_table()
        .ok_or_else(|| BindError::arg(format!("acl must be a table, got {}", v.type_name())))?;
    let mut out = Vec::with_capacity(t.len());
    for (i, entry) in t.array().iter().enumerate() {
        let e = entry.as_table().ok_or_else(|| {
            BindError::arg(format!(
                "acl entry {} must be a table, got {}",
                i + 1,
                entry.type_name()
            ))
        })?;
        out.push(Acl {
            perms: i32_field(e, "perms")?,
            scheme: str_field(e, "scheme")?,
            id: str_field(e, "id")?,
        });
    }
    Ok(out)
}

pub fn bytes_to_value(bytes: Option<Vec<u8>>) -> Value {
    match bytes {
        Some(b) => Value::String(b),
        None => Value::Nil,
    }
}

pub fn client_id_to_value(cid: &ClientId) -> Value {
    Table::new()
        .with("client_id", cid.session_id)
        .with("passwd", Value::String(cid.passwd.clone()))
        .into()
}

/// Nil means "no previous session".
pub fn client_id_from_value(v: &Value) -> Result<Option<ClientId>, BindError> {
    if v.is_nil() {
        return Ok(None);
    }
    let t = v.as_table().ok_or_else(|| {
        BindError::arg(format!("client id must be a table, got {}", v.type_name()))
    })?;
    let passwd = match t.get("passwd") {
        Some(Value::String(b)) => b.clone(),
        Some(other) => {
            return Err(BindError::arg(format!(
                "field \"passwd\" must be a string, got {}",
                other.type_name()
            )))
        }
        None => Vec::new(),
    };
    Ok(Some(ClientId {
        session_id: int_field(t, "client_id")?,
        passwd,
    }))
}

/// Call arguments for a delivered result: the status code followed by the
/// fixed set of values for its shape.
pub fn result_args(rc: i32, result: NativeResult) -> Vec<Value> {
    let mut args = vec![Value::from(rc)];
    match result {
        NativeResult::Void => {}
        NativeResult::Stat(stat) => args.push(stat_to_value(stat.as_ref())),
        NativeResult::Data(data, stat) => {
            args.push(bytes_to_value(data));
            args.push(stat_to_value(stat.as_ref()));
        }
        NativeResult::Children(names) => args.push(strings_to_value(names)),
        NativeResult::ChildrenStat(names, stat) => {
            args.push(strings_to_value(names));
            args.push(stat_to_value(stat.as_ref()));
        }
        NativeResult::String(s) => args.push(s.map(Value::from).unwrap_or_default()),
        NativeResult::Acl(acl, stat) => {
            args.push(acl_list_to_value(acl));
            args.push(stat_to_value(stat.as_ref()));
        }
    }
    args
}
