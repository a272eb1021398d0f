use std::collections::{BTreeSet, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

use zkbind_native_core::{
    Acl, NodeStat, ZBADARGUMENTS, ZBADVERSION, ZINVALIDACL, ZNOAUTH, ZNOCHILDRENFOREPHEMERALS,
    ZNODEEXISTS, ZNONODE, ZNOTEMPTY, ZOO_CHANGED_EVENT, ZOO_CHILD_EVENT, ZOO_CREATED_EVENT,
    ZOO_DELETED_EVENT, ZOO_EPHEMERAL, ZOO_PERM_ADMIN, ZOO_PERM_CREATE, ZOO_PERM_DELETE,
    ZOO_PERM_READ, ZOO_PERM_WRITE, ZOO_SEQUENCE,
};

/// A change that may trigger watches: `(server path, event type)`.
pub(crate) type Change = (String, i32);

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub data: Vec<u8>,
    pub acl: Vec<Acl>,
    pub stat: NodeStat,
    pub children: BTreeSet<String>,
}

/// Credentials a session presented through `add_auth`.
pub(crate) type Auths = [(String, Vec<u8>)];

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub(crate) fn validate_path(path: &str, sequential: bool) -> Result<(), i32> {
    if path.is_empty() || !path.starts_with('/') {
        return Err(ZBADARGUMENTS);
    }
    if path.len() == 1 {
        return Ok(());
    }
    if path.ends_with('/') && !sequential {
        return Err(ZBADARGUMENTS);
    }
    if path.contains('\0') {
        return Err(ZBADARGUMENTS);
    }
    let body = if sequential && path.ends_with('/') {
        &path[1..path.len() - 1]
    } else {
        &path[1..]
    };
    if body.is_empty() {
        return Ok(());
    }
    for seg in body.split('/') {
        if seg.is_empty() || seg == "." || seg == ".." {
            return Err(ZBADARGUMENTS);
        }
    }
    Ok(())
}

pub(crate) fn parent_of(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

fn leaf_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

fn acl_entry_matches(entry: &Acl, auths: &Auths) -> bool {
    if entry.scheme == "world" && entry.id == "anyone" {
        return true;
    }
    auths
        .iter()
        .any(|(scheme, cert)| scheme == &entry.scheme && cert.as_slice() == entry.id.as_bytes())
}

pub(crate) fn check_perm(acl: &[Acl], perm: i32, auths: &Auths) -> Result<(), i32> {
    if acl
        .iter()
        .any(|e| (e.perms & perm) != 0 && acl_entry_matches(e, auths))
    {
        return Ok(());
    }
    Err(ZNOAUTH)
}

/// Replaces `auth` entries with the caller's identities, the way a server
/// stores ACLs written as "whoever created this".
pub(crate) fn fix_acl(acl: &[Acl], auths: &Auths) -> Result<Vec<Acl>, i32> {
    if acl.is_empty() {
        return Err(ZINVALIDACL);
    }
    let mut out = Vec::with_capacity(acl.len());
    for entry in acl {
        if entry.perms & !0x1f != 0 || entry.scheme.is_empty() {
            return Err(ZINVALIDACL);
        }
        if entry.scheme != "auth" {
            out.push(entry.clone());
            continue;
        }
        if auths.is_empty() {
            return Err(ZINVALIDACL);
        }
        for (scheme, cert) in auths {
            out.push(Acl {
                perms: entry.perms,
                scheme: scheme.clone(),
                id: String::from_utf8_lossy(cert).into_owned(),
            });
        }
    }
    Ok(out)
}

pub(crate) struct DataTree {
    nodes: HashMap<String, Node>,
    zxid: i64,
}

impl DataTree {
    pub(crate) fn new() -> DataTree {
        let mut nodes = HashMap::new();
        nodes.insert(
            "/".to_string(),
            Node {
                data: Vec::new(),
                acl: Acl::open_unsafe(),
                stat: NodeStat::default(),
                children: BTreeSet::new(),
            },
        );
        DataTree { nodes, zxid: 0 }
    }

    fn next_zxid(&mut self) -> i64 {
        self.zxid += 1;
        self.zxid
    }

    pub(crate) fn node(&self, path: &str) -> Option<&Node> {
        self.nodes.get(path)
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn create(
        &mut self,
        path: &str,
        data: Vec<u8>,
        acl: &[Acl],
        flags: i32,
        owner: i64,
        auths: &Auths,
        changes: &mut Vec<Change>,
    ) -> Result<String, i32> {
        let sequential = flags & ZOO_SEQUENCE != 0;
        validate_path(path, sequential)?;
        if path == "/" && !sequential {
            return Err(ZNODEEXISTS);
        }
        let parent_path = if sequential && path.ends_with('/') {
            path.trim_end_matches('/')
        } else {
            parent_of(path).ok_or(ZBADARGUMENTS)?
        };
        let parent_path = if parent_path.is_empty() {
            "/"
        } else {
            parent_path
        };
        let acl = fix_acl(acl, auths)?;

        let parent = self.nodes.get(parent_path).ok_or(ZNONODE)?;
        check_perm(&parent.acl, ZOO_PERM_CREATE, auths)?;
        if parent.stat.ephemeral_owner != 0 {
            return Err(ZNOCHILDRENFOREPHEMERALS);
        }

        let full = if sequential {
            format!("{path}{:010}", parent.stat.cversion)
        } else {
            path.to_string()
        };
        if self.nodes.contains_key(&full) {
            return Err(ZNODEEXISTS);
        }

        let zxid = self.next_zxid();
        let now = now_ms();
        let ephemeral_owner = if flags & ZOO_EPHEMERAL != 0 { owner } else { 0 };
        let stat = NodeStat {
            czxid: zxid,
            mzxid: zxid,
            ctime: now,
            mtime: now,
            version: 0,
            cversion: 0,
            aversion: 0,
            ephemeral_owner,
            data_length: data.len() as i32,
            num_children: 0,
            pzxid: zxid,
        };

        let leaf = leaf_of(&full).to_string();
        if let Some(parent) = self.nodes.get_mut(parent_path) {
            parent.children.insert(leaf);
            parent.stat.cversion += 1;
            parent.stat.pzxid = zxid;
            parent.stat.num_children = parent.children.len() as i32;
        }
        self.nodes.insert(
            full.clone(),
            Node {
                data,
                acl,
                stat,
                children: BTreeSet::new(),
            },
        );

        changes.push((full.clone(), ZOO_CREATED_EVENT));
        changes.push((parent_path.to_string(), ZOO_CHILD_EVENT));
        Ok(full)
    }

    pub(crate) fn delete(
        &mut self,
        path: &str,
        version: i32,
        auths: &Auths,
        changes: &mut Vec<Change>,
    ) -> Result<(), i32> {
        validate_path(path, false)?;
        if path == "/" {
            return Err(ZBADARGUMENTS);
        }
        let parent_path = parent_of(path).ok_or(ZBADARGUMENTS)?.to_string();
        let parent = self.nodes.get(&parent_path).ok_or(ZNONODE)?;
        let node = self.nodes.get(path).ok_or(ZNONODE)?;
        check_perm(&parent.acl, ZOO_PERM_DELETE, auths)?;
        if version != -1 && node.stat.version != version {
            return Err(ZBADVERSION);
        }
        if !node.children.is_empty() {
            return Err(ZNOTEMPTY);
        }
        self.remove_leaf(path, &parent_path, changes);
        Ok(())
    }

    fn remove_leaf(&mut self, path: &str, parent_path: &str, changes: &mut Vec<Change>) {
        let zxid = self.next_zxid();
        self.nodes.remove(path);
        if let Some(parent) = self.nodes.get_mut(parent_path) {
            parent.children.remove(leaf_of(path));
            parent.stat.cversion += 1;
            parent.stat.pzxid = zxid;
            parent.stat.num_children = parent.children.len() as i32;
        }
        changes.push((path.to_string(), ZOO_DELETED_EVENT));
        changes.push((parent_path.to_string(), ZOO_CHILD_EVENT));
    }

    pub(crate) fn get(&self, path: &str, auths: &Auths) -> Result<(Vec<u8>, NodeStat), i32> {
        validate_path(path, false)?;
        let node = self.nodes.get(path).ok_or(ZNONODE)?;
        check_perm(&node.acl, ZOO_PERM_READ, auths)?;
        Ok((node.data.clone(), node.stat))
    }

    pub(crate) fn exists(&self, path: &str) -> Result<NodeStat, i32> {
        validate_path(path, false)?;
        self.nodes.get(path).map(|n| n.stat).ok_or(ZNONODE)
    }

    pub(crate) fn set(
        &mut self,
        path: &str,
        data: Vec<u8>,
        version: i32,
        auths: &Auths,
        changes: &mut Vec<Change>,
    ) -> Result<NodeStat, i32> {
        validate_path(path, false)?;
        let node = self.nodes.get(path).ok_or(ZNONODE)?;
        check_perm(&node.acl, ZOO_PERM_WRITE, auths)?;
        if version != -1 && node.stat.version != version {
            return Err(ZBADVERSION);
        }
        let zxid = self.next_zxid();
        let node = self.nodes.get_mut(path).ok_or(ZNONODE)?;
        node.stat.version += 1;
        node.stat.mzxid = zxid;
        node.stat.mtime = now_ms();
        node.stat.data_length = data.len() as i32;
        node.data = data;
        changes.push((path.to_string(), ZOO_CHANGED_EVENT));
        Ok(node.stat)
    }

    pub(crate) fn children(
        &self,
        path: &str,
        auths: &Auths,
    ) -> Result<(Vec<String>, NodeStat), i32> {
        validate_path(path, false)?;
        let node = self.nodes.get(path).ok_or(ZNONODE)?;
        check_perm(&node.acl, ZOO_PERM_READ, auths)?;
        Ok((node.children.iter().cloned().collect(), node.stat))
    }

    pub(crate) fn get_acl(&self, path: &str) -> Result<(Vec<Acl>, NodeStat), i32> {
        validate_path(path, false)?;
        let node = self.nodes.get(path).ok_or(ZNONODE)?;
        Ok((node.acl.clone(), node.stat))
    }

    pub(crate) fn set_acl(
        &mut self,
        path: &str,
        version: i32,
        acl: &[Acl],
        auths: &Auths,
    ) -> Result<NodeStat, i32> {
        validate_path(path, false)?;
        let node = self.nodes.get(path).ok_or(ZNONODE)?;
        check_perm(&node.acl, ZOO_PERM_ADMIN, auths)?;
        if version != -1 && node.stat.aversion != version {
            return Err(ZBADVERSION);
        }
        let acl = fix_acl(acl, auths)?;
        self.next_zxid();
        let node = self.nodes.get_mut(path).ok_or(ZNONODE)?;
        node.acl = acl;
        node.stat.aversion += 1;
        Ok(node.stat)
    }

    /// Removes every ephemeral node owned by `session_id`.
    pub(crate) fn purge_ephemerals(&mut self, session_id: i64, changes: &mut Vec<Change>) {
        let mut owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.stat.ephemeral_owner == session_id)
            .map(|(p, _)| p.clone())
            .collect();
        owned.sort();
        for path in owned {
            let Some(parent_path) = parent_of(&path).map(str::to_string) else {
                continue;
            };
            self.remove_leaf(&path, &parent_path, changes);
        }
    }
}
