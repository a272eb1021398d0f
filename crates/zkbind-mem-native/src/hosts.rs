use std::net::{SocketAddr, ToSocketAddrs};

use zkbind_native_core::ZBADARGUMENTS;

use crate::tree::validate_path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HostList {
    pub addrs: Vec<SocketAddr>,
    pub chroot: Option<String>,
}

impl HostList {
    pub(crate) fn pick(&self, deterministic: bool, session_id: i64) -> Option<SocketAddr> {
        if self.addrs.is_empty() {
            return None;
        }
        let idx = if deterministic {
            0
        } else {
            (session_id.unsigned_abs() % self.addrs.len() as u64) as usize
        };
        self.addrs.get(idx).copied()
    }

    /// Maps a client path into the server namespace.
    pub(crate) fn prepend(&self, path: &str) -> String {
        match &self.chroot {
            None => path.to_string(),
            Some(root) if path == "/" => root.clone(),
            Some(root) => format!("{root}{path}"),
        }
    }

    /// Like `prepend`, but a sequential create of the client root keeps a
    /// trailing slash so the counter becomes a child name.
    pub(crate) fn prepend_create(&self, path: &str, sequential: bool) -> String {
        match &self.chroot {
            Some(root) if sequential && path == "/" => format!("{root}/"),
            _ => self.prepend(path),
        }
    }

    /// Maps a server path back into the client namespace.
    pub(crate) fn strip(&self, path: &str) -> String {
        let Some(root) = &self.chroot else {
            return path.to_string();
        };
        match path.strip_prefix(root.as_str()) {
            Some("") => "/".to_string(),
            Some(rest) if rest.starts_with('/') => rest.to_string(),
            _ => path.to_string(),
        }
    }
}

fn resolve_one(entry: &str) -> Result<Vec<SocketAddr>, i32> {
    if let Ok(addr) = entry.parse::<SocketAddr>() {
        return Ok(vec![addr]);
    }
    let (host, port) = entry.rsplit_once(':').ok_or(ZBADARGUMENTS)?;
    let port = port.parse::<u16>().map_err(|_| ZBADARGUMENTS)?;
    if host.is_empty() || port == 0 {
        return Err(ZBADARGUMENTS);
    }
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|_| ZBADARGUMENTS)?
        .collect();
    if addrs.is_empty() {
        return Err(ZBADARGUMENTS);
    }
    Ok(addrs)
}

/// Parses `host:port[,host:port...][/chroot]`.
pub(crate) fn parse_hosts(spec: &str) -> Result<HostList, i32> {
    let spec = spec.trim();
    let (hosts, chroot) = match spec.find('/') {
        Some(idx) => (&spec[..idx], Some(&spec[idx..])),
        None => (spec, None),
    };

    let chroot = match chroot {
        None | Some("/") => None,
        Some(root) => {
            validate_path(root, false)?;
            Some(root.to_string())
        }
    };

    let mut addrs = Vec::new();
    for entry in hosts.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        addrs.extend(resolve_one(entry)?);
    }
    if addrs.is_empty() {
        return Err(ZBADARGUMENTS);
    }
    Ok(HostList { addrs, chroot })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_list_with_chroot() {
        let hl = parse_hosts("127.0.0.1:2181,127.0.0.2:2182/app/one").expect("parse");
        assert_eq!(hl.addrs.len(), 2);
        assert_eq!(hl.chroot.as_deref(), Some("/app/one"));
        assert_eq!(hl.prepend("/"), "/app/one");
        assert_eq!(hl.prepend("/x"), "/app/one/x");
        assert_eq!(hl.strip("/app/one"), "/");
        assert_eq!(hl.strip("/app/one/x"), "/x");
    }

    #[test]
    fn sequential_root_create_under_chroot_names_a_child() {
        let hl = parse_hosts("127.0.0.1:2181/app").expect("parse");
        assert_eq!(hl.prepend_create("/", true), "/app/");
        assert_eq!(hl.prepend_create("/", false), "/app");
        assert_eq!(hl.prepend_create("/job-", true), "/app/job-");
        assert_eq!(hl.strip("/app/0000000000"), "/0000000000");
    }

    #[test]
    fn root_chroot_is_ignored() {
        let hl = parse_hosts("127.0.0.1:2181/").expect("parse");
        assert_eq!(hl.chroot, None);
        assert_eq!(hl.prepend("/a"), "/a");
    }

    #[test]
    fn rejects_malformed_specs() {
        assert_eq!(parse_hosts(""), Err(ZBADARGUMENTS));
        assert_eq!(parse_hosts("127.0.0.1"), Err(ZBADARGUMENTS));
        assert_eq!(parse_hosts("127.0.0.1:notaport"), Err(ZBADARGUMENTS));
        assert_eq!(parse_hosts("127.0.0.1:2181/bad/"), Err(ZBADARGUMENTS));
    }

    #[test]
    fn deterministic_pick_is_first_host() {
        let hl = parse_hosts("127.0.0.1:1,127.0.0.2:2,127.0.0.3:3").expect("parse");
        for sid in [1, 2, 3, 99] {
            assert_eq!(hl.pick(true, sid), Some(hl.addrs[0]));
        }
        assert_eq!(hl.pick(false, 4), Some(hl.addrs[1]));
    }
}
