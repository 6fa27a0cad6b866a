//! Resolves which local process owns a loopback TCP connection, and walks
//! parent-PID chains.
//!
//! Everything reads through an injectable proc root so the parsing is
//! tested against fixtures instead of the live `/proc`. Unreadable files
//! and directories yield `None`, never errors: a vanished process is an
//! expected race, and the caller treats "unknown" as "not permitted".

use std::{
    fs,
    path::{Path, PathBuf},
};

/// Max PPid-chain length before we assume a cycle.
const MAX_ANCESTRY_DEPTH: usize = 256;

/// A `/proc`-shaped filesystem.
#[derive(Clone, Debug)]
pub struct ProcFs {
    root: PathBuf,
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ProcFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve the PID owning the loopback TCP socket bound to `local_port`.
    ///
    /// Scans `net/tcp` first, then `net/tcp6` (the v4-mapped form), for the
    /// socket inode, then finds the process holding an fd to that inode.
    pub fn owner_pid_of_local_port(&self, local_port: u16) -> Option<u32> {
        let inode = self.socket_inode_for_port(local_port)?;
        self.pid_owning_socket_inode(inode)
    }

    fn socket_inode_for_port(&self, local_port: u16) -> Option<u64> {
        // /proc/net/tcp stores the IP little-endian per octet group:
        // 0100007F is 127.0.0.1. The port is big-endian, 4 uppercase hex
        // digits.
        let target_v4 = format!("0100007F:{local_port:04X}");
        let target_v6 =
            format!("0000000000000000FFFF00000100007F:{local_port:04X}");

        for (table, target) in
            [("net/tcp", &target_v4), ("net/tcp6", &target_v6)]
        {
            let path = self.root.join(table);
            if let Some(inode) = find_socket_inode(&path, target) {
                return Some(inode);
            }
        }
        None
    }

    fn pid_owning_socket_inode(&self, inode: u64) -> Option<u32> {
        let target = format!("socket:[{inode}]");
        let entries = fs::read_dir(&self.root).ok()?;

        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(pid) =
                name.to_str().and_then(|name| name.parse::<u32>().ok())
            else {
                continue;
            };

            let fd_dir = entry.path().join("fd");
            let Ok(fds) = fs::read_dir(&fd_dir) else {
                // Not ours to read (or the process died); keep scanning.
                continue;
            };
            for fd in fds.flatten() {
                if let Ok(link) = fs::read_link(fd.path())
                    && link.to_str() == Some(target.as_str())
                {
                    return Some(pid);
                }
            }
        }
        None
    }

    /// Whether `pid` is `ancestor` or one of its descendants.
    ///
    /// Walks `PPid:` from `status` files; terminates at init, on an
    /// unreadable entry, on a self-parent, or after a depth bound.
    pub fn is_descendant_of(&self, pid: u32, ancestor: u32) -> bool {
        let mut current = pid;
        for _ in 0..MAX_ANCESTRY_DEPTH {
            if current == ancestor {
                return true;
            }
            if current <= 1 {
                return false;
            }
            let Some(parent) = self.parent_of(current) else {
                return false;
            };
            if parent == current {
                return false;
            }
            current = parent;
        }
        false
    }

    fn parent_of(&self, pid: u32) -> Option<u32> {
        let status =
            fs::read_to_string(self.root.join(pid.to_string()).join("status"))
                .ok()?;
        status.lines().find_map(|line| {
            line.strip_prefix("PPid:")
                .and_then(|ppid| ppid.trim().parse::<u32>().ok())
        })
    }
}

/// Scan one `net/tcp{,6}` table for `target` in the local-address column
/// (field 1); field 9 is the socket inode.
fn find_socket_inode(table_path: &Path, target: &str) -> Option<u64> {
    let contents = fs::read_to_string(table_path).ok()?;

    for line in contents.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let Some(local_address) = fields.get(1) else {
            continue;
        };
        if !local_address.eq_ignore_ascii_case(target) {
            continue;
        }
        return fields.get(9)?.parse::<u64>().ok();
    }
    None
}

#[cfg(test)]
mod test {
    use std::os::unix::fs::symlink;

    use super::*;

    /// Build a fake proc root.
    struct FakeProc {
        tmp: tempfile::TempDir,
    }

    impl FakeProc {
        fn new() -> Self {
            let tmp = tempfile::tempdir().unwrap();
            fs::create_dir(tmp.path().join("net")).unwrap();
            Self { tmp }
        }

        fn procfs(&self) -> ProcFs {
            ProcFs::new(self.tmp.path())
        }

        fn write_tcp_table(&self, name: &str, entries: &[(&str, u64)]) {
            let mut contents = "  sl  local_address rem_address   st \
                tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode\n"
                .to_owned();
            for (i, (local, inode)) in entries.iter().enumerate() {
                contents.push_str(&format!(
                    "   {i}: {local} 00000000:0000 0A 00000000:00000000 \
                     00:00000000 00000000  1000        0 {inode} 1 \
                     0000000000000000 100 0 0 10 0\n"
                ));
            }
            fs::write(self.tmp.path().join("net").join(name), contents)
                .unwrap();
        }

        fn add_process(&self, pid: u32, ppid: u32, socket_inodes: &[u64]) {
            let proc_dir = self.tmp.path().join(pid.to_string());
            let fd_dir = proc_dir.join("fd");
            fs::create_dir_all(&fd_dir).unwrap();
            fs::write(
                proc_dir.join("status"),
                format!("Name:\ttest\nPid:\t{pid}\nPPid:\t{ppid}\n"),
            )
            .unwrap();
            for (fd, inode) in socket_inodes.iter().enumerate() {
                symlink(
                    format!("socket:[{inode}]"),
                    fd_dir.join(fd.to_string()),
                )
                .unwrap();
            }
        }
    }

    #[test]
    fn resolves_owner_via_tcp4() {
        let proc = FakeProc::new();
        // Port 8173 = 0x1FED.
        proc.write_tcp_table(
            "tcp",
            &[("0100007F:1FED", 777_001), ("0100007F:0050", 777_002)],
        );
        proc.write_tcp_table("tcp6", &[]);
        proc.add_process(4242, 1, &[777_001]);
        proc.add_process(4243, 1, &[777_002]);

        assert_eq!(
            proc.procfs().owner_pid_of_local_port(8173),
            Some(4242)
        );
        assert_eq!(proc.procfs().owner_pid_of_local_port(80), Some(4243));
        assert_eq!(proc.procfs().owner_pid_of_local_port(9999), None);
    }

    #[test]
    fn falls_back_to_tcp6() {
        let proc = FakeProc::new();
        proc.write_tcp_table("tcp", &[]);
        proc.write_tcp_table(
            "tcp6",
            &[("0000000000000000FFFF00000100007F:1FED", 888_001)],
        );
        proc.add_process(5151, 1, &[888_001]);

        assert_eq!(
            proc.procfs().owner_pid_of_local_port(8173),
            Some(5151)
        );
    }

    #[test]
    fn local_address_match_is_case_insensitive() {
        let proc = FakeProc::new();
        proc.write_tcp_table("tcp", &[("0100007f:1fed", 999_001)]);
        proc.add_process(6161, 1, &[999_001]);

        assert_eq!(
            proc.procfs().owner_pid_of_local_port(8173),
            Some(6161)
        );
    }

    #[test]
    fn missing_tables_yield_none() {
        let proc = FakeProc::new();
        assert_eq!(proc.procfs().owner_pid_of_local_port(8173), None);
    }

    #[test]
    fn ancestry_walk() {
        let proc = FakeProc::new();
        // init -> 100 -> 200 -> 300; plus an unrelated 400.
        proc.add_process(100, 1, &[]);
        proc.add_process(200, 100, &[]);
        proc.add_process(300, 200, &[]);
        proc.add_process(400, 1, &[]);
        let procfs = proc.procfs();

        // Self counts as a descendant.
        assert!(procfs.is_descendant_of(100, 100));
        assert!(procfs.is_descendant_of(300, 100));
        assert!(procfs.is_descendant_of(300, 200));
        assert!(!procfs.is_descendant_of(400, 100));
        assert!(!procfs.is_descendant_of(100, 300));

        // A pid with no status entry is not a descendant of anything else.
        assert!(!procfs.is_descendant_of(9999, 100));
    }

    #[test]
    fn ancestry_terminates_on_self_parent_loop() {
        let proc = FakeProc::new();
        proc.add_process(500, 500, &[]);
        assert!(!proc.procfs().is_descendant_of(500, 100));
    }

    #[test]
    fn ancestry_terminates_on_cycle() {
        let proc = FakeProc::new();
        // 600 <-> 601 form a cycle that never reaches the ancestor.
        proc.add_process(600, 601, &[]);
        proc.add_process(601, 600, &[]);
        assert!(!proc.procfs().is_descendant_of(600, 100));
    }
}
