//! Descendant process tracking.
//!
//! The parent relation is rebuilt from a fresh process snapshot on every
//! query; processes that vanish mid-scan simply don't appear in it.

use std::collections::{HashMap, HashSet, VecDeque};
use std::ffi::OsStr;

use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};

use super::process_exists;

/// One row of the process table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcEntry {
    pub pid: i32,
    pub ppid: i32,
}

fn snapshot() -> System {
    let mut system = System::new_with_specifics(
        RefreshKind::nothing().with_processes(ProcessRefreshKind::nothing()),
    );
    system.refresh_processes(ProcessesToUpdate::All, true);
    system
}

/// Snapshot the live process table. Threads are left out.
pub fn process_table() -> Vec<ProcEntry> {
    snapshot()
        .processes()
        .iter()
        .filter(|(_, process)| process.thread_kind().is_none())
        .filter_map(|(pid, process)| {
            let ppid = process.parent()?;
            Some(ProcEntry {
                pid: pid.as_u32() as i32,
                ppid: ppid.as_u32() as i32,
            })
        })
        .filter(|entry| entry.pid > 0 && entry.ppid > 0)
        .collect()
}

/// All transitive descendants of `root` in the live process table.
/// The root itself is never included.
pub fn descendants_of(root: i32) -> HashSet<i32> {
    descendants_in(root, &process_table())
}

/// Breadth-first closure over an already captured table.
pub fn descendants_in(root: i32, table: &[ProcEntry]) -> HashSet<i32> {
    let mut children: HashMap<i32, Vec<i32>> = HashMap::new();
    for entry in table {
        children.entry(entry.ppid).or_default().push(entry.pid);
    }

    let mut descendants = HashSet::new();
    let mut queue = VecDeque::from([root]);

    while let Some(current) = queue.pop_front() {
        let Some(kids) = children.get(&current) else {
            continue;
        };
        for &kid in kids {
            if kid != root && descendants.insert(kid) {
                queue.push_back(kid);
            }
        }
    }

    descendants
}

/// True if any pid in the set still exists (including ones we may not signal).
pub fn any_alive<'a>(pids: impl IntoIterator<Item = &'a i32>) -> bool {
    pids.into_iter().any(|pid| process_exists(*pid))
}

/// Pids whose process name matches `name` exactly.
pub fn find_processes_by_name(name: &str) -> Vec<i32> {
    snapshot()
        .processes_by_exact_name(OsStr::new(name))
        .filter(|process| process.thread_kind().is_none())
        .map(|process| process.pid().as_u32() as i32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};

    fn entry(pid: i32, ppid: i32) -> ProcEntry {
        ProcEntry { pid, ppid }
    }

    #[test]
    fn test_descendant_closure_excludes_root_and_siblings() {
        // 1 -> 10 -> {11, 12}, 12 -> 13 ; unrelated tree 1 -> 20 -> 21
        let table = vec![
            entry(13, 12),
            entry(10, 1),
            entry(21, 20),
            entry(11, 10),
            entry(20, 1),
            entry(12, 10),
        ];

        let found = descendants_in(10, &table);
        assert_eq!(found, HashSet::from([11, 12, 13]));
    }

    #[test]
    fn test_descendants_of_leaf_is_empty() {
        let table = vec![entry(2, 1), entry(3, 2)];
        assert!(descendants_in(3, &table).is_empty());
        assert!(descendants_in(99, &table).is_empty());
    }

    #[test]
    fn test_live_child_is_a_descendant() {
        let mut child = Command::new("sleep")
            .arg("5")
            .stdout(Stdio::null())
            .spawn()
            .unwrap();
        let child_pid = child.id() as i32;

        let found = descendants_of(std::process::id() as i32);
        let _ = child.kill();
        let _ = child.wait();

        assert!(found.contains(&child_pid));
    }

    #[test]
    fn test_process_table_links_child_to_us() {
        let mut child = Command::new("sleep")
            .arg("5")
            .stdout(Stdio::null())
            .spawn()
            .unwrap();
        let child_pid = child.id() as i32;

        let table = process_table();
        let _ = child.kill();
        let _ = child.wait();

        assert!(table.contains(&entry(child_pid, std::process::id() as i32)));
    }

    #[test]
    fn test_find_processes_by_name_sees_running_child() {
        let mut child = Command::new("sleep")
            .arg("5")
            .stdout(Stdio::null())
            .spawn()
            .unwrap();
        let child_pid = child.id() as i32;

        let found = find_processes_by_name("sleep");
        let _ = child.kill();
        let _ = child.wait();

        assert!(found.contains(&child_pid));
        assert!(find_processes_by_name("no-such-process-name").is_empty());
    }

    #[test]
    fn test_any_alive() {
        let me = std::process::id() as i32;
        assert!(any_alive(&[me]));
        assert!(!any_alive(&Vec::<i32>::new()));
    }
}
