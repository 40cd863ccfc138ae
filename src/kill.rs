//! Recursive termination of a child process and everything it started.

use std::collections::HashMap;

use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::error::SupervisorError;

/// How a process tree is torn down.
///
/// Selected once per supervisor by [`ProcessKiller::for_platform`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessKiller {
    /// Signal the whole process group. Requires the child to be spawned as
    /// a group leader.
    #[cfg(unix)]
    SignalGroup,
    /// Enumerate descendants and terminate them one by one, leaves first,
    /// the root last.
    TreeWalk,
}

impl ProcessKiller {
    #[must_use]
    pub fn for_platform() -> Self {
        #[cfg(unix)]
        {
            ProcessKiller::SignalGroup
        }
        #[cfg(not(unix))]
        {
            ProcessKiller::TreeWalk
        }
    }

    /// Whether children must be spawned in their own process group.
    #[must_use]
    pub fn needs_process_group(self) -> bool {
        #[cfg(unix)]
        {
            self == ProcessKiller::SignalGroup
        }
        #[cfg(not(unix))]
        {
            false
        }
    }

    /// Request termination of `pid` and its descendants. A process that is
    /// already gone is not an error.
    pub fn terminate(self, pid: u32) -> Result<(), SupervisorError> {
        match self {
            #[cfg(unix)]
            ProcessKiller::SignalGroup => signal_group(pid),
            ProcessKiller::TreeWalk => walk_tree(pid),
        }
    }
}

#[cfg(unix)]
fn signal_group(pid: u32) -> Result<(), SupervisorError> {
    use nix::{
        errno::Errno,
        sys::signal::{Signal, killpg},
        unistd::Pid as GroupId,
    };

    let pgid = i32::try_from(pid).map_err(|e| SupervisorError::ProcessKill {
        pid,
        reason: e.to_string(),
    })?;
    match killpg(GroupId::from_raw(pgid), Signal::SIGTERM) {
        Ok(()) => {
            log::debug!("sent SIGTERM to process group {pgid}");
            Ok(())
        }
        Err(Errno::ESRCH) => {
            log::debug!("process group {pgid} already exited");
            Ok(())
        }
        Err(errno) => Err(SupervisorError::ProcessKill {
            pid,
            reason: errno.to_string(),
        }),
    }
}

fn walk_tree(pid: u32) -> Result<(), SupervisorError> {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
    for (child, process) in system.processes() {
        if let Some(parent) = process.parent() {
            children.entry(parent).or_default().push(*child);
        }
    }

    let root = Pid::from_u32(pid);
    for victim in leaves_first(root, &children) {
        kill_one(&mut system, victim)?;
    }
    Ok(())
}

/// Descendants of `root` ordered so every process comes after all of its
/// own descendants, ending with `root`.
fn leaves_first(root: Pid, children: &HashMap<Pid, Vec<Pid>>) -> Vec<Pid> {
    let mut order = Vec::new();
    let mut stack = vec![(root, false)];
    while let Some((current, expanded)) = stack.pop() {
        if expanded {
            order.push(current);
            continue;
        }
        if order.contains(&current) {
            continue;
        }
        stack.push((current, true));
        if let Some(kids) = children.get(&current) {
            for kid in kids {
                if *kid != current {
                    stack.push((*kid, false));
                }
            }
        }
    }
    order
}

fn kill_one(system: &mut System, pid: Pid) -> Result<(), SupervisorError> {
    let Some(process) = system.process(pid) else {
        log::debug!("process {pid} already exited");
        return Ok(());
    };
    if process.kill() {
        log::debug!("terminated process {pid}");
        return Ok(());
    }

    // The kill may have lost a race with a natural exit.
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    if system.process(pid).is_none() {
        log::debug!("process {pid} exited before it could be terminated");
        Ok(())
    } else {
        Err(SupervisorError::ProcessKill {
            pid: pid.as_u32(),
            reason: "termination request was refused".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::process::{Command, Stdio};

    use super::*;

    #[test]
    fn orders_descendants_before_their_parents() {
        let pid = Pid::from_u32;
        let children = HashMap::from([
            (pid(1), vec![pid(2), pid(3)]),
            (pid(2), vec![pid(4)]),
        ]);
        let order = leaves_first(pid(1), &children);

        assert_eq!(order.len(), 4);
        assert_eq!(order.last(), Some(&pid(1)));
        let position = |p: u32| order.iter().position(|x| *x == pid(p)).unwrap();
        assert!(position(4) < position(2));
        assert!(position(2) < position(1));
        assert!(position(3) < position(1));
    }

    #[test]
    fn terminating_a_missing_process_is_benign() {
        // Reap a short lived child so its pid no longer exists.
        let mut child = Command::new(if cfg!(windows) { "cmd" } else { "true" })
            .args(if cfg!(windows) { &["/C", "exit"][..] } else { &[][..] })
            .stdout(Stdio::null())
            .spawn()
            .unwrap();
        let pid = child.id();
        child.wait().unwrap();

        ProcessKiller::TreeWalk.terminate(pid).unwrap();
        ProcessKiller::for_platform().terminate(pid).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn tree_walk_terminates_a_live_child() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        ProcessKiller::TreeWalk.terminate(child.id()).unwrap();
        let status = child.wait().unwrap();
        assert!(!status.success());
    }
}
