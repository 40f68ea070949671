//! Zombie reaping for nsenter helper processes.
//!
//! The broker forks a helper per event; once the event's response has been
//! read, the helper has usually already exited, but reaping it is the
//! reaper's job, not the dispatching thread's, so a slow dispatcher never
//! blocks on `waitpid`. A [`std::sync::RwLock`] latch keeps the reaper from
//! racing a dispatcher that is still waiting on its own helper: dispatchers
//! hold the latch shared for the lifetime of their helper, the reaper
//! takes it exclusive before sweeping. The daemon additionally marks
//! itself a subreaper (`PR_SET_CHILD_SUBREAPER`) at startup so orphaned
//! grandchildren (the double-forked nsexec stage) still converge here
//! instead of being reparented to pid 1.

use std::collections::HashSet;
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

/// Time to let a grandchild exit cleanly on its own before the next sweep
/// reaps its immediate parent (the helper). Tuned low enough that a normal
/// event round-trip never notices it, high enough to avoid needlessly
/// reaping in a tight loop.
const REAP_DEBOUNCE: Duration = Duration::from_millis(20);

pub struct Reaper {
    latch: RwLock<()>,
    tracked: Mutex<HashSet<i32>>,
}

impl Default for Reaper {
    fn default() -> Self {
        Self::new()
    }
}

impl Reaper {
    pub fn new() -> Self {
        Self {
            latch: RwLock::new(()),
            tracked: Mutex::new(HashSet::new()),
        }
    }

    /// Marks the current process as a subreaper so orphaned nsexec
    /// grandchildren are reparented here rather than to init.
    pub fn set_subreaper(&self) -> Result<(), nix::Error> {
        prctl_set_child_subreaper()
    }

    pub fn track(&self, pid: Pid) {
        self.tracked.lock().unwrap().insert(pid.as_raw());
    }

    /// A dispatcher calls this while its helper is alive; it must be
    /// dropped (by dropping the returned guard) before the dispatcher
    /// returns, so the reaper can observe the helper's exit afterward.
    pub fn hold(&self) -> std::sync::RwLockReadGuard<'_, ()> {
        self.latch.read().unwrap()
    }

    /// Non-blocking sweep: reaps every tracked child that has already
    /// exited. Takes the latch exclusive, so it waits for any in-flight
    /// dispatcher to finish holding it shared first.
    pub fn sweep(&self) {
        let _exclusive = self.latch.write().unwrap();
        std::thread::sleep(REAP_DEBOUNCE);
        let mut tracked = self.tracked.lock().unwrap();
        let pids: Vec<i32> = tracked.iter().copied().collect();
        for raw_pid in pids {
            let pid = Pid::from_raw(raw_pid);
            match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => {}
                Ok(_) | Err(nix::Error::ECHILD) => {
                    tracked.remove(&raw_pid);
                }
                Err(e) => {
                    tracing::warn!(?e, pid = raw_pid, "failed to reap nsenter helper");
                }
            }
        }
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.lock().unwrap().len()
    }
}

#[cfg(not(test))]
fn prctl_set_child_subreaper() -> Result<(), nix::Error> {
    let ret = unsafe { libc::prctl(libc::PR_SET_CHILD_SUBREAPER, 1, 0, 0, 0) };
    if ret != 0 {
        return Err(nix::Error::last());
    }
    Ok(())
}

#[cfg(test)]
fn prctl_set_child_subreaper() -> Result<(), nix::Error> {
    // Setting the real subreaper bit is process-global and would leak
    // across unrelated tests sharing the test binary's process; tests
    // verify the latch/tracking behavior instead.
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::{fork, ForkResult};

    #[test]
    fn sweep_reaps_an_exited_child() {
        let reaper = Reaper::new();
        let pid = match unsafe { fork() }.unwrap() {
            ForkResult::Parent { child } => child,
            ForkResult::Child => std::process::exit(0),
        };
        reaper.track(pid);
        // Give the child time to exit before the debounce elapses.
        std::thread::sleep(Duration::from_millis(50));
        reaper.sweep();
        assert_eq!(reaper.tracked_count(), 0);
    }

    #[test]
    fn hold_guard_allows_concurrent_dispatchers() {
        let reaper = Reaper::new();
        let g1 = reaper.hold();
        let g2 = reaper.hold();
        drop(g1);
        drop(g2);
    }
}
