//! Forking primitives used by the broker.
//!
//! `container_fork` makes `fork()` behave more like a thread spawn: the
//! child runs a closure and its return value becomes the process exit
//! code, so callers reason about "did the callback succeed" instead of
//! juggling `ForkResult` themselves.

use nix::unistd;
use nix::unistd::Pid;

pub fn container_fork<F: FnOnce() -> i32>(cb: F) -> Result<Pid, nix::Error> {
    match unsafe { unistd::fork()? } {
        unistd::ForkResult::Parent { child } => Ok(child),
        unistd::ForkResult::Child => {
            let ret = cb();
            std::process::exit(ret);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::wait::{waitpid, WaitStatus};

    #[test]
    fn child_exit_code_is_callback_return_value() {
        let pid = container_fork(|| 0).unwrap();
        match waitpid(pid, None).unwrap() {
            WaitStatus::Exited(p, status) => {
                assert_eq!(pid, p);
                assert_eq!(status, 0);
            }
            other => panic!("unexpected wait status: {other:?}"),
        }
    }

    #[test]
    fn nonzero_callback_return_becomes_exit_code() {
        let pid = container_fork(|| 7).unwrap();
        match waitpid(pid, None).unwrap() {
            WaitStatus::Exited(p, status) => {
                assert_eq!(pid, p);
                assert_eq!(status, 7);
            }
            other => panic!("unexpected wait status: {other:?}"),
        }
    }
}
