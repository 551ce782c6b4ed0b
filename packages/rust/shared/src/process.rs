//! Process-group cleanup for external commands.

/// Kills a child's whole process group when dropped.
///
/// The child must be spawned as a group leader (`process_group(0)`), so its
/// pid is the group id. Anything it started (a `make` under `sh`, a hook
/// under `git receive-pack`) goes down with it, including processes left
/// running after the child itself exited.
#[derive(Debug)]
pub struct ProcessGroupGuard {
    pgid: Option<u32>,
}

impl ProcessGroupGuard {
    /// Guard the group led by `pid` (a child's `id()`; `None` guards nothing).
    pub fn new(pid: Option<u32>) -> Self {
        Self { pgid: pid }
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_group(pgid);
        }
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pgid) else {
        return;
    };
    // ESRCH: the group already exited.
    if let Err(e) = killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        if e != nix::errno::Errno::ESRCH {
            tracing::debug!(pgid, error = %e, "failed to kill process group");
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use std::os::unix::process::CommandExt;
    use std::time::{Duration, Instant};

    use super::*;

    /// Running or sleeping; zombies and reaped pids count as gone.
    fn alive(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .is_some_and(|rest| !rest.trim_start().starts_with('Z')),
            Err(_) => false,
        }
    }

    #[test]
    fn drop_kills_grandchildren() {
        let tmp = std::env::temp_dir().join(format!("ds-process-test-{}", std::process::id()));
        std::fs::create_dir_all(&tmp).unwrap();
        let pid_file = tmp.join("grandchild.pid");

        // The shell backgrounds a sleeper, records its pid, and exits at once.
        let mut child = std::process::Command::new("sh")
            .arg("-c")
            .arg(format!("sleep 30 & echo $! > {}", pid_file.display()))
            .process_group(0)
            .spawn()
            .unwrap();
        let guard = ProcessGroupGuard::new(Some(child.id()));
        child.wait().unwrap();

        let grandchild: u32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert!(alive(grandchild));

        drop(guard);
        let deadline = Instant::now() + Duration::from_secs(5);
        while alive(grandchild) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(!alive(grandchild));

        let _ = std::fs::remove_dir_all(&tmp);
    }
}
