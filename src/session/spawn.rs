//! Process-group spawn and environment overlay (spec.md §4.2, §4.5).
//!
//! Grounded on `other_examples/.../interactive_session.rs`'s
//! `pre_exec`/`setpgid(0, 0)` + `kill(-(pid as i32), SIGKILL)` pattern: the
//! child is placed in its own process group so that killing it also kills
//! any subprocesses it spawns (shells, `find`, language runtimes, etc).

use std::collections::HashMap;
use std::process::Stdio;

use tokio::process::{Child, Command};

use crate::error::{Result, SupervisorError};

/// Merge environment variables for a spawned child: start from the parent
/// process's environment, then apply `overlay` on top. A key present in
/// both is replaced in place by the overlay's value (duplicate-key
/// replace, not append) — matching how `std::process::Command::envs`
/// itself behaves, made explicit here so callers can reason about the
/// final merged view without spawning.
pub fn merge_env(overlay: &HashMap<String, String>) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = std::env::vars().collect();
    for (k, v) in overlay {
        env.insert(k.clone(), v.clone());
    }
    env
}

/// Spawn `program` with `args` in its own process group, piping
/// stdin/stdout/stderr, with `cwd` as the working directory and `env`
/// applied as a full environment replacement (see [`merge_env`]).
pub fn spawn_grouped(
    program: &str,
    args: &[String],
    cwd: Option<&str>,
    env: &HashMap<String, String>,
) -> Result<Child> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.env_clear();
    cmd.envs(env);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    #[cfg(unix)]
    unsafe {
        use std::os::unix::process::CommandExt;
        cmd.pre_exec(|| {
            libc::setpgid(0, 0);
            Ok(())
        });
    }

    cmd.spawn().map_err(|e| {
        SupervisorError::spawn(format!("failed to spawn {program}")).with_source(e.into())
    })
}

/// Send `signal` to the negated pid, i.e. to the whole process group
/// rather than just the child itself. A no-op (returns `Ok`) if `pid` is
/// `None`, which happens once the child has already been reaped.
#[cfg(unix)]
pub fn kill_group(pid: Option<u32>, signal: libc::c_int) -> Result<()> {
    let Some(pid) = pid else { return Ok(()) };
    // SAFETY: kill(2) with a negative pid targets the process group whose
    // id equals the pid magnitude; no memory is touched by this call.
    let rc = unsafe { libc::kill(-(pid as libc::pid_t), signal) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        // ESRCH: the group is already gone — not an error for our purposes.
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(SupervisorError::io(format!("kill(-{pid}, {signal})")).with_source(err.into()));
        }
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn kill_group(_pid: Option<u32>, _signal: i32) -> Result<()> {
    Ok(())
}
