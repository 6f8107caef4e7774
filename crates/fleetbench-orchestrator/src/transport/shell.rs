//! POSIX shell snippets for the remote job protocol.
//!
//! Every job owns a directory holding `pid`, and for detached jobs also
//! `stdout`, `stderr` and `rc` (written atomically when the command exits).

/// Quotes `s` as a single POSIX shell word.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Runs `command` in the foreground, recording its pid for `stop_script`.
pub(crate) fn sync_script(dir: &str, command: &str) -> String {
    let d = shell_quote(dir);
    format!(
        "mkdir -p {d} 2>/dev/null\n\
         sh -c {cmd} &\n\
         echo $! > {d}/pid 2>/dev/null\n\
         wait $!\n\
         rc=$?\n\
         rm -rf {d}\n\
         exit $rc\n",
        cmd = shell_quote(command),
    )
}

/// Starts `command` detached from the session and returns immediately.
pub(crate) fn launch_script(dir: &str, command: &str) -> String {
    let d = shell_quote(dir);
    let wrapper = r#"sh -c "$1"; echo $? > "$2/rc.tmp" && mv "$2/rc.tmp" "$2/rc""#;
    format!(
        "mkdir -p {d} || exit 1\n\
         nohup sh -c {wrapper} fleetbench {cmd} {d} > {d}/stdout 2> {d}/stderr < /dev/null &\n\
         echo $! > {d}/pid\n",
        wrapper = shell_quote(wrapper),
        cmd = shell_quote(command),
    )
}

/// First stdout line of a finished poll.
pub(crate) const POLL_DONE: &str = "done";
pub(crate) const POLL_RUNNING: &str = "running";
pub(crate) const POLL_LOST: &str = "lost";

/// Reports `running`, `lost`, or `done <rc>` followed by the job's stdout
/// (stderr is replayed on stderr). A finished job's directory is removed.
pub(crate) fn poll_script(dir: &str) -> String {
    format!(
        "D={d}\n\
         finish() {{ printf '{done} %s\\n' \"$(cat \"$D/rc\")\"; cat \"$D/stdout\" 2>/dev/null; cat \"$D/stderr\" >&2 2>/dev/null; rm -rf \"$D\"; }}\n\
         if [ -f \"$D/rc\" ]; then finish\n\
         elif [ -f \"$D/pid\" ] && kill -0 \"$(cat \"$D/pid\")\" 2>/dev/null; then echo {running}\n\
         elif [ -f \"$D/rc\" ]; then finish\n\
         else echo {lost}; fi\n",
        d = shell_quote(dir),
        done = POLL_DONE,
        running = POLL_RUNNING,
        lost = POLL_LOST,
    )
}

/// Sends SIGTERM to the job and its descendants, then removes its directory.
pub(crate) fn stop_script(dir: &str) -> String {
    format!(
        "D={d}\n\
         kill_tree() {{ for c in $(pgrep -P \"$1\" 2>/dev/null); do kill_tree \"$c\"; done; kill -TERM \"$1\" 2>/dev/null; }}\n\
         if [ -f \"$D/pid\" ]; then kill_tree \"$(cat \"$D/pid\")\"; fi\n\
         rm -rf \"$D\"\n\
         exit 0\n",
        d = shell_quote(dir),
    )
}

/// Exit status 0 iff `path` exists.
pub(crate) fn exists_script(path: &str) -> String {
    format!("test -e {}", shell_quote(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn sh(script: &str) -> (i32, String) {
        let out = Command::new("sh").arg("-c").arg(script).output().unwrap();
        (out.status.code().unwrap_or(-1), String::from_utf8_lossy(&out.stdout).into_owned())
    }

    #[test]
    fn test_quote_survives_shell() {
        for s in ["plain", "with space", "it's", "$HOME `id`", "a\"b"] {
            let (_, out) = sh(&format!("printf %s {}", shell_quote(s)));
            assert_eq!(out, s);
        }
    }

    #[test]
    fn test_sync_script_preserves_exit_code_and_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("job");
        let (rc, out) = sh(&sync_script(dir.to_str().unwrap(), "echo 'hi there'; exit 3"));
        assert_eq!(rc, 3);
        assert_eq!(out, "hi there\n");
        assert!(!dir.exists());
    }

    #[test]
    fn test_poll_reports_lost_for_unknown_job() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("never-started");
        let (rc, out) = sh(&poll_script(dir.to_str().unwrap()));
        assert_eq!(rc, 0);
        assert_eq!(out.trim(), POLL_LOST);
    }

    #[test]
    fn test_exists_script() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("result.json");
        std::fs::write(&file, "{}").unwrap();
        assert_eq!(sh(&exists_script(file.to_str().unwrap())).0, 0);
        assert_ne!(sh(&exists_script("/nonexistent/result.json")).0, 0);
    }
}
