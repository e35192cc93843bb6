//! Locating and reading the script behind a suspect process.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, info};

use super::{ContainerHandle, ExecError};

pub const TRUNCATION_MARKER: &str = "\n... (script truncated)";

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("could not read cmdline for pid {pid}: {source}")]
    CommandLine {
        pid: i64,
        #[source]
        source: ExecError,
    },
    #[error("no script file found in command: {0}")]
    NoScript(String),
    #[error("could not determine owner of pid {pid}: {source}")]
    Owner {
        pid: i64,
        #[source]
        source: ExecError,
    },
    #[error("empty owner name for pid {0}")]
    EmptyOwner(i64),
    #[error("could not read working directory of pid {pid} as {user}: {source}")]
    WorkingDir {
        pid: i64,
        user: String,
        #[source]
        source: ExecError,
    },
    #[error("could not read script {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: ExecError,
    },
}

fn script_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([/\w\.-]+\.(?:py|sh))\b").ok())
        .as_ref()
}

/// First `*.py` / `*.sh` token of a command line.
pub fn extract_script_path(command: &str) -> Option<&str> {
    script_regex()?
        .captures(command)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// `/proc/<pid>/cmdline` separates arguments with NUL bytes.
pub fn decode_cmdline(raw: &str) -> String {
    raw.trim_end_matches('\0').replace('\0', " ")
}

/// Cap `content` at `max_chars` characters, appending [`TRUNCATION_MARKER`]
/// when anything was cut.
pub fn truncate_script(content: String, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((cut, _)) => {
            let mut s = content;
            s.truncate(cut);
            s.push_str(TRUNCATION_MARKER);
            s
        }
        None => content,
    }
}

fn join_cwd(cwd: &str, relative: &str) -> String {
    let relative = relative.strip_prefix("./").unwrap_or(relative);
    Path::new(cwd).join(relative).to_string_lossy().into_owned()
}

/// Full command line of `pid`, arguments joined with spaces.
pub async fn read_command_line(handle: &ContainerHandle, pid: i64) -> Result<String, ScriptError> {
    let raw = handle
        .exec(&["cat".to_string(), format!("/proc/{}/cmdline", pid)])
        .await
        .map_err(|source| ScriptError::CommandLine { pid, source })?;
    Ok(decode_cmdline(&raw))
}

/// Absolute path of the script named in `command`.
///
/// Relative paths are resolved against the process's cwd. `/proc/<pid>/cwd`
/// is only readable by the owning uid, so the readlink runs as that user.
pub async fn resolve_script_path(
    handle: &ContainerHandle,
    pid: i64,
    command: &str,
) -> Result<String, ScriptError> {
    let script = extract_script_path(command).ok_or_else(|| ScriptError::NoScript(command.to_string()))?;
    if script.starts_with('/') {
        return Ok(script.to_string());
    }

    let owner = handle
        .exec(&["stat".to_string(), "-c".to_string(), "%U".to_string(), format!("/proc/{}", pid)])
        .await
        .map_err(|source| ScriptError::Owner { pid, source })?;
    let owner = owner.trim().to_string();
    if owner.is_empty() {
        return Err(ScriptError::EmptyOwner(pid));
    }
    debug!(pid, user = %owner, "Resolving cwd as process owner");

    let cwd = handle
        .exec(&[
            "runuser".to_string(),
            "-u".to_string(),
            owner.clone(),
            "--".to_string(),
            "readlink".to_string(),
            format!("/proc/{}/cwd", pid),
        ])
        .await
        .map_err(|source| ScriptError::WorkingDir { pid, user: owner, source })?;

    let path = join_cwd(cwd.trim(), script);
    info!(pid, path = %path, "Resolved script path");
    Ok(path)
}

/// Script content at `path`, truncated to `max_chars`.
pub async fn read_script(handle: &ContainerHandle, path: &str, max_chars: usize) -> Result<String, ScriptError> {
    let content = handle
        .exec(&["cat", path])
        .await
        .map_err(|source| ScriptError::Read { path: path.to_string(), source })?;
    Ok(truncate_script(content, max_chars))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_script_path() {
        assert_eq!(extract_script_path("python idle_hold.py --hold 8"), Some("idle_hold.py"));
        assert_eq!(extract_script_path("python3.10 /work/train.py"), Some("/work/train.py"));
        assert_eq!(extract_script_path("bash ./run-all.sh"), Some("./run-all.sh"));
        assert_eq!(extract_script_path("python -m http.server"), None);
        assert_eq!(extract_script_path("python cache.pyc"), None);
        assert_eq!(extract_script_path("sleep infinity"), None);
    }

    #[test]
    fn test_decode_cmdline() {
        assert_eq!(decode_cmdline("python\0idle_hold.py\0--hold\08\0"), "python idle_hold.py --hold 8");
        assert_eq!(decode_cmdline(""), "");
        // Arguments are kept verbatim, empty and padded ones included.
        assert_eq!(decode_cmdline("python\0run.py\0\0 --tag \0"), "python run.py   --tag ");
    }

    #[test]
    fn test_truncate_long_script() {
        let long = "x".repeat(20_000);
        let out = truncate_script(long, 15_000);
        assert!(out.ends_with(TRUNCATION_MARKER));
        assert_eq!(out.len(), 15_000 + TRUNCATION_MARKER.len());
    }

    #[test]
    fn test_short_script_untouched() {
        let short = "a".repeat(100);
        assert_eq!(truncate_script(short.clone(), 15_000), short);
        let exact = "b".repeat(15_000);
        assert_eq!(truncate_script(exact.clone(), 15_000), exact);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let s = "é".repeat(10);
        let out = truncate_script(s, 4);
        assert!(out.starts_with("éééé"));
        assert!(out.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn test_join_cwd() {
        assert_eq!(join_cwd("/home/alice", "./train.py"), "/home/alice/train.py");
        assert_eq!(join_cwd("/home/alice", "src/train.py"), "/home/alice/src/train.py");
    }
}
