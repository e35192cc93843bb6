//! Process table captured with `ps` inside a container.

use serde::Serialize;

/// Columns requested from `ps`; `cmd` must stay last since it contains spaces.
const PS_COLUMNS: &str = "pid,pcpu,pmem,user,cmd";
const MIN_FIELDS: usize = 5;

/// Pid used when nothing better can be found; usually the container's
/// entrypoint.
pub const DEFAULT_PID: i64 = 1;

/// `ps` invocation listing the top `rows` lines (header included) by
/// memory share.
pub fn ps_command(rows: usize) -> String {
    format!("ps -eo {} --sort=-pmem | head -n {}", PS_COLUMNS, rows)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessSample {
    pub pid: i64,
    pub cpu_percent: f64,
    pub mem_percent: f64,
    pub user: String,
    pub command: String,
}

impl ProcessSample {
    /// Parse one non-header `ps` row. Rows with too few columns or a
    /// non-numeric pid yield `None`.
    pub fn parse_row(line: &str) -> Option<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < MIN_FIELDS {
            return None;
        }
        let pid = fields[0].parse().ok()?;
        Some(Self {
            pid,
            cpu_percent: fields[1].parse().unwrap_or(0.0),
            mem_percent: fields[2].parse().unwrap_or(0.0),
            user: fields[3].to_string(),
            command: fields[4..].join(" "),
        })
    }

    /// Every parseable row of a `ps` table, header skipped.
    pub fn parse_table(table: &str) -> Vec<Self> {
        table
            .trim()
            .lines()
            .skip(1)
            .filter_map(Self::parse_row)
            .collect()
    }

    pub fn is_diagnostic(&self, patterns: &[String]) -> bool {
        patterns.iter().any(|p| self.command.contains(p.as_str()))
    }
}

/// Resolve the pid to inspect when the model did not name one.
///
/// `llm_pid > 0` wins. Otherwise the first positive pid in the table whose
/// command is not one of our own diagnostic commands, else
/// [`DEFAULT_PID`].
pub fn fallback_pid(llm_pid: i64, table: &str, diagnostics: &[String]) -> i64 {
    if llm_pid > 0 {
        return llm_pid;
    }
    ProcessSample::parse_table(table)
        .into_iter()
        .filter(|p| !p.is_diagnostic(diagnostics))
        .map(|p| p.pid)
        .find(|pid| *pid > 0)
        .unwrap_or(DEFAULT_PID)
}
