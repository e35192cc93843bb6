//! Prompt text for the two scoring phases.
//!
//! Both phases ask for a bare JSON object; the shapes are decoded into
//! `crate::analysis::Phase1Verdict` / `Phase2Verdict`.

use crate::metrics::GpuMetrics;

const SYSTEM_PROMPT: &str = "\
You are a GPU cluster operations auditor. Your job is to judge whether a \
running training or inference workload is holding GPUs without doing useful \
work: idle loops, sleep-based placeholders, interactive shells left open, or \
jobs stuck waiting on I/O. Score each case from 0 (clearly legitimate) to 10 \
(clearly abusive). Be conservative: low utilization alone is not proof of \
abuse when the process is plausibly loading data or compiling. \
Always answer with a single JSON object and nothing else.";

pub fn system_prompt() -> &'static str {
    SYSTEM_PROMPT
}

fn push_metrics(out: &mut String, metrics: &GpuMetrics, with_mem_std_dev: bool) {
    out.push_str("GPU metrics over the analysis window:\n");
    out.push_str(&format!("- GPU utilization average: {:.2}%\n", metrics.gpu_util_avg));
    out.push_str(&format!("- GPU utilization std dev: {:.2}\n", metrics.gpu_util_std_dev));
    out.push_str(&format!("- GPU memory used average: {:.2} MiB\n", metrics.gpu_mem_used_avg));
    if with_mem_std_dev {
        out.push_str(&format!("- GPU memory used std dev: {:.2}\n", metrics.gpu_mem_used_std_dev));
    }
}

/// Phase 1: pick the process most likely responsible and give a coarse score.
pub fn phase1_prompt(metrics: &GpuMetrics, process_table: &str) -> String {
    let mut out = String::new();
    push_metrics(&mut out, metrics, true);
    out.push('\n');
    out.push_str("Top processes in the main container, sorted by memory share:\n");
    if process_table.trim().is_empty() {
        out.push_str("(process list unavailable)\n");
    } else {
        out.push_str("```\n");
        out.push_str(process_table.trim());
        out.push_str("\n```\n");
    }
    out.push('\n');
    out.push_str(
        "Identify the single process most likely to be the user's main workload. \
Ignore the inspection commands themselves (ps, head, cat, grep). \
Respond as {\"pid\": <integer, 0 if unsure>, \"score\": <0-10>, \"reason\": \"<one or two sentences>\"}.",
    );
    out
}

/// Phase 2: re-score with the command line and script source in hand.
pub fn phase2_prompt(
    metrics: &GpuMetrics,
    full_command: &str,
    script_content: &str,
    phase1_reason: &str,
) -> String {
    let mut out = String::new();
    out.push_str(&format!("A first pass flagged this workload: {}\n", phase1_reason));
    out.push('\n');
    push_metrics(&mut out, metrics, false);
    out.push('\n');
    out.push_str(&format!("Command line of the suspect process:\n{}\n", full_command));
    out.push('\n');
    out.push_str("Script source:\n```\n");
    out.push_str(script_content);
    out.push_str("\n```\n\n");
    out.push_str(
        "Read the script and decide whether it explains the GPU usage pattern above. \
Respond as {\"score\": <0-10>, \"reason\": \"<one or two sentences>\"}.",
    );
    out
}
