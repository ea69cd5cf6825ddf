//! Bounded prompt context for the reasoning service
//!
//! The user message carries the target profile, the current findings and a
//! window of recent iterations. When the whole prompt exceeds the character
//! budget, the oldest history entries go first, then the lowest-ranked
//! findings.

use std::fmt::Write;

use crate::config::ReasonerConfig;
use crate::domain::{FindingSet, IterationRecord, TargetProfile};

pub const SYSTEM_PROMPT: &str = r#"You are assisting an authorized privilege-escalation assessment of a single Linux host.
You receive the target profile, findings from an enumeration tool, and the outcomes of earlier steps.
Propose the next remote commands to run, best first.

Respond with exactly one JSON object and nothing else:
{"actions":[{"kind":"command|file_edit|privilege_check","command":"<literal shell command>","finding":<finding index or null>,"risk":"safe|destructive|unknown","justification":"<one sentence>"}]}

Rules:
- Commands run non-interactively with a timeout; do not start editors or anything that needs a terminal.
- Do not repeat a command that already appears in the history.
- Mark anything that deletes data, changes system configuration or may disrupt the host as "destructive".
- A command meant to gain root should leave a shell reading standard input, e.g. `sudo find . -exec /bin/sh \; -quit`.
  Standard input carries an identity check that such a shell runs; printing `id` yourself proves nothing.
- Return {"actions":[]} when nothing further is worth trying."#;

/// Cut to at most `max` chars, marking the cut
fn clip(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(max).collect();
    clipped.push_str(" [...]");
    clipped
}

fn render_profile(profile: Option<&TargetProfile>) -> String {
    let Some(p) = profile else {
        return String::new();
    };
    format!(
        "## Target\nhostname: {}\nos: {}\nkernel: {}\narch: {}\nuser: {}\nid: {}\ncwd: {}\n\n",
        p.hostname, p.os, p.kernel, p.architecture, p.whoami, p.id, p.cwd
    )
}

fn render_findings(findings: &FindingSet, limit: usize, config: &ReasonerConfig) -> String {
    let mut out = String::from("## Findings\n");
    if findings.is_empty() {
        out.push_str("(none flagged in this pass)\n");
    }
    let ranked = findings.ranked();
    for (index, finding) in ranked.iter().take(limit) {
        let _ = writeln!(
            out,
            "[{}] {} ({}){}: {}",
            index,
            finding.category,
            finding.confidence,
            finding
                .section
                .as_deref()
                .map(|s| format!(" in \"{}\"", clip(s, 60)))
                .unwrap_or_default(),
            clip(&finding.evidence, config.max_evidence_chars)
        );
    }
    if ranked.len() > limit {
        let _ = writeln!(out, "({} more findings omitted)", ranked.len() - limit);
    }
    out.push('\n');
    out
}

fn render_record(record: &IterationRecord, config: &ReasonerConfig) -> String {
    let mut out = format!("Iteration {} ({} findings):\n", record.iteration, record.findings.len());
    if record.outcomes.is_empty() && record.duplicates.is_empty() {
        out.push_str("- no action taken\n");
    }
    for outcome in &record.outcomes {
        let exit = outcome
            .exit_code
            .map(|c| format!("exit {}", c))
            .unwrap_or_else(|| "not run".to_string());
        let _ = writeln!(
            out,
            "- `{}` [{}] -> {} ({})",
            outcome.action.command, outcome.action.risk, outcome.classification, exit
        );
        let excerpt = outcome.output.trim();
        if !excerpt.is_empty() {
            let _ = writeln!(out, "  output: {}", clip(excerpt, config.max_output_excerpt).replace('\n', "\n  "));
        }
    }
    for command in &record.duplicates {
        let _ = writeln!(out, "- `{}` skipped: already run earlier", command);
    }
    out
}

fn assemble(profile: &str, findings: &str, history: &[String]) -> String {
    let mut out = String::with_capacity(profile.len() + findings.len());
    out.push_str(profile);
    out.push_str(findings);
    if !history.is_empty() {
        out.push_str("## History (oldest first)\n");
        for entry in history {
            out.push_str(entry);
        }
        out.push('\n');
    }
    out.push_str("Propose the next actions as JSON.");
    out
}

/// Build the user message within `max_context_chars` (system prompt included)
pub fn build_context(
    config: &ReasonerConfig,
    profile: Option<&TargetProfile>,
    findings: &FindingSet,
    history: &[IterationRecord],
) -> String {
    let budget = config.max_context_chars.saturating_sub(SYSTEM_PROMPT.chars().count());
    let profile = render_profile(profile);

    let window_start = history.len().saturating_sub(config.history_window);
    let mut entries: Vec<String> = history[window_start..]
        .iter()
        .map(|r| render_record(r, config))
        .collect();

    let mut limit = config.max_findings.min(findings.len());
    let mut findings_text = render_findings(findings, limit, config);
    let mut context = assemble(&profile, &findings_text, &entries);

    while context.chars().count() > budget && !entries.is_empty() {
        entries.remove(0);
        context = assemble(&profile, &findings_text, &entries);
    }
    while context.chars().count() > budget && limit > 0 {
        limit -= 1;
        findings_text = render_findings(findings, limit, config);
        context = assemble(&profile, &findings_text, &entries);
    }
    if context.chars().count() > budget {
        context = context.chars().take(budget).collect();
    }
    context
}
