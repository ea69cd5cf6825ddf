//! Recon output parser
//!
//! Turns free-text enumeration output into a FindingSet. The tool's output
//! format is not a stable contract, so parsing is lossy by construction:
//! anything unrecognized is skipped and malformed input yields an empty or
//! partial set. Parsing never fails.
//!
//! Recognized layout:
//! - section headers `╔══════════╣ Title`, `═══╣ Title ╠═══` and `### TITLE ###`
//! - flagged lines: linpeas red-on-yellow highlight (the tool's "95% PE
//!   vector" marker, Confirmed) or red highlight (Possible); in uncolored
//!   output a leading `[!]` (Confirmed) or `[*]` (Possible)

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::collector::RawReconOutput;
use crate::domain::{Category, Confidence, Finding, FindingSet};

/// linpeas `SED_RED_YELLOW`
const HIGHLIGHT_CONFIRMED: &str = "\x1b[1;31;103m";

/// linpeas `SED_RED`
const HIGHLIGHT_POSSIBLE: &str = "\x1b[1;31m";

/// Lines longer than this are treated as garbage
const MAX_LINE_CHARS: usize = 4096;

static ANSI: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").expect("valid regex"));

static SECTION_HEADERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^\s*╔═+╣\s*(?P<title>.+?)\s*$",
        r"^\s*═+╣\s*(?P<title>.+?)\s*╠═*\s*$",
        r"^\s*#{3,}\s*(?P<title>[^#]+?)\s*#{3,}\s*$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

static PLAIN_CONFIRMED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*\[!\]\s*").expect("valid regex"));

static PLAIN_POSSIBLE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*\[\*\]\s*").expect("valid regex"));

/// The tool's own color legend, which uses the highlight codes itself
static LEGEND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(legend:?|red/yellow:|red:|lightcyan:|blue:|lightmagenta:|yellow:|green:)|a pe vector\s*$|you should take a look")
        .expect("valid regex")
});

/// Pattern rule mapping a flagged line to a category
struct Rule {
    category: Category,
    /// Matched against the stripped line
    line: Regex,
    /// Required section title match, if any
    section: Option<Regex>,
}

impl Rule {
    fn new(category: Category, line: &str, section: Option<&str>) -> Self {
        Self {
            category,
            line: Regex::new(line).expect("valid regex"),
            section: section.map(|s| Regex::new(s).expect("valid regex")),
        }
    }

    fn matches(&self, text: &str, section: Option<&str>) -> bool {
        let section_ok = match &self.section {
            Some(re) => section.is_some_and(|s| re.is_match(s)),
            None => true,
        };
        section_ok && self.line.is_match(text)
    }
}

/// Classification rules, first match wins
static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        // sudo's own CVEs are a userland misconfiguration, not a kernel bug
        Rule::new(
            Category::MisconfiguredService,
            r"(?i)\bCVE-\d{4}-\d{4,7}\b|vulnerable",
            Some(r"(?i)\bsudo"),
        ),
        Rule::new(
            Category::MisconfiguredService,
            r"(?i)\bsudo(edit)?\b.*\bCVE-\d{4}-\d{4,7}\b|\bCVE-\d{4}-\d{4,7}\b.*\bsudo(edit)?\b|\bbaron\s?samedit\b",
            None,
        ),
        Rule::new(
            Category::KernelCve,
            r"(?i)\bCVE-\d{4}-\d{4,7}\b|\b(dirty\s?cow|dirty\s?pipe|pwnkit|overlayfs|looney\s?tunables)\b",
            None,
        ),
        Rule::new(
            Category::WritableCron,
            r"(?i)(writable|[-d]rw[-x]rw[-x]rw[-x])",
            Some(r"(?i)cron|timer|scheduled|anacron"),
        ),
        Rule::new(
            Category::WritableCron,
            r"(?i)(\bcron|crontab|anacron|/etc/cron).*(writable|[-d]rw[-x]rw[-x]rw[-x])|(writable|[-d]rw[-x]rw[-x]rw[-x]).*(\bcron|crontab|anacron|/etc/cron)",
            None,
        ),
        Rule::new(Category::SuidBinary, r"(?i)\bsuid\b|\bsgid\b|^\s*-[r-][w-][sS]", None),
        Rule::new(Category::SuidBinary, r"/\S+", Some(r"(?i)\bsuid\b|\bsgid\b")),
        Rule::new(
            Category::MisconfiguredService,
            r"(?i)nopasswd|sudoers|\((root|all)(\s*:\s*\w+)?\)",
            None,
        ),
        Rule::new(
            Category::CredentialLeak,
            r"(?i)passw(or)?d\s*[=:]|\bpwd\s*[=:]|\bsecret\b|api[_-]?key|access[_-]?key|\btoken\s*[=:]|private key|\bid_(rsa|dsa|ecdsa|ed25519)\b|\.htpasswd|credentials?|/etc/shadow|\.bash_history",
            None,
        ),
        Rule::new(
            Category::CredentialLeak,
            r"\S",
            Some(r"(?i)password|credential|secret|keys?\b|token|history"),
        ),
        Rule::new(
            Category::MisconfiguredService,
            r"(?i)\bsudo\b|sudoers|nopasswd|\.service\b|\.socket\b|\.timer\b|systemd|docker|\blxd\b|\blxc\b|no_root_squash|\bnfs\b|cap_[a-z_]+|capabilit|\$PATH|\bPATH\b|ld_preload|writable",
            None,
        ),
        Rule::new(
            Category::MisconfiguredService,
            r"\S",
            Some(r"(?i)sudo|service|socket|capabilit|container|nfs|path|process|network"),
        ),
    ]
});

/// Counters describing how much of the input was understood
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseStats {
    pub total_lines: usize,
    pub sections: usize,
    pub flagged_lines: usize,
    /// Flagged lines discarded as unusable
    pub dropped_lines: usize,
    /// Input carried bytes that were not valid UTF-8
    pub invalid_utf8: bool,
    /// Collector hit its output ceiling
    pub truncated: bool,
}

impl ParseStats {
    /// Input was not fully understood; the FindingSet may be partial
    pub fn is_degraded(&self) -> bool {
        (self.total_lines > 0 && self.sections == 0) || self.dropped_lines > 0 || self.invalid_utf8 || self.truncated
    }
}

/// Strip terminal escape sequences
pub fn strip_ansi(line: &str) -> String {
    ANSI.replace_all(line, "").into_owned()
}

fn section_title(stripped: &str) -> Option<String> {
    SECTION_HEADERS.iter().find_map(|re| {
        re.captures(stripped)
            .and_then(|c| c.name("title"))
            .map(|m| m.as_str().trim().to_string())
            .filter(|t| !t.is_empty())
    })
}

/// Confidence implied by the tool's own markers, None for unflagged lines
fn flag_of(raw_line: &str, stripped: &str) -> Option<Confidence> {
    if raw_line.contains(HIGHLIGHT_CONFIRMED) || PLAIN_CONFIRMED.is_match(stripped) {
        Some(Confidence::Confirmed)
    } else if raw_line.contains(HIGHLIGHT_POSSIBLE) || PLAIN_POSSIBLE.is_match(stripped) {
        Some(Confidence::Possible)
    } else {
        None
    }
}

fn classify(text: &str, section: Option<&str>) -> Category {
    RULES
        .iter()
        .find(|rule| rule.matches(text, section))
        .map(|rule| rule.category)
        .unwrap_or(Category::Other)
}

/// Parse recon text into a FindingSet
pub fn parse(raw: &RawReconOutput) -> FindingSet {
    parse_with_stats(raw).0
}

/// Parse recon text, also reporting how much of it was understood
pub fn parse_with_stats(raw: &RawReconOutput) -> (FindingSet, ParseStats) {
    let mut stats = ParseStats {
        truncated: raw.truncated,
        invalid_utf8: raw.text.contains(char::REPLACEMENT_CHARACTER),
        ..Default::default()
    };
    let mut findings = Vec::new();
    let mut section: Option<String> = None;

    for (index, raw_line) in raw.text.lines().enumerate() {
        stats.total_lines += 1;
        let stripped = strip_ansi(raw_line);

        if let Some(title) = section_title(&stripped) {
            stats.sections += 1;
            section = Some(title);
            continue;
        }

        let Some(confidence) = flag_of(raw_line, &stripped) else {
            continue;
        };
        let text = PLAIN_CONFIRMED.replace(&stripped, "");
        let text = PLAIN_POSSIBLE.replace(&text, "");
        let text = text.trim();
        if LEGEND.is_match(text) {
            continue;
        }
        stats.flagged_lines += 1;
        if text.is_empty() || text.chars().count() > MAX_LINE_CHARS || text.contains(char::REPLACEMENT_CHARACTER) {
            stats.dropped_lines += 1;
            continue;
        }

        let category = classify(text, section.as_deref());
        findings.push(Finding::new(category, text, index + 1, section.clone(), confidence));
    }

    (FindingSet::new(findings), stats)
}
