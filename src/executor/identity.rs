//! Identity check piped into each action
//!
//! Every action runs with a one-line script on its standard input. The script
//! prints a per-action tag followed by `id -u`. A shell the action leaves
//! reading stdin runs that script under its own identity, so the tagged line
//! reports who the shell really is. An action that ignores stdin never prints
//! the tag. Output that only talks about root, such as `id root` or a
//! `/etc/passwd` listing, carries no tag and never counts as escalation.

use crate::id::generate_tag;
use crate::session::shell_quote;

const TAG_PREFIX: &str = "privloop-";

#[derive(Debug, Clone)]
pub struct IdentityCheck {
    tag: String,
}

impl IdentityCheck {
    pub fn new(command: &str) -> Self {
        Self {
            tag: generate_tag(command),
        }
    }

    /// What the tagged line starts with. The script never contains it
    /// literally, so echoing the script back does not forge it.
    fn marker(&self) -> String {
        format!("{}{}:", TAG_PREFIX, self.tag)
    }

    /// The command actually sent: the check script piped into the action
    pub fn wrap(&self, command: &str) -> String {
        let script = format!(r#"printf '%s%s:%s\n' {} {} "$(id -u)""#, TAG_PREFIX, self.tag);
        format!("printf '%s\\n' {} | {{\n{}\n}}", shell_quote(&script), command)
    }

    /// Effective uids reported by tagged lines in `output`
    pub fn reported_uids(&self, output: &str) -> Vec<u32> {
        let marker = self.marker();
        output
            .lines()
            .filter_map(|line| {
                let rest = &line[line.find(&marker)? + marker.len()..];
                let end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
                rest[..end].parse().ok()
            })
            .collect()
    }

    /// `output` without the check's own lines
    pub fn scrub(&self, output: &str) -> String {
        let marker = self.marker();
        if !output.contains(&marker) {
            return output.to_string();
        }
        output
            .lines()
            .filter(|line| !line.contains(&marker))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Pull the action and tag back out of a wrapped command, the way a shell
/// on the far side would see them. Lets scripted transports answer as an
/// escalated shell would.
#[cfg(test)]
pub(crate) fn unwrap_command(sent: &str) -> Option<(&str, &str)> {
    let tag_start = sent.find(TAG_PREFIX)? + TAG_PREFIX.len();
    let tag = sent[tag_start..].split_whitespace().next()?;
    let body_start = sent.find(" | {\n")? + " | {\n".len();
    let action = sent[body_start..].strip_suffix("\n}")?;
    Some((tag, action))
}
