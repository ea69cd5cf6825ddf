//! Strict validation of reasoning-service responses
//!
//! The response must be one JSON object matching the plan schema, optionally
//! wrapped in a single fenced code block. Anything else is rejected whole;
//! free text is never mined for commands.

use serde::Deserialize;

use crate::domain::{Action, ActionKind, RiskTier};

/// Upper bound on proposed actions considered per plan
pub const MAX_ACTIONS: usize = 16;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PlanDoc {
    actions: Vec<ActionDoc>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ActionDoc {
    kind: ActionKind,
    command: String,
    #[serde(default)]
    finding: Option<usize>,
    risk: RiskTier,
    #[serde(default)]
    justification: String,
}

/// Ranked actions from one reasoning response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub actions: Vec<Action>,
    /// Why the response was discarded, when it was
    pub rejection: Option<String>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    fn rejected(reason: impl Into<String>) -> Self {
        Self {
            actions: Vec::new(),
            rejection: Some(reason.into()),
        }
    }
}

/// Strip a single surrounding ```/```json fence
fn unfence(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return Some(trimmed);
    };
    let (info, body) = rest.split_once('\n')?;
    let info = info.trim();
    if !(info.is_empty() || info.eq_ignore_ascii_case("json")) {
        return None;
    }
    let body = body.trim_end().strip_suffix("```")?;
    if body.contains("```") {
        return None;
    }
    Some(body.trim())
}

/// Validate a response against the plan schema.
///
/// `finding_count` bounds the finding indices an action may reference.
pub fn parse_plan(response: &str, finding_count: usize) -> Plan {
    if response.trim().is_empty() {
        return Plan::rejected("empty response");
    }
    let Some(body) = unfence(response) else {
        return Plan::rejected("response is not a single JSON document");
    };
    let doc: PlanDoc = match serde_json::from_str(body) {
        Ok(doc) => doc,
        Err(e) => return Plan::rejected(format!("schema mismatch: {}", e)),
    };
    if doc.actions.len() > MAX_ACTIONS {
        return Plan::rejected(format!("{} actions exceeds the limit of {}", doc.actions.len(), MAX_ACTIONS));
    }

    let mut actions = Vec::with_capacity(doc.actions.len());
    for (rank, a) in doc.actions.into_iter().enumerate() {
        let command = a.command.trim();
        if command.is_empty() {
            return Plan::rejected(format!("action {} has an empty command", rank));
        }
        if command.contains('\0') {
            return Plan::rejected(format!("action {} command contains a NUL byte", rank));
        }
        if let Some(index) = a.finding.filter(|&i| i >= finding_count) {
            return Plan::rejected(format!(
                "action {} references finding {} of {}",
                rank, index, finding_count
            ));
        }
        let mut action = Action::command(command, a.risk)
            .with_kind(a.kind)
            .with_justification(a.justification.trim());
        if let Some(index) = a.finding {
            action = action.targeting(index);
        }
        actions.push(action);
    }

    Plan {
        actions,
        rejection: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{"actions":[
        {"kind":"privilege_check","command":"sudo -l","finding":null,"risk":"safe","justification":"list sudo rights"},
        {"kind":"command","command":"echo 'id' >> /etc/cron.d/backup","finding":1,"risk":"unknown","justification":"writable cron"}
    ]}"#;

    #[test]
    fn test_valid_plan() {
        let plan = parse_plan(VALID, 2);
        assert!(plan.rejection.is_none());
        assert_eq!(plan.actions.len(), 2);
        assert_eq!(plan.actions[0].kind, ActionKind::PrivilegeCheck);
        assert_eq!(plan.actions[0].command, "sudo -l");
        assert_eq!(plan.actions[1].finding, Some(1));
        assert_eq!(plan.actions[1].risk, RiskTier::Unknown);
    }

    #[test]
    fn test_fenced_plan_accepted() {
        let fenced = format!("```json\n{}\n```", VALID);
        assert_eq!(parse_plan(&fenced, 2).actions.len(), 2);
        let bare_fence = format!("```\n{}\n```", VALID);
        assert_eq!(parse_plan(&bare_fence, 2).actions.len(), 2);
    }

    #[test]
    fn test_prose_rejected() {
        let prose = format!("Sure! Here is the plan:\n{}", VALID);
        let plan = parse_plan(&prose, 2);
        assert!(plan.is_empty());
        assert!(plan.rejection.is_some());
    }

    #[test]
    fn test_text_after_fence_rejected() {
        let trailing = format!("```json\n{}\n```\nLet me know!", VALID);
        assert!(parse_plan(&trailing, 2).is_empty());
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let extra = r#"{"actions":[{"kind":"command","command":"id","risk":"safe","justification":"x","shell":"bash"}]}"#;
        assert!(parse_plan(extra, 0).rejection.unwrap().contains("schema mismatch"));
    }

    #[test]
    fn test_unknown_risk_rejected() {
        let bad = r#"{"actions":[{"kind":"command","command":"id","risk":"low"}]}"#;
        assert!(parse_plan(bad, 0).is_empty());
    }

    #[test]
    fn test_finding_index_out_of_range() {
        let plan = parse_plan(VALID, 1);
        assert!(plan.is_empty());
        assert!(plan.rejection.unwrap().contains("finding 1"));
    }

    #[test]
    fn test_empty_command_rejected() {
        let bad = r#"{"actions":[{"kind":"command","command":"   ","risk":"safe"}]}"#;
        assert!(parse_plan(bad, 0).is_empty());
    }

    #[test]
    fn test_empty_actions_is_empty_plan_not_rejection() {
        let plan = parse_plan(r#"{"actions":[]}"#, 0);
        assert!(plan.is_empty());
        assert!(plan.rejection.is_none());
    }

    #[test]
    fn test_empty_response() {
        assert_eq!(parse_plan("  \n", 0).rejection.as_deref(), Some("empty response"));
    }

    #[test]
    fn test_too_many_actions() {
        let action = r#"{"kind":"command","command":"id","risk":"safe"}"#;
        let many = format!("{{\"actions\":[{}]}}", vec![action; MAX_ACTIONS + 1].join(","));
        assert!(parse_plan(&many, 0).is_empty());
    }

    #[test]
    fn test_commands_are_trimmed() {
        let plan = parse_plan(r#"{"actions":[{"kind":"command","command":"  id \n","risk":"safe"}]}"#, 0);
        assert_eq!(plan.actions[0].command, "id");
    }
}
