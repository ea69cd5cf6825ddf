//! Admission and classification rules for proposed actions

use regex::Regex;

use crate::config::PolicyConfig;
use crate::domain::{Action, ActionOutcome, Classification, RiskTier};
use crate::error::{PrivloopError, Result};

fn compile(patterns: &[String], what: &str) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| Regex::new(p).map_err(|e| PrivloopError::Config(format!("invalid {} '{}': {}", what, p, e))))
        .collect()
}

/// Result of the admissibility check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Run it; risk tier already re-validated
    Admit(Action),
    /// Literal command already in history
    Duplicate(Action),
    /// Rejected by policy
    Refuse(ActionOutcome),
}

/// Compiled action policy
#[derive(Debug, Clone)]
pub struct ActionPolicy {
    allow_destructive: bool,
    force_repeat: bool,
    destructive: Vec<Regex>,
    success: Vec<Regex>,
    escalated_uid: u32,
}

impl ActionPolicy {
    pub fn new(config: &PolicyConfig) -> Result<Self> {
        Ok(Self {
            allow_destructive: config.allow_destructive,
            force_repeat: config.force_repeat,
            destructive: compile(&config.destructive_patterns, "destructive pattern")?,
            success: compile(&config.success_markers, "success marker")?,
            escalated_uid: config.escalated_uid,
        })
    }

    /// Declared tier, raised to Destructive when the command matches a
    /// destructive pattern. Never lowered.
    pub fn assess_risk(&self, action: &Action) -> RiskTier {
        if self.destructive.iter().any(|re| re.is_match(&action.command)) {
            RiskTier::Destructive
        } else {
            action.risk
        }
    }

    /// Decide whether an action may run. `seen` reports whether the literal
    /// command text is already in the run's history.
    pub fn admit(&self, mut action: Action, seen: impl Fn(&str) -> bool) -> Admission {
        if !self.force_repeat && seen(&action.command) {
            return Admission::Duplicate(action);
        }

        let assessed = self.assess_risk(&action);
        if assessed > action.risk {
            log::warn!(
                "Raising risk of '{}' from {} to {}",
                action.command, action.risk, assessed
            );
            action.risk = assessed;
        }

        if action.risk == RiskTier::Destructive && !self.allow_destructive {
            return Admission::Refuse(ActionOutcome::refused(
                action,
                "destructive action refused: operator authorization not given",
            ));
        }
        if action.risk == RiskTier::Unknown {
            log::warn!("Running action of unknown risk: {}", action.command);
        }
        Admission::Admit(action)
    }

    /// Classify an exit code and output
    pub fn classify(&self, exit_code: i32, output: &str) -> Classification {
        if exit_code == 0 {
            Classification::Success
        } else if self.success.iter().any(|re| re.is_match(output)) {
            Classification::PartialSuccess
        } else {
            Classification::Failure
        }
    }

    /// Some shell the action left behind ran the identity check as the escalated uid
    pub fn detects_escalation(&self, reported_uids: &[u32]) -> bool {
        reported_uids.contains(&self.escalated_uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(allow_destructive: bool, force_repeat: bool) -> ActionPolicy {
        ActionPolicy::new(&PolicyConfig {
            allow_destructive,
            force_repeat,
            ..Default::default()
        })
        .unwrap()
    }

    fn never(_: &str) -> bool {
        false
    }

    #[test]
    fn test_destructive_refused_without_authorization() {
        let action = Action::command("rm -rf /var/backups", RiskTier::Destructive);
        match policy(false, false).admit(action, never) {
            Admission::Refuse(outcome) => {
                assert_eq!(outcome.classification, Classification::Refused);
                assert_eq!(outcome.exit_code, None);
            }
            other => panic!("expected refusal, got {:?}", other),
        }
    }

    #[test]
    fn test_destructive_admitted_with_authorization() {
        let action = Action::command("reboot", RiskTier::Destructive);
        assert!(matches!(policy(true, false).admit(action, never), Admission::Admit(_)));
    }

    #[test]
    fn test_risk_upgraded_from_pattern() {
        let action = Action::command("dd if=/dev/zero of=/dev/sda bs=1M", RiskTier::Safe);
        match policy(false, false).admit(action, never) {
            Admission::Refuse(outcome) => assert_eq!(outcome.action.risk, RiskTier::Destructive),
            other => panic!("expected refusal, got {:?}", other),
        }
    }

    #[test]
    fn test_risk_never_lowered() {
        let action = Action::command("cat /etc/passwd", RiskTier::Destructive);
        assert_eq!(policy(false, false).assess_risk(&action), RiskTier::Destructive);
        let action = Action::command("cat /etc/passwd", RiskTier::Unknown);
        assert_eq!(policy(false, false).assess_risk(&action), RiskTier::Unknown);
    }

    #[test]
    fn test_default_destructive_patterns() {
        let p = policy(false, false);
        for cmd in [
            "rm -rf /",
            "rm -fr /tmp/x",
            "mkfs.ext4 /dev/sdb1",
            "sudo shutdown -h now",
            ":(){ :|:& };:",
            "chmod -R 777 /",
            "echo 'x::0:0::/:/bin/sh' > /etc/passwd",
            "userdel bob",
        ] {
            assert_eq!(p.assess_risk(&Action::command(cmd, RiskTier::Safe)), RiskTier::Destructive, "{}", cmd);
        }
        for cmd in ["sudo -l", "find / -perm -4000 2>/dev/null", "cat /etc/crontab", "ls -la /root"] {
            assert_eq!(p.assess_risk(&Action::command(cmd, RiskTier::Safe)), RiskTier::Safe, "{}", cmd);
        }
    }

    #[test]
    fn test_duplicate_detection_and_force() {
        let seen = |c: &str| c == "sudo -l";
        let action = Action::command("sudo -l", RiskTier::Safe);
        assert!(matches!(policy(false, false).admit(action.clone(), seen), Admission::Duplicate(_)));
        assert!(matches!(policy(false, true).admit(action, seen), Admission::Admit(_)));
    }

    #[test]
    fn test_classification() {
        let p = policy(false, false);
        assert_eq!(p.classify(0, ""), Classification::Success);
        assert_eq!(p.classify(1, "uid=0(root) gid=0(root)\nsegfault"), Classification::PartialSuccess);
        assert_eq!(p.classify(1, "Permission denied"), Classification::Failure);
    }

    #[test]
    fn test_escalation_by_reported_uid() {
        let p = policy(false, false);
        assert!(p.detects_escalation(&[0]));
        assert!(p.detects_escalation(&[1000, 0]));
        assert!(!p.detects_escalation(&[1000]));
        assert!(!p.detects_escalation(&[]));

        let custom = ActionPolicy::new(&PolicyConfig {
            escalated_uid: 1001,
            ..Default::default()
        })
        .unwrap();
        assert!(custom.detects_escalation(&[1001]));
        assert!(!custom.detects_escalation(&[0]));
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let err = ActionPolicy::new(&PolicyConfig {
            success_markers: vec!["(".to_string()],
            ..Default::default()
        })
        .unwrap_err();
        assert_eq!(err.kind(), "ConfigError");
    }
}
