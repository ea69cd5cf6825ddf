//! Plan reasoner - turns findings and history into ranked actions
//!
//! One reasoning-service call per `plan` invocation. Transport failures
//! surface as `ReasoningService` errors; a malformed or empty response is an
//! empty Plan, never an error.

mod context;
mod plan;

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use crate::config::{LlmConfig, ReasonerConfig};
use crate::domain::{FindingSet, IterationRecord, TargetProfile};
use crate::error::{PrivloopError, Result};
use crate::llm::{CompletionRequest, LlmClient};

pub use context::{SYSTEM_PROMPT, build_context};
pub use plan::{MAX_ACTIONS, Plan, parse_plan};

/// Raw response alongside the validated plan
#[derive(Debug, Clone)]
pub struct Reasoning {
    pub response: String,
    pub plan: Plan,
}

pub struct PlanReasoner<L: LlmClient> {
    llm: Arc<L>,
    config: ReasonerConfig,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
}

impl<L: LlmClient> PlanReasoner<L> {
    pub fn new(llm: Arc<L>, config: ReasonerConfig, llm_config: &LlmConfig) -> Self {
        Self {
            llm,
            config,
            max_tokens: llm_config.max_tokens,
            temperature: llm_config.temperature,
            timeout: Duration::from_secs(llm_config.timeout_secs),
        }
    }

    pub fn config(&self) -> &ReasonerConfig {
        &self.config
    }

    /// Ask the reasoning service for the next actions.
    ///
    /// `history` holds completed iterations, oldest first.
    pub async fn plan(
        &self,
        profile: Option<&TargetProfile>,
        findings: &FindingSet,
        history: &[IterationRecord],
    ) -> Result<Reasoning> {
        let context = build_context(&self.config, profile, findings, history);
        let request = CompletionRequest::new(SYSTEM_PROMPT)
            .with_user_message(context)
            .with_max_tokens(self.max_tokens)
            .with_temperature(self.temperature);
        debug!("Reasoning request: {} prompt chars", request.prompt_chars());

        let response = tokio::time::timeout(self.timeout, self.llm.complete(request))
            .await
            .map_err(|_| {
                PrivloopError::ReasoningService(format!("no response within {}s", self.timeout.as_secs()))
            })??;

        info!(
            "Received reasoning response ({} characters, {} tokens)",
            response.content.len(),
            response.usage.total()
        );

        let plan = parse_plan(&response.content, findings.len());
        match &plan.rejection {
            Some(reason) => warn!("Reasoning response rejected: {}", reason),
            None => info!("Plan has {} actions", plan.actions.len()),
        }
        Ok(Reasoning {
            response: response.content,
            plan,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Category, Confidence, Finding};
    use crate::llm::{LlmError, MockLlmClient};

    fn reasoner(mock: MockLlmClient) -> (PlanReasoner<MockLlmClient>, Arc<MockLlmClient>) {
        let llm = Arc::new(mock);
        (
            PlanReasoner::new(llm.clone(), ReasonerConfig::default(), &LlmConfig::default()),
            llm,
        )
    }

    fn findings() -> FindingSet {
        FindingSet::new(vec![Finding::new(
            Category::WritableCron,
            "-rwxrwxrwx /etc/cron.d/backup",
            9,
            Some("Cron jobs".to_string()),
            Confidence::Confirmed,
        )])
    }

    #[tokio::test]
    async fn test_plan_from_valid_response() {
        let (reasoner, llm) = reasoner(MockLlmClient::new().respond(
            r#"{"actions":[{"kind":"command","command":"cat /etc/cron.d/backup","finding":0,"risk":"safe","justification":"inspect"}]}"#,
        ));

        let reasoning = reasoner.plan(None, &findings(), &[]).await.unwrap();
        assert_eq!(reasoning.plan.actions.len(), 1);
        assert_eq!(reasoning.plan.actions[0].finding, Some(0));

        let requests = llm.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].system, SYSTEM_PROMPT);
        assert!(requests[0].messages[0].content.contains("/etc/cron.d/backup"));
        assert_eq!(requests[0].temperature, Some(0.3));
    }

    #[tokio::test]
    async fn test_malformed_response_is_empty_plan() {
        let (reasoner, _) = reasoner(MockLlmClient::new().respond("I think you should try sudo -l"));
        let reasoning = reasoner.plan(None, &findings(), &[]).await.unwrap();
        assert!(reasoning.plan.is_empty());
        assert!(reasoning.plan.rejection.is_some());
        assert_eq!(reasoning.response, "I think you should try sudo -l");
    }

    #[tokio::test]
    async fn test_service_failure_is_error() {
        let (reasoner, _) = reasoner(MockLlmClient::new().fail(LlmError::ApiError {
            status: 503,
            message: "overloaded".to_string(),
        }));
        let err = reasoner.plan(None, &findings(), &[]).await.unwrap_err();
        assert_eq!(err.kind(), "ReasoningServiceError");
    }
}
