//! Orchestration loop - drives one run against one target.
//!
//! Connect, then iterate recon -> parse -> reason -> act until escalation is
//! detected, nothing more can be done, or the iteration budget runs out.
//! Every path ends in `Terminated` with the session closed and exactly one
//! termination reason recorded.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::audit::{AuditEvent, AuditLog, Stage};
use crate::config::Config;
use crate::domain::{FindingSet, RunReport, RunState, TargetProfile, TerminationReason};
use crate::error::{PrivloopError, Result};
use crate::executor::{ActionExecutor, Admission};
use crate::id::generate_run_id;
use crate::llm::LlmClient;
use crate::reasoner::{Plan, PlanReasoner};
use crate::recon::{ReconCollector, collect_profile, parse_with_stats};
use crate::session::{SessionHandle, SessionTarget, Transport};

/// Longest back-off honoured when the reasoning service rate-limits us
const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(60);

/// Orchestration state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Connecting,
    Reconning,
    Analyzing,
    Acting,
    Terminated,
}

pub struct RunLoop<T: Transport, L: LlmClient> {
    config: Config,
    session: SessionHandle<T>,
    collector: ReconCollector,
    reasoner: PlanReasoner<L>,
    executor: ActionExecutor,
    audit: AuditLog,
    state: RunState,
    profile: Option<TargetProfile>,
    phase: Phase,
}

impl<T: Transport, L: LlmClient> RunLoop<T, L> {
    /// Validate the configuration and open the run's audit trail
    pub fn new(config: Config, transport: T, llm: Arc<L>) -> Result<Self> {
        config.validate()?;
        let target = SessionTarget::from_config(&config.target)?;
        let run_id = generate_run_id(&target.label());
        let audit = AuditLog::create(&config.audit.dir, &run_id)?;

        Ok(Self {
            session: SessionHandle::new(target, transport),
            collector: ReconCollector::new(config.recon.clone()),
            reasoner: PlanReasoner::new(llm, config.reasoner.clone(), &config.llm),
            executor: ActionExecutor::new(&config.policy)?,
            state: RunState::new(run_id, config.policy.max_iterations),
            audit,
            config,
            profile: None,
            phase: Phase::Init,
        })
    }

    pub fn run_id(&self) -> &str {
        self.state.run_id()
    }

    pub fn audit_path(&self) -> &Path {
        self.audit.path()
    }

    fn enter(&mut self, phase: Phase) {
        debug!("{:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    /// Run to termination. Cancelling `cancel` stops the in-flight stage and
    /// ends the run as Interrupted.
    pub async fn run(mut self, cancel: CancellationToken) -> RunReport {
        info!("Run {} started against {}", self.state.run_id(), self.session.target().label());

        let reason = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("Run interrupted by operator");
                TerminationReason::Interrupted
            }
            result = self.drive() => match result {
                Ok(reason) => reason,
                Err(e) => {
                    error!("Run aborted: {}", e);
                    TerminationReason::InternalFault(e.to_string())
                }
            },
        };

        self.terminate(reason)
    }

    fn terminate(mut self, reason: TerminationReason) -> RunReport {
        self.enter(Phase::Terminated);
        let reason = match self.audit.record(AuditEvent::Terminated {
            reason: reason.clone(),
            iterations: self.state.iteration(),
        }) {
            Ok(()) => reason,
            Err(e) if !reason.is_fault() => {
                error!("Could not record termination: {}", e);
                TerminationReason::InternalFault(e.to_string())
            }
            Err(e) => {
                error!("Could not record termination: {}", e);
                reason
            }
        };
        self.state.finalize(reason);
        self.session.close();

        let report = RunReport::from_state(
            &self.state,
            self.session.target().label(),
            self.profile.clone(),
            Some(self.audit.path().to_path_buf()),
        );
        info!(
            "Run {} terminated: {} after {} iterations",
            report.run_id, report.reason, report.iterations
        );
        report
    }

    /// State machine body. Errors returned here are audit-trail failures.
    async fn drive(&mut self) -> Result<TerminationReason> {
        self.audit.record(AuditEvent::RunStarted {
            run_id: self.state.run_id().to_string(),
            target: self.session.target().label(),
            credential_kind: self.session.target().credential.kind().to_string(),
            max_iterations: self.config.policy.max_iterations,
            allow_destructive: self.config.policy.allow_destructive,
            force_repeat: self.config.policy.force_repeat,
        })?;

        self.enter(Phase::Connecting);
        if let Err(e) = self.session.open().await {
            self.audit.record(AuditEvent::ConnectFailed {
                error_kind: e.kind().to_string(),
                message: e.to_string(),
            })?;
            return Ok(TerminationReason::ConnectFailed);
        }
        self.audit.record(AuditEvent::Connected {
            target: self.session.target().label(),
        })?;

        let profile = collect_profile(&mut self.session, &mut self.audit).await?;
        self.audit.record(AuditEvent::Profile {
            profile: profile.clone(),
        })?;
        self.profile = Some(profile);

        loop {
            if !self.state.has_budget() {
                info!("Iteration budget of {} spent", self.state.max_iterations());
                return Ok(TerminationReason::MaxIterationsReached);
            }

            self.enter(Phase::Reconning);
            let Some(findings) = self.recon().await? else {
                return Ok(TerminationReason::ReconUnavailable);
            };
            let Some(iteration) = self.state.begin_iteration(findings.clone()) else {
                return Ok(TerminationReason::MaxIterationsReached);
            };
            info!(
                "Iteration {}/{}: {} findings ({} confirmed)",
                iteration,
                self.state.max_iterations(),
                findings.len(),
                findings.confirmed_count()
            );

            self.enter(Phase::Analyzing);
            let Some(plan) = self.analyze(iteration, &findings).await? else {
                return Ok(TerminationReason::NoFurtherProgress);
            };

            self.enter(Phase::Acting);
            if self.act(iteration, plan).await? {
                return Ok(TerminationReason::Achieved);
            }
        }
    }

    /// Collect and parse recon output, retrying up to the failure threshold.
    /// None means recon is unavailable.
    async fn recon(&mut self) -> Result<Option<FindingSet>> {
        let pending = self.state.iteration() + 1;
        let threshold = self.config.recon.failure_threshold;
        let mut failures = 0;

        loop {
            match self.collector.collect(&mut self.session, &mut self.audit).await {
                Ok(raw) => {
                    self.audit.record(AuditEvent::ReconCollected {
                        iteration: pending,
                        bytes: raw.bytes,
                        truncated: raw.truncated,
                    })?;
                    let (findings, stats) = parse_with_stats(&raw);
                    if stats.is_degraded() {
                        warn!(
                            "ParseDegraded: {} sections, {} flagged lines, {} dropped, truncated={}",
                            stats.sections, stats.flagged_lines, stats.dropped_lines, stats.truncated
                        );
                    }
                    self.audit.record(AuditEvent::FindingsParsed {
                        iteration: pending,
                        findings: findings.len(),
                        confirmed: findings.confirmed_count(),
                        dropped_lines: stats.dropped_lines,
                        degraded: stats.is_degraded(),
                    })?;
                    return Ok(Some(findings));
                }
                Err(e @ PrivloopError::Audit(_)) => return Err(e),
                Err(e) => {
                    failures += 1;
                    warn!("Recon attempt {}/{} failed: {}", failures, threshold, e);
                    self.audit.record(AuditEvent::StageError {
                        stage: Stage::Recon,
                        error_kind: e.kind().to_string(),
                        message: e.to_string(),
                    })?;
                    if failures >= threshold {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Ask for a plan, retrying on an empty plan or a transient service
    /// error. None means no actionable plan.
    async fn analyze(&mut self, iteration: u32, findings: &FindingSet) -> Result<Option<Plan>> {
        let attempts = 1 + self.reasoner.config().retries;

        for attempt in 1..=attempts {
            let history = self.state.history();
            let prior = &history[..history.len().saturating_sub(1)];
            let result = self.reasoner.plan(self.profile.as_ref(), findings, prior).await;

            match result {
                Ok(reasoning) => {
                    self.audit.record(AuditEvent::ReasoningResponse {
                        iteration,
                        attempt,
                        response: reasoning.response,
                        actions: reasoning.plan.actions.len(),
                    })?;
                    if let Some(reason) = &reasoning.plan.rejection {
                        self.audit.record(AuditEvent::PlanRejected {
                            iteration,
                            attempt,
                            reason: reason.clone(),
                        })?;
                    }
                    if !reasoning.plan.is_empty() {
                        return Ok(Some(reasoning.plan));
                    }
                    info!("Empty plan on attempt {}/{}", attempt, attempts);
                }
                Err(e @ PrivloopError::Audit(_)) => return Err(e),
                Err(e) => {
                    warn!("Reasoning attempt {}/{} failed: {}", attempt, attempts, e);
                    self.audit.record(AuditEvent::StageError {
                        stage: Stage::Reasoning,
                        error_kind: e.kind().to_string(),
                        message: e.to_string(),
                    })?;
                    if !e.is_transient() {
                        warn!("Not retrying: {}", e);
                        return Ok(None);
                    }
                    if let PrivloopError::RateLimited(wait) = e {
                        if attempt < attempts {
                            let wait = wait.min(MAX_RATE_LIMIT_WAIT);
                            info!("Waiting {}s before the next reasoning attempt", wait.as_secs());
                            tokio::time::sleep(wait).await;
                        }
                    }
                }
            }
        }
        Ok(None)
    }

    /// Walk the plan in rank order and execute the first admissible action.
    /// Returns true when escalation was achieved.
    async fn act(&mut self, iteration: u32, plan: Plan) -> Result<bool> {
        for action in plan.actions {
            let admission = self.executor.admit(action, |command| self.state.has_command(command));
            match admission {
                Admission::Duplicate(action) => {
                    info!("Skipping duplicate command: {}", action.command);
                    self.audit.record(AuditEvent::DuplicateSkipped {
                        iteration,
                        command: action.command.clone(),
                    })?;
                    self.state.record_duplicate(action.command);
                }
                Admission::Refuse(outcome) => {
                    warn!("Refused: {} ({})", outcome.action.command, outcome.output);
                    self.audit.record(AuditEvent::ActionOutcome {
                        iteration,
                        outcome: outcome.clone(),
                    })?;
                    self.state.record_outcome(outcome);
                }
                Admission::Admit(action) => {
                    let outcome = self.executor.execute(&mut self.session, &mut self.audit, action).await?;
                    let achieved = outcome.is_achieved();
                    self.audit.record(AuditEvent::ActionOutcome {
                        iteration,
                        outcome: outcome.clone(),
                    })?;
                    self.state.record_outcome(outcome);
                    return Ok(achieved);
                }
            }
        }
        info!("No admissible action in iteration {}", iteration);
        Ok(false)
    }
}
