//! Driving one orchestration run through its task chain
//!
//! The run owns its context, chain and callbacks. Collaborators (gateway,
//! presenter, audit sink) are lent to it for each step by the host, so a
//! torn-down host leaves nothing that could still progress.

use capgate_api::{Capability, RequestOutcome};
use std::collections::{BTreeMap, BTreeSet};

use super::aggregate::ResultAggregator;
use super::chain::{RequestChain, TaskId, TaskKind, TaskState};
use super::context::RequestContext;
use super::partition::Partition;
use super::scope::{DecisionDialog, DecisionKind, ExplainScope, ForwardScope};
use super::task::{classify_round, decide, Applicability, CallbackPresence, Decision};
use crate::audit::{self, AuditSink};
use crate::error::EngineError;
use crate::event::{EventKind, PlatformEvent, RequestCode, RunId, Ticket};
use crate::gateway::PlatformGateway;
use crate::presenter::DecisionPresenter;

/// Explain callback: scope, soft-denied capabilities, before-request marker
pub type ExplainCallback = Box<dyn FnMut(&mut ExplainScope<'_>, &[Capability], bool)>;

/// Forward callback: scope, permanently denied capabilities
pub type ForwardCallback = Box<dyn FnMut(&mut ForwardScope<'_>, &[Capability])>;

/// Final callback, invoked exactly once per completed run
pub type FinalCallback = Box<dyn FnOnce(RequestOutcome)>;

/// Callbacks registered for a run
#[derive(Default)]
pub struct Callbacks {
    pub explain: Option<ExplainCallback>,
    pub forward: Option<ForwardCallback>,
    pub finished: Option<FinalCallback>,
}

impl Callbacks {
    fn presence(&self) -> CallbackPresence {
        CallbackPresence {
            explain: self.explain.is_some(),
            forward: self.forward.is_some(),
        }
    }
}

/// Collaborators lent to a run for one step
pub(crate) struct Collaborators<'a> {
    pub gateway: &'a mut dyn PlatformGateway,
    pub presenter: &'a mut dyn DecisionPresenter,
    pub audit: &'a dyn AuditSink,
    pub round_limit: usize,
}

/// Result of advancing a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// Suspended until the next external event
    Waiting,
    Completed(RequestOutcome),
}

/// State of one orchestration run
pub struct Orchestration {
    id: RunId,
    requested: BTreeSet<Capability>,
    ctx: RequestContext,
    chain: RequestChain,
    callbacks: Callbacks,
}

impl Orchestration {
    /// Set up a run; auto-granted and unrequestable capabilities are
    /// classified here and never reach a task
    pub fn new(
        id: RunId,
        partition: &Partition,
        explain_before_request: bool,
        callbacks: Callbacks,
    ) -> Self {
        let mut ctx = RequestContext::new(explain_before_request);
        for capability in &partition.auto_granted {
            ctx.mark_granted(capability.clone());
        }
        for capability in &partition.unrequestable {
            ctx.mark_unrequestable(capability.clone());
        }

        Self {
            id,
            requested: partition.all(),
            ctx,
            chain: RequestChain::from_partition(partition),
            callbacks,
        }
    }

    pub fn id(&self) -> RunId {
        self.id
    }

    pub fn context(&self) -> &RequestContext {
        &self.ctx
    }

    pub fn chain(&self) -> &RequestChain {
        &self.chain
    }

    pub fn requested(&self) -> &BTreeSet<Capability> {
        &self.requested
    }

    /// Kind and state of the task in control
    pub fn current_task(&self) -> Option<(TaskKind, &TaskState)> {
        let task = self.chain.task(self.chain.current()?);
        Some((task.kind, &task.state))
    }

    pub(crate) fn start(&mut self, env: &mut Collaborators<'_>) -> Progress {
        audit::record(env.audit, audit::run_started(self.id, &self.requested));
        match self.chain.head() {
            Some(head) => self.request(head, env),
            None => self.complete(env),
        }
    }

    /// Route an external event to the task in control
    pub(crate) fn handle(
        &mut self,
        event: PlatformEvent,
        env: &mut Collaborators<'_>,
    ) -> Result<Progress, EngineError> {
        let ticket = event.ticket;
        let stale = EngineError::StaleContext {
            run: ticket.run,
            code: ticket.code,
        };
        if ticket.run != self.id {
            return Err(stale);
        }
        let Some(id) = self.chain.current() else {
            return Err(stale);
        };

        let round_code = self.chain.task(id).kind.request_code();
        let state = std::mem::replace(&mut self.chain.task_mut(id).state, TaskState::Pending);
        match (state, event.kind) {
            (TaskState::AwaitingPlatformResult { round }, EventKind::GrantResult { results })
                if ticket.code == round_code =>
            {
                Ok(self.on_grant_result(id, round, results, env))
            }
            (
                TaskState::AwaitingUserDecision { kind, permissions },
                EventKind::DecisionMade { proceed },
            ) if ticket.code == RequestCode::Decision => {
                Ok(self.on_decision(id, kind, permissions, proceed, env))
            }
            (TaskState::AwaitingSettingsReturn, EventKind::SettingsReturned)
                if ticket.code == RequestCode::SettingsReturn =>
            {
                Ok(self.on_settings_returned(id, env))
            }
            (state, kind) => {
                let err = EngineError::UnexpectedEvent {
                    code: ticket.code,
                    expected: state.name(),
                    received: kind.name(),
                };
                self.chain.task_mut(id).state = state;
                Err(err)
            }
        }
    }

    /// Abandon the run without a final callback
    pub(crate) fn abandon(&mut self, env: &mut Collaborators<'_>) {
        if let Some((kind, TaskState::AwaitingUserDecision { .. })) = self.current_task() {
            tracing::debug!(run = %self.id, task = %kind, "Dismissing pending decision");
            env.presenter.dismiss();
        }
        self.chain.set_current(None);
        audit::record(env.audit, audit::run_abandoned(self.id));
    }

    fn ticket(&self, code: RequestCode) -> Ticket {
        Ticket::new(self.id, code)
    }

    fn request(&mut self, id: TaskId, env: &mut Collaborators<'_>) -> Progress {
        self.chain.set_current(Some(id));
        self.ctx.begin_round();
        let kind = self.chain.task(id).kind;
        let group = self.chain.task(id).group.clone();

        if kind.applicability(&*env.gateway) == Applicability::MissingPrerequisite {
            tracing::debug!(run = %self.id, task = %kind, "Prerequisite not granted; group is unrequestable");
            for capability in group {
                self.ctx.mark_unrequestable(capability);
            }
            return self.finish(id, env);
        }

        let mut remaining = BTreeSet::new();
        for capability in group {
            if env.gateway.is_granted(&capability) {
                self.ctx.mark_granted(capability);
            } else {
                remaining.insert(capability);
            }
        }
        if remaining.is_empty() {
            return self.finish(id, env);
        }

        if self.callbacks.explain.is_some() && self.ctx.take_explain_before_request() {
            for capability in &remaining {
                self.ctx.mark_denied(capability.clone());
            }
            let denied: Vec<Capability> = remaining.into_iter().collect();
            let shown = self.invoke_explain(kind, &denied, true);
            return self.settle(id, shown, env);
        }

        self.issue_round(id, remaining, env)
    }

    fn issue_round(
        &mut self,
        id: TaskId,
        capabilities: BTreeSet<Capability>,
        env: &mut Collaborators<'_>,
    ) -> Progress {
        let task = self.chain.task_mut(id);
        let kind = task.kind;
        if task.rounds >= env.round_limit {
            tracing::warn!(run = %self.id, task = %kind, rounds = task.rounds, "Round limit reached; finishing task");
            return self.finish(id, env);
        }
        task.rounds += 1;
        task.state = TaskState::AwaitingPlatformResult {
            round: capabilities.clone(),
        };

        let code = kind.request_code();
        tracing::debug!(run = %self.id, task = %kind, count = capabilities.len(), "Issuing grant round");
        audit::record(
            env.audit,
            audit::capabilities_requested(self.id, kind, code, &capabilities),
        );
        env.gateway.request_async(self.ticket(code), &capabilities);
        Progress::Waiting
    }

    fn on_grant_result(
        &mut self,
        id: TaskId,
        round: BTreeSet<Capability>,
        results: BTreeMap<Capability, bool>,
        env: &mut Collaborators<'_>,
    ) -> Progress {
        self.ctx.begin_round();
        let kind = self.chain.task(id).kind;
        let group = self.chain.task(id).group.clone();

        let classification = classify_round(
            &mut self.ctx,
            &group,
            &round,
            &results,
            &*env.gateway,
            kind.refusal(),
        );
        tracing::debug!(
            run = %self.id,
            task = %kind,
            granted = classification.granted.len(),
            soft_denied = classification.soft_denied.len(),
            permanently_denied = classification.permanently_denied.len(),
            "Round classified"
        );
        audit::record(env.audit, audit::round_classified(self.id, kind, &classification));

        let carried = self.ctx.carried_within(&group);
        let permanent = self.ctx.permanently_denied_within(&group);
        match decide(&classification, &carried, &permanent, self.callbacks.presence()) {
            Decision::Finish => self.finish(id, env),
            Decision::Explain(denied) => {
                self.ctx
                    .carry_permanent(classification.permanently_denied.iter().cloned());
                let shown = self.invoke_explain(kind, &denied, false);
                self.settle(id, shown, env)
            }
            Decision::Forward(denied) => {
                self.ctx.clear_carried();
                let shown = self.invoke_forward(kind, &denied);
                self.settle(id, shown, env)
            }
        }
    }

    fn invoke_explain(
        &mut self,
        kind: TaskKind,
        denied: &[Capability],
        before_request: bool,
    ) -> Option<DecisionDialog> {
        let mut shown = None;
        if let Some(callback) = self.callbacks.explain.as_mut() {
            let mut scope = ExplainScope::new(kind, &mut shown);
            callback(&mut scope, denied, before_request);
        }
        shown
    }

    fn invoke_forward(&mut self, kind: TaskKind, denied: &[Capability]) -> Option<DecisionDialog> {
        let mut shown = None;
        if let Some(callback) = self.callbacks.forward.as_mut() {
            let mut scope = ForwardScope::new(kind, &mut shown);
            callback(&mut scope, denied);
        }
        shown
    }

    /// Present what a decision callback asked for, or finish the task
    fn settle(
        &mut self,
        id: TaskId,
        shown: Option<DecisionDialog>,
        env: &mut Collaborators<'_>,
    ) -> Progress {
        let kind = self.chain.task(id).kind;
        let Some(dialog) = shown else {
            tracing::debug!(run = %self.id, task = %kind, "Decision callback showed nothing; finishing task");
            return self.finish(id, env);
        };
        if dialog.permissions.is_empty() {
            tracing::debug!(run = %self.id, task = %kind, "Decision lists no capabilities; finishing task");
            return self.finish(id, env);
        }

        self.ctx.mark_dialog_action();
        audit::record(env.audit, audit::decision_shown(self.id, kind, &dialog));
        self.chain.task_mut(id).state = TaskState::AwaitingUserDecision {
            kind: dialog.kind,
            permissions: dialog.permissions.clone(),
        };
        env.presenter
            .present(self.ticket(RequestCode::Decision), &dialog);
        Progress::Waiting
    }

    fn on_decision(
        &mut self,
        id: TaskId,
        decision: DecisionKind,
        permissions: Vec<Capability>,
        proceed: bool,
        env: &mut Collaborators<'_>,
    ) -> Progress {
        let kind = self.chain.task(id).kind;
        if !proceed {
            tracing::debug!(run = %self.id, task = %kind, ?decision, "Decision declined; finishing task");
            return self.finish(id, env);
        }

        match decision {
            DecisionKind::Rationale => self.request_again(id, &permissions, env),
            DecisionKind::ForwardToSettings => {
                self.ctx.set_pending_forward(permissions);
                audit::record(
                    env.audit,
                    audit::forwarded_to_settings(self.id, kind, self.ctx.pending_forward()),
                );
                self.chain.task_mut(id).state = TaskState::AwaitingSettingsReturn;
                env.gateway
                    .open_app_settings(self.ticket(RequestCode::SettingsReturn));
                Progress::Waiting
            }
        }
    }

    /// Whatever the user did in settings, ask again for the forwarded set
    fn on_settings_returned(&mut self, id: TaskId, env: &mut Collaborators<'_>) -> Progress {
        let forwarded: Vec<Capability> = self.ctx.take_pending_forward().into_iter().collect();
        tracing::debug!(run = %self.id, count = forwarded.len(), "Returned from settings");
        self.request_again(id, &forwarded, env)
    }

    fn request_again(
        &mut self,
        id: TaskId,
        capabilities: &[Capability],
        env: &mut Collaborators<'_>,
    ) -> Progress {
        self.ctx.begin_round();
        let task = self.chain.task(id);
        let target = task
            .kind
            .request_again_target(&task.group, &self.ctx, capabilities);
        if target.is_empty() {
            tracing::debug!(run = %self.id, error = %EngineError::EmptyRetrySet, "Skipping retry");
            return self.finish(id, env);
        }
        self.issue_round(id, target, env)
    }

    fn finish(&mut self, id: TaskId, env: &mut Collaborators<'_>) -> Progress {
        let task = self.chain.task_mut(id);
        task.state = TaskState::Finished;
        let kind = task.kind;
        let next = task.next();
        tracing::debug!(run = %self.id, task = %kind, "Task finished");

        match next {
            Some(next) => self.request(next, env),
            None => self.complete(env),
        }
    }

    fn complete(&mut self, env: &mut Collaborators<'_>) -> Progress {
        self.chain.set_current(None);
        debug_assert!(self.ctx.is_disjoint());

        let outcome = ResultAggregator::aggregate(&self.ctx, &self.requested);
        tracing::info!(
            run = %self.id,
            all_granted = outcome.all_granted,
            granted = outcome.granted.len(),
            denied = outcome.denied.len(),
            "Request run completed"
        );
        audit::record(env.audit, audit::run_completed(self.id, &outcome));

        if let Some(callback) = self.callbacks.finished.take() {
            callback(outcome.clone());
        }
        Progress::Completed(outcome)
    }
}

impl std::fmt::Debug for Orchestration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestration")
            .field("id", &self.id)
            .field("requested", &self.requested.len())
            .field("tasks", &self.chain.len())
            .finish_non_exhaustive()
    }
}
