//! The container a request run lives in
//!
//! A [`RequestHost`] owns the gateway, the presenter, the configuration and
//! at most one live run. External events are delivered into it; events the
//! run cannot use (stale or unexpected) are dropped with a warning.

use capgate_api::{PlatformFacts, RequestOutcome};

use crate::audit;
use crate::error::EngineError;
use crate::event::{EventReceiver, PlatformEvent, RunId};
use crate::gateway::PlatformGateway;
use crate::presenter::DecisionPresenter;
use crate::presets::HostConfig;
use crate::request::{Collaborators, Orchestration, Progress, RequestContext, TaskKind, TaskState};

/// What happened to a delivered event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The run advanced and is waiting for the next event
    Progressed,
    /// The run finished; the final callback has fired
    Completed(RequestOutcome),
    /// The event was dropped without touching any state
    Dropped(EngineError),
}

/// Container owning the collaborators and the live run
pub struct RequestHost {
    gateway: Box<dyn PlatformGateway>,
    presenter: Box<dyn DecisionPresenter>,
    config: HostConfig,
    run: Option<Orchestration>,
}

impl RequestHost {
    pub fn new(
        gateway: impl PlatformGateway + 'static,
        presenter: impl DecisionPresenter + 'static,
        config: HostConfig,
    ) -> Self {
        Self {
            gateway: Box::new(gateway),
            presenter: Box::new(presenter),
            config,
            run: None,
        }
    }

    pub fn facts(&self) -> PlatformFacts {
        self.gateway.facts()
    }

    pub fn gateway(&self) -> &dyn PlatformGateway {
        self.gateway.as_ref()
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    pub fn run_id(&self) -> Option<RunId> {
        self.run.as_ref().map(Orchestration::id)
    }

    /// The live run, if any
    pub fn run(&self) -> Option<&Orchestration> {
        self.run.as_ref()
    }

    /// Context of the live run
    pub fn context(&self) -> Option<&RequestContext> {
        self.run.as_ref().map(Orchestration::context)
    }

    /// Task in control of the live run
    pub fn current_task(&self) -> Option<(TaskKind, &TaskState)> {
        self.run.as_ref()?.current_task()
    }

    /// Install and start a run
    pub(crate) fn start(&mut self, run: Orchestration) -> Result<RunId, EngineError> {
        if let Some(live) = &self.run {
            return Err(EngineError::RunInFlight(live.id()));
        }
        let id = run.id();
        tracing::info!(
            app = %self.config.app_name,
            run = %id,
            capabilities = run.requested().len(),
            tasks = run.chain().len(),
            "Starting request run"
        );

        let mut env = Collaborators {
            gateway: self.gateway.as_mut(),
            presenter: self.presenter.as_mut(),
            audit: self.config.audit.as_ref(),
            round_limit: self.config.round_limit,
        };
        let run = self.run.insert(run);
        if let Progress::Completed(_) = run.start(&mut env) {
            self.run = None;
        }
        Ok(id)
    }

    /// Deliver one external event
    pub fn deliver(&mut self, event: PlatformEvent) -> Delivery {
        let ticket = event.ticket;
        let mut env = Collaborators {
            gateway: self.gateway.as_mut(),
            presenter: self.presenter.as_mut(),
            audit: self.config.audit.as_ref(),
            round_limit: self.config.round_limit,
        };

        let result = match self.run.as_mut() {
            Some(run) => run.handle(event, &mut env),
            None => Err(EngineError::StaleContext {
                run: ticket.run,
                code: ticket.code,
            }),
        };

        match result {
            Ok(Progress::Waiting) => Delivery::Progressed,
            Ok(Progress::Completed(outcome)) => {
                self.run = None;
                Delivery::Completed(outcome)
            }
            Err(err) => {
                tracing::warn!(run = %ticket.run, code = ?ticket.code, error = %err, "Dropping event");
                audit::record(
                    self.config.audit.as_ref(),
                    audit::event_dropped(ticket.run, ticket.code, &err.to_string()),
                );
                Delivery::Dropped(err)
            }
        }
    }

    /// Deliver every event currently queued on `events`
    ///
    /// Returns the outcome if a run completed while draining.
    pub fn drain(&mut self, events: &mut EventReceiver) -> Option<RequestOutcome> {
        let mut completed = None;
        while let Ok(event) = events.try_recv() {
            if let Delivery::Completed(outcome) = self.deliver(event) {
                completed = Some(outcome);
            }
        }
        completed
    }

    /// Deliver events until the live run completes or the channel closes
    ///
    /// Returns `None` right away when no run is live.
    pub async fn drive(&mut self, events: &mut EventReceiver) -> Option<RequestOutcome> {
        while self.is_running() {
            let event = events.recv().await?;
            if let Delivery::Completed(outcome) = self.deliver(event) {
                return Some(outcome);
            }
        }
        None
    }

    /// Abandon the live run; later events for it are stale
    pub fn teardown(&mut self) {
        let Some(mut run) = self.run.take() else {
            return;
        };
        tracing::info!(run = %run.id(), "Host torn down; abandoning request run");
        let mut env = Collaborators {
            gateway: self.gateway.as_mut(),
            presenter: self.presenter.as_mut(),
            audit: self.config.audit.as_ref(),
            round_limit: self.config.round_limit,
        };
        run.abandon(&mut env);
        if let Err(e) = self.config.audit.flush() {
            tracing::warn!(error = %e, "Failed to flush audit sink");
        }
    }
}

impl Drop for RequestHost {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for RequestHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHost")
            .field("facts", &self.facts())
            .field("config", &self.config)
            .field("run", &self.run)
            .finish_non_exhaustive()
    }
}
