//! Running a scenario against the scripted platform

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use capgate_api::{Capability, RequestOutcome};
use capgate_engine::gateway::ScriptedGateway;
use capgate_engine::presenter::ScriptedPresenter;
use capgate_engine::{event_channel, CapGate, HostConfig, RequestHost};
use serde::Serialize;

use crate::scenario::{Scenario, ScenarioError};

/// What happened during a simulated run
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub scenario: String,
    pub outcome: RequestOutcome,
    /// Grant rounds sent to the platform
    pub rounds: usize,
    pub settings_visits: usize,
    pub decisions_shown: usize,
    /// `None` when the scenario states no expectation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expectation_met: Option<bool>,
}

impl SimulationReport {
    /// Success means the expectation held, or everything was granted
    pub fn succeeded(&self) -> bool {
        self.expectation_met.unwrap_or(self.outcome.all_granted)
    }
}

fn join(capabilities: &[Capability]) -> String {
    if capabilities.is_empty() {
        return "-".to_string();
    }
    capabilities
        .iter()
        .map(|c| c.short_name())
        .collect::<Vec<_>>()
        .join(", ")
}

impl std::fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Scenario: {}", self.scenario)?;
        writeln!(f, "  all granted:     {}", self.outcome.all_granted)?;
        writeln!(f, "  granted:         {}", join(&self.outcome.granted))?;
        writeln!(f, "  denied:          {}", join(&self.outcome.denied))?;
        writeln!(f, "  grant rounds:    {}", self.rounds)?;
        writeln!(f, "  decisions shown: {}", self.decisions_shown)?;
        write!(f, "  settings visits: {}", self.settings_visits)?;
        if let Some(met) = self.expectation_met {
            write!(f, "\n  expectation:     {}", if met { "met" } else { "NOT met" })?;
        }
        Ok(())
    }
}

/// Run `scenario` to completion on a fresh host
pub async fn run_scenario(
    scenario: &Scenario,
    config: HostConfig,
) -> Result<SimulationReport, ScenarioError> {
    let (tx, mut events) = event_channel();

    let mut gateway = ScriptedGateway::new(scenario.platform, tx.clone())
        .with_granted(scenario.initially_granted())
        .with_rationale(scenario.rationale_hints())
        .with_settings_grants(scenario.settings_grant_list());
    for round in scenario.scripted_rounds() {
        gateway = gateway.with_round(round);
    }

    let presenter = if scenario.default_decision {
        ScriptedPresenter::accepting(tx)
    } else {
        ScriptedPresenter::declining(tx)
    }
    .with_answers(scenario.decisions.iter().copied());

    let mut host = RequestHost::new(gateway.clone(), presenter.clone(), config);
    tracing::info!(scenario = %scenario.display_name(), "Running scenario");

    let slot: Rc<RefCell<Option<RequestOutcome>>> = Rc::new(RefCell::new(None));
    let sink = slot.clone();

    let mut builder = CapGate::init(&mut host).permissions(scenario.requested());
    if scenario.explain_before_request {
        builder = builder.explain_reason_before_request();
    }
    if scenario.explain {
        builder = builder.on_explain_request_reason(|scope, denied, before| {
            let message = if before {
                "These capabilities are needed before continuing"
            } else {
                "These capabilities were refused but are needed"
            };
            scope.show_request_reason_dialog(denied.to_vec(), message, "Allow", Some("Deny"));
        });
    }
    if scenario.forward {
        builder = builder.on_forward_to_settings(|scope, denied| {
            scope.show_forward_to_settings_dialog(
                denied.to_vec(),
                "Grant these capabilities from the settings screen",
                "Open settings",
                Some("Cancel"),
            );
        });
    }
    builder.request(move |outcome| *sink.borrow_mut() = Some(outcome))?;

    if host.is_running() {
        let timeout = Duration::from_secs(scenario.timeout_secs);
        if tokio::time::timeout(timeout, host.drive(&mut events))
            .await
            .is_err()
        {
            host.teardown();
            return Err(ScenarioError::Timeout(scenario.timeout_secs));
        }
    }

    let outcome = slot
        .borrow_mut()
        .take()
        .ok_or_else(|| ScenarioError::Invalid("run ended without an outcome".into()))?;
    let expectation_met = scenario.expect.as_ref().map(|e| e.matches(&outcome));

    Ok(SimulationReport {
        scenario: scenario.display_name().to_string(),
        rounds: gateway.request_count(),
        settings_visits: gateway.settings_visits(),
        decisions_shown: presenter.shown_count(),
        outcome,
        expectation_met,
    })
}
