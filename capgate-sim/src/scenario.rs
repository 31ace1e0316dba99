//! Scenario files
//!
//! A scenario describes the simulated platform (version facts, current
//! grants, rationale hints), the user's scripted answers, and which
//! callbacks the application registers.
//!
//! ```json
//! {
//!   "name": "camera after one refusal",
//!   "platform": { "os_version": 33, "target_version": 33 },
//!   "request": ["CAMERA"],
//!   "rounds": [{ "CAMERA": "deny" }, { "CAMERA": "grant" }],
//!   "explain": true
//! }
//! ```
//!
//! Capability ids without a namespace are expanded to `android.permission.*`.

use capgate_api::{Capability, PlatformFacts, RequestOutcome};
use capgate_engine::gateway::ScriptedAnswer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Namespace prepended to bare capability ids
pub const DEFAULT_NAMESPACE: &str = "android.permission.";

/// Error type for scenario loading
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("Failed to read scenario: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse scenario: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid scenario: {0}")]
    Invalid(String),

    #[error("Scenario did not complete within {0} seconds")]
    Timeout(u64),

    #[error("Scenario run failed: {0}")]
    Engine(#[from] capgate_engine::EngineError),
}

/// Expand a bare id like `CAMERA` into its namespaced form
pub fn expand_capability(id: &str) -> Capability {
    if id.contains('.') {
        Capability::from(id)
    } else {
        Capability::new(format!("{}{}", DEFAULT_NAMESPACE, id))
    }
}

/// Expected outcome, checked after the run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expectation {
    pub all_granted: Option<bool>,
    #[serde(default)]
    pub granted: Option<Vec<String>>,
    #[serde(default)]
    pub denied: Option<Vec<String>>,
}

impl Expectation {
    /// Whether `outcome` satisfies every stated expectation
    pub fn matches(&self, outcome: &RequestOutcome) -> bool {
        let same = |expected: &Option<Vec<String>>, actual: &[Capability]| match expected {
            Some(ids) => {
                let mut expected: Vec<Capability> = ids.iter().map(|id| expand_capability(id)).collect();
                expected.sort();
                expected.dedup();
                expected == actual
            }
            None => true,
        };
        self.all_granted.map_or(true, |v| v == outcome.all_granted)
            && same(&self.granted, &outcome.granted)
            && same(&self.denied, &outcome.denied)
    }
}

fn default_decision() -> bool {
    true
}

fn default_timeout() -> u64 {
    5
}

/// A simulation scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub name: String,
    pub platform: PlatformFacts,
    /// Capabilities the application requests
    pub request: Vec<String>,
    /// Granted before the run
    #[serde(default)]
    pub granted: Vec<String>,
    /// Rationale hint available before the run
    #[serde(default)]
    pub rationale: Vec<String>,
    /// User answers per grant round, in order
    #[serde(default)]
    pub rounds: Vec<BTreeMap<String, ScriptedAnswer>>,
    /// Granted by the user while in the settings screen
    #[serde(default)]
    pub settings_grants: Vec<String>,
    /// Answers to presented decisions, in order
    #[serde(default)]
    pub decisions: Vec<bool>,
    /// Answer once `decisions` is exhausted
    #[serde(default = "default_decision")]
    pub default_decision: bool,
    #[serde(default)]
    pub explain_before_request: bool,
    /// Register an explain callback that shows a rationale dialog
    #[serde(default)]
    pub explain: bool,
    /// Register a forward callback that offers the settings screen
    #[serde(default)]
    pub forward: bool,
    #[serde(default)]
    pub expect: Option<Expectation>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Scenario {
    /// Load and validate a scenario file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ScenarioError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self, ScenarioError> {
        let scenario: Scenario = serde_json::from_str(json)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Reject scenarios that script capabilities nobody asks about
    pub fn validate(&self) -> Result<(), ScenarioError> {
        if self.timeout_secs == 0 {
            return Err(ScenarioError::Invalid("timeout_secs must be positive".into()));
        }
        let requested = self.requested();
        for (index, round) in self.rounds.iter().enumerate() {
            for id in round.keys() {
                if !requested.contains(&expand_capability(id)) {
                    return Err(ScenarioError::Invalid(format!(
                        "round {} answers unrequested capability {}",
                        index + 1,
                        id
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn requested(&self) -> Vec<Capability> {
        expand_all(&self.request)
    }

    pub fn initially_granted(&self) -> Vec<Capability> {
        expand_all(&self.granted)
    }

    pub fn rationale_hints(&self) -> Vec<Capability> {
        expand_all(&self.rationale)
    }

    pub fn settings_grant_list(&self) -> Vec<Capability> {
        expand_all(&self.settings_grants)
    }

    /// Scripted rounds with expanded ids
    pub fn scripted_rounds(&self) -> Vec<Vec<(Capability, ScriptedAnswer)>> {
        self.rounds
            .iter()
            .map(|round| {
                round
                    .iter()
                    .map(|(id, answer)| (expand_capability(id), *answer))
                    .collect()
            })
            .collect()
    }

    /// Display name (falls back to "unnamed")
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            "unnamed"
        } else {
            &self.name
        }
    }
}

fn expand_all(ids: &[String]) -> Vec<Capability> {
    ids.iter().map(|id| expand_capability(id)).collect()
}
