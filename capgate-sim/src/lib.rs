//! capgate-sim: drive the capgate engine from scenario files
//!
//! Scenarios script a fake platform and a fake user so the full request
//! flow (rounds, rationale dialogs, settings detours) can be exercised
//! without a device.

pub mod scenario;
pub mod simulate;
pub mod tracing_support;

pub use scenario::{expand_capability, Expectation, Scenario, ScenarioError};
pub use simulate::{run_scenario, SimulationReport};
