//! Platform gateway seam
//!
//! The gateway is the only source of truth for grant status and rationale
//! hints, and it executes the asynchronous operations. Results of
//! [`PlatformGateway::request_async`] and
//! [`PlatformGateway::open_app_settings`] are posted later on the event
//! channel with the ticket they were issued with.

use capgate_api::{Capability, PlatformFacts};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::event::{EventSender, PlatformEvent, Ticket};

/// Platform operations consumed by the engine
pub trait PlatformGateway {
    /// OS and target version of the running application
    fn facts(&self) -> PlatformFacts;

    /// Whether `capability` is granted right now
    fn is_granted(&self, capability: &Capability) -> bool;

    /// Whether the platform would still show its rationale hint for `capability`
    fn should_show_rationale(&self, capability: &Capability) -> bool;

    /// Start a grant round; post a grant result carrying `ticket` when done
    fn request_async(&mut self, ticket: Ticket, capabilities: &BTreeSet<Capability>);

    /// Open the app-settings surface; post a settings return carrying `ticket`
    fn open_app_settings(&mut self, ticket: Ticket);
}

/// Check a capability without starting a run
pub fn is_granted(gateway: &dyn PlatformGateway, capability: &Capability) -> bool {
    gateway.is_granted(capability)
}

// ============================================================================
// Scripted Gateway (for testing and simulation)
// ============================================================================

/// Scripted user answer to one capability in a grant round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptedAnswer {
    Grant,
    /// Refuse; the rationale hint stays available
    Deny,
    /// Refuse and tick "don't ask again"
    DenyPermanently,
}

/// A grant round the gateway was asked to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub ticket: Ticket,
    pub capabilities: Vec<Capability>,
}

#[derive(Debug, Default)]
struct ScriptState {
    granted: BTreeSet<Capability>,
    rationale: BTreeSet<Capability>,
    rounds: VecDeque<BTreeMap<Capability, ScriptedAnswer>>,
    settings_grants: BTreeSet<Capability>,
    requests: Vec<RecordedRequest>,
    settings_visits: usize,
}

/// Gateway answering grant rounds from a script and recording every call
///
/// Clones share state, so a test can keep a handle after moving the
/// gateway into a host. Rounds consume scripted answers in order; a
/// capability without a scripted answer keeps its current status.
#[derive(Debug, Clone)]
pub struct ScriptedGateway {
    facts: PlatformFacts,
    events: EventSender,
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedGateway {
    pub fn new(facts: PlatformFacts, events: EventSender) -> Self {
        Self {
            facts,
            events,
            state: Arc::new(Mutex::new(ScriptState::default())),
        }
    }

    /// Capabilities granted before the run starts
    pub fn with_granted<I, C>(self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Capability>,
    {
        self.lock().granted.extend(capabilities.into_iter().map(Into::into));
        self
    }

    /// Capabilities whose rationale hint is currently available
    pub fn with_rationale<I, C>(self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Capability>,
    {
        self.lock().rationale.extend(capabilities.into_iter().map(Into::into));
        self
    }

    /// Queue the answers for the next unscripted grant round
    pub fn with_round<I, C>(self, answers: I) -> Self
    where
        I: IntoIterator<Item = (C, ScriptedAnswer)>,
        C: Into<Capability>,
    {
        let round = answers.into_iter().map(|(c, a)| (c.into(), a)).collect();
        self.lock().rounds.push_back(round);
        self
    }

    /// Capabilities the user grants while in the settings surface
    pub fn with_settings_grants<I, C>(self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Capability>,
    {
        self.lock()
            .settings_grants
            .extend(capabilities.into_iter().map(Into::into));
        self
    }

    /// Grant a capability from outside the flow
    pub fn grant(&self, capability: impl Into<Capability>) {
        self.lock().granted.insert(capability.into());
    }

    /// Revoke a capability from outside the flow
    pub fn revoke(&self, capability: impl Into<Capability>) {
        let capability = capability.into();
        self.lock().granted.remove(&capability);
    }

    /// Grant rounds issued so far
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.lock().requests.len()
    }

    pub fn settings_visits(&self) -> usize {
        self.lock().settings_visits
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn post(&self, event: PlatformEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("Event channel closed; scripted result discarded");
        }
    }
}

impl PlatformGateway for ScriptedGateway {
    fn facts(&self) -> PlatformFacts {
        self.facts
    }

    fn is_granted(&self, capability: &Capability) -> bool {
        self.lock().granted.contains(capability)
    }

    fn should_show_rationale(&self, capability: &Capability) -> bool {
        let state = self.lock();
        !state.granted.contains(capability) && state.rationale.contains(capability)
    }

    fn request_async(&mut self, ticket: Ticket, capabilities: &BTreeSet<Capability>) {
        let results = {
            let mut state = self.lock();
            state.requests.push(RecordedRequest {
                ticket,
                capabilities: capabilities.iter().cloned().collect(),
            });
            let answers = state.rounds.pop_front().unwrap_or_default();

            let mut results = BTreeMap::new();
            for capability in capabilities {
                match answers.get(capability) {
                    Some(ScriptedAnswer::Grant) => {
                        state.granted.insert(capability.clone());
                        state.rationale.remove(capability);
                    }
                    Some(ScriptedAnswer::Deny) => {
                        state.granted.remove(capability);
                        state.rationale.insert(capability.clone());
                    }
                    Some(ScriptedAnswer::DenyPermanently) => {
                        state.granted.remove(capability);
                        state.rationale.remove(capability);
                    }
                    None => {}
                }
                results.insert(capability.clone(), state.granted.contains(capability));
            }
            results
        };
        tracing::debug!(code = ?ticket.code, count = results.len(), "Scripted grant round");
        self.post(PlatformEvent::grant_result(ticket, results));
    }

    fn open_app_settings(&mut self, ticket: Ticket) {
        {
            let mut state = self.lock();
            state.settings_visits += 1;
            let grants = std::mem::take(&mut state.settings_grants);
            for capability in grants {
                state.rationale.remove(&capability);
                state.granted.insert(capability);
            }
        }
        self.post(PlatformEvent::settings_returned(ticket));
    }
}
