//! Mutable state shared by every task of one orchestration run

use capgate_api::{Capability, CapabilityState};
use std::collections::BTreeSet;

/// Classification sets and one-shot flags of an orchestration run
///
/// The four classification sets are kept pairwise disjoint: moving a
/// capability into one set removes it from the others. A permanently denied
/// capability never moves back to `denied`.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    granted: BTreeSet<Capability>,
    denied: BTreeSet<Capability>,
    permanently_denied: BTreeSet<Capability>,
    unrequestable: BTreeSet<Capability>,
    /// Capabilities sent to the settings screen, re-requested on return
    pending_forward: BTreeSet<Capability>,
    /// Permanent denials from a round whose decision went to the explain path
    carried_permanent: BTreeSet<Capability>,
    explain_before_request: bool,
    dialog_action_taken: bool,
}

impl RequestContext {
    pub fn new(explain_before_request: bool) -> Self {
        Self {
            explain_before_request,
            ..Self::default()
        }
    }

    pub fn granted(&self) -> &BTreeSet<Capability> {
        &self.granted
    }

    pub fn denied(&self) -> &BTreeSet<Capability> {
        &self.denied
    }

    pub fn permanently_denied(&self) -> &BTreeSet<Capability> {
        &self.permanently_denied
    }

    pub fn unrequestable(&self) -> &BTreeSet<Capability> {
        &self.unrequestable
    }

    pub fn pending_forward(&self) -> &BTreeSet<Capability> {
        &self.pending_forward
    }

    /// Current classification of `capability`, if it has one
    pub fn state_of(&self, capability: &Capability) -> Option<CapabilityState> {
        if self.granted.contains(capability) {
            Some(CapabilityState::Granted)
        } else if self.denied.contains(capability) {
            Some(CapabilityState::Denied)
        } else if self.permanently_denied.contains(capability) {
            Some(CapabilityState::PermanentlyDenied)
        } else if self.unrequestable.contains(capability) {
            Some(CapabilityState::Unrequestable)
        } else {
            None
        }
    }

    pub fn mark_granted(&mut self, capability: Capability) {
        self.denied.remove(&capability);
        self.permanently_denied.remove(&capability);
        self.unrequestable.remove(&capability);
        self.granted.insert(capability);
    }

    /// Record a soft denial
    ///
    /// Returns the resulting state, which stays `PermanentlyDenied` when the
    /// capability was already permanently denied.
    pub fn mark_denied(&mut self, capability: Capability) -> CapabilityState {
        self.granted.remove(&capability);
        if self.permanently_denied.contains(&capability) {
            return CapabilityState::PermanentlyDenied;
        }
        self.unrequestable.remove(&capability);
        self.denied.insert(capability);
        CapabilityState::Denied
    }

    pub fn mark_permanently_denied(&mut self, capability: Capability) -> CapabilityState {
        self.granted.remove(&capability);
        self.denied.remove(&capability);
        self.unrequestable.remove(&capability);
        self.permanently_denied.insert(capability);
        CapabilityState::PermanentlyDenied
    }

    pub fn mark_unrequestable(&mut self, capability: Capability) {
        self.granted.remove(&capability);
        self.denied.remove(&capability);
        self.permanently_denied.remove(&capability);
        self.unrequestable.insert(capability);
    }

    /// Granted capabilities inside `group`
    pub fn granted_within(&self, group: &BTreeSet<Capability>) -> BTreeSet<Capability> {
        self.granted.intersection(group).cloned().collect()
    }

    /// Permanently denied capabilities inside `group`
    pub fn permanently_denied_within(&self, group: &BTreeSet<Capability>) -> BTreeSet<Capability> {
        self.permanently_denied.intersection(group).cloned().collect()
    }

    /// Capabilities of `group` that are currently denied in either way
    pub fn refused_within(&self, group: &BTreeSet<Capability>) -> BTreeSet<Capability> {
        group
            .iter()
            .filter(|c| self.denied.contains(*c) || self.permanently_denied.contains(*c))
            .cloned()
            .collect()
    }

    /// Consume the explain-before-request flag
    pub fn take_explain_before_request(&mut self) -> bool {
        std::mem::take(&mut self.explain_before_request)
    }

    pub fn explain_before_request(&self) -> bool {
        self.explain_before_request
    }

    /// Reset per-round flags; called at the start of every round
    pub fn begin_round(&mut self) {
        self.dialog_action_taken = false;
    }

    pub fn mark_dialog_action(&mut self) {
        self.dialog_action_taken = true;
    }

    pub fn dialog_action_taken(&self) -> bool {
        self.dialog_action_taken
    }

    pub fn set_pending_forward(&mut self, capabilities: impl IntoIterator<Item = Capability>) {
        self.pending_forward = capabilities.into_iter().collect();
    }

    pub fn take_pending_forward(&mut self) -> BTreeSet<Capability> {
        std::mem::take(&mut self.pending_forward)
    }

    pub fn carry_permanent(&mut self, capabilities: impl IntoIterator<Item = Capability>) {
        self.carried_permanent.extend(capabilities);
    }

    /// Carried permanent denials that are still permanently denied, inside `group`
    pub fn carried_within(&self, group: &BTreeSet<Capability>) -> BTreeSet<Capability> {
        self.carried_permanent
            .iter()
            .filter(|c| group.contains(*c) && self.permanently_denied.contains(*c))
            .cloned()
            .collect()
    }

    pub fn clear_carried(&mut self) {
        self.carried_permanent.clear();
    }

    /// Every classified capability
    pub fn classified(&self) -> BTreeSet<Capability> {
        self.granted
            .iter()
            .chain(&self.denied)
            .chain(&self.permanently_denied)
            .chain(&self.unrequestable)
            .cloned()
            .collect()
    }

    /// Whether the four classification sets are pairwise disjoint
    pub fn is_disjoint(&self) -> bool {
        let total = self.granted.len()
            + self.denied.len()
            + self.permanently_denied.len()
            + self.unrequestable.len();
        total == self.classified().len()
    }
}
