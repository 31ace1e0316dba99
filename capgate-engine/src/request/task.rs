//! Per-task hooks, round classification and decision gating
//!
//! The generic protocol is the same for every task. Variants differ only
//! in three places, dispatched on [`TaskKind`]:
//!
//! - applicability (prerequisites checked before the first round)
//! - how a refusal is classified ([`RefusalClass`])
//! - what a retry re-requests
//!
//! Classification produces an immutable [`RoundClassification`]; [`decide`]
//! turns it into the single path taken this round.

use capgate_api::{Capability, CapabilityState};
use std::collections::{BTreeMap, BTreeSet};

use super::chain::TaskKind;
use super::context::RequestContext;
use super::partition::RefusalClass;
use crate::event::RequestCode;
use crate::gateway::PlatformGateway;

/// Whether a task may run its first round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applicability {
    Proceed,
    /// No prerequisite is granted; the whole group is unrequestable
    MissingPrerequisite,
}

impl TaskKind {
    pub fn request_code(&self) -> RequestCode {
        match self {
            Self::Normal => RequestCode::NormalRound,
            Self::Special(group) => group.request_code(),
        }
    }

    pub fn refusal(&self) -> RefusalClass {
        match self {
            Self::Normal => RefusalClass::Rationale,
            Self::Special(group) => group.refusal(),
        }
    }

    /// Check the group's prerequisites against the gateway
    pub fn applicability(&self, gateway: &dyn PlatformGateway) -> Applicability {
        let Self::Special(group) = self else {
            return Applicability::Proceed;
        };
        let prerequisites = group.prerequisites();
        if prerequisites.is_empty()
            || prerequisites
                .iter()
                .any(|id| gateway.is_granted(&Capability::from(*id)))
        {
            Applicability::Proceed
        } else {
            Applicability::MissingPrerequisite
        }
    }

    /// Capabilities a retry re-requests
    ///
    /// The normal task re-includes whatever it has granted so far, since
    /// the platform may revoke a grant outside this flow. A special group
    /// always retries its whole group.
    pub fn request_again_target(
        &self,
        group: &BTreeSet<Capability>,
        ctx: &RequestContext,
        requested: &[Capability],
    ) -> BTreeSet<Capability> {
        match self {
            Self::Normal => {
                let mut target = ctx.granted_within(group);
                target.extend(requested.iter().filter(|c| group.contains(*c)).cloned());
                target
            }
            Self::Special(_) => group.clone(),
        }
    }
}

/// Classification of one platform round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundClassification {
    pub granted: BTreeSet<Capability>,
    pub soft_denied: BTreeSet<Capability>,
    pub permanently_denied: BTreeSet<Capability>,
    /// Every capability of the group is granted
    pub all_granted: bool,
}

/// Classify the results of a round into `ctx`
///
/// Every capability of the round, plus everything of the group granted
/// earlier, is re-checked. Repeating the call with the same gateway answers
/// yields the same classification.
pub fn classify_round(
    ctx: &mut RequestContext,
    group: &BTreeSet<Capability>,
    round: &BTreeSet<Capability>,
    results: &BTreeMap<Capability, bool>,
    gateway: &dyn PlatformGateway,
    refusal: RefusalClass,
) -> RoundClassification {
    let mut checked: BTreeSet<Capability> = round.intersection(group).cloned().collect();
    checked.extend(ctx.granted_within(group));

    let mut out = RoundClassification::default();
    for capability in checked.iter().cloned() {
        let granted = results.get(&capability).copied().unwrap_or(false)
            || gateway.is_granted(&capability);
        if granted {
            ctx.mark_granted(capability.clone());
            out.granted.insert(capability);
            continue;
        }
        let soft = match refusal {
            RefusalClass::SoftOnly => true,
            RefusalClass::Rationale => gateway.should_show_rationale(&capability),
        };
        let state = if soft {
            ctx.mark_denied(capability.clone())
        } else {
            ctx.mark_permanently_denied(capability.clone())
        };
        if state == CapabilityState::PermanentlyDenied {
            out.permanently_denied.insert(capability);
        } else {
            out.soft_denied.insert(capability);
        }
    }

    // Refusals outside this round may have been lifted from settings.
    for capability in ctx.refused_within(group) {
        if !checked.contains(&capability) && gateway.is_granted(&capability) {
            ctx.mark_granted(capability);
        }
    }

    out.all_granted = group.iter().all(|c| ctx.granted().contains(c));
    out
}

/// Path taken after a round
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Invoke the explain callback with these soft-denied capabilities
    Explain(Vec<Capability>),
    /// Invoke the forward callback with these permanently denied capabilities
    Forward(Vec<Capability>),
    Finish,
}

/// Which decision callbacks the run registered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallbackPresence {
    pub explain: bool,
    pub forward: bool,
}

/// Pick the single path for a classified round
///
/// Explain has priority over forward. `carried` holds permanent denials
/// from an earlier round that went to the explain path. `permanent_in_group`
/// is what the forward callback receives.
pub fn decide(
    round: &RoundClassification,
    carried: &BTreeSet<Capability>,
    permanent_in_group: &BTreeSet<Capability>,
    callbacks: CallbackPresence,
) -> Decision {
    if round.all_granted {
        return Decision::Finish;
    }
    if callbacks.explain && !round.soft_denied.is_empty() {
        return Decision::Explain(round.soft_denied.iter().cloned().collect());
    }
    let triggered = !round.permanently_denied.is_empty() || !carried.is_empty();
    if callbacks.forward && triggered && !permanent_in_group.is_empty() {
        return Decision::Forward(permanent_in_group.iter().cloned().collect());
    }
    Decision::Finish
}
