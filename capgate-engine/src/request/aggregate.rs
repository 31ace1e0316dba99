//! Terminal result computation

use capgate_api::{Capability, RequestOutcome};
use std::collections::BTreeSet;

use super::context::RequestContext;

/// Folds the classification sets of a finished run into its outcome
pub struct ResultAggregator;

impl ResultAggregator {
    /// `denied` is the union of denied, permanently denied and unrequestable.
    ///
    /// A requested capability that never got classified is reported as
    /// denied; a final result never silently drops a capability.
    pub fn aggregate(ctx: &RequestContext, requested: &BTreeSet<Capability>) -> RequestOutcome {
        let granted: Vec<Capability> = ctx.granted().iter().cloned().collect();

        let mut denied: BTreeSet<Capability> = ctx
            .denied()
            .iter()
            .chain(ctx.permanently_denied())
            .chain(ctx.unrequestable())
            .cloned()
            .collect();

        for capability in requested {
            if ctx.state_of(capability).is_none() {
                tracing::warn!(capability = %capability, "Capability finished unclassified");
                denied.insert(capability.clone());
            }
        }

        RequestOutcome::new(granted, denied.into_iter().collect())
    }
}
