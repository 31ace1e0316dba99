//! Fluent entry point for application code
//!
//! # Example
//!
//! ```rust
//! use capgate_api::{permission, PlatformFacts};
//! use capgate_engine::{event_channel, CapGate, HostPresets, RequestHost};
//! use capgate_engine::gateway::ScriptedGateway;
//! use capgate_engine::presenter::ScriptedPresenter;
//!
//! let (tx, mut rx) = event_channel();
//! let gateway = ScriptedGateway::new(PlatformFacts::new(33, 33), tx.clone())
//!     .with_granted([permission::CAMERA]);
//! let presenter = ScriptedPresenter::accepting(tx);
//! let mut host = RequestHost::new(gateway, presenter, HostPresets::quiet());
//!
//! CapGate::init(&mut host)
//!     .permissions([permission::CAMERA])
//!     .on_explain_request_reason(|scope, denied, _before| {
//!         scope.show_request_reason_dialog(denied.to_vec(), "Needed to scan", "OK", Some("Cancel"));
//!     })
//!     .request(|outcome| assert!(outcome.all_granted))
//!     .unwrap();
//!
//! host.drain(&mut rx);
//! assert!(!host.is_running());
//! ```

use capgate_api::{Capability, RequestOutcome};

use crate::error::EngineError;
use crate::event::RunId;
use crate::host::RequestHost;
use crate::request::{
    partition, Callbacks, ExplainScope, ForwardScope, Orchestration, Partition,
};

/// Entry point
pub struct CapGate;

impl CapGate {
    /// Start configuring a request against `host`
    pub fn init(host: &mut RequestHost) -> PermissionMediator<'_> {
        PermissionMediator { host }
    }
}

/// Collects the capabilities to request
pub struct PermissionMediator<'h> {
    host: &'h mut RequestHost,
}

impl<'h> PermissionMediator<'h> {
    /// Request these capabilities (duplicates are ignored)
    pub fn permissions<I, C>(self, capabilities: I) -> RequestBuilder<'h>
    where
        I: IntoIterator<Item = C>,
        C: Into<Capability>,
    {
        let facts = self.host.facts();
        let partition = partition(capabilities.into_iter().map(Into::into), &facts);
        RequestBuilder {
            host: self.host,
            partition,
            explain_before_request: false,
            callbacks: Callbacks::default(),
        }
    }

    pub fn permission(self, capability: impl Into<Capability>) -> RequestBuilder<'h> {
        self.permissions([capability.into()])
    }
}

/// Configures and starts one orchestration run
pub struct RequestBuilder<'h> {
    host: &'h mut RequestHost,
    partition: Partition,
    explain_before_request: bool,
    callbacks: Callbacks,
}

impl<'h> RequestBuilder<'h> {
    /// How the requested capabilities were split for this platform
    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    /// Show the explain callback once before the first platform round
    pub fn explain_reason_before_request(mut self) -> Self {
        self.explain_before_request = true;
        self
    }

    /// Called with soft-denied capabilities and the before-request marker
    pub fn on_explain_request_reason<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&mut ExplainScope<'_>, &[Capability], bool) + 'static,
    {
        self.callbacks.explain = Some(Box::new(callback));
        self
    }

    /// Called with permanently denied capabilities
    pub fn on_forward_to_settings<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&mut ForwardScope<'_>, &[Capability]) + 'static,
    {
        self.callbacks.forward = Some(Box::new(callback));
        self
    }

    /// Start the run; `callback` receives the outcome exactly once
    ///
    /// When nothing needs asking, the run completes (and `callback` fires)
    /// before this returns.
    pub fn request<F>(mut self, callback: F) -> Result<RunId, EngineError>
    where
        F: FnOnce(RequestOutcome) + 'static,
    {
        if let Some(live) = self.host.run_id() {
            return Err(EngineError::RunInFlight(live));
        }
        self.callbacks.finished = Some(Box::new(callback));
        let run = Orchestration::new(
            RunId::next(),
            &self.partition,
            self.explain_before_request,
            self.callbacks,
        );
        self.host.start(run)
    }
}

impl std::fmt::Debug for RequestBuilder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestBuilder")
            .field("partition", &self.partition)
            .field("explain_before_request", &self.explain_before_request)
            .field("explain", &self.callbacks.explain.is_some())
            .field("forward", &self.callbacks.forward.is_some())
            .finish_non_exhaustive()
    }
}
