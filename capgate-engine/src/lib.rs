//! capgate-engine: Capability request orchestration
//!
//! Requests a set of OS-gated capabilities, handles partial and permanent
//! refusals, surfaces rationale and forward-to-settings decisions, and
//! reports one final outcome per run.
//!
//! # Example
//!
//! ```rust,ignore
//! CapGate::init(&mut host)
//!     .permissions([permission::CAMERA, permission::RECORD_AUDIO])
//!     .explain_reason_before_request()
//!     .on_explain_request_reason(|scope, denied, before| {
//!         scope.show_request_reason_dialog(denied.to_vec(), "Needed for calls", "OK", Some("Cancel"));
//!     })
//!     .on_forward_to_settings(|scope, denied| {
//!         scope.show_forward_to_settings_dialog(denied.to_vec(), "Enable in settings", "Open", None);
//!     })
//!     .request(|outcome| println!("all granted: {}", outcome.all_granted))?;
//!
//! host.drive(&mut events).await;
//! ```

pub mod audit;
pub mod builder;
pub mod error;
pub mod event;
pub mod gateway;
pub mod host;
pub mod presenter;
pub mod presets;
pub mod request;

pub use builder::{CapGate, PermissionMediator, RequestBuilder};
pub use error::EngineError;
pub use event::{event_channel, EventKind, PlatformEvent, RequestCode, RunId, Ticket};
pub use gateway::{is_granted, PlatformGateway};
pub use host::{Delivery, RequestHost};
pub use presenter::DecisionPresenter;
pub use presets::{HostConfig, HostConfigBuilder, HostPresets, PresetError};
pub use request::{
    DecisionDialog, DecisionKind, ExplainScope, ForwardScope, SpecialGroup, TaskKind, TaskState,
};

pub use capgate_api::{Capability, CapabilityState, PlatformFacts, RequestOutcome};
