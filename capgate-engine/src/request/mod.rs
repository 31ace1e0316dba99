//! Capability request orchestration
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       Orchestration                          │
//! │  ┌────────────┐   ┌────────────────┐   ┌──────────────────┐  │
//! │  │ Partition  │──▶│  RequestChain  │──▶│ ResultAggregator │  │
//! │  └────────────┘   └───────┬────────┘   └──────────────────┘  │
//! │                           │ one task at a time               │
//! │           ┌───────────────┼────────────────┐                 │
//! │           ▼               ▼                ▼                 │
//! │   classify_round ──▶   decide   ──▶ Explain/ForwardScope     │
//! │           │                                │                 │
//! │           └──────── RequestContext ◀───────┘                 │
//! └──────────────────────────────────────────────────────────────┘
//!               ▲ events                  │ requests, decisions
//!               │                         ▼
//!        PlatformGateway / DecisionPresenter (external)
//! ```
//!
//! A run partitions the requested capabilities, builds one task per group,
//! and executes the tasks front to back. Each task suspends at most at one
//! of three points (grant round, user decision, settings detour) and is
//! resumed by an event carrying the matching ticket.

mod aggregate;
mod chain;
mod context;
mod orchestrator;
mod partition;
mod scope;
mod task;

pub use aggregate::ResultAggregator;
pub use chain::{RequestChain, RequestTask, TaskId, TaskKind, TaskState};
pub use context::RequestContext;
pub use orchestrator::{
    Callbacks, ExplainCallback, FinalCallback, ForwardCallback, Orchestration, Progress,
};
pub(crate) use orchestrator::Collaborators;
pub use partition::{partition, Partition, RefusalClass, Routing, SpecialGroup, CHAIN_ORDER};
pub use scope::{DecisionDialog, DecisionKind, ExplainScope, ForwardScope};
pub use task::{
    classify_round, decide, Applicability, CallbackPresence, Decision, RoundClassification,
};
