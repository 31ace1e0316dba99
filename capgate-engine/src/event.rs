//! External events delivered into the engine
//!
//! Every asynchronous operation the engine starts (a grant round, a settings
//! detour, a presented decision) is tagged with a [`Ticket`]. The result comes
//! back as a [`PlatformEvent`] carrying the same ticket, through a single
//! channel.

use capgate_api::Capability;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Identifier of one orchestration run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(u64);

impl RunId {
    /// Allocate a fresh, process-unique run id
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Wrap a raw id (for hosts that persist tickets)
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kind of asynchronous operation a ticket was issued for
///
/// Each kind has its own numeric id; no two kinds share one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestCode {
    NormalRound,
    BackgroundLocation,
    Overlay,
    WriteSettings,
    ManageStorage,
    InstallPackages,
    Notifications,
    BodySensorsBackground,
    SettingsReturn,
    Decision,
}

impl RequestCode {
    pub const ALL: [RequestCode; 10] = [
        Self::NormalRound,
        Self::BackgroundLocation,
        Self::Overlay,
        Self::WriteSettings,
        Self::ManageStorage,
        Self::InstallPackages,
        Self::Notifications,
        Self::BodySensorsBackground,
        Self::SettingsReturn,
        Self::Decision,
    ];

    /// Numeric id, for hosts that route results by integer request codes
    pub const fn id(self) -> u16 {
        match self {
            Self::NormalRound => 1,
            Self::BackgroundLocation => 2,
            Self::Overlay => 3,
            Self::WriteSettings => 4,
            Self::ManageStorage => 5,
            Self::InstallPackages => 6,
            Self::Notifications => 7,
            Self::BodySensorsBackground => 8,
            Self::SettingsReturn => 9,
            Self::Decision => 10,
        }
    }

    /// Reverse of [`RequestCode::id`]
    pub fn from_id(id: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|code| code.id() == id)
    }

    /// Whether the code belongs to a grant round (as opposed to a detour)
    pub fn is_grant_round(self) -> bool {
        !matches!(self, Self::SettingsReturn | Self::Decision)
    }
}

/// Correlates an asynchronous result with the run and operation that started it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ticket {
    pub run: RunId,
    pub code: RequestCode,
}

impl Ticket {
    pub fn new(run: RunId, code: RequestCode) -> Self {
        Self { run, code }
    }
}

/// Payload of an external event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum EventKind {
    /// Per-capability results of a grant round
    GrantResult { results: BTreeMap<Capability, bool> },
    /// Control came back from the app-settings surface
    SettingsReturned,
    /// The user answered a presented decision
    DecisionMade { proceed: bool },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::GrantResult { .. } => "grant_result",
            Self::SettingsReturned => "settings_returned",
            Self::DecisionMade { .. } => "decision_made",
        }
    }
}

/// An event delivered into the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformEvent {
    pub ticket: Ticket,
    pub kind: EventKind,
}

impl PlatformEvent {
    pub fn grant_result(ticket: Ticket, results: BTreeMap<Capability, bool>) -> Self {
        Self {
            ticket,
            kind: EventKind::GrantResult { results },
        }
    }

    pub fn settings_returned(ticket: Ticket) -> Self {
        Self {
            ticket,
            kind: EventKind::SettingsReturned,
        }
    }

    pub fn decision(ticket: Ticket, proceed: bool) -> Self {
        Self {
            ticket,
            kind: EventKind::DecisionMade { proceed },
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<PlatformEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<PlatformEvent>;

/// Create the channel gateways and presenters post their results on
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_request_codes_are_distinct() {
        let ids: HashSet<u16> = RequestCode::ALL.iter().map(|c| c.id()).collect();
        assert_eq!(ids.len(), RequestCode::ALL.len());
    }

    #[test]
    fn test_request_code_from_id() {
        for code in RequestCode::ALL {
            assert_eq!(RequestCode::from_id(code.id()), Some(code));
        }
        assert_eq!(RequestCode::from_id(0), None);
    }

    #[test]
    fn test_settings_and_decision_are_not_grant_rounds() {
        assert!(RequestCode::NormalRound.is_grant_round());
        assert!(RequestCode::Overlay.is_grant_round());
        assert!(!RequestCode::SettingsReturn.is_grant_round());
        assert!(!RequestCode::Decision.is_grant_round());
    }

    #[test]
    fn test_run_ids_are_unique() {
        let a = RunId::next();
        let b = RunId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn test_event_serialization() {
        let ticket = Ticket::new(RunId::from_raw(7), RequestCode::Decision);
        let event = PlatformEvent::decision(ticket, true);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("decision_made"));
        assert!(json.contains("\"proceed\":true"));
    }
}
