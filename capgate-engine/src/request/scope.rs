//! Decision scopes handed to the explain and forward callbacks
//!
//! A scope only lets the callback describe the decision it wants shown.
//! The engine presents it after the callback returns; a callback that shows
//! nothing lets the task finish.
//!
//! # Example
//!
//! ```rust
//! use capgate_engine::request::{DecisionKind, ExplainScope, TaskKind};
//! use capgate_api::Capability;
//!
//! let mut shown = None;
//! let mut scope = ExplainScope::new(TaskKind::Normal, &mut shown);
//! scope.show_request_reason_dialog(
//!     [Capability::from("android.permission.CAMERA")],
//!     "The camera is needed to scan codes",
//!     "Allow",
//!     Some("Not now"),
//! );
//! assert_eq!(shown.unwrap().kind, DecisionKind::Rationale);
//! ```

use capgate_api::Capability;
use serde::{Deserialize, Serialize};

use super::chain::TaskKind;

/// What accepting a decision leads to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    /// Request the capabilities again
    Rationale,
    /// Open the app-settings surface, then request again
    ForwardToSettings,
}

/// A binary decision to present to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionDialog {
    pub kind: DecisionKind,
    /// Capabilities acted on when the user accepts
    pub permissions: Vec<Capability>,
    pub message: String,
    pub positive_label: String,
    /// Without a negative label the decision can only be accepted
    pub negative_label: Option<String>,
}

impl DecisionDialog {
    pub fn new(
        kind: DecisionKind,
        permissions: impl IntoIterator<Item = Capability>,
        message: impl Into<String>,
        positive_label: impl Into<String>,
        negative_label: Option<&str>,
    ) -> Self {
        Self {
            kind,
            permissions: permissions.into_iter().collect(),
            message: message.into(),
            positive_label: positive_label.into(),
            negative_label: negative_label.map(str::to_string),
        }
    }
}

/// Scope passed to the explain callback
pub struct ExplainScope<'a> {
    task: TaskKind,
    shown: &'a mut Option<DecisionDialog>,
}

impl<'a> ExplainScope<'a> {
    pub fn new(task: TaskKind, shown: &'a mut Option<DecisionDialog>) -> Self {
        Self { task, shown }
    }

    /// Task the scope is bound to
    pub fn task(&self) -> TaskKind {
        self.task
    }

    /// Ask the user whether to request `permissions` again
    pub fn show_request_reason_dialog(
        &mut self,
        permissions: impl IntoIterator<Item = Capability>,
        message: impl Into<String>,
        positive_label: impl Into<String>,
        negative_label: Option<&str>,
    ) {
        *self.shown = Some(DecisionDialog::new(
            DecisionKind::Rationale,
            permissions,
            message,
            positive_label,
            negative_label,
        ));
    }

    /// Show a pre-built dialog; its kind is forced to [`DecisionKind::Rationale`]
    pub fn show_dialog(&mut self, mut dialog: DecisionDialog) {
        dialog.kind = DecisionKind::Rationale;
        *self.shown = Some(dialog);
    }
}

/// Scope passed to the forward-to-settings callback
pub struct ForwardScope<'a> {
    task: TaskKind,
    shown: &'a mut Option<DecisionDialog>,
}

impl<'a> ForwardScope<'a> {
    pub fn new(task: TaskKind, shown: &'a mut Option<DecisionDialog>) -> Self {
        Self { task, shown }
    }

    pub fn task(&self) -> TaskKind {
        self.task
    }

    /// Ask the user whether to grant `permissions` from the settings screen
    pub fn show_forward_to_settings_dialog(
        &mut self,
        permissions: impl IntoIterator<Item = Capability>,
        message: impl Into<String>,
        positive_label: impl Into<String>,
        negative_label: Option<&str>,
    ) {
        *self.shown = Some(DecisionDialog::new(
            DecisionKind::ForwardToSettings,
            permissions,
            message,
            positive_label,
            negative_label,
        ));
    }

    /// Show a pre-built dialog; its kind is forced to [`DecisionKind::ForwardToSettings`]
    pub fn show_dialog(&mut self, mut dialog: DecisionDialog) {
        dialog.kind = DecisionKind::ForwardToSettings;
        *self.shown = Some(dialog);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_dialog_wins() {
        let mut shown = None;
        let mut scope = ExplainScope::new(TaskKind::Normal, &mut shown);
        scope.show_request_reason_dialog([Capability::from("a")], "first", "ok", None);
        scope.show_request_reason_dialog([Capability::from("b")], "second", "ok", None);

        let dialog = shown.unwrap();
        assert_eq!(dialog.message, "second");
        assert_eq!(dialog.permissions, vec![Capability::from("b")]);
    }

    #[test]
    fn test_show_dialog_forces_kind() {
        let mut shown = None;
        let dialog = DecisionDialog::new(
            DecisionKind::Rationale,
            [Capability::from("a")],
            "go",
            "Settings",
            Some("Cancel"),
        );
        ForwardScope::new(TaskKind::Normal, &mut shown).show_dialog(dialog);

        let dialog = shown.unwrap();
        assert_eq!(dialog.kind, DecisionKind::ForwardToSettings);
        assert_eq!(dialog.negative_label.as_deref(), Some("Cancel"));
    }

    #[test]
    fn test_untouched_scope_shows_nothing() {
        let mut shown = None;
        let scope = ForwardScope::new(TaskKind::Normal, &mut shown);
        assert_eq!(scope.task(), TaskKind::Normal);
        assert!(shown.is_none());
    }
}
