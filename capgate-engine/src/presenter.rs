//! Decision presenter seam
//!
//! Rendering is out of scope for the engine. A presenter shows a
//! [`DecisionDialog`] however it likes and later posts
//! [`EventKind::DecisionMade`](crate::event::EventKind::DecisionMade) with
//! the ticket it was given.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::event::{EventSender, PlatformEvent, Ticket};
use crate::request::DecisionDialog;

/// Presents binary decisions to the user
pub trait DecisionPresenter {
    /// Show `dialog`; answer later with a decision event carrying `ticket`
    fn present(&mut self, ticket: Ticket, dialog: &DecisionDialog);

    /// Take down whatever is on screen (the run was abandoned)
    fn dismiss(&mut self) {}
}

// ============================================================================
// Scripted Presenter (for testing and simulation)
// ============================================================================

#[derive(Debug, Default)]
struct PresenterState {
    answers: VecDeque<bool>,
    shown: Vec<DecisionDialog>,
    pending: Option<Ticket>,
    dismissed: usize,
}

/// Presenter that answers from a script and records what it showed
///
/// With auto-answer on, each presented decision is answered immediately
/// from the queued answers, falling back to the default answer. With it
/// off, decisions stay pending until [`ScriptedPresenter::respond`].
#[derive(Debug, Clone)]
pub struct ScriptedPresenter {
    events: EventSender,
    default_answer: bool,
    auto_answer: bool,
    state: Arc<Mutex<PresenterState>>,
}

impl ScriptedPresenter {
    /// Presenter that accepts every decision
    pub fn accepting(events: EventSender) -> Self {
        Self {
            events,
            default_answer: true,
            auto_answer: true,
            state: Arc::new(Mutex::new(PresenterState::default())),
        }
    }

    /// Presenter that declines every decision
    pub fn declining(events: EventSender) -> Self {
        Self {
            default_answer: false,
            ..Self::accepting(events)
        }
    }

    /// Presenter that leaves decisions pending
    pub fn manual(events: EventSender) -> Self {
        Self {
            auto_answer: false,
            ..Self::accepting(events)
        }
    }

    /// Queue explicit answers, used before the default
    pub fn with_answers(self, answers: impl IntoIterator<Item = bool>) -> Self {
        self.lock().answers.extend(answers);
        self
    }

    /// Answer the pending decision, if any
    pub fn respond(&self, proceed: bool) -> bool {
        let pending = self.lock().pending.take();
        match pending {
            Some(ticket) => {
                self.post(PlatformEvent::decision(ticket, proceed));
                true
            }
            None => false,
        }
    }

    /// Decisions shown so far
    pub fn shown(&self) -> Vec<DecisionDialog> {
        self.lock().shown.clone()
    }

    pub fn shown_count(&self) -> usize {
        self.lock().shown.len()
    }

    pub fn has_pending(&self) -> bool {
        self.lock().pending.is_some()
    }

    pub fn dismissed_count(&self) -> usize {
        self.lock().dismissed
    }

    fn lock(&self) -> MutexGuard<'_, PresenterState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn post(&self, event: PlatformEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("Event channel closed; scripted decision discarded");
        }
    }
}

impl DecisionPresenter for ScriptedPresenter {
    fn present(&mut self, ticket: Ticket, dialog: &DecisionDialog) {
        let answer = {
            let mut state = self.lock();
            state.shown.push(dialog.clone());
            if self.auto_answer {
                Some(state.answers.pop_front().unwrap_or(self.default_answer))
            } else {
                state.pending = Some(ticket);
                None
            }
        };
        if let Some(proceed) = answer {
            tracing::debug!(kind = ?dialog.kind, proceed, "Scripted decision");
            self.post(PlatformEvent::decision(ticket, proceed));
        }
    }

    fn dismiss(&mut self) {
        let mut state = self.lock();
        state.pending = None;
        state.dismissed += 1;
    }
}
