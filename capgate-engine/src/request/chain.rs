//! The ordered task chain of one orchestration run
//!
//! Tasks live in an arena (`Vec`) and link forward by index. Execution
//! starts at the head and moves strictly forward; a finished task is
//! never entered again.

use capgate_api::Capability;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

use super::partition::{Partition, SpecialGroup};
use super::scope::DecisionKind;

/// Index of a task inside its chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(usize);

/// Variant of a request task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Ordinary capabilities, requested together in one round
    Normal,
    /// A specially-gated group with its own round
    Special(SpecialGroup),
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => f.write_str("normal"),
            Self::Special(group) => write!(f, "{}", group),
        }
    }
}

/// Where a task stands in its protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    /// A grant round for `round` is in flight
    AwaitingPlatformResult { round: BTreeSet<Capability> },
    /// A decision is on screen
    AwaitingUserDecision {
        kind: DecisionKind,
        permissions: Vec<Capability>,
    },
    /// The user is in the app-settings surface
    AwaitingSettingsReturn,
    Finished,
}

impl TaskState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::AwaitingPlatformResult { .. } => "awaiting_platform_result",
            Self::AwaitingUserDecision { .. } => "awaiting_user_decision",
            Self::AwaitingSettingsReturn => "awaiting_settings_return",
            Self::Finished => "finished",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Finished)
    }
}

/// One node of the chain
#[derive(Debug, Clone)]
pub struct RequestTask {
    pub kind: TaskKind,
    /// Capabilities this task is responsible for
    pub group: BTreeSet<Capability>,
    pub state: TaskState,
    /// Grant rounds issued so far
    pub rounds: usize,
    next: Option<TaskId>,
}

impl RequestTask {
    pub fn next(&self) -> Option<TaskId> {
        self.next
    }
}

/// Singly-linked list of tasks, stored as an arena
#[derive(Debug, Clone, Default)]
pub struct RequestChain {
    tasks: Vec<RequestTask>,
    head: Option<TaskId>,
    tail: Option<TaskId>,
    current: Option<TaskId>,
}

impl RequestChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the chain for a partition
    ///
    /// The normal task is always present, even when it has nothing to ask;
    /// special tasks follow in chain order.
    pub fn from_partition(partition: &Partition) -> Self {
        let mut chain = Self::new();
        chain.add_task(TaskKind::Normal, partition.ordinary.clone());
        for group in &partition.special {
            let members = BTreeSet::from([group.capability()]);
            chain.add_task(TaskKind::Special(*group), members);
        }
        chain
    }

    /// Append a task at the tail
    pub fn add_task(&mut self, kind: TaskKind, group: BTreeSet<Capability>) -> TaskId {
        let id = TaskId(self.tasks.len());
        self.tasks.push(RequestTask {
            kind,
            group,
            state: TaskState::Pending,
            rounds: 0,
            next: None,
        });
        match self.tail {
            Some(TaskId(tail)) => self.tasks[tail].next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        id
    }

    pub fn head(&self) -> Option<TaskId> {
        self.head
    }

    /// Task currently in control, if any
    pub fn current(&self) -> Option<TaskId> {
        self.current
    }

    pub(crate) fn set_current(&mut self, id: Option<TaskId>) {
        self.current = id;
    }

    pub fn task(&self, id: TaskId) -> &RequestTask {
        &self.tasks[id.0]
    }

    pub fn task_mut(&mut self, id: TaskId) -> &mut RequestTask {
        &mut self.tasks[id.0]
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks in execution order
    pub fn iter(&self) -> ChainIter<'_> {
        ChainIter {
            chain: self,
            cursor: self.head,
        }
    }
}

pub struct ChainIter<'a> {
    chain: &'a RequestChain,
    cursor: Option<TaskId>,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = &'a RequestTask;

    fn next(&mut self) -> Option<Self::Item> {
        let task = self.chain.task(self.cursor?);
        self.cursor = task.next;
        Some(task)
    }
}
