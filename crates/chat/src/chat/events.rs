use std::fmt;

use crate::chat::message::Message;

/// Identifier for one accepted submission.
///
/// Every accepted submit gets a fresh id so late fragments of an abandoned
/// generation can be told apart from the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GenerationId(pub u64);

impl GenerationId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a submit was ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubmitRejection {
    EmptyPrompt,
    ModelNotReady,
    AlreadyGenerating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubmitOutcome {
    Accepted(GenerationId),
    Rejected(SubmitRejection),
}

impl SubmitOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

/// How a generation ended, as reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    Completed,
    Cancelled,
    Failed,
}

/// State changes published by the coordinator.
///
/// `ConversationChanged` always carries a full snapshot, so observers never
/// need to track individual edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorEvent {
    ConversationChanged(Vec<Message>),
    GeneratingChanged(bool),
    ModelReadyChanged(bool),
    Error(String),
    Finalized {
        generation: GenerationId,
        outcome: OutcomeKind,
    },
}
