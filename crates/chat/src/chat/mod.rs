/// Event contracts published to front-ends.
pub mod events;
pub mod coordinator;
pub mod history;
/// In-memory conversation entries and their storage mapping.
pub mod message;
pub mod outcome;

pub use coordinator::{CoordinatorError, CoordinatorResult, GenerationCoordinator};
pub use events::{CoordinatorEvent, GenerationId, OutcomeKind, SubmitOutcome, SubmitRejection};
pub use history::PromptHistoryBuilder;
pub use message::{Message, Sender};
pub use outcome::GenerationOutcome;
