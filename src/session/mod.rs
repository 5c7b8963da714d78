//! One call session: roster, chat, call state and the actor tying them together.

pub mod chat;
pub mod coordinator;
pub mod handle;
pub mod registry;
pub mod state;


pub use chat::{ChatChannel, ChatError, ChatMessage};
pub use coordinator::{CallCoordinator, CallSnapshot, Command, Session, UiEvent};
pub use handle::{CallSession, SessionDeps};
pub use registry::{Participant, ParticipantRegistry, Role};
pub use state::{next_state, CallState, CallTrigger, EndReason};
