//! sprout-core: companion core library (profile types, persistence, routine
//! catalog, and the conversation bridge).
//!
//! The turn-taking controller lives in `sprout-voice`; this crate holds
//! everything it consumes.

mod config;
mod conversation;
mod error;
mod profile;
mod routine;
mod store;

pub use config::CompanionConfig;
pub use conversation::{
    CompanionBridge, ConversationBackend, ConversationReply, ConversationRequest, Message,
    MessageRole, ScriptedBackend, TimeOfDay,
};
pub use error::{CoreError, CoreResult};
pub use profile::{ChildProfile, CommunicationLevel, ParentSettings, SensoryPreference};
pub use routine::{Routine, RoutineCatalog, RoutineStep};
pub use store::ProfileStore;
