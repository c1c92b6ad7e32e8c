//! Child profile and parent settings.
//!
//! The profile personalizes greetings and escalation phrases; the controller
//! reads it at session start and never mutates it.

use serde::{Deserialize, Serialize};

/// How much language the child is comfortable with. Shapes reply length upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CommunicationLevel {
    Emerging,
    #[default]
    Conversational,
    Advanced,
}

/// Sensory preference: drives voice selection and playback volume downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SensoryPreference {
    #[default]
    Calm,
    Energetic,
    Quiet,
}

/// The child's profile. Read-only to the turn-taking controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildProfile {
    /// Display name, used in greetings and caregiver-help requests.
    pub name: String,
    /// Things the child enjoys; the distraction offer draws from this list.
    #[serde(default)]
    pub likes: Vec<String>,
    /// Things to avoid mentioning.
    #[serde(default)]
    pub dislikes: Vec<String>,
    #[serde(default)]
    pub communication_level: CommunicationLevel,
    #[serde(default)]
    pub sensory_preference: SensoryPreference,
    /// Selected character skin for the avatar layer.
    #[serde(default = "default_skin")]
    pub character_skin: String,
}

fn default_skin() -> String {
    "sprout".to_string()
}

impl Default for ChildProfile {
    fn default() -> Self {
        Self {
            name: "friend".to_string(),
            likes: Vec::new(),
            dislikes: Vec::new(),
            communication_level: CommunicationLevel::default(),
            sensory_preference: SensoryPreference::default(),
            character_skin: default_skin(),
        }
    }
}

/// Caregiver-facing settings. Saved by the settings UI; the controller treats
/// the store as read-mostly during an active session.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ParentSettings {
    /// Hashed caregiver PIN (hex). Empty means no PIN is set.
    #[serde(default)]
    pub pin_hash: String,
    /// Preferred synthesis voice identifier, if the service supports one.
    #[serde(default)]
    pub voice: Option<String>,
    /// Optional overrides for the offline phrase set.
    #[serde(default)]
    pub offline_phrases: Vec<String>,
}
