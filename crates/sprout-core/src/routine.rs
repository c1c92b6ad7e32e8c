//! Guided routines: named multi-step scripts for daily tasks.
//!
//! The catalog is static configuration data. Trigger matching is
//! case-insensitive substring containment, first matching routine in catalog
//! order wins — overlapping trigger phrases resolve by position, not by
//! specificity.

use serde::{Deserialize, Serialize};

/// One step of a routine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutineStep {
    /// What to tell the child to do.
    pub instruction: String,
    /// Spoken when the step is completed.
    pub encouragement: String,
}

impl RoutineStep {
    pub fn new(instruction: &str, encouragement: &str) -> Self {
        Self {
            instruction: instruction.to_string(),
            encouragement: encouragement.to_string(),
        }
    }
}

/// A named, ordered sequence of guided steps (e.g. brushing teeth).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Routine {
    /// Stable identifier (e.g. "teeth").
    pub id: String,
    /// Display name, spoken in the greeting.
    pub name: String,
    /// Phrases that start this routine when contained in an utterance.
    pub trigger_phrases: Vec<String>,
    pub steps: Vec<RoutineStep>,
}

impl Routine {
    /// True when `text` contains any trigger phrase (case-insensitive).
    pub fn matches(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.trigger_phrases
            .iter()
            .any(|phrase| lowered.contains(&phrase.to_lowercase()))
    }
}

/// The static list of routines the companion knows.
#[derive(Debug, Clone)]
pub struct RoutineCatalog {
    routines: Vec<Routine>,
}

impl RoutineCatalog {
    /// Build a catalog from explicit routines (for tests or custom content).
    pub fn new(routines: Vec<Routine>) -> Self {
        Self { routines }
    }

    /// First routine whose trigger phrases match the utterance, in catalog order.
    pub fn find_trigger_match(&self, text: &str) -> Option<&Routine> {
        self.routines.iter().find(|r| r.matches(text))
    }

    /// Look up a routine by id.
    pub fn get(&self, id: &str) -> Option<&Routine> {
        self.routines.iter().find(|r| r.id == id)
    }

    pub fn routines(&self) -> &[Routine] {
        &self.routines
    }

    /// The built-in routine set.
    pub fn builtin() -> Self {
        Self::new(vec![
            Routine {
                id: "teeth".to_string(),
                name: "Brushing Teeth".to_string(),
                trigger_phrases: vec!["brush".to_string(), "teeth".to_string()],
                steps: vec![
                    RoutineStep::new(
                        "Put a little toothpaste on your toothbrush.",
                        "Great job getting your toothbrush ready!",
                    ),
                    RoutineStep::new(
                        "Brush the top teeth in small circles.",
                        "Those top teeth are sparkling!",
                    ),
                    RoutineStep::new(
                        "Now brush the bottom teeth in small circles.",
                        "Wow, the bottom teeth too!",
                    ),
                    RoutineStep::new(
                        "Spit into the sink and rinse your brush.",
                        "All clean! Your smile is super shiny!",
                    ),
                ],
            },
            Routine {
                id: "dressed".to_string(),
                name: "Getting Dressed".to_string(),
                trigger_phrases: vec!["get dressed".to_string(), "clothes".to_string()],
                steps: vec![
                    RoutineStep::new(
                        "Pick out a shirt you like and put it on.",
                        "That shirt looks great on you!",
                    ),
                    RoutineStep::new(
                        "Now pants or a skirt — one leg at a time.",
                        "Nice work, one leg at a time!",
                    ),
                    RoutineStep::new(
                        "Socks next. Find a matching pair!",
                        "Matching socks, amazing!",
                    ),
                ],
            },
            Routine {
                id: "hands".to_string(),
                name: "Washing Hands".to_string(),
                trigger_phrases: vec!["wash".to_string(), "hands".to_string()],
                steps: vec![
                    RoutineStep::new(
                        "Turn on the water and wet your hands.",
                        "Splash! Good start!",
                    ),
                    RoutineStep::new(
                        "Rub soap all over — front, back, and between fingers.",
                        "Look at all those bubbles!",
                    ),
                    RoutineStep::new(
                        "Rinse the soap off and dry your hands.",
                        "Squeaky clean hands!",
                    ),
                ],
            },
            Routine {
                id: "tidy".to_string(),
                name: "Tidy Up Time".to_string(),
                trigger_phrases: vec!["tidy".to_string(), "clean up".to_string(), "toys away".to_string()],
                steps: vec![
                    RoutineStep::new(
                        "Pick three toys and put them in the toy box.",
                        "Three toys away already!",
                    ),
                    RoutineStep::new(
                        "Put any books back on the shelf.",
                        "The shelf looks so neat!",
                    ),
                    RoutineStep::new(
                        "Look around — anything left on the floor goes home too.",
                        "What a tidy room! You did it!",
                    ),
                ],
            },
            Routine {
                id: "bedtime".to_string(),
                name: "Bedtime".to_string(),
                trigger_phrases: vec!["bed".to_string(), "sleep".to_string(), "night".to_string()],
                steps: vec![
                    RoutineStep::new(
                        "Put on your pajamas.",
                        "Cozy pajamas, check!",
                    ),
                    RoutineStep::new(
                        "Climb into bed and get comfy under the covers.",
                        "You look so snug!",
                    ),
                    RoutineStep::new(
                        "Close your eyes and take three slow, deep breaths.",
                        "Sweet dreams, sleep tight!",
                    ),
                ],
            },
        ])
    }
}

impl Default for RoutineCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
