//! Frustration escalation: a threshold ladder over a consecutive-signal counter.
//!
//! The level is a pure function of the counter, computed as a lookup over
//! ordered thresholds so that only the single highest applicable tier fires
//! per increment. The help alert is sticky until a caregiver dismisses it.

use sprout_core::ChildProfile;
use tracing::info;

/// Qualitative frustration level derived from the counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrustrationLevel {
    None,
    Mild,
    Moderate,
    High,
}

/// Ordered ladder, highest tier first. The first threshold the counter meets
/// decides the level.
const LADDER: [(u32, FrustrationLevel); 3] = [
    (4, FrustrationLevel::High),
    (3, FrustrationLevel::Moderate),
    (1, FrustrationLevel::Mild),
];

impl FrustrationLevel {
    /// Level for a counter value.
    pub fn for_counter(counter: u32) -> Self {
        for (threshold, level) in LADDER {
            if counter >= threshold {
                return level;
            }
        }
        FrustrationLevel::None
    }
}

/// What the controller must do after a frustration increment. At most one
/// tier's action per increment.
#[derive(Debug, Clone)]
pub struct Escalation {
    pub level: FrustrationLevel,
    /// Spoken intervention, when the tier has one.
    pub utterance: Option<String>,
    /// True when this increment raised the sticky help alert.
    pub help_alert_raised: bool,
}

/// Counter plus the sticky help-alert flag. Owned by the controller.
#[derive(Debug, Default)]
pub struct FrustrationState {
    counter: u32,
    help_alert: bool,
}

impl FrustrationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn level(&self) -> FrustrationLevel {
        FrustrationLevel::for_counter(self.counter)
    }

    pub fn help_alert(&self) -> bool {
        self.help_alert
    }

    /// A routine-progress signal resets the counter, whatever its value.
    /// The help alert is not cleared here — only a caregiver dismisses it.
    pub fn record_progress(&mut self) {
        self.counter = 0;
    }

    /// Increment the counter and return the single highest applicable tier's
    /// action.
    pub fn record_frustration(&mut self, profile: &ChildProfile) -> Escalation {
        self.counter += 1;
        let level = self.level();
        info!(counter = self.counter, ?level, "frustration signal");

        match level {
            FrustrationLevel::High => {
                let raised = !self.help_alert;
                self.help_alert = true;
                Escalation {
                    level,
                    utterance: Some(format!(
                        "{}, this is tricky! Let's ask a grown-up to come help us.",
                        profile.name
                    )),
                    help_alert_raised: raised,
                }
            }
            FrustrationLevel::Moderate => {
                // Distraction offer, only when there is a like to reference.
                let utterance = pick_like(&profile.likes).map(|like| {
                    format!(
                        "How about a tiny break, {}? Let's think about {} for a moment!",
                        profile.name, like
                    )
                });
                Escalation {
                    level,
                    utterance,
                    help_alert_raised: false,
                }
            }
            FrustrationLevel::Mild | FrustrationLevel::None => Escalation {
                level,
                utterance: None,
                help_alert_raised: false,
            },
        }
    }

    /// Caregiver dismissal: clears the alert and resets the counter to zero.
    pub fn dismiss_help_alert(&mut self) {
        self.help_alert = false;
        self.counter = 0;
    }
}

/// Pseudo-random pick from the likes list. Clock-seeded; no RNG dependency
/// needed for a toy choice like this.
fn pick_like(likes: &[String]) -> Option<&String> {
    if likes.is_empty() {
        return None;
    }
    let nanos = chrono::Utc::now().timestamp_subsec_nanos() as usize;
    likes.get(nanos % likes.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile_with_likes() -> ChildProfile {
        ChildProfile {
            name: "Maya".to_string(),
            likes: vec!["dinosaurs".to_string(), "trains".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn ladder_levels_in_order() {
        let expected = [
            FrustrationLevel::None,
            FrustrationLevel::Mild,
            FrustrationLevel::Mild,
            FrustrationLevel::Moderate,
            FrustrationLevel::High,
        ];
        for (counter, want) in expected.into_iter().enumerate() {
            assert_eq!(FrustrationLevel::for_counter(counter as u32), want);
        }
        assert_eq!(FrustrationLevel::for_counter(9), FrustrationLevel::High);
    }

    #[test]
    fn moderate_tier_references_a_like() {
        let profile = profile_with_likes();
        let mut state = FrustrationState::new();
        state.record_frustration(&profile);
        state.record_frustration(&profile);
        let escalation = state.record_frustration(&profile);
        assert_eq!(escalation.level, FrustrationLevel::Moderate);
        let utterance = escalation.utterance.expect("distraction offer");
        assert!(
            profile.likes.iter().any(|like| utterance.contains(like)),
            "distraction must reference a like: {}",
            utterance
        );
    }

    #[test]
    fn moderate_tier_skipped_without_likes() {
        let profile = ChildProfile::default();
        let mut state = FrustrationState::new();
        state.record_frustration(&profile);
        state.record_frustration(&profile);
        let escalation = state.record_frustration(&profile);
        assert_eq!(escalation.level, FrustrationLevel::Moderate);
        assert!(escalation.utterance.is_none());
    }

    #[test]
    fn high_tier_raises_sticky_alert_and_names_child() {
        let profile = profile_with_likes();
        let mut state = FrustrationState::new();
        for _ in 0..3 {
            state.record_frustration(&profile);
        }
        let escalation = state.record_frustration(&profile);
        assert_eq!(escalation.level, FrustrationLevel::High);
        assert!(escalation.help_alert_raised);
        assert!(escalation.utterance.unwrap().contains("Maya"));
        assert!(state.help_alert());

        // Progress resets the counter but not the alert.
        state.record_progress();
        assert_eq!(state.counter(), 0);
        assert!(state.help_alert());

        // Only dismissal clears the alert.
        state.dismiss_help_alert();
        assert!(!state.help_alert());
        assert_eq!(state.level(), FrustrationLevel::None);
    }

    #[test]
    fn progress_resets_counter_at_any_value() {
        let profile = profile_with_likes();
        let mut state = FrustrationState::new();
        state.record_frustration(&profile);
        state.record_frustration(&profile);
        state.record_progress();
        assert_eq!(state.counter(), 0);
        assert_eq!(state.level(), FrustrationLevel::None);
    }

    #[test]
    fn only_highest_tier_fires_per_increment() {
        // Jumping straight past multiple thresholds still yields one action.
        let profile = profile_with_likes();
        let mut state = FrustrationState::new();
        for _ in 0..3 {
            state.record_frustration(&profile);
        }
        let fourth = state.record_frustration(&profile);
        // The fourth increment is High only — no second distraction offer.
        assert_eq!(fourth.level, FrustrationLevel::High);
        assert!(fourth.utterance.unwrap().contains("grown-up"));
    }
}
