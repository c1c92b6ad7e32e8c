//! Avatar display state: a pure, total-precedence function of controller state.
//!
//! Exactly one state is always selected; the precedence order is significant.
//! Touch gestures set a short-lived expressive override that yields to
//! speaking/listening.

use crate::frustration::FrustrationLevel;
use sprout_core::TimeOfDay;

/// Flat display state consumed by the rendering layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvatarState {
    /// Help alert active: waving for a caregiver.
    Waving,
    Talking,
    Listening,
    Thinking,
    Sleepy,
    Concerned,
    Encouraging,
    Idle,
    // Transient gesture expressions.
    Giggling,
    Surprised,
    Loved,
    Calm,
}

/// Touch interactions on the avatar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchGesture {
    Tap,
    Poke,
    Pet,
    LongPress,
}

impl TouchGesture {
    /// Expressive state shown while the gesture override holds.
    pub fn expression(self) -> AvatarState {
        match self {
            TouchGesture::Tap => AvatarState::Giggling,
            TouchGesture::Poke => AvatarState::Surprised,
            TouchGesture::Pet => AvatarState::Loved,
            TouchGesture::LongPress => AvatarState::Calm,
        }
    }
}

/// Everything the derivation reads. Assembled by the controller on demand.
#[derive(Debug, Clone, Copy)]
pub struct AvatarInputs {
    pub help_alert: bool,
    pub speaking: bool,
    pub listening: bool,
    pub processing: bool,
    pub time_of_day: TimeOfDay,
    pub frustration: FrustrationLevel,
    /// Active gesture expression, if the hold window has not expired.
    pub gesture: Option<AvatarState>,
}

/// Total-precedence derivation. A gesture override wins unless speaking or
/// listening has taken over.
pub fn derive_avatar(inputs: AvatarInputs) -> AvatarState {
    if let Some(expression) = inputs.gesture {
        if !inputs.speaking && !inputs.listening {
            return expression;
        }
    }
    if inputs.help_alert {
        AvatarState::Waving
    } else if inputs.speaking {
        AvatarState::Talking
    } else if inputs.listening {
        AvatarState::Listening
    } else if inputs.processing {
        AvatarState::Thinking
    } else if inputs.time_of_day == TimeOfDay::Night {
        AvatarState::Sleepy
    } else if inputs.frustration == FrustrationLevel::High {
        AvatarState::Concerned
    } else if inputs.frustration == FrustrationLevel::Moderate {
        AvatarState::Encouraging
    } else {
        AvatarState::Idle
    }
}
