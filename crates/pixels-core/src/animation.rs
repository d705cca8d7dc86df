//! Animations, keyframe tracks and patterns
//!
//! Animations reference patterns by uuid. Gradients are owned by the
//! animation that uses them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::color::Color;
use crate::error::{check_duration_ms, EntityError};
use crate::faces::MAX_FACE;

/// Most keyframes a single track can hold
pub const MAX_KEYFRAMES_PER_TRACK: usize = u8::MAX as usize;

/// Highest cycle count the firmware can store (tenths in a byte)
pub const MAX_CYCLES: f32 = 25.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    /// Normalized time in [0, 1]
    pub time: f32,
    pub color: Color,
}

impl Keyframe {
    pub fn new(time: f32, color: Color) -> Result<Self, EntityError> {
        let keyframe = Self { time, color };
        keyframe.validate()?;
        Ok(keyframe)
    }

    pub fn validate(&self) -> Result<(), EntityError> {
        if !(0.0..=1.0).contains(&self.time) {
            return Err(EntityError::invalid(
                "keyframe.time",
                format!("{} is outside [0, 1]", self.time),
            ));
        }
        Ok(())
    }
}

fn validate_keyframes(keyframes: &[Keyframe]) -> Result<(), EntityError> {
    if keyframes.is_empty() {
        return Err(EntityError::invalid("keyframes", "track has no keyframes"));
    }
    if keyframes.len() > MAX_KEYFRAMES_PER_TRACK {
        return Err(EntityError::invalid(
            "keyframes",
            format!(
                "{} keyframes, a track holds at most {}",
                keyframes.len(),
                MAX_KEYFRAMES_PER_TRACK
            ),
        ));
    }
    keyframes.iter().try_for_each(Keyframe::validate)
}

/// A colour gradient over normalized time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientTrack {
    pub keyframes: Vec<Keyframe>,
}

impl GradientTrack {
    pub fn new(keyframes: Vec<Keyframe>) -> Result<Self, EntityError> {
        let track = Self { keyframes };
        track.validate()?;
        Ok(track)
    }

    /// Two keyframe gradient from `from` to `to`
    pub fn linear(from: Color, to: Color) -> Self {
        Self {
            keyframes: vec![
                Keyframe {
                    time: 0.0,
                    color: from,
                },
                Keyframe {
                    time: 1.0,
                    color: to,
                },
            ],
        }
    }

    pub fn validate(&self) -> Result<(), EntityError> {
        validate_keyframes(&self.keyframes)
    }
}

/// Keyframes applied to the LEDs selected by `led_mask`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternTrack {
    pub led_mask: u32,
    pub keyframes: Vec<Keyframe>,
}

impl PatternTrack {
    pub fn validate(&self) -> Result<(), EntityError> {
        if self.led_mask == 0 {
            return Err(EntityError::invalid("led_mask", "no LED selected"));
        }
        validate_keyframes(&self.keyframes)
    }
}

/// Named set of keyframe tracks shared between animations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub uuid: Uuid,
    pub name: String,
    pub tracks: Vec<PatternTrack>,
}

impl Pattern {
    pub fn new(name: impl Into<String>, tracks: Vec<PatternTrack>) -> Result<Self, EntityError> {
        let pattern = Self {
            uuid: Uuid::new_v4(),
            name: name.into(),
            tracks,
        };
        pattern.validate()?;
        Ok(pattern)
    }

    pub fn validate(&self) -> Result<(), EntityError> {
        if self.tracks.is_empty() {
            return Err(EntityError::invalid("tracks", "pattern has no tracks"));
        }
        self.tracks.iter().try_for_each(PatternTrack::validate)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AnimationKind {
    /// Flashes of a single colour
    Simple { color: Color, count: u8, fade: f32 },
    Gradient { gradient: GradientTrack },
    /// Pattern tracks used as intensity, coloured by `gradient`
    GradientPattern {
        pattern: Uuid,
        gradient: GradientTrack,
        override_with_face: bool,
    },
    Keyframed {
        pattern: Uuid,
        traveling: bool,
        #[serde(default)]
        use_led_indices: bool,
    },
    Rainbow {
        count: u8,
        fade: f32,
        intensity: f32,
        cycles: f32,
        #[serde(default)]
        traveling: bool,
    },
    /// Not supported by any firmware yet
    Noise,
    Cycle {
        gradient: GradientTrack,
        count: u8,
        fade: f32,
        intensity: f32,
        cycles: f32,
    },
}

impl AnimationKind {
    /// Firmware type code, `None` for kinds the firmware cannot play
    pub fn type_code(&self) -> Option<u8> {
        match self {
            AnimationKind::Simple { .. } => Some(1),
            AnimationKind::Rainbow { .. } => Some(2),
            AnimationKind::Keyframed { .. } => Some(3),
            AnimationKind::GradientPattern { .. } => Some(4),
            AnimationKind::Gradient { .. } => Some(5),
            AnimationKind::Cycle { .. } => Some(6),
            AnimationKind::Noise => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AnimationKind::Simple { .. } => "simple",
            AnimationKind::Gradient { .. } => "gradient",
            AnimationKind::GradientPattern { .. } => "gradientPattern",
            AnimationKind::Keyframed { .. } => "keyframed",
            AnimationKind::Rainbow { .. } => "rainbow",
            AnimationKind::Noise => "noise",
            AnimationKind::Cycle { .. } => "cycle",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Animation {
    pub uuid: Uuid,
    pub name: String,
    pub duration_ms: u32,
    pub face_mask: u32,
    #[serde(flatten)]
    pub kind: AnimationKind,
}

impl Animation {
    pub fn new(
        name: impl Into<String>,
        duration_ms: u32,
        face_mask: u32,
        kind: AnimationKind,
    ) -> Result<Self, EntityError> {
        let animation = Self {
            uuid: Uuid::new_v4(),
            name: name.into(),
            duration_ms,
            face_mask,
            kind,
        };
        animation.validate()?;
        Ok(animation)
    }

    /// Single flash of `color` on the faces of `face_mask`
    pub fn simple(
        name: impl Into<String>,
        color: Color,
        duration_ms: u32,
        face_mask: u32,
    ) -> Result<Self, EntityError> {
        Self::new(
            name,
            duration_ms,
            face_mask,
            AnimationKind::Simple {
                color,
                count: 1,
                fade: 0.0,
            },
        )
    }

    pub fn with_uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = uuid;
        self
    }

    /// Pattern this animation reads its tracks from
    pub fn pattern(&self) -> Option<Uuid> {
        match &self.kind {
            AnimationKind::GradientPattern { pattern, .. }
            | AnimationKind::Keyframed { pattern, .. } => Some(*pattern),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<(), EntityError> {
        check_duration_ms("duration_ms", self.duration_ms)?;
        if self.face_mask == 0 {
            return Err(EntityError::invalid("face_mask", "no face selected"));
        }
        if self.face_mask >> MAX_FACE != 0 {
            return Err(EntityError::invalid(
                "face_mask",
                format!("{:#010x} sets a bit above face {}", self.face_mask, MAX_FACE),
            ));
        }
        match &self.kind {
            AnimationKind::Simple { count, fade, .. } => {
                check_count(*count)?;
                check_unit("fade", *fade)
            }
            AnimationKind::Gradient { gradient } => gradient.validate(),
            AnimationKind::GradientPattern { gradient, .. } => gradient.validate(),
            AnimationKind::Keyframed { .. } | AnimationKind::Noise => Ok(()),
            AnimationKind::Rainbow {
                count,
                fade,
                intensity,
                cycles,
                ..
            } => {
                check_count(*count)?;
                check_unit("fade", *fade)?;
                check_unit("intensity", *intensity)?;
                check_cycles(*cycles)
            }
            AnimationKind::Cycle {
                gradient,
                count,
                fade,
                intensity,
                cycles,
            } => {
                gradient.validate()?;
                check_count(*count)?;
                check_unit("fade", *fade)?;
                check_unit("intensity", *intensity)?;
                check_cycles(*cycles)
            }
        }
    }
}

fn check_count(count: u8) -> Result<(), EntityError> {
    if count == 0 {
        return Err(EntityError::invalid("count", "must be at least 1"));
    }
    Ok(())
}

fn check_unit(field: &'static str, value: f32) -> Result<(), EntityError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(EntityError::invalid(
            field,
            format!("{} is outside [0, 1]", value),
        ));
    }
    Ok(())
}

fn check_cycles(cycles: f32) -> Result<(), EntityError> {
    if !(0.0..=MAX_CYCLES).contains(&cycles) {
        return Err(EntityError::invalid(
            "cycles",
            format!("{} is outside [0, {}]", cycles, MAX_CYCLES),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::faces::face_mask;

    #[test]
    fn test_simple_animation() {
        let anim = Animation::simple("red", Color::RED, 500, face_mask(20).unwrap()).unwrap();
        assert_eq!(anim.kind.type_code(), Some(1));
        assert_eq!(anim.pattern(), None);
    }

    #[test]
    fn test_animation_invariants() {
        let err = Animation::simple("none", Color::RED, 500, 0).unwrap_err();
        assert_eq!(err.field(), "face_mask");

        let err = Animation::simple("long", Color::RED, 70_000, 1).unwrap_err();
        assert_eq!(err.field(), "duration_ms");

        let rainbow = AnimationKind::Rainbow {
            count: 1,
            fade: 0.5,
            intensity: 1.5,
            cycles: 1.0,
            traveling: false,
        };
        let err = Animation::new("rainbow", 1000, 1, rainbow).unwrap_err();
        assert_eq!(err.field(), "intensity");
    }

    #[test]
    fn test_keyframe_time_is_not_clamped() {
        assert!(Keyframe::new(1.0, Color::WHITE).is_ok());
        let err = Keyframe::new(1.01, Color::WHITE).unwrap_err();
        assert_eq!(err.field(), "keyframe.time");
        assert!(GradientTrack::new(vec![]).is_err());
    }

    #[test]
    fn test_pattern_reference() {
        let pattern = Pattern::new(
            "spin",
            vec![PatternTrack {
                led_mask: 0b11,
                keyframes: GradientTrack::linear(Color::BLACK, Color::BLUE).keyframes,
            }],
        )
        .unwrap();
        let anim = Animation::new(
            "spin",
            1000,
            1,
            AnimationKind::Keyframed {
                pattern: pattern.uuid,
                traveling: true,
                use_led_indices: false,
            },
        )
        .unwrap();
        assert_eq!(anim.pattern(), Some(pattern.uuid));
    }

    #[test]
    fn test_serde_shape() {
        let anim = Animation::simple("red", Color::RED, 500, 1)
            .unwrap()
            .with_uuid(Uuid::nil());
        let json = serde_json::to_value(&anim).unwrap();
        assert_eq!(json["type"], "simple");
        let back: Animation = serde_json::from_value(json).unwrap();
        assert_eq!(back, anim);
    }
}
