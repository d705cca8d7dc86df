//! Rule actions
//!
//! Only [`Action::PlayAnimation`] runs on the die. The other variants are
//! executed by the host when the die reports that the owning rule fired.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EntityError;
use crate::faces::{face_mask_of, MAX_FACE};

/// Body encoding used by [`Action::MakeWebRequest`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebRequestFormat {
    #[default]
    Parameters,
    Json,
    Discord,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Action {
    /// Play a library animation. A zero `face_mask` plays on the face that
    /// triggered the rule.
    PlayAnimation {
        animation: Uuid,
        face_mask: u32,
        loop_count: u8,
    },
    PlayAudioClip {
        clip: Uuid,
        /// Percent, 0 to 100
        volume: u8,
        loop_count: u8,
    },
    MakeWebRequest {
        url: String,
        value: String,
        #[serde(default)]
        format: WebRequestFormat,
    },
    SpeakText {
        text: String,
        pitch: f32,
        rate: f32,
    },
}

impl Action {
    pub fn play_animation(
        animation: Uuid,
        faces: &[u32],
        loop_count: u8,
    ) -> Result<Self, EntityError> {
        let action = Self::PlayAnimation {
            animation,
            face_mask: face_mask_of(faces)?,
            loop_count,
        };
        action.validate()?;
        Ok(action)
    }

    pub fn play_audio_clip(clip: Uuid, volume: u8, loop_count: u8) -> Result<Self, EntityError> {
        let action = Self::PlayAudioClip {
            clip,
            volume,
            loop_count,
        };
        action.validate()?;
        Ok(action)
    }

    pub fn web_request(
        url: impl Into<String>,
        value: impl Into<String>,
        format: WebRequestFormat,
    ) -> Result<Self, EntityError> {
        let action = Self::MakeWebRequest {
            url: url.into(),
            value: value.into(),
            format,
        };
        action.validate()?;
        Ok(action)
    }

    pub fn speak(text: impl Into<String>, pitch: f32, rate: f32) -> Result<Self, EntityError> {
        let action = Self::SpeakText {
            text: text.into(),
            pitch,
            rate,
        };
        action.validate()?;
        Ok(action)
    }

    /// Firmware type code
    pub fn type_code(&self) -> u8 {
        match self {
            Action::PlayAnimation { .. } => 1,
            Action::PlayAudioClip { .. } => 2,
            Action::MakeWebRequest { .. } => 3,
            Action::SpeakText { .. } => 4,
        }
    }

    /// Whether the host, not the die, carries out this action
    pub fn is_remote(&self) -> bool {
        !matches!(self, Action::PlayAnimation { .. })
    }

    /// Animation this action depends on, if any
    pub fn animation(&self) -> Option<Uuid> {
        match self {
            Action::PlayAnimation { animation, .. } => Some(*animation),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<(), EntityError> {
        match self {
            Action::PlayAnimation {
                face_mask,
                loop_count,
                ..
            } => {
                if face_mask >> MAX_FACE != 0 {
                    return Err(EntityError::invalid(
                        "face_mask",
                        format!("{:#010x} sets a bit above face {}", face_mask, MAX_FACE),
                    ));
                }
                check_loop_count(*loop_count)
            }
            Action::PlayAudioClip {
                volume, loop_count, ..
            } => {
                if *volume > 100 {
                    return Err(EntityError::invalid(
                        "volume",
                        format!("{} is above 100 percent", volume),
                    ));
                }
                check_loop_count(*loop_count)
            }
            Action::MakeWebRequest { url, .. } => {
                if url.trim().is_empty() {
                    return Err(EntityError::invalid("url", "empty url"));
                }
                Ok(())
            }
            Action::SpeakText { pitch, rate, .. } => {
                for (field, value) in [("pitch", *pitch), ("rate", *rate)] {
                    if !value.is_finite() || value <= 0.0 {
                        return Err(EntityError::invalid(
                            field,
                            format!("{} is not a positive number", value),
                        ));
                    }
                }
                Ok(())
            }
        }
    }
}

fn check_loop_count(loop_count: u8) -> Result<(), EntityError> {
    if loop_count == 0 {
        return Err(EntityError::invalid("loop_count", "must play at least once"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_play_animation() {
        let anim = Uuid::new_v4();
        let action = Action::play_animation(anim, &[3], 1).unwrap();
        assert_eq!(action.type_code(), 1);
        assert_eq!(action.animation(), Some(anim));
        assert!(!action.is_remote());
        assert!(Action::play_animation(anim, &[32], 1).is_err());
        assert_eq!(
            Action::play_animation(anim, &[], 0).unwrap_err().field(),
            "loop_count"
        );
    }

    #[test]
    fn test_host_actions() {
        let speak = Action::speak("natural twenty", 1.0, 1.0).unwrap();
        assert!(speak.is_remote());
        assert_eq!(speak.type_code(), 4);
        assert_eq!(Action::speak("x", -1.0, 1.0).unwrap_err().field(), "pitch");

        let clip = Action::play_audio_clip(Uuid::nil(), 101, 1).unwrap_err();
        assert_eq!(clip.field(), "volume");

        let web = Action::web_request("", "", WebRequestFormat::Json).unwrap_err();
        assert_eq!(web.field(), "url");
    }
}
