//! Rule conditions
//!
//! Each variant carries only primitive values. The firmware type code of a
//! condition is exposed by [`Condition::type_code`].

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::{check_duration_ms, EntityError};
use crate::faces::{face_mask, face_mask_of, MAX_FACE};

bitflags! {
    /// Battery events a condition reacts to
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct BatteryFlags: u8 {
        const OK = 1 << 0;
        const LOW = 1 << 1;
        const CHARGING = 1 << 2;
        const DONE = 1 << 3;
        const BAD_CHARGING = 1 << 4;
        const ERROR = 1 << 5;
    }
}

bitflags! {
    /// Connection events a condition reacts to
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ConnectionFlags: u8 {
        const CONNECTED = 1 << 0;
        const DISCONNECTED = 1 << 1;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct HelloGoodbyeFlags: u8 {
        const HELLO = 1 << 0;
        const GOODBYE = 1 << 1;
    }
}

bitflags! {
    /// How the rolled face is compared against the condition's face
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct FaceCompareFlags: u8 {
        const LESS = 1 << 0;
        const EQUAL = 1 << 1;
        const GREATER = 1 << 2;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Condition {
    /// Die landed on one of the faces in `face_mask`
    Rolled { face_mask: u32 },
    /// Die landed but is not flat
    Crooked,
    /// Die is picked up
    Handling,
    /// Die is rolling, optionally repeating every `repeat_period_ms`
    Rolling { repeat_period_ms: u32 },
    /// Die has not moved for `period_ms`
    Idle { period_ms: u32 },
    BatteryState {
        flags: BatteryFlags,
        repeat_period_ms: u32,
    },
    ConnectionState { flags: ConnectionFlags },
    HelloGoodbye { flags: HelloGoodbyeFlags },
    /// Rolled face compared against `face`
    FaceCompare { face: u32, flags: FaceCompareFlags },
}

impl Condition {
    pub fn rolled(faces: &[u32]) -> Result<Self, EntityError> {
        let face_mask = face_mask_of(faces)?;
        let condition = Self::Rolled { face_mask };
        condition.validate()?;
        Ok(condition)
    }

    pub fn rolling(repeat_period_ms: u32) -> Result<Self, EntityError> {
        check_duration_ms("repeat_period_ms", repeat_period_ms)?;
        Ok(Self::Rolling { repeat_period_ms })
    }

    pub fn idle(period_ms: u32) -> Result<Self, EntityError> {
        check_duration_ms("period_ms", period_ms)?;
        Ok(Self::Idle { period_ms })
    }

    pub fn battery(flags: BatteryFlags, repeat_period_ms: u32) -> Result<Self, EntityError> {
        check_duration_ms("repeat_period_ms", repeat_period_ms)?;
        Ok(Self::BatteryState {
            flags,
            repeat_period_ms,
        })
    }

    pub fn face_compare(face: u32, flags: FaceCompareFlags) -> Result<Self, EntityError> {
        face_mask(face)?;
        if flags.is_empty() {
            return Err(EntityError::invalid("flags", "no comparison selected"));
        }
        Ok(Self::FaceCompare { face, flags })
    }

    /// Firmware type code
    pub fn type_code(&self) -> u8 {
        match self {
            Condition::HelloGoodbye { .. } => 1,
            Condition::Handling => 2,
            Condition::Rolling { .. } => 3,
            Condition::FaceCompare { .. } => 4,
            Condition::Crooked => 5,
            Condition::ConnectionState { .. } => 6,
            Condition::BatteryState { .. } => 7,
            Condition::Idle { .. } => 8,
            Condition::Rolled { .. } => 9,
        }
    }

    /// Re-check invariants, for conditions that were deserialized
    pub fn validate(&self) -> Result<(), EntityError> {
        match self {
            Condition::Rolled { face_mask } => {
                if *face_mask == 0 {
                    return Err(EntityError::invalid("face_mask", "no face selected"));
                }
                if face_mask >> MAX_FACE != 0 {
                    return Err(EntityError::invalid(
                        "face_mask",
                        format!("{:#010x} sets a bit above face {}", face_mask, MAX_FACE),
                    ));
                }
                Ok(())
            }
            Condition::Rolling { repeat_period_ms } => {
                check_duration_ms("repeat_period_ms", *repeat_period_ms)
            }
            Condition::Idle { period_ms } => check_duration_ms("period_ms", *period_ms),
            Condition::BatteryState {
                repeat_period_ms, ..
            } => check_duration_ms("repeat_period_ms", *repeat_period_ms),
            Condition::FaceCompare { face, flags } => {
                face_mask(*face)?;
                if flags.is_empty() {
                    return Err(EntityError::invalid("flags", "no comparison selected"));
                }
                Ok(())
            }
            Condition::Crooked
            | Condition::Handling
            | Condition::ConnectionState { .. }
            | Condition::HelloGoodbye { .. } => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolled_builds_mask() {
        let c = Condition::rolled(&[1, 20]).unwrap();
        assert_eq!(
            c,
            Condition::Rolled {
                face_mask: 1 | (1 << 19)
            }
        );
        assert_eq!(c.type_code(), 9);
    }

    #[test]
    fn test_rolled_rejects_bad_faces() {
        let err = Condition::rolled(&[0]).unwrap_err();
        assert!(matches!(err, EntityError::Range(_)));
        let err = Condition::rolled(&[]).unwrap_err();
        assert_eq!(err.field(), "face_mask");
    }

    #[test]
    fn test_durations_are_bounded() {
        assert!(Condition::idle(5000).is_ok());
        let err = Condition::idle(70_000).unwrap_err();
        assert_eq!(err.field(), "period_ms");
    }

    #[test]
    fn test_deserialized_condition_is_validated() {
        let c: Condition = serde_json::from_str(r#"{"type":"rolled","face_mask":0}"#).unwrap();
        assert!(c.validate().is_err());
    }
}
