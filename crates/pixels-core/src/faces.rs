//! Face masks and die geometry
//!
//! Firmware addresses faces through a 32-bit mask where face `n` maps to
//! bit `n - 1`. Only faces 1 through 31 can be expressed.

use serde::{Deserialize, Serialize};

use crate::error::RangeError;

/// Highest face value a mask can address
pub const MAX_FACE: u32 = 31;

/// Mask covering every addressable face
pub const ALL_FACES_MASK: u32 = 0x7fff_ffff;

/// Mask for a single face
pub fn face_mask(face: u32) -> Result<u32, RangeError> {
    if face == 0 || face > MAX_FACE {
        return Err(RangeError { face });
    }
    Ok(1 << (face - 1))
}

/// Union of the masks of the given faces
pub fn face_mask_of(faces: &[u32]) -> Result<u32, RangeError> {
    faces
        .iter()
        .try_fold(0u32, |mask, &face| Ok(mask | face_mask(face)?))
}

/// Faces contained in a mask, in ascending order
pub fn faces_in_mask(mask: u32) -> Vec<u32> {
    (1..=MAX_FACE).filter(|f| mask & (1 << (f - 1)) != 0).collect()
}

/// Physical die shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DieType {
    Unknown,
    D4,
    D6,
    D6Pipped,
    D6Fudge,
    D8,
    D10,
    D00,
    D12,
    D20,
}

impl Default for DieType {
    fn default() -> Self {
        Self::D20
    }
}

impl DieType {
    pub fn face_count(&self) -> u32 {
        match self {
            DieType::Unknown => 0,
            DieType::D4 => 4,
            DieType::D6 | DieType::D6Pipped | DieType::D6Fudge => 6,
            DieType::D8 => 8,
            DieType::D10 | DieType::D00 => 10,
            DieType::D12 => 12,
            DieType::D20 => 20,
        }
    }

    pub fn led_count(&self) -> u32 {
        match self {
            DieType::Unknown => 0,
            DieType::D4 | DieType::D6 | DieType::D6Fudge => 6,
            DieType::D6Pipped => 21,
            DieType::D8 => 8,
            DieType::D10 | DieType::D00 => 10,
            DieType::D12 => 12,
            DieType::D20 => 20,
        }
    }

    /// Guess the die type from the number of LEDs reported by a die
    pub fn from_led_count(leds: u32) -> Self {
        match leds {
            4 => DieType::D4,
            6 => DieType::D6,
            8 => DieType::D8,
            10 => DieType::D10,
            12 => DieType::D12,
            20 => DieType::D20,
            21 => DieType::D6Pipped,
            _ => DieType::Unknown,
        }
    }

    /// Mask with one bit per face of this die
    pub fn all_faces_mask(&self) -> u32 {
        match self.face_count() {
            0 => 0,
            n => (1u32 << n) - 1,
        }
    }
}

impl std::fmt::Display for DieType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DieType::Unknown => "unknown",
            DieType::D4 => "d4",
            DieType::D6 => "d6",
            DieType::D6Pipped => "d6pipped",
            DieType::D6Fudge => "d6fudge",
            DieType::D8 => "d8",
            DieType::D10 => "d10",
            DieType::D00 => "d00",
            DieType::D12 => "d12",
            DieType::D20 => "d20",
        };
        write!(f, "{}", name)
    }
}
