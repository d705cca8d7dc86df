//! DataSet binary layout
//!
//! A DataSet is a 12 byte header of section counts followed by the
//! condition, action, rule, animation, track and keyframe sections, in that
//! order. Every record is fixed width and little-endian. Firmware reads
//! this layout byte for byte.

use pixels_core::Color;
use serde::Serialize;

pub const HEADER_SIZE: usize = 12;
pub const CONDITION_SIZE: usize = 8;
pub const ACTION_SIZE: usize = 8;
pub const RULE_SIZE: usize = 8;
pub const ANIMATION_SIZE: usize = 16;
pub const TRACK_SIZE: usize = 8;
pub const KEYFRAME_SIZE: usize = 6;

/// Animation record flag: pattern tracks travel across faces
pub const ANIM_FLAG_TRAVELING: u8 = 1 << 0;
/// Animation record flag: track masks address LEDs rather than faces
pub const ANIM_FLAG_USE_LED_INDICES: u8 = 1 << 1;

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Element count of every section
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Header {
    pub conditions: u16,
    pub actions: u16,
    pub rules: u16,
    pub animations: u16,
    pub tracks: u16,
    pub keyframes: u16,
}

impl Header {
    fn counts(&self) -> [u16; 6] {
        [
            self.conditions,
            self.actions,
            self.rules,
            self.animations,
            self.tracks,
            self.keyframes,
        ]
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        for count in self.counts() {
            out.extend_from_slice(&count.to_le_bytes());
        }
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            conditions: read_u16(bytes, 0),
            actions: read_u16(bytes, 2),
            rules: read_u16(bytes, 4),
            animations: read_u16(bytes, 6),
            tracks: read_u16(bytes, 8),
            keyframes: read_u16(bytes, 10),
        })
    }

    /// Byte offset of each section for these counts
    pub fn section_offsets(&self) -> SectionOffsets {
        let conditions = HEADER_SIZE;
        let actions = conditions + self.conditions as usize * CONDITION_SIZE;
        let rules = actions + self.actions as usize * ACTION_SIZE;
        let animations = rules + self.rules as usize * RULE_SIZE;
        let tracks = animations + self.animations as usize * ANIMATION_SIZE;
        let keyframes = tracks + self.tracks as usize * TRACK_SIZE;
        let end = keyframes + self.keyframes as usize * KEYFRAME_SIZE;
        SectionOffsets {
            conditions,
            actions,
            rules,
            animations,
            tracks,
            keyframes,
            end,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SectionOffsets {
    pub conditions: usize,
    pub actions: usize,
    pub rules: usize,
    pub animations: usize,
    pub tracks: usize,
    pub keyframes: usize,
    /// Total buffer size
    pub end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConditionRecord {
    pub type_code: u8,
    pub flags: u8,
    pub face: u8,
    /// Face mask for rolled, period in ms for timed conditions
    pub param: u32,
}

impl ConditionRecord {
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&[self.type_code, self.flags, self.face, 0]);
        out.extend_from_slice(&self.param.to_le_bytes());
    }

    pub fn decode(bytes: &[u8]) -> Self {
        Self {
            type_code: bytes[0],
            flags: bytes[1],
            face: bytes[2],
            param: read_u32(bytes, 4),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActionRecord {
    pub type_code: u8,
    pub loop_count: u8,
    /// Animation index, or remote action id for host actions
    pub index: u16,
    pub face_mask: u32,
}

impl ActionRecord {
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&[self.type_code, self.loop_count]);
        out.extend_from_slice(&self.index.to_le_bytes());
        out.extend_from_slice(&self.face_mask.to_le_bytes());
    }

    pub fn decode(bytes: &[u8]) -> Self {
        Self {
            type_code: bytes[0],
            loop_count: bytes[1],
            index: read_u16(bytes, 2),
            face_mask: read_u32(bytes, 4),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RuleRecord {
    pub condition_index: u16,
    pub action_offset: u16,
    pub action_count: u16,
}

impl RuleRecord {
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.condition_index.to_le_bytes());
        out.extend_from_slice(&self.action_offset.to_le_bytes());
        out.extend_from_slice(&self.action_count.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
    }

    pub fn decode(bytes: &[u8]) -> Self {
        Self {
            condition_index: read_u16(bytes, 0),
            action_offset: read_u16(bytes, 2),
            action_count: read_u16(bytes, 4),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AnimationRecord {
    pub type_code: u8,
    pub flags: u8,
    pub duration_ms: u16,
    pub face_mask: u32,
    /// Type specific fields
    pub payload: [u8; 8],
}

impl AnimationRecord {
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&[self.type_code, self.flags]);
        out.extend_from_slice(&self.duration_ms.to_le_bytes());
        out.extend_from_slice(&self.face_mask.to_le_bytes());
        out.extend_from_slice(&self.payload);
    }

    pub fn decode(bytes: &[u8]) -> Self {
        let mut payload = [0u8; 8];
        payload.copy_from_slice(&bytes[8..16]);
        Self {
            type_code: bytes[0],
            flags: bytes[1],
            duration_ms: read_u16(bytes, 2),
            face_mask: read_u32(bytes, 4),
            payload,
        }
    }

    /// Colour of a simple animation
    pub fn simple_color(&self) -> Color {
        Color::rgb(self.payload[0], self.payload[1], self.payload[2])
    }

    /// Track span of a keyframed or gradient pattern animation
    pub fn track_span(&self) -> (u16, u16) {
        (read_u16(&self.payload, 0), read_u16(&self.payload, 2))
    }

    /// Gradient track of a gradient pattern, gradient or cycle animation
    pub fn gradient_track(&self) -> Option<u16> {
        match self.type_code {
            4 | 6 => Some(read_u16(&self.payload, 4)),
            5 => Some(read_u16(&self.payload, 0)),
            _ => None,
        }
    }
}

/// Payload builders, one per animation type
pub mod payload {
    pub fn simple(r: u8, g: u8, b: u8, count: u8, fade: u8) -> [u8; 8] {
        [r, g, b, count, fade, 0, 0, 0]
    }

    pub fn rainbow(count: u8, fade: u8, intensity: u8, cycles_x10: u8) -> [u8; 8] {
        [count, fade, intensity, cycles_x10, 0, 0, 0, 0]
    }

    pub fn keyframed(track_offset: u16, track_count: u16) -> [u8; 8] {
        let o = track_offset.to_le_bytes();
        let c = track_count.to_le_bytes();
        [o[0], o[1], c[0], c[1], 0, 0, 0, 0]
    }

    pub fn gradient_pattern(
        track_offset: u16,
        track_count: u16,
        gradient_track: u16,
        override_with_face: bool,
    ) -> [u8; 8] {
        let o = track_offset.to_le_bytes();
        let c = track_count.to_le_bytes();
        let g = gradient_track.to_le_bytes();
        [o[0], o[1], c[0], c[1], g[0], g[1], override_with_face as u8, 0]
    }

    pub fn gradient(gradient_track: u16) -> [u8; 8] {
        let g = gradient_track.to_le_bytes();
        [g[0], g[1], 0, 0, 0, 0, 0, 0]
    }

    pub fn cycle(count: u8, fade: u8, intensity: u8, cycles_x10: u8, gradient_track: u16) -> [u8; 8] {
        let g = gradient_track.to_le_bytes();
        [count, fade, intensity, cycles_x10, g[0], g[1], 0, 0]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrackRecord {
    pub keyframe_offset: u16,
    pub keyframe_count: u8,
    pub led_mask: u32,
}

impl TrackRecord {
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.keyframe_offset.to_le_bytes());
        out.extend_from_slice(&[self.keyframe_count, 0]);
        out.extend_from_slice(&self.led_mask.to_le_bytes());
    }

    pub fn decode(bytes: &[u8]) -> Self {
        Self {
            keyframe_offset: read_u16(bytes, 0),
            keyframe_count: bytes[2],
            led_mask: read_u32(bytes, 4),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KeyframeRecord {
    /// Normalized time scaled to [0, 65535]
    pub time: u16,
    pub color: Color,
}

impl KeyframeRecord {
    /// Quantize a normalized time in [0, 1]
    pub fn quantize_time(time: f32) -> u16 {
        (time.clamp(0.0, 1.0) * u16::MAX as f32).round() as u16
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.time.to_le_bytes());
        out.extend_from_slice(&[self.color.r, self.color.g, self.color.b, 0]);
    }

    pub fn decode(bytes: &[u8]) -> Self {
        Self {
            time: read_u16(bytes, 0),
            color: Color::rgb(bytes[2], bytes[3], bytes[4]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_bytes() {
        let header = Header {
            conditions: 1,
            actions: 2,
            rules: 1,
            animations: 1,
            tracks: 0,
            keyframes: 0x0102,
        };
        let mut out = Vec::new();
        header.encode(&mut out);
        assert_eq!(out, vec![1, 0, 2, 0, 1, 0, 1, 0, 0, 0, 2, 1]);
        assert_eq!(Header::decode(&out), Some(header));
        assert_eq!(Header::decode(&out[..11]), None);
    }

    #[test]
    fn test_section_offsets() {
        let header = Header {
            conditions: 1,
            actions: 1,
            rules: 1,
            animations: 1,
            tracks: 2,
            keyframes: 3,
        };
        let offsets = header.section_offsets();
        assert_eq!(offsets.conditions, 12);
        assert_eq!(offsets.actions, 20);
        assert_eq!(offsets.rules, 28);
        assert_eq!(offsets.animations, 36);
        assert_eq!(offsets.tracks, 52);
        assert_eq!(offsets.keyframes, 68);
        assert_eq!(offsets.end, 86);
    }

    #[test]
    fn test_record_widths() {
        let mut out = Vec::new();
        RuleRecord {
            condition_index: 3,
            action_offset: 4,
            action_count: 5,
        }
        .encode(&mut out);
        assert_eq!(out, vec![3, 0, 4, 0, 5, 0, 0, 0]);

        out.clear();
        TrackRecord {
            keyframe_offset: 1,
            keyframe_count: 2,
            led_mask: 0x8000_0001,
        }
        .encode(&mut out);
        assert_eq!(out, vec![1, 0, 2, 0, 1, 0, 0, 0x80]);

        out.clear();
        AnimationRecord {
            type_code: 1,
            flags: 0,
            duration_ms: 500,
            face_mask: 1 << 19,
            payload: payload::simple(255, 0, 0, 1, 0),
        }
        .encode(&mut out);
        assert_eq!(out.len(), ANIMATION_SIZE);
        assert_eq!(&out[2..4], &500u16.to_le_bytes());
    }

    #[test]
    fn test_keyframe_time() {
        assert_eq!(KeyframeRecord::quantize_time(0.0), 0);
        assert_eq!(KeyframeRecord::quantize_time(0.5), 32768);
        assert_eq!(KeyframeRecord::quantize_time(1.0), 65535);
    }
}
