//! Read-only view over DataSet bytes
//!
//! Parsing checks the buffer size against the header and that every
//! cross-section index lands inside its target section.

use serde::Serialize;
use thiserror::Error;

use crate::layout::{
    ActionRecord, AnimationRecord, ConditionRecord, Header, KeyframeRecord, RuleRecord,
    SectionOffsets, TrackRecord, ACTION_SIZE, ANIMATION_SIZE, CONDITION_SIZE, HEADER_SIZE,
    KEYFRAME_SIZE, RULE_SIZE, TRACK_SIZE,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ViewError {
    #[error("buffer of {0} bytes is shorter than the header")]
    TooShort(usize),
    #[error("header describes {expected} bytes but buffer holds {actual}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("{record} {index} references {target} {value} out of {count}")]
    BadReference {
        record: &'static str,
        index: usize,
        target: &'static str,
        value: usize,
        count: usize,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct DataSetView<'a> {
    bytes: &'a [u8],
    header: Header,
    offsets: SectionOffsets,
}

/// Owned dump of every record, for logging and the API
#[derive(Debug, Clone, Serialize)]
pub struct DataSetDump {
    pub header: Header,
    pub conditions: Vec<ConditionRecord>,
    pub actions: Vec<ActionRecord>,
    pub rules: Vec<RuleRecord>,
    pub animations: Vec<AnimationRecord>,
    pub tracks: Vec<TrackRecord>,
    pub keyframes: Vec<KeyframeRecord>,
}

fn check(
    record: &'static str,
    index: usize,
    target: &'static str,
    value: usize,
    count: usize,
) -> Result<(), ViewError> {
    if value > count {
        return Err(ViewError::BadReference {
            record,
            index,
            target,
            value,
            count,
        });
    }
    Ok(())
}

impl<'a> DataSetView<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, ViewError> {
        let header = Header::decode(bytes).ok_or(ViewError::TooShort(bytes.len()))?;
        let offsets = header.section_offsets();
        if offsets.end != bytes.len() {
            return Err(ViewError::SizeMismatch {
                expected: offsets.end,
                actual: bytes.len(),
            });
        }
        let view = Self {
            bytes,
            header,
            offsets,
        };
        view.check_references()?;
        Ok(view)
    }

    fn check_references(&self) -> Result<(), ViewError> {
        let h = &self.header;
        for (i, rule) in self.rules().enumerate() {
            check("rule", i, "condition", rule.condition_index as usize + 1, h.conditions as usize)?;
            check(
                "rule",
                i,
                "action",
                rule.action_offset as usize + rule.action_count as usize,
                h.actions as usize,
            )?;
        }
        for (i, action) in self.actions().enumerate() {
            // only animation actions index into a section
            if action.type_code == 1 {
                check("action", i, "animation", action.index as usize + 1, h.animations as usize)?;
            }
        }
        for (i, anim) in self.animations().enumerate() {
            if matches!(anim.type_code, 3 | 4) {
                let (offset, count) = anim.track_span();
                check("animation", i, "track", offset as usize + count as usize, h.tracks as usize)?;
            }
            if let Some(track) = anim.gradient_track() {
                check("animation", i, "track", track as usize + 1, h.tracks as usize)?;
            }
        }
        for (i, track) in self.tracks().enumerate() {
            check(
                "track",
                i,
                "keyframe",
                track.keyframe_offset as usize + track.keyframe_count as usize,
                h.keyframes as usize,
            )?;
        }
        Ok(())
    }

    pub fn header(&self) -> Header {
        self.header
    }

    pub fn offsets(&self) -> SectionOffsets {
        self.offsets
    }

    fn record(&self, base: usize, size: usize, count: u16, index: usize) -> Option<&'a [u8]> {
        if index >= count as usize {
            return None;
        }
        let start = base + index * size;
        self.bytes.get(start..start + size)
    }

    pub fn condition(&self, index: usize) -> Option<ConditionRecord> {
        self.record(self.offsets.conditions, CONDITION_SIZE, self.header.conditions, index)
            .map(ConditionRecord::decode)
    }

    pub fn action(&self, index: usize) -> Option<ActionRecord> {
        self.record(self.offsets.actions, ACTION_SIZE, self.header.actions, index)
            .map(ActionRecord::decode)
    }

    pub fn rule(&self, index: usize) -> Option<RuleRecord> {
        self.record(self.offsets.rules, RULE_SIZE, self.header.rules, index)
            .map(RuleRecord::decode)
    }

    pub fn animation(&self, index: usize) -> Option<AnimationRecord> {
        self.record(self.offsets.animations, ANIMATION_SIZE, self.header.animations, index)
            .map(AnimationRecord::decode)
    }

    pub fn track(&self, index: usize) -> Option<TrackRecord> {
        self.record(self.offsets.tracks, TRACK_SIZE, self.header.tracks, index)
            .map(TrackRecord::decode)
    }

    pub fn keyframe(&self, index: usize) -> Option<KeyframeRecord> {
        self.record(self.offsets.keyframes, KEYFRAME_SIZE, self.header.keyframes, index)
            .map(KeyframeRecord::decode)
    }

    pub fn conditions(&self) -> impl Iterator<Item = ConditionRecord> + '_ {
        (0..self.header.conditions as usize).filter_map(|i| self.condition(i))
    }

    pub fn actions(&self) -> impl Iterator<Item = ActionRecord> + '_ {
        (0..self.header.actions as usize).filter_map(|i| self.action(i))
    }

    pub fn rules(&self) -> impl Iterator<Item = RuleRecord> + '_ {
        (0..self.header.rules as usize).filter_map(|i| self.rule(i))
    }

    pub fn animations(&self) -> impl Iterator<Item = AnimationRecord> + '_ {
        (0..self.header.animations as usize).filter_map(|i| self.animation(i))
    }

    pub fn tracks(&self) -> impl Iterator<Item = TrackRecord> + '_ {
        (0..self.header.tracks as usize).filter_map(|i| self.track(i))
    }

    pub fn keyframes(&self) -> impl Iterator<Item = KeyframeRecord> + '_ {
        (0..self.header.keyframes as usize).filter_map(|i| self.keyframe(i))
    }

    pub fn dump(&self) -> DataSetDump {
        DataSetDump {
            header: self.header,
            conditions: self.conditions().collect(),
            actions: self.actions().collect(),
            rules: self.rules().collect(),
            animations: self.animations().collect(),
            tracks: self.tracks().collect(),
            keyframes: self.keyframes().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_header_bytes() -> Vec<u8> {
        let mut out = Vec::new();
        Header::default().encode(&mut out);
        out
    }

    #[test]
    fn test_empty_dataset() {
        let bytes = empty_header_bytes();
        let view = DataSetView::parse(&bytes).unwrap();
        assert_eq!(view.header(), Header::default());
        assert_eq!(view.rule(0), None);
        assert_eq!(view.dump().rules.len(), 0);
    }

    #[test]
    fn test_size_checks() {
        assert_eq!(DataSetView::parse(&[0; 4]).unwrap_err(), ViewError::TooShort(4));

        let mut bytes = empty_header_bytes();
        bytes.push(0);
        assert_eq!(
            DataSetView::parse(&bytes).unwrap_err(),
            ViewError::SizeMismatch {
                expected: HEADER_SIZE,
                actual: HEADER_SIZE + 1
            }
        );
    }

    #[test]
    fn test_gradient_track_out_of_range() {
        let mut bytes = Vec::new();
        Header {
            animations: 2,
            tracks: 1,
            ..Header::default()
        }
        .encode(&mut bytes);
        AnimationRecord {
            type_code: 5,
            flags: 0,
            duration_ms: 500,
            face_mask: 1,
            payload: crate::layout::payload::gradient(0),
        }
        .encode(&mut bytes);
        AnimationRecord {
            type_code: 6,
            flags: 0,
            duration_ms: 500,
            face_mask: 1,
            payload: crate::layout::payload::cycle(1, 0, 255, 10, 1),
        }
        .encode(&mut bytes);
        TrackRecord {
            keyframe_offset: 0,
            keyframe_count: 0,
            led_mask: 1,
        }
        .encode(&mut bytes);

        let err = DataSetView::parse(&bytes).unwrap_err();
        assert_eq!(
            err,
            ViewError::BadReference {
                record: "animation",
                index: 1,
                target: "track",
                value: 2,
                count: 1,
            }
        );
    }

    #[test]
    fn test_rule_pointing_past_actions() {
        let mut bytes = Vec::new();
        Header {
            conditions: 1,
            rules: 1,
            ..Header::default()
        }
        .encode(&mut bytes);
        ConditionRecord {
            type_code: 5,
            flags: 0,
            face: 0,
            param: 0,
        }
        .encode(&mut bytes);
        RuleRecord {
            condition_index: 0,
            action_offset: 0,
            action_count: 1,
        }
        .encode(&mut bytes);

        let err = DataSetView::parse(&bytes).unwrap_err();
        assert!(matches!(
            err,
            ViewError::BadReference {
                record: "rule",
                target: "action",
                ..
            }
        ));
    }
}
