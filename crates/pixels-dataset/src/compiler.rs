//! Profile to DataSet compiler
//!
//! Rules are walked in profile order. Each rule contributes one condition
//! record and a contiguous span of the global action array. Animations are
//! deduplicated by uuid and indexed in first-reference order, patterns are
//! emitted once per uuid as a span of tracks, and gradients are emitted once
//! per owning animation. Colours are scaled by the profile brightness here,
//! so the bytes (and hash) reflect it.

use std::collections::HashMap;

use pixels_core::{
    Action, Animation, AnimationKind, Color, Condition, EntityError, EntryKind, GradientTrack,
    Keyframe, Library, Profile, ALL_FACES_MASK,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::hash::dataset_hash;
use crate::layout::{
    payload, ActionRecord, AnimationRecord, ConditionRecord, Header, KeyframeRecord, RuleRecord,
    SectionOffsets, TrackRecord, ANIM_FLAG_TRAVELING, ANIM_FLAG_USE_LED_INDICES,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("{kind} {uuid} is referenced but not in the library")]
    DanglingReference { kind: EntryKind, uuid: Uuid },
    #[error("{section}: {count} exceeds the firmware limit of {limit}")]
    CapacityExceeded {
        section: &'static str,
        count: usize,
        limit: usize,
    },
    #[error(transparent)]
    InvalidEntity(#[from] EntityError),
    #[error("animation {uuid} is of type {kind}, which firmware cannot play")]
    UnsupportedAnimation { uuid: Uuid, kind: &'static str },
}

/// Fixed-size tables of the firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub max_conditions: usize,
    pub max_actions: usize,
    pub max_actions_per_rule: usize,
    pub max_rules: usize,
    pub max_animations: usize,
    pub max_tracks: usize,
    pub max_keyframes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_conditions: 64,
            max_actions: 64,
            max_actions_per_rule: 32,
            max_rules: 32,
            max_animations: 64,
            max_tracks: 256,
            max_keyframes: 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompileOptions {
    #[serde(default)]
    pub limits: Limits,
}

/// Host action the die reports back by id when its rule fires
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteAction {
    /// `(rule_index << 8) | action_index`
    pub id: u16,
    pub action: Action,
}

pub fn remote_action_id(rule_index: usize, action_index: usize) -> u16 {
    ((rule_index as u16) << 8) | (action_index as u16 & 0xff)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledDataSet {
    pub profile: Uuid,
    pub bytes: Vec<u8>,
    pub header: Header,
    pub offsets: SectionOffsets,
    pub hash: u32,
    pub remote_actions: Vec<RemoteAction>,
    /// Animations in the order their records were emitted
    pub animations: Vec<Uuid>,
}

impl CompiledDataSet {
    pub fn remote_action(&self, id: u16) -> Option<&Action> {
        self.remote_actions
            .iter()
            .find(|r| r.id == id)
            .map(|r| &r.action)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Animations and patterns a profile pulls in, in first-reference order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dependencies {
    pub animations: Vec<Uuid>,
    pub patterns: Vec<Uuid>,
}

/// Resolve the closure of a profile without compiling it
pub fn dependencies(profile: &Profile, library: &Library) -> Result<Dependencies, CompileError> {
    let mut deps = Dependencies::default();
    for uuid in profile.animation_refs() {
        let animation = library
            .animation(&uuid)
            .ok_or(CompileError::DanglingReference {
                kind: EntryKind::Animation,
                uuid,
            })?;
        deps.animations.push(uuid);
        if let Some(pattern) = animation.pattern() {
            if library.pattern(&pattern).is_none() {
                return Err(CompileError::DanglingReference {
                    kind: EntryKind::Pattern,
                    uuid: pattern,
                });
            }
            if !deps.patterns.contains(&pattern) {
                deps.patterns.push(pattern);
            }
        }
    }
    Ok(deps)
}

/// Look up a profile by uuid and compile it
pub fn compile_profile(
    uuid: &Uuid,
    library: &Library,
    options: &CompileOptions,
) -> Result<CompiledDataSet, CompileError> {
    let profile = library
        .profile(uuid)
        .ok_or(CompileError::DanglingReference {
            kind: EntryKind::Profile,
            uuid: *uuid,
        })?;
    compile(profile, library, options)
}

pub fn compile(
    profile: &Profile,
    library: &Library,
    options: &CompileOptions,
) -> Result<CompiledDataSet, CompileError> {
    profile.validate()?;
    let limits = &options.limits;
    check_capacity("rules", profile.rules.len(), limits.max_rules.min(256))?;

    let mut builder = Builder::new(profile, library);
    for (rule_index, rule) in profile.rules.iter().enumerate() {
        check_capacity(
            "actions per rule",
            rule.actions.len(),
            limits.max_actions_per_rule.min(256),
        )?;
        let condition_index = builder.conditions.len();
        builder.conditions.push(condition_record(&rule.condition));

        let action_offset = builder.actions.len();
        for (action_index, action) in rule.actions.iter().enumerate() {
            let record = builder.action_record(rule_index, action_index, action)?;
            builder.actions.push(record);
        }
        builder.rules.push(RuleRecord {
            condition_index: condition_index as u16,
            action_offset: action_offset as u16,
            action_count: rule.actions.len() as u16,
        });
    }

    check_capacity("conditions", builder.conditions.len(), limits.max_conditions)?;
    check_capacity("actions", builder.actions.len(), limits.max_actions)?;
    check_capacity("animations", builder.animations.len(), limits.max_animations)?;
    check_capacity("tracks", builder.tracks.len(), limits.max_tracks)?;
    check_capacity("keyframes", builder.keyframes.len(), limits.max_keyframes)?;

    let compiled = builder.finish();
    debug!(
        profile = %profile.uuid,
        size = compiled.bytes.len(),
        hash = compiled.hash,
        rules = compiled.header.rules,
        animations = compiled.header.animations,
        "Compiled DataSet"
    );
    Ok(compiled)
}

fn check_capacity(section: &'static str, count: usize, limit: usize) -> Result<(), CompileError> {
    let limit = limit.min(u16::MAX as usize);
    if count > limit {
        return Err(CompileError::CapacityExceeded {
            section,
            count,
            limit,
        });
    }
    Ok(())
}

fn condition_record(condition: &Condition) -> ConditionRecord {
    let (flags, face, param) = match condition {
        Condition::Rolled { face_mask } => (0, 0, *face_mask),
        Condition::Crooked | Condition::Handling => (0, 0, 0),
        Condition::Rolling { repeat_period_ms } => (0, 0, *repeat_period_ms),
        Condition::Idle { period_ms } => (0, 0, *period_ms),
        Condition::BatteryState {
            flags,
            repeat_period_ms,
        } => (flags.bits(), 0, *repeat_period_ms),
        Condition::ConnectionState { flags } => (flags.bits(), 0, 0),
        Condition::HelloGoodbye { flags } => (flags.bits(), 0, 0),
        Condition::FaceCompare { face, flags } => (flags.bits(), *face as u8, 0),
    };
    ConditionRecord {
        type_code: condition.type_code(),
        flags,
        face,
        param,
    }
}

fn unit_byte(value: f32) -> u8 {
    (value * 255.0).round().clamp(0.0, 255.0) as u8
}

fn cycles_byte(cycles: f32) -> u8 {
    (cycles * 10.0).round().clamp(0.0, 255.0) as u8
}

struct Builder<'a> {
    profile: &'a Profile,
    library: &'a Library,
    conditions: Vec<ConditionRecord>,
    actions: Vec<ActionRecord>,
    rules: Vec<RuleRecord>,
    animations: Vec<AnimationRecord>,
    tracks: Vec<TrackRecord>,
    keyframes: Vec<KeyframeRecord>,
    animation_index: HashMap<Uuid, u16>,
    animation_order: Vec<Uuid>,
    /// Pattern uuid to its (offset, count) span of tracks
    pattern_tracks: HashMap<Uuid, (u16, u16)>,
    remote_actions: Vec<RemoteAction>,
}

impl<'a> Builder<'a> {
    fn new(profile: &'a Profile, library: &'a Library) -> Self {
        Self {
            profile,
            library,
            conditions: Vec::new(),
            actions: Vec::new(),
            rules: Vec::new(),
            animations: Vec::new(),
            tracks: Vec::new(),
            keyframes: Vec::new(),
            animation_index: HashMap::new(),
            animation_order: Vec::new(),
            pattern_tracks: HashMap::new(),
            remote_actions: Vec::new(),
        }
    }

    fn color(&self, color: Color) -> Color {
        color.scaled(self.profile.brightness)
    }

    fn action_record(
        &mut self,
        rule_index: usize,
        action_index: usize,
        action: &Action,
    ) -> Result<ActionRecord, CompileError> {
        match action {
            Action::PlayAnimation {
                animation,
                face_mask,
                loop_count,
            } => Ok(ActionRecord {
                type_code: action.type_code(),
                loop_count: *loop_count,
                index: self.animation(animation)?,
                face_mask: *face_mask,
            }),
            Action::PlayAudioClip { loop_count, .. } => {
                Ok(self.remote(rule_index, action_index, action, *loop_count))
            }
            Action::MakeWebRequest { .. } | Action::SpeakText { .. } => {
                Ok(self.remote(rule_index, action_index, action, 1))
            }
        }
    }

    fn remote(
        &mut self,
        rule_index: usize,
        action_index: usize,
        action: &Action,
        loop_count: u8,
    ) -> ActionRecord {
        let id = remote_action_id(rule_index, action_index);
        self.remote_actions.push(RemoteAction {
            id,
            action: action.clone(),
        });
        ActionRecord {
            type_code: action.type_code(),
            loop_count,
            index: id,
            face_mask: 0,
        }
    }

    /// Index of an animation, emitting its records on first reference
    fn animation(&mut self, uuid: &Uuid) -> Result<u16, CompileError> {
        if let Some(&index) = self.animation_index.get(uuid) {
            return Ok(index);
        }
        let library = self.library;
        let animation = library
            .animation(uuid)
            .ok_or(CompileError::DanglingReference {
                kind: EntryKind::Animation,
                uuid: *uuid,
            })?;
        animation.validate()?;
        let record = self.animation_record(animation)?;

        let index = self.animations.len() as u16;
        self.animations.push(record);
        self.animation_index.insert(*uuid, index);
        self.animation_order.push(*uuid);
        Ok(index)
    }

    fn animation_record(&mut self, animation: &Animation) -> Result<AnimationRecord, CompileError> {
        let mut flags = 0;
        let payload = match &animation.kind {
            AnimationKind::Simple { color, count, fade } => {
                let c = self.color(*color);
                payload::simple(c.r, c.g, c.b, *count, unit_byte(*fade))
            }
            AnimationKind::Rainbow {
                count,
                fade,
                intensity,
                cycles,
                traveling,
            } => {
                if *traveling {
                    flags |= ANIM_FLAG_TRAVELING;
                }
                payload::rainbow(
                    *count,
                    unit_byte(*fade),
                    unit_byte(*intensity),
                    cycles_byte(*cycles),
                )
            }
            AnimationKind::Keyframed {
                pattern,
                traveling,
                use_led_indices,
            } => {
                if *traveling {
                    flags |= ANIM_FLAG_TRAVELING;
                }
                if *use_led_indices {
                    flags |= ANIM_FLAG_USE_LED_INDICES;
                }
                let (offset, count) = self.pattern(pattern)?;
                payload::keyframed(offset, count)
            }
            AnimationKind::GradientPattern {
                pattern,
                gradient,
                override_with_face,
            } => {
                let (offset, count) = self.pattern(pattern)?;
                let gradient = self.gradient(gradient, animation.face_mask);
                payload::gradient_pattern(offset, count, gradient, *override_with_face)
            }
            AnimationKind::Gradient { gradient } => {
                payload::gradient(self.gradient(gradient, animation.face_mask))
            }
            AnimationKind::Cycle {
                gradient,
                count,
                fade,
                intensity,
                cycles,
            } => {
                let gradient = self.gradient(gradient, animation.face_mask);
                payload::cycle(
                    *count,
                    unit_byte(*fade),
                    unit_byte(*intensity),
                    cycles_byte(*cycles),
                    gradient,
                )
            }
            AnimationKind::Noise => {
                return Err(CompileError::UnsupportedAnimation {
                    uuid: animation.uuid,
                    kind: animation.kind.name(),
                })
            }
        };
        let type_code = animation
            .kind
            .type_code()
            .ok_or(CompileError::UnsupportedAnimation {
                uuid: animation.uuid,
                kind: animation.kind.name(),
            })?;

        Ok(AnimationRecord {
            type_code,
            flags,
            duration_ms: animation.duration_ms as u16,
            face_mask: self.face_mask(animation.face_mask),
            payload,
        })
    }

    /// "All faces" is narrowed to the faces the profile's die actually has
    fn face_mask(&self, mask: u32) -> u32 {
        let die_mask = self.profile.die_type.all_faces_mask();
        if mask == ALL_FACES_MASK && die_mask != 0 {
            die_mask
        } else {
            mask
        }
    }

    fn pattern(&mut self, uuid: &Uuid) -> Result<(u16, u16), CompileError> {
        if let Some(&span) = self.pattern_tracks.get(uuid) {
            return Ok(span);
        }
        let library = self.library;
        let pattern = library
            .pattern(uuid)
            .ok_or(CompileError::DanglingReference {
                kind: EntryKind::Pattern,
                uuid: *uuid,
            })?;
        pattern.validate()?;

        let offset = self.tracks.len() as u16;
        for track in &pattern.tracks {
            self.track(&track.keyframes, track.led_mask);
        }
        let span = (offset, pattern.tracks.len() as u16);
        self.pattern_tracks.insert(*uuid, span);
        Ok(span)
    }

    fn gradient(&mut self, gradient: &GradientTrack, led_mask: u32) -> u16 {
        self.track(&gradient.keyframes, led_mask)
    }

    /// Append a track and its keyframes, returning the track index
    fn track(&mut self, keyframes: &[Keyframe], led_mask: u32) -> u16 {
        let index = self.tracks.len() as u16;
        self.tracks.push(TrackRecord {
            keyframe_offset: self.keyframes.len() as u16,
            keyframe_count: keyframes.len() as u8,
            led_mask,
        });
        for keyframe in keyframes {
            let color = self.color(keyframe.color);
            self.keyframes.push(KeyframeRecord {
                time: KeyframeRecord::quantize_time(keyframe.time),
                color,
            });
        }
        index
    }

    fn finish(self) -> CompiledDataSet {
        let header = Header {
            conditions: self.conditions.len() as u16,
            actions: self.actions.len() as u16,
            rules: self.rules.len() as u16,
            animations: self.animations.len() as u16,
            tracks: self.tracks.len() as u16,
            keyframes: self.keyframes.len() as u16,
        };
        let offsets = header.section_offsets();

        let mut bytes = Vec::with_capacity(offsets.end);
        header.encode(&mut bytes);
        self.conditions.iter().for_each(|r| r.encode(&mut bytes));
        self.actions.iter().for_each(|r| r.encode(&mut bytes));
        self.rules.iter().for_each(|r| r.encode(&mut bytes));
        self.animations.iter().for_each(|r| r.encode(&mut bytes));
        self.tracks.iter().for_each(|r| r.encode(&mut bytes));
        self.keyframes.iter().for_each(|r| r.encode(&mut bytes));

        CompiledDataSet {
            profile: self.profile.uuid,
            hash: dataset_hash(&bytes),
            bytes,
            header,
            offsets,
            remote_actions: self.remote_actions,
            animations: self.animation_order,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::DataSetView;
    use pixels_core::{face_mask, DieType, Pattern, PatternTrack, Rule};

    fn red_flash() -> Animation {
        Animation::simple("red", Color::RED, 500, face_mask(20).unwrap())
            .unwrap()
            .with_uuid(Uuid::from_u128(1))
    }

    fn single_rule_profile(anim: Uuid) -> Profile {
        Profile::new("one", DieType::D20)
            .with_uuid(Uuid::from_u128(100))
            .with_rule(Rule::new(
                Condition::rolled(&[20]).unwrap(),
                vec![Action::play_animation(anim, &[], 1).unwrap()],
            ))
    }

    fn library_with(animations: Vec<Animation>, patterns: Vec<Pattern>) -> Library {
        let mut library = Library::new();
        for p in patterns {
            library.put_pattern(p).unwrap();
        }
        for a in animations {
            library.put_animation(a).unwrap();
        }
        library
    }

    #[test]
    fn test_single_rule_section_counts() {
        let anim = red_flash();
        let profile = single_rule_profile(anim.uuid);
        let library = library_with(vec![anim], vec![]);

        let compiled = compile(&profile, &library, &CompileOptions::default()).unwrap();
        assert_eq!(
            compiled.header,
            Header {
                conditions: 1,
                actions: 1,
                rules: 1,
                animations: 1,
                tracks: 0,
                keyframes: 0,
            }
        );
        assert_eq!(compiled.bytes.len(), 12 + 8 + 8 + 8 + 16);

        let view = DataSetView::parse(&compiled.bytes).unwrap();
        let condition = view.condition(0).unwrap();
        assert_eq!(condition.type_code, 9);
        assert_eq!(condition.param, 1 << 19);
        assert_eq!(view.animation(0).unwrap().simple_color(), Color::RED);
        assert_eq!(view.animation(0).unwrap().duration_ms, 500);
    }

    #[test]
    fn test_compile_is_deterministic() {
        let anim = red_flash();
        let profile = single_rule_profile(anim.uuid);
        let library = library_with(vec![anim], vec![]);
        let options = CompileOptions::default();

        let a = compile(&profile, &library, &options).unwrap();
        let b = compile(&profile, &library, &options).unwrap();
        assert_eq!(a.bytes, b.bytes);
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.hash, dataset_hash(&b.bytes));
    }

    #[test]
    fn test_brightness_changes_colors_and_hash() {
        let anim = red_flash();
        let mut profile = single_rule_profile(anim.uuid);
        let library = library_with(vec![anim], vec![]);
        let options = CompileOptions::default();

        let full = compile(&profile, &library, &options).unwrap();
        profile.set_brightness(0.5).unwrap();
        let half = compile(&profile, &library, &options).unwrap();

        assert_eq!(full.header, half.header);
        assert_ne!(full.hash, half.hash);
        let view = DataSetView::parse(&half.bytes).unwrap();
        assert_eq!(view.animation(0).unwrap().simple_color(), Color::rgb(128, 0, 0));
    }

    #[test]
    fn test_shared_animation_is_deduplicated() {
        let anim = red_flash();
        let uuid = anim.uuid;
        let profile = Profile::new("shared", DieType::D20)
            .with_rule(Rule::new(
                Condition::rolled(&[1]).unwrap(),
                vec![Action::play_animation(uuid, &[], 1).unwrap()],
            ))
            .with_rule(Rule::new(
                Condition::rolled(&[2]).unwrap(),
                vec![Action::play_animation(uuid, &[], 1).unwrap()],
            ));
        let library = library_with(vec![anim], vec![]);

        let compiled = compile(&profile, &library, &CompileOptions::default()).unwrap();
        assert_eq!(compiled.header.animations, 1);
        assert_eq!(compiled.header.actions, 2);
        assert_eq!(compiled.animations, vec![uuid]);

        let view = DataSetView::parse(&compiled.bytes).unwrap();
        assert_eq!(view.action(0).unwrap().index, 0);
        assert_eq!(view.action(1).unwrap().index, 0);
        assert_eq!(view.rule(1).unwrap().action_offset, 1);
    }

    #[test]
    fn test_animations_indexed_in_first_reference_order() {
        let a = red_flash().with_uuid(Uuid::from_u128(0xa));
        let b = Animation::simple("blue", Color::BLUE, 300, 1)
            .unwrap()
            .with_uuid(Uuid::from_u128(0xb));
        let profile = Profile::new("order", DieType::D20).with_rule(Rule::new(
            Condition::Handling,
            vec![
                Action::play_animation(b.uuid, &[], 1).unwrap(),
                Action::play_animation(a.uuid, &[], 1).unwrap(),
            ],
        ));
        let library = library_with(vec![a.clone(), b.clone()], vec![]);

        let compiled = compile(&profile, &library, &CompileOptions::default()).unwrap();
        assert_eq!(compiled.animations, vec![b.uuid, a.uuid]);
    }

    #[test]
    fn test_shared_pattern_emitted_once() {
        let pattern = Pattern::new(
            "ring",
            vec![
                PatternTrack {
                    led_mask: 0b01,
                    keyframes: GradientTrack::linear(Color::BLACK, Color::WHITE).keyframes,
                },
                PatternTrack {
                    led_mask: 0b10,
                    keyframes: GradientTrack::linear(Color::WHITE, Color::BLACK).keyframes,
                },
            ],
        )
        .unwrap();
        let keyframed = Animation::new(
            "spin",
            1000,
            ALL_FACES_MASK,
            AnimationKind::Keyframed {
                pattern: pattern.uuid,
                traveling: true,
                use_led_indices: false,
            },
        )
        .unwrap();
        let tinted = Animation::new(
            "tinted",
            1000,
            1,
            AnimationKind::GradientPattern {
                pattern: pattern.uuid,
                gradient: GradientTrack::linear(Color::RED, Color::GREEN),
                override_with_face: false,
            },
        )
        .unwrap();
        let profile = Profile::new("patterns", DieType::D6).with_rule(Rule::new(
            Condition::Handling,
            vec![
                Action::play_animation(keyframed.uuid, &[], 1).unwrap(),
                Action::play_animation(tinted.uuid, &[], 1).unwrap(),
            ],
        ));
        let library = library_with(vec![keyframed, tinted], vec![pattern]);

        let compiled = compile(&profile, &library, &CompileOptions::default()).unwrap();
        // two pattern tracks plus one gradient track
        assert_eq!(compiled.header.tracks, 3);
        assert_eq!(compiled.header.keyframes, 6);

        let view = DataSetView::parse(&compiled.bytes).unwrap();
        let spin = view.animation(0).unwrap();
        assert_eq!(spin.track_span(), (0, 2));
        assert_eq!(spin.flags, ANIM_FLAG_TRAVELING);
        assert_eq!(spin.face_mask, DieType::D6.all_faces_mask());
        assert_eq!(view.animation(1).unwrap().track_span(), (0, 2));
        assert_eq!(view.track(2).unwrap().keyframe_offset, 4);
    }

    #[test]
    fn test_remote_actions() {
        let profile = Profile::new("host", DieType::D20)
            .with_rule(Rule::new(Condition::Handling, vec![]))
            .with_rule(Rule::new(
                Condition::rolled(&[20]).unwrap(),
                vec![
                    Action::speak("crit", 1.0, 1.0).unwrap(),
                    Action::web_request("https://example.com", "20", Default::default())
                        .unwrap(),
                ],
            ));
        let compiled = compile(&profile, &Library::new(), &CompileOptions::default()).unwrap();

        assert_eq!(remote_action_id(1, 1), 0x0101);
        assert!(matches!(
            compiled.remote_action(0x0100),
            Some(Action::SpeakText { .. })
        ));
        assert!(matches!(
            compiled.remote_action(0x0101),
            Some(Action::MakeWebRequest { .. })
        ));
        let view = DataSetView::parse(&compiled.bytes).unwrap();
        assert_eq!(view.action(1).unwrap().index, 0x0101);
        assert_eq!(view.action(1).unwrap().type_code, 3);
    }

    #[test]
    fn test_dangling_references() {
        let missing = Uuid::from_u128(404);
        let profile = single_rule_profile(missing);
        let err = compile(&profile, &Library::new(), &CompileOptions::default()).unwrap_err();
        assert_eq!(
            err,
            CompileError::DanglingReference {
                kind: EntryKind::Animation,
                uuid: missing
            }
        );

        let keyframed = Animation::new(
            "orphan",
            1000,
            1,
            AnimationKind::Keyframed {
                pattern: missing,
                traveling: false,
                use_led_indices: false,
            },
        )
        .unwrap();
        let profile = single_rule_profile(keyframed.uuid);
        let library = library_with(vec![keyframed], vec![]);
        let err = compile(&profile, &library, &CompileOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            CompileError::DanglingReference {
                kind: EntryKind::Pattern,
                ..
            }
        ));
        assert!(dependencies(&profile, &library).is_err());
    }

    #[test]
    fn test_capacity_exceeded() {
        let mut profile = Profile::new("big", DieType::D20);
        for _ in 0..3 {
            profile.rules.push(Rule::new(Condition::Crooked, vec![]));
        }
        let options = CompileOptions {
            limits: Limits {
                max_rules: 2,
                ..Limits::default()
            },
        };
        let err = compile(&profile, &Library::new(), &options).unwrap_err();
        assert_eq!(
            err,
            CompileError::CapacityExceeded {
                section: "rules",
                count: 3,
                limit: 2
            }
        );
    }

    #[test]
    fn test_noise_is_unsupported() {
        let noise = Animation::new("noise", 1000, 1, AnimationKind::Noise).unwrap();
        let profile = single_rule_profile(noise.uuid);
        let library = library_with(vec![noise], vec![]);
        let err = compile(&profile, &library, &CompileOptions::default()).unwrap_err();
        assert!(matches!(err, CompileError::UnsupportedAnimation { kind: "noise", .. }));
    }
}
