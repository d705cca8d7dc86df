//! Profiles and their rules

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::action::Action;
use crate::condition::Condition;
use crate::error::{check_brightness, EntityError};
use crate::faces::DieType;

/// One condition and the actions it triggers, in declaration order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub condition: Condition,
    pub actions: Vec<Action>,
}

impl Rule {
    pub fn new(condition: Condition, actions: Vec<Action>) -> Self {
        Self { condition, actions }
    }

    pub fn validate(&self) -> Result<(), EntityError> {
        self.condition.validate()?;
        self.actions.iter().try_for_each(Action::validate)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub uuid: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub die_type: DieType,
    pub rules: Vec<Rule>,
    /// Scale applied to every colour at compile time
    pub brightness: f32,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl Profile {
    pub fn new(name: impl Into<String>, die_type: DieType) -> Self {
        let now = Utc::now();
        Self {
            uuid: Uuid::new_v4(),
            name: name.into(),
            description: String::new(),
            die_type,
            rules: Vec::new(),
            brightness: 1.0,
            created: now,
            modified: now,
        }
    }

    pub fn with_uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = uuid;
        self
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn set_brightness(&mut self, brightness: f32) -> Result<(), EntityError> {
        check_brightness("brightness", brightness)?;
        self.brightness = brightness;
        self.touch();
        Ok(())
    }

    pub fn touch(&mut self) {
        self.modified = Utc::now();
    }

    /// Animations referenced by the rules, in first-reference order
    pub fn animation_refs(&self) -> Vec<Uuid> {
        let mut refs = Vec::new();
        for uuid in self.rules.iter().flat_map(|r| r.actions.iter()).filter_map(Action::animation) {
            if !refs.contains(&uuid) {
                refs.push(uuid);
            }
        }
        refs
    }

    pub fn validate(&self) -> Result<(), EntityError> {
        check_brightness("brightness", self.brightness)?;
        self.rules.iter().try_for_each(Rule::validate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brightness_is_checked() {
        let mut profile = Profile::new("test", DieType::D20);
        assert!(profile.set_brightness(0.5).is_ok());
        assert_eq!(profile.brightness, 0.5);
        let err = profile.set_brightness(-0.1).unwrap_err();
        assert_eq!(err.field(), "brightness");
        assert!(profile.set_brightness(f32::NAN).is_err());
        assert_eq!(profile.brightness, 0.5);
    }

    #[test]
    fn test_animation_refs_in_first_reference_order() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let profile = Profile::new("refs", DieType::D6)
            .with_rule(Rule::new(
                Condition::Handling,
                vec![
                    Action::play_animation(b, &[], 1).unwrap(),
                    Action::speak("hi", 1.0, 1.0).unwrap(),
                ],
            ))
            .with_rule(Rule::new(
                Condition::rolled(&[6]).unwrap(),
                vec![
                    Action::play_animation(a, &[], 1).unwrap(),
                    Action::play_animation(b, &[], 1).unwrap(),
                ],
            ));
        assert_eq!(profile.animation_refs(), vec![b, a]);
    }

    #[test]
    fn test_validate_deserialized_profile() {
        let mut profile = Profile::new("bad", DieType::D20);
        profile.rules.push(Rule::new(Condition::Rolled { face_mask: 0 }, vec![]));
        let err = profile.validate().unwrap_err();
        assert_eq!(err.field(), "face_mask");
    }
}
