//! Editable library of profiles, animations and patterns
//!
//! Objects live in generational arenas and are looked up by uuid. Every
//! mutation goes through a method on [`Library`], which broadcasts a
//! [`LibraryEvent`] so caches and the daemon can react to edits.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::animation::{Animation, Pattern};
use crate::arena::{Arena, Handle};
use crate::error::{EntityError, StoreError};
use crate::profile::Profile;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("{kind} {uuid} not found")]
    NotFound { kind: EntryKind, uuid: Uuid },
    #[error(transparent)]
    Entity(#[from] EntityError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Profile,
    Animation,
    Pattern,
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryKind::Profile => write!(f, "profile"),
            EntryKind::Animation => write!(f, "animation"),
            EntryKind::Pattern => write!(f, "pattern"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum LibraryEvent {
    Added { kind: EntryKind, uuid: Uuid },
    Changed { kind: EntryKind, uuid: Uuid },
    Removed { kind: EntryKind, uuid: Uuid },
}

impl LibraryEvent {
    pub fn kind(&self) -> EntryKind {
        match self {
            Self::Added { kind, .. } | Self::Changed { kind, .. } | Self::Removed { kind, .. } => {
                *kind
            }
        }
    }

    pub fn uuid(&self) -> Uuid {
        match self {
            Self::Added { uuid, .. } | Self::Changed { uuid, .. } | Self::Removed { uuid, .. } => {
                *uuid
            }
        }
    }
}

/// On-disk form of a library
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LibraryFile {
    #[serde(default)]
    pub profiles: Vec<Profile>,
    #[serde(default)]
    pub animations: Vec<Animation>,
    #[serde(default)]
    pub patterns: Vec<Pattern>,
}

/// Arena plus uuid index for one kind of object
#[derive(Debug)]
struct Table<T> {
    arena: Arena<T>,
    index: HashMap<Uuid, Handle>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            arena: Arena::new(),
            index: HashMap::new(),
        }
    }
}

impl<T> Table<T> {
    fn get(&self, uuid: &Uuid) -> Option<&T> {
        self.index.get(uuid).and_then(|h| self.arena.get(*h))
    }

    /// Insert or replace. Returns the handle and whether the uuid is new.
    fn upsert(&mut self, uuid: Uuid, value: T) -> (Handle, bool) {
        if let Some(&handle) = self.index.get(&uuid) {
            if let Some(slot) = self.arena.get_mut(handle) {
                *slot = value;
                return (handle, false);
            }
        }
        let handle = self.arena.insert(value);
        self.index.insert(uuid, handle);
        (handle, true)
    }

    fn remove(&mut self, uuid: &Uuid) -> Option<T> {
        let handle = self.index.remove(uuid)?;
        self.arena.remove(handle)
    }
}

pub struct Library {
    profiles: Table<Profile>,
    animations: Table<Animation>,
    patterns: Table<Pattern>,
    event_tx: broadcast::Sender<LibraryEvent>,
}

impl Default for Library {
    fn default() -> Self {
        Self::new()
    }
}

impl Library {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            profiles: Table::default(),
            animations: Table::default(),
            patterns: Table::default(),
            event_tx,
        }
    }

    /// Build a library from its file form, validating every entry
    pub fn from_file_data(data: LibraryFile) -> Result<Self, EntityError> {
        let mut library = Self::new();
        for pattern in data.patterns {
            library.put_pattern(pattern)?;
        }
        for animation in data.animations {
            library.put_animation(animation)?;
        }
        for profile in data.profiles {
            library.put_profile(profile)?;
        }
        Ok(library)
    }

    pub fn to_file_data(&self) -> LibraryFile {
        LibraryFile {
            profiles: self.profiles().cloned().collect(),
            animations: self.animations().cloned().collect(),
            patterns: self.patterns().cloned().collect(),
        }
    }

    /// Load from a JSON file, or start empty if it doesn't exist
    pub fn load_or_create(path: &Path) -> Result<Self, LoadError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path).map_err(StoreError::from)?;
        let data: LibraryFile = serde_json::from_str(&content).map_err(StoreError::from)?;
        Ok(Self::from_file_data(data)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(&self.to_file_data())?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LibraryEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: LibraryEvent) {
        debug!(?event, "Library changed");
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    fn emit_upsert(&self, kind: EntryKind, uuid: Uuid, added: bool) {
        if added {
            self.emit(LibraryEvent::Added { kind, uuid });
        } else {
            self.emit(LibraryEvent::Changed { kind, uuid });
        }
    }

    pub fn profile(&self, uuid: &Uuid) -> Option<&Profile> {
        self.profiles.get(uuid)
    }

    pub fn animation(&self, uuid: &Uuid) -> Option<&Animation> {
        self.animations.get(uuid)
    }

    pub fn pattern(&self, uuid: &Uuid) -> Option<&Pattern> {
        self.patterns.get(uuid)
    }

    pub fn profile_by_handle(&self, handle: Handle) -> Option<&Profile> {
        self.profiles.arena.get(handle)
    }

    pub fn profiles(&self) -> impl Iterator<Item = &Profile> {
        self.profiles.arena.iter().map(|(_, p)| p)
    }

    pub fn animations(&self) -> impl Iterator<Item = &Animation> {
        self.animations.arena.iter().map(|(_, a)| a)
    }

    pub fn patterns(&self) -> impl Iterator<Item = &Pattern> {
        self.patterns.arena.iter().map(|(_, p)| p)
    }

    /// Add a profile, replacing any profile with the same uuid
    pub fn put_profile(&mut self, profile: Profile) -> Result<Handle, EntityError> {
        profile.validate()?;
        let uuid = profile.uuid;
        let (handle, added) = self.profiles.upsert(uuid, profile);
        self.emit_upsert(EntryKind::Profile, uuid, added);
        Ok(handle)
    }

    pub fn put_animation(&mut self, animation: Animation) -> Result<Handle, EntityError> {
        animation.validate()?;
        let uuid = animation.uuid;
        let (handle, added) = self.animations.upsert(uuid, animation);
        self.emit_upsert(EntryKind::Animation, uuid, added);
        Ok(handle)
    }

    pub fn put_pattern(&mut self, pattern: Pattern) -> Result<Handle, EntityError> {
        pattern.validate()?;
        let uuid = pattern.uuid;
        let (handle, added) = self.patterns.upsert(uuid, pattern);
        self.emit_upsert(EntryKind::Pattern, uuid, added);
        Ok(handle)
    }

    /// Edit a profile in place. The edit is discarded if the result does
    /// not validate.
    pub fn edit_profile<F>(&mut self, uuid: &Uuid, edit: F) -> Result<(), LibraryError>
    where
        F: FnOnce(&mut Profile),
    {
        let mut profile = self
            .profile(uuid)
            .cloned()
            .ok_or(LibraryError::NotFound {
                kind: EntryKind::Profile,
                uuid: *uuid,
            })?;
        edit(&mut profile);
        profile.uuid = *uuid;
        profile.touch();
        self.put_profile(profile)?;
        Ok(())
    }

    pub fn edit_animation<F>(&mut self, uuid: &Uuid, edit: F) -> Result<(), LibraryError>
    where
        F: FnOnce(&mut Animation),
    {
        let mut animation = self
            .animation(uuid)
            .cloned()
            .ok_or(LibraryError::NotFound {
                kind: EntryKind::Animation,
                uuid: *uuid,
            })?;
        edit(&mut animation);
        animation.uuid = *uuid;
        self.put_animation(animation)?;
        Ok(())
    }

    pub fn edit_pattern<F>(&mut self, uuid: &Uuid, edit: F) -> Result<(), LibraryError>
    where
        F: FnOnce(&mut Pattern),
    {
        let mut pattern = self
            .pattern(uuid)
            .cloned()
            .ok_or(LibraryError::NotFound {
                kind: EntryKind::Pattern,
                uuid: *uuid,
            })?;
        edit(&mut pattern);
        pattern.uuid = *uuid;
        self.put_pattern(pattern)?;
        Ok(())
    }

    pub fn remove_profile(&mut self, uuid: &Uuid) -> Option<Profile> {
        let removed = self.profiles.remove(uuid)?;
        self.emit(LibraryEvent::Removed {
            kind: EntryKind::Profile,
            uuid: *uuid,
        });
        Some(removed)
    }

    pub fn remove_animation(&mut self, uuid: &Uuid) -> Option<Animation> {
        let removed = self.animations.remove(uuid)?;
        self.emit(LibraryEvent::Removed {
            kind: EntryKind::Animation,
            uuid: *uuid,
        });
        Some(removed)
    }

    pub fn remove_pattern(&mut self, uuid: &Uuid) -> Option<Pattern> {
        let removed = self.patterns.remove(uuid)?;
        self.emit(LibraryEvent::Removed {
            kind: EntryKind::Pattern,
            uuid: *uuid,
        });
        Some(removed)
    }

    /// Profiles with at least one action playing `animation`
    pub fn profiles_using_animation(&self, animation: &Uuid) -> Vec<Uuid> {
        self.profiles()
            .filter(|p| p.animation_refs().contains(animation))
            .map(|p| p.uuid)
            .collect()
    }
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid library entry: {0}")]
    Entity(#[from] EntityError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::color::Color;
    use crate::condition::Condition;
    use crate::faces::DieType;
    use crate::profile::Rule;
    use tempfile::TempDir;

    fn sample() -> (Library, Uuid, Uuid) {
        let mut library = Library::new();
        let anim = Animation::simple("red", Color::RED, 500, 1).unwrap();
        let anim_uuid = anim.uuid;
        library.put_animation(anim).unwrap();
        let profile = Profile::new("p", DieType::D20).with_rule(Rule::new(
            Condition::rolled(&[20]).unwrap(),
            vec![Action::play_animation(anim_uuid, &[], 1).unwrap()],
        ));
        let profile_uuid = profile.uuid;
        library.put_profile(profile).unwrap();
        (library, profile_uuid, anim_uuid)
    }

    #[test]
    fn test_lookup_and_events() {
        let (mut library, profile_uuid, anim_uuid) = sample();
        let mut rx = library.subscribe();

        library
            .edit_animation(&anim_uuid, |a| a.duration_ms = 800)
            .unwrap();
        assert_eq!(library.animation(&anim_uuid).unwrap().duration_ms, 800);
        assert_eq!(
            rx.try_recv().unwrap(),
            LibraryEvent::Changed {
                kind: EntryKind::Animation,
                uuid: anim_uuid
            }
        );

        assert_eq!(library.profiles_using_animation(&anim_uuid), vec![profile_uuid]);
        assert!(library.remove_profile(&profile_uuid).is_some());
        assert!(library.profile(&profile_uuid).is_none());
        assert_eq!(rx.try_recv().unwrap().kind(), EntryKind::Profile);
    }

    #[test]
    fn test_invalid_edit_is_discarded() {
        let (mut library, _, anim_uuid) = sample();
        let err = library
            .edit_animation(&anim_uuid, |a| a.face_mask = 0)
            .unwrap_err();
        assert!(matches!(err, LibraryError::Entity(_)));
        assert_eq!(library.animation(&anim_uuid).unwrap().face_mask, 1);

        let missing = Uuid::new_v4();
        assert!(matches!(
            library.edit_profile(&missing, |_| {}),
            Err(LibraryError::NotFound { .. })
        ));
    }

    #[test]
    fn test_save_and_load() {
        let (library, profile_uuid, anim_uuid) = sample();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("library.json");
        library.save(&path).unwrap();

        let loaded = Library::load_or_create(&path).unwrap();
        assert_eq!(loaded.profile(&profile_uuid), library.profile(&profile_uuid));
        assert_eq!(loaded.animation(&anim_uuid), library.animation(&anim_uuid));

        let empty = Library::load_or_create(&dir.path().join("missing.json")).unwrap();
        assert_eq!(empty.profiles().count(), 0);
    }
}
