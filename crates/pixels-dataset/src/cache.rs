//! Compiled DataSet cache
//!
//! Entries are keyed by profile uuid and a SHA256 over everything the
//! compile reads: the profile, its resolved animations and patterns, and
//! the compile options. An entry is reused only when that digest still
//! matches. Library events drop entries eagerly, using the dependencies
//! recorded at compile time.

use std::collections::HashMap;
use std::sync::Arc;

use pixels_core::{EntryKind, Library, LibraryEvent, Profile};
use serde::Serialize;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::compiler::{compile, dependencies, CompileError, CompileOptions, CompiledDataSet, Dependencies};

/// Compute SHA256 hash of data and return as hex string
pub fn sha256_hex(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone)]
struct CacheEntry {
    content_sha: String,
    dependencies: Dependencies,
    compiled: Arc<CompiledDataSet>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug, Default)]
pub struct DataSetCache {
    entries: HashMap<Uuid, CacheEntry>,
    hits: u64,
    misses: u64,
}

/// Digest of every input a compile of `profile` reads
pub fn content_sha(
    profile: &Profile,
    deps: &Dependencies,
    library: &Library,
    options: &CompileOptions,
) -> String {
    let mut data = Vec::new();
    let mut push = |value: Result<Vec<u8>, serde_json::Error>| {
        // entity types always serialize
        if let Ok(bytes) = value {
            data.extend_from_slice(&bytes);
        }
        data.push(0);
    };
    push(serde_json::to_vec(profile));
    for uuid in &deps.animations {
        push(serde_json::to_vec(&library.animation(uuid)));
    }
    for uuid in &deps.patterns {
        push(serde_json::to_vec(&library.pattern(uuid)));
    }
    push(serde_json::to_vec(options));
    sha256_hex(&data)
}

impl DataSetCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached DataSet for a profile, compiling it if the inputs changed
    pub fn get_or_compile(
        &mut self,
        profile_uuid: &Uuid,
        library: &Library,
        options: &CompileOptions,
    ) -> Result<Arc<CompiledDataSet>, CompileError> {
        let profile = library
            .profile(profile_uuid)
            .ok_or(CompileError::DanglingReference {
                kind: EntryKind::Profile,
                uuid: *profile_uuid,
            })?;
        let deps = dependencies(profile, library)?;
        let sha = content_sha(profile, &deps, library, options);

        if let Some(entry) = self.entries.get(profile_uuid) {
            if entry.content_sha == sha {
                self.hits += 1;
                trace!(profile = %profile_uuid, "DataSet cache hit");
                return Ok(entry.compiled.clone());
            }
        }

        self.misses += 1;
        let compiled = Arc::new(compile(profile, library, options)?);
        debug!(profile = %profile_uuid, sha = %&sha[..8], "DataSet cache miss, compiled");
        self.entries.insert(
            *profile_uuid,
            CacheEntry {
                content_sha: sha,
                dependencies: deps,
                compiled: compiled.clone(),
            },
        );
        Ok(compiled)
    }

    pub fn get(&self, profile_uuid: &Uuid) -> Option<Arc<CompiledDataSet>> {
        self.entries.get(profile_uuid).map(|e| e.compiled.clone())
    }

    pub fn invalidate(&mut self, profile_uuid: &Uuid) -> bool {
        self.entries.remove(profile_uuid).is_some()
    }

    /// Drop every entry that depends on an animation or pattern
    pub fn invalidate_dependency(&mut self, uuid: &Uuid) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            !entry.dependencies.animations.contains(uuid)
                && !entry.dependencies.patterns.contains(uuid)
        });
        before - self.entries.len()
    }

    /// React to a library edit
    pub fn apply_event(&mut self, event: &LibraryEvent) {
        let uuid = event.uuid();
        let dropped = match event.kind() {
            EntryKind::Profile => self.invalidate(&uuid) as usize,
            EntryKind::Animation | EntryKind::Pattern => self.invalidate_dependency(&uuid),
        };
        if dropped > 0 {
            debug!(%uuid, dropped, "Invalidated cached DataSets");
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixels_core::{Action, Animation, Color, Condition, DieType, Rule};

    fn setup() -> (Library, Uuid, Uuid) {
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
    fn test_hit_then_recompile_on_edit() {
        let (mut library, profile_uuid, anim_uuid) = setup();
        let mut cache = DataSetCache::new();
        let options = CompileOptions::default();

        let first = cache.get_or_compile(&profile_uuid, &library, &options).unwrap();
        let again = cache.get_or_compile(&profile_uuid, &library, &options).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(cache.stats().hits, 1);

        library
            .edit_animation(&anim_uuid, |a| a.duration_ms = 900)
            .unwrap();
        let edited = cache.get_or_compile(&profile_uuid, &library, &options).unwrap();
        assert_ne!(first.hash, edited.hash);
        assert_eq!(cache.stats().misses, 2);
    }

    #[test]
    fn test_events_invalidate_dependents() {
        let (mut library, profile_uuid, anim_uuid) = setup();
        let mut cache = DataSetCache::new();
        let mut events = library.subscribe();
        cache
            .get_or_compile(&profile_uuid, &library, &CompileOptions::default())
            .unwrap();

        library.edit_animation(&anim_uuid, |a| a.name = "renamed".into()).unwrap();
        let event = events.try_recv().unwrap();
        cache.apply_event(&event);
        assert!(cache.get(&profile_uuid).is_none());

        cache
            .get_or_compile(&profile_uuid, &library, &CompileOptions::default())
            .unwrap();
        cache.apply_event(&LibraryEvent::Changed {
            kind: EntryKind::Animation,
            uuid: Uuid::new_v4(),
        });
        assert!(cache.get(&profile_uuid).is_some());
        cache.apply_event(&LibraryEvent::Removed {
            kind: EntryKind::Profile,
            uuid: profile_uuid,
        });
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn test_missing_profile() {
        let mut cache = DataSetCache::new();
        let err = cache
            .get_or_compile(&Uuid::new_v4(), &Library::new(), &CompileOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            CompileError::DanglingReference {
                kind: EntryKind::Profile,
                ..
            }
        ));
    }

    #[test]
    fn test_sha256() {
        assert_eq!(
            sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }
}
