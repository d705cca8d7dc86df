//! Pixels Core - Entity model, editable library and paired dice
//!
//! This crate provides the foundational types shared by the compiler and
//! the connection scheduler:
//! - Conditions, actions, animations, patterns, rules and profiles
//! - Face masks and die geometry
//! - An editable library with change events
//! - Paired peripheral records, naming and firmware availability

pub mod action;
pub mod animation;
pub mod arena;
pub mod color;
pub mod condition;
pub mod error;
pub mod faces;
pub mod firmware;
pub mod library;
pub mod pairing;
pub mod peripheral;
pub mod profile;

pub use action::{Action, WebRequestFormat};
pub use animation::{Animation, AnimationKind, GradientTrack, Keyframe, Pattern, PatternTrack};
pub use arena::{Arena, Handle};
pub use color::Color;
pub use condition::{BatteryFlags, Condition, ConnectionFlags, FaceCompareFlags, HelloGoodbyeFlags};
pub use error::{EntityError, RangeError, StoreError};
pub use faces::{face_mask, face_mask_of, faces_in_mask, DieType, ALL_FACES_MASK, MAX_FACE};
pub use firmware::{dfu_availability, DfuAvailability, DfuFilesInfo, DfuState};
pub use library::{EntryKind, Library, LibraryError, LibraryEvent, LibraryFile, LoadError};
pub use pairing::PairingStore;
pub use peripheral::{
    expand_short_uuid, parse_advertised_name, AdvertisedMode, PairedPeripheral, PixelId,
};
pub use profile::{Profile, Rule};
