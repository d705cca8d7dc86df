//! Pixels DataSet - compile profiles into the firmware's binary format
//!
//! - `layout`: fixed-width record encoding and the section header
//! - `compiler`: profile graph to DataSet bytes
//! - `hash`: content hash compared against what a die last acknowledged
//! - `view`: parse and inspect DataSet bytes
//! - `cache`: compiled DataSets keyed by profile and input digest

pub mod cache;
pub mod compiler;
pub mod hash;
pub mod layout;
pub mod view;

pub use cache::{sha256_hex, CacheStats, DataSetCache};
pub use compiler::{
    compile, compile_profile, dependencies, remote_action_id, CompileError, CompileOptions,
    CompiledDataSet, Dependencies, Limits, RemoteAction,
};
pub use hash::dataset_hash;
pub use layout::Header;
pub use view::{DataSetDump, DataSetView, ViewError};
