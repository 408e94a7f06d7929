#![doc = "Link-time combiner for compiled managed-runtime modules"]

pub mod builder;
pub mod config;
pub mod error;
pub mod forwarders;
pub mod image;
pub mod initializer;
pub mod internalize;
pub mod loader;
pub mod merge_context;
pub mod merger;
pub mod module_registry;
pub mod path_patcher;
pub mod report;
pub mod resource_offsets;
pub mod resources;
pub mod symbol_map;
pub mod target;
pub mod type_import;
pub mod types;

pub use error::MergeError;
pub use merger::{MergeOptions, MergeOutput, Merger};
pub use module_registry::InputModule;
