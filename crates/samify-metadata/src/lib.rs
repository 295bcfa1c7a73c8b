//! Samify Metadata Resolver
//!
//! Recovers human-readable logical IDs from CDK build metadata.
//!
//! - [`MetadataBundle`]: assembly manifest + construct tree, loaded once and
//!   passed by value into each run
//! - [`resolve`]: logical ID -> semantic name with deterministic collision
//!   handling (type suffix, then counter)
//! - [`Resolution`]: performed-vs-skipped is observable to callers

mod bundle;
mod resolver;

pub use bundle::{construct_name_from_path, ConstructRecord, MetadataBundle, MetadataError};
pub use resolver::{resolve, sanitize_logical_id, Resolution, ResolverOptions};
