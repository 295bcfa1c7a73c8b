//! Samify Template Graph
//!
//! Typed document model for CloudFormation/CDK/SAM templates with a
//! reference index over every logical-ID occurrence.
//!
//! # Core Concepts
//!
//! - [`TemplateDocument`]: ordered sections, resources keyed by logical ID
//! - [`TemplateValue`] / [`Intrinsic`]: property trees with reference
//!   constructs kept as typed nodes, never resolved
//! - [`SubString`]: the `${...}` interpolation mini-language, parsed
//!   structurally
//! - [`ReferenceIndex`]: every reference site with a navigable path
//! - [`DependencyGraph`]: cycle-tolerant resource reference graph
//!
//! Parsing accepts JSON and YAML (short-form tags included); serialization
//! emits canonical long-form intrinsics and is otherwise lossless for every
//! loaded construct.

mod document;
mod error;
mod graph;
mod index;
mod parse;
mod serialize;
mod sub;
mod value;

pub use document::{
    normalize_inline_code, DependsOn, Resource, TemplateDocument, Transform, SAM_TRANSFORM,
};
pub use error::{ParseError, SerializeError};
pub use graph::DependencyGraph;
pub use index::{PathStep, RefKind, ReferenceIndex, ReferenceSite, Section, ValuePath};
pub use parse::{from_value, parse_str};
pub use serialize::{document_value, to_json_string, to_yaml_string};
pub use sub::{SubSegment, SubString};
pub use value::{Intrinsic, Number, TemplateValue, ValueMap};
