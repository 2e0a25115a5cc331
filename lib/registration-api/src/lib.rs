//! Wire types for extension auto-registration
//!
//! This library defines the payloads exchanged with the agent and read from
//! Kubernetes objects:
//! - ExtensionDescriptor: one registration record on the agent's extensions API
//! - ExtensionAnnotations: the JSON payload carried by the discovery annotation
//! - LabelMatch: key/value pairs used to include or exclude workloads

pub mod annotation;
pub mod descriptor;
pub mod labels;

pub use annotation::{ExtensionAnnotation, ExtensionAnnotations, ANNOTATION_KEYS};
pub use descriptor::{descriptors_equal, ExtensionDescriptor};
pub use labels::{matches_all, parse_label_matches, selector_matches, LabelMatch};
