//! Discovery annotation carried by pods and services

use crate::descriptor::null_as_default;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Annotation announcing extensions on a pod or service
pub const ANNOTATION_KEY: &str = "steadybit.com/extension-auto-registration";
/// Older name of [`ANNOTATION_KEY`], still honoured
pub const LEGACY_ANNOTATION_KEY: &str = "steadybit.com/extension-auto-discovery";
/// Recognised annotation keys in lookup order
pub const ANNOTATION_KEYS: [&str; 2] = [ANNOTATION_KEY, LEGACY_ANNOTATION_KEY];

/// Annotation payload, e.g. `{"extensions":[{"port":8080,"protocol":"http"}]}`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionAnnotations {
    #[serde(default, deserialize_with = "null_as_default")]
    pub extensions: Vec<ExtensionAnnotation>,
}

/// One extension endpoint announced by an annotation
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionAnnotation {
    #[serde(default, deserialize_with = "null_as_default")]
    pub protocol: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ExtensionAnnotations {
    /// Parse an annotation value
    pub fn parse(value: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(value)
    }

    /// Find the first recognised annotation, returning its key and raw value
    pub fn lookup(annotations: &BTreeMap<String, String>) -> Option<(&'static str, &str)> {
        ANNOTATION_KEYS
            .iter()
            .find_map(|key| annotations.get(*key).map(|value| (*key, value.as_str())))
    }
}

impl ExtensionAnnotation {
    /// Build `protocol://host[:port]path`; non-positive ports are left out
    pub fn url_for(&self, host: &str) -> String {
        let mut url = format!("{}://{}", self.protocol, host);
        if let Some(port) = self.port.filter(|port| *port > 0) {
            url.push_str(&format!(":{}", port));
        }
        if let Some(path) = &self.path {
            url.push_str(path);
        }
        url
    }
}
