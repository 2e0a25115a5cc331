//! Extension registration records as understood by the agent

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A single extension registration on the agent's `/extensions` endpoint
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionDescriptor {
    /// Never produced by discovery, but kept so socket based registrations
    /// can be matched and deleted with the exact body the agent returned
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "String::is_empty"
    )]
    pub unix_socket: String,

    /// Address the agent uses to reach the extension
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "String::is_empty"
    )]
    pub url: String,

    /// Extension types, defaulted by the agent when empty
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub types: Vec<String>,

    /// Ports the extension may act on, mapped to why they were allowed
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub restricted_ports: BTreeMap<i32, String>,

    /// IPs the extension may act on
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub restricted_ips: Vec<String>,
}

impl ExtensionDescriptor {
    /// Create a descriptor for an HTTP reachable extension
    pub fn new(
        url: impl Into<String>,
        restricted_ports: BTreeMap<i32, String>,
        restricted_ips: Vec<String>,
    ) -> Self {
        Self {
            url: url.into(),
            restricted_ports,
            restricted_ips,
            ..Default::default()
        }
    }

    /// Whether `other` describes the same registration.
    ///
    /// Compares the url, the (port, label) pairs and the set of IPs.
    /// `types` and `unix_socket` are ignored since the agent may fill them in.
    pub fn matches(&self, other: &ExtensionDescriptor) -> bool {
        self.url == other.url
            && self.restricted_ports == other.restricted_ports
            && ip_set(&self.restricted_ips) == ip_set(&other.restricted_ips)
    }
}

/// Free function form of [`ExtensionDescriptor::matches`]
pub fn descriptors_equal(a: &ExtensionDescriptor, b: &ExtensionDescriptor) -> bool {
    a.matches(b)
}

fn ip_set(ips: &[String]) -> BTreeSet<&str> {
    ips.iter().map(String::as_str).collect()
}

impl fmt::Display for ExtensionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.url.is_empty() {
            write!(f, "unix://{}", self.unix_socket)?;
        } else {
            write!(f, "{}", self.url)?;
        }
        let ports: Vec<String> = self
            .restricted_ports
            .iter()
            .map(|(port, label)| format!("{}={}", port, label))
            .collect();
        write!(
            f,
            " (ports: [{}], ips: [{}])",
            ports.join(", "),
            self.restricted_ips.join(", ")
        )
    }
}

/// Accept explicit `null` wherever a field would otherwise default
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
