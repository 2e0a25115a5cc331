//! RBAC preflight

use k8s_openapi::api::authorization::v1::{
    ResourceAttributes, SelfSubjectAccessReview, SelfSubjectAccessReviewSpec,
};
use kube::api::PostParams;
use kube::{Api, Client};
use registration_core::{CoreError, Result};
use std::collections::BTreeMap;
use tracing::{debug, error, info};

/// Verbs needed on one resource
#[derive(Clone, Copy, Debug)]
pub struct RequiredPermission {
    pub group: &'static str,
    pub resource: &'static str,
    pub verbs: &'static [&'static str],
}

impl RequiredPermission {
    /// `group/resource/verb`, group omitted for the core API
    pub fn key(&self, verb: &str) -> String {
        if self.group.is_empty() {
            format!("{}/{}", self.resource, verb)
        } else {
            format!("{}/{}/{}", self.group, self.resource, verb)
        }
    }
}

pub const REQUIRED_PERMISSIONS: &[RequiredPermission] = &[
    RequiredPermission {
        group: "",
        resource: "services",
        verbs: &["get", "list", "watch"],
    },
    RequiredPermission {
        group: "",
        resource: "pods",
        verbs: &["get", "list", "watch"],
    },
];

/// Outcome per permission key
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PermissionCheck {
    pub results: BTreeMap<String, bool>,
}

impl PermissionCheck {
    pub fn record(&mut self, key: String, allowed: bool) {
        self.results.insert(key, allowed);
    }

    pub fn missing(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|(_, allowed)| !**allowed)
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn log(&self) {
        info!("Permission check results:");
        for (key, allowed) in &self.results {
            if *allowed {
                debug!(permission = %key, "Permission granted");
            } else {
                error!(permission = %key, "Permission missing");
            }
        }
        if self.missing().is_empty() {
            info!("All permissions granted");
        }
    }

    /// Err listing every denied key
    pub fn into_result(self) -> Result<()> {
        let missing = self.missing();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(CoreError::MissingPermissions(missing))
        }
    }
}

fn access_review(namespace: Option<&str>, permission: &RequiredPermission, verb: &str) -> SelfSubjectAccessReview {
    SelfSubjectAccessReview {
        spec: SelfSubjectAccessReviewSpec {
            resource_attributes: Some(ResourceAttributes {
                namespace: namespace.map(str::to_string),
                verb: Some(verb.to_string()),
                group: Some(permission.group.to_string()),
                resource: Some(permission.resource.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Ask the API server whether this service account may watch the resources
/// it needs. A failed review counts as denied.
pub async fn check_permissions(client: &Client, namespace: Option<&str>) -> PermissionCheck {
    let reviews: Api<SelfSubjectAccessReview> = Api::all(client.clone());
    let mut check = PermissionCheck::default();

    for permission in REQUIRED_PERMISSIONS {
        for verb in permission.verbs {
            let key = permission.key(verb);
            let review = access_review(namespace, permission, verb);
            let allowed = match reviews.create(&PostParams::default(), &review).await {
                Ok(review) => review.status.map(|status| status.allowed).unwrap_or(false),
                Err(e) => {
                    error!("Failed to check permission {}: {}", key, e);
                    false
                }
            };
            check.record(key, allowed);
        }
    }

    check.log();
    check
}
