//! Ownership tags and tag-based discovery.
//!
//! Every cloud resource the controller creates carries a cluster tag, a
//! stack tag, and a resource tag. A resource is *owned* iff the tag filter
//! for the current cluster matches and the stack+resource tags map to an
//! object under reconciliation; unowned resources are never modified.

use crate::{
    error::{Error, Result},
    stack::StackId,
};
use std::collections::{BTreeMap, BTreeSet};

pub const CLUSTER_TAG_KEY: &str = "elbv2.k8s.aws/cluster";
pub const INGRESS_STACK_TAG_KEY: &str = "ingress.k8s.aws/stack";
pub const SERVICE_STACK_TAG_KEY: &str = "service.k8s.aws/stack";
pub const RESOURCE_TAG_KEY: &str = "ingress.k8s.aws/resource";

/// The pre-rename cluster key. Discovery honors it so an upgraded controller
/// adopts resources written by older releases; writes use the current keys.
pub const LEGACY_CLUSTER_TAG_KEY: &str = "ingress.k8s.aws/cluster";
const LEGACY_NAMESPACE_TAG_KEY: &str = "kubernetes.io/namespace";
const LEGACY_INGRESS_NAME_TAG_KEY: &str = "kubernetes.io/ingress-name";

const RESERVED_EXACT: &[&str] = &[
    CLUSTER_TAG_KEY,
    INGRESS_STACK_TAG_KEY,
    SERVICE_STACK_TAG_KEY,
    RESOURCE_TAG_KEY,
    LEGACY_CLUSTER_TAG_KEY,
    LEGACY_NAMESPACE_TAG_KEY,
    LEGACY_INGRESS_NAME_TAG_KEY,
    "kubernetes.io/cluster-name",
    "kubernetes.io/service-name",
    "kubernetes.io/service-port",
];

/// Tag keys this controller will never write, and rejects from user input.
pub fn is_reserved_key(key: &str) -> bool {
    RESERVED_EXACT.contains(&key) || key.starts_with("kubernetes.io/cluster/")
}

/// A discovery filter: key to allowed values. A tag set matches iff every
/// key is present and, for non-empty value lists, some listed value matches.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TagFilter(BTreeMap<String, Vec<String>>);

impl TagFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, values: Vec<String>) -> Self {
        self.0.insert(key.into(), values);
        self
    }

    pub fn matches(&self, tags: &BTreeMap<String, String>) -> bool {
        self.0.iter().all(|(key, values)| match tags.get(key) {
            Some(value) => values.is_empty() || values.contains(value),
            None => false,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }
}

/// Computes the controller's tracking tags and discovery filters.
#[derive(Clone, Debug)]
pub struct TagProvider {
    cluster: String,
    default_tags: BTreeMap<String, String>,
    external_managed: BTreeSet<String>,
}

impl TagProvider {
    /// Validates user-supplied tag configuration up front: `default_tags`
    /// and `external_managed` keys must not collide with tracking tags nor
    /// overlap each other. Both collisions are fatal configuration errors.
    pub fn new(
        cluster: impl Into<String>,
        default_tags: BTreeMap<String, String>,
        external_managed: BTreeSet<String>,
    ) -> Result<Self> {
        for key in default_tags.keys() {
            if is_reserved_key(key) {
                return Err(Error::config(format!(
                    "default tag key {key:?} collides with a controller tracking tag"
                )));
            }
            if external_managed.contains(key) {
                return Err(Error::config(format!(
                    "tag key {key:?} appears in both default tags and externally managed tags"
                )));
            }
        }
        for key in &external_managed {
            if is_reserved_key(key) {
                return Err(Error::config(format!(
                    "externally managed tag key {key:?} collides with a controller tracking tag"
                )));
            }
        }
        Ok(Self {
            cluster: cluster.into(),
            default_tags,
            external_managed,
        })
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Keys this controller must not write or remove; their values belong to
    /// an external system.
    pub fn external_managed(&self) -> &BTreeSet<String> {
        &self.external_managed
    }

    pub fn stack_tags(&self, stack: &StackId) -> BTreeMap<String, String> {
        BTreeMap::from([
            (CLUSTER_TAG_KEY.to_string(), self.cluster.clone()),
            (INGRESS_STACK_TAG_KEY.to_string(), stack.to_string()),
        ])
    }

    /// The older key naming, preserved for seamless upgrade. Discovery
    /// queries both filters; writes use [`TagProvider::stack_tags`] only.
    pub fn stack_tags_legacy(&self, stack: &StackId) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LEGACY_CLUSTER_TAG_KEY.to_string(), self.cluster.clone()),
            (LEGACY_NAMESPACE_TAG_KEY.to_string(), stack.namespace.clone()),
            (LEGACY_INGRESS_NAME_TAG_KEY.to_string(), stack.name.clone()),
        ])
    }

    /// Tag keys that must never be removed from cloud resources, so a
    /// downgraded controller can still discover them.
    pub fn legacy_tag_keys(&self) -> Vec<String> {
        vec![
            LEGACY_CLUSTER_TAG_KEY.to_string(),
            LEGACY_NAMESPACE_TAG_KEY.to_string(),
            LEGACY_INGRESS_NAME_TAG_KEY.to_string(),
        ]
    }

    pub fn cluster_filter(&self) -> TagFilter {
        TagFilter::new().with(CLUSTER_TAG_KEY, vec![self.cluster.clone()])
    }

    pub fn stack_filter(&self, stack: &StackId) -> TagFilter {
        TagFilter::new()
            .with(CLUSTER_TAG_KEY, vec![self.cluster.clone()])
            .with(INGRESS_STACK_TAG_KEY, vec![stack.to_string()])
    }

    pub fn stack_filter_legacy(&self, stack: &StackId) -> TagFilter {
        TagFilter::new()
            .with(LEGACY_CLUSTER_TAG_KEY, vec![self.cluster.clone()])
            .with(LEGACY_NAMESPACE_TAG_KEY, vec![stack.namespace.clone()])
            .with(LEGACY_INGRESS_NAME_TAG_KEY, vec![stack.name.clone()])
    }

    /// Full tag set for one resource: defaults first, then user extras, then
    /// tracking tags, so user tags lose on key conflict with tracking tags.
    pub fn resource_tags(
        &self,
        stack: &StackId,
        resource: &str,
        extra: &BTreeMap<String, String>,
    ) -> BTreeMap<String, String> {
        let mut tags = self.default_tags.clone();
        for (key, value) in extra {
            if !self.external_managed.contains(key) {
                tags.insert(key.clone(), value.clone());
            }
        }
        tags.extend(self.stack_tags(stack));
        tags.insert(RESOURCE_TAG_KEY.to_string(), resource.to_string());
        tags
    }

    /// The `resource-id` tag value recorded on an actual cloud object, if
    /// any.
    pub fn resource_id_of(tags: &BTreeMap<String, String>) -> Option<&str> {
        tags.get(RESOURCE_TAG_KEY).map(String::as_str)
    }
}
