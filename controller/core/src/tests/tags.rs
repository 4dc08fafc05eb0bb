use crate::{
    tags::{self, TagFilter, TagProvider},
    Error, StackId,
};
use maplit::btreemap;
use std::collections::BTreeSet;

fn provider() -> TagProvider {
    TagProvider::new("prod", Default::default(), Default::default()).unwrap()
}

#[test]
fn filter_requires_every_key() {
    let filter = TagFilter::new()
        .with(tags::CLUSTER_TAG_KEY, vec!["prod".to_string()])
        .with(tags::INGRESS_STACK_TAG_KEY, vec!["default/app".to_string()]);

    assert!(filter.matches(&btreemap! {
        tags::CLUSTER_TAG_KEY.to_string() => "prod".to_string(),
        tags::INGRESS_STACK_TAG_KEY.to_string() => "default/app".to_string(),
        "extra".to_string() => "ignored".to_string(),
    }));
    assert!(!filter.matches(&btreemap! {
        tags::CLUSTER_TAG_KEY.to_string() => "prod".to_string(),
    }));
    assert!(!filter.matches(&btreemap! {
        tags::CLUSTER_TAG_KEY.to_string() => "other".to_string(),
        tags::INGRESS_STACK_TAG_KEY.to_string() => "default/app".to_string(),
    }));
}

#[test]
fn empty_value_list_matches_any_value() {
    let filter = TagFilter::new().with(tags::CLUSTER_TAG_KEY, Vec::new());
    assert!(filter.matches(&btreemap! {
        tags::CLUSTER_TAG_KEY.to_string() => "anything".to_string(),
    }));
    assert!(!filter.matches(&Default::default()));
}

#[test]
fn default_tag_colliding_with_tracking_tag_is_fatal() {
    let err = TagProvider::new(
        "prod",
        btreemap! { tags::CLUSTER_TAG_KEY.to_string() => "evil".to_string() },
        Default::default(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::Config(_)), "{err}");
}

#[test]
fn external_managed_overlapping_default_tags_is_fatal() {
    let err = TagProvider::new(
        "prod",
        btreemap! { "team".to_string() => "a".to_string() },
        BTreeSet::from(["team".to_string()]),
    )
    .unwrap_err();
    assert!(matches!(err, Error::Config(_)), "{err}");
}

#[test]
fn reserved_keys_cover_cluster_prefix() {
    assert!(tags::is_reserved_key("kubernetes.io/cluster/prod"));
    assert!(tags::is_reserved_key(tags::RESOURCE_TAG_KEY));
    assert!(!tags::is_reserved_key("team"));
}

#[test]
fn user_extras_lose_to_tracking_tags() {
    let provider = provider();
    let stack = StackId::new("default", "app");
    let tags_out = provider.resource_tags(
        &stack,
        "LoadBalancer",
        &btreemap! {
            tags::RESOURCE_TAG_KEY.to_string() => "spoof".to_string(),
            "team".to_string() => "a".to_string(),
        },
    );
    assert_eq!(tags_out[tags::RESOURCE_TAG_KEY], "LoadBalancer");
    assert_eq!(tags_out[tags::CLUSTER_TAG_KEY], "prod");
    assert_eq!(tags_out[tags::INGRESS_STACK_TAG_KEY], "default/app");
    assert_eq!(tags_out["team"], "a");
}

#[test]
fn externally_managed_keys_are_never_written() {
    let provider = TagProvider::new(
        "prod",
        Default::default(),
        BTreeSet::from(["billing".to_string()]),
    )
    .unwrap();
    let tags_out = provider.resource_tags(
        &StackId::new("default", "app"),
        "LoadBalancer",
        &btreemap! { "billing".to_string() => "override".to_string() },
    );
    assert!(!tags_out.contains_key("billing"));
}

#[test]
fn legacy_filter_uses_old_key_naming() {
    let provider = provider();
    let stack = StackId::new("default", "app");
    let legacy = provider.stack_tags_legacy(&stack);
    assert_eq!(legacy[tags::LEGACY_CLUSTER_TAG_KEY], "prod");
    assert_eq!(legacy["kubernetes.io/namespace"], "default");
    assert_eq!(legacy["kubernetes.io/ingress-name"], "app");

    // Writes never include legacy keys.
    let current = provider.resource_tags(&stack, "LoadBalancer", &Default::default());
    assert!(!current.contains_key("kubernetes.io/namespace"));
    assert!(provider.stack_filter_legacy(&stack).matches(&legacy));
}
