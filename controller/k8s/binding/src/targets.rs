//! Desired-target projection.
//!
//! Pure functions from watched cluster state to the set of targets a target
//! group should hold. The reconciler registers the set difference in one
//! direction and deregisters it in the other; everything else is left
//! alone.

use alb_controller_core::{cloud::TargetDescription, Error, Result};
use alb_controller_k8s_api::{
    target_group_binding::TargetGroupBindingSpec, Endpoints, IntOrString, Node, Service,
};
use std::collections::BTreeSet;

const CONTROL_PLANE_LABELS: &[&str] = &[
    "node-role.kubernetes.io/control-plane",
    "node-role.kubernetes.io/master",
];

/// Targets for `targetType: ip`: pod endpoint addresses behind the service,
/// deduplicated by `(ip, port)`. With `fail_open`, not-ready addresses are
/// tolerated so a fully-unready service keeps serving rather than emptying
/// the target group.
pub fn ip_targets(
    spec: &TargetGroupBindingSpec,
    endpoints: &Endpoints,
    fail_open: bool,
) -> BTreeSet<TargetDescription> {
    let mut out = BTreeSet::new();
    for subset in endpoints.subsets.iter().flatten() {
        let Some(port) = endpoint_port(&spec.service_ref.port, subset) else {
            continue;
        };
        let ready = subset.addresses.iter().flatten();
        let not_ready = if fail_open {
            Some(subset.not_ready_addresses.iter().flatten())
        } else {
            None
        };
        for address in ready.chain(not_ready.into_iter().flatten()) {
            out.insert(TargetDescription {
                id: address.ip.clone(),
                port,
            });
        }
    }
    out
}

/// Targets for `targetType: instance`: ready worker nodes matching the
/// binding's node selector, registered by EC2 instance id on the service's
/// node port.
pub fn instance_targets(
    spec: &TargetGroupBindingSpec,
    service: &Service,
    nodes: &[Node],
) -> Result<BTreeSet<TargetDescription>> {
    let node_port = node_port(spec, service)?;

    let mut out = BTreeSet::new();
    for node in nodes {
        if !node_ready(node) || is_control_plane(node) || !selector_matches(spec, node) {
            continue;
        }
        let Some(instance_id) = instance_id(node) else {
            continue;
        };
        out.insert(TargetDescription {
            id: instance_id,
            port: node_port,
        });
    }
    Ok(out)
}

fn endpoint_port(
    service_port: &IntOrString,
    subset: &alb_controller_k8s_api::api::core::v1::EndpointSubset,
) -> Option<u16> {
    let ports = subset.ports.as_deref().unwrap_or_default();
    if let [only] = ports {
        return u16::try_from(only.port).ok();
    }
    ports
        .iter()
        .find(|p| match service_port {
            IntOrString::String(name) => p.name.as_deref() == Some(name),
            IntOrString::Int(number) => p.port == *number,
        })
        .and_then(|p| u16::try_from(p.port).ok())
}

fn node_port(spec: &TargetGroupBindingSpec, service: &Service) -> Result<u16> {
    let ports = service
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_ref())
        .ok_or_else(|| Error::config("service has no ports"))?;
    let port = ports
        .iter()
        .find(|p| match &spec.service_ref.port {
            IntOrString::Int(number) => p.port == *number,
            IntOrString::String(name) => p.name.as_deref() == Some(name),
        })
        .ok_or_else(|| {
            Error::config(format!(
                "service {} has no port matching the binding",
                spec.service_ref.name
            ))
        })?;
    port.node_port
        .and_then(|p| u16::try_from(p).ok())
        .ok_or_else(|| {
            Error::config(format!(
                "service {} port has no node port; instance targets need one",
                spec.service_ref.name
            ))
        })
}

fn node_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}

fn is_control_plane(node: &Node) -> bool {
    let labels = node.metadata.labels.as_ref();
    CONTROL_PLANE_LABELS
        .iter()
        .any(|label| labels.map(|l| l.contains_key(*label)).unwrap_or(false))
}

fn selector_matches(spec: &TargetGroupBindingSpec, node: &Node) -> bool {
    let Some(selector) = &spec.node_selector else {
        return true;
    };
    let Some(labels) = node.metadata.labels.as_ref() else {
        return selector.is_empty();
    };
    selector
        .iter()
        .all(|(key, value)| labels.get(key) == Some(value))
}

/// `aws:///us-west-2a/i-0123456789abcdef0` to `i-0123456789abcdef0`.
fn instance_id(node: &Node) -> Option<String> {
    let provider_id = node.spec.as_ref()?.provider_id.as_ref()?;
    let id = provider_id.rsplit('/').next()?;
    (!id.is_empty()).then(|| id.to_string())
}
