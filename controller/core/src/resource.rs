use crate::model::{
    binding::{BindingSpec, BindingStatus},
    certificate::{CertificateSpec, CertificateStatus},
    listener::{ListenerSpec, ListenerStatus, RuleSpec, RuleStatus},
    load_balancer::{LoadBalancerSpec, LoadBalancerStatus},
    security_group::{SecurityGroupSpec, SecurityGroupStatus},
    target_group::{TargetGroupSpec, TargetGroupStatus},
};
use std::fmt;

/// The kinds of resources a stack can hold. The discriminant order follows
/// the dependency order between kinds and is what deterministic traversals
/// sort by.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ResourceKind {
    SecurityGroup,
    Certificate,
    TargetGroup,
    LoadBalancer,
    Listener,
    ListenerRule,
    TargetGroupBinding,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::SecurityGroup => "SecurityGroup",
            ResourceKind::Certificate => "Certificate",
            ResourceKind::TargetGroup => "TargetGroup",
            ResourceKind::LoadBalancer => "LoadBalancer",
            ResourceKind::Listener => "Listener",
            ResourceKind::ListenerRule => "ListenerRule",
            ResourceKind::TargetGroupBinding => "TargetGroupBinding",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a resource within a stack. The `name` is the stable logical id
/// stamped on the cloud object as the resource tag, enabling ownership
/// discovery across reconciles.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ResourceId {
    pub kind: ResourceKind,
    pub name: String,
}

impl ResourceId {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Desired state for a single resource. Specs may contain unresolved
/// [`crate::StringToken`]s.
#[derive(Clone, Debug, PartialEq)]
pub enum ResourceSpec {
    LoadBalancer(LoadBalancerSpec),
    TargetGroup(TargetGroupSpec),
    Listener(ListenerSpec),
    ListenerRule(RuleSpec),
    Certificate(CertificateSpec),
    SecurityGroup(SecurityGroupSpec),
    TargetGroupBinding(BindingSpec),
}

impl ResourceSpec {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceSpec::LoadBalancer(_) => ResourceKind::LoadBalancer,
            ResourceSpec::TargetGroup(_) => ResourceKind::TargetGroup,
            ResourceSpec::Listener(_) => ResourceKind::Listener,
            ResourceSpec::ListenerRule(_) => ResourceKind::ListenerRule,
            ResourceSpec::Certificate(_) => ResourceKind::Certificate,
            ResourceSpec::SecurityGroup(_) => ResourceKind::SecurityGroup,
            ResourceSpec::TargetGroupBinding(_) => ResourceKind::TargetGroupBinding,
        }
    }

    /// Resources this spec reads tokens from. Adding a spec to a stack
    /// records one dependency edge per referent.
    pub fn token_refs(&self) -> Vec<ResourceId> {
        let mut refs = Vec::new();
        match self {
            ResourceSpec::LoadBalancer(lb) => {
                refs.extend(lb.security_groups.iter().filter_map(|t| t.referent()).cloned());
            }
            ResourceSpec::TargetGroup(_) | ResourceSpec::Certificate(_) => {}
            ResourceSpec::Listener(listener) => {
                refs.extend(listener.load_balancer_arn.referent().cloned());
                refs.extend(
                    listener
                        .certificates
                        .iter()
                        .filter_map(|t| t.referent())
                        .cloned(),
                );
                for action in &listener.default_actions {
                    refs.extend(action.token_refs());
                }
            }
            ResourceSpec::ListenerRule(rule) => {
                refs.extend(rule.listener_arn.referent().cloned());
                for action in &rule.actions {
                    refs.extend(action.token_refs());
                }
            }
            ResourceSpec::SecurityGroup(sg) => {
                for rule in &sg.ingress_rules {
                    refs.extend(rule.token_refs());
                }
            }
            ResourceSpec::TargetGroupBinding(binding) => {
                refs.extend(binding.target_group_arn.referent().cloned());
                for peer in &binding.networking {
                    refs.extend(peer.security_group.referent().cloned());
                }
            }
        }
        refs.sort();
        refs.dedup();
        refs
    }
}

/// Observed state recorded after a successful cloud operation. Token
/// resolution reads these fields.
#[derive(Clone, Debug, PartialEq)]
pub enum ResourceStatus {
    LoadBalancer(LoadBalancerStatus),
    TargetGroup(TargetGroupStatus),
    Listener(ListenerStatus),
    ListenerRule(RuleStatus),
    Certificate(CertificateStatus),
    SecurityGroup(SecurityGroupStatus),
    TargetGroupBinding(BindingStatus),
}

impl ResourceStatus {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceStatus::LoadBalancer(_) => ResourceKind::LoadBalancer,
            ResourceStatus::TargetGroup(_) => ResourceKind::TargetGroup,
            ResourceStatus::Listener(_) => ResourceKind::Listener,
            ResourceStatus::ListenerRule(_) => ResourceKind::ListenerRule,
            ResourceStatus::Certificate(_) => ResourceKind::Certificate,
            ResourceStatus::SecurityGroup(_) => ResourceKind::SecurityGroup,
            ResourceStatus::TargetGroupBinding(_) => ResourceKind::TargetGroupBinding,
        }
    }

    pub fn field(&self, field: StatusField) -> Option<&str> {
        match (self, field) {
            (ResourceStatus::LoadBalancer(lb), StatusField::Arn) => Some(&lb.arn),
            (ResourceStatus::LoadBalancer(lb), StatusField::DnsName) => Some(&lb.dns_name),
            (ResourceStatus::LoadBalancer(lb), StatusField::CanonicalHostedZoneId) => {
                Some(&lb.canonical_hosted_zone_id)
            }
            (ResourceStatus::TargetGroup(tg), StatusField::Arn) => Some(&tg.arn),
            (ResourceStatus::Listener(l), StatusField::Arn) => Some(&l.arn),
            (ResourceStatus::ListenerRule(r), StatusField::Arn) => Some(&r.arn),
            (ResourceStatus::Certificate(c), StatusField::Arn) => Some(&c.arn),
            (ResourceStatus::SecurityGroup(sg), StatusField::GroupId) => Some(&sg.group_id),
            _ => None,
        }
    }
}

/// A field path into a resource's status, used by token references.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum StatusField {
    Arn,
    DnsName,
    CanonicalHostedZoneId,
    GroupId,
}

impl StatusField {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusField::Arn => "arn",
            StatusField::DnsName => "dnsName",
            StatusField::CanonicalHostedZoneId => "canonicalHostedZoneID",
            StatusField::GroupId => "groupID",
        }
    }
}

impl fmt::Display for StatusField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
