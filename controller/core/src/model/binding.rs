use super::{
    load_balancer::IpAddressType,
    security_group::SgProtocol,
    target_group::TargetType,
};
use crate::token::StringToken;
use std::collections::BTreeMap;

/// References a service port by number or by name.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum ServicePort {
    Number(u16),
    Name(String),
}

impl std::fmt::Display for ServicePort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServicePort::Number(port) => write!(f, "{port}"),
            ServicePort::Name(name) => f.write_str(name),
        }
    }
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ServiceRef {
    pub name: String,
    pub port: ServicePort,
}

/// Admits data-path traffic from a security group to a port range on the
/// backends.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NetworkingPeer {
    pub security_group: StringToken,
    pub protocol: SgProtocol,
    /// `None` admits every target port.
    pub port: Option<u16>,
}

/// Desired state of the in-cluster TargetGroupBinding object emitted for
/// each target group. The binding reconciler closes the loop between the
/// target group and live endpoints.
#[derive(Clone, Debug, PartialEq)]
pub struct BindingSpec {
    /// Namespace of the backend service; the binding object lives with it.
    pub namespace: String,
    pub target_group_arn: StringToken,
    pub target_type: TargetType,
    pub service: ServiceRef,
    pub networking: Vec<NetworkingPeer>,
    pub node_selector: Option<BTreeMap<String, String>>,
    pub ip_address_type: IpAddressType,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BindingStatus {
    /// Name of the applied cluster object.
    pub name: String,
}
