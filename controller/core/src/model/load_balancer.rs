use super::naming;
use crate::{error::Error, stack::StackId, token::StringToken};
use std::{collections::BTreeMap, fmt, str::FromStr};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LoadBalancerType {
    Application,
    Network,
}

impl LoadBalancerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadBalancerType::Application => "application",
            LoadBalancerType::Network => "network",
        }
    }
}

/// Whether the load balancer fronts the public internet. A scheme change is
/// not expressible in-place and forces delete + recreate.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Scheme {
    Internal,
    InternetFacing,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Internal => "internal",
            Scheme::InternetFacing => "internet-facing",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "internal" => Ok(Scheme::Internal),
            "internet-facing" => Ok(Scheme::InternetFacing),
            other => Err(Error::config(format!(
                "invalid scheme {other:?}: must be \"internal\" or \"internet-facing\""
            ))),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IpAddressType {
    Ipv4,
    Dualstack,
    DualstackWithoutPublicIpv4,
}

impl IpAddressType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IpAddressType::Ipv4 => "ipv4",
            IpAddressType::Dualstack => "dualstack",
            IpAddressType::DualstackWithoutPublicIpv4 => "dualstack-without-public-ipv4",
        }
    }
}

impl FromStr for IpAddressType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ipv4" => Ok(IpAddressType::Ipv4),
            "dualstack" => Ok(IpAddressType::Dualstack),
            "dualstack-without-public-ipv4" => Ok(IpAddressType::DualstackWithoutPublicIpv4),
            other => Err(Error::config(format!("invalid ip-address-type {other:?}"))),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubnetMapping {
    pub subnet_id: String,
    /// Elastic IP allocation, referenced never allocated.
    pub allocation_id: Option<String>,
    pub private_ipv4_address: Option<String>,
}

impl SubnetMapping {
    pub fn id(subnet_id: impl Into<String>) -> Self {
        Self {
            subnet_id: subnet_id.into(),
            allocation_id: None,
            private_ipv4_address: None,
        }
    }
}

/// Desired state of a load balancer. Identity is `name`; everything except
/// `scheme` can be reconciled in place.
#[derive(Clone, Debug, PartialEq)]
pub struct LoadBalancerSpec {
    pub name: String,
    pub lb_type: LoadBalancerType,
    pub scheme: Scheme,
    pub ip_address_type: IpAddressType,
    pub subnet_mappings: Vec<SubnetMapping>,
    pub security_groups: Vec<StringToken>,
    pub attributes: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LoadBalancerStatus {
    pub arn: String,
    pub dns_name: String,
    pub canonical_hosted_zone_id: String,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LoadBalancerState {
    Provisioning,
    Active,
    Failed,
}

/// A load balancer as discovered in the cloud.
#[derive(Clone, Debug, PartialEq)]
pub struct ObservedLoadBalancer {
    pub arn: String,
    pub name: String,
    pub lb_type: LoadBalancerType,
    pub scheme: Scheme,
    pub ip_address_type: IpAddressType,
    pub state: LoadBalancerState,
    pub dns_name: String,
    pub canonical_hosted_zone_id: String,
    pub security_groups: Vec<String>,
    pub subnet_mappings: Vec<SubnetMapping>,
    pub attributes: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
}

pub fn needs_replacement(desired: &LoadBalancerSpec, actual: &ObservedLoadBalancer) -> bool {
    desired.scheme != actual.scheme
}

/// `k8s-<ns:8>-<name:8>-<md5:10>`, 32 characters at most. Group stacks have
/// no namespace and spend the width on the group name instead.
pub fn name(cluster: &str, stack: &StackId) -> String {
    let hash = naming::hashed_suffix(&[cluster, &stack.to_string()], 10);
    if stack.namespace.is_empty() {
        format!("k8s-{:.17}-{hash}", naming::sanitize(&stack.name))
    } else {
        format!(
            "k8s-{:.8}-{:.8}-{hash}",
            naming::sanitize(&stack.namespace),
            naming::sanitize(&stack.name),
        )
    }
}
