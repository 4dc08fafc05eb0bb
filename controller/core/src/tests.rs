mod diff;
mod tags;

use crate::{
    model::{
        listener::{Action, ListenerSpec},
        load_balancer::{IpAddressType, LoadBalancerSpec, LoadBalancerType, Scheme, SubnetMapping},
        target_group::{HealthCheck, Protocol, TargetGroupSpec, TargetType},
    },
    ResourceId, ResourceKind, StringToken,
};
use std::collections::BTreeMap;

pub(crate) fn load_balancer_spec(name: &str) -> LoadBalancerSpec {
    LoadBalancerSpec {
        name: name.to_string(),
        lb_type: LoadBalancerType::Application,
        scheme: Scheme::Internal,
        ip_address_type: IpAddressType::Ipv4,
        subnet_mappings: vec![
            SubnetMapping::id("subnet-0a"),
            SubnetMapping::id("subnet-0b"),
        ],
        security_groups: Vec::new(),
        attributes: BTreeMap::new(),
        tags: BTreeMap::new(),
    }
}

pub(crate) fn target_group_spec(name: &str, port: u16) -> TargetGroupSpec {
    TargetGroupSpec {
        name: name.to_string(),
        protocol: Protocol::Http,
        port,
        protocol_version: None,
        target_type: TargetType::Ip,
        health_check: HealthCheck::default(),
        matcher: None,
        attributes: BTreeMap::new(),
        tags: BTreeMap::new(),
    }
}

pub(crate) fn listener_spec(lb: &ResourceId, tg: &ResourceId, port: u16) -> ListenerSpec {
    ListenerSpec {
        load_balancer_arn: StringToken::reference(lb.clone(), crate::StatusField::Arn),
        port,
        protocol: Protocol::Http,
        default_actions: vec![Action::forward_to(StringToken::reference(
            tg.clone(),
            crate::StatusField::Arn,
        ))],
        certificates: Vec::new(),
        ssl_policy: None,
        alpn_policy: None,
        tags: BTreeMap::new(),
    }
}

pub(crate) fn tg_id(name: &str) -> ResourceId {
    ResourceId::new(ResourceKind::TargetGroup, name)
}
