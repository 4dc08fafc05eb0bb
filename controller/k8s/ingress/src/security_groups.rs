//! Security group derivation.
//!
//! With user-supplied groups the controller only references them; their
//! lifecycle and rules stay untouched. Otherwise it manages a frontend group
//! whose ingress mirrors the listener port set, plus (when enabled) a shared
//! backend group that the data path and the TargetGroupBinding networking
//! rules hang off.

use crate::{annotations::ListenPort, builder::{BuildContext, BuildDefaults}};
use alb_controller_core::{
    model::{
        binding::NetworkingPeer,
        load_balancer::IpAddressType,
        security_group::{IngressRule, IngressSource, SecurityGroupSpec, SgProtocol},
    },
    ResourceSpec, Result, Stack, StackId, StatusField, StringToken,
};
use std::collections::BTreeMap;

pub const FRONTEND_SG_ID: &str = "ManagedLBSecurityGroup";
pub const BACKEND_SG_ID: &str = "BackendSecurityGroup";

/// What the rest of the build needs to know about security groups.
pub struct SgOutcome {
    /// Groups to attach to the load balancer, literal for referenced groups
    /// and tokens for managed ones.
    pub load_balancer_groups: Vec<StringToken>,
    backend_group: Option<StringToken>,
}

impl SgOutcome {
    /// Networking peers for a TargetGroupBinding: admit the backend group
    /// into the target port (or all ports when restricted rules are
    /// disabled). Referenced-group mode leaves data-path access to the user.
    pub fn backend_peer(&self, defaults: &BuildDefaults, port: u16) -> Vec<NetworkingPeer> {
        match &self.backend_group {
            Some(group) => vec![NetworkingPeer {
                security_group: group.clone(),
                protocol: SgProtocol::Tcp,
                port: (!defaults.disable_restricted_sg_rules).then_some(port),
            }],
            None => Vec::new(),
        }
    }
}

pub fn referenced(groups: Vec<String>) -> SgOutcome {
    SgOutcome {
        load_balancer_groups: groups.into_iter().map(StringToken::Literal).collect(),
        backend_group: None,
    }
}

pub fn build_managed(
    stack: &mut Stack,
    ctx: &BuildContext<'_>,
    stack_id: &StackId,
    listen_ports: &[ListenPort],
    ip_address_type: IpAddressType,
    group_tags: &BTreeMap<String, String>,
) -> Result<SgOutcome> {
    let dualstack = ip_address_type != IpAddressType::Ipv4;
    let mut ingress_rules = Vec::new();
    for lp in listen_ports {
        ingress_rules.push(world_open(lp.port, "0.0.0.0/0"));
        if dualstack {
            ingress_rules.push(world_open(lp.port, "::/0"));
        }
    }

    let frontend = stack.add(
        FRONTEND_SG_ID,
        ResourceSpec::SecurityGroup(SecurityGroupSpec {
            name: alb_controller_core::model::load_balancer::name(ctx.cluster, stack_id),
            description: format!("managed LoadBalancer securityGroup by ALB controller for {stack_id}"),
            vpc_id: ctx.vpc_id.clone(),
            ingress_rules,
            tags: ctx
                .tags
                .resource_tags(stack_id, FRONTEND_SG_ID, group_tags),
        }),
    )?;
    let frontend_token = StringToken::reference(frontend, StatusField::GroupId);

    let mut load_balancer_groups = vec![frontend_token.clone()];
    let mut backend_group = None;
    if ctx.defaults.enable_backend_sg {
        let backend = stack.add(
            BACKEND_SG_ID,
            ResourceSpec::SecurityGroup(SecurityGroupSpec {
                name: format!("k8s-traffic-{}", ctx.cluster),
                description: format!("shared backend securityGroup for cluster {}", ctx.cluster),
                vpc_id: ctx.vpc_id.clone(),
                // Traffic into the backends originates from the load
                // balancer; the group itself stays rule-free and is granted
                // per target group through the binding networking.
                ingress_rules: Vec::new(),
                tags: ctx.tags.resource_tags(stack_id, BACKEND_SG_ID, group_tags),
            }),
        )?;
        let backend_token = StringToken::reference(backend, StatusField::GroupId);
        load_balancer_groups.push(backend_token.clone());
        backend_group = Some(backend_token);
    }

    Ok(SgOutcome {
        load_balancer_groups,
        backend_group,
    })
}

fn world_open(port: u16, cidr: &str) -> IngressRule {
    IngressRule {
        protocol: SgProtocol::Tcp,
        from_port: port,
        to_port: port,
        source: IngressSource::Cidr(cidr.parse().expect("static CIDR literal")),
        description: None,
    }
}
