//! Builds the desired resource stack for one logical group.
//!
//! The builder is pure: it consumes parsed members, a service snapshot, and
//! pre-resolved subnets, and emits a [`Stack`] whose cross-resource fields
//! are tokens. Anything that needs the cloud (discovery, ARNs) happens later
//! in the deployer.

use crate::{
    annotations::ListenPort,
    certificates, rules, security_groups,
    group::{GroupKey, IngressGroupMember, ServiceBackendRef},
};
use ahash::AHashMap as HashMap;
use alb_controller_core::{
    model::{
        binding::{BindingSpec, ServicePort, ServiceRef},
        listener::{Action, FixedResponseConfig, ListenerSpec},
        load_balancer::{
            self, IpAddressType, LoadBalancerSpec, LoadBalancerType, Scheme, SubnetMapping,
        },
        target_group::{
            self, HealthCheck, HealthCheckPort, Matcher, Protocol, TargetGroupSpec, TargetType,
        },
    },
    tags::TagProvider,
    Error, ResourceSpec, Result, Stack, StatusField, StringToken,
};
use alb_controller_k8s_api::target_group_configuration::TargetGroupConfigurationSpec;
use std::collections::BTreeMap;

pub use crate::group::{ServicePortSummary, ServiceSummary};

/// Cluster-level defaults from the command line.
#[derive(Clone, Debug)]
pub struct BuildDefaults {
    pub target_type: TargetType,
    pub scheme: Scheme,
    pub ip_address_type: IpAddressType,
    pub ssl_policy: String,
    pub enable_backend_sg: bool,
    pub disable_restricted_sg_rules: bool,
    pub listener_rules_tagging: bool,
}

pub struct BuildContext<'a> {
    pub cluster: &'a str,
    pub tags: &'a TagProvider,
    pub vpc_id: String,
    /// Subnet mappings resolved from the subnets annotation (or discovery)
    /// before the build.
    pub subnets: Vec<SubnetMapping>,
    pub services: &'a HashMap<(String, String), ServiceSummary>,
    /// TargetGroupConfigurations keyed `(namespace, service name)`.
    pub target_group_configs: &'a HashMap<(String, String), TargetGroupConfigurationSpec>,
    pub defaults: &'a BuildDefaults,
}

/// The logical id of the group's single load balancer resource.
pub const LOAD_BALANCER_ID: &str = "LoadBalancer";

pub fn build_stack(
    ctx: &BuildContext<'_>,
    key: &GroupKey,
    members: &[IngressGroupMember],
) -> Result<Stack> {
    let stack_id = key.stack_id();
    let mut stack = Stack::new(stack_id.clone());

    let live: Vec<&IngressGroupMember> = members.iter().filter(|m| !m.deleting).collect();
    // All members deleted (or none left): an empty stack tears everything
    // down.
    if live.is_empty() {
        return Ok(stack);
    }

    let scheme = merged(&live, "scheme", |m| m.annotations.scheme)?.unwrap_or(ctx.defaults.scheme);
    let ip_address_type = merged(&live, "ip-address-type", |m| m.annotations.ip_address_type)?
        .unwrap_or(ctx.defaults.ip_address_type);
    let group_tags = merged_tags(&live)?;

    let explicit_certificates = certificates::explicit_arns(&live);
    let tls_hosts = certificates::tls_hosts(&live);
    let listen_ports = listen_ports(&live, !explicit_certificates.is_empty() || !tls_hosts.is_empty())?;

    // Security groups: user-supplied groups are referenced untouched;
    // otherwise a managed frontend group (and optionally the shared backend
    // group) joins the stack.
    let user_security_groups = merged(&live, "security-groups", |m| {
        m.annotations.security_groups.clone()
    })?;
    let sg_outcome = match user_security_groups {
        Some(groups) => security_groups::referenced(groups),
        None => security_groups::build_managed(
            &mut stack,
            ctx,
            &stack_id,
            &listen_ports,
            ip_address_type,
            &group_tags,
        )?,
    };

    // Certificates: explicit ARNs win; otherwise one Amazon-issued
    // certificate resource per TLS host.
    let certificate_tokens = if explicit_certificates.is_empty() {
        certificates::build_issued(&mut stack, ctx, &stack_id, &tls_hosts, &group_tags)?
    } else {
        explicit_certificates
            .into_iter()
            .map(StringToken::Literal)
            .collect()
    };

    // Target groups, one per distinct backend.
    let mut target_groups: HashMap<(String, String, ServicePort), StringToken> = HashMap::new();
    let mut binding_inputs = Vec::new();
    for member in &live {
        for backend in member_backends(member) {
            let key = (
                member.namespace.clone(),
                backend.name.clone(),
                backend.port.clone(),
            );
            if target_groups.contains_key(&key) {
                continue;
            }
            let (token, binding) =
                build_target_group(&mut stack, ctx, &stack_id, member, &backend, &group_tags)?;
            target_groups.insert(key, token);
            binding_inputs.push(binding);
        }
    }

    // The load balancer itself.
    let lb_id = stack.add(
        LOAD_BALANCER_ID,
        ResourceSpec::LoadBalancer(LoadBalancerSpec {
            name: load_balancer::name(ctx.cluster, &stack_id),
            lb_type: LoadBalancerType::Application,
            scheme,
            ip_address_type,
            subnet_mappings: ctx.subnets.clone(),
            security_groups: sg_outcome.load_balancer_groups.clone(),
            attributes: merged_attributes(&live)?,
            tags: ctx
                .tags
                .resource_tags(&stack_id, LOAD_BALANCER_ID, &group_tags),
        }),
    )?;

    // Listeners: one per configured port, all sharing the default action.
    // A per-port override from a LoadBalancerConfiguration settles that
    // port's SSL policy, default certificate, and ALPN policy; every other
    // port keeps the group-level values.
    let default_action = default_action(&live, &target_groups)?;
    let group_ssl_policy = merged(&live, "ssl-policy", |m| m.annotations.ssl_policy.clone())?
        .unwrap_or_else(|| ctx.defaults.ssl_policy.clone());
    let mut listener_ids = Vec::new();
    for lp in &listen_ports {
        let listener_override = merged(&live, "listener configuration", |m| {
            m.annotations.listener_overrides.get(&lp.port).cloned()
        })?;
        if let Some(configured) = &listener_override {
            if configured.protocol != lp.protocol {
                return Err(Error::config(format!(
                    "listener configuration for port {} is {} but the listener is {}",
                    lp.port, configured.protocol, lp.protocol
                )));
            }
        }

        let mut certificates = if lp.protocol == Protocol::Https {
            certificate_tokens.clone()
        } else {
            Vec::new()
        };
        if lp.protocol == Protocol::Https {
            if let Some(default_certificate) = listener_override
                .as_ref()
                .and_then(|o| o.default_certificate.clone())
            {
                // The configured default leads this port's certificate list.
                let token = StringToken::Literal(default_certificate);
                certificates.retain(|existing| *existing != token);
                certificates.insert(0, token);
            }
        }
        if lp.protocol == Protocol::Https && certificates.is_empty() {
            return Err(Error::config(format!(
                "the HTTPS listener on port {} requires certificate-arn, a configured default \
                 certificate, or a TLS host to issue for",
                lp.port
            )));
        }

        let ssl_policy = listener_override
            .as_ref()
            .and_then(|o| o.ssl_policy.clone())
            .unwrap_or_else(|| group_ssl_policy.clone());
        let listener_id = stack.add(
            lp.port.to_string(),
            ResourceSpec::Listener(ListenerSpec {
                load_balancer_arn: StringToken::reference(lb_id.clone(), StatusField::Arn),
                port: lp.port,
                protocol: lp.protocol,
                default_actions: vec![default_action.clone()],
                certificates,
                ssl_policy: (lp.protocol == Protocol::Https).then_some(ssl_policy),
                alpn_policy: listener_override.and_then(|o| o.alpn_policy),
                tags: ctx
                    .tags
                    .resource_tags(&stack_id, &lp.port.to_string(), &group_tags),
            }),
        )?;
        listener_ids.push(listener_id);
    }

    // Path rules, dense priorities from 1 per listener.
    rules::build_rules(
        &mut stack,
        ctx,
        &stack_id,
        &live,
        &listener_ids,
        &target_groups,
        &group_tags,
    )?;

    // TargetGroupBindings close the loop to live endpoints.
    for binding in binding_inputs {
        let networking = sg_outcome.backend_peer(ctx.defaults, binding.port);
        stack.add(
            binding.id.clone(),
            ResourceSpec::TargetGroupBinding(BindingSpec {
                namespace: binding.namespace.clone(),
                target_group_arn: binding.token,
                target_type: binding.target_type,
                service: binding.service,
                networking,
                node_selector: None,
                ip_address_type,
            }),
        )?;
    }

    Ok(stack)
}

/// Backends referenced by a member, default backend first.
fn member_backends(member: &IngressGroupMember) -> Vec<ServiceBackendRef> {
    member
        .default_backend
        .iter()
        .cloned()
        .chain(
            member
                .rules
                .iter()
                .flat_map(|rule| rule.paths.iter().map(|p| p.backend.clone())),
        )
        .collect()
}

pub(crate) struct BindingInput {
    pub id: String,
    pub namespace: String,
    pub token: StringToken,
    pub target_type: TargetType,
    pub service: ServiceRef,
    pub port: u16,
}

fn build_target_group(
    stack: &mut Stack,
    ctx: &BuildContext<'_>,
    stack_id: &alb_controller_core::StackId,
    member: &IngressGroupMember,
    backend: &ServiceBackendRef,
    group_tags: &BTreeMap<String, String>,
) -> Result<(StringToken, BindingInput)> {
    let service = ctx
        .services
        .get(&(member.namespace.clone(), backend.name.clone()))
        .ok_or_else(|| {
            Error::config(format!(
                "backend service {}/{} does not exist",
                member.namespace, backend.name
            ))
        })?;
    let port = resolve_port(service, backend, &member.namespace)?;
    let config = ctx
        .target_group_configs
        .get(&(member.namespace.clone(), backend.name.clone()));

    let target_type = match config.and_then(|c| c.target_type.as_deref()) {
        Some(explicit) => explicit.parse()?,
        None => member
            .annotations
            .target_type
            .unwrap_or(ctx.defaults.target_type),
    };
    let tg_port = match target_type {
        TargetType::Instance => port.node_port.ok_or_else(|| {
            Error::config(format!(
                "service {}/{} port {} has no node port; instance targets need one",
                member.namespace, backend.name, backend.port
            ))
        })?,
        TargetType::Ip => port.port,
    };

    let protocol = member.annotations.backend_protocol.unwrap_or(Protocol::Http);
    let name = target_group::name(
        ctx.cluster,
        stack_id,
        &backend.name,
        &backend.port.to_string(),
        tg_port,
        protocol,
    );
    let logical_id = format!("{}/{}:{}", member.namespace, backend.name, backend.port);

    // The per-service configuration object wins over annotations for the
    // fields it sets.
    let annotations = &member.annotations;
    let configured = config.and_then(|c| c.health_check.as_ref());
    let health_check_protocol = match configured.and_then(|h| h.protocol.as_deref()) {
        Some(explicit) => explicit.parse()?,
        None => annotations.healthcheck_protocol.unwrap_or(protocol),
    };
    let health_check_path = configured
        .and_then(|h| h.path.clone())
        .or_else(|| annotations.healthcheck_path.clone())
        .unwrap_or_else(|| "/".to_string());
    let health_check_port = configured
        .and_then(|h| h.port.clone())
        .or_else(|| annotations.healthcheck_port.clone());
    let health_check = HealthCheck {
        protocol: health_check_protocol,
        path: Some(health_check_path),
        port: match health_check_port.as_deref() {
            None | Some("traffic-port") => HealthCheckPort::TrafficPort,
            Some(port) => HealthCheckPort::Number(port.parse().map_err(|_| {
                Error::config(format!("invalid healthcheck-port {port:?}"))
            })?),
        },
        interval_seconds: configured
            .and_then(|h| h.interval_seconds)
            .or(annotations.healthcheck_interval_seconds)
            .unwrap_or(15),
        timeout_seconds: configured
            .and_then(|h| h.timeout_seconds)
            .or(annotations.healthcheck_timeout_seconds)
            .unwrap_or(5),
        healthy_threshold: configured
            .and_then(|h| h.healthy_threshold_count)
            .or(annotations.healthy_threshold_count)
            .unwrap_or(2),
        unhealthy_threshold: configured
            .and_then(|h| h.unhealthy_threshold_count)
            .or(annotations.unhealthy_threshold_count)
            .unwrap_or(2),
    };
    let success_codes = configured
        .and_then(|h| h.success_codes.clone())
        .or_else(|| annotations.success_codes.clone());

    let mut attributes = annotations.target_group_attributes.clone();
    for attribute in config
        .and_then(|c| c.target_group_attributes.as_ref())
        .into_iter()
        .flatten()
    {
        attributes.insert(attribute.key.clone(), attribute.value.clone());
    }

    let tg_id = stack.add(
        logical_id.clone(),
        ResourceSpec::TargetGroup(TargetGroupSpec {
            name,
            protocol,
            port: tg_port,
            protocol_version: None,
            target_type,
            health_check,
            matcher: success_codes.map(|http_code| Matcher { http_code }),
            attributes,
            tags: ctx.tags.resource_tags(stack_id, &logical_id, group_tags),
        }),
    )?;
    let token = StringToken::reference(tg_id, StatusField::Arn);

    Ok((
        token.clone(),
        BindingInput {
            id: logical_id,
            namespace: member.namespace.clone(),
            token,
            target_type,
            service: ServiceRef {
                name: backend.name.clone(),
                port: backend.port.clone(),
            },
            port: tg_port,
        },
    ))
}

fn resolve_port<'s>(
    service: &'s ServiceSummary,
    backend: &ServiceBackendRef,
    namespace: &str,
) -> Result<&'s ServicePortSummary> {
    let found = service.ports.iter().find(|p| match &backend.port {
        ServicePort::Number(number) => p.port == *number,
        ServicePort::Name(name) => p.name.as_deref() == Some(name),
    });
    found.ok_or_else(|| {
        Error::config(format!(
            "service {namespace}/{} has no port {}",
            backend.name, backend.port
        ))
    })
}

/// The shared default action: an explicitly designated default backend
/// wins; otherwise the first root path's backend serves unmatched traffic;
/// with neither, unmatched traffic gets a 404. A designated backend whose
/// target group is missing would have failed the build already, so the
/// lookups here cannot silently fall back.
fn default_action(
    live: &[&IngressGroupMember],
    target_groups: &HashMap<(String, String, ServicePort), StringToken>,
) -> Result<Action> {
    let designated = live
        .iter()
        .find_map(|member| {
            member
                .default_backend
                .as_ref()
                .map(|backend| (member, backend))
        })
        .or_else(|| {
            live.iter().find_map(|member| {
                member
                    .rules
                    .iter()
                    .flat_map(|rule| rule.paths.iter())
                    .find(|path| path.path == "/")
                    .map(|path| (member, &path.backend))
            })
        });

    match designated {
        Some((member, backend)) => {
            let key = (
                member.namespace.clone(),
                backend.name.clone(),
                backend.port.clone(),
            );
            let token = target_groups
                .get(&key)
                .expect("designated backend's target group was built above");
            Ok(Action::forward_to(token.clone()))
        }
        None => Ok(Action::FixedResponse(FixedResponseConfig {
            status_code: 404,
            content_type: Some("text/plain".to_string()),
            message_body: None,
        })),
    }
}

fn listen_ports(live: &[&IngressGroupMember], has_tls: bool) -> Result<Vec<ListenPort>> {
    let mut out: Vec<ListenPort> = Vec::new();
    for member in live {
        for lp in member.annotations.listen_ports.iter().flatten() {
            if !out.contains(lp) {
                out.push(*lp);
            }
        }
    }
    if out.is_empty() {
        out.push(ListenPort {
            protocol: Protocol::Http,
            port: 80,
        });
        if has_tls {
            out.push(ListenPort {
                protocol: Protocol::Https,
                port: 443,
            });
        }
    }
    out.sort_by_key(|lp| lp.port);

    let mut ports: Vec<u16> = out.iter().map(|lp| lp.port).collect();
    ports.dedup();
    if ports.len() != out.len() {
        return Err(Error::config(
            "listen-ports assigns the same port to more than one protocol",
        ));
    }
    Ok(out)
}

/// A group-level setting must agree across every member that sets it.
fn merged<T: Clone + PartialEq>(
    live: &[&IngressGroupMember],
    what: &str,
    get: impl Fn(&IngressGroupMember) -> Option<T>,
) -> Result<Option<T>> {
    let mut found: Option<T> = None;
    for member in live {
        if let Some(value) = get(member) {
            match &found {
                Some(existing) if *existing != value => {
                    return Err(Error::config(format!(
                        "members of the group disagree on {what}"
                    )));
                }
                _ => found = Some(value),
            }
        }
    }
    Ok(found)
}

fn merged_tags(live: &[&IngressGroupMember]) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for member in live {
        for (key, value) in &member.annotations.tags {
            match out.get(key) {
                Some(existing) if existing != value => {
                    return Err(Error::config(format!(
                        "members of the group disagree on tag {key:?}"
                    )));
                }
                _ => {
                    out.insert(key.clone(), value.clone());
                }
            }
        }
    }
    Ok(out)
}

fn merged_attributes(live: &[&IngressGroupMember]) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for member in live {
        for (key, value) in &member.annotations.load_balancer_attributes {
            match out.get(key) {
                Some(existing) if existing != value => {
                    return Err(Error::config(format!(
                        "members of the group disagree on load balancer attribute {key:?}"
                    )));
                }
                _ => {
                    out.insert(key.clone(), value.clone());
                }
            }
        }
    }
    Ok(out)
}
