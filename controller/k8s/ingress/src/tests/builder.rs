use super::{backend, member, rule, service_with_port};
use crate::{
    annotations::ListenPort,
    builder::{build_stack, BuildContext, BuildDefaults},
    group::GroupKey,
};
use ahash::AHashMap as HashMap;
use alb_controller_core::{
    model::{
        listener::{Action, RuleCondition},
        load_balancer::{IpAddressType, Scheme, SubnetMapping},
        target_group::{Protocol, TargetType},
    },
    tags::TagProvider,
    Error, ResourceKind, ResourceSpec,
};

fn defaults() -> BuildDefaults {
    BuildDefaults {
        target_type: TargetType::Ip,
        scheme: Scheme::Internal,
        ip_address_type: IpAddressType::Ipv4,
        ssl_policy: "ELBSecurityPolicy-TLS13-1-2-2021-06".to_string(),
        enable_backend_sg: true,
        disable_restricted_sg_rules: false,
        listener_rules_tagging: false,
    }
}

fn services(entries: &[(&str, &str, u16)]) -> HashMap<(String, String), crate::group::ServiceSummary> {
    entries
        .iter()
        .map(|(ns, name, port)| {
            ((ns.to_string(), name.to_string()), service_with_port(*port))
        })
        .collect()
}

fn key() -> GroupKey {
    GroupKey::Implicit {
        namespace: "default".to_string(),
        name: "ingress1".to_string(),
    }
}

fn run(
    services: &HashMap<(String, String), crate::group::ServiceSummary>,
    defaults: &BuildDefaults,
    members: &[crate::group::IngressGroupMember],
) -> alb_controller_core::Result<alb_controller_core::Stack> {
    run_with_configs(services, &HashMap::new(), defaults, members)
}

fn run_with_configs(
    services: &HashMap<(String, String), crate::group::ServiceSummary>,
    target_group_configs: &HashMap<
        (String, String),
        alb_controller_k8s_api::target_group_configuration::TargetGroupConfigurationSpec,
    >,
    defaults: &BuildDefaults,
    members: &[crate::group::IngressGroupMember],
) -> alb_controller_core::Result<alb_controller_core::Stack> {
    let tags = TagProvider::new("prod-cluster", Default::default(), Default::default()).unwrap();
    let ctx = BuildContext {
        cluster: "prod-cluster",
        tags: &tags,
        vpc_id: "vpc-1".to_string(),
        subnets: vec![SubnetMapping::id("subnet-0a"), SubnetMapping::id("subnet-0b")],
        services,
        target_group_configs,
        defaults,
    };
    build_stack(&ctx, &key(), members)
}

#[test]
fn single_root_path_builds_lb_listener_and_target_group_without_rules() {
    let members = vec![member(
        "default",
        "ingress1",
        vec![rule(Some("example.com"), vec![("/", backend("foo", 80))])],
    )];
    let stack = run(&services(&[("default", "foo", 80)]), &defaults(), &members).unwrap();

    let lbs: Vec<_> = stack.resources_of(ResourceKind::LoadBalancer).collect();
    assert_eq!(lbs.len(), 1);
    let Some(ResourceSpec::LoadBalancer(lb)) = stack.spec(lbs[0]) else {
        panic!("missing load balancer spec");
    };
    assert!(lb.name.starts_with("k8s-default-ingress1-"), "{}", lb.name);

    let tgs: Vec<_> = stack.resources_of(ResourceKind::TargetGroup).collect();
    assert_eq!(tgs.len(), 1);
    let Some(ResourceSpec::TargetGroup(tg)) = stack.spec(tgs[0]) else {
        panic!("missing target group spec");
    };
    assert!(tg.name.starts_with("prod-cluster-"), "{}", tg.name);
    assert_eq!(tg.port, 80);
    assert_eq!(tg.protocol, Protocol::Http);

    let listeners: Vec<_> = stack.resources_of(ResourceKind::Listener).collect();
    assert_eq!(listeners.len(), 1);
    let Some(ResourceSpec::Listener(listener)) = stack.spec(listeners[0]) else {
        panic!("missing listener spec");
    };
    assert_eq!(listener.port, 80);
    // The root path's backend serves as the default forward action.
    assert!(matches!(&listener.default_actions[..], [Action::Forward(_)]));

    assert_eq!(stack.resources_of(ResourceKind::ListenerRule).count(), 0);
    assert_eq!(stack.resources_of(ResourceKind::TargetGroupBinding).count(), 1);
}

#[test]
fn additional_path_gets_a_rule_at_priority_one() {
    let members = vec![member(
        "default",
        "ingress1",
        vec![rule(
            Some("example.com"),
            vec![("/", backend("foo", 80)), ("/api", backend("bar", 80))],
        )],
    )];
    let stack = run(
        &services(&[("default", "foo", 80), ("default", "bar", 80)]),
        &defaults(),
        &members,
    )
    .unwrap();

    assert_eq!(stack.resources_of(ResourceKind::TargetGroup).count(), 2);

    let rules: Vec<_> = stack.resources_of(ResourceKind::ListenerRule).collect();
    assert_eq!(rules.len(), 1);
    let Some(ResourceSpec::ListenerRule(rule)) = stack.spec(rules[0]) else {
        panic!("missing rule spec");
    };
    assert_eq!(rule.priority, 1);
    assert!(rule.conditions.contains(&RuleCondition::PathPattern {
        values: vec!["/api".to_string()],
    }));
    assert!(rule.conditions.contains(&RuleCondition::HostHeader {
        values: vec!["example.com".to_string()],
    }));
}

#[test]
fn priorities_are_dense_across_members_in_group_order() {
    let mut first = member(
        "default",
        "a",
        vec![rule(None, vec![("/a", backend("foo", 80)), ("/b", backend("foo", 80))])],
    );
    first.annotations.group_name = Some("team".to_string());
    let mut second = member(
        "default",
        "b",
        vec![rule(None, vec![("/c", backend("foo", 80))])],
    );
    second.annotations.group_name = Some("team".to_string());

    let stack = run(
        &services(&[("default", "foo", 80)]),
        &defaults(),
        &[first, second],
    )
    .unwrap();

    let mut priorities: Vec<u32> = stack
        .resources_of(ResourceKind::ListenerRule)
        .filter_map(|id| match stack.spec(id) {
            Some(ResourceSpec::ListenerRule(rule)) => Some(rule.priority),
            _ => None,
        })
        .collect();
    priorities.sort_unstable();
    assert_eq!(priorities, vec![1, 2, 3]);
}

#[test]
fn missing_backend_service_is_a_config_error() {
    let members = vec![member(
        "default",
        "ingress1",
        vec![rule(None, vec![("/", backend("ghost", 80))])],
    )];
    let err = run(&services(&[]), &defaults(), &members).unwrap_err();
    assert!(matches!(err, Error::Config(_)), "{err}");
}

#[test]
fn conflicting_schemes_in_a_group_fail() {
    let mut first = member(
        "default",
        "a",
        vec![rule(None, vec![("/", backend("foo", 80))])],
    );
    first.annotations.scheme = Some(Scheme::Internal);
    let mut second = member(
        "default",
        "b",
        vec![rule(None, vec![("/x", backend("foo", 80))])],
    );
    second.annotations.scheme = Some(Scheme::InternetFacing);

    let err = run(&services(&[("default", "foo", 80)]), &defaults(), &[first, second])
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)), "{err}");
}

#[test]
fn tls_host_issues_a_certificate_and_https_listener() {
    let mut m = member(
        "default",
        "ingress1",
        vec![rule(Some("api.example.com"), vec![("/", backend("foo", 80))])],
    );
    m.tls_hosts = vec!["api.example.com".to_string()];

    let stack = run(&services(&[("default", "foo", 80)]), &defaults(), &[m]).unwrap();

    let certs: Vec<_> = stack.resources_of(ResourceKind::Certificate).collect();
    assert_eq!(certs.len(), 1);
    assert_eq!(certs[0].name, "api.example.com");

    let https = stack
        .resources_of(ResourceKind::Listener)
        .find_map(|id| match stack.spec(id) {
            Some(ResourceSpec::Listener(l)) if l.protocol == Protocol::Https => Some(l),
            _ => None,
        })
        .expect("an HTTPS listener is derived from the TLS stanza");
    assert_eq!(https.port, 443);
    assert_eq!(https.certificates.len(), 1);
    assert!(https.certificates[0].referent().is_some());
    assert!(https.ssl_policy.is_some());
}

#[test]
fn https_without_any_certificate_source_fails() {
    let mut m = member(
        "default",
        "ingress1",
        vec![rule(None, vec![("/", backend("foo", 80))])],
    );
    m.annotations.listen_ports = Some(vec![ListenPort {
        protocol: Protocol::Https,
        port: 443,
    }]);

    let err = run(&services(&[("default", "foo", 80)]), &defaults(), &[m]).unwrap_err();
    assert!(matches!(err, Error::Config(_)), "{err}");
}

#[test]
fn explicit_certificate_arns_attach_as_literals() {
    let mut m = member(
        "default",
        "ingress1",
        vec![rule(None, vec![("/", backend("foo", 80))])],
    );
    m.annotations.certificate_arns =
        Some(vec!["arn:aws:acm:us-west-2:123:certificate/abc".to_string()]);

    let stack = run(&services(&[("default", "foo", 80)]), &defaults(), &[m]).unwrap();
    assert_eq!(stack.resources_of(ResourceKind::Certificate).count(), 0);

    let https = stack
        .resources_of(ResourceKind::Listener)
        .find_map(|id| match stack.spec(id) {
            Some(ResourceSpec::Listener(l)) if l.protocol == Protocol::Https => Some(l),
            _ => None,
        })
        .expect("an HTTPS listener is derived from the certificate annotation");
    assert_eq!(
        https.certificates[0].as_literal(),
        Some("arn:aws:acm:us-west-2:123:certificate/abc")
    );
}

#[test]
fn user_security_groups_are_referenced_not_managed() {
    let mut m = member(
        "default",
        "ingress1",
        vec![rule(None, vec![("/", backend("foo", 80))])],
    );
    m.annotations.security_groups = Some(vec!["sg-user".to_string()]);

    let stack = run(&services(&[("default", "foo", 80)]), &defaults(), &[m]).unwrap();
    assert_eq!(stack.resources_of(ResourceKind::SecurityGroup).count(), 0);

    let Some(ResourceSpec::LoadBalancer(lb)) = stack
        .resources_of(ResourceKind::LoadBalancer)
        .next()
        .and_then(|id| stack.spec(id))
    else {
        panic!("missing load balancer");
    };
    assert_eq!(lb.security_groups[0].as_literal(), Some("sg-user"));
}

#[test]
fn managed_security_group_opens_listener_ports() {
    let members = vec![member(
        "default",
        "ingress1",
        vec![rule(None, vec![("/", backend("foo", 80))])],
    )];
    let stack = run(&services(&[("default", "foo", 80)]), &defaults(), &members).unwrap();

    // Frontend group plus the shared backend group.
    let sgs: Vec<_> = stack.resources_of(ResourceKind::SecurityGroup).collect();
    assert_eq!(sgs.len(), 2);
    let frontend = sgs
        .iter()
        .find_map(|id| match stack.spec(id) {
            Some(ResourceSpec::SecurityGroup(sg)) if !sg.ingress_rules.is_empty() => Some(sg),
            _ => None,
        })
        .expect("managed frontend group has listener ingress");
    assert_eq!(frontend.ingress_rules[0].from_port, 80);
}

#[test]
fn instance_target_type_uses_node_ports() {
    let mut defaults = defaults();
    defaults.target_type = TargetType::Instance;
    let members = vec![member(
        "default",
        "ingress1",
        vec![rule(None, vec![("/", backend("foo", 80))])],
    )];
    let stack = run(&services(&[("default", "foo", 80)]), &defaults, &members).unwrap();

    let Some(ResourceSpec::TargetGroup(tg)) = stack
        .resources_of(ResourceKind::TargetGroup)
        .next()
        .and_then(|id| stack.spec(id))
    else {
        panic!("missing target group");
    };
    assert_eq!(tg.target_type, TargetType::Instance);
    assert_eq!(tg.port, 30080);
}

#[test]
fn listener_overrides_apply_per_port_without_crosstalk() {
    use crate::annotations::ListenerOverride;

    let mut m = member(
        "default",
        "ingress1",
        vec![rule(None, vec![("/", backend("foo", 80))])],
    );
    m.annotations.listen_ports = Some(vec![
        ListenPort {
            protocol: Protocol::Https,
            port: 443,
        },
        ListenPort {
            protocol: Protocol::Https,
            port: 8443,
        },
    ]);
    m.annotations.listener_overrides = [
        (
            443,
            ListenerOverride {
                protocol: Protocol::Https,
                ssl_policy: Some("policy-443".to_string()),
                default_certificate: Some("arn:cert-443".to_string()),
                alpn_policy: None,
            },
        ),
        (
            8443,
            ListenerOverride {
                protocol: Protocol::Https,
                ssl_policy: Some("policy-8443".to_string()),
                default_certificate: Some("arn:cert-8443".to_string()),
                alpn_policy: None,
            },
        ),
    ]
    .into_iter()
    .collect();

    let stack = run(&services(&[("default", "foo", 80)]), &defaults(), &[m]).unwrap();

    let listener_on = |port: u16| {
        stack
            .resources_of(ResourceKind::Listener)
            .find_map(|id| match stack.spec(id) {
                Some(ResourceSpec::Listener(l)) if l.port == port => Some(l.clone()),
                _ => None,
            })
            .expect("listener exists")
    };

    let on_443 = listener_on(443);
    assert_eq!(on_443.ssl_policy.as_deref(), Some("policy-443"));
    assert_eq!(on_443.certificates[0].as_literal(), Some("arn:cert-443"));

    // The second port keeps its own settings; nothing leaked across.
    let on_8443 = listener_on(8443);
    assert_eq!(on_8443.ssl_policy.as_deref(), Some("policy-8443"));
    assert_eq!(on_8443.certificates[0].as_literal(), Some("arn:cert-8443"));
}

#[test]
fn listener_override_protocol_must_match_the_listen_port() {
    use crate::annotations::ListenerOverride;

    let mut m = member(
        "default",
        "ingress1",
        vec![rule(None, vec![("/", backend("foo", 80))])],
    );
    m.annotations.listener_overrides = [(
        80,
        ListenerOverride {
            protocol: Protocol::Https,
            ssl_policy: None,
            default_certificate: None,
            alpn_policy: None,
        },
    )]
    .into_iter()
    .collect();

    let err = run(&services(&[("default", "foo", 80)]), &defaults(), &[m]).unwrap_err();
    assert!(matches!(err, Error::Config(_)), "{err}");
}

#[test]
fn target_group_configuration_overrides_annotation_health_checks() {
    use alb_controller_k8s_api::target_group_configuration::{
        HealthCheckConfiguration, TargetGroupConfigurationSpec,
    };

    let mut m = member(
        "default",
        "ingress1",
        vec![rule(None, vec![("/", backend("foo", 80))])],
    );
    m.annotations.healthcheck_path = Some("/annotated".to_string());

    let configs: HashMap<_, _> = [(
        ("default".to_string(), "foo".to_string()),
        TargetGroupConfigurationSpec {
            service_name: "foo".to_string(),
            target_type: None,
            health_check: Some(HealthCheckConfiguration {
                path: Some("/configured".to_string()),
                interval_seconds: Some(30),
                ..Default::default()
            }),
            target_group_attributes: None,
        },
    )]
    .into_iter()
    .collect();

    let stack =
        run_with_configs(&services(&[("default", "foo", 80)]), &configs, &defaults(), &[m])
            .unwrap();
    let Some(ResourceSpec::TargetGroup(tg)) = stack
        .resources_of(ResourceKind::TargetGroup)
        .next()
        .and_then(|id| stack.spec(id))
    else {
        panic!("missing target group");
    };
    assert_eq!(tg.health_check.path.as_deref(), Some("/configured"));
    assert_eq!(tg.health_check.interval_seconds, 30);
}

#[test]
fn all_members_deleting_builds_an_empty_stack() {
    let mut m = member(
        "default",
        "ingress1",
        vec![rule(None, vec![("/", backend("foo", 80))])],
    );
    m.deleting = true;
    let stack = run(&services(&[("default", "foo", 80)]), &defaults(), &[m]).unwrap();
    assert!(stack.is_empty());
}

#[test]
fn identical_inputs_build_identical_names() {
    let members = vec![member(
        "default",
        "ingress1",
        vec![rule(Some("example.com"), vec![("/", backend("foo", 80))])],
    )];
    let svcs = services(&[("default", "foo", 80)]);
    let a = run(&svcs, &defaults(), &members).unwrap();
    let b = run(&svcs, &defaults(), &members).unwrap();

    let name_of = |stack: &alb_controller_core::Stack, kind| {
        stack
            .resources_of(kind)
            .filter_map(|id| match stack.spec(id) {
                Some(ResourceSpec::LoadBalancer(lb)) => Some(lb.name.clone()),
                Some(ResourceSpec::TargetGroup(tg)) => Some(tg.name.clone()),
                _ => None,
            })
            .collect::<Vec<_>>()
    };
    assert_eq!(
        name_of(&a, ResourceKind::LoadBalancer),
        name_of(&b, ResourceKind::LoadBalancer)
    );
    assert_eq!(
        name_of(&a, ResourceKind::TargetGroup),
        name_of(&b, ResourceKind::TargetGroup)
    );
}
