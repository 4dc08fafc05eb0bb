use super::fake::Fake;
use crate::{DeployConfig, DeployReport, StackDeployer};
use alb_controller_core::{
    cloud::Cloud,
    model::{
        certificate::{CertificateSpec, CertificateState, CertificateType, ObservedCertificate,
            ValidationMethod, ValidationRecord},
        listener::{Action, ListenerSpec, RuleCondition, RuleSpec},
        load_balancer::{
            self, IpAddressType, LoadBalancerSpec, LoadBalancerType, Scheme, SubnetMapping,
        },
        target_group::{self, HealthCheck, Protocol, TargetGroupSpec, TargetType},
    },
    tags::TagProvider,
    ResourceId, ResourceKind, ResourceSpec, Stack, StackId, StatusField, StringToken,
};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;

struct Harness {
    fake: Fake,
    cloud: Cloud,
    tags: TagProvider,
    config: DeployConfig,
}

impl Harness {
    fn new() -> Self {
        let (fake, cloud) = Fake::new();
        Self {
            fake,
            cloud,
            tags: TagProvider::new("prod-cluster", Default::default(), Default::default())
                .unwrap(),
            config: DeployConfig::default(),
        }
    }

    async fn deploy(&self, stack: &mut Stack) -> DeployReport {
        StackDeployer {
            cloud: &self.cloud,
            tags: &self.tags,
            config: &self.config,
        }
        .deploy(stack)
        .await
        .expect("deploy succeeds")
    }

    fn log(&self) -> Vec<String> {
        self.fake.log()
    }

    fn log_count(&self, prefix: &str) -> usize {
        self.log()
            .iter()
            .filter(|entry| entry.starts_with(prefix))
            .count()
    }
}

fn stack_id() -> StackId {
    StackId::new("default", "ingress1")
}

fn tg_spec(tags: &TagProvider, service: &str, port: u16) -> (String, TargetGroupSpec) {
    let id = stack_id();
    let logical = format!("default/{service}:{port}");
    let spec = TargetGroupSpec {
        name: target_group::name(
            "prod-cluster",
            &id,
            service,
            &port.to_string(),
            port,
            Protocol::Http,
        ),
        protocol: Protocol::Http,
        port,
        protocol_version: None,
        target_type: TargetType::Ip,
        health_check: HealthCheck::default(),
        matcher: None,
        attributes: BTreeMap::new(),
        tags: tags.resource_tags(&id, &logical, &BTreeMap::new()),
    };
    (logical, spec)
}

fn lb_spec(tags: &TagProvider, scheme: Scheme) -> LoadBalancerSpec {
    let id = stack_id();
    LoadBalancerSpec {
        name: load_balancer::name("prod-cluster", &id),
        lb_type: LoadBalancerType::Application,
        scheme,
        ip_address_type: IpAddressType::Ipv4,
        subnet_mappings: vec![SubnetMapping::id("subnet-0a"), SubnetMapping::id("subnet-0b")],
        security_groups: vec![StringToken::literal("sg-fixed")],
        attributes: BTreeMap::new(),
        tags: tags.resource_tags(&id, "LoadBalancer", &BTreeMap::new()),
    }
}

fn listener_spec(
    tags: &TagProvider,
    lb: &ResourceId,
    default_to: &ResourceId,
    port: u16,
) -> ListenerSpec {
    ListenerSpec {
        load_balancer_arn: StringToken::reference(lb.clone(), StatusField::Arn),
        port,
        protocol: Protocol::Http,
        default_actions: vec![Action::forward_to(StringToken::reference(
            default_to.clone(),
            StatusField::Arn,
        ))],
        certificates: Vec::new(),
        ssl_policy: None,
        alpn_policy: None,
        tags: tags.resource_tags(&stack_id(), &port.to_string(), &BTreeMap::new()),
    }
}

/// The S1 shape: one backend on `/`, one HTTP listener, no rules.
fn simple_stack(tags: &TagProvider, scheme: Scheme, port: u16) -> Stack {
    let mut stack = Stack::new(stack_id());
    let (logical, spec) = tg_spec(tags, "foo", port);
    let tg = stack.add(logical, ResourceSpec::TargetGroup(spec)).unwrap();
    let lb = stack
        .add("LoadBalancer", ResourceSpec::LoadBalancer(lb_spec(tags, scheme)))
        .unwrap();
    stack
        .add("80", ResourceSpec::Listener(listener_spec(tags, &lb, &tg, 80)))
        .unwrap();
    stack
}

#[tokio::test]
async fn s1_create_from_empty() {
    let harness = Harness::new();
    let mut stack = simple_stack(&harness.tags, Scheme::Internal, 80);
    let report = harness.deploy(&mut stack).await;

    let state = harness.fake.state.lock();
    assert_eq!(state.load_balancers.len(), 1);
    assert!(
        state.load_balancers[0].name.starts_with("k8s-default-ingress1-"),
        "{}",
        state.load_balancers[0].name
    );
    assert_eq!(state.target_groups.len(), 1);
    assert!(
        state.target_groups[0].name.starts_with("prod-cluster-"),
        "{}",
        state.target_groups[0].name
    );
    assert_eq!(state.listeners.len(), 1);
    assert_eq!(state.listeners[0].port, 80);

    // The default action forwards to the created target group.
    let Action::Forward(forward) = &state.listeners[0].default_actions[0] else {
        panic!("default action is a forward");
    };
    assert_eq!(
        forward.target_groups[0].target_group,
        state.target_groups[0].arn
    );

    // No rules beyond the listener default.
    assert!(state.rules.iter().all(|r| r.rule.is_default));

    assert_eq!(report.created, 3);
    assert!(report
        .load_balancer_dns
        .as_deref()
        .unwrap()
        .ends_with(".elb.amazonaws.com"));
}

#[tokio::test]
async fn s2_adding_a_path_adds_a_rule_and_leaves_the_rest_untouched() {
    let harness = Harness::new();
    let mut stack = simple_stack(&harness.tags, Scheme::Internal, 80);
    harness.deploy(&mut stack).await;

    // Same stack plus bar:80 behind /api.
    let mut stack = simple_stack(&harness.tags, Scheme::Internal, 80);
    let (logical, spec) = tg_spec(&harness.tags, "bar", 80);
    let bar = stack.add(logical, ResourceSpec::TargetGroup(spec)).unwrap();
    let listener = stack
        .resources_of(ResourceKind::Listener)
        .next()
        .cloned()
        .unwrap();
    stack
        .add(
            "80:1",
            ResourceSpec::ListenerRule(RuleSpec {
                listener_arn: StringToken::reference(listener, StatusField::Arn),
                priority: 1,
                conditions: vec![RuleCondition::PathPattern {
                    values: vec!["/api".to_string()],
                }],
                actions: vec![Action::forward_to(StringToken::reference(
                    bar.clone(),
                    StatusField::Arn,
                ))],
                tags: BTreeMap::new(),
            }),
        )
        .unwrap();
    let report = harness.deploy(&mut stack).await;

    let state = harness.fake.state.lock();
    assert_eq!(state.target_groups.len(), 2);
    let rule = state
        .rules
        .iter()
        .find(|r| !r.rule.is_default)
        .expect("the /api rule exists");
    assert_eq!(rule.rule.priority, Some(1));
    assert_eq!(
        rule.rule.conditions,
        vec![RuleCondition::PathPattern {
            values: vec!["/api".to_string()],
        }]
    );
    drop(state);

    // The original load balancer and listener were reused, not recreated.
    assert_eq!(harness.log_count("CreateLoadBalancer"), 1);
    assert_eq!(harness.log_count("CreateListener"), 1);
    assert_eq!(report.created, 2); // bar target group + rule
}

#[tokio::test]
async fn replaying_identical_desired_state_mutates_nothing() {
    let harness = Harness::new();
    let mut stack = simple_stack(&harness.tags, Scheme::Internal, 80);
    harness.deploy(&mut stack).await;
    let mutations_after_first = harness.fake.state.lock().mutation_count();

    let mut stack = simple_stack(&harness.tags, Scheme::Internal, 80);
    let report = harness.deploy(&mut stack).await;

    assert!(report.is_steady(), "second pass must be a no-op");
    assert_eq!(
        harness.fake.state.lock().mutation_count(),
        mutations_after_first
    );
}

#[tokio::test]
async fn s3_scheme_change_recreates_lb_and_listeners_but_keeps_target_groups() {
    let harness = Harness::new();
    let mut stack = simple_stack(&harness.tags, Scheme::Internal, 80);
    let first = harness.deploy(&mut stack).await;
    let (old_lb_arn, tg_arn) = {
        let state = harness.fake.state.lock();
        (
            state.load_balancers[0].arn.clone(),
            state.target_groups[0].arn.clone(),
        )
    };

    let mut stack = simple_stack(&harness.tags, Scheme::InternetFacing, 80);
    let second = harness.deploy(&mut stack).await;

    let state = harness.fake.state.lock();
    assert_eq!(state.load_balancers.len(), 1);
    assert_ne!(state.load_balancers[0].arn, old_lb_arn);
    assert_eq!(state.load_balancers[0].scheme, Scheme::InternetFacing);

    // Target groups survive with their names (and ARNs) intact.
    assert_eq!(state.target_groups.len(), 1);
    assert_eq!(state.target_groups[0].arn, tg_arn);

    // The listener was recreated on the new load balancer.
    assert_eq!(state.listeners.len(), 1);
    assert_eq!(
        state.listeners[0].load_balancer_arn,
        state.load_balancers[0].arn
    );
    drop(state);

    assert_eq!(harness.log_count("DeleteLoadBalancer"), 1);
    assert_eq!(harness.log_count("CreateListener"), 2);
    assert_ne!(first.load_balancer_dns, second.load_balancer_dns);
}

#[tokio::test(start_paused = true)]
async fn s4_tls_issues_a_certificate_through_dns_validation() {
    let harness = Harness::new();
    harness.fake.seed_zone("Z0EXAMPLE", "example.com");
    // ACM populates validation records only after a couple of describes.
    harness.fake.state.lock().record_delay = 2;

    let mut stack = Stack::new(stack_id());
    let cert = stack
        .add(
            "api.example.com",
            ResourceSpec::Certificate(CertificateSpec {
                cert_type: CertificateType::AmazonIssued,
                domain_name: "api.example.com".to_string(),
                subject_alternative_names: vec!["api.example.com".to_string()],
                validation_method: ValidationMethod::Dns,
                key_algorithm: None,
                certificate_authority_arn: None,
                tags: harness.tags.resource_tags(
                    &stack_id(),
                    "api.example.com",
                    &BTreeMap::new(),
                ),
            }),
        )
        .unwrap();
    let (logical, spec) = tg_spec(&harness.tags, "foo", 80);
    let tg = stack.add(logical, ResourceSpec::TargetGroup(spec)).unwrap();
    let lb = stack
        .add(
            "LoadBalancer",
            ResourceSpec::LoadBalancer(lb_spec(&harness.tags, Scheme::InternetFacing)),
        )
        .unwrap();
    let mut https = listener_spec(&harness.tags, &lb, &tg, 443);
    https.protocol = Protocol::Https;
    https.certificates = vec![StringToken::reference(cert, StatusField::Arn)];
    https.ssl_policy = Some("ELBSecurityPolicy-TLS13-1-2-2021-06".to_string());
    stack.add("443", ResourceSpec::Listener(https)).unwrap();

    harness.deploy(&mut stack).await;

    let state = harness.fake.state.lock();
    assert_eq!(state.certificates.len(), 1);
    assert_eq!(state.certificates[0].observed.state, CertificateState::Issued);
    // One CNAME upsert landed in the enclosing zone.
    assert_eq!(state.dns_records.len(), 1);
    assert_eq!(state.dns_records[0].0, "Z0EXAMPLE");
    // The listener is bound to the issued ARN.
    assert_eq!(
        state.listeners[0].certificates,
        vec![state.certificates[0].observed.arn.clone()]
    );
    drop(state);
    assert_eq!(harness.log_count("RequestCertificate"), 1);
}

#[tokio::test(start_paused = true)]
async fn s5_orphaned_certificate_is_swept_after_listeners_with_in_use_retries() {
    let harness = Harness::new();
    harness.fake.seed_zone("Z0EXAMPLE", "example.com");

    let orphan_arn = "arn:aws:acm:us-west-2:123456789012:certificate/orphan".to_string();
    let record = ValidationRecord {
        domain_name: "old.example.com".to_string(),
        name: "_old.old.example.com.".to_string(),
        record_type: "CNAME".to_string(),
        value: "_old.acm-validations.aws.".to_string(),
    };
    harness.fake.seed_certificate(ObservedCertificate {
        arn: orphan_arn.clone(),
        domain_name: "old.example.com".to_string(),
        subject_alternative_names: vec!["old.example.com".to_string()],
        state: CertificateState::Issued,
        created_at: Some(chrono::Utc::now()),
        validation_records: vec![record.clone()],
        tags: harness
            .tags
            .resource_tags(&stack_id(), "old.example.com", &BTreeMap::new()),
    });
    {
        let mut state = harness.fake.state.lock();
        state
            .dns_records
            .push(("Z0EXAMPLE".to_string(), record.name.clone(), record.value));
        // A listener somewhere still pins the certificate for three polls.
        state.in_use.insert(orphan_arn.clone(), 3);
    }

    let mut stack = simple_stack(&harness.tags, Scheme::Internal, 80);
    harness.deploy(&mut stack).await;

    let state = harness.fake.state.lock();
    assert!(state.certificates.is_empty(), "the orphan was deleted");
    assert!(state.dns_records.is_empty(), "its validation record was cleaned");
    drop(state);

    let log = harness.log();
    let listener_created = log
        .iter()
        .position(|e| e.starts_with("CreateListener"))
        .unwrap();
    let first_delete_attempt = log
        .iter()
        .position(|e| e.starts_with("DeleteCertificate"))
        .unwrap();
    assert!(
        first_delete_attempt > listener_created,
        "certificate deletion is deferred past listener synthesis"
    );
    // Three in-use rejections, then success.
    assert_eq!(harness.log_count("DeleteCertificate"), 4);
}

#[tokio::test]
async fn s6_target_group_port_change_creates_before_deleting() {
    let harness = Harness::new();
    let mut stack = simple_stack(&harness.tags, Scheme::Internal, 80);
    harness.deploy(&mut stack).await;
    let old_tg_arn = harness.fake.state.lock().target_groups[0].arn.clone();

    // foo moves to 8080: the hash changes, so this is a new resource.
    let mut stack = simple_stack(&harness.tags, Scheme::Internal, 8080);
    harness.deploy(&mut stack).await;

    let state = harness.fake.state.lock();
    assert_eq!(state.target_groups.len(), 1);
    assert_ne!(state.target_groups[0].arn, old_tg_arn);
    assert_eq!(state.target_groups[0].port, 8080);

    // The listener default action now points at the new target group.
    let Action::Forward(forward) = &state.listeners[0].default_actions[0] else {
        panic!("default action is a forward");
    };
    assert_eq!(
        forward.target_groups[0].target_group,
        state.target_groups[0].arn
    );
    drop(state);

    let log = harness.log();
    let create_new = log
        .iter()
        .rposition(|e| e.starts_with("CreateTargetGroup"))
        .unwrap();
    let delete_old = log
        .iter()
        .position(|e| e.starts_with("DeleteTargetGroup"))
        .unwrap();
    assert!(create_new < delete_old, "delete follows create");
    assert_eq!(harness.log_count("ModifyListener"), 1);
}

#[tokio::test]
async fn unowned_resources_are_never_touched() {
    let harness = Harness::new();
    {
        let mut state = harness.fake.state.lock();
        state.load_balancers.push(
            alb_controller_core::model::load_balancer::ObservedLoadBalancer {
                arn: "arn:aws:elasticloadbalancing:us-west-2:123456789012:loadbalancer/app/not-ours/1"
                    .to_string(),
                name: "not-ours".to_string(),
                lb_type: LoadBalancerType::Application,
                scheme: Scheme::Internal,
                ip_address_type: IpAddressType::Ipv4,
                state: alb_controller_core::model::load_balancer::LoadBalancerState::Active,
                dns_name: "not-ours.elb.amazonaws.com".to_string(),
                canonical_hosted_zone_id: "Z1".to_string(),
                security_groups: Vec::new(),
                subnet_mappings: Vec::new(),
                attributes: BTreeMap::new(),
                // Another cluster's tags: ownership discovery must skip it.
                tags: BTreeMap::from([(
                    "elbv2.k8s.aws/cluster".to_string(),
                    "other-cluster".to_string(),
                )]),
            },
        );
    }

    let mut stack = simple_stack(&harness.tags, Scheme::Internal, 80);
    harness.deploy(&mut stack).await;

    let state = harness.fake.state.lock();
    assert!(state
        .load_balancers
        .iter()
        .any(|lb| lb.name == "not-ours"));
    drop(state);
    assert!(
        !harness.log().iter().any(|e| e.contains("not-ours")),
        "no mutation may reference the unowned load balancer"
    );
}

#[tokio::test(start_paused = true)]
async fn pending_certificate_inside_the_reissue_window_is_waited_not_reissued() {
    let harness = Harness::new();
    harness.fake.seed_zone("Z0EXAMPLE", "example.com");

    let arn = "arn:aws:acm:us-west-2:123456789012:certificate/pending".to_string();
    let record = ValidationRecord {
        domain_name: "api.example.com".to_string(),
        name: "_p.api.example.com.".to_string(),
        record_type: "CNAME".to_string(),
        value: "_p.acm-validations.aws.".to_string(),
    };
    harness.fake.seed_certificate(ObservedCertificate {
        arn: arn.clone(),
        domain_name: "api.example.com".to_string(),
        subject_alternative_names: vec!["api.example.com".to_string()],
        state: CertificateState::PendingValidation,
        created_at: Some(chrono::Utc::now() - chrono::Duration::minutes(1)),
        validation_records: vec![record.clone()],
        tags: harness
            .tags
            .resource_tags(&stack_id(), "api.example.com", &BTreeMap::new()),
    });
    // The validation record is already published, so waiting succeeds.
    harness.fake.state.lock().dns_records.push((
        "Z0EXAMPLE".to_string(),
        record.name.clone(),
        record.value.clone(),
    ));

    let mut stack = Stack::new(stack_id());
    stack
        .add(
            "api.example.com",
            ResourceSpec::Certificate(CertificateSpec {
                cert_type: CertificateType::AmazonIssued,
                domain_name: "api.example.com".to_string(),
                subject_alternative_names: vec!["api.example.com".to_string()],
                validation_method: ValidationMethod::Dns,
                key_algorithm: None,
                certificate_authority_arn: None,
                tags: harness.tags.resource_tags(
                    &stack_id(),
                    "api.example.com",
                    &BTreeMap::new(),
                ),
            }),
        )
        .unwrap();
    harness.deploy(&mut stack).await;

    assert_eq!(harness.log_count("RequestCertificate"), 0);
    let state = harness.fake.state.lock();
    assert_eq!(state.certificates.len(), 1);
    assert_eq!(state.certificates[0].observed.arn, arn);
    assert_eq!(state.certificates[0].observed.state, CertificateState::Issued);
}

#[tokio::test(start_paused = true)]
async fn pending_certificate_past_the_reissue_window_is_replaced() {
    let harness = Harness::new();
    harness.fake.seed_zone("Z0EXAMPLE", "example.com");

    let stale_arn = "arn:aws:acm:us-west-2:123456789012:certificate/stale".to_string();
    harness.fake.seed_certificate(ObservedCertificate {
        arn: stale_arn.clone(),
        domain_name: "api.example.com".to_string(),
        subject_alternative_names: vec!["api.example.com".to_string()],
        state: CertificateState::PendingValidation,
        created_at: Some(chrono::Utc::now() - chrono::Duration::hours(1)),
        validation_records: Vec::new(),
        tags: harness
            .tags
            .resource_tags(&stack_id(), "api.example.com", &BTreeMap::new()),
    });

    let mut stack = Stack::new(stack_id());
    stack
        .add(
            "api.example.com",
            ResourceSpec::Certificate(CertificateSpec {
                cert_type: CertificateType::AmazonIssued,
                domain_name: "api.example.com".to_string(),
                subject_alternative_names: vec!["api.example.com".to_string()],
                validation_method: ValidationMethod::Dns,
                key_algorithm: None,
                certificate_authority_arn: None,
                tags: harness.tags.resource_tags(
                    &stack_id(),
                    "api.example.com",
                    &BTreeMap::new(),
                ),
            }),
        )
        .unwrap();
    harness.deploy(&mut stack).await;

    assert_eq!(harness.log_count("RequestCertificate"), 1);
    let state = harness.fake.state.lock();
    assert_eq!(state.certificates.len(), 1);
    assert_ne!(state.certificates[0].observed.arn, stale_arn);
    assert_eq!(state.certificates[0].observed.state, CertificateState::Issued);
}

#[tokio::test]
async fn an_empty_stack_tears_everything_down() {
    let harness = Harness::new();
    let mut stack = simple_stack(&harness.tags, Scheme::Internal, 80);
    harness.deploy(&mut stack).await;

    let mut empty = Stack::new(stack_id());
    let report = harness.deploy(&mut empty).await;

    let state = harness.fake.state.lock();
    assert!(state.load_balancers.is_empty());
    assert!(state.target_groups.is_empty());
    assert!(state.listeners.is_empty());
    drop(state);
    assert_eq!(report.deleted, 2); // load balancer + target group
}
