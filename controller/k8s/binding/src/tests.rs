use crate::targets;
use alb_controller_k8s_api::{
    api::core::v1::{
        EndpointAddress, EndpointPort, EndpointSubset, NodeCondition, NodeSpec, NodeStatus,
    },
    target_group_binding::{ServiceReference, TargetGroupBindingSpec},
    Endpoints, IntOrString, Node, ObjectMeta, Service, ServicePort, ServiceSpec,
};
use maplit::btreemap;

fn binding_spec(target_type: &str, port: IntOrString) -> TargetGroupBindingSpec {
    TargetGroupBindingSpec {
        target_group_arn: "arn:aws:elasticloadbalancing:us-west-2:123:targetgroup/tg/1"
            .to_string(),
        target_type: Some(target_type.to_string()),
        service_ref: ServiceReference {
            name: "foo".to_string(),
            port,
        },
        networking: None,
        node_selector: None,
        ip_address_type: None,
    }
}

fn endpoints(ready: &[&str], not_ready: &[&str], port: i32) -> Endpoints {
    let address = |ip: &&str| EndpointAddress {
        ip: ip.to_string(),
        ..Default::default()
    };
    Endpoints {
        metadata: ObjectMeta::default(),
        subsets: Some(vec![EndpointSubset {
            addresses: Some(ready.iter().map(address).collect()),
            not_ready_addresses: Some(not_ready.iter().map(address).collect()),
            ports: Some(vec![EndpointPort {
                port,
                ..Default::default()
            }]),
        }]),
    }
}

fn node(name: &str, ready: bool, provider_id: Option<&str>) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(NodeSpec {
            provider_id: provider_id.map(str::to_string),
            ..Default::default()
        }),
        status: Some(NodeStatus {
            conditions: Some(vec![NodeCondition {
                type_: "Ready".to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
    }
}

fn node_port_service(port: i32, node_port: i32) -> Service {
    Service {
        metadata: ObjectMeta::default(),
        spec: Some(ServiceSpec {
            ports: Some(vec![ServicePort {
                port,
                node_port: Some(node_port),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

#[test]
fn ip_targets_dedupe_by_ip_and_port() {
    let spec = binding_spec("ip", IntOrString::Int(80));
    let mut eps = endpoints(&["10.0.0.1", "10.0.0.2"], &[], 8080);
    // A second subset repeating an address must not double-register.
    eps.subsets.as_mut().unwrap().push(EndpointSubset {
        addresses: Some(vec![EndpointAddress {
            ip: "10.0.0.1".to_string(),
            ..Default::default()
        }]),
        not_ready_addresses: None,
        ports: Some(vec![EndpointPort {
            port: 8080,
            ..Default::default()
        }]),
    });

    let out = targets::ip_targets(&spec, &eps, false);
    let ids: Vec<(String, u16)> = out.iter().map(|t| (t.id.clone(), t.port)).collect();
    assert_eq!(
        ids,
        vec![
            ("10.0.0.1".to_string(), 8080),
            ("10.0.0.2".to_string(), 8080),
        ]
    );
}

#[test]
fn not_ready_addresses_only_count_under_fail_open() {
    let spec = binding_spec("ip", IntOrString::Int(80));
    let eps = endpoints(&["10.0.0.1"], &["10.0.0.9"], 8080);

    let closed = targets::ip_targets(&spec, &eps, false);
    assert_eq!(closed.len(), 1);

    let open = targets::ip_targets(&spec, &eps, true);
    assert_eq!(open.len(), 2);
    assert!(open.iter().any(|t| t.id == "10.0.0.9"));
}

#[test]
fn instance_targets_register_ready_workers_by_instance_id() {
    let spec = binding_spec("instance", IntOrString::Int(80));
    let service = node_port_service(80, 30080);
    let nodes = vec![
        node("worker-1", true, Some("aws:///us-west-2a/i-0aaaaaaaaaaaaaaaa")),
        node("worker-2", false, Some("aws:///us-west-2b/i-0bbbbbbbbbbbbbbbb")),
        node("worker-3", true, None),
    ];

    let out = targets::instance_targets(&spec, &service, &nodes).unwrap();
    let ids: Vec<(String, u16)> = out.iter().map(|t| (t.id.clone(), t.port)).collect();
    assert_eq!(ids, vec![("i-0aaaaaaaaaaaaaaaa".to_string(), 30080)]);
}

#[test]
fn control_plane_nodes_are_excluded() {
    let spec = binding_spec("instance", IntOrString::Int(80));
    let service = node_port_service(80, 30080);
    let mut control_plane = node(
        "cp-1",
        true,
        Some("aws:///us-west-2a/i-0cccccccccccccccc"),
    );
    control_plane.metadata.labels = Some(btreemap! {
        "node-role.kubernetes.io/control-plane".to_string() => String::new(),
    });

    let out = targets::instance_targets(&spec, &service, &[control_plane]).unwrap();
    assert!(out.is_empty());
}

#[test]
fn node_selector_filters_instances() {
    let mut spec = binding_spec("instance", IntOrString::Int(80));
    spec.node_selector = Some(btreemap! {
        "workload".to_string() => "edge".to_string(),
    });
    let service = node_port_service(80, 30080);

    let mut matching = node("worker-1", true, Some("aws:///us-west-2a/i-0aaaaaaaaaaaaaaaa"));
    matching.metadata.labels = Some(btreemap! {
        "workload".to_string() => "edge".to_string(),
    });
    let other = node("worker-2", true, Some("aws:///us-west-2b/i-0bbbbbbbbbbbbbbbb"));

    let out = targets::instance_targets(&spec, &service, &[matching, other]).unwrap();
    assert_eq!(out.len(), 1);
    assert!(out.iter().any(|t| t.id == "i-0aaaaaaaaaaaaaaaa"));
}

#[test]
fn missing_node_port_is_a_config_error() {
    let spec = binding_spec("instance", IntOrString::Int(80));
    let service = Service {
        metadata: ObjectMeta::default(),
        spec: Some(ServiceSpec {
            ports: Some(vec![ServicePort {
                port: 80,
                node_port: None,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    };
    let err = targets::instance_targets(&spec, &service, &[]).unwrap_err();
    assert!(matches!(err, alb_controller_core::Error::Config(_)), "{err}");
}

#[test]
fn named_service_ports_resolve_through_endpoints() {
    let spec = binding_spec("ip", IntOrString::String("http".to_string()));
    let eps = Endpoints {
        metadata: ObjectMeta::default(),
        subsets: Some(vec![EndpointSubset {
            addresses: Some(vec![EndpointAddress {
                ip: "10.0.0.1".to_string(),
                ..Default::default()
            }]),
            not_ready_addresses: None,
            ports: Some(vec![
                EndpointPort {
                    name: Some("metrics".to_string()),
                    port: 9090,
                    ..Default::default()
                },
                EndpointPort {
                    name: Some("http".to_string()),
                    port: 8080,
                    ..Default::default()
                },
            ]),
        }]),
    };

    let out = targets::ip_targets(&spec, &eps, false);
    assert_eq!(out.len(), 1);
    assert!(out.iter().any(|t| t.port == 8080));
}
