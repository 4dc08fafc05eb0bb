//! Configuration CRD merging.
//!
//! IngressClassParams and LoadBalancerConfiguration overlap with the
//! annotation surface; explicit configuration objects win over per-Ingress
//! annotations, and class-level values win over namespaced ones. Merging
//! happens on the parsed annotation record so the builder sees one settled
//! view.

use crate::annotations::{self, IngressAnnotations, ListenerOverride};
use alb_controller_core::{tags, Error, Result};
use alb_controller_k8s_api::{
    ingress_class_params::IngressClassParamsSpec,
    load_balancer_configuration::LoadBalancerConfigurationSpec,
};

/// Applies class-level defaults. Values set here apply to every Ingress of
/// the class and override whatever the object's annotations say.
pub fn apply_class_params(
    annotations: &mut IngressAnnotations,
    params: &IngressClassParamsSpec,
) -> Result<()> {
    if let Some(scheme) = &params.scheme {
        annotations.scheme = Some(scheme.parse()?);
    }
    if let Some(ip_address_type) = &params.ip_address_type {
        annotations.ip_address_type = Some(ip_address_type.parse()?);
    }
    if let Some(subnets) = &params.subnets {
        if let Some(ids) = &subnets.ids {
            annotations.subnets = Some(ids.clone());
        }
    }
    if let Some(arns) = &params.certificate_arns {
        annotations.certificate_arns = Some(arns.clone());
    }
    if let Some(ssl_policy) = &params.ssl_policy {
        annotations.ssl_policy = Some(ssl_policy.clone());
    }
    for tag in params.tags.iter().flatten() {
        if tags::is_reserved_key(&tag.key) {
            return Err(Error::config(format!(
                "IngressClassParams tag key {:?} is reserved for the controller",
                tag.key
            )));
        }
        annotations.tags.insert(tag.key.clone(), tag.value.clone());
    }
    for attribute in params.load_balancer_attributes.iter().flatten() {
        annotations
            .load_balancer_attributes
            .insert(attribute.key.clone(), attribute.value.clone());
    }
    Ok(())
}

/// Applies a referenced LoadBalancerConfiguration. Listener-level entries
/// land in the per-port override map, so `HTTPS:443` and `HTTPS:8443` each
/// carry their own SSL policy and default certificate into the builder.
pub fn apply_load_balancer_configuration(
    annotations: &mut IngressAnnotations,
    config: &LoadBalancerConfigurationSpec,
) -> Result<()> {
    if let Some(scheme) = &config.scheme {
        annotations.scheme = Some(scheme.parse()?);
    }
    if let Some(ip_address_type) = &config.ip_address_type {
        annotations.ip_address_type = Some(ip_address_type.parse()?);
    }
    if let Some(subnets) = &config.subnets {
        if let Some(ids) = &subnets.ids {
            annotations.subnets = Some(ids.clone());
        }
    }
    if let Some(groups) = &config.security_groups {
        annotations.security_groups = Some(groups.clone());
    }
    for tag in config.tags.iter().flatten() {
        if tags::is_reserved_key(&tag.key) {
            return Err(Error::config(format!(
                "LoadBalancerConfiguration tag key {:?} is reserved for the controller",
                tag.key
            )));
        }
        annotations.tags.insert(tag.key.clone(), tag.value.clone());
    }
    for attribute in config.load_balancer_attributes.iter().flatten() {
        annotations
            .load_balancer_attributes
            .insert(attribute.key.clone(), attribute.value.clone());
    }
    for listener in config.listener_configurations.iter().flatten() {
        let listen_port = annotations::parse_protocol_port(&listener.protocol_port)?;
        let previous = annotations.listener_overrides.insert(
            listen_port.port,
            ListenerOverride {
                protocol: listen_port.protocol,
                ssl_policy: listener.ssl_policy.clone(),
                default_certificate: listener.default_certificate.clone(),
                alpn_policy: listener.alpn_policy.clone(),
            },
        );
        if previous.is_some() {
            return Err(Error::config(format!(
                "LoadBalancerConfiguration names port {} more than once",
                listen_port.port
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alb_controller_core::model::load_balancer::Scheme;
    use alb_controller_k8s_api::ingress_class_params::Tag;

    #[test]
    fn class_params_override_annotations() {
        let mut annotations = IngressAnnotations {
            scheme: Some(Scheme::Internal),
            ..Default::default()
        };
        let params = IngressClassParamsSpec {
            scheme: Some("internet-facing".to_string()),
            tags: Some(vec![Tag {
                key: "team".to_string(),
                value: "edge".to_string(),
            }]),
            ..Default::default()
        };
        apply_class_params(&mut annotations, &params).unwrap();
        assert_eq!(annotations.scheme, Some(Scheme::InternetFacing));
        assert_eq!(annotations.tags["team"], "edge");
    }

    #[test]
    fn class_params_reject_reserved_tag_keys() {
        let mut annotations = IngressAnnotations::default();
        let params = IngressClassParamsSpec {
            tags: Some(vec![Tag {
                key: "elbv2.k8s.aws/cluster".to_string(),
                value: "evil".to_string(),
            }]),
            ..Default::default()
        };
        assert!(apply_class_params(&mut annotations, &params).is_err());
    }

    #[test]
    fn listener_configurations_key_overrides_by_port() {
        use alb_controller_core::model::target_group::Protocol;
        use alb_controller_k8s_api::load_balancer_configuration::ListenerConfiguration;

        let mut annotations = IngressAnnotations::default();
        let config = LoadBalancerConfigurationSpec {
            listener_configurations: Some(vec![
                ListenerConfiguration {
                    protocol_port: "HTTPS:443".to_string(),
                    default_certificate: Some("arn:default-443".to_string()),
                    ssl_policy: Some("ELBSecurityPolicy-TLS13-1-2-2021-06".to_string()),
                    alpn_policy: None,
                },
                ListenerConfiguration {
                    protocol_port: "HTTPS:8443".to_string(),
                    default_certificate: Some("arn:default-8443".to_string()),
                    ssl_policy: Some("ELBSecurityPolicy-2016-08".to_string()),
                    alpn_policy: None,
                },
            ]),
            ..Default::default()
        };
        apply_load_balancer_configuration(&mut annotations, &config).unwrap();

        // Each port keeps its own settings; neither clobbers the other, and
        // the flat annotation fields stay untouched.
        assert!(annotations.ssl_policy.is_none());
        assert!(annotations.certificate_arns.is_none());
        let on_443 = &annotations.listener_overrides[&443];
        assert_eq!(on_443.protocol, Protocol::Https);
        assert_eq!(on_443.default_certificate.as_deref(), Some("arn:default-443"));
        assert_eq!(
            on_443.ssl_policy.as_deref(),
            Some("ELBSecurityPolicy-TLS13-1-2-2021-06")
        );
        let on_8443 = &annotations.listener_overrides[&8443];
        assert_eq!(on_8443.default_certificate.as_deref(), Some("arn:default-8443"));
        assert_eq!(on_8443.ssl_policy.as_deref(), Some("ELBSecurityPolicy-2016-08"));
    }

    #[test]
    fn duplicate_listener_configuration_ports_are_rejected() {
        use alb_controller_k8s_api::load_balancer_configuration::ListenerConfiguration;

        let entry = |ssl: &str| ListenerConfiguration {
            protocol_port: "HTTPS:443".to_string(),
            default_certificate: None,
            ssl_policy: Some(ssl.to_string()),
            alpn_policy: None,
        };
        let config = LoadBalancerConfigurationSpec {
            listener_configurations: Some(vec![entry("a"), entry("b")]),
            ..Default::default()
        };
        let err = apply_load_balancer_configuration(&mut IngressAnnotations::default(), &config)
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{err}");
    }

    #[test]
    fn malformed_listener_configuration_ports_are_rejected() {
        use alb_controller_k8s_api::load_balancer_configuration::ListenerConfiguration;

        for bad in ["443", "TCP:443", "HTTPS:nope"] {
            let config = LoadBalancerConfigurationSpec {
                listener_configurations: Some(vec![ListenerConfiguration {
                    protocol_port: bad.to_string(),
                    default_certificate: None,
                    ssl_policy: None,
                    alpn_policy: None,
                }]),
                ..Default::default()
            };
            let out =
                apply_load_balancer_configuration(&mut IngressAnnotations::default(), &config);
            assert!(out.is_err(), "{bad:?}");
        }
    }
}
