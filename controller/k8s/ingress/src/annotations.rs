//! The typed view of an Ingress object's `alb.ingress.kubernetes.io/*`
//! annotations. Parsing never mutates the source object and fails with a
//! configuration error on anything malformed; a tainted object is skipped
//! until it is edited, so bad input must be caught here rather than deep in
//! a deploy.

use alb_controller_core::{
    model::{
        load_balancer::{IpAddressType, Scheme},
        target_group::{Protocol, TargetType},
    },
    tags,
    Error, Result,
};
use std::collections::BTreeMap;

pub const ANNOTATION_PREFIX: &str = "alb.ingress.kubernetes.io";

const KNOWN_SUFFIXES: &[&str] = &[
    "listen-ports",
    "scheme",
    "subnets",
    "security-groups",
    "certificate-arn",
    "ssl-policy",
    "backend-protocol",
    "backend-protocol-version",
    "target-type",
    "healthcheck-protocol",
    "healthcheck-path",
    "healthcheck-port",
    "healthcheck-interval-seconds",
    "healthcheck-timeout-seconds",
    "healthy-threshold-count",
    "unhealthy-threshold-count",
    "success-codes",
    "tags",
    "ip-address-type",
    "load-balancer-attributes",
    "load-balancer-configuration",
    "target-group-attributes",
    "group.name",
    "group.order",
    "wafv2-acl-arn",
    "shield-advanced-protection",
];

/// One `PROTOCOL:port` listener entry.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ListenPort {
    pub protocol: Protocol,
    pub port: u16,
}

/// Per-listener settings merged from a LoadBalancerConfiguration's
/// `listenerConfigurations` entries, keyed by port in
/// [`IngressAnnotations::listener_overrides`]. Settings here apply only to
/// the listener on that port.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ListenerOverride {
    pub protocol: Protocol,
    pub ssl_policy: Option<String>,
    pub default_certificate: Option<String>,
    pub alpn_policy: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct IngressAnnotations {
    pub listen_ports: Option<Vec<ListenPort>>,
    pub scheme: Option<Scheme>,
    pub ip_address_type: Option<IpAddressType>,
    pub subnets: Option<Vec<String>>,
    pub security_groups: Option<Vec<String>>,
    pub certificate_arns: Option<Vec<String>>,
    pub ssl_policy: Option<String>,
    pub backend_protocol: Option<Protocol>,
    pub backend_protocol_version: Option<String>,
    pub target_type: Option<TargetType>,
    pub healthcheck_protocol: Option<Protocol>,
    pub healthcheck_path: Option<String>,
    pub healthcheck_port: Option<String>,
    pub healthcheck_interval_seconds: Option<u16>,
    pub healthcheck_timeout_seconds: Option<u16>,
    pub healthy_threshold_count: Option<u16>,
    pub unhealthy_threshold_count: Option<u16>,
    pub success_codes: Option<String>,
    pub tags: BTreeMap<String, String>,
    pub load_balancer_attributes: BTreeMap<String, String>,
    /// Name of a LoadBalancerConfiguration in the Ingress's namespace.
    pub load_balancer_configuration: Option<String>,
    /// Per-port listener settings, populated by configuration CRD merging.
    pub listener_overrides: BTreeMap<u16, ListenerOverride>,
    pub target_group_attributes: BTreeMap<String, String>,
    pub group_name: Option<String>,
    pub group_order: i32,
    pub wafv2_acl_arn: Option<String>,
    pub shield_advanced_protection: Option<bool>,
}

impl IngressAnnotations {
    /// Parses the annotation map of one Ingress. With `strict`, unknown keys
    /// under the controller prefix are rejected instead of ignored.
    pub fn parse(annotations: &BTreeMap<String, String>, strict: bool) -> Result<Self> {
        let mut out = Self::default();

        for (key, value) in annotations {
            let Some(suffix) = key
                .strip_prefix(ANNOTATION_PREFIX)
                .and_then(|rest| rest.strip_prefix('/'))
            else {
                continue;
            };
            if strict && !KNOWN_SUFFIXES.contains(&suffix) {
                return Err(Error::config(format!("unknown annotation {key:?}")));
            }

            match suffix {
                "listen-ports" => out.listen_ports = Some(parse_listen_ports(value)?),
                "scheme" => out.scheme = Some(value.parse()?),
                "ip-address-type" => out.ip_address_type = Some(value.parse()?),
                "subnets" => out.subnets = Some(parse_csv(value)),
                "security-groups" => out.security_groups = Some(parse_csv(value)),
                "certificate-arn" => out.certificate_arns = Some(parse_csv(value)),
                "ssl-policy" => out.ssl_policy = Some(value.clone()),
                "backend-protocol" => out.backend_protocol = Some(value.parse()?),
                "backend-protocol-version" => {
                    out.backend_protocol_version = Some(value.clone());
                }
                "target-type" => out.target_type = Some(value.parse()?),
                "healthcheck-protocol" => out.healthcheck_protocol = Some(value.parse()?),
                "healthcheck-path" => out.healthcheck_path = Some(value.clone()),
                "healthcheck-port" => out.healthcheck_port = Some(value.clone()),
                "healthcheck-interval-seconds" => {
                    out.healthcheck_interval_seconds = Some(parse_u16(key, value)?);
                }
                "healthcheck-timeout-seconds" => {
                    out.healthcheck_timeout_seconds = Some(parse_u16(key, value)?);
                }
                "healthy-threshold-count" => {
                    out.healthy_threshold_count = Some(parse_u16(key, value)?);
                }
                "unhealthy-threshold-count" => {
                    out.unhealthy_threshold_count = Some(parse_u16(key, value)?);
                }
                "success-codes" => {
                    validate_success_codes(value)?;
                    out.success_codes = Some(value.clone());
                }
                "tags" => out.tags = parse_key_values(key, value)?,
                "load-balancer-attributes" => {
                    out.load_balancer_attributes = parse_key_values(key, value)?;
                }
                "load-balancer-configuration" => {
                    out.load_balancer_configuration = Some(value.clone());
                }
                "target-group-attributes" => {
                    out.target_group_attributes = parse_key_values(key, value)?;
                }
                "group.name" => {
                    validate_group_name(value)?;
                    out.group_name = Some(value.clone());
                }
                "group.order" => {
                    out.group_order = value.parse().map_err(|_| {
                        Error::config(format!("invalid group.order {value:?}"))
                    })?;
                    if !(-1000..=1000).contains(&out.group_order) {
                        return Err(Error::config(format!(
                            "group.order {} is outside [-1000, 1000]",
                            out.group_order
                        )));
                    }
                }
                "wafv2-acl-arn" => out.wafv2_acl_arn = Some(value.clone()),
                "shield-advanced-protection" => {
                    out.shield_advanced_protection =
                        Some(value.parse().map_err(|_| {
                            Error::config(format!("invalid boolean {value:?} for {key}"))
                        })?);
                }
                _ => {}
            }
        }

        for tag_key in out.tags.keys() {
            if tags::is_reserved_key(tag_key) {
                return Err(Error::config(format!(
                    "annotation tag key {tag_key:?} is reserved for the controller"
                )));
            }
        }

        Ok(out)
    }
}

fn parse_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_u16(key: &str, value: &str) -> Result<u16> {
    value
        .parse()
        .map_err(|_| Error::config(format!("invalid numeric value {value:?} for {key}")))
}

/// `k1=v1,k2=v2` into a map. Duplicate keys and entries without `=` are
/// rejected.
fn parse_key_values(key: &str, value: &str) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for entry in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let Some((k, v)) = entry.split_once('=') else {
            return Err(Error::config(format!(
                "malformed entry {entry:?} in {key} (expected key=value)"
            )));
        };
        if out.insert(k.trim().to_string(), v.trim().to_string()).is_some() {
            return Err(Error::config(format!("duplicate key {k:?} in {key}")));
        }
    }
    Ok(out)
}

/// Both accepted forms: the JSON form `[{"HTTP": 80}, {"HTTPS": 443}]` and
/// the `HTTP:80,HTTPS:443` shorthand.
fn parse_listen_ports(value: &str) -> Result<Vec<ListenPort>> {
    let mut out = Vec::new();
    if value.trim_start().starts_with('[') {
        let entries: Vec<BTreeMap<String, u16>> = serde_json::from_str(value)
            .map_err(|err| Error::config(format!("invalid listen-ports JSON: {err}")))?;
        for entry in entries {
            for (protocol, port) in entry {
                out.push(listen_port(&protocol, port)?);
            }
        }
    } else {
        for entry in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            out.push(parse_protocol_port(entry)?);
        }
    }
    if out.is_empty() {
        return Err(Error::config("listen-ports must name at least one port"));
    }
    Ok(out)
}

/// One `PROTOCOL:port` fragment, shared with the configuration CRDs that
/// address listeners the same way.
pub(crate) fn parse_protocol_port(entry: &str) -> Result<ListenPort> {
    let Some((protocol, port)) = entry.split_once(':') else {
        return Err(Error::config(format!(
            "malformed listener entry {entry:?} (expected PROTOCOL:port)"
        )));
    };
    let port = port
        .parse()
        .map_err(|_| Error::config(format!("invalid listener port {port:?}")))?;
    listen_port(protocol, port)
}

fn listen_port(protocol: &str, port: u16) -> Result<ListenPort> {
    let protocol = match protocol {
        "HTTP" => Protocol::Http,
        "HTTPS" => Protocol::Https,
        other => {
            return Err(Error::config(format!(
                "invalid listener protocol {other:?}: must be HTTP or HTTPS"
            )))
        }
    };
    if port == 0 {
        return Err(Error::config("listener port must be 1-65535"));
    }
    Ok(ListenPort { protocol, port })
}

/// `200`, `200,301`, or `200-399`.
fn validate_success_codes(value: &str) -> Result<()> {
    let valid_code = |code: &str| code.len() == 3 && code.chars().all(|c| c.is_ascii_digit());
    let ok = if let Some((low, high)) = value.split_once('-') {
        valid_code(low) && valid_code(high)
    } else {
        !value.is_empty() && value.split(',').all(valid_code)
    };
    if ok {
        Ok(())
    } else {
        Err(Error::config(format!("invalid success-codes {value:?}")))
    }
}

fn validate_group_name(value: &str) -> Result<()> {
    let ok = !value.is_empty()
        && value.len() <= 63
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !value.starts_with('-')
        && !value.ends_with('-');
    if ok {
        Ok(())
    } else {
        Err(Error::config(format!(
            "invalid group.name {value:?}: must be 63 or fewer lowercase alphanumerics or '-'"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    fn key(suffix: &str) -> String {
        format!("{ANNOTATION_PREFIX}/{suffix}")
    }

    #[test]
    fn parses_shorthand_listen_ports() {
        let parsed = IngressAnnotations::parse(
            &btreemap! { key("listen-ports") => "HTTP:80,HTTPS:443".to_string() },
            true,
        )
        .unwrap();
        assert_eq!(
            parsed.listen_ports.unwrap(),
            vec![
                ListenPort {
                    protocol: Protocol::Http,
                    port: 80,
                },
                ListenPort {
                    protocol: Protocol::Https,
                    port: 443,
                },
            ]
        );
    }

    #[test]
    fn parses_json_listen_ports() {
        let parsed = IngressAnnotations::parse(
            &btreemap! { key("listen-ports") => r#"[{"HTTP": 80}, {"HTTPS": 443}]"#.to_string() },
            true,
        )
        .unwrap();
        assert_eq!(parsed.listen_ports.unwrap().len(), 2);
    }

    #[test]
    fn rejects_malformed_ports() {
        for bad in ["HTTP", "HTTP:nope", "TCP:80", "HTTP:0", ""] {
            let err = IngressAnnotations::parse(
                &btreemap! { key("listen-ports") => bad.to_string() },
                true,
            )
            .unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{bad:?}: {err}");
        }
    }

    #[test]
    fn rejects_invalid_scheme() {
        let err = IngressAnnotations::parse(
            &btreemap! { key("scheme") => "public".to_string() },
            true,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{err}");
    }

    #[test]
    fn strict_mode_rejects_unknown_keys() {
        let annotations = btreemap! { key("no-such-option") => "x".to_string() };
        assert!(IngressAnnotations::parse(&annotations, true).is_err());
        assert!(IngressAnnotations::parse(&annotations, false).is_ok());
    }

    #[test]
    fn foreign_prefixes_are_ignored() {
        let parsed = IngressAnnotations::parse(
            &btreemap! { "nginx.ingress.kubernetes.io/rewrite-target".to_string() => "/".to_string() },
            true,
        )
        .unwrap();
        assert_eq!(parsed, IngressAnnotations::default());
    }

    #[test]
    fn parses_tags_and_rejects_reserved_keys() {
        let parsed = IngressAnnotations::parse(
            &btreemap! { key("tags") => "team=a,env=prod".to_string() },
            true,
        )
        .unwrap();
        assert_eq!(parsed.tags["team"], "a");
        assert_eq!(parsed.tags["env"], "prod");

        let err = IngressAnnotations::parse(
            &btreemap! { key("tags") => "elbv2.k8s.aws/cluster=evil".to_string() },
            true,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{err}");
    }

    #[test]
    fn success_codes_forms() {
        for good in ["200", "200,301", "200-399"] {
            assert!(IngressAnnotations::parse(
                &btreemap! { key("success-codes") => good.to_string() },
                true,
            )
            .is_ok());
        }
        for bad in ["2xx", "200-", "20"] {
            assert!(IngressAnnotations::parse(
                &btreemap! { key("success-codes") => bad.to_string() },
                true,
            )
            .is_err());
        }
    }

    #[test]
    fn group_order_bounds() {
        let annotations = btreemap! {
            key("group.name") => "team-a".to_string(),
            key("group.order") => "1001".to_string(),
        };
        assert!(IngressAnnotations::parse(&annotations, true).is_err());
    }

    #[test]
    fn group_name_shape() {
        for bad in ["Team-A", "-a", "a-", ""] {
            let annotations = btreemap! { key("group.name") => bad.to_string() };
            assert!(
                IngressAnnotations::parse(&annotations, true).is_err(),
                "{bad:?}"
            );
        }
    }
}
