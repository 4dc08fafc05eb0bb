use super::naming;
use crate::{error::Error, stack::StackId};
use std::{collections::BTreeMap, fmt, str::FromStr};

#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum Protocol {
    Http,
    Https,
    Tcp,
    Tls,
    Udp,
    TcpUdp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "HTTP",
            Protocol::Https => "HTTPS",
            Protocol::Tcp => "TCP",
            Protocol::Tls => "TLS",
            Protocol::Udp => "UDP",
            Protocol::TcpUdp => "TCP_UDP",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HTTP" => Ok(Protocol::Http),
            "HTTPS" => Ok(Protocol::Https),
            "TCP" => Ok(Protocol::Tcp),
            "TLS" => Ok(Protocol::Tls),
            "UDP" => Ok(Protocol::Udp),
            "TCP_UDP" => Ok(Protocol::TcpUdp),
            other => Err(Error::config(format!("invalid protocol {other:?}"))),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum ProtocolVersion {
    Http1,
    Http2,
    Grpc,
}

impl ProtocolVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolVersion::Http1 => "HTTP1",
            ProtocolVersion::Http2 => "HTTP2",
            ProtocolVersion::Grpc => "GRPC",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum TargetType {
    Instance,
    Ip,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Instance => "instance",
            TargetType::Ip => "ip",
        }
    }
}

impl FromStr for TargetType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "instance" => Ok(TargetType::Instance),
            "ip" => Ok(TargetType::Ip),
            other => Err(Error::config(format!(
                "invalid target-type {other:?}: must be \"instance\" or \"ip\""
            ))),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HealthCheckPort {
    TrafficPort,
    Number(u16),
}

impl fmt::Display for HealthCheckPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthCheckPort::TrafficPort => f.write_str("traffic-port"),
            HealthCheckPort::Number(port) => write!(f, "{port}"),
        }
    }
}

/// Health check settings are modifiable in place; none of them participate
/// in target group identity.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HealthCheck {
    pub protocol: Protocol,
    pub path: Option<String>,
    pub port: HealthCheckPort,
    pub interval_seconds: u16,
    pub timeout_seconds: u16,
    pub healthy_threshold: u16,
    pub unhealthy_threshold: u16,
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            protocol: Protocol::Http,
            path: Some("/".to_string()),
            port: HealthCheckPort::TrafficPort,
            interval_seconds: 15,
            timeout_seconds: 5,
            healthy_threshold: 2,
            unhealthy_threshold: 2,
        }
    }
}

/// HTTP codes counted as healthy: a single code, a comma list, or a range
/// (`200`, `200,301`, `200-399`).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Matcher {
    pub http_code: String,
}

/// Desired state of a target group. Identity is the deterministic [`name`];
/// port, protocol, and target type changes surface as a new name, never as a
/// mutation.
#[derive(Clone, Debug, PartialEq)]
pub struct TargetGroupSpec {
    pub name: String,
    pub protocol: Protocol,
    pub port: u16,
    pub protocol_version: Option<ProtocolVersion>,
    pub target_type: TargetType,
    pub health_check: HealthCheck,
    pub matcher: Option<Matcher>,
    pub attributes: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TargetGroupStatus {
    pub arn: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ObservedTargetGroup {
    pub arn: String,
    pub name: String,
    pub protocol: Protocol,
    pub port: u16,
    pub protocol_version: Option<ProtocolVersion>,
    pub target_type: TargetType,
    pub health_check: HealthCheck,
    pub matcher: Option<Matcher>,
    pub attributes: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
}

pub fn needs_replacement(desired: &TargetGroupSpec, actual: &ObservedTargetGroup) -> bool {
    desired.port != actual.port
        || desired.protocol != actual.protocol
        || desired.target_type != actual.target_type
}

/// `<cluster:12>-<md5:19>`, 32 characters. The hash covers every
/// identity-bearing input, so a port or protocol change yields a new name
/// and forces replacement.
pub fn name(
    cluster: &str,
    stack: &StackId,
    service: &str,
    service_port: &str,
    port: u16,
    protocol: Protocol,
) -> String {
    let port = port.to_string();
    let hash = naming::hashed_suffix(
        &[
            cluster,
            &stack.to_string(),
            service,
            service_port,
            &port,
            protocol.as_str(),
        ],
        19,
    );
    format!("{:.12}-{hash}", naming::sanitize_prefix(cluster))
}
