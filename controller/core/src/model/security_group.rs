use crate::{error::Result, resource::ResourceId, stack::Stack, token::StringToken};
use ipnet::IpNet;
use std::{collections::BTreeMap, fmt};

#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum SgProtocol {
    Tcp,
    Udp,
    All,
}

impl SgProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            SgProtocol::Tcp => "tcp",
            SgProtocol::Udp => "udp",
            SgProtocol::All => "-1",
        }
    }
}

impl fmt::Display for SgProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an ingress rule admits traffic from: a CIDR block or another
/// security group. `T` is the group reference type, a token in desired specs
/// and a group id in observed state.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum IngressSource<T = StringToken> {
    Cidr(IpNet),
    SecurityGroup(T),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IngressRule<T = StringToken> {
    pub protocol: SgProtocol,
    pub from_port: u16,
    pub to_port: u16,
    pub source: IngressSource<T>,
    pub description: Option<String>,
}

impl IngressRule<StringToken> {
    pub fn token_refs(&self) -> Vec<ResourceId> {
        match &self.source {
            IngressSource::SecurityGroup(token) => token.referent().cloned().into_iter().collect(),
            IngressSource::Cidr(_) => Vec::new(),
        }
    }

    pub fn resolve(&self, stack: &Stack) -> Result<IngressRule<String>> {
        Ok(IngressRule {
            protocol: self.protocol,
            from_port: self.from_port,
            to_port: self.to_port,
            source: match &self.source {
                IngressSource::Cidr(net) => IngressSource::Cidr(*net),
                IngressSource::SecurityGroup(token) => {
                    IngressSource::SecurityGroup(stack.resolve(token)?)
                }
            },
            description: self.description.clone(),
        })
    }
}

/// Desired state of a managed security group. User-supplied (referenced)
/// groups never appear as stack resources and are never mutated.
#[derive(Clone, Debug, PartialEq)]
pub struct SecurityGroupSpec {
    pub name: String,
    pub description: String,
    pub vpc_id: String,
    pub ingress_rules: Vec<IngressRule>,
    pub tags: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SecurityGroupStatus {
    pub group_id: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ObservedSecurityGroup {
    pub group_id: String,
    pub name: String,
    pub description: String,
    pub ingress_rules: Vec<IngressRule<String>>,
    pub tags: BTreeMap<String, String>,
}
