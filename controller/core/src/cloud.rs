//! The cloud contract.
//!
//! The deployer speaks to the cloud exclusively through these traits, using
//! this crate's typed records. Inputs are fully resolved, with no tokens, so an
//! implementation is a plain CRUD adapter with documented identity
//! semantics, and tests substitute in-memory fakes.

use crate::{
    error::Result,
    model::{
        certificate::{CertificateSpec, ObservedCertificate},
        listener::{Action, ObservedListener, ObservedRule, RuleCondition},
        load_balancer::{
            IpAddressType, LoadBalancerType, ObservedLoadBalancer, Scheme, SubnetMapping,
        },
        security_group::{IngressRule, ObservedSecurityGroup},
        target_group::{HealthCheck, Matcher, ObservedTargetGroup, Protocol, ProtocolVersion,
            TargetType},
    },
    tags::TagFilter,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Resolved create input for a load balancer.
#[derive(Clone, Debug, PartialEq)]
pub struct LoadBalancerInput {
    pub name: String,
    pub lb_type: LoadBalancerType,
    pub scheme: Scheme,
    pub ip_address_type: IpAddressType,
    pub subnet_mappings: Vec<SubnetMapping>,
    pub security_groups: Vec<String>,
    pub attributes: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TargetGroupInput {
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

#[derive(Clone, Debug, PartialEq)]
pub struct ListenerInput {
    pub load_balancer_arn: String,
    pub port: u16,
    pub protocol: Protocol,
    pub default_actions: Vec<Action<String>>,
    pub certificates: Vec<String>,
    pub ssl_policy: Option<String>,
    pub alpn_policy: Option<String>,
    pub tags: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RuleInput {
    pub listener_arn: String,
    pub priority: u32,
    pub conditions: Vec<RuleCondition>,
    pub actions: Vec<Action<String>>,
    pub tags: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SecurityGroupInput {
    pub name: String,
    pub description: String,
    pub vpc_id: String,
    pub ingress_rules: Vec<IngressRule<String>>,
    pub tags: BTreeMap<String, String>,
}

/// A registered or registrable target.
#[derive(Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct TargetDescription {
    /// Instance id for `instance` targets, IP address for `ip` targets.
    pub id: String,
    pub port: u16,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TargetState {
    Healthy,
    Unhealthy,
    Initial,
    Draining,
    Unused,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TargetHealth {
    pub target: TargetDescription,
    pub state: TargetState,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubnetInfo {
    pub subnet_id: String,
    pub availability_zone: String,
    pub vpc_id: String,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SubnetSelector {
    Ids(Vec<String>),
    /// Discover by the `Name` tag values plus the cluster tag check.
    NameTags(Vec<String>),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HostedZone {
    pub id: String,
    pub name: String,
    pub private: bool,
}

/// ELBv2: load balancers, target groups, listeners, rules, targets.
#[async_trait::async_trait]
pub trait LoadBalancingApi {
    async fn find_load_balancers(&self, filter: &TagFilter) -> Result<Vec<ObservedLoadBalancer>>;
    async fn create_load_balancer(&self, input: &LoadBalancerInput)
        -> Result<ObservedLoadBalancer>;
    async fn set_security_groups(&self, arn: &str, security_groups: &[String]) -> Result<()>;
    async fn set_subnets(&self, arn: &str, subnet_mappings: &[SubnetMapping]) -> Result<()>;
    async fn set_ip_address_type(&self, arn: &str, ip_address_type: IpAddressType) -> Result<()>;
    async fn modify_load_balancer_attributes(
        &self,
        arn: &str,
        attributes: &BTreeMap<String, String>,
    ) -> Result<()>;
    async fn delete_load_balancer(&self, arn: &str) -> Result<()>;

    async fn find_target_groups(&self, filter: &TagFilter) -> Result<Vec<ObservedTargetGroup>>;
    async fn create_target_group(&self, input: &TargetGroupInput) -> Result<ObservedTargetGroup>;
    async fn modify_target_group(
        &self,
        arn: &str,
        health_check: &HealthCheck,
        matcher: Option<&Matcher>,
    ) -> Result<()>;
    async fn modify_target_group_attributes(
        &self,
        arn: &str,
        attributes: &BTreeMap<String, String>,
    ) -> Result<()>;
    async fn delete_target_group(&self, arn: &str) -> Result<()>;
    async fn register_targets(&self, arn: &str, targets: &[TargetDescription]) -> Result<()>;
    async fn deregister_targets(&self, arn: &str, targets: &[TargetDescription]) -> Result<()>;
    async fn list_targets(&self, arn: &str) -> Result<Vec<TargetHealth>>;

    async fn describe_listeners(&self, load_balancer_arn: &str) -> Result<Vec<ObservedListener>>;
    async fn create_listener(&self, input: &ListenerInput) -> Result<ObservedListener>;
    async fn modify_listener(&self, arn: &str, input: &ListenerInput) -> Result<()>;
    async fn delete_listener(&self, arn: &str) -> Result<()>;

    async fn describe_rules(&self, listener_arn: &str) -> Result<Vec<ObservedRule>>;
    async fn create_rule(&self, input: &RuleInput) -> Result<ObservedRule>;
    async fn modify_rule(
        &self,
        arn: &str,
        conditions: &[RuleCondition],
        actions: &[Action<String>],
    ) -> Result<()>;
    async fn delete_rule(&self, arn: &str) -> Result<()>;

    async fn add_tags(&self, arn: &str, tags: &BTreeMap<String, String>) -> Result<()>;
    async fn remove_tags(&self, arn: &str, keys: &[String]) -> Result<()>;
}

/// EC2: subnets and security groups.
#[async_trait::async_trait]
pub trait NetworkApi {
    async fn describe_subnets(&self, selector: &SubnetSelector) -> Result<Vec<SubnetInfo>>;
    async fn find_security_groups(&self, filter: &TagFilter)
        -> Result<Vec<ObservedSecurityGroup>>;
    async fn describe_security_groups(
        &self,
        group_ids: &[String],
    ) -> Result<Vec<ObservedSecurityGroup>>;
    async fn create_security_group(&self, input: &SecurityGroupInput) -> Result<String>;
    async fn authorize_ingress(&self, group_id: &str, rules: &[IngressRule<String>])
        -> Result<()>;
    async fn revoke_ingress(&self, group_id: &str, rules: &[IngressRule<String>]) -> Result<()>;
    async fn delete_security_group(&self, group_id: &str) -> Result<()>;
}

/// ACM: certificate request, inspection, and deletion.
#[async_trait::async_trait]
pub trait CertificatesApi {
    /// Lists certificates whose tags match the filter. Implementations may
    /// serve tag sets from an expiring cache.
    async fn find_certificates(&self, filter: &TagFilter) -> Result<Vec<ObservedCertificate>>;
    async fn describe_certificate(&self, arn: &str) -> Result<ObservedCertificate>;
    async fn request_certificate(
        &self,
        spec: &CertificateSpec,
        tags: &BTreeMap<String, String>,
    ) -> Result<String>;
    async fn delete_certificate(&self, arn: &str) -> Result<()>;
}

/// Route53: hosted-zone lookup and record changes.
#[async_trait::async_trait]
pub trait DnsApi {
    /// The most specific public hosted zone enclosing `domain`, if any.
    async fn find_hosted_zone(&self, domain: &str) -> Result<Option<HostedZone>>;
    async fn upsert_record(
        &self,
        zone_id: &str,
        name: &str,
        record_type: &str,
        value: &str,
        ttl: i64,
    ) -> Result<()>;
    async fn delete_record(
        &self,
        zone_id: &str,
        name: &str,
        record_type: &str,
        value: &str,
        ttl: i64,
    ) -> Result<()>;
}

/// The bundle of cloud endpoints a deploy needs.
#[derive(Clone)]
pub struct Cloud {
    pub elbv2: Arc<dyn LoadBalancingApi + Send + Sync>,
    pub ec2: Arc<dyn NetworkApi + Send + Sync>,
    pub acm: Arc<dyn CertificatesApi + Send + Sync>,
    pub dns: Arc<dyn DnsApi + Send + Sync>,
}
