use super::ingress_class_params::{Attribute, SubnetSelector, Tag};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Namespaced load balancer settings referenced by a routing object.
/// Overlaps with annotations; explicit configuration wins.
#[derive(Clone, Debug, Default, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "elbv2.k8s.aws",
    version = "v1beta1",
    kind = "LoadBalancerConfiguration",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerConfigurationSpec {
    pub scheme: Option<String>,
    pub ip_address_type: Option<String>,
    pub subnets: Option<SubnetSelector>,
    pub security_groups: Option<Vec<String>>,
    pub listener_configurations: Option<Vec<ListenerConfiguration>>,
    pub tags: Option<Vec<Tag>>,
    pub load_balancer_attributes: Option<Vec<Attribute>>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ListenerConfiguration {
    /// `HTTP:80` / `HTTPS:443` form.
    pub protocol_port: String,
    #[serde(rename = "defaultCertificate")]
    pub default_certificate: Option<String>,
    pub ssl_policy: Option<String>,
    pub alpn_policy: Option<String>,
}
