use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Binds an AWS target group to a Kubernetes Service. The binding
/// reconciler registers and deregisters targets so the target group tracks
/// the service's live endpoints.
#[derive(Clone, Debug, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "elbv2.k8s.aws",
    version = "v1beta1",
    kind = "TargetGroupBinding",
    status = "TargetGroupBindingStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct TargetGroupBindingSpec {
    #[serde(rename = "targetGroupARN")]
    pub target_group_arn: String,
    /// `instance` or `ip`; defaulted from controller configuration when
    /// absent.
    pub target_type: Option<String>,
    pub service_ref: ServiceReference,
    pub networking: Option<TargetGroupBindingNetworking>,
    pub node_selector: Option<BTreeMap<String, String>>,
    pub ip_address_type: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceReference {
    pub name: String,
    pub port: IntOrString,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TargetGroupBindingNetworking {
    pub ingress: Vec<NetworkingIngressRule>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetworkingIngressRule {
    pub from: Vec<NetworkingPeer>,
    pub ports: Vec<NetworkingPort>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetworkingPeer {
    pub security_group: Option<SecurityGroupPeer>,
    pub ip_block: Option<IpBlockPeer>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroupPeer {
    #[serde(rename = "groupID")]
    pub group_id: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IpBlockPeer {
    pub cidr: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetworkingPort {
    /// `TCP` or `UDP`; `TCP` when absent.
    pub protocol: Option<String>,
    /// A specific target port; every target port when absent.
    pub port: Option<IntOrString>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TargetGroupBindingStatus {
    pub observed_generation: Option<i64>,
}
