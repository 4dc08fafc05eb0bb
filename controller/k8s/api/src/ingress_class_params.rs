use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Cluster-scoped defaults attached to an IngressClass. Values here apply to
/// every Ingress of the class and win over per-Ingress annotations.
#[derive(Clone, Debug, Default, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "elbv2.k8s.aws",
    version = "v1beta1",
    kind = "IngressClassParams"
)]
#[serde(rename_all = "camelCase")]
pub struct IngressClassParamsSpec {
    pub group: Option<IngressGroup>,
    pub scheme: Option<String>,
    pub ip_address_type: Option<String>,
    pub subnets: Option<SubnetSelector>,
    #[serde(rename = "certificateARNs")]
    pub certificate_arns: Option<Vec<String>>,
    pub ssl_policy: Option<String>,
    pub tags: Option<Vec<Tag>>,
    pub load_balancer_attributes: Option<Vec<Attribute>>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngressGroup {
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubnetSelector {
    pub ids: Option<Vec<String>>,
    pub tags: Option<std::collections::BTreeMap<String, Vec<String>>>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub key: String,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Attribute {
    pub key: String,
    pub value: String,
}
