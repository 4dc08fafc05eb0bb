use super::ingress_class_params::Attribute;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Namespaced target group settings for one backend service.
#[derive(Clone, Debug, Default, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "elbv2.k8s.aws",
    version = "v1beta1",
    kind = "TargetGroupConfiguration",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct TargetGroupConfigurationSpec {
    /// Name of the Service this configuration applies to.
    pub service_name: String,
    pub target_type: Option<String>,
    pub health_check: Option<HealthCheckConfiguration>,
    pub target_group_attributes: Option<Vec<Attribute>>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckConfiguration {
    pub protocol: Option<String>,
    pub path: Option<String>,
    pub port: Option<String>,
    pub interval_seconds: Option<u16>,
    pub timeout_seconds: Option<u16>,
    pub healthy_threshold_count: Option<u16>,
    pub unhealthy_threshold_count: Option<u16>,
    /// Matcher: `200`, `200,301`, or `200-399`.
    pub success_codes: Option<String>,
}
