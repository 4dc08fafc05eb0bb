#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod ingress_class_params;
pub mod load_balancer_configuration;
pub mod target_group_binding;
pub mod target_group_configuration;

pub use self::{
    ingress_class_params::IngressClassParams,
    load_balancer_configuration::LoadBalancerConfiguration,
    target_group_binding::TargetGroupBinding,
    target_group_configuration::TargetGroupConfiguration,
};
pub use k8s_openapi::{
    api::{
        self,
        core::v1::{
            Endpoints, Node, Pod, Service, ServicePort, ServiceSpec,
        },
        networking::v1::{
            HTTPIngressPath, Ingress, IngressBackend, IngressClass, IngressRule,
            IngressServiceBackend, IngressSpec, IngressStatus, IngressTLS,
        },
    },
    apimachinery::{
        self,
        pkg::{
            apis::meta::v1::{Condition, Time},
            util::intstr::IntOrString,
        },
    },
    NamespaceResourceScope,
};
pub use kube::{
    api::{Api, ListParams, ObjectMeta, Patch, PatchParams, PostParams, Resource, ResourceExt},
    error::ErrorResponse,
    Client, Error,
};

/// API group for this controller's own resources.
pub const API_GROUP: &str = "elbv2.k8s.aws";
pub const API_VERSION: &str = "elbv2.k8s.aws/v1beta1";
