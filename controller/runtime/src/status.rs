//! Cluster-side outputs of a reconcile: the Ingress status hostname,
//! Kubernetes Events on the source objects, member finalizers, and the
//! TargetGroupBinding objects projected from the deployed stack.

use alb_controller_deploy::{EventVerb, ResolvedBinding};
use alb_controller_k8s_api::{
    self as k8s,
    target_group_binding::{
        NetworkingIngressRule, NetworkingPeer, NetworkingPort, SecurityGroupPeer,
        ServiceReference, TargetGroupBindingSpec, TargetGroupBindingNetworking,
    },
    Ingress, IntOrString, ObjectMeta, ResourceExt, TargetGroupBinding,
};
use anyhow::Result;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use std::collections::BTreeMap;

pub const FINALIZER: &str = "ingress.k8s.aws/resources";
const FIELD_MANAGER: &str = "alb-controller";
const STACK_LABEL: &str = "ingress.k8s.aws/stack";

pub struct StatusClient {
    client: k8s::Client,
    recorder: Recorder,
}

impl StatusClient {
    pub fn new(client: k8s::Client, hostname: &str) -> Self {
        let reporter = Reporter {
            controller: "alb-controller".to_string(),
            instance: Some(hostname.to_string()),
        };
        Self {
            recorder: Recorder::new(client.clone(), reporter),
            client,
        }
    }

    /// Writes the load balancer hostname into the Ingress status.
    pub async fn update_hostname(
        &self,
        namespace: &str,
        name: &str,
        hostname: &str,
    ) -> Result<()> {
        let api = k8s::Api::<Ingress>::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({
            "status": {
                "loadBalancer": {
                    "ingress": [{ "hostname": hostname }],
                },
            },
        });
        api.patch_status(
            name,
            &k8s::PatchParams::apply(FIELD_MANAGER),
            &k8s::Patch::Merge(patch),
        )
        .await?;
        Ok(())
    }

    pub async fn publish_event(
        &self,
        namespace: &str,
        name: &str,
        verb: EventVerb,
        note: String,
    ) {
        let (type_, reason) = match verb {
            EventVerb::Create => (EventType::Normal, "Create"),
            EventVerb::Modify => (EventType::Normal, "Modify"),
            EventVerb::Delete => (EventType::Normal, "Delete"),
        };
        self.publish(namespace, name, type_, reason, note).await;
    }

    pub async fn publish_warning(&self, namespace: &str, name: &str, note: String) {
        self.publish(namespace, name, EventType::Warning, "Warning", note)
            .await;
    }

    pub async fn publish_error(&self, namespace: &str, name: &str, note: String) {
        self.publish(namespace, name, EventType::Warning, "Error", note)
            .await;
    }

    async fn publish(
        &self,
        namespace: &str,
        name: &str,
        type_: EventType,
        reason: &str,
        note: String,
    ) {
        let reference = ObjectReference {
            api_version: Some("networking.k8s.io/v1".to_string()),
            kind: Some("Ingress".to_string()),
            namespace: Some(namespace.to_string()),
            name: Some(name.to_string()),
            ..Default::default()
        };
        let event = Event {
            type_,
            reason: reason.to_string(),
            note: Some(note),
            action: "Reconcile".to_string(),
            secondary: None,
        };
        if let Err(error) = self.recorder.publish(&event, &reference).await {
            tracing::warn!(%namespace, %name, %error, "Failed to publish event");
        }
    }

    pub async fn ensure_finalizer(&self, namespace: &str, name: &str) -> Result<()> {
        let api = k8s::Api::<Ingress>::namespaced(self.client.clone(), namespace);
        let ingress = api.get(name).await?;
        let mut finalizers = ingress.finalizers().to_vec();
        if finalizers.iter().any(|f| f == FINALIZER) {
            return Ok(());
        }
        finalizers.push(FINALIZER.to_string());
        let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
        api.patch(
            name,
            &k8s::PatchParams::apply(FIELD_MANAGER),
            &k8s::Patch::Merge(patch),
        )
        .await?;
        Ok(())
    }

    pub async fn remove_finalizer(&self, namespace: &str, name: &str) -> Result<()> {
        let api = k8s::Api::<Ingress>::namespaced(self.client.clone(), namespace);
        let ingress = match api.get(name).await {
            Ok(ingress) => ingress,
            // Already gone; nothing to release.
            Err(kube::Error::Api(response)) if response.code == 404 => return Ok(()),
            Err(error) => return Err(error.into()),
        };
        let finalizers: Vec<String> = ingress
            .finalizers()
            .iter()
            .filter(|f| *f != FINALIZER)
            .cloned()
            .collect();
        let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
        api.patch(
            name,
            &k8s::PatchParams::apply(FIELD_MANAGER),
            &k8s::Patch::Merge(patch),
        )
        .await?;
        Ok(())
    }

    /// Applies the projected TargetGroupBindings and prunes stack-labeled
    /// bindings that the deploy no longer produces.
    pub async fn apply_bindings(&self, stack: &str, bindings: &[ResolvedBinding]) -> Result<()> {
        // Label values cannot carry '/'; the stack id is flattened the same
        // way on write and on prune.
        let stack = stack.replace('/', "_");
        let stack = stack.as_str();
        for binding in bindings {
            let api =
                k8s::Api::<TargetGroupBinding>::namespaced(self.client.clone(), &binding.namespace);
            let object = to_object(stack, binding);
            api.patch(
                &binding.name,
                &k8s::PatchParams::apply(FIELD_MANAGER).force(),
                &k8s::Patch::Apply(&object),
            )
            .await?;
        }

        // Prune departed bindings by the stack label.
        let api = k8s::Api::<TargetGroupBinding>::all(self.client.clone());
        let labeled = api
            .list(&k8s::ListParams::default().labels(&format!("{STACK_LABEL}={stack}")))
            .await?;
        for existing in labeled.items {
            let name = existing.name_unchecked();
            let namespace = existing.namespace().unwrap_or_default();
            let wanted = bindings
                .iter()
                .any(|b| b.name == name && b.namespace == namespace);
            if !wanted {
                let api =
                    k8s::Api::<TargetGroupBinding>::namespaced(self.client.clone(), &namespace);
                api.delete(&name, &Default::default()).await?;
            }
        }
        Ok(())
    }
}

fn to_object(stack: &str, binding: &ResolvedBinding) -> TargetGroupBinding {
    let networking = (!binding.networking.is_empty()).then(|| TargetGroupBindingNetworking {
        ingress: binding
            .networking
            .iter()
            .map(|peer| NetworkingIngressRule {
                from: vec![NetworkingPeer {
                    security_group: Some(SecurityGroupPeer {
                        group_id: peer.security_group_id.clone(),
                    }),
                    ip_block: None,
                }],
                ports: vec![NetworkingPort {
                    protocol: Some("TCP".to_string()),
                    port: peer.port.map(|p| IntOrString::Int(i32::from(p))),
                }],
            })
            .collect(),
    });

    TargetGroupBinding {
        metadata: ObjectMeta {
            name: Some(binding.name.clone()),
            namespace: Some(binding.namespace.clone()),
            labels: Some(BTreeMap::from([(
                STACK_LABEL.to_string(),
                stack.to_string(),
            )])),
            ..Default::default()
        },
        spec: TargetGroupBindingSpec {
            target_group_arn: binding.target_group_arn.clone(),
            target_type: Some(binding.target_type.as_str().to_string()),
            service_ref: ServiceReference {
                name: binding.service.name.clone(),
                port: match &binding.service.port {
                    alb_controller_core::model::binding::ServicePort::Number(n) => {
                        IntOrString::Int(i32::from(*n))
                    }
                    alb_controller_core::model::binding::ServicePort::Name(name) => {
                        IntOrString::String(name.clone())
                    }
                },
            },
            networking,
            node_selector: None,
            ip_address_type: Some(binding.ip_address_type.as_str().to_string()),
        },
        status: None,
    }
}
