use crate::{
    index::{BindingRef, SharedBindingIndex},
    targets,
};
use alb_controller_core::{
    cloud::{LoadBalancingApi, NetworkApi, TargetDescription},
    model::security_group::{IngressRule, IngressSource, SgProtocol},
    tags::TagFilter,
    Error, Result,
};
use alb_controller_k8s_api::{self as k8s, IntOrString, TargetGroupBinding};
use std::{collections::BTreeSet, sync::Arc};
use tokio::sync::mpsc::UnboundedReceiver;

const FIELD_MANAGER: &str = "elbv2.k8s.aws/binding-controller";

/// Drains the binding queue, one reconcile per dequeued key. Duplicate
/// enqueues for a key coalesce in the channel consumer because a reconcile
/// always reads the freshest index snapshot.
pub struct Controller {
    client: k8s::Client,
    elbv2: Arc<dyn LoadBalancingApi + Send + Sync>,
    ec2: Arc<dyn NetworkApi + Send + Sync>,
    cluster: String,
    index: SharedBindingIndex,
    updates: UnboundedReceiver<BindingRef>,
    endpoints_fail_open: bool,
}

impl Controller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: k8s::Client,
        elbv2: Arc<dyn LoadBalancingApi + Send + Sync>,
        ec2: Arc<dyn NetworkApi + Send + Sync>,
        cluster: String,
        index: SharedBindingIndex,
        updates: UnboundedReceiver<BindingRef>,
        endpoints_fail_open: bool,
    ) -> Self {
        Self {
            client,
            elbv2,
            ec2,
            cluster,
            index,
            updates,
            endpoints_fail_open,
        }
    }

    pub async fn process_updates(mut self) {
        while let Some(id) = self.updates.recv().await {
            if let Err(error) = self.reconcile(&id).await {
                tracing::warn!(binding = %id, %error, "Failed to reconcile TargetGroupBinding");
            }
        }
    }

    async fn reconcile(&self, id: &BindingRef) -> Result<()> {
        // Snapshot everything under one read; the reconcile itself runs
        // without the lock.
        let (binding, service, endpoints, nodes) = {
            let index = self.index.read();
            let Some(binding) = index.binding(id) else {
                tracing::debug!(binding = %id, "Binding removed before reconcile");
                return Ok(());
            };
            let service = index.service(&id.namespace, &binding.spec.service_ref.name);
            let endpoints = index.endpoints(&id.namespace, &binding.spec.service_ref.name);
            (binding, service, endpoints, index.nodes())
        };

        let desired = match binding.spec.target_type.as_deref() {
            Some("instance") => {
                let service = service.ok_or_else(|| {
                    Error::config(format!(
                        "service {} for binding {id} does not exist",
                        binding.spec.service_ref.name
                    ))
                })?;
                targets::instance_targets(&binding.spec, &service, &nodes)?
            }
            _ => endpoints
                .map(|e| targets::ip_targets(&binding.spec, &e, self.endpoints_fail_open))
                .unwrap_or_default(),
        };

        let arn = &binding.spec.target_group_arn;
        let current: BTreeSet<TargetDescription> = self
            .elbv2
            .list_targets(arn)
            .await?
            .into_iter()
            .map(|h| h.target)
            .collect();

        // Register desired\current, deregister current\desired, touch
        // nothing else. Individual target failures are logged and skipped;
        // a missing target group fails the reconcile outright.
        for target in desired.difference(&current) {
            if let Err(error) = self
                .elbv2
                .register_targets(arn, std::slice::from_ref(target))
                .await
            {
                if error.is_not_found() {
                    return Err(error);
                }
                tracing::warn!(binding = %id, target = %target.id, %error, "Failed to register target");
            }
        }
        for target in current.difference(&desired) {
            if let Err(error) = self
                .elbv2
                .deregister_targets(arn, std::slice::from_ref(target))
                .await
            {
                if error.is_not_found() {
                    return Err(error);
                }
                tracing::warn!(binding = %id, target = %target.id, %error, "Failed to deregister target");
            }
        }

        self.sync_networking(id, &binding).await;
        self.patch_status(id, &binding).await;
        Ok(())
    }

    /// Projects the binding's networking stanza onto the cluster's worker
    /// security groups: every group tagged to this cluster admits data-path
    /// traffic from the named source group on the declared ports. Rules
    /// already present (possibly shared with another binding) are left
    /// alone, and failures here never fail the target reconcile.
    async fn sync_networking(&self, id: &BindingRef, binding: &TargetGroupBinding) {
        let Some(networking) = &binding.spec.networking else {
            return;
        };

        let worker_filter = TagFilter::new().with(
            format!("kubernetes.io/cluster/{}", self.cluster),
            Vec::new(),
        );
        let worker_groups = match self.ec2.find_security_groups(&worker_filter).await {
            Ok(groups) => groups,
            Err(error) => {
                tracing::warn!(binding = %id, %error, "Failed to discover worker security groups");
                return;
            }
        };

        for rule in &networking.ingress {
            for peer in &rule.from {
                let Some(source) = &peer.security_group else {
                    continue;
                };
                for port in &rule.ports {
                    let (from_port, to_port) = match &port.port {
                        Some(IntOrString::Int(p)) => (*p as u16, *p as u16),
                        _ => (0, 65535),
                    };
                    let ingress = IngressRule {
                        protocol: SgProtocol::Tcp,
                        from_port,
                        to_port,
                        source: IngressSource::SecurityGroup(source.group_id.clone()),
                        description: Some(format!(
                            "elbv2.k8s.aws/targetGroupBinding: {}/{}",
                            id.namespace, id.name
                        )),
                    };
                    for group in &worker_groups {
                        let present = group.ingress_rules.iter().any(|existing| {
                            existing.protocol == ingress.protocol
                                && existing.from_port == ingress.from_port
                                && existing.to_port == ingress.to_port
                                && existing.source == ingress.source
                        });
                        if present {
                            continue;
                        }
                        match self
                            .ec2
                            .authorize_ingress(&group.group_id, std::slice::from_ref(&ingress))
                            .await
                        {
                            Ok(()) => {}
                            Err(error) if duplicate_rule(&error) => {}
                            Err(error) => {
                                tracing::warn!(
                                    binding = %id,
                                    group = %group.group_id,
                                    %error,
                                    "Failed to authorize data-path ingress"
                                );
                            }
                        }
                    }
                }
            }
        }
    }

    async fn patch_status(&self, id: &BindingRef, binding: &TargetGroupBinding) {
        let api: k8s::Api<TargetGroupBinding> =
            k8s::Api::namespaced(self.client.clone(), &id.namespace);
        let patch = serde_json::json!({
            "apiVersion": k8s::API_VERSION,
            "kind": "TargetGroupBinding",
            "status": {
                "observedGeneration": binding.metadata.generation,
            },
        });
        if let Err(error) = api
            .patch_status(
                &id.name,
                &k8s::PatchParams::apply(FIELD_MANAGER),
                &k8s::Patch::Merge(patch),
            )
            .await
        {
            tracing::warn!(binding = %id, %error, "Failed to patch TargetGroupBinding status");
        }
    }
}

/// EC2 rejects an already-present rule rather than upserting; another
/// binding sharing the rule is not an error.
fn duplicate_rule(err: &Error) -> bool {
    matches!(err, Error::Cloud { code, .. } if code == "InvalidPermission.Duplicate")
}
