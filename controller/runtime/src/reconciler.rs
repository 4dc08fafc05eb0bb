use crate::{
    metrics::ControllerMetrics,
    queue::WorkQueue,
    status::StatusClient,
};
use ahash::AHashMap as HashMap;
use alb_controller_core::{
    cloud::{Cloud, SubnetSelector},
    model::load_balancer::SubnetMapping,
    tags::TagProvider,
    Error, ResourceKind, ResourceSpec, Stack,
};
use alb_controller_deploy::{DeployConfig, DeployReport, StackDeployer};
use alb_controller_k8s_ingress::{
    build_stack, config as ingress_config, BuildContext, BuildDefaults, GroupKey,
    IngressGroupMember, SharedGroupIndex,
};
use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;

const NOT_LEADER_RETRY: Duration = Duration::from_secs(15);
const BACKOFF_BASE: Duration = Duration::from_secs(2);
const BACKOFF_CEILING: Duration = Duration::from_secs(300);

/// Reconciles ingress groups dequeued from the shared work queue: parse is
/// already done by the index; this drives build, deploy, and the
/// cluster-side outputs.
pub struct GroupReconciler {
    pub cloud: Cloud,
    pub tags: TagProvider,
    pub status: StatusClient,
    pub groups: SharedGroupIndex,
    pub defaults: BuildDefaults,
    pub deploy_config: DeployConfig,
    pub metrics: ControllerMetrics,
    pub queue: WorkQueue<GroupKey>,
    pub claims: watch::Receiver<Arc<kubert::lease::Claim>>,
    pub hostname: String,
    pub sync_period: Duration,
    pub default_subnets: Vec<String>,
    pub attempts: Mutex<HashMap<GroupKey, u32>>,
}

impl GroupReconciler {
    /// Runs `workers` concurrent dequeue loops. Per-key serialization comes
    /// from the queue; a panicking reconcile kills only its own task.
    pub async fn run(self: Arc<Self>, workers: usize) {
        let tasks: Vec<_> = (0..workers)
            .map(|worker| {
                let this = self.clone();
                tokio::spawn(async move {
                    tracing::debug!(worker, "Reconcile worker started");
                    this.worker().await;
                })
            })
            .collect();
        for task in tasks {
            let _ = task.await;
        }
    }

    async fn worker(self: &Arc<Self>) {
        loop {
            let key = self.queue.next().await;
            let this = self.clone();
            let task_key = key.clone();
            let outcome = tokio::spawn(async move {
                let result = this.reconcile(&task_key).await;
                if let Err(Error::Fatal(message)) = &result {
                    // A violated invariant panics this object's reconciler
                    // only; the join below confines it.
                    panic!("fatal reconcile error for {task_key}: {message}");
                }
                result
            })
            .await;
            self.queue.done(&key);

            match outcome {
                Err(join_error) => {
                    tracing::error!(group = %key, %join_error, "Reconcile panicked");
                }
                Ok(Ok(())) => {
                    self.attempts.lock().remove(&key);
                    self.metrics.observe_reconcile("ingress");
                    // Periodic resync guards against drift the watches
                    // cannot see (out-of-band cloud edits).
                    self.schedule(key, self.sync_period);
                }
                Ok(Err(Error::Unfulfilled { resource, field })) => {
                    tracing::debug!(group = %key, %resource, %field, "Token unfulfilled; requeueing");
                    self.queue.enqueue(key);
                }
                Ok(Err(Error::Requeue)) => self.queue.enqueue(key),
                Ok(Err(Error::RequeueAfter(delay))) => self.schedule(key, delay),
                Ok(Err(Error::Config(message))) => {
                    // Warning events are already on the source objects; the
                    // group stays parked until one of its members changes.
                    tracing::info!(group = %key, %message, "Invalid configuration");
                }
                Ok(Err(error)) => {
                    let attempt = {
                        let mut attempts = self.attempts.lock();
                        let attempt = attempts.entry(key.clone()).or_insert(0);
                        *attempt += 1;
                        *attempt
                    };
                    let delay = backoff(attempt);
                    tracing::warn!(group = %key, %error, attempt, ?delay, "Reconcile failed; backing off");
                    self.schedule(key, delay);
                }
            }
        }
    }

    fn schedule(&self, key: GroupKey, delay: Duration) {
        let queue = self.queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.enqueue(key);
        });
    }

    async fn reconcile(&self, key: &GroupKey) -> Result<(), Error> {
        // Only the lease holder mutates cloud or cluster state.
        if !self.claims.borrow().is_current_for(&self.hostname) {
            return Err(Error::RequeueAfter(NOT_LEADER_RETRY));
        }

        let (mut members, invalid, services, class_params, tg_configs) = {
            let index = self.groups.read();
            let members = index.members_of(key);
            (
                members.valid,
                members.invalid,
                index.services_snapshot(),
                index.class_params(),
                index.target_group_configurations(),
            )
        };
        for bad in &invalid {
            self.status
                .publish_warning(&bad.namespace, &bad.name, bad.message.clone())
                .await;
        }

        // Settle the configuration CRDs into each member's annotation view
        // before anything else reads it.
        for member in members.iter_mut().filter(|m| !m.deleting) {
            if let Err(error) = self.apply_configuration(member).await {
                if let Error::Config(message) = &error {
                    self.status
                        .publish_warning(&member.namespace, &member.name, message.clone())
                        .await;
                }
                return Err(error);
            }
            if let Some(params) = &class_params {
                if let Err(error) =
                    ingress_config::apply_class_params(&mut member.annotations, params)
                {
                    if let Error::Config(message) = &error {
                        self.status
                            .publish_warning(&member.namespace, &member.name, message.clone())
                            .await;
                    }
                    return Err(error);
                }
            }
        }

        let live: Vec<&IngressGroupMember> = members.iter().filter(|m| !m.deleting).collect();

        let mut stack = if live.is_empty() {
            // Nothing desired: deploying the empty stack tears down every
            // owned cloud resource.
            Stack::new(key.stack_id())
        } else {
            let (subnets, vpc_id) = self.resolve_subnets(&live).await?;
            let ctx = BuildContext {
                cluster: self.tags.cluster(),
                tags: &self.tags,
                vpc_id,
                subnets,
                services: &services,
                target_group_configs: &tg_configs,
                defaults: &self.defaults,
            };
            match build_stack(&ctx, key, &members) {
                Ok(stack) => stack,
                Err(error) => {
                    if let Error::Config(message) = &error {
                        for member in &live {
                            self.status
                                .publish_warning(&member.namespace, &member.name, message.clone())
                                .await;
                        }
                    }
                    return Err(error);
                }
            }
        };

        let deployer = StackDeployer {
            cloud: &self.cloud,
            tags: &self.tags,
            config: &self.deploy_config,
        };
        let report = match deployer.deploy(&mut stack).await {
            Ok(report) => report,
            Err(deploy_error) => {
                self.metrics.observe_error("ingress", &deploy_error);
                let error = deploy_error.into_inner();
                for member in &live {
                    self.status
                        .publish_error(&member.namespace, &member.name, error.to_string())
                        .await;
                }
                return Err(error);
            }
        };

        self.apply_outputs(key, &members, &stack, &report).await;
        Ok(())
    }

    /// Resolves and merges the member's referenced LoadBalancerConfiguration,
    /// if any. A dangling reference is a configuration error.
    async fn apply_configuration(&self, member: &mut IngressGroupMember) -> Result<(), Error> {
        let Some(name) = member.annotations.load_balancer_configuration.clone() else {
            return Ok(());
        };
        let config = self
            .groups
            .read()
            .load_balancer_configuration(&member.namespace, &name);
        match config {
            Some(config) => {
                ingress_config::apply_load_balancer_configuration(&mut member.annotations, &config)
            }
            None => Err(Error::config(format!(
                "LoadBalancerConfiguration {}/{name} does not exist",
                member.namespace
            ))),
        }
    }

    /// Cluster-side outputs never fail the reconcile; each is retried by
    /// the periodic resync.
    async fn apply_outputs(
        &self,
        key: &GroupKey,
        members: &[IngressGroupMember],
        stack: &Stack,
        report: &DeployReport,
    ) {
        let stack_name = key.stack_id().to_string();
        if let Err(error) = self.status.apply_bindings(&stack_name, &report.bindings).await {
            tracing::warn!(group = %key, %error, "Failed to apply TargetGroupBindings");
        }

        for member in members {
            if member.deleting {
                // The deploy above already pruned this member's share of the
                // stack; release it.
                if let Err(error) = self
                    .status
                    .remove_finalizer(&member.namespace, &member.name)
                    .await
                {
                    tracing::warn!(group = %key, %error, "Failed to remove finalizer");
                }
                continue;
            }

            if let Err(error) = self
                .status
                .ensure_finalizer(&member.namespace, &member.name)
                .await
            {
                tracing::warn!(group = %key, %error, "Failed to add finalizer");
            }
            if let Some(hostname) = &report.load_balancer_dns {
                if let Err(error) = self
                    .status
                    .update_hostname(&member.namespace, &member.name, hostname)
                    .await
                {
                    tracing::warn!(group = %key, %error, "Failed to update Ingress status");
                }
            }
            for event in &report.events {
                self.status
                    .publish_event(&member.namespace, &member.name, event.verb, event.message.clone())
                    .await;
            }
        }

        let lb_name = stack
            .resources_of(ResourceKind::LoadBalancer)
            .next()
            .and_then(|id| match stack.spec(id) {
                Some(ResourceSpec::LoadBalancer(lb)) => Some(lb.name.clone()),
                _ => None,
            });
        if let Some(name) = lb_name {
            self.metrics
                .set_managed_load_balancer(&stack_name, &name, true);
        }
    }

    async fn resolve_subnets(
        &self,
        live: &[&IngressGroupMember],
    ) -> Result<(Vec<SubnetMapping>, String), Error> {
        let mut configured: Option<Vec<String>> = None;
        for member in live {
            if let Some(subnets) = &member.annotations.subnets {
                match &configured {
                    Some(existing) if existing != subnets => {
                        return Err(Error::config("members of the group disagree on subnets"));
                    }
                    _ => configured = Some(subnets.clone()),
                }
            }
        }
        let configured = configured.unwrap_or_else(|| self.default_subnets.clone());
        if configured.is_empty() {
            return Err(Error::config(
                "no subnets: set the subnets annotation or --default-subnets",
            ));
        }

        let selector = if configured.iter().all(|s| s.starts_with("subnet-")) {
            SubnetSelector::Ids(configured)
        } else {
            SubnetSelector::NameTags(configured)
        };
        let mut infos = self.cloud.ec2.describe_subnets(&selector).await?;
        infos.sort_by(|a, b| a.availability_zone.cmp(&b.availability_zone));
        if infos.len() < 2 {
            return Err(Error::config(
                "a load balancer needs at least two subnets in distinct availability zones",
            ));
        }
        let vpc_id = infos[0].vpc_id.clone();
        let mappings = infos
            .into_iter()
            .map(|info| SubnetMapping::id(info.subnet_id))
            .collect();
        Ok((mappings, vpc_id))
    }
}

fn backoff(attempt: u32) -> Duration {
    let exp = attempt.min(8);
    BACKOFF_CEILING.min(BACKOFF_BASE * 2u32.saturating_pow(exp))
}
