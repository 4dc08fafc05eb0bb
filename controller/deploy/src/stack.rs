use crate::{
    certificate, listener, load_balancer, rule, security_group, target_group, wrap, DeployError,
};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use alb_controller_aws::PollSettings;
use alb_controller_core::{
    cloud::Cloud,
    model::{
        binding::ServiceRef,
        listener::{ObservedListener, ObservedRule},
        load_balancer::{IpAddressType, ObservedLoadBalancer},
        security_group::ObservedSecurityGroup,
        target_group::{ObservedTargetGroup, TargetType},
    },
    partition,
    tags::{TagProvider, TagFilter},
    Error, ResourceId, ResourceKind, ResourceSpec, ResourceStatus, Result, Stack,
};
use std::{collections::BTreeMap, time::Duration};

/// Ceilings and cadences for the deploy's bounded waits.
#[derive(Clone, Debug)]
pub struct DeployConfig {
    /// How long to wait for a requested certificate to reach ISSUED.
    pub validate_wait: Duration,
    /// Poll cadence while waiting for ISSUED.
    pub issued_poll_interval: Duration,
    /// A certificate still pending past this window is stale and replaced.
    pub reissue_wait: chrono::Duration,
    /// Poll bounds while ACM populates validation records.
    pub record_poll: PollSettings,
    /// Retry bounds for deletions rejected with in-use.
    pub delete_poll: PollSettings,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            validate_wait: Duration::from_secs(300),
            issued_poll_interval: Duration::from_secs(5),
            reissue_wait: chrono::Duration::minutes(15),
            record_poll: PollSettings::new(Duration::from_secs(5), Duration::from_secs(30)),
            delete_poll: PollSettings::new(Duration::from_secs(5), Duration::from_secs(30)),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EventVerb {
    Create,
    Modify,
    Delete,
}

#[derive(Clone, Debug)]
pub struct DeployEvent {
    pub verb: EventVerb,
    pub message: String,
}

/// A TargetGroupBinding with every token resolved, ready for the runtime to
/// apply as a cluster object.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedBinding {
    /// Object name; the target group's name, which is already DNS-safe.
    pub name: String,
    pub namespace: String,
    pub target_group_arn: String,
    pub target_type: TargetType,
    pub service: ServiceRef,
    pub networking: Vec<ResolvedPeer>,
    pub ip_address_type: IpAddressType,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedPeer {
    pub security_group_id: String,
    pub port: Option<u16>,
}

#[derive(Default)]
pub struct DeployReport {
    pub created: usize,
    pub modified: usize,
    pub deleted: usize,
    pub load_balancer_dns: Option<String>,
    pub events: Vec<DeployEvent>,
    pub bindings: Vec<ResolvedBinding>,
}

impl DeployReport {
    pub fn is_steady(&self) -> bool {
        self.created == 0 && self.modified == 0 && self.deleted == 0
    }

    pub(crate) fn record(&mut self, verb: EventVerb, message: String) {
        match verb {
            EventVerb::Create => self.created += 1,
            EventVerb::Modify => self.modified += 1,
            EventVerb::Delete => self.deleted += 1,
        }
        self.events.push(DeployEvent { verb, message });
    }
}

/// Listener and rule actual state, fetched lazily per load balancer and
/// explicitly stripped after a cascading load balancer recreate.
#[derive(Default)]
pub(crate) struct ListenerState {
    pub listeners: HashMap<String, Vec<ObservedListener>>,
    pub kept_listeners: HashSet<String>,
    pub rules: HashMap<String, Vec<ObservedRule>>,
    pub kept_rules: HashSet<String>,
}

impl ListenerState {
    /// After a delete+recreate of the load balancer, AWS cascaded the
    /// deletion of its listeners and rules; the discovered state is void and
    /// must not drive modifies or deletes in this pass.
    pub fn strip(&mut self) {
        self.listeners.clear();
        self.rules.clear();
        self.kept_listeners.clear();
        self.kept_rules.clear();
    }
}

pub struct StackDeployer<'a> {
    pub cloud: &'a Cloud,
    pub tags: &'a TagProvider,
    pub config: &'a DeployConfig,
}

impl StackDeployer<'_> {
    /// Runs one reconcile of the stack against the cloud. On return every
    /// resource in the stack has a recorded status, and the report carries
    /// the mutation set (empty on a steady state).
    pub async fn deploy(&self, stack: &mut Stack) -> Result<DeployReport, DeployError> {
        let stack_id = stack.id().clone();
        let mut report = DeployReport::default();

        tracing::debug!(stack = %stack_id, resources = stack.len(), "Deploying stack");

        // Tag-based discovery of owned actual state, per kind, querying the
        // current and legacy tag generations.
        let filters = [
            self.tags.stack_filter(&stack_id),
            self.tags.stack_filter_legacy(&stack_id),
        ];
        let security_groups = self
            .discover_security_groups(&filters)
            .await
            .map_err(wrap("SecurityGroup"))?;
        let target_groups = self
            .discover_target_groups(&filters)
            .await
            .map_err(wrap("TargetGroup"))?;
        let load_balancers = self
            .discover_load_balancers(&filters)
            .await
            .map_err(wrap("LoadBalancer"))?;

        // Certificates synthesize ahead of the walk so listeners can bind
        // issued ARNs; their deletions wait until listeners have moved off.
        let pending_certificates = certificate::synthesize(self, stack, &mut report)
            .await
            .map_err(wrap("Certificate"))?;

        // Partition each kind by the resource-id tag.
        let mut sg_part = keyed_partition(stack, ResourceKind::SecurityGroup, security_groups, |a| {
            resource_id(&a.tags)
        }, |a| a.group_id.clone());
        let mut tg_part = keyed_partition(stack, ResourceKind::TargetGroup, target_groups, |a| {
            resource_id(&a.tags)
        }, |a| a.arn.clone());
        let mut lb_part = keyed_partition(stack, ResourceKind::LoadBalancer, load_balancers, |a| {
            resource_id(&a.tags)
        }, |a| a.arn.clone());

        let order = stack
            .topological_order()
            .map_err(wrap("Stack"))?;
        let mut state = ListenerState::default();

        for id in order {
            match id.kind {
                ResourceKind::SecurityGroup => {
                    security_group::sync_one(self, stack, &id, &mut sg_part.matched, &mut report)
                        .await
                        .map_err(wrap("SecurityGroup"))?;
                }
                // Synthesized above.
                ResourceKind::Certificate => {}
                ResourceKind::TargetGroup => {
                    target_group::sync_one(self, stack, &id, &mut tg_part.matched, &mut report)
                        .await
                        .map_err(wrap("TargetGroup"))?;
                }
                ResourceKind::LoadBalancer => {
                    load_balancer::sync_one(
                        self,
                        stack,
                        &id,
                        &mut lb_part.matched,
                        &mut state,
                        &mut report,
                    )
                    .await
                    .map_err(wrap("LoadBalancer"))?;
                }
                ResourceKind::Listener => {
                    listener::sync_one(self, stack, &id, &mut state, &mut report)
                        .await
                        .map_err(wrap("Listener"))?;
                }
                ResourceKind::ListenerRule => {
                    rule::sync_one(self, stack, &id, &mut state, &mut report)
                        .await
                        .map_err(wrap("ListenerRule"))?;
                }
                ResourceKind::TargetGroupBinding => {
                    self.resolve_binding(stack, &id, &mut report)
                        .map_err(wrap("TargetGroupBinding"))?;
                }
            }
        }

        // A load balancer with no desired listeners never had its listener
        // state fetched; fetch it so stale listeners are still swept.
        let lb_ids: Vec<ResourceId> = stack
            .resources_of(ResourceKind::LoadBalancer)
            .cloned()
            .collect();
        for id in lb_ids {
            let Some(arn) = stack
                .status(&id)
                .and_then(|s| s.field(alb_controller_core::StatusField::Arn))
                .map(str::to_string)
            else {
                continue;
            };
            if !state.listeners.contains_key(&arn) {
                let listeners = self
                    .cloud
                    .elbv2
                    .describe_listeners(&arn)
                    .await
                    .map_err(wrap("Listener"))?;
                state.listeners.insert(arn, listeners);
            }
        }

        // Deletions, reverse dependency order: rules, listeners, load
        // balancers, target groups, certificates, security groups.
        rule::delete_unmatched(self, &mut state, &mut report)
            .await
            .map_err(wrap("ListenerRule"))?;
        listener::delete_unmatched(self, &mut state, &mut report)
            .await
            .map_err(wrap("Listener"))?;
        for lb in lb_part.into_deletions() {
            self.cloud
                .elbv2
                .delete_load_balancer(&lb.arn)
                .await
                .map_err(wrap("LoadBalancer"))?;
            report.record(EventVerb::Delete, format!("deleted load balancer {}", lb.name));
        }
        for tg in tg_part.into_deletions() {
            target_group::delete(self, &tg, &mut report)
                .await
                .map_err(wrap("TargetGroup"))?;
        }
        certificate::post_synthesize(self, pending_certificates, &mut report)
            .await
            .map_err(wrap("Certificate"))?;
        for sg in sg_part.into_deletions() {
            security_group::delete(self, &sg, &mut report)
                .await
                .map_err(wrap("SecurityGroup"))?;
        }

        Ok(report)
    }

    async fn discover_load_balancers(
        &self,
        filters: &[TagFilter; 2],
    ) -> Result<Vec<ObservedLoadBalancer>> {
        let mut out: Vec<ObservedLoadBalancer> = Vec::new();
        for filter in filters {
            for lb in self.cloud.elbv2.find_load_balancers(filter).await? {
                if !out.iter().any(|existing| existing.arn == lb.arn) {
                    out.push(lb);
                }
            }
        }
        Ok(out)
    }

    async fn discover_target_groups(
        &self,
        filters: &[TagFilter; 2],
    ) -> Result<Vec<ObservedTargetGroup>> {
        let mut out: Vec<ObservedTargetGroup> = Vec::new();
        for filter in filters {
            for tg in self.cloud.elbv2.find_target_groups(filter).await? {
                if !out.iter().any(|existing| existing.arn == tg.arn) {
                    out.push(tg);
                }
            }
        }
        Ok(out)
    }

    async fn discover_security_groups(
        &self,
        filters: &[TagFilter; 2],
    ) -> Result<Vec<ObservedSecurityGroup>> {
        let mut out: Vec<ObservedSecurityGroup> = Vec::new();
        for filter in filters {
            for sg in self.cloud.ec2.find_security_groups(filter).await? {
                if !out.iter().any(|existing| existing.group_id == sg.group_id) {
                    out.push(sg);
                }
            }
        }
        Ok(out)
    }

    fn resolve_binding(
        &self,
        stack: &mut Stack,
        id: &ResourceId,
        report: &mut DeployReport,
    ) -> Result<()> {
        let Some(ResourceSpec::TargetGroupBinding(spec)) = stack.spec(id).cloned() else {
            return Err(Error::fatal(format!("{id} is not a TargetGroupBinding")));
        };

        // Name the cluster object after its target group.
        let name = spec
            .target_group_arn
            .referent()
            .and_then(|tg_id| match stack.spec(tg_id) {
                Some(ResourceSpec::TargetGroup(tg)) => Some(tg.name.clone()),
                _ => None,
            })
            .unwrap_or_else(|| id.name.replace(['/', ':'], "-"));

        let target_group_arn = stack.resolve(&spec.target_group_arn)?;
        let networking = spec
            .networking
            .iter()
            .map(|peer| {
                Ok(ResolvedPeer {
                    security_group_id: stack.resolve(&peer.security_group)?,
                    port: peer.port,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        report.bindings.push(ResolvedBinding {
            name: name.clone(),
            namespace: spec.namespace.clone(),
            target_group_arn,
            target_type: spec.target_type,
            service: spec.service.clone(),
            networking,
            ip_address_type: spec.ip_address_type,
        });
        stack.set_status(
            id,
            ResourceStatus::TargetGroupBinding(
                alb_controller_core::model::binding::BindingStatus { name },
            ),
        )
    }
}

/// Per-kind partition keyed on the stack's desired resource ids.
pub(crate) struct KindPartition<A> {
    pub matched: HashMap<ResourceId, A>,
    unmatched_actual: Vec<A>,
}

impl<A> KindPartition<A> {
    pub fn into_deletions(self) -> Vec<A> {
        // Matched-but-unconsumed entries cannot remain: every desired id is
        // visited by the walk. Only unmatched actuals are deletions.
        self.unmatched_actual
    }
}

fn keyed_partition<A>(
    stack: &Stack,
    kind: ResourceKind,
    actual: Vec<A>,
    actual_key: impl Fn(&A) -> Option<String>,
    actual_order: impl Fn(&A) -> String,
) -> KindPartition<A> {
    let desired: Vec<ResourceId> = stack.resources_of(kind).cloned().collect();
    let part = partition(
        desired,
        actual,
        |id| id.name.clone(),
        actual_key,
        actual_order,
    );
    KindPartition {
        matched: part.matched.into_iter().collect(),
        unmatched_actual: part.unmatched_actual,
    }
}

pub(crate) fn resource_id(tags: &BTreeMap<String, String>) -> Option<String> {
    TagProvider::resource_id_of(tags).map(str::to_string)
}

/// Brings a taggable resource's tags to the desired set. Legacy and
/// externally managed keys are never removed.
pub(crate) async fn sync_tags(
    deployer: &StackDeployer<'_>,
    arn: &str,
    desired: &BTreeMap<String, String>,
    actual: &BTreeMap<String, String>,
) -> Result<bool> {
    let mut to_add = BTreeMap::new();
    for (key, value) in desired {
        if actual.get(key) != Some(value) {
            to_add.insert(key.clone(), value.clone());
        }
    }

    let legacy = deployer.tags.legacy_tag_keys();
    let to_remove: Vec<String> = actual
        .keys()
        .filter(|key| {
            !desired.contains_key(key.as_str())
                && !legacy.iter().any(|l| l == key.as_str())
                && !deployer.tags.external_managed().contains(key.as_str())
        })
        .cloned()
        .collect();

    let changed = !to_add.is_empty() || !to_remove.is_empty();
    deployer.cloud.elbv2.add_tags(arn, &to_add).await?;
    deployer.cloud.elbv2.remove_tags(arn, &to_remove).await?;
    Ok(changed)
}
