use crate::stack::{sync_tags, DeployReport, EventVerb, ListenerState, StackDeployer};
use ahash::AHashMap as HashMap;
use alb_controller_core::{
    cloud::LoadBalancerInput,
    model::load_balancer::{
        needs_replacement, LoadBalancerSpec, LoadBalancerState, LoadBalancerStatus,
        ObservedLoadBalancer,
    },
    Error, ResourceId, ResourceSpec, ResourceStatus, Result, Stack,
};

/// Sub-modifications applicable to a live load balancer. `scheme` is the
/// exception: it cannot change in place and collapses to delete + create.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ModifySet {
    pub security_groups: bool,
    pub subnets: bool,
    pub ip_address_type: bool,
    pub attributes: bool,
    pub tags: bool,
}

impl ModifySet {
    pub fn any(&self) -> bool {
        *self != Self::default()
    }
}

pub fn modify_set(
    spec: &LoadBalancerSpec,
    security_groups: &[String],
    actual: &ObservedLoadBalancer,
) -> ModifySet {
    let mut desired_groups = security_groups.to_vec();
    desired_groups.sort();
    let mut actual_groups = actual.security_groups.clone();
    actual_groups.sort();

    let mut desired_subnets: Vec<&str> =
        spec.subnet_mappings.iter().map(|m| m.subnet_id.as_str()).collect();
    desired_subnets.sort_unstable();
    let mut actual_subnets: Vec<&str> =
        actual.subnet_mappings.iter().map(|m| m.subnet_id.as_str()).collect();
    actual_subnets.sort_unstable();

    ModifySet {
        security_groups: desired_groups != actual_groups,
        subnets: desired_subnets != actual_subnets,
        ip_address_type: spec.ip_address_type != actual.ip_address_type,
        // Attribute drift only counts for keys the spec names; AWS reports
        // every attribute with its default.
        attributes: spec
            .attributes
            .iter()
            .any(|(key, value)| actual.attributes.get(key) != Some(value)),
        tags: spec
            .tags
            .iter()
            .any(|(key, value)| actual.tags.get(key) != Some(value)),
    }
}

pub(crate) async fn sync_one(
    deployer: &StackDeployer<'_>,
    stack: &mut Stack,
    id: &ResourceId,
    matched: &mut HashMap<ResourceId, ObservedLoadBalancer>,
    state: &mut ListenerState,
    report: &mut DeployReport,
) -> Result<()> {
    let Some(ResourceSpec::LoadBalancer(spec)) = stack.spec(id).cloned() else {
        return Err(Error::fatal(format!("{id} is not a LoadBalancer")));
    };
    let security_groups = stack.resolve_all(&spec.security_groups)?;

    let observed = match matched.remove(id) {
        Some(actual) if needs_replacement(&spec, &actual) => {
            // Scheme changed: recreate, and strip the discovered listener
            // and rule state: AWS cascaded their deletion with the load
            // balancer, so it must not drive modifies in this pass.
            deployer
                .cloud
                .elbv2
                .delete_load_balancer(&actual.arn)
                .await?;
            report.record(
                EventVerb::Delete,
                format!("deleted load balancer {} for scheme change", actual.name),
            );
            state.strip();

            let created = create(deployer, &spec, &security_groups).await?;
            report.record(EventVerb::Create, format!("created load balancer {}", spec.name));
            created
        }
        Some(actual) => {
            // Terminal failure is surfaced, not auto-retried beyond the
            // requeue the scheduler already drives.
            if actual.state == LoadBalancerState::Failed {
                tracing::warn!(name = %actual.name, "Load balancer is in a failed state");
            }
            let drift = modify_set(&spec, &security_groups, &actual);
            if drift.security_groups {
                deployer
                    .cloud
                    .elbv2
                    .set_security_groups(&actual.arn, &security_groups)
                    .await?;
            }
            if drift.subnets {
                deployer
                    .cloud
                    .elbv2
                    .set_subnets(&actual.arn, &spec.subnet_mappings)
                    .await?;
            }
            if drift.ip_address_type {
                deployer
                    .cloud
                    .elbv2
                    .set_ip_address_type(&actual.arn, spec.ip_address_type)
                    .await?;
            }
            if drift.attributes {
                deployer
                    .cloud
                    .elbv2
                    .modify_load_balancer_attributes(&actual.arn, &spec.attributes)
                    .await?;
            }
            let tags_changed = sync_tags(deployer, &actual.arn, &spec.tags, &actual.tags).await?;
            if drift.any() || tags_changed {
                report.record(
                    EventVerb::Modify,
                    format!("modified load balancer {}", actual.name),
                );
            }
            actual
        }
        None => {
            let created = create(deployer, &spec, &security_groups).await?;
            report.record(EventVerb::Create, format!("created load balancer {}", spec.name));
            created
        }
    };

    report.load_balancer_dns = Some(observed.dns_name.clone());
    stack.set_status(
        id,
        ResourceStatus::LoadBalancer(LoadBalancerStatus {
            arn: observed.arn,
            dns_name: observed.dns_name,
            canonical_hosted_zone_id: observed.canonical_hosted_zone_id,
        }),
    )
}

async fn create(
    deployer: &StackDeployer<'_>,
    spec: &LoadBalancerSpec,
    security_groups: &[String],
) -> Result<ObservedLoadBalancer> {
    deployer
        .cloud
        .elbv2
        .create_load_balancer(&LoadBalancerInput {
            name: spec.name.clone(),
            lb_type: spec.lb_type,
            scheme: spec.scheme,
            ip_address_type: spec.ip_address_type,
            subnet_mappings: spec.subnet_mappings.clone(),
            security_groups: security_groups.to_vec(),
            attributes: spec.attributes.clone(),
            tags: spec.tags.clone(),
        })
        .await
}
