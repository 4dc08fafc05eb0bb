use crate::stack::{sync_tags, DeployReport, EventVerb, StackDeployer};
use ahash::AHashMap as HashMap;
use alb_controller_aws::retry_while;
use alb_controller_core::{
    cloud::TargetGroupInput,
    model::target_group::{
        needs_replacement, ObservedTargetGroup, TargetGroupSpec, TargetGroupStatus,
    },
    Error, ResourceId, ResourceSpec, ResourceStatus, Result, Stack,
};

pub(crate) async fn sync_one(
    deployer: &StackDeployer<'_>,
    stack: &mut Stack,
    id: &ResourceId,
    matched: &mut HashMap<ResourceId, ObservedTargetGroup>,
    report: &mut DeployReport,
) -> Result<()> {
    let Some(ResourceSpec::TargetGroup(spec)) = stack.spec(id).cloned() else {
        return Err(Error::fatal(format!("{id} is not a TargetGroup")));
    };

    let observed = match matched.remove(id) {
        // Identity drift under a matching resource tag can only come from a
        // hand-edited tag; the name hash already routes genuine port or
        // protocol changes through create + delete. Replace it.
        Some(actual) if needs_replacement(&spec, &actual) => {
            delete(deployer, &actual, report).await?;
            let created = create(deployer, &spec).await?;
            report.record(EventVerb::Create, format!("created target group {}", spec.name));
            created
        }
        Some(actual) => {
            let health_drift = spec.health_check != actual.health_check
                || (spec.matcher.is_some() && spec.matcher != actual.matcher);
            if health_drift {
                deployer
                    .cloud
                    .elbv2
                    .modify_target_group(&actual.arn, &spec.health_check, spec.matcher.as_ref())
                    .await?;
            }
            let attribute_drift = spec
                .attributes
                .iter()
                .any(|(key, value)| actual.attributes.get(key) != Some(value));
            if attribute_drift {
                deployer
                    .cloud
                    .elbv2
                    .modify_target_group_attributes(&actual.arn, &spec.attributes)
                    .await?;
            }
            let tags_changed = sync_tags(deployer, &actual.arn, &spec.tags, &actual.tags).await?;
            if health_drift || attribute_drift || tags_changed {
                report.record(
                    EventVerb::Modify,
                    format!("modified target group {}", actual.name),
                );
            }
            actual
        }
        None => {
            let created = create(deployer, &spec).await?;
            report.record(EventVerb::Create, format!("created target group {}", spec.name));
            created
        }
    };

    stack.set_status(
        id,
        ResourceStatus::TargetGroup(TargetGroupStatus { arn: observed.arn }),
    )
}

async fn create(
    deployer: &StackDeployer<'_>,
    spec: &TargetGroupSpec,
) -> Result<ObservedTargetGroup> {
    deployer
        .cloud
        .elbv2
        .create_target_group(&TargetGroupInput {
            name: spec.name.clone(),
            protocol: spec.protocol,
            port: spec.port,
            protocol_version: spec.protocol_version,
            target_type: spec.target_type,
            health_check: spec.health_check.clone(),
            matcher: spec.matcher.clone(),
            attributes: spec.attributes.clone(),
            tags: spec.tags.clone(),
        })
        .await
}

/// Deletes a target group, retrying while ELBv2 still counts a listener or
/// rule reference against it.
pub(crate) async fn delete(
    deployer: &StackDeployer<'_>,
    actual: &ObservedTargetGroup,
    report: &mut DeployReport,
) -> Result<()> {
    retry_while(deployer.config.delete_poll, Error::is_in_use, || {
        deployer.cloud.elbv2.delete_target_group(&actual.arn)
    })
    .await?;
    report.record(EventVerb::Delete, format!("deleted target group {}", actual.name));
    Ok(())
}
