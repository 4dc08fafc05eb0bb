use crate::stack::{DeployReport, EventVerb, StackDeployer};
use ahash::AHashMap as HashMap;
use alb_controller_aws::retry_while;
use alb_controller_core::{
    cloud::SecurityGroupInput,
    model::security_group::{
        IngressRule, ObservedSecurityGroup, SecurityGroupSpec, SecurityGroupStatus,
    },
    Error, ResourceId, ResourceSpec, ResourceStatus, Result, Stack,
};

pub(crate) async fn sync_one(
    deployer: &StackDeployer<'_>,
    stack: &mut Stack,
    id: &ResourceId,
    matched: &mut HashMap<ResourceId, ObservedSecurityGroup>,
    report: &mut DeployReport,
) -> Result<()> {
    let Some(ResourceSpec::SecurityGroup(spec)) = stack.spec(id).cloned() else {
        return Err(Error::fatal(format!("{id} is not a SecurityGroup")));
    };
    let desired_rules = spec
        .ingress_rules
        .iter()
        .map(|r| r.resolve(stack))
        .collect::<Result<Vec<IngressRule<String>>>>()?;

    let group_id = match matched.remove(id) {
        Some(actual) => {
            let missing: Vec<IngressRule<String>> = desired_rules
                .iter()
                .filter(|rule| !contains_rule(&actual.ingress_rules, rule))
                .cloned()
                .collect();
            let stale: Vec<IngressRule<String>> = actual
                .ingress_rules
                .iter()
                .filter(|rule| !contains_rule(&desired_rules, rule))
                .cloned()
                .collect();
            if !missing.is_empty() {
                deployer
                    .cloud
                    .ec2
                    .authorize_ingress(&actual.group_id, &missing)
                    .await?;
            }
            if !stale.is_empty() {
                deployer
                    .cloud
                    .ec2
                    .revoke_ingress(&actual.group_id, &stale)
                    .await?;
            }
            if !missing.is_empty() || !stale.is_empty() {
                report.record(
                    EventVerb::Modify,
                    format!("modified security group {}", actual.name),
                );
            }
            actual.group_id
        }
        None => {
            let group_id = deployer
                .cloud
                .ec2
                .create_security_group(&SecurityGroupInput {
                    name: spec.name.clone(),
                    description: spec.description.clone(),
                    vpc_id: spec.vpc_id.clone(),
                    ingress_rules: desired_rules,
                    tags: spec.tags.clone(),
                })
                .await?;
            report.record(
                EventVerb::Create,
                format!("created security group {}", spec.name),
            );
            group_id
        }
    };

    stack.set_status(id, ResourceStatus::SecurityGroup(SecurityGroupStatus { group_id }))
}

/// Deletes a managed group, retrying while EC2 still sees an attachment.
pub(crate) async fn delete(
    deployer: &StackDeployer<'_>,
    actual: &ObservedSecurityGroup,
    report: &mut DeployReport,
) -> Result<()> {
    retry_while(deployer.config.delete_poll, Error::is_in_use, || {
        deployer.cloud.ec2.delete_security_group(&actual.group_id)
    })
    .await?;
    report.record(
        EventVerb::Delete,
        format!("deleted security group {}", actual.name),
    );
    Ok(())
}

/// Rule identity ignores descriptions; EC2 echoes rules back with extra
/// annotations.
fn contains_rule(rules: &[IngressRule<String>], wanted: &IngressRule<String>) -> bool {
    rules.iter().any(|rule| {
        rule.protocol == wanted.protocol
            && rule.from_port == wanted.from_port
            && rule.to_port == wanted.to_port
            && rule.source == wanted.source
    })
}
