use crate::stack::{DeployReport, EventVerb, ListenerState, StackDeployer};
use alb_controller_core::{
    cloud::RuleInput,
    model::listener::{Action, RuleCondition, RuleSpec, RuleStatus},
    Error, ResourceId, ResourceSpec, ResourceStatus, Result, Stack,
};

pub(crate) async fn sync_one(
    deployer: &StackDeployer<'_>,
    stack: &mut Stack,
    id: &ResourceId,
    state: &mut ListenerState,
    report: &mut DeployReport,
) -> Result<()> {
    let Some(ResourceSpec::ListenerRule(spec)) = stack.spec(id).cloned() else {
        return Err(Error::fatal(format!("{id} is not a ListenerRule")));
    };
    let listener_arn = stack.resolve(&spec.listener_arn)?;

    if !state.rules.contains_key(&listener_arn) {
        let rules = deployer.cloud.elbv2.describe_rules(&listener_arn).await?;
        state.rules.insert(listener_arn.clone(), rules);
    }
    let actual = state.rules[&listener_arn]
        .iter()
        .find(|r| !r.is_default && r.priority == Some(spec.priority))
        .cloned();

    let actions = spec
        .actions
        .iter()
        .map(|a| a.resolve(stack))
        .collect::<Result<Vec<Action<String>>>>()?;

    let observed_arn = match actual {
        Some(actual) => {
            // Full rule modification: both the condition set and the action
            // list reconcile in place under the same priority.
            if !conditions_equal(&spec.conditions, &actual.conditions)
                || actions != actual.actions
            {
                deployer
                    .cloud
                    .elbv2
                    .modify_rule(&actual.arn, &spec.conditions, &actions)
                    .await?;
                report.record(
                    EventVerb::Modify,
                    format!("modified rule priority {}", spec.priority),
                );
            }
            state.kept_rules.insert(actual.arn.clone());
            actual.arn
        }
        None => {
            let created = deployer
                .cloud
                .elbv2
                .create_rule(&RuleInput {
                    listener_arn: listener_arn.clone(),
                    priority: spec.priority,
                    conditions: spec.conditions.clone(),
                    actions,
                    tags: spec.tags.clone(),
                })
                .await?;
            report.record(
                EventVerb::Create,
                format!("created rule priority {}", spec.priority),
            );
            state.kept_rules.insert(created.arn.clone());
            created.arn
        }
    };

    stack.set_status(id, ResourceStatus::ListenerRule(RuleStatus { arn: observed_arn }))
}

pub(crate) async fn delete_unmatched(
    deployer: &StackDeployer<'_>,
    state: &mut ListenerState,
    report: &mut DeployReport,
) -> Result<()> {
    for rules in state.rules.values() {
        for rule in rules {
            // The default rule lives with its listener and is never
            // addressable here.
            if rule.is_default || state.kept_rules.contains(&rule.arn) {
                continue;
            }
            deployer.cloud.elbv2.delete_rule(&rule.arn).await?;
            report.record(
                EventVerb::Delete,
                format!("deleted rule priority {}", rule.priority.unwrap_or_default()),
            );
        }
    }
    Ok(())
}

/// Conditions compare as sets; ELBv2 does not preserve ordering.
fn conditions_equal(desired: &[RuleCondition], actual: &[RuleCondition]) -> bool {
    desired.len() == actual.len()
        && desired.iter().all(|c| actual.contains(c))
        && actual.iter().all(|c| desired.contains(c))
}
