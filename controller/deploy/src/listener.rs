use crate::stack::{DeployReport, EventVerb, ListenerState, StackDeployer};
use alb_controller_core::{
    cloud::ListenerInput,
    model::listener::{ListenerSpec, ListenerStatus, ObservedListener},
    Error, ResourceId, ResourceSpec, ResourceStatus, Result, Stack,
};

pub(crate) async fn sync_one(
    deployer: &StackDeployer<'_>,
    stack: &mut Stack,
    id: &ResourceId,
    state: &mut ListenerState,
    report: &mut DeployReport,
) -> Result<()> {
    let Some(ResourceSpec::Listener(spec)) = stack.spec(id).cloned() else {
        return Err(Error::fatal(format!("{id} is not a Listener")));
    };
    let load_balancer_arn = stack.resolve(&spec.load_balancer_arn)?;

    if !state.listeners.contains_key(&load_balancer_arn) {
        let listeners = deployer
            .cloud
            .elbv2
            .describe_listeners(&load_balancer_arn)
            .await?;
        state.listeners.insert(load_balancer_arn.clone(), listeners);
    }
    let actual = state.listeners[&load_balancer_arn]
        .iter()
        .find(|l| l.port == spec.port)
        .cloned();

    let input = resolve_input(stack, &spec, &load_balancer_arn)?;

    let observed_arn = match actual {
        Some(actual) => {
            if listener_drifted(&input, &actual) {
                deployer.cloud.elbv2.modify_listener(&actual.arn, &input).await?;
                report.record(
                    EventVerb::Modify,
                    format!("modified listener {}:{}", spec.protocol, spec.port),
                );
            }
            state.kept_listeners.insert(actual.arn.clone());
            actual.arn
        }
        None => {
            let created = deployer.cloud.elbv2.create_listener(&input).await?;
            report.record(
                EventVerb::Create,
                format!("created listener {}:{}", spec.protocol, spec.port),
            );
            state.kept_listeners.insert(created.arn.clone());
            created.arn
        }
    };

    stack.set_status(id, ResourceStatus::Listener(ListenerStatus { arn: observed_arn }))
}

pub(crate) async fn delete_unmatched(
    deployer: &StackDeployer<'_>,
    state: &mut ListenerState,
    report: &mut DeployReport,
) -> Result<()> {
    for listeners in state.listeners.values() {
        for listener in listeners {
            if state.kept_listeners.contains(&listener.arn) {
                continue;
            }
            deployer.cloud.elbv2.delete_listener(&listener.arn).await?;
            report.record(
                EventVerb::Delete,
                format!("deleted listener {}:{}", listener.protocol, listener.port),
            );
        }
    }
    Ok(())
}

fn resolve_input(
    stack: &Stack,
    spec: &ListenerSpec,
    load_balancer_arn: &str,
) -> Result<ListenerInput> {
    Ok(ListenerInput {
        load_balancer_arn: load_balancer_arn.to_string(),
        port: spec.port,
        protocol: spec.protocol,
        default_actions: spec
            .default_actions
            .iter()
            .map(|a| a.resolve(stack))
            .collect::<Result<Vec<_>>>()?,
        certificates: stack.resolve_all(&spec.certificates)?,
        ssl_policy: spec.ssl_policy.clone(),
        alpn_policy: spec.alpn_policy.clone(),
        tags: spec.tags.clone(),
    })
}

fn listener_drifted(input: &ListenerInput, actual: &ObservedListener) -> bool {
    let mut desired_certificates = input.certificates.clone();
    desired_certificates.sort();
    let mut actual_certificates = actual.certificates.clone();
    actual_certificates.sort();

    input.protocol != actual.protocol
        || input.default_actions != actual.default_actions
        || desired_certificates != actual_certificates
        || (input.ssl_policy.is_some() && input.ssl_policy != actual.ssl_policy)
        || (input.alpn_policy.is_some() && input.alpn_policy != actual.alpn_policy)
}
