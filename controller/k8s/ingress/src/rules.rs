//! Listener rule derivation.
//!
//! Every path other than `/` becomes a rule forwarding to its backend's
//! target group. Priorities are assigned densely from 1 in member order
//! (group order, then namespace/name) and per-rule traversal order, so an
//! unchanged rule set keeps its priorities across reconciles and a changed
//! one renumbers compactly.

use crate::{builder::BuildContext, group::IngressGroupMember};
use ahash::AHashMap as HashMap;
use alb_controller_core::{
    model::{
        binding::ServicePort,
        listener::{Action, RuleCondition, RuleSpec},
    },
    Error, ResourceId, ResourceSpec, Result, Stack, StackId, StatusField, StringToken,
};
use std::collections::BTreeMap;

pub fn build_rules(
    stack: &mut Stack,
    ctx: &BuildContext<'_>,
    stack_id: &StackId,
    live: &[&IngressGroupMember],
    listeners: &[ResourceId],
    target_groups: &HashMap<(String, String, ServicePort), StringToken>,
    group_tags: &BTreeMap<String, String>,
) -> Result<()> {
    // The same rule set hangs off every listener; priorities restart at 1
    // per listener.
    for listener in listeners {
        let mut priority = 0u32;
        for member in live {
            for rule in &member.rules {
                for path in &rule.paths {
                    // Root paths route through the listener default action.
                    if path.path == "/" {
                        continue;
                    }
                    priority += 1;

                    let key = (
                        member.namespace.clone(),
                        path.backend.name.clone(),
                        path.backend.port.clone(),
                    );
                    let token = target_groups.get(&key).ok_or_else(|| {
                        Error::fatal(format!(
                            "no target group was built for backend {}/{}",
                            key.0, key.1
                        ))
                    })?;

                    let mut conditions = Vec::new();
                    if let Some(host) = &rule.host {
                        conditions.push(RuleCondition::HostHeader {
                            values: vec![host.clone()],
                        });
                    }
                    conditions.push(RuleCondition::PathPattern {
                        values: vec![path.path.clone()],
                    });

                    let logical_id = format!("{}:{priority}", listener.name);
                    stack.add(
                        logical_id.clone(),
                        ResourceSpec::ListenerRule(RuleSpec {
                            listener_arn: StringToken::reference(
                                listener.clone(),
                                StatusField::Arn,
                            ),
                            priority,
                            conditions,
                            actions: vec![Action::forward_to(token.clone())],
                            tags: if ctx.defaults.listener_rules_tagging {
                                ctx.tags.resource_tags(stack_id, &logical_id, group_tags)
                            } else {
                                BTreeMap::new()
                            },
                        }),
                    )?;
                }
            }
        }
    }
    Ok(())
}
