use super::target_group::Protocol;
use crate::{
    error::Result,
    resource::ResourceId,
    stack::Stack,
    token::StringToken,
};
use ipnet::IpNet;
use std::collections::BTreeMap;

/// A listener action. Tagged variants with one payload each; `T` is the
/// target group reference type ([`StringToken`] in desired specs, a plain
/// ARN in observed state), so desired and observed actions compare with the
/// same machinery once tokens are resolved.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Action<T = StringToken> {
    Forward(ForwardConfig<T>),
    Redirect(RedirectConfig),
    FixedResponse(FixedResponseConfig),
    AuthenticateOidc(AuthenticateOidcConfig),
    AuthenticateCognito(AuthenticateCognitoConfig),
}

impl Action<StringToken> {
    pub fn forward_to(target_group: StringToken) -> Self {
        Action::Forward(ForwardConfig {
            target_groups: vec![TargetGroupTuple {
                target_group,
                weight: None,
            }],
        })
    }

    pub fn token_refs(&self) -> Vec<ResourceId> {
        match self {
            Action::Forward(forward) => forward
                .target_groups
                .iter()
                .filter_map(|t| t.target_group.referent())
                .cloned()
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Resolves forward-target tokens into ARNs so the action can be
    /// compared against, or sent as, cloud state.
    pub fn resolve(&self, stack: &Stack) -> Result<Action<String>> {
        Ok(match self {
            Action::Forward(forward) => Action::Forward(ForwardConfig {
                target_groups: forward
                    .target_groups
                    .iter()
                    .map(|t| {
                        Ok(TargetGroupTuple {
                            target_group: stack.resolve(&t.target_group)?,
                            weight: t.weight,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?,
            }),
            Action::Redirect(c) => Action::Redirect(c.clone()),
            Action::FixedResponse(c) => Action::FixedResponse(c.clone()),
            Action::AuthenticateOidc(c) => Action::AuthenticateOidc(c.clone()),
            Action::AuthenticateCognito(c) => Action::AuthenticateCognito(c.clone()),
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ForwardConfig<T = StringToken> {
    pub target_groups: Vec<TargetGroupTuple<T>>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TargetGroupTuple<T = StringToken> {
    pub target_group: T,
    /// Only meaningful when several target groups share the forward.
    pub weight: Option<u32>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RedirectStatusCode {
    Http301,
    Http302,
}

impl RedirectStatusCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RedirectStatusCode::Http301 => "HTTP_301",
            RedirectStatusCode::Http302 => "HTTP_302",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RedirectConfig {
    pub protocol: Option<String>,
    pub host: Option<String>,
    pub port: Option<String>,
    pub path: Option<String>,
    pub query: Option<String>,
    pub status_code: RedirectStatusCode,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FixedResponseConfig {
    pub status_code: u16,
    pub content_type: Option<String>,
    pub message_body: Option<String>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AuthBehavior {
    Deny,
    Allow,
    Authenticate,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AuthenticateOidcConfig {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub user_info_endpoint: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub scope: Option<String>,
    pub session_cookie_name: Option<String>,
    pub session_timeout_seconds: Option<u64>,
    pub on_unauthenticated_request: AuthBehavior,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AuthenticateCognitoConfig {
    pub user_pool_arn: String,
    pub user_pool_client_id: String,
    pub user_pool_domain: String,
    pub scope: Option<String>,
    pub session_cookie_name: Option<String>,
    pub session_timeout_seconds: Option<u64>,
    pub on_unauthenticated_request: AuthBehavior,
}

/// A rule condition. Exactly one payload per variant.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RuleCondition {
    HostHeader { values: Vec<String> },
    PathPattern { values: Vec<String> },
    HttpHeader { name: String, values: Vec<String> },
    HttpRequestMethod { values: Vec<String> },
    QueryString { pairs: Vec<QueryStringPair> },
    SourceIp { values: Vec<IpNet> },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct QueryStringPair {
    pub key: Option<String>,
    pub value: String,
}

/// Desired state of a listener. Identity is `(load balancer, port)`.
#[derive(Clone, Debug, PartialEq)]
pub struct ListenerSpec {
    pub load_balancer_arn: StringToken,
    pub port: u16,
    pub protocol: Protocol,
    pub default_actions: Vec<Action>,
    /// Certificate ARNs: literal for user-supplied certificates, references
    /// into Certificate resources for controller-issued ones.
    pub certificates: Vec<StringToken>,
    pub ssl_policy: Option<String>,
    pub alpn_policy: Option<String>,
    pub tags: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ListenerStatus {
    pub arn: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ObservedListener {
    pub arn: String,
    pub load_balancer_arn: String,
    pub port: u16,
    pub protocol: Protocol,
    pub default_actions: Vec<Action<String>>,
    pub certificates: Vec<String>,
    pub ssl_policy: Option<String>,
    pub alpn_policy: Option<String>,
}

/// Desired state of a listener rule. Identity is `(listener, priority)`;
/// priorities are dense from 1 and unique per listener.
#[derive(Clone, Debug, PartialEq)]
pub struct RuleSpec {
    pub listener_arn: StringToken,
    pub priority: u32,
    pub conditions: Vec<RuleCondition>,
    pub actions: Vec<Action>,
    pub tags: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RuleStatus {
    pub arn: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ObservedRule {
    pub arn: String,
    /// `None` for the listener's default rule, which is not addressable
    /// through this engine.
    pub priority: Option<u32>,
    pub is_default: bool,
    pub conditions: Vec<RuleCondition>,
    pub actions: Vec<Action<String>>,
}
