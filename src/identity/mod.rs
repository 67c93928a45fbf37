//! # Caller Identity
//!
//! Turns the caller context supplied by the host into the canonical identity
//! string the workflow compares against role bounds. Requesters and approvers
//! go through the same resolver.
//!
//! Resolution never guesses: without an identity template the entity must
//! carry exactly one alias.

use crate::errors::{ApprovalError, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

static TEMPLATE_EXPR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("template expression regex is valid"));

/// One auth-mount alias of an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityAlias {
    pub mount_accessor: String,
    pub name: String,
}

/// What the host knows about the caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerContext {
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub entity_name: Option<String>,
    #[serde(default)]
    pub aliases: Vec<EntityAlias>,
    /// Primary roles taken from the caller's group metadata
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl CallerContext {
    /// Context with a single alias, the common shape in tests and dev setups
    pub fn with_alias(entity_id: &str, mount_accessor: &str, name: &str) -> Self {
        Self {
            entity_id: Some(entity_id.to_string()),
            entity_name: Some(name.to_string()),
            aliases: vec![EntityAlias {
                mount_accessor: mount_accessor.to_string(),
                name: name.to_string(),
            }],
            ..Self::default()
        }
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(|r| r.into().trim().to_lowercase()).collect();
        self
    }
}

/// Canonical identity of a caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    /// Lower-cased identity string compared against bounds
    pub id: String,
    pub roles: BTreeSet<String>,
}

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Resolve `ctx` using `template` when given, the single alias otherwise
    async fn resolve(&self, ctx: &CallerContext, template: Option<&str>) -> Result<CallerIdentity>;

    /// Render an identity template against `ctx`
    fn render(&self, ctx: &CallerContext, template: &str) -> std::result::Result<String, String>;
}

/// Resolver over the entity information carried in [`CallerContext`].
///
/// Supported template expressions:
/// `identity.entity.id`, `identity.entity.name`,
/// `identity.entity.aliases.<mount_accessor>.name`,
/// `identity.entity.metadata.<key>`.
#[derive(Debug, Default, Clone)]
pub struct EntityIdentityResolver;

impl EntityIdentityResolver {
    pub fn new() -> Self {
        Self
    }

    fn lookup(ctx: &CallerContext, expr: &str) -> std::result::Result<String, String> {
        let path = expr.strip_prefix("identity.entity.").ok_or_else(|| {
            format!("unsupported template expression '{}'", expr)
        })?;

        let value = match path {
            "id" => ctx.entity_id.clone(),
            "name" => ctx.entity_name.clone(),
            other => {
                if let Some(rest) = other.strip_prefix("aliases.") {
                    let (accessor, field) = rest
                        .rsplit_once('.')
                        .ok_or_else(|| format!("malformed alias expression '{}'", expr))?;
                    if field != "name" {
                        return Err(format!("unsupported alias field '{}'", field));
                    }
                    ctx.aliases
                        .iter()
                        .find(|alias| alias.mount_accessor == accessor)
                        .map(|alias| alias.name.clone())
                } else if let Some(key) = other.strip_prefix("metadata.") {
                    ctx.metadata.get(key).cloned()
                } else {
                    return Err(format!("unsupported template expression '{}'", expr));
                }
            }
        };

        value
            .filter(|v| !v.is_empty())
            .ok_or_else(|| format!("no value for template expression '{}'", expr))
    }
}

#[async_trait]
impl IdentityResolver for EntityIdentityResolver {
    async fn resolve(&self, ctx: &CallerContext, template: Option<&str>) -> Result<CallerIdentity> {
        let id = match template {
            Some(template) => {
                if ctx.entity_id.as_deref().unwrap_or_default().is_empty() {
                    return Err(ApprovalError::permission_denied(
                        "could not get identity info: caller has no entity",
                    ));
                }
                self.render(ctx, template).map_err(|reason| {
                    ApprovalError::permission_denied(format!(
                        "could not apply identity template: {}",
                        reason
                    ))
                })?
            }
            None => match ctx.aliases.as_slice() {
                [alias] if !alias.name.is_empty() => alias.name.clone(),
                [] => {
                    return Err(ApprovalError::permission_denied(
                        "could not find entity: caller has no alias",
                    ))
                }
                _ => {
                    return Err(ApprovalError::permission_denied(
                        "ambiguous identity: caller has more than one alias, configure identity_template",
                    ))
                }
            },
        };

        Ok(CallerIdentity { id: id.trim().to_lowercase(), roles: ctx.roles.clone() })
    }

    fn render(&self, ctx: &CallerContext, template: &str) -> std::result::Result<String, String> {
        let mut rendered = String::with_capacity(template.len());
        let mut last = 0;
        let mut found = false;

        for captures in TEMPLATE_EXPR.captures_iter(template) {
            let (Some(whole), Some(expr)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            found = true;
            rendered.push_str(&template[last..whole.start()]);
            rendered.push_str(&Self::lookup(ctx, expr.as_str())?);
            last = whole.end();
        }

        if !found {
            return Err(format!("'{}' contains no template expression", template));
        }
        rendered.push_str(&template[last..]);
        Ok(rendered)
    }
}
