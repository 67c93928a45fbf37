//! Caller context taken from headers set by the fronting host.
//!
//! The host authenticates the caller and forwards what it knows about the
//! entity; this service trusts those headers and must not be reachable
//! without that host in front of it.

use axum::extract::FromRequestParts;
use axum::http::{request::Parts, HeaderMap};

use super::error::ApiError;
use crate::identity::{CallerContext, EntityAlias};

pub const ENTITY_ID_HEADER: &str = "x-caller-entity-id";
pub const ENTITY_NAME_HEADER: &str = "x-caller-entity-name";
/// `<mount_accessor>=<alias name>`, repeatable
pub const ALIAS_HEADER: &str = "x-caller-alias";
/// Comma separated
pub const ROLE_HEADER: &str = "x-caller-role";
/// `<key>=<value>`, repeatable
pub const METADATA_HEADER: &str = "x-caller-metadata";

/// Extractor wrapping the caller's [`CallerContext`]
#[derive(Debug, Clone)]
pub struct Caller(pub CallerContext);

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        caller_from_headers(&parts.headers).map(Caller)
    }
}

fn header_values<'a>(headers: &'a HeaderMap, name: &str) -> Result<Vec<&'a str>, ApiError> {
    headers
        .get_all(name)
        .iter()
        .map(|value| {
            value.to_str().map_err(|_| ApiError::bad_request(format!("{} is not valid text", name)))
        })
        .collect()
}

fn single(headers: &HeaderMap, name: &str) -> Result<Option<String>, ApiError> {
    Ok(header_values(headers, name)?
        .first()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty()))
}

fn key_value<'a>(raw: &'a str, name: &str) -> Result<(&'a str, &'a str), ApiError> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim(), v.trim()))
        .filter(|(k, v)| !k.is_empty() && !v.is_empty())
        .ok_or_else(|| ApiError::bad_request(format!("{} must look like key=value", name)))
}

pub fn caller_from_headers(headers: &HeaderMap) -> Result<CallerContext, ApiError> {
    let mut ctx = CallerContext {
        entity_id: single(headers, ENTITY_ID_HEADER)?,
        entity_name: single(headers, ENTITY_NAME_HEADER)?,
        ..CallerContext::default()
    };

    for raw in header_values(headers, ALIAS_HEADER)? {
        let (mount_accessor, name) = key_value(raw, ALIAS_HEADER)?;
        ctx.aliases.push(EntityAlias {
            mount_accessor: mount_accessor.to_string(),
            name: name.to_string(),
        });
    }

    let roles: Vec<String> = header_values(headers, ROLE_HEADER)?
        .into_iter()
        .flat_map(|raw| raw.split(','))
        .map(|role| role.trim().to_string())
        .filter(|role| !role.is_empty())
        .collect();
    ctx = ctx.with_roles(roles);

    for raw in header_values(headers, METADATA_HEADER)? {
        let (key, value) = key_value(raw, METADATA_HEADER)?;
        ctx.metadata.insert(key.to_string(), value.to_string());
    }

    Ok(ctx)
}
