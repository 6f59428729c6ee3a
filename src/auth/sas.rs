//! Access-signature tokens in the service's query-string shape.
//!
//! Tokens carry the real field layout (`sv`, `st`, `se`, `sr`, `sp`, `sig`)
//! but the signature is a fixed placeholder, so nothing can verify them.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::collections::HashMap;

use crate::models::SharedAccessPolicy;

/// Characters left unescaped in token values (RFC 3986 unreserved set).
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Resource a token is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignedResource {
    Blob,
    Container,
    Queue,
}

impl SignedResource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignedResource::Blob => "b",
            SignedResource::Container => "c",
            SignedResource::Queue => "q",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "b" => Some(SignedResource::Blob),
            "c" => Some(SignedResource::Container),
            "q" => Some(SignedResource::Queue),
            _ => None,
        }
    }
}

/// Builds a token for `canonical_resource` (e.g. `/blob/account/container/name`).
pub fn generate_sas_token(
    version: &str,
    resource: SignedResource,
    permissions: &str,
    policy: &SharedAccessPolicy,
    canonical_resource: &str,
) -> String {
    let mut params = vec![format!("sv={}", version)];
    if let Some(start) = &policy.start {
        params.push(format!("st={}", encode(&format_sas_datetime(start))));
    }
    params.push(format!("se={}", encode(&format_sas_datetime(&policy.expiry))));
    params.push(format!("sr={}", resource.as_str()));
    params.push(format!("sp={}", permissions));
    params.push(format!("sig={}", encode(&placeholder_signature(canonical_resource))));
    params.join("&")
}

/// Token fields read back from a query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SasParameters {
    /// Signed version (sv).
    pub signed_version: String,
    /// Signed resource (sr).
    pub signed_resource: SignedResource,
    /// Signed permissions (sp).
    pub signed_permissions: String,
    /// Signed start (st) - optional.
    pub signed_start: Option<DateTime<Utc>>,
    /// Signed expiry (se).
    pub signed_expiry: DateTime<Utc>,
    /// Signature (sig).
    pub signature: String,
}

impl SasParameters {
    /// Parses a token, with or without a leading `?`.
    pub fn from_query(query: &str) -> Option<Self> {
        let params: HashMap<String, String> = query
            .trim_start_matches('?')
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .map(|(k, v)| (k.to_string(), percent_decode_str(v).decode_utf8_lossy().into_owned()))
            .collect();

        Some(Self {
            signed_version: params.get("sv")?.clone(),
            signed_resource: SignedResource::from_str(params.get("sr")?)?,
            signed_permissions: params.get("sp").cloned().unwrap_or_default(),
            signed_start: params.get("st").and_then(|s| parse_sas_datetime(s)),
            signed_expiry: parse_sas_datetime(params.get("se")?)?,
            signature: params.get("sig")?.clone(),
        })
    }

    /// True if `at` falls inside the token's validity window.
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.signed_start.map_or(true, |start| start <= at) && at < self.signed_expiry
    }
}

fn placeholder_signature(canonical_resource: &str) -> String {
    BASE64.encode(format!("unsigned:{}", canonical_resource))
}

fn encode(value: &str) -> String {
    utf8_percent_encode(value, QUERY_VALUE).to_string()
}

fn parse_sas_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%SZ")
                .ok()
                .map(|dt| dt.and_utc())
        })
}

fn format_sas_datetime(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
