//! Rate-limit key derivation from request metadata.

use axum::http::HeaderMap;

/// Identity shared by every caller whose address cannot be determined.
///
/// All unidentifiable callers land in one bucket, so they throttle each
/// other. Denying them outright instead would turn missing proxy headers
/// into a hard failure.
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// Header carrying the proxy chain, client first.
pub const FORWARDED_FOR: &str = "x-forwarded-for";
/// Header carrying a single client address set by the edge proxy.
pub const REAL_IP: &str = "x-real-ip";

/// A key that uniquely identifies one caller on one protected resource.
///
/// Rendered as `identity:resource`, so the same caller is limited
/// independently on each resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    /// Compose a key from an identity and a resource path.
    pub fn new(identity: &str, resource: &str) -> Self {
        Self(format!("{}:{}", identity, resource))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives the caller identity used for rate limiting.
///
/// Resolution never fails: callers without usable address information
/// resolve to [`UNKNOWN_IDENTITY`].
pub trait IdentityResolver: Send + Sync {
    /// Resolve the caller identity from request headers.
    fn resolve(&self, headers: &HeaderMap) -> String;

    /// Build the full rate-limit key for a request to `path`.
    fn key_for(&self, headers: &HeaderMap, path: &str) -> RateLimitKey {
        RateLimitKey::new(&self.resolve(headers), path)
    }
}

/// Resolves identity from proxy headers.
///
/// Order: left-most `X-Forwarded-For` entry, then `X-Real-IP`, then
/// [`UNKNOWN_IDENTITY`]. Empty or non-visible-ASCII values count as missing.
#[derive(Debug, Default, Clone, Copy)]
pub struct ForwardedHeaderResolver;

impl ForwardedHeaderResolver {
    fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
        headers.get(name).and_then(|v| v.to_str().ok())
    }
}

impl IdentityResolver for ForwardedHeaderResolver {
    fn resolve(&self, headers: &HeaderMap) -> String {
        let forwarded = Self::header_value(headers, FORWARDED_FOR)
            .and_then(|chain| chain.split(',').next())
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let real_ip = || {
            Self::header_value(headers, REAL_IP)
                .map(str::trim)
                .filter(|s| !s.is_empty())
        };

        forwarded
            .or_else(real_ip)
            .unwrap_or(UNKNOWN_IDENTITY)
            .to_string()
    }
}
