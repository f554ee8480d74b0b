//! Client identity resolution from connection metadata.

// std
use std::net::IpAddr;
// crates.io
use http::HeaderMap;

/// Identifier used when neither headers nor the peer address are available.
pub const UNKNOWN_CLIENT: &str = "unknown";

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// Resolves the opaque client identifier fed to the rate limiter.
///
/// Forwarding headers are only honoured when `trust_proxy_headers` is set, since any client can
/// forge them when the service is reachable without a proxy that rewrites them.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClientIdentity {
	trust_proxy_headers: bool,
}
impl ClientIdentity {
	/// Create a resolver.
	pub fn new(trust_proxy_headers: bool) -> Self {
		Self { trust_proxy_headers }
	}

	/// Resolve the client id from request headers and the peer address.
	///
	/// With proxy trust enabled the first address of `X-Forwarded-For` wins, then `X-Real-IP`;
	/// otherwise the peer address is used.
	pub fn resolve(&self, headers: &HeaderMap, peer: Option<IpAddr>) -> String {
		if self.trust_proxy_headers
			&& let Some(forwarded) = first_forwarded(headers)
		{
			return forwarded;
		}

		peer.map(|ip| ip.to_string()).unwrap_or_else(|| UNKNOWN_CLIENT.to_owned())
	}
}

fn first_forwarded(headers: &HeaderMap) -> Option<String> {
	[X_FORWARDED_FOR, X_REAL_IP].into_iter().find_map(|name| {
		headers
			.get(name)
			.and_then(|value| value.to_str().ok())
			.and_then(|raw| raw.split(',').next())
			.map(str::trim)
			.filter(|candidate| !candidate.is_empty())
			.map(str::to_owned)
	})
}
