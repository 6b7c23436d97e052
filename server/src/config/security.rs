use axum::http::{header, HeaderName, HeaderValue};
use tower_http::set_header::SetResponseHeaderLayer;

const PERMISSIONS_POLICY: HeaderName = HeaderName::from_static("permissions-policy");

const CSP_API_VALUE: &str = "default-src 'none'; frame-ancestors 'none'";
const HSTS_VALUE: &str = "max-age=31536000; includeSubDomains";

/// Response headers for a JSON-only API. HSTS is only sent in production,
/// where the service sits behind TLS.
pub fn security_headers(include_hsts: bool) -> Vec<SetResponseHeaderLayer<HeaderValue>> {
    let mut headers = vec![
        (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
        (header::X_FRAME_OPTIONS, "DENY"),
        (header::X_XSS_PROTECTION, "1; mode=block"),
        (header::CONTENT_SECURITY_POLICY, CSP_API_VALUE),
        (header::REFERRER_POLICY, "strict-origin-when-cross-origin"),
        (PERMISSIONS_POLICY, "geolocation=(), microphone=(), camera=()"),
        (header::CACHE_CONTROL, "no-store"),
    ];
    if include_hsts {
        headers.push((header::STRICT_TRANSPORT_SECURITY, HSTS_VALUE));
    }

    headers
        .into_iter()
        .map(|(name, value)| {
            SetResponseHeaderLayer::overriding(name, HeaderValue::from_static(value))
        })
        .collect()
}
