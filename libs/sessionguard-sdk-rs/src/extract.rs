//! Token extraction utilities.

/// Framework-agnostic view of an inbound request's headers.
///
/// Implement this trait for your framework's header type to use
/// `SessionRecipe::verify_session()`.
///
/// # Example
///
/// ```rust,ignore
/// use sessionguard_sdk::SessionRequest;
///
/// // For axum
/// impl SessionRequest for axum::http::HeaderMap {
///     fn get_header(&self, name: &str) -> Option<&str> {
///         self.get(name).and_then(|v| v.to_str().ok())
///     }
/// }
/// ```
pub trait SessionRequest {
    /// Get a header value by (case-insensitive) name.
    fn get_header(&self, name: &str) -> Option<&str>;

    /// Get the Authorization header value.
    fn get_authorization(&self) -> Option<&str> {
        self.get_header("authorization")
    }

    /// Get the Cookie header value.
    fn get_cookie(&self) -> Option<&str> {
        self.get_header("cookie")
    }
}

/// Extract token from Authorization Bearer header.
pub fn extract_from_header(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Extract a named cookie from a cookie header, URL-decoding its value.
pub fn extract_from_cookie(cookie_header: &str, name: &str) -> Option<String> {
    for cookie in cookie_header.split(';') {
        let Some((key, value)) = cookie.trim().split_once('=') else {
            continue;
        };
        if key == name {
            return Some(urlencoding_decode(value).unwrap_or_else(|| value.to_string()));
        }
    }
    None
}

/// Access token from the Bearer header, falling back to the cookie.
pub fn access_token_from_request<R: SessionRequest + ?Sized>(req: &R, cookie_name: &str) -> Option<String> {
    req.get_authorization()
        .and_then(extract_from_header)
        .map(str::to_string)
        .or_else(|| {
            req.get_cookie()
                .and_then(|cookies| extract_from_cookie(cookies, cookie_name))
        })
}

pub fn refresh_token_from_request<R: SessionRequest + ?Sized>(req: &R, cookie_name: &str) -> Option<String> {
    req.get_cookie()
        .and_then(|cookies| extract_from_cookie(cookies, cookie_name))
}

/// URL decoding of %XX sequences; `None` on malformed input.
fn urlencoding_decode(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = s.get(i + 1..i + 3)?;
            decoded.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8(decoded).ok()
}
