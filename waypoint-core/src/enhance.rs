//! Request/Response Enhancers (§4.4): a fluent, idempotent surface for
//! building the outgoing response. Enhancers mutate an in-memory
//! [`Response`]; nothing is written to the wire until the dispatcher
//! finishes the chain (no-eager-write invariant, §4.4/§8).

use std::collections::HashMap;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::Serialize;

use crate::error::DispatchResult;

/// A single `Set-Cookie` directive, built incrementally via [`Response::cookie`].
#[derive(Debug, Clone)]
pub struct CookieOptions {
    pub http_only: bool,
    pub secure: bool,
    pub same_site: Option<&'static str>,
    pub max_age_secs: Option<u64>,
    pub path: Option<String>,
    pub domain: Option<String>,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self { http_only: true, secure: false, same_site: Some("Lax"), max_age_secs: None, path: Some("/".into()), domain: None }
    }
}

/// The in-flight response a handler/middleware enhances. Enhancer calls are
/// idempotent: calling `.status()` or `.json()` twice simply overwrites the
/// previous value rather than producing two responses.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    sent: bool,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self { status, headers: HeaderMap::new(), body: Bytes::new(), sent: false }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Whether a handler has already produced a body for this response. Used
    /// by the dispatcher to decide whether to apply the implicit-200 rule.
    pub fn is_sent(&self) -> bool {
        self.sent
    }

    pub fn status_mut(&mut self, code: StatusCode) -> &mut Self {
        self.status = code;
        self
    }

    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::from_str(value)) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn get_header(&self, name: &str) -> Option<String> {
        self.headers.get(name).and_then(|v| v.to_str().ok()).map(|s| s.to_string())
    }

    pub fn remove_header(&mut self, name: &str) -> &mut Self {
        if let Ok(name) = HeaderName::try_from(name) {
            self.headers.remove(name);
        }
        self
    }

    pub fn json<T: Serialize>(&mut self, value: &T) -> DispatchResult<&mut Self> {
        let bytes = serde_json::to_vec(value)?;
        self.body = Bytes::from(bytes);
        self.set_header("content-type", "application/json; charset=utf-8");
        self.sent = true;
        Ok(self)
    }

    pub fn text(&mut self, value: impl Into<String>) -> &mut Self {
        self.body = Bytes::from(value.into().into_bytes());
        self.set_header("content-type", "text/plain; charset=utf-8");
        self.sent = true;
        self
    }

    pub fn html(&mut self, value: impl Into<String>) -> &mut Self {
        self.body = Bytes::from(value.into().into_bytes());
        self.set_header("content-type", "text/html; charset=utf-8");
        self.sent = true;
        self
    }

    pub fn xml(&mut self, value: impl Into<String>) -> &mut Self {
        self.body = Bytes::from(value.into().into_bytes());
        self.set_header("content-type", "application/xml; charset=utf-8");
        self.sent = true;
        self
    }

    /// Serialize `rows` as CSV using the given column order. Each row is a
    /// map of column name to already-stringified cell value.
    pub fn csv(&mut self, columns: &[&str], rows: &[HashMap<String, String>]) -> &mut Self {
        let mut out = String::new();
        out.push_str(&columns.join(","));
        out.push_str("\r\n");
        for row in rows {
            let line: Vec<&str> = columns.iter().map(|c| row.get(*c).map(|s| s.as_str()).unwrap_or("")).collect();
            out.push_str(&line.join(","));
            out.push_str("\r\n");
        }
        self.body = Bytes::from(out.into_bytes());
        self.set_header("content-type", "text/csv; charset=utf-8");
        self.sent = true;
        self
    }

    pub fn send(&mut self, bytes: impl Into<Bytes>) -> &mut Self {
        self.body = bytes.into();
        self.sent = true;
        self
    }

    pub fn redirect(&mut self, location: &str) -> &mut Self {
        self.redirect_with_status(StatusCode::FOUND, location)
    }

    pub fn redirect_with_status(&mut self, status: StatusCode, location: &str) -> &mut Self {
        self.status = status;
        self.set_header("location", location);
        self.sent = true;
        self
    }

    /// Delegates the actual file transfer to the host HTTP stack; waypoint
    /// only records the intent via headers, since static-file serving is
    /// out of scope (§1 Non-goals).
    pub fn send_file(&mut self, path: &str) -> &mut Self {
        self.set_header("x-waypoint-send-file", path);
        self.sent = true;
        self
    }

    pub fn download(&mut self, path: &str, filename: &str) -> &mut Self {
        self.send_file(path);
        self.set_header("content-disposition", &format!("attachment; filename=\"{filename}\""));
        self
    }

    pub fn cookie(&mut self, name: &str, value: &str, opts: &CookieOptions) -> &mut Self {
        let mut directive = format!("{name}={value}");
        if let Some(path) = &opts.path {
            directive.push_str(&format!("; Path={path}"));
        }
        if let Some(domain) = &opts.domain {
            directive.push_str(&format!("; Domain={domain}"));
        }
        if let Some(max_age) = opts.max_age_secs {
            directive.push_str(&format!("; Max-Age={max_age}"));
        }
        if opts.http_only {
            directive.push_str("; HttpOnly");
        }
        if opts.secure {
            directive.push_str("; Secure");
        }
        if let Some(same_site) = opts.same_site {
            directive.push_str(&format!("; SameSite={same_site}"));
        }
        self.append_header("set-cookie", &directive);
        self
    }

    pub fn clear_cookie(&mut self, name: &str) -> &mut Self {
        let opts = CookieOptions { max_age_secs: Some(0), ..Default::default() };
        self.cookie(name, "", &opts)
    }

    fn append_header(&mut self, name: &str, value: &str) {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::from_str(value)) {
            self.headers.append(name, value);
        }
    }

    pub fn cache_control(&mut self, directive: &str) -> &mut Self {
        self.set_header("cache-control", directive)
    }

    pub fn no_cache(&mut self) -> &mut Self {
        self.cache_control("no-store, no-cache, must-revalidate")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_sets_content_type_and_marks_sent() {
        let mut r = Response::new(StatusCode::OK);
        r.json(&serde_json::json!({"ok": true})).unwrap();
        assert!(r.is_sent());
        assert_eq!(r.get_header("content-type").unwrap(), "application/json; charset=utf-8");
    }

    #[test]
    fn repeated_enhancer_calls_are_idempotent_overwrites() {
        let mut r = Response::new(StatusCode::OK);
        r.text("first");
        r.text("second");
        assert_eq!(r.body().as_ref(), b"second");
    }

    #[test]
    fn cookie_builds_expected_directive() {
        let mut r = Response::new(StatusCode::OK);
        r.cookie("session", "abc123", &CookieOptions { secure: true, ..Default::default() });
        let value = r.get_header("set-cookie").unwrap();
        assert!(value.contains("session=abc123"));
        assert!(value.contains("HttpOnly"));
        assert!(value.contains("Secure"));
    }

    #[test]
    fn redirect_sets_location_and_status() {
        let mut r = Response::new(StatusCode::OK);
        r.redirect("/login");
        assert_eq!(r.status(), StatusCode::FOUND);
        assert_eq!(r.get_header("location").unwrap(), "/login");
    }
}
