use crate::error::{DispatchError, DispatchResult};

/// One segment of a registered [`crate::route::Route`] pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Param(String),
}

/// A parsed, normalized route pattern — an ordered sequence of literal or
/// `:name` segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    pub segments: Vec<Segment>,
    pub raw: String,
}

impl Pattern {
    /// Parse and normalize a pattern string.
    ///
    /// Trailing slashes are trimmed unless `strict` is set; segments are
    /// lowercased unless `case_sensitive` is set. Empty segments caused by a
    /// collapsed `//` fail with [`DispatchError::InvalidPattern`].
    pub fn parse(raw: &str, case_sensitive: bool, strict: bool) -> DispatchResult<Self> {
        let normalized = normalize_path(raw, strict);
        let mut segments = Vec::new();
        let mut seen_params = std::collections::HashSet::new();

        if normalized != "/" {
            for part in normalized.trim_start_matches('/').split('/') {
                if part.is_empty() {
                    return Err(DispatchError::InvalidPattern(format!(
                        "empty path segment in pattern `{raw}`"
                    )));
                }
                if let Some(name) = part.strip_prefix(':') {
                    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                        return Err(DispatchError::InvalidPattern(format!(
                            "invalid parameter name `:{name}` in pattern `{raw}`"
                        )));
                    }
                    if !seen_params.insert(name.to_string()) {
                        return Err(DispatchError::InvalidPattern(format!(
                            "duplicate parameter name `:{name}` in pattern `{raw}`"
                        )));
                    }
                    segments.push(Segment::Param(name.to_string()));
                } else {
                    let literal = if case_sensitive { part.to_string() } else { part.to_lowercase() };
                    segments.push(Segment::Literal(literal));
                }
            }
        }

        Ok(Pattern { segments, raw: normalized })
    }

    pub fn is_static(&self) -> bool {
        self.segments.iter().all(|s| matches!(s, Segment::Literal(_)))
    }

    /// Render a concrete path by substituting each `:name` segment with the
    /// matching value, for tests and for mounting sub-indexes under a prefix.
    pub fn with_prefix(&self, prefix: &Pattern) -> Pattern {
        let mut segments = prefix.segments.clone();
        segments.extend(self.segments.clone());
        let raw = if prefix.raw == "/" {
            self.raw.clone()
        } else {
            format!("{}{}", prefix.raw, self.raw)
        };
        Pattern { segments, raw }
    }
}

/// Canonicalize a raw request or registration path.
///
/// Empty path and `/` both canonicalize to `/` when `strict` is false;
/// when `strict` is true they remain distinct (`""` is treated as `/`
/// regardless, since an empty path is never observable from a real request).
pub fn normalize_path(path: &str, strict: bool) -> String {
    let path = if path.is_empty() { "/" } else { path };
    if path == "/" {
        return "/".to_string();
    }
    if strict {
        return path.to_string();
    }
    if path.len() > 1 && path.ends_with('/') {
        path.trim_end_matches('/').to_string()
    } else {
        path.to_string()
    }
}
