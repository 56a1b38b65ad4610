//! Browser origin policy: a fixed allow-list plus a family of
//! preview-deployment origins matched by a regular expression.

use axum::http::{HeaderValue, Method, header, request::Parts};
use regex::Regex;
use tower_http::cors::{AllowOrigin, CorsLayer};

#[derive(Debug, Clone)]
pub struct OriginPolicy {
    allowed: Vec<String>,
    preview: Option<Regex>,
}

impl OriginPolicy {
    pub fn new(allowed: Vec<String>, preview_pattern: Option<&str>) -> Result<Self, regex::Error> {
        let preview = preview_pattern
            .filter(|p| !p.is_empty())
            .map(Regex::new)
            .transpose()?;
        Ok(Self {
            allowed: allowed
                .into_iter()
                .map(|o| o.trim().trim_end_matches('/').to_string())
                .filter(|o| !o.is_empty())
                .collect(),
            preview,
        })
    }

    pub fn allows(&self, origin: &str) -> bool {
        self.allowed.iter().any(|o| o == origin)
            || self.preview.as_ref().is_some_and(|re| re.is_match(origin))
    }

    pub fn layer(self) -> CorsLayer {
        CorsLayer::new()
            .allow_origin(AllowOrigin::predicate(
                move |origin: &HeaderValue, _request: &Parts| {
                    origin.to_str().is_ok_and(|o| self.allows(o))
                },
            ))
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
    }
}
