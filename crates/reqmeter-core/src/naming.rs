//! Meter identity and name mapping.
//!
//! Discovery and the registry sinks report meters under a flat hierarchical
//! name: the camel-cased base name followed by `.key.value` for every tag in
//! key order, e.g. `httpServerRequests.response.ok.uri.root`. Prometheus
//! rendering uses a snake-cased base name with labels instead.

use std::fmt;

use crate::tags::{Tag, Tags};

/// Registry key: base name plus tags sorted by key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MeterId {
    name: String,
    tags: Vec<Tag>,
}

impl MeterId {
    pub fn new(name: impl Into<String>, tags: &Tags) -> Self {
        Self {
            name: name.into(),
            tags: tags.sorted(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    pub fn hierarchical_name(&self) -> String {
        let mut out = camel_case(&self.name);
        for t in &self.tags {
            out.push('.');
            out.push_str(&camel_case(&t.key));
            out.push('.');
            out.push_str(&t.value);
        }
        out.replace(' ', "_")
    }
}

impl fmt::Display for MeterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.tags.is_empty() {
            let joined = self
                .tags
                .iter()
                .map(|t| t.to_string())
                .collect::<Vec<_>>()
                .join(",");
            write!(f, "{{{joined}}}")?;
        }
        Ok(())
    }
}

/// `http.server.requests` -> `httpServerRequests`.
pub fn camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for c in name.chars() {
        if c == '.' {
            upper_next = !out.is_empty();
            continue;
        }
        if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// `http.server.requests` -> `http_server_requests`.
pub fn snake_case(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camel_cases_dotted_names() {
        assert_eq!(camel_case("http.server.requests"), "httpServerRequests");
        assert_eq!(camel_case("a"), "a");
        assert_eq!(camel_case(".leading"), "leading");
    }

    #[test]
    fn hierarchical_name_appends_sorted_tags() {
        let id = MeterId::new(
            "http.server.requests",
            &Tags::of(&[("uri", "root"), ("response", "ok")]),
        );
        assert_eq!(id.hierarchical_name(), "httpServerRequests.response.ok.uri.root");
    }

    #[test]
    fn hierarchical_name_replaces_spaces() {
        let id = MeterId::new("queue depth", &Tags::of(&[("pool", "main pool")]));
        assert_eq!(id.hierarchical_name(), "queue_depth.pool.main_pool");
    }

    #[test]
    fn snake_case_for_prometheus() {
        assert_eq!(snake_case("http.server.requests"), "http_server_requests");
    }
}
