//! URL normalization and endpoint path-template matching.

use layergraph_core::Node;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;

/// Template-engine or scripting expression embedded in a literal URL.
static EXPRESSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{[^}]*\}|#\{[^}]*\}|<%=?[^%]*%>|\{\{[^}]*\}\}|['\x22]\s*\+|\+\s*['\x22]")
        .unwrap()
});

/// `{name}` or `{name:regex}` inside a template segment.
static TEMPLATE_VARIABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)(?::([^{}]*(?:\{[^{}]*\}[^{}]*)*))?\}").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlSegment {
    Literal(String),
    /// Value only known at runtime; matches any template segment.
    Dynamic,
}

/// Splits a literal URL found in a view into comparable path segments.
///
/// Scheme and host, query string, fragment, empty segments and a leading
/// context-path expression are dropped.
pub fn normalize_url(raw: &str) -> Vec<UrlSegment> {
    let trimmed = raw.trim().trim_matches(|c| c == '"' || c == '\'' || c == '`');
    let path = strip_query(trimmed);
    let path = strip_origin(path);

    let mut parts: Vec<&str> = path
        .split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();

    if let Some(first) = parts.first() {
        if is_expression(first) && is_context_path(first) {
            parts.remove(0);
        }
    }

    parts
        .into_iter()
        .map(|part| {
            if is_expression(part) {
                UrlSegment::Dynamic
            } else {
                UrlSegment::Literal(part.to_string())
            }
        })
        .collect()
}

fn strip_query(url: &str) -> &str {
    let bytes = url.as_bytes();
    for (idx, byte) in bytes.iter().enumerate() {
        match byte {
            b'?' => return &url[..idx],
            b'#' if bytes.get(idx + 1) != Some(&b'{') => return &url[..idx],
            _ => {}
        }
    }
    url
}

fn strip_origin(url: &str) -> &str {
    let rest = if let Some(idx) = url.find("://") {
        &url[idx + 3..]
    } else if let Some(rest) = url.strip_prefix("//") {
        rest
    } else {
        return url;
    };
    match rest.find('/') {
        Some(idx) => &rest[idx..],
        None => "",
    }
}

fn is_expression(segment: &str) -> bool {
    EXPRESSION.is_match(segment)
}

fn is_context_path(segment: &str) -> bool {
    let lower = segment.to_lowercase();
    ["contextpath", "ctx", "basepath", "base_path", "context_path"]
        .iter()
        .any(|needle| lower.contains(needle))
}

#[derive(Debug, Clone)]
enum TemplateSegment {
    Literal(String),
    Variable(Option<Regex>),
    Wildcard,
}

/// A parsed endpoint path such as `/users/{id:\d+}/orders`.
#[derive(Debug, Clone)]
pub struct PathTemplate {
    raw: String,
    segments: Vec<TemplateSegment>,
}

impl PathTemplate {
    pub fn parse(template: &str) -> Self {
        let path = strip_query(template.trim());
        let segments = path
            .split('/')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(parse_segment)
            .collect();
        Self {
            raw: template.trim().to_string(),
            segments,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn literal_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, TemplateSegment::Literal(_)))
            .count()
    }

    /// Returns the template's literal segment count when `url` matches it.
    pub fn matches(&self, url: &[UrlSegment]) -> Option<usize> {
        if url.len() != self.segments.len() {
            return None;
        }
        let all_match = self.segments.iter().zip(url).all(|(tpl, seg)| match (tpl, seg) {
            (_, UrlSegment::Dynamic) => true,
            (TemplateSegment::Literal(expected), UrlSegment::Literal(actual)) => expected == actual,
            (TemplateSegment::Variable(Some(re)), UrlSegment::Literal(actual)) => re.is_match(actual),
            (TemplateSegment::Variable(None), UrlSegment::Literal(_)) => true,
            (TemplateSegment::Wildcard, UrlSegment::Literal(_)) => true,
        });
        all_match.then(|| self.literal_count())
    }
}

fn parse_segment(segment: &str) -> TemplateSegment {
    if segment == "*" || segment == "**" {
        return TemplateSegment::Wildcard;
    }
    if segment.starts_with(':') && segment.len() > 1 {
        return TemplateSegment::Variable(None);
    }
    if !segment.contains('{') {
        return TemplateSegment::Literal(segment.to_string());
    }

    // Whole-segment `{name}` without a constraint needs no regex.
    if let Some(caps) = TEMPLATE_VARIABLE.captures(segment) {
        if caps.get(0).map(|m| m.as_str()) == Some(segment) && caps.get(2).is_none() {
            return TemplateSegment::Variable(None);
        }
    }

    let mut pattern = String::from("^");
    let mut last = 0;
    for caps in TEMPLATE_VARIABLE.captures_iter(segment) {
        let Some(whole) = caps.get(0) else { continue };
        pattern.push_str(&regex::escape(&segment[last..whole.start()]));
        match caps.get(2) {
            Some(constraint) => {
                pattern.push_str("(?:");
                pattern.push_str(constraint.as_str());
                pattern.push(')');
            }
            None => pattern.push_str("[^/]+"),
        }
        last = whole.end();
    }
    pattern.push_str(&regex::escape(&segment[last..]));
    pattern.push('$');

    match Regex::new(&pattern) {
        Ok(re) => TemplateSegment::Variable(Some(re)),
        Err(_) => TemplateSegment::Variable(None),
    }
}

/// Path templates and HTTP verbs an Endpoint node answers to.
#[derive(Debug, Clone)]
pub struct EndpointRoute {
    pub templates: Vec<PathTemplate>,
    /// Upper-cased verbs; empty means any verb.
    pub verbs: Vec<String>,
}

impl EndpointRoute {
    /// Reads `path`/`paths` and `method`/`methods` from the node's properties.
    /// A qualified name that itself looks like a path is used when no path
    /// property is present.
    pub fn from_node(node: &Node) -> Self {
        let mut paths = string_list(node.properties.get("path"));
        paths.extend(string_list(node.properties.get("paths")));
        if paths.is_empty() && node.qualified_name.starts_with('/') {
            paths.push(node.qualified_name.clone());
        }

        let mut verbs: Vec<String> = string_list(node.properties.get("method"))
            .into_iter()
            .chain(string_list(node.properties.get("methods")))
            .map(|v| v.trim().to_uppercase())
            .filter(|v| !v.is_empty() && v != "ANY" && v != "*")
            .collect();
        verbs.sort();
        verbs.dedup();

        Self {
            templates: paths.iter().map(|p| PathTemplate::parse(p)).collect(),
            verbs,
        }
    }

    pub fn accepts_any_verb(&self) -> bool {
        self.verbs.is_empty()
    }

    pub fn accepts_verb(&self, verb: &str) -> bool {
        self.accepts_any_verb() || self.verbs.iter().any(|v| v.eq_ignore_ascii_case(verb))
    }

    /// Best-matching template for `url`: most literal segments wins.
    pub fn best_match(&self, url: &[UrlSegment]) -> Option<(&PathTemplate, usize)> {
        self.templates
            .iter()
            .filter_map(|t| t.matches(url).map(|score| (t, score)))
            .max_by_key(|(_, score)| *score)
    }
}

fn string_list(value: Option<&JsonValue>) -> Vec<String> {
    match value {
        Some(JsonValue::String(s)) => vec![s.clone()],
        Some(JsonValue::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use layergraph_core::NodeKind;
    use serde_json::json;

    fn lit(s: &str) -> UrlSegment {
        UrlSegment::Literal(s.to_string())
    }

    #[test]
    fn normalization_strips_origin_query_and_context_path() {
        assert_eq!(
            normalize_url("http://localhost:8080/users/42?x=1#top"),
            vec![lit("users"), lit("42")]
        );
        assert_eq!(
            normalize_url("${pageContext.request.contextPath}/users/42/"),
            vec![lit("users"), lit("42")]
        );
        assert_eq!(
            normalize_url("<%=request.getContextPath()%>/orders"),
            vec![lit("orders")]
        );
        assert_eq!(
            normalize_url("/users/${user.id}/edit"),
            vec![lit("users"), UrlSegment::Dynamic, lit("edit")]
        );
    }

    #[test]
    fn variables_accept_any_literal_and_regex_constrains() {
        let url = normalize_url("/users/42");
        assert_eq!(PathTemplate::parse("/users/{id}").matches(&url), Some(1));
        assert_eq!(PathTemplate::parse("/users/{id:\\d+}").matches(&url), Some(1));
        assert_eq!(
            PathTemplate::parse("/users/{id:\\d+}").matches(&normalize_url("/users/abc")),
            None
        );
        assert_eq!(PathTemplate::parse("/users/new").matches(&url), None);
        assert_eq!(PathTemplate::parse("/users").matches(&url), None);
    }

    #[test]
    fn dynamic_segments_match_literals() {
        let url = normalize_url("/users/#{id}");
        assert_eq!(PathTemplate::parse("/users/new").matches(&url), Some(2));
        assert_eq!(PathTemplate::parse("/users/:id").matches(&url), Some(1));
    }

    #[test]
    fn embedded_variables_become_patterns() {
        let tpl = PathTemplate::parse("/files/{name}.json");
        assert_eq!(tpl.matches(&normalize_url("/files/report.json")), Some(1));
        assert_eq!(tpl.matches(&normalize_url("/files/report.xml")), None);
    }

    #[test]
    fn route_reads_paths_and_verbs_from_properties() {
        let node = Node::new(NodeKind::Endpoint, "c.UserController.get")
            .with_property("path", json!(["/users/{id}", "/u/{id}"]))
            .with_property("method", json!("get"));
        let route = EndpointRoute::from_node(&node);
        assert_eq!(route.templates.len(), 2);
        assert!(route.accepts_verb("GET"));
        assert!(!route.accepts_verb("POST"));

        let (tpl, score) = route.best_match(&normalize_url("/u/7")).unwrap();
        assert_eq!(tpl.as_str(), "/u/{id}");
        assert_eq!(score, 1);
    }
}
