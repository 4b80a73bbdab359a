// Named post-processors.
// An instance-scoped registry of pure transforms applied to responses on both hit and miss paths.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use regex::Regex;
use serde_json::{Value, json};

use crate::http::HttpResponse;

pub type PostProcessorFn = dyn Fn(&HttpResponse) -> Value + Send + Sync;

/// Names of the processors installed by [`register_builtins`].
pub const BUILTIN_PROCESSORS: &[&str] = &[
    "api_data",
    "api_error",
    "extract_links",
    "headers",
    "html_title",
    "json",
    "status",
    "text",
    "word_count",
];

/// Registry of named post-processors. Last registration under a name wins.
#[derive(Default)]
pub struct PostProcessorRegistry {
    processors: RwLock<HashMap<String, Arc<PostProcessorFn>>>,
}

impl PostProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, name: impl Into<String>, processor: F)
    where
        F: Fn(&HttpResponse) -> Value + Send + Sync + 'static,
    {
        self.processors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), Arc::new(processor));
    }

    pub fn get(&self, name: &str) -> Option<Arc<PostProcessorFn>> {
        self.processors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.processors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.processors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

impl fmt::Debug for PostProcessorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostProcessorRegistry")
            .field("names", &self.names())
            .finish()
    }
}

/// Install every built-in processor under its conventional name.
pub fn register_builtins(registry: &PostProcessorRegistry) {
    registry.register("json", json_body);
    registry.register("text", text);
    registry.register("status", status);
    registry.register("headers", headers);
    registry.register("extract_links", extract_links);
    registry.register("html_title", html_title);
    registry.register("word_count", word_count);
    registry.register("api_error", api_error);
    registry.register("api_data", api_data);
}

static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://[^\s<>"{}|\\^`\[\]]+"#).expect("link pattern is valid")
});

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<title>(.*?)</title>").expect("title pattern is valid"));

/// Parsed JSON body, `null` when the body is not JSON.
pub fn json_body(response: &HttpResponse) -> Value {
    response.json().unwrap_or(Value::Null)
}

pub fn text(response: &HttpResponse) -> Value {
    Value::String(response.text().into_owned())
}

pub fn status(response: &HttpResponse) -> Value {
    json!(response.status)
}

pub fn headers(response: &HttpResponse) -> Value {
    response
        .headers
        .iter()
        .map(|(name, value)| (name.to_string(), Value::String(value.to_string())))
        .collect::<serde_json::Map<_, _>>()
        .into()
}

/// Every http(s) URL appearing in the body, in order of appearance.
pub fn extract_links(response: &HttpResponse) -> Value {
    let body = response.text();
    LINK_RE
        .find_iter(&body)
        .map(|m| Value::String(m.as_str().to_string()))
        .collect()
}

pub fn html_title(response: &HttpResponse) -> Value {
    let body = response.text();
    let title = TITLE_RE
        .captures(&body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "No title found".to_string());
    Value::String(title)
}

pub fn word_count(response: &HttpResponse) -> Value {
    let body = response.text();
    let words: Vec<&str> = body.split_whitespace().collect();
    let unique: BTreeSet<&str> = words.iter().copied().collect();
    json!({
        "total_words": words.len(),
        "unique_words": unique.len(),
        "characters": body.chars().count(),
    })
}

/// Error summary for 4xx/5xx responses; `{"has_error": false}` otherwise.
pub fn api_error(response: &HttpResponse) -> Value {
    if response.status < 400 {
        return json!({ "has_error": false });
    }

    match response.json::<Value>() {
        Ok(details) => {
            let message = details
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Unknown error")
                .to_string();
            json!({
                "has_error": true,
                "status_code": response.status,
                "error_message": message,
                "error_details": details,
            })
        }
        Err(_) => {
            let text = response.text();
            let message = if text.is_empty() {
                "Unknown error".to_string()
            } else {
                text.into_owned()
            };
            json!({
                "has_error": true,
                "status_code": response.status,
                "error_message": message,
            })
        }
    }
}

/// The `data` field of a JSON envelope, or the whole document when absent.
pub fn api_data(response: &HttpResponse) -> Value {
    match response.json::<Value>() {
        Ok(doc) => doc.get("data").cloned().unwrap_or(doc),
        Err(_) => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Headers;

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse::new(status, Headers::new(), body.as_bytes().to_vec())
    }

    #[test]
    fn test_register_replaces_existing() {
        let registry = PostProcessorRegistry::new();
        registry.register("pick", |_| json!(1));
        registry.register("pick", |_| json!(2));

        let processor = registry.get("pick").unwrap();
        assert_eq!(processor(&response(200, "")), json!(2));
        assert_eq!(registry.names(), vec!["pick".to_string()]);
    }

    #[test]
    fn test_builtins_registered() {
        let registry = PostProcessorRegistry::new();
        register_builtins(&registry);
        assert_eq!(registry.names(), BUILTIN_PROCESSORS);
    }

    #[test]
    fn test_json_body() {
        assert_eq!(json_body(&response(200, r#"{"n":1}"#)), json!({"n": 1}));
        assert_eq!(json_body(&response(200, "not json")), Value::Null);
    }

    #[test]
    fn test_extract_links() {
        let links = extract_links(&response(
            200,
            "Visit https://example.com and http://test.org for more info.",
        ));
        assert_eq!(links, json!(["https://example.com", "http://test.org"]));
    }

    #[test]
    fn test_html_title() {
        let page = "<html><head><TITLE>Test Page</TITLE></head><body>Content</body></html>";
        assert_eq!(html_title(&response(200, page)), json!("Test Page"));
        assert_eq!(
            html_title(&response(200, "<html><body>No title here</body></html>")),
            json!("No title found")
        );
    }

    #[test]
    fn test_word_count() {
        let stats = word_count(&response(200, "This is a test sentence with some words."));
        assert_eq!(stats["total_words"], 8);
        assert_eq!(stats["unique_words"], 8);
        assert_eq!(stats["characters"], 40);
    }

    #[test]
    fn test_api_error() {
        let result = api_error(&response(404, r#"{"message": "Not found", "code": 404}"#));
        assert_eq!(result["has_error"], true);
        assert_eq!(result["status_code"], 404);
        assert_eq!(result["error_message"], "Not found");
        assert_eq!(result["error_details"]["code"], 404);

        let plain = api_error(&response(502, "Bad Gateway"));
        assert_eq!(plain["error_message"], "Bad Gateway");

        assert_eq!(api_error(&response(200, r#"{"data": 1}"#)), json!({"has_error": false}));
    }

    #[test]
    fn test_api_data() {
        let body = r#"{"data": {"id": 1, "name": "Test"}, "status": "ok"}"#;
        let wrapped = api_data(&response(200, body));
        assert_eq!(wrapped, json!({"id": 1, "name": "Test"}));

        let direct = api_data(&response(200, r#"{"id": 2, "name": "Direct"}"#));
        assert_eq!(direct, json!({"id": 2, "name": "Direct"}));

        assert_eq!(api_data(&response(200, "<html>")), Value::Null);
    }

    #[test]
    fn test_status_and_headers() {
        let mut h = Headers::new();
        h.insert("Content-Type", "text/plain");
        let r = HttpResponse::new(201, h, Vec::new());

        assert_eq!(status(&r), json!(201));
        assert_eq!(headers(&r), json!({"content-type": "text/plain"}));
    }
}
