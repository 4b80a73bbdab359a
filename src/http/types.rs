// HTTP request and response types.
// Defines the normalized request handed to transports and the response stored on disk.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use url::{Url, form_urlencoded};

use crate::error::{CacheError, Result};

/// Header mapping with case-insensitive names.
///
/// Names are stored lowercased; repeated names are joined with `", "`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, String>")]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header, appending to any existing value under the same name.
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        let name = name.as_ref().trim().to_ascii_lowercase();
        let value = value.into();
        self.0
            .entry(name)
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }

    /// Replace any existing value for the header.
    pub fn set(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.0
            .insert(name.as_ref().trim().to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(&name.to_ascii_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keep only headers whose names appear in `names` (lowercase).
    pub fn subset(&self, names: &[&str]) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(k, _)| names.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

impl From<BTreeMap<String, String>> for Headers {
    fn from(map: BTreeMap<String, String>) -> Self {
        map.into_iter().collect()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

/// Request body variants recognized by the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RequestBody {
    Json(Value),
    Form(Vec<(String, String)>),
    Text(String),
    Bytes(#[serde(with = "base64_bytes")] Vec<u8>),
}

/// Per-request options: query parameters, body, headers, and a timeout hint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    pub query: Vec<(String, String)>,
    pub headers: Headers,
    pub body: Option<RequestBody>,
    /// Forwarded to the transport; the cache itself never times out.
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(RequestBody::Json(body));
        self
    }

    pub fn form<K: Into<String>, V: Into<String>>(
        mut self,
        pairs: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        let pairs = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.body = Some(RequestBody::Form(pairs));
        self
    }

    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.body = Some(RequestBody::Text(body.into()));
        self
    }

    pub fn bytes(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(RequestBody::Bytes(body.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A validated, normalized request.
///
/// The URL carries every query parameter (from the URL itself and from the
/// options) sorted by name then value, with the fragment removed. Parameters
/// taken from the URL keep their original percent-encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: String,
    pub url: Url,
    pub headers: Headers,
    pub body: Option<RequestBody>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: &str, url: &str, options: &RequestOptions) -> Result<Self> {
        let method = method.trim();
        if method.is_empty() {
            return Err(CacheError::InvalidRequest("empty HTTP method".to_string()));
        }
        if !method.chars().all(|c| c.is_ascii_graphic()) {
            return Err(CacheError::InvalidRequest(format!(
                "invalid HTTP method: {:?}",
                method
            )));
        }

        let mut parsed = Url::parse(url)
            .map_err(|e| CacheError::InvalidRequest(format!("{}: {}", url, e)))?;
        if !parsed.has_host() {
            return Err(CacheError::InvalidRequest(format!(
                "URL has no host: {}",
                url
            )));
        }

        // URL segments keep their original encoding; option pairs are form-encoded.
        let mut segments: Vec<String> = parsed
            .query()
            .into_iter()
            .flat_map(|query| query.split('&'))
            .filter(|segment| !segment.is_empty())
            .map(str::to_owned)
            .chain(options.query.iter().map(|(name, value)| {
                form_urlencoded::Serializer::new(String::new())
                    .append_pair(name, value)
                    .finish()
            }))
            .collect();
        segments.sort_by(|a, b| split_segment(a).cmp(&split_segment(b)).then_with(|| a.cmp(b)));

        parsed.set_fragment(None);
        if segments.is_empty() {
            parsed.set_query(None);
        } else {
            parsed.set_query(Some(&segments.join("&")));
        }

        Ok(Self {
            method: method.to_ascii_uppercase(),
            url: parsed,
            headers: options.headers.clone(),
            body: options.body.clone(),
            timeout: options.timeout,
        })
    }
}

/// Split a raw query segment into its still-encoded name and value.
fn split_segment(segment: &str) -> (&str, &str) {
    segment.split_once('=').unwrap_or((segment, ""))
}

/// A response as obtained from the transport and stored in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: Headers,
    /// Charset declared by the `content-type` header, lowercased.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charset: Option<String>,
    #[serde(with = "body_format")]
    pub body: Vec<u8>,
    /// Final URL after redirects, when the transport reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl HttpResponse {
    pub fn new(status: u16, headers: Headers, body: impl Into<Vec<u8>>) -> Self {
        let charset = headers.get("content-type").and_then(parse_charset);
        Self {
            status,
            headers,
            charset,
            body: body.into(),
            url: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }
}

/// Extract the `charset` parameter from a `content-type` value.
fn parse_charset(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if name.trim().eq_ignore_ascii_case("charset") {
            let value = value.trim().trim_matches('"');
            (!value.is_empty()).then(|| value.to_ascii_lowercase())
        } else {
            None
        }
    })
}

/// Stores bodies as text when they are valid UTF-8, base64 otherwise.
mod body_format {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

    #[derive(Serialize, Deserialize)]
    #[serde(tag = "encoding", rename_all = "snake_case")]
    enum Repr {
        Text { text: String },
        Base64 { data: String },
    }

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        let repr = match std::str::from_utf8(body) {
            Ok(text) => Repr::Text {
                text: text.to_owned(),
            },
            Err(_) => Repr::Base64 {
                data: STANDARD.encode(body),
            },
        };
        repr.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Text { text } => Ok(text.into_bytes()),
            Repr::Base64 { data } => STANDARD.decode(data).map_err(de::Error::custom),
        }
    }
}

mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_case_insensitive() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "application/json");
        headers.insert("X-Trace", "a");
        headers.insert("x-trace", "b");

        assert_eq!(headers.get("content-type"), Some("application/json"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("application/json"));
        assert_eq!(headers.get("X-TRACE"), Some("a, b"));
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn test_headers_deserialize_lowercases() {
        let headers: Headers = serde_json::from_str(r#"{"Accept": "text/html"}"#).unwrap();
        assert_eq!(headers.get("accept"), Some("text/html"));
        assert_eq!(headers.iter().next(), Some(("accept", "text/html")));
    }

    #[test]
    fn test_request_sorts_and_merges_query() {
        let options = RequestOptions::new().query("b", "2").query("a", "9");
        let request =
            HttpRequest::new("get", "https://API.example.test/items?c=3&a=1#frag", &options)
                .unwrap();

        assert_eq!(request.method, "GET");
        assert_eq!(
            request.url.as_str(),
            "https://api.example.test/items?a=1&a=9&b=2&c=3"
        );
    }

    #[test]
    fn test_request_keeps_raw_query_segments() {
        let options = RequestOptions::new();
        let flag = HttpRequest::new("GET", "https://legacy.test/search?flag", &options).unwrap();
        assert_eq!(flag.url.query(), Some("flag"));

        let latin1 = HttpRequest::new("GET", "https://legacy.test/search?q=%FF", &options).unwrap();
        assert_eq!(latin1.url.query(), Some("q=%FF"));
    }

    #[test]
    fn test_request_sorts_raw_and_option_segments_by_name() {
        let options = RequestOptions::new().query("a b", "x&y");
        let request =
            HttpRequest::new("GET", "https://example.test/?b-c=1&b=2&flag&", &options).unwrap();
        assert_eq!(request.url.query(), Some("a+b=x%26y&b=2&b-c=1&flag"));
    }

    #[test]
    fn test_request_rejects_bad_input() {
        let options = RequestOptions::new();
        assert!(matches!(
            HttpRequest::new("", "https://example.test", &options),
            Err(CacheError::InvalidRequest(_))
        ));
        assert!(matches!(
            HttpRequest::new("GET", "/relative/path", &options),
            Err(CacheError::InvalidRequest(_))
        ));
        assert!(matches!(
            HttpRequest::new("GET", "mailto:someone@example.test", &options),
            Err(CacheError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_response_charset_from_content_type() {
        let headers: Headers = [("Content-Type", "text/html; Charset=\"ISO-8859-1\"")]
            .into_iter()
            .collect();
        let response = HttpResponse::new(200, headers, b"<html></html>".to_vec());
        assert_eq!(response.charset.as_deref(), Some("iso-8859-1"));

        let plain = HttpResponse::new(200, Headers::new(), Vec::new());
        assert_eq!(plain.charset, None);
    }

    #[test]
    fn test_binary_body_survives_serialization() {
        let body = vec![0u8, 159, 146, 150, 255, 10];
        let response = HttpResponse::new(200, Headers::new(), body.clone());

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"encoding\":\"base64\""));

        let restored: HttpResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.body, body);
    }

    #[test]
    fn test_text_body_stored_readable() {
        let response = HttpResponse::new(200, Headers::new(), "héllo\n".as_bytes().to_vec());
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"encoding\":\"text\""));
        assert!(json.contains("héllo"));
    }
}
