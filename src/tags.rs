//! Tag tokens and their resolution against HTTP exchanges.
//!
//! A field template is plain text with embedded tokens. Four token kinds
//! exist, each carrying the key it looks up:
//!
//! | token                      | resolves to                           |
//! |----------------------------|---------------------------------------|
//! | `${REQUEST:<part>}`        | scheme, host, path, query, method, proto, referer, body |
//! | `${REQUEST_HEADER:<name>}` | the named request header              |
//! | `${RESPONSE:<part>}`       | status, body, proto                   |
//! | `${RESPONSE_HEADER:<name>}`| the named response header             |
//!
//! The bare form `REQUEST:method` (no `${` `}` delimiters) is accepted too; its
//! key runs until the next `}` or the end of the text. Keys are matched
//! case-insensitively and anything unknown resolves to the empty string.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bytes::Bytes;
use http::header::REFERER;
use http::{HeaderMap, HeaderName, Method, StatusCode, Uri, Version};
use serde_json::{Map, Value};
use thiserror::Error;

/// Which half of an exchange a tag reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Request,
    Response,
}

/// A single recognised token. The key is stored lowercased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tag {
    RequestPart(String),
    RequestHeader(String),
    ResponsePart(String),
    ResponseHeader(String),
}

// Longer prefixes first so `REQUEST_HEADER:` never lexes as `REQUEST`.
const PREFIXES: [(&str, fn(String) -> Tag); 4] = [
    ("REQUEST_HEADER:", Tag::RequestHeader),
    ("RESPONSE_HEADER:", Tag::ResponseHeader),
    ("REQUEST:", Tag::RequestPart),
    ("RESPONSE:", Tag::ResponsePart),
];

impl Tag {
    pub fn side(&self) -> Side {
        match self {
            Tag::RequestPart(_) | Tag::RequestHeader(_) => Side::Request,
            Tag::ResponsePart(_) | Tag::ResponseHeader(_) => Side::Response,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Tag::RequestPart(key)
            | Tag::RequestHeader(key)
            | Tag::ResponsePart(key)
            | Tag::ResponseHeader(key) => key,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    /// `raw` is the exact source text, emitted when the tag belongs to the
    /// other side of the exchange.
    Tag { tag: Tag, raw: String },
}

/// A field template compiled once at startup and shared read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    raw: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let segments = tokenize(&raw);
        Self { raw, segments }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn tags(&self) -> impl Iterator<Item = &Tag> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Tag { tag, .. } => Some(tag),
            Segment::Literal(_) => None,
        })
    }

    /// Substitute every tag owned by `source`; tags of the other side are
    /// copied through untouched.
    pub fn render(&self, source: &dyn TagSource) -> String {
        let mut out = String::with_capacity(self.raw.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Tag { tag, .. } if tag.side() == source.side() => {
                    out.push_str(&source.resolve(tag));
                }
                Segment::Tag { raw, .. } => out.push_str(raw),
            }
        }
        out
    }

    /// Name under which a rendered value is logged.
    ///
    /// A template made of exactly one delimited token is named after its key,
    /// so `${REQUEST:method}` logs as `method`. Older deployments only trimmed
    /// a leading `REQUEST:`-style prefix and would have logged that field as
    /// `${REQUEST:method}`. Otherwise a leading kind prefix is stripped.
    pub fn display_name(&self) -> &str {
        if let [Segment::Tag { raw, .. }] = self.segments.as_slice() {
            if let Some(inner) = raw.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
                return strip_kind_prefix(inner);
            }
        }
        strip_kind_prefix(&self.raw)
    }
}

fn strip_kind_prefix(text: &str) -> &str {
    PREFIXES
        .iter()
        .find_map(|(prefix, _)| text.strip_prefix(prefix))
        .unwrap_or(text)
}

fn match_prefix(text: &str) -> Option<(&'static str, fn(String) -> Tag)> {
    PREFIXES
        .iter()
        .find(|(prefix, _)| text.starts_with(prefix))
        .copied()
}

fn tokenize(raw: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut rest = raw;

    while let Some(ch) = rest.chars().next() {
        if let Some((len, segment)) = lex_tag(rest) {
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(segment);
            rest = &rest[len..];
        } else {
            literal.push(ch);
            rest = &rest[ch.len_utf8()..];
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    segments
}

/// Try to lex a tag at the start of `text`, returning the consumed length.
fn lex_tag(text: &str) -> Option<(usize, Segment)> {
    if let Some(inner) = text.strip_prefix("${") {
        if let Some((prefix, build)) = match_prefix(inner) {
            let body = &inner[prefix.len()..];
            if let Some(close) = body.find('}') {
                if close > 0 {
                    let len = 2 + prefix.len() + close + 1;
                    let tag = build(body[..close].to_ascii_lowercase());
                    let raw = text[..len].to_string();
                    return Some((len, Segment::Tag { tag, raw }));
                }
            }
        }
        return None;
    }

    let (prefix, build) = match_prefix(text)?;
    let body = &text[prefix.len()..];
    let end = body.find('}').unwrap_or(body.len());
    if end == 0 {
        return None;
    }
    let len = prefix.len() + end;
    let tag = build(body[..end].to_ascii_lowercase());
    Some((
        len,
        Segment::Tag {
            tag,
            raw: text[..len].to_string(),
        },
    ))
}

/// Something tags can be resolved against.
pub trait TagSource {
    fn side(&self) -> Side;

    /// Value for `tag`, or the empty string when it is unknown or absent.
    fn resolve(&self, tag: &Tag) -> String;
}

/// Case-insensitive header lookup; missing or malformed names yield `""`.
pub fn header_value(headers: &HeaderMap, name: &str) -> String {
    HeaderName::from_bytes(name.to_ascii_lowercase().as_bytes())
        .ok()
        .and_then(|name| headers.get(name))
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
        .unwrap_or_default()
}

fn proto(version: Version) -> String {
    format!("{version:?}")
}

/// Everything about an inbound request that a template may ask for.
#[derive(Debug, Clone, Default)]
pub struct RequestSnapshot {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RequestSnapshot {
    pub fn from_parts(parts: &http::request::Parts, body: Bytes) -> Self {
        Self {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            version: parts.version,
            headers: parts.headers.clone(),
            body,
        }
    }

    fn part(&self, key: &str) -> String {
        match key {
            "scheme" => self.uri.scheme_str().unwrap_or("http").to_string(),
            "host" => {
                let host = header_value(&self.headers, "host");
                if host.is_empty() {
                    self.uri.authority().map(|a| a.to_string()).unwrap_or_default()
                } else {
                    host
                }
            }
            "path" => self.uri.path().to_string(),
            "query" => self.uri.query().unwrap_or_default().to_string(),
            "method" => self.method.as_str().to_string(),
            "proto" => proto(self.version),
            "referer" => header_value(&self.headers, REFERER.as_str()),
            "body" => String::from_utf8_lossy(&self.body).into_owned(),
            _ => String::new(),
        }
    }
}

impl TagSource for RequestSnapshot {
    fn side(&self) -> Side {
        Side::Request
    }

    fn resolve(&self, tag: &Tag) -> String {
        match tag {
            Tag::RequestPart(key) => self.part(key),
            Tag::RequestHeader(name) => header_value(&self.headers, name),
            Tag::ResponsePart(_) | Tag::ResponseHeader(_) => String::new(),
        }
    }
}

/// Everything about a finished response that a template may ask for.
#[derive(Debug, Clone, Default)]
pub struct ResponseSnapshot {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ResponseSnapshot {
    pub fn from_parts(parts: &http::response::Parts, body: Bytes) -> Self {
        Self {
            status: parts.status,
            version: parts.version,
            headers: parts.headers.clone(),
            body,
        }
    }

    fn part(&self, key: &str) -> String {
        match key {
            "status" => self.status.as_u16().to_string(),
            "body" => String::from_utf8_lossy(&self.body).into_owned(),
            "proto" => proto(self.version),
            _ => String::new(),
        }
    }
}

impl TagSource for ResponseSnapshot {
    fn side(&self) -> Side {
        Side::Response
    }

    fn resolve(&self, tag: &Tag) -> String {
        match tag {
            Tag::ResponsePart(key) => self.part(key),
            Tag::ResponseHeader(name) => header_value(&self.headers, name),
            Tag::RequestPart(_) | Tag::RequestHeader(_) => String::new(),
        }
    }
}

/// Reasons a JWT claim could not be read. None of them fail a request.
#[derive(Debug, Error)]
pub enum JwtClaimError {
    #[error("invalid JWT format: expected 3 parts but got {0}")]
    Segments(usize),

    #[error("failed to decode JWT payload: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("failed to parse JWT payload: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Read a string claim from the payload segment of a compact JWT.
///
/// The signature is not verified. `Ok(None)` means the payload parsed but the
/// claim is missing or not a string.
pub fn jwt_claim(token: &str, claim: &str) -> Result<Option<String>, JwtClaimError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(JwtClaimError::Segments(segments.len()));
    }

    let payload: String = segments[1]
        .trim()
        .chars()
        .filter(|c| !matches!(c, '\n' | '\r' | ' '))
        .collect();
    let decoded = URL_SAFE_NO_PAD.decode(payload)?;
    let claims: Map<String, Value> = serde_json::from_slice(&decoded)?;

    Ok(match claims.get(claim) {
        Some(Value::String(value)) => Some(value.clone()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{CONTENT_TYPE, HOST, USER_AGENT};

    fn request() -> RequestSnapshot {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, "purge.example.com".parse().unwrap());
        headers.insert(USER_AGENT, "curl/8.5".parse().unwrap());
        headers.insert(REFERER, "https://example.com/ui".parse().unwrap());
        RequestSnapshot {
            method: Method::POST,
            uri: "/api/v1/purge?dry=1".parse().unwrap(),
            version: Version::HTTP_11,
            headers,
            body: Bytes::from_static(b"{\"paths\":[]}"),
        }
    }

    fn response() -> ResponseSnapshot {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, "application/json".parse().unwrap());
        ResponseSnapshot {
            status: StatusCode::CREATED,
            version: Version::HTTP_11,
            headers,
            body: Bytes::from_static(b"{\"detail\":\"ok\"}"),
        }
    }

    #[test]
    fn resolves_every_request_part() {
        let req = request();
        let cases = [
            ("scheme", "http"),
            ("host", "purge.example.com"),
            ("path", "/api/v1/purge"),
            ("query", "dry=1"),
            ("method", "POST"),
            ("proto", "HTTP/1.1"),
            ("referer", "https://example.com/ui"),
            ("body", "{\"paths\":[]}"),
        ];
        for (part, expected) in cases {
            let tag = Tag::RequestPart(part.to_string());
            assert_eq!(req.resolve(&tag), expected, "part {part}");
        }
    }

    #[test]
    fn resolves_response_parts() {
        let resp = response();
        assert_eq!(resp.resolve(&Tag::ResponsePart("status".into())), "201");
        assert_eq!(resp.resolve(&Tag::ResponsePart("proto".into())), "HTTP/1.1");
        assert_eq!(
            resp.resolve(&Tag::ResponsePart("body".into())),
            "{\"detail\":\"ok\"}"
        );
    }

    #[test]
    fn unknown_parts_and_headers_resolve_empty() {
        let req = request();
        assert_eq!(req.resolve(&Tag::RequestPart("port".into())), "");
        assert_eq!(req.resolve(&Tag::RequestHeader("x-missing".into())), "");
        assert_eq!(req.resolve(&Tag::RequestHeader("bad header".into())), "");
        assert_eq!(response().resolve(&Tag::ResponsePart("latency".into())), "");
    }

    #[test]
    fn keys_are_case_insensitive() {
        let template = Template::parse("${REQUEST:METHOD} ${REQUEST_HEADER:User-Agent}");
        assert_eq!(template.render(&request()), "POST curl/8.5");
    }

    #[test]
    fn bare_tokens_run_to_closing_brace_or_end() {
        assert_eq!(Template::parse("REQUEST:method").render(&request()), "POST");
        assert_eq!(
            Template::parse("RESPONSE_HEADER:content-type").render(&response()),
            "application/json"
        );
        assert_eq!(
            Template::parse("x=REQUEST:path}").render(&request()),
            "x=/api/v1/purge}"
        );
    }

    #[test]
    fn other_side_tokens_are_left_verbatim() {
        let template = Template::parse("${REQUEST:method} -> ${RESPONSE:status}");
        assert_eq!(template.render(&request()), "POST -> ${RESPONSE:status}");
        assert_eq!(template.render(&response()), "${REQUEST:method} -> 201");
    }

    #[test]
    fn header_prefix_is_not_mistaken_for_part_prefix() {
        let template = Template::parse("REQUEST_HEADER:host");
        let tags: Vec<_> = template.tags().cloned().collect();
        assert_eq!(tags, vec![Tag::RequestHeader("host".into())]);
    }

    #[test]
    fn unterminated_or_empty_tokens_stay_literal() {
        let template = Template::parse("${}");
        assert_eq!(template.tags().count(), 0);
        let template = Template::parse("REQUEST:");
        assert_eq!(template.tags().count(), 0);
        assert_eq!(template.render(&request()), "REQUEST:");
    }

    #[test]
    fn display_name_strips_kind() {
        assert_eq!(Template::parse("REQUEST:method").display_name(), "method");
        assert_eq!(
            Template::parse("REQUEST_HEADER:user-agent").display_name(),
            "user-agent"
        );
        assert_eq!(Template::parse("${RESPONSE:status}").display_name(), "status");
        assert_eq!(
            Template::parse("took ${RESPONSE:status}").display_name(),
            "took ${RESPONSE:status}"
        );
    }

    #[test]
    fn rendering_is_idempotent() {
        let template = Template::parse("${REQUEST:nope}${REQUEST:method}");
        let req = request();
        assert_eq!(template.render(&req), template.render(&req));
        assert_eq!(template.render(&req), "POST");
    }

    fn token_with(payload: &str) -> String {
        format!("eyJhbGciOiJub25lIn0.{}.sig", URL_SAFE_NO_PAD.encode(payload))
    }

    #[test]
    fn jwt_claim_reads_string_claim() {
        let token = token_with(r#"{"email":"ops@example.com","sub":42}"#);
        assert_eq!(
            jwt_claim(&token, "email").unwrap(),
            Some("ops@example.com".to_string())
        );
        assert_eq!(jwt_claim(&token, "sub").unwrap(), None);
        assert_eq!(jwt_claim(&token, "missing").unwrap(), None);
    }

    #[test]
    fn jwt_claim_tolerates_whitespace_in_payload() {
        let encoded = URL_SAFE_NO_PAD.encode(r#"{"user":"alice"}"#);
        let (a, b) = encoded.split_at(4);
        let token = format!("h. {a}\r\n{b} .s");
        assert_eq!(jwt_claim(&token, "user").unwrap(), Some("alice".to_string()));
    }

    #[test]
    fn jwt_claim_rejects_wrong_segment_count() {
        assert!(matches!(jwt_claim("a.b", "user"), Err(JwtClaimError::Segments(2))));
        assert!(matches!(
            jwt_claim("a.b.c.d", "user"),
            Err(JwtClaimError::Segments(4))
        ));
    }

    #[test]
    fn jwt_claim_reports_decode_and_parse_failures() {
        assert!(matches!(
            jwt_claim("h.!!!.s", "user"),
            Err(JwtClaimError::Decode(_))
        ));
        let token = token_with("not json");
        assert!(matches!(jwt_claim(&token, "user"), Err(JwtClaimError::Parse(_))));
    }
}
