//! Structured access-log fields derived from configured templates.

use std::fmt;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::config::LogsConfig;
use crate::tags::{self, RequestSnapshot, ResponseSnapshot, TagSource, Template};

/// Field name used for the acting user read from the JWT header.
pub const JWT_USER_FIELD: &str = "jwt_user";

/// Ordered `(name, value)` pairs for one access-log record.
///
/// Serializes as a JSON object in insertion order; duplicate names are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFieldSet(Vec<(String, String)>);

impl LogFieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    pub fn append(&mut self, other: LogFieldSet) {
        self.0.extend(other.0);
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for LogFieldSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl fmt::Display for LogFieldSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

/// Where to find the acting user: a request header holding a JWT, and the
/// payload claim to read from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JwtUser {
    pub header: String,
    pub claim: String,
}

/// Render every template against `source` and keep the ones that changed.
///
/// A template whose rendering equals its own text is treated as a static
/// string and skipped.
fn collect(templates: &[Template], source: &dyn TagSource, out: &mut LogFieldSet) {
    for template in templates {
        let rendered = template.render(source);
        if rendered == template.as_str() {
            continue;
        }
        out.push(template.display_name(), rendered);
    }
}

fn jwt_user(request: &RequestSnapshot, jwt: &JwtUser) -> Option<String> {
    let token = tags::header_value(&request.headers, &jwt.header);
    if token.is_empty() {
        return None;
    }
    match tags::jwt_claim(&token, &jwt.claim) {
        Ok(user) => user,
        Err(err) => {
            tracing::warn!(header = %jwt.header, error = %err, "jwt user claim skipped");
            None
        }
    }
}

/// Fields contributed by the response side of an exchange.
pub fn response_fields(templates: &[Template], response: &ResponseSnapshot) -> LogFieldSet {
    let mut fields = LogFieldSet::new();
    collect(templates, response, &mut fields);
    fields
}

/// Fields contributed by the request side, led by `jwt_user` when configured
/// and present.
pub fn request_fields(
    templates: &[Template],
    request: &RequestSnapshot,
    jwt: Option<&JwtUser>,
) -> LogFieldSet {
    let mut fields = LogFieldSet::new();
    if let Some(user) = jwt.and_then(|jwt| jwt_user(request, jwt)) {
        fields.push(JWT_USER_FIELD, user);
    }
    collect(templates, request, &mut fields);
    fields
}

/// Response fields first, then request fields. Never fails.
pub fn extract(
    templates: &[Template],
    request: &RequestSnapshot,
    response: &ResponseSnapshot,
    jwt: Option<&JwtUser>,
) -> LogFieldSet {
    let mut fields = response_fields(templates, response);
    fields.append(request_fields(templates, request, jwt));
    fields
}

/// Templates compiled from configuration, shared by all requests.
#[derive(Debug, Clone, Default)]
pub struct FieldExtractor {
    templates: Vec<Template>,
    jwt: Option<JwtUser>,
}

impl FieldExtractor {
    pub fn new<I, S>(templates: I, jwt: Option<JwtUser>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            templates: templates.into_iter().map(Template::parse).collect(),
            jwt,
        }
    }

    pub fn from_config(logs: &LogsConfig) -> Self {
        let jwt = logs.jwt_user.enabled.then(|| JwtUser {
            header: logs.jwt_user.header.clone(),
            claim: logs.jwt_user.jwt_field.clone(),
        });
        Self::new(logs.access_logs_fields.iter().cloned(), jwt)
    }

    pub fn extract(&self, request: &RequestSnapshot, response: &ResponseSnapshot) -> LogFieldSet {
        extract(&self.templates, request, response, self.jwt.as_ref())
    }
}
