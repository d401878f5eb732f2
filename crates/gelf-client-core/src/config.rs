//! Environment and request capture feeding the ambient field layer.
//!
//! This module provides utilities to derive logger configuration from the
//! host process environment, plus the snapshot types a host hands over to
//! describe the request being served. Both are captured once, up front;
//! nothing here reads the environment after construction.

use crate::record::{FieldMap, FieldValue};
use crate::severity::Severity;
use std::collections::{BTreeMap, HashMap};
use std::env;

/// Environment variable naming the one-shot HTTP ingestion endpoint.
const ENV_URL: &str = "GELF_URL";
/// Environment variable naming the persistent stream endpoint.
const ENV_WS_URL: &str = "GELF_WS_URL";
/// Environment variable overriding the `host` stamped on every record.
const ENV_HOST: &str = "GELF_HOST";
/// Environment variable overriding the `facility` stamped on every record.
const ENV_FACILITY: &str = "GELF_FACILITY";
/// Environment variable setting the minimum severity (name or number).
const ENV_MIN_LEVEL: &str = "GELF_MIN_LEVEL";
/// Environment variable pinning the log session identifier.
const ENV_SESSION_ID: &str = "GELF_SESSION_ID";
/// Environment variable carrying the stream/HTTP access key id.
const ENV_ACCESS_ID: &str = "GELF_ACCESS_ID";
/// Environment variable carrying the stream/HTTP access key secret.
const ENV_ACCESS_SECRET: &str = "GELF_ACCESS_SECRET";
/// Environment variable naming the deployment environment (`production`...).
const ENV_ENVIRONMENT: &str = "GELF_ENVIRONMENT";
/// Environment variable naming the hosting function or service.
const ENV_FUNCTION_NAME: &str = "GELF_FUNCTION_NAME";
/// Environment variable toggling the local console mirror.
const ENV_CONSOLE_MIRROR: &str = "GELF_CONSOLE_MIRROR";

/// Request headers mined for ambient fields.
const HEADER_FORWARDED_FOR: &str = "x-forwarded-for";
const HEADER_USER_AGENT: &str = "user-agent";
const HEADER_REQUEST_ID: &str = "x-request-id";

/// Captures environment-derived options used to bootstrap a [`Logger`].
///
/// [`Logger`]: crate::logger::Logger
#[derive(Debug, Clone, Default)]
pub struct LoggerEnv {
    /// One-shot HTTP ingestion endpoint, if configured.
    pub http_endpoint: Option<String>,
    /// Persistent stream endpoint, if configured.
    pub stream_endpoint: Option<String>,
    /// Override for the `host` field on every record.
    pub host: Option<String>,
    /// Override for the `facility` field on every record.
    pub facility: Option<String>,
    /// Minimum severity to emit; unparsable values are ignored.
    pub min_level: Option<Severity>,
    /// Explicit log session identifier shared by the whole lineage.
    pub session_id: Option<String>,
    /// Access key id for authenticated endpoints.
    pub access_id: Option<String>,
    /// Access key secret for authenticated endpoints.
    pub access_secret: Option<String>,
    /// Deployment environment name, copied into ambient fields.
    pub environment: Option<String>,
    /// Hosting function or service name, copied into ambient fields.
    pub function_name: Option<String>,
    /// Whether emitted records are mirrored to local `tracing` output.
    pub console_mirror: bool,
}

impl LoggerEnv {
    /// Builds settings from the current process environment.
    ///
    /// This function is side-effect free apart from reading
    /// `std::env::vars`.
    pub fn from_os_env() -> Self {
        Self::from_env_iter(env::vars())
    }

    /// Builds settings from an iterator of key/value pairs (typically for
    /// tests).
    pub fn from_env_iter<I, K, V>(iter: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: HashMap<String, String> = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let http_endpoint = map.get(ENV_URL).and_then(|value| sanitize_non_empty(value));
        let stream_endpoint = map
            .get(ENV_WS_URL)
            .and_then(|value| sanitize_non_empty(value));
        let host = map.get(ENV_HOST).and_then(|value| sanitize_non_empty(value));
        let facility = map
            .get(ENV_FACILITY)
            .and_then(|value| sanitize_non_empty(value));
        let min_level = map
            .get(ENV_MIN_LEVEL)
            .and_then(|value| sanitize_non_empty(value))
            // Unknown level spellings fall back to the built-in default.
            .and_then(|value| value.parse().ok());
        let session_id = map
            .get(ENV_SESSION_ID)
            .and_then(|value| sanitize_non_empty(value));
        let access_id = map
            .get(ENV_ACCESS_ID)
            .and_then(|value| sanitize_non_empty(value));
        let access_secret = map
            .get(ENV_ACCESS_SECRET)
            .and_then(|value| sanitize_non_empty(value));
        let environment = map
            .get(ENV_ENVIRONMENT)
            .and_then(|value| sanitize_non_empty(value));
        let function_name = map
            .get(ENV_FUNCTION_NAME)
            .and_then(|value| sanitize_non_empty(value));
        let console_mirror = parse_bool(map.get(ENV_CONSOLE_MIRROR).map(String::as_str), false);

        Self {
            http_endpoint,
            stream_endpoint,
            host,
            facility,
            min_level,
            session_id,
            access_id,
            access_secret,
            environment,
            function_name,
            console_mirror,
        }
    }

    /// Whether any delivery endpoint is configured.
    pub fn has_endpoint(&self) -> bool {
        self.http_endpoint.is_some() || self.stream_endpoint.is_some()
    }
}

/// Helper trimming whitespace and discarding empty values.
fn sanitize_non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parses boolean values from strings, falling back to the provided default.
fn parse_bool(value: Option<&str>, default: bool) -> bool {
    match value.map(|s| s.trim().to_ascii_lowercase()) {
        Some(ref v) if ["1", "true", "t", "yes", "y"].contains(&v.as_str()) => true,
        Some(ref v) if ["0", "false", "f", "no", "n"].contains(&v.as_str()) => false,
        _ => default,
    }
}

/// Geolocation block a host may attach to a request snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoContext {
    pub datacenter: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Snapshot of the request being served, supplied by the host when a
/// logger lineage is created. Consumed once at capture time.
#[derive(Debug, Clone, Default)]
pub struct RequestDescriptor {
    /// HTTP method (`GET`, `POST`, ...).
    pub method: String,
    /// Request path (or full URL) as the host saw it.
    pub path: String,
    /// Request headers as supplied; lookups are case-insensitive.
    pub headers: BTreeMap<String, String>,
    /// Optional geolocation attached by the edge.
    pub geo: Option<GeoContext>,
}

impl RequestDescriptor {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Originating client address: the first hop of `x-forwarded-for`.
    fn client_ip(&self) -> Option<&str> {
        self.header(HEADER_FORWARDED_FOR)
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

/// The ambient field layer: process and request facts captured once at
/// logger construction and stamped onto every record of the lineage.
///
/// Absent facts are simply omitted, so the layer never contributes nulls.
#[derive(Debug, Clone, Default)]
pub struct AmbientContext {
    fields: FieldMap,
}

impl AmbientContext {
    /// Captures the ambient layer from the environment snapshot and an
    /// optional request descriptor.
    pub fn from_parts(env: &LoggerEnv, request: Option<&RequestDescriptor>) -> Self {
        let mut fields = FieldMap::new();
        insert_text(&mut fields, "environment", env.environment.as_deref());
        insert_text(&mut fields, "function_name", env.function_name.as_deref());

        if let Some(request) = request {
            insert_text(
                &mut fields,
                "request_method",
                sanitize_non_empty(&request.method).as_deref(),
            );
            insert_text(
                &mut fields,
                "request_path",
                sanitize_non_empty(&request.path).as_deref(),
            );
            insert_text(&mut fields, "client_ip", request.client_ip());
            insert_text(&mut fields, "user_agent", request.header(HEADER_USER_AGENT));
            insert_text(&mut fields, "trace_id", request.header(HEADER_REQUEST_ID));
            if let Some(geo) = &request.geo {
                insert_text(&mut fields, "datacenter", geo.datacenter.as_deref());
                insert_text(&mut fields, "country", geo.country.as_deref());
                insert_text(&mut fields, "city", geo.city.as_deref());
                if let Some(latitude) = geo.latitude {
                    fields.insert("latitude".to_string(), FieldValue::Float(latitude));
                }
                if let Some(longitude) = geo.longitude {
                    fields.insert("longitude".to_string(), FieldValue::Float(longitude));
                }
            }
        }

        Self { fields }
    }

    /// The captured fields, keyed by their unprefixed names.
    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }
}

fn insert_text(fields: &mut FieldMap, name: &str, value: Option<&str>) {
    if let Some(value) = value {
        fields.insert(name.to_string(), FieldValue::Text(value.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Ensures an empty environment produces the all-absent capture.
    #[test]
    fn logger_env_defaults() {
        let env = LoggerEnv::from_env_iter::<Vec<(String, String)>, _, _>(vec![]);
        assert!(env.http_endpoint.is_none());
        assert!(env.stream_endpoint.is_none());
        assert!(env.min_level.is_none());
        assert!(env.session_id.is_none());
        assert!(!env.console_mirror);
        assert!(!env.has_endpoint());
    }

    /// Confirms environment-derived settings respect overrides and trim
    /// whitespace.
    #[test]
    fn logger_env_honours_overrides() {
        let env = LoggerEnv::from_env_iter([
            (ENV_URL, " https://logs.example.test/gelf "),
            (ENV_WS_URL, "wss://logs.example.test/stream"),
            (ENV_HOST, "edge-3"),
            (ENV_FACILITY, "checkout"),
            (ENV_MIN_LEVEL, "warning"),
            (ENV_SESSION_ID, "session-42"),
            (ENV_ACCESS_ID, "key-id"),
            (ENV_ACCESS_SECRET, "key-secret"),
            (ENV_ENVIRONMENT, "production"),
            (ENV_FUNCTION_NAME, "render"),
            (ENV_CONSOLE_MIRROR, "1"),
        ]);
        assert_eq!(
            env.http_endpoint.as_deref(),
            Some("https://logs.example.test/gelf")
        );
        assert_eq!(
            env.stream_endpoint.as_deref(),
            Some("wss://logs.example.test/stream")
        );
        assert_eq!(env.host.as_deref(), Some("edge-3"));
        assert_eq!(env.facility.as_deref(), Some("checkout"));
        assert_eq!(env.min_level, Some(Severity::Warning));
        assert_eq!(env.session_id.as_deref(), Some("session-42"));
        assert_eq!(env.access_id.as_deref(), Some("key-id"));
        assert_eq!(env.access_secret.as_deref(), Some("key-secret"));
        assert_eq!(env.environment.as_deref(), Some("production"));
        assert_eq!(env.function_name.as_deref(), Some("render"));
        assert!(env.console_mirror);
        assert!(env.has_endpoint());
    }

    /// Level parsing accepts names and numbers and ignores garbage.
    #[test]
    fn min_level_parses_tolerantly() {
        let by_name = LoggerEnv::from_env_iter([(ENV_MIN_LEVEL, "debug")]);
        assert_eq!(by_name.min_level, Some(Severity::Debug));
        let by_number = LoggerEnv::from_env_iter([(ENV_MIN_LEVEL, "3")]);
        assert_eq!(by_number.min_level, Some(Severity::Error));
        let garbage = LoggerEnv::from_env_iter([(ENV_MIN_LEVEL, "verbose-ish")]);
        assert!(garbage.min_level.is_none());
        let blank = LoggerEnv::from_env_iter([(ENV_MIN_LEVEL, "   ")]);
        assert!(blank.min_level.is_none());
    }

    /// Confirms boolean parsing honours common truthy/falsy spellings.
    #[test]
    fn parse_bool_permits_common_variants() {
        assert!(parse_bool(Some("true"), false));
        assert!(parse_bool(Some("Yes"), false));
        assert!(parse_bool(Some("1"), false));
        assert!(!parse_bool(Some("false"), true));
        assert!(!parse_bool(Some("0"), true));
        assert!(parse_bool(Some("maybe"), true));
    }

    fn request() -> RequestDescriptor {
        RequestDescriptor {
            method: "POST".to_string(),
            path: "/api/orders".to_string(),
            headers: BTreeMap::from([
                (
                    "X-Forwarded-For".to_string(),
                    "203.0.113.9, 10.0.0.1".to_string(),
                ),
                ("User-Agent".to_string(), "curl/8.5".to_string()),
                ("X-Request-Id".to_string(), "trace-77".to_string()),
            ]),
            geo: Some(GeoContext {
                datacenter: Some("fra1".to_string()),
                country: Some("DE".to_string()),
                city: None,
                latitude: Some(50.11),
                longitude: Some(8.68),
            }),
        }
    }

    /// A full capture mines the environment, the headers, and the geo
    /// block, taking only the first forwarded hop as the client address.
    #[test]
    fn ambient_capture_mines_request() {
        let env = LoggerEnv::from_env_iter([
            (ENV_ENVIRONMENT, "staging"),
            (ENV_FUNCTION_NAME, "orders"),
        ]);
        let ambient = AmbientContext::from_parts(&env, Some(&request()));
        let fields = ambient.fields();
        assert_eq!(fields.get("environment"), Some(&FieldValue::from("staging")));
        assert_eq!(fields.get("function_name"), Some(&FieldValue::from("orders")));
        assert_eq!(fields.get("request_method"), Some(&FieldValue::from("POST")));
        assert_eq!(
            fields.get("request_path"),
            Some(&FieldValue::from("/api/orders"))
        );
        assert_eq!(
            fields.get("client_ip"),
            Some(&FieldValue::from("203.0.113.9"))
        );
        assert_eq!(fields.get("user_agent"), Some(&FieldValue::from("curl/8.5")));
        assert_eq!(fields.get("trace_id"), Some(&FieldValue::from("trace-77")));
        assert_eq!(fields.get("datacenter"), Some(&FieldValue::from("fra1")));
        assert_eq!(fields.get("country"), Some(&FieldValue::from("DE")));
        assert_eq!(fields.get("latitude"), Some(&FieldValue::Float(50.11)));
        assert_eq!(fields.get("longitude"), Some(&FieldValue::Float(8.68)));
        // Absent facts stay absent instead of appearing as nulls.
        assert!(fields.get("city").is_none());
    }

    /// Without a request the capture carries only the process facts.
    #[test]
    fn ambient_capture_without_request() {
        let env = LoggerEnv::from_env_iter([(ENV_ENVIRONMENT, "production")]);
        let ambient = AmbientContext::from_parts(&env, None);
        assert_eq!(ambient.fields().len(), 1);
        assert_eq!(
            ambient.fields().get("environment"),
            Some(&FieldValue::from("production"))
        );
    }

    /// Header lookup ignores case.
    #[test]
    fn header_lookup_is_case_insensitive() {
        let request = request();
        assert_eq!(request.header("x-request-id"), Some("trace-77"));
        assert_eq!(request.header("X-REQUEST-ID"), Some("trace-77"));
        assert!(request.header("x-missing").is_none());
    }
}
