//! Declared service specifications and the static field schema they are
//! checked against.
//!
//! A spec arrives as a raw field map from the `[[services]]` configuration.
//! Every key must appear in [`SERVICE_FIELDS`]; each schema entry names the
//! expected value type and the setter that assigns it onto a [`ServiceSpec`].

use std::collections::{BTreeMap, HashSet};

use configs::ServiceSpecMap;
use serde_json::Value;

use crate::errors::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Bool,
    String,
    Port,
    StringList,
    StringMap,
    Map,
}

impl FieldType {
    pub fn describe(self) -> &'static str {
        match self {
            FieldType::Bool => "a boolean",
            FieldType::String => "a string",
            FieldType::Port => "an integer port in 1..=65535",
            FieldType::StringList => "a list of strings",
            FieldType::StringMap => "a table of string values",
            FieldType::Map => "a table",
        }
    }
}

type Setter = fn(&mut ServiceSpec, &Value) -> Option<()>;

pub struct FieldSchema {
    pub name: &'static str,
    pub ty: FieldType,
    set: Setter,
}

/// Every field a service spec may carry.
pub static SERVICE_FIELDS: &[FieldSchema] = &[
    FieldSchema { name: "name", ty: FieldType::String, set: set_name },
    FieldSchema { name: "admin", ty: FieldType::Bool, set: set_admin },
    FieldSchema { name: "url", ty: FieldType::String, set: set_url },
    FieldSchema { name: "api_token", ty: FieldType::String, set: set_api_token },
    FieldSchema { name: "oauth_client_id", ty: FieldType::String, set: set_oauth_client_id },
    FieldSchema { name: "oauth_redirect_uri", ty: FieldType::String, set: set_oauth_redirect_uri },
    FieldSchema { name: "oauth_no_confirm", ty: FieldType::Bool, set: set_oauth_no_confirm },
    FieldSchema { name: "command", ty: FieldType::StringList, set: set_command },
    FieldSchema { name: "cwd", ty: FieldType::String, set: set_cwd },
    FieldSchema { name: "environment", ty: FieldType::StringMap, set: set_environment },
    FieldSchema { name: "user", ty: FieldType::String, set: set_user },
    FieldSchema { name: "display", ty: FieldType::Bool, set: set_display },
    FieldSchema { name: "info", ty: FieldType::Map, set: set_info },
    FieldSchema { name: "image", ty: FieldType::String, set: set_image },
    FieldSchema { name: "port", ty: FieldType::Port, set: set_port },
];

pub fn field(name: &str) -> Option<&'static FieldSchema> {
    SERVICE_FIELDS.iter().find(|f| f.name == name)
}

pub fn field_names() -> Vec<&'static str> {
    SERVICE_FIELDS.iter().map(|f| f.name).collect()
}

fn string(v: &Value) -> Option<String> { v.as_str().map(str::to_string) }

// Empty strings mean "unset", matching how blank config values behave.
fn opt_string(v: &Value) -> Option<Option<String>> {
    let s = v.as_str()?;
    Some(if s.is_empty() { None } else { Some(s.to_string()) })
}

fn set_name(s: &mut ServiceSpec, v: &Value) -> Option<()> { s.name = string(v)?; Some(()) }
fn set_admin(s: &mut ServiceSpec, v: &Value) -> Option<()> { s.admin = v.as_bool()?; Some(()) }
fn set_url(s: &mut ServiceSpec, v: &Value) -> Option<()> { s.url = opt_string(v)?; Some(()) }
fn set_api_token(s: &mut ServiceSpec, v: &Value) -> Option<()> { s.api_token = opt_string(v)?; Some(()) }
fn set_oauth_client_id(s: &mut ServiceSpec, v: &Value) -> Option<()> { s.oauth_client_id = opt_string(v)?; Some(()) }
fn set_oauth_redirect_uri(s: &mut ServiceSpec, v: &Value) -> Option<()> { s.oauth_redirect_uri = opt_string(v)?; Some(()) }
fn set_oauth_no_confirm(s: &mut ServiceSpec, v: &Value) -> Option<()> { s.oauth_no_confirm = v.as_bool()?; Some(()) }
fn set_cwd(s: &mut ServiceSpec, v: &Value) -> Option<()> { s.cwd = opt_string(v)?; Some(()) }
fn set_user(s: &mut ServiceSpec, v: &Value) -> Option<()> { s.user = opt_string(v)?; Some(()) }
fn set_display(s: &mut ServiceSpec, v: &Value) -> Option<()> { s.display = v.as_bool()?; Some(()) }
fn set_image(s: &mut ServiceSpec, v: &Value) -> Option<()> { s.image = opt_string(v)?; Some(()) }

fn set_command(s: &mut ServiceSpec, v: &Value) -> Option<()> {
    s.command = v.as_array()?.iter().map(string).collect::<Option<Vec<_>>>()?;
    Some(())
}

fn set_environment(s: &mut ServiceSpec, v: &Value) -> Option<()> {
    s.environment = v
        .as_object()?
        .iter()
        .map(|(k, v)| string(v).map(|v| (k.clone(), v)))
        .collect::<Option<BTreeMap<_, _>>>()?;
    Some(())
}

fn set_info(s: &mut ServiceSpec, v: &Value) -> Option<()> { s.info = v.as_object()?.clone(); Some(()) }

fn set_port(s: &mut ServiceSpec, v: &Value) -> Option<()> {
    let port = u16::try_from(v.as_u64()?).ok().filter(|p| *p > 0)?;
    s.port = Some(port);
    Some(())
}

/// A validated service specification.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSpec {
    pub name: String,
    pub admin: bool,
    pub url: Option<String>,
    pub api_token: Option<String>,
    pub oauth_client_id: Option<String>,
    pub oauth_redirect_uri: Option<String>,
    pub oauth_no_confirm: bool,
    pub command: Vec<String>,
    pub cwd: Option<String>,
    pub environment: BTreeMap<String, String>,
    pub user: Option<String>,
    pub display: bool,
    pub info: serde_json::Map<String, Value>,
    pub image: Option<String>,
    pub port: Option<u16>,
}

impl Default for ServiceSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            admin: false,
            url: None,
            api_token: None,
            oauth_client_id: None,
            oauth_redirect_uri: None,
            oauth_no_confirm: false,
            command: Vec::new(),
            cwd: None,
            environment: BTreeMap::new(),
            user: None,
            display: true,
            info: serde_json::Map::new(),
            image: None,
            port: None,
        }
    }
}

impl ServiceSpec {
    /// Validate a raw field map and assign its fields.
    ///
    /// Fails on the first unknown key or badly typed value.
    pub fn from_map(map: &ServiceSpecMap) -> Result<Self, ConfigError> {
        let name = match map.get("name").and_then(Value::as_str) {
            Some(n) if !n.trim().is_empty() => n.to_string(),
            _ => return Err(ConfigError::MissingName(Value::Object(map.clone()).to_string())),
        };

        let mut spec = ServiceSpec::default();
        for (key, value) in map {
            let schema = field(key).ok_or_else(|| ConfigError::UnknownField {
                service: name.clone(),
                field: key.clone(),
                known: field_names().join(", "),
            })?;
            (schema.set)(&mut spec, value).ok_or_else(|| ConfigError::InvalidValue {
                service: name.clone(),
                field: key.clone(),
                expected: schema.ty.describe(),
            })?;
        }
        Ok(spec)
    }

    pub fn is_kube_managed(&self) -> bool { self.image.is_some() }

    pub fn is_subprocess_managed(&self) -> bool { !self.command.is_empty() }
}

/// Validate a whole service list. Nothing is returned unless every entry is valid.
pub fn parse_specs(maps: &[ServiceSpecMap]) -> Result<Vec<ServiceSpec>, ConfigError> {
    let mut seen = HashSet::new();
    let mut specs = Vec::with_capacity(maps.len());
    for map in maps {
        let spec = ServiceSpec::from_map(map)?;
        if !seen.insert(spec.name.clone()) {
            return Err(ConfigError::DuplicateName(spec.name));
        }
        specs.push(spec);
    }
    Ok(specs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(v: Value) -> ServiceSpecMap {
        v.as_object().cloned().expect("object")
    }

    #[test]
    fn parses_kube_spec() {
        let spec = ServiceSpec::from_map(&map(json!({
            "name": "dashboard", "image": "dash:latest", "port": 9000,
            "environment": {"MODE": "prod"}, "admin": true
        })))
        .expect("valid");
        assert_eq!(spec.name, "dashboard");
        assert_eq!(spec.image.as_deref(), Some("dash:latest"));
        assert_eq!(spec.port, Some(9000));
        assert_eq!(spec.environment.get("MODE").map(String::as_str), Some("prod"));
        assert!(spec.admin);
        assert!(spec.display);
        assert!(spec.is_kube_managed());
    }

    #[test]
    fn unknown_field_is_named() {
        let err = ServiceSpec::from_map(&map(json!({"name": "x", "imagee": "typo"}))).unwrap_err();
        match err {
            ConfigError::UnknownField { service, field, known } => {
                assert_eq!(service, "x");
                assert_eq!(field, "imagee");
                assert!(known.contains("image"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn missing_name_rejected() {
        let err = ServiceSpec::from_map(&map(json!({"url": "http://a"}))).unwrap_err();
        assert!(matches!(err, ConfigError::MissingName(_)));
    }

    #[test]
    fn wrong_types_rejected() {
        let err = ServiceSpec::from_map(&map(json!({"name": "x", "port": 70000}))).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "port"));
        let err = ServiceSpec::from_map(&map(json!({"name": "x", "command": ["a", 1]}))).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "command"));
        let err = ServiceSpec::from_map(&map(json!({"name": "x", "admin": "yes"}))).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "admin"));
    }

    #[test]
    fn duplicate_names_rejected() {
        let maps = vec![map(json!({"name": "a"})), map(json!({"name": "a", "url": "http://x"}))];
        assert_eq!(parse_specs(&maps).unwrap_err(), ConfigError::DuplicateName("a".into()));
    }

    #[test]
    fn every_schema_field_has_a_setter_that_accepts_its_type() {
        let samples = json!({
            "name": "svc", "admin": false, "url": "http://h:1", "api_token": "t",
            "oauth_client_id": "c", "oauth_redirect_uri": "/cb", "oauth_no_confirm": true,
            "command": ["run"], "cwd": "/tmp", "environment": {"A": "b"}, "user": "u",
            "display": false, "info": {"k": 1}, "image": "img", "port": 80
        });
        let sample_map = map(samples);
        for name in field_names() {
            assert!(sample_map.contains_key(name), "missing sample for {name}");
        }
        ServiceSpec::from_map(&sample_map).expect("all fields valid");
    }
}
