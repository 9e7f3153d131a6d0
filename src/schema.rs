//! Declarative parameter schemas and form validation.
//!
//! A [`ParameterSchema`] describes the inputs of one sub-module: an ordered
//! list of named parameters, an optional enumerated query-type selector, and
//! optionally how the backend answers. The file input is always implied.
//!
//! # Document shape
//!
//! Schemas are written in one canonical shape:
//!
//! ```json
//! {
//!     "parameters": [
//!         { "key": "param1", "label": "Column to be anonymized", "optional": false }
//!     ],
//!     "queryOptions": ["sum", "mean", "All Queries"],
//!     "responseKind": "structured"
//! }
//! ```
//!
//! Older catalog documents use a keyed map (`{"param1": {"label": ...,
//! "optional": ...}, "queryOptions": [...]}`). That shape is converted on
//! read; anything else is rejected as malformed.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ToolboxError};

/// Label reported when a required query type has not been chosen.
pub const QUERY_TYPE_LABEL: &str = "Query Type";

/// Wire name of the uploaded file part.
pub const FILE_PART: &str = "file";

/// Wire name of the selected query type part.
pub const QUERY_PART: &str = "query";

/// One named input of a sub-module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterDescriptor {
    /// Form binding key. Never sent on the wire.
    pub key: String,
    /// Wire field name of the outgoing multipart part.
    pub label: String,
    #[serde(default)]
    pub optional: bool,
}

/// How a backend answers a successful request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    /// An opaque file (the anonymized dataset).
    Artifact,
    /// A JSON query result.
    Structured,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", try_from = "RawSchema")]
pub struct ParameterSchema {
    pub parameters: Vec<ParameterDescriptor>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub query_options: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_kind: Option<ResponseKind>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSchema {
    Canonical(CanonicalSchema),
    Legacy(BTreeMap<String, serde_json::Value>),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct CanonicalSchema {
    parameters: Vec<ParameterDescriptor>,
    #[serde(default)]
    query_options: Vec<String>,
    #[serde(default)]
    response_kind: Option<ResponseKind>,
}

impl TryFrom<RawSchema> for ParameterSchema {
    type Error = String;

    fn try_from(raw: RawSchema) -> std::result::Result<Self, Self::Error> {
        let schema = match raw {
            RawSchema::Canonical(c) => ParameterSchema {
                parameters: c.parameters,
                query_options: c.query_options,
                response_kind: c.response_kind,
            },
            RawSchema::Legacy(map) => from_legacy(map)?,
        };
        schema.check()?;
        Ok(schema)
    }
}

/// Convert the keyed-map shape, ordering `paramN` keys numerically.
fn from_legacy(
    map: BTreeMap<String, serde_json::Value>,
) -> std::result::Result<ParameterSchema, String> {
    let mut schema = ParameterSchema::default();
    let mut params = Vec::new();

    for (key, value) in map {
        match key.as_str() {
            "queryOptions" => {
                schema.query_options = serde_json::from_value(value)
                    .map_err(|e| format!("queryOptions must be a list of strings: {}", e))?;
            }
            "responseKind" => {
                schema.response_kind = Some(
                    serde_json::from_value(value)
                        .map_err(|e| format!("responseKind: {}", e))?,
                );
            }
            _ => {
                let obj = value
                    .as_object()
                    .ok_or_else(|| format!("parameter '{}' must be an object", key))?;
                let label = obj
                    .get("label")
                    .and_then(|l| l.as_str())
                    .ok_or_else(|| format!("parameter '{}' has no string label", key))?;
                let optional = match obj.get("optional") {
                    None => false,
                    Some(v) => v
                        .as_bool()
                        .ok_or_else(|| format!("parameter '{}': optional must be a bool", key))?,
                };
                params.push(ParameterDescriptor {
                    key,
                    label: label.to_string(),
                    optional,
                });
            }
        }
    }

    params.sort_by(|a, b| param_order(&a.key).cmp(&param_order(&b.key)));
    schema.parameters = params;
    Ok(schema)
}

/// `param10` sorts after `param2`; non-numbered keys keep lexical order after them.
fn param_order(key: &str) -> (u32, String) {
    let digits: String = key.chars().rev().take_while(|c| c.is_ascii_digit()).collect();
    let n = digits
        .chars()
        .rev()
        .collect::<String>()
        .parse::<u32>()
        .unwrap_or(u32::MAX);
    (n, key.to_string())
}

impl ParameterSchema {
    /// Parse schema text, rejecting anything that is not a valid schema.
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| ToolboxError::MalformedSchema(e.to_string()))
    }

    fn check(&self) -> std::result::Result<(), String> {
        let mut seen = HashSet::new();
        for p in &self.parameters {
            if p.key.trim().is_empty() {
                return Err("parameter key must not be empty".to_string());
            }
            if p.label.trim().is_empty() {
                return Err(format!("parameter '{}' has an empty label", p.key));
            }
            if p.label == FILE_PART || p.label == QUERY_PART {
                return Err(format!(
                    "parameter '{}' uses reserved wire name '{}'",
                    p.key, p.label
                ));
            }
            if !seen.insert(p.key.as_str()) {
                return Err(format!("duplicate parameter key '{}'", p.key));
            }
        }
        if self.query_options.iter().any(|o| o.trim().is_empty()) {
            return Err("queryOptions must not contain empty entries".to_string());
        }
        Ok(())
    }

    pub fn has_query_options(&self) -> bool {
        !self.query_options.is_empty()
    }
}

/// A user-supplied upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    /// File name with its last extension stripped.
    pub fn base_name(&self) -> &str {
        let name = self.name.rsplit(['/', '\\']).next().unwrap_or(&self.name);
        match name.rfind('.') {
            Some(0) | None => name,
            Some(i) => &name[..i],
        }
    }
}

fn is_filled(values: &HashMap<String, String>, key: &str) -> bool {
    values.get(key).is_some_and(|v| !v.is_empty())
}

/// Check `values` against `schema`, collecting every missing label.
///
/// A required parameter is missing when its value is absent or empty. When
/// the schema offers query options, a non-empty selection is required; the
/// backend decides what to do with a query type it does not know.
pub fn validate(
    schema: &ParameterSchema,
    values: &HashMap<String, String>,
    selected_query_type: Option<&str>,
) -> Result<()> {
    let mut missing: Vec<String> = schema
        .parameters
        .iter()
        .filter(|p| !p.optional && !is_filled(values, &p.key))
        .map(|p| p.label.clone())
        .collect();

    if schema.has_query_options() && selected_query_type.is_none_or(str::is_empty) {
        missing.push(QUERY_TYPE_LABEL.to_string());
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ToolboxError::MissingParameters(missing))
    }
}

/// Value carried by one multipart part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartValue {
    Text(String),
    File { file_name: String, bytes: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WirePart {
    pub name: String,
    pub value: PartValue,
}

/// The ordered parts of an outgoing dispatch request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WirePayload {
    pub parts: Vec<WirePart>,
}

impl WirePayload {
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// First part with the given wire name.
    pub fn get(&self, name: &str) -> Option<&PartValue> {
        self.parts.iter().find(|p| p.name == name).map(|p| &p.value)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(PartValue::Text(t)) => Some(t),
            _ => None,
        }
    }

    pub fn into_form(self) -> reqwest::multipart::Form {
        self.parts
            .into_iter()
            .fold(reqwest::multipart::Form::new(), |form, part| match part.value {
                PartValue::Text(t) => form.text(part.name, t),
                PartValue::File { file_name, bytes } => form.part(
                    part.name,
                    reqwest::multipart::Part::bytes(bytes).file_name(file_name),
                ),
            })
    }
}

/// Build the multipart payload: the file, then one part per filled schema
/// parameter keyed by its label, then the query type if one was selected.
pub fn build_wire_payload(
    schema: &ParameterSchema,
    values: &HashMap<String, String>,
    file: &UploadedFile,
    selected_query_type: Option<&str>,
) -> WirePayload {
    let mut parts = vec![WirePart {
        name: FILE_PART.to_string(),
        value: PartValue::File {
            file_name: file.name.clone(),
            bytes: file.bytes.clone(),
        },
    }];

    for p in &schema.parameters {
        if let Some(v) = values.get(&p.key).filter(|v| !v.is_empty()) {
            parts.push(WirePart {
                name: p.label.clone(),
                value: PartValue::Text(v.clone()),
            });
        }
    }

    if let Some(q) = selected_query_type.filter(|q| !q.is_empty()) {
        parts.push(WirePart {
            name: QUERY_PART.to_string(),
            value: PartValue::Text(q.to_string()),
        });
    }

    WirePayload { parts }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(params: &[(&str, &str, bool)], options: &[&str]) -> ParameterSchema {
        ParameterSchema {
            parameters: params
                .iter()
                .map(|(k, l, o)| ParameterDescriptor {
                    key: k.to_string(),
                    label: l.to_string(),
                    optional: *o,
                })
                .collect(),
            query_options: options.iter().map(|s| s.to_string()).collect(),
            response_kind: None,
        }
    }

    fn values(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn missing_required_column() {
        let s = schema(&[("param1", "Column", false)], &[]);
        let err = validate(&s, &HashMap::new(), None).unwrap_err();
        match err {
            ToolboxError::MissingParameters(m) => assert_eq!(m, vec!["Column"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn reports_all_missing_at_once() {
        let s = schema(
            &[
                ("param1", "Column to be anonymized", false),
                ("param2", "Epsilon", false),
                ("param3", "k", true),
            ],
            &["frequency", "All Queries"],
        );
        let err = validate(&s, &values(&[("param2", "")]), None).unwrap_err();
        match err {
            ToolboxError::MissingParameters(m) => {
                assert_eq!(m, vec!["Column to be anonymized", "Epsilon", "Query Type"])
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn optional_parameters_may_be_absent() {
        let s = schema(&[("param1", "Column", false), ("param2", "k", true)], &[]);
        assert!(validate(&s, &values(&[("param1", "age")]), None).is_ok());
    }

    #[test]
    fn any_selected_query_type_satisfies_validation() {
        let s = schema(&[], &["sum", "mean"]);
        assert!(validate(&s, &HashMap::new(), Some("mean")).is_ok());
        // not among the options, but selected
        assert!(validate(&s, &HashMap::new(), Some("median")).is_ok());
        match validate(&s, &HashMap::new(), Some("")).unwrap_err() {
            ToolboxError::MissingParameters(m) => assert_eq!(m, vec!["Query Type"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn payload_uses_labels_not_keys() {
        let s = schema(
            &[
                ("param1", "Column to be anonymized", false),
                ("param2", "k", true),
                ("param3", "Epsilon", false),
            ],
            &["mean"],
        );
        let file = UploadedFile::new("people.csv", b"age\n31\n".to_vec());
        let payload = build_wire_payload(
            &s,
            &values(&[("param1", "age"), ("param3", "0.5")]),
            &file,
            Some("mean"),
        );

        assert_eq!(payload.len(), 2 + 1 + 1);
        assert_eq!(payload.text("Column to be anonymized"), Some("age"));
        assert_eq!(payload.text("Epsilon"), Some("0.5"));
        assert_eq!(payload.text(QUERY_PART), Some("mean"));
        assert!(payload.get("param1").is_none());
        assert!(payload.get("k").is_none());
        assert!(matches!(
            payload.get(FILE_PART),
            Some(PartValue::File { file_name, .. }) if file_name == "people.csv"
        ));
    }

    #[test]
    fn payload_ignores_values_outside_schema() {
        let s = schema(&[("param1", "Column", false)], &[]);
        let file = UploadedFile::new("a.csv", Vec::new());
        let payload = build_wire_payload(
            &s,
            &values(&[("param1", "age"), ("filename", "a.csv")]),
            &file,
            None,
        );
        assert_eq!(payload.len(), 2);
    }

    #[test]
    fn parses_canonical_schema() {
        let s = ParameterSchema::parse(
            r#"{"parameters":[{"key":"param1","label":"Column","optional":false}],
                "queryOptions":["sum","All Queries"],"responseKind":"structured"}"#,
        )
        .unwrap();
        assert_eq!(s.parameters.len(), 1);
        assert_eq!(s.query_options, vec!["sum", "All Queries"]);
        assert_eq!(s.response_kind, Some(ResponseKind::Structured));
    }

    #[test]
    fn converts_legacy_keyed_map() {
        let s = ParameterSchema::parse(
            r#"{
                "param10": {"label": "Tenth", "optional": true},
                "param2": {"label": "Epsilon", "optional": false},
                "param1": {"label": "Column to be anonymized"},
                "queryOptions": ["sum", "All Queries"]
            }"#,
        )
        .unwrap();
        let labels: Vec<_> = s.parameters.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, vec!["Column to be anonymized", "Epsilon", "Tenth"]);
        assert!(!s.parameters[0].optional);
        assert!(s.parameters[2].optional);
        assert_eq!(s.query_options.len(), 2);
        assert_eq!(s.response_kind, None);
    }

    #[test]
    fn serializes_canonical_shape() {
        let s = ParameterSchema::parse(r#"{"param1": {"label": "Column", "optional": false}}"#)
            .unwrap();
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "parameters": [{"key": "param1", "label": "Column", "optional": false}]
            })
        );
        let back: ParameterSchema = serde_json::from_value(json).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn rejects_malformed_schemas() {
        for text in [
            r#"[1, 2, 3]"#,
            r#"{"param1": "Column"}"#,
            r#"{"param1": {"optional": true}}"#,
            r#"{"queryOptions": "sum"}"#,
            r#"{"parameters": [{"key":"a","label":"A"},{"key":"a","label":"B"}]}"#,
            r#"{"parameters": [{"key":"a","label":"file"}]}"#,
            "not json",
        ] {
            let err = ParameterSchema::parse(text).unwrap_err();
            assert!(
                matches!(err, ToolboxError::MalformedSchema(_)),
                "accepted {text}"
            );
        }
    }

    #[test]
    fn base_name_strips_extension() {
        assert_eq!(UploadedFile::new("people.csv", vec![]).base_name(), "people");
        assert_eq!(UploadedFile::new("a.b.csv", vec![]).base_name(), "a.b");
        assert_eq!(UploadedFile::new("noext", vec![]).base_name(), "noext");
        assert_eq!(UploadedFile::new("/tmp/x/data.csv", vec![]).base_name(), "data");
    }
}
