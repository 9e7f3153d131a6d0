//! Descriptive metadata served by each backend at `GET {baseURL}/metadata`.
//!
//! The endpoint returns a map keyed by module name; only the entry for the
//! requested sub-module is used.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModuleMetadata {
    #[serde(rename = "conceptual_Explanation", default)]
    pub conceptual_explanation: Option<String>,
    #[serde(rename = "technical_Explanation", default)]
    pub technical_explanation: Option<String>,
    #[serde(default)]
    pub inputs: BTreeMap<String, InputDescription>,
    #[serde(rename = "application_Platform", default)]
    pub application_platform: Option<String>,
    #[serde(rename = "deployable_Module", default)]
    pub deployable_module: Option<String>,
    #[serde(rename = "incremental_Updates", default)]
    pub incremental_updates: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InputDescription {
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<InputOption>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputOption {
    pub value: serde_json::Value,
    #[serde(default)]
    pub explanation: String,
}

impl ModuleMetadata {
    /// Default metadata skeleton for a freshly provisioned module, keyed by its name.
    pub fn template(module_name: &str) -> BTreeMap<String, ModuleMetadata> {
        let mut inputs = BTreeMap::new();
        inputs.insert(
            "File".to_string(),
            InputDescription {
                description: String::new(),
                kind: "CSV file".to_string(),
                options: Vec::new(),
            },
        );
        inputs.insert(
            "Column to be anonymized".to_string(),
            InputDescription {
                description:
                    "The name of the column with numerical data that requires anonymization."
                        .to_string(),
                kind: "String".to_string(),
                options: Vec::new(),
            },
        );
        inputs.insert(
            "Direct identifier columns".to_string(),
            InputDescription {
                description: "A list of columns that serve as direct identifiers.".to_string(),
                kind: "Array of Strings".to_string(),
                options: Vec::new(),
            },
        );

        let blank = Some(String::new());
        let mut doc = BTreeMap::new();
        doc.insert(
            module_name.to_string(),
            ModuleMetadata {
                conceptual_explanation: blank.clone(),
                technical_explanation: blank.clone(),
                inputs,
                application_platform: blank.clone(),
                deployable_module: blank.clone(),
                incremental_updates: blank,
            },
        );
        doc
    }
}
