//! Per-flow form state for one dispatch.
//!
//! A session holds the selected sub-module, the values typed so far, the
//! attached CSV, and the chosen query type. Selecting another sub-module
//! starts over.

use std::collections::HashMap;

use crate::dispatch::DispatchRequest;
use crate::error::{Result, ToolboxError};
use crate::schema::UploadedFile;

#[derive(Debug, Clone, Default)]
pub struct FormSession {
    sub_module: Option<String>,
    values: HashMap<String, String>,
    file: Option<UploadedFile>,
    query_type: Option<String>,
}

impl FormSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch to `sub_module`, discarding everything entered so far.
    pub fn select(&mut self, sub_module: impl Into<String>) {
        *self = Self {
            sub_module: Some(sub_module.into()),
            ..Self::default()
        };
    }

    pub fn sub_module(&self) -> Option<&str> {
        self.sub_module.as_deref()
    }

    pub fn set_value(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn values(&self) -> &HashMap<String, String> {
        &self.values
    }

    /// Attach the dataset. Only `.csv` files are accepted.
    pub fn attach_file(&mut self, file: UploadedFile) -> Result<()> {
        if !file.name.to_ascii_lowercase().ends_with(".csv") {
            return Err(ToolboxError::InvalidUpload(format!(
                "'{}' is not a CSV file",
                file.name
            )));
        }
        self.file = Some(file);
        Ok(())
    }

    pub fn select_query_type(&mut self, query_type: impl Into<String>) {
        self.query_type = Some(query_type.into());
    }

    pub fn query_type(&self) -> Option<&str> {
        self.query_type.as_deref()
    }

    /// Package the current state for [`DispatchEngine::dispatch`](crate::dispatch::DispatchEngine::dispatch).
    pub fn submit(&self) -> Result<DispatchRequest> {
        let sub_module = self
            .sub_module
            .clone()
            .ok_or_else(|| ToolboxError::InvalidModule("no sub-module selected".into()))?;
        let file = self
            .file
            .clone()
            .ok_or_else(|| ToolboxError::InvalidUpload("no file attached".into()))?;
        Ok(DispatchRequest {
            sub_module,
            file,
            values: self.values.clone(),
            selected_query_type: self.query_type.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn csv() -> UploadedFile {
        UploadedFile::new("people.csv", b"age\n30\n".to_vec())
    }

    #[test]
    fn select_resets_state() {
        let mut session = FormSession::new();
        session.select("k-anonymity");
        session.set_value("param1", "age");
        session.attach_file(csv()).unwrap();
        session.select_query_type("sum");

        session.select("l-diversity");
        assert_eq!(session.sub_module(), Some("l-diversity"));
        assert!(session.values().is_empty());
        assert!(session.query_type().is_none());
        assert!(matches!(session.submit(), Err(ToolboxError::InvalidUpload(_))));
    }

    #[test]
    fn rejects_non_csv() {
        let mut session = FormSession::new();
        session.select("k-anonymity");
        let err = session
            .attach_file(UploadedFile::new("people.xlsx", Vec::new()))
            .unwrap_err();
        assert!(matches!(err, ToolboxError::InvalidUpload(_)));
        assert!(session.attach_file(UploadedFile::new("PEOPLE.CSV", Vec::new())).is_ok());
    }

    #[test]
    fn submit_carries_everything() {
        let mut session = FormSession::new();
        session.select("Differentially Private Queries using Laplace");
        session.set_value("param1", "age");
        session.attach_file(csv()).unwrap();
        session.select_query_type("All Queries");

        let request = session.submit().unwrap();
        assert_eq!(request.sub_module, "Differentially Private Queries using Laplace");
        assert_eq!(request.values["param1"], "age");
        assert_eq!(request.file.name, "people.csv");
        assert_eq!(request.selected_query_type.as_deref(), Some("All Queries"));
    }

    #[test]
    fn submit_without_selection() {
        let session = FormSession::new();
        assert!(matches!(session.submit(), Err(ToolboxError::InvalidModule(_))));
    }
}
