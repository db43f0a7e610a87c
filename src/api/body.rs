//! Request bodies for write calls
//!
//! A form payload is an ordered list of named values. Lists are flattened into
//! repeated entries under the same name before the multipart form is built, so
//! the flattened entries can be inspected without going through reqwest.

use reqwest::multipart::{Form, Part};

use super::ApiError;

/// A binary file attached to a form field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileField {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub mime: Option<String>,
}

impl FileField {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
            mime: None,
        }
    }

    #[allow(dead_code)]
    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    /// Read a file from disk, keeping only its final path component as the name
    pub async fn from_path(path: &std::path::Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload".to_string());
        Ok(Self::new(file_name, bytes))
    }
}

/// Value of a single form field
#[derive(Debug, Clone, PartialEq)]
pub enum FormValue {
    Text(String),
    File(FileField),
    List(Vec<FormValue>),
}

impl From<&str> for FormValue {
    fn from(value: &str) -> Self {
        FormValue::Text(value.to_string())
    }
}

impl From<String> for FormValue {
    fn from(value: String) -> Self {
        FormValue::Text(value)
    }
}

impl From<FileField> for FormValue {
    fn from(value: FileField) -> Self {
        FormValue::File(value)
    }
}

impl<T: Into<FormValue>> From<Vec<T>> for FormValue {
    fn from(values: Vec<T>) -> Self {
        FormValue::List(values.into_iter().map(Into::into).collect())
    }
}

/// Ordered field-name to value mapping
pub type FormPayload = Vec<(String, FormValue)>;

/// One flattened multipart entry
#[derive(Debug, Clone, PartialEq)]
pub enum EntryValue {
    Text(String),
    File(FileField),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormEntry {
    pub name: String,
    pub value: EntryValue,
}

/// Serialized body of a write request
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(String),
    Multipart(Vec<FormEntry>),
}

const JSON_HEADERS: &[(&str, &str)] = &[
    ("Accept", "application/json"),
    ("Content-Type", "application/json"),
];

impl RequestBody {
    /// Extra headers the body needs (multipart sets its own boundary header)
    pub fn headers(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            RequestBody::Json(_) => JSON_HEADERS,
            _ => &[],
        }
    }
}

/// Flatten a form payload, expanding lists in place and in order
pub fn flatten(form: &[(String, FormValue)]) -> Vec<FormEntry> {
    let mut entries = Vec::new();
    for (name, value) in form {
        append(&mut entries, name, value);
    }
    entries
}

fn append(entries: &mut Vec<FormEntry>, name: &str, value: &FormValue) {
    match value {
        FormValue::List(values) => {
            for value in values {
                append(entries, name, value);
            }
        }
        FormValue::File(file) => entries.push(FormEntry {
            name: name.to_string(),
            value: EntryValue::File(file.clone()),
        }),
        FormValue::Text(text) => entries.push(FormEntry {
            name: name.to_string(),
            value: EntryValue::Text(text.clone()),
        }),
    }
}

/// Build the reqwest multipart form for a list of flattened entries
pub fn to_form(entries: Vec<FormEntry>) -> Result<Form, ApiError> {
    let mut form = Form::new();
    for entry in entries {
        form = match entry.value {
            EntryValue::Text(text) => form.text(entry.name, text),
            EntryValue::File(file) => {
                let mut part = Part::bytes(file.bytes).file_name(file.file_name);
                if let Some(mime) = &file.mime {
                    part = part.mime_str(mime).map_err(|e| {
                        ApiError::Transport(format!("invalid MIME type '{}': {}", mime, e))
                    })?;
                }
                form.part(entry.name, part)
            }
        };
    }
    Ok(form)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_repeats_list_entries_in_order() {
        let form: FormPayload = vec![
            ("file".to_string(), FileField::new("f.txt", b"hello".to_vec()).into()),
            ("tags".to_string(), vec!["x", "y"].into()),
        ];

        let entries = flatten(&form);
        assert_eq!(entries.len(), 3);

        let files: Vec<_> = entries.iter().filter(|e| e.name == "file").collect();
        assert_eq!(files.len(), 1);
        match &files[0].value {
            EntryValue::File(file) => assert_eq!(file.file_name, "f.txt"),
            other => panic!("expected a file entry, got {:?}", other),
        }

        let tags: Vec<_> = entries
            .iter()
            .filter(|e| e.name == "tags")
            .map(|e| e.value.clone())
            .collect();
        assert_eq!(
            tags,
            vec![EntryValue::Text("x".into()), EntryValue::Text("y".into())]
        );
    }

    #[test]
    fn test_flatten_nested_lists() {
        let form: FormPayload = vec![(
            "f".to_string(),
            FormValue::List(vec!["a".into(), FormValue::List(vec!["b".into(), "c".into()])]),
        )];

        let names: Vec<_> = flatten(&form)
            .into_iter()
            .map(|e| match e.value {
                EntryValue::Text(t) => t,
                EntryValue::File(f) => f.file_name,
            })
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_json_body_headers() {
        let body = RequestBody::Json("{}".to_string());
        assert!(body.headers().contains(&("Accept", "application/json")));
        assert!(body.headers().contains(&("Content-Type", "application/json")));
        assert!(RequestBody::Empty.headers().is_empty());
        assert!(RequestBody::Multipart(Vec::new()).headers().is_empty());
    }

    #[test]
    fn test_bad_mime_is_rejected() {
        let entries = vec![FormEntry {
            name: "file".into(),
            value: EntryValue::File(FileField::new("f.txt", Vec::new()).with_mime("not a mime")),
        }];
        assert!(matches!(to_form(entries), Err(ApiError::Transport(_))));
    }
}
