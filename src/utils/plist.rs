//! Property-list navigation.
//!
//! Plist documents are modeled as a sum-typed value tree and addressed with
//! colon-delimited field paths: property key names delimited by colons, with
//! list items specified by a zero-based integer index. Examples:
//!
//! ```text
//! CFBundleShortVersionString
//! CFBundleDocumentTypes:2:CFBundleTypeExtensions
//! ```
//!
//! On-disk documents (including binary plists) are decoded through `plutil`,
//! so reads go through the [`CommandExecutor`] abstraction and can be mocked.
//! Writes emit XML plist text directly.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine;

use crate::constants::commands::PLUTIL;
use crate::models::RunnerError;
use crate::utils::command_executor::CommandExecutor;

/// A parsed plist value.
#[derive(Debug, Clone, PartialEq)]
pub enum PlistValue {
    Dict(BTreeMap<String, PlistValue>),
    Array(Vec<PlistValue>),
    String(String),
    Integer(i64),
    Real(f64),
    Bool(bool),
    /// Raw bytes, emitted base64-encoded.
    Data(Vec<u8>),
    /// ISO-8601 timestamp, kept verbatim.
    Date(String),
}

impl PlistValue {
    pub fn dict() -> PlistValue {
        PlistValue::Dict(BTreeMap::new())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PlistValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PlistValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PlistValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[PlistValue]> {
        match self {
            PlistValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<String, PlistValue>> {
        match self {
            PlistValue::Dict(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_dict_mut(&mut self) -> Option<&mut BTreeMap<String, PlistValue>> {
        match self {
            PlistValue::Dict(entries) => Some(entries),
            _ => None,
        }
    }

    /// Converts a JSON document produced by `plutil -convert json`.
    pub fn from_json(value: &serde_json::Value) -> Result<PlistValue, RunnerError> {
        match value {
            serde_json::Value::Null => Err(RunnerError::plist(
                "Null is not representable in a plist".to_string(),
            )),
            serde_json::Value::Bool(b) => Ok(PlistValue::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(PlistValue::Integer(i))
                } else {
                    Ok(PlistValue::Real(n.as_f64().unwrap_or_default()))
                }
            }
            serde_json::Value::String(s) => Ok(PlistValue::String(s.clone())),
            serde_json::Value::Array(items) => Ok(PlistValue::Array(
                items
                    .iter()
                    .map(PlistValue::from_json)
                    .collect::<Result<_, _>>()?,
            )),
            serde_json::Value::Object(entries) => {
                let mut dict = BTreeMap::new();
                for (key, item) in entries {
                    dict.insert(key.clone(), PlistValue::from_json(item)?);
                }
                Ok(PlistValue::Dict(dict))
            }
        }
    }

    /// Renders the value as an XML property list document.
    pub fn to_xml_document(&self) -> String {
        let mut body = String::new();
        self.write_xml(&mut body, 0);
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <!DOCTYPE plist PUBLIC \"-//Apple//DTD PLIST 1.0//EN\" \
             \"http://www.apple.com/DTDs/PropertyList-1.0.dtd\">\n\
             <plist version=\"1.0\">\n{body}</plist>\n"
        )
    }

    fn write_xml(&self, out: &mut String, depth: usize) {
        let pad = "\t".repeat(depth);
        match self {
            PlistValue::Dict(entries) => {
                if entries.is_empty() {
                    out.push_str(&format!("{pad}<dict/>\n"));
                    return;
                }
                out.push_str(&format!("{pad}<dict>\n"));
                for (key, value) in entries {
                    out.push_str(&format!("{pad}\t<key>{}</key>\n", escape_xml(key)));
                    value.write_xml(out, depth + 1);
                }
                out.push_str(&format!("{pad}</dict>\n"));
            }
            PlistValue::Array(items) => {
                if items.is_empty() {
                    out.push_str(&format!("{pad}<array/>\n"));
                    return;
                }
                out.push_str(&format!("{pad}<array>\n"));
                for item in items {
                    item.write_xml(out, depth + 1);
                }
                out.push_str(&format!("{pad}</array>\n"));
            }
            PlistValue::String(s) => {
                out.push_str(&format!("{pad}<string>{}</string>\n", escape_xml(s)));
            }
            PlistValue::Integer(n) => {
                out.push_str(&format!("{pad}<integer>{n}</integer>\n"));
            }
            PlistValue::Real(r) => {
                out.push_str(&format!("{pad}<real>{r}</real>\n"));
            }
            PlistValue::Bool(true) => out.push_str(&format!("{pad}<true/>\n")),
            PlistValue::Bool(false) => out.push_str(&format!("{pad}<false/>\n")),
            PlistValue::Data(bytes) => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
                out.push_str(&format!("{pad}<data>{encoded}</data>\n"));
            }
            PlistValue::Date(ts) => {
                out.push_str(&format!("{pad}<date>{}</date>\n", escape_xml(ts)));
            }
        }
    }
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn segments(field: &str) -> Vec<&str> {
    field.trim_start_matches(':').split(':').collect()
}

/// Returns the leaf addressed by `field`, or a positional error naming the
/// segment where navigation failed.
pub fn get_field<'a>(root: &'a PlistValue, field: &str) -> Result<&'a PlistValue, RunnerError> {
    if field.is_empty() {
        return Ok(root);
    }
    let mut current = root;
    for (position, segment) in segments(field).into_iter().enumerate() {
        current = child(current, segment).ok_or_else(|| field_error(field, position, segment))?;
    }
    Ok(current)
}

/// Replaces the leaf addressed by `field`. A new key may be inserted into a
/// dict; an array index must address an existing item.
pub fn set_field(root: &mut PlistValue, field: &str, value: PlistValue) -> Result<(), RunnerError> {
    if field.is_empty() {
        *root = value;
        return Ok(());
    }
    let all = segments(field);
    let (last, parents) = all
        .split_last()
        .ok_or_else(|| RunnerError::plist("Can not set an empty field".to_string()))?;
    let mut current = root;
    for (position, segment) in parents.iter().enumerate() {
        current =
            child_mut(current, segment).ok_or_else(|| field_error(field, position, segment))?;
    }
    match current {
        PlistValue::Dict(entries) => {
            entries.insert((*last).to_string(), value);
            Ok(())
        }
        PlistValue::Array(items) => {
            let index = array_index(items.len(), last)
                .ok_or_else(|| field_error(field, all.len() - 1, last))?;
            items[index] = value;
            Ok(())
        }
        _ => Err(RunnerError::plist(format!(
            "The field {field} does not address a dict or array container"
        ))),
    }
}

/// Removes the leaf addressed by `field`.
pub fn delete_field(root: &mut PlistValue, field: &str) -> Result<(), RunnerError> {
    let all = segments(field);
    let (last, parents) = all
        .split_last()
        .ok_or_else(|| RunnerError::plist("Can not delete an empty field".to_string()))?;
    let mut current = root;
    for (position, segment) in parents.iter().enumerate() {
        current =
            child_mut(current, segment).ok_or_else(|| field_error(field, position, segment))?;
    }
    match current {
        PlistValue::Dict(entries) => entries
            .remove(*last)
            .map(|_| ())
            .ok_or_else(|| field_error(field, all.len() - 1, last)),
        PlistValue::Array(items) => {
            let index = array_index(items.len(), last)
                .ok_or_else(|| field_error(field, all.len() - 1, last))?;
            items.remove(index);
            Ok(())
        }
        _ => Err(RunnerError::plist(format!(
            "The field {field} does not address a dict or array container"
        ))),
    }
}

fn child<'a>(value: &'a PlistValue, segment: &str) -> Option<&'a PlistValue> {
    match value {
        PlistValue::Dict(entries) => entries.get(segment),
        PlistValue::Array(items) => array_index(items.len(), segment).map(|i| &items[i]),
        _ => None,
    }
}

fn child_mut<'a>(value: &'a mut PlistValue, segment: &str) -> Option<&'a mut PlistValue> {
    match value {
        PlistValue::Dict(entries) => entries.get_mut(segment),
        PlistValue::Array(items) => {
            let index = array_index(items.len(), segment)?;
            Some(&mut items[index])
        }
        _ => None,
    }
}

fn array_index(len: usize, segment: &str) -> Option<usize> {
    segment.parse::<usize>().ok().filter(|i| *i < len)
}

fn field_error(field: &str, position: usize, segment: &str) -> RunnerError {
    RunnerError::plist(format!(
        "The field {field} can not be resolved: segment '{segment}' (position {position}) \
         does not exist in the target object"
    ))
}

/// Handle on a plist file.
pub struct Plist {
    path: PathBuf,
    executor: Arc<dyn CommandExecutor>,
}

impl Plist {
    pub fn new(path: impl Into<PathBuf>, executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            path: path.into(),
            executor,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decodes the document through `plutil`. Binary and XML plists both
    /// come back as JSON.
    pub async fn read_root(&self) -> Result<PlistValue, RunnerError> {
        let path = self.path.to_string_lossy();
        let output = self
            .executor
            .output(PLUTIL, &["-convert", "json", "-o", "-", path.as_ref()])
            .await
            .map_err(|e| RunnerError::plist(format!("{}: {e}", self.path.display())))?;
        if !output.success() {
            return Err(RunnerError::plist(format!(
                "Failed to decode {}: {}",
                self.path.display(),
                output.combined()
            )));
        }
        let json: serde_json::Value = serde_json::from_str(&output.stdout)?;
        PlistValue::from_json(&json)
    }

    pub async fn get_field(&self, field: &str) -> Result<PlistValue, RunnerError> {
        let root = self.read_root().await?;
        get_field(&root, field).cloned()
    }

    pub async fn has_field(&self, field: &str) -> bool {
        self.get_field(field).await.is_ok()
    }

    /// Sets `field` and rewrites the document as XML. A missing file starts
    /// from an empty dict.
    pub async fn set_field(&self, field: &str, value: PlistValue) -> Result<(), RunnerError> {
        let mut root = if self.path.exists() {
            self.read_root().await?
        } else {
            PlistValue::dict()
        };
        set_field(&mut root, field, value)?;
        self.write_root(&root)
    }

    pub async fn delete_field(&self, field: &str) -> Result<(), RunnerError> {
        let mut root = self.read_root().await?;
        delete_field(&mut root, field)?;
        self.write_root(&root)
    }

    pub fn write_root(&self, root: &PlistValue) -> Result<(), RunnerError> {
        std::fs::write(&self.path, root.to_xml_document())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PlistValue {
        let json: serde_json::Value = serde_json::json!({
            "CFBundleIdentifier": "com.example.app",
            "state": 1,
            "CFBundleDocumentTypes": [
                {"CFBundleTypeExtensions": ["png", "jpg"]},
                {"CFBundleTypeExtensions": ["txt"]}
            ]
        });
        PlistValue::from_json(&json).unwrap()
    }

    #[test]
    fn get_field_navigates_dicts_and_arrays() {
        let root = sample();
        assert_eq!(
            get_field(&root, "CFBundleIdentifier").unwrap().as_str(),
            Some("com.example.app")
        );
        assert_eq!(
            get_field(&root, "CFBundleDocumentTypes:1:CFBundleTypeExtensions:0")
                .unwrap()
                .as_str(),
            Some("txt")
        );
        // A leading colon is tolerated.
        assert_eq!(get_field(&root, ":state").unwrap().as_i64(), Some(1));
    }

    #[test]
    fn get_field_errors_are_positional() {
        let root = sample();
        let error = get_field(&root, "CFBundleDocumentTypes:5:CFBundleTypeExtensions")
            .unwrap_err()
            .to_string();
        assert!(error.contains("'5'"));
        assert!(error.contains("position 1"));
    }

    #[test]
    fn set_field_inserts_and_replaces() {
        let mut root = sample();
        set_field(
            &mut root,
            "EnvironmentVariables",
            PlistValue::dict(),
        )
        .unwrap();
        assert!(get_field(&root, "EnvironmentVariables").is_ok());

        set_field(
            &mut root,
            "CFBundleDocumentTypes:0:CFBundleTypeExtensions:1",
            PlistValue::String("gif".to_string()),
        )
        .unwrap();
        assert_eq!(
            get_field(&root, "CFBundleDocumentTypes:0:CFBundleTypeExtensions:1")
                .unwrap()
                .as_str(),
            Some("gif")
        );
    }

    #[test]
    fn set_field_rejects_out_of_range_index() {
        let mut root = sample();
        assert!(set_field(
            &mut root,
            "CFBundleDocumentTypes:9",
            PlistValue::Bool(true),
        )
        .is_err());
    }

    #[test]
    fn delete_field_removes_leaf() {
        let mut root = sample();
        delete_field(&mut root, "CFBundleDocumentTypes:0:CFBundleTypeExtensions:0").unwrap();
        assert_eq!(
            get_field(&root, "CFBundleDocumentTypes:0:CFBundleTypeExtensions:0")
                .unwrap()
                .as_str(),
            Some("jpg")
        );
        assert!(delete_field(&mut root, "NoSuchKey").is_err());
    }

    #[test]
    fn empty_field_addresses_the_root() {
        let mut root = sample();
        assert!(matches!(get_field(&root, "").unwrap(), PlistValue::Dict(_)));
        set_field(&mut root, "", PlistValue::Bool(true)).unwrap();
        assert_eq!(root, PlistValue::Bool(true));
    }

    #[test]
    fn xml_document_escapes_and_nests() {
        let json = serde_json::json!({"Name": "a<b&c", "Count": 2, "Flag": true});
        let doc = PlistValue::from_json(&json).unwrap().to_xml_document();
        assert!(doc.starts_with("<?xml"));
        assert!(doc.contains("<key>Name</key>"));
        assert!(doc.contains("<string>a&lt;b&amp;c</string>"));
        assert!(doc.contains("<integer>2</integer>"));
        assert!(doc.contains("<true/>"));
    }

    #[test]
    fn json_null_is_rejected() {
        assert!(PlistValue::from_json(&serde_json::Value::Null).is_err());
    }
}
