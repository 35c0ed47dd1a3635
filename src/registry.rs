//! Monitored field discovery.
//!
//! Record-type schemas are declared in configuration. Any attribute whose
//! `customField` equals [`UUID_FIELD_MARKER`] becomes a monitored field. The
//! resulting [`FieldRegistry`] is built once at startup and shared read-only.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::identifier::{is_valid_with_prefix, UuidVersion};

/// Marker tagging an attribute as a managed identifier.
pub const UUID_FIELD_MARKER: &str = "registrar.uuid";

/// Declared schema of one record type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSchema {
    /// Record-type identifier, e.g. `api::article.article`.
    pub uid: String,

    /// Attributes by field name.
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeSchema>,
}

/// Declared schema of one attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeSchema {
    /// Storage type (`string`, `text`, ...).
    #[serde(rename = "type")]
    pub kind: String,

    /// Custom field marker, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_field: Option<String>,

    /// Options for managed identifier fields.
    #[serde(default)]
    pub options: FieldOptions,
}

impl AttributeSchema {
    /// Whether this attribute carries the identifier marker.
    pub fn is_monitored(&self) -> bool {
        self.custom_field.as_deref() == Some(UUID_FIELD_MARKER)
    }
}

/// Per-field generation options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldOptions {
    /// Literal written ahead of every generated value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    /// Overrides the configured default version for this field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<UuidVersion>,
}

/// A (record type, field) pair holding a managed identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredField {
    pub record_type: String,
    pub field: String,
    pub options: FieldOptions,
}

impl MonitoredField {
    pub fn new(record_type: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            field: field.into(),
            options: FieldOptions::default(),
        }
    }

    pub fn with_options(mut self, options: FieldOptions) -> Self {
        self.options = options;
        self
    }

    /// Configured prefix, if non-empty.
    pub fn prefix(&self) -> Option<&str> {
        self.options.prefix.as_deref().filter(|p| !p.is_empty())
    }

    /// Version to generate, falling back to `default`.
    pub fn version(&self, default: UuidVersion) -> UuidVersion {
        self.options.version.unwrap_or(default)
    }

    /// Prefix-aware layout check for this field.
    pub fn is_valid(&self, value: &str) -> bool {
        is_valid_with_prefix(value, self.prefix())
    }
}

/// Immutable set of monitored fields, ordered by record type then field.
#[derive(Debug, Clone, Default)]
pub struct FieldRegistry {
    fields: Vec<MonitoredField>,
}

impl FieldRegistry {
    /// Scan schemas and keep every attribute tagged with the marker.
    pub fn from_schemas(schemas: &[RecordSchema]) -> Self {
        let mut fields: Vec<MonitoredField> = schemas
            .iter()
            .flat_map(|schema| {
                schema
                    .attributes
                    .iter()
                    .filter(|(_, attr)| attr.is_monitored())
                    .map(|(name, attr)| {
                        MonitoredField::new(&schema.uid, name).with_options(attr.options.clone())
                    })
            })
            .collect();

        fields.sort_by(|a, b| (&a.record_type, &a.field).cmp(&(&b.record_type, &b.field)));
        fields.dedup_by(|a, b| a.record_type == b.record_type && a.field == b.field);

        Self { fields }
    }

    /// Build directly from a list of fields.
    pub fn from_fields(mut fields: Vec<MonitoredField>) -> Self {
        fields.sort_by(|a, b| (&a.record_type, &a.field).cmp(&(&b.record_type, &b.field)));
        Self { fields }
    }

    pub fn fields(&self) -> &[MonitoredField] {
        &self.fields
    }

    /// Monitored fields of one record type.
    pub fn fields_for<'a>(&'a self, record_type: &'a str) -> impl Iterator<Item = &'a MonitoredField> {
        self.fields.iter().filter(move |f| f.record_type == record_type)
    }

    pub fn get(&self, record_type: &str, field: &str) -> Option<&MonitoredField> {
        self.fields
            .iter()
            .find(|f| f.record_type == record_type && f.field == field)
    }

    /// Record types with at least one monitored field.
    pub fn record_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.fields.iter().map(|f| f.record_type.as_str()).collect();
        types.dedup();
        types
    }

    /// `{record type: [field names]}`.
    pub fn models(&self) -> BTreeMap<String, Vec<String>> {
        let mut models: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for f in &self.fields {
            models
                .entry(f.record_type.clone())
                .or_default()
                .push(f.field.clone());
        }
        models
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
