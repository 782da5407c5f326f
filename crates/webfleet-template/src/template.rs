//! The template document and its entries
//!
//! Resources, parameters and outputs keep insertion order, so a template built
//! layer by layer serializes in the same order it was declared.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use thiserror::Error;

/// Template format version every document declares
pub const FORMAT_VERSION: &str = "2010-09-09";

/// Template construction and rendering errors
#[derive(Debug, Error)]
pub enum TemplateError {
    /// Two entries share a logical ID
    #[error("duplicate logical ID '{0}'")]
    DuplicateLogicalId(String),

    /// Logical IDs must be non-empty, alphanumeric and at most 255 characters
    #[error("invalid logical ID '{0}': must be 1-255 ASCII alphanumeric characters")]
    InvalidLogicalId(String),

    /// A reference points to nothing declared in the template
    #[error("'{from}' references undeclared logical ID '{target}'")]
    DanglingReference { from: String, target: String },

    #[error("failed to render template as JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to render template as YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// What CloudFormation does with a resource's physical counterpart when the
/// resource leaves the template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeletionPolicy {
    Delete,
    Retain,
    Snapshot,
}

/// One resource entry
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Resource {
    #[serde(rename = "Type")]
    pub resource_type: String,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_policy: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_policy: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<DeletionPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_replace_policy: Option<DeletionPolicy>,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            properties: Map::new(),
            depends_on: Vec::new(),
            metadata: None,
            creation_policy: None,
            update_policy: None,
            deletion_policy: None,
            update_replace_policy: None,
        }
    }

    /// Set a property
    pub fn property(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(name.to_string(), value.into());
        self
    }

    /// Add an explicit dependency
    pub fn depends_on(mut self, logical_id: impl Into<String>) -> Self {
        let id = logical_id.into();
        if !self.depends_on.contains(&id) {
            self.depends_on.push(id);
        }
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn creation_policy(mut self, policy: Value) -> Self {
        self.creation_policy = Some(policy);
        self
    }

    pub fn update_policy(mut self, policy: Value) -> Self {
        self.update_policy = Some(policy);
        self
    }

    /// Keep the physical resource on delete and on replacement
    pub fn retain(mut self) -> Self {
        self.deletion_policy = Some(DeletionPolicy::Retain);
        self.update_replace_policy = Some(DeletionPolicy::Retain);
        self
    }

    /// Look up a property
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }
}

/// Input parameter
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Parameter {
    #[serde(rename = "Type")]
    pub parameter_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Parameter {
    pub fn new(parameter_type: impl Into<String>) -> Self {
        Self {
            parameter_type: parameter_type.into(),
            default: None,
            description: None,
        }
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Stack output
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Output {
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Output {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A CloudFormation template
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    format_version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    parameters: IndexMap<String, Parameter>,
    resources: IndexMap<String, Resource>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    outputs: IndexMap<String, Output>,
}

impl Default for Template {
    fn default() -> Self {
        Self::new()
    }
}

fn check_logical_id(id: &str) -> Result<(), TemplateError> {
    if id.is_empty() || id.len() > 255 || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(TemplateError::InvalidLogicalId(id.to_string()));
    }
    Ok(())
}

impl Template {
    pub fn new() -> Self {
        Self {
            format_version: FORMAT_VERSION,
            description: None,
            parameters: IndexMap::new(),
            resources: IndexMap::new(),
            outputs: IndexMap::new(),
        }
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = Some(description.into());
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Add a resource under a new logical ID
    pub fn add_resource(
        &mut self,
        logical_id: impl Into<String>,
        resource: Resource,
    ) -> Result<(), TemplateError> {
        let id = logical_id.into();
        check_logical_id(&id)?;
        if self.resources.contains_key(&id) || self.parameters.contains_key(&id) {
            return Err(TemplateError::DuplicateLogicalId(id));
        }
        self.resources.insert(id, resource);
        Ok(())
    }

    /// Add an input parameter under a new logical ID
    pub fn add_parameter(
        &mut self,
        logical_id: impl Into<String>,
        parameter: Parameter,
    ) -> Result<(), TemplateError> {
        let id = logical_id.into();
        check_logical_id(&id)?;
        if self.resources.contains_key(&id) || self.parameters.contains_key(&id) {
            return Err(TemplateError::DuplicateLogicalId(id));
        }
        self.parameters.insert(id, parameter);
        Ok(())
    }

    /// Add a stack output under a new logical ID
    pub fn add_output(
        &mut self,
        logical_id: impl Into<String>,
        output: Output,
    ) -> Result<(), TemplateError> {
        let id = logical_id.into();
        check_logical_id(&id)?;
        if self.outputs.contains_key(&id) {
            return Err(TemplateError::DuplicateLogicalId(id));
        }
        self.outputs.insert(id, output);
        Ok(())
    }

    pub fn resource(&self, logical_id: &str) -> Option<&Resource> {
        self.resources.get(logical_id)
    }

    /// Resources in declaration order
    pub fn resources(&self) -> impl Iterator<Item = (&str, &Resource)> {
        self.resources.iter().map(|(id, r)| (id.as_str(), r))
    }

    /// Resources of one CloudFormation type, in declaration order
    pub fn resources_of_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a Resource)> + 'a {
        self.resources()
            .filter(move |(_, r)| r.resource_type == resource_type)
    }

    pub fn parameter(&self, logical_id: &str) -> Option<&Parameter> {
        self.parameters.get(logical_id)
    }

    pub fn outputs(&self) -> impl Iterator<Item = (&str, &Output)> {
        self.outputs.iter().map(|(id, o)| (id.as_str(), o))
    }

    /// Check that every `Ref`, `Fn::GetAtt`, `Fn::Sub` variable and
    /// `DependsOn` entry names a declared resource, a parameter or a
    /// pseudo parameter.
    pub fn validate(&self) -> Result<(), TemplateError> {
        let declared: BTreeSet<&str> = self
            .resources
            .keys()
            .chain(self.parameters.keys())
            .map(String::as_str)
            .collect();

        let check = |from: &str, targets: Vec<String>| -> Result<(), TemplateError> {
            for target in targets {
                if target.starts_with("AWS::") || declared.contains(target.as_str()) {
                    continue;
                }
                return Err(TemplateError::DanglingReference {
                    from: from.to_string(),
                    target,
                });
            }
            Ok(())
        };

        for (id, resource) in &self.resources {
            let mut targets = resource.depends_on.clone();
            for value in resource.properties.values() {
                collect_references(value, &mut targets);
            }
            for value in [
                &resource.metadata,
                &resource.creation_policy,
                &resource.update_policy,
            ]
            .into_iter()
            .flatten()
            {
                collect_references(value, &mut targets);
            }
            check(id.as_str(), targets)?;
        }

        for (id, output) in &self.outputs {
            let mut targets = Vec::new();
            collect_references(&output.value, &mut targets);
            check(id.as_str(), targets)?;
        }

        Ok(())
    }

    /// Logical IDs a resource refers to (directly or via `DependsOn`)
    pub fn references_of(&self, logical_id: &str) -> Vec<String> {
        let Some(resource) = self.resources.get(logical_id) else {
            return Vec::new();
        };
        let mut targets = resource.depends_on.clone();
        for value in resource.properties.values() {
            collect_references(value, &mut targets);
        }
        targets.sort();
        targets.dedup();
        targets
    }

    pub fn to_json_pretty(&self) -> Result<String, TemplateError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_yaml(&self) -> Result<String, TemplateError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn to_value(&self) -> Result<Value, TemplateError> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Walk a JSON value and collect logical IDs named by intrinsics
fn collect_references(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(Value::String(id)) = map.get("Ref") {
                    out.push(id.clone());
                    return;
                }
                match map.get("Fn::GetAtt") {
                    Some(Value::Array(parts)) => {
                        if let Some(Value::String(id)) = parts.first() {
                            out.push(id.clone());
                        }
                        return;
                    }
                    Some(Value::String(dotted)) => {
                        if let Some(id) = dotted.split('.').next() {
                            out.push(id.to_string());
                        }
                        return;
                    }
                    _ => {}
                }
                match map.get("Fn::Sub") {
                    Some(Value::String(text)) => {
                        out.extend(sub_variables(text));
                        return;
                    }
                    Some(Value::Array(parts)) => {
                        let local: BTreeSet<&str> = parts
                            .get(1)
                            .and_then(Value::as_object)
                            .map(|vars| vars.keys().map(String::as_str).collect())
                            .unwrap_or_default();
                        if let Some(Value::String(text)) = parts.first() {
                            out.extend(
                                sub_variables(text)
                                    .into_iter()
                                    .filter(|v| !local.contains(v.as_str())),
                            );
                        }
                        if let Some(vars) = parts.get(1) {
                            collect_references(vars, out);
                        }
                        return;
                    }
                    _ => {}
                }
            }
            for v in map.values() {
                collect_references(v, out);
            }
        }
        Value::Array(items) => {
            for v in items {
                collect_references(v, out);
            }
        }
        _ => {}
    }
}

/// Logical IDs named by `${Name}` / `${Name.Attr}` in a `Fn::Sub` string.
/// `${!Literal}` escapes are skipped.
fn sub_variables(text: &str) -> Vec<String> {
    let mut vars = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            break;
        };
        let name = &after[..end];
        if !name.starts_with('!') && !name.is_empty() {
            let id = name.split('.').next().unwrap_or(name);
            vars.push(id.to_string());
        }
        rest = &after[end + 1..];
    }
    vars
}
