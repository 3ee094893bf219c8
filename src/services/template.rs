//! Job template handling.
//!
//! The template is the service's node graph in API format. Apart from a few
//! named injection points it is treated as opaque: nothing here knows what
//! a node is, only how to walk a dotted path to a value.

use rand::Rng;
use serde_json::Value;
use std::path::Path;

use crate::models::job::clamp_dimension;

/// Upper bound for generated sampler seeds.
pub const MAX_SEED: u64 = 100_000_000_000_000;

/// Draw a seed from `[1, MAX_SEED]`.
///
/// Concurrent callers must not share a predictable seed, otherwise the
/// service may return cached, identical images for different requests.
pub fn random_seed() -> u64 {
    rand::thread_rng().gen_range(1..=MAX_SEED)
}

/// Prototype job, loaded once and never mutated.
#[derive(Debug)]
pub struct JobTemplate {
    prototype: Value,
}

impl JobTemplate {
    /// Load a template file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TemplateError> {
        let path = path.as_ref();
        let raw = std::fs::read(path).map_err(|source| TemplateError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_slice(&raw)
    }

    pub fn from_slice(raw: &[u8]) -> Result<Self, TemplateError> {
        let prototype: Value = serde_json::from_slice(raw).map_err(TemplateError::Parse)?;
        Self::from_value(prototype)
    }

    pub fn from_value(prototype: Value) -> Result<Self, TemplateError> {
        if !prototype.is_object() {
            return Err(TemplateError::NotAnObject);
        }
        Ok(Self { prototype })
    }

    /// Deep-copy the prototype into a job that may be mutated freely.
    pub fn clone_job(&self) -> MutableJob {
        MutableJob {
            graph: self.prototype.clone(),
        }
    }
}

/// A private copy of the template for exactly one render.
#[derive(Debug, Clone)]
pub struct MutableJob {
    graph: Value,
}

impl MutableJob {
    /// Replace the string at `field_path`.
    pub fn set_text(&mut self, field_path: &str, value: &str) -> Result<(), TemplateError> {
        *self.resolve_mut(field_path)? = Value::String(value.to_string());
        Ok(())
    }

    /// Replace the number at `field_path`.
    pub fn set_seed(&mut self, field_path: &str, seed: u64) -> Result<(), TemplateError> {
        *self.resolve_mut(field_path)? = Value::from(seed);
        Ok(())
    }

    /// Write `width` and `height` into the object at `field_path`.
    ///
    /// Both keys must already exist there. Values are clamped into the
    /// supported envelope before being written.
    pub fn set_size(
        &mut self,
        field_path: &str,
        width: i64,
        height: i64,
    ) -> Result<(), TemplateError> {
        let target = self.resolve_mut(field_path)?;
        let Some(object) = target.as_object_mut() else {
            return Err(TemplateError::FieldNotFound(format!("{field_path}.width")));
        };
        for key in ["width", "height"] {
            if !object.contains_key(key) {
                return Err(TemplateError::FieldNotFound(format!("{field_path}.{key}")));
            }
        }
        object.insert("width".to_string(), Value::from(clamp_dimension(width)));
        object.insert("height".to_string(), Value::from(clamp_dimension(height)));
        Ok(())
    }

    /// Read back a value, mostly useful in tests and logs.
    pub fn get(&self, field_path: &str) -> Option<&Value> {
        let mut current = &self.graph;
        for segment in field_path.split('.') {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn serialize(&self) -> Result<Vec<u8>, TemplateError> {
        serde_json::to_vec(&self.graph).map_err(TemplateError::Parse)
    }

    fn resolve_mut(&mut self, field_path: &str) -> Result<&mut Value, TemplateError> {
        let not_found = || TemplateError::FieldNotFound(field_path.to_string());
        if field_path.is_empty() {
            return Err(not_found());
        }
        let mut current = &mut self.graph;
        for segment in field_path.split('.') {
            current = match current {
                Value::Object(map) => map.get_mut(segment).ok_or_else(not_found)?,
                Value::Array(items) => {
                    let index = segment.parse::<usize>().map_err(|_| not_found())?;
                    items.get_mut(index).ok_or_else(not_found)?
                }
                _ => return Err(not_found()),
            };
        }
        Ok(current)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("Failed to read job template {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Job template is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Job template must be a JSON object")]
    NotAnObject,

    #[error("Template field not found: {0}")]
    FieldNotFound(String),
}
