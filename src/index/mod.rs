//! Annotation index: a build-time substitute for classpath scanning.
//!
//! The index maps annotation type names to the program elements carrying
//! them. It is computed once per archive by statically parsing class bytes
//! (see [`crate::classfile`]), serialized to JSON, and attached to the
//! deployable unit at [`INDEX_RESOURCE`] so the isolated runtime reads it
//! back without re-scanning.
//!
//! Build order is load-bearing: library jars are indexed first and the
//! application's own classes last, so an application class shadows a library
//! class with the same binary name.

use crate::classfile;
use crate::resource::{ResourceManager, ResourceSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

/// Logical path of the serialized index inside a deployable unit.
pub const INDEX_RESOURCE: &str = "META-INF/caribe/annotations.json";

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index resource is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("resource error: {0}")]
    Resource(#[from] crate::resource::ResourceError),
    #[error("index resource {INDEX_RESOURCE} not found")]
    Missing,
}

/// What kind of program element an annotation was found on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Class,
    Method,
    Field,
}

/// One annotated program element with the raw annotation attribute values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotatedElement {
    pub kind: ElementKind,
    /// Dotted binary name of the owning class.
    pub class_name: String,
    /// Member name for methods/fields, `None` for class-level annotations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member: Option<String>,
    /// Annotation attribute values as decoded from the class bytes.
    pub attributes: Value,
}

/// Per-class annotation summary kept so later (application) definitions can
/// replace earlier (library) ones wholesale.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ClassAnnotations {
    entries: Vec<(String, AnnotatedElement)>,
}

/// Immutable, serializable annotation lookup table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnnotationIndex {
    by_annotation: HashMap<String, Vec<AnnotatedElement>>,
    class_count: usize,
}

impl AnnotationIndex {
    /// Elements annotated with the given dotted annotation type name.
    pub fn annotated(&self, annotation_type: &str) -> &[AnnotatedElement] {
        self.by_annotation
            .get(annotation_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn annotation_types(&self) -> impl Iterator<Item = &str> {
        self.by_annotation.keys().map(String::as_str)
    }

    pub fn class_count(&self) -> usize {
        self.class_count
    }

    pub fn to_json(&self) -> Result<Vec<u8>, IndexError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, IndexError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Read a previously attached index back out of a resource tier.
    pub fn from_resources(resources: &ResourceManager) -> Result<Self, IndexError> {
        let bytes = resources.read(INDEX_RESOURCE)?.ok_or(IndexError::Missing)?;
        Self::from_json(&bytes)
    }
}

/// Incremental index builder with "application overrides library" precedence.
#[derive(Debug, Default)]
pub struct IndexBuilder {
    classes: HashMap<String, ClassAnnotations>,
    order: Vec<String>,
    skipped: usize,
}

impl IndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index every `.class` entry in a resource set. Unreadable or corrupt
    /// entries are logged and skipped; a single bad class never aborts the
    /// build.
    pub fn add_set(&mut self, set: &dyn ResourceSet) {
        for path in set.paths() {
            if !path.ends_with(".class") {
                continue;
            }
            match set.read(&path) {
                Ok(Some(bytes)) => self.add_class_bytes(&bytes),
                Ok(None) => {}
                Err(err) => {
                    warn!(path = %path, error = %err, "Unreadable class entry skipped");
                    self.skipped += 1;
                }
            }
        }
    }

    /// Index a single class from its bytes. A later call for the same binary
    /// name replaces the earlier entry (application overrides library).
    pub fn add_class_bytes(&mut self, bytes: &[u8]) {
        match classfile::parse(bytes) {
            Ok(info) => {
                let mut entries = Vec::new();
                for ann in &info.annotations {
                    entries.push((
                        ann.type_name.clone(),
                        AnnotatedElement {
                            kind: ElementKind::Class,
                            class_name: info.binary_name.clone(),
                            member: None,
                            attributes: ann.values.clone(),
                        },
                    ));
                }
                for (member, anns) in &info.method_annotations {
                    for ann in anns {
                        entries.push((
                            ann.type_name.clone(),
                            AnnotatedElement {
                                kind: ElementKind::Method,
                                class_name: info.binary_name.clone(),
                                member: Some(member.clone()),
                                attributes: ann.values.clone(),
                            },
                        ));
                    }
                }
                for (member, anns) in &info.field_annotations {
                    for ann in anns {
                        entries.push((
                            ann.type_name.clone(),
                            AnnotatedElement {
                                kind: ElementKind::Field,
                                class_name: info.binary_name.clone(),
                                member: Some(member.clone()),
                                attributes: ann.values.clone(),
                            },
                        ));
                    }
                }
                if !self.classes.contains_key(&info.binary_name) {
                    self.order.push(info.binary_name.clone());
                }
                self.classes
                    .insert(info.binary_name, ClassAnnotations { entries });
            }
            Err(err) => {
                warn!(error = %err, "Corrupt class bytes skipped during indexing");
                self.skipped += 1;
            }
        }
    }

    /// Number of entries skipped due to unreadable or corrupt bytes.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn build(self) -> AnnotationIndex {
        let mut by_annotation: HashMap<String, Vec<AnnotatedElement>> = HashMap::new();
        let class_count = self.classes.len();
        for name in &self.order {
            if let Some(class) = self.classes.get(name) {
                for (annotation_type, element) in &class.entries {
                    by_annotation
                        .entry(annotation_type.clone())
                        .or_default()
                        .push(element.clone());
                }
            }
        }
        debug!(
            class_count = class_count,
            annotation_types = by_annotation.len(),
            "Annotation index built"
        );
        AnnotationIndex {
            by_annotation,
            class_count,
        }
    }
}
