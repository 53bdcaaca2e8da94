//! Field catalog: every searchable crash report field

use crate::search::error::{SearchError, SearchResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use strum::{AsRefStr, Display, EnumString};
use validator::Validate;

/// Field definition set shipped with the crate
const DEFAULT_FIELDS: &str = include_str!("../../config/fields.json");

/// Suffix of the untokenized sub-field
pub const FULL_SUFFIX: &str = "full";

/// Top-level document section a field lives under
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Namespace {
    RawCrash,
    ProcessedCrash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DataType {
    String,
    Enum,
    Integer,
    Boolean,
    Date,
    Datetime,
}

impl DataType {
    /// Types that support range operators
    pub fn is_ordered(&self) -> bool {
        matches!(self, DataType::Integer | DataType::Date | DataType::Datetime)
    }

    pub fn is_textual(&self) -> bool {
        matches!(self, DataType::String | DataType::Enum)
    }
}

/// Description of one searchable field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct FieldDefinition {
    #[validate(length(min = 1, max = 100))]
    pub public_name: String,

    #[validate(length(min = 1, max = 100))]
    pub storage_name: String,

    pub namespace: Namespace,

    pub data_type: DataType,

    #[serde(default)]
    pub has_full_version: bool,

    #[serde(default)]
    pub is_facetable: bool,

    #[serde(default)]
    pub permissions: BTreeSet<String>,

    #[serde(default)]
    pub description: Option<String>,
}

impl FieldDefinition {
    pub fn new(
        public_name: impl Into<String>,
        storage_name: impl Into<String>,
        namespace: Namespace,
        data_type: DataType,
    ) -> Self {
        Self {
            public_name: public_name.into(),
            storage_name: storage_name.into(),
            namespace,
            data_type,
            has_full_version: false,
            is_facetable: false,
            permissions: BTreeSet::new(),
            description: None,
        }
    }

    pub fn with_full_version(mut self) -> Self {
        self.has_full_version = true;
        self
    }

    pub fn facetable(mut self) -> Self {
        self.is_facetable = true;
        self
    }

    /// Dotted backend path, e.g. `processed_crash.signature`
    pub fn storage_path(&self) -> String {
        format!("{}.{}", self.namespace, self.storage_name)
    }

    /// Path of the untokenized sub-field when one exists, the plain path otherwise
    pub fn exact_path(&self) -> String {
        if self.has_full_version {
            format!("{}.{}", self.storage_path(), FULL_SUFFIX)
        } else {
            self.storage_path()
        }
    }
}

/// On-disk layout of a definition set
#[derive(Debug, Deserialize)]
struct FieldSet {
    version: u32,
    fields: Vec<FieldDefinition>,
}

/// Read-only registry of field definitions
#[derive(Debug, Clone)]
pub struct FieldCatalog {
    version: u32,
    fields: Vec<FieldDefinition>,
    by_public: HashMap<String, usize>,
    by_storage: HashMap<(Namespace, String), usize>,
}

impl FieldCatalog {
    pub fn new(version: u32, fields: Vec<FieldDefinition>) -> SearchResult<Self> {
        let mut by_public = HashMap::with_capacity(fields.len());
        let mut by_storage = HashMap::with_capacity(fields.len());

        for (idx, field) in fields.iter().enumerate() {
            field.validate().map_err(|e| {
                SearchError::InvalidConfiguration(format!(
                    "field {:?} is invalid: {}",
                    field.public_name, e
                ))
            })?;

            if by_public.insert(field.public_name.clone(), idx).is_some() {
                return Err(SearchError::InvalidConfiguration(format!(
                    "duplicate public field name {:?}",
                    field.public_name
                )));
            }
            by_storage
                .entry((field.namespace, field.storage_name.clone()))
                .or_insert(idx);
        }

        Ok(Self {
            version,
            fields,
            by_public,
            by_storage,
        })
    }

    /// Catalog built from the embedded definition set
    pub fn builtin() -> SearchResult<Self> {
        Self::from_json(DEFAULT_FIELDS)
    }

    pub fn from_json(json: &str) -> SearchResult<Self> {
        let set: FieldSet = serde_json::from_str(json).map_err(|e| {
            SearchError::InvalidConfiguration(format!("invalid field definition set: {}", e))
        })?;
        Self::new(set.version, set.fields)
    }

    pub fn from_path(path: &Path) -> SearchResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            SearchError::InvalidConfiguration(format!(
                "cannot read field definitions from {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&json)
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn lookup(&self, public_name: &str) -> Option<&FieldDefinition> {
        self.by_public.get(public_name).map(|&idx| &self.fields[idx])
    }

    pub fn is_known(&self, public_name: &str) -> bool {
        self.by_public.contains_key(public_name)
    }

    /// Reverse lookup used when renaming returned documents
    pub fn by_storage(&self, namespace: Namespace, storage_name: &str) -> Option<&FieldDefinition> {
        self.by_storage
            .get(&(namespace, storage_name.to_string()))
            .map(|&idx| &self.fields[idx])
    }

    pub fn facetable_fields(&self) -> Vec<&FieldDefinition> {
        self.fields.iter().filter(|f| f.is_facetable).collect()
    }

    pub fn fields(&self) -> &[FieldDefinition] {
        &self.fields
    }

    /// Every dotted storage path the catalog accounts for
    pub fn storage_paths(&self) -> BTreeSet<String> {
        self.fields.iter().map(FieldDefinition::storage_path).collect()
    }

    /// Copy of this catalog with one field replaced (matched by public name) or added
    pub fn with_override(&self, field: FieldDefinition) -> SearchResult<Self> {
        let mut fields = self.fields.clone();
        match fields.iter_mut().find(|f| f.public_name == field.public_name) {
            Some(existing) => *existing = field,
            None => fields.push(field),
        }
        Self::new(self.version, fields)
    }
}
