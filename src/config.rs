//!
//! Store configuration: the listen address the local identity derives from,
//! and the per-family schema (type and comparator) the codecs resolve
//! against.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::comparator::{self, NameComparator};
use crate::error::StoreError;
use crate::family::{ColumnFamily, ColumnFamilyType};
use crate::identity;
use crate::types::NodeId;

/// Resolved metadata for one configured column family.
#[derive(Debug, Clone)]
pub struct FamilyMeta {
    pub family_type: ColumnFamilyType,
    pub comparator: Arc<dyn NameComparator>,
}

/// The family-name registry a deserializer resolves wire frames against.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    families: HashMap<String, FamilyMeta>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder {
            families: Vec::new(),
        }
    }

    pub fn family(&self, name: &str) -> Option<&FamilyMeta> {
        self.families.get(name)
    }

    /// An empty family shaped by this schema.
    pub fn new_family(&self, name: &str) -> Result<ColumnFamily, StoreError> {
        let meta = self
            .family(name)
            .ok_or_else(|| StoreError::UnknownFamily(name.to_string()))?;
        Ok(ColumnFamily::new(
            name,
            meta.family_type,
            meta.comparator.clone(),
        ))
    }

    pub fn family_names(&self) -> impl Iterator<Item = &str> {
        self.families.keys().map(String::as_str)
    }
}

pub struct SchemaBuilder {
    families: Vec<(String, ColumnFamilyType, String)>,
}

impl SchemaBuilder {
    pub fn family(
        mut self,
        name: impl Into<String>,
        family_type: ColumnFamilyType,
        comparator: impl Into<String>,
    ) -> Self {
        self.families
            .push((name.into(), family_type, comparator.into()));
        self
    }

    pub fn build(self) -> Result<Schema, StoreError> {
        let mut families = HashMap::with_capacity(self.families.len());
        for (name, family_type, label) in self.families {
            let meta = FamilyMeta {
                family_type,
                comparator: comparator::by_label(&label)?,
            };
            if families.insert(name.clone(), meta).is_some() {
                return Err(StoreError::Config(format!(
                    "column family {name:?} configured twice"
                )));
            }
        }
        Ok(Schema { families })
    }
}

fn default_comparator() -> String {
    "bytes".to_string()
}

/// One `column_families` entry in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilyConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub family_type: String,
    #[serde(default = "default_comparator")]
    pub comparator: String,
}

/// Process configuration, loaded from JSON at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// The replica's own address; its bytes become the node id.
    pub listen_address: String,
    #[serde(default)]
    pub column_families: Vec<FamilyConfig>,
}

impl StoreConfig {
    pub fn from_json(json: &str) -> Result<StoreConfig, StoreError> {
        serde_json::from_str(json).map_err(|err| StoreError::Config(err.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<StoreConfig, StoreError> {
        let json = std::fs::read_to_string(path)?;
        StoreConfig::from_json(&json)
    }

    /// The local replica id: the listen address bytes.
    pub fn node_id(&self) -> Result<NodeId, StoreError> {
        let addr: std::net::IpAddr = self.listen_address.parse().map_err(|_| {
            StoreError::Config(format!(
                "listen_address {:?} is not an IP address",
                self.listen_address
            ))
        })?;
        Ok(addr.into())
    }

    pub fn schema(&self) -> Result<Schema, StoreError> {
        let mut builder = Schema::builder();
        for family in &self.column_families {
            builder = builder.family(
                family.name.as_str(),
                ColumnFamilyType::parse(&family.family_type)?,
                family.comparator.as_str(),
            );
        }
        builder.build()
    }

    /// Installs the process-wide identity from this configuration.
    pub fn initialize_identity(&self) -> Result<(), StoreError> {
        let id = self.node_id()?;
        tracing::debug!(address = %self.listen_address, "initializing local identity");
        identity::initialize(id)
    }
}
