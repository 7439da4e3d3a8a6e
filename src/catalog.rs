//! Species catalog
//!
//! The catalog answers two questions for the deck service: what a species is
//! called and which species it evolves into. The promotion threshold of a
//! creature is the base experience of its next form.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

use crate::error::{DuelError, Result};
use crate::model::SpeciesId;

/// Catalog bundled with the binary: the three starter chains
const DEFAULT_CATALOG: &str = include_str!("../catalog/default.toml");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Species {
    pub id: SpeciesId,
    pub name: String,
    /// Unknown for some species in the upstream data
    #[serde(default)]
    pub base_experience: Option<u64>,
    #[serde(default)]
    pub evolves_to: Option<SpeciesId>,
}

/// Evolution target of a species, before deck ownership is known
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evolution {
    pub species: SpeciesId,
    pub name: String,
    pub threshold: Option<u64>,
}

#[async_trait]
pub trait SpeciesCatalog: Send + Sync {
    async fn species(&self, id: SpeciesId) -> Result<Option<Species>>;

    /// Next form of `id`, if any
    async fn evolution(&self, id: SpeciesId) -> Result<Option<Evolution>> {
        let Some(current) = self.species(id).await? else {
            return Ok(None);
        };
        let Some(next_id) = current.evolves_to else {
            return Ok(None);
        };
        let evolution = match self.species(next_id).await? {
            Some(next) => Evolution {
                species: next.id,
                name: next.name,
                threshold: next.base_experience,
            },
            None => Evolution {
                species: next_id,
                name: format!("#{next_id}"),
                threshold: None,
            },
        };
        Ok(Some(evolution))
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    species: Vec<Species>,
}

/// Catalog held in memory, loaded from TOML `[[species]]` tables
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    species: HashMap<SpeciesId, Species>,
}

impl StaticCatalog {
    pub fn new(species: impl IntoIterator<Item = Species>) -> Self {
        Self {
            species: species.into_iter().map(|s| (s.id, s)).collect(),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: CatalogFile =
            toml::from_str(content).map_err(|e| DuelError::Config(format!("catalog: {e}")))?;
        let catalog = Self::new(file.species);
        debug!(species = catalog.len(), "Catalog loaded");
        Ok(catalog)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn bundled() -> Result<Self> {
        Self::from_toml_str(DEFAULT_CATALOG)
    }

    pub fn len(&self) -> usize {
        self.species.len()
    }

    pub fn is_empty(&self) -> bool {
        self.species.is_empty()
    }

    pub fn get(&self, id: SpeciesId) -> Option<&Species> {
        self.species.get(&id)
    }
}

#[async_trait]
impl SpeciesCatalog for StaticCatalog {
    async fn species(&self, id: SpeciesId) -> Result<Option<Species>> {
        Ok(self.species.get(&id).cloned())
    }
}
