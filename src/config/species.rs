use std::fmt;
use crate::config::defs::{PipelineError, FOLDER_LOGS, FOLDER_RESULTS, FOLDER_SCRIPTS};
use crate::utils::paths::validate_component;

/// A validated species handle. Only the registry can construct one, so holding
/// a `Species` means the id was found in the loaded configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Species {
    id: String,
    name: String,
    folder_name: String,
}

impl Species {
    pub(crate) fn new(id: &str, name: Option<&str>, folder_name: Option<&str>) -> Self {
        Species {
            id: id.to_string(),
            name: name.unwrap_or(id).to_string(),
            folder_name: folder_name.unwrap_or(id).to_string(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn folder_name(&self) -> &str {
        &self.folder_name
    }
}

impl fmt::Display for Species {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}


/// Configured species in configuration order.
#[derive(Debug, Clone, Default)]
pub struct SpeciesRegistry {
    species: Vec<Species>,
}

impl SpeciesRegistry {
    pub(crate) fn new(species: Vec<Species>) -> Result<Self, PipelineError> {
        for (i, s) in species.iter().enumerate() {
            // each species tree is one plain folder directly under the project root
            validate_component(&s.folder_name).map_err(|_| PipelineError::Config(format!(
                "Species {} has folder '{}', which is not a plain directory name", s.id, s.folder_name
            )))?;
            if [FOLDER_RESULTS, FOLDER_LOGS, FOLDER_SCRIPTS].contains(&s.folder_name.as_str()) {
                return Err(PipelineError::Config(format!(
                    "Species {} folder '{}' clashes with a project folder", s.id, s.folder_name
                )));
            }
            if species[..i].iter().any(|other| other.folder_name == s.folder_name) {
                return Err(PipelineError::Config(format!(
                    "Species {} reuses folder {}", s.id, s.folder_name
                )));
            }
        }
        Ok(SpeciesRegistry { species })
    }

    pub fn lookup(&self, id: &str) -> Result<&Species, PipelineError> {
        self.species
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| PipelineError::InvalidSpecies(id.to_string()))
    }

    pub fn contains(&self, species: &Species) -> bool {
        self.species.iter().any(|s| s == species)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Species> {
        self.species.iter()
    }

    pub fn len(&self) -> usize {
        self.species.len()
    }

    pub fn is_empty(&self) -> bool {
        self.species.is_empty()
    }

    /// Resolves a CLI selection. An empty selection means every configured species.
    pub fn select(&self, ids: &[String]) -> Result<Vec<Species>, PipelineError> {
        if ids.is_empty() {
            return Ok(self.species.clone());
        }
        ids.iter().map(|id| self.lookup(id).cloned()).collect()
    }
}
