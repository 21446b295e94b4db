// src/config/store.rs: YAML-backed hierarchical settings

use std::fs;
use std::path::{Path, PathBuf};
use log::LevelFilter;
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};
use crate::config::defs::{PipelineError, Step, DEFAULT_THREADS, SETTING_ENABLED};
use crate::config::species::{Species, SpeciesRegistry};

const KEY_PROJECT_ROOT: &str = "path_adna_project";
const KEY_THREADS_DEFAULT: &str = "threads_default";
const KEY_LOG_LEVEL: &str = "log_level";
const KEY_TOOLS: &str = "tools";
const KEY_SPECIES: &str = "species";
const KEY_PROCESSING: &str = "processing";
const KEY_COMPARISONS: &str = "comparisons";


/// Read-only view of the pipeline configuration. Built once in main and
/// handed to every component through `RunConfig`.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    root: Value,
    project_root: PathBuf,
    species: SpeciesRegistry,
}

impl ConfigStore {
    /// Parses the configuration file. A missing or malformed file is fatal for the run.
    ///
    /// # Arguments
    ///
    /// * `path` - YAML configuration file
    ///
    /// # Returns
    ///
    /// Result<ConfigStore, PipelineError>
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let text = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("Cannot read config file {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, PipelineError> {
        let root: Value = serde_yaml::from_str(text)
            .map_err(|e| PipelineError::Config(format!("Invalid YAML: {}", e)))?;
        if !root.is_mapping() {
            return Err(PipelineError::Config("Top level of config must be a mapping".to_string()));
        }

        let project_root = root
            .get(KEY_PROJECT_ROOT)
            .and_then(Value::as_str)
            .map(PathBuf::from)
            .ok_or_else(|| PipelineError::Config(format!("Missing required key '{}'", KEY_PROJECT_ROOT)))?;

        let species = parse_species(root.get(KEY_SPECIES))?;

        Ok(ConfigStore { root, project_root, species })
    }

    /// Walks the tree by successive keys. None if any key is absent or an
    /// intermediate value is not a mapping.
    pub fn get(&self, keys: &[&str]) -> Option<&Value> {
        let mut node = &self.root;
        for key in keys {
            node = node.as_mapping()?.get(*key)?;
        }
        Some(node)
    }

    /// Like `get`, deserialized into `T`. Falls back to `default` when the key
    /// is absent or has the wrong shape.
    pub fn get_or<T: DeserializeOwned>(&self, keys: &[&str], default: T) -> T {
        self.get(keys)
            .and_then(|v| serde_yaml::from_value(v.clone()).ok())
            .unwrap_or(default)
    }

    /// Global `processing.<step>` settings, shallow-overwritten key by key with
    /// `species.<id>.processing.<step>`.
    pub fn processing_settings(&self, step: Step, species: Option<&Species>) -> Mapping {
        let mut merged = self
            .get(&[KEY_PROCESSING, step.key()])
            .and_then(Value::as_mapping)
            .cloned()
            .unwrap_or_default();

        if let Some(sp) = species {
            if let Some(overrides) = self
                .get(&[KEY_SPECIES, sp.id(), KEY_PROCESSING, step.key()])
                .and_then(Value::as_mapping)
            {
                for (k, v) in overrides {
                    merged.insert(k.clone(), v.clone());
                }
            }
        }
        merged
    }

    /// One merged step setting.
    ///
    /// # Arguments
    ///
    /// * `step` - processing step
    /// * `species` - optional species whose overrides win
    /// * `key` - setting name inside the step block
    /// * `default` - value used when neither level sets `key`
    pub fn setting<T: DeserializeOwned>(&self, step: Step, species: Option<&Species>, key: &str, default: T) -> T {
        self.processing_settings(step, species)
            .get(key)
            .and_then(|v| serde_yaml::from_value(v.clone()).ok())
            .unwrap_or(default)
    }

    /// A step runs unless an explicit `enabled: false` is found for the step,
    /// its sub-group or its pipeline group. Species flags shadow global ones.
    pub fn is_enabled(&self, step: Step, species: Option<&Species>) -> bool {
        let mut blocks = vec![step.group().key()];
        if let Some(sub) = step.subgroup() {
            blocks.push(sub);
        }
        blocks.push(step.key());
        blocks.iter().all(|block| self.block_enabled(block, species))
    }

    fn block_enabled(&self, block: &str, species: Option<&Species>) -> bool {
        if let Some(sp) = species {
            if let Some(flag) = self
                .get(&[KEY_SPECIES, sp.id(), KEY_PROCESSING, block, SETTING_ENABLED])
                .and_then(Value::as_bool)
            {
                return flag;
            }
        }
        self.get(&[KEY_PROCESSING, block, SETTING_ENABLED])
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }

    /// Executable configured for a logical tool name.
    pub fn tool_path(&self, tool: &str) -> Result<String, PipelineError> {
        self.get(&[KEY_TOOLS, tool])
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| PipelineError::Config(format!("No executable configured for tool '{}'", tool)))
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn threads_default(&self) -> usize {
        self.get_or::<usize>(&[KEY_THREADS_DEFAULT], DEFAULT_THREADS).max(1)
    }

    pub fn species(&self) -> &SpeciesRegistry {
        &self.species
    }

    pub fn log_level(&self) -> LevelFilter {
        self.get(&[KEY_LOG_LEVEL])
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<LevelFilter>().ok())
            .unwrap_or(LevelFilter::Info)
    }

    /// Species groups for the comparison plots, as configured.
    pub fn comparisons(&self) -> Vec<Vec<String>> {
        self.get_or(&[KEY_COMPARISONS], Vec::new())
    }
}


fn parse_species(node: Option<&Value>) -> Result<SpeciesRegistry, PipelineError> {
    let mapping = match node {
        None | Some(Value::Null) => return SpeciesRegistry::new(Vec::new()),
        Some(Value::Mapping(m)) => m,
        Some(_) => return Err(PipelineError::Config(format!("'{}' must be a mapping", KEY_SPECIES))),
    };

    let mut species = Vec::with_capacity(mapping.len());
    for (key, entry) in mapping {
        let id = key
            .as_str()
            .ok_or_else(|| PipelineError::Config(format!("Species key {:?} is not a string", key)))?;
        let name = entry.get("name").and_then(Value::as_str);
        let folder = entry.get("folder_name").and_then(Value::as_str);
        species.push(Species::new(id, name, folder));
    }
    SpeciesRegistry::new(species)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::defs::{SETTING_ADAPTER_R1, SETTING_LENGTH_REQUIRED, SETTING_THREADS};

    const YAML: &str = r#"
path_adna_project: /data/aDNA
threads_default: 8
log_level: debug
tools:
  fastp: /opt/bin/fastp
species:
  Bger:
    name: Blattella germanica
    processing:
      adapter_remove_and_merge:
        adapter_sequence_r1: TTTT
      quality_filter:
        enabled: false
  Dsim:
    name: Drosophila simulans
processing:
  adapter_remove_and_merge:
    adapter_sequence_r1: AAAA
    adapter_sequence_r2: CCCC
    length_required: 20
  post_processing:
    enabled: false
comparisons:
  - [Bger, Dsim]
"#;

    #[test]
    fn test_species_override_wins_per_key() {
        let store = ConfigStore::from_yaml_str(YAML).unwrap();
        let bger = store.species().lookup("Bger").unwrap().clone();
        let dsim = store.species().lookup("Dsim").unwrap().clone();

        let r1: String = store.setting(Step::AdapterRemoveAndMerge, Some(&bger), SETTING_ADAPTER_R1, String::new());
        assert_eq!(r1, "TTTT");
        let r2: String = store.setting(Step::AdapterRemoveAndMerge, Some(&bger), "adapter_sequence_r2", String::new());
        assert_eq!(r2, "CCCC", "global key must survive a species override of a sibling key");
        let r1_dsim: String = store.setting(Step::AdapterRemoveAndMerge, Some(&dsim), SETTING_ADAPTER_R1, String::new());
        assert_eq!(r1_dsim, "AAAA");
        let len: u32 = store.setting(Step::AdapterRemoveAndMerge, None, SETTING_LENGTH_REQUIRED, 15);
        assert_eq!(len, 20);
        let threads: usize = store.setting(Step::QualityFilter, None, SETTING_THREADS, 3);
        assert_eq!(threads, 3);
    }

    #[test]
    fn test_enabled_defaults_and_overrides() {
        let store = ConfigStore::from_yaml_str(YAML).unwrap();
        let bger = store.species().lookup("Bger").unwrap().clone();
        let dsim = store.species().lookup("Dsim").unwrap().clone();

        assert!(store.is_enabled(Step::Deduplication, None));
        assert!(store.is_enabled(Step::QualityFilter, Some(&dsim)));
        assert!(!store.is_enabled(Step::QualityFilter, Some(&bger)));
        assert!(!store.is_enabled(Step::MtdnaDetermineRegions, None), "group flag disables its steps");
    }

    #[test]
    fn test_get_walks_and_defaults() {
        let store = ConfigStore::from_yaml_str(YAML).unwrap();
        assert_eq!(store.get(&["tools", "fastp"]).and_then(Value::as_str), Some("/opt/bin/fastp"));
        assert!(store.get(&["tools", "fastp", "deeper"]).is_none());
        assert_eq!(store.get_or::<u32>(&["nothing", "here"], 7), 7);
        assert_eq!(store.threads_default(), 8);
        assert_eq!(store.log_level(), LevelFilter::Debug);
        assert_eq!(store.project_root(), Path::new("/data/aDNA"));
        assert_eq!(store.comparisons(), vec![vec!["Bger".to_string(), "Dsim".to_string()]]);
    }

    #[test]
    fn test_tool_path_missing_is_config_error() {
        let store = ConfigStore::from_yaml_str(YAML).unwrap();
        assert_eq!(store.tool_path("fastp").unwrap(), "/opt/bin/fastp");
        assert!(matches!(store.tool_path("bwa"), Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_missing_project_root_rejected() {
        let result = ConfigStore::from_yaml_str("threads_default: 2\n");
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let result = ConfigStore::load(Path::new("/definitely/not/here/config.yaml"));
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }
}
