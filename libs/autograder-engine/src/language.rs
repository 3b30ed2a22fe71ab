// Language registry: which image runs a submission and how
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Placeholder in a command template, expanded to the input file path.
pub const INPUT_PLACEHOLDER: &str = "{input}";

/// Name of the problem input inside the sandbox for file-fed languages.
pub const INPUT_FILE: &str = "in.txt";

/// How the problem input reaches the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    /// Written to the sandbox's standard input after start.
    Stdin,
    /// Shipped in the archive as [`INPUT_FILE`] and named on the command line.
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageConfig {
    pub name: String,
    pub image: String,
    pub filename: String,
    pub command: Vec<String>,
    #[serde(default = "default_input_mode")]
    pub input: InputMode,
}

fn default_input_mode() -> InputMode {
    InputMode::Stdin
}

impl LanguageConfig {
    /// Expand the command template for a run.
    pub fn command_for(&self, input_path: &str) -> Vec<String> {
        self.command
            .iter()
            .map(|arg| arg.replace(INPUT_PLACEHOLDER, input_path))
            .collect()
    }

    fn validate(&self) -> Result<(), RegistryError> {
        let invalid = |reason: &str| RegistryError::Invalid {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name is empty"));
        }
        if self.image.trim().is_empty() {
            return Err(invalid("image is empty"));
        }
        if self.filename.trim().is_empty() || self.filename.contains('/') {
            return Err(invalid("filename must be a bare file name"));
        }
        if self.filename == INPUT_FILE {
            return Err(invalid("filename collides with the input file"));
        }
        if self.command.is_empty() {
            return Err(invalid("command is empty"));
        }
        if self.input == InputMode::File
            && !self.command.iter().any(|arg| arg.contains(INPUT_PLACEHOLDER))
        {
            return Err(invalid("file input mode requires {input} in the command"));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("no languages configured")]
    Empty,
    #[error("language '{0}' is configured twice")]
    Duplicate(String),
    #[error("language '{name}' is invalid: {reason}")]
    Invalid { name: String, reason: String },
}

#[derive(Debug, Deserialize)]
struct LanguagesJson {
    languages: Vec<LanguageConfig>,
}

/// Static lookup from language name to its sandbox configuration.
///
/// Read-only after construction, so it is shared behind an `Arc` without locking.
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    configs: HashMap<String, LanguageConfig>,
}

impl LanguageRegistry {
    /// Languages available without a configuration file
    pub fn builtin() -> Self {
        let builtin = vec![
            LanguageConfig {
                name: "python".to_string(),
                image: "docker.io/library/python:3-alpine".to_string(),
                filename: "main.py".to_string(),
                command: vec!["python".to_string(), "main.py".to_string()],
                input: InputMode::Stdin,
            },
            LanguageConfig {
                name: "sed".to_string(),
                image: "docker.io/library/alpine:3".to_string(),
                filename: "script".to_string(),
                command: vec![
                    "sed".to_string(),
                    "-f".to_string(),
                    "script".to_string(),
                    INPUT_PLACEHOLDER.to_string(),
                ],
                input: InputMode::File,
            },
            LanguageConfig {
                name: "bash".to_string(),
                image: "docker.io/library/bash:5".to_string(),
                filename: "main.sh".to_string(),
                command: vec!["bash".to_string(), "main.sh".to_string()],
                input: InputMode::Stdin,
            },
        ];

        Self {
            configs: builtin.into_iter().map(|c| (c.name.clone(), c)).collect(),
        }
    }

    pub fn from_configs(configs: Vec<LanguageConfig>) -> Result<Self, RegistryError> {
        if configs.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut map = HashMap::new();
        for config in configs {
            config.validate()?;
            if map.contains_key(&config.name) {
                return Err(RegistryError::Duplicate(config.name));
            }
            map.insert(config.name.clone(), config);
        }

        Ok(Self { configs: map })
    }

    /// Load language configurations from a `{"languages": [...]}` file
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let content = fs::read_to_string(path).map_err(|source| RegistryError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let parsed: LanguagesJson =
            serde_json::from_str(&content).map_err(|source| RegistryError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        Self::from_configs(parsed.languages)
    }

    pub fn lookup(&self, language: &str) -> Option<&LanguageConfig> {
        self.configs.get(language)
    }

    pub fn contains(&self, language: &str) -> bool {
        self.configs.contains_key(language)
    }

    /// Sorted language names
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.configs.keys().cloned().collect();
        names.sort();
        names
    }

    /// Entries in name order
    pub fn entries(&self) -> Vec<&LanguageConfig> {
        let mut entries: Vec<&LanguageConfig> = self.configs.values().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    /// Distinct images referenced by the registry
    pub fn images(&self) -> Vec<String> {
        let mut images: Vec<String> = self.configs.values().map(|c| c.image.clone()).collect();
        images.sort();
        images.dedup();
        images
    }
}
