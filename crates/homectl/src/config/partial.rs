use std::collections::HashMap;
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use toml::Spanned;

use super::diagnostics::Diagnostic;
use super::diagnostics::Error;
use super::diagnostics::LoadError;
use super::diagnostics::MergeConflictLocation;
use super::diagnostics::MergeError;
use super::diagnostics::SourceInfo;
use super::diagnostics::Warning;
use super::LogLevel;

/// One config file as written, every field optional.
#[derive(Debug, Default, Deserialize)]
pub struct PartialConfig {
    #[serde(default)]
    pub imports: Vec<String>,

    pub logging: Option<PartialLoggingConfig>,
    pub remote: Option<PartialRemoteConfig>,
    pub credentials: Option<PartialCredentialsConfig>,
    pub api: Option<PartialApiConfig>,

    /// Source information for error reporting (not serialized)
    #[serde(skip)]
    pub source: Option<SourceInfo>,

    /// Where each merged field was defined, keyed by field path.
    #[serde(skip)]
    pub locations: HashMap<String, MergeConflictLocation>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialLoggingConfig {
    pub level: Option<Spanned<LogLevel>>,
    pub overrides: Option<HashMap<String, Spanned<LogLevel>>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialRemoteConfig {
    pub base_url: Option<Spanned<String>>,
    pub house_id: Option<Spanned<u32>>,
    pub request_timeout_secs: Option<Spanned<u64>>,
    pub command_timeout_secs: Option<Spanned<u64>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialCredentialsConfig {
    pub token: Option<Spanned<String>>,
    pub login: Option<Spanned<String>>,
    pub password: Option<Spanned<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialApiConfig {
    pub listen: Option<Spanned<IpAddr>>,
    pub port: Option<Spanned<u16>>,
}

/// Where each merged field was first defined.
///
/// Keeps the first value of every field and records a conflict for each
/// later definition.
#[derive(Default)]
struct FieldTracker {
    seen: HashMap<String, MergeConflictLocation>,
    diagnostics: Vec<Diagnostic>,
}

impl FieldTracker {
    fn merge<T>(
        &mut self,
        field_path: String,
        source: &SourceInfo,
        slot: &mut Option<Spanned<T>>,
        incoming: Option<Spanned<T>>,
    ) {
        let Some(value) = incoming else {
            return;
        };

        let location = MergeConflictLocation {
            file_path: source.file_path.clone(),
            span: value.span(),
            content: source.content.clone(),
        };

        match self.seen.get(&field_path) {
            Some(prev_loc) => {
                self.diagnostics.push(Diagnostic::Error(Error::Merge(MergeError {
                    message: format!("'{}' defined in multiple config files", field_path),
                    field_path,
                    conflicts: vec![prev_loc.clone(), location],
                })));
            }
            None => {
                *slot = Some(value);
                self.seen.insert(field_path, location);
            }
        }
    }
}

impl PartialConfig {
    /// Load a single config file without processing imports
    pub fn from_file(path: &Path) -> Result<Self, LoadError> {
        let content = std::fs::read_to_string(path).map_err(|e| LoadError::Io {
            path: path.to_path_buf(),
            error: e,
        })?;

        let mut config: PartialConfig = toml::from_str(&content).map_err(|e| LoadError::Parse {
            path: path.to_path_buf(),
            error: e,
        })?;

        config.source = Some(SourceInfo {
            file_path: path.to_path_buf(),
            content,
        });

        Ok(config)
    }

    /// Load config files with import resolution
    ///
    /// Returns every loaded file in order, imports before the file that
    /// imports them.
    pub fn load_with_imports(paths: &[PathBuf]) -> Result<Vec<Self>, LoadError> {
        let mut visited = HashSet::new();
        let mut all_configs = Vec::new();

        for path in paths {
            Self::load_recursive(path, &mut visited, &mut all_configs)?;
        }

        Ok(all_configs)
    }

    fn load_recursive(
        path: &Path,
        visited: &mut HashSet<PathBuf>,
        configs: &mut Vec<Self>,
    ) -> Result<(), LoadError> {
        let canonical_path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

        if visited.contains(&canonical_path) {
            return Err(LoadError::ImportCycle {
                path: canonical_path.clone(),
                cycle: visited.iter().cloned().collect(),
            });
        }

        visited.insert(canonical_path.clone());

        let config = Self::from_file(path)?;

        // Imports are relative to the importing file
        for import in &config.imports {
            let import_path = PathBuf::from(import);
            let resolved_path = if import_path.is_absolute() {
                import_path
            } else {
                path.parent()
                    .unwrap_or_else(|| Path::new("."))
                    .join(import_path)
            };

            Self::load_recursive(&resolved_path, visited, configs)?;
        }

        configs.push(config);

        // Sibling branches may import the same file
        visited.remove(&canonical_path);

        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.logging.is_none()
            && self.remote.is_none()
            && self.credentials.is_none()
            && self.api.is_none()
            && self.imports.is_empty()
    }

    /// Merge multiple partial configs together
    ///
    /// Uses first-wins semantics. Every conflict is collected so that all of
    /// them can be reported at once.
    pub fn merge<I>(configs: I) -> (Self, Vec<Diagnostic>)
    where
        I: IntoIterator<Item = Self>,
    {
        let mut result = PartialConfig::default();
        let mut tracker = FieldTracker::default();
        let mut imports = Vec::new();

        for config in configs {
            imports.extend(config.imports.iter().cloned());

            let source = config.source.clone().unwrap_or_else(|| SourceInfo {
                file_path: PathBuf::from("<unknown>"),
                content: String::new(),
            });

            if config.is_empty() {
                tracker
                    .diagnostics
                    .push(Diagnostic::Warning(Warning::EmptyConfig {
                        file_path: source.file_path.clone(),
                    }));
            }

            if let Some(logging) = config.logging {
                let merged = result.logging.get_or_insert_with(Default::default);
                tracker.merge(
                    "logging.level".to_string(),
                    &source,
                    &mut merged.level,
                    logging.level,
                );

                let overrides = merged.overrides.get_or_insert_with(HashMap::new);
                for (target, level) in logging.overrides.unwrap_or_default() {
                    let mut slot = overrides.remove(&target);
                    tracker.merge(
                        format!("logging.overrides.{}", target),
                        &source,
                        &mut slot,
                        Some(level),
                    );
                    if let Some(level) = slot {
                        overrides.insert(target, level);
                    }
                }
            }

            if let Some(remote) = config.remote {
                let merged = result.remote.get_or_insert_with(Default::default);
                tracker.merge(
                    "remote.base_url".to_string(),
                    &source,
                    &mut merged.base_url,
                    remote.base_url,
                );
                tracker.merge(
                    "remote.house_id".to_string(),
                    &source,
                    &mut merged.house_id,
                    remote.house_id,
                );
                tracker.merge(
                    "remote.request_timeout_secs".to_string(),
                    &source,
                    &mut merged.request_timeout_secs,
                    remote.request_timeout_secs,
                );
                tracker.merge(
                    "remote.command_timeout_secs".to_string(),
                    &source,
                    &mut merged.command_timeout_secs,
                    remote.command_timeout_secs,
                );
            }

            if let Some(credentials) = config.credentials {
                let merged = result.credentials.get_or_insert_with(Default::default);
                tracker.merge(
                    "credentials.token".to_string(),
                    &source,
                    &mut merged.token,
                    credentials.token,
                );
                tracker.merge(
                    "credentials.login".to_string(),
                    &source,
                    &mut merged.login,
                    credentials.login,
                );
                tracker.merge(
                    "credentials.password".to_string(),
                    &source,
                    &mut merged.password,
                    credentials.password,
                );
            }

            if let Some(api) = config.api {
                let merged = result.api.get_or_insert_with(Default::default);
                tracker.merge(
                    "api.listen".to_string(),
                    &source,
                    &mut merged.listen,
                    api.listen,
                );
                tracker.merge("api.port".to_string(), &source, &mut merged.port, api.port);
            }
        }

        result.imports = imports;
        result.locations = tracker.seen;

        (result, tracker.diagnostics)
    }
}
