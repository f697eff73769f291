//! Layered configuration resolution.
//!
//! A TOML file provides the base layer and command-line flags override it
//! by key, producing one immutable snapshot consumed by every action.
use crate::cli::OverrideArgs;
use crate::model::{Exclusions, Selection};
use crate::paths::WorkdirPaths;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Default config file looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = "casebook.toml";

const DEFAULT_FILE_GLOB: &str = "**/*";

/// Raw file layer. Every key is optional; resolution fills defaults and
/// applies overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity_user_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workdir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_glob: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renderer_command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_case: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_groups: Option<Vec<Vec<String>>>,
    /// Case number (or `case_<n>`) mapped to match indices to drop.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_matches: Option<BTreeMap<String, Vec<usize>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force: Option<bool>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text =
            fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parse config {}", path.display()))
    }

    /// Load the file layer if the config file exists, else an empty layer.
    pub fn load_optional(path: &Path) -> Result<Self> {
        if path.is_file() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

/// Names of resolvable configuration keys, used by actions to declare what
/// they need before executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    ApiKey,
    ServiceUrl,
    Course,
    Assignment,
    SimilarityUserId,
    Language,
}

impl ConfigKey {
    pub fn name(&self) -> &'static str {
        match self {
            ConfigKey::ApiKey => "api_key",
            ConfigKey::ServiceUrl => "service_url",
            ConfigKey::Course => "course",
            ConfigKey::Assignment => "assignment",
            ConfigKey::SimilarityUserId => "similarity_user_id",
            ConfigKey::Language => "language",
        }
    }
}

/// The immutable resolved snapshot.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub api_key: Option<String>,
    pub service_url: Option<String>,
    pub course: Option<String>,
    pub assignment: Option<String>,
    pub similarity_user_id: Option<u64>,
    pub report_url: Option<String>,
    pub workdir: PathBuf,
    pub language: Option<String>,
    pub file_glob: String,
    pub groups: Option<Vec<String>>,
    pub actions: Option<Vec<String>>,
    pub renderer_command: Option<String>,
    pub selection: Option<Selection>,
    pub exclusions: Exclusions,
    pub force: bool,
}

impl ConfigSnapshot {
    /// Merge the file layer with command-line overrides. Override values
    /// win whenever they are present.
    pub fn resolve(file: FileConfig, overrides: &OverrideArgs) -> Result<Self> {
        let selection = resolve_selection(&file, overrides)?;
        let exclusions = resolve_exclusions(file.exclude_matches.as_ref())?;
        Ok(Self {
            api_key: overrides.api_key.clone().or(file.api_key),
            service_url: overrides.service_url.clone().or(file.service_url),
            course: overrides.course.clone().or(file.course),
            assignment: overrides.assignment.clone().or(file.assignment),
            similarity_user_id: overrides.similarity_user_id.or(file.similarity_user_id),
            report_url: overrides.report_url.clone().or(file.report_url),
            workdir: overrides
                .workdir
                .clone()
                .or(file.workdir)
                .unwrap_or_else(|| PathBuf::from(".")),
            language: overrides.language.clone().or(file.language),
            file_glob: overrides
                .file_glob
                .clone()
                .or(file.file_glob)
                .unwrap_or_else(|| DEFAULT_FILE_GLOB.to_string()),
            groups: non_empty(overrides.groups.clone()).or(file.groups),
            actions: non_empty(overrides.actions.clone()).or(file.actions),
            renderer_command: overrides.renderer_command.clone().or(file.renderer_command),
            selection,
            exclusions,
            force: overrides.force || file.force.unwrap_or(false),
        })
    }

    pub fn paths(&self) -> WorkdirPaths {
        WorkdirPaths::new(self.workdir.clone())
    }

    pub fn has(&self, key: ConfigKey) -> bool {
        match key {
            ConfigKey::ApiKey => self.api_key.is_some(),
            ConfigKey::ServiceUrl => self.service_url.is_some(),
            ConfigKey::Course => self.course.is_some(),
            ConfigKey::Assignment => self.assignment.is_some(),
            ConfigKey::SimilarityUserId => self.similarity_user_id.is_some(),
            ConfigKey::Language => self.language.is_some(),
        }
    }

    /// All keys from `required` that do not resolve, in declaration order.
    pub fn missing(&self, required: &[ConfigKey]) -> Vec<String> {
        required
            .iter()
            .filter(|key| !self.has(**key))
            .map(|key| key.name().to_string())
            .collect()
    }

    pub fn api_key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| required("api_key"))
    }

    pub fn service_url(&self) -> Result<&str> {
        self.service_url
            .as_deref()
            .ok_or_else(|| required("service_url"))
    }

    pub fn course(&self) -> Result<&str> {
        self.course.as_deref().ok_or_else(|| required("course"))
    }

    pub fn assignment(&self) -> Result<&str> {
        self.assignment
            .as_deref()
            .ok_or_else(|| required("assignment"))
    }

    pub fn similarity_user_id(&self) -> Result<u64> {
        self.similarity_user_id
            .ok_or_else(|| required("similarity_user_id"))
    }

    pub fn language(&self) -> Result<&str> {
        self.language.as_deref().ok_or_else(|| required("language"))
    }

    /// Does a group pass the optional group filter?
    pub fn group_selected(&self, name: &str) -> bool {
        match &self.groups {
            Some(filter) => filter.iter().any(|g| g == name),
            None => true,
        }
    }

    /// Serialize the snapshot back into the file layer shape, for
    /// `generate-config`.
    pub fn to_file_config(&self) -> FileConfig {
        FileConfig {
            api_key: self.api_key.clone(),
            service_url: self.service_url.clone(),
            course: self.course.clone(),
            assignment: self.assignment.clone(),
            similarity_user_id: self.similarity_user_id,
            report_url: self.report_url.clone(),
            workdir: Some(self.workdir.clone()),
            language: self.language.clone(),
            file_glob: Some(self.file_glob.clone()),
            groups: self.groups.clone(),
            actions: self.actions.clone(),
            renderer_command: self.renderer_command.clone(),
            selected_case: match &self.selection {
                Some(Selection::Case(number)) => Some(*number),
                _ => None,
            },
            selected_groups: match &self.selection {
                Some(Selection::GroupSets(sets)) => Some(
                    sets.iter()
                        .map(|set| set.iter().cloned().collect())
                        .collect(),
                ),
                _ => None,
            },
            exclude_matches: if self.exclusions.is_empty() {
                None
            } else {
                Some(
                    self.exclusions
                        .iter()
                        .map(|(case, indices)| {
                            (case.to_string(), indices.iter().copied().collect())
                        })
                        .collect(),
                )
            },
            force: self.force.then_some(true),
        }
    }
}

fn required(key: &str) -> anyhow::Error {
    anyhow!("{key} is required to perform this action")
}

fn non_empty(values: Vec<String>) -> Option<Vec<String>> {
    (!values.is_empty()).then_some(values)
}

/// The `--select` flag accepts either one case number (`3` or `case_3`) or
/// a list of group names forming one set. The file layer carries the two
/// shapes as separate keys.
fn resolve_selection(file: &FileConfig, overrides: &OverrideArgs) -> Result<Option<Selection>> {
    if !overrides.select.is_empty() {
        if overrides.select.len() == 1 {
            if let Some(number) = parse_case_number(&overrides.select[0]) {
                return Ok(Some(Selection::Case(number)));
            }
        }
        let set: BTreeSet<String> = overrides.select.iter().cloned().collect();
        return Ok(Some(Selection::GroupSets(vec![set])));
    }
    if let Some(number) = file.selected_case {
        return Ok(Some(Selection::Case(number)));
    }
    if let Some(sets) = &file.selected_groups {
        let sets: Vec<BTreeSet<String>> = sets
            .iter()
            .map(|names| names.iter().cloned().collect())
            .collect();
        if sets.iter().any(|set: &BTreeSet<String>| set.len() < 2) {
            return Err(anyhow!("selected_groups entries need at least two groups"));
        }
        return Ok(Some(Selection::GroupSets(sets)));
    }
    Ok(None)
}

fn parse_case_number(raw: &str) -> Option<u32> {
    raw.strip_prefix("case_").unwrap_or(raw).parse().ok()
}

/// Exclusion keys refer to natural-clustering case numbers; both `3` and
/// `case_3` spellings are accepted.
fn resolve_exclusions(raw: Option<&BTreeMap<String, Vec<usize>>>) -> Result<Exclusions> {
    let mut exclusions = Exclusions::new();
    let Some(raw) = raw else {
        return Ok(exclusions);
    };
    for (key, indices) in raw {
        let number = parse_case_number(key)
            .ok_or_else(|| anyhow!("invalid exclude_matches case key: {key}"))?;
        exclusions
            .entry(number)
            .or_default()
            .extend(indices.iter().copied());
    }
    Ok(exclusions)
}

/// Render the resolved configuration as TOML for `generate-config`.
pub fn render_config(snapshot: &ConfigSnapshot) -> Result<String> {
    toml::to_string_pretty(&snapshot.to_file_config()).context("serialize config TOML")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_overrides() -> OverrideArgs {
        OverrideArgs::default()
    }

    #[test]
    fn defaults_apply_when_both_layers_are_empty() {
        let snapshot = ConfigSnapshot::resolve(FileConfig::default(), &no_overrides()).unwrap();
        assert_eq!(snapshot.workdir, PathBuf::from("."));
        assert_eq!(snapshot.file_glob, "**/*");
        assert!(!snapshot.force);
        assert!(snapshot.selection.is_none());
    }

    #[test]
    fn override_layer_wins_over_file_layer() {
        let file: FileConfig = toml::from_str(
            r#"
            course = "csc108"
            assignment = "a1"
            language = "python"
            "#,
        )
        .unwrap();
        let overrides = OverrideArgs {
            assignment: Some("a2".to_string()),
            ..OverrideArgs::default()
        };
        let snapshot = ConfigSnapshot::resolve(file, &overrides).unwrap();
        assert_eq!(snapshot.assignment.as_deref(), Some("a2"));
        assert_eq!(snapshot.course.as_deref(), Some("csc108"));
        assert_eq!(snapshot.language.as_deref(), Some("python"));
    }

    #[test]
    fn missing_lists_every_absent_key_at_once() {
        let snapshot = ConfigSnapshot::resolve(FileConfig::default(), &no_overrides()).unwrap();
        let missing = snapshot.missing(&[
            ConfigKey::ApiKey,
            ConfigKey::ServiceUrl,
            ConfigKey::Course,
        ]);
        assert_eq!(missing, vec!["api_key", "service_url", "course"]);
    }

    #[test]
    fn select_flag_with_number_is_a_case_selection() {
        let overrides = OverrideArgs {
            select: vec!["case_4".to_string()],
            ..OverrideArgs::default()
        };
        let snapshot = ConfigSnapshot::resolve(FileConfig::default(), &overrides).unwrap();
        assert_eq!(snapshot.selection, Some(Selection::Case(4)));
    }

    #[test]
    fn select_flag_with_names_is_one_group_set() {
        let overrides = OverrideArgs {
            select: vec!["g1".to_string(), "g2".to_string()],
            ..OverrideArgs::default()
        };
        let snapshot = ConfigSnapshot::resolve(FileConfig::default(), &overrides).unwrap();
        let expected: BTreeSet<String> = ["g1", "g2"].iter().map(|s| s.to_string()).collect();
        assert_eq!(snapshot.selection, Some(Selection::GroupSets(vec![expected])));
    }

    #[test]
    fn exclusions_accept_both_key_spellings() {
        let file: FileConfig = toml::from_str(
            r#"
            [exclude_matches]
            "1" = [0, 2]
            "case_3" = [1]
            "#,
        )
        .unwrap();
        let snapshot = ConfigSnapshot::resolve(file, &no_overrides()).unwrap();
        assert_eq!(
            snapshot.exclusions.get(&1),
            Some(&BTreeSet::from([0usize, 2]))
        );
        assert_eq!(snapshot.exclusions.get(&3), Some(&BTreeSet::from([1usize])));
    }

    #[test]
    fn generated_config_round_trips_through_toml() {
        let overrides = OverrideArgs {
            course: Some("csc108".to_string()),
            similarity_user_id: Some(123456),
            select: vec!["g1".to_string(), "g2".to_string()],
            ..OverrideArgs::default()
        };
        let snapshot = ConfigSnapshot::resolve(FileConfig::default(), &overrides).unwrap();
        let text = render_config(&snapshot).unwrap();
        let reparsed: FileConfig = toml::from_str(&text).unwrap();
        assert_eq!(reparsed.course.as_deref(), Some("csc108"));
        assert_eq!(reparsed.similarity_user_id, Some(123456));
        assert_eq!(
            reparsed.selected_groups,
            Some(vec![vec!["g1".to_string(), "g2".to_string()]])
        );
    }

    #[test]
    fn unknown_config_key_is_rejected() {
        let parsed: Result<FileConfig, _> = toml::from_str("no_such_key = true");
        assert!(parsed.is_err());
    }
}
