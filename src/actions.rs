//! The static action registry for the report pipeline.
//!
//! Declaration order doubles as the topological tie-break, so the list
//! below reads in the order a full run executes.
use crate::config::{ConfigKey, ConfigSnapshot};
use crate::pipeline::{Action, Registry};
use crate::{course, render, report, similarity};
use anyhow::Result;

pub const DOWNLOAD_SUBMISSIONS: &str = "download-submissions";
pub const DOWNLOAD_STARTERS: &str = "download-starters";
pub const RENDER_DOCUMENTS: &str = "render-documents";
pub const RUN_SIMILARITY: &str = "run-similarity";
pub const DOWNLOAD_REPORT: &str = "download-report";
pub const COMPILE_REPORT: &str = "compile-report";
pub const SELECT_CASES: &str = "select-cases";

pub fn registry() -> Result<Registry> {
    Registry::new(vec![
        Action {
            name: DOWNLOAD_SUBMISSIONS,
            deps: &[],
            required_keys: &[
                ConfigKey::ApiKey,
                ConfigKey::ServiceUrl,
                ConfigKey::Course,
                ConfigKey::Assignment,
            ],
            run: course::download_submissions,
        },
        Action {
            name: DOWNLOAD_STARTERS,
            deps: &[],
            required_keys: &[
                ConfigKey::ApiKey,
                ConfigKey::ServiceUrl,
                ConfigKey::Course,
                ConfigKey::Assignment,
            ],
            run: course::download_starters,
        },
        Action {
            name: RENDER_DOCUMENTS,
            deps: &[DOWNLOAD_SUBMISSIONS, DOWNLOAD_STARTERS],
            required_keys: &[ConfigKey::Language],
            run: render::render_documents,
        },
        Action {
            name: RUN_SIMILARITY,
            deps: &[DOWNLOAD_SUBMISSIONS, DOWNLOAD_STARTERS],
            required_keys: &[ConfigKey::SimilarityUserId, ConfigKey::Language],
            run: similarity::run_similarity,
        },
        Action {
            name: DOWNLOAD_REPORT,
            deps: &[RUN_SIMILARITY],
            required_keys: &[],
            run: similarity::download_report,
        },
        Action {
            name: COMPILE_REPORT,
            deps: &[DOWNLOAD_SUBMISSIONS, RENDER_DOCUMENTS, DOWNLOAD_REPORT],
            required_keys: &[ConfigKey::Assignment],
            run: report::compile_report,
        },
        Action {
            name: SELECT_CASES,
            deps: &[COMPILE_REPORT],
            required_keys: &[],
            run: report::select_cases,
        },
    ])
}

/// The requested subset: the configured action list or the whole pipeline
/// minus selection, with `select-cases` appended automatically when a
/// selection is configured.
pub fn requested_actions(registry: &Registry, config: &ConfigSnapshot) -> Vec<String> {
    let mut requested: Vec<String> = match &config.actions {
        Some(actions) => actions.clone(),
        None => registry
            .action_names()
            .into_iter()
            .filter(|name| *name != SELECT_CASES)
            .map(str::to_string)
            .collect(),
    };
    if config.selection.is_some() && !requested.iter().any(|name| name == SELECT_CASES) {
        requested.push(SELECT_CASES.to_string());
    }
    requested
}
