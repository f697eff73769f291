//! Typed paths into the working directory layout.
//!
//! Centralizing path construction keeps file access consistent across
//! actions and prevents drift when the layout evolves.
use std::path::{Path, PathBuf};

/// Convenience wrapper for locating workdir artifacts.
#[derive(Debug, Clone)]
pub struct WorkdirPaths {
    root: PathBuf,
}

impl WorkdirPaths {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Downloaded submission files, one directory per group.
    pub fn submissions_dir(&self) -> PathBuf {
        self.root.join("submission_files")
    }

    pub fn group_submission_dir(&self, group: &str) -> PathBuf {
        self.submissions_dir().join(group)
    }

    /// Rendered (print-ready) counterparts of the submission files.
    pub fn rendered_submissions_dir(&self) -> PathBuf {
        self.root.join("rendered_files")
    }

    /// Original starter files, one directory per starter-file group id.
    pub fn starters_org_dir(&self) -> PathBuf {
        self.root.join("starter_files").join("org")
    }

    /// Rendered counterparts of the starter files.
    pub fn starters_rendered_dir(&self) -> PathBuf {
        self.root.join("starter_files").join("rendered")
    }

    pub fn starters_dir(&self) -> PathBuf {
        self.root.join("starter_files")
    }

    /// Similarity-service artifacts.
    pub fn report_dir(&self) -> PathBuf {
        self.root.join("report")
    }

    /// Persisted report URL so a rerun can skip resubmission.
    pub fn report_url_file(&self) -> PathBuf {
        self.report_dir().join("report_url.txt")
    }

    /// Localized copies of the service's report pages.
    pub fn report_pages_dir(&self) -> PathBuf {
        self.report_dir().join("pages")
    }

    /// Parsed match ledger.
    pub fn ledger_path(&self) -> PathBuf {
        self.report_dir().join("ledger.json")
    }

    /// Roster snapshot written during submission download.
    pub fn roster_path(&self) -> PathBuf {
        self.root.join("roster.json")
    }

    /// Final browsable report tree.
    pub fn final_report_dir(&self) -> PathBuf {
        self.root.join("final_report")
    }

    pub fn assignment_dir(&self, assignment: &str) -> PathBuf {
        self.final_report_dir().join(assignment)
    }

    pub fn case_dir(&self, assignment: &str, case_dir_name: &str) -> PathBuf {
        self.assignment_dir(assignment).join(case_dir_name)
    }

    pub fn overview_path(&self, assignment: &str) -> PathBuf {
        self.assignment_dir(assignment).join("case_overview.csv")
    }

    /// Per-selection output for cases picked for close review.
    pub fn selected_dir(&self) -> PathBuf {
        self.root.join("selected")
    }

    /// Durable completion markers, one file per action.
    pub fn markers_dir(&self) -> PathBuf {
        self.root.join(".casebook").join("markers")
    }
}
