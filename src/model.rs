//! Shared data model: groups, matches, cases, and the match ledger.
//!
//! Everything here is plain data. The ledger and roster are persisted as
//! pretty-printed JSON so a rerun can rebuild state purely from disk.
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

/// One roster row for a group member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Member {
    pub user_name: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub id_number: String,
}

impl Member {
    /// Display name in `First Last` form used by cover sheets and headers.
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// A submitting entity: unique name, roster rows, and its downloaded files
/// (paths relative to the group's submission directory).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    pub members: Vec<Member>,
    #[serde(default)]
    pub files: BTreeSet<String>,
}

impl Group {
    /// Header for rendered documents: `name (First Last, First Last)` for
    /// teams, or just the member name for singletons.
    pub fn header(&self) -> String {
        let members: Vec<String> = self.members.iter().map(Member::display_name).collect();
        if members.len() == 1 {
            members.into_iter().next().unwrap_or_else(|| self.name.clone())
        } else if members.is_empty() {
            self.name.clone()
        } else {
            format!("{} ({})", self.name, members.join(", "))
        }
    }
}

/// Roster snapshot written by the submission download action.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Roster {
    pub groups: Vec<Group>,
}

impl Roster {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("read roster {}", path.display()))?;
        serde_json::from_slice(&bytes).context("parse roster JSON")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        let text = serde_json::to_string_pretty(self).context("serialize roster")?;
        fs::write(path, text).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Group> {
        self.groups.iter().find(|group| group.name == name)
    }
}

/// A contiguous 1-based inclusive line range flagged by the similarity
/// service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LineSpan {
    pub start: usize,
    pub end: usize,
}

/// One side of a pairwise match. The service reports similarity per side,
/// so each side carries its own percentage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchSide {
    pub group: String,
    pub file: String,
    pub similarity_percent: u8,
    #[serde(default)]
    pub spans: Vec<LineSpan>,
}

/// One pairwise similarity result, immutable once ingested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
    pub index: usize,
    pub a: MatchSide,
    pub b: MatchSide,
    pub matched_lines: u64,
    /// Localized report page for this match (relative to the pages dir).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,
}

impl Match {
    /// The larger of the two per-side percentages.
    pub fn similarity_percent(&self) -> u8 {
        self.a.similarity_percent.max(self.b.similarity_percent)
    }
}

/// The ordered, index-stable collection of all matches for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ledger {
    pub matches: Vec<Match>,
}

impl Ledger {
    pub fn new(matches: Vec<Match>) -> Self {
        Self { matches }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("read ledger {}", path.display()))?;
        serde_json::from_slice(&bytes).context("parse ledger JSON")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        let text = serde_json::to_string_pretty(self).context("serialize ledger")?;
        fs::write(path, text).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    /// All group names mentioned by any match, in first-appearance order.
    pub fn group_names(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut names = Vec::new();
        for m in &self.matches {
            for name in [&m.a.group, &m.b.group] {
                if seen.insert(name.clone()) {
                    names.push(name.clone());
                }
            }
        }
        names
    }
}

/// Operator override narrowing or reshaping which groups form a case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Select one naturally-clustered case by number.
    Case(u32),
    /// Construct one synthetic case per group-name set.
    GroupSets(Vec<BTreeSet<String>>),
}

/// Per-case match exclusions, keyed by natural-clustering case number.
pub type Exclusions = BTreeMap<u32, BTreeSet<usize>>;

/// A maximal cluster of groups reviewed together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Case {
    /// Output numbering: ledger discovery order, or selection order when a
    /// group-set selection constructed this case.
    pub number: u32,
    /// Natural-clustering number, when one exists. Exclusions key on this.
    pub natural_number: Option<u32>,
    pub groups: BTreeSet<String>,
    /// Retained ledger indices, in ledger order, after exclusion filtering.
    pub retained_matches: Vec<usize>,
    pub similarity_percent: u8,
    pub matched_lines: u64,
}

impl Case {
    pub fn dir_name(&self) -> String {
        format!("case_{}", self.number)
    }

    /// Semicolon-joined group names for the overview table.
    pub fn joined_groups(&self) -> String {
        self.groups.iter().cloned().collect::<Vec<_>>().join(";")
    }
}

/// Group names are reused as directory names; spaces would leak into glob
/// patterns and service paths.
pub fn clean_file_name(name: &str) -> String {
    name.replace(' ', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(first: &str, last: &str) -> Member {
        Member {
            user_name: format!("{}{}", &first[..1], last).to_lowercase(),
            first_name: first.to_string(),
            last_name: last.to_string(),
            email: format!("{first}.{last}@example.edu").to_lowercase(),
            id_number: "000".to_string(),
        }
    }

    #[test]
    fn group_header_for_singleton_uses_member_name() {
        let group = Group {
            name: "solo".to_string(),
            members: vec![member("Ada", "Lovelace")],
            files: BTreeSet::new(),
        };
        assert_eq!(group.header(), "Ada Lovelace");
    }

    #[test]
    fn group_header_for_team_lists_members() {
        let group = Group {
            name: "team1".to_string(),
            members: vec![member("Ada", "Lovelace"), member("Alan", "Turing")],
            files: BTreeSet::new(),
        };
        assert_eq!(group.header(), "team1 (Ada Lovelace, Alan Turing)");
    }

    #[test]
    fn ledger_group_names_first_appearance_order() {
        let ledger = Ledger::new(vec![
            test_match(0, "g2", "g1", 50, 10),
            test_match(1, "g1", "g3", 40, 5),
        ]);
        assert_eq!(ledger.group_names(), vec!["g2", "g1", "g3"]);
    }

    #[test]
    fn clean_file_name_replaces_spaces() {
        assert_eq!(clean_file_name("group one"), "group_one");
    }

    fn test_match(index: usize, a: &str, b: &str, sim: u8, lines: u64) -> Match {
        Match {
            index,
            a: MatchSide {
                group: a.to_string(),
                file: "main.py".to_string(),
                similarity_percent: sim,
                spans: Vec::new(),
            },
            b: MatchSide {
                group: b.to_string(),
                file: "main.py".to_string(),
                similarity_percent: sim,
                spans: Vec::new(),
            },
            matched_lines: lines,
            page: None,
        }
    }
}
