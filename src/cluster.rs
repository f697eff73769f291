//! Case clustering over the match ledger.
//!
//! Groups are nodes, matches are undirected edges; connected components
//! computed in ledger order become cases, so numbering is reproducible
//! across runs on an unchanged ledger. Group-set selections bypass the
//! natural components and collect every ledger match inside the set,
//! which makes below-threshold pairs inspectable.
use crate::error::Error;
use crate::model::{Case, Exclusions, Ledger, Match, Selection};
use std::collections::{BTreeMap, BTreeSet};

/// Derive the ordered case sequence from the ledger.
///
/// Exclusion keys always refer to natural-clustering numbers, even when a
/// group-set selection constructs synthetic cases; a synthetic case whose
/// groups all live inside one natural component inherits that component's
/// number for exclusion lookups. A case emptied by exclusion is dropped.
pub fn build_cases(
    ledger: &Ledger,
    selection: Option<&Selection>,
    exclusions: &Exclusions,
) -> Result<Vec<Case>, Error> {
    let natural = natural_cases(ledger);

    let cases = match selection {
        None => natural,
        Some(Selection::Case(number)) => {
            let number = *number;
            natural
                .into_iter()
                .filter(|case| case.number == number)
                .collect()
        }
        Some(Selection::GroupSets(sets)) => synthetic_cases(ledger, sets, &natural)?,
    };

    Ok(apply_exclusions(ledger, cases, exclusions))
}

/// Connected components in ledger order. Every match lands in exactly one
/// case, and every mentioned group in exactly one component.
fn natural_cases(ledger: &Ledger) -> Vec<Case> {
    let mut ids: BTreeMap<&str, usize> = BTreeMap::new();
    for m in &ledger.matches {
        for name in [m.a.group.as_str(), m.b.group.as_str()] {
            let next = ids.len();
            ids.entry(name).or_insert(next);
        }
    }

    let mut dsu = UnionFind::new(ids.len());
    for m in &ledger.matches {
        dsu.union(ids[m.a.group.as_str()], ids[m.b.group.as_str()]);
    }

    // Components numbered by the order their first constituent match
    // appears in the ledger, not by group name.
    let mut case_of_root: BTreeMap<usize, usize> = BTreeMap::new();
    let mut cases: Vec<Case> = Vec::new();
    for m in &ledger.matches {
        let root = dsu.find(ids[m.a.group.as_str()]);
        let slot = *case_of_root.entry(root).or_insert_with(|| {
            cases.push(Case {
                number: cases.len() as u32 + 1,
                natural_number: Some(cases.len() as u32 + 1),
                groups: BTreeSet::new(),
                retained_matches: Vec::new(),
                similarity_percent: 0,
                matched_lines: 0,
            });
            cases.len() - 1
        });
        let case = &mut cases[slot];
        case.groups.insert(m.a.group.clone());
        case.groups.insert(m.b.group.clone());
        case.retained_matches.push(m.index);
    }

    for case in &mut cases {
        rollup(case, ledger);
    }
    cases
}

/// One synthetic case per selected group set, retaining every ledger match
/// with both endpoints inside the set.
fn synthetic_cases(
    ledger: &Ledger,
    sets: &[BTreeSet<String>],
    natural: &[Case],
) -> Result<Vec<Case>, Error> {
    let known: BTreeSet<String> = ledger.group_names().into_iter().collect();
    for set in sets {
        for name in set {
            if !known.contains(name) {
                return Err(Error::UnknownGroup { name: name.clone() });
            }
        }
    }

    let mut cases = Vec::new();
    for (position, set) in sets.iter().enumerate() {
        let retained: Vec<usize> = ledger
            .matches
            .iter()
            .filter(|m| set.contains(&m.a.group) && set.contains(&m.b.group))
            .map(|m| m.index)
            .collect();
        let natural_number = natural
            .iter()
            .find(|case| set.iter().all(|name| case.groups.contains(name)))
            .map(|case| case.number);
        let mut case = Case {
            number: position as u32 + 1,
            natural_number,
            groups: set.clone(),
            retained_matches: retained,
            similarity_percent: 0,
            matched_lines: 0,
        };
        rollup(&mut case, ledger);
        cases.push(case);
    }
    Ok(cases)
}

/// Drop excluded indices, then drop any case left without matches. A group
/// stays listed even when every match mentioning it was excluded.
fn apply_exclusions(ledger: &Ledger, cases: Vec<Case>, exclusions: &Exclusions) -> Vec<Case> {
    let mut kept = Vec::new();
    for mut case in cases {
        if let Some(number) = case.natural_number {
            if let Some(dropped) = exclusions.get(&number) {
                case.retained_matches.retain(|index| !dropped.contains(index));
            }
        }
        if case.retained_matches.is_empty() {
            tracing::debug!(case = case.number, "dropping case with no retained matches");
            continue;
        }
        rollup(&mut case, ledger);
        kept.push(case);
    }
    kept
}

/// Case-level rollups are the maximum across retained matches, ties broken
/// by lowest match index (retained order is ledger order).
fn rollup(case: &mut Case, ledger: &Ledger) {
    case.similarity_percent = 0;
    case.matched_lines = 0;
    for index in &case.retained_matches {
        let m: &Match = &ledger.matches[*index];
        if m.similarity_percent() > case.similarity_percent {
            case.similarity_percent = m.similarity_percent();
        }
        if m.matched_lines > case.matched_lines {
            case.matched_lines = m.matched_lines;
        }
    }
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, node: usize) -> usize {
        let mut root = node;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cursor = node;
        while self.parent[cursor] != root {
            let next = self.parent[cursor];
            self.parent[cursor] = root;
            cursor = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent[rb] = ra;
        }
    }
}
