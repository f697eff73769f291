//! Final report assembly.
//!
//! Consumes the clustered cases plus the rendered per-group documents and
//! lays out the browsable report tree: one directory per assignment, one
//! per case, one per member group, plus the overview table. The selection
//! flow builds the close-review bundles under `selected/`.
use crate::cluster::build_cases;
use crate::model::{Case, Group, Ledger, Match, MatchSide, Roster};
use crate::pipeline::ActionContext;
use crate::render::{
    self, combine_html, comparison_section, group_cover_html, HighlightedFile, Renderer,
};
use crate::util::{copy_file, copy_tree, glob_files};
use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Overview table header.
const OVERVIEW_COLUMNS: [&str; 4] = ["case", "groups", "similarity (%)", "matched_lines"];

/// Roster CSV header, one row per member.
const ROSTER_COLUMNS: [&str; 6] = [
    "group_name",
    "user_name",
    "first_name",
    "last_name",
    "email",
    "id_number",
];

/// Build the final report tree for the configured assignment.
pub fn compile_report(ctx: &ActionContext) -> Result<()> {
    let assignment = ctx.config.assignment()?;
    let ledger = Ledger::load(&ctx.paths.ledger_path())?;
    let roster = Roster::load(&ctx.paths.roster_path())?;
    let cases = build_cases(&ledger, None, &ctx.config.exclusions)?;
    let renderer = Renderer::resolve(ctx.config.renderer_command.as_deref())?;
    let language = ctx.config.language().unwrap_or("text").to_string();

    let assignment_dir = ctx.paths.assignment_dir(assignment);
    fs::create_dir_all(&assignment_dir)
        .with_context(|| format!("create {}", assignment_dir.display()))?;

    if ctx.paths.starters_dir().is_dir() {
        copy_tree(
            &ctx.paths.starters_dir(),
            &assignment_dir.join("starter_files"),
        )?;
    }

    let mut overview = csv::Writer::from_path(ctx.paths.overview_path(assignment))
        .context("open case overview")?;
    overview
        .write_record(OVERVIEW_COLUMNS)
        .context("write overview header")?;

    for case in &cases {
        tracing::info!(
            case = case.number,
            groups = %case.joined_groups(),
            similarity = case.similarity_percent,
            "assembling case"
        );
        let case_dir = ctx.paths.case_dir(assignment, &case.dir_name());
        fs::create_dir_all(&case_dir).with_context(|| format!("create {}", case_dir.display()))?;

        copy_case_pages(ctx, &ledger, case, &case_dir)?;
        for group in &case.groups {
            write_group_bundle(ctx, &roster, group, &case_dir)?;
        }

        let html = case_comparison_html(ctx, &ledger, &roster, case, &language)?;
        let comparison = case_dir.join("comparison.pdf");
        if !comparison.is_file() || ctx.config.force {
            renderer.render_html(&html, &comparison, true)?;
        }

        overview
            .write_record([
                case.dir_name(),
                case.joined_groups(),
                case.similarity_percent.to_string(),
                case.matched_lines.to_string(),
            ])
            .context("write overview row")?;
    }
    overview.flush().context("flush case overview")?;
    Ok(())
}

/// Build close-review bundles for the configured selection.
pub fn select_cases(ctx: &ActionContext) -> Result<()> {
    let selection = ctx
        .config
        .selection
        .as_ref()
        .ok_or_else(|| anyhow!("a case or group selection is required to select cases"))?;
    let ledger = Ledger::load(&ctx.paths.ledger_path())?;
    let roster = Roster::load(&ctx.paths.roster_path())?;
    let cases = build_cases(&ledger, Some(selection), &ctx.config.exclusions)?;
    let renderer = Renderer::resolve(ctx.config.renderer_command.as_deref())?;
    let language = ctx.config.language().unwrap_or("text").to_string();

    for case in &cases {
        let groups: Vec<&str> = case.groups.iter().map(String::as_str).collect();
        let bundle_dir = ctx.paths.selected_dir().join(groups.join("_"));
        tracing::info!(case = case.number, dir = %bundle_dir.display(), "selecting case");
        fs::create_dir_all(&bundle_dir)
            .with_context(|| format!("create {}", bundle_dir.display()))?;

        copy_case_pages(ctx, &ledger, case, &bundle_dir)?;

        // Per-file highlights accumulated across every retained match.
        let mut highlights: BTreeMap<(String, String), HighlightedFile> = BTreeMap::new();
        for index in &case.retained_matches {
            let m = &ledger.matches[*index];
            for side in [&m.a, &m.b] {
                let key = (side.group.clone(), side.file.clone());
                let entry = highlights.entry(key).or_insert_with(|| {
                    HighlightedFile::new(
                        &side.file,
                        ctx.paths
                            .group_submission_dir(&side.group)
                            .join(&side.file),
                        &language,
                    )
                });
                for span in &side.spans {
                    entry.add_highlight(*span);
                }
            }
        }
        let total_spans: usize = highlights.values().map(|h| h.spans().len()).sum();
        tracing::debug!(
            files = highlights.len(),
            spans = total_spans,
            "accumulated highlights"
        );

        for group in &case.groups {
            write_group_bundle(ctx, &roster, group, &bundle_dir)?;
            let Some(record) = roster.get(group) else {
                continue;
            };
            let combined = combined_group_html(record, &highlights, &language, ctx)?;
            let dest = bundle_dir.join(format!("{group}.pdf"));
            if !dest.is_file() || ctx.config.force {
                renderer.render_html(&combined, &dest, false)?;
            }
        }

        let html = case_comparison_html(ctx, &ledger, &roster, case, &language)?;
        let dest = bundle_dir.join(format!("{}.pdf", case.dir_name()));
        if !dest.is_file() || ctx.config.force {
            renderer.render_html(&html, &dest, true)?;
        }
    }
    Ok(())
}

/// Copy the localized service pages for every retained match of a case.
fn copy_case_pages(
    ctx: &ActionContext,
    ledger: &Ledger,
    case: &Case,
    dest_dir: &Path,
) -> Result<()> {
    let pages_dir = ctx.paths.report_pages_dir();
    for index in &case.retained_matches {
        let Some(page) = &ledger.matches[*index].page else {
            continue;
        };
        let stem = page.trim_end_matches(".html");
        for suffix in ["", "-top", "-0", "-1"] {
            let name = format!("{stem}{suffix}.html");
            let source = pages_dir.join(&name);
            if source.is_file() {
                copy_file(&source, &dest_dir.join("pages").join(&name))?;
            }
        }
    }
    Ok(())
}

/// One member group's slice of a case directory: original files, rendered
/// documents, and the roster CSV.
fn write_group_bundle(
    ctx: &ActionContext,
    roster: &Roster,
    group: &str,
    case_dir: &Path,
) -> Result<()> {
    let group_dir = case_dir.join(group);
    let source = ctx.paths.group_submission_dir(group);
    for rel in glob_files(&source, &ctx.config.file_glob)? {
        copy_file(&source.join(&rel), &group_dir.join("org").join(&rel))?;
        let rendered = ctx
            .paths
            .rendered_submissions_dir()
            .join(group)
            .join(render::rendered_name(&rel));
        if rendered.is_file() {
            copy_file(
                &rendered,
                &group_dir
                    .join("rendered")
                    .join(render::rendered_name(&rel)),
            )?;
        }
    }
    if let Some(record) = roster.get(group) {
        write_roster_csv(record, &group_dir.join("group_data.csv"))?;
    }
    Ok(())
}

fn write_roster_csv(group: &Group, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let mut writer = csv::Writer::from_path(dest)
        .with_context(|| format!("open {}", dest.display()))?;
    writer
        .write_record(ROSTER_COLUMNS)
        .context("write roster header")?;
    for member in &group.members {
        writer
            .write_record([
                group.name.as_str(),
                member.user_name.as_str(),
                member.first_name.as_str(),
                member.last_name.as_str(),
                member.email.as_str(),
                member.id_number.as_str(),
            ])
            .context("write roster row")?;
    }
    writer.flush().context("flush roster CSV")?;
    Ok(())
}

/// The per-case comparison document: one side-by-side section per
/// retained match, sourced from the local submission files at the
/// service-reported spans.
fn case_comparison_html(
    ctx: &ActionContext,
    ledger: &Ledger,
    roster: &Roster,
    case: &Case,
    language: &str,
) -> Result<String> {
    let mut sections = Vec::new();
    let title = case_title(ledger, roster, case);
    sections.push(format!("<h1>{}</h1>", render::escape_html(&title)));

    for (position, index) in case.retained_matches.iter().enumerate() {
        let m: &Match = &ledger.matches[*index];
        let (code_a, start_a) = side_code(ctx, &m.a)?;
        let (code_b, start_b) = side_code(ctx, &m.b)?;
        sections.push(comparison_section(
            position + 1,
            &side_header(roster, &m.a),
            &side_header(roster, &m.b),
            &code_a,
            &code_b,
            start_a,
            start_b,
            language,
        ));
    }
    Ok(combine_html(&sections))
}

/// `<header A> VS <header B>` from the first retained match, falling back
/// to the case directory name.
fn case_title(ledger: &Ledger, roster: &Roster, case: &Case) -> String {
    match case.retained_matches.first() {
        Some(index) => {
            let m = &ledger.matches[*index];
            format!(
                "{} VS {}",
                side_header(roster, &m.a),
                side_header(roster, &m.b)
            )
        }
        None => case.dir_name(),
    }
}

/// `group header's file` for comparison columns.
fn side_header(roster: &Roster, side: &MatchSide) -> String {
    let owner = roster
        .get(&side.group)
        .map(Group::header)
        .unwrap_or_else(|| side.group.clone());
    format!("{owner}'s {}", side.file)
}

/// The matched excerpt for one side: the merged span extent of the local
/// file, or the whole file when the service reported no spans.
fn side_code(ctx: &ActionContext, side: &MatchSide) -> Result<(String, usize)> {
    let path = ctx.paths.group_submission_dir(&side.group).join(&side.file);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(err) => {
            tracing::warn!(file = %path.display(), error = %err, "matched file missing");
            return Ok((format!("[missing: {}]", side.file), 1));
        }
    };
    let lines: Vec<&str> = content.lines().collect();
    let (start, end) = match (side.spans.first(), side.spans.last()) {
        (Some(first), Some(last)) => (first.start, last.end),
        _ => (1, lines.len()),
    };
    let start = start.clamp(1, lines.len().max(1));
    let end = end.clamp(start, lines.len().max(start));
    let excerpt = lines
        .get(start - 1..end)
        .unwrap_or_default()
        .join("\n");
    Ok((excerpt, start))
}

/// One combined document per group: cover sheet followed by every file
/// involved in the case with its matched regions highlighted.
fn combined_group_html(
    group: &Group,
    highlights: &BTreeMap<(String, String), HighlightedFile>,
    language: &str,
    ctx: &ActionContext,
) -> Result<String> {
    let mut sections = vec![group_cover_html(group)];

    let mut covered: Vec<&String> = Vec::new();
    for ((owner, file), highlight) in highlights {
        if owner == &group.name {
            sections.push(highlight.to_html()?);
            covered.push(file);
        }
    }

    // Files untouched by any match still belong in the bundle.
    for file in &group.files {
        if covered.iter().any(|name| *name == file) {
            continue;
        }
        let path = ctx.paths.group_submission_dir(&group.name).join(file);
        if !path.is_file() {
            continue;
        }
        let plain = HighlightedFile::new(file, path, language);
        sections.push(plain.to_html()?);
    }

    Ok(combine_html(&sections))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Member;

    fn group_with_members() -> Group {
        Group {
            name: "team1".to_string(),
            members: vec![Member {
                user_name: "alovelace".to_string(),
                first_name: "Ada".to_string(),
                last_name: "Lovelace".to_string(),
                email: "ada@example.edu".to_string(),
                id_number: "1001".to_string(),
            }],
            files: Default::default(),
        }
    }

    #[test]
    fn roster_csv_has_header_and_one_row_per_member() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("group_data.csv");
        write_roster_csv(&group_with_members(), &dest).unwrap();

        let text = fs::read_to_string(&dest).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("group_name,user_name,first_name,last_name,email,id_number")
        );
        assert_eq!(
            lines.next(),
            Some("team1,alovelace,Ada,Lovelace,ada@example.edu,1001")
        );
        assert_eq!(lines.next(), None);
    }
}
