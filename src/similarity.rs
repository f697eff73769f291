//! Similarity-detection service collaborator.
//!
//! Two narrow contracts: submit files over the service's upload socket and
//! get a report URL back, then localize the report pages over HTTP and
//! parse them into the match ledger. The service's own report format stays
//! contained here; the rest of the pipeline only sees `Ledger`.
use crate::error::Error;
use crate::model::{Ledger, LineSpan, Match, MatchSide};
use crate::pipeline::ActionContext;
use anyhow::{anyhow, Context, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::path::Path;
use ureq::Agent;

/// Upload endpoint of the similarity service.
const UPLOAD_ADDR: &str = "moss.stanford.edu:7690";

const MAX_MATCHES: u32 = 10;
const SHOW_RESULTS: u32 = 250;

pub struct SimilarityClient {
    user_id: u64,
    language: String,
}

impl SimilarityClient {
    pub fn new(user_id: u64, language: &str) -> Self {
        Self {
            user_id,
            language: language.to_string(),
        }
    }

    /// Upload base and submission files, returning the report URL.
    ///
    /// Base files describe shared starter code so boilerplate does not
    /// inflate similarity. Display names are workdir-relative.
    pub fn submit(
        &self,
        workdir: &Path,
        base_files: &[std::path::PathBuf],
        submission_files: &[std::path::PathBuf],
    ) -> Result<String> {
        let stream = TcpStream::connect(UPLOAD_ADDR)
            .map_err(|err| Error::remote(None, format!("connect {UPLOAD_ADDR}: {err}")))?;
        let mut reader = BufReader::new(
            stream
                .try_clone()
                .context("clone upload stream for reading")?,
        );
        let mut writer = stream;

        writeln!(writer, "moss {}", self.user_id).context("send user id")?;
        writeln!(writer, "directory 0").context("send directory mode")?;
        writeln!(writer, "X 0").context("send experimental flag")?;
        writeln!(writer, "maxmatches {MAX_MATCHES}").context("send maxmatches")?;
        writeln!(writer, "show {SHOW_RESULTS}").context("send show")?;
        writeln!(writer, "language {}", self.language).context("send language")?;

        let accepted = read_line(&mut reader)?;
        if accepted.trim() != "yes" {
            return Err(Error::remote(
                None,
                format!("service rejected language {}", self.language),
            )
            .into());
        }

        for (position, file) in base_files.iter().enumerate() {
            tracing::debug!(file = %file.display(), "uploading base file {}/{}", position + 1, base_files.len());
            self.upload_file(&mut writer, workdir, file, 0)?;
        }
        for (position, file) in submission_files.iter().enumerate() {
            tracing::debug!(file = %file.display(), "uploading submission file {}/{}", position + 1, submission_files.len());
            self.upload_file(&mut writer, workdir, file, position + 1)?;
        }

        writeln!(writer, "query 0 casebook").context("send query")?;
        let url = read_line(&mut reader)?;
        writeln!(writer, "end").context("send end")?;

        let url = url.trim().to_string();
        if !url.starts_with("http") {
            return Err(Error::remote(None, format!("unexpected reply: {url}")).into());
        }
        Ok(url)
    }

    fn upload_file(
        &self,
        writer: &mut TcpStream,
        workdir: &Path,
        file: &Path,
        index: usize,
    ) -> Result<()> {
        let bytes = fs::read(file).with_context(|| format!("read {}", file.display()))?;
        let display = file
            .strip_prefix(workdir)
            .unwrap_or(file)
            .to_string_lossy()
            .replace('\\', "/")
            .replace(' ', "_");
        writeln!(
            writer,
            "file {index} {} {} {display}",
            self.language,
            bytes.len()
        )
        .with_context(|| format!("announce {display}"))?;
        writer
            .write_all(&bytes)
            .with_context(|| format!("upload {display}"))?;
        Ok(())
    }
}

fn read_line(reader: &mut BufReader<TcpStream>) -> Result<String> {
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .map_err(|err| Error::remote(None, format!("read service reply: {err}")))?;
    Ok(line)
}

/// Submit starter files as base files plus every submission file, then
/// persist the report URL so reruns skip resubmission. A configured
/// `report_url` short-circuits submission entirely.
pub fn run_similarity(ctx: &ActionContext) -> Result<()> {
    let url_file = ctx.paths.report_url_file();
    if url_file.is_file() && !ctx.config.force {
        tracing::debug!("report URL present, skipping submission");
        return Ok(());
    }

    let url = match &ctx.config.report_url {
        Some(url) => url.clone(),
        None => {
            let workdir = ctx.paths.root().to_path_buf();
            let base_files =
                collect_upload_set(&ctx.paths.starters_org_dir(), &ctx.config.file_glob)?;
            let submission_files =
                collect_upload_set(&ctx.paths.submissions_dir(), &ctx.config.file_glob)?;
            if submission_files.is_empty() {
                return Err(anyhow!(
                    "no submission files match {} under {}",
                    ctx.config.file_glob,
                    ctx.paths.submissions_dir().display()
                ));
            }
            let client =
                SimilarityClient::new(ctx.config.similarity_user_id()?, ctx.config.language()?);
            tracing::info!(
                base = base_files.len(),
                submissions = submission_files.len(),
                "submitting files to similarity service"
            );
            client.submit(&workdir, &base_files, &submission_files)?
        }
    };

    tracing::info!(%url, "saving report URL");
    if let Some(parent) = url_file.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(&url_file, format!("{url}\n"))
        .with_context(|| format!("write {}", url_file.display()))?;
    Ok(())
}

fn collect_upload_set(base: &Path, pattern: &str) -> Result<Vec<std::path::PathBuf>> {
    // One directory level per group sits between the base and the glob.
    let nested = format!("*/{pattern}");
    Ok(crate::util::glob_files(base, &nested)?
        .into_iter()
        .map(|rel| base.join(rel))
        .collect())
}

/// Fetch the report pages, localize their links, and parse the ledger.
pub fn download_report(ctx: &ActionContext) -> Result<()> {
    let url = resolve_report_url(ctx)?;
    let pages_dir = ctx.paths.report_pages_dir();
    fs::create_dir_all(&pages_dir).with_context(|| format!("create {}", pages_dir.display()))?;

    let agent = Agent::new_with_defaults();
    tracing::info!(%url, "downloading similarity report");
    let index = fetch_page(&agent, &url)?;
    let localized = localize(&index, &url);
    fs::write(pages_dir.join("index.html"), &localized).context("write index.html")?;

    let page_re = Regex::new(r#"(match\d+)\.html"#).context("compile page regex")?;
    let mut pages: Vec<String> = page_re
        .captures_iter(&index)
        .map(|caps| caps[1].to_string())
        .collect();
    pages.sort();
    pages.dedup();

    for page in &pages {
        for suffix in ["", "-top", "-0", "-1"] {
            let name = format!("{page}{suffix}.html");
            let body = fetch_page(&agent, &format!("{}/{name}", url.trim_end_matches('/')))?;
            fs::write(pages_dir.join(&name), localize(&body, &url))
                .with_context(|| format!("write {name}"))?;
        }
    }

    let ledger = parse_ledger(&pages_dir)?;
    tracing::info!(matches = ledger.matches.len(), "parsed match ledger");
    ledger.save(&ctx.paths.ledger_path())?;
    Ok(())
}

fn resolve_report_url(ctx: &ActionContext) -> Result<String> {
    if let Some(url) = &ctx.config.report_url {
        return Ok(url.clone());
    }
    let url_file = ctx.paths.report_url_file();
    if url_file.is_file() {
        let url = fs::read_to_string(&url_file)
            .with_context(|| format!("read {}", url_file.display()))?;
        let url = url.trim().to_string();
        if !url.is_empty() {
            return Ok(url);
        }
    }
    Err(anyhow!("report_url is required to perform this action"))
}

fn fetch_page(agent: &Agent, url: &str) -> Result<String> {
    let mut response = agent.get(url).call().map_err(|err| match err {
        ureq::Error::StatusCode(code) => {
            anyhow::Error::from(Error::remote(Some(code), format!("fetch {url} rejected")))
        }
        other => anyhow::Error::from(Error::remote(None, format!("fetch {url} failed: {other}"))),
    })?;
    response
        .body_mut()
        .read_to_string()
        .with_context(|| format!("read {url}"))
}

/// Rewrite absolute report links to relative ones so the saved pages
/// browse offline.
fn localize(body: &str, base_url: &str) -> String {
    body.replace(base_url, ".")
}

/// Parse the localized index and per-match annotation pages into the
/// ledger. Index rows carry two sides (`submission_files/<group>/<file>
/// (<percent>%)`) and a matched-line count; the `-top` page carries the
/// per-side line spans.
pub fn parse_ledger(pages_dir: &Path) -> Result<Ledger> {
    let index_path = pages_dir.join("index.html");
    let index = fs::read_to_string(&index_path)
        .with_context(|| format!("read {}", index_path.display()))?;

    let side_re = Regex::new(
        r#"<A HREF="[^"]*?(match\d+)\.html"[^>]*>\s*submission_files/([^/]+)/([^<(]+?)\s*\((\d+)%\)"#,
    )
    .context("compile side regex")?;
    let lines_re = Regex::new(r"ALIGN=right>\s*(\d+)").context("compile lines regex")?;

    let mut matches = Vec::new();
    for row in index.split("<TR>").skip(1) {
        let sides: Vec<(String, String, String, u8)> = side_re
            .captures_iter(row)
            .map(|caps| {
                (
                    caps[1].to_string(),
                    caps[2].to_string(),
                    caps[3].trim().to_string(),
                    caps[4].parse().unwrap_or(0),
                )
            })
            .collect();
        if sides.len() != 2 {
            continue;
        }
        let matched_lines = lines_re
            .captures(row)
            .and_then(|caps| caps[1].parse().ok())
            .unwrap_or(0);
        let page = sides[0].0.clone();
        let index = matches.len();
        let (spans_a, spans_b) = parse_spans(pages_dir, &page)?;
        matches.push(Match {
            index,
            a: MatchSide {
                group: sides[0].1.clone(),
                file: sides[0].2.clone(),
                similarity_percent: sides[0].3,
                spans: spans_a,
            },
            b: MatchSide {
                group: sides[1].1.clone(),
                file: sides[1].2.clone(),
                similarity_percent: sides[1].3,
                spans: spans_b,
            },
            matched_lines,
            page: Some(format!("{page}.html")),
        });
    }
    Ok(Ledger::new(matches))
}

/// Per-side line spans from a `-top` annotation page. Cells reference
/// `<match>-0.html` for the left side and `<match>-1.html` for the right.
fn parse_spans(pages_dir: &Path, page: &str) -> Result<(Vec<LineSpan>, Vec<LineSpan>)> {
    let top_path = pages_dir.join(format!("{page}-top.html"));
    if !top_path.is_file() {
        return Ok((Vec::new(), Vec::new()));
    }
    let body = fs::read_to_string(&top_path)
        .with_context(|| format!("read {}", top_path.display()))?;
    let span_re = Regex::new(r#"match\d+-([01])\.html#\d+"[^>]*>(\d+)-(\d+)"#)
        .context("compile span regex")?;

    let mut sides: BTreeMap<u8, Vec<LineSpan>> = BTreeMap::new();
    for caps in span_re.captures_iter(&body) {
        let side: u8 = caps[1].parse().unwrap_or(0);
        let start: usize = caps[2].parse().unwrap_or(0);
        let end: usize = caps[3].parse().unwrap_or(0);
        if start == 0 || end < start {
            continue;
        }
        sides.entry(side).or_default().push(LineSpan { start, end });
    }
    Ok((
        sides.remove(&0).unwrap_or_default(),
        sides.remove(&1).unwrap_or_default(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_INDEX: &str = r#"
<HTML><BODY><TABLE>
<TR><TH>File 1<TH>File 2<TH>Lines Matched
<TR><TD><A HREF="./match0.html">submission_files/g1/main.py (80%)</A>
    <TD><A HREF="./match0.html">submission_files/g2/main.py (75%)</A>
    <TD ALIGN=right>40
<TR><TD><A HREF="./match1.html">submission_files/g2/util.py (60%)</A>
    <TD><A HREF="./match1.html">submission_files/g3/util.py (58%)</A>
    <TD ALIGN=right>10
</TABLE></BODY></HTML>
"#;

    const SAMPLE_TOP: &str = r#"
<HTML><BODY><TABLE>
<TR><TH><A HREF="match0-0.html">g1</A><TH><A HREF="match0-1.html">g2</A>
<TR><TD><A HREF="match0-0.html#0" NAME="0">4-12</A>
    <TD><A HREF="match0-1.html#0" NAME="0">6-14</A>
<TR><TD><A HREF="match0-0.html#1" NAME="1">20-31</A>
    <TD><A HREF="match0-1.html#1" NAME="1">25-36</A>
</TABLE></BODY></HTML>
"#;

    #[test]
    fn parse_ledger_reads_sides_lines_and_spans() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), SAMPLE_INDEX).unwrap();
        fs::write(dir.path().join("match0-top.html"), SAMPLE_TOP).unwrap();

        let ledger = parse_ledger(dir.path()).unwrap();
        assert_eq!(ledger.matches.len(), 2);

        let first = &ledger.matches[0];
        assert_eq!(first.index, 0);
        assert_eq!(first.a.group, "g1");
        assert_eq!(first.a.similarity_percent, 80);
        assert_eq!(first.b.group, "g2");
        assert_eq!(first.b.similarity_percent, 75);
        assert_eq!(first.matched_lines, 40);
        assert_eq!(
            first.a.spans,
            vec![LineSpan { start: 4, end: 12 }, LineSpan { start: 20, end: 31 }]
        );
        assert_eq!(first.b.spans[0], LineSpan { start: 6, end: 14 });
        assert_eq!(first.page.as_deref(), Some("match0.html"));

        let second = &ledger.matches[1];
        assert_eq!(second.index, 1);
        assert_eq!(second.a.group, "g2");
        assert_eq!(second.b.group, "g3");
        assert_eq!(second.matched_lines, 10);
        assert!(second.a.spans.is_empty());
    }

    #[test]
    fn localize_rewrites_report_links() {
        let body = r#"<A HREF="http://example.org/results/1/match0.html">x</A>"#;
        let local = localize(body, "http://example.org/results/1");
        assert_eq!(local, r#"<A HREF="./match0.html">x</A>"#);
    }
}
