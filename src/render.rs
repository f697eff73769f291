//! Document-rendering collaborator.
//!
//! Wraps an external `pandoc`-style renderer found on PATH (or configured
//! as a command string). The core hands it text with per-line highlight
//! annotations; the renderer owns the visual styling. Highlighted regions
//! are tagged with a `highlight` class so the print-ready format can apply
//! a distinct style.
use crate::model::{Group, LineSpan};
use crate::pipeline::ActionContext;
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Lines per comparison-table cell before the row is split.
const CODE_BLOCK_LIMIT: usize = 20;

const DEFAULT_RENDERER: &str = "pandoc";

pub struct Renderer {
    argv: Vec<String>,
}

impl Renderer {
    /// Resolve the renderer command: a configured override string wins,
    /// otherwise the default renderer must be on PATH.
    pub fn resolve(command_override: Option<&str>) -> Result<Self> {
        let argv = match command_override {
            Some(raw) => {
                let argv = shell_words::split(raw)
                    .with_context(|| format!("parse renderer command: {raw}"))?;
                if argv.is_empty() {
                    return Err(anyhow!("renderer command is empty"));
                }
                argv
            }
            None => {
                let path = which::which(DEFAULT_RENDERER).map_err(|_| {
                    anyhow!(
                        "no '{DEFAULT_RENDERER}' executable found in the path; \
                         it is required to render documents"
                    )
                })?;
                vec![path.to_string_lossy().to_string()]
            }
        };
        Ok(Self { argv })
    }

    /// Render markdown from stdin to a print-ready document at `dest`.
    pub fn render_markdown(&self, markdown: &str, dest: &Path) -> Result<()> {
        self.render(
            markdown,
            &["-V", "geometry:margin=1cm", "-V", "pagestyle=empty"],
            dest,
        )
    }

    /// Render HTML from stdin. Comparison tables want landscape pages.
    pub fn render_html(&self, html: &str, dest: &Path, landscape: bool) -> Result<()> {
        let geometry = if landscape {
            "geometry:margin=1cm,landscape"
        } else {
            "geometry:margin=1cm"
        };
        self.render(html, &["-f", "html", "-V", geometry], dest)
    }

    /// Render one source file as a numbered code listing.
    pub fn render_source_file(&self, source: &Path, language: &str, dest: &Path) -> Result<()> {
        let content =
            fs::read_to_string(source).with_context(|| format!("read {}", source.display()))?;
        let name = source
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());
        let markdown = format!("# {name}\n\n```{{.{language} .numberLines}}\n{content}\n```\n");
        self.render_markdown(&markdown, dest)
    }

    /// Invoke the renderer, staging output next to `dest` and publishing it
    /// with a rename once the renderer exits cleanly.
    fn render(&self, input: &str, extra_args: &[&str], dest: &Path) -> Result<()> {
        let parent = dest.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        let extension = dest
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        let staged = tempfile::Builder::new()
            .prefix(".render-")
            .suffix(&extension)
            .tempfile_in(parent)
            .context("stage render output")?;

        let mut command = Command::new(&self.argv[0]);
        command.args(&self.argv[1..]);
        command.args(extra_args);
        command.arg("-o").arg(staged.path());
        command.stdin(Stdio::piped());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .with_context(|| format!("spawn renderer {}", self.argv[0]))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input.as_bytes())
                .context("write renderer input")?;
        }
        let output = child.wait_with_output().context("wait for renderer")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "renderer failed for {}: {}",
                dest.display(),
                stderr.trim()
            ));
        }

        staged
            .persist(dest)
            .with_context(|| format!("publish {}", dest.display()))?;
        Ok(())
    }
}

/// A source file accumulating highlight spans from every match that
/// touches it. Spans are kept sorted and merged so overlapping matches
/// produce one contiguous highlighted region.
#[derive(Debug)]
pub struct HighlightedFile {
    pub filename: String,
    pub content_path: PathBuf,
    pub language: String,
    spans: Vec<LineSpan>,
}

impl HighlightedFile {
    pub fn new(filename: &str, content_path: PathBuf, language: &str) -> Self {
        Self {
            filename: filename.to_string(),
            content_path,
            language: language.to_string(),
            spans: Vec::new(),
        }
    }

    /// Merge a new span into the sorted set, coalescing overlaps and
    /// adjacent ranges.
    pub fn add_highlight(&mut self, span: LineSpan) {
        self.spans.push(span);
        self.spans.sort_by_key(|span| (span.start, span.end));
        let mut merged: Vec<LineSpan> = Vec::with_capacity(self.spans.len());
        for span in self.spans.drain(..) {
            match merged.last_mut() {
                Some(last) if span.start <= last.end + 1 => {
                    last.end = last.end.max(span.end);
                }
                _ => merged.push(span),
            }
        }
        self.spans = merged;
    }

    pub fn spans(&self) -> &[LineSpan] {
        &self.spans
    }

    /// Emit the file as alternating plain/highlighted numbered blocks.
    pub fn to_html(&self) -> Result<String> {
        let content = fs::read_to_string(&self.content_path)
            .with_context(|| format!("read {}", self.content_path.display()))?;
        let lines: Vec<&str> = content.lines().collect();
        let mut blocks = vec![format!("<h1>{}</h1>", escape_html(&self.filename))];
        let mut cursor = 0usize;
        for span in &self.spans {
            let start = span.start.saturating_sub(1).min(lines.len());
            let end = span.end.min(lines.len());
            if cursor < start {
                blocks.push(self.block(&lines[cursor..start], cursor + 1, false));
            }
            if start < end {
                blocks.push(self.block(&lines[start..end], start + 1, true));
            }
            cursor = end;
        }
        if cursor < lines.len() {
            blocks.push(self.block(&lines[cursor..], cursor + 1, false));
        }
        Ok(blocks.join("\n"))
    }

    fn block(&self, lines: &[&str], first_number: usize, highlight: bool) -> String {
        let class = if highlight { " highlight" } else { "" };
        format!(
            "<pre class=\"{} numberLines{class}\" firstnumber=\"{first_number}\">{}</pre>",
            self.language,
            escape_html(&lines.join("\n")),
        )
    }
}

pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Side-by-side comparison section for one match, chunked so neither cell
/// exceeds the block limit.
#[allow(clippy::too_many_arguments)]
pub fn comparison_section(
    match_number: usize,
    header_a: &str,
    header_b: &str,
    code_a: &str,
    code_b: &str,
    start_a: usize,
    start_b: usize,
    language: &str,
) -> String {
    let mut rows = String::new();
    let lines_a: Vec<&str> = code_a.lines().collect();
    let lines_b: Vec<&str> = code_b.lines().collect();
    let mut offset_a = 0usize;
    let mut offset_b = 0usize;
    while offset_a < lines_a.len() || offset_b < lines_b.len() {
        let chunk_a =
            &lines_a[offset_a.min(lines_a.len())..(offset_a + CODE_BLOCK_LIMIT).min(lines_a.len())];
        let chunk_b =
            &lines_b[offset_b.min(lines_b.len())..(offset_b + CODE_BLOCK_LIMIT).min(lines_b.len())];
        rows.push_str(&format!(
            "<tr>\n<td><pre class=\"{language} numberLines\" firstnumber=\"{}\">{}</pre></td>\n\
             <td><pre class=\"{language} numberLines\" firstnumber=\"{}\">{}</pre></td>\n</tr>\n",
            start_a + offset_a,
            escape_html(&chunk_a.join("\n")),
            start_b + offset_b,
            escape_html(&chunk_b.join("\n")),
        ));
        offset_a += chunk_a.len().max(1);
        offset_b += chunk_b.len().max(1);
    }
    format!(
        "<h2>Match {match_number}</h2>\n<table><tr><th>{}</th><th>{}</th></tr>\n{rows}</table>",
        escape_html(header_a),
        escape_html(header_b),
    )
}

/// Join sections with breaks inside one HTML document.
pub fn combine_html(sections: &[String]) -> String {
    format!("<html>{}</html>", sections.join("<br/>"))
}

/// Cover section: group name plus one roster line per member.
pub fn group_cover_html(group: &Group) -> String {
    let mut lines = vec![
        format!("<h1>{}</h1>", escape_html(&group.name)),
        "<ul>".to_string(),
    ];
    for member in &group.members {
        lines.push(format!(
            "<li>{} ({} - {} - {})</li>",
            escape_html(&member.display_name()),
            escape_html(&member.user_name),
            escape_html(&member.id_number),
            escape_html(&member.email)
        ));
    }
    lines.push("</ul>".to_string());
    lines.join("\n")
}

/// Render every submission and starter file to its print-ready
/// counterpart, skipping files already rendered unless forced.
pub fn render_documents(ctx: &ActionContext) -> Result<()> {
    let renderer = Renderer::resolve(ctx.config.renderer_command.as_deref())?;
    let language = ctx.config.language()?.to_string();
    render_tree(
        ctx,
        &renderer,
        &language,
        &ctx.paths.submissions_dir(),
        &ctx.paths.rendered_submissions_dir(),
    )?;
    render_tree(
        ctx,
        &renderer,
        &language,
        &ctx.paths.starters_org_dir(),
        &ctx.paths.starters_rendered_dir(),
    )?;
    Ok(())
}

fn render_tree(
    ctx: &ActionContext,
    renderer: &Renderer,
    language: &str,
    source_root: &Path,
    dest_root: &Path,
) -> Result<()> {
    let nested = format!("*/{}", ctx.config.file_glob);
    for rel in crate::util::glob_files(source_root, &nested)? {
        let source = source_root.join(&rel);
        let dest = dest_root.join(rendered_name(&rel));
        if dest.is_file() && !ctx.config.force {
            continue;
        }
        tracing::info!(file = %rel.display(), "rendering document");
        renderer.render_source_file(&source, language, &dest)?;
    }
    Ok(())
}

/// Rendered counterpart of a source file path.
pub fn rendered_name(rel: &Path) -> PathBuf {
    let mut name = rel.as_os_str().to_os_string();
    name.push(".pdf");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(start: usize, end: usize) -> LineSpan {
        LineSpan { start, end }
    }

    fn highlighted(spans: &[(usize, usize)]) -> HighlightedFile {
        let mut file = HighlightedFile::new("f.py", PathBuf::from("/nonexistent"), "python");
        for (start, end) in spans {
            file.add_highlight(span(*start, *end));
        }
        file
    }

    #[test]
    fn disjoint_spans_stay_sorted() {
        let file = highlighted(&[(20, 30), (1, 5)]);
        assert_eq!(file.spans(), &[span(1, 5), span(20, 30)]);
    }

    #[test]
    fn overlapping_spans_merge() {
        let file = highlighted(&[(1, 10), (5, 15)]);
        assert_eq!(file.spans(), &[span(1, 15)]);
    }

    #[test]
    fn adjacent_spans_merge() {
        let file = highlighted(&[(1, 4), (5, 9)]);
        assert_eq!(file.spans(), &[span(1, 9)]);
    }

    #[test]
    fn span_bridging_two_existing_spans_merges_all_three() {
        let file = highlighted(&[(1, 5), (10, 15), (4, 11)]);
        assert_eq!(file.spans(), &[span(1, 15)]);
    }

    #[test]
    fn contained_span_is_absorbed() {
        let file = highlighted(&[(1, 20), (5, 9)]);
        assert_eq!(file.spans(), &[span(1, 20)]);
    }

    #[test]
    fn to_html_alternates_plain_and_highlighted_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.py");
        fs::write(&path, "a\nb\nc\nd\ne\n").unwrap();
        let mut file = HighlightedFile::new("f.py", path, "python");
        file.add_highlight(span(2, 3));

        let html = file.to_html().unwrap();
        assert!(html.contains("<h1>f.py</h1>"));
        assert!(html.contains("firstnumber=\"1\">a</pre>"));
        assert!(html.contains("numberLines highlight\" firstnumber=\"2\">b\nc</pre>"));
        assert!(html.contains("firstnumber=\"4\">d\ne</pre>"));
    }

    #[test]
    fn comparison_section_chunks_long_code() {
        let code_a: String = (1..=45).map(|i| format!("a{i}\n")).collect();
        let code_b = "b1\nb2\n".to_string();
        let html = comparison_section(1, "left", "right", &code_a, &code_b, 1, 1, "python");
        // 45 lines split into three rows of at most 20.
        assert_eq!(html.matches("<tr>\n<td>").count(), 3);
        assert!(html.contains("firstnumber=\"21\""));
        assert!(html.contains("firstnumber=\"41\""));
    }

    #[test]
    fn escape_html_handles_code_brackets() {
        assert_eq!(
            escape_html("if a < b && c > d"),
            "if a &lt; b &amp;&amp; c &gt; d"
        );
    }
}
