//! Wiki export handling.
//!
//! A wiki space is exported as one JSON page tree. Pages can either be
//! loaded straight into documents, or flattened into one text file per
//! page so the plain-text loader can pick them up later.
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use scraper::Html;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use super::{ContentType, Document, LoadError, Metadata, fingerprint, normalize_path};

const EMPTY_BODY_PLACEHOLDER: &str = "(This page has no body text.)";
const MAX_FILENAME_CHARS: usize = 180;

static CDATA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!\[CDATA\[(.*?)\]\]>").expect("valid regex"));
static BR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").expect("valid regex"));
static UNSAFE_FILENAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[\\/:*?"<>|\n\r\t]"#).expect("valid regex"));
static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// One page of a wiki export, with its child pages.
#[derive(Debug, Deserialize)]
pub struct WikiPage {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    version: Option<WikiVersion>,
    #[serde(default)]
    body: Option<WikiBody>,
    #[serde(default)]
    pub children: Vec<WikiPage>,
}

#[derive(Debug, Deserialize)]
struct WikiVersion {
    #[serde(default)]
    number: Value,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WikiBody {
    Html(String),
    Structured {
        #[serde(default)]
        storage: Option<WikiStorage>,
    },
}

#[derive(Debug, Deserialize)]
struct WikiStorage {
    #[serde(default)]
    value: String,
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl WikiPage {
    pub fn id(&self) -> String {
        value_to_string(&self.id)
    }

    pub fn version(&self) -> String {
        self.version
            .as_ref()
            .map(|v| value_to_string(&v.number))
            .unwrap_or_default()
    }

    /// Raw storage-format HTML of the page body.
    pub fn html(&self) -> &str {
        match &self.body {
            Some(WikiBody::Html(html)) => html,
            Some(WikiBody::Structured {
                storage: Some(storage),
            }) => &storage.value,
            _ => "",
        }
    }

    /// Depth-first list of this page and all descendants, each paired with
    /// its breadcrumb of titles from the root.
    pub fn flatten(&self) -> Vec<(&WikiPage, Vec<&str>)> {
        let mut out = Vec::new();
        self.collect(Vec::new(), &mut out);
        out
    }

    fn collect<'a>(&'a self, mut path: Vec<&'a str>, out: &mut Vec<(&'a WikiPage, Vec<&'a str>)>) {
        path.push(&self.title);
        out.push((self, path.clone()));
        for child in &self.children {
            child.collect(path.clone(), out);
        }
    }
}

/// Parse a wiki export, normalizing non-breaking spaces first.
pub fn parse_export(raw: &str) -> Result<WikiPage, serde_json::Error> {
    serde_json::from_str(&raw.replace('\u{a0}', " "))
}

fn read_export(path: &Path) -> Result<WikiPage, LoadError> {
    let raw = fs::read_to_string(path).map_err(|source| LoadError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    parse_export(&raw).map_err(|e| LoadError::Parse {
        path: path.to_path_buf(),
        reason: format!("line {}, column {}: {e}", e.line(), e.column()),
    })
}

/// Convert storage-format HTML into readable plain text.
///
/// CDATA sections (code macro bodies) are kept as text, `<br>` becomes a
/// line break and runs of blank lines collapse into one.
pub fn clean_html(html: &str) -> String {
    if html.trim().is_empty() {
        return String::new();
    }

    let unwrapped = CDATA_RE.replace_all(html, |caps: &regex::Captures<'_>| {
        caps[1]
            .replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;")
    });
    let with_breaks = BR_RE.replace_all(&unwrapped, "\n");

    let fragment = Html::parse_fragment(&with_breaks);
    let text = fragment.root_element().text().collect::<Vec<_>>().join("\n");

    let mut lines: Vec<&str> = Vec::new();
    for line in text.lines().map(str::trim) {
        if !line.is_empty() || lines.last().is_some_and(|last| !last.is_empty()) {
            lines.push(line);
        }
    }
    lines.join("\n").trim().to_string()
}

fn breadcrumb(path: &[&str]) -> String {
    path.iter()
        .filter(|t| !t.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" > ")
}

/// Render one page as a flat text file: a header block, then the body.
pub fn render_page_text(page: &WikiPage, path: &[&str]) -> String {
    let content = clean_html(page.html());
    let body = if content.is_empty() {
        EMPTY_BODY_PLACEHOLDER
    } else {
        content.as_str()
    };

    format!(
        "Title: {}\nPage ID: {}\nURL: {}\nStatus: {}\nVersion: {}\nBreadcrumb: {}\n\n-----\n\n{}",
        page.title,
        page.id(),
        page.url,
        page.status,
        page.version(),
        breadcrumb(path),
        body
    )
}

/// Filesystem-safe file stem derived from a page title.
pub fn sanitize_filename(name: &str, fallback: &str) -> String {
    let cleaned = UNSAFE_FILENAME_RE.replace_all(name, " ");
    let cleaned = WHITESPACE_RE.replace_all(cleaned.trim(), " ");
    let cleaned = if cleaned.is_empty() {
        fallback.to_string()
    } else {
        cleaned.into_owned()
    };
    cleaned.chars().take(MAX_FILENAME_CHARS).collect()
}

/// Load every page of a wiki export with a non-empty body as a document.
///
/// Each page is its own sync unit: `source_path` is `<export path>#<page id>`.
pub fn load_wiki_export(path: &Path, origin: &str) -> Vec<Document> {
    let root = match read_export(path) {
        Ok(root) => root,
        Err(e) => {
            warn!("{e}");
            return Vec::new();
        }
    };

    let export_path = normalize_path(path);
    let mut docs = Vec::new();
    for (page, crumbs) in root.flatten() {
        let content = clean_html(page.html());
        if content.is_empty() {
            warn!("Empty wiki page: {} (ID: {})", page.title, page.id());
            continue;
        }

        let mut metadata = Metadata::new(
            format!("{export_path}#{}", page.id()),
            page.title.clone(),
            ContentType::WikiPage,
        );
        metadata.source = origin.to_string();
        metadata.section = Some(breadcrumb(&crumbs));
        metadata.url = (!page.url.is_empty()).then(|| page.url.clone());
        metadata.fingerprint = Some(fingerprint(content.as_bytes()));
        docs.push(Document::new(content, metadata));
    }

    info!("Loaded {} wiki page(s) from {}", docs.len(), path.display());
    docs
}

/// Write one text file per wiki page into `out_dir`.
///
/// Pages whose rendered text is shorter than `min_chars` are skipped.
/// When `combined_out` is given, all written pages are also concatenated
/// into that single file. Returns the written page files in order.
pub fn export_wiki_to_text(
    input: &Path,
    out_dir: &Path,
    combined_out: Option<&Path>,
    min_chars: usize,
) -> Result<Vec<PathBuf>, LoadError> {
    let root = read_export(input)?;

    fs::create_dir_all(out_dir).map_err(|source| LoadError::Write {
        path: out_dir.to_path_buf(),
        source,
    })?;

    let pages = root.flatten();
    info!("Total pages (including root): {}", pages.len());

    let mut used_names: HashMap<String, usize> = HashMap::new();
    let mut written = Vec::new();

    for (page, crumbs) in pages {
        let page_id = page.id();
        let fallback: &str = if page_id.is_empty() { "page" } else { &page_id };
        let base_name = sanitize_filename(&page.title, fallback);

        let seen = used_names.entry(base_name.clone()).or_insert(0);
        *seen += 1;
        let filename = if *seen > 1 {
            format!("{base_name}__{seen}__{page_id}.txt")
        } else {
            format!("{base_name}__{page_id}.txt")
        };

        let text = render_page_text(page, &crumbs);
        let chars = text.chars().count();
        if chars < min_chars {
            info!("Skip short page: {} ({page_id}) chars={chars}", page.title);
            continue;
        }

        let file_path = out_dir.join(filename);
        fs::write(&file_path, text).map_err(|source| LoadError::Write {
            path: file_path.clone(),
            source,
        })?;
        info!("Wrote: {}", file_path.display());
        written.push(file_path);
    }

    if let Some(combined) = combined_out {
        write_combined(&written, combined)?;
    }

    Ok(written)
}

fn write_combined(files: &[PathBuf], combined: &Path) -> Result<(), LoadError> {
    if files.is_empty() {
        warn!("No files to combine.");
        return Ok(());
    }

    let mut out = String::new();
    for (idx, file) in files.iter().enumerate() {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        out.push_str(&format!("\n\n===== DOCUMENT {}: {name} =====\n\n", idx + 1));
        let text = fs::read_to_string(file).map_err(|source| LoadError::Unreadable {
            path: file.clone(),
            source,
        })?;
        out.push_str(&text);
    }

    fs::write(combined, out).map_err(|source| LoadError::Write {
        path: combined.to_path_buf(),
        source,
    })?;
    info!("Combined file written: {}", combined.display());
    Ok(())
}
