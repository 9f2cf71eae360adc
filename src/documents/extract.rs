//! Plain-text extraction for uploaded documents.
//!
//! The format is taken from the declared MIME type, falling back to the
//! filename extension when the client sent nothing useful. PDF and DOCX are
//! parsed on the blocking pool.

use std::io::{Cursor, Read};

use bytes::Bytes;
use lazy_static::lazy_static;
use quick_xml::{events::Event, Reader};
use regex::Regex;
use thiserror::Error;
use tracing::debug;

/// Minimum number of non-whitespace characters for a document to count as
/// having text.
pub const MIN_TEXT_CHARS: usize = 10;

/// How far `word/document.xml` may inflate relative to the upload limit.
pub const DOCX_MAX_INFLATION: usize = 10;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    UnsupportedFormat(String),

    #[error("file is {size} bytes, the limit is {limit} bytes")]
    SizeExceeded { size: usize, limit: usize },

    #[error("could not parse file: {0}")]
    CorruptFile(String),

    #[error("no text could be extracted from the file")]
    NoText,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Txt,
    Markdown,
    Html,
}

impl DocumentFormat {
    pub fn extension(self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Docx => "docx",
            DocumentFormat::Txt => "txt",
            DocumentFormat::Markdown => "md",
            DocumentFormat::Html => "html",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "application/pdf",
            DocumentFormat::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            DocumentFormat::Txt => "text/plain; charset=utf-8",
            DocumentFormat::Markdown => "text/markdown; charset=utf-8",
            DocumentFormat::Html => "text/html; charset=utf-8",
        }
    }

    fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "application/pdf" | "application/x-pdf" => Some(DocumentFormat::Pdf),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                Some(DocumentFormat::Docx)
            }
            "text/plain" => Some(DocumentFormat::Txt),
            "text/markdown" | "text/x-markdown" => Some(DocumentFormat::Markdown),
            "text/html" | "application/xhtml+xml" => Some(DocumentFormat::Html),
            _ => None,
        }
    }

    fn from_extension(filename: &str) -> Option<Self> {
        let ext = filename.rsplit_once('.')?.1.to_ascii_lowercase();
        match ext.as_str() {
            "md" | "markdown" => Some(DocumentFormat::Markdown),
            "htm" | "html" => Some(DocumentFormat::Html),
            _ => mime_guess::from_ext(&ext)
                .iter_raw()
                .find_map(DocumentFormat::from_mime),
        }
    }
}

/// Picks the format for an upload. A specific declared MIME type wins, except
/// that `text/plain` with a Markdown extension is treated as Markdown.
pub fn resolve_format(
    declared_mime: Option<&str>,
    filename: &str,
) -> Result<DocumentFormat, ExtractError> {
    let mime = declared_mime
        .map(|m| m.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
        .filter(|m| !m.is_empty() && m != "application/octet-stream");

    let by_ext = DocumentFormat::from_extension(filename);
    match mime {
        Some(m) => match DocumentFormat::from_mime(&m) {
            Some(DocumentFormat::Txt) if by_ext == Some(DocumentFormat::Markdown) => {
                Ok(DocumentFormat::Markdown)
            }
            Some(f) => Ok(f),
            None => Err(ExtractError::UnsupportedFormat(m)),
        },
        None => by_ext.ok_or_else(|| {
            let ext = filename
                .rsplit_once('.')
                .map(|(_, e)| format!(".{e}"))
                .unwrap_or_else(|| filename.to_string());
            ExtractError::UnsupportedFormat(ext)
        }),
    }
}

#[derive(Debug, Clone)]
pub struct Extracted {
    pub format: DocumentFormat,
    pub text: String,
}

pub async fn extract(
    bytes: Bytes,
    declared_mime: Option<&str>,
    filename: &str,
    max_size: usize,
) -> Result<Extracted, ExtractError> {
    if bytes.len() > max_size {
        return Err(ExtractError::SizeExceeded {
            size: bytes.len(),
            limit: max_size,
        });
    }
    let format = resolve_format(declared_mime, filename)?;

    let raw = match format {
        DocumentFormat::Pdf => blocking(bytes, pdf_text).await?,
        DocumentFormat::Docx => {
            let xml_limit = max_size.saturating_mul(DOCX_MAX_INFLATION);
            blocking(bytes, move |b| docx_text(b, xml_limit)).await?
        }
        DocumentFormat::Txt => decode_text(&bytes),
        DocumentFormat::Markdown => strip_markdown(&decode_text(&bytes)),
        DocumentFormat::Html => strip_html(&decode_text(&bytes)),
    };

    let text = clean_text(&raw);
    if text.chars().filter(|c| !c.is_whitespace()).count() < MIN_TEXT_CHARS {
        return Err(ExtractError::NoText);
    }
    debug!(filename = %filename, format = ?format, chars = text.len(), "text extracted");
    Ok(Extracted { format, text })
}

async fn blocking<F>(bytes: Bytes, f: F) -> Result<String, ExtractError>
where
    F: FnOnce(&[u8]) -> Result<String, ExtractError> + Send + 'static,
{
    // pdf-extract panics on some malformed inputs; a panicked task is a
    // corrupt file, not a crashed request.
    tokio::task::spawn_blocking(move || f(&bytes))
        .await
        .map_err(|e| ExtractError::CorruptFile(format!("parser aborted: {e}")))?
}

fn pdf_text(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::CorruptFile(e.to_string()))
}

fn docx_text(bytes: &[u8], xml_limit: usize) -> Result<String, ExtractError> {
    fn corrupt(e: impl std::fmt::Display) -> ExtractError {
        ExtractError::CorruptFile(e.to_string())
    }
    let too_big = |size: u64| ExtractError::SizeExceeded {
        size: usize::try_from(size).unwrap_or(usize::MAX),
        limit: xml_limit,
    };

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(corrupt)?;
    let entry = archive.by_name("word/document.xml").map_err(corrupt)?;
    // The declared size can lie, so the read itself is capped as well.
    if entry.size() > xml_limit as u64 {
        return Err(too_big(entry.size()));
    }
    let mut raw = Vec::new();
    entry
        .take(xml_limit as u64 + 1)
        .read_to_end(&mut raw)
        .map_err(corrupt)?;
    if raw.len() > xml_limit {
        return Err(too_big(raw.len() as u64));
    }
    let xml = String::from_utf8(raw).map_err(corrupt)?;

    let mut reader = Reader::from_str(&xml);
    let mut out = String::new();
    let mut in_text = false;
    let mut table_depth = 0usize;
    let mut row: Vec<String> = Vec::new();
    let mut cell = String::new();

    loop {
        match reader.read_event().map_err(corrupt)? {
            Event::Start(e) => match e.name().as_ref() {
                b"w:t" => in_text = true,
                b"w:tbl" => table_depth += 1,
                _ => {}
            },
            Event::Empty(e) => {
                let target = if table_depth > 0 { &mut cell } else { &mut out };
                match e.name().as_ref() {
                    b"w:tab" => target.push('\t'),
                    b"w:br" | b"w:cr" => target.push('\n'),
                    _ => {}
                }
            }
            Event::Text(t) if in_text => {
                let text = t.unescape().map_err(corrupt)?;
                if table_depth > 0 {
                    cell.push_str(&text);
                } else {
                    out.push_str(&text);
                }
            }
            Event::End(e) => match e.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" if table_depth > 0 => cell.push(' '),
                b"w:p" => out.push_str("\n\n"),
                b"w:tc" => {
                    let c = cell.trim();
                    if !c.is_empty() {
                        row.push(c.to_string());
                    }
                    cell.clear();
                }
                b"w:tr" => {
                    if !row.is_empty() {
                        out.push_str(&row.join(" | "));
                        out.push_str("\n\n");
                    }
                    row.clear();
                }
                b"w:tbl" => table_depth = table_depth.saturating_sub(1),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(out)
}

/// UTF-8 with a Latin-1 fallback; a leading BOM is dropped.
fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.trim_start_matches('\u{feff}').to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

fn strip_markdown(src: &str) -> String {
    lazy_static! {
        static ref FENCE: Regex = Regex::new(r"(?m)^\s*```.*$").unwrap();
        static ref HEADER: Regex = Regex::new(r"(?m)^#{1,6}\s+").unwrap();
        static ref BOLD: Regex = Regex::new(r"\*\*([^*]+)\*\*").unwrap();
        static ref ITALIC: Regex = Regex::new(r"\*([^*]+)\*").unwrap();
        static ref UNDERLINE_BOLD: Regex = Regex::new(r"__([^_]+)__").unwrap();
        static ref IMAGE: Regex = Regex::new(r"!\[([^\]]*)\]\([^)]+\)").unwrap();
        static ref LINK: Regex = Regex::new(r"\[([^\]]+)\]\([^)]+\)").unwrap();
        static ref CODE: Regex = Regex::new(r"`([^`]+)`").unwrap();
    }
    let s = FENCE.replace_all(src, "");
    let s = HEADER.replace_all(&s, "");
    let s = BOLD.replace_all(&s, "$1");
    let s = ITALIC.replace_all(&s, "$1");
    let s = UNDERLINE_BOLD.replace_all(&s, "$1");
    let s = IMAGE.replace_all(&s, "$1");
    let s = LINK.replace_all(&s, "$1");
    CODE.replace_all(&s, "$1").into_owned()
}

fn strip_html(src: &str) -> String {
    lazy_static! {
        static ref SCRIPT: Regex = Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").unwrap();
        static ref STYLE: Regex = Regex::new(r"(?is)<style\b[^>]*>.*?</style\s*>").unwrap();
        static ref COMMENT: Regex = Regex::new(r"(?s)<!--.*?-->").unwrap();
        static ref BLOCK_END: Regex =
            Regex::new(r"(?i)<(br\s*/?|/p|/div|/li|/tr|/h[1-6]|/title|/section|/article)\s*>")
                .unwrap();
        static ref TAG: Regex = Regex::new(r"(?s)<[^>]*>").unwrap();
    }
    let s = SCRIPT.replace_all(src, "");
    let s = STYLE.replace_all(&s, "");
    let s = COMMENT.replace_all(&s, "");
    let s = BLOCK_END.replace_all(&s, "\n");
    let s = TAG.replace_all(&s, " ");
    decode_entities(&s)
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Drops control characters other than tab and newline (Postgres `TEXT`
/// refuses NUL), trims every line, collapses runs of spaces, and keeps at most
/// one blank line between paragraphs.
pub fn clean_text(text: &str) -> String {
    lazy_static! {
        static ref SPACES: Regex = Regex::new(r"[ \t\u{a0}]{2,}").unwrap();
        static ref BLANK_LINES: Regex = Regex::new(r"\n{3,}").unwrap();
    }
    let unified: String = text
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .chars()
        .filter(|&c| !c.is_control() || c == '\n' || c == '\t')
        .collect();
    let lines: Vec<&str> = unified.split('\n').map(str::trim).collect();
    let joined = lines.join("\n");
    let spaced = SPACES.replace_all(&joined, " ");
    BLANK_LINES.replace_all(&spaced, "\n\n").trim().to_string()
}

/// Reduces a client-supplied name to a safe display name: directory parts are
/// dropped and unusual characters become `_`.
pub fn sanitize_filename(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').trim();
    if cleaned.is_empty() {
        return "document".to_string();
    }
    cleaned.chars().take(255).collect()
}
