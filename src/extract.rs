//! Format-specific text extraction.
//!
//! Every function here takes raw file bytes and returns plain UTF-8 text (or
//! one text per page / row / note). Nothing in this module touches the file
//! system; the [`loaders`](crate::loaders) registry reads files and turns the
//! output into [`DocumentRecord`](libre_chat_core::models::DocumentRecord)s.
//!
//! Extraction never panics on malformed input: it returns an
//! [`ExtractError`] and the registry skips the file.

use std::io::Read;
use std::sync::LazyLock;

use base64::Engine as _;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use thiserror::Error;

/// Maximum sheets to process in an xlsx.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to process per sheet.
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("archive extraction failed: {0}")]
    Archive(String),
    #[error("XML parsing failed: {0}")]
    Xml(String),
    #[error("CSV parsing failed: {0}")]
    Csv(String),
    #[error("JSON parsing failed: {0}")]
    Json(String),
    #[error("no {0} body found")]
    MissingBody(String),
}

type ExtractResult<T> = Result<T, ExtractError>;
type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

// ============ PDF ============

/// Text of every page, in page order.
pub fn pdf_pages(bytes: &[u8]) -> ExtractResult<Vec<String>> {
    pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

// ============ Office Open XML ============

pub fn docx(bytes: &[u8]) -> ExtractResult<String> {
    let mut archive = open_archive(bytes)?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml")?;
    xml_text(&xml, Some("t"), &["p"])
}

/// Slide texts in slide-number order, separated by blank lines.
pub fn pptx(bytes: &[u8]) -> ExtractResult<String> {
    let mut archive = open_archive(bytes)?;
    let slides = numbered_entries(&archive, "ppt/slides/slide");
    let mut parts = Vec::new();
    for name in slides {
        let xml = read_zip_entry_bounded(&mut archive, &name)?;
        let text = xml_text(&xml, Some("t"), &["p"])?;
        if !text.is_empty() {
            parts.push(text);
        }
    }
    Ok(parts.join("\n\n"))
}

/// All sheets of a workbook, one line per row with cells separated by spaces.
pub fn xlsx(bytes: &[u8]) -> ExtractResult<String> {
    let mut archive = open_archive(bytes)?;
    let shared_strings = if archive.index_for_name("xl/sharedStrings.xml").is_some() {
        let xml = read_zip_entry_bounded(&mut archive, "xl/sharedStrings.xml")?;
        read_shared_strings(&xml)?
    } else {
        Vec::new()
    };
    let sheets = numbered_entries(&archive, "xl/worksheets/sheet");
    let mut parts = Vec::new();
    for name in sheets.into_iter().take(XLSX_MAX_SHEETS) {
        let xml = read_zip_entry_bounded(&mut archive, &name)?;
        let text = xlsx_sheet_rows(&xml, &shared_strings)?;
        if !text.is_empty() {
            parts.push(text);
        }
    }
    Ok(parts.join("\n\n"))
}

fn read_shared_strings(xml: &[u8]) -> ExtractResult<Vec<String>> {
    let mut strings = Vec::new();
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = true,
                _ => {}
            },
            Ok(Event::Text(t)) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&t.unescape().map_err(|e| ExtractError::Xml(e.to_string()))?);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.extend(current.take()),
                b"t" => in_t = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn xlsx_sheet_rows(xml: &[u8], shared_strings: &[String]) -> ExtractResult<String> {
    let mut rows: Vec<String> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_v = false;
    let mut cell_is_shared_str = false;
    let mut cell_count = 0usize;
    loop {
        if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => cell_is_shared_str = attr(&e, b"t").as_deref() == Some("s"),
                b"v" => in_v = true,
                _ => {}
            },
            Ok(Event::Text(t)) if in_v => {
                let value = t.unescape().map_err(|e| ExtractError::Xml(e.to_string()))?;
                let value = value.trim();
                if !value.is_empty() {
                    let cell = if cell_is_shared_str {
                        value
                            .parse::<usize>()
                            .ok()
                            .and_then(|i| shared_strings.get(i).cloned())
                    } else {
                        Some(value.to_string())
                    };
                    if let Some(cell) = cell {
                        row.push(cell);
                        cell_count += 1;
                    }
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" => in_v = false,
                b"c" => cell_is_shared_str = false,
                b"row" => {
                    if !row.is_empty() {
                        rows.push(row.join(" "));
                        row.clear();
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    if !row.is_empty() {
        rows.push(row.join(" "));
    }
    Ok(rows.join("\n"))
}

// ============ OpenDocument / EPUB ============

pub fn odt(bytes: &[u8]) -> ExtractResult<String> {
    let mut archive = open_archive(bytes)?;
    let xml = read_zip_entry_bounded(&mut archive, "content.xml")?;
    Ok(normalize_whitespace(&xml_text(&xml, None, &["p", "h"])?))
}

/// Chapter texts in spine (reading) order.
pub fn epub(bytes: &[u8]) -> ExtractResult<String> {
    let mut archive = open_archive(bytes)?;
    let container = read_zip_entry_bounded(&mut archive, "META-INF/container.xml")?;
    let opf_path = first_attr(&container, b"rootfile", b"full-path")?
        .ok_or_else(|| ExtractError::Archive("container.xml has no rootfile".to_string()))?;
    let opf = read_zip_entry_bounded(&mut archive, &opf_path)?;
    let base = opf_path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");

    let mut manifest: Vec<(String, String)> = Vec::new();
    let mut spine: Vec<String> = Vec::new();
    let mut reader = Reader::from_reader(opf.as_slice());
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"item" => {
                    if let (Some(id), Some(href)) = (attr(&e, b"id"), attr(&e, b"href")) {
                        manifest.push((id, href));
                    }
                }
                b"itemref" => spine.extend(attr(&e, b"idref")),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    let mut chapters = Vec::new();
    for idref in spine {
        let Some((_, href)) = manifest.iter().find(|(id, _)| *id == idref) else {
            continue;
        };
        let path = if base.is_empty() {
            href.clone()
        } else {
            format!("{}/{}", base, href)
        };
        let xhtml = read_zip_entry_bounded(&mut archive, &path)?;
        let text = html_to_text(&String::from_utf8_lossy(&xhtml));
        if !text.is_empty() {
            chapters.push(text);
        }
    }
    Ok(chapters.join("\n\n"))
}

// ============ Evernote ============

/// `(title, text)` for every note of an `.enex` export.
pub fn enex_notes(bytes: &[u8]) -> ExtractResult<Vec<(String, String)>> {
    #[derive(PartialEq)]
    enum Field {
        Other,
        Title,
        Content,
    }

    let mut notes = Vec::new();
    let mut reader = Reader::from_reader(bytes);
    let mut buf = Vec::new();
    let mut field = Field::Other;
    let mut title = String::new();
    let mut content = String::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"note" => {
                    title.clear();
                    content.clear();
                }
                b"title" => field = Field::Title,
                b"content" => field = Field::Content,
                _ => {}
            },
            Ok(Event::Text(t)) if field != Field::Other => {
                let text = t.unescape().map_err(|e| ExtractError::Xml(e.to_string()))?;
                match field {
                    Field::Title => title.push_str(&text),
                    _ => content.push_str(&text),
                }
            }
            Ok(Event::CData(c)) if field == Field::Content => {
                content.push_str(&String::from_utf8_lossy(&c.into_inner()));
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"title" | b"content" => field = Field::Other,
                b"note" => notes.push((title.trim().to_string(), html_to_text(&content))),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(notes)
}

// ============ Delimited / JSON ============

/// One `header: value` block per data row.
pub fn csv_rows(bytes: &[u8], delimiter: u8) -> ExtractResult<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(bytes);
    let headers = reader
        .headers()
        .map_err(|e| ExtractError::Csv(e.to_string()))?
        .clone();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| ExtractError::Csv(e.to_string()))?;
        let lines: Vec<String> = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| format!("{}: {}", h.trim(), v.trim()))
            .collect();
        rows.push(lines.join("\n"));
    }
    Ok(rows)
}

/// One text per JSON document: the whole file, or each non-blank line when
/// `lines` is set (JSON Lines).
pub fn json_records(bytes: &[u8], lines: bool) -> ExtractResult<Vec<String>> {
    let to_text = |raw: &[u8]| -> ExtractResult<String> {
        let value: serde_json::Value =
            serde_json::from_slice(raw).map_err(|e| ExtractError::Json(e.to_string()))?;
        let mut out = Vec::new();
        flatten_json(&value, "", &mut out);
        Ok(out.join("\n"))
    };
    if !lines {
        return Ok(vec![to_text(bytes)?]);
    }
    bytes
        .split(|b| *b == b'\n')
        .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
        .map(to_text)
        .collect()
}

fn flatten_json(value: &serde_json::Value, path: &str, out: &mut Vec<String>) {
    use serde_json::Value;
    let leaf = |text: String, out: &mut Vec<String>| {
        if path.is_empty() {
            out.push(text);
        } else {
            out.push(format!("{}: {}", path, text));
        }
    };
    match value {
        Value::Null => {}
        Value::String(s) => leaf(s.clone(), out),
        Value::Bool(_) | Value::Number(_) => leaf(value.to_string(), out),
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                flatten_json(item, &format!("{}[{}]", path, i), out);
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                let child = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", path, key)
                };
                flatten_json(item, &child, out);
            }
        }
    }
}

// ============ Markup ============

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid pattern {pattern}: {e}"))
}

static HTML_HIDDEN: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"(?is)<!--.*?-->|<script\b.*?</script\s*>|<style\b.*?</style\s*>|<head\b.*?</head\s*>")
});
static HTML_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r"(?i)</?(p|div|br|li|ul|ol|h[1-6]|tr|table|section|article|header|footer|blockquote|pre|en-note)\b[^>]*>",
    )
});
static TAG: LazyLock<Regex> = LazyLock::new(|| compile(r"<[^>]*>"));
static ENTITY: LazyLock<Regex> =
    LazyLock::new(|| compile(r"&(#[xX][0-9a-fA-F]+|#[0-9]+|[a-zA-Z]+);"));

static MD_FENCE: LazyLock<Regex> = LazyLock::new(|| compile(r"(?m)^\s*(```|~~~).*$"));
static MD_IMAGE: LazyLock<Regex> = LazyLock::new(|| compile(r"!\[([^\]]*)\]\([^)]*\)"));
static MD_LINK: LazyLock<Regex> = LazyLock::new(|| compile(r"\[([^\]]*)\]\([^)]*\)"));
static MD_HEADING: LazyLock<Regex> = LazyLock::new(|| compile(r"(?m)^[ \t]{0,3}#{1,6}[ \t]+"));
static MD_QUOTE: LazyLock<Regex> = LazyLock::new(|| compile(r"(?m)^[ \t]*>[ \t]?"));
static MD_RULE: LazyLock<Regex> = LazyLock::new(|| compile(r"(?m)^[ \t]*([-*_][ \t]*){3,}$"));
static MD_LIST: LazyLock<Regex> = LazyLock::new(|| compile(r"(?m)^[ \t]*([-*+]|\d+\.)[ \t]+"));
static MD_STRONG: LazyLock<Regex> = LazyLock::new(|| compile(r"\*\*([^*]+)\*\*|__([^_]+)__"));
static MD_EMPHASIS: LazyLock<Regex> = LazyLock::new(|| compile(r"\*([^*\n]+)\*"));
static MD_CODE: LazyLock<Regex> = LazyLock::new(|| compile(r"`([^`]+)`"));

/// Strip tags from lenient HTML, keeping block boundaries as line breaks.
pub fn html_to_text(html: &str) -> String {
    let text = HTML_HIDDEN.replace_all(html, " ");
    let text = HTML_BLOCK.replace_all(&text, "\n");
    let text = TAG.replace_all(&text, "");
    normalize_whitespace(&decode_entities(&text))
}

/// Strip Markdown syntax, keeping the readable text.
pub fn markdown_to_text(markdown: &str) -> String {
    let text = MD_FENCE.replace_all(markdown, "");
    let text = MD_IMAGE.replace_all(&text, "$1");
    let text = MD_LINK.replace_all(&text, "$1");
    let text = MD_HEADING.replace_all(&text, "");
    let text = MD_QUOTE.replace_all(&text, "");
    let text = MD_RULE.replace_all(&text, "");
    let text = MD_LIST.replace_all(&text, "");
    let text = MD_STRONG.replace_all(&text, "$1$2");
    let text = MD_EMPHASIS.replace_all(&text, "$1");
    let text = MD_CODE.replace_all(&text, "$1");
    let text = TAG.replace_all(&text, "");
    normalize_whitespace(&decode_entities(&text))
}

fn decode_entities(text: &str) -> String {
    ENTITY
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            let decoded = match name {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some(' '),
                _ if name.starts_with("#x") || name.starts_with("#X") => {
                    u32::from_str_radix(&name[2..], 16).ok().and_then(char::from_u32)
                }
                _ if name.starts_with('#') => name[1..].parse().ok().and_then(char::from_u32),
                _ => None,
            };
            decoded.map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}

/// Collapse runs of spaces, trim lines and keep at most one blank line.
pub fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            blank_run += 1;
            continue;
        }
        if !out.is_empty() {
            out.push_str(if blank_run > 0 { "\n\n" } else { "\n" });
        }
        out.push_str(&line);
        blank_run = 0;
    }
    out
}

// ============ Email ============

/// A parsed `.eml` message.
#[derive(Debug, Clone, PartialEq)]
pub struct Email {
    pub subject: Option<String>,
    pub from: Option<String>,
    pub body: String,
}

/// Parse an RFC 822 message, selecting the first body part of type `wanted`
/// (`text/plain` or `text/html`). HTML bodies are converted to text.
pub fn email(raw: &[u8], wanted: &str) -> ExtractResult<Email> {
    let text = String::from_utf8_lossy(raw).replace("\r\n", "\n");
    let (headers, body) = split_headers(&text);
    let part = find_part(&headers, body, wanted)
        .ok_or_else(|| ExtractError::MissingBody(wanted.to_string()))?;
    let body = if wanted == "text/html" {
        html_to_text(&part)
    } else {
        normalize_whitespace(&part)
    };
    if body.is_empty() {
        return Err(ExtractError::MissingBody(wanted.to_string()));
    }
    Ok(Email {
        subject: header(&headers, "subject"),
        from: header(&headers, "from"),
        body,
    })
}

fn split_headers(message: &str) -> (Vec<(String, String)>, &str) {
    let (head, body) = match message.find("\n\n") {
        Some(pos) => (&message[..pos], &message[pos + 2..]),
        None => (message, ""),
    };
    let mut headers: Vec<(String, String)> = Vec::new();
    for line in head.lines() {
        if line.starts_with([' ', '\t']) {
            if let Some((_, value)) = headers.last_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
        } else if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }
    }
    (headers, body)
}

fn header(headers: &[(String, String)], name: &str) -> Option<String> {
    headers
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.clone())
}

fn find_part(headers: &[(String, String)], body: &str, wanted: &str) -> Option<String> {
    let content_type = header(headers, "content-type").unwrap_or_else(|| "text/plain".to_string());
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    if mime.starts_with("multipart/") {
        let boundary = mime_param(&content_type, "boundary")?;
        let delimiter = format!("--{}", boundary);
        for segment in body.split(delimiter.as_str()).skip(1) {
            if segment.starts_with("--") {
                break;
            }
            let segment = segment.strip_prefix('\n').unwrap_or(segment);
            let (part_headers, part_body) = split_headers(segment);
            if let Some(found) = find_part(&part_headers, part_body, wanted) {
                return Some(found);
            }
        }
        return None;
    }
    if mime != wanted {
        return None;
    }
    let encoding = header(headers, "content-transfer-encoding")
        .unwrap_or_default()
        .to_ascii_lowercase();
    match encoding.as_str() {
        "base64" => {
            let compact: String = body.chars().filter(|c| !c.is_whitespace()).collect();
            base64::engine::general_purpose::STANDARD
                .decode(compact)
                .ok()
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        }
        "quoted-printable" => Some(decode_quoted_printable(body)),
        _ => Some(body.to_string()),
    }
}

fn mime_param(content_type: &str, name: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim().trim_matches('"').to_string())
    })
}

fn decode_quoted_printable(body: &str) -> String {
    let bytes = body.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'=' {
            if bytes.get(i + 1) == Some(&b'\n') {
                i += 2;
                continue;
            }
            if let Some(Ok(decoded)) = bytes.get(i + 1..i + 3).map(hex::decode) {
                out.extend_from_slice(&decoded);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

// ============ Helpers ============

fn open_archive(bytes: &[u8]) -> ExtractResult<Archive<'_>> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Archive(e.to_string()))
}

fn read_zip_entry_bounded(archive: &mut Archive<'_>, name: &str) -> ExtractResult<Vec<u8>> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Archive(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Archive(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Archive(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

/// Entries named `<prefix><n>.xml`, sorted by `n`.
fn numbered_entries(archive: &Archive<'_>, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches(prefix)
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

fn first_attr(xml: &[u8], element: &[u8], key: &[u8]) -> ExtractResult<Option<String>> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == element => {
                return Ok(attr(&e, key));
            }
            Ok(Event::Eof) => return Ok(None),
            Err(e) => return Err(ExtractError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
}

/// Collect text from an XML part.
///
/// With `text_tag`, only text inside elements of that local name is kept.
/// A line break is emitted at the end of every `block_tags` element.
fn xml_text(xml: &[u8], text_tag: Option<&str>, block_tags: &[&str]) -> ExtractResult<String> {
    let is_text_tag = |name: &[u8]| text_tag.is_some_and(|t| t.as_bytes() == name);
    let mut out = String::new();
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut inside_text = 0usize;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if is_text_tag(e.local_name().as_ref()) {
                    inside_text += 1;
                }
            }
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" | b"s" => out.push(' '),
                b"br" | b"line-break" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Text(t)) if text_tag.is_none() || inside_text > 0 => {
                out.push_str(&t.unescape().map_err(|e| ExtractError::Xml(e.to_string()))?);
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                if is_text_tag(name.as_ref()) {
                    inside_text = inside_text.saturating_sub(1);
                }
                let is_block = block_tags.iter().any(|t| t.as_bytes() == name.as_ref());
                if is_block && !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim().to_string())
}
