//! Turns an uploaded file into the plain text the heuristics read.

use std::io::{Cursor, Read};

use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

/// Wrap width for HTML rendered to text.
const HTML_WIDTH: usize = 120;
/// Upper bound on the inflated `word/document.xml`.
const MAX_DOCX_XML_BYTES: u64 = 32 * 1024 * 1024;
const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("file is empty")]
    Empty,
    #[error("unsupported file type '{0}'; upload plain text, markdown, HTML or DOCX")]
    Unsupported(String),
    #[error("file is not valid UTF-8 text")]
    NotText,
    #[error("could not convert HTML to text: {0}")]
    Html(String),
    #[error("could not read Word document: {0}")]
    Docx(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextFormat {
    Plain,
    Markdown,
    Html,
    Docx,
}

impl TextFormat {
    /// Decide the format from the declared content type, falling back to
    /// the file extension when the client sent a generic type.
    pub fn detect(content_type: &str, file_name: &str) -> Result<Self, ExtractError> {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match mime.as_str() {
            "text/plain" => return Ok(Self::Plain),
            "text/markdown" | "text/x-markdown" => return Ok(Self::Markdown),
            "text/html" | "application/xhtml+xml" => return Ok(Self::Html),
            DOCX_MIME => return Ok(Self::Docx),
            "" | "application/octet-stream" => {}
            other => return Err(ExtractError::Unsupported(other.to_string())),
        }

        let ext = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "txt" | "text" => Ok(Self::Plain),
            "md" | "markdown" => Ok(Self::Markdown),
            "html" | "htm" => Ok(Self::Html),
            "docx" => Ok(Self::Docx),
            _ => Err(ExtractError::Unsupported(if mime.is_empty() {
                file_name.to_string()
            } else {
                mime
            })),
        }
    }
}

pub fn extract_text(bytes: &[u8], content_type: &str, file_name: &str) -> Result<String, ExtractError> {
    if bytes.is_empty() {
        return Err(ExtractError::Empty);
    }
    let text = match TextFormat::detect(content_type, file_name)? {
        TextFormat::Plain | TextFormat::Markdown => std::str::from_utf8(bytes)
            .map_err(|_| ExtractError::NotText)?
            .to_string(),
        TextFormat::Html => {
            html2text::from_read(bytes, HTML_WIDTH).map_err(|e| ExtractError::Html(e.to_string()))?
        }
        TextFormat::Docx => docx_text(bytes)?,
    };
    // Strip a UTF-8 BOM so the first line matches like any other.
    Ok(text.trim_start_matches('\u{feff}').to_string())
}

/// Raw text of a DOCX body: one line per paragraph, `<w:tab/>` as a tab.
fn docx_text(bytes: &[u8]) -> Result<String, ExtractError> {
    let docx_err = |e: &dyn std::fmt::Display| ExtractError::Docx(e.to_string());

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| docx_err(&e))?;
    let part = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Docx("missing word/document.xml".into()))?;
    let mut xml = String::new();
    part.take(MAX_DOCX_XML_BYTES + 1)
        .read_to_string(&mut xml)
        .map_err(|e| docx_err(&e))?;
    if xml.len() as u64 > MAX_DOCX_XML_BYTES {
        return Err(ExtractError::Docx("document body too large".into()));
    }

    let mut reader = Reader::from_str(&xml);
    let mut text = String::new();
    let mut in_run_text = false;
    loop {
        match reader.read_event().map_err(|e| docx_err(&e))? {
            Event::Start(e) if e.local_name().as_ref() == b"t" => in_run_text = true,
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_run_text = false,
                b"p" => text.push('\n'),
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"tab" => text.push('\t'),
                b"br" | b"cr" => text.push('\n'),
                _ => {}
            },
            Event::Text(t) if in_run_text => text.push_str(&t.unescape().map_err(|e| docx_err(&e))?),
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(text)
}
