//! DOCX (OOXML) text extraction.
//!
//! Reads `word/document.xml` out of the ZIP container and walks the XML for
//! `w:t` text runs, inserting a newline at each paragraph boundary. Entry
//! reads are bounded to protect against zip bombs.

use std::io::Read;
use std::path::Path;

use super::ExtractError;

/// Maximum decompressed bytes accepted from the document XML entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Extract the plain text of a DOCX file.
pub async fn extract_docx(path: &Path) -> Result<String, ExtractError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| ExtractError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    extract_docx_bytes(&bytes)
}

/// Extract the plain text of a DOCX file already loaded into memory.
pub fn extract_docx_bytes(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|err| ExtractError::Docx(err.to_string()))?;

    let entry = archive
        .by_name("word/document.xml")
        .map_err(|err| ExtractError::Docx(err.to_string()))?;

    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|err| ExtractError::Docx(err.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }

    walk_text_runs(&doc_xml)
}

fn walk_text_runs(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t"
                    && let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                {
                    out.push_str(te.unescape().unwrap_or_default().as_ref());
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                // Paragraph boundary.
                if e.local_name().as_ref() == b"p" && !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(err) => return Err(ExtractError::Docx(err.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}
