use crate::error::{AppError, Result};
use crate::formats::{ExtractedMetadata, FormatHandler, keys};
use lopdf::{Dictionary, Document, Object, Stream};
use std::path::Path;

/// Info dictionary entries mapped to metadata keys.
const INFO_KEYS: [(&[u8], &str); 5] = [
    (b"Title", keys::TITLE),
    (b"Author", keys::AUTHOR),
    (b"Subject", keys::SUBJECT),
    (b"Keywords", keys::KEYWORDS),
    (b"Producer", keys::PRODUCER),
];

/// Handler for PDF files.
pub struct PdfHandler;

fn load(path: &Path) -> Result<Document> {
    Document::load(path).map_err(|e| AppError::Pdf(e.to_string()))
}

/// Dictionary stored inline or behind a reference.
fn resolve_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    match obj {
        Object::Reference(id) => doc.get_dictionary(*id).ok(),
        Object::Dictionary(dict) => Some(dict),
        _ => None,
    }
}

/// Text of an info dictionary value: UTF-16BE with BOM, UTF-8, else Latin-1.
fn decode_text(obj: &Object) -> Option<String> {
    let bytes = match obj {
        Object::String(bytes, _) => bytes,
        Object::Name(name) => return String::from_utf8(name.clone()).ok(),
        _ => return None,
    };

    if let Some(utf16) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units = utf16
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]));
        return Some(
            char::decode_utf16(units)
                .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
                .collect(),
        );
    }

    Some(match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| char::from(b)).collect(),
    })
}

/// `D:YYYYMMDD...` to `YYYY-MM-DD`, or `YYYY` when the date is partial.
fn pdf_date(raw: &str) -> Option<String> {
    let digits = raw.trim().trim_start_matches("D:");
    let year = digits.get(0..4).filter(|y| y.bytes().all(|b| b.is_ascii_digit()))?;
    match (digits.get(4..6), digits.get(6..8)) {
        (Some(month), Some(day))
            if month.bytes().chain(day.bytes()).all(|b| b.is_ascii_digit()) =>
        {
            Some(format!("{}-{}-{}", year, month, day))
        }
        _ => Some(year.to_string()),
    }
}

/// Image XObjects drawn on the first page.
fn first_page_images(doc: &Document) -> Vec<&Stream> {
    let Some(&page_id) = doc.get_pages().values().next() else {
        return Vec::new();
    };
    let xobjects = doc
        .get_dictionary(page_id)
        .ok()
        .and_then(|page| page.get(b"Resources").ok())
        .and_then(|resources| resolve_dict(doc, resources))
        .and_then(|resources| resources.get(b"XObject").ok())
        .and_then(|xobjects| resolve_dict(doc, xobjects));
    let Some(xobjects) = xobjects else {
        return Vec::new();
    };

    xobjects
        .iter()
        .filter_map(|(_, obj)| obj.as_reference().ok())
        .filter_map(|id| doc.get_object(id).ok())
        .filter_map(|obj| obj.as_stream().ok())
        .filter(|stream| matches!(stream.dict.get(b"Subtype"), Ok(Object::Name(n)) if n == b"Image"))
        .collect()
}

/// JPEG or PNG payload the cover decoder can read directly.
fn is_encoded_image(data: &[u8]) -> bool {
    data.starts_with(&[0xFF, 0xD8, 0xFF]) || data.starts_with(&[0x89, b'P', b'N', b'G'])
}

/// Encoded bytes of an image stream. Raw sample data is not converted.
fn encoded_image(stream: &Stream) -> Option<Vec<u8>> {
    if is_encoded_image(&stream.content) {
        return Some(stream.content.clone());
    }
    stream
        .decompressed_content()
        .ok()
        .filter(|data| is_encoded_image(data))
}

impl FormatHandler for PdfHandler {
    fn extract_metadata(&self, path: &Path) -> Result<ExtractedMetadata> {
        let doc = load(path)?;
        let mut meta = ExtractedMetadata {
            page_count: Some(doc.get_pages().len() as u32),
            ..Default::default()
        };

        let info = doc
            .trailer
            .get(b"Info")
            .ok()
            .and_then(|info| resolve_dict(&doc, info));
        if let Some(info) = info {
            for (pdf_key, key) in INFO_KEYS {
                if let Some(text) = info.get(pdf_key).ok().and_then(decode_text) {
                    meta.set(key, &text);
                }
            }
            if let Some(date) = info
                .get(b"CreationDate")
                .ok()
                .and_then(decode_text)
                .and_then(|raw| pdf_date(&raw))
            {
                meta.set(keys::DATE, &date);
            }
        }

        if let Some(raw) = meta.get(keys::KEYWORDS) {
            let joined = raw
                .split([',', ';'])
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(", ");
            meta.set(keys::KEYWORDS, &joined);
        }

        Ok(meta)
    }

    fn extract_cover(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        let doc = load(path)?;
        Ok(first_page_images(&doc).into_iter().find_map(encoded_image))
    }
}
