//! CBZ (Comic Book ZIP) format handler.

use crate::error::Result;
use crate::formats::{ExtractedMetadata, FormatHandler, keys};
use std::cmp::Ordering;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use zip::ZipArchive;

const PAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];
const COMIC_INFO: &str = "ComicInfo.xml";

/// ComicInfo elements mapped to metadata keys.
const COMIC_INFO_KEYS: [(&str, &str); 6] = [
    ("Title", keys::TITLE),
    ("Writer", keys::AUTHOR),
    ("Summary", keys::SUBJECT),
    ("Publisher", keys::PUBLISHER),
    ("LanguageISO", keys::LANGUAGE),
    ("Year", keys::DATE),
];

/// Handler for CBZ files (and similar comic book archives).
pub struct CbzHandler;

fn open(path: &Path) -> Result<ZipArchive<File>> {
    Ok(ZipArchive::new(File::open(path)?)?)
}

fn is_page(entry: &str) -> bool {
    if entry.starts_with("__MACOSX/") || entry.ends_with('/') {
        return false;
    }
    Path::new(entry)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| PAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Page entries in reading order.
fn pages(archive: &ZipArchive<File>) -> Vec<String> {
    let mut pages: Vec<(Vec<Chunk>, String)> = archive
        .file_names()
        .filter(|name| is_page(name))
        .map(|name| (sort_key(name), name.to_string()))
        .collect();
    pages.sort();
    pages.into_iter().map(|(_, name)| name).collect()
}

/// Piece of a natural sort key: digit runs compare by value.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Chunk {
    Number(u64),
    Text(String),
}

fn sort_key(name: &str) -> Vec<Chunk> {
    let mut key = Vec::new();
    let mut rest = name;
    while let Some(first) = rest.chars().next() {
        let digit = first.is_ascii_digit();
        let end = rest
            .find(|c: char| c.is_ascii_digit() != digit)
            .unwrap_or(rest.len());
        let (run, tail) = rest.split_at(end);
        key.push(if digit {
            Chunk::Number(run.parse().unwrap_or(u64::MAX))
        } else {
            Chunk::Text(run.to_lowercase())
        });
        rest = tail;
    }
    key
}

fn natural_cmp(a: &str, b: &str) -> Ordering {
    sort_key(a).cmp(&sort_key(b))
}

/// Fields of an embedded `ComicInfo.xml`.
fn parse_comic_info(content: &str, meta: &mut ExtractedMetadata) -> Result<()> {
    let doc = roxmltree::Document::parse(content)?;
    for node in doc.root_element().children().filter(|n| n.is_element()) {
        let name = node.tag_name().name();
        let Some(text) = node.text() else { continue };
        if let Some((_, key)) = COMIC_INFO_KEYS.iter().find(|(tag, _)| *tag == name) {
            meta.set(key, text);
        }
    }
    Ok(())
}

impl FormatHandler for CbzHandler {
    fn extract_metadata(&self, path: &Path) -> Result<ExtractedMetadata> {
        let mut archive = open(path)?;
        let mut meta = ExtractedMetadata {
            page_count: Some(pages(&archive).len() as u32),
            ..Default::default()
        };

        if let Ok(mut entry) = archive.by_name(COMIC_INFO) {
            let mut content = String::new();
            entry.read_to_string(&mut content)?;
            if let Err(e) = parse_comic_info(&content, &mut meta) {
                tracing::warn!(path = %path.display(), error = %e, "Unreadable ComicInfo.xml");
            }
        }

        Ok(meta)
    }

    fn extract_cover(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        let mut archive = open(path)?;
        let Some(first) = pages(&archive).into_iter().next() else {
            return Ok(None);
        };

        let mut data = Vec::new();
        archive.by_name(&first)?.read_to_end(&mut data)?;
        Ok(Some(data))
    }
}
