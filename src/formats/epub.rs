//! EPUB format handler.

use crate::error::{AppError, Result};
use crate::formats::{ExtractedMetadata, FormatHandler, OutlineEntry, keys};
use roxmltree::{Document, Node};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use zip::ZipArchive;

const NCX_MEDIA_TYPE: &str = "application/x-dtbncx+xml";

/// Handler for EPUB files.
pub struct EpubHandler;

/// Manifest references found while parsing the OPF.
#[derive(Default)]
struct OpfRefs {
    cover_href: Option<String>,
    ncx_href: Option<String>,
}

impl EpubHandler {
    /// Find the OPF file path from container.xml.
    fn find_opf_path(archive: &mut ZipArchive<File>) -> Result<String> {
        let mut container = archive.by_name("META-INF/container.xml")?;
        let mut content = String::new();
        container.read_to_string(&mut content)?;

        let doc = Document::parse(&content)?;

        doc.descendants()
            .find(|n| n.has_tag_name("rootfile"))
            .and_then(|n| n.attribute("full-path"))
            .map(String::from)
            .ok_or_else(|| AppError::InvalidFormat("No rootfile in container.xml".into()))
    }

    /// Read an archive entry relative to the OPF directory.
    fn read_entry(archive: &mut ZipArchive<File>, opf_dir: &str, href: &str) -> Result<Vec<u8>> {
        let full_path = if opf_dir.is_empty() {
            href.to_string()
        } else {
            format!("{}/{}", opf_dir.trim_end_matches('/'), href)
        };

        let actual_path = if archive.file_names().any(|n| n == full_path) {
            full_path
        } else {
            href.to_string()
        };

        let mut data = Vec::new();
        archive.by_name(&actual_path)?.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Open the archive and return it with the OPF directory and content.
    fn open(path: &Path) -> Result<(ZipArchive<File>, String, String)> {
        let file = File::open(path)?;
        let mut archive = ZipArchive::new(file)?;

        let opf_path = Self::find_opf_path(&mut archive)?;
        let opf_dir = opf_path
            .rsplit_once('/')
            .map(|(dir, _)| dir.to_string())
            .unwrap_or_default();

        let mut opf_content = String::new();
        archive
            .by_name(&opf_path)?
            .read_to_string(&mut opf_content)?;

        Ok((archive, opf_dir, opf_content))
    }

    /// Parse the OPF file into metadata fields and manifest references.
    fn parse_opf(content: &str, meta: &mut ExtractedMetadata) -> Result<OpfRefs> {
        let doc = Document::parse(content)?;
        let mut refs = OpfRefs::default();
        let mut cover_id: Option<String> = None;
        let mut authors: Vec<String> = Vec::new();
        let mut subjects: Vec<String> = Vec::new();

        for node in doc.descendants() {
            let text = node.text().map(str::trim).unwrap_or_default();
            match node.tag_name().name() {
                "title" if !meta.fields.contains_key(keys::TITLE) => meta.set(keys::TITLE, text),
                "creator" if !text.is_empty() => authors.push(text.to_string()),
                "description" => meta.set(keys::SUBJECT, text),
                "publisher" => meta.set(keys::PUBLISHER, text),
                "language" => meta.set(keys::LANGUAGE, text),
                "date" => meta.set(keys::DATE, text),
                "subject" if !text.is_empty() => subjects.push(text.to_string()),
                "identifier" if looks_like_isbn(text) => {
                    meta.set(keys::ISBN, text.trim_start_matches("urn:isbn:"))
                }
                "meta" if node.attribute("name") == Some("cover") => {
                    cover_id = node.attribute("content").map(String::from);
                }
                _ => {}
            }
        }

        meta.set(keys::AUTHOR, &authors.join(", "));
        meta.set(keys::KEYWORDS, &subjects.join(", "));

        let items: Vec<Node> = doc
            .descendants()
            .filter(|n| n.tag_name().name() == "item")
            .collect();

        refs.ncx_href = items
            .iter()
            .find(|n| n.attribute("media-type") == Some(NCX_MEDIA_TYPE))
            .and_then(|n| n.attribute("href"))
            .map(String::from);

        // Cover href from manifest, then common cover image names
        refs.cover_href = cover_id
            .as_deref()
            .and_then(|id| items.iter().find(|n| n.attribute("id") == Some(id)))
            .and_then(|n| n.attribute("href"))
            .map(String::from)
            .or_else(|| {
                items
                    .iter()
                    .filter_map(|n| n.attribute("href"))
                    .find(|href| {
                        let lower = href.to_lowercase();
                        lower.contains("cover")
                            && (lower.ends_with(".jpg")
                                || lower.ends_with(".jpeg")
                                || lower.ends_with(".png"))
                    })
                    .map(String::from)
            });

        Ok(refs)
    }

    /// Parse the NCX navigation map into an outline tree.
    fn parse_ncx(content: &str) -> Result<Vec<OutlineEntry>> {
        let doc = Document::parse(content)?;
        let Some(nav_map) = doc.descendants().find(|n| n.has_tag_name("navMap")) else {
            return Ok(Vec::new());
        };
        Ok(nav_points(nav_map))
    }

    /// Ensure image data is PNG format.
    fn ensure_png(data: Vec<u8>) -> Result<Vec<u8>> {
        if data.starts_with(&[0x89, b'P', b'N', b'G']) {
            return Ok(data);
        }

        let img = image::load_from_memory(&data)?;
        let mut png_data = Vec::new();
        img.write_to(
            &mut std::io::Cursor::new(&mut png_data),
            image::ImageFormat::Png,
        )?;

        Ok(png_data)
    }
}

/// Recursively collect the `navPoint` children of a node.
fn nav_points(parent: Node) -> Vec<OutlineEntry> {
    parent
        .children()
        .filter(|n| n.has_tag_name("navPoint"))
        .map(|point| {
            let title = point
                .children()
                .find(|n| n.has_tag_name("navLabel"))
                .and_then(|label| label.children().find(|n| n.has_tag_name("text")))
                .and_then(|text| text.text())
                .map(str::trim)
                .unwrap_or_default()
                .to_string();

            OutlineEntry {
                title,
                page: point.attribute("playOrder").and_then(|p| p.parse().ok()),
                children: nav_points(point),
            }
        })
        .filter(|entry| !entry.title.is_empty())
        .collect()
}

fn looks_like_isbn(text: &str) -> bool {
    let digits = text
        .trim_start_matches("urn:isbn:")
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == 'X')
        .count();
    digits == 10 || digits == 13
}

impl FormatHandler for EpubHandler {
    fn extract_metadata(&self, path: &Path) -> Result<ExtractedMetadata> {
        let (mut archive, opf_dir, opf_content) = Self::open(path)?;

        let mut meta = ExtractedMetadata::default();
        let refs = Self::parse_opf(&opf_content, &mut meta)?;

        if let Some(href) = refs.ncx_href {
            match Self::read_entry(&mut archive, &opf_dir, &href)
                .and_then(|bytes| Ok(String::from_utf8_lossy(&bytes).into_owned()))
                .and_then(|ncx| Self::parse_ncx(&ncx))
            {
                Ok(outline) => meta.outline = outline,
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "Failed to read NCX outline")
                }
            }
        }

        Ok(meta)
    }

    fn extract_cover(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        let (mut archive, opf_dir, opf_content) = Self::open(path)?;

        let mut scratch = ExtractedMetadata::default();
        let refs = Self::parse_opf(&opf_content, &mut scratch)?;

        match refs.cover_href {
            Some(href) => {
                let data = Self::read_entry(&mut archive, &opf_dir, &href)?;
                Ok(Some(Self::ensure_png(data)?))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_opf_fields() {
        let opf = r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <metadata>
    <dc:title>Linear Algebra</dc:title>
    <dc:creator>G. Strang</dc:creator>
    <dc:creator>Another Author</dc:creator>
    <dc:language>en</dc:language>
    <dc:identifier>9780980232776</dc:identifier>
    <dc:subject>Mathematics</dc:subject>
    <meta name="cover" content="cover-img"/>
  </metadata>
  <manifest>
    <item id="cover-img" href="images/front.jpg" media-type="image/jpeg"/>
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
  </manifest>
</package>"#;

        let mut meta = ExtractedMetadata::default();
        let refs = EpubHandler::parse_opf(opf, &mut meta).unwrap();

        assert_eq!(meta.get(keys::TITLE), Some("Linear Algebra"));
        assert_eq!(meta.get(keys::AUTHOR), Some("G. Strang, Another Author"));
        assert_eq!(meta.get(keys::ISBN), Some("9780980232776"));
        assert_eq!(meta.get(keys::KEYWORDS), Some("Mathematics"));
        assert_eq!(refs.cover_href.as_deref(), Some("images/front.jpg"));
        assert_eq!(refs.ncx_href.as_deref(), Some("toc.ncx"));
    }

    #[test]
    fn test_parse_ncx_nested() {
        let ncx = r#"<?xml version="1.0"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/">
  <navMap>
    <navPoint id="p1" playOrder="1">
      <navLabel><text>Vectors</text></navLabel>
      <navPoint id="p1-1" playOrder="2">
        <navLabel><text>Dot product</text></navLabel>
      </navPoint>
    </navPoint>
    <navPoint id="p2" playOrder="3">
      <navLabel><text>Matrices</text></navLabel>
    </navPoint>
  </navMap>
</ncx>"#;

        let outline = EpubHandler::parse_ncx(ncx).unwrap();
        assert_eq!(outline.len(), 2);
        assert_eq!(outline[0].title, "Vectors");
        assert_eq!(outline[0].children[0].title, "Dot product");
        assert_eq!(outline[0].children[0].page, Some(2));
        assert_eq!(outline[1].page, Some(3));
    }
}
