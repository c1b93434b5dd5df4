//! TXT and EPUB writers for assembled marker text.
//!
//! Both writers are atomic: the file is written next to its destination with
//! a `.tmp` suffix and renamed into place, so a failed or interrupted export
//! never leaves a truncated file behind.

use crate::config::OutputFormat;
use crate::error::ConversionError;
use crate::output::split_marked_text;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Book title used when the first page has no text.
pub const FALLBACK_TITLE: &str = "Converted Document";

pub const BOOK_AUTHOR: &str = "Scannio";

/// Characters of the first page used as the book title.
const TITLE_CHARS: usize = 40;

/// Write `text` in `format` to `path`.
pub async fn write_output(
    path: &Path,
    format: OutputFormat,
    text: &str,
) -> Result<(), ConversionError> {
    match format {
        OutputFormat::Text => write_text(path, text).await,
        OutputFormat::Epub => write_epub(path, text).await,
    }
}

/// Write the marker text verbatim.
pub async fn write_text(path: &Path, text: &str) -> Result<(), ConversionError> {
    write_atomic(path, text.as_bytes()).await?;
    info!("Wrote {} bytes of text to {}", text.len(), path.display());
    Ok(())
}

/// Write the marker text as an EPUB 3 book, one chapter per page.
pub async fn write_epub(path: &Path, text: &str) -> Result<(), ConversionError> {
    let book = EpubBook::from_marked_text(text);
    let bytes = book.to_bytes().map_err(|e| ConversionError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: std::io::Error::other(e),
    })?;
    write_atomic(path, &bytes).await?;
    info!(
        "Wrote EPUB '{}' ({} chapters) to {}",
        book.title,
        book.chapters.len(),
        path.display()
    );
    Ok(())
}

/// `<Desktop>/converted_<unix-millis>.<ext>`, falling back to the home
/// directory and then the current directory.
pub fn default_output_path(format: OutputFormat) -> PathBuf {
    let dir = dirs::desktop_dir()
        .filter(|d| d.is_dir())
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."));
    dir.join(format!(
        "converted_{}.{}",
        chrono::Utc::now().timestamp_millis(),
        format.extension()
    ))
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ConversionError> {
    let write_failed = |source: std::io::Error| ConversionError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp_path, bytes).await.map_err(write_failed)?;
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(write_failed(e));
    }
    debug!("Renamed {} into place", tmp_path.display());
    Ok(())
}

// ── EPUB ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    pub title: String,
    pub body: String,
}

/// A book built from marker text.
#[derive(Debug, Clone)]
pub struct EpubBook {
    pub title: String,
    pub author: String,
    pub chapters: Vec<Chapter>,
}

impl EpubBook {
    /// Pages with no text are skipped; the remaining ones become chapters
    /// `Page 1..n` in order.
    pub fn from_marked_text(text: &str) -> Self {
        let pages: Vec<String> = split_marked_text(text)
            .into_iter()
            .map(|(_, body)| body)
            .filter(|body| !body.is_empty())
            .collect();

        let title = pages
            .first()
            .map(|first| {
                first
                    .chars()
                    .take(TITLE_CHARS)
                    .map(|c| if c.is_whitespace() { ' ' } else { c })
                    .collect::<String>()
                    .trim()
                    .to_string()
            })
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| FALLBACK_TITLE.to_string());

        let chapters = pages
            .iter()
            .enumerate()
            .map(|(i, body)| Chapter {
                title: format!("Page {}", i + 1),
                body: body.trim().to_string(),
            })
            .collect();

        Self {
            title,
            author: BOOK_AUTHOR.to_string(),
            chapters,
        }
    }

    /// Serialize to an EPUB container.
    pub fn to_bytes(&self) -> zip::result::ZipResult<Vec<u8>> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        // Must be the first entry, uncompressed.
        zip.start_file("mimetype", stored)?;
        zip.write_all(b"application/epub+zip")?;

        zip.start_file("META-INF/container.xml", deflated)?;
        zip.write_all(CONTAINER_XML.as_bytes())?;

        zip.start_file("OEBPS/content.opf", deflated)?;
        zip.write_all(self.package_document().as_bytes())?;

        zip.start_file("OEBPS/nav.xhtml", deflated)?;
        zip.write_all(self.nav_document().as_bytes())?;

        for (i, chapter) in self.chapters.iter().enumerate() {
            zip.start_file(format!("OEBPS/{}", chapter_file(i)), deflated)?;
            zip.write_all(chapter_document(chapter).as_bytes())?;
        }

        Ok(zip.finish()?.into_inner())
    }

    fn package_document(&self) -> String {
        let modified = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
        let mut manifest = String::from(
            r#"    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
"#,
        );
        let mut spine = String::new();
        for i in 0..self.chapters.len() {
            manifest.push_str(&format!(
                "    <item id=\"page{n}\" href=\"{file}\" media-type=\"application/xhtml+xml\"/>\n",
                n = i + 1,
                file = chapter_file(i)
            ));
            spine.push_str(&format!("    <itemref idref=\"page{}\"/>\n", i + 1));
        }

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="book-id">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="book-id">urn:uuid:{id}</dc:identifier>
    <dc:title>{title}</dc:title>
    <dc:creator>{author}</dc:creator>
    <dc:language>und</dc:language>
    <meta property="dcterms:modified">{modified}</meta>
  </metadata>
  <manifest>
{manifest}  </manifest>
  <spine>
{spine}  </spine>
</package>
"#,
            id = uuid::Uuid::new_v4(),
            title = escape_xml(&self.title),
            author = escape_xml(&self.author),
        )
    }

    fn nav_document(&self) -> String {
        let items: String = self
            .chapters
            .iter()
            .enumerate()
            .map(|(i, c)| {
                format!(
                    "      <li><a href=\"{}\">{}</a></li>\n",
                    chapter_file(i),
                    escape_xml(&c.title)
                )
            })
            .collect();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head><title>{title}</title></head>
<body>
  <nav epub:type="toc">
    <ol>
{items}    </ol>
  </nav>
</body>
</html>
"#,
            title = escape_xml(&self.title),
        )
    }
}

const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#;

fn chapter_file(index: usize) -> String {
    format!("page-{}.xhtml", index + 1)
}

/// Blank-line separated blocks become paragraphs, single newlines `<br/>`.
fn chapter_document(chapter: &Chapter) -> String {
    let paragraphs: String = chapter
        .body
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            let lines: Vec<String> = p.lines().map(escape_xml).collect();
            format!("  <p>{}</p>\n", lines.join("<br/>"))
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml">
<head><title>{title}</title></head>
<body>
  <h1>{title}</h1>
{paragraphs}</body>
</html>
"#,
        title = escape_xml(&chapter.title),
    )
}

fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    const TEXT: &str =
        "\n--- Page 1 ---\nA Tale of Two Cities\n\nIt was the best of times\n--- Page 2 ---\n\n--- Page 3 ---\nFish & <chips>";

    #[test]
    fn book_skips_empty_pages_and_numbers_chapters() {
        let book = EpubBook::from_marked_text(TEXT);
        assert_eq!(book.title, "A Tale of Two Cities  It was the best of");
        assert_eq!(book.author, "Scannio");
        assert_eq!(
            book.chapters.iter().map(|c| c.title.as_str()).collect::<Vec<_>>(),
            vec!["Page 1", "Page 2"]
        );
        assert_eq!(book.chapters[1].body, "Fish & <chips>");
    }

    #[test]
    fn empty_text_gets_fallback_title() {
        let book = EpubBook::from_marked_text("\n--- Page 1 ---\n");
        assert_eq!(book.title, FALLBACK_TITLE);
        assert!(book.chapters.is_empty());
    }

    #[test]
    fn epub_container_layout() {
        let bytes = EpubBook::from_marked_text(TEXT).to_bytes().unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();

        {
            let first = archive.by_index(0).unwrap();
            assert_eq!(first.name(), "mimetype");
            assert_eq!(first.compression(), CompressionMethod::Stored);
        }

        let mut chapter = String::new();
        archive
            .by_name("OEBPS/page-2.xhtml")
            .unwrap()
            .read_to_string(&mut chapter)
            .unwrap();
        assert!(chapter.contains("<p>Fish &amp; &lt;chips&gt;</p>"));

        let mut opf = String::new();
        archive
            .by_name("OEBPS/content.opf")
            .unwrap()
            .read_to_string(&mut opf)
            .unwrap();
        assert!(opf.contains("<dc:creator>Scannio</dc:creator>"));
        assert!(opf.contains(r#"<itemref idref="page2"/>"#));
    }

    #[tokio::test]
    async fn text_export_is_verbatim_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.txt");
        write_output(&path, OutputFormat::Text, TEXT).await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), TEXT);
        assert!(!dir.path().join("nested").join("out.txt.tmp").exists());
    }

    #[test]
    fn default_path_uses_format_extension() {
        let path = default_output_path(OutputFormat::Epub);
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("converted_"));
        assert!(name.ends_with(".epub"));
    }
}
