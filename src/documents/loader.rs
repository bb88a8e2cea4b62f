//! Document Loading
//!
//! Reads raw documents from an ingestion directory. PDFs become one Document
//! per page. Text files carrying form-feed page breaks (what `pdftotext`
//! emits) are split the same way.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Maximum file size (50 MB) accepted for ingestion.
const MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Maximum recursion depth when scanning the documents directory.
const MAX_SCAN_DEPTH: u32 = 10;

/// Page separator emitted by text extractors.
const PAGE_BREAK: char = '\x0c';

/// File extensions accepted for ingestion.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "txt", "text", "md", "markdown"];

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Documents directory not found: {0}")]
    MissingDirectory(String),
    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),
    #[error("File too large: {0} bytes (max {1} bytes)")]
    FileTooLarge(u64, u64),
    #[error("Failed to extract PDF text from {path}: {reason}")]
    Pdf { path: String, reason: String },
}

/// Raw extracted text plus its provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Stable identifier: the source, suffixed with `#page` when paginated
    pub id: String,
    /// Path of the file this text came from
    pub source: String,
    /// 0-based page number for paginated sources
    pub page: Option<u32>,
    pub text: String,
}

impl Document {
    pub fn new(source: impl Into<String>, page: Option<u32>, text: impl Into<String>) -> Self {
        let source = source.into();
        let id = match page {
            Some(p) => format!("{}#{}", source, p),
            None => source.clone(),
        };
        Self { id, source, page, text: text.into() }
    }
}

/// Whether a path has an ingestible extension.
pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}

/// List the ingestible files under `dir`, sorted by path.
pub fn list_source_files(dir: &Path) -> Result<Vec<PathBuf>, LoaderError> {
    if !dir.is_dir() {
        return Err(LoaderError::MissingDirectory(dir.display().to_string()));
    }
    let mut files = Vec::new();
    collect_files(dir, MAX_SCAN_DEPTH, &mut files)?;
    files.sort();
    Ok(files)
}

fn collect_files(dir: &Path, remaining_depth: u32, out: &mut Vec<PathBuf>) -> Result<(), LoaderError> {
    if remaining_depth == 0 {
        return Ok(());
    }

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();

        // Skip hidden files/directories
        if name.starts_with('.') {
            continue;
        }

        let path = entry.path();
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            collect_files(&path, remaining_depth - 1, out)?;
        } else if metadata.is_file() && is_supported(&path) {
            out.push(path);
        }
    }
    Ok(())
}

/// Load one file into its Documents (one per non-blank page).
pub fn load_file(path: &Path) -> Result<Vec<Document>, LoaderError> {
    if !is_supported(path) {
        return Err(LoaderError::UnsupportedType(path.display().to_string()));
    }
    let file_size = fs::metadata(path)?.len();
    if file_size > MAX_FILE_SIZE {
        return Err(LoaderError::FileTooLarge(file_size, MAX_FILE_SIZE));
    }

    let source = path.to_string_lossy().to_string();
    let documents = if is_pdf(path) {
        load_pdf(path, &source)?
    } else {
        split_pages(&source, &fs::read_to_string(path)?)
    };
    debug!(source = %source, pages = documents.len(), "Loaded document");
    Ok(documents)
}

fn is_pdf(path: &Path) -> bool {
    path.extension().is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

/// One Document per non-blank page, numbered from 0.
fn load_pdf(path: &Path, source: &str) -> Result<Vec<Document>, LoaderError> {
    let bytes = fs::read(path)?;
    let pages = pdf_extract::extract_text_from_mem_by_pages(&bytes).map_err(|e| LoaderError::Pdf {
        path: source.to_string(),
        reason: e.to_string(),
    })?;

    Ok(pages
        .into_iter()
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(i, text)| Document::new(source, Some(i as u32), text))
        .collect())
}

/// Load every supported file under `dir`. Any failure aborts the load.
pub fn load_directory(dir: &Path) -> Result<Vec<Document>, LoaderError> {
    let mut documents = Vec::new();
    for path in list_source_files(dir)? {
        documents.extend(load_file(&path)?);
    }
    Ok(documents)
}

fn split_pages(source: &str, content: &str) -> Vec<Document> {
    if !content.contains(PAGE_BREAK) {
        if content.trim().is_empty() {
            return Vec::new();
        }
        return vec![Document::new(source, None, content)];
    }

    content
        .split(PAGE_BREAK)
        .enumerate()
        .filter(|(_, page)| !page.trim().is_empty())
        .map(|(i, page)| Document::new(source, Some(i as u32), page))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unpaginated_document() {
        let docs = split_pages("a.txt", "The sky is blue.");
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].page, None);
        assert_eq!(docs[0].id, "a.txt");
    }

    #[test]
    fn test_form_feed_pages() {
        let docs = split_pages("manual.txt", "page zero\x0c\x0c  \x0cpage three");
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].page, Some(0));
        assert_eq!(docs[1].page, Some(3));
        assert_eq!(docs[1].id, "manual.txt#3");
        assert_eq!(docs[1].text, "page three");
    }

    #[test]
    fn test_blank_file_yields_nothing() {
        assert!(split_pages("blank.txt", " \n\t").is_empty());
    }

    #[test]
    fn test_list_source_files_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.md"), "bee").unwrap();
        fs::write(dir.path().join("a.txt"), "ay").unwrap();
        fs::write(dir.path().join("image.png"), "nope").unwrap();
        fs::write(dir.path().join(".hidden.txt"), "secret").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested/c.txt"), "sea").unwrap();

        let files = list_source_files(dir.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.md", "nested/c.txt"]);
    }

    #[test]
    fn test_missing_directory() {
        let err = list_source_files(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, LoaderError::MissingDirectory(_)));
    }

    /// Minimal PDF with one line of text per page.
    fn write_pdf(path: &Path, pages: &[&str]) {
        use lopdf::content::{Content, Operation};
        use lopdf::{dictionary, Object, Stream};

        let mut doc = lopdf::Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids = Vec::new();
        for text in pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![72.into(), 720.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => resources_id,
            });
            kids.push(Object::from(page_id));
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.save(path).unwrap();
    }

    #[test]
    fn test_pdf_one_document_per_page() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Manual.PDF");
        write_pdf(&path, &["Warranty", "Maintenance"]);

        assert_eq!(list_source_files(dir.path()).unwrap(), vec![path.clone()]);
        let docs = load_file(&path).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].page, Some(0));
        assert!(docs[0].text.contains("Warranty"));
        assert_eq!(docs[1].page, Some(1));
        assert!(docs[1].text.contains("Maintenance"));
        assert!(docs[1].id.ends_with("#1"));
    }

    #[test]
    fn test_unreadable_pdf_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pdf");
        fs::write(&path, "not a pdf").unwrap();
        assert!(matches!(load_file(&path), Err(LoaderError::Pdf { .. })));
    }

    #[test]
    fn test_load_file_rejects_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        fs::write(&path, "xx").unwrap();
        assert!(matches!(load_file(&path), Err(LoaderError::UnsupportedType(_))));
    }
}
