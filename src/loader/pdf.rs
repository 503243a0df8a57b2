//! PDF loader: one [`Document`] per page with extractable text.
use std::fs;
use std::path::Path;

use tracing::{debug, info, warn};

use super::{
    ContentType, Document, LoadError, Metadata, file_title, fingerprint, matching_files,
    normalize_path,
};

/// Load every PDF in `dir` matching `pattern`.
///
/// A missing directory yields an empty list. Files that cannot be read or
/// parsed are logged and skipped.
pub fn load_pdf_dir(dir: &Path, pattern: &str) -> Vec<Document> {
    let files = match matching_files(dir, pattern) {
        Ok(files) => files,
        Err(e) => {
            warn!("{e}");
            return Vec::new();
        }
    };

    let mut docs = Vec::new();
    for file in &files {
        match load_pdf_file(file) {
            Ok(pages) => docs.extend(pages),
            Err(e) => warn!("Skipping PDF: {e}"),
        }
    }

    info!(
        "Loaded {} page(s) from {} PDF file(s) in {}",
        docs.len(),
        files.len(),
        dir.display()
    );
    docs
}

/// Load a single PDF file, one document per non-empty page.
pub fn load_pdf_file(path: &Path) -> Result<Vec<Document>, LoadError> {
    let bytes = fs::read(path).map_err(|source| LoadError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;

    let pdf = lopdf::Document::load_mem(&bytes).map_err(|e| LoadError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let source_path = normalize_path(path);
    let title = file_title(path);
    let digest = fingerprint(&bytes);

    let mut docs = Vec::new();
    for page_number in pdf.get_pages().into_keys() {
        let text = match pdf.extract_text(&[page_number]) {
            Ok(text) => text,
            Err(e) => {
                warn!("{source_path}: page {page_number} has no extractable text: {e}");
                continue;
            }
        };

        if text.trim().is_empty() {
            debug!("{source_path}: page {page_number} is blank");
            continue;
        }

        let mut metadata = Metadata::new(source_path.clone(), title.clone(), ContentType::Pdf);
        metadata.page = Some(page_number);
        metadata.fingerprint = Some(digest.clone());
        docs.push(Document::new(text, metadata));
    }

    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{Object, Stream, dictionary};
    use tempfile::tempdir;

    /// Write a minimal PDF with one text line per page.
    fn write_pdf(path: &Path, pages: &[&str]) {
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

        let mut kids: Vec<Object> = Vec::new();
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
            let content_id =
                doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => resources_id,
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
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
    fn test_load_pdf_pages() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("privacy_act.pdf");
        write_pdf(&path, &["Article 15 Collection", "Article 16 Limitation"]);

        let docs = load_pdf_file(&path).unwrap();
        assert_eq!(docs.len(), 2);
        assert!(docs[0].content.contains("Article 15"));
        assert_eq!(docs[0].metadata.page, Some(1));
        assert_eq!(docs[1].metadata.page, Some(2));
        assert_eq!(docs[0].metadata.title, "privacy_act");
        assert_eq!(docs[0].metadata.content_type, ContentType::Pdf);
        assert!(docs[0].metadata.source_path.ends_with("privacy_act.pdf"));
        assert_eq!(docs[0].metadata.source, docs[0].metadata.source_path);
        assert!(docs[0].metadata.fingerprint.is_some());
        assert_eq!(docs[0].metadata.fingerprint, docs[1].metadata.fingerprint);
    }

    #[test]
    fn test_bad_pdf_is_skipped() {
        let dir = tempdir().unwrap();
        write_pdf(&dir.path().join("good.pdf"), &["Valid page text"]);
        std::fs::write(dir.path().join("broken.pdf"), b"definitely not a pdf").unwrap();

        let err = load_pdf_file(&dir.path().join("broken.pdf")).unwrap_err();
        assert!(matches!(err, LoadError::Parse { .. }));

        let docs = load_pdf_dir(dir.path(), "*.pdf");
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].metadata.title, "good");
    }

    #[test]
    fn test_missing_dir_yields_empty() {
        let dir = tempdir().unwrap();
        assert!(load_pdf_dir(&dir.path().join("legal_docs"), "*.pdf").is_empty());
    }
}
