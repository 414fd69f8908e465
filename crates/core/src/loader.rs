use crate::error::IngestError;
use crate::models::{DocType, Document, Metadata, Scalar};
use crate::preprocess::normalize_whitespace;
use lopdf::Document as PdfFile;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

pub trait PdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError>;
}

#[derive(Debug, Default)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let document =
            PdfFile::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;

            if !text.trim().is_empty() {
                pages.push(PageText {
                    number: page_no,
                    text,
                });
            }
        }

        if pages.is_empty() {
            return Err(IngestError::PdfParse(format!(
                "pdf had no readable page text: {}",
                path.display()
            )));
        }

        Ok(pages)
    }
}

#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct LoadReport {
    pub documents: Vec<Document>,
    pub skipped: Vec<SkippedFile>,
}

impl LoadReport {
    pub fn merge(&mut self, other: LoadReport) {
        self.documents.extend(other.documents);
        self.skipped.extend(other.skipped);
    }
}

pub fn discover_files(folder: &Path, extension: &str) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let matches = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(extension));

        if matches {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn digest_file(path: &Path) -> Result<String, IngestError> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

fn file_name(path: &Path) -> Result<String, IngestError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))
}

fn generate_document_id(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    format!("{:x}", hasher.finalize())
}

fn base_metadata(doc_type: DocType, source: &str) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("doc_type".to_string(), doc_type.as_str().into());
    metadata.insert("source".to_string(), source.into());
    metadata
}

pub fn load_pdf<X: PdfExtractor>(extractor: &X, path: &Path) -> Result<Document, IngestError> {
    let source = file_name(path)?;
    let checksum = digest_file(path)?;
    let pages = extractor.extract_pages(path)?;

    let content = pages
        .iter()
        .map(|page| normalize_whitespace(&page.text))
        .collect::<Vec<_>>()
        .join("\n");

    let mut metadata = base_metadata(DocType::Pdf, &source);
    metadata.insert("page_count".to_string(), Scalar::Integer(pages.len() as i64));
    metadata.insert("checksum".to_string(), Scalar::Text(checksum));

    Ok(Document {
        id: generate_document_id(path),
        content,
        metadata,
        source,
        doc_type: DocType::Pdf,
    })
}

pub fn load_pdf_folder<X: PdfExtractor>(extractor: &X, folder: &Path) -> LoadReport {
    let mut report = LoadReport::default();

    for path in discover_files(folder, "pdf") {
        match load_pdf(extractor, &path) {
            Ok(document) => report.documents.push(document),
            Err(error) => {
                warn!(path = %path.display(), %error, "skipping pdf");
                report.skipped.push(SkippedFile {
                    path,
                    reason: error.to_string(),
                });
            }
        }
    }

    info!(
        folder = %folder.display(),
        documents = report.documents.len(),
        skipped = report.skipped.len(),
        "loaded pdf folder"
    );
    report
}

pub fn load_csv(path: &Path, text_field: &str) -> Result<LoadReport, IngestError> {
    let source = file_name(path)?;
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();

    let text_column = headers
        .iter()
        .position(|header| header.trim() == text_field)
        .ok_or_else(|| {
            IngestError::Schema(format!("column '{text_field}' not found in {source}"))
        })?;

    let mut report = LoadReport::default();
    for (row_index, row) in reader.records().enumerate() {
        let row = row?;
        let content = row.get(text_column).unwrap_or_default().trim().to_string();
        // Header is line 1.
        let line = row_index + 2;

        if content.is_empty() {
            report.skipped.push(SkippedFile {
                path: path.to_path_buf(),
                reason: format!("line {line}: empty '{text_field}' cell"),
            });
            continue;
        }

        let mut metadata = Metadata::new();
        for (header, cell) in headers.iter().zip(row.iter()) {
            metadata.insert(header.trim().to_string(), Scalar::infer(cell));
        }
        metadata.extend(base_metadata(DocType::Csv, &source));

        report.documents.push(Document {
            id: Uuid::new_v4().to_string(),
            content,
            metadata,
            source: source.clone(),
            doc_type: DocType::Csv,
        });
    }

    Ok(report)
}

pub fn load_csv_folder(folder: &Path, text_field: &str) -> LoadReport {
    let mut report = LoadReport::default();

    for path in discover_files(folder, "csv") {
        match load_csv(&path, text_field) {
            Ok(file_report) => report.merge(file_report),
            Err(error) => {
                warn!(path = %path.display(), %error, "skipping csv");
                report.skipped.push(SkippedFile {
                    path,
                    reason: error.to_string(),
                });
            }
        }
    }

    info!(
        folder = %folder.display(),
        documents = report.documents.len(),
        skipped = report.skipped.len(),
        "loaded csv folder"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::tempdir;

    struct FixedPages(Vec<&'static str>);

    impl PdfExtractor for FixedPages {
        fn extract_pages(&self, _path: &Path) -> Result<Vec<PageText>, IngestError> {
            Ok(self
                .0
                .iter()
                .enumerate()
                .map(|(index, text)| PageText {
                    number: index as u32 + 1,
                    text: text.to_string(),
                })
                .collect())
        }
    }

    #[test]
    fn discover_files_is_recursive_and_case_insensitive() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let nested = dir.path().join("nested");
        fs::create_dir(&nested)?;
        File::create(dir.path().join("a.pdf"))?.write_all(b"%PDF-1.4")?;
        File::create(nested.join("b.PDF"))?.write_all(b"%PDF-1.4")?;
        File::create(nested.join("c.csv"))?.write_all(b"x")?;

        assert_eq!(discover_files(dir.path(), "pdf").len(), 2);
        assert_eq!(discover_files(dir.path(), "csv").len(), 1);
        Ok(())
    }

    #[test]
    fn pdf_pages_become_one_document() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("policy.pdf");
        fs::write(&path, b"%PDF-1.4 stub")?;

        let extractor = FixedPages(vec!["Returns  are\naccepted", "within 30 days"]);
        let document = load_pdf(&extractor, &path)?;

        assert_eq!(document.content, "Returns are accepted\nwithin 30 days");
        assert_eq!(document.source, "policy.pdf");
        assert_eq!(document.doc_type, DocType::Pdf);
        assert_eq!(document.metadata["page_count"], Scalar::Integer(2));
        assert_eq!(document.metadata["checksum"], Scalar::Text(digest_file(&path)?));
        assert_eq!(document.id, generate_document_id(&path));
        Ok(())
    }

    #[test]
    fn unreadable_pdfs_are_skipped_with_a_reason() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("broken.pdf"), b"%PDF-1.4\n%broken")?;

        let report = load_pdf_folder(&LopdfExtractor, dir.path());
        assert!(report.documents.is_empty());
        assert_eq!(report.skipped.len(), 1);
        assert!(!report.skipped[0].reason.is_empty());
        Ok(())
    }

    #[test]
    fn csv_rows_become_typed_documents() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("products.csv");
        fs::write(
            &path,
            "sku,description,price,in_stock\n00742,Blue kettle,19.5,true\n00743,,4,false\n",
        )?;

        let report = load_csv(&path, "description")?;
        assert_eq!(report.documents.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].reason.contains("line 3"));

        let document = &report.documents[0];
        assert_eq!(document.content, "Blue kettle");
        assert_eq!(document.source, "products.csv");
        assert_eq!(document.metadata["sku"], Scalar::Text("00742".to_string()));
        assert_eq!(document.metadata["price"], Scalar::Float(19.5));
        assert_eq!(document.metadata["in_stock"], Scalar::Bool(true));
        assert_eq!(document.metadata["doc_type"], Scalar::Text("csv".to_string()));
        Ok(())
    }

    #[test]
    fn csv_without_text_column_is_skipped() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("a.csv"), "name,price\nkettle,3\n")?;
        fs::write(dir.path().join("b.csv"), "description\nToaster\n")?;

        let report = load_csv_folder(dir.path(), "description");
        assert_eq!(report.documents.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].reason.contains("description"));
        Ok(())
    }
}
