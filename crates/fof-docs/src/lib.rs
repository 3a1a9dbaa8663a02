//! Plain-text extraction from supporting documents (PDF, Word, text).

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use quick_xml::events::Event;
use quick_xml::Reader as XmlReader;
use thiserror::Error;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "fof-docs";

pub const DOCUMENT_SEPARATOR: &str = "\n\n=== NEW DOCUMENT ===\n\n";

const WORD_BODY_PART: &str = "word/document.xml";

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("file not found: {0}")]
    NotFound(PathBuf),
    #[error("unsupported file type: {0}")]
    UnsupportedFormat(String),
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("extracting PDF text from {path}: {message}")]
    Pdf { path: PathBuf, message: String },
    #[error("extracting Word text from {path}: {message}")]
    Docx { path: PathBuf, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Word,
    Text,
}

impl DocumentKind {
    /// Case-insensitive dispatch on the file extension.
    pub fn from_path(path: &Path) -> Result<Self, DocumentError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => Ok(Self::Pdf),
            "docx" | "doc" => Ok(Self::Word),
            "txt" | "md" | "rst" => Ok(Self::Text),
            _ if ext.is_empty() => Err(DocumentError::UnsupportedFormat("(none)".to_string())),
            _ => Err(DocumentError::UnsupportedFormat(format!(".{ext}"))),
        }
    }
}

/// Result of a batch load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: usize,
    pub attempted: usize,
    pub failures: Vec<(PathBuf, String)>,
}

/// Reads a fixed list of files and keeps their text in load order.
#[derive(Debug, Clone, Default)]
pub struct DocumentReader {
    file_paths: Vec<PathBuf>,
    documents: Vec<(PathBuf, String)>,
}

impl DocumentReader {
    pub fn new<I, P>(file_paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            file_paths: file_paths.into_iter().map(Into::into).collect(),
            documents: Vec::new(),
        }
    }

    pub fn read_file(&self, path: impl AsRef<Path>) -> Result<String, DocumentError> {
        read_document(path.as_ref())
    }

    /// Reads every configured file; a failing file is reported and skipped.
    pub fn load_all(&mut self) -> LoadReport {
        let mut report = LoadReport {
            attempted: self.file_paths.len(),
            ..LoadReport::default()
        };
        for path in self.file_paths.clone() {
            match read_document(&path) {
                Ok(content) => {
                    info!(
                        path = %path.display(),
                        chars = content.chars().count(),
                        "loaded document"
                    );
                    self.store(path, content);
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to load document");
                    report.failures.push((path, err.to_string()));
                }
            }
        }
        report.loaded = self.documents.len();
        info!(loaded = report.loaded, attempted = report.attempted, "document load finished");
        report
    }

    pub fn get_content(&self, path: impl AsRef<Path>) -> Option<&str> {
        let path = path.as_ref();
        self.documents
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, content)| content.as_str())
    }

    pub fn documents(&self) -> impl Iterator<Item = (&Path, &str)> {
        self.documents
            .iter()
            .map(|(p, content)| (p.as_path(), content.as_str()))
    }

    pub fn get_all_content(&self) -> String {
        self.documents
            .iter()
            .map(|(_, content)| content.as_str())
            .collect::<Vec<_>>()
            .join(DOCUMENT_SEPARATOR)
    }

    fn store(&mut self, path: PathBuf, content: String) {
        match self.documents.iter_mut().find(|(p, _)| *p == path) {
            Some(entry) => entry.1 = content,
            None => self.documents.push((path, content)),
        }
    }
}

pub fn read_document(path: &Path) -> Result<String, DocumentError> {
    if !path.exists() {
        return Err(DocumentError::NotFound(path.to_path_buf()));
    }
    match DocumentKind::from_path(path)? {
        DocumentKind::Pdf => read_pdf(path),
        DocumentKind::Word => read_word(path),
        DocumentKind::Text => std::fs::read_to_string(path).map_err(|source| DocumentError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn read_pdf(path: &Path) -> Result<String, DocumentError> {
    pdf_extract::extract_text(path)
        .map(|text| text.trim().to_string())
        .map_err(|e| DocumentError::Pdf {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

fn read_word(path: &Path) -> Result<String, DocumentError> {
    let docx_err = |message: String| DocumentError::Docx {
        path: path.to_path_buf(),
        message,
    };
    let file = File::open(path).map_err(|source| DocumentError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| docx_err(e.to_string()))?;
    let mut xml = String::new();
    archive
        .by_name(WORD_BODY_PART)
        .map_err(|e| docx_err(e.to_string()))?
        .read_to_string(&mut xml)
        .map_err(|e| docx_err(e.to_string()))?;
    word_xml_text(&xml).map_err(docx_err)
}

/// Text runs of a WordprocessingML body, one line per paragraph.
pub fn word_xml_text(xml: &str) -> Result<String, String> {
    let mut reader = XmlReader::from_str(xml);
    let mut out = String::new();
    let mut in_text = false;
    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(e) if e.name().as_ref() == b"w:t" => in_text = true,
            Event::End(e) => match e.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" => out.push('\n'),
                _ => {}
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"w:tab" => out.push('\t'),
                b"w:br" | b"w:cr" => out.push('\n'),
                _ => {}
            },
            Event::Text(t) if in_text => {
                out.push_str(&t.unescape().map_err(|e| e.to_string())?);
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(out.trim().to_string())
}
