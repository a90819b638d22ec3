//! Multi-format resume text extraction

use regex::Regex;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use crate::error::{Error, Result};

/// File formats the parser stage understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Docx,
    PlainText,
}

impl FileKind {
    /// Detect the kind from a file name's extension
    pub fn from_file_name(file_name: &str) -> Result<Self> {
        let extension = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "pdf" => Ok(FileKind::Pdf),
            "docx" => Ok(FileKind::Docx),
            "txt" | "text" | "md" => Ok(FileKind::PlainText),
            "" => Err(Error::UnsupportedFileType(format!(
                "'{}' has no extension",
                file_name
            ))),
            other => Err(Error::UnsupportedFileType(other.to_string())),
        }
    }
}

/// Normalized text and its hash
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedText {
    pub text: String,
    /// Hex SHA-256 of `text`
    pub content_hash: String,
}

/// Resume text extractor
pub struct TextExtractor;

impl TextExtractor {
    /// Extract and normalize text from raw file bytes
    pub fn extract(file_name: &str, data: &[u8]) -> Result<ExtractedText> {
        let raw = match FileKind::from_file_name(file_name)? {
            FileKind::Pdf => Self::extract_pdf(file_name, data)?,
            FileKind::Docx => Self::extract_docx(file_name, data)?,
            FileKind::PlainText => String::from_utf8_lossy(data).into_owned(),
        };

        let text = normalize_whitespace(&raw);
        if text.is_empty() {
            return Err(Error::text_extraction(file_name, "document contains no text"));
        }

        let content_hash = hash_content(&text);
        Ok(ExtractedText { text, content_hash })
    }

    /// Run [`TextExtractor::extract`] on the blocking pool with a hard time limit
    pub async fn extract_with_timeout(
        file_name: &str,
        data: Vec<u8>,
        limit: Duration,
    ) -> Result<ExtractedText> {
        let name = file_name.to_string();
        run_with_limit(file_name, limit, move || Self::extract(&name, &data)).await
    }

    #[cfg(feature = "pdf")]
    fn extract_pdf(file_name: &str, data: &[u8]) -> Result<String> {
        pdf_extract::extract_text_from_mem(data)
            .map_err(|e| Error::text_extraction(file_name, e.to_string()))
    }

    #[cfg(not(feature = "pdf"))]
    fn extract_pdf(_file_name: &str, _data: &[u8]) -> Result<String> {
        Err(Error::UnsupportedFileType("pdf support is disabled".into()))
    }

    #[cfg(feature = "docx")]
    fn extract_docx(file_name: &str, data: &[u8]) -> Result<String> {
        let doc = docx_rs::read_docx(data)
            .map_err(|e| Error::text_extraction(file_name, e.to_string()))?;

        let mut content = String::new();
        for child in doc.document.children {
            if let docx_rs::DocumentChild::Paragraph(p) = child {
                for child in p.children {
                    if let docx_rs::ParagraphChild::Run(run) = child {
                        for child in run.children {
                            if let docx_rs::RunChild::Text(t) = child {
                                content.push_str(&t.text);
                            }
                        }
                    }
                }
                content.push('\n');
            }
        }
        Ok(content)
    }

    #[cfg(not(feature = "docx"))]
    fn extract_docx(_file_name: &str, _data: &[u8]) -> Result<String> {
        Err(Error::UnsupportedFileType("docx support is disabled".into()))
    }
}

/// Race a blocking extraction against `limit`; the first to finish wins
async fn run_with_limit<F>(file_name: &str, limit: Duration, extract: F) -> Result<ExtractedText>
where
    F: FnOnce() -> Result<ExtractedText> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(extract);

    match tokio::time::timeout(limit, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(Error::text_extraction(
            file_name,
            format!("extraction task failed: {}", join_error),
        )),
        Err(_) => {
            tracing::error!(file = %file_name, "Text extraction timed out after {:?}", limit);
            Err(Error::Timeout(format!(
                "text extraction of '{}' exceeded {:?}",
                file_name, limit
            )))
        }
    }
}

/// Collapse horizontal whitespace runs and blank-line runs, then trim
fn normalize_whitespace(text: &str) -> String {
    static SPACES: OnceLock<Regex> = OnceLock::new();
    static BLANK_LINES: OnceLock<Regex> = OnceLock::new();

    let spaces =
        SPACES.get_or_init(|| Regex::new(r"[ \t\u{00A0}\r\f\v]+").expect("Invalid regex"));
    let blank_lines =
        BLANK_LINES.get_or_init(|| Regex::new(r"\n(?: ?\n)+").expect("Invalid regex"));

    let text = spaces.replace_all(text, " ");
    let text = blank_lines.replace_all(&text, "\n\n");
    text.lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Hash content for deduplication
fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_normalized() {
        let extracted =
            TextExtractor::extract("cv.txt", b"  Skills:\t Go,   SQL \n\n\n\nRust  ").unwrap();
        assert_eq!(extracted.text, "Skills: Go, SQL\n\nRust");
        assert_eq!(extracted.content_hash.len(), 64);
    }

    #[test]
    fn test_same_text_same_hash() {
        let a = TextExtractor::extract("a.txt", b"Go  SQL").unwrap();
        let b = TextExtractor::extract("b.md", b"Go SQL\n").unwrap();
        assert_eq!(a.content_hash, b.content_hash);
    }

    #[test]
    fn test_unsupported_extension() {
        let err = TextExtractor::extract("photo.png", b"\x89PNG").unwrap_err();
        assert!(matches!(err, Error::UnsupportedFileType(_)));
        assert!(matches!(
            TextExtractor::extract("README", b"text"),
            Err(Error::UnsupportedFileType(_))
        ));
    }

    #[test]
    fn test_empty_document() {
        let err = TextExtractor::extract("blank.txt", b" \n\t ").unwrap_err();
        assert!(matches!(err, Error::TextExtraction { .. }));
    }

    #[tokio::test]
    async fn test_extract_with_timeout() {
        let extracted = TextExtractor::extract_with_timeout(
            "cv.TXT",
            b"Skills: Go".to_vec(),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(extracted.text, "Skills: Go");
    }

    #[tokio::test]
    async fn test_slow_extraction_times_out() {
        let err = run_with_limit("slow.pdf", Duration::from_millis(20), || {
            std::thread::sleep(Duration::from_millis(500));
            TextExtractor::extract("slow.txt", b"Skills: Go")
        })
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Timeout(_)));
        assert!(err.to_string().contains("slow.pdf"));
        assert!(!err.is_systemic());
    }

    #[tokio::test]
    async fn test_zero_limit_times_out() {
        let body = "Skills: Go, SQL\n".repeat(500_000).into_bytes();
        let err = TextExtractor::extract_with_timeout("big.txt", body, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }
}
