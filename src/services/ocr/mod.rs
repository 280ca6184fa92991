// OCR capability boundary
//
// The pipeline only sees `OcrEngine`; the bundled engine shells out to the
// tesseract CLI in TSV mode so that both the text and per-word boxes come back
// from a single invocation.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

use crate::core::config::OcrConfig;
use crate::core::errors::{OcrError, OcrResult};
use crate::core::languages::Language;
use crate::core::types::TextToken;

/// Raw recognizer output before any confidence filtering
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecognizedPage {
    /// Words joined by spaces, lines by newlines
    pub text: String,
    /// Every word token in reading order
    pub tokens: Vec<TextToken>,
}

#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(&self, image_path: &Path, language: Language) -> OcrResult<RecognizedPage>;
}

/// Tesseract CLI engine
pub struct TesseractOcr {
    command: String,
    page_segmentation_mode: u32,
}

impl TesseractOcr {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            command: config.command.clone(),
            page_segmentation_mode: config.page_segmentation_mode,
        }
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    async fn recognize(&self, image_path: &Path, language: Language) -> OcrResult<RecognizedPage> {
        let output = Command::new(&self.command)
            .arg(image_path)
            .arg("stdout")
            .arg("-l")
            .arg(language.tesseract_code())
            .arg("--psm")
            .arg(self.page_segmentation_mode.to_string())
            .arg("tsv")
            .output()
            .await
            .map_err(|source| OcrError::EngineUnavailable {
                command: self.command.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::EngineFailed(stderr.trim().to_string()));
        }

        let tsv = String::from_utf8_lossy(&output.stdout);
        let page = parse_tsv(&tsv)?;
        debug!(
            "tesseract recognized {} tokens in {}",
            page.tokens.len(),
            image_path.display()
        );
        Ok(page)
    }
}

/// Parse tesseract TSV output.
///
/// Only level-5 (word) rows carry text. Columns 6-9 are the box, 10 the
/// confidence (-1 for structural rows) and 11 the word itself.
pub fn parse_tsv(tsv: &str) -> OcrResult<RecognizedPage> {
    let mut lines = tsv.lines();
    match lines.next() {
        Some(header) if header.starts_with("level") => {}
        Some(other) => {
            return Err(OcrError::MalformedOutput(format!(
                "unexpected TSV header: {}",
                other.chars().take(40).collect::<String>()
            )))
        }
        None => return Ok(RecognizedPage::default()),
    }

    // (page, block, paragraph, line) keeps reading order when iterated
    let mut by_line: BTreeMap<(u32, u32, u32, u32), Vec<String>> = BTreeMap::new();
    let mut tokens = Vec::new();

    for row in lines {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 || cols[0] != "5" {
            continue;
        }
        let text = cols[11].trim();
        let confidence: f32 = cols[10].trim().parse().unwrap_or(-1.0);
        if text.is_empty() || confidence < 0.0 {
            continue;
        }

        let num = |i: usize| cols[i].trim().parse::<u32>().unwrap_or(0);
        let key = (num(1), num(2), num(3), num(4));
        by_line.entry(key).or_default().push(text.to_string());

        tokens.push(TextToken {
            text: text.to_string(),
            left: num(6),
            top: num(7),
            width: num(8),
            height: num(9),
            confidence,
        });
    }

    let text = by_line
        .values()
        .map(|words| words.join(" "))
        .collect::<Vec<_>>()
        .join("\n");

    Ok(RecognizedPage { text, tokens })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    #[test]
    fn test_parse_words_and_lines() {
        let tsv = format!(
            "{HEADER}\n\
             1\t1\t0\t0\t0\t0\t0\t0\t640\t480\t-1\t\n\
             4\t1\t1\t1\t1\t0\t40\t30\t200\t40\t-1\t\n\
             5\t1\t1\t1\t1\t1\t40\t30\t90\t40\t95.5\tHELLO\n\
             5\t1\t1\t1\t1\t2\t140\t30\t100\t40\t12.0\tW0RLD\n\
             5\t1\t1\t1\t2\t1\t40\t90\t60\t30\t88\tagain\n"
        );
        let page = parse_tsv(&tsv).unwrap();

        assert_eq!(page.text, "HELLO W0RLD\nagain");
        assert_eq!(page.tokens.len(), 3);
        assert_eq!(page.tokens[0].left, 40);
        assert_eq!(page.tokens[0].width, 90);
        assert_eq!(page.tokens[1].confidence, 12.0);
    }

    #[test]
    fn test_parse_skips_empty_words() {
        let tsv = format!("{HEADER}\n5\t1\t1\t1\t1\t1\t0\t0\t10\t10\t-1\t \n");
        let page = parse_tsv(&tsv).unwrap();
        assert!(page.text.is_empty());
        assert!(page.tokens.is_empty());
    }

    #[test]
    fn test_parse_empty_output() {
        assert_eq!(parse_tsv("").unwrap(), RecognizedPage::default());
    }

    #[test]
    fn test_parse_rejects_non_tsv() {
        assert!(matches!(
            parse_tsv("Error opening data file"),
            Err(OcrError::MalformedOutput(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_binary_is_engine_unavailable() {
        let engine = TesseractOcr {
            command: "definitely-not-tesseract-binary".to_string(),
            page_segmentation_mode: 3,
        };
        let result = engine
            .recognize(Path::new("missing.png"), Language::English)
            .await;
        assert!(matches!(result, Err(OcrError::EngineUnavailable { .. })));
    }
}
