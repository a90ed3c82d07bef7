//! Ground-truth annotation sheet (`ground_truth.csv`).
//!
//! One row per image, keyed by the [`IMAGE_FILENAME_COLUMN`] column, with
//! one column per annotated field. Quoted cells may contain commas, escaped
//! quotes (`""`) and line breaks.

use std::collections::HashMap;
use std::path::Path;

use crate::fields::IMAGE_FILENAME_COLUMN;

#[derive(Debug, thiserror::Error)]
pub enum GroundTruthError {
    #[error("Failed to read ground truth: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ground truth is missing the '{0}' column")]
    MissingKeyColumn(&'static str),

    #[error("Unterminated quoted cell on line {0}")]
    UnterminatedQuote(usize),
}

/// Expected values for one image, keyed by CSV column.
#[derive(Debug, Clone, Default)]
pub struct GroundTruthRow {
    values: HashMap<String, String>,
}

impl GroundTruthRow {
    /// Expected value for `column`; missing columns read as empty.
    pub fn get(&self, column: &str) -> &str {
        self.values.get(column).map(String::as_str).unwrap_or("")
    }
}

#[derive(Debug, Clone, Default)]
pub struct GroundTruth {
    rows: HashMap<String, GroundTruthRow>,
}

impl GroundTruth {
    pub fn load(path: &Path) -> Result<Self, GroundTruthError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, GroundTruthError> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let mut records = parse_records(text)?.into_iter();

        let Some(header) = records.next() else {
            return Err(GroundTruthError::MissingKeyColumn(IMAGE_FILENAME_COLUMN));
        };
        let header: Vec<String> = header.into_iter().map(|h| h.trim().to_string()).collect();
        let key_idx = header
            .iter()
            .position(|h| h == IMAGE_FILENAME_COLUMN)
            .ok_or(GroundTruthError::MissingKeyColumn(IMAGE_FILENAME_COLUMN))?;

        let mut rows = HashMap::new();
        for record in records {
            let Some(key) = record.get(key_idx).map(|k| k.trim().to_string()) else {
                continue;
            };
            if key.is_empty() {
                continue;
            }
            let values = header
                .iter()
                .cloned()
                .zip(record.into_iter().chain(std::iter::repeat(String::new())))
                .collect();
            rows.insert(key, GroundTruthRow { values });
        }

        Ok(Self { rows })
    }

    pub fn row(&self, image_filename: &str) -> Option<&GroundTruthRow> {
        self.rows.get(image_filename)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Split CSV text into records of cells.
fn parse_records(text: &str) -> Result<Vec<Vec<String>>, GroundTruthError> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut cell = String::new();
    let mut in_quotes = false;
    let mut line = 1;
    let mut quote_line = 0;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    cell.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    cell.push(c);
                }
                _ => cell.push(c),
            }
            continue;
        }

        match c {
            '"' if cell.is_empty() => {
                in_quotes = true;
                quote_line = line;
            }
            ',' => record.push(std::mem::take(&mut cell)),
            '\r' => {}
            '\n' => {
                line += 1;
                record.push(std::mem::take(&mut cell));
                if !(record.len() == 1 && record[0].is_empty()) {
                    records.push(std::mem::take(&mut record));
                } else {
                    record.clear();
                }
            }
            _ => cell.push(c),
        }
    }

    if in_quotes {
        return Err(GroundTruthError::UnterminatedQuote(quote_line));
    }
    if !cell.is_empty() || !record.is_empty() {
        record.push(cell);
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn parses_rows_keyed_by_image() {
        let csv = "Box Label,Barcode,Pack Date\nimg1.jpg,12345,2024-01-02\nimg2.jpg,999,\n";
        let gt = GroundTruth::parse(csv).unwrap();

        assert_eq!(gt.len(), 2);
        assert_eq!(gt.row("img1.jpg").unwrap().get("Barcode"), "12345");
        assert_eq!(gt.row("img2.jpg").unwrap().get("Pack Date"), "");
        assert!(gt.row("img3.jpg").is_none());
    }

    #[test]
    fn quoted_cells_keep_commas_quotes_and_newlines() {
        let csv = "Box Label,Facility Address,Meta Data\r\n\
                   a.jpg,\"12 Main St, Springfield\",\"say \"\"hi\"\"\nline two\"\r\n";
        let gt = GroundTruth::parse(csv).unwrap();
        let row = gt.row("a.jpg").unwrap();

        assert_eq!(row.get("Facility Address"), "12 Main St, Springfield");
        assert_eq!(row.get("Meta Data"), "say \"hi\"\nline two");
    }

    #[test]
    fn short_rows_read_missing_cells_as_empty() {
        let gt = GroundTruth::parse("Box Label,Barcode,Kill Date\na.jpg,1").unwrap();
        assert_eq!(gt.row("a.jpg").unwrap().get("Kill Date"), "");
        assert_eq!(gt.row("a.jpg").unwrap().get("Unknown"), "");
    }

    #[test]
    fn byte_order_mark_is_ignored() {
        let gt = GroundTruth::parse("\u{feff}Box Label,Barcode\na.jpg,7\n").unwrap();
        assert_eq!(gt.row("a.jpg").unwrap().get("Barcode"), "7");
    }

    #[test]
    fn missing_key_column_is_rejected() {
        assert_matches!(
            GroundTruth::parse("Image,Barcode\na.jpg,1\n"),
            Err(GroundTruthError::MissingKeyColumn(_))
        );
    }

    #[test]
    fn unterminated_quote_is_rejected() {
        assert_matches!(
            GroundTruth::parse("Box Label,Barcode\na.jpg,\"oops\n"),
            Err(GroundTruthError::UnterminatedQuote(2))
        );
    }
}
