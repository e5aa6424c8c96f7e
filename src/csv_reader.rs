use crate::error::{OutlierError, Result};
use csv::ReaderBuilder;
use std::io::Read;
use std::path::Path;

/// Field delimiter of an input table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Delimiter {
    #[default]
    Comma,
    Tab,
    Semicolon,
    Space,
}

impl Delimiter {
    #[must_use]
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Comma => b',',
            Self::Tab => b'\t',
            Self::Semicolon => b';',
            Self::Space => b' ',
        }
    }
}

/// Represents a parsed delimited file with headers and rows
#[derive(Debug, Clone)]
pub struct CsvData {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl CsvData {
    /// Parse a delimited file
    ///
    /// # Errors
    /// Returns error if the file cannot be opened or parsed
    pub fn from_file(path: &Path, delimiter: Delimiter) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file, delimiter)
    }

    /// Parse delimited text from any reader
    ///
    /// # Errors
    /// Returns error on malformed input or rows of the wrong width
    pub fn from_reader<R: Read>(reader: R, delimiter: Delimiter) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter.as_byte())
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(ToString::to_string)
            .collect();

        if headers.is_empty() || headers.iter().all(String::is_empty) {
            return Err(OutlierError::Table("Input has no header row".into()));
        }

        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result?;
            rows.push(record.iter().map(ToString::to_string).collect());
        }

        Ok(Self { headers, rows })
    }

    /// Get number of rows
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Get number of columns
    #[must_use]
    pub fn col_count(&self) -> usize {
        self.headers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("create temp file");
        file.write_all(content.as_bytes()).expect("write content");
        file
    }

    #[test]
    fn test_parse_csv() {
        let file = create_test_file("subject,hippocampus,amygdala\ns1,4000,1500\ns2,4100,1550");

        let data = CsvData::from_file(file.path(), Delimiter::Comma).expect("parse");

        assert_eq!(data.headers, vec!["subject", "hippocampus", "amygdala"]);
        assert_eq!(data.row_count(), 2);
        assert_eq!(data.col_count(), 3);
    }

    #[test]
    fn test_parse_semicolon() {
        let data = CsvData::from_reader("id;age\na;40\nb;51".as_bytes(), Delimiter::Semicolon)
            .expect("parse");

        assert_eq!(data.headers, vec!["id", "age"]);
        assert_eq!(data.rows[1], vec!["b", "51"]);
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let result = CsvData::from_reader("id,x\na,1,2".as_bytes(), Delimiter::Comma);
        assert!(matches!(result, Err(OutlierError::Csv(_))));
    }
}
