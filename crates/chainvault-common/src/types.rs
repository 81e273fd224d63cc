//! Types shared by the converter and the server

use serde::{Deserialize, Serialize};

use crate::error::VaultError;

/// Declared type of an uploaded source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Sql,
    Csv,
}

impl SourceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Sql => "sql",
            SourceFormat::Csv => "csv",
        }
    }

    /// Dashboard conversion type (`sql-to-json`, `csv-to-json`)
    pub fn conversion_type(&self) -> &'static str {
        match self {
            SourceFormat::Sql => "sql-to-json",
            SourceFormat::Csv => "csv-to-json",
        }
    }

    /// Parse a dashboard conversion type
    pub fn from_conversion_type(value: &str) -> Result<Self, VaultError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sql-to-json" => Ok(SourceFormat::Sql),
            "csv-to-json" => Ok(SourceFormat::Csv),
            other => Err(VaultError::UnknownFormat(other.to_string())),
        }
    }

    /// Infer the format from a file name, ignoring a trailing `.gz`
    pub fn from_file_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        let stem = lower.strip_suffix(".gz").unwrap_or(&lower);
        if stem.ends_with(".sql") {
            Some(SourceFormat::Sql)
        } else if stem.ends_with(".csv") {
            Some(SourceFormat::Csv)
        } else {
            None
        }
    }
}

impl std::str::FromStr for SourceFormat {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sql" => Ok(SourceFormat::Sql),
            "csv" => Ok(SourceFormat::Csv),
            other => SourceFormat::from_conversion_type(other),
        }
    }
}

impl std::fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Checksum algorithm type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChecksumAlgorithm {
    Sha256,
    Sha512,
}

impl std::fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChecksumAlgorithm::Sha256 => write!(f, "sha256"),
            ChecksumAlgorithm::Sha512 => write!(f, "sha512"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_type_round_trip() {
        for format in [SourceFormat::Sql, SourceFormat::Csv] {
            assert_eq!(SourceFormat::from_conversion_type(format.conversion_type()).unwrap(), format);
        }
        assert!(SourceFormat::from_conversion_type("xml-to-json").is_err());
    }

    #[test]
    fn test_from_file_name() {
        assert_eq!(SourceFormat::from_file_name("dump.SQL"), Some(SourceFormat::Sql));
        assert_eq!(SourceFormat::from_file_name("users.csv.gz"), Some(SourceFormat::Csv));
        assert_eq!(SourceFormat::from_file_name("notes.txt"), None);
    }

    #[test]
    fn test_from_str_accepts_both_spellings() {
        assert_eq!("csv".parse::<SourceFormat>().unwrap(), SourceFormat::Csv);
        assert_eq!("sql-to-json".parse::<SourceFormat>().unwrap(), SourceFormat::Sql);
    }
}
