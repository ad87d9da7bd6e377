//! Diagnostic reports for resolved values and failures.

use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FailureKind, ResolveError, Result};
use crate::image::{AddrSpace, Address, encode_hex};

/// Values that can list their named fields for a report.
pub trait Describe {
    fn fields(&self) -> Vec<Field>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub value: FieldValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldValue {
    Address {
        value: u32,
        space: AddrSpace,
        hex: String,
    },
    Missing,
    Text {
        text: String,
    },
    Bytes {
        hex: String,
    },
    Flag {
        set: bool,
    },
}

impl Field {
    pub fn address(name: &str, addr: Address) -> Self {
        Self {
            name: name.to_string(),
            value: FieldValue::Address {
                value: addr.value(),
                space: addr.space(),
                hex: addr.to_hex(),
            },
        }
    }

    pub fn optional_address(name: &str, addr: Option<Address>) -> Self {
        match addr {
            Some(addr) => Self::address(name, addr),
            None => Self {
                name: name.to_string(),
                value: FieldValue::Missing,
            },
        }
    }

    pub fn text(name: &str, text: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            value: FieldValue::Text { text: text.into() },
        }
    }

    pub fn bytes(name: &str, bytes: &[u8]) -> Self {
        Self {
            name: name.to_string(),
            value: FieldValue::Bytes {
                hex: encode_hex(bytes),
            },
        }
    }

    pub fn flag(name: &str, set: bool) -> Self {
        Self {
            name: name.to_string(),
            value: FieldValue::Flag { set },
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Address { value, space, .. } => {
                write!(f, "0x{:08X} ({})", value, space)
            }
            FieldValue::Missing => write!(f, "-"),
            FieldValue::Text { text } => write!(f, "{}", text),
            FieldValue::Bytes { hex } => write!(f, "{}", hex),
            FieldValue::Flag { set } => write!(f, "{}", set),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Resolved { fields: Vec<Field> },
    Failed { kind: FailureKind, message: String },
}

/// Self-check result for one resolver (or the facts).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub name: String,
    pub outcome: Outcome,
}

impl Report {
    pub fn resolved(name: &str, fields: Vec<Field>) -> Self {
        Self {
            name: name.to_string(),
            outcome: Outcome::Resolved { fields },
        }
    }

    pub fn failed(name: &str, err: &ResolveError) -> Self {
        Self {
            name: name.to_string(),
            outcome: Outcome::Failed {
                kind: err.kind(),
                message: err.to_string(),
            },
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.outcome, Outcome::Resolved { .. })
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        match &self.outcome {
            Outcome::Resolved { fields } => fields
                .iter()
                .find(|field| field.name == name)
                .map(|field| &field.value),
            Outcome::Failed { .. } => None,
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Outcome::Resolved { fields } => {
                writeln!(f, "{} = {{", self.name)?;
                for field in fields {
                    writeln!(f, "\t{} => {}", field.name, field.value)?;
                }
                write!(f, "}}")
            }
            Outcome::Failed { kind, message } => {
                write!(f, "{} failed ({}): {}", self.name, kind, message)
            }
        }
    }
}

pub fn save_reports<P: AsRef<Path>>(path: P, reports: &[Report]) -> Result<()> {
    let content = serde_json::to_string_pretty(reports)?;
    fs::write(path, content)?;
    Ok(())
}

pub fn load_reports<P: AsRef<Path>>(path: P) -> Result<Vec<Report>> {
    let content = fs::read_to_string(&path)?;
    let data = serde_json::from_str(&content)?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use tempfile::NamedTempFile;

    fn sample_reports() -> Vec<Report> {
        vec![
            Report::resolved(
                "WINMGR",
                vec![
                    Field::address("value", Address::virt(0x0101_2345)),
                    Field::bytes("mov_ecx", &[0xB9, 0x45, 0x23, 0x01, 0x01]),
                ],
            ),
            Report::failed(
                "LANGTYPE",
                &ResolveError::new(
                    "LANGTYPE",
                    Error::PostconditionMissing("g_serviceType not assigned".into()),
                ),
            ),
        ]
    }

    #[test]
    fn test_reports_save_and_load() {
        let temp_file = NamedTempFile::new().unwrap();
        let reports = sample_reports();

        save_reports(temp_file.path(), &reports).unwrap();
        let loaded = load_reports(temp_file.path()).unwrap();
        assert_eq!(loaded, reports);
    }

    #[test]
    fn test_report_display() {
        let reports = sample_reports();
        assert_eq!(
            reports[0].to_string(),
            "WINMGR = {\n\tvalue => 0x01012345 (Virtual)\n\tmov_ecx => B9 45 23 01 01\n}"
        );
        assert_eq!(
            reports[1].to_string(),
            "LANGTYPE failed (PostconditionMissing): LANGTYPE - g_serviceType not assigned"
        );
    }

    #[test]
    fn test_report_field_lookup() {
        let reports = sample_reports();
        assert!(matches!(
            reports[0].field("value"),
            Some(FieldValue::Address { value: 0x0101_2345, .. })
        ));
        assert!(reports[1].field("value").is_none());
        assert!(!reports[1].is_resolved());
    }
}
