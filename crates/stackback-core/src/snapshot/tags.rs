use chrono::NaiveDate;

use crate::registry::is_external_identifier;

pub const NAMESPACE_TAG: &str = "stackback";
pub const SELECTION_TAG: &str = "selective";
pub const EXTERNAL_TAG: &str = "external";

const DATE_TAG_FORMAT: &str = "%Y-%m-%d";

/// True for a name that would match one of the fixed or date tags. Such a
/// name cannot serve as a directory tag without widening its filter.
pub fn is_reserved(name: &str) -> bool {
    matches!(name, NAMESPACE_TAG | SELECTION_TAG | EXTERNAL_TAG)
        || NaiveDate::parse_from_str(name, DATE_TAG_FORMAT).is_ok()
}

/// Labels attached to every snapshot of one directory. The same set scopes
/// listing, verification and retention to that directory's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupTagSet {
    identifier: String,
    date: NaiveDate,
}

impl BackupTagSet {
    pub fn new(identifier: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            identifier: identifier.into(),
            date,
        }
    }

    pub fn for_today(identifier: impl Into<String>) -> Self {
        Self::new(identifier, chrono::Local::now().date_naive())
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn is_external(&self) -> bool {
        is_external_identifier(&self.identifier)
    }

    /// Tags in the order they are passed to the tool.
    pub fn tags(&self) -> Vec<String> {
        let mut tags = vec![
            NAMESPACE_TAG.to_string(),
            SELECTION_TAG.to_string(),
            self.identifier.clone(),
            self.date.format(DATE_TAG_FORMAT).to_string(),
        ];
        if self.is_external() {
            tags.push(EXTERNAL_TAG.to_string());
        }
        tags
    }

    /// Filter matching every snapshot of this directory, any date.
    pub fn filter(&self, host: Option<&str>) -> TagFilter {
        TagFilter {
            tags: vec![NAMESPACE_TAG.to_string(), self.identifier.clone()],
            host: host.map(str::to_string),
        }
    }
}

/// All listed tags must be present; `host` narrows to one machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagFilter {
    pub tags: Vec<String>,
    pub host: Option<String>,
}

impl TagFilter {
    /// The tool's AND-syntax: tags joined by commas in one value.
    pub fn joined(&self) -> String {
        self.tags.join(",")
    }
}
