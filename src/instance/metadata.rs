//! Optional per-job metadata printed by a job's `metadata` script.

use serde::Deserialize;

/// Custom artifact names a job may declare.
///
/// ```yaml
/// backup_name: shared-db
/// restore_name: shared-db
/// ```
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct Metadata {
    /// Artifact name used when backing up.
    pub backup_name: Option<String>,
    /// Artifact name used when restoring.
    pub restore_name: Option<String>,
}

impl Metadata {
    /// Parses the YAML a metadata script prints. Blank output yields the
    /// default (no custom names).
    ///
    /// # Errors
    ///
    /// Returns the YAML error when the output is not a metadata document.
    pub fn parse(yaml: &str) -> Result<Self, serde_yaml::Error> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml)
    }

    /// Custom backup artifact name, ignoring blank values.
    #[must_use]
    pub fn backup_name(&self) -> Option<&str> {
        non_blank(self.backup_name.as_deref())
    }

    /// Custom restore artifact name, ignoring blank values.
    #[must_use]
    pub fn restore_name(&self) -> Option<&str> {
        non_blank(self.restore_name.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|name| !name.is_empty())
}
