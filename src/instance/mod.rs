//! Per-instance backup and restore orchestration.
//!
//! Discovery ([`JobFinder`]) turns the lifecycle scripts installed on one
//! instance into [`Jobs`]; [`DeployedInstance`] drives those jobs through the
//! lock, backup, unlock and restore phases; [`Artifact`] moves each job's
//! data to and from the instance as a tar stream.

use std::borrow::Cow;
use std::fmt;

use shell_escape::unix::escape;

mod artifact;
mod deployed_instance;
mod job;
mod job_finder;
mod jobs;
mod metadata;
mod script;

pub use artifact::{Artifact, BackupChecksum, parse_checksums};
pub use deployed_instance::DeployedInstance;
pub use job::{Job, LockState};
pub use job_finder::{FIND_SCRIPTS_COMMAND, JobFinder};
pub use jobs::{JobSelection, Jobs};
pub use metadata::Metadata;
pub use script::{BackupAndRestoreScripts, JOBS_ROOT, Script, ScriptRole};

/// Root under which every job's artifact directory is created.
pub const ARTIFACT_DIRECTORY: &str = "/var/vcap/store/bbr-backup";

/// Identifies one VM of an instance group.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct InstanceIdentifier {
    /// Instance group name.
    pub name: String,
    /// Index within the group.
    pub index: String,
    /// Unique instance id.
    pub id: String,
}

impl InstanceIdentifier {
    /// Builds an identifier from its parts.
    #[must_use]
    pub fn new(name: impl Into<String>, index: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index: index.into(),
            id: id.into(),
        }
    }
}

/// Renders as `name/id`, the form used in every log line.
impl fmt::Display for InstanceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.id)
    }
}

/// Full path of the artifact directory for `artifact_name`.
#[must_use]
pub fn artifact_directory(artifact_name: &str) -> String {
    format!("{ARTIFACT_DIRECTORY}/{artifact_name}")
}

fn shell_word(value: &str) -> Cow<'_, str> {
    escape(Cow::Borrowed(value))
}

#[cfg(test)]
mod tests;
