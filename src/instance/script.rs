//! Lifecycle script classification.
//!
//! Scripts live at `/var/vcap/jobs/<job>/bin/bbr/<role>`. Exactly one
//! directory level sits between the jobs root and `bin/bbr`; anything nested
//! deeper is never a platform script, even with a matching file name.

use std::fmt;

/// Root under which every release job is installed.
pub const JOBS_ROOT: &str = "/var/vcap/jobs/";

const SCRIPT_DIRECTORY: &str = "bin/bbr/";

/// Lifecycle role of a script, derived from its file name.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ScriptRole {
    /// Writes the job's data into its artifact directory.
    Backup,
    /// Reads the job's data back from its artifact directory.
    Restore,
    /// Prints YAML describing custom artifact names.
    Metadata,
    /// Quiesces the job before any backup runs.
    PreBackupLock,
    /// Resumes the job after backup.
    PostBackupUnlock,
    /// Resumes the job after restore.
    PostRestoreUnlock,
    /// Anything outside the convention.
    NotPlatform,
}

impl ScriptRole {
    const PLATFORM: [(Self, &'static str); 6] = [
        (Self::Backup, "backup"),
        (Self::Restore, "restore"),
        (Self::Metadata, "metadata"),
        (Self::PreBackupLock, "pre-backup-lock"),
        (Self::PostBackupUnlock, "post-backup-unlock"),
        (Self::PostRestoreUnlock, "post-restore-unlock"),
    ];

    /// File name a script with this role carries, if it is a platform role.
    #[must_use]
    pub fn file_name(self) -> Option<&'static str> {
        Self::PLATFORM
            .iter()
            .find(|(role, _)| *role == self)
            .map(|(_, name)| *name)
    }

    fn classify(path: &str) -> Self {
        let Some((job, rest)) = path
            .strip_prefix(JOBS_ROOT)
            .and_then(|relative| relative.split_once('/'))
        else {
            return Self::NotPlatform;
        };
        if job.is_empty() {
            return Self::NotPlatform;
        }
        let Some(file) = rest.strip_prefix(SCRIPT_DIRECTORY) else {
            return Self::NotPlatform;
        };

        Self::PLATFORM
            .iter()
            .find(|(_, name)| *name == file)
            .map_or(Self::NotPlatform, |(role, _)| *role)
    }
}

/// Absolute path of a script on an instance.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Script(String);

impl Script {
    /// Wraps a remote path.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Remote path.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lifecycle role this path matches.
    #[must_use]
    pub fn role(&self) -> ScriptRole {
        ScriptRole::classify(&self.0)
    }

    /// Returns `true` when the path matches any lifecycle role.
    #[must_use]
    pub fn is_platform_script(&self) -> bool {
        self.role() != ScriptRole::NotPlatform
    }

    /// Job segment directly under the jobs root; empty when the path lies
    /// outside it.
    #[must_use]
    pub fn job_name(&self) -> &str {
        self.0
            .strip_prefix(JOBS_ROOT)
            .and_then(|relative| relative.split('/').next())
            .unwrap_or_default()
    }

    /// Final path segment.
    #[must_use]
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Script {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

/// Ordered collection of platform scripts.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BackupAndRestoreScripts(Vec<Script>);

impl BackupAndRestoreScripts {
    /// Classifies raw paths, keeping platform scripts in their original
    /// order and dropping everything else.
    #[must_use]
    pub fn from_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        paths
            .into_iter()
            .map(Script::new)
            .filter(Script::is_platform_script)
            .collect()
    }

    /// Scripts with the given role, in order.
    #[must_use]
    pub fn with_role(&self, role: ScriptRole) -> Self {
        self.0
            .iter()
            .filter(|script| script.role() == role)
            .cloned()
            .collect()
    }

    /// `backup` scripts.
    #[must_use]
    pub fn backup_only(&self) -> Self {
        self.with_role(ScriptRole::Backup)
    }

    /// `restore` scripts.
    #[must_use]
    pub fn restore_only(&self) -> Self {
        self.with_role(ScriptRole::Restore)
    }

    /// `metadata` scripts.
    #[must_use]
    pub fn metadata_only(&self) -> Self {
        self.with_role(ScriptRole::Metadata)
    }

    /// `pre-backup-lock` scripts.
    #[must_use]
    pub fn pre_backup_lock_only(&self) -> Self {
        self.with_role(ScriptRole::PreBackupLock)
    }

    /// `post-backup-unlock` scripts.
    #[must_use]
    pub fn post_backup_unlock_only(&self) -> Self {
        self.with_role(ScriptRole::PostBackupUnlock)
    }

    /// `post-restore-unlock` scripts.
    #[must_use]
    pub fn post_restore_unlock_only(&self) -> Self {
        self.with_role(ScriptRole::PostRestoreUnlock)
    }

    /// First `post-restore-unlock` script, if any.
    #[must_use]
    pub fn single_post_restore_unlock_script(&self) -> Option<Script> {
        self.first_with_role(ScriptRole::PostRestoreUnlock)
    }

    /// First script with the given role, if any.
    #[must_use]
    pub fn first_with_role(&self, role: ScriptRole) -> Option<Script> {
        self.0.iter().find(|script| script.role() == role).cloned()
    }

    /// Iterates over the scripts in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Script> {
        self.0.iter()
    }

    /// Number of scripts.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when there are no scripts.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Script> for BackupAndRestoreScripts {
    fn from_iter<T: IntoIterator<Item = Script>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a BackupAndRestoreScripts {
    type Item = &'a Script;
    type IntoIter = std::slice::Iter<'a, Script>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
