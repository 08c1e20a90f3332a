//! The jobs discovered on one instance.

use std::collections::BTreeMap;

use crate::logger::SharedLogger;
use crate::ssh::SshConnection;

use super::job::Job;
use super::metadata::Metadata;
use super::script::{BackupAndRestoreScripts, Script};

/// Jobs on one instance, in the order their scripts were discovered.
#[derive(Clone, Debug)]
pub struct Jobs<C>(Vec<Job<C>>);

impl<C: SshConnection + Clone> Jobs<C> {
    /// Groups `scripts` by job name in first-seen order and builds one job
    /// per group. Jobs missing from `metadata` get default metadata.
    #[must_use]
    pub fn new(
        connection: &C,
        instance_identifier: &str,
        logger: &SharedLogger,
        scripts: &BackupAndRestoreScripts,
        metadata: &BTreeMap<String, Metadata>,
    ) -> Self {
        let mut groups: Vec<(&str, Vec<Script>)> = Vec::new();
        for script in scripts {
            let job_name = script.job_name();
            match groups.iter_mut().find(|(name, _)| *name == job_name) {
                Some((_, group)) => group.push(script.clone()),
                None => groups.push((job_name, vec![script.clone()])),
            }
        }

        groups
            .into_iter()
            .filter_map(|(name, group)| {
                Job::new(
                    connection.clone(),
                    instance_identifier,
                    SharedLogger::clone(logger),
                    &group.into_iter().collect(),
                    metadata.get(name).cloned().unwrap_or_default(),
                )
            })
            .collect()
    }
}

impl<C: SshConnection> Jobs<C> {
    /// Jobs with a `backup` script.
    #[must_use]
    pub fn backupable(&self) -> JobSelection<'_, C> {
        self.0.iter().filter(|job| job.has_backup()).collect()
    }

    /// Jobs with a `restore` script.
    #[must_use]
    pub fn restorable(&self) -> JobSelection<'_, C> {
        self.0.iter().filter(|job| job.has_restore()).collect()
    }

    /// Returns `true` when any job has a `backup` script.
    #[must_use]
    pub fn any_are_backupable(&self) -> bool {
        self.0.iter().any(Job::has_backup)
    }

    /// Returns `true` when any job has a `restore` script.
    #[must_use]
    pub fn any_are_restorable(&self) -> bool {
        self.0.iter().any(Job::has_restore)
    }

    /// Returns `true` when a backupable job lacks a custom backup name, so a
    /// default-named artifact is also needed.
    #[must_use]
    pub fn any_need_default_artifacts_for_backup(&self) -> bool {
        self.0
            .iter()
            .any(|job| job.has_backup() && !job.has_named_backup_artifact())
    }

    /// Returns `true` when a restorable job lacks a custom restore name.
    #[must_use]
    pub fn any_need_default_artifacts_for_restore(&self) -> bool {
        self.0
            .iter()
            .any(|job| job.has_restore() && !job.has_named_restore_artifact())
    }

    /// Custom backup artifact names, in job order.
    #[must_use]
    pub fn custom_backup_artifact_names(&self) -> Vec<&str> {
        self.0.iter().filter_map(Job::backup_artifact_name).collect()
    }

    /// Custom restore artifact names, in job order.
    #[must_use]
    pub fn custom_restore_artifact_names(&self) -> Vec<&str> {
        self.0.iter().filter_map(Job::restore_artifact_name).collect()
    }
}

impl<C> Jobs<C> {
    /// Iterates over the jobs in discovery order.
    pub fn iter(&self) -> std::slice::Iter<'_, Job<C>> {
        self.0.iter()
    }

    /// Iterates mutably over the jobs in discovery order.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Job<C>> {
        self.0.iter_mut()
    }

    /// Number of jobs.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when the instance has no jobs.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<C> Default for Jobs<C> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<C> FromIterator<Job<C>> for Jobs<C> {
    fn from_iter<T: IntoIterator<Item = Job<C>>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a, C> IntoIterator for &'a Jobs<C> {
    type Item = &'a Job<C>;
    type IntoIter = std::slice::Iter<'a, Job<C>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Borrowed subset of a [`Jobs`] collection, in discovery order.
#[derive(Debug)]
pub struct JobSelection<'a, C>(Vec<&'a Job<C>>);

impl<'a, C> JobSelection<'a, C> {
    /// Iterates over the selected jobs.
    pub fn iter(&self) -> impl Iterator<Item = &'a Job<C>> + '_ {
        self.0.iter().copied()
    }

    /// Number of selected jobs.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when nothing was selected.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<C: SshConnection> JobSelection<'_, C> {
    /// Names of the selected jobs.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.iter().map(Job::name).collect()
    }
}

impl<C> Clone for JobSelection<'_, C> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<'a, C> FromIterator<&'a Job<C>> for JobSelection<'a, C> {
    fn from_iter<T: IntoIterator<Item = &'a Job<C>>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a, C> IntoIterator for JobSelection<'a, C> {
    type Item = &'a Job<C>;
    type IntoIter = std::vec::IntoIter<&'a Job<C>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
