//! Container lifecycle bookkeeping across polling cycles.
//!
//! A container missing from a poll is not forgotten right away: it is marked
//! unregistered and only evicted once it has been gone for longer than the
//! threshold. This keeps identity stable across quick restarts.

use crate::runtime::ContainerDescriptor;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct ContainerRecord {
    pub descriptor: ContainerDescriptor,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Set the first cycle the container is missing, cleared when it returns
    pub unregistered_at: Option<DateTime<Utc>>,
}

impl ContainerRecord {
    pub fn new(descriptor: ContainerDescriptor, now: DateTime<Utc>) -> Self {
        Self {
            descriptor,
            first_seen: now,
            last_seen: now,
            unregistered_at: None,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.unregistered_at.is_none()
    }
}

pub type Records = HashMap<String, ContainerRecord>;

/// Diff `current` against the latest container list.
///
/// Present containers are refreshed and re-registered, newly absent ones are
/// marked at `now`, and ones absent for strictly longer than `threshold` are
/// dropped. Unknown containers get a fresh record.
pub fn remove_old_containers(
    current: Records,
    containers: &[ContainerDescriptor],
    threshold: Duration,
    now: DateTime<Utc>,
) -> Records {
    let threshold = TimeDelta::from_std(threshold).unwrap_or(TimeDelta::MAX);
    let mut latest: HashMap<&str, &ContainerDescriptor> = containers
        .iter()
        .map(|c| (c.id.as_str(), c))
        .collect();

    let mut updated = Records::with_capacity(current.len().max(containers.len()));

    for (id, mut record) in current {
        match latest.remove(id.as_str()) {
            Some(descriptor) => {
                record.descriptor = descriptor.clone();
                record.last_seen = now;
                record.unregistered_at = None;
            }
            None => match record.unregistered_at {
                None => record.unregistered_at = Some(now),
                Some(since) if now - since > threshold => continue,
                Some(_) => {}
            },
        }
        updated.insert(id, record);
    }

    for (id, descriptor) in latest {
        updated.insert(id.to_string(), ContainerRecord::new(descriptor.clone(), now));
    }

    updated
}

/// What one registry update changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryChanges {
    pub added: usize,
    pub returned: usize,
    pub departed: usize,
    pub evicted: usize,
}

/// Owned record map plus its eviction threshold.
///
/// Only the collection cycle mutates it, and cycles never overlap.
#[derive(Debug)]
pub struct ContainerRegistry {
    records: Records,
    threshold: Duration,
}

impl ContainerRegistry {
    pub fn new(threshold: Duration) -> Self {
        Self {
            records: Records::new(),
            threshold,
        }
    }

    pub fn update(
        &mut self,
        containers: &[ContainerDescriptor],
        now: DateTime<Utc>,
    ) -> RegistryChanges {
        let present: HashSet<&str> = containers.iter().map(|c| c.id.as_str()).collect();

        let mut changes = RegistryChanges::default();
        for (id, record) in &self.records {
            match (present.contains(id.as_str()), record.is_registered()) {
                (true, false) => changes.returned += 1,
                (false, true) => changes.departed += 1,
                _ => {}
            }
        }
        changes.added = present
            .iter()
            .filter(|id| !self.records.contains_key(**id))
            .count();

        let before = self.records.len();
        let records = std::mem::take(&mut self.records);
        self.records = remove_old_containers(records, containers, self.threshold, now);
        changes.evicted = (before + changes.added).saturating_sub(self.records.len());

        debug!(
            added = changes.added,
            returned = changes.returned,
            departed = changes.departed,
            evicted = changes.evicted,
            known = self.records.len(),
            "Container registry updated"
        );

        changes
    }

    #[allow(dead_code)]
    pub fn get(&self, id: &str) -> Option<&ContainerRecord> {
        self.records.get(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn unregistered_count(&self) -> usize {
        self.records.values().filter(|r| !r.is_registered()).count()
    }
}
