use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::types::{MaintenanceState, ProfileName};

/// Per-node record persisted in the data annotation.
///
/// One entry per profile mentioned in the node's profile label. Entries for
/// profiles removed from the label are pruned on the next reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProfileData {
    #[serde(default)]
    pub profiles: BTreeMap<ProfileName, ProfileEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileEntry {
    pub state: MaintenanceState,
    pub last_transition: DateTime<Utc>,
    /// Per-notify-instance timestamp of the last successful send. Persisted
    /// here so notification scheduling survives controller restarts.
    #[serde(default)]
    pub last_notify_times: BTreeMap<String, DateTime<Utc>>,
    /// Profile label value observed at the last reconciliation.
    #[serde(default)]
    pub last_profiles_string: String,
}

impl ProfileEntry {
    pub fn initial(now: DateTime<Utc>) -> Self {
        ProfileEntry {
            state: MaintenanceState::Operational,
            last_transition: now,
            last_notify_times: BTreeMap::new(),
            last_profiles_string: String::new(),
        }
    }
}

impl ProfileData {
    /// Parse the annotation payload. An absent or empty annotation yields the
    /// empty record.
    pub fn parse(annotation: Option<&str>) -> Result<ProfileData, DomainError> {
        match annotation {
            None => Ok(ProfileData::default()),
            Some(s) if s.trim().is_empty() => Ok(ProfileData::default()),
            Some(s) => serde_json::from_str(s).map_err(DomainError::InvalidData),
        }
    }

    pub fn to_annotation(&self) -> Result<String, DomainError> {
        serde_json::to_string(self).map_err(DomainError::InvalidData)
    }

    /// Ensure exactly the given profiles have entries: missing ones start as
    /// `operational`, stale ones are pruned. `profiles_string` is the raw
    /// label value, stamped on every surviving entry.
    pub fn align(
        &mut self,
        profiles: &[ProfileName],
        profiles_string: &str,
        now: DateTime<Utc>,
    ) {
        self.profiles
            .retain(|name, _| profiles.contains(name));
        for name in profiles {
            let entry = self
                .profiles
                .entry(name.clone())
                .or_insert_with(|| ProfileEntry::initial(now));
            entry.last_profiles_string = profiles_string.to_string();
        }
    }

    pub fn entry(&self, profile: &ProfileName) -> Option<&ProfileEntry> {
        self.profiles.get(profile)
    }

    pub fn entry_mut(&mut self, profile: &ProfileName) -> Option<&mut ProfileEntry> {
        self.profiles.get_mut(profile)
    }
}
