//! Profile carousel: the set of named tuning presets of one device and the
//! currently active one.

use crate::config::{ProfileConfig, Properties};
use serde_json::Value;

/// Key the active profile's id is published under
pub const PROFILE_ID_KEY: &str = "profile_id";

#[derive(Debug, Clone, Default)]
pub struct ProfileCarousel {
    profiles: Vec<ProfileConfig>,
    active: Option<usize>,
}

impl ProfileCarousel {
    /// Build the carousel and activate the first profile, if any.
    pub fn new(profiles: Vec<ProfileConfig>) -> Self {
        let active = if profiles.is_empty() { None } else { Some(0) };
        Self { profiles, active }
    }

    pub fn profiles(&self) -> &[ProfileConfig] {
        &self.profiles
    }

    pub fn get(&self, id: &str) -> Option<&ProfileConfig> {
        self.profiles.iter().find(|p| p.id == id)
    }

    pub fn active(&self) -> Option<&ProfileConfig> {
        self.active.and_then(|i| self.profiles.get(i))
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active().map(|p| p.id.as_str())
    }

    /// Switch to `id`. Returns `false` for unknown ids, leaving the active profile as is.
    pub fn activate(&mut self, id: &str) -> bool {
        match self.profiles.iter().position(|p| p.id == id) {
            Some(index) => {
                self.active = Some(index);
                true
            }
            None => false,
        }
    }

    /// Add a profile, or update it in place if the id exists.
    pub fn upsert(&mut self, profile: ProfileConfig) {
        match self.profiles.iter().position(|p| p.id == profile.id) {
            Some(index) => self.profiles[index] = profile,
            None => {
                self.profiles.push(profile);
                if self.active.is_none() {
                    self.active = Some(self.profiles.len() - 1);
                }
            }
        }
    }

    /// Remove a profile. Removing the active one falls back to the first remaining.
    pub fn remove(&mut self, id: &str) -> Option<ProfileConfig> {
        let index = self.profiles.iter().position(|p| p.id == id)?;
        let removed = self.profiles.remove(index);
        self.active = match self.active {
            _ if self.profiles.is_empty() => None,
            Some(active) if active == index => Some(0),
            Some(active) if active > index => Some(active - 1),
            other => other,
        };
        Some(removed)
    }

    /// Properties published for the active profile: its values minus `name`,
    /// plus `profile_id`.
    pub fn layer(&self) -> Properties {
        let Some(profile) = self.active() else {
            return Properties::new();
        };
        let mut props = profile.properties();
        props.remove("name");
        props.insert(PROFILE_ID_KEY.to_string(), Value::from(profile.id.clone()));
        props
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn carousel() -> ProfileCarousel {
        ProfileCarousel::new(vec![
            ProfileConfig::new("a", "Band A").with_center_freq(100),
            ProfileConfig::new("b", "Band B").with_center_freq(200),
            ProfileConfig::new("c", "Band C").with_center_freq(300),
        ])
    }

    #[test]
    fn test_first_profile_active() {
        let carousel = carousel();
        assert_eq!(carousel.active_id(), Some("a"));
        assert!(ProfileCarousel::new(Vec::new()).active().is_none());
    }

    #[test]
    fn test_activate() {
        let mut carousel = carousel();
        assert!(carousel.activate("c"));
        assert!(!carousel.activate("missing"));
        assert_eq!(carousel.active_id(), Some("c"));
    }

    #[test]
    fn test_layer_hides_name() {
        let carousel = carousel();
        let layer = carousel.layer();
        assert!(!layer.contains_key("name"));
        assert_eq!(layer.get(PROFILE_ID_KEY), Some(&Value::from("a")));
        assert_eq!(layer.get("center_freq"), Some(&Value::from(100u64)));
    }

    #[test]
    fn test_remove_adjusts_active() {
        let mut carousel = carousel();
        carousel.activate("c");
        carousel.remove("a");
        assert_eq!(carousel.active_id(), Some("c"));
        carousel.remove("c");
        assert_eq!(carousel.active_id(), Some("b"));
        carousel.remove("b");
        assert_eq!(carousel.active_id(), None);
        carousel.upsert(ProfileConfig::new("d", "Band D"));
        assert_eq!(carousel.active_id(), Some("d"));
    }
}
