//! Layered, change-notifying property store
//!
//! A device's effective configuration is the merge of three layers. A lookup
//! takes the value from the lowest-numbered layer that holds the key:
//!
//! | Layer        | Holds                                              |
//! |--------------|----------------------------------------------------|
//! | `Override`   | values set at runtime (`center_freq`)              |
//! | `Profile`    | the active profile, without its `name`             |
//! | `Device`     | the device's own configuration                     |
//!
//! Every mutation returns the diff of the merged view and hands the same diff
//! to subscribers once the store lock has been released.

use crate::pipeline::conduit::lock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Flat property map
pub type Properties = BTreeMap<String, Value>;

/// Store layer, in lookup priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Layer {
    Override = 0,
    Profile = 1,
    Device = 2,
}

impl Layer {
    pub const ALL: [Layer; 3] = [Layer::Override, Layer::Profile, Layer::Device];
}

/// Diff of the merged view. `None` marks a key that disappeared.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigChanges {
    changes: BTreeMap<String, Option<Value>>,
}

impl ConfigChanges {
    fn between(before: &Properties, after: &Properties) -> Self {
        let mut changes = BTreeMap::new();
        for (key, value) in after {
            if before.get(key) != Some(value) {
                changes.insert(key.clone(), Some(value.clone()));
            }
        }
        for key in before.keys() {
            if !after.contains_key(key) {
                changes.insert(key.clone(), None);
            }
        }
        Self { changes }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.changes.contains_key(key)
    }

    /// New value of `key`; `Some(None)` if it was deleted, `None` if unchanged.
    pub fn get(&self, key: &str) -> Option<Option<&Value>> {
        self.changes.get(key).map(Option::as_ref)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.changes.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&Value>)> {
        self.changes.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    /// Fold a later diff into this one; later values win.
    pub fn merge(&mut self, later: ConfigChanges) {
        self.changes.extend(later.changes);
    }

    /// Only the changes for `keys`
    pub fn filter(&self, keys: &[&str]) -> Self {
        Self {
            changes: self
                .changes
                .iter()
                .filter(|(k, _)| keys.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

/// Handle returned by [`PropertyStore::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber = Arc<dyn Fn(&ConfigChanges) + Send + Sync>;

#[derive(Default)]
pub struct PropertyStore {
    layers: Mutex<BTreeMap<Layer, Properties>>,
    subscribers: Mutex<Vec<(SubscriptionId, Subscriber)>>,
    next_subscription: AtomicU64,
}

impl PropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn merged(layers: &BTreeMap<Layer, Properties>) -> Properties {
        let mut merged = Properties::new();
        // Highest-numbered first so lower layers overwrite
        for (_, props) in layers.iter().rev() {
            for (key, value) in props {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged
    }

    /// Merged view of all layers
    pub fn snapshot(&self) -> Properties {
        Self::merged(&lock(&self.layers))
    }

    pub fn layer(&self, layer: Layer) -> Properties {
        lock(&self.layers).get(&layer).cloned().unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let layers = lock(&self.layers);
        layers.values().find_map(|props| props.get(key).cloned())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| value_as_u64(&v))
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f.round() as i64)))
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.as_f64())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.as_bool())
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str().map(str::to_string))
    }

    fn mutate<F>(&self, f: F) -> ConfigChanges
    where
        F: FnOnce(&mut BTreeMap<Layer, Properties>),
    {
        let changes = {
            let mut layers = lock(&self.layers);
            let before = Self::merged(&layers);
            f(&mut layers);
            ConfigChanges::between(&before, &Self::merged(&layers))
        };
        if !changes.is_empty() {
            self.notify(&changes);
        }
        changes
    }

    pub fn set(&self, layer: Layer, key: impl Into<String>, value: impl Into<Value>) -> ConfigChanges {
        let key = key.into();
        let value = value.into();
        self.mutate(|layers| {
            layers.entry(layer).or_default().insert(key, value);
        })
    }

    pub fn remove(&self, layer: Layer, key: &str) -> ConfigChanges {
        self.mutate(|layers| {
            if let Some(props) = layers.get_mut(&layer) {
                props.remove(key);
            }
        })
    }

    pub fn replace_layer(&self, layer: Layer, props: Properties) -> ConfigChanges {
        self.mutate(|layers| {
            layers.insert(layer, props);
        })
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ConfigChanges) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        lock(&self.subscribers).push((id, Arc::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = lock(&self.subscribers);
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    fn notify(&self, changes: &ConfigChanges) {
        let subscribers: Vec<Subscriber> = lock(&self.subscribers)
            .iter()
            .map(|(_, s)| s.clone())
            .collect();
        for subscriber in subscribers {
            subscriber(changes);
        }
    }
}

impl std::fmt::Debug for PropertyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyStore")
            .field("properties", &self.snapshot())
            .finish()
    }
}

/// Integer view of a property that may have been written as a float
pub fn value_as_u64(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lowest_layer_wins() {
        let store = PropertyStore::new();
        store.set(Layer::Device, "samp_rate", 1_000_000);
        store.set(Layer::Profile, "samp_rate", 2_400_000);
        assert_eq!(store.get_u64("samp_rate"), Some(2_400_000));

        store.set(Layer::Override, "samp_rate", 3_200_000);
        assert_eq!(store.get_u64("samp_rate"), Some(3_200_000));

        let changes = store.remove(Layer::Override, "samp_rate");
        assert_eq!(changes.get("samp_rate"), Some(Some(&json!(2_400_000))));
    }

    #[test]
    fn test_replace_layer_diff() {
        let store = PropertyStore::new();
        store.replace_layer(
            Layer::Profile,
            Properties::from([
                ("center_freq".to_string(), json!(145_000_000)),
                ("rf_gain".to_string(), json!(30)),
            ]),
        );
        let changes = store.replace_layer(
            Layer::Profile,
            Properties::from([
                ("center_freq".to_string(), json!(145_000_000)),
                ("samp_rate".to_string(), json!(2_400_000)),
            ]),
        );
        assert_eq!(changes.len(), 2);
        assert!(!changes.contains("center_freq"));
        assert_eq!(changes.get("rf_gain"), Some(None));
        assert_eq!(changes.get("samp_rate"), Some(Some(&json!(2_400_000))));
    }

    #[test]
    fn test_shadowed_change_is_not_reported() {
        let store = PropertyStore::new();
        store.set(Layer::Override, "center_freq", 100);
        let changes = store.set(Layer::Device, "center_freq", 200);
        assert!(changes.is_empty());
    }

    #[test]
    fn test_subscribers_receive_changes() {
        let store = Arc::new(PropertyStore::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let reader = store.clone();
        let id = store.subscribe(move |changes| {
            // Reading the store from a callback must not deadlock
            let value = reader.get_u64("center_freq");
            lock(&sink).push((changes.len(), value));
        });

        store.set(Layer::Override, "center_freq", 7);
        store.set(Layer::Override, "center_freq", 7);
        assert!(store.unsubscribe(id));
        store.set(Layer::Override, "center_freq", 8);

        assert_eq!(*lock(&seen), vec![(1, Some(7))]);
    }

    #[test]
    fn test_filter_and_numeric_views() {
        let store = PropertyStore::new();
        let changes = store.replace_layer(
            Layer::Device,
            Properties::from([
                ("center_freq".to_string(), json!(1.0e8)),
                ("name".to_string(), json!("rtl")),
            ]),
        );
        assert_eq!(changes.filter(&["center_freq"]).len(), 1);
        assert_eq!(store.get_u64("center_freq"), Some(100_000_000));
        assert_eq!(store.get_string("name").as_deref(), Some("rtl"));
    }
}
