//! Tag state store
//!
//! Sharded concurrent map from tag id to [`TagState`]. Each tag's state is only
//! ever touched while holding that tag's entry lock, so a read-modify-write on
//! one tag is atomic and different tags never wait on each other beyond shard
//! contention.

use super::geofence::{GeofenceEvaluator, GeofenceTransition};
use crate::core::{PositionEstimate, TagState};
use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct TagStateStore {
    tags: DashMap<String, TagState>,
}

impl TagState {
    /// Apply a position estimate received at `seen_at`.
    ///
    /// Liveness always advances. The stored position is only replaced when the
    /// estimate is at least as new as the current one, and only then is the
    /// geofence flag re-evaluated; returns `None` for an out-of-order estimate.
    /// The first position sets the flag without ever reporting a breach.
    pub fn record_position(
        &mut self,
        estimate: &PositionEstimate,
        seen_at: f64,
        geofence: &GeofenceEvaluator,
    ) -> Option<GeofenceTransition> {
        self.mark_seen(seen_at);

        let transition = match &self.last_position {
            None => geofence.evaluate_first(estimate.x, estimate.y),
            Some(current) if estimate.timestamp >= current.timestamp => {
                geofence.evaluate(self.inside_geofence, estimate.x, estimate.y)
            }
            Some(_) => return None,
        };

        self.last_position = Some(estimate.clone());
        self.inside_geofence = transition.inside;
        Some(transition)
    }
}

impl TagStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a tag as seen at `now`, creating it if needed
    pub fn upsert_seen(&self, tag_id: &str, now: f64) {
        self.update(tag_id, now, |state| state.mark_seen(now));
    }

    /// Store a position estimate received at `seen_at` under the tag's lock;
    /// see [`TagState::record_position`]
    pub fn upsert_position(
        &self,
        estimate: &PositionEstimate,
        seen_at: f64,
        geofence: &GeofenceEvaluator,
    ) -> Option<GeofenceTransition> {
        self.update(&estimate.tag_id, seen_at, |state| {
            state.record_position(estimate, seen_at, geofence)
        })
    }

    /// Run `f` on a tag's state under its entry lock, creating the state with
    /// `first_seen` if the tag is new.
    ///
    /// `f` must not call back into the store.
    pub fn update<R>(&self, tag_id: &str, first_seen: f64, f: impl FnOnce(&mut TagState) -> R) -> R {
        if let Some(mut state) = self.tags.get_mut(tag_id) {
            return f(state.value_mut());
        }

        let mut state = self
            .tags
            .entry(tag_id.to_string())
            .or_insert_with(|| TagState::new(first_seen));
        f(state.value_mut())
    }

    /// Like [`update`](Self::update) but never creates an entry
    pub fn update_existing<R>(&self, tag_id: &str, f: impl FnOnce(&mut TagState) -> R) -> Option<R> {
        self.tags.get_mut(tag_id).map(|mut state| f(state.value_mut()))
    }

    pub fn get(&self, tag_id: &str) -> Option<TagState> {
        self.tags.get(tag_id).map(|state| state.value().clone())
    }

    pub fn contains(&self, tag_id: &str) -> bool {
        self.tags.contains_key(tag_id)
    }

    /// Point-in-time copy of every tag; each entry is copied under its own lock
    pub fn snapshot(&self) -> Vec<(String, TagState)> {
        self.tags
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn tag_ids(&self) -> Vec<String> {
        self.tags.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}
