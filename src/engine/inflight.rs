//! In-process single-flight registry for (project, stage, artifact type).

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FlightKey {
    project_id: String,
    stage_id: String,
    artifact_type: String,
}

/// Tracks generations currently running in this process.
#[derive(Debug, Clone, Default)]
pub struct InFlightRegistry {
    keys: Arc<Mutex<HashSet<FlightKey>>>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the key, or `None` if another generation already holds it.
    pub fn try_acquire(
        &self,
        project_id: &str,
        stage_id: &str,
        artifact_type: &str,
    ) -> Option<FlightGuard> {
        let key = FlightKey {
            project_id: project_id.to_string(),
            stage_id: stage_id.to_string(),
            artifact_type: artifact_type.to_string(),
        };
        if !self.lock().insert(key.clone()) {
            return None;
        }
        Some(FlightGuard {
            keys: Arc::clone(&self.keys),
            key,
        })
    }

    pub fn is_in_flight(&self, project_id: &str, stage_id: &str, artifact_type: &str) -> bool {
        self.lock().contains(&FlightKey {
            project_id: project_id.to_string(),
            stage_id: stage_id.to_string(),
            artifact_type: artifact_type.to_string(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<FlightKey>> {
        // The set stays consistent even if a holder panicked.
        self.keys.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Releases its key when dropped.
#[derive(Debug)]
pub struct FlightGuard {
    keys: Arc<Mutex<HashSet<FlightKey>>>,
    key: FlightKey,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        let mut keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        keys.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_rejected_until_drop() {
        let registry = InFlightRegistry::new();
        let guard = registry.try_acquire("p1", "design", "prototype").unwrap();
        assert!(registry.try_acquire("p1", "design", "prototype").is_none());
        assert!(registry.is_in_flight("p1", "design", "prototype"));

        drop(guard);
        assert!(!registry.is_in_flight("p1", "design", "prototype"));
        assert!(registry.try_acquire("p1", "design", "prototype").is_some());
    }

    #[test]
    fn test_keys_are_independent() {
        let registry = InFlightRegistry::new();
        let _a = registry.try_acquire("p1", "design", "prototype").unwrap();
        assert!(registry.try_acquire("p1", "design", "ui-design").is_some());
        assert!(registry.try_acquire("p2", "design", "prototype").is_some());
    }

    #[test]
    fn test_clones_share_state() {
        let registry = InFlightRegistry::new();
        let other = registry.clone();
        let _guard = registry.try_acquire("p1", "s", "t").unwrap();
        assert!(other.try_acquire("p1", "s", "t").is_none());
    }
}
