//! Model registry. Requests name a model; execution resolves the name
//! to the highest ready version at the moment the batch runs.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use sightd_runtime::ServingSession;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("servable '{0}' not found")]
    NotFound(String),
}

/// One loaded, servable model version.
pub struct ServableModel {
    name: String,
    version: u64,
    session: Box<dyn ServingSession>,
    /// Class labels, index-aligned with the model's score columns.
    /// Index 0 is the background class.
    labels: Vec<String>,
}

impl ServableModel {
    pub fn new(
        name: impl Into<String>,
        version: u64,
        session: Box<dyn ServingSession>,
        labels: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version,
            session,
            labels,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn session(&self) -> &dyn ServingSession {
        self.session.as_ref()
    }

    pub fn num_classes(&self) -> usize {
        self.labels.len()
    }

    pub fn label(&self, class_idx: usize) -> &str {
        self.labels
            .get(class_idx)
            .map(String::as_str)
            .unwrap_or("unknown")
    }
}

/// Thread-safe map of model name to its loaded versions.
#[derive(Default)]
pub struct ModelManager {
    models: RwLock<BTreeMap<String, BTreeMap<u64, Arc<ServableModel>>>>,
}

impl ModelManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, model: ServableModel) {
        info!(model = %model.name(), version = model.version(), "registered servable");
        let mut models = self.models.write().unwrap();
        models
            .entry(model.name().to_owned())
            .or_default()
            .insert(model.version(), Arc::new(model));
    }

    /// Highest loaded version of `name`.
    pub fn get_latest(&self, name: &str) -> Result<Arc<ServableModel>, ManagerError> {
        let models = self.models.read().unwrap();
        models
            .get(name)
            .and_then(|versions| versions.values().next_back())
            .cloned()
            .ok_or_else(|| ManagerError::NotFound(name.to_owned()))
    }

    pub fn has_ready(&self, name: &str) -> bool {
        let models = self.models.read().unwrap();
        models.get(name).is_some_and(|v| !v.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockEngine;
    use sightd_runtime::InferenceSession;

    fn servable(name: &str, version: u64) -> ServableModel {
        let session = InferenceSession::load(name, || Ok(MockEngine::new())).unwrap();
        ServableModel::new(
            name,
            version,
            Box::new(session),
            vec!["__background__".into(), "widget".into()],
        )
    }

    #[test]
    fn missing_model_is_an_error() {
        let manager = ModelManager::new();
        assert!(matches!(
            manager.get_latest("detector"),
            Err(ManagerError::NotFound(name)) if name == "detector"
        ));
        assert!(!manager.has_ready("detector"));
    }

    #[test]
    fn latest_version_wins() {
        let manager = ModelManager::new();
        manager.insert(servable("detector", 3));
        manager.insert(servable("detector", 7));
        manager.insert(servable("detector", 5));

        let model = manager.get_latest("detector").unwrap();
        assert_eq!(model.version(), 7);
        assert_eq!(model.num_classes(), 2);
        assert_eq!(model.label(1), "widget");
        assert!(manager.has_ready("detector"));
    }

    #[test]
    fn unknown_label_index_is_safe() {
        let manager = ModelManager::new();
        manager.insert(servable("detector", 1));
        let model = manager.get_latest("detector").unwrap();
        assert_eq!(model.label(99), "unknown");
    }
}
