use std::collections::HashMap;

use anyhow::{anyhow, Result};

use super::backend::DetectorBackend;
use super::backends::ReplayBackend;
use super::labels::LabelVocabulary;
use crate::config::DetectionSettings;

/// Named detector backends available to a session.
///
/// Backends are handed out by value: a session owns its backend for the
/// length of one video.
pub struct BackendRegistry {
    backends: HashMap<String, Box<dyn DetectorBackend>>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            default_name: None,
        }
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<B: DetectorBackend + 'static>(&mut self, backend: B) {
        let name = backend.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.backends.insert(name, Box::new(backend));
    }

    /// Build the backends a configuration can select and make the configured
    /// one the default. A backend that is selected but cannot be built is an
    /// error; the others are only registered when their inputs are present.
    pub fn from_settings(settings: &DetectionSettings) -> Result<Self> {
        let labels = match &settings.labels {
            Some(path) => LabelVocabulary::from_file(path)?,
            None => LabelVocabulary::coco(),
        };

        let mut registry = Self::new();
        match &settings.replay {
            Some(path) => registry.register(ReplayBackend::from_file(path, labels.clone())?),
            None if settings.backend == "replay" => {
                return Err(anyhow!(
                    "the replay backend needs a detection script (--replay)"
                ));
            }
            None => {}
        }

        #[cfg(feature = "backend-tract")]
        if settings.backend == "tract" {
            let model = settings
                .model
                .as_deref()
                .ok_or_else(|| anyhow!("the tract backend needs --model or VDETECT_MODEL"))?;
            registry.register(super::backends::TractBackend::new(model, labels)?);
        }

        registry.set_default(&settings.backend)?;
        Ok(registry)
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.backends.contains_key(name) {
            return Err(anyhow!("backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    /// List registered backends, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }

    /// Remove and return a backend. `None` selects the default.
    pub fn take(&mut self, name: Option<&str>) -> Result<Box<dyn DetectorBackend>> {
        let name = match name {
            Some(name) => name.to_string(),
            None => self
                .default_name
                .clone()
                .ok_or_else(|| anyhow!("no detector backend registered"))?,
        };
        let backend = self.backends.remove(&name).ok_or_else(|| {
            anyhow!(
                "backend '{}' not registered (available: {})",
                name,
                self.list().join(", ")
            )
        })?;
        if self.default_name.as_deref() == Some(name.as_str()) {
            self.default_name = None;
        }
        Ok(backend)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{DetectionResult, LabelVocabulary};
    use crate::frame::Frame;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn settings(backend: &str) -> DetectionSettings {
        DetectionSettings {
            confidence: 0.4,
            backend: backend.to_string(),
            model: None,
            replay: None,
            labels: None,
        }
    }

    struct Named(&'static str, LabelVocabulary);

    impl DetectorBackend for Named {
        fn name(&self) -> &'static str {
            self.0
        }

        fn labels(&self) -> &LabelVocabulary {
            &self.1
        }

        fn detect(&mut self, _frame: &Frame, _confidence: f32) -> Result<DetectionResult> {
            Ok(DetectionResult::default())
        }
    }

    #[test]
    fn first_registered_backend_is_default() -> Result<()> {
        let mut registry = BackendRegistry::new();
        registry.register(Named("a", LabelVocabulary::coco()));
        registry.register(Named("b", LabelVocabulary::coco()));
        assert_eq!(registry.list(), vec!["a", "b"]);
        assert_eq!(registry.take(None)?.name(), "a");
        assert_eq!(registry.list(), vec!["b"]);
        assert!(registry.take(None).is_err());
        Ok(())
    }

    #[test]
    fn set_default_rejects_unknown_names() -> Result<()> {
        let mut registry = BackendRegistry::new();
        registry.register(Named("a", LabelVocabulary::coco()));
        registry.register(Named("b", LabelVocabulary::coco()));
        assert!(registry.set_default("missing").is_err());
        registry.set_default("b")?;
        assert_eq!(registry.take(None)?.name(), "b");
        Ok(())
    }

    #[test]
    fn take_by_name_reports_available_backends() {
        let mut registry = BackendRegistry::new();
        registry.register(Named("replay", LabelVocabulary::coco()));
        let err = registry.take(Some("tract")).err().map(|e| e.to_string());
        assert_eq!(
            err.as_deref(),
            Some("backend 'tract' not registered (available: replay)")
        );
    }

    #[test]
    fn replay_without_script_is_rejected() {
        let err = BackendRegistry::from_settings(&settings("replay"))
            .err()
            .map(|e| e.to_string());
        assert_eq!(
            err.as_deref(),
            Some("the replay backend needs a detection script (--replay)")
        );
    }

    #[test]
    fn replay_script_becomes_the_default_backend() -> Result<()> {
        let mut script = NamedTempFile::new()?;
        script.write_all(br#"[{"frame": 0, "detections": []}]"#)?;
        let mut settings = settings("replay");
        settings.replay = Some(script.path().to_path_buf());

        let mut registry = BackendRegistry::from_settings(&settings)?;
        assert_eq!(registry.list(), vec!["replay"]);
        assert_eq!(registry.take(None)?.name(), "replay");
        Ok(())
    }

    #[test]
    fn unknown_backend_is_rejected() {
        assert!(BackendRegistry::from_settings(&settings("opencv")).is_err());
    }

    #[cfg(feature = "backend-tract")]
    #[test]
    fn tract_without_model_is_rejected() {
        let err = BackendRegistry::from_settings(&settings("tract"))
            .err()
            .map(|e| e.to_string());
        assert_eq!(
            err.as_deref(),
            Some("the tract backend needs --model or VDETECT_MODEL")
        );
    }
}
