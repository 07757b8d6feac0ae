//! Model registry: resolves `(name, alias)` to a trained classifier
//!
//! On-disk layout read by [`FsModelRegistry`]:
//!
//! ```text
//! <root>/<name>/aliases.json        {"champion": "3", "challenger": "4"}
//! <root>/<name>/<version>/model.onnx
//! <root>/<name>/<version>/model.json
//! ```
//!
//! A purely numeric alias is taken as the version itself.

use crate::config::{ModelBackend, ModelConfig};
use crate::error::RegistryError;
use crate::models::classifier::{Classifier, LogisticClassifier, StubClassifier};
use crate::models::loader::ModelLoader;
use crate::schema::{FeatureSchema, CARIES_SCHEMA};
use std::collections::HashMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const ALIASES_FILE: &str = "aliases.json";
const ONNX_ARTIFACT: &str = "model.onnx";
const JSON_ARTIFACT: &str = "model.json";

/// Name plus version alias of a registered model
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelReference {
    pub name: String,
    pub alias: String,
}

impl ModelReference {
    pub fn new(name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: alias.into(),
        }
    }

    /// Canonical `models:/<name>@<alias>` form
    pub fn uri(&self) -> String {
        format!("models:/{}@{}", self.name, self.alias)
    }
}

impl fmt::Display for ModelReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "models:/{}@{}", self.name, self.alias)
    }
}

/// Source of trained classifiers.
///
/// A fetch either returns a ready classifier or fails; it never retries.
pub trait ModelRegistry: Send + Sync {
    fn fetch(&self, reference: &ModelReference) -> Result<Arc<dyn Classifier>, RegistryError>;
}

/// Registry backed by a directory tree
pub struct FsModelRegistry {
    root: PathBuf,
    loader: ModelLoader,
    schema: &'static FeatureSchema,
}

impl FsModelRegistry {
    pub fn new<P: Into<PathBuf>>(root: P, onnx_threads: usize) -> Self {
        Self {
            root: root.into(),
            loader: ModelLoader::with_threads(onnx_threads),
            schema: &CARIES_SCHEMA,
        }
    }

    fn resolve_version(&self, reference: &ModelReference) -> Result<String, RegistryError> {
        if !self.root.is_dir() {
            return Err(RegistryError::Unreachable(format!(
                "registry directory {} does not exist",
                self.root.display()
            )));
        }

        let model_dir = self.root.join(&reference.name);
        if !model_dir.is_dir() {
            return Err(RegistryError::ModelNotFound(reference.name.clone()));
        }

        if !reference.alias.is_empty() && reference.alias.chars().all(|c| c.is_ascii_digit()) {
            return Ok(reference.alias.clone());
        }

        let alias_not_found = || RegistryError::AliasNotFound {
            name: reference.name.clone(),
            alias: reference.alias.clone(),
        };

        let aliases_path = model_dir.join(ALIASES_FILE);
        let raw = match std::fs::read_to_string(&aliases_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(alias_not_found()),
            Err(e) => {
                return Err(RegistryError::Unreachable(format!(
                    "{}: {}",
                    aliases_path.display(),
                    e
                )))
            }
        };

        let aliases: HashMap<String, String> =
            serde_json::from_str(&raw).map_err(|e| RegistryError::Artifact {
                reference: reference.uri(),
                source: anyhow::Error::new(e).context(format!("parsing {}", aliases_path.display())),
            })?;

        aliases.get(&reference.alias).cloned().ok_or_else(alias_not_found)
    }

    fn load_artifact(
        &self,
        reference: &ModelReference,
        version_dir: &Path,
    ) -> Result<Arc<dyn Classifier>, RegistryError> {
        let artifact_error = |source: anyhow::Error| RegistryError::Artifact {
            reference: reference.uri(),
            source,
        };

        let onnx_path = version_dir.join(ONNX_ARTIFACT);
        if onnx_path.is_file() {
            let model = self
                .loader
                .load(&onnx_path, self.schema.width())
                .map_err(artifact_error)?;
            return Ok(Arc::new(model));
        }

        let json_path = version_dir.join(JSON_ARTIFACT);
        if json_path.is_file() {
            let model = LogisticClassifier::from_file(&json_path).map_err(artifact_error)?;
            return Ok(Arc::new(model));
        }

        Err(RegistryError::ArtifactNotFound(format!(
            "{} ({})",
            reference.uri(),
            version_dir.display()
        )))
    }
}

impl ModelRegistry for FsModelRegistry {
    fn fetch(&self, reference: &ModelReference) -> Result<Arc<dyn Classifier>, RegistryError> {
        let version = self.resolve_version(reference)?;
        debug!(reference = %reference, version = %version, "Resolved model alias");

        let version_dir = self.root.join(&reference.name).join(&version);
        let classifier = self.load_artifact(reference, &version_dir)?;

        if let Some(names) = classifier.feature_names() {
            if !self.schema.matches_signature(names) {
                return Err(RegistryError::SignatureMismatch {
                    reference: reference.uri(),
                    schema: self.schema.version,
                });
            }
        }

        info!(
            reference = %reference,
            version = %version,
            kind = classifier.kind(),
            "Model fetched from registry"
        );
        Ok(classifier)
    }
}

/// In-memory registry, used for the stub backend and in tests
#[derive(Default)]
pub struct StaticRegistry {
    models: HashMap<ModelReference, Arc<dyn Classifier>>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(
        mut self,
        name: &str,
        alias: &str,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        self.models
            .insert(ModelReference::new(name, alias), classifier);
        self
    }
}

impl ModelRegistry for StaticRegistry {
    fn fetch(&self, reference: &ModelReference) -> Result<Arc<dyn Classifier>, RegistryError> {
        if let Some(classifier) = self.models.get(reference) {
            return Ok(classifier.clone());
        }
        if self.models.keys().any(|r| r.name == reference.name) {
            Err(RegistryError::AliasNotFound {
                name: reference.name.clone(),
                alias: reference.alias.clone(),
            })
        } else {
            Err(RegistryError::ModelNotFound(reference.name.clone()))
        }
    }
}

/// Build the registry selected by the model configuration
pub fn from_config(config: &ModelConfig) -> Box<dyn ModelRegistry> {
    match config.backend {
        ModelBackend::Registry => Box::new(FsModelRegistry::new(
            &config.registry_dir,
            config.onnx_threads,
        )),
        ModelBackend::Stub => {
            warn!(
                probability = config.stub_probability,
                "Serving the stub classifier, predictions are constant"
            );
            Box::new(StaticRegistry::new().with_model(
                &config.name,
                &config.alias,
                Arc::new(StubClassifier::new(
                    config.stub_probability,
                    CARIES_SCHEMA.width(),
                )),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn logistic_artifact(names: &[&str]) -> String {
        let terms: Vec<serde_json::Value> = names
            .iter()
            .map(|_| serde_json::json!({"slope": 0.0}))
            .collect();
        serde_json::json!({
            "feature_names": names,
            "intercept": 0.0,
            "terms": terms,
        })
        .to_string()
    }

    fn setup_registry() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("create temp dir");
        let model_dir = dir.path().join("mlops_project");
        fs::create_dir_all(model_dir.join("3")).unwrap();
        fs::create_dir_all(model_dir.join("4")).unwrap();
        fs::create_dir_all(model_dir.join("5")).unwrap();
        fs::write(
            model_dir.join(ALIASES_FILE),
            r#"{"champion": "3", "challenger": "4", "broken": "5", "ghost": "9"}"#,
        )
        .unwrap();
        fs::write(
            model_dir.join("3").join(JSON_ARTIFACT),
            logistic_artifact(&CARIES_SCHEMA.feature_names()),
        )
        .unwrap();
        fs::write(
            model_dir.join("4").join(JSON_ARTIFACT),
            logistic_artifact(&["race", "age"]),
        )
        .unwrap();
        fs::write(model_dir.join("5").join(JSON_ARTIFACT), "{not json").unwrap();
        dir
    }

    #[test]
    fn test_reference_uri() {
        let reference = ModelReference::new("mlops_project", "champion");
        assert_eq!(reference.uri(), "models:/mlops_project@champion");
        assert_eq!(reference.to_string(), reference.uri());
    }

    #[test]
    fn test_fetch_by_alias() {
        let dir = setup_registry();
        let registry = FsModelRegistry::new(dir.path(), 1);
        let model = registry
            .fetch(&ModelReference::new("mlops_project", "champion"))
            .unwrap();
        assert_eq!(model.kind(), "logistic");
        assert_eq!(model.n_features(), 10);
    }

    #[test]
    fn test_fetch_by_numeric_version() {
        let dir = setup_registry();
        let registry = FsModelRegistry::new(dir.path(), 1);
        assert!(registry
            .fetch(&ModelReference::new("mlops_project", "3"))
            .is_ok());
    }

    #[test]
    fn test_unknown_model_and_alias() {
        let dir = setup_registry();
        let registry = FsModelRegistry::new(dir.path(), 1);

        let err = registry
            .fetch(&ModelReference::new("other_project", "champion"))
            .err()
            .unwrap();
        assert!(matches!(err, RegistryError::ModelNotFound(_)));

        let err = registry
            .fetch(&ModelReference::new("mlops_project", "staging"))
            .err()
            .unwrap();
        assert!(matches!(err, RegistryError::AliasNotFound { .. }));

        let err = registry
            .fetch(&ModelReference::new("mlops_project", "ghost"))
            .err()
            .unwrap();
        assert!(matches!(err, RegistryError::ArtifactNotFound(_)));
    }

    #[test]
    fn test_signature_mismatch_is_rejected() {
        let dir = setup_registry();
        let registry = FsModelRegistry::new(dir.path(), 1);
        let err = registry
            .fetch(&ModelReference::new("mlops_project", "challenger"))
            .err()
            .unwrap();
        assert!(matches!(err, RegistryError::SignatureMismatch { .. }));
    }

    #[test]
    fn test_corrupt_artifact() {
        let dir = setup_registry();
        let registry = FsModelRegistry::new(dir.path(), 1);
        let err = registry
            .fetch(&ModelReference::new("mlops_project", "broken"))
            .err()
            .unwrap();
        assert!(matches!(err, RegistryError::Artifact { .. }));
    }

    #[test]
    fn test_missing_root_is_unreachable() {
        let registry = FsModelRegistry::new("/nonexistent/registry", 1);
        let err = registry
            .fetch(&ModelReference::new("mlops_project", "champion"))
            .err()
            .unwrap();
        assert!(matches!(err, RegistryError::Unreachable(_)));
    }

    #[test]
    fn test_static_registry() {
        let registry = StaticRegistry::new().with_model(
            "mlops_project",
            "champion",
            Arc::new(StubClassifier::new(0.3, 10)),
        );
        assert!(registry
            .fetch(&ModelReference::new("mlops_project", "champion"))
            .is_ok());
        assert!(matches!(
            registry.fetch(&ModelReference::new("mlops_project", "challenger")),
            Err(RegistryError::AliasNotFound { .. })
        ));
        assert!(matches!(
            registry.fetch(&ModelReference::new("other", "champion")),
            Err(RegistryError::ModelNotFound(_))
        ));
    }

    #[test]
    fn test_bundled_registry_loads() {
        let root = concat!(env!("CARGO_MANIFEST_DIR"), "/registry");
        let registry = FsModelRegistry::new(root, 1);
        let model = registry
            .fetch(&ModelReference::new("mlops_project", "champion"))
            .unwrap();
        assert_eq!(model.kind(), "logistic");
        assert_eq!(model.n_features(), CARIES_SCHEMA.width());
    }

    #[test]
    fn test_stub_backend_from_config() {
        let mut config = crate::config::AppConfig::default().model;
        config.backend = ModelBackend::Stub;
        let registry = from_config(&config);
        let model = registry
            .fetch(&ModelReference::new("mlops_project", "champion"))
            .unwrap();
        assert_eq!(model.kind(), "stub");
        assert_eq!(model.n_features(), CARIES_SCHEMA.width());
    }
}
