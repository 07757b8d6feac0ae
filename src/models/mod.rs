//! Model resolution and inference components

pub mod classifier;
pub mod loader;
pub mod registry;
pub mod scored;

pub use classifier::{Classifier, LogisticClassifier, StubClassifier};
pub use loader::{ModelLoader, OnnxClassifier};
pub use registry::{from_config, FsModelRegistry, ModelReference, ModelRegistry, StaticRegistry};
pub use scored::{ModelHandle, ScoredModel};
