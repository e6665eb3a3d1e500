pub mod classifier;
pub mod dimensions;
pub mod discovery;
pub mod prompts;
pub mod response;

pub use classifier::{ClassifierSettings, ClassifyOutcome, DimensionClassifier};
pub use dimensions::{DimensionGroup, DimensionSpec};
pub use discovery::discover_vocabulary;
