// Language support: the static catalog, toolchain detection and the two runners

pub mod catalog;
pub mod external;
pub mod registry;
pub mod script;
pub mod traits;

// Re-export main types for easier access
pub use catalog::{CompileStep, LanguageCatalog, LanguageSpec};
pub use external::ExternalRunner;
pub use registry::{CommandProbe, RuntimeInfo, RuntimeProbe, RuntimeRegistry};
pub use script::ScriptRunner;
pub use traits::{CodeRunner, RunContext};
