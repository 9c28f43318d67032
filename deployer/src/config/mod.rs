//! Configuration lookup and resolution

pub mod settings;
pub mod source;

pub use settings::DeploySettings;
pub use source::{ConfigSource, Layered};
