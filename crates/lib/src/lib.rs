//! wasmpipe-lib: build orchestration for web front-ends with a native module.
//!
//! A build combines three inputs into one output directory:
//! - static asset trees, copied as-is
//! - a Rust crate compiled to WebAssembly by an external toolchain, cached by
//!   source fingerprint
//! - an ES module graph bundled into one chunk per entry and minified
//!
//! [`orchestrator::BuildOrchestrator`] runs these as stages of a DAG and
//! reports every failure together.

pub mod assets;
pub mod bundle;
pub mod config;
pub mod consts;
pub mod execute;
pub mod minify;
pub mod native;
pub mod orchestrator;
pub mod platform;
pub mod util;

pub use config::{BuildConfig, ConfigError, Mode};
pub use execute::{BuildError, BuildReport, BuildResult, StageFailure};
pub use orchestrator::BuildOrchestrator;
