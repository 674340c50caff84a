mod build;
mod info;

pub use build::{BuildArgs, build_once, cmd_build, load};
pub use info::cmd_info;
