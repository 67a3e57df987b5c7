pub mod apply;
pub mod config;
pub mod descriptor;
pub mod env;
pub mod graph;
pub mod helm;
pub mod image;
pub mod objects;
pub mod render;
pub mod utils;

pub use config::{DevEnvConfig, Extension};
pub use descriptor::DevEnvironment;
pub use env::EnvSource;
