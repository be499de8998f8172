pub mod batch;
pub mod config;
pub mod gpu;
pub mod input;
pub mod platform;
pub mod renderer;
pub mod spawn;
pub mod sprite;
pub mod timing;
