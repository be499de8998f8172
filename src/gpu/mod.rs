pub mod buffer;
pub mod context;
pub mod frames;
pub mod image;
pub mod pipeline;
pub mod recorder;
pub mod swapchain;
pub mod targets;
pub mod texture;
