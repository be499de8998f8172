use clap::Parser;
use std::path::PathBuf;

use crate::batch::DEFAULT_BATCH_SIZE;

#[derive(Clone, Debug, Parser)]
#[command(name = "bunnymark-vk")]
#[command(about = "Vulkan BunnyMark: hold the pointer down to add bunnies")]
pub struct Options {
    /// Initial window width in pixels
    #[arg(short = 'w', long, default_value_t = 1280)]
    pub width: u32,

    /// Initial window height in pixels
    #[arg(short = 'H', long, default_value_t = 720)]
    pub height: u32,

    /// Wait for vertical blank when presenting
    #[arg(long)]
    pub vsync: bool,

    /// Start in borderless fullscreen
    #[arg(short = 'f', long)]
    pub fullscreen: bool,

    /// Enable VK_LAYER_KHRONOS_validation if installed
    #[arg(long)]
    pub validation: bool,

    /// Index of the physical device to use
    #[arg(short = 'g', long = "gpu")]
    pub gpu: Option<usize>,

    /// Print the available Vulkan devices at startup
    #[arg(long)]
    pub list_gpus: bool,

    /// RGBA sprite sheet
    #[arg(long, default_value = "assets/bunnys.png")]
    pub sheet: PathBuf,

    /// Vertex shader (.spv binary or GLSL source)
    #[arg(long, default_value = "shaders/sprite.vert")]
    pub vertex_shader: PathBuf,

    /// Fragment shader (.spv binary or GLSL source)
    #[arg(long, default_value = "shaders/sprite.frag")]
    pub fragment_shader: PathBuf,

    /// Bunnies added per spawn
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE, value_parser = parse_batch_size)]
    pub batch_size: usize,

    /// Seed for reproducible bunny motion
    #[arg(long)]
    pub seed: Option<u64>,
}

fn parse_batch_size(value: &str) -> Result<usize, String> {
    let size = value
        .parse::<usize>()
        .map_err(|e| format!("`{value}` is not a sprite count: {e}"))?;
    if size == 0 {
        return Err("batch size must be at least 1".to_string());
    }
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_benchmark_setup() {
        let options = Options::try_parse_from(["bunnymark-vk"]).unwrap();
        assert_eq!((options.width, options.height), (1280, 720));
        assert!(!options.vsync);
        assert!(!options.fullscreen);
        assert!(!options.validation);
        assert_eq!(options.gpu, None);
        assert_eq!(options.batch_size, 5000);
        assert_eq!(options.sheet, PathBuf::from("assets/bunnys.png"));
    }

    #[test]
    fn flags_and_values_are_parsed() {
        let options = Options::try_parse_from([
            "bunnymark-vk",
            "-w",
            "800",
            "-H",
            "600",
            "--vsync",
            "-f",
            "--validation",
            "-g",
            "1",
            "--batch-size",
            "500",
            "--seed",
            "42",
            "--vertex-shader",
            "shaders/sprite.vert.spv",
        ])
        .unwrap();

        assert_eq!((options.width, options.height), (800, 600));
        assert!(options.vsync && options.fullscreen && options.validation);
        assert_eq!(options.gpu, Some(1));
        assert_eq!(options.batch_size, 500);
        assert_eq!(options.seed, Some(42));
        assert_eq!(
            options.vertex_shader,
            PathBuf::from("shaders/sprite.vert.spv")
        );
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        assert!(Options::try_parse_from(["bunnymark-vk", "--batch-size", "0"]).is_err());
        assert!(Options::try_parse_from(["bunnymark-vk", "--batch-size", "lots"]).is_err());
    }
}
