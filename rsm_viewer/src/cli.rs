//! Command line flags

use std::path::PathBuf;

use crate::config::ViewerConfig;
use crate::error::{ViewerError, ViewerResult};

/// Help text printed for `--help` and usage errors
pub const USAGE: &str = "\
Usage: rsm_viewer [OPTIONS]

Options:
  --config <PATH>      Load settings from a .toml or .ron file
  --width <PIXELS>     Window width
  --height <PIXELS>    Window height
  --fullscreen         Open on the primary monitor
  --validation         Enable the Vulkan validation layer
  --reference <PATH>   Render one frame on the CPU and write it as PNG
  --help               Print this text";

/// Parsed command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Args {
    /// Settings file
    pub config: Option<PathBuf>,
    /// Window width override
    pub width: Option<u32>,
    /// Window height override
    pub height: Option<u32>,
    /// Fullscreen override
    pub fullscreen: bool,
    /// Validation override
    pub validation: bool,
    /// Headless reference output
    pub reference: Option<PathBuf>,
    /// Print usage and exit
    pub help: bool,
}

impl Args {
    /// Parse flags, program name excluded
    pub fn parse<I>(args: I) -> ViewerResult<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = Self::default();
        let mut args = args.into_iter();

        while let Some(flag) = args.next() {
            match flag.as_str() {
                "--config" => parsed.config = Some(PathBuf::from(value(&flag, args.next())?)),
                "--width" => parsed.width = Some(dimension(&flag, args.next())?),
                "--height" => parsed.height = Some(dimension(&flag, args.next())?),
                "--fullscreen" => parsed.fullscreen = true,
                "--validation" => parsed.validation = true,
                "--reference" => parsed.reference = Some(PathBuf::from(value(&flag, args.next())?)),
                "--help" | "-h" => parsed.help = true,
                other => return Err(ViewerError::Usage(format!("unknown option '{other}'\n\n{USAGE}"))),
            }
        }
        Ok(parsed)
    }

    /// Apply the overrides on top of `config`
    pub fn apply(&self, config: &mut ViewerConfig) {
        if let Some(width) = self.width {
            config.width = width;
        }
        if let Some(height) = self.height {
            config.height = height;
        }
        config.fullscreen |= self.fullscreen;
        config.validation |= self.validation;
    }
}

fn value(flag: &str, value: Option<String>) -> ViewerResult<String> {
    value.ok_or_else(|| ViewerError::Usage(format!("{flag} needs a value\n\n{USAGE}")))
}

fn dimension(flag: &str, raw: Option<String>) -> ViewerResult<u32> {
    let raw = value(flag, raw)?;
    match raw.parse::<u32>() {
        Ok(pixels) if pixels > 0 => Ok(pixels),
        _ => Err(ViewerError::Usage(format!("{flag} expects a positive integer, got '{raw}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> ViewerResult<Args> {
        Args::parse(args.iter().map(ToString::to_string))
    }

    #[test]
    fn test_no_flags() {
        assert_eq!(parse(&[]).unwrap(), Args::default());
    }

    #[test]
    fn test_overrides_apply() {
        let args = parse(&["--width", "800", "--fullscreen", "--config", "viewer.toml"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("viewer.toml")));

        let mut config = ViewerConfig::default();
        args.apply(&mut config);
        assert_eq!((config.width, config.height), (800, 720));
        assert!(config.fullscreen);
    }

    #[test]
    fn test_bad_flags_are_usage_errors() {
        assert!(matches!(parse(&["--width"]), Err(ViewerError::Usage(_))));
        assert!(matches!(parse(&["--height", "0"]), Err(ViewerError::Usage(_))));
        assert!(matches!(parse(&["--height", "tall"]), Err(ViewerError::Usage(_))));
        assert!(matches!(parse(&["--frobnicate"]), Err(ViewerError::Usage(_))));
    }
}
