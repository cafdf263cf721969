// Library exports for groupstat

pub mod data;
pub mod error;
pub mod palette;
pub mod parser;
pub mod properties;
pub mod config;
pub mod stats;

// Summarization core
pub mod plotdata;
pub mod histogram;
pub mod binning;
pub mod partition;
pub mod summary;
pub mod analyzer;
pub mod comparative;

// Output
pub mod dispatch;
pub mod render;
pub mod report;

pub use error::{AnalysisError, Result};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OutputFormat {
    #[serde(rename = "png")]
    #[default]
    Png,
    #[serde(rename = "svg")]
    Svg,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Svg => "svg",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderOptions {
    #[serde(default = "default_width")]
    pub width: u32,
    /// Height of one group panel.
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default, rename = "type")]
    pub format: OutputFormat,
}

fn default_width() -> u32 { 800 }
fn default_height() -> u32 { 600 }

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            format: OutputFormat::Png,
        }
    }
}
