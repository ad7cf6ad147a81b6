//! TIFF encoding configuration types

use serde::{Deserialize, Serialize};

/// TIFF compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TiffCompression {
    /// No compression (fastest, largest file)
    #[default]
    None,
    /// LZW compression (slow, good compression)
    Lzw,
    /// Deflate compression - fast level (good speed/size balance)
    DeflateFast,
    /// Deflate compression - balanced
    DeflateBalanced,
    /// Deflate compression - best compression (slower)
    DeflateBest,
}

/// Configuration for encoding raw frames and composites to TIFF
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EncodingConfig {
    pub compression: TiffCompression,
    /// Horizontal differencing before compression.
    /// Note: adds processing time, leave off for maximum speed
    pub horizontal_predictor: bool,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            compression: TiffCompression::None,
            horizontal_predictor: false,
        }
    }
}

impl EncodingConfig {
    pub fn builder() -> EncodingConfigBuilder {
        EncodingConfigBuilder::default()
    }
}

/// Builder for EncodingConfig
#[derive(Default)]
pub struct EncodingConfigBuilder {
    compression: Option<TiffCompression>,
    horizontal_predictor: Option<bool>,
}

impl EncodingConfigBuilder {
    pub fn compression(mut self, compression: TiffCompression) -> Self {
        self.compression = Some(compression);
        self
    }

    pub fn horizontal_predictor(mut self, enable: bool) -> Self {
        self.horizontal_predictor = Some(enable);
        self
    }

    pub fn build(self) -> EncodingConfig {
        let default = EncodingConfig::default();
        EncodingConfig {
            compression: self.compression.unwrap_or(default.compression),
            horizontal_predictor: self
                .horizontal_predictor
                .unwrap_or(default.horizontal_predictor),
        }
    }
}
