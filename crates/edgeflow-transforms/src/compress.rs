//! Compress transform.

use std::collections::HashMap;
use std::io::Write as _;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;

use edgeflow_core::Context;
use edgeflow_runtime::{PipelineData, Transform, TransformError, TransformResult};

use crate::error::{ConfigurationError, Result};
use crate::params;

/// Compression algorithm for [`Compress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionAlgorithm {
    Gzip,
    Zlib,
}

/// Compresses the pipeline data and emits the result base64-encoded.
pub struct Compress {
    algorithm: CompressionAlgorithm,
}

impl Compress {
    pub fn new(algorithm: CompressionAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn from_params(params: &HashMap<String, String>) -> Result<Self> {
        let algorithm = params::required(params, "Compress", "algorithm")?;
        match algorithm.to_lowercase().as_str() {
            "gzip" => Ok(Self::new(CompressionAlgorithm::Gzip)),
            "zlib" => Ok(Self::new(CompressionAlgorithm::Zlib)),
            other => Err(ConfigurationError::InvalidParameter {
                function: "Compress".to_string(),
                parameter: "algorithm".to_string(),
                message: format!("{other} is not gzip or zlib"),
            }),
        }
    }

    fn compress(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        match self.algorithm {
            CompressionAlgorithm::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(data)?;
                encoder.finish()
            }
            CompressionAlgorithm::Zlib => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(data)?;
                encoder.finish()
            }
        }
    }
}

#[async_trait]
impl Transform for Compress {
    fn name(&self) -> &str {
        "Compress"
    }

    fn fingerprint(&self) -> String {
        let algorithm = match self.algorithm {
            CompressionAlgorithm::Gzip => "gzip",
            CompressionAlgorithm::Zlib => "zlib",
        };
        params::fingerprint(self.name(), &[algorithm])
    }

    async fn run(&self, _ctx: &mut Context, input: PipelineData) -> TransformResult {
        let raw = input.to_bytes()?;
        let compressed = self
            .compress(&raw)
            .map_err(|e| TransformError::new(format!("compression failed: {e}")))?;
        Ok(Some(PipelineData::Bytes(
            BASE64.encode(compressed).into_bytes(),
        )))
    }
}
