//! Encrypt transform.
//!
//! AES-256-GCM over the pipeline data. The configured key material is
//! stretched to a 256-bit key with SHA-256. When an init vector is
//! configured the nonce is derived from it; otherwise a random nonce is
//! generated per message and prepended to the ciphertext.

use std::collections::HashMap;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::RngCore;
use sha2::{Digest, Sha256};

use edgeflow_core::Context;
use edgeflow_runtime::{PipelineData, Transform, TransformError, TransformResult};

use crate::error::{ConfigurationError, Result};
use crate::params;
use crate::secrets::SecretProvider;

const NONCE_LEN: usize = 12;

/// Encrypts the pipeline data and emits base64(nonce || ciphertext).
pub struct Encrypt {
    key: [u8; 32],
    fixed_nonce: Option<[u8; NONCE_LEN]>,
}

impl Encrypt {
    pub fn new(key_material: &str, init_vector: Option<&str>) -> Self {
        let key: [u8; 32] = Sha256::digest(key_material.as_bytes()).into();
        let fixed_nonce = init_vector.map(|iv| {
            let digest = Sha256::digest(iv.as_bytes());
            let mut nonce = [0u8; NONCE_LEN];
            nonce.copy_from_slice(&digest[..NONCE_LEN]);
            nonce
        });
        Self { key, fixed_nonce }
    }

    /// Accepts `EncryptionKey` (+ optional `InitVector`) inline, or
    /// `SecretPath` + `SecretName` resolved through the provider.
    pub fn from_params(
        params: &HashMap<String, String>,
        secrets: &dyn SecretProvider,
    ) -> Result<Self> {
        let algorithm = params::required(params, "Encrypt", "algorithm")?;
        match algorithm.to_lowercase().as_str() {
            "aes" | "aes256" => {}
            other => {
                return Err(ConfigurationError::InvalidParameter {
                    function: "Encrypt".to_string(),
                    parameter: "algorithm".to_string(),
                    message: format!("{other} is not aes or aes256"),
                })
            }
        }
        if let Some(key) = params::optional(params, "encryptionkey") {
            let iv = params::optional(params, "initvector");
            return Ok(Self::new(&key, iv.as_deref()));
        }
        let path = params::required(params, "Encrypt", "secretpath")?;
        let name = params::required(params, "Encrypt", "secretname")?;
        let key = secrets.secret(&path, &name)?;
        Ok(Self::new(&key, None))
    }

    fn nonce(&self) -> [u8; NONCE_LEN] {
        match self.fixed_nonce {
            Some(nonce) => nonce,
            None => {
                let mut nonce = [0u8; NONCE_LEN];
                rand::thread_rng().fill_bytes(&mut nonce);
                nonce
            }
        }
    }
}

#[async_trait]
impl Transform for Encrypt {
    fn name(&self) -> &str {
        "Encrypt"
    }

    fn fingerprint(&self) -> String {
        params::fingerprint(self.name(), &[&hex::encode(self.key)])
    }

    async fn run(&self, _ctx: &mut Context, input: PipelineData) -> TransformResult {
        let plaintext = input.to_bytes()?;
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| TransformError::new(format!("bad encryption key: {e}")))?;
        let nonce = self.nonce();
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|e| TransformError::new(format!("encryption failed: {e}")))?;
        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(Some(PipelineData::Bytes(BASE64.encode(sealed).into_bytes())))
    }
}
