//! The tree's Ed25519 identity and the handshake proof built on it.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Prefix binding a proof to this protocol and version.
const TRANSCRIPT_CONTEXT: &[u8] = b"arbor-handshake-v1";

/// Number of random bytes in a handshake challenge.
pub const NONCE_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("failed to read key file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write key file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed key material: {0}")]
    Malformed(String),
}

/// Holds the private key of this tree.
///
/// The key is loaded once at startup; only the public half and signatures
/// ever leave this type.
pub struct KeyStore {
    signing_key: SigningKey,
}

impl KeyStore {
    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        Self { signing_key }
    }

    /// Creates a store around a fresh random key.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    /// Loads a key file holding the 32-byte seed as 64 hex characters.
    pub fn load(path: &Path) -> Result<Self, KeyError> {
        let contents = std::fs::read_to_string(path).map_err(|source| KeyError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let seed = hex::decode(contents.trim())
            .map_err(|e| KeyError::Malformed(format!("key file is not hex: {e}")))?;
        let seed: [u8; 32] = seed
            .try_into()
            .map_err(|_| KeyError::Malformed("key seed must be 32 bytes".to_string()))?;
        Ok(Self::from_signing_key(SigningKey::from_bytes(&seed)))
    }

    /// Generates a key and writes its seed to `path`.
    pub fn generate_to(path: &Path) -> Result<Self, KeyError> {
        let store = Self::generate();
        let write_error = |source: std::io::Error| KeyError::Write {
            path: path.to_path_buf(),
            source,
        };
        std::fs::write(path, hex::encode(store.signing_key.to_bytes())).map_err(write_error)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .map_err(write_error)?;
        }
        tracing::info!(path = %path.display(), "generated new tree key");
        Ok(store)
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// The public key as lowercase hex, the form exchanged in `introduce`.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.verifying_key().as_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    /// Answers a challenge: signs the transcript naming this tree as the
    /// prover and `verifier_domain` as the tree that issued `nonce`.
    pub fn prove(&self, nonce: &[u8], own_domain: &str, verifier_domain: &str) -> String {
        let transcript = handshake_transcript(nonce, own_domain, verifier_domain);
        hex::encode(self.sign(&transcript).to_bytes())
    }
}

impl fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyStore")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

/// Parses a hex-encoded Ed25519 public key.
pub fn parse_public_key(key_hex: &str) -> Result<VerifyingKey, KeyError> {
    let bytes = hex::decode(key_hex.trim())
        .map_err(|e| KeyError::Malformed(format!("public key is not hex: {e}")))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| KeyError::Malformed("public key must be 32 bytes".to_string()))?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| KeyError::Malformed(e.to_string()))
}

/// Bytes signed to prove key possession during the handshake.
///
/// Both domains are part of the transcript, so a proof made for one tree
/// cannot be replayed against another.
pub fn handshake_transcript(nonce: &[u8], prover_domain: &str, verifier_domain: &str) -> Vec<u8> {
    let mut transcript = Vec::with_capacity(
        TRANSCRIPT_CONTEXT.len() + nonce.len() + prover_domain.len() + verifier_domain.len() + 3,
    );
    transcript.extend_from_slice(TRANSCRIPT_CONTEXT);
    transcript.push(b':');
    transcript.extend_from_slice(nonce);
    transcript.push(b':');
    transcript.extend_from_slice(prover_domain.as_bytes());
    transcript.push(b':');
    transcript.extend_from_slice(verifier_domain.as_bytes());
    transcript
}

/// Checks a hex signature over the handshake transcript.
pub fn verify_proof(
    key: &VerifyingKey,
    nonce: &[u8],
    prover_domain: &str,
    verifier_domain: &str,
    signature_hex: &str,
) -> bool {
    let Ok(bytes) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(bytes) = <[u8; 64]>::try_from(bytes.as_slice()) else {
        return false;
    };
    let signature = Signature::from_bytes(&bytes);
    let transcript = handshake_transcript(nonce, prover_domain, verifier_domain);
    key.verify_strict(&transcript, &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_key_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tree.key");

        let generated = KeyStore::generate_to(&path).unwrap();
        let loaded = KeyStore::load(&path).unwrap();
        assert_eq!(generated.public_key_hex(), loaded.public_key_hex());
        assert_eq!(loaded.public_key_hex().len(), 64);
    }

    #[test]
    fn load_rejects_short_seed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tree.key");
        std::fs::write(&path, "abcd").unwrap();

        assert!(matches!(KeyStore::load(&path), Err(KeyError::Malformed(_))));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = KeyStore::load(Path::new("/nonexistent/arbor.key")).unwrap_err();
        assert!(matches!(err, KeyError::Read { .. }));
    }

    #[test]
    fn proof_verifies_only_for_the_same_transcript() {
        let keys = KeyStore::generate();
        let nonce = [7u8; NONCE_LEN];
        let proof = keys.prove(&nonce, "a.example", "b.example");
        let key = parse_public_key(&keys.public_key_hex()).unwrap();

        assert!(verify_proof(&key, &nonce, "a.example", "b.example", &proof));
        assert!(!verify_proof(&key, &[8u8; NONCE_LEN], "a.example", "b.example", &proof));
        assert!(!verify_proof(&key, &nonce, "a.example", "c.example", &proof));
        assert!(!verify_proof(&key, &nonce, "a.example", "b.example", "zz"));
    }

    #[test]
    fn proof_from_another_key_is_rejected() {
        let keys = KeyStore::generate();
        let impostor = KeyStore::generate();
        let nonce = [1u8; NONCE_LEN];
        let proof = impostor.prove(&nonce, "a.example", "b.example");

        assert!(!verify_proof(&keys.verifying_key(), &nonce, "a.example", "b.example", &proof));
    }

    #[test]
    fn debug_output_omits_private_key() {
        let keys = KeyStore::from_signing_key(SigningKey::from_bytes(&[42u8; 32]));
        let rendered = format!("{keys:?}");
        assert!(rendered.contains(&keys.public_key_hex()));
        assert!(!rendered.contains(&hex::encode([42u8; 32])));
    }
}
