//! Report signing key, loaded once at startup.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use prmx_oracle_core::model::ReportPayload;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::SignerSecret;
use crate::ledger::{ReportCall, SignedReport};

const SEED_DOMAIN: &[u8] = b"prmx-oracle/signer/v1";
const REPORT_DOMAIN: &[u8] = b"prmx-oracle/v2-report";

/// Secret could not be turned into a key.
#[derive(Debug, Error)]
pub enum SignerError {
    /// Nothing but whitespace.
    #[error("signer secret is empty")]
    Empty,
    /// `0x` value that is not 32 bytes of hex.
    #[error("hex seed must be 32 bytes: {0}")]
    BadSeed(String),
    /// Phrase with fewer than 12 words.
    #[error("mnemonic must have at least 12 words, got {0}")]
    ShortMnemonic(usize),
}

/// ed25519 oracle key. `Debug` shows the account only.
pub struct ReportSigner {
    key: SigningKey,
    account: String,
}

impl std::fmt::Debug for ReportSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportSigner").field("account", &self.account).finish_non_exhaustive()
    }
}

impl ReportSigner {
    /// Derives the key from a `0x` hex seed or a mnemonic phrase.
    pub fn from_secret(secret: &SignerSecret) -> Result<Self, SignerError> {
        let raw = secret.expose().trim();
        if raw.is_empty() {
            return Err(SignerError::Empty);
        }

        let seed: [u8; 32] = if let Some(hex_seed) = raw.strip_prefix("0x") {
            let mut seed = [0u8; 32];
            hex::decode_to_slice(hex_seed, &mut seed).map_err(|e| SignerError::BadSeed(e.to_string()))?;
            seed
        } else {
            let words: Vec<String> = raw.split_whitespace().map(str::to_lowercase).collect();
            if words.len() < 12 {
                return Err(SignerError::ShortMnemonic(words.len()));
            }
            let mut hasher = Sha256::new();
            hasher.update(SEED_DOMAIN);
            hasher.update(words.join(" ").as_bytes());
            hasher.finalize().into()
        };

        Ok(Self::from_seed(&seed))
    }

    /// Uses a raw 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let key = SigningKey::from_bytes(seed);
        let account = format!("0x{}", hex::encode(key.verifying_key().to_bytes()));
        Self { key, account }
    }

    /// Hex-encoded public key; the signer's account on the ledger.
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Signs `payload` for submission with the given account nonce.
    pub fn sign_report(&self, payload: &ReportPayload, nonce: u64) -> SignedReport {
        let call = ReportCall::from_payload(payload);
        let signature = self.key.sign(&signing_message(&call, nonce));
        SignedReport {
            signer: self.account.clone(),
            nonce,
            call,
            signature: format!("0x{}", hex::encode(signature.to_bytes())),
        }
    }
}

/// Bytes covered by the report signature.
pub fn signing_message(call: &ReportCall, nonce: u64) -> Vec<u8> {
    let mut msg = Vec::with_capacity(REPORT_DOMAIN.len() + 8 + 1 + 8 + 8 + 32 + 8);
    msg.extend_from_slice(REPORT_DOMAIN);
    msg.extend_from_slice(&call.policy_id.to_le_bytes());
    msg.push(call.outcome.code());
    msg.extend_from_slice(&call.observed_at_ms.to_le_bytes());
    msg.extend_from_slice(&call.cumulative_mm_x1000.to_le_bytes());
    msg.extend_from_slice(call.evidence_hash.as_bytes());
    msg.extend_from_slice(&nonce.to_le_bytes());
    msg
}

/// Checks a signed report against its embedded signer key.
pub fn verify_signed_report(report: &SignedReport) -> bool {
    let Some(pk) = decode_fixed::<32>(&report.signer) else {
        return false;
    };
    let Some(sig) = decode_fixed::<64>(&report.signature) else {
        return false;
    };
    let Ok(vk) = VerifyingKey::from_bytes(&pk) else {
        return false;
    };
    vk.verify(&signing_message(&report.call, report.nonce), &Signature::from_bytes(&sig))
        .is_ok()
}

fn decode_fixed<const N: usize>(s: &str) -> Option<[u8; N]> {
    let mut out = [0u8; N];
    hex::decode_to_slice(s.strip_prefix("0x").unwrap_or(s), &mut out).ok()?;
    Some(out)
}
