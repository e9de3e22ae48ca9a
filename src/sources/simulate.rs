//! Deterministic generators for simulated payloads.
//!
//! The RNG is seeded from a SHA-256 fingerprint of the source kind and the
//! serialized request, so the same request always simulates the same world.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Uniform};
use sha2::{Digest, Sha256};

use crate::config::SimulationConfig;

use super::{SourceKind, SourceRequest};

pub struct SimRng {
    rng: StdRng,
    confidence_min: f64,
    confidence_max: f64,
}

fn digest_seed(parts: &[&[u8]]) -> u64 {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Seed derived from the source kind, the request and a configurable salt.
pub fn request_seed(kind: SourceKind, request: &SourceRequest, salt: u64) -> u64 {
    let body = serde_json::to_vec(request).unwrap_or_default();
    let salt = salt.to_le_bytes();
    digest_seed(&[kind.source_id().as_bytes(), body.as_slice(), salt.as_slice()])
}

/// Seed from arbitrary text, used to derive stable synthetic metrics for live records.
pub fn text_seed(text: &str, salt: u64) -> u64 {
    let salt = salt.to_le_bytes();
    digest_seed(&[text.as_bytes(), salt.as_slice()])
}

impl SimRng {
    pub fn for_request(kind: SourceKind, request: &SourceRequest, sim: &SimulationConfig) -> Self {
        Self::from_seed(request_seed(kind, request, sim.seed_salt), sim)
    }

    pub fn from_seed(seed: u64, sim: &SimulationConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            confidence_min: sim.confidence_min,
            confidence_max: sim.confidence_max,
        }
    }

    /// Uniform in `[low, high)`; returns `low` for an empty range.
    pub fn uniform(&mut self, low: f64, high: f64) -> f64 {
        match Uniform::new(low, high) {
            Ok(dist) => dist.sample(&mut self.rng),
            Err(_) => low,
        }
    }

    /// Uniform integer in `[low, high]`.
    pub fn int(&mut self, low: i64, high: i64) -> i64 {
        match Uniform::new_inclusive(low, high) {
            Ok(dist) => dist.sample(&mut self.rng),
            Err(_) => low,
        }
    }

    pub fn chance(&mut self, p: f64) -> bool {
        self.uniform(0.0, 1.0) < p
    }

    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            return None;
        }
        let idx = self.int(0, items.len() as i64 - 1) as usize;
        items.get(idx)
    }

    /// Confidence for a simulated payload, drawn from the configured range.
    pub fn confidence(&mut self) -> f64 {
        let (lo, hi) = (self.confidence_min, self.confidence_max);
        round2(self.uniform(lo, hi))
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
