//! Call-site signatures
//!
//! A signature identifies "the same query from the same place": a blake3
//! digest over the normalized query shape and a bounded sample of the
//! frames nearest the query call. The digest is only used for hashing;
//! equality compares the shape and frame sample exactly, so two call-sites
//! whose digests collide still get distinct callsites.

use crate::query::QueryShape;
use blake3::Hasher;
use frugal_types::Frame;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

/// Number of frames folded into a signature unless configured otherwise
pub const DEFAULT_FRAME_SAMPLE: usize = 10;

/// Identifier of one call-site + query shape
#[derive(Clone)]
pub struct Signature {
    digest: [u8; 32],
    shape: Arc<str>,
    origin: Arc<[String]>,
}

impl Signature {
    fn new(shape: &QueryShape, origin: Vec<String>) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(shape.as_str().as_bytes());
        hasher.update(&[0]);
        for frame in &origin {
            hasher.update(frame.as_bytes());
            hasher.update(b"\n");
        }

        Signature {
            digest: *hasher.finalize().as_bytes(),
            shape: Arc::from(shape.as_str()),
            origin: Arc::from(origin),
        }
    }

    pub fn digest(&self) -> &[u8; 32] {
        &self.digest
    }

    pub fn shape(&self) -> &str {
        &self.shape
    }

    /// Sampled frames, nearest first
    pub fn origin(&self) -> &[String] {
        &self.origin
    }

    /// Hex form of the first 8 digest bytes
    pub fn short_hex(&self) -> String {
        self.digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl PartialEq for Signature {
    fn eq(&self, other: &Self) -> bool {
        self.digest == other.digest && self.shape == other.shape && self.origin == other.origin
    }
}

impl Eq for Signature {}

impl Hash for Signature {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write(&self.digest[..8]);
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signature")
            .field("digest", &self.short_hex())
            .field("shape", &self.shape)
            .field("frames", &self.origin.len())
            .finish()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short_hex())
    }
}

/// Derives signatures from a call stack and a query shape
#[derive(Debug, Clone, Copy)]
pub struct SignatureComputer {
    frame_sample: usize,
}

impl SignatureComputer {
    pub fn new(frame_sample: usize) -> Self {
        SignatureComputer { frame_sample }
    }

    pub fn frame_sample(&self) -> usize {
        self.frame_sample
    }

    /// Compute the signature for a query issued from `stack`
    pub fn compute(&self, stack: &[Frame], shape: &QueryShape) -> Signature {
        let origin = stack
            .iter()
            .take(self.frame_sample)
            .map(ToString::to_string)
            .collect();
        Signature::new(shape, origin)
    }
}

impl Default for SignatureComputer {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_SAMPLE)
    }
}
