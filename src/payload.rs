//! Payload generation for send mode.
//!
//! Sizes grow in powers of two; each payload is a random hex string whose
//! length in bytes equals the requested size.

use bytes::Bytes;
use rand::RngCore;

/// Payload sizes `1 << start ..= 1 << end`, doubling each step.
#[derive(Debug, Clone)]
pub struct StepSizes {
    step: u32,
    end: u32,
}

impl StepSizes {
    pub fn new(start_step: u32, end_step: u32) -> Self {
        StepSizes {
            step: start_step,
            end: end_step,
        }
    }
}

impl Iterator for StepSizes {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.step > self.end {
            return None;
        }
        let size = 1usize << self.step;
        self.step += 1;
        Some(size)
    }
}

/// Random hex payload of `len` bytes (`len / 2` random bytes, hex-encoded).
pub fn random_hex(len: usize) -> Result<Bytes, rand::Error> {
    let mut raw = vec![0u8; len / 2];
    rand::thread_rng().try_fill_bytes(&mut raw)?;
    Ok(Bytes::from(hex::encode(raw)))
}
