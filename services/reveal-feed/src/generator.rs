//! Number Generator
//!
//! Stateless capability producing a uniformly distributed digit in `[0,10)`.
//! Production uses the operating system CSPRNG; simulations and tests use a
//! seeded ChaCha stream so runs are reproducible.

use std::sync::Mutex;

use rand::rngs::OsRng;
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use thiserror::Error;
use types::errors::TypeError;
use types::result::Digit;

#[derive(Error, Debug)]
pub enum GeneratorError {
    #[error("Entropy source failed: {0}")]
    Entropy(#[from] rand::Error),

    #[error("Invalid digit: {0}")]
    Digit(#[from] TypeError),
}

/// Source of uniformly distributed decimal digits.
pub trait NumberGenerator: Send + Sync {
    fn next_digit(&self) -> Result<Digit, GeneratorError>;
}

/// Largest multiple of 10 that fits in a byte; bytes at or above it are
/// rejected to keep the distribution uniform.
const REJECTION_BOUND: u8 = 250;

/// Cryptographically secure generator backed by the OS entropy source.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRngGenerator;

impl NumberGenerator for OsRngGenerator {
    fn next_digit(&self) -> Result<Digit, GeneratorError> {
        let mut byte = [0u8; 1];
        loop {
            OsRng.try_fill_bytes(&mut byte)?;
            if byte[0] < REJECTION_BOUND {
                return Ok(Digit::new(byte[0] % Digit::RANGE_END)?);
            }
        }
    }
}

/// Deterministic generator for simulations and tests.
pub struct SeededGenerator {
    rng: Mutex<ChaCha20Rng>,
}

impl SeededGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(ChaCha20Rng::seed_from_u64(seed)),
        }
    }
}

impl NumberGenerator for SeededGenerator {
    fn next_digit(&self) -> Result<Digit, GeneratorError> {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(Digit::new(rng.gen_range(0..Digit::RANGE_END))?)
    }
}
