//! Redemption code generation.
//!
//! Codes come from `rand::thread_rng`, a CSPRNG, over a 32-symbol alphabet
//! without the look-alikes `0`, `O`, `1` and `I`. Every symbol carries five
//! bits, so the default 12-symbol code has 60 bits of entropy.

use std::collections::HashSet;

use rand::Rng;

const ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const GROUP: usize = 4;

pub const DEFAULT_CODE_LENGTH: usize = 12;
pub const MIN_CODE_LENGTH: usize = 8;
pub const MAX_CODE_LENGTH: usize = 32;

/// Whether `length` is accepted for generated codes.
pub fn is_valid_code_length(length: usize) -> bool {
    (MIN_CODE_LENGTH..=MAX_CODE_LENGTH).contains(&length) && length % GROUP == 0
}

/// Canonical form used for storage and lookup.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

#[derive(Debug, Clone)]
pub struct CodeGenerator {
    length: usize,
}

impl CodeGenerator {
    /// `length` counts symbols, not separators. Lengths outside
    /// [`is_valid_code_length`] fall back to the default.
    pub fn new(length: usize) -> Self {
        let length = if is_valid_code_length(length) {
            length
        } else {
            tracing::warn!(length, "Unsupported code length, using default");
            DEFAULT_CODE_LENGTH
        };
        Self { length }
    }

    pub fn generate(&self) -> String {
        let mut rng = rand::thread_rng();
        let mut code = String::with_capacity(self.length + self.length / GROUP);
        for i in 0..self.length {
            if i > 0 && i % GROUP == 0 {
                code.push('-');
            }
            code.push(ALPHABET[rng.gen_range(0..ALPHABET.len())] as char);
        }
        code
    }

    /// `count` pairwise distinct codes.
    pub fn generate_distinct(&self, count: usize) -> Vec<String> {
        let mut seen = HashSet::with_capacity(count);
        let mut codes = Vec::with_capacity(count);
        while codes.len() < count {
            let code = self.generate();
            if seen.insert(code.clone()) {
                codes.push(code);
            }
        }
        codes
    }
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_CODE_LENGTH)
    }
}
