//! Stable version tokens for configuration subtrees.
//!
//! A subtree is first serialized into a canonical byte form in which object
//! keys are sorted and numbers have one spelling, then hashed with 64-bit
//! FNV-1a. Two subtrees with the same content therefore share a token no
//! matter the order their keys were inserted in.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use thiserror::Error;

/// FNV-1a offset basis for 64-bit.
const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
/// FNV-1a prime for 64-bit.
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Largest float magnitude still written as an exact integer.
const EXACT_INTEGER_LIMIT: f64 = 9_007_199_254_740_992.0;

/// Hash identifying one revision of a configuration subtree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionToken(u64);

impl VersionToken {
    /// Wraps a raw token value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw token value.
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }

    /// Token of an already canonical JSON value.
    #[must_use]
    pub fn of_value(value: &Value) -> Self {
        Self(fnv1a(&canonical_bytes(value)))
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Errors raised while canonicalising a configuration subtree.
#[derive(Debug, Error)]
pub enum CanonicalError {
    /// The subtree could not be represented as JSON.
    #[error("configuration subtree is not serializable: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Computes the version token of any serializable subtree.
pub fn version_token<T>(subtree: &T) -> Result<VersionToken, CanonicalError>
where
    T: Serialize + ?Sized,
{
    let value = serde_json::to_value(subtree)?;
    Ok(VersionToken::of_value(&value))
}

/// Canonical byte form of a JSON value.
///
/// Objects are written with their keys sorted, integral floats are written as
/// integers and every scalar carries a type tag, so distinct values never
/// share a spelling.
#[must_use]
pub fn canonical_bytes(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.push(b'n'),
        Value::Bool(true) => out.push(b't'),
        Value::Bool(false) => out.push(b'f'),
        Value::Number(number) => write_number(number, out),
        Value::String(text) => write_string(text, out),
        Value::Array(items) => {
            out.push(b'[');
            for item in items {
                write_canonical(item, out);
            }
            out.push(b']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push(b'{');
            for (key, item) in entries {
                write_string(key, out);
                write_canonical(item, out);
            }
            out.push(b'}');
        }
    }
}

fn write_number(number: &Number, out: &mut Vec<u8>) {
    let spelled = if let Some(integer) = number.as_i64() {
        format!("i{integer}")
    } else if let Some(integer) = number.as_u64() {
        format!("i{integer}")
    } else {
        let float = number.as_f64().unwrap_or(f64::NAN);
        if float.is_finite() && float.fract() == 0.0 && float.abs() < EXACT_INTEGER_LIMIT {
            format!("i{}", float as i64)
        } else {
            format!("d{float}")
        }
    };
    out.extend_from_slice(spelled.as_bytes());
    out.push(b';');
}

fn write_string(text: &str, out: &mut Vec<u8>) {
    out.extend_from_slice(format!("s{}:", text.len()).as_bytes());
    out.extend_from_slice(text.as_bytes());
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, &byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    })
}
