//! Composite index keys: `(foreign key, primary key)` packed into one byte
//! string whose ordering keeps every primary key of a foreign key together.

use serde::{Deserialize, Serialize};

use crate::error::IndexError;

const LEN_PREFIX: usize = 4;

/// Layout of composite keys in the index collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyEncoding {
    /// `u32` big-endian foreign-key length, foreign key, primary key.
    /// Decodes unambiguously for any foreign key.
    LengthPrefixed,
    /// `fk <sep> pk`. Compatible with indexes written by separator-based
    /// layouts; foreign keys containing the separator are rejected.
    Separator(u8),
}

impl Default for KeyEncoding {
    fn default() -> Self {
        Self::LengthPrefixed
    }
}

impl KeyEncoding {
    /// Build the composite key for a pair.
    pub fn encode(&self, foreign_key: &[u8], primary_key: &[u8]) -> Result<Vec<u8>, IndexError> {
        let mut key = self.prefix(foreign_key)?;
        key.extend_from_slice(primary_key);
        Ok(key)
    }

    /// Key prefix shared by every entry of `foreign_key`.
    pub fn prefix(&self, foreign_key: &[u8]) -> Result<Vec<u8>, IndexError> {
        match *self {
            Self::LengthPrefixed => {
                let len = u32::try_from(foreign_key.len()).map_err(|_| {
                    IndexError::MalformedKey(format!(
                        "foreign key of {} bytes exceeds u32 length prefix",
                        foreign_key.len()
                    ))
                })?;
                let mut key = Vec::with_capacity(LEN_PREFIX + foreign_key.len());
                key.extend_from_slice(&len.to_be_bytes());
                key.extend_from_slice(foreign_key);
                Ok(key)
            }
            Self::Separator(sep) => {
                if foreign_key.contains(&sep) {
                    return Err(IndexError::ReservedSeparator {
                        foreign_key: String::from_utf8_lossy(foreign_key).into_owned(),
                        separator: sep,
                    });
                }
                let mut key = Vec::with_capacity(foreign_key.len() + 1);
                key.extend_from_slice(foreign_key);
                key.push(sep);
                Ok(key)
            }
        }
    }

    /// Split a composite key back into `(foreign key, primary key)`.
    pub fn decode<'k>(&self, key: &'k [u8]) -> Result<(&'k [u8], &'k [u8]), IndexError> {
        match *self {
            Self::LengthPrefixed => {
                if key.len() < LEN_PREFIX {
                    return Err(malformed(key));
                }
                let (len, rest) = key.split_at(LEN_PREFIX);
                let mut raw = [0u8; LEN_PREFIX];
                raw.copy_from_slice(len);
                let fk_len = u32::from_be_bytes(raw) as usize;
                if fk_len > rest.len() {
                    return Err(malformed(key));
                }
                Ok(rest.split_at(fk_len))
            }
            Self::Separator(sep) => {
                let at = key.iter().position(|b| *b == sep).ok_or_else(|| malformed(key))?;
                Ok((&key[..at], &key[at + 1..]))
            }
        }
    }
}

fn malformed(key: &[u8]) -> IndexError {
    IndexError::MalformedKey(String::from_utf8_lossy(key).into_owned())
}
