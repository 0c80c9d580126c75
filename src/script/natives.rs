//! # Native Name Database
//!
//! Optional lookup from native hashes to readable names, loaded from a
//! `natives.json` dictionary and a binary hash translation table.

use crate::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// One entry of the natives dictionary
#[derive(Debug, Clone, Deserialize)]
pub struct NativeEntry {
    /// Native name, e.g. `WAIT`
    pub name: String,
}

/// Native hash to name lookup
#[derive(Debug, Clone, Default)]
pub struct NativeDb {
    names: HashMap<u64, String>,
    translation: HashMap<u64, u64>,
}

impl NativeDb {
    /// Load from a natives JSON file and a translation table file
    pub fn load(natives: impl AsRef<Path>, translation: impl AsRef<Path>) -> Result<Self> {
        let natives = natives.as_ref();
        let json = std::fs::read_to_string(natives).map_err(|e| {
            Error::NativeDb(format!("Failed to read {}: {}", natives.display(), e))
        })?;
        let translation = translation.as_ref();
        let table = std::fs::read(translation).map_err(|e| {
            Error::NativeDb(format!("Failed to read {}: {}", translation.display(), e))
        })?;
        Self::parse(&json, &table)
    }

    /// Parse from in-memory contents
    ///
    /// `json` maps namespace to `"0xHASH"` to entry. `translation` is a flat
    /// sequence of little-endian `(versioned, canonical)` `u64` pairs.
    pub fn parse(json: &str, translation: &[u8]) -> Result<Self> {
        let namespaces: HashMap<String, HashMap<String, NativeEntry>> =
            serde_json::from_str(json)
                .map_err(|e| Error::NativeDb(format!("Failed to parse natives JSON: {}", e)))?;

        let mut names = HashMap::new();
        for entries in namespaces.into_values() {
            for (key, entry) in entries {
                let hex = key.trim_start_matches("0x").trim_start_matches("0X");
                let hash = u64::from_str_radix(hex, 16)
                    .map_err(|e| Error::NativeDb(format!("Bad native hash {}: {}", key, e)))?;
                names.insert(hash, entry.name);
            }
        }

        if translation.len() % 16 != 0 {
            return Err(Error::NativeDb(format!(
                "Translation table length {} is not a multiple of 16",
                translation.len()
            )));
        }
        let translation = translation
            .chunks_exact(16)
            .map(|pair| {
                let mut from = [0u8; 8];
                let mut to = [0u8; 8];
                from.copy_from_slice(&pair[..8]);
                to.copy_from_slice(&pair[8..]);
                (u64::from_le_bytes(from), u64::from_le_bytes(to))
            })
            .collect();

        Ok(Self { names, translation })
    }

    /// Name of a native, translating versioned hashes first
    pub fn resolve(&self, hash: u64) -> Option<&str> {
        let canonical = self.translation.get(&hash).copied().unwrap_or(hash);
        self.names.get(&canonical).map(String::as_str)
    }

    /// Number of named natives
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether no natives are named
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
