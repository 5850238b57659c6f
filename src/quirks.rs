// SPDX-License-Identifier: GPL-3.0-only

//! Extension Unit quirks registry: vendor-specific knowledge about XU
//! controls (human name, value type, expected GET_INFO bits) that the
//! descriptor tree alone cannot carry, loaded from JSON files and merged
//! into the live device by (GUID, selector).
//!
//! Grounded on this crate's teacher's own JSON-backed quirk tables for V4L2
//! controls (`backends/camera/v4l2_controls.rs` loads a static control list
//! keyed by a similar (name, id) pair); serialized here with `serde`/
//! `serde_json`, the same pair the teacher uses for its on-disk config.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{UvcError, UvcResult};

/// One quirk entry for a single (GUID, selector) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorQuirk {
    pub selector: u8,
    pub name: String,
    /// Free-form value type hint, e.g. `"u8"`, `"bitmask"`, `"enum"`.
    #[serde(rename = "type")]
    pub control_type: String,
    /// Expected GET_INFO byte, if the vendor documents one; a mismatch is
    /// logged but never fatal.
    #[serde(default)]
    pub get_info_expect: Option<u8>,
}

/// One quirks file: every selector the registry knows about for a single
/// Extension Unit GUID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuirkEntry {
    pub schema_version: u32,
    /// GUID written as a 32-hex-digit string (no braces/dashes required).
    pub guid: String,
    pub name: String,
    pub controls: Vec<SelectorQuirk>,
}

fn parse_guid_hex(s: &str) -> Option<[u8; 16]> {
    let cleaned: String = s.chars().filter(|c| c.is_ascii_hexdigit()).collect();
    if cleaned.len() != 32 {
        return None;
    }
    let mut out = [0u8; 16];
    for i in 0..16 {
        out[i] = u8::from_str_radix(&cleaned[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(out)
}

/// Loaded, indexed quirks: `(guid, selector) -> SelectorQuirk`.
#[derive(Debug, Clone, Default)]
pub struct QuirksRegistry {
    entries: HashMap<([u8; 16], u8), SelectorQuirk>,
    names: HashMap<[u8; 16], String>,
}

impl QuirksRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load every `*.json` file in `dir`, merging on (GUID, selector). A
    /// later file wins over an earlier one for the same pair, per spec.md
    /// §4.7's merge policy; malformed files are logged and skipped rather
    /// than aborting the load.
    pub fn load_dir(dir: impl AsRef<Path>) -> UvcResult<Self> {
        let dir = dir.as_ref();
        let mut registry = Self::empty();

        let read_dir = match std::fs::read_dir(dir) {
            Ok(rd) => rd,
            Err(e) => return Err(UvcError::Io(format!("reading quirks dir {:?}: {}", dir, e))),
        };

        let mut paths: Vec<_> = read_dir
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| p.extension().map(|ext| ext == "json").unwrap_or(false))
            .collect();
        paths.sort();

        for path in paths {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match serde_json::from_str::<QuirkEntry>(&contents) {
                    Ok(entry) => registry.merge(entry),
                    Err(e) => warn!(?path, error = %e, "skipping malformed quirks file"),
                },
                Err(e) => warn!(?path, error = %e, "skipping unreadable quirks file"),
            }
        }

        Ok(registry)
    }

    fn merge(&mut self, entry: QuirkEntry) {
        let Some(guid) = parse_guid_hex(&entry.guid) else {
            warn!(guid = %entry.guid, "skipping quirks entry with unparsable GUID");
            return;
        };
        self.names.insert(guid, entry.name.clone());
        for control in entry.controls {
            debug!(?guid, selector = control.selector, name = %control.name, "merged quirk control");
            self.entries.insert((guid, control.selector), control);
        }
    }

    pub fn lookup(&self, guid: &[u8; 16], selector: u8) -> Option<&SelectorQuirk> {
        self.entries.get(&(*guid, selector))
    }

    pub fn name_for(&self, guid: &[u8; 16]) -> Option<&str> {
        self.names.get(guid).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_guid_with_or_without_separators() {
        let dashed = "aabbccdd-eeff-0011-2233-445566778899";
        let plain = "aabbccddeeff00112233445566778899";
        assert_eq!(parse_guid_hex(dashed), parse_guid_hex(plain));
        assert_eq!(parse_guid_hex(dashed).unwrap()[0], 0xaa);
    }

    #[test]
    fn rejects_short_guid() {
        assert!(parse_guid_hex("aabb").is_none());
    }

    #[test]
    fn merge_overwrites_same_selector() {
        let mut registry = QuirksRegistry::empty();
        let guid = "aabbccddeeff00112233445566778899";
        registry.merge(QuirkEntry {
            schema_version: 1,
            guid: guid.to_string(),
            name: "vendor-a".into(),
            controls: vec![SelectorQuirk {
                selector: 0x01,
                name: "old".into(),
                control_type: "u8".into(),
                get_info_expect: None,
            }],
        });
        registry.merge(QuirkEntry {
            schema_version: 1,
            guid: guid.to_string(),
            name: "vendor-a".into(),
            controls: vec![SelectorQuirk {
                selector: 0x01,
                name: "new".into(),
                control_type: "u8".into(),
                get_info_expect: Some(0x03),
            }],
        });
        let key = parse_guid_hex(guid).unwrap();
        let found = registry.lookup(&key, 0x01).unwrap();
        assert_eq!(found.name, "new");
        assert_eq!(found.get_info_expect, Some(0x03));
    }
}
