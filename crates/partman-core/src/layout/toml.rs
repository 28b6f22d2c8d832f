//! TOML requirement document parsing
//!
//! Requirement documents map partition names to constraint records:
//!
//! ```toml
//! [mcuboot]
//! size = 0xc000
//! placement = { before = ["app"] }
//!
//! [mcuboot_pad]
//! size = 0x200
//! placement = { before = "mcuboot_primary_app", align = { start = 0x1000 } }
//!
//! [mcuboot_primary]
//! span = ["mcuboot_pad", "mcuboot_primary_app"]
//!
//! [settings_storage]
//! size = "0x2000"
//! placement = { before = "end" }
//! ```
//!
//! Several documents can be merged; a partition defined in more than one of
//! them must be defined identically everywhere.

use indexmap::IndexMap;

use super::{PartitionReq, Requirements};
use crate::error::{PartitionError, Result};

/// Deserialize a u64 that can be an integer or a hex/decimal string
pub(crate) fn deserialize_hex_u64<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum HexOrInt {
        Int(u64),
        Str(String),
    }

    match HexOrInt::deserialize(deserializer)? {
        HexOrInt::Int(n) => Ok(n),
        HexOrInt::Str(s) => parse_number(&s).map_err(serde::de::Error::custom),
    }
}

/// Optional variant of [`deserialize_hex_u64`]
pub(crate) fn deserialize_opt_hex_u64<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    deserialize_hex_u64(deserializer).map(Some)
}

/// Parse a number that can be hex (0x...) or decimal
pub(crate) fn parse_number(s: &str) -> std::result::Result<u64, String> {
    let s = s.trim().replace('_', "");
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).map_err(|e| format!("invalid hex '{}': {}", s, e))
    } else {
        s.parse()
            .map_err(|e| format!("invalid number '{}': {}", s, e))
    }
}

/// Parse one document into its records, keeping document order
pub fn parse_document(source_name: &str, content: &str) -> Result<IndexMap<String, PartitionReq>> {
    toml::from_str(content).map_err(|e| PartitionError::Parse {
        source_name: source_name.to_string(),
        message: e.to_string(),
    })
}

impl Requirements {
    /// Parse a single requirement document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Self::from_reqs(parse_document("requirements", content)?)
    }

    /// Merge several named documents into one arena
    ///
    /// A partition that appears in more than one document must be identical
    /// in all of them.
    pub fn merge_documents<'a, I>(documents: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut merged: IndexMap<String, PartitionReq> = IndexMap::new();

        for (source_name, content) in documents {
            let document = parse_document(source_name, content)?;
            log::debug!("Loaded {} partitions from {}", document.len(), source_name);

            for (key, req) in document {
                match merged.get(&key) {
                    Some(existing) if *existing != req => {
                        return Err(PartitionError::ConflictingDefinition {
                            key,
                            source_name: source_name.to_string(),
                        });
                    }
                    Some(_) => {}
                    None => {
                        merged.insert(key, req);
                    }
                }
            }
        }

        Self::from_reqs(merged)
    }
}
