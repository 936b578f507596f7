//! Process-wide runtime defaults, consulted when a layout leaves a setting out.
//!
//! ```toml
//! flush-per-record = false
//! max-record-length = 4096
//! positive-zone-sign-nibble = 0xC
//! allowed-record-separators = ["\n", "\r\n"]
//! ```

use crate::error::FormatError;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct RuntimeDefaults {
    /// Global sign nibbles; `None` falls through to the charset family default.
    pub positive_zone_sign_nibble: Option<u8>,
    pub negative_zone_sign_nibble: Option<u8>,
    pub positive_pack_sign_nibble: Option<u8>,
    pub negative_pack_sign_nibble: Option<u8>,
    pub allowed_record_separators: Vec<String>,
    pub flush_per_record: bool,
    pub max_record_length: usize,
    pub title_record_type_name: String,
    pub required_decimal_point: bool,
    pub fixed_sign_position: bool,
    pub required_plus_sign: bool,
    /// Quote a variable-length column only when it holds a separator or the quote.
    pub minimal_quoting: bool,
}

impl Default for RuntimeDefaults {
    fn default() -> Self {
        RuntimeDefaults {
            positive_zone_sign_nibble: None,
            negative_zone_sign_nibble: None,
            positive_pack_sign_nibble: None,
            negative_pack_sign_nibble: None,
            allowed_record_separators: vec!["\r".into(), "\n".into(), "\r\n".into()],
            flush_per_record: true,
            max_record_length: 65536,
            title_record_type_name: "Title".into(),
            required_decimal_point: false,
            fixed_sign_position: false,
            required_plus_sign: false,
            minimal_quoting: false,
        }
    }
}

impl RuntimeDefaults {
    pub fn from_toml_str(content: &str) -> Result<Self, FormatError> {
        let defaults: RuntimeDefaults =
            toml::from_str(content).map_err(|e| FormatError::Config(e.to_string()))?;
        defaults.check()?;
        Ok(defaults)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FormatError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let content =
            std::fs::read_to_string(path).map_err(|e| FormatError::io(Some(&display), e))?;
        Self::from_toml_str(&content).map_err(|e| match e {
            FormatError::Config(msg) => FormatError::Config(format!("{}: {}", display, msg)),
            other => other,
        })
    }

    pub fn is_allowed_separator(&self, separator: &str) -> bool {
        self.allowed_record_separators.iter().any(|s| s == separator)
    }

    fn check(&self) -> Result<(), FormatError> {
        let nibbles = [
            ("positive-zone-sign-nibble", self.positive_zone_sign_nibble),
            ("negative-zone-sign-nibble", self.negative_zone_sign_nibble),
            ("positive-pack-sign-nibble", self.positive_pack_sign_nibble),
            ("negative-pack-sign-nibble", self.negative_pack_sign_nibble),
        ];
        for (name, value) in nibbles {
            if let Some(n) = value.filter(|&n| n > 0xF) {
                return Err(FormatError::Config(format!(
                    "{} must be a nibble (0x0..0xF), got 0x{:X}",
                    name, n
                )));
            }
        }
        if self.max_record_length == 0 {
            return Err(FormatError::Config("max-record-length must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_document_is_default() {
        assert_eq!(RuntimeDefaults::from_toml_str("").unwrap(), RuntimeDefaults::default());
        assert!(RuntimeDefaults::default().is_allowed_separator("\r\n"));
    }

    #[test]
    fn overrides_apply() {
        let d = RuntimeDefaults::from_toml_str(
            "flush-per-record = false\nnegative-pack-sign-nibble = 0xB\nallowed-record-separators = [\"|\"]\n",
        )
        .unwrap();
        assert!(!d.flush_per_record);
        assert_eq!(d.negative_pack_sign_nibble, Some(0xB));
        assert!(d.is_allowed_separator("|"));
        assert!(!d.is_allowed_separator("\n"));
        assert_eq!(d.max_record_length, 65536);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(RuntimeDefaults::from_toml_str("positive-zone-sign-nibble = 16").is_err());
        assert!(RuntimeDefaults::from_toml_str("max-record-length = 0").is_err());
        assert!(RuntimeDefaults::from_toml_str("bogus = 1").is_err());
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("defaults.toml");
        std::fs::write(&path, "title-record-type-name = \"Head\"\n").unwrap();
        let d = RuntimeDefaults::from_file(&path).unwrap();
        assert_eq!(d.title_record_type_name, "Head");
        assert!(RuntimeDefaults::from_file(dir.path().join("missing.toml")).is_err());
    }
}
