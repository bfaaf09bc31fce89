//! Volume options and the size grammar.
//!
//! A volume is configured once at mount time: capacity, case policy,
//! label, filesystem name, and the root security descriptor. Sizes parse
//! as decimal with an optional binary suffix (`K`, `M`, `G`, `T`);
//! anything that would overflow the shift is a parse error rather than a
//! silent wrap.

use thiserror::Error;

/// Default volume capacity: 2 GiB.
pub const DEFAULT_SIZE: u64 = 2 << 30;

/// Smallest permitted capacity in bytes.
pub const MIN_SIZE: u64 = 512;

/// Longest permitted volume label, in UTF-16 units.
pub const MAX_LABEL_LEN: usize = 32;

/// Errors from option validation and size parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptionsError {
    /// The size string was empty or not decimal-digits-plus-suffix.
    #[error("invalid size {0:?}")]
    InvalidSize(String),
    /// The size overflowed 64 bits after applying the suffix.
    #[error("size {0:?} overflows")]
    SizeOverflow(String),
    /// The size was below [`MIN_SIZE`].
    #[error("size must be at least {MIN_SIZE} bytes")]
    SizeTooSmall,
    /// The label exceeds [`MAX_LABEL_LEN`] UTF-16 units.
    #[error("volume label longer than {MAX_LABEL_LEN} characters")]
    LabelTooLong,
}

/// Parses a size: decimal digits with an optional K/M/G/T binary suffix.
pub fn parse_size(s: &str) -> Result<u64, OptionsError> {
    let s = s.trim();
    let (digits, shift) = match s.chars().last() {
        Some('K' | 'k') => (&s[..s.len() - 1], 10),
        Some('M' | 'm') => (&s[..s.len() - 1], 20),
        Some('G' | 'g') => (&s[..s.len() - 1], 30),
        Some('T' | 't') => (&s[..s.len() - 1], 40),
        _ => (s, 0),
    };
    let base: u64 = digits
        .parse()
        .map_err(|_| OptionsError::InvalidSize(s.to_string()))?;
    base.checked_shl(shift)
        .filter(|v| v >> shift == base)
        .ok_or_else(|| OptionsError::SizeOverflow(s.to_string()))
}

/// Configuration for one mounted volume.
#[derive(Debug, Clone)]
pub struct VolumeOptions {
    /// Capacity in bytes.
    pub size: u64,
    /// Whether name lookup folds case (default) or is byte-exact.
    pub case_insensitive: bool,
    /// Volume label reported to the host.
    pub label: String,
    /// Filesystem name reported to the host.
    pub fs_name: String,
    /// Root security descriptor, passed through opaquely. The shim is
    /// responsible for encoding (e.g. from SDDL) before handing it over.
    pub root_security: Option<Vec<u8>>,
}

impl Default for VolumeOptions {
    fn default() -> Self {
        Self {
            size: DEFAULT_SIZE,
            case_insensitive: true,
            label: "RAMVOL".to_string(),
            fs_name: "ramvol".to_string(),
            root_security: None,
        }
    }
}

impl VolumeOptions {
    /// Sets the capacity.
    #[must_use]
    pub fn size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    /// Switches the volume to byte-exact name comparison.
    #[must_use]
    pub fn case_sensitive(mut self) -> Self {
        self.case_insensitive = false;
        self
    }

    /// Sets the volume label.
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Sets the filesystem name.
    #[must_use]
    pub fn fs_name(mut self, name: impl Into<String>) -> Self {
        self.fs_name = name.into();
        self
    }

    /// Sets the root security descriptor blob.
    #[must_use]
    pub fn root_security(mut self, blob: Vec<u8>) -> Self {
        self.root_security = Some(blob);
        self
    }

    /// Validates ranges that the flat fields cannot express.
    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.size < MIN_SIZE {
            return Err(OptionsError::SizeTooSmall);
        }
        if self.label.encode_utf16().count() > MAX_LABEL_LEN {
            return Err(OptionsError::LabelTooLong);
        }
        Ok(())
    }
}
