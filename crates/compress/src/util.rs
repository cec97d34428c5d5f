use crate::Compression;
use std::fmt::{Display, Formatter, Result as FmtResult};

impl Display for Compression {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

impl AsRef<str> for Compression {
    fn as_ref(&self) -> &'static str {
        self.as_str()
    }
}

impl Compression {
    /// Small integer tag identifying the format.
    #[inline]
    #[must_use]
    pub fn tag(&self) -> u8 {
        *self as u8
    }

    /// Returns the file extension this crate writes for the format. Only
    /// used for diagnostics; decode-only formats have none.
    #[inline]
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::Gzip => ".gz",
            Compression::Zstd => ".zst",
            Compression::None | Compression::Bzip2 | Compression::Xz => "",
        }
    }

    /// Returns the short name for configuration (for displaying to user)
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Zstd => "zstd",
            Compression::Bzip2 => "bzip2",
            Compression::Xz => "xz",
        }
    }

    /// Whether [`open_compressor`](crate::open_compressor) can produce this
    /// format. Bzip2 and XZ are decode-only.
    #[inline]
    #[must_use]
    pub fn is_writable(&self) -> bool {
        matches!(self, Compression::None | Compression::Gzip | Compression::Zstd)
    }

    /// Verify that `bytes` start with the expected magic bytes for this format.
    ///
    /// Useful for cross-checking a format detected from a file extension against
    /// actual file contents.
    #[must_use]
    pub fn check_magic_bytes(&self, bytes: &[u8]) -> bool {
        *self == Self::from_magic_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use crate::Compression;
    use rstest::rstest;

    #[rstest]
    #[case(Compression::None, "", "none")]
    #[case(Compression::Gzip, ".gz", "gzip")]
    #[case(Compression::Zstd, ".zst", "zstd")]
    #[case(Compression::Bzip2, "", "bzip2")]
    #[case(Compression::Xz, "", "xz")]
    fn test_names(#[case] format: Compression, #[case] extension: &str, #[case] name: &str) {
        assert_eq!(format.extension(), extension);
        assert_eq!(format.to_string(), name);
        // The short name always parses back.
        assert_eq!(name.parse::<Compression>().unwrap(), format);
    }

    #[rstest]
    #[case(Compression::Gzip, &[0x1F, 0x8B, 0x08, 0x00], true)]
    #[case(Compression::Gzip, &[0x42, 0x5A, 0x68, 0x39], false)]
    #[case(Compression::None, b"plain text", true)]
    #[case(Compression::None, &[0x28, 0xB5, 0x2F, 0xFD], false)]
    fn test_check_magic_bytes(#[case] format: Compression, #[case] bytes: &[u8], #[case] expected: bool) {
        assert_eq!(format.check_magic_bytes(bytes), expected);
    }
}
