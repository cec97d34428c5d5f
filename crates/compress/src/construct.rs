use crate::Compression;
use crate::error::{Error, ErrorKind};
use std::{path::Path, str::FromStr};

const GZIP_MAGIC: [u8; 3] = [0x1F, 0x8B, 0x08];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];
const BZIP2_MAGIC: [u8; 3] = [0x42, 0x5A, 0x68];
const XZ_MAGIC: [u8; 6] = [0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00];

// Skippable frames use magic numbers 0x184D2A50 through 0x184D2A5F; the low
// nibble is user-defined. See RFC 8878, section 3.1.2.
const ZSTD_SKIPPABLE_START: u32 = 0x184D_2A50;
const ZSTD_SKIPPABLE_MASK: u32 = 0xFFFF_FFF0;
// Magic number plus the 4-byte frame size.
const ZSTD_SKIPPABLE_HEADER_LEN: usize = 8;

/// Number of leading bytes that is always enough to classify a stream.
pub(crate) const MAGIC_PEEK_LEN: usize = 10;

type Matcher = fn(&[u8]) -> bool;

/// Evaluated in order; the first match wins. Signatures are disjoint, but
/// the order is fixed anyway so detection is deterministic.
const MATCHERS: [(Compression, Matcher); 4] = [
    (Compression::Gzip, is_gzip),
    (Compression::Zstd, is_zstd),
    (Compression::Bzip2, is_bzip2),
    (Compression::Xz, is_xz),
];

fn is_gzip(bytes: &[u8]) -> bool {
    bytes.starts_with(&GZIP_MAGIC)
}

fn is_bzip2(bytes: &[u8]) -> bool {
    bytes.starts_with(&BZIP2_MAGIC)
}

fn is_xz(bytes: &[u8]) -> bool {
    bytes.starts_with(&XZ_MAGIC)
}

/// Zstandard defines two frame formats: regular frames with a fixed magic
/// number, and skippable frames with a masked magic range.
fn is_zstd(bytes: &[u8]) -> bool {
    if bytes.starts_with(&ZSTD_MAGIC) {
        return true;
    }
    if bytes.len() < ZSTD_SKIPPABLE_HEADER_LEN {
        return false;
    }
    let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    magic & ZSTD_SKIPPABLE_MASK == ZSTD_SKIPPABLE_START
}

impl FromStr for Compression {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Compression::None),
            "gz" | "gzip" => Ok(Compression::Gzip),
            "zst" | "zstd" => Ok(Compression::Zstd),
            "bz2" | "bzip2" => Ok(Compression::Bzip2),
            "xz" | "lzma" => Ok(Compression::Xz),
            _ => exn::bail!(ErrorKind::UnsupportedFormat(s.to_string())),
        }
    }
}
impl From<&[u8]> for Compression {
    fn from(value: &[u8]) -> Self {
        Compression::from_magic_bytes(value)
    }
}
impl Compression {
    /// Detect compression from a file extension.
    #[must_use]
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| match ext.to_lowercase().as_str() {
                "gz" => Compression::Gzip,
                "zst" => Compression::Zstd,
                "bz2" => Compression::Bzip2,
                "xz" => Compression::Xz,
                _ => Compression::None,
            })
            .unwrap_or(Compression::None)
    }

    /// Detect compression format from magic bytes.
    ///
    /// Returns the `None` variant if no magic bytes match or if the input
    /// is too short to detect any format. Ten bytes are always enough.
    #[must_use]
    pub fn from_magic_bytes(bytes: &[u8]) -> Self {
        MATCHERS
            .iter()
            .find(|(_, matches)| matches(bytes))
            .map(|(compression, _)| *compression)
            .unwrap_or(Compression::None)
    }
}

#[cfg(test)]
mod tests {
    use crate::Compression;
    use rstest::rstest;

    #[rstest]
    #[case("none", Compression::None)]
    #[case("bz2", Compression::Bzip2)]
    #[case("bzip2", Compression::Bzip2)]
    #[case("BZIP2", Compression::Bzip2)]
    #[case("gz", Compression::Gzip)]
    #[case("gzip", Compression::Gzip)]
    #[case("xz", Compression::Xz)]
    #[case("lzma", Compression::Xz)]
    #[case("zst", Compression::Zstd)]
    #[case("Zstd", Compression::Zstd)]
    fn test_from_str(#[case] test: &str, #[case] expected: Compression) {
        assert_eq!(test.parse::<Compression>().unwrap(), expected);
    }

    #[rstest]
    #[case("invalid")]
    #[case("br")]
    #[case(" ")]
    fn test_from_str_invalid(#[case] test: &str) {
        assert!(test.parse::<Compression>().is_err());
    }

    #[rstest]
    #[case("layer.tar", Compression::None)]
    #[case(".gz", Compression::None)]
    #[case("layer.tar.gz", Compression::Gzip)]
    #[case("layer.tar.GZ", Compression::Gzip)]
    #[case("layer.tar.zst", Compression::Zstd)]
    #[case("layer.tar.bz2", Compression::Bzip2)]
    #[case("layer.tar.xz", Compression::Xz)]
    fn test_from_path(#[case] test: &str, #[case] expected: Compression) {
        assert_eq!(Compression::from_path(test), expected);
    }

    #[rstest]
    #[case(b"ustar\0", Compression::None)]
    #[case(b"", Compression::None)]
    #[case(&[0x1F], Compression::None)]
    #[case(&[0x1F, 0x8B], Compression::None)]
    #[case(&[0x1F, 0x8B, 0x08], Compression::Gzip)]
    #[case(&[0x1F, 0x8B, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03], Compression::Gzip)]
    #[case(&[0x28, 0xB5, 0x2F, 0xFD], Compression::Zstd)]
    #[case(&[0x28, 0xB5, 0x2F, 0xFD, 0x24, 0x05, 0x29, 0x00], Compression::Zstd)]
    #[case(&[0x42, 0x5A, 0x68, 0x39], Compression::Bzip2)]
    #[case(&[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00, 0x00, 0x04], Compression::Xz)]
    #[case(&[0xFD, 0x37, 0x7A, 0x58, 0x5A], Compression::None)]
    fn test_from_magic_bytes(#[case] bytes: &[u8], #[case] expected: Compression) {
        assert_eq!(Compression::from_magic_bytes(bytes), expected);
        assert_eq!(<&[u8] as Into<Compression>>::into(bytes), expected);
        assert_eq!(crate::detect(bytes), expected);
    }

    #[test]
    fn test_zstd_skippable_frame_every_nibble() {
        for nibble in 0x0..=0xF_u32 {
            let magic = (0x184D_2A50 | nibble).to_le_bytes();
            let mut bytes = magic.to_vec();
            bytes.extend_from_slice(&[0x04, 0x00, 0x00, 0x00]);
            assert_eq!(Compression::from_magic_bytes(&bytes), Compression::Zstd, "nibble {nibble:#x}");
        }
    }

    #[rstest]
    // Needs the full 8-byte skippable header.
    #[case(&[0x5F, 0x2A, 0x4D, 0x18])]
    #[case(&[0x50, 0x2A, 0x4D, 0x18, 0x00, 0x00, 0x00])]
    // Just outside the masked range.
    #[case(&[0x4F, 0x2A, 0x4D, 0x18, 0x00, 0x00, 0x00, 0x00])]
    #[case(&[0x50, 0x2B, 0x4D, 0x18, 0x00, 0x00, 0x00, 0x00])]
    fn test_zstd_skippable_frame_rejected(#[case] bytes: &[u8]) {
        assert_eq!(Compression::from_magic_bytes(bytes), Compression::None);
    }
}
