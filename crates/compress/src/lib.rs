//! Compression detection and streaming for archive byte streams.
//!
//! Given a stream of unknown provenance, this crate sniffs the leading bytes
//! to work out which compression format (if any) produced it, then hands back
//! a uniform [`Read`](std::io::Read)er that transparently decompresses it:
//!
//! - **Format detection** from magic bytes ([`detect`]) or file extensions
//!   ([`Compression::from_path`])
//! - **Transparent sniffing** via [`PeekingBuffer`], which inspects the head
//!   of a stream without consuming it
//! - **Decompression** via [`open_decompressor`], choosing between a built-in
//!   codec and an external decoder process (`igzip`, `unpigz`, `xz`)
//! - **Compression** via [`open_compressor`] for Gzip and Zstd
//!
//! External decoders run through [`process::pipe`], which turns a child
//! process into a cancellable stream whose failures surface as read errors.
//! Gzip accelerators can be switched off with the environment toggles in
//! [`config`].
//!
//! This crate never chooses compression levels (library defaults are used)
//! and knows nothing about archive containers such as tar or zip.

pub mod config;
mod construct;
pub mod error;
mod ops;
mod peekable;
mod pool;
pub mod process;
mod stream;
mod tools;
mod util;

pub use crate::ops::{decompress, decompress_stream};
pub use crate::peekable::PeekingBuffer;
pub use crate::pool::{BUFFER_SIZE, BufferPool, PooledBuffer};
pub use crate::stream::{Compressor, Decompressor, open_compressor, open_decompressor};
pub use crate::tools::ExternalTool;

/// A supported compression format.
///
/// Defaults to [`None`](Self::None) (uncompressed). The discriminant doubles
/// as a small integer tag, see [`Compression::tag`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Compression {
    /// Uncompressed
    #[default]
    None = 0,
    /// Gzip compression (.gz)
    Gzip = 1,
    /// Zstd compression (.zst)
    Zstd = 2,
    /// Bzip2 compression (.bz2)
    Bzip2 = 3,
    /// XZ compression (.xz)
    Xz = 4,
}

/// Detect the compression format of a stream from its leading bytes.
///
/// Shorthand for [`Compression::from_magic_bytes`]. Never fails: truncated or
/// empty input simply detects as [`Compression::None`].
///
/// # Examples
///
/// ```
/// use archive_compress::{Compression, detect};
///
/// assert_eq!(detect(&[0x28, 0xB5, 0x2F, 0xFD, 0x00]), Compression::Zstd);
/// assert_eq!(detect(b""), Compression::None);
/// ```
#[must_use]
pub fn detect(bytes: &[u8]) -> Compression {
    Compression::from_magic_bytes(bytes)
}
