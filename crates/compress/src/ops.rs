//! Compression Operations

use crate::error::{ErrorKind, Result};
use crate::{Compression, open_compressor, open_decompressor};
use exn::ResultExt;
use std::io::{Cursor, Read, Write};
use tracing::instrument;

impl Compression {
    /// Compress a byte slice in memory.
    ///
    /// # Examples
    ///
    /// ```
    /// use archive_compress::Compression;
    ///
    /// let compressed = Compression::Gzip.compress(b"Hello, world!").unwrap();
    /// assert_eq!(Compression::from_magic_bytes(&compressed), Compression::Gzip);
    /// ```
    #[instrument(skip(input), fields(format = %self, input_size = input.len(), output_size))]
    pub fn compress(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut writer = open_compressor(Vec::new(), *self)?;
        writer.write_all(input).or_raise(|| ErrorKind::Io)?;
        let output = writer.close()?;
        tracing::Span::current().record("output_size", output.len());
        Ok(output)
    }

    /// Compress from a reader to a writer, returning the number of
    /// uncompressed bytes copied.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::io::Cursor;
    /// use archive_compress::Compression;
    ///
    /// let mut output = Vec::new();
    /// let bytes = Compression::Zstd.compress_stream(Cursor::new(b"Hello, world!"), &mut output).unwrap();
    /// assert_eq!(bytes, 13);
    /// ```
    pub fn compress_stream<R: Read, W: Write>(&self, mut reader: R, writer: W) -> Result<u64> {
        let mut writer = open_compressor(writer, *self)?;
        let bytes = std::io::copy(&mut reader, &mut writer).or_raise(|| ErrorKind::Io)?;
        writer.close()?;
        Ok(bytes)
    }
}

/// Decompress a byte slice in memory, detecting its format.
///
/// # Examples
///
/// ```rust
/// use archive_compress::{Compression, decompress};
///
/// let compressed = Compression::Zstd.compress(b"Hello, world!").unwrap();
/// assert_eq!(decompress(&compressed).unwrap(), b"Hello, world!");
/// // Uncompressed input comes back untouched.
/// assert_eq!(decompress(b"plain").unwrap(), b"plain");
/// ```
#[instrument(skip(input), fields(input_size = input.len(), output_size))]
pub fn decompress(input: &[u8]) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    decompress_stream(Cursor::new(input.to_vec()), &mut output).map_err(|err| err.raise(ErrorKind::InvalidData))?;
    tracing::Span::current().record("output_size", output.len());
    Ok(output)
}

/// Decompress from a reader to a writer, detecting the format. Returns the
/// detected format and the number of decompressed bytes written.
pub fn decompress_stream<R, W>(reader: R, mut writer: W) -> Result<(Compression, u64)>
where
    R: Read + Send + 'static,
    W: Write,
{
    let mut reader = open_decompressor(reader)?;
    let bytes = std::io::copy(&mut reader, &mut writer).or_raise(|| ErrorKind::Io)?;
    Ok((reader.compression(), bytes))
}
