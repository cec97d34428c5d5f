//! Detect-and-dispatch entry points for streaming (de)compression.

use crate::construct::MAGIC_PEEK_LEN;
use crate::error::{ErrorKind, Result};
use crate::process::{self, ProcessReader};
use crate::tools::{self, ExternalTool};
use crate::{Compression, PeekingBuffer};
use bzip2::bufread::MultiBzDecoder;
use exn::ResultExt;
use flate2::Compression as GzLevel;
use flate2::bufread::MultiGzDecoder;
use flate2::write::GzEncoder;
use std::io::{self, Read, Write};
use std::path::Path;
use tracing::instrument;
use zstd::stream::read::Decoder as ZstdDecoder;
use zstd::stream::write::Encoder as ZstdEncoder;

// Zero asks libzstd for its default level.
const ZSTD_DEFAULT_LEVEL: i32 = 0;

type BoxRead = Box<dyn Read + Send + 'static>;

/// Open a decompressing reader over `reader`, detecting the format from its
/// first bytes.
///
/// Detection consumes nothing: the sniffed bytes are replayed to the decoder.
/// An empty input is treated as uncompressed and simply reads as empty.
///
/// | Detected | Decoder |
/// |---|---|
/// | none | passthrough |
/// | gzip | `igzip` or `unpigz` if installed and not disabled, else built-in |
/// | zstd | built-in |
/// | bzip2 | built-in |
/// | xz | `xz` (required) |
///
/// # Errors
///
/// Fails if reading the first bytes fails, if `xz` is needed but not
/// installed, or if an external decoder can't be started. Decoding errors
/// surface later, from [`Read::read`].
///
/// # Examples
///
/// ```
/// use archive_compress::{Compression, open_compressor, open_decompressor};
/// use std::io::{Cursor, Read, Write};
///
/// let mut writer = open_compressor(Vec::new(), Compression::Zstd).unwrap();
/// writer.write_all(b"layer contents").unwrap();
/// let compressed = writer.close().unwrap();
///
/// let mut reader = open_decompressor(Cursor::new(compressed)).unwrap();
/// assert_eq!(reader.compression(), Compression::Zstd);
/// let mut contents = String::new();
/// reader.read_to_string(&mut contents).unwrap();
/// assert_eq!(contents, "layer contents");
/// ```
#[instrument(skip_all, fields(compression))]
pub fn open_decompressor<R>(reader: R) -> Result<Decompressor>
where
    R: Read + Send + 'static,
{
    open_decompressor_with(reader, tools::gzip_accelerator)
}

/// [`open_decompressor`], asking `gzip_accelerator` for an external gzip
/// decoder only once the input is known to be gzip.
pub(crate) fn open_decompressor_with<R, F, P>(reader: R, gzip_accelerator: F) -> Result<Decompressor>
where
    R: Read + Send + 'static,
    F: FnOnce() -> Option<(ExternalTool, P)>,
    P: AsRef<Path>,
{
    let mut buffered = PeekingBuffer::new(reader);
    // A short (or empty) peek just means the stream ended early; the
    // detector treats too few bytes as uncompressed.
    let compression = Compression::from_magic_bytes(buffered.peek(MAGIC_PEEK_LEN).or_raise(|| ErrorKind::Io)?);
    tracing::Span::current().record("compression", compression.as_str());

    let reader: BoxRead = match compression {
        Compression::None => Box::new(buffered),
        Compression::Gzip => match gzip_accelerator() {
            Some((tool, path)) => Box::new(external(tool, path.as_ref(), buffered)?),
            None => Box::new(MultiGzDecoder::new(buffered)),
        },
        Compression::Zstd => Box::new(ZstdDecoder::with_buffer(buffered).or_raise(|| ErrorKind::Encoder)?),
        Compression::Bzip2 => Box::new(MultiBzDecoder::new(buffered)),
        Compression::Xz => {
            let tool = ExternalTool::Xz;
            let Some(path) = tool.path() else {
                exn::bail!(ErrorKind::ToolNotFound(tool.program().to_string()));
            };
            Box::new(external(tool, path, buffered)?)
        },
    };
    Ok(Decompressor { reader, compression })
}

fn external<R>(tool: ExternalTool, path: &Path, input: PeekingBuffer<R>) -> Result<ProcessReader>
where
    R: Read + Send + 'static,
{
    tracing::debug!(program = tool.program(), "Decompressing with external tool");
    process::pipe(tool.decompress_command(path), input)
}

/// A decompressing reader returned by [`open_decompressor`].
///
/// Reading yields the decompressed bytes. Dropping it (or calling
/// [`close`](Self::close)) releases everything it holds, including killing an
/// external decoder that hasn't finished yet.
pub struct Decompressor {
    reader: BoxRead,
    compression: Compression,
}

impl Decompressor {
    /// The format the input was compressed with.
    #[must_use]
    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Stop reading and release the underlying stream and any external process.
    pub fn close(self) {}
}

impl Read for Decompressor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl std::fmt::Debug for Decompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decompressor").field("compression", &self.compression).finish_non_exhaustive()
    }
}

/// Open a compressing writer over `writer`.
///
/// Only uncompressed, Gzip and Zstd output is supported; Bzip2 and XZ fail
/// with [`ErrorKind::UnsupportedFormat`] before anything is written. Library
/// default compression levels are used.
///
/// The stream is only complete once [`Compressor::close`] has been called.
pub fn open_compressor<W: Write>(writer: W, compression: Compression) -> Result<Compressor<W>> {
    let encoder = match compression {
        Compression::None => Encoder::Plain(writer),
        Compression::Gzip => Encoder::Gzip(GzEncoder::new(writer, GzLevel::default())),
        Compression::Zstd => {
            Encoder::Zstd(ZstdEncoder::new(writer, ZSTD_DEFAULT_LEVEL).or_raise(|| ErrorKind::Encoder)?)
        },
        Compression::Bzip2 | Compression::Xz => {
            exn::bail!(ErrorKind::UnsupportedFormat(compression.extension().to_string()))
        },
    };
    Ok(Compressor { encoder })
}

enum Encoder<W: Write> {
    Plain(W),
    Gzip(GzEncoder<W>),
    Zstd(ZstdEncoder<'static, W>),
}

/// A compressing writer returned by [`open_compressor`].
pub struct Compressor<W: Write> {
    encoder: Encoder<W>,
}

impl<W: Write> Compressor<W> {
    /// Write the end of the compressed stream, flush, and hand back the
    /// underlying writer.
    ///
    /// Dropping a `Compressor` without closing it may leave a truncated
    /// stream behind.
    pub fn close(self) -> Result<W> {
        match self.encoder {
            Encoder::Plain(mut writer) => {
                writer.flush().or_raise(|| ErrorKind::Io)?;
                Ok(writer)
            },
            Encoder::Gzip(encoder) => encoder.finish().or_raise(|| ErrorKind::Io),
            Encoder::Zstd(encoder) => encoder.finish().or_raise(|| ErrorKind::Io),
        }
    }
}

impl<W: Write> Write for Compressor<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.encoder {
            Encoder::Plain(writer) => writer.write(buf),
            Encoder::Gzip(encoder) => encoder.write(buf),
            Encoder::Zstd(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.encoder {
            Encoder::Plain(writer) => writer.flush(),
            Encoder::Gzip(encoder) => encoder.flush(),
            Encoder::Zstd(encoder) => encoder.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Cursor;

    fn test_data() -> Vec<u8> {
        b"Hello, world! This is an archive layer that is long enough to compress. "
            .iter()
            .cycle()
            .take(100_000)
            .copied()
            .collect()
    }

    fn compress_with(format: Compression, data: &[u8]) -> Vec<u8> {
        let mut writer = open_compressor(Vec::new(), format).unwrap();
        writer.write_all(data).unwrap();
        writer.close().unwrap()
    }

    fn bzip2(data: &[u8]) -> Vec<u8> {
        let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn xz(data: &[u8]) -> Vec<u8> {
        let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn read_all(mut reader: Decompressor) -> Vec<u8> {
        let mut output = Vec::new();
        reader.read_to_end(&mut output).unwrap();
        output
    }

    #[rstest]
    #[case(Compression::None)]
    #[case(Compression::Gzip)]
    #[case(Compression::Zstd)]
    fn test_roundtrip(#[case] format: Compression) {
        let original = test_data();
        let compressed = compress_with(format, &original);
        assert_eq!(Compression::from_magic_bytes(&compressed), format);

        let reader = open_decompressor(Cursor::new(compressed)).unwrap();
        assert_eq!(reader.compression(), format);
        assert_eq!(read_all(reader), original);
    }

    #[rstest]
    #[case(Compression::None)]
    #[case(Compression::Gzip)]
    #[case(Compression::Zstd)]
    fn test_roundtrip_empty_content(#[case] format: Compression) {
        let compressed = compress_with(format, b"");
        let reader = open_decompressor(Cursor::new(compressed)).unwrap();
        assert_eq!(reader.compression(), format);
        assert!(read_all(reader).is_empty());
    }

    #[test]
    fn test_empty_input_is_uncompressed() {
        let mut reader = open_decompressor(io::empty()).unwrap();
        assert_eq!(reader.compression(), Compression::None);
        assert_eq!(reader.read(&mut [0; 16]).unwrap(), 0);
        reader.close();
    }

    #[test]
    fn test_short_uncompressed_input() {
        let reader = open_decompressor(Cursor::new(b"tiny".to_vec())).unwrap();
        assert_eq!(reader.compression(), Compression::None);
        assert_eq!(read_all(reader), b"tiny");
    }

    #[test]
    fn test_bzip2_decompression() {
        let original = test_data();
        let reader = open_decompressor(Cursor::new(bzip2(&original))).unwrap();
        assert_eq!(reader.compression(), Compression::Bzip2);
        assert_eq!(read_all(reader), original);
    }

    #[test]
    fn test_concatenated_gzip_members() {
        let mut compressed = compress_with(Compression::Gzip, b"first ");
        compressed.extend(compress_with(Compression::Gzip, b"second"));
        let reader = open_decompressor(Cursor::new(compressed)).unwrap();
        assert_eq!(read_all(reader), b"first second");
    }

    #[test]
    fn test_zstd_skippable_frame_prefix() {
        let original = test_data();
        // Skippable frame: magic 0x184D2A5A, 4-byte payload size, payload.
        let mut compressed = vec![0x5A, 0x2A, 0x4D, 0x18, 0x04, 0x00, 0x00, 0x00, 0xDE, 0xAD, 0xBE, 0xEF];
        compressed.extend(compress_with(Compression::Zstd, &original));

        let reader = open_decompressor(Cursor::new(compressed)).unwrap();
        assert_eq!(reader.compression(), Compression::Zstd);
        assert_eq!(read_all(reader), original);
    }

    #[test]
    fn test_xz_decompression() {
        let original = test_data();
        let result = open_decompressor(Cursor::new(xz(&original)));
        match ExternalTool::Xz.path() {
            Some(_) => {
                let reader = result.unwrap();
                assert_eq!(reader.compression(), Compression::Xz);
                assert_eq!(read_all(reader), original);
            },
            None => assert_eq!(*result.unwrap_err(), ErrorKind::ToolNotFound("xz".to_string())),
        }
    }

    #[test]
    fn test_corrupt_xz_reports_stderr() {
        if ExternalTool::Xz.path().is_none() {
            return;
        }
        let mut compressed = xz(&test_data());
        let middle = compressed.len() / 2;
        compressed.truncate(middle);

        let mut reader = open_decompressor(Cursor::new(compressed)).unwrap();
        let err = reader.read_to_end(&mut Vec::new()).unwrap_err();
        let failure = err.get_ref().and_then(|inner| inner.downcast_ref::<crate::error::ProcessError>());
        let failure = failure.unwrap_or_else(|| panic!("not a process failure: {err}"));
        assert!(failure.program.ends_with("xz"), "{err}");
        assert!(!failure.stderr.trim().is_empty(), "{err}");
        // The captured text is part of what callers see.
        assert!(err.to_string().contains(failure.stderr.trim()));
    }

    #[cfg(unix)]
    #[rstest]
    #[case::igzip_preferred(&[], Some("igzip"))]
    #[case::igzip_disabled(&[(crate::config::DISABLE_IGZIP_VAR, "1")], Some("unpigz"))]
    #[case::unparseable_keeps_igzip(&[(crate::config::DISABLE_IGZIP_VAR, "yes")], Some("igzip"))]
    #[case::both_disabled(&[(crate::config::DISABLE_IGZIP_VAR, "true"), (crate::config::DISABLE_PIGZ_VAR, "1")], None)]
    fn test_gzip_dispatch_follows_toggles(#[case] vars: &[(&str, &str)], #[case] accelerator: Option<&str>) {
        use crate::tools::testing::{fake_env, fake_tools};

        // Each fake drains its input and answers with its own name.
        let dir = fake_tools(&[
            ("igzip", "cat >/dev/null\nprintf igzip"),
            ("unpigz", "cat >/dev/null\nprintf unpigz"),
        ]);
        let original = test_data();
        let compressed = compress_with(Compression::Gzip, &original);

        let reader = open_decompressor_with(Cursor::new(compressed), || {
            tools::gzip_accelerator_in(Some(dir.path().as_os_str()), fake_env(vars))
        })
        .unwrap();
        assert_eq!(reader.compression(), Compression::Gzip);
        match accelerator {
            Some(program) => assert_eq!(read_all(reader), program.as_bytes()),
            None => assert_eq!(read_all(reader), original),
        }
    }

    #[test]
    fn test_gzip_accelerator_not_consulted_for_other_formats() {
        let compressed = compress_with(Compression::Zstd, b"zstd payload");
        let reader = open_decompressor_with(Cursor::new(compressed), || -> Option<(ExternalTool, std::path::PathBuf)> {
            panic!("gzip accelerator looked up for zstd input")
        })
        .unwrap();
        assert_eq!(read_all(reader), b"zstd payload");
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_gzip_accelerator_fails_the_stream() {
        use crate::tools::testing::{fake_env, fake_tools};

        let dir = fake_tools(&[("igzip", "cat >/dev/null\necho 'igzip: bad input' >&2\nexit 3")]);
        let compressed = compress_with(Compression::Gzip, b"payload");
        let mut reader = open_decompressor_with(Cursor::new(compressed), || {
            tools::gzip_accelerator_in(Some(dir.path().as_os_str()), fake_env(&[]))
        })
        .unwrap();
        let err = reader.read_to_end(&mut Vec::new()).unwrap_err();
        assert!(err.to_string().contains("igzip: bad input"), "{err}");
    }

    #[test]
    fn test_corrupt_gzip_fails_on_read() {
        let mut compressed = compress_with(Compression::Gzip, &test_data());
        let middle = compressed.len() / 2;
        compressed[middle..].iter_mut().for_each(|byte| *byte = !*byte);

        // Built-in or accelerated, corruption must not read as success.
        let mut reader = open_decompressor(Cursor::new(compressed)).unwrap();
        assert!(reader.read_to_end(&mut Vec::new()).is_err());
    }

    #[test]
    fn test_peek_errors_propagate() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
            }
        }
        let err = open_decompressor(Broken).unwrap_err();
        assert_eq!(*err, ErrorKind::Io);
    }

    #[rstest]
    #[case(Compression::Bzip2, "")]
    #[case(Compression::Xz, "")]
    fn test_unsupported_compressor(#[case] format: Compression, #[case] extension: &str) {
        let mut sink = Vec::new();
        let err = open_compressor(&mut sink, format).err().unwrap();
        assert_eq!(*err, ErrorKind::UnsupportedFormat(extension.to_string()));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_plain_compressor_is_passthrough() {
        let output = compress_with(Compression::None, b"as is");
        assert_eq!(output, b"as is");
    }
}
