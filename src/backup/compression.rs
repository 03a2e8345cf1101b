use crate::error::{BackupError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, Write};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;
use xz2::read::XzDecoder;
use xz2::write::XzEncoder;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

const XZ_PRESET: u32 = 6;
const ZSTD_LEVEL: i32 = 0;

/// Compression applied to a dump before it leaves the machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compression {
    #[default]
    #[serde(rename = "none")]
    None,
    #[serde(rename = "gz")]
    Gzip,
    #[serde(rename = "zstd")]
    Zstd,
    #[serde(rename = "xz")]
    Xz,
    #[serde(rename = "zip")]
    Zip,
}

impl Compression {
    /// Suffix appended after the dump's own extension.
    pub fn extension(self) -> &'static str {
        match self {
            Compression::None => "",
            Compression::Gzip => ".gz",
            Compression::Zstd => ".zst",
            Compression::Xz => ".xz",
            Compression::Zip => ".zip",
        }
    }

    pub fn label(self) -> Option<&'static str> {
        match self {
            Compression::None => None,
            Compression::Gzip => Some("gzip"),
            Compression::Zstd => Some("zstd"),
            Compression::Xz => Some("xz"),
            Compression::Zip => Some("zip"),
        }
    }

    /// Infers the codec from the artifact's trailing extension. Anything
    /// unrecognised is read as-is.
    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        [
            Compression::Gzip,
            Compression::Zstd,
            Compression::Xz,
            Compression::Zip,
        ]
        .into_iter()
        .find(|c| name.ends_with(c.extension()))
        .unwrap_or(Compression::None)
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Compression::None => "none",
            Compression::Gzip => "gz",
            Compression::Zstd => "zstd",
            Compression::Xz => "xz",
            Compression::Zip => "zip",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Compression {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" | "" => Ok(Compression::None),
            "gz" => Ok(Compression::Gzip),
            "zstd" => Ok(Compression::Zstd),
            "xz" => Ok(Compression::Xz),
            "zip" => Ok(Compression::Zip),
            other => Err(BackupError::Codec(format!(
                "unknown compression type: {}",
                other
            ))),
        }
    }
}

enum EncoderKind<W: Write + Seek> {
    Plain(W),
    Gzip(GzEncoder<W>),
    Zstd(zstd::Encoder<'static, W>),
    Xz(XzEncoder<W>),
    Zip(ZipWriter<W>),
}

/// Streaming writer that compresses everything written to it.
///
/// [`Encoder::finish`] must be called once all bytes are written: the gzip,
/// zstd and xz trailers and the zip central directory are only emitted there.
/// Dropping an unfinished encoder leaves a truncated artifact behind.
pub struct Encoder<W: Write + Seek> {
    kind: EncoderKind<W>,
}

impl<W: Write + Seek> Encoder<W> {
    /// `entry_name` is only used by zip, which stores the payload as a single
    /// named entry.
    pub fn new(dst: W, compression: Compression, entry_name: &str) -> Result<Self> {
        let kind = match compression {
            Compression::None => EncoderKind::Plain(dst),
            Compression::Gzip => EncoderKind::Gzip(GzEncoder::new(dst, flate2::Compression::default())),
            Compression::Zstd => {
                let encoder = zstd::Encoder::new(dst, ZSTD_LEVEL)
                    .map_err(|e| BackupError::Codec(format!("creating zstd writer: {}", e)))?;
                EncoderKind::Zstd(encoder)
            }
            Compression::Xz => EncoderKind::Xz(XzEncoder::new(dst, XZ_PRESET)),
            Compression::Zip => {
                let mut zip = ZipWriter::new(dst);
                let options = SimpleFileOptions::default()
                    .compression_method(zip::CompressionMethod::Deflated)
                    .compression_level(Some(6))
                    .large_file(true);
                zip.start_file(entry_name, options)?;
                EncoderKind::Zip(zip)
            }
        };

        Ok(Self { kind })
    }

    /// Writes any trailer the codec needs and hands back the underlying writer.
    pub fn finish(self) -> Result<W> {
        let mut dst = match self.kind {
            EncoderKind::Plain(w) => w,
            EncoderKind::Gzip(enc) => enc.finish()?,
            EncoderKind::Zstd(enc) => enc.finish()?,
            EncoderKind::Xz(enc) => enc.finish()?,
            EncoderKind::Zip(zip) => zip.finish()?,
        };
        dst.flush()?;
        Ok(dst)
    }
}

impl<W: Write + Seek> Write for Encoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.kind {
            EncoderKind::Plain(w) => w.write(buf),
            EncoderKind::Gzip(w) => w.write(buf),
            EncoderKind::Zstd(w) => w.write(buf),
            EncoderKind::Xz(w) => w.write(buf),
            EncoderKind::Zip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.kind {
            EncoderKind::Plain(w) => w.flush(),
            EncoderKind::Gzip(w) => w.flush(),
            EncoderKind::Zstd(w) => w.flush(),
            EncoderKind::Xz(w) => w.flush(),
            EncoderKind::Zip(w) => w.flush(),
        }
    }
}

/// Opens `path`, picks the decoder from its extension and hands the
/// decompressed stream to `f`. All handles are closed when `f` returns.
///
/// Zip archives are opened as random-access containers and must hold at
/// least one entry; only the first entry is read.
pub fn decode_with<T, F>(path: &Path, f: F) -> Result<T>
where
    F: FnOnce(&mut dyn Read) -> Result<T>,
{
    let compression = Compression::from_path(path);
    debug!("Decoding {} as {}", path.display(), compression);

    let file = File::open(path).map_err(|e| {
        BackupError::Filesystem(io::Error::new(
            e.kind(),
            format!("opening backup file {}: {}", path.display(), e),
        ))
    })?;
    let mut reader = BufReader::new(file);

    match compression {
        Compression::None => f(&mut reader),
        Compression::Gzip => f(&mut GzDecoder::new(reader)),
        Compression::Zstd => {
            let mut decoder = zstd::Decoder::with_buffer(reader)
                .map_err(|e| BackupError::Codec(format!("creating zstd reader: {}", e)))?;
            f(&mut decoder)
        }
        Compression::Xz => f(&mut XzDecoder::new(reader)),
        Compression::Zip => {
            let mut archive = ZipArchive::new(reader)?;
            if archive.is_empty() {
                return Err(BackupError::Codec("zip file is empty".to_string()));
            }
            let mut entry = archive.by_index(0)?;
            debug!("Reading zip entry {}", entry.name());
            f(&mut entry)
        }
    }
}
