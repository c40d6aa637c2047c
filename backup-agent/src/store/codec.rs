//! The compression/encryption transform chain shared by every upload and
//! download, plus the object-metadata keys that record which transforms a
//! given blob carries so a later download can reverse them without any
//! out-of-band bookkeeping.
//!
//! Upload order is gzip-compress, then age-encrypt. Download reverses that:
//! decrypt, then decompress. Both directions run the synchronous
//! `flate2`/`age` writers and readers inside `spawn_blocking`, bridged to
//! the async world by a bounded channel of `Bytes` chunks — the same
//! "pipe with a concurrent producer" shape the original system gets from
//! `io.Pipe` plus a goroutine, expressed with Tokio's sync/async bridge.

use crate::utils::errors::{AgentError, Result};
use age::secrecy::Secret;
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::io::{self, Read, Write};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::SyncIoBridge;

pub const META_COMPRESS: &str = "s3bu-compress";
pub const META_COMPRESS_VERSION: &str = "s3bu-compress-version";
pub const META_ENCRYPT: &str = "s3bu-encrypt";
pub const META_ENCRYPT_VERSION: &str = "s3bu-encrypt-version";
pub const META_SCRYPT: &str = "s3bu-scrypt";
pub const META_SCRYPT_VERSION: &str = "s3bu-scrypt-version";
pub const META_SCRYPT_ID: &str = "s3bu-scrypt-id";

const VERSION: &str = "001";

/// What a blob's object metadata says about its codec chain. Keys are
/// matched case-insensitively per the spec, so callers should look values
/// up through [`CodecMetadata::from_map`] rather than indexing the raw map
/// directly.
#[derive(Debug, Clone, Default)]
pub struct CodecMetadata {
    pub compressed: bool,
    pub encrypted: bool,
    pub scrypt_id: Option<String>,
}

impl CodecMetadata {
    pub fn from_map(map: &HashMap<String, String>) -> Self {
        let lower: HashMap<String, String> = map
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
            .collect();
        Self {
            compressed: lower.contains_key(META_COMPRESS),
            encrypted: lower.contains_key(META_ENCRYPT) || lower.contains_key(META_SCRYPT),
            scrypt_id: lower.get(META_SCRYPT_ID).cloned(),
        }
    }

    pub fn to_map(
        compress: bool,
        recipients: bool,
        scrypt_id: Option<&str>,
    ) -> HashMap<String, String> {
        let mut map = HashMap::new();
        if compress {
            map.insert(META_COMPRESS.to_string(), "gzip".to_string());
            map.insert(META_COMPRESS_VERSION.to_string(), VERSION.to_string());
        }
        if recipients {
            map.insert(META_ENCRYPT.to_string(), "age".to_string());
            map.insert(META_ENCRYPT_VERSION.to_string(), VERSION.to_string());
        } else if let Some(id) = scrypt_id {
            map.insert(META_SCRYPT.to_string(), "age".to_string());
            map.insert(META_SCRYPT_VERSION.to_string(), VERSION.to_string());
            map.insert(META_SCRYPT_ID.to_string(), id.to_string());
        }
        map
    }
}

/// Credential material the encode/decode paths need, kept separate from
/// [`crate::credentials`] so this module stays free of filesystem access.
pub struct EncryptRecipients<'a> {
    pub recipients: &'a [age::x25519::Recipient],
}

pub struct ScryptSecret<'a> {
    pub id: &'a str,
    pub passphrase: &'a str,
}

fn to_io_err<E: std::fmt::Display>(e: E) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e.to_string())
}

/// Sink that forwards each `write()` call as one `Bytes` chunk over a
/// bounded channel, consumed on the async side by [`ReceiverStream`].
struct ChannelWriter {
    tx: mpsc::Sender<io::Result<Bytes>>,
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .blocking_send(Ok(Bytes::copy_from_slice(buf)))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "upload receiver dropped"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The write-side transform chain, parameterized over whatever it writes
/// into. Only four shapes are reachable (compress x encrypt are each
/// binary), so a small enum avoids the type-erasure gymnastics a generic
/// `Box<dyn Write>` chain would need when each layer's `finish()` consumes
/// itself and returns its inner writer.
enum Encoder<W: Write> {
    Raw(W),
    Gz(GzEncoder<W>),
    Age(age::stream::StreamWriter<W>),
    GzAge(age::stream::StreamWriter<GzEncoder<W>>),
}

impl<W: Write> Write for Encoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Encoder::Raw(w) => w.write(buf),
            Encoder::Gz(w) => w.write(buf),
            Encoder::Age(w) => w.write(buf),
            Encoder::GzAge(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Encoder::Raw(w) => w.flush(),
            Encoder::Gz(w) => w.flush(),
            Encoder::Age(w) => w.flush(),
            Encoder::GzAge(w) => w.flush(),
        }
    }
}

impl<W: Write> Encoder<W> {
    fn finish(self) -> io::Result<W> {
        match self {
            Encoder::Raw(w) => Ok(w),
            Encoder::Gz(w) => w.finish(),
            Encoder::Age(w) => w.finish().map_err(to_io_err),
            Encoder::GzAge(w) => w.finish().map_err(to_io_err)?.finish(),
        }
    }
}

fn build_encryptor(
    recipients: Option<&[age::x25519::Recipient]>,
    scrypt: Option<&ScryptSecret<'_>>,
) -> Result<Option<age::Encryptor>> {
    if let Some(recipients) = recipients {
        if !recipients.is_empty() {
            let boxed: Vec<Box<dyn age::Recipient + Send>> = recipients
                .iter()
                .map(|r| Box::new(r.clone()) as Box<dyn age::Recipient + Send>)
                .collect();
            let encryptor = age::Encryptor::with_recipients(boxed)
                .ok_or_else(|| AgentError::Encrypt("no recipients provided".to_string()))?;
            return Ok(Some(encryptor));
        }
    }
    if let Some(secret) = scrypt {
        let encryptor =
            age::Encryptor::with_user_passphrase(Secret::new(secret.passphrase.to_string()));
        return Ok(Some(encryptor));
    }
    Ok(None)
}

/// Spawns the blocking encode chain over `reader`, returning a byte stream
/// suitable for a streaming upload body plus a handle that resolves to the
/// total number of bytes written after compression/encryption (the
/// `uploaded_size` the Uploader stage records).
pub fn encode_stream(
    mut reader: Box<dyn Read + Send>,
    compress: bool,
    recipients: Option<Vec<age::x25519::Recipient>>,
    scrypt: Option<(String, String)>,
) -> (
    ReceiverStream<io::Result<Bytes>>,
    tokio::task::JoinHandle<Result<u64>>,
) {
    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(16);
    let handle = tokio::task::spawn_blocking(move || -> Result<u64> {
        let channel_writer = ChannelWriter { tx: tx.clone() };
        let scrypt_ref = scrypt
            .as_ref()
            .map(|(id, passphrase)| ScryptSecret { id, passphrase: passphrase.as_str() });
        let encryptor = build_encryptor(recipients.as_deref(), scrypt_ref.as_ref())?;

        let mut encoder = match (compress, encryptor) {
            (false, None) => Encoder::Raw(channel_writer),
            (true, None) => Encoder::Gz(GzEncoder::new(channel_writer, Compression::default())),
            (false, Some(enc)) => Encoder::Age(
                enc.wrap_output(channel_writer)
                    .map_err(|e| AgentError::Encrypt(e.to_string()))?,
            ),
            (true, Some(enc)) => Encoder::GzAge(
                enc.wrap_output(GzEncoder::new(channel_writer, Compression::default()))
                    .map_err(|e| AgentError::Encrypt(e.to_string()))?,
            ),
        };

        let mut counter = CountingReader { inner: &mut reader, count: 0 };
        io::copy(&mut counter, &mut encoder)?;
        encoder.finish()?;
        Ok(counter.count)
    });

    (ReceiverStream::new(rx), handle)
}

struct CountingReader<'a> {
    inner: &'a mut Box<dyn Read + Send>,
    count: u64,
}

impl Read for CountingReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

/// The read-side transform chain, mirrored from [`Encoder`].
enum Decoder<R: Read> {
    Raw(R),
    Gz(flate2::read::GzDecoder<R>),
    Age(age::stream::StreamReader<R>),
    AgeGz(flate2::read::GzDecoder<age::stream::StreamReader<R>>),
}

impl<R: Read> Read for Decoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Decoder::Raw(r) => r.read(buf),
            Decoder::Gz(r) => r.read(buf),
            Decoder::Age(r) => r.read(buf),
            Decoder::AgeGz(r) => r.read(buf),
        }
    }
}

/// Credential material available for decrypting a downloaded object.
pub struct DecryptCredentials {
    pub identities: Vec<age::x25519::Identity>,
    /// scrypt id -> passphrase, as loaded from the secrets file.
    pub passphrases: HashMap<String, String>,
}

/// Spawns the blocking decode chain over an async body (already bridged to
/// a synchronous `Read` via [`SyncIoBridge`] by the caller), writing
/// plaintext chunks to the returned stream. `metadata` drives which layers
/// are applied; this is the only place a download looks at object
/// metadata.
pub fn decode_stream<R>(
    body: R,
    metadata: CodecMetadata,
    creds: DecryptCredentials,
) -> (
    ReceiverStream<io::Result<Bytes>>,
    tokio::task::JoinHandle<Result<u64>>,
)
where
    R: Read + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(16);
    let handle = tokio::task::spawn_blocking(move || -> Result<u64> {
        let decoder = if metadata.encrypted {
            let decryptor = age::Decryptor::new(body).map_err(|e| AgentError::Decrypt(e.to_string()))?;
            let reader = match (decryptor, &metadata.scrypt_id) {
                (age::Decryptor::Recipients(d), _) => {
                    if creds.identities.is_empty() {
                        return Err(AgentError::IdentitiesNotFound);
                    }
                    let idents: Vec<&dyn age::Identity> =
                        creds.identities.iter().map(|i| i as &dyn age::Identity).collect();
                    d.decrypt(idents.into_iter()).map_err(|e| AgentError::Decrypt(e.to_string()))?
                }
                (age::Decryptor::Passphrase(d), Some(id)) => {
                    let passphrase = creds
                        .passphrases
                        .get(id)
                        .ok_or_else(|| AgentError::PassphraseNotFound(id.clone()))?;
                    d.decrypt(&Secret::new(passphrase.clone()), None)
                        .map_err(|e| AgentError::Decrypt(e.to_string()))?
                }
                (age::Decryptor::Passphrase(_), None) => {
                    return Err(AgentError::PassphraseNotFound(String::new()))
                }
            };
            if metadata.compressed {
                Decoder::AgeGz(flate2::read::GzDecoder::new(reader))
            } else {
                Decoder::Age(reader)
            }
        } else if metadata.compressed {
            Decoder::Gz(flate2::read::GzDecoder::new(body))
        } else {
            Decoder::Raw(body)
        };

        let mut decoder = decoder;
        let mut total = 0u64;
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = decoder.read(&mut buf)?;
            if n == 0 {
                break;
            }
            total += n as u64;
            if tx.blocking_send(Ok(Bytes::copy_from_slice(&buf[..n]))).is_err() {
                break;
            }
        }
        Ok(total)
    });

    (ReceiverStream::new(rx), handle)
}

/// Bridges an async reader (an S3 response body) into the synchronous
/// `Read` the decode chain expects.
pub fn sync_bridge<R>(reader: R) -> SyncIoBridge<R>
where
    R: tokio::io::AsyncRead + Unpin,
{
    SyncIoBridge::new(reader)
}
