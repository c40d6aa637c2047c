//! Concrete `ObjectStore` backed by Amazon S3.
//!
//! Streaming uploads avoid needing the content length in advance by
//! wrapping the codec chain's byte stream in an `http_body_util::StreamBody`
//! and handing that to `SdkBody::from_body_1_x` — the AWS SDK's supported
//! path for unsized request bodies.

use crate::credentials::Credentials;
use crate::store::codec::{self, CodecMetadata, DecryptCredentials};
use crate::store::{EncryptMode, ObjectStore, UploadOptions};
use crate::utils::errors::{AgentError, Result};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::StorageClass;
use aws_smithy_types::body::SdkBody;
use bytes::Bytes;
use futures_util::TryStreamExt;
use http_body_util::{BodyExt, StreamBody};
use std::io::Read;
use tokio::io::{AsyncWrite, AsyncWriteExt};

const DOWNLOADABLE: &[StorageClass] = &[
    StorageClass::Standard,
    StorageClass::ReducedRedundancy,
    StorageClass::StandardIa,
    StorageClass::OnezoneIa,
];

pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    credentials: Credentials,
}

impl S3ObjectStore {
    pub async fn new(profile: Option<&str>, region: Option<&str>, bucket: &str, credentials: Credentials) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(profile) = profile {
            loader = loader.profile_name(profile);
        }
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region.to_string()));
        }
        let sdk_config = loader.load().await;
        let client = aws_sdk_s3::Client::new(&sdk_config);
        Self {
            client,
            bucket: bucket.to_string(),
            credentials,
        }
    }

    /// Builds a store from a profile and bucket the way every CLI driver
    /// does: connect with no credential material yet, load recipients from
    /// the bucket plus local identities/secrets, then rebuild with them.
    /// Two round trips to `aws_config` are cheaper than threading
    /// credentials through construction in two phases.
    pub async fn open(
        profile: Option<&str>,
        region: Option<&str>,
        bucket: &str,
        identities_path: &std::path::Path,
        secrets_path: &std::path::Path,
    ) -> Result<Self> {
        let bootstrap = Self::new(profile, region, bucket, Credentials::empty()).await;
        let credentials = Credentials::load(&bootstrap, identities_path, secrets_path).await?;
        Ok(Self::new(profile, region, bucket, credentials).await)
    }

    fn encrypt_params(&self, mode: EncryptMode) -> (Option<Vec<age::x25519::Recipient>>, Option<(String, String)>) {
        match mode {
            EncryptMode::None => (None, None),
            EncryptMode::Recipients => (Some(self.credentials.recipients.clone()), None),
            EncryptMode::Scrypt => (
                None,
                self.credentials
                    .secrets
                    .last()
                    .map(|(id, pass)| (id.clone(), pass.clone())),
            ),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                if let Some(service_err) = err.as_service_error() {
                    if service_err.is_not_found() {
                        return Ok(false);
                    }
                }
                Err(AgentError::Store(err.to_string()))
            }
        }
    }

    async fn latest_matching(&self, prefix: &str) -> Result<(String, u64)> {
        let mut continuation: Option<String> = None;
        let mut best: Option<(String, u64)> = None;

        loop {
            let mut req = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(token) = continuation.clone() {
                req = req.continuation_token(token);
            }
            let output = req.send().await.map_err(|e| AgentError::Store(e.to_string()))?;

            if let Some(contents) = output.contents {
                if let Some(last) = contents.last() {
                    if let Some(key) = &last.key {
                        best = Some((key.clone(), last.size.unwrap_or(0) as u64));
                    }
                }
            }

            if output.is_truncated.unwrap_or(false) {
                continuation = output.next_continuation_token;
            } else {
                break;
            }
        }

        best.ok_or_else(|| AgentError::NoMatch(prefix.to_string()))
    }

    async fn upload(&self, key: &str, reader: Box<dyn Read + Send>, opts: UploadOptions) -> Result<u64> {
        let (recipients, scrypt) = self.encrypt_params(opts.encrypt_mode);
        let (stream, handle) = codec::encode_stream(reader, opts.compress, recipients, scrypt);

        let mapped = stream.map_ok(http_body::Frame::data).map_err(|e| {
            Box::<dyn std::error::Error + Send + Sync>::from(e)
        });
        let body = SdkBody::from_body_1_x(StreamBody::new(mapped).boxed());
        let byte_stream = ByteStream::new(body);

        let metadata = CodecMetadata::to_map(
            opts.compress,
            opts.encrypt_mode == EncryptMode::Recipients,
            if opts.encrypt_mode == EncryptMode::Scrypt {
                self.credentials.secrets.last().map(|(id, _)| id.as_str())
            } else {
                None
            },
        );

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(byte_stream)
            .set_metadata(Some(metadata))
            .send()
            .await
            .map_err(|e| AgentError::Store(e.to_string()))?;

        handle.await.map_err(|e| AgentError::Store(e.to_string()))?
    }

    async fn download(&self, key: &str, writer: &mut (dyn AsyncWrite + Unpin + Send)) -> Result<u64> {
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| AgentError::Store(e.to_string()))?;

        if let Some(class) = &head.storage_class {
            if !DOWNLOADABLE.contains(class) {
                return Err(AgentError::NotDownloadable(key.to_string()));
            }
        }

        let metadata = CodecMetadata::from_map(&head.metadata.unwrap_or_default());
        if metadata.encrypted && metadata.scrypt_id.is_none() && !self.has_identities() {
            return Err(AgentError::IdentitiesNotFound);
        }

        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| AgentError::Store(e.to_string()))?;

        let async_body = output.body.into_async_read();
        let sync_body = codec::sync_bridge(async_body);

        let creds = DecryptCredentials {
            identities: self.credentials.identities.clone(),
            passphrases: self.credentials.passphrase_map(),
        };

        let (mut stream, handle) = codec::decode_stream(sync_body, metadata, creds);
        let mut total = 0u64;
        while let Some(chunk) = futures_util::StreamExt::next(&mut stream).await {
            let chunk = chunk.map_err(AgentError::Io)?;
            writer.write_all(&chunk).await?;
            total += chunk.len() as u64;
        }
        handle.await.map_err(|e| AgentError::Store(e.to_string()))??;
        Ok(total)
    }

    fn has_identities(&self) -> bool {
        !self.credentials.identities.is_empty()
    }
}
