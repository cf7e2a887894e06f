use crate::config::S3Config;
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// User metadata attached to a stored object
pub type ObjectMetadata = Vec<(String, String)>;

/// Blob store holding source images and generated thumbnails.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Download an object's full body.
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Bytes>;

    /// Upload (or overwrite) an object.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
        metadata: ObjectMetadata,
    ) -> StorageResult<()>;

    /// Generate a time-limited GET URL for an object.
    async fn presign(&self, bucket: &str, key: &str, expiry: Duration) -> StorageResult<String>;
}

/// S3-backed object store
pub struct S3ObjectStore {
    client: S3Client,
    multipart_threshold_bytes: usize,
    part_size_bytes: usize,
}

impl S3ObjectStore {
    /// Create a new S3 object store client
    pub async fn new(config: &S3Config) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 object store initialized"
        );

        Self {
            client,
            multipart_threshold_bytes: config.multipart_threshold_bytes,
            part_size_bytes: config.part_size_bytes.max(1),
        }
    }

    /// Simple single-part upload for small objects
    async fn simple_upload(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
        metadata: ObjectMetadata,
    ) -> StorageResult<()> {
        let mut request = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type);

        for (name, value) in metadata {
            request = request.metadata(name, value);
        }

        request
            .send()
            .await
            .map_err(|e| StorageError::object_store("object.put", e))?;

        Ok(())
    }

    /// Multipart upload for large objects
    async fn multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
        metadata: ObjectMetadata,
    ) -> StorageResult<()> {
        let mut create_request = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .content_type(content_type);

        for (name, value) in metadata {
            create_request = create_request.metadata(name, value);
        }

        let create_response = create_request
            .send()
            .await
            .map_err(|e| StorageError::object_store("object.put", e))?;

        let upload_id = create_response
            .upload_id()
            .ok_or_else(|| StorageError::object_store("object.put", "no upload ID in response"))?;

        let mut completed_parts = Vec::new();

        for (index, chunk) in body.chunks(self.part_size_bytes).enumerate() {
            let part_number = index as i32 + 1;

            let upload_part_response = self
                .client
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(Bytes::copy_from_slice(chunk)))
                .send()
                .await
                .map_err(|e| StorageError::object_store("object.put", e))?;

            completed_parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(upload_part_response.e_tag().unwrap_or_default())
                    .build(),
            );
        }

        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .map_err(|e| StorageError::object_store("object.put", e))?;

        Ok(())
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self))]
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Bytes> {
        let output = match self.client.get_object().bucket(bucket).key(key).send().await {
            Ok(output) => output,
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false)
                {
                    return Err(StorageError::ObjectNotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    });
                }
                return Err(StorageError::object_store("object.get", e));
            }
        };

        let body = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::object_store("object.get", e))?
            .into_bytes();

        debug!(size_bytes = body.len(), "Object downloaded");
        metrics::counter!("pictor.objects.bytes_downloaded").increment(body.len() as u64);

        Ok(body)
    }

    #[instrument(skip(self, body, metadata), fields(size_bytes = body.len()))]
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
        metadata: ObjectMetadata,
    ) -> StorageResult<()> {
        let size = body.len();

        if size > self.multipart_threshold_bytes {
            self.multipart_upload(bucket, key, body, content_type, metadata)
                .await?;
        } else {
            self.simple_upload(bucket, key, body, content_type, metadata)
                .await?;
        }

        debug!(size_bytes = size, "Object uploaded");
        metrics::counter!("pictor.objects.bytes_uploaded").increment(size as u64);

        Ok(())
    }

    #[instrument(skip(self))]
    async fn presign(&self, bucket: &str, key: &str, expiry: Duration) -> StorageResult<String> {
        let presigning_config = PresigningConfig::expires_in(expiry)
            .map_err(|e| StorageError::object_store("object.presign", e))?;

        let presigned = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presigning_config)
            .await
            .map_err(|e| StorageError::object_store("object.presign", e))?;

        Ok(presigned.uri().to_string())
    }
}

/// Content type for an image file extension
pub fn content_type_for(extension: &str) -> &'static str {
    match extension.to_lowercase().as_str() {
        "jpeg" | "jpg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("jpg"), "image/jpeg");
        assert_eq!(content_type_for("JPEG"), "image/jpeg");
        assert_eq!(content_type_for("png"), "image/png");
        assert_eq!(content_type_for("tiff"), "image/tiff");
        assert_eq!(content_type_for("txt"), "application/octet-stream");
    }
}
