// S3 destination - works against AWS and S3-compatible services (MinIO, LocalStack)

use std::path::Path;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::Object;
use aws_sdk_s3::Client;
use aws_types::region::Region;
use chrono::{DateTime, Utc};

use super::{validate_remote_name, Discovery, Storage, StorageError};
use crate::config::S3Config;

/// S3 bucket destination; retention uses the objects' `LastModified`
pub struct S3Storage {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3Storage {
    /// Create a new S3 destination with the given configuration
    pub async fn new(config: S3Config) -> Result<Self, StorageError> {
        if config.bucket.is_empty() {
            return Err(StorageError::Setup("s3 bucket is required".to_string()));
        }

        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(config.region.clone()));

        // Static keys from the config file win over the default provider chain
        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            loader = loader.credentials_provider(Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                None,
                None,
                "vaultkeeper-config",
            ));
        }

        // Support for LocalStack/MinIO with custom endpoint
        if let Some(ref endpoint) = config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }

        let sdk_config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.force_path_style)
            .build();

        Ok(Self {
            client: Client::from_conf(s3_config),
            bucket: config.bucket,
            prefix: config.prefix.trim_end_matches('/').to_string(),
        })
    }

    fn key(&self, remote_name: &str) -> String {
        if self.prefix.is_empty() {
            remote_name.to_string()
        } else {
            format!("{}/{}", self.prefix, remote_name)
        }
    }

    fn list_prefix(&self) -> String {
        if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix)
        }
    }

    /// Every object directly under the prefix, following continuation tokens
    async fn objects(&self) -> Result<Vec<(String, Option<DateTime<Utc>>)>, StorageError> {
        let list_prefix = self.list_prefix();
        let mut continuation: Option<String> = None;
        let mut objects = Vec::new();

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&list_prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| StorageError::List(DisplayErrorContext(e).to_string()))?;

            objects.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|object| entry(object, &list_prefix)),
            );

            match response.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        Ok(objects)
    }
}

fn entry(object: &Object, list_prefix: &str) -> Option<(String, Option<DateTime<Utc>>)> {
    let name = object.key()?.strip_prefix(list_prefix)?;
    if name.is_empty() || name.contains('/') {
        return None;
    }
    let modified = object
        .last_modified()
        .and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos()));
    Some((name.to_string(), modified))
}

#[async_trait]
impl Storage for S3Storage {
    async fn upload(&self, local_path: &Path, remote_name: &str) -> Result<(), StorageError> {
        validate_remote_name(remote_name)?;
        let upload_err = |message: String| StorageError::Upload {
            name: remote_name.to_string(),
            message,
        };

        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| upload_err(e.to_string()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.key(remote_name))
            .body(body)
            .send()
            .await
            .map_err(|e| upload_err(DisplayErrorContext(e).to_string()))?;

        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.objects().await?.into_iter().map(|(name, _)| name).collect())
    }

    async fn delete(&self, remote_name: &str) -> Result<(), StorageError> {
        validate_remote_name(remote_name)?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.key(remote_name))
            .send()
            .await
            .map_err(|e| StorageError::Delete {
                name: remote_name.to_string(),
                message: DisplayErrorContext(e).to_string(),
            })?;
        Ok(())
    }

    async fn old_files(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, StorageError> {
        Ok(self
            .objects()
            .await?
            .into_iter()
            .filter(|(_, modified)| modified.is_some_and(|m| m < cutoff))
            .map(|(name, _)| name)
            .collect())
    }

    fn discovery(&self) -> Discovery {
        Discovery::Native
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_strips_prefix_and_skips_nested_keys() {
        let object = Object::builder()
            .key("db/orders_mysql_20240305_020000.sql.gz")
            .last_modified(aws_sdk_s3::primitives::DateTime::from_secs(1_709_604_000))
            .build();
        let (name, modified) = entry(&object, "db/").unwrap();
        assert_eq!(name, "orders_mysql_20240305_020000.sql.gz");
        assert_eq!(modified.unwrap().timestamp(), 1_709_604_000);

        let nested = Object::builder().key("db/archive/x.sql").build();
        assert!(entry(&nested, "db/").is_none());
    }
}
