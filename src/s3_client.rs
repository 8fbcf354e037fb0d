//! A simplified S3 client that supports downloading whole objects for remote locations.
//! It attempts to hide the complexities of working with the AWS SDK for S3.

use crate::error::SdsError;
use crate::resource_manager::ResourceManager;

use aws_credential_types::Credentials;
use aws_sdk_s3::config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_types::region::Region;
use bytes::Bytes;
use hashbrown::HashMap;
use tokio::sync::RwLock;
use tracing::Instrument;
use url::Url;

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum S3Credentials {
    AccessKey {
        access_key: String,
        secret_key: String,
    },
    None,
}

impl S3Credentials {
    /// Create an access key credential.
    pub fn access_key(access_key: &str, secret_key: &str) -> Self {
        S3Credentials::AccessKey {
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
        }
    }

    /// Credentials from an optional key pair. Both halves are needed for an access key.
    pub fn from_keys(access_key: Option<&str>, secret_key: Option<&str>) -> Self {
        match (access_key, secret_key) {
            (Some(access_key), Some(secret_key)) => Self::access_key(access_key, secret_key),
            _ => S3Credentials::None,
        }
    }
}

/// A map containing initialised S3Client objects.
///
/// The [aws_sdk_s3::Client] object is relatively expensive to create, so we reuse them where
/// possible. Remote locations are fixed at start-up, so the map holds at most one client per
/// configured endpoint and credential pair.
pub struct S3ClientMap {
    /// A [hashbrown::HashMap] for storing the S3 clients. A read-write lock synchronises access to
    /// the map, optimised for reads.
    map: RwLock<HashMap<(Url, S3Credentials), S3Client>>,
}

impl S3ClientMap {
    /// Create and return an [crate::s3_client::S3ClientMap].
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        S3ClientMap {
            map: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create an [crate::s3_client::S3Client] object from the map.
    ///
    /// # Arguments
    ///
    /// * `url`: Object storage API URL
    /// * `credentials`: Object storage account credentials
    pub async fn get(&self, url: &Url, credentials: S3Credentials) -> S3Client {
        let key = (url.clone(), credentials.clone());
        // Common case: return an existing client from the map.
        {
            let map = self.map.read().await;
            if let Some(client) = map.get(&key) {
                return client.clone();
            }
        }
        // Less common case: create a new client, insert it into the map and return it.
        let mut map = self.map.write().await;
        // Allow for a possible race here since we dropped the read lock.
        if let Some(client) = map.get(&key) {
            client.clone()
        } else {
            tracing::info!("Creating new S3 client for {}", url);
            let client = S3Client::new(url, credentials);
            let (_, client) = map.insert_unique_unchecked(key, client);
            client.clone()
        }
    }
}

/// S3 client object.
#[derive(Clone, Debug)]
pub struct S3Client {
    /// Underlying AWS SDK S3 client object.
    client: Client,
}

impl S3Client {
    /// Creates an S3Client object
    ///
    /// # Arguments
    ///
    /// * `url`: Object storage API URL
    /// * `credentials`: Object storage account credentials
    pub fn new(url: &Url, credentials: S3Credentials) -> Self {
        let region = Region::new("us-east-1");
        let builder = aws_sdk_s3::Config::builder().behavior_version(BehaviorVersion::latest());
        let builder = match credentials {
            S3Credentials::AccessKey {
                access_key,
                secret_key,
            } => {
                let credentials = Credentials::from_keys(access_key, secret_key, None);
                builder.credentials_provider(credentials)
            }
            S3Credentials::None => builder,
        };
        let s3_config = builder
            .region(Some(region))
            .endpoint_url(url.to_string())
            .force_path_style(true)
            .build();
        let client = Client::from_conf(s3_config);
        Self { client }
    }

    /// Downloads a whole object from object storage and returns the data as Bytes
    ///
    /// Memory for the object is reserved from the resource manager when the response carries
    /// a content length, and released once the data has been returned to the caller.
    ///
    /// # Arguments
    ///
    /// * `bucket`: Name of the bucket
    /// * `key`: Name of the object in the bucket
    /// * `resource_manager`: ResourceManager object
    #[tracing::instrument(level = "DEBUG", skip(self, resource_manager))]
    pub async fn download_object(
        &self,
        bucket: &str,
        key: &str,
        resource_manager: &ResourceManager,
    ) -> Result<Bytes, SdsError> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .instrument(tracing::Span::current())
            .await?;
        let _mem_permits = match response.content_length() {
            Some(length) => resource_manager.memory(usize::try_from(length)?).await?,
            None => None,
        };
        let data = response
            .body
            .collect()
            .instrument(tracing::Span::current())
            .await?
            .into_bytes();
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn make_access_key() -> S3Credentials {
        S3Credentials::access_key("user", "password")
    }

    fn make_alt_access_key() -> S3Credentials {
        S3Credentials::access_key("user2", "password")
    }

    #[tokio::test]
    async fn s3_client_map() {
        let url = Url::parse("http://example.com").unwrap();
        let map = S3ClientMap::new();
        map.get(&url, make_access_key()).await;
        map.get(&url, make_access_key()).await;
        assert_eq!(map.map.read().await.len(), 1);
        map.get(&url, make_alt_access_key()).await;
        assert_eq!(map.map.read().await.len(), 2);
        map.get(&url, S3Credentials::None).await;
        map.get(&url, S3Credentials::None).await;
        assert_eq!(map.map.read().await.len(), 3);
    }

    #[test]
    fn new() {
        let url = Url::parse("http://example.com").unwrap();
        S3Client::new(&url, make_access_key());
    }

    #[test]
    fn new_no_auth() {
        let url = Url::parse("http://example.com").unwrap();
        S3Client::new(&url, S3Credentials::None);
    }

    #[test]
    fn credentials_from_keys() {
        assert_eq!(
            make_access_key(),
            S3Credentials::from_keys(Some("user"), Some("password"))
        );
        assert_eq!(S3Credentials::None, S3Credentials::from_keys(Some("user"), None));
        assert_eq!(S3Credentials::None, S3Credentials::from_keys(None, None));
    }
}
