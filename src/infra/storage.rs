use anyhow::{anyhow, Result};
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_config::Region;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use url::Url;

use crate::config::AppConfig;

/// Where post images live. URLs returned by `put` are the ones stored on the
/// post document and handed back to `delete_url`.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, content_type: &str, bytes: Bytes) -> Result<String>;

    async fn delete_url(&self, url: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct ObjectStorage {
    client: Client,
    bucket: String,
    public_base: Url,
}

impl ObjectStorage {
    pub async fn new(config: &AppConfig) -> Result<Self> {
        let region_provider = RegionProviderChain::first_try(Region::new(config.s3_region.clone()));
        let shared_config = aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .load()
            .await;

        let mut s3_builder = aws_sdk_s3::config::Builder::from(&shared_config)
            .region(shared_config.region().cloned())
            .endpoint_url(config.s3_endpoint.clone())
            .force_path_style(true);
        if let Some(provider) = shared_config.credentials_provider() {
            s3_builder = s3_builder.credentials_provider(provider);
        }
        let client = Client::from_conf(s3_builder.build());

        let public_endpoint = config
            .s3_public_endpoint
            .as_deref()
            .unwrap_or(&config.s3_endpoint);

        Ok(Self {
            client,
            bucket: config.s3_bucket.clone(),
            public_base: parse_endpoint(public_endpoint)?,
        })
    }

    fn public_url(&self, key: &str) -> Result<String> {
        object_url(&self.public_base, &self.bucket, key)
    }
}

#[async_trait]
impl BlobStore for ObjectStorage {
    async fn put(&self, key: &str, content_type: &str, bytes: Bytes) -> Result<String> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await?;
        self.public_url(key)
    }

    async fn delete_url(&self, url: &str) -> Result<()> {
        let key = object_key(url, &self.bucket)?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await?;
        Ok(())
    }
}

pub fn parse_endpoint(endpoint: &str) -> Result<Url> {
    let url = if endpoint.contains("://") {
        Url::parse(endpoint)?
    } else {
        Url::parse(&format!("http://{}", endpoint))?
    };
    Ok(url)
}

/// Path-style URL of `key` in `bucket`.
pub fn object_url(base: &Url, bucket: &str, key: &str) -> Result<String> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| anyhow!("endpoint cannot be a base url"))?
        .pop_if_empty()
        .push(bucket)
        .extend(key.split('/'));
    Ok(url.to_string())
}

/// Recovers the object key from a URL produced by [`object_url`].
pub fn object_key(url: &str, bucket: &str) -> Result<String> {
    let url = Url::parse(url)?;
    let mut segments = url
        .path_segments()
        .ok_or_else(|| anyhow!("image url has no path"))?
        .filter(|segment| !segment.is_empty());

    match segments.next() {
        Some(first) if first == bucket => {}
        _ => return Err(anyhow!("image url is not in bucket {}", bucket)),
    }

    let key = segments.collect::<Vec<_>>().join("/");
    if key.is_empty() {
        return Err(anyhow!("image url has no object key"));
    }
    Ok(key)
}

