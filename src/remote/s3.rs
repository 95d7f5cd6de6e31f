//! Object-store backend: an S3-compatible bucket over its REST API.
//!
//! Requests are signed with AWS Signature Version 4. With no `endpoint`
//! override the bucket is addressed virtual-host style on amazonaws.com;
//! with one, path style (`<endpoint>/<bucket>/<key>`) for MinIO and friends.

use super::{Remote, Stream, parse_base_url, resolve_names, url_basename};
use crate::config::ObjectStoreConfig;
use crate::error::{Result, ScribepoolError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const BACKEND: &str = "S3";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

type HmacSha256 = Hmac<Sha256>;

pub struct S3Remote {
    key: String,
    secret: String,
    bucket: String,
    region: String,
    prefix: Option<String>,
    api: Url,
    base: Url,
    client: reqwest::Client,
}

impl S3Remote {
    pub fn from_config(config: &ObjectStoreConfig) -> Result<Self> {
        let bucket = config
            .bucket()
            .ok_or_else(|| {
                ScribepoolError::argument("missing required config field remote-object-store.bucket")
            })?
            .to_string();
        let region = config.region().to_string();
        let prefix = config.prefix().map(str::to_string);

        let api = match config.endpoint() {
            Some(endpoint) => {
                let mut api = parse_base_url("remote-object-store.endpoint", endpoint)?;
                push_segments(&mut api, &bucket);
                api
            }
            None => parse_base_url(
                "remote-object-store.bucket",
                &virtual_host_url(&bucket, &region),
            )?,
        };

        let base = match config.url() {
            Some(url) => parse_base_url("remote-object-store.url", url)?,
            None => {
                let mut base = api.clone();
                if let Some(prefix) = &prefix {
                    push_segments(&mut base, prefix);
                }
                base
            }
        };

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ScribepoolError::RemoteOperation {
                backend: BACKEND,
                message: format!("Failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            key: config.key()?.to_string(),
            secret: config.secret()?.to_string(),
            bucket,
            region,
            prefix,
            api,
            base,
            client,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Object key for a remote name.
    fn object_key(&self, name: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{name}"),
            None => name.to_string(),
        }
    }

    fn object_url(&self, name: &str) -> Url {
        let mut url = self.api.clone();
        push_segments(&mut url, &self.object_key(name));
        url
    }

    fn failed(&self, message: String) -> ScribepoolError {
        ScribepoolError::RemoteOperation {
            backend: BACKEND,
            message,
        }
    }

    async fn send(&self, method: reqwest::Method, name: &str, body: Vec<u8>) -> Result<()> {
        let url = self.object_url(name);
        let signed = sign(
            &SigningInput {
                method: method.as_str(),
                url: &url,
                payload: &body,
                region: &self.region,
                key: &self.key,
                secret: &self.secret,
            },
            Utc::now(),
        )?;

        let mut request = self
            .client
            .request(method.clone(), url.clone())
            .header("x-amz-date", &signed.amz_date)
            .header("x-amz-content-sha256", &signed.payload_hash)
            .header("authorization", &signed.authorization);
        if method == reqwest::Method::PUT {
            request = request
                .header("content-type", content_type(name))
                .body(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.failed(format!("{method} {url}: {e}")))?;

        let status = response.status();
        if status.is_success() || (method == reqwest::Method::DELETE && status.as_u16() == 404) {
            return Ok(());
        }
        let detail = response.text().await.unwrap_or_default();
        Err(self.failed(format!(
            "{method} {url} returned {status}: {}",
            s3_error_code(&detail).unwrap_or(detail.trim())
        )))
    }
}

fn virtual_host_url(bucket: &str, region: &str) -> String {
    if region == "us-east-1" {
        format!("https://{bucket}.s3.amazonaws.com")
    } else {
        format!("https://{bucket}.s3.{region}.amazonaws.com")
    }
}

fn push_segments(url: &mut Url, path: &str) {
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            segments.push(part);
        }
    }
}

fn content_type(name: &str) -> &'static str {
    match name.rsplit('.').next().map(str::to_ascii_lowercase).as_deref() {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("ogg") => "audio/ogg",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

/// Pull `<Code>...</Code>` out of an S3 XML error body.
fn s3_error_code(body: &str) -> Option<&str> {
    let start = body.find("<Code>")? + "<Code>".len();
    let end = body[start..].find("</Code>")? + start;
    Some(&body[start..end])
}

struct SigningInput<'a> {
    method: &'a str,
    url: &'a Url,
    payload: &'a [u8],
    region: &'a str,
    key: &'a str,
    secret: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SignedHeaders {
    amz_date: String,
    payload_hash: String,
    authorization: String,
}

const SIGNED_HEADERS: &str = "host;x-amz-content-sha256;x-amz-date";

fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

fn hmac(key: &[u8], data: &str) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| ScribepoolError::RemoteOperation {
        backend: BACKEND,
        message: format!("Failed to initialise request signing: {e}"),
    })?;
    mac.update(data.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

fn canonical_request(input: &SigningInput<'_>, amz_date: &str, payload_hash: &str) -> String {
    format!(
        "{method}\n{path}\n{query}\nhost:{host}\nx-amz-content-sha256:{payload_hash}\nx-amz-date:{amz_date}\n\n{SIGNED_HEADERS}\n{payload_hash}",
        method = input.method,
        path = input.url.path(),
        query = input.url.query().unwrap_or(""),
        host = host_header(input.url),
    )
}

/// Compute the SigV4 headers for one request at `now`.
fn sign(input: &SigningInput<'_>, now: DateTime<Utc>) -> Result<SignedHeaders> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();
    let payload_hash = sha256_hex(input.payload);
    let scope = format!("{date}/{}/s3/aws4_request", input.region);

    let canonical = canonical_request(input, &amz_date, &payload_hash);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
        sha256_hex(canonical.as_bytes())
    );

    let k_date = hmac(format!("AWS4{}", input.secret).as_bytes(), &date)?;
    let k_region = hmac(&k_date, input.region)?;
    let k_service = hmac(&k_region, "s3")?;
    let k_signing = hmac(&k_service, "aws4_request")?;
    let signature: String = hmac(&k_signing, &string_to_sign)?
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect();

    Ok(SignedHeaders {
        authorization: format!(
            "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={SIGNED_HEADERS}, Signature={signature}",
            input.key
        ),
        amz_date,
        payload_hash,
    })
}

#[async_trait]
impl Remote for S3Remote {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn base_url(&self) -> &Url {
        &self.base
    }

    async fn put(&self, streams: &[Stream], names: Option<&[String]>) -> Result<Vec<String>> {
        let names = resolve_names(streams, names)?;
        let mut uploaded: Vec<&str> = Vec::with_capacity(names.len());

        for (stream, name) in streams.iter().zip(&names) {
            if let Err(e) = self
                .send(reqwest::Method::PUT, name, stream.data().to_vec())
                .await
            {
                for done in uploaded.iter().rev() {
                    if let Err(cleanup) = self.send(reqwest::Method::DELETE, done, Vec::new()).await {
                        warn!(name = %done, error = %cleanup, "failed to clean up partial S3 upload");
                    }
                }
                return Err(e);
            }
            debug!(bucket = %self.bucket, name = %name, bytes = stream.data().len(), "uploaded to S3");
            uploaded.push(name);
        }

        Ok(names.iter().map(|name| self.url_for(name)).collect())
    }

    async fn remove(&self, names_or_urls: &[String]) -> Result<()> {
        for item in names_or_urls {
            self.send(reqwest::Method::DELETE, url_basename(item), Vec::new())
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn config() -> ObjectStoreConfig {
        ObjectStoreConfig::new("AKIDEXAMPLE", "wJalrXUtnFEMI/K7MDENG", "scribepool-test")
    }

    #[test]
    fn test_default_addresses() {
        let remote = S3Remote::from_config(&config()).unwrap();
        assert_eq!(remote.bucket(), "scribepool-test");
        assert!(remote.base_url().as_str().contains("scribepool-test"));
        assert_eq!(
            remote.url_for("a.mp3"),
            "https://scribepool-test.s3.amazonaws.com/a.mp3"
        );
        assert_eq!(
            remote.object_url("a.mp3").as_str(),
            "https://scribepool-test.s3.amazonaws.com/a.mp3"
        );
    }

    #[test]
    fn test_custom_public_url() {
        let mut config = config();
        config.set_url("http://tp.example.com/tp-test/1/2/3/");
        let remote = S3Remote::from_config(&config).unwrap();
        assert!(!remote.base_url().as_str().contains("scribepool-test"));
        assert_eq!(remote.host().as_deref(), Some("tp.example.com"));
        assert_eq!(remote.path(), "/tp-test/1/2/3");
        assert_eq!(remote.url_for("x.html"), "http://tp.example.com/tp-test/1/2/3/x.html");
    }

    #[test]
    fn test_endpoint_uses_path_style() {
        let mut config = config();
        config.set_endpoint("http://localhost:9000/");
        let remote = S3Remote::from_config(&config).unwrap();
        assert_eq!(
            remote.object_url("a.mp3").as_str(),
            "http://localhost:9000/scribepool-test/a.mp3"
        );
    }

    #[test]
    fn test_regional_virtual_host() {
        assert_eq!(
            virtual_host_url("b", "eu-west-1"),
            "https://b.s3.eu-west-1.amazonaws.com"
        );
    }

    #[test]
    fn test_missing_credentials_are_argument_errors() {
        let mut config = ObjectStoreConfig::default();
        config.set_bucket("bucket");
        let err = S3Remote::from_config(&config).err().unwrap();
        assert!(err.to_string().contains("remote-object-store.key"));
    }

    fn signing_input<'a>(url: &'a Url, secret: &'a str) -> SigningInput<'a> {
        SigningInput {
            method: "PUT",
            url,
            payload: b"hello",
            region: "us-east-1",
            key: "AKIDEXAMPLE",
            secret,
        }
    }

    #[test]
    fn test_canonical_request_layout() {
        let url = Url::parse("https://bucket.s3.amazonaws.com/chunk.mp3").unwrap();
        let input = signing_input(&url, "secret");
        let canonical = canonical_request(&input, "20240101T000000Z", "abc");
        assert_eq!(
            canonical,
            "PUT\n/chunk.mp3\n\nhost:bucket.s3.amazonaws.com\nx-amz-content-sha256:abc\n\
             x-amz-date:20240101T000000Z\n\nhost;x-amz-content-sha256;x-amz-date\nabc"
        );
    }

    #[test]
    fn test_signature_shape_and_determinism() {
        let url = Url::parse("https://bucket.s3.amazonaws.com/chunk.mp3").unwrap();
        let now = Utc.with_ymd_and_hms(2013, 5, 24, 0, 0, 0).unwrap();

        let first = sign(&signing_input(&url, "secret"), now).unwrap();
        let again = sign(&signing_input(&url, "secret"), now).unwrap();
        let other = sign(&signing_input(&url, "other-secret"), now).unwrap();

        assert_eq!(first, again);
        assert_ne!(first.authorization, other.authorization);
        assert_eq!(first.amz_date, "20130524T000000Z");
        assert_eq!(first.payload_hash, sha256_hex(b"hello"));
        assert!(first.authorization.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20130524/us-east-1/s3/aws4_request, \
             SignedHeaders=host;x-amz-content-sha256;x-amz-date, Signature="
        ));
        let signature = first.authorization.rsplit('=').next().unwrap();
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_signature_known_vector() {
        let url = Url::parse("https://bucket.s3.amazonaws.com/chunk.mp3").unwrap();
        let now = Utc.with_ymd_and_hms(2013, 5, 24, 0, 0, 0).unwrap();

        let signed = sign(
            &signing_input(&url, "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY"),
            now,
        )
        .unwrap();
        assert!(signed.authorization.ends_with(
            "Signature=291333eebf81f41ed626e508f774763672f09d17662796700039dfa3d4d5c227"
        ));
    }

    #[test]
    fn test_sha256_hex_known_value() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_s3_error_code() {
        let body = "<Error><Code>InvalidAccessKeyId</Code><Message>nope</Message></Error>";
        assert_eq!(s3_error_code(body), Some("InvalidAccessKeyId"));
        assert_eq!(s3_error_code("plain"), None);
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type("a.HTML"), "text/html; charset=utf-8");
        assert_eq!(content_type("a.mp3"), "audio/mpeg");
        assert_eq!(content_type("noext"), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_s3_operation_failure() {
        let mut config = config();
        config.set_endpoint("http://127.0.0.1:9");
        let remote = S3Remote::from_config(&config).unwrap();

        let err = remote
            .put(&[Stream::from_bytes("x")], Some(&["x.txt".to_string()]))
            .await
            .unwrap_err();
        assert!(matches!(err, ScribepoolError::RemoteOperation { backend: "S3", .. }));
        assert!(err.to_string().to_lowercase().contains("s3 operation fail"));
    }
}
