//! Azure Blob Storage over its REST API.
//!
//! Only the two calls the viewer needs are implemented:
//!
//! * **List Blobs**: `GET {endpoint}/{container}?restype=container&comp=list`,
//!   followed through `NextMarker` until the listing is complete.
//! * **Get Blob**: `GET {endpoint}/{container}/{name}`.
//!
//! Requests are authorised either with Shared Key (account name + key from
//! the connection string, HMAC-SHA256 over the canonical request) or with a
//! SAS token appended to the query string.

use super::{BlobDescriptor, BlobStore, DocumentBytes};
use crate::error::{StoreError, ViewerError};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use sha2::Sha256;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

/// REST API version sent as `x-ms-version`.
const API_VERSION: &str = "2021-08-06";

/// Storage emulator (Azurite) well-known account.
const DEV_ACCOUNT: &str = "devstoreaccount1";
const DEV_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const DEV_BLOB_ENDPOINT: &str = "http://127.0.0.1:10000/devstoreaccount1";

// ── Connection string ────────────────────────────────────────────────────

/// How requests are authorised.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Account key; every request carries a Shared Key signature.
    SharedKey { account: String, key: Vec<u8> },
    /// Shared access signature query string (without leading `?`).
    Sas(String),
    /// Public container; no authorisation.
    Anonymous,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::SharedKey { account, .. } => f
                .debug_struct("SharedKey")
                .field("account", account)
                .field("key", &"<redacted>")
                .finish(),
            Credentials::Sas(_) => f.write_str("Sas(<redacted>)"),
            Credentials::Anonymous => f.write_str("Anonymous"),
        }
    }
}

/// A parsed Azure storage connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pub blob_endpoint: Url,
    pub credentials: Credentials,
}

impl ConnectionString {
    /// Parse `Key=Value;Key=Value` pairs.
    ///
    /// Recognised keys: `DefaultEndpointsProtocol`, `AccountName`,
    /// `AccountKey`, `EndpointSuffix`, `BlobEndpoint`,
    /// `SharedAccessSignature`, `UseDevelopmentStorage`.
    pub fn parse(s: &str) -> Result<Self, ViewerError> {
        let invalid = |msg: &str| ViewerError::InvalidConnectionString(msg.to_string());

        let mut pairs = BTreeMap::new();
        for part in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (k, v) = part
                .split_once('=')
                .ok_or_else(|| invalid("expected Key=Value pairs separated by ';'"))?;
            pairs.insert(k.trim().to_ascii_lowercase(), v.trim().to_string());
        }
        if pairs.is_empty() {
            return Err(invalid("connection string is empty"));
        }

        if pairs
            .get("usedevelopmentstorage")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
        {
            let key = STANDARD.decode(DEV_KEY).map_err(|e| invalid(&e.to_string()))?;
            let blob_endpoint = Url::parse(DEV_BLOB_ENDPOINT).map_err(|e| invalid(&e.to_string()))?;
            return Ok(Self {
                blob_endpoint,
                credentials: Credentials::SharedKey {
                    account: DEV_ACCOUNT.to_string(),
                    key,
                },
            });
        }

        let account = pairs.get("accountname").cloned();
        let blob_endpoint = match (pairs.get("blobendpoint"), &account) {
            (Some(ep), _) => ep.clone(),
            (None, Some(account)) => {
                let protocol = pairs
                    .get("defaultendpointsprotocol")
                    .map(String::as_str)
                    .unwrap_or("https");
                let suffix = pairs
                    .get("endpointsuffix")
                    .map(String::as_str)
                    .unwrap_or("core.windows.net");
                format!("{protocol}://{account}.blob.{suffix}")
            }
            (None, None) => return Err(invalid("needs AccountName or BlobEndpoint")),
        };
        let blob_endpoint = Url::parse(&blob_endpoint)
            .map_err(|e| invalid(&format!("bad blob endpoint '{blob_endpoint}': {e}")))?;
        if !matches!(blob_endpoint.scheme(), "http" | "https") || blob_endpoint.cannot_be_a_base() {
            return Err(invalid("blob endpoint must be an http(s) URL"));
        }

        let credentials = if let Some(sas) = pairs.get("sharedaccesssignature") {
            Credentials::Sas(sas.trim_start_matches('?').to_string())
        } else if let (Some(account), Some(key)) = (account, pairs.get("accountkey")) {
            let key = STANDARD
                .decode(key)
                .map_err(|_| invalid("AccountKey is not valid base64"))?;
            Credentials::SharedKey { account, key }
        } else {
            Credentials::Anonymous
        };

        Ok(Self {
            blob_endpoint,
            credentials,
        })
    }
}

// ── List Blobs response ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct EnumerationResults {
    #[serde(rename = "Blobs", default)]
    blobs: BlobList,
    #[serde(rename = "NextMarker", default)]
    next_marker: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BlobList {
    #[serde(rename = "Blob", default)]
    items: Vec<BlobItem>,
}

#[derive(Debug, Deserialize)]
struct BlobItem {
    #[serde(rename = "Name")]
    name: String,
}

/// One page of a listing: names plus the continuation marker, if any.
fn parse_listing(xml: &str) -> Result<(Vec<String>, Option<String>), StoreError> {
    let xml = xml.trim_start_matches('\u{feff}');
    let results: EnumerationResults = quick_xml::de::from_str(xml)
        .map_err(|e| StoreError::unavailable(format!("malformed blob listing: {e}")))?;
    let names = results.blobs.items.into_iter().map(|b| b.name).collect();
    let marker = results.next_marker.filter(|m| !m.is_empty());
    Ok((names, marker))
}

// ── Shared Key signing ───────────────────────────────────────────────────

/// `x-ms-date` value: RFC 1123 in GMT.
fn ms_date() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// Canonical string for a body-less request, per the Shared Key scheme.
fn string_to_sign(verb: &str, url: &Url, ms_headers: &[(&str, &str)], account: &str) -> String {
    let mut s = String::with_capacity(256);
    s.push_str(verb);
    s.push('\n');
    // Content-Encoding … Range: all empty for GET.
    s.push_str(&"\n".repeat(11));

    let mut headers: Vec<(String, &str)> = ms_headers
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.trim()))
        .collect();
    headers.sort();
    for (k, v) in headers {
        s.push_str(&k);
        s.push(':');
        s.push_str(v);
        s.push('\n');
    }

    s.push('/');
    s.push_str(account);
    s.push_str(url.path());

    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (k, v) in url.query_pairs() {
        params
            .entry(k.to_ascii_lowercase())
            .or_default()
            .push(v.into_owned());
    }
    for (k, mut values) in params {
        values.sort();
        s.push('\n');
        s.push_str(&k);
        s.push(':');
        s.push_str(&values.join(","));
    }
    s
}

fn sign(key: &[u8], string_to_sign: &str) -> Result<String, StoreError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|e| StoreError::unavailable(format!("cannot sign request: {e}")))?;
    mac.update(string_to_sign.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

// ── Store ────────────────────────────────────────────────────────────────

/// A container in an Azure storage account.
pub struct AzureBlobStore {
    client: reqwest::Client,
    endpoint: Url,
    container: String,
    credentials: Credentials,
    timeout_secs: u64,
}

impl fmt::Debug for AzureBlobStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureBlobStore")
            .field("endpoint", &self.endpoint.as_str())
            .field("container", &self.container)
            .field("credentials", &self.credentials)
            .finish()
    }
}

impl AzureBlobStore {
    /// Build the store client. Constructed once and reused; there is no
    /// reconnect or credential refresh.
    pub fn new(
        conn: ConnectionString,
        container: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ViewerError> {
        let container = container.into();
        if container.is_empty() {
            return Err(ViewerError::MissingConfig { name: "container" });
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("nexus-viewer/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ViewerError::HttpClient(e.to_string()))?;

        info!(
            "Blob store: {} / {}",
            conn.blob_endpoint.as_str(),
            container
        );

        Ok(Self {
            client,
            endpoint: conn.blob_endpoint,
            container,
            credentials: conn.credentials,
            timeout_secs: timeout.as_secs(),
        })
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    fn container_url(&self) -> Result<Url, StoreError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::unavailable("blob endpoint cannot carry a path"))?
            .pop_if_empty()
            .push(&self.container);
        Ok(url)
    }

    fn list_url(&self, marker: Option<&str>) -> Result<Url, StoreError> {
        let mut url = self.container_url()?;
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("restype", "container").append_pair("comp", "list");
            if let Some(m) = marker {
                q.append_pair("marker", m);
            }
        }
        Ok(url)
    }

    fn blob_url(&self, name: &str) -> Result<Url, StoreError> {
        let mut url = self.container_url()?;
        url.path_segments_mut()
            .map_err(|_| StoreError::unavailable("blob endpoint cannot carry a path"))?
            .extend(name.split('/'));
        Ok(url)
    }

    /// Send an authorised GET and map transport failures.
    async fn get(&self, mut url: Url) -> Result<reqwest::Response, StoreError> {
        if let Credentials::Sas(sas) = &self.credentials {
            let query = match url.query() {
                Some(q) => format!("{q}&{sas}"),
                None => sas.clone(),
            };
            url.set_query(Some(&query));
        }

        let date = ms_date();
        let mut request = self
            .client
            .get(url.clone())
            .header("x-ms-date", &date)
            .header("x-ms-version", API_VERSION);

        if let Credentials::SharedKey { account, key } = &self.credentials {
            let to_sign = string_to_sign(
                "GET",
                &url,
                &[("x-ms-date", date.as_str()), ("x-ms-version", API_VERSION)],
                account,
            );
            request = request.header(
                "Authorization",
                format!("SharedKey {account}:{}", sign(key, &to_sign)?),
            );
        }

        debug!("GET {}{}", url.origin().ascii_serialization(), url.path());
        request.send().await.map_err(|e| {
            if e.is_timeout() {
                StoreError::Timeout {
                    secs: self.timeout_secs,
                }
            } else {
                StoreError::unavailable(e.to_string())
            }
        })
    }

    fn status_error(&self, status: StatusCode) -> StoreError {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                StoreError::unavailable(format!("authentication failed (HTTP {status})"))
            }
            StatusCode::NOT_FOUND => StoreError::unavailable(format!(
                "container '{}' does not exist",
                self.container
            )),
            _ => StoreError::unavailable(format!("HTTP {status}")),
        }
    }
}

#[async_trait]
impl BlobStore for AzureBlobStore {
    async fn enumerate(&self) -> Result<Vec<BlobDescriptor>, StoreError> {
        let mut names = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let response = self.get(self.list_url(marker.as_deref())?).await?;
            let status = response.status();
            if !status.is_success() {
                return Err(self.status_error(status));
            }
            let body = response
                .text()
                .await
                .map_err(|e| StoreError::unavailable(e.to_string()))?;
            let (page, next) = parse_listing(&body)?;
            debug!("Listing page: {} blobs", page.len());
            names.extend(page);

            match next {
                Some(m) => marker = Some(m),
                None => break,
            }
        }

        info!("Container '{}' holds {} blobs", self.container, names.len());
        Ok(names.into_iter().map(BlobDescriptor::new).collect())
    }

    async fn fetch(&self, name: &str) -> Result<DocumentBytes, StoreError> {
        let response = self.get(self.blob_url(name)?).await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound {
                name: name.to_string(),
            });
        }
        if !status.is_success() {
            return Err(self.status_error(status));
        }

        let bytes = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                StoreError::Timeout {
                    secs: self.timeout_secs,
                }
            } else {
                StoreError::unavailable(e.to_string())
            }
        })?;
        info!("Fetched '{}' ({} bytes)", name, bytes.len());
        Ok(DocumentBytes::new(bytes.to_vec()))
    }
}
