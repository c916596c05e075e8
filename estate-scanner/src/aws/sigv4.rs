//! AWS Signature Version 4 request signing.

use super::session::AwsCredentials;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use url::Url;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Headers a signed request must carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub amz_date: String,
    pub authorization: String,
    pub security_token: Option<String>,
}

impl Signature {
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("x-amz-date", self.amz_date.clone()),
            ("authorization", self.authorization.clone()),
        ];
        if let Some(token) = &self.security_token {
            headers.push(("x-amz-security-token", token.clone()));
        }
        headers
    }
}

pub struct SigningParams<'a> {
    pub credentials: &'a AwsCredentials,
    pub region: &'a str,
    pub service: &'a str,
    pub time: DateTime<Utc>,
}

/// Sign a request. `headers` are extra headers to include in the signature;
/// `host` and `x-amz-date` are always signed.
pub fn sign(
    params: &SigningParams<'_>,
    method: &str,
    url: &Url,
    headers: &[(&str, &str)],
    payload: &[u8],
) -> Signature {
    let amz_date = params.time.format("%Y%m%dT%H%M%SZ").to_string();
    let date = params.time.format("%Y%m%d").to_string();

    let mut canonical: Vec<(String, String)> = headers
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.trim().to_string()))
        .collect();
    canonical.push(("host".to_string(), host(url)));
    canonical.push(("x-amz-date".to_string(), amz_date.clone()));
    if let Some(token) = &params.credentials.session_token {
        canonical.push(("x-amz-security-token".to_string(), token.clone()));
    }
    canonical.sort();

    let signed_headers = canonical
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");
    let header_block: String = canonical
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v))
        .collect();

    let path = if url.path().is_empty() { "/" } else { url.path() };
    let canonical_request = [
        method,
        path,
        &canonical_query(url),
        &header_block,
        &signed_headers,
        &hex::encode(Sha256::digest(payload)),
    ]
    .join("\n");

    let scope = format!(
        "{}/{}/{}/aws4_request",
        date, params.region, params.service
    );
    let string_to_sign = [
        ALGORITHM,
        &amz_date,
        &scope,
        &hex::encode(Sha256::digest(canonical_request.as_bytes())),
    ]
    .join("\n");

    let key = signing_key(
        &params.credentials.secret_access_key,
        &date,
        params.region,
        params.service,
    );
    let signature = hex::encode(hmac(&key, string_to_sign.as_bytes()));

    Signature {
        amz_date,
        authorization: format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM, params.credentials.access_key_id, scope, signed_headers, signature
        ),
        security_token: params.credentials.session_token.clone(),
    }
}

fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac(format!("AWS4{}", secret).as_bytes(), date.as_bytes());
    let k_region = hmac(&k_date, region.as_bytes());
    let k_service = hmac(&k_region, service.as_bytes());
    hmac(&k_service, b"aws4_request")
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => unreachable!("hmac key length is unrestricted"),
    };
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn host(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

fn canonical_query(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (uri_encode(&k), uri_encode(&v)))
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn uri_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}
