//! Presigned upload URLs.
//!
//! A credential authorizes exactly one `PUT` of one key in the uploads
//! bucket until it expires. The signature is an HMAC-SHA256 over the method,
//! bucket, key, expiry and publisher id, carried as URL-safe base64.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Prefix of every raw archive key.
pub const UPLOADS_PREFIX: &str = "uploads";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PresignError {
    #[error("{0} is required in the URL path")]
    InvalidPathSegment(&'static str),
    #[error("upload signing secret is not configured")]
    MissingSecret,
    #[error("public base URL `{0}` is not an http(s) URL")]
    InvalidBaseUrl(String),
    #[error("upload URL lifetime is out of range")]
    InvalidExpiry,
}

/// Reasons an upload attempt is refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("upload credential expired")]
    Expired,
    #[error("invalid upload signature")]
    BadSignature,
}

/// Issued credential returned to the publisher.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UploadCredential {
    pub url: String,
    pub bucket: String,
    pub key: String,
    pub expires_at: DateTime<Utc>,
}

/// Query parameters carried by a presigned URL.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignedParams {
    pub expires: i64,
    #[serde(default)]
    pub publisher: String,
    pub signature: String,
}

/// Issues and checks presigned upload URLs for the uploads bucket.
#[derive(Clone)]
pub struct UploadAuthorizer {
    secret: Arc<[u8]>,
    public_base_url: String,
    bucket: String,
    ttl: Duration,
}

impl UploadAuthorizer {
    pub fn new(
        secret: impl AsRef<[u8]>,
        public_base_url: impl Into<String>,
        bucket: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            secret: Arc::from(secret.as_ref()),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            bucket: bucket.into(),
            ttl,
        }
    }

    /// Issue a write credential for a fresh key under
    /// `uploads/{app_slug}/{version_id}/`.
    pub fn issue_upload_credential(
        &self,
        app_slug: &str,
        version_id: &str,
        publisher_id: &str,
    ) -> Result<UploadCredential, PresignError> {
        self.issue_at(app_slug, version_id, publisher_id, Utc::now())
    }

    fn issue_at(
        &self,
        app_slug: &str,
        version_id: &str,
        publisher_id: &str,
        now: DateTime<Utc>,
    ) -> Result<UploadCredential, PresignError> {
        ensure_segment(app_slug, "app-slug")?;
        ensure_segment(version_id, "version-id")?;
        if self.secret.is_empty() {
            return Err(PresignError::MissingSecret);
        }
        if !(self.public_base_url.starts_with("http://")
            || self.public_base_url.starts_with("https://"))
        {
            return Err(PresignError::InvalidBaseUrl(self.public_base_url.clone()));
        }

        let ttl = ChronoDuration::from_std(self.ttl).map_err(|_| PresignError::InvalidExpiry)?;
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or(PresignError::InvalidExpiry)?;

        let key = format!(
            "{}/{}/{}/{}.zip",
            UPLOADS_PREFIX,
            app_slug,
            version_id,
            Uuid::new_v4().simple()
        );
        let signature = self.sign(&key, expires_at.timestamp(), publisher_id);

        let encoded_key = key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        let url = format!(
            "{}/objects/{}/{}?expires={}&publisher={}&signature={}",
            self.public_base_url,
            urlencoding::encode(&self.bucket),
            encoded_key,
            expires_at.timestamp(),
            urlencoding::encode(publisher_id),
            signature
        );

        Ok(UploadCredential {
            url,
            bucket: self.bucket.clone(),
            key,
            expires_at,
        })
    }

    /// Check a presented credential for `bucket/key` at `now`.
    pub fn verify(
        &self,
        bucket: &str,
        key: &str,
        params: &SignedParams,
        now: DateTime<Utc>,
    ) -> Result<(), CredentialError> {
        if self.secret.is_empty() || bucket != self.bucket {
            return Err(CredentialError::BadSignature);
        }
        let provided = URL_SAFE_NO_PAD
            .decode(params.signature.as_bytes())
            .map_err(|_| CredentialError::BadSignature)?;
        self.mac(key, params.expires, &params.publisher)
            .verify_slice(&provided)
            .map_err(|_| CredentialError::BadSignature)?;
        if now.timestamp() > params.expires {
            return Err(CredentialError::Expired);
        }
        Ok(())
    }

    fn mac(&self, key: &str, expires: i64, publisher_id: &str) -> HmacSha256 {
        // HMAC accepts keys of any length.
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .unwrap_or_else(|_| unreachable!("hmac key length is unrestricted"));
        mac.update(
            format!("PUT\n{}\n{}\n{}\n{}", self.bucket, key, expires, publisher_id).as_bytes(),
        );
        mac
    }

    fn sign(&self, key: &str, expires: i64, publisher_id: &str) -> String {
        let tag = self.mac(key, expires, publisher_id).finalize().into_bytes();
        URL_SAFE_NO_PAD.encode(tag)
    }
}

fn ensure_segment(value: &str, name: &'static str) -> Result<(), PresignError> {
    if value.is_empty() || value == "." || value.contains('/') || value.contains("..") {
        return Err(PresignError::InvalidPathSegment(name));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn authorizer() -> UploadAuthorizer {
        UploadAuthorizer::new(
            "test-secret",
            "https://apps.example.com/",
            "uploads",
            Duration::from_secs(15 * 60),
        )
    }

    fn params_from(url: &str) -> SignedParams {
        let query = url.split_once('?').unwrap().1;
        let mut params = SignedParams::default();
        for pair in query.split('&') {
            let (name, value) = pair.split_once('=').unwrap();
            let value = urlencoding::decode(value).unwrap().into_owned();
            match name {
                "expires" => params.expires = value.parse().unwrap(),
                "publisher" => params.publisher = value,
                "signature" => params.signature = value,
                other => panic!("unexpected parameter {other}"),
            }
        }
        params
    }

    #[test]
    fn issued_key_has_upload_shape() {
        let cred = authorizer()
            .issue_upload_credential("digits", "v1", "pub-1")
            .unwrap();
        let parts: Vec<&str> = cred.key.split('/').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(&parts[..3], &["uploads", "digits", "v1"]);
        assert!(parts[3].ends_with(".zip"));
        assert!(cred.url.starts_with(&format!(
            "https://apps.example.com/objects/uploads/{}?",
            cred.key
        )));
    }

    #[test]
    fn keys_are_unique_per_credential() {
        let auth = authorizer();
        let keys: HashSet<String> = (0..100)
            .map(|_| auth.issue_upload_credential("a", "v", "p").unwrap().key)
            .collect();
        assert_eq!(keys.len(), 100);
    }

    #[test]
    fn expiry_follows_configured_lifetime() {
        let now = Utc::now();
        let short =
            UploadAuthorizer::new("s", "http://localhost:3000", "uploads", Duration::from_secs(60));
        let cred = short.issue_at("a", "v", "p", now).unwrap();
        assert_eq!(cred.expires_at - now, ChronoDuration::seconds(60));
    }

    #[test]
    fn issued_credential_verifies_until_expiry() {
        let auth = authorizer();
        let now = Utc::now();
        let cred = auth.issue_at("digits", "v1", "pub 1", now).unwrap();
        let params = params_from(&cred.url);
        assert_eq!(params.publisher, "pub 1");

        assert_eq!(auth.verify("uploads", &cred.key, &params, now), Ok(()));
        assert_eq!(
            auth.verify("uploads", &cred.key, &params, now + ChronoDuration::minutes(16)),
            Err(CredentialError::Expired)
        );
    }

    #[test]
    fn tampering_breaks_the_signature() {
        let auth = authorizer();
        let now = Utc::now();
        let cred = auth.issue_at("digits", "v1", "pub-1", now).unwrap();
        let params = params_from(&cred.url);

        let other_key = cred.key.replace("digits", "other");
        assert_eq!(
            auth.verify("uploads", &other_key, &params, now),
            Err(CredentialError::BadSignature)
        );

        let mut extended = params.clone();
        extended.expires += 3600;
        assert_eq!(
            auth.verify("uploads", &cred.key, &extended, now),
            Err(CredentialError::BadSignature)
        );

        let mut impersonated = params.clone();
        impersonated.publisher = "pub-2".into();
        assert_eq!(
            auth.verify("uploads", &cred.key, &impersonated, now),
            Err(CredentialError::BadSignature)
        );

        let other_secret =
            UploadAuthorizer::new("nope", "https://x", "uploads", Duration::from_secs(60));
        assert_eq!(
            other_secret.verify("uploads", &cred.key, &params, now),
            Err(CredentialError::BadSignature)
        );
        assert_eq!(
            auth.verify("apps", &cred.key, &params, now),
            Err(CredentialError::BadSignature)
        );
    }

    #[test]
    fn signing_requires_configuration() {
        let no_secret = UploadAuthorizer::new("", "https://x", "uploads", Duration::from_secs(60));
        assert_eq!(
            no_secret.issue_upload_credential("a", "v", "p"),
            Err(PresignError::MissingSecret)
        );
        let bad_url = UploadAuthorizer::new("s", "ftp://x", "uploads", Duration::from_secs(60));
        assert!(matches!(
            bad_url.issue_upload_credential("a", "v", "p"),
            Err(PresignError::InvalidBaseUrl(_))
        ));
    }

    #[test]
    fn path_segments_are_checked() {
        let auth = authorizer();
        for (slug, version) in [("", "v1"), ("a", ""), ("a/b", "v1"), ("a", ".."), (".", "v1")] {
            assert!(matches!(
                auth.issue_upload_credential(slug, version, "p"),
                Err(PresignError::InvalidPathSegment(_))
            ));
        }
    }
}
