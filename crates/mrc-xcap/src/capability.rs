//! Capability construction, signing and verification
//!
//! The signature is an HMAC-SHA256 over every other field. Each field is
//! fed to the MAC with a length prefix, so no two distinct capabilities
//! share a canonical encoding.

use crate::error::XCapError;
use chrono::Utc;
use hmac::{Hmac, Mac};
use mrc_common::{SnapConfig, XLocSet, access_mode};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Current wall-clock time in milliseconds since the epoch
#[must_use]
pub fn now_millis() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

/// Everything needed to issue a capability
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityParams {
    pub file_id: String,
    pub access_mode: u32,
    /// Validity window in seconds
    pub validity_s: u64,
    pub client_identity: String,
    pub epoch: u64,
    pub replicate_on_close: bool,
    pub snap_config: SnapConfig,
    pub snap_timestamp: u64,
    pub voucher_size: u64,
}

/// A signed file capability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub file_id: String,
    pub access_mode: u32,
    pub expire_timeout_s: u64,
    /// Absolute expiry in seconds, kept for tokens issued without millisecond precision
    pub expire_time_s: u64,
    pub expire_time_ms: u64,
    pub client_identity: String,
    pub epoch: u64,
    pub replicate_on_close: bool,
    pub snap_config: SnapConfig,
    pub snap_timestamp: u64,
    pub voucher_size: u64,
    pub renewals: u32,
    /// Hex-encoded HMAC-SHA256
    pub signature: String,
}

impl Capability {
    /// Issue a capability valid from `now_ms` for `params.validity_s` seconds.
    #[must_use]
    pub fn issue(params: CapabilityParams, now_ms: u64, secret: &str) -> Self {
        let expire_time_ms = now_ms.saturating_add(params.validity_s.saturating_mul(1000));
        let mut cap = Self {
            file_id: params.file_id,
            access_mode: params.access_mode,
            expire_timeout_s: params.validity_s,
            expire_time_s: expire_time_ms / 1000,
            expire_time_ms,
            client_identity: params.client_identity,
            epoch: params.epoch,
            replicate_on_close: params.replicate_on_close,
            snap_config: params.snap_config,
            snap_timestamp: params.snap_timestamp,
            voucher_size: params.voucher_size,
            renewals: 0,
            signature: String::new(),
        };
        cap.signature = hex::encode(cap.mac(secret).finalize().into_bytes());
        cap
    }

    /// Check the signature against `secret`
    pub fn verify_signature(&self, secret: &str) -> Result<(), XCapError> {
        let expected = hex::decode(&self.signature).map_err(|_| XCapError::MalformedSignature)?;
        self.mac(secret)
            .verify_slice(&expected)
            .map_err(|_| XCapError::SignatureMismatch)
    }

    /// Expiry in milliseconds, falling back to the second-precision field
    #[must_use]
    pub const fn expires_at_ms(&self) -> u64 {
        if self.expire_time_ms == 0 {
            self.expire_time_s.saturating_mul(1000)
        } else {
            self.expire_time_ms
        }
    }

    /// A capability is expired from its expiry instant onwards.
    #[must_use]
    pub const fn has_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms()
    }

    /// Check whether the capability allows modifying file content
    #[must_use]
    pub const fn grants_write(&self) -> bool {
        access_mode::is_write(self.access_mode)
    }

    /// Verify signature and expiry
    pub fn validate(&self, secret: &str, now_ms: u64) -> Result<(), XCapError> {
        self.verify_signature(secret)?;
        if self.has_expired(now_ms) {
            return Err(XCapError::Expired {
                expired_at_ms: self.expires_at_ms(),
            });
        }
        Ok(())
    }

    /// Reissue a valid capability with a fresh expiry.
    ///
    /// Only unexpired, correctly signed capabilities are renewed, and at most
    /// `max_renewals` times.
    pub fn renew(
        &self,
        secret: &str,
        validity_s: u64,
        max_renewals: u32,
        now_ms: u64,
    ) -> Result<Self, XCapError> {
        self.validate(secret, now_ms)?;
        if self.renewals >= max_renewals {
            return Err(XCapError::RenewalLimit {
                limit: max_renewals,
            });
        }
        let mut renewed = Self::issue(
            CapabilityParams {
                file_id: self.file_id.clone(),
                access_mode: self.access_mode,
                validity_s,
                client_identity: self.client_identity.clone(),
                epoch: self.epoch,
                replicate_on_close: self.replicate_on_close,
                snap_config: self.snap_config,
                snap_timestamp: self.snap_timestamp,
                voucher_size: self.voucher_size,
            },
            now_ms,
            secret,
        );
        renewed.renewals = self.renewals + 1;
        renewed.signature = hex::encode(renewed.mac(secret).finalize().into_bytes());
        Ok(renewed)
    }

    fn mac(&self, secret: &str) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
        let mut field = |bytes: &[u8]| {
            mac.update(&(bytes.len() as u64).to_be_bytes());
            mac.update(bytes);
        };
        field(self.file_id.as_bytes());
        field(&self.access_mode.to_be_bytes());
        field(&self.expire_timeout_s.to_be_bytes());
        field(&self.expire_time_s.to_be_bytes());
        field(&self.expire_time_ms.to_be_bytes());
        field(self.client_identity.as_bytes());
        field(&self.epoch.to_be_bytes());
        field(&[u8::from(self.replicate_on_close)]);
        field(&[self.snap_config.code()]);
        field(&self.snap_timestamp.to_be_bytes());
        field(&self.voucher_size.to_be_bytes());
        field(&self.renewals.to_be_bytes());
        mac
    }
}

/// A capability together with the replica list it was issued against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCredentials {
    pub xcap: Capability,
    pub xlocs: XLocSet,
}
