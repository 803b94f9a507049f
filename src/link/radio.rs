//! Radio abstraction.
//!
//! The link manager talks to the WiFi hardware only through [`Radio`]. Every
//! method returns promptly; a join is started with [`Radio::begin_join`] and
//! its outcome collected by polling [`Radio::poll_join`].

use super::LinkError;
use crate::credentials::Secret;

/// Outcome of a pending join, as seen on one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinPoll {
    /// Still associating or waiting for DHCP.
    Pending,
    /// Associated and addressed.
    Joined,
    /// The join failed.
    Failed(LinkError),
}

/// Non-blocking WiFi radio.
pub trait Radio {
    /// Issue a join request and return immediately.
    fn begin_join(&mut self, ssid: &Secret, passphrase: &Secret) -> Result<(), LinkError>;

    /// Check on the join started by `begin_join`.
    fn poll_join(&mut self) -> JoinPoll;

    /// Give up on a pending join.
    fn abort_join(&mut self);

    /// True while associated with the network.
    fn is_associated(&self) -> bool;

    /// Leave the network.
    fn disconnect(&mut self);
}

// Espressif `wifi_err_reason_t` codes.
const REASON_AUTH_EXPIRE: u16 = 2;
const REASON_4WAY_HANDSHAKE_TIMEOUT: u16 = 15;
const REASON_BEACON_TIMEOUT: u16 = 200;
const REASON_NO_AP_FOUND: u16 = 201;
const REASON_AUTH_FAIL: u16 = 202;
const REASON_HANDSHAKE_TIMEOUT: u16 = 204;
const REASON_NO_AP_FOUND_COMPAT_SECURITY: u16 = 210;
const REASON_NO_AP_FOUND_AUTHMODE_THRESHOLD: u16 = 211;
const REASON_NO_AP_FOUND_RSSI_THRESHOLD: u16 = 212;

/// Map an ESP-IDF station disconnect reason code to a [`LinkError`].
///
/// Handshake timeouts are what a wrong passphrase looks like on WPA2, so they
/// count as authentication rejections.
pub fn classify_disconnect_reason(code: u16) -> LinkError {
    match code {
        REASON_AUTH_FAIL | REASON_4WAY_HANDSHAKE_TIMEOUT | REASON_HANDSHAKE_TIMEOUT => {
            LinkError::AuthRejected
        }
        REASON_NO_AP_FOUND
        | REASON_NO_AP_FOUND_COMPAT_SECURITY
        | REASON_NO_AP_FOUND_AUTHMODE_THRESHOLD
        | REASON_NO_AP_FOUND_RSSI_THRESHOLD => LinkError::NotFound,
        REASON_BEACON_TIMEOUT | REASON_AUTH_EXPIRE => LinkError::Timeout,
        other => LinkError::RadioError(format!("disconnect reason {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_reasons() {
        assert_eq!(classify_disconnect_reason(202), LinkError::AuthRejected);
        assert_eq!(classify_disconnect_reason(15), LinkError::AuthRejected);
        assert_eq!(classify_disconnect_reason(204), LinkError::AuthRejected);
    }

    #[test]
    fn test_not_found_reasons() {
        for code in [201, 210, 211, 212] {
            assert_eq!(classify_disconnect_reason(code), LinkError::NotFound);
        }
    }

    #[test]
    fn test_timeout_reasons() {
        assert_eq!(classify_disconnect_reason(200), LinkError::Timeout);
        assert_eq!(classify_disconnect_reason(2), LinkError::Timeout);
    }

    #[test]
    fn test_unknown_reason() {
        assert_eq!(
            classify_disconnect_reason(205),
            LinkError::RadioError("disconnect reason 205".to_string())
        );
    }
}
