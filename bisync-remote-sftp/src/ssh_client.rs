use russh::client::{DisconnectReason, Handler};
use russh::keys::PublicKeyBase64;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub(crate) struct Client {
    pub allowed_fingerprints: Option<Vec<String>>, // OpenSSH SHA256 base64 or raw base64 keys
    pub disconnected: Arc<AtomicBool>,
}

impl Client {
    /// True when `fingerprints` admits a key with this SHA256 fingerprint or base64 encoding.
    pub(crate) fn key_allowed(fingerprints: &[String], fp_sha256: &str, key_b64: &str) -> bool {
        fingerprints.iter().any(|s| s == fp_sha256 || s == key_b64)
    }
}

impl Handler for Client {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        let fp_sha256 = server_public_key.fingerprint(russh::keys::HashAlg::Sha256).to_string();
        match &self.allowed_fingerprints {
            Some(allowed) => {
                let ok = Self::key_allowed(allowed, &fp_sha256, &server_public_key.public_key_base64());
                if !ok {
                    warn!("server key {fp_sha256} is not in the pinned fingerprints");
                }
                Ok(ok)
            }
            None => {
                info!("server key {fp_sha256} accepted (no fingerprints pinned)");
                Ok(true)
            }
        }
    }

    async fn disconnected(&mut self, reason: DisconnectReason<Self::Error>) -> Result<(), Self::Error> {
        self.disconnected.store(true, Ordering::SeqCst);
        match reason {
            DisconnectReason::ReceivedDisconnect(info) => {
                debug!("server closed the connection: {info:?}");
                Ok(())
            }
            DisconnectReason::Error(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pinned_keys_match_either_form() {
        let pins = vec!["SHA256:abc".to_string(), "AAAAC3Nza".to_string()];
        assert!(Client::key_allowed(&pins, "SHA256:abc", "other"));
        assert!(Client::key_allowed(&pins, "SHA256:zzz", "AAAAC3Nza"));
        assert!(!Client::key_allowed(&pins, "SHA256:zzz", "other"));
        assert!(!Client::key_allowed(&[], "SHA256:abc", "AAAAC3Nza"));
    }
}
