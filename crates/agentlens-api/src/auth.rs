//! Bearer API-key auth (spec §6 "Auth via `Authorization: Bearer <rawKey>`,
//! keys hashed on storage, compared by hash"), plus webhook HMAC-SHA256
//! signature verification (P8).

use agentlens_store::Store;
use agentlens_types::{constant_time_eq, AgentLensError, ApiKey};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;

/// Resolves a raw `Authorization: Bearer <key>` header into the tenant-scoped
/// `ApiKey` it names, or an `AgentLensError::Auth` if it's missing, malformed,
/// unknown, or revoked.
pub async fn authenticate(store: &Arc<dyn Store>, auth_header: Option<&str>) -> Result<ApiKey, AgentLensError> {
    let raw = auth_header
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or_else(|| AgentLensError::Auth("missing or malformed Authorization header".into()))?;
    let hash = ApiKey::hash_raw_key(raw);
    let key = store
        .find_by_hash(&hash)
        .await
        .map_err(|e| AgentLensError::Storage(e.to_string()))?
        .ok_or_else(|| AgentLensError::Auth("unknown API key".into()))?;
    if !key.is_active() {
        return Err(AgentLensError::Auth("API key revoked".into()));
    }
    Ok(key)
}

/// Verifies a webhook's `X-Webhook-Signature` header: hex-encoded HMAC-SHA256
/// of the raw request body, keyed by the per-source secret (P8).
pub fn verify_webhook_signature(body: &[u8], provided_hex: &str, secret: &str) -> bool {
    let mut mac = match Hmac::<Sha256>::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(body);
    let expected = hex::encode(mac.finalize().into_bytes());

    constant_time_eq(&expected, provided_hex)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentlens_store::MemoryStore;

    fn sign(body: &[u8], secret: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn signature_round_trips() {
        let body = b"{\"event\":\"submission.created\"}";
        let sig = sign(body, "topsecret");
        assert!(verify_webhook_signature(body, &sig, "topsecret"));
    }

    #[test]
    fn flipping_any_byte_invalidates_signature() {
        let body = b"{\"event\":\"submission.created\"}";
        let mut sig_bytes = hex::decode(sign(body, "topsecret")).unwrap();
        sig_bytes[0] ^= 0x01;
        assert!(!verify_webhook_signature(body, &hex::encode(sig_bytes), "topsecret"));
    }

    #[test]
    fn wrong_secret_fails() {
        let body = b"payload";
        let sig = sign(body, "right-secret");
        assert!(!verify_webhook_signature(body, &sig, "wrong-secret"));
    }

    #[test]
    fn non_hex_signature_fails_closed() {
        assert!(!verify_webhook_signature(b"payload", "not-hex!!", "secret"));
    }

    #[tokio::test]
    async fn authenticate_rejects_missing_header() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let err = authenticate(&store, None).await.unwrap_err();
        assert!(matches!(err, AgentLensError::Auth(_)));
    }

    #[tokio::test]
    async fn authenticate_rejects_unknown_key() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let err = authenticate(&store, Some("Bearer al_nonexistent")).await.unwrap_err();
        assert!(matches!(err, AgentLensError::Auth(_)));
    }

    #[tokio::test]
    async fn authenticate_accepts_matching_hash() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let raw = "al_testkey1234567890";
        let key = ApiKey {
            id: uuid::Uuid::new_v4(),
            tenant_id: "t1".into(),
            key_hash: ApiKey::hash_raw_key(raw),
            scopes: vec!["*".into()],
            rate_limit: None,
            created_at: chrono::Utc::now(),
            revoked_at: None,
        };
        store.create(&key).await.unwrap();
        let found = authenticate(&store, Some(&format!("Bearer {raw}"))).await.unwrap();
        assert_eq!(found.tenant_id, "t1");
    }
}
