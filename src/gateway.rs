//! Ingestion gateway: signed batch intake.
//!
//! A batch is accepted only as a whole. The flow is
//!
//! ```text
//! headers ─▶ signature ─▶ body ─▶ account (TOFU) ─▶ mirror ─▶ evidence rows ─▶ store
//! ```
//!
//! and every failure along it becomes a `{ "status": "error" }` response
//! instead of an `Err`, so callers always get a well-formed reply.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::IngestError;
use crate::identity::{evidence_id, metadata_id, resolve_owner};
use crate::models::{Account, Evidence, IncomingPacket, WriteResult};
use crate::signature::{Ed25519Verifier, SignatureVerifier};
use crate::store::Store;

pub const HEADER_LENGTH: &str = "content-length";
pub const HEADER_BUILD: &str = "x-capture-build";
pub const HEADER_VERSION: &str = "x-capture-version";
pub const HEADER_COOKIE_ID: &str = "x-capture-nonauthcookieid";
pub const HEADER_PUBLIC_KEY: &str = "x-capture-publickey";
pub const HEADER_SIGNATURE: &str = "x-capture-signature";

/// Every header a batch must carry, in reporting order.
pub const REQUIRED_HEADERS: &[&str] = &[
    HEADER_LENGTH,
    HEADER_BUILD,
    HEADER_VERSION,
    HEADER_COOKIE_ID,
    HEADER_PUBLIC_KEY,
    HEADER_SIGNATURE,
];

/// Validated header fields of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchHeaders {
    pub length: String,
    pub build: String,
    pub version: String,
    /// Caller-supplied, not authenticated.
    pub cookie_id: String,
    pub public_key: String,
    pub signature: String,
}

impl BatchHeaders {
    /// Extracts the required fields from lower-cased header names.
    ///
    /// Fails with every missing header listed, not just the first one.
    pub fn from_map(headers: &BTreeMap<String, String>) -> Result<Self, IngestError> {
        let missing: Vec<String> = REQUIRED_HEADERS
            .iter()
            .filter(|name| !headers.contains_key(**name))
            .map(|name| name.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(IngestError::HeaderValidation { missing });
        }

        let get = |name: &str| headers.get(name).cloned().unwrap_or_default();
        Ok(Self {
            length: get(HEADER_LENGTH),
            build: get(HEADER_BUILD),
            version: get(HEADER_VERSION),
            cookie_id: get(HEADER_COOKIE_ID),
            public_key: get(HEADER_PUBLIC_KEY),
            signature: get(HEADER_SIGNATURE),
        })
    }
}

/// A batch exactly as received, kept for operator mirroring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirroredRequest {
    pub headers: BTreeMap<String, String>,
    /// Raw body; replaying it byte-for-byte keeps the signature valid.
    pub body: String,
}

/// Bounded ring of the most recent batches, drained destructively.
pub struct MirrorBuffer {
    entries: Mutex<VecDeque<MirroredRequest>>,
    capacity: usize,
}

impl MirrorBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, request: MirroredRequest) {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(request);
    }

    /// Returns every buffered batch and leaves the buffer empty.
    pub fn drain(&self) -> Vec<MirroredRequest> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// JSON reply returned to the capturing client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestResponse {
    /// `"OK"` or `"error"`.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<Account>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<WriteResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<serde_json::Value>,
}

impl IngestResponse {
    fn ok(account: Account, results: WriteResult) -> Self {
        Self {
            status: "OK".to_string(),
            account: Some(account),
            results: Some(results),
            info: None,
        }
    }

    fn error(err: &IngestError) -> Self {
        Self {
            status: "error".to_string(),
            account: None,
            results: None,
            info: Some(err.info()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "OK"
    }
}

/// Gateway state: the store, the signature collaborator and the mirror ring.
pub struct Gateway {
    store: Arc<dyn Store>,
    verifier: Arc<dyn SignatureVerifier>,
    mirror: MirrorBuffer,
}

impl Gateway {
    pub fn new(store: Arc<dyn Store>, mirror_capacity: usize) -> Self {
        Self::with_verifier(store, Arc::new(Ed25519Verifier), mirror_capacity)
    }

    pub fn with_verifier(
        store: Arc<dyn Store>,
        verifier: Arc<dyn SignatureVerifier>,
        mirror_capacity: usize,
    ) -> Self {
        Self {
            store,
            verifier,
            mirror: MirrorBuffer::new(mirror_capacity),
        }
    }

    /// Authenticates and persists one batch.
    ///
    /// `headers` must use lower-case names. `body` is the raw request body
    /// the signature was computed over.
    pub async fn ingest_batch(
        &self,
        headers: &BTreeMap<String, String>,
        body: &[u8],
    ) -> IngestResponse {
        match self.try_ingest(headers, body).await {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "batch rejected");
                IngestResponse::error(&err)
            }
        }
    }

    async fn try_ingest(
        &self,
        headers: &BTreeMap<String, String>,
        body: &[u8],
    ) -> Result<IngestResponse, IngestError> {
        let batch_headers = BatchHeaders::from_map(headers)?;

        if !self
            .verifier
            .verify(body, &batch_headers.signature, &batch_headers.public_key)
        {
            debug!(signature = %batch_headers.signature, "signature verification failed");
            return Err(IngestError::Signature);
        }

        let packets: Vec<IncomingPacket> =
            serde_json::from_slice(body).map_err(|e| IngestError::MalformedBody(e.to_string()))?;

        let account = resolve_owner(self.store.as_ref(), &batch_headers.public_key)
            .await
            .map_err(|e| IngestError::Storage(e.to_string()))?;

        self.mirror.push(MirroredRequest {
            headers: headers.clone(),
            body: String::from_utf8_lossy(body).into_owned(),
        });

        let evidence = build_evidence(&account, &packets, Utc::now());
        let results = self
            .store
            .write_evidence(&evidence)
            .await
            .map_err(|e| IngestError::Storage(e.to_string()))?;

        info!(
            pseudonym = %account.pseudonym,
            version = %batch_headers.version,
            packets = ?evidence.iter().map(|e| (e.packet, e.size, e.href.as_str())).collect::<Vec<_>>(),
            written = results.written,
            duplicates = results.duplicates,
            "batch accepted"
        );

        Ok(IngestResponse::ok(account, results))
    }

    /// Returns and clears the buffered batches.
    pub fn drain_mirror(&self) -> Vec<MirroredRequest> {
        self.mirror.drain()
    }
}

/// Turns a decoded batch into evidence rows.
///
/// Packets are stamped one microsecond apart from `received_at` so that
/// receipt order matches packet order and no two rows of a batch tie on the
/// scheduler cursor.
pub fn build_evidence(
    account: &Account,
    packets: &[IncomingPacket],
    received_at: DateTime<Utc>,
) -> Vec<Evidence> {
    packets
        .iter()
        .enumerate()
        .map(|(i, packet)| {
            let size = packet.element.len();
            Evidence {
                id: evidence_id(&account.public_key, size, &packet.random_uuid, i),
                metadata_id: metadata_id(&account.public_key, &packet.random_uuid),
                href: packet.href.clone(),
                public_key: account.public_key.clone(),
                client_time: packet.client_time,
                saving_time: received_at + Duration::microseconds(i as i64),
                html: packet.element.clone(),
                size,
                selector: packet.selector.clone(),
                incremental: packet.incremental,
                packet: i,
                is_product: packet.href.contains("/dp/"),
                tag: account.tag.clone(),
                processed: None,
                url_shape: None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use ed25519_dalek::{Signer, SigningKey};
    use serde_json::json;

    struct Client {
        key: SigningKey,
        public: String,
    }

    impl Client {
        fn new(seed: u8) -> Self {
            let key = SigningKey::from_bytes(&[seed; 32]);
            let public = bs58::encode(key.verifying_key().to_bytes()).into_string();
            Self { key, public }
        }

        fn headers(&self, body: &[u8]) -> BTreeMap<String, String> {
            let sig = bs58::encode(self.key.sign(body).to_bytes()).into_string();
            BTreeMap::from([
                (HEADER_LENGTH.to_string(), body.len().to_string()),
                (HEADER_BUILD.to_string(), "build-1".to_string()),
                (HEADER_VERSION.to_string(), "1.2.0".to_string()),
                (HEADER_COOKIE_ID.to_string(), "cookie".to_string()),
                (HEADER_PUBLIC_KEY.to_string(), self.public.clone()),
                (HEADER_SIGNATURE.to_string(), sig),
            ])
        }
    }

    fn body() -> Vec<u8> {
        serde_json::to_vec(&json!([
            {
                "element": "a".repeat(100),
                "href": "https://www.amazon.com/Kettle/dp/B000111",
                "selector": "#dp",
                "clientTime": "2024-03-01T10:00:00Z",
                "randomUUID": "session-1",
                "incremental": 0
            },
            {
                "element": "b".repeat(200),
                "href": "https://www.amazon.com/Kettle/dp/B000111",
                "selector": "#dp",
                "clientTime": "2024-03-01T10:00:01Z",
                "randomUUID": "session-1",
                "incremental": 1
            }
        ]))
        .unwrap()
    }

    fn gateway() -> (Arc<InMemoryStore>, Gateway) {
        let store = Arc::new(InMemoryStore::new());
        let gateway = Gateway::new(store.clone(), 10);
        (store, gateway)
    }

    #[tokio::test]
    async fn accepts_signed_batch_and_groups_packets() {
        let (store, gateway) = gateway();
        let client = Client::new(1);
        let body = body();

        let response = gateway.ingest_batch(&client.headers(&body), &body).await;
        assert!(response.is_ok(), "{:?}", response);
        assert_eq!(response.results.unwrap().written, 2);
        assert_eq!(response.account.unwrap().public_key, client.public);

        let rows = store.evidence().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].metadata_id, rows[1].metadata_id);
        assert_ne!(rows[0].id, rows[1].id);
        assert_eq!(rows[0].size, 100);
        assert_eq!(rows[1].size, 200);
        assert!(rows[0].is_product);
        assert!(rows[0].saving_time < rows[1].saving_time);
        assert!(rows.iter().all(|r| r.processed.is_none()));
    }

    #[tokio::test]
    async fn reingesting_the_same_batch_keeps_ids() {
        let (store, gateway) = gateway();
        let client = Client::new(2);
        let body = body();

        gateway.ingest_batch(&client.headers(&body), &body).await;
        let first: Vec<String> = store.evidence().unwrap().iter().map(|e| e.id.clone()).collect();

        let again = gateway.ingest_batch(&client.headers(&body), &body).await;
        assert!(again.is_ok());
        assert_eq!(again.results.unwrap().duplicates, 2);

        let second: Vec<String> = store.evidence().unwrap().iter().map(|e| e.id.clone()).collect();
        assert_eq!(first, second);
        assert_eq!(store.stats().await.unwrap().accounts, 1);
    }

    #[tokio::test]
    async fn altered_body_is_rejected_without_writes() {
        let (store, gateway) = gateway();
        let client = Client::new(3);
        let body = body();
        let headers = client.headers(&body);

        let mut tampered = body.clone();
        let last = tampered.len() - 2;
        tampered[last] = b' ';

        let response = gateway.ingest_batch(&headers, &tampered).await;
        assert_eq!(response.status, "error");
        assert_eq!(
            response.info,
            Some(json!("Signature does not match request body"))
        );
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.evidence, 0);
        assert_eq!(stats.accounts, 0);
        assert!(gateway.drain_mirror().is_empty());
    }

    #[tokio::test]
    async fn missing_headers_are_all_reported() {
        let (store, gateway) = gateway();
        let client = Client::new(4);
        let body = body();
        let mut headers = client.headers(&body);
        headers.remove(HEADER_BUILD);
        headers.remove(HEADER_SIGNATURE);

        let response = gateway.ingest_batch(&headers, &body).await;
        assert_eq!(response.status, "error");
        let missing = response.info.unwrap()["missing"].clone();
        assert_eq!(missing, json!([HEADER_BUILD, HEADER_SIGNATURE]));
        assert_eq!(store.stats().await.unwrap().evidence, 0);
    }

    #[tokio::test]
    async fn signed_but_malformed_body_is_an_error_response() {
        let (_store, gateway) = gateway();
        let client = Client::new(5);
        let body = b"{not json".to_vec();
        let response = gateway.ingest_batch(&client.headers(&body), &body).await;
        assert_eq!(response.status, "error");
    }

    #[tokio::test]
    async fn mirror_keeps_last_batches_and_clears_on_drain() {
        let (_store, gateway) = gateway();
        let client = Client::new(6);
        let body = body();
        for _ in 0..12 {
            gateway.ingest_batch(&client.headers(&body), &body).await;
        }
        let drained = gateway.drain_mirror();
        assert_eq!(drained.len(), 10);
        assert_eq!(drained[0].body.as_bytes(), body.as_slice());
        assert!(gateway.drain_mirror().is_empty());
    }

    #[test]
    fn account_tag_is_copied_to_evidence() {
        let account = Account {
            public_key: "K".to_string(),
            creation_time: Utc::now(),
            pseudonym: "miso-kale-tofu".to_string(),
            tag: Some("classroom".to_string()),
        };
        let packet: IncomingPacket = serde_json::from_value(json!({
            "element": "<div/>",
            "href": "https://www.amazon.com/s?k=kettle",
            "selector": "#search",
            "clientTime": "2024-03-01T10:00:00Z",
            "randomUUID": "u"
        }))
        .unwrap();
        let rows = build_evidence(&account, &[packet], Utc::now());
        assert_eq!(rows[0].tag.as_deref(), Some("classroom"));
        assert!(!rows[0].is_product);
    }

    /// Accounts work; evidence writes fail.
    struct BrokenEvidenceStore {
        accounts: InMemoryStore,
    }

    #[async_trait::async_trait]
    impl Store for BrokenEvidenceStore {
        async fn find_account(&self, public_key: &str) -> anyhow::Result<Option<Account>> {
            self.accounts.find_account(public_key).await
        }
        async fn insert_account(&self, account: &Account) -> anyhow::Result<Account> {
            self.accounts.insert_account(account).await
        }
        async fn write_evidence(&self, _: &[Evidence]) -> anyhow::Result<WriteResult> {
            anyhow::bail!("database is locked")
        }
        async fn read_evidence(
            &self,
            filter: &crate::store::EvidenceFilter,
            limit: usize,
        ) -> anyhow::Result<crate::store::EvidencePage> {
            self.accounts.read_evidence(filter, limit).await
        }
        async fn update_evidence(&self, evidence: &Evidence) -> anyhow::Result<()> {
            self.accounts.update_evidence(evidence).await
        }
        async fn upsert_metadata(&self, metadata: &crate::models::Metadata) -> anyhow::Result<()> {
            self.accounts.upsert_metadata(metadata).await
        }
        async fn get_metadata(&self, id: &str) -> anyhow::Result<Option<crate::models::Metadata>> {
            self.accounts.get_metadata(id).await
        }
        async fn metadata_by_owner(
            &self,
            public_key: &str,
            amount: usize,
            skip: usize,
        ) -> anyhow::Result<Vec<crate::models::Metadata>> {
            self.accounts.metadata_by_owner(public_key, amount, skip).await
        }
        async fn stats(&self) -> anyhow::Result<crate::store::StoreStats> {
            self.accounts.stats().await
        }
    }

    #[tokio::test]
    async fn storage_failure_becomes_an_error_response() {
        let store = Arc::new(BrokenEvidenceStore {
            accounts: InMemoryStore::new(),
        });
        let gateway = Gateway::new(store, 10);
        let client = Client::new(9);
        let body = body();

        let response = gateway.ingest_batch(&client.headers(&body), &body).await;
        assert!(!response.is_ok());
        assert!(response.results.is_none());
        let info = response.info.unwrap();
        assert!(info.as_str().unwrap().contains("database is locked"));
    }
}
