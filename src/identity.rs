//! Content-addressed identities and trust-on-first-use accounts.
//!
//! Every identifier in the pipeline is a SHA-256 digest over
//! length-prefixed fields, so the same inputs always produce the same id
//! and no two field layouts can collide.

use anyhow::Result;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::models::Account;
use crate::store::Store;

const PSEUDONYM_WORDS: &[&str] = &[
    "apple", "avocado", "bagel", "basil", "biscuit", "brioche", "burrito", "cashew", "cheddar",
    "chutney", "cinnamon", "coconut", "couscous", "crepe", "cumin", "dumpling", "falafel", "fennel",
    "focaccia", "ginger", "granola", "hummus", "kale", "kimchi", "lentil", "mango", "miso",
    "noodle", "nutmeg", "olive", "paprika", "pesto", "pistachio", "quince", "radish", "saffron",
    "tahini", "tamarind", "tofu", "waffle",
];

fn digest(fields: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for field in fields {
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field);
    }
    hex::encode(hasher.finalize())
}

/// Id of a single evidence packet.
pub fn evidence_id(public_key: &str, size: usize, random_uuid: &str, packet: usize) -> String {
    digest(&[
        b"evidence",
        public_key.as_bytes(),
        &(size as u64).to_le_bytes(),
        random_uuid.as_bytes(),
        &(packet as u64).to_le_bytes(),
    ])
}

/// Id shared by every packet of one capture session.
pub fn metadata_id(public_key: &str, random_uuid: &str) -> String {
    digest(&[b"metadata", public_key.as_bytes(), random_uuid.as_bytes()])
}

/// Three-word name derived from a public key, e.g. `"miso-waffle-kale"`.
pub fn pseudonym(public_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"pseudonym");
    hasher.update(public_key.as_bytes());
    let hash = hasher.finalize();

    hash.chunks(2)
        .take(3)
        .map(|pair| {
            let n = u16::from_le_bytes([pair[0], pair[1]]) as usize;
            PSEUDONYM_WORDS[n % PSEUDONYM_WORDS.len()]
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Returns the account for `public_key`, creating it on first contact.
pub async fn resolve_owner(store: &dyn Store, public_key: &str) -> Result<Account> {
    if let Some(account) = store.find_account(public_key).await? {
        return Ok(account);
    }

    let account = Account {
        public_key: public_key.to_string(),
        creation_time: Utc::now(),
        pseudonym: pseudonym(public_key),
        tag: None,
    };
    let stored = store.insert_account(&account).await?;
    info!(pseudonym = %stored.pseudonym, "new public key registered");
    Ok(stored)
}
