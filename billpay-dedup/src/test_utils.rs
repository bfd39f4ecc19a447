use std::collections::HashMap;
use std::sync::Arc;

use billpay_common::audit::{AuditOutcome, RecordingAuditSink};
use billpay_common::crypto::MemoryCrypto;
use billpay_common::object_store::MemoryObjectStore;
use billpay_common::secrets::StaticSecretStore;
use envconfig::Envconfig;
use fernet::Fernet;

use crate::config::Config;
use crate::context::AppContext;

pub const INPUT_BUCKET: &str = "incoming";
pub const OUTPUT_BUCKET: &str = "outgoing";
pub const KEYS_BUCKET: &str = "key-pairs";
pub const PASSPHRASE: &str = "dividend passphrase";

/// A 101 character data line: invoice at `[1, 13)`, value at `[89, 101)`.
pub fn line(invoice: &str, value: &str) -> String {
    format!("D{invoice:<12}{:76}{value:>12}", "")
}

pub fn input_key(name: &str) -> String {
    format!("carpeta_entrada/{name}.pgp")
}

/// Store holding the key pair and one sealed input per `(name, lines)`.
pub fn staged(files: &[(&str, Vec<String>)]) -> MemoryObjectStore {
    let mut store = MemoryObjectStore::new()
        .with_object(KEYS_BUCKET, "keys/private.asc", "private key")
        .with_object(KEYS_BUCKET, "keys/public.asc", "public key");
    for (name, lines) in files {
        store = store.with_object(
            INPUT_BUCKET,
            &input_key(name),
            MemoryCrypto::seal(lines.join("\n").as_bytes()),
        );
    }
    store
}

pub fn config(encrypted_passphrase: &str) -> Config {
    let vars = HashMap::from([
        ("INPUT_BUCKET".to_owned(), INPUT_BUCKET.to_owned()),
        ("OUTPUT_BUCKET".to_owned(), OUTPUT_BUCKET.to_owned()),
        ("KEY_PAIRS_BUCKET".to_owned(), KEYS_BUCKET.to_owned()),
        ("PGP_PASSPHRASE".to_owned(), encrypted_passphrase.to_owned()),
    ]);
    Config::init_from_hashmap(&vars).unwrap()
}

pub struct Harness {
    pub store: Arc<MemoryObjectStore>,
    pub audit: Arc<RecordingAuditSink>,
    pub context: Arc<AppContext>,
}

pub struct HarnessBuilder {
    store: MemoryObjectStore,
    crypto: MemoryCrypto,
    outcome: AuditOutcome,
    passphrase: bool,
    cipher_secret: bool,
}

impl HarnessBuilder {
    pub fn new(store: MemoryObjectStore) -> Self {
        Self {
            store,
            crypto: MemoryCrypto::new(),
            outcome: AuditOutcome::Written,
            passphrase: true,
            cipher_secret: true,
        }
    }

    pub fn crypto(mut self, crypto: MemoryCrypto) -> Self {
        self.crypto = crypto;
        self
    }

    pub fn audit(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn without_passphrase(mut self) -> Self {
        self.passphrase = false;
        self
    }

    pub fn without_cipher_secret(mut self) -> Self {
        self.cipher_secret = false;
        self
    }

    pub fn build(self) -> Harness {
        let key = Fernet::generate_key();
        let token = Fernet::new(&key).unwrap().encrypt(PASSPHRASE.as_bytes());
        let config = config(if self.passphrase { &token } else { "" });

        let mut secrets = StaticSecretStore::new();
        if self.cipher_secret {
            secrets = secrets.with_secret(
                &config.crypto.cipher_secret_name,
                &config.crypto.cipher_secret_key,
                &key,
            );
        }

        let store = Arc::new(self.store);
        let audit = Arc::new(RecordingAuditSink::new(self.outcome));
        let context = AppContext::new(
            config,
            store.clone(),
            Arc::new(self.crypto),
            Arc::new(secrets),
            audit.clone(),
        );

        Harness {
            store,
            audit,
            context: Arc::new(context),
        }
    }
}
