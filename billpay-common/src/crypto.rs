use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::{Bytes, BytesMut};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("cipher key is not a valid fernet key")]
    InvalidKey,
    #[error("failed to decrypt value: {0}")]
    Decrypt(String),
    #[error("crypto service request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("crypto service returned {status}: {body}")]
    Service { status: u16, body: String },
    #[error("malformed crypto payload: {0}")]
    Payload(String),
    #[error("secret {name} could not be read: {reason}")]
    Secret { name: String, reason: String },
}

/// PGP and symmetric primitives. The PGP operations work on whole buffers; `length` on
/// encryption is the declared plaintext length that ends up in the literal data packet.
#[async_trait]
pub trait CryptoGateway: Send + Sync {
    /// Decrypt a symmetric ciphertext (used for the configured PGP passphrase).
    fn decrypt(&self, ciphertext: &str, key: &str) -> Result<String, CryptoError>;

    /// `Ok(None)` means the service produced no plaintext for the message.
    async fn pgp_decrypt(
        &self,
        ciphertext: Bytes,
        passphrase: &str,
        private_key: Bytes,
    ) -> Result<Option<Bytes>, CryptoError>;

    async fn pgp_encrypt(
        &self,
        plaintext: Bytes,
        length: usize,
        public_key: Bytes,
    ) -> Result<Bytes, CryptoError>;
}

/// Fernet decryption of a base64 url-safe token with a base64 url-safe 32 byte key.
pub fn fernet_decrypt(ciphertext: &str, key: &str) -> Result<String, CryptoError> {
    let fernet = fernet::Fernet::new(key).ok_or(CryptoError::InvalidKey)?;
    let plaintext = fernet
        .decrypt(ciphertext)
        .map_err(|e| CryptoError::Decrypt(e.to_string()))?;
    String::from_utf8(plaintext).map_err(|e| CryptoError::Decrypt(e.to_string()))
}

#[derive(Serialize)]
struct PgpDecryptRequest<'a> {
    ciphertext: String,
    passphrase: &'a str,
    private_key: String,
}

#[derive(Deserialize)]
struct PgpDecryptResponse {
    plaintext: Option<String>,
}

#[derive(Serialize)]
struct PgpEncryptRequest {
    plaintext: String,
    length: usize,
    public_key: String,
}

#[derive(Deserialize)]
struct PgpEncryptResponse {
    ciphertext: String,
}

/// Client for the PGP service sidecar. Buffers travel base64 encoded in JSON bodies;
/// the passphrase is decrypted locally with fernet.
pub struct RemoteCryptoGateway {
    client: reqwest::Client,
    base_url: Url,
}

impl RemoteCryptoGateway {
    pub fn new(client: reqwest::Client, base_url: &str) -> Result<Self, CryptoError> {
        // Url::join drops the last path segment unless the base ends with a slash.
        let base = if base_url.ends_with('/') {
            base_url.to_owned()
        } else {
            format!("{base_url}/")
        };
        let base_url = Url::parse(&base).map_err(|e| CryptoError::Payload(e.to_string()))?;
        Ok(Self { client, base_url })
    }

    pub fn from_url(base_url: &str) -> Result<Self, CryptoError> {
        Self::new(reqwest::Client::new(), base_url)
    }

    async fn post<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, CryptoError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| CryptoError::Payload(e.to_string()))?;
        debug!(%url, "calling crypto service");

        let response = self.client.post(url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CryptoError::Service {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<Resp>().await?)
    }
}

fn decode(field: &str, value: &str) -> Result<Bytes, CryptoError> {
    STANDARD
        .decode(value)
        .map(Bytes::from)
        .map_err(|e| CryptoError::Payload(format!("{field} is not valid base64: {e}")))
}

#[async_trait]
impl CryptoGateway for RemoteCryptoGateway {
    fn decrypt(&self, ciphertext: &str, key: &str) -> Result<String, CryptoError> {
        fernet_decrypt(ciphertext, key)
    }

    async fn pgp_decrypt(
        &self,
        ciphertext: Bytes,
        passphrase: &str,
        private_key: Bytes,
    ) -> Result<Option<Bytes>, CryptoError> {
        let request = PgpDecryptRequest {
            ciphertext: STANDARD.encode(&ciphertext),
            passphrase,
            private_key: STANDARD.encode(&private_key),
        };
        let response: PgpDecryptResponse = self.post("v1/pgp/decrypt", &request).await?;
        response
            .plaintext
            .map(|plaintext| decode("plaintext", &plaintext))
            .transpose()
    }

    async fn pgp_encrypt(
        &self,
        plaintext: Bytes,
        length: usize,
        public_key: Bytes,
    ) -> Result<Bytes, CryptoError> {
        let request = PgpEncryptRequest {
            plaintext: STANDARD.encode(&plaintext),
            length,
            public_key: STANDARD.encode(&public_key),
        };
        let response: PgpEncryptResponse = self.post("v1/pgp/encrypt", &request).await?;
        decode("ciphertext", &response.ciphertext)
    }
}

const MEMORY_ARMOR: &[u8] = b"-----BEGIN TEST MESSAGE-----\n";

/// Reversible stand-in for the PGP service: "encryption" prepends a fixed armor line,
/// "decryption" strips it. Passphrase decryption is the real fernet primitive.
#[derive(Default)]
pub struct MemoryCrypto {
    no_plaintext: bool,
    fail_encrypt: bool,
}

impl MemoryCrypto {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `pgp_decrypt` succeed without producing plaintext.
    pub fn without_plaintext(mut self) -> Self {
        self.no_plaintext = true;
        self
    }

    pub fn failing_encrypt(mut self) -> Self {
        self.fail_encrypt = true;
        self
    }

    /// Wrap `plaintext` the way `pgp_encrypt` does.
    pub fn seal(plaintext: &[u8]) -> Bytes {
        let mut sealed = BytesMut::with_capacity(MEMORY_ARMOR.len() + plaintext.len());
        sealed.extend_from_slice(MEMORY_ARMOR);
        sealed.extend_from_slice(plaintext);
        sealed.freeze()
    }

    /// Strip the armor added by `seal`.
    pub fn open(ciphertext: &[u8]) -> Option<Bytes> {
        ciphertext
            .strip_prefix(MEMORY_ARMOR)
            .map(Bytes::copy_from_slice)
    }
}

#[async_trait]
impl CryptoGateway for MemoryCrypto {
    fn decrypt(&self, ciphertext: &str, key: &str) -> Result<String, CryptoError> {
        fernet_decrypt(ciphertext, key)
    }

    async fn pgp_decrypt(
        &self,
        ciphertext: Bytes,
        passphrase: &str,
        private_key: Bytes,
    ) -> Result<Option<Bytes>, CryptoError> {
        if passphrase.is_empty() || private_key.is_empty() {
            return Err(CryptoError::Decrypt("missing key material".to_owned()));
        }
        if self.no_plaintext {
            return Ok(None);
        }
        MemoryCrypto::open(&ciphertext)
            .map(Some)
            .ok_or_else(|| CryptoError::Payload("message is not armored".to_owned()))
    }

    async fn pgp_encrypt(
        &self,
        plaintext: Bytes,
        length: usize,
        public_key: Bytes,
    ) -> Result<Bytes, CryptoError> {
        if self.fail_encrypt {
            return Err(CryptoError::Service {
                status: 500,
                body: "injected encrypt failure".to_owned(),
            });
        }
        if public_key.is_empty() {
            return Err(CryptoError::Payload("empty public key".to_owned()));
        }
        if length != plaintext.len() {
            return Err(CryptoError::Payload(format!(
                "declared length {length} does not match {} plaintext bytes",
                plaintext.len()
            )));
        }
        Ok(MemoryCrypto::seal(&plaintext))
    }
}
