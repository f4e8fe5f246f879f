use rusqlite::{params, OptionalExtension};
use rand::rngs::OsRng;
use uuid::Uuid;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::identity::error::IdentityResult;
use crate::identity::keys::{
    decode_public_key_der, decode_secret_key_der, encode_public_key_der, encode_secret_key_der,
};
use crate::persistence::PersistenceWorker;

/// Generates and persists the stable device identity: a UUIDv4 device id, an
/// X25519 key pair for the per-peer key agreement, and the human-readable
/// device name. Every accessor is get-or-generate; repeated calls return the
/// stored values.
#[derive(Clone)]
pub struct IdentityStore {
    worker: PersistenceWorker,
}

impl IdentityStore {
    pub fn new(worker: PersistenceWorker) -> Self {
        Self { worker }
    }

    pub async fn device_id(&self) -> IdentityResult<String> {
        let id = self
            .worker
            .submit(|conn| {
                conn.execute("CREATE TABLE IF NOT EXISTS device_id(uuid TEXT PRIMARY KEY)", [])?;

                let existing = conn
                    .query_row("SELECT uuid FROM device_id", [], |row| row.get::<_, String>(0))
                    .optional()?;
                if let Some(id) = existing {
                    return Ok(id);
                }

                let id = Uuid::new_v4().to_string();
                conn.execute("INSERT INTO device_id(uuid) VALUES (?1)", [&id])?;
                Ok(id)
            })
            .await?;
        Ok(id)
    }

    /// Returns the long-term key pair, generating and persisting one on the
    /// first call. The private key is stored as PKCS#8 DER and the public key
    /// as a `SubjectPublicKeyInfo` document.
    pub async fn keypair(&self) -> IdentityResult<(StaticSecret, PublicKey)> {
        let (private_der, public_der) = self
            .worker
            .submit(|conn| {
                conn.execute(
                    "CREATE TABLE IF NOT EXISTS keys(
                        name TEXT PRIMARY KEY,
                        private_key BLOB,
                        public_key BLOB)",
                    [],
                )?;

                let existing = conn
                    .query_row(
                        "SELECT private_key, public_key FROM keys WHERE name = 'p2p'",
                        [],
                        |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?)),
                    )
                    .optional()?;
                if let Some(blobs) = existing {
                    return Ok(blobs);
                }

                let secret = StaticSecret::random_from_rng(OsRng);
                let public = PublicKey::from(&secret);
                let private_der = encode_secret_key_der(&secret);
                let public_der = encode_public_key_der(&public);
                conn.execute(
                    "INSERT INTO keys(name, private_key, public_key) VALUES ('p2p', ?1, ?2)",
                    params![private_der, public_der],
                )?;
                Ok((private_der, public_der))
            })
            .await?;

        let secret = decode_secret_key_der(&private_der)?;
        let public = decode_public_key_der(&public_der)?;
        Ok((secret, public))
    }

    /// The public half of [`keypair`], as DER `SubjectPublicKeyInfo` bytes.
    pub async fn public_key_der(&self) -> IdentityResult<Vec<u8>> {
        let (_, public) = self.keypair().await?;
        Ok(encode_public_key_der(&public))
    }

    pub async fn device_name(&self) -> IdentityResult<Option<String>> {
        let name = self
            .worker
            .submit(|conn| {
                conn.execute("CREATE TABLE IF NOT EXISTS device_name(name TEXT PRIMARY KEY)", [])?;
                Ok(conn
                    .query_row("SELECT name FROM device_name", [], |row| row.get::<_, String>(0))
                    .optional()?)
            })
            .await?;
        Ok(name)
    }

    pub async fn set_device_name(&self, name: impl Into<String>) -> IdentityResult<()> {
        let name = name.into();
        self.worker
            .submit(move |conn| {
                conn.execute("CREATE TABLE IF NOT EXISTS device_name(name TEXT PRIMARY KEY)", [])?;
                conn.execute("DELETE FROM device_name", [])?;
                conn.execute("INSERT INTO device_name(name) VALUES (?1)", [&name])?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}
