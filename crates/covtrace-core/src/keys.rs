//! Server root key material
//!
//! The token master key comes from the root seed in `root.key`; the
//! refresh-code secret from a second seed in `refresh.key`, so refresh codes
//! can be revoked wholesale by rotating that file while issued tokens keep
//! verifying. Both are loaded once at startup and passed explicitly to
//! whatever needs them.

use crate::crypto::KeyPair;
use crate::error::{CoreError, Result};
use crate::keyed_hash::{Blake3Keyed, HmacSha256, KeyedHasher};
use rand::RngCore;
use std::path::Path;
use std::sync::Arc;

/// Key id of the token signing key
pub const MASTER_KEY_ID: &str = "master";

/// Context string for deriving the refresh-code secret
pub const REFRESH_SECRET_CONTEXT: &str = "covtrace refresh-code secret v1";

/// File name of the persisted root seed inside the server home
pub const ROOT_KEY_FILE: &str = "root.key";

/// File name of the persisted refresh-code seed inside the server home
pub const REFRESH_KEY_FILE: &str = "refresh.key";

/// Keyed-hash primitive used for refresh codes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RefreshHash {
    #[default]
    Blake3,
    HmacSha256,
}

impl std::str::FromStr for RefreshHash {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "blake3" => Ok(RefreshHash::Blake3),
            "hmac-sha256" => Ok(RefreshHash::HmacSha256),
            other => Err(CoreError::InvalidKeyMaterial(format!(
                "unknown refresh hash '{other}'"
            ))),
        }
    }
}

/// Immutable root key material of a server process
#[derive(Clone)]
pub struct ServerKeys {
    signing_key: KeyPair,
    refresh_hasher: Arc<dyn KeyedHasher>,
}

impl std::fmt::Debug for ServerKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerKeys")
            .field("signing_key", &self.signing_key)
            .field("refresh_hasher", &self.refresh_hasher.name())
            .finish()
    }
}

impl ServerKeys {
    /// Derive all key material from a single seed
    pub fn from_seed(seed: &[u8; 32], refresh_hash: RefreshHash) -> Self {
        Self::from_seeds(seed, seed, refresh_hash)
    }

    /// Signing key from `root_seed`, refresh secret from `refresh_seed`
    pub fn from_seeds(
        root_seed: &[u8; 32],
        refresh_seed: &[u8; 32],
        refresh_hash: RefreshHash,
    ) -> Self {
        Self {
            signing_key: KeyPair::from_bytes(MASTER_KEY_ID, root_seed),
            refresh_hasher: refresh_hasher(refresh_seed, refresh_hash),
        }
    }

    /// Same signing key, refresh secret derived from `refresh_seed`.
    ///
    /// Every refresh code handed out under the previous secret stops matching.
    pub fn rotate_refresh_secret(
        &self,
        refresh_seed: &[u8; 32],
        refresh_hash: RefreshHash,
    ) -> Self {
        Self {
            signing_key: self.signing_key.clone(),
            refresh_hasher: refresh_hasher(refresh_seed, refresh_hash),
        }
    }

    /// Fresh random key material, for tests and ephemeral deployments
    pub fn generate() -> Self {
        Self::from_seed(&random_seed(), RefreshHash::default())
    }

    /// Load `<home>/root.key` and `<home>/refresh.key`, creating either when absent
    pub fn load_or_generate(home: &Path, refresh_hash: RefreshHash) -> Result<Self> {
        std::fs::create_dir_all(home)?;
        let root_seed = load_or_create_seed(&home.join(ROOT_KEY_FILE))?;
        let refresh_seed = load_or_create_seed(&home.join(REFRESH_KEY_FILE))?;
        Ok(Self::from_seeds(&root_seed, &refresh_seed, refresh_hash))
    }

    /// Token master key
    pub fn signing_key(&self) -> &KeyPair {
        &self.signing_key
    }

    /// Keyed hasher holding the refresh-code secret
    pub fn refresh_hasher(&self) -> &dyn KeyedHasher {
        self.refresh_hasher.as_ref()
    }
}

fn refresh_hasher(seed: &[u8; 32], refresh_hash: RefreshHash) -> Arc<dyn KeyedHasher> {
    let secret = blake3::derive_key(REFRESH_SECRET_CONTEXT, seed);
    match refresh_hash {
        RefreshHash::Blake3 => Arc::new(Blake3Keyed::new(secret)),
        RefreshHash::HmacSha256 => Arc::new(HmacSha256::new(secret)),
    }
}

fn load_or_create_seed(path: &Path) -> Result<[u8; 32]> {
    if path.exists() {
        return read_seed(path);
    }
    let seed = random_seed();
    write_seed(path, &seed)?;
    Ok(seed)
}

fn random_seed() -> [u8; 32] {
    let mut seed = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut seed);
    seed
}

fn read_seed(path: &Path) -> Result<[u8; 32]> {
    let contents = std::fs::read_to_string(path)?;
    let bytes = hex::decode(contents.trim())
        .map_err(|e| CoreError::InvalidKeyMaterial(format!("{}: {e}", path.display())))?;
    bytes.try_into().map_err(|_| {
        CoreError::InvalidKeyMaterial(format!("{}: expected 32 byte seed", path.display()))
    })
}

fn write_seed(path: &Path, seed: &[u8; 32]) -> Result<()> {
    std::fs::write(path, hex::encode(seed))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o400))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_is_deterministic() {
        let a = ServerKeys::from_seed(&[4u8; 32], RefreshHash::Blake3);
        let b = ServerKeys::from_seed(&[4u8; 32], RefreshHash::Blake3);

        assert_eq!(
            a.signing_key().verifying_key_bytes(),
            b.signing_key().verifying_key_bytes()
        );
        assert_eq!(
            a.refresh_hasher().keyed_hash(b"t"),
            b.refresh_hasher().keyed_hash(b"t")
        );
        assert_eq!(a.signing_key().kid(), MASTER_KEY_ID);
    }

    #[test]
    fn test_refresh_secret_is_not_the_seed() {
        let seed = [4u8; 32];
        let keys = ServerKeys::from_seed(&seed, RefreshHash::Blake3);
        let naive = Blake3Keyed::new(seed);

        assert_ne!(keys.refresh_hasher().keyed_hash(b"t"), naive.keyed_hash(b"t"));
    }

    #[test]
    fn test_load_or_generate_persists_seed() {
        let dir = tempfile::tempdir().unwrap();
        let home = dir.path().join("home");

        let first = ServerKeys::load_or_generate(&home, RefreshHash::Blake3).unwrap();
        assert!(home.join(ROOT_KEY_FILE).exists());

        let second = ServerKeys::load_or_generate(&home, RefreshHash::Blake3).unwrap();
        assert_eq!(
            first.signing_key().verifying_key_bytes(),
            second.signing_key().verifying_key_bytes()
        );
        assert_eq!(
            first.refresh_hasher().keyed_hash(b"t"),
            second.refresh_hasher().keyed_hash(b"t")
        );
    }

    #[test]
    fn test_refresh_key_rotates_alone() {
        let dir = tempfile::tempdir().unwrap();
        let before = ServerKeys::load_or_generate(dir.path(), RefreshHash::Blake3).unwrap();
        assert!(dir.path().join(REFRESH_KEY_FILE).exists());

        std::fs::remove_file(dir.path().join(REFRESH_KEY_FILE)).unwrap();
        let after = ServerKeys::load_or_generate(dir.path(), RefreshHash::Blake3).unwrap();

        assert_eq!(
            before.signing_key().verifying_key_bytes(),
            after.signing_key().verifying_key_bytes()
        );
        assert_ne!(
            before.refresh_hasher().keyed_hash(b"t"),
            after.refresh_hasher().keyed_hash(b"t")
        );
    }

    #[test]
    fn test_rotate_refresh_secret() {
        let keys = ServerKeys::from_seed(&[4u8; 32], RefreshHash::Blake3);
        let rotated = keys.rotate_refresh_secret(&[5u8; 32], RefreshHash::Blake3);

        assert_eq!(
            keys.signing_key().verifying_key_bytes(),
            rotated.signing_key().verifying_key_bytes()
        );
        assert_ne!(
            keys.refresh_hasher().keyed_hash(b"t"),
            rotated.refresh_hasher().keyed_hash(b"t")
        );
        assert_eq!(
            rotated.refresh_hasher().keyed_hash(b"t"),
            ServerKeys::from_seeds(&[4u8; 32], &[5u8; 32], RefreshHash::Blake3)
                .refresh_hasher()
                .keyed_hash(b"t")
        );
    }

    #[test]
    fn test_corrupt_seed_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(ROOT_KEY_FILE), "zz").unwrap();

        assert!(matches!(
            ServerKeys::load_or_generate(dir.path(), RefreshHash::Blake3),
            Err(CoreError::InvalidKeyMaterial(_))
        ));
    }

    #[test]
    fn test_refresh_hash_from_str() {
        assert_eq!("blake3".parse::<RefreshHash>().unwrap(), RefreshHash::Blake3);
        assert_eq!(
            "hmac-sha256".parse::<RefreshHash>().unwrap(),
            RefreshHash::HmacSha256
        );
        assert!("md5".parse::<RefreshHash>().is_err());
    }
}
