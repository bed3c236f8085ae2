use log::error;
use std::collections::HashMap;
use std::sync::Arc;

use super::{MigrationError, MigrationResult};
use crate::zk::{ZkHash, ZkTrieDatabase};

/// Recovers natural keys of tree keys, consulting the genesis allocation
/// before the preimage store
pub struct PreimageResolver {
    alloc: HashMap<ZkHash, Vec<u8>>,
    db: Arc<ZkTrieDatabase>,
}

impl PreimageResolver {
    pub fn new(db: Arc<ZkTrieDatabase>, alloc: HashMap<ZkHash, Vec<u8>>) -> Self {
        Self { alloc, db }
    }

    /// Natural key of `hash`. A missing preimage is fatal.
    pub fn resolve(&self, hash: &ZkHash) -> MigrationResult<Vec<u8>> {
        if let Some(preimage) = self.alloc.get(hash) {
            return Ok(preimage.clone());
        }
        match self.db.preimage(hash)? {
            Some(preimage) => Ok(preimage),
            None => {
                error!("Preimage does not exist for {}", hash);
                Err(MigrationError::PreimageMissing(*hash))
            }
        }
    }

    /// Natural key of `hash` as an address
    pub fn resolve_address(&self, hash: &ZkHash) -> MigrationResult<[u8; 20]> {
        let preimage = self.resolve(hash)?;
        if preimage.len() != 20 {
            return Err(MigrationError::mismatch(
                format!("preimage of account {}", hash),
                "20 bytes",
                format!("{} bytes", preimage.len()),
            ));
        }
        let mut address = [0u8; 20];
        address.copy_from_slice(&preimage);
        Ok(address)
    }
}
