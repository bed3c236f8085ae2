use log::{debug, info};
use std::sync::{Arc, RwLock};

use crate::chain::{BlockHeader, ChainBackend, ChainConfig, ChainError, ChainResult};
use crate::storage::kv_store::{KVStore, KVStoreError, WriteBatchOperation, WriteBatchOperationExt};
use crate::storage::schema::Schema;

/// Type alias for a 32-byte hash
pub type Hash = [u8; 32];

/// Error type for BlockStore operations
#[derive(Debug, thiserror::Error)]
pub enum BlockStoreError {
    /// KVStore error
    #[error("KVStore error: {0}")]
    KVStoreError(#[from] KVStoreError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Block not found
    #[error("Block not found: {0}")]
    BlockNotFound(u64),
}

impl From<BlockStoreError> for ChainError {
    fn from(e: BlockStoreError) -> Self {
        match e {
            BlockStoreError::BlockNotFound(n) => ChainError::HeaderNotFound(n),
            other => ChainError::Backend(other.to_string()),
        }
    }
}

/// Store for block headers, head pointers and the chain configuration
pub struct BlockStore {
    /// The underlying key-value store
    store: Arc<dyn KVStore>,

    /// Active chain configuration, replaced as a whole
    config: RwLock<Arc<ChainConfig>>,
}

impl BlockStore {
    /// Open the block store, reading the persisted chain configuration or
    /// falling back to `default_config`
    pub fn new(store: Arc<dyn KVStore>, default_config: ChainConfig) -> Result<Self, BlockStoreError> {
        let config = match store.get(Schema::chain_config_key())? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| BlockStoreError::SerializationError(e.to_string()))?,
            None => default_config,
        };
        Ok(Self {
            store,
            config: RwLock::new(Arc::new(config)),
        })
    }

    /// Store a header and advance the head pointer
    pub fn put_header(&self, header: &BlockHeader) -> Result<(), BlockStoreError> {
        let value = bincode::serialize(header)
            .map_err(|e| BlockStoreError::SerializationError(e.to_string()))?;

        let mut batch = WriteBatchOperation::new();
        batch.put(Schema::header_key(header.number), value);
        if self.head_number()?.map_or(true, |head| head < header.number) {
            batch.put(Schema::head_block_key().to_vec(), header.number.to_be_bytes().to_vec());
        }
        self.store.write_batch(batch)?;

        debug!("Stored header {} with root {}", header.number, hex::encode(header.root));
        Ok(())
    }

    /// Retrieve a header by its number
    pub fn get_header(&self, number: u64) -> Result<Option<BlockHeader>, BlockStoreError> {
        match self.store.get(&Schema::header_key(number))? {
            Some(bytes) => bincode::deserialize(&bytes)
                .map(Some)
                .map_err(|e| BlockStoreError::SerializationError(e.to_string())),
            None => Ok(None),
        }
    }

    /// Number of the highest stored header
    pub fn head_number(&self) -> Result<Option<u64>, BlockStoreError> {
        self.read_number(Schema::head_block_key())
    }

    /// Mark a stored block as safe
    pub fn set_safe_block(&self, number: u64) -> Result<(), BlockStoreError> {
        if self.get_header(number)?.is_none() {
            return Err(BlockStoreError::BlockNotFound(number));
        }
        self.store.put(Schema::safe_block_key(), &number.to_be_bytes())?;
        debug!("Safe block is now {}", number);
        Ok(())
    }

    fn read_number(&self, key: &[u8]) -> Result<Option<u64>, BlockStoreError> {
        match self.store.get(key)? {
            Some(bytes) if bytes.len() == 8 => {
                let mut number = [0u8; 8];
                number.copy_from_slice(&bytes);
                Ok(Some(u64::from_be_bytes(number)))
            }
            Some(bytes) => Err(BlockStoreError::SerializationError(format!(
                "block number of {} bytes",
                bytes.len()
            ))),
            None => Ok(None),
        }
    }
}

impl ChainBackend for BlockStore {
    fn safe_block(&self) -> ChainResult<Option<BlockHeader>> {
        match self.read_number(Schema::safe_block_key())? {
            Some(number) => Ok(Some(
                self.get_header(number)?.ok_or(ChainError::HeaderNotFound(number))?,
            )),
            None => Ok(None),
        }
    }

    fn header_by_number(&self, number: u64) -> ChainResult<Option<BlockHeader>> {
        Ok(self.get_header(number)?)
    }

    fn chain_config(&self) -> Arc<ChainConfig> {
        match self.config.read() {
            Ok(config) => config.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn swap_chain_config(&self, config: ChainConfig) -> ChainResult<Arc<ChainConfig>> {
        let encoded = serde_json::to_vec(&config).map_err(|e| ChainError::Backend(e.to_string()))?;
        self.store
            .put(Schema::chain_config_key(), &encoded)
            .map_err(|e| ChainError::Backend(e.to_string()))?;

        let new = Arc::new(config);
        let mut active = self.config.write().map_err(|_| ChainError::Backend("config lock poisoned".to_string()))?;
        let old = std::mem::replace(&mut *active, new.clone());
        info!("Chain config switched from version {} to {}", old.version, new.version);
        Ok(old)
    }
}
