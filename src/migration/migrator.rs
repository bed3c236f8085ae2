//! The migration service: state machine, background task and cutover.

use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

use super::preimage::PreimageResolver;
use super::progress::Progress;
use super::{MigrationError, MigrationResult, Phase, ValidationKind};
use crate::chain::{BlockHeader, ChainBackend, GenesisConfig};
use crate::config::MigrationConfig;
use crate::storage::kv_store::KVStore;
use crate::storage::{MigratedRef, StateChangesStore};
use crate::trie::MptDatabase;
use crate::zk::{new_hasher, ZkHash, ZkTrieDatabase};

/// Migrates the ZK state into an MPT while the chain keeps moving
pub struct StateMigrator {
    pub(super) config: MigrationConfig,
    pub(super) store: Arc<dyn KVStore>,
    pub(super) chain: Arc<dyn ChainBackend>,
    pub(super) zkdb: Arc<ZkTrieDatabase>,
    pub(super) mptdb: Arc<MptDatabase>,
    pub(super) preimages: PreimageResolver,
    pub(super) changes: StateChangesStore,
    pub(super) migrated_ref: MigratedRef,
    pub(super) progress: Arc<Progress>,
    pub(super) cancel: CancellationToken,
    phase: RwLock<Phase>,
    halted: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StateMigrator {
    /// Create a migrator over `store`. Genesis preimages are taken from
    /// `genesis` when given.
    pub fn new(
        config: MigrationConfig,
        store: Arc<dyn KVStore>,
        chain: Arc<dyn ChainBackend>,
        genesis: Option<&GenesisConfig>,
    ) -> MigrationResult<Arc<Self>> {
        let zkdb = Arc::new(ZkTrieDatabase::new(store.clone(), new_hasher(config.hasher)));
        let alloc: HashMap<ZkHash, Vec<u8>> = match genesis {
            Some(genesis) => genesis.preimages(zkdb.hasher().as_ref())?,
            None => HashMap::new(),
        };
        debug!("Loaded {} genesis preimages", alloc.len());

        Ok(Arc::new(Self {
            preimages: PreimageResolver::new(zkdb.clone(), alloc),
            mptdb: Arc::new(MptDatabase::new(store.clone())),
            changes: StateChangesStore::new(store.clone()),
            migrated_ref: MigratedRef::new(store.clone())?,
            progress: Arc::new(Progress::new()),
            cancel: CancellationToken::new(),
            phase: RwLock::new(Phase::NotStarted),
            halted: AtomicBool::new(false),
            task: Mutex::new(None),
            config,
            store,
            chain,
            zkdb,
        }))
    }

    pub fn phase(&self) -> Phase {
        match self.phase.read() {
            Ok(phase) => *phase,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub(super) fn set_phase(&self, phase: Phase) {
        let mut current = match self.phase.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *current != Phase::Halted && *current != phase {
            debug!("Migration phase {} -> {}", *current, phase);
            *current = phase;
        }
    }

    /// Whether a fatal error stopped the migration. Blocks must not be
    /// built on top of a halted migration.
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    pub fn migrated_ref(&self) -> &MigratedRef {
        &self.migrated_ref
    }

    pub fn progress(&self) -> &Arc<Progress> {
        &self.progress
    }

    fn halt(&self, e: &MigrationError) {
        if self.halted.swap(true, Ordering::SeqCst) {
            return;
        }
        error!("State migration halted: {}", e);
        match self.phase.write() {
            Ok(mut phase) => *phase = Phase::Halted,
            Err(poisoned) => *poisoned.into_inner() = Phase::Halted,
        }
        self.cancel.cancel();
    }

    /// Record a failure, halting on fatal errors
    fn observe<T>(&self, result: MigrationResult<T>) -> MigrationResult<T> {
        if let Err(e) = &result {
            if e.is_fatal() {
                self.halt(e);
            }
        }
        result
    }

    /// Start the background migration task
    pub fn start(self: &Arc<Self>) -> MigrationResult<()> {
        if self.is_halted() {
            return Err(MigrationError::Cancelled);
        }
        if let Some(head) = self.chain.safe_block()? {
            if self.chain.chain_config().is_mpt(head.time) {
                return Err(MigrationError::AlreadyTransitioned);
            }
        }

        info!("Start state migrator to migrate ZKT to MPT");
        let migrator = self.clone();
        let handle = tokio::spawn(async move {
            match migrator.run().await {
                Ok(()) => info!("State migrator finished at block {}", migrator.migrated_ref.block_number()),
                Err(MigrationError::Cancelled) => info!("State migrator stopped"),
                Err(e) => {
                    if !e.is_fatal() {
                        error!("State migrator exited: {}", e);
                    }
                }
            }
        });
        if let Ok(mut task) = self.task.lock() {
            *task = Some(handle);
        }
        Ok(())
    }

    /// Cancel the background task and wait for it to exit
    pub async fn stop(&self) {
        info!("Stopping state migrator");
        self.cancel.cancel();
        let handle = match self.task.lock() {
            Ok(mut task) => task.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("State migrator task ended abnormally: {}", e);
            }
        }
    }

    async fn run(self: &Arc<Self>) -> MigrationResult<()> {
        if self.migrated_ref.is_empty() {
            let target = self.wait_for_target().await?;
            info!("Start migrate past state at block {}", target.number);
            self.run_blocking(move |m| m.migrate_and_validate(&target)).await?;
        }

        self.set_phase(Phase::CatchingUp);
        info!("Start a loop to apply state of new blocks");
        let mut ticker = time::interval(Duration::from_millis(self.config.catch_up_interval_ms));
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(MigrationError::Cancelled),
                _ = ticker.tick() => {}
            }

            let safe = match self.chain.safe_block()? {
                Some(header) => header,
                None => continue,
            };
            // Skip blocks that have already been migrated
            if safe.number <= self.migrated_ref.block_number() {
                continue;
            }
            match self.run_blocking(move |m| m.catch_up(safe.number)).await {
                Ok(true) => {
                    info!("Safe block {} is processed with the MPT, catch-up complete", safe.number);
                    self.set_phase(Phase::Done);
                    return Ok(());
                }
                Ok(false) => {}
                Err(e) if e.is_fatal() || matches!(e, MigrationError::Cancelled) => return Err(e),
                Err(e) => warn!("Failed to apply new state transition: {}", e),
            }
        }
    }

    /// Wait until a safe block exists whose diff has been recorded, so bulk
    /// migration and catch-up never both claim the same block
    async fn wait_for_target(&self) -> MigrationResult<BlockHeader> {
        let poll = Duration::from_millis(self.config.safe_block_poll_ms);
        loop {
            if let Some(header) = self.chain.safe_block()? {
                if header.number == 0 || self.changes.exists(header.number)? {
                    return Ok(header);
                }
                debug!("Waiting for state changes of block {}", header.number);
            } else {
                debug!("Waiting for a safe block");
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(MigrationError::Cancelled),
                _ = time::sleep(poll) => {}
            }
        }
    }

    /// Run `f` on the blocking pool, halting on fatal errors
    async fn run_blocking<T, F>(self: &Arc<Self>, f: F) -> MigrationResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&StateMigrator) -> MigrationResult<T> + Send + 'static,
    {
        let migrator = self.clone();
        let result = tokio::task::spawn_blocking(move || f(&*migrator))
            .await
            .unwrap_or_else(|e| Err(MigrationError::Task(e.to_string())));
        self.observe(result)
    }

    /// Bulk-migrate the state of `target`, validate it and checkpoint it
    pub fn migrate_and_validate(&self, target: &BlockHeader) -> MigrationResult<()> {
        let started = Instant::now();
        let result = self.try_migrate_and_validate(target);
        if result.is_ok() {
            info!("Migrated past state have been validated in {:?}", started.elapsed());
        }
        self.observe(result)
    }

    fn try_migrate_and_validate(&self, target: &BlockHeader) -> MigrationResult<()> {
        self.set_phase(Phase::BulkMigrating);
        let root = self.migrate_state(target)?;
        // Nodes are content addressed, so writing them ahead of the
        // checkpoint is harmless
        self.store.write_batch(self.mptdb.flush_ops())?;

        self.set_phase(Phase::Validating(ValidationKind::Bulk));
        self.validate_state(&root, &target.root)?;

        self.migrated_ref
            .commit_with(root, target.number, StateChangesStore::delete_ops(target.number))?;
        Ok(())
    }

    /// Bring the MPT up to the current safe block in one pass, bulk
    /// migrating first when nothing has been migrated yet
    pub fn migrate_to_safe_block(&self) -> MigrationResult<u64> {
        let safe = self.chain.safe_block()?.ok_or(MigrationError::BlockNotFound(0))?;
        if self.chain.chain_config().is_mpt(safe.time) {
            return Err(MigrationError::AlreadyTransitioned);
        }
        if self.migrated_ref.is_empty() {
            if safe.number != 0 && !self.changes.exists(safe.number)? {
                return Err(MigrationError::StateChangesNotFound(safe.number));
            }
            self.migrate_and_validate(&safe)?;
        }
        self.set_phase(Phase::CatchingUp);
        self.observe(self.catch_up(safe.number))?;
        Ok(self.migrated_ref.block_number())
    }

    /// Validate the whole migrated state against the ZK root of its block
    pub fn validate_migrated(&self) -> MigrationResult<()> {
        let number = self.migrated_ref.block_number();
        let header = self
            .chain
            .header_by_number(number)?
            .ok_or(MigrationError::BlockNotFound(number))?;
        let started = Instant::now();
        info!("Start validation for all migrated state at block {}", number);
        let previous = self.phase();
        self.set_phase(Phase::Validating(ValidationKind::Bulk));
        let result = self.validate_state(&self.migrated_ref.root(), &header.root);
        self.set_phase(previous);
        let result = self.observe(result);
        if result.is_ok() {
            info!("All migrated state have been validated in {:?}", started.elapsed());
        }
        result
    }

    /// Switch the chain to the MPT from `transition_block` on and validate
    /// everything migrated so far
    pub async fn finalize(self: &Arc<Self>, transition_block: u64) -> MigrationResult<()> {
        let header = self
            .chain
            .header_by_number(transition_block)?
            .ok_or(MigrationError::BlockNotFound(transition_block))?;
        self.set_phase(Phase::Finalizing);

        let next = self.chain.chain_config().with_mpt_time(header.time);
        let old = self.chain.swap_chain_config(next)?;
        info!(
            "Wrote chain config: MPT active from block {} (time {}), version {} -> {}",
            transition_block,
            header.time,
            old.version,
            old.version + 1
        );

        self.run_blocking(|m| m.validate_migrated()).await?;
        self.set_phase(Phase::Done);
        Ok(())
    }
}
