//! Pool registry and snapshot persistence
//!
//! Pools are addressed by [`PoolId`] and, for configuration and tooling, by
//! a unique name. The registry hands out `Arc` handles; every handle carries
//! its own guard, so pools are used concurrently without a registry-wide lock.
//!
//! `persist_all` writes one bincode file per pool into a directory and `load`
//! rebuilds the registry from such a directory, plain pools first so meta
//! pools can be re-attached to their base.

use crate::errors::PoolError;
use crate::handle::StableSwapPool;
use crate::meta::{BasePool, BasePriceCache, MetaPool, MetaSwap, BASE_CACHE_EXPIRES_SECS};
use crate::state::PoolState;
use crate::swap::{InitParams, PoolEnv, Swap};
use crate::types::{Address, AddressError, PoolId};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use stableswap_config::{EngineConfig, PoolDefinition};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

const SNAPSHOT_EXTENSION: &str = "pool";

/// Decimals of every LP token
const LP_DECIMALS: u8 = 18;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid address {value:?}: {source}")]
    Address {
        value: String,
        #[source]
        source: AddressError,
    },

    #[error("Snapshot encoding error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Pool name {0} is already registered")]
    DuplicateName(String),

    #[error("Unknown base pool {0}")]
    UnknownBasePool(String),
}

fn parse_address(value: &str) -> Result<Address, RegistryError> {
    Address::from_str(value).map_err(|source| RegistryError::Address {
        value: value.to_string(),
        source,
    })
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> RegistryError + '_ {
    move |source| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// On-disk form of one pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct PersistedPool {
    name: String,
    kind: PersistedKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum PersistedKind {
    Plain(PoolState),
    Meta {
        state: PoolState,
        cache: BasePriceCache,
        base: PoolId,
    },
}

pub struct PoolRegistry {
    env: PoolEnv,
    base_cache_expiry_secs: u64,
    pools: DashMap<PoolId, Arc<StableSwapPool>>,
    meta_pools: DashMap<PoolId, Arc<MetaPool>>,
    meta_bases: DashMap<PoolId, PoolId>,
    names: DashMap<String, PoolId>,
}

impl PoolRegistry {
    pub fn new(env: PoolEnv) -> Self {
        Self {
            env,
            base_cache_expiry_secs: BASE_CACHE_EXPIRES_SECS,
            pools: DashMap::new(),
            meta_pools: DashMap::new(),
            meta_bases: DashMap::new(),
            names: DashMap::new(),
        }
    }

    pub fn with_base_cache_expiry(mut self, secs: u64) -> Self {
        self.base_cache_expiry_secs = secs;
        self
    }

    /// Registry holding every pool defined in `config`, created in order
    pub fn from_config(config: &EngineConfig, env: PoolEnv) -> Result<Self, RegistryError> {
        let registry = Self::new(env).with_base_cache_expiry(config.meta.base_cache_expiry_secs);
        for definition in &config.pools {
            match &definition.base_pool {
                Some(base) => {
                    registry.create_meta_pool_from(definition, base)?;
                }
                None => {
                    registry.create_pool(&definition.name, Self::init_params(definition, None)?)?;
                }
            }
        }
        info!(pools = registry.len(), "pool registry built from configuration");
        Ok(registry)
    }

    fn init_params(
        definition: &PoolDefinition,
        base_lp: Option<Address>,
    ) -> Result<InitParams, RegistryError> {
        let mut tokens = definition
            .tokens
            .iter()
            .map(|t| parse_address(&t.address))
            .collect::<Result<Vec<_>, _>>()?;
        let mut decimals: Vec<u8> = definition.tokens.iter().map(|t| t.decimals).collect();
        if let Some(lp) = base_lp {
            tokens.push(lp);
            decimals.push(LP_DECIMALS);
        }
        Ok(InitParams {
            tokens,
            decimals,
            lp_name: definition.lp_name.clone(),
            lp_symbol: definition.lp_symbol.clone(),
            a: u128::from(definition.a),
            swap_fee: definition.swap_fee,
            admin_fee: definition.admin_fee,
            owner: parse_address(&definition.owner)?,
        })
    }

    fn create_meta_pool_from(
        &self,
        definition: &PoolDefinition,
        base_name: &str,
    ) -> Result<Arc<MetaPool>, RegistryError> {
        let base = self
            .pool_by_name(base_name)
            .ok_or_else(|| RegistryError::UnknownBasePool(base_name.to_string()))?;
        let base_lp = BasePool::lp_token(base.as_ref())?;
        let params = Self::init_params(definition, Some(base_lp))?;
        self.create_meta_pool(&definition.name, params, base_name)
    }

    fn claim_name(&self, name: &str) -> Result<(), RegistryError> {
        if self.names.contains_key(name) {
            return Err(RegistryError::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    pub fn create_pool(
        &self,
        name: &str,
        params: InitParams,
    ) -> Result<Arc<StableSwapPool>, RegistryError> {
        self.claim_name(name)?;
        let pool = Arc::new(StableSwapPool::create(params, self.env.clone())?);
        let id = pool.address()?;
        self.pools.insert(id, Arc::clone(&pool));
        self.names.insert(name.to_string(), id);
        info!(%name, pool = %id, "pool registered");
        Ok(pool)
    }

    /// Create a meta pool on top of the plain pool registered as `base_name`
    pub fn create_meta_pool(
        &self,
        name: &str,
        params: InitParams,
        base_name: &str,
    ) -> Result<Arc<MetaPool>, RegistryError> {
        self.claim_name(name)?;
        let base = self
            .pool_by_name(base_name)
            .ok_or_else(|| RegistryError::UnknownBasePool(base_name.to_string()))?;
        let base_id = base.address()?;
        let base: Arc<dyn BasePool> = base;
        let meta = Arc::new(MetaPool::create(
            params,
            base,
            self.env.clone(),
            self.base_cache_expiry_secs,
        )?);
        let id = meta.address()?;
        self.meta_pools.insert(id, Arc::clone(&meta));
        self.meta_bases.insert(id, base_id);
        self.names.insert(name.to_string(), id);
        info!(%name, pool = %id, base = %base_id, "meta pool registered");
        Ok(meta)
    }

    pub fn pool(&self, id: &PoolId) -> Option<Arc<StableSwapPool>> {
        self.pools.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn meta_pool(&self, id: &PoolId) -> Option<Arc<MetaPool>> {
        self.meta_pools.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn lookup(&self, name: &str) -> Option<PoolId> {
        self.names.get(name).map(|entry| *entry.value())
    }

    pub fn pool_by_name(&self, name: &str) -> Option<Arc<StableSwapPool>> {
        self.lookup(name).and_then(|id| self.pool(&id))
    }

    pub fn meta_pool_by_name(&self, name: &str) -> Option<Arc<MetaPool>> {
        self.lookup(name).and_then(|id| self.meta_pool(&id))
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.names.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.pools.len() + self.meta_pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write a snapshot of every pool into `dir`; returns the number written
    pub fn persist_all(&self, dir: &Path) -> Result<usize, RegistryError> {
        fs::create_dir_all(dir).map_err(io_error(dir))?;
        let mut written = 0;
        for entry in self.names.iter() {
            let (name, id) = (entry.key().clone(), *entry.value());
            let kind = if let Some(pool) = self.pool(&id) {
                PersistedKind::Plain(pool.state()?)
            } else if let Some(meta) = self.meta_pool(&id) {
                let (state, cache) = meta.read(|m| Ok((m.inner().state().clone(), m.cache())))?;
                let base = self.meta_bases.get(&id).map(|b| *b.value()).unwrap_or_default();
                PersistedKind::Meta { state, cache, base }
            } else {
                continue;
            };
            let bytes = bincode::serialize(&PersistedPool { name, kind })?;
            let path = dir.join(format!("{}.{}", id, SNAPSHOT_EXTENSION));
            fs::write(&path, bytes).map_err(io_error(&path))?;
            debug!(pool = %id, ?path, "pool snapshot written");
            written += 1;
        }
        info!(pools = written, ?dir, "pool snapshots persisted");
        Ok(written)
    }

    /// Rebuild a registry from a directory written by [`persist_all`](Self::persist_all)
    pub fn load(dir: &Path, env: PoolEnv) -> Result<Self, RegistryError> {
        let registry = Self::new(env);
        let mut snapshots = Vec::new();
        for entry in fs::read_dir(dir).map_err(io_error(dir))? {
            let path = entry.map_err(io_error(dir))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SNAPSHOT_EXTENSION) {
                continue;
            }
            let bytes = fs::read(&path).map_err(io_error(&path))?;
            snapshots.push(bincode::deserialize::<PersistedPool>(&bytes)?);
        }

        let (plain, meta): (Vec<_>, Vec<_>) = snapshots
            .into_iter()
            .partition(|snapshot| matches!(snapshot.kind, PersistedKind::Plain(_)));

        for snapshot in plain.into_iter().chain(meta) {
            registry.claim_name(&snapshot.name)?;
            match snapshot.kind {
                PersistedKind::Plain(state) => {
                    let id = state.address;
                    let pool = Swap::from_state(state, registry.env.clone())?;
                    registry.pools.insert(id, Arc::new(StableSwapPool::new(pool)));
                    registry.names.insert(snapshot.name, id);
                }
                PersistedKind::Meta { state, cache, base } => {
                    let id = state.address;
                    let base_pool: Arc<dyn BasePool> = registry
                        .pool(&base)
                        .ok_or_else(|| RegistryError::UnknownBasePool(base.to_string()))?;
                    let meta = MetaSwap::from_parts(state, cache, base_pool, registry.env.clone())?;
                    registry.meta_pools.insert(id, Arc::new(MetaPool::new(meta)));
                    registry.meta_bases.insert(id, base);
                    registry.names.insert(snapshot.name, id);
                }
            }
        }
        info!(pools = registry.len(), ?dir, "pool registry loaded");
        Ok(registry)
    }
}
