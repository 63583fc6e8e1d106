//! Conversation id → chain map.
//!
//! At most one live chain exists per conversation. Asking for a chain with
//! a different model disposes the old one and creates a fresh chain with
//! empty memory. The map lock is held only for map operations, never
//! across a reply cycle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::Result;
use crate::telemetry;

use super::{Chain, ChainContext, Orchestrator};

pub struct ChainRegistry {
    ctx: Arc<ChainContext>,
    chains: Mutex<HashMap<i64, Arc<Chain>>>,
}

impl ChainRegistry {
    pub fn new(ctx: Arc<ChainContext>) -> Self {
        Self {
            ctx,
            chains: Mutex::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &Arc<ChainContext> {
        &self.ctx
    }

    fn map(&self) -> MutexGuard<'_, HashMap<i64, Arc<Chain>>> {
        self.chains.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the conversation's chain, creating or replacing it as needed.
    ///
    /// An existing chain is reused when it was created for the same
    /// requested model id. Otherwise the old chain is disposed and a new
    /// one takes its place.
    pub fn get_or_create(
        &self,
        conversation_id: i64,
        model_id: &str,
        system_prompt: Option<&str>,
        user_id: Option<i64>,
    ) -> Result<Arc<Chain>> {
        let mut chains = self.map();
        if let Some(existing) = chains.get(&conversation_id) {
            if existing.requested_model() == model_id && !existing.is_disposed() {
                existing.touch();
                return Ok(existing.clone());
            }
        }

        let orchestrator = Orchestrator::new(
            self.ctx.clone(),
            conversation_id,
            model_id,
            system_prompt,
            user_id,
        )?;
        info!(
            conversation_id,
            requested = model_id,
            model = orchestrator.current_model(),
            "creating chain"
        );
        let chain = Arc::new(Chain::new(orchestrator));

        if let Some(old) = chains.remove(&conversation_id) {
            debug!(conversation_id, old_model = old.requested_model(), "replacing chain");
            old.dispose();
        }
        chains.insert(conversation_id, chain.clone());
        Ok(chain)
    }

    /// The conversation's chain, if one is live.
    pub fn get(&self, conversation_id: i64) -> Option<Arc<Chain>> {
        self.map().get(&conversation_id).cloned()
    }

    /// Dispose and remove a chain. Returns whether one existed.
    pub fn invalidate(&self, conversation_id: i64) -> bool {
        match self.map().remove(&conversation_id) {
            Some(chain) => {
                chain.dispose();
                debug!(conversation_id, "chain invalidated");
                true
            }
            None => false,
        }
    }

    /// Dispose and remove chains idle for longer than `max_idle`. Chains in
    /// the middle of a cycle, or with one queued, are kept. Returns the
    /// number removed.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let evicted = {
            let mut chains = self.map();
            let stale: Vec<i64> = chains
                .iter()
                .filter(|(_, chain)| chain.dispose_if_idle(max_idle))
                .map(|(&id, _)| id)
                .collect();
            for id in &stale {
                chains.remove(id);
            }
            stale.len()
        };

        if evicted > 0 {
            metrics::counter!(telemetry::CHAINS_EVICTED_TOTAL).increment(evicted as u64);
            info!(count = evicted, "evicted idle chains");
        }
        evicted
    }

    /// Run [`evict_idle`](Self::evict_idle) every `interval` until the
    /// registry is dropped.
    pub fn spawn_idle_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        max_idle: Duration,
    ) -> JoinHandle<()> {
        let registry: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                registry.evict_idle(max_idle);
            }
        })
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }
}
