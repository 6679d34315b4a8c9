//! Warm runner pool — eliminates agent-subprocess cold-start latency.
//!
//! Two sub-pools share one size bound: a session pool (LRU, keyed by the
//! agent session id, so consecutive turns of one conversation reuse the
//! same subprocess) and a generic pool (FIFO of pre-warmed runners for
//! fresh conversations). A background maintenance loop expires idle
//! runners and tops the generic pool back up.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::Notify;

use tr_domain::config::PoolConfig;
use tr_domain::Result;

use crate::runner::{AgentRunner, RunnerFactory};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pool state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct SessionSlot {
    runner: Box<dyn AgentRunner>,
    last_used: Instant,
    /// Insertion order; breaks LRU ties on equal timestamps.
    seq: u64,
}

struct PoolInner {
    session: HashMap<String, SessionSlot>,
    generic: VecDeque<(Box<dyn AgentRunner>, Instant)>,
    seq: u64,
}

impl PoolInner {
    fn total(&self) -> usize {
        self.session.len() + self.generic.len()
    }

    /// Evict one runner to make room: session-pool LRU first, then the
    /// oldest generic runner.
    fn evict_one(&mut self) -> Option<Box<dyn AgentRunner>> {
        let lru_key = self
            .session
            .iter()
            .min_by_key(|(_, slot)| (slot.last_used, slot.seq))
            .map(|(k, _)| k.clone());
        if let Some(key) = lru_key {
            return self.session.remove(&key).map(|slot| slot.runner);
        }
        self.generic.pop_front().map(|(runner, _)| runner)
    }
}

/// Counters for the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub session: usize,
    pub generic: usize,
    pub max_size: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runner pool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct RunnerPool {
    factory: Arc<dyn RunnerFactory>,
    cfg: PoolConfig,
    inner: Mutex<PoolInner>,
    shutdown: Notify,
    stopped: AtomicBool,
}

impl RunnerPool {
    pub fn new(factory: Arc<dyn RunnerFactory>, cfg: PoolConfig) -> Self {
        Self {
            factory,
            cfg,
            inner: Mutex::new(PoolInner {
                session: HashMap::new(),
                generic: VecDeque::new(),
                seq: 0,
            }),
            shutdown: Notify::new(),
            stopped: AtomicBool::new(false),
        }
    }

    /// Take a runner: the session pool when `session_id` matches, else a
    /// pre-warmed generic runner, else a fresh one (evicting LRU if the
    /// pool is at capacity).
    pub async fn acquire(&self, session_id: Option<&str>) -> Result<Box<dyn AgentRunner>> {
        let pooled = {
            let mut inner = self.inner.lock();
            session_id
                .and_then(|sid| inner.session.remove(sid))
                .map(|slot| slot.runner)
                .or_else(|| inner.generic.pop_front().map(|(r, _)| r))
        };
        if let Some(runner) = pooled {
            return Ok(runner);
        }

        // Creating a new runner; make room first if needed.
        let evicted = {
            let mut inner = self.inner.lock();
            if inner.total() >= self.cfg.max_size {
                inner.evict_one()
            } else {
                None
            }
        };
        if let Some(mut runner) = evicted {
            runner.disconnect().await;
        }

        self.factory.create().await
    }

    /// Return a runner. With a session id it is upserted into the session
    /// pool (evicting LRU on overflow); without, it joins the generic
    /// FIFO.
    pub async fn release(&self, runner: Box<dyn AgentRunner>, session_id: Option<String>) {
        let mut evicted = Vec::new();
        {
            let mut inner = self.inner.lock();
            match session_id {
                Some(sid) => {
                    let seq = inner.seq;
                    inner.seq += 1;
                    inner.session.insert(
                        sid,
                        SessionSlot { runner, last_used: Instant::now(), seq },
                    );
                }
                None => inner.generic.push_back((runner, Instant::now())),
            }
            while inner.total() > self.cfg.max_size {
                if let Some(r) = inner.evict_one() {
                    evicted.push(r);
                } else {
                    break;
                }
            }
        }
        for mut r in evicted {
            r.disconnect().await;
        }
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.lock();
        PoolStats {
            session: inner.session.len(),
            generic: inner.generic.len(),
            max_size: self.cfg.max_size,
        }
    }

    /// Spawn the background maintenance loop. Returns its join handle;
    /// the loop exits on [`RunnerPool::shutdown`].
    pub fn spawn_maintenance(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(pool.cfg.maintenance_interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                // The flag covers a notify landing while we were not
                // parked in the select below.
                if pool.stopped.load(Ordering::Acquire) {
                    break;
                }
                tokio::select! {
                    _ = pool.shutdown.notified() => break,
                    _ = interval.tick() => {
                        if pool.stopped.load(Ordering::Acquire) {
                            break;
                        }
                        pool.run_maintenance().await;
                    }
                }
            }
            tracing::debug!("runner pool maintenance loop stopped");
        })
    }

    /// One maintenance pass: expire idle runners, then top up the
    /// generic pool.
    pub async fn run_maintenance(&self) {
        let idle_ttl = self.cfg.idle_ttl();
        let expired = {
            let mut inner = self.inner.lock();
            let mut expired: Vec<Box<dyn AgentRunner>> = Vec::new();

            let stale: Vec<String> = inner
                .session
                .iter()
                .filter(|(_, slot)| slot.last_used.elapsed() > idle_ttl)
                .map(|(k, _)| k.clone())
                .collect();
            for key in stale {
                if let Some(slot) = inner.session.remove(&key) {
                    expired.push(slot.runner);
                }
            }

            while let Some((_, idle_since)) = inner.generic.front() {
                if idle_since.elapsed() > idle_ttl {
                    if let Some((runner, _)) = inner.generic.pop_front() {
                        expired.push(runner);
                    }
                } else {
                    break;
                }
            }
            expired
        };
        let dropped = expired.len();
        for mut runner in expired {
            runner.disconnect().await;
        }
        if dropped > 0 {
            tracing::debug!(dropped, "expired idle runners");
        }

        // Top up the generic pool so the next fresh conversation starts
        // against a warm subprocess.
        loop {
            let needs = {
                let inner = self.inner.lock();
                inner.generic.len() < self.cfg.min_generic
                    && inner.total() < self.cfg.max_size
            };
            if !needs {
                break;
            }
            match self.factory.create().await {
                Ok(runner) => {
                    let mut inner = self.inner.lock();
                    inner.generic.push_back((runner, Instant::now()));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "pre-warming runner failed");
                    break;
                }
            }
        }
    }

    /// Disconnect every pooled runner and stop the maintenance loop.
    pub async fn shutdown(&self) {
        self.stopped.store(true, Ordering::Release);
        self.shutdown.notify_waiters();
        let all: Vec<Box<dyn AgentRunner>> = {
            let mut inner = self.inner.lock();
            let mut all: Vec<Box<dyn AgentRunner>> = inner
                .session
                .drain()
                .map(|(_, slot)| slot.runner)
                .collect();
            all.extend(inner.generic.drain(..).map(|(r, _)| r));
            all
        };
        for mut runner in all {
            runner.disconnect().await;
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
