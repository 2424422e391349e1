// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Instrumentation Service
//!
//! Counters, timers, variables and samplers keyed by `(group, name)`.
//! Every update is forwarded to the `metrics` facade (exported by whatever
//! recorder the binary installs) and kept in an in-process snapshot served
//! by the admin API.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Instrumentation collaborator of the execution gateway
//!
//! Samplers are polled by a background task started in `post_init` every
//! `<name>.instrumentation.sampling.interval` seconds.

use crate::application::container::ServiceContainer;
use crate::domain::service::{ServiceContract, ServiceError, ServiceId};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::any::Any;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;

const DEFAULT_SAMPLING_INTERVAL_SECS: u64 = 1;

type Groups<T> = BTreeMap<String, BTreeMap<String, T>>;

/// Value source polled for variables and samplers.
pub type Variable = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Start/stop timing span. `own` accumulates time between `start` and
/// `stop` calls; `total` is the wall time since the first `start`.
#[derive(Debug, Clone, Default)]
pub struct Cron {
    first_start: Option<Instant>,
    lap_start: Option<Instant>,
    own: Duration,
    total: Duration,
}

impl Cron {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) -> &mut Self {
        let now = Instant::now();
        self.first_start.get_or_insert(now);
        self.lap_start = Some(now);
        self
    }

    pub fn stop(&mut self) -> &mut Self {
        if let Some(lap) = self.lap_start.take() {
            let now = Instant::now();
            self.own += now.duration_since(lap);
            if let Some(first) = self.first_start {
                self.total = now.duration_since(first);
            }
        }
        self
    }

    pub fn own(&self) -> Duration {
        self.own
    }

    pub fn total(&self) -> Duration {
        self.total
    }
}

#[derive(Debug, Clone, Default)]
struct TimerStats {
    ticks: u64,
    own: Duration,
    total: Duration,
    last_own: Duration,
    last_total: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimerSnapshot {
    pub ticks: u64,
    pub last_own_ms: f64,
    pub last_total_ms: f64,
    pub avg_own_ms: f64,
    pub avg_total_ms: f64,
}

impl From<&TimerStats> for TimerSnapshot {
    fn from(stats: &TimerStats) -> Self {
        let avg = |d: Duration| {
            if stats.ticks == 0 {
                0.0
            } else {
                millis(d) / stats.ticks as f64
            }
        };
        Self {
            ticks: stats.ticks,
            last_own_ms: millis(stats.last_own),
            last_total_ms: millis(stats.last_total),
            avg_own_ms: avg(stats.own),
            avg_total_ms: avg(stats.total),
        }
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

struct Sampler {
    variable: Variable,
    size: usize,
    values: VecDeque<i64>,
}

impl Sampler {
    fn sample(&mut self) {
        self.values.push_back((self.variable)());
        while self.values.len() > self.size {
            self.values.pop_front();
        }
    }

    fn average(&self) -> f64 {
        if self.values.is_empty() {
            0.0
        } else {
            self.values.iter().sum::<i64>() as f64 / self.values.len() as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstrumentationSnapshot {
    pub counters: Groups<u64>,
    pub timers: Groups<TimerSnapshot>,
    pub variables: Groups<i64>,
    pub samplers: Groups<f64>,
}

#[derive(Default)]
struct Registry {
    counters: RwLock<Groups<u64>>,
    timers: RwLock<Groups<TimerStats>>,
    variables: RwLock<Groups<Variable>>,
    samplers: Mutex<Groups<Sampler>>,
}

impl Registry {
    fn sample(&self) {
        let mut samplers = self.samplers.lock();
        for (group, entries) in samplers.iter_mut() {
            for (name, sampler) in entries.iter_mut() {
                sampler.sample();
                metrics::gauge!("fsgate_sampler", "group" => group.clone(), "name" => name.clone())
                    .set(sampler.average());
            }
        }
        drop(samplers);

        for (group, entries) in self.variables.read().iter() {
            for (name, variable) in entries {
                metrics::gauge!("fsgate_variable", "group" => group.clone(), "name" => name.clone())
                    .set(variable() as f64);
            }
        }
    }
}

pub struct InstrumentationService {
    registry: Arc<Registry>,
    sampler_task: Mutex<Option<JoinHandle<()>>>,
    interval: Mutex<Duration>,
}

impl Default for InstrumentationService {
    fn default() -> Self {
        Self::new()
    }
}

impl InstrumentationService {
    pub const SERVICE_ID: ServiceId = ServiceId::new("instrumentation");

    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry::default()),
            sampler_task: Mutex::new(None),
            interval: Mutex::new(Duration::from_secs(DEFAULT_SAMPLING_INTERVAL_SECS)),
        }
    }

    pub fn incr(&self, group: &str, name: &str, count: u64) {
        *self
            .registry
            .counters
            .write()
            .entry(group.to_string())
            .or_default()
            .entry(name.to_string())
            .or_default() += count;
        metrics::counter!("fsgate_counter_total", "group" => group.to_string(), "name" => name.to_string())
            .increment(count);
    }

    pub fn create_cron(&self) -> Cron {
        Cron::new()
    }

    /// Record a stopped cron under `(group, name)`.
    pub fn add_cron(&self, group: &str, name: &str, cron: &Cron) {
        {
            let mut timers = self.registry.timers.write();
            let stats = timers
                .entry(group.to_string())
                .or_default()
                .entry(name.to_string())
                .or_default();
            stats.ticks += 1;
            stats.own += cron.own();
            stats.total += cron.total();
            stats.last_own = cron.own();
            stats.last_total = cron.total();
        }
        metrics::histogram!("fsgate_cron_seconds", "group" => group.to_string(), "name" => name.to_string())
            .record(cron.own().as_secs_f64());
    }

    pub fn add_variable(&self, group: &str, name: &str, variable: Variable) {
        self.registry
            .variables
            .write()
            .entry(group.to_string())
            .or_default()
            .insert(name.to_string(), variable);
    }

    /// Track the last `size` polls of `variable`; the snapshot reports their
    /// average.
    pub fn add_sampler(&self, group: &str, name: &str, size: usize, variable: Variable) {
        self.registry
            .samplers
            .lock()
            .entry(group.to_string())
            .or_default()
            .insert(
                name.to_string(),
                Sampler {
                    variable,
                    size: size.max(1),
                    values: VecDeque::with_capacity(size.max(1)),
                },
            );
    }

    /// Poll every sampler once.
    pub fn sample_now(&self) {
        self.registry.sample();
    }

    pub fn snapshot(&self) -> InstrumentationSnapshot {
        let timers = self
            .registry
            .timers
            .read()
            .iter()
            .map(|(group, entries)| {
                let entries = entries
                    .iter()
                    .map(|(name, stats)| (name.clone(), TimerSnapshot::from(stats)))
                    .collect();
                (group.clone(), entries)
            })
            .collect();
        let variables = self
            .registry
            .variables
            .read()
            .iter()
            .map(|(group, entries)| {
                let entries = entries
                    .iter()
                    .map(|(name, variable)| (name.clone(), variable()))
                    .collect();
                (group.clone(), entries)
            })
            .collect();
        let samplers = self
            .registry
            .samplers
            .lock()
            .iter()
            .map(|(group, entries)| {
                let entries = entries
                    .iter()
                    .map(|(name, sampler)| (name.clone(), sampler.average()))
                    .collect();
                (group.clone(), entries)
            })
            .collect();

        InstrumentationSnapshot {
            counters: self.registry.counters.read().clone(),
            timers,
            variables,
            samplers,
        }
    }
}

impl ServiceContract for InstrumentationService {
    fn identity(&self) -> ServiceId {
        Self::SERVICE_ID
    }

    fn init(&self, container: &ServiceContainer) -> Result<(), ServiceError> {
        let config = container.service_config(Self::SERVICE_ID);
        let key = "sampling.interval";
        let secs = match config.get_trimmed(key) {
            Some(value) => value
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or_else(|| ServiceError::invalid(key, value, "expected a positive number of seconds"))?,
            None => DEFAULT_SAMPLING_INTERVAL_SECS,
        };
        *self.interval.lock() = Duration::from_secs(secs);
        Ok(())
    }

    fn post_init(&self, _container: &ServiceContainer) -> Result<(), ServiceError> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("No async runtime, samplers are polled on demand only");
            return Ok(());
        };
        let registry = Arc::clone(&self.registry);
        let period = *self.interval.lock();
        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                registry.sample();
            }
        });
        if let Some(previous) = self.sampler_task.lock().replace(task) {
            previous.abort();
        }
        Ok(())
    }

    fn destroy(&self) -> Result<(), ServiceError> {
        if let Some(task) = self.sampler_task.lock().take() {
            task.abort();
        }
        Ok(())
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
