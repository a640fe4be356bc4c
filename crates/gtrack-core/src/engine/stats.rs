use super::config::{MoveKind, SamplerConfig};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::io::Write;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Run,
    RunAfterUpdate(StatsSnapshot),
    Done,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub iteration: u64,
    pub updates: u64,
    pub temperature: f64,
    pub internal_energy: f64,
    pub external_energy: f64,
    pub generated: [u64; 5],
    pub accepted: [u64; 5],
}

impl StatsSnapshot {
    pub fn overall_acceptance_rate(&self) -> f64 {
        let generated: u64 = self.generated.iter().sum();
        if generated == 0 {
            0.0
        } else {
            self.accepted.iter().sum::<u64>() as f64 / generated as f64
        }
    }

    pub fn acceptance_rate(&self, kind: MoveKind) -> f64 {
        let i = kind.index();
        if self.generated[i] == 0 {
            0.0
        } else {
            self.accepted[i] as f64 / self.generated[i] as f64
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "iter {} | T = {:.3e} | Eint = {:.4} | Eext = {:.4}",
            self.iteration, self.temperature, self.internal_energy, self.external_energy
        )?;
        for kind in MoveKind::ALL {
            write!(f, " | {} {:.3}", kind.name(), self.acceptance_rate(kind))?;
        }
        Ok(())
    }
}

type TrendWriter = csv::Writer<Box<dyn Write + Send>>;

struct Inner {
    temperature: f64,
    alpha: f64,
    update_interval: u64,
    max_iterations: u64,
    iteration: u64,
    updates: u64,
    internal_energy: f64,
    external_energy: f64,
    generated: [u64; 5],
    accepted: [u64; 5],
    trend: Option<TrendWriter>,
}

impl Inner {
    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            iteration: self.iteration,
            updates: self.updates,
            temperature: self.temperature,
            internal_energy: self.internal_energy,
            external_energy: self.external_energy,
            generated: self.generated,
            accepted: self.accepted,
        }
    }

    fn write_trend(&mut self) {
        let snapshot = self.snapshot();
        if let Some(writer) = self.trend.as_mut() {
            let rate = |kind| snapshot.acceptance_rate(kind);
            let row = TrendRow {
                iteration: snapshot.iteration,
                temperature: snapshot.temperature,
                internal_energy: snapshot.internal_energy,
                external_energy: snapshot.external_energy,
                birth_rate: rate(MoveKind::Birth),
                death_rate: rate(MoveKind::Death),
                randshift_rate: rate(MoveKind::RandShift),
                optshift_rate: rate(MoveKind::OptShift),
                connect_rate: rate(MoveKind::Connect),
            };
            if let Err(e) = writer.serialize(row) {
                warn!("Disabling trend log after write failure: {}", e);
                self.trend = None;
            }
        }
    }
}

#[derive(Serialize)]
struct TrendRow {
    iteration: u64,
    temperature: f64,
    internal_energy: f64,
    external_energy: f64,
    birth_rate: f64,
    death_rate: f64,
    randshift_rate: f64,
    optshift_rate: f64,
    connect_rate: f64,
}

pub struct Stats {
    inner: Mutex<Inner>,
}

impl fmt::Debug for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stats")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl Stats {
    pub fn new(t0: f64, t1: f64, iterations: u64, update_interval: u64) -> Self {
        let update_interval = update_interval.max(1);
        let total_updates = (iterations / update_interval).max(1);
        Self {
            inner: Mutex::new(Inner {
                temperature: t0,
                alpha: (t1 / t0).powf(1.0 / total_updates as f64),
                update_interval,
                max_iterations: iterations,
                iteration: 0,
                updates: 0,
                internal_energy: 0.0,
                external_energy: 0.0,
                generated: [0; 5],
                accepted: [0; 5],
                trend: None,
            }),
        }
    }

    pub fn from_config(config: &SamplerConfig) -> Self {
        Self::new(
            config.t0,
            config.t1,
            config.iterations,
            config.update_interval,
        )
    }

    pub fn with_trend_log(self, writer: Box<dyn Write + Send>) -> Self {
        self.inner.lock().trend = Some(csv::Writer::from_writer(writer));
        self
    }

    // T after k of n updates is T0 (T1 / T0)^(k / n).
    pub fn next(&self) -> Step {
        let mut inner = self.inner.lock();
        if inner.iteration >= inner.max_iterations {
            return Step::Done;
        }
        inner.iteration += 1;
        if inner.iteration % inner.update_interval != 0 {
            return Step::Run;
        }

        inner.temperature *= inner.alpha;
        inner.updates += 1;
        inner.write_trend();
        let snapshot = inner.snapshot();
        debug!("{}", snapshot);
        Step::RunAfterUpdate(snapshot)
    }

    pub fn inc_generated(&self, kind: MoveKind) {
        self.inner.lock().generated[kind.index()] += 1;
    }

    pub fn inc_accepted(&self, kind: MoveKind) {
        self.inner.lock().accepted[kind.index()] += 1;
    }

    pub fn generated(&self, kind: MoveKind) -> u64 {
        self.inner.lock().generated[kind.index()]
    }

    pub fn accepted(&self, kind: MoveKind) -> u64 {
        self.inner.lock().accepted[kind.index()]
    }

    pub fn acceptance_rate(&self, kind: MoveKind) -> f64 {
        self.snapshot().acceptance_rate(kind)
    }

    pub fn add_internal(&self, delta: f64) {
        self.inner.lock().internal_energy += delta;
    }

    pub fn add_external(&self, delta: f64) {
        self.inner.lock().external_energy += delta;
    }

    pub fn internal_energy(&self) -> f64 {
        self.inner.lock().internal_energy
    }

    pub fn external_energy(&self) -> f64 {
        self.inner.lock().external_energy
    }

    pub fn temperature(&self) -> f64 {
        self.inner.lock().temperature
    }

    pub fn iteration(&self) -> u64 {
        self.inner.lock().iteration
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.inner.lock().snapshot()
    }

    pub fn flush(&self) -> std::io::Result<()> {
        match self.inner.lock().trend.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}
