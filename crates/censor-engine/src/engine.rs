//! Classification engine
//!
//! Entry point for the host: one call per observed packet, one action back.
//! Packets of independent flows classify in parallel; packets of one flow
//! serialize on that flow's lock.

use crate::config::{ConfigError, EngineConfig};
use crate::decision::DecisionEngine;
use crate::heuristic::{Finding, HeuristicDetector};
use crate::oracle::{BoundedOracle, LinearOracle, ScoringOracle};
use crate::ports::PortPolicy;
use crate::stats::{EngineStats, EngineStatsSnapshot};
use crate::store::{FlowHandle, FlowState, FlowStateStore};
use crate::window::{FeatureWindow, WindowedFeatureAccumulator};
use censor_common::{Action, FlowKey, Packet};
use crossbeam::channel::{bounded, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Windowed model path
struct ModelClassifier {
    name: String,
    accumulator: WindowedFeatureAccumulator,
    decision: DecisionEngine,
    oracle: BoundedOracle,
}

enum Classifier {
    Heuristic(HeuristicDetector),
    Model(ModelClassifier),
}

/// Result of one packet on a locked flow
struct Step {
    action: Action,
    evict: bool,
}

impl Step {
    /// A dropped teardown never reaches the peer, so the flow stays
    /// tracked until the host ends it or it idles out.
    fn new(action: Action, closing: bool) -> Self {
        Self {
            action,
            evict: action == Action::Reset || (closing && action != Action::Drop),
        }
    }
}

/// Flow classification engine
pub struct CensorEngine {
    config: EngineConfig,
    classifier: Classifier,
    ports: PortPolicy,
    store: FlowStateStore,
    stats: EngineStats,
}

impl CensorEngine {
    /// Create new engine scoring windows with `oracle`
    ///
    /// The oracle is wrapped in a timeout-bounded worker pool. Fails if the
    /// configured model is unknown to the oracle or its geometry does not
    /// match the window and rules.
    pub fn new(config: EngineConfig, oracle: Arc<dyn ScoringOracle>) -> Result<Self, ConfigError> {
        Self::build(config, Some(oracle))
    }

    /// Create new engine without an oracle (heuristic classifier only)
    pub fn without_oracle(config: EngineConfig) -> Result<Self, ConfigError> {
        Self::build(config, None)
    }

    /// Create new engine, loading model files named by the config
    pub fn from_config(config: EngineConfig) -> Result<Self, ConfigError> {
        if config.active_model()?.is_some() {
            let oracle = LinearOracle::from_config(&config)?;
            Self::new(config, Arc::new(oracle))
        } else {
            Self::without_oracle(config)
        }
    }

    fn build(config: EngineConfig, oracle: Option<Arc<dyn ScoringOracle>>) -> Result<Self, ConfigError> {
        config.validate()?;

        let classifier = match config.active_model()? {
            None => Classifier::Heuristic(HeuristicDetector::from_config(&config.heuristic)),
            Some((name, model)) => {
                let oracle = oracle.ok_or_else(|| {
                    ConfigError::Invalid(format!("model classifier {} needs a scoring oracle", name))
                })?;
                let shape = oracle
                    .shape(name)
                    .ok_or_else(|| ConfigError::UnknownModel(name.to_string()))?;

                let accumulator = WindowedFeatureAccumulator::from_config(&config.window, model);
                if shape.input_len != accumulator.input_len() {
                    return Err(ConfigError::InputLengthMismatch {
                        model: name.to_string(),
                        expected: shape.input_len,
                        actual: accumulator.input_len(),
                    });
                }

                let decision = DecisionEngine::new(model.rules.clone());
                decision.validate(name, &shape)?;
                if decision.rules().is_empty() {
                    warn!(model = name, "model has no rules, every window will pass");
                }

                Classifier::Model(ModelClassifier {
                    name: name.to_string(),
                    accumulator,
                    decision,
                    oracle: BoundedOracle::spawn(oracle, &config.oracle)?,
                })
            }
        };

        let store = config
            .flows
            .shards
            .map_or_else(FlowStateStore::new, FlowStateStore::with_shards);

        match &classifier {
            Classifier::Heuristic(_) => info!(
                window = config.window.size,
                "Censor engine started with heuristic classifier"
            ),
            Classifier::Model(m) => info!(
                model = %m.name,
                window = m.accumulator.size(),
                inputs = m.accumulator.input_len(),
                rules = m.decision.rules().len(),
                "Censor engine started with model classifier"
            ),
        }

        Ok(Self {
            ports: PortPolicy::from_config(&config.ports),
            config,
            classifier,
            store,
            stats: EngineStats::default(),
        })
    }

    /// Classify one packet
    pub fn process(&self, packet: &Packet) -> Action {
        self.process_at(packet, Instant::now())
    }

    /// Classify one packet observed at `now`
    pub fn process_at(&self, packet: &Packet, now: Instant) -> Action {
        self.stats.record_packet(packet.payload_len());
        let action = self.classify(packet, now);
        self.stats.record_action(action);

        debug!(
            src = %packet.src,
            dst = %packet.dst,
            len = packet.payload_len(),
            action = %action,
            "packet classified"
        );
        action
    }

    /// Classify one packet and answer in the host's string protocol
    pub fn process_host(&self, packet: &Packet) -> Option<&'static str> {
        self.process(packet).as_host_str()
    }

    fn classify(&self, packet: &Packet, now: Instant) -> Action {
        if packet.protocol.has_ports() {
            if let Some(action) = self.ports.check(packet.src.port, packet.dst.port) {
                return action;
            }
        }

        let key = packet.flow_key();
        loop {
            let (handle, created) = self.store.get_or_create(&key, || {
                FlowState::new(key, packet.src, self.new_window(), now)
            });
            if created {
                self.stats.record_flow_created();
            }

            let mut state = handle.lock();
            if state.is_evicted() {
                // Lost a race with eviction; the key resolves to a fresh state shortly
                drop(state);
                thread::yield_now();
                continue;
            }

            let step = self.step(&mut state, packet, now);
            if step.evict {
                FlowStateStore::mark_evicted(&mut state);
            }
            drop(state);

            if step.evict {
                self.evict(&key, &handle);
            }
            return step.action;
        }
    }

    fn step(&self, state: &mut FlowState, packet: &Packet, now: Instant) -> Step {
        state.record(packet, now);
        let closing = packet.is_teardown() && self.config.flows.evict_on_close;

        if let Some(action) = state.latched() {
            self.stats.record_latched_hit();
            return Step::new(action, closing);
        }

        let action = match &self.classifier {
            Classifier::Heuristic(detector) => self.heuristic_step(detector, state, packet),
            Classifier::Model(model) => self.model_step(model, state, packet),
        };

        Step::new(action, closing)
    }

    fn heuristic_step(&self, detector: &HeuristicDetector, state: &mut FlowState, packet: &Packet) -> Action {
        if !packet.is_tcp() {
            return Action::Pass;
        }
        if packet.payload.is_empty() && !self.config.heuristic.inspect_empty_payloads {
            return Action::Pass;
        }

        match detector.inspect(&packet.payload, packet.src.port, packet.dst.port) {
            Finding::Obfuscated => {
                let action = self.config.heuristic.on_detect;
                if action == Action::Reset {
                    state.latch(action);
                    info!(flow = %state.key, "obfuscated payload, resetting connection");
                } else {
                    debug!(flow = %state.key, "obfuscated payload, dropping packet");
                }
                action
            }
            _ => Action::Pass,
        }
    }

    fn model_step(&self, model: &ModelClassifier, state: &mut FlowState, packet: &Packet) -> Action {
        let direction = state.direction_of(packet);
        if model.accumulator.push_packet(&mut state.window, packet, direction) {
            return self.score(model, state);
        }

        if packet.is_teardown() && self.config.window.score_partial_on_close && !state.window.is_empty() {
            return self.score(model, state);
        }

        Action::Pass
    }

    /// Flatten, evaluate and decide; the flow lock is held throughout
    fn score(&self, model: &ModelClassifier, state: &mut FlowState) -> Action {
        let features = model.accumulator.flatten(&state.window);
        state.windows_scored += 1;
        self.stats.record_oracle_call();

        match model.oracle.evaluate(&model.name, &features) {
            Ok(probs) => {
                let action = model.decision.decide(state, &probs);
                state.window.release();
                info!(
                    flow = %state.key,
                    model = %model.name,
                    packets = state.packets,
                    action = %action,
                    "flow classified"
                );
                action
            }
            Err(e) => {
                self.stats.record_oracle_failure();
                warn!(
                    flow = %state.key,
                    model = %model.name,
                    error = %e,
                    "oracle call failed, failing open"
                );
                model.decision.fail_open(state, self.config.oracle.rescore_on_failure)
            }
        }
    }

    fn new_window(&self) -> FeatureWindow {
        match &self.classifier {
            Classifier::Model(m) => m.accumulator.new_window(),
            Classifier::Heuristic(_) => FeatureWindow::default(),
        }
    }

    fn evict(&self, key: &FlowKey, handle: &FlowHandle) {
        if self.store.remove_handle(key, handle) {
            self.stats.record_flows_evicted(1);
            debug!(flow = %key, "flow evicted");
        }
    }

    /// Host-signalled teardown
    ///
    /// Scores a pending partial window when configured to, then evicts the
    /// flow. Returns the flow's final action, if it has one.
    pub fn end_flow(&self, key: &FlowKey) -> Option<Action> {
        let handle = self.store.get(key)?;
        let mut state = handle.lock();
        if state.is_evicted() {
            return None;
        }

        let action = match &self.classifier {
            Classifier::Model(model)
                if state.latched().is_none()
                    && self.config.window.score_partial_on_close
                    && !state.window.is_empty() =>
            {
                Some(self.score(model, &mut state))
            }
            _ => state.latched(),
        };

        FlowStateStore::mark_evicted(&mut state);
        drop(state);
        self.evict(key, &handle);
        action
    }

    /// Evict flows idle longer than the configured timeout
    pub fn sweep_idle(&self) -> usize {
        self.sweep_idle_at(Instant::now())
    }

    /// Evict flows idle at `now`
    pub fn sweep_idle_at(&self, now: Instant) -> usize {
        let timeout = self.config.flows.idle_timeout();
        let removed = self.store.sweep(|state| state.is_idle(timeout, now));
        self.stats.record_flows_evicted(removed as u64);
        if removed > 0 {
            debug!(removed, remaining = self.store.len(), "idle flows swept");
        }
        removed
    }

    /// Tracked flow count
    pub fn flow_count(&self) -> usize {
        self.store.len()
    }

    /// Latched action of a tracked flow
    pub fn flow_action(&self, key: &FlowKey) -> Option<Action> {
        self.store.get(key).and_then(|h| h.lock().latched())
    }

    /// Counter snapshot
    pub fn stats(&self) -> EngineStatsSnapshot {
        self.stats.snapshot()
    }

    /// Active configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Name of the scoring model, if the model classifier is active
    pub fn model_name(&self) -> Option<&str> {
        match &self.classifier {
            Classifier::Model(m) => Some(&m.name),
            Classifier::Heuristic(_) => None,
        }
    }
}

/// Background idle-flow sweeper
///
/// Stops when dropped.
pub struct Sweeper {
    shutdown: Option<Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Sweeper {
    /// Sweep `engine` every `interval`
    pub fn spawn(engine: Arc<CensorEngine>, interval: Duration) -> std::io::Result<Self> {
        let (tx, rx) = bounded::<()>(0);

        let thread = thread::Builder::new()
            .name("censor-sweeper".into())
            .spawn(move || {
                debug!("Sweeper started, interval {:?}", interval);
                while let Err(RecvTimeoutError::Timeout) = rx.recv_timeout(interval) {
                    engine.sweep_idle();
                }
                debug!("Sweeper stopped");
            })?;

        Ok(Self {
            shutdown: Some(tx),
            thread: Some(thread),
        })
    }

    /// Sweep at the interval from `[flows]`
    pub fn from_config(engine: Arc<CensorEngine>) -> std::io::Result<Self> {
        let interval = engine.config().flows.sweep_interval();
        Self::spawn(engine, interval)
    }

    /// Stop and wait for the thread
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.stop();
    }
}
