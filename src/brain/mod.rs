//! Intent interpreter: calls the reasoning service for the selected tier
//! and turns its output into a structured decision.
//!
//! Timeouts and malformed output are recoverable by construction: they
//! collapse into a clarification decision, never an error that could stall
//! the pipeline.

pub mod prompts;

use crate::error::{Result, WingmanError};
use crate::routing::RoutingClass;
use crate::transcribe::Transcript;
use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Capability/cost level of the reasoning service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningTier {
    /// Cheapest tier for trivial commands.
    Fast,
    /// Mid tier, constrained by a matched template.
    Standard,
    /// Highest-capability tier with an enlarged context window.
    Deep,
}

impl ReasoningTier {
    /// Tier selection from the routing class.
    pub fn for_routing(routing: &RoutingClass) -> Self {
        match routing {
            RoutingClass::Trivial => ReasoningTier::Fast,
            RoutingClass::Template(_) => ReasoningTier::Standard,
            RoutingClass::Novel => ReasoningTier::Deep,
        }
    }
}

impl std::fmt::Display for ReasoningTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReasoningTier::Fast => write!(f, "fast"),
            ReasoningTier::Standard => write!(f, "standard"),
            ReasoningTier::Deep => write!(f, "deep"),
        }
    }
}

/// Workload estimate a tier may attach to an action so the compute router
/// can place it. Absent for plain shell work.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadHint {
    /// Estimated element count processed.
    pub element_count: u64,
    /// Estimated wall-clock duration in seconds.
    pub est_duration_secs: u64,
    /// Whether client-side execution is acceptable.
    pub client_ok: bool,
    /// Whether the workload is neural-network inference.
    pub inference: bool,
}

impl Default for WorkloadHint {
    fn default() -> Self {
        Self {
            element_count: 0,
            est_duration_secs: 0,
            client_ok: false,
            inference: false,
        }
    }
}

impl WorkloadHint {
    /// Convert to the compute router's input type.
    pub fn to_profile(self) -> crate::compute::ActionProfile {
        crate::compute::ActionProfile {
            element_count: self.element_count,
            est_duration: std::time::Duration::from_secs(self.est_duration_secs),
            client_ok: self.client_ok,
            inference: self.inference,
        }
    }
}

/// Structured decision returned by a reasoning tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Text to speak back, if any.
    pub speak: Option<String>,
    /// Action to dispatch, if any.
    pub action: Option<String>,
    /// Confidence, 0.0..=1.0.
    pub confidence: f32,
    /// True when the service needs clarification; forces `action` to be
    /// absent.
    pub needs_input: bool,
    /// Optional workload estimate for heavy actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<WorkloadHint>,
}

impl Decision {
    /// A decision that only speaks.
    pub fn speak_only(text: &str, confidence: f32) -> Self {
        Self {
            speak: Some(text.to_string()),
            action: None,
            confidence,
            needs_input: false,
            profile: None,
        }
    }

    /// A decision that dispatches an action.
    pub fn act(action: &str, speak: Option<&str>, confidence: f32) -> Self {
        Self {
            speak: speak.map(|s| s.to_string()),
            action: Some(action.to_string()),
            confidence,
            needs_input: false,
            profile: None,
        }
    }

    /// The fallback when reasoning times out or returns garbage.
    pub fn clarification() -> Self {
        Self {
            speak: Some("Sorry, could you say that again?".to_string()),
            action: None,
            confidence: 0.0,
            needs_input: true,
            profile: None,
        }
    }

    /// Parse a raw service response.
    ///
    /// Tolerates prose or code fences around the JSON object; enforces the
    /// needs-input invariant and clamps confidence.
    pub fn parse(raw: &str) -> Result<Self> {
        let json = extract_json(raw).ok_or_else(|| {
            WingmanError::ReasoningError("response contains no JSON object".into())
        })?;

        let mut decision: Decision = serde_json::from_str(json)
            .map_err(|e| WingmanError::ReasoningError(format!("malformed decision: {}", e)))?;

        decision.sanitize();
        Ok(decision)
    }

    fn sanitize(&mut self) {
        self.confidence = self.confidence.clamp(0.0, 1.0);
        if self.needs_input && self.action.is_some() {
            warn!("decision requested input while carrying an action; dropping the action");
            self.action = None;
            self.profile = None;
        }
        // Treat empty strings as absent
        if self.speak.as_deref().is_some_and(|s| s.trim().is_empty()) {
            self.speak = None;
        }
        if self.action.as_deref().is_some_and(|s| s.trim().is_empty()) {
            self.action = None;
        }
    }
}

/// Find the outermost JSON object in a response.
fn extract_json(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end > start {
        Some(&raw[start..=end])
    } else {
        None
    }
}

/// Per-tier invocation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TierConfig {
    /// Service command; the assembled prompt is appended as the final
    /// argument (or substituted for `{prompt}`).
    pub command: Vec<String>,
    /// Bounded call timeout in milliseconds.
    pub timeout_ms: u64,
    /// How many recent exchanges to include as context.
    pub context_exchanges: usize,
}

impl TierConfig {
    fn preset(model: &str, timeout_ms: u64, context_exchanges: usize) -> Self {
        Self {
            command: vec![
                "claude".into(),
                "--model".into(),
                model.into(),
                "-p".into(),
            ],
            timeout_ms,
            context_exchanges,
        }
    }
}

impl Default for TierConfig {
    fn default() -> Self {
        Self::preset("sonnet", 30_000, 8)
    }
}

/// Reasoning configuration across the three tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasonerConfig {
    pub fast: TierConfig,
    pub standard: TierConfig,
    pub deep: TierConfig,
    /// Optional command whose stdout enriches the prompt with workspace
    /// context (projects, tickets); failures are tolerated.
    pub context_command: Option<Vec<String>>,
    /// Timeout for the context command in milliseconds.
    pub context_timeout_ms: u64,
    /// Raise every request to at least the deep tier (enhanced mode).
    pub enhanced: bool,
}

impl Default for ReasonerConfig {
    fn default() -> Self {
        Self {
            fast: TierConfig::preset("haiku", 10_000, 4),
            standard: TierConfig::preset("sonnet", 30_000, 8),
            deep: TierConfig::preset("opus", 60_000, 16),
            context_command: None,
            context_timeout_ms: 2_000,
            enhanced: false,
        }
    }
}

impl ReasonerConfig {
    /// Settings for the given tier.
    pub fn tier(&self, tier: ReasoningTier) -> &TierConfig {
        match tier {
            ReasoningTier::Fast => &self.fast,
            ReasoningTier::Standard => &self.standard,
            ReasoningTier::Deep => &self.deep,
        }
    }

    /// Apply the enhanced-capability floor.
    pub fn effective_tier(&self, tier: ReasoningTier) -> ReasoningTier {
        if self.enhanced {
            ReasoningTier::Deep
        } else {
            tier
        }
    }
}

/// Reasoning service seam.
pub trait Reasoner: Send + Sync {
    /// Run one completion at the given tier, returning the raw response.
    fn complete(&self, prompt: &str, tier: ReasoningTier) -> Result<String>;

    /// Fetch workspace context, if the service provides any.
    fn workspace_context(&self) -> Option<String> {
        None
    }
}

/// Reasoner that shells out to an external CLI per tier.
pub struct CliReasoner {
    config: ReasonerConfig,
    runtime: tokio::runtime::Runtime,
}

impl CliReasoner {
    /// Build from reasoning configuration.
    pub fn new(config: ReasonerConfig) -> Result<Self> {
        for tier in [
            ReasoningTier::Fast,
            ReasoningTier::Standard,
            ReasoningTier::Deep,
        ] {
            if config.tier(tier).command.is_empty() {
                return Err(WingmanError::ConfigError(format!(
                    "reasoner command for tier '{}' is empty",
                    tier
                )));
            }
        }
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| WingmanError::ConfigError(format!("runtime creation failed: {}", e)))?;

        Ok(Self { config, runtime })
    }

    fn run_command(&self, command: &[String], timeout: Duration) -> Result<String> {
        self.runtime.block_on(async {
            let mut cmd = tokio::process::Command::new(&command[0]);
            cmd.args(&command[1..])
                .stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::piped())
                .stderr(std::process::Stdio::null())
                .kill_on_drop(true);

            let child = cmd.spawn().map_err(|e| {
                WingmanError::ReasoningError(format!("failed to spawn {}: {}", command[0], e))
            })?;

            match tokio::time::timeout(timeout, child.wait_with_output()).await {
                Ok(Ok(output)) => {
                    if !output.status.success() {
                        return Err(WingmanError::ReasoningError(format!(
                            "service exited with {}",
                            output.status
                        )));
                    }
                    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
                }
                Ok(Err(e)) => Err(WingmanError::ReasoningError(e.to_string())),
                Err(_) => Err(WingmanError::ReasoningTimeout(timeout.as_millis() as u64)),
            }
        })
    }
}

impl Reasoner for CliReasoner {
    fn complete(&self, prompt: &str, tier: ReasoningTier) -> Result<String> {
        let tier_config = self.config.tier(tier);

        let mut command: Vec<String> = tier_config.command.clone();
        let mut substituted = false;
        for arg in &mut command {
            if arg.contains("{prompt}") {
                *arg = arg.replace("{prompt}", prompt);
                substituted = true;
            }
        }
        if !substituted {
            command.push(prompt.to_string());
        }

        self.run_command(&command, Duration::from_millis(tier_config.timeout_ms))
    }

    fn workspace_context(&self) -> Option<String> {
        let command = self.config.context_command.as_ref()?;
        if command.is_empty() {
            return None;
        }
        match self.run_command(
            command,
            Duration::from_millis(self.config.context_timeout_ms),
        ) {
            Ok(output) => Some(output),
            Err(e) => {
                debug!("workspace context unavailable: {}", e);
                None
            }
        }
    }
}

/// Scripted reasoner for tests.
///
/// Returns a fixed response, or one scripted response per call (repeating
/// the last once exhausted).
pub struct MockReasoner {
    responses: parking_lot::Mutex<std::collections::VecDeque<String>>,
    last: parking_lot::Mutex<String>,
    delay: Duration,
    fail: bool,
    timeout: bool,
}

impl MockReasoner {
    /// Mock returning a fixed raw response.
    pub fn new(response: &str) -> Self {
        Self {
            responses: parking_lot::Mutex::new(std::collections::VecDeque::new()),
            last: parking_lot::Mutex::new(response.to_string()),
            delay: Duration::ZERO,
            fail: false,
            timeout: false,
        }
    }

    /// Convenience: mock returning a well-formed decision.
    pub fn deciding(decision: &Decision) -> Self {
        Self::new(&serde_json::to_string(decision).expect("decision serializes"))
    }

    /// Mock returning one decision per call, in order.
    pub fn scripted(decisions: &[Decision]) -> Self {
        let serialized: Vec<String> = decisions
            .iter()
            .map(|d| serde_json::to_string(d).expect("decision serializes"))
            .collect();
        let mock = Self::new(serialized.last().map(String::as_str).unwrap_or("{}"));
        *mock.responses.lock() = serialized.into_iter().collect();
        mock
    }

    /// Sleep before responding.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail every call.
    pub fn with_failure(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Time out every call.
    pub fn with_timeout(mut self) -> Self {
        self.timeout = true;
        self
    }
}

impl Reasoner for MockReasoner {
    fn complete(&self, _prompt: &str, _tier: ReasoningTier) -> Result<String> {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        if self.timeout {
            return Err(WingmanError::ReasoningTimeout(0));
        }
        if self.fail {
            return Err(WingmanError::ReasoningError("mock reasoning failure".into()));
        }
        let response = match self.responses.lock().pop_front() {
            Some(next) => {
                *self.last.lock() = next.clone();
                next
            }
            None => self.last.lock().clone(),
        };
        Ok(response)
    }
}

/// One interpretation request, prepared by the orchestrator.
#[derive(Debug)]
pub struct BrainRequest {
    /// The accepted transcript.
    pub transcript: Transcript,
    /// Routing class already assigned.
    pub routing: RoutingClass,
    /// Context lines from the most recent exchanges, oldest first.
    pub history_lines: Vec<String>,
}

/// Events emitted by the brain worker.
#[derive(Debug)]
pub enum BrainEvent {
    /// Interpretation finished (possibly via the clarification fallback).
    DecisionReady {
        transcript: Transcript,
        routing: RoutingClass,
        tier: ReasoningTier,
        decision: Decision,
        elapsed_ms: u64,
        /// The bounded reasoning call hit its timeout.
        timed_out: bool,
    },
    /// Worker has shut down.
    Shutdown,
}

/// Worker that drains the interpretation queue strictly in enqueue order.
pub struct BrainWorker<R: Reasoner + 'static> {
    config: ReasonerConfig,
    reasoner: R,
    request_rx: Receiver<BrainRequest>,
    event_tx: Sender<BrainEvent>,
}

impl<R: Reasoner + 'static> BrainWorker<R> {
    /// Create a worker over the request queue.
    pub fn new(
        config: ReasonerConfig,
        reasoner: R,
        request_rx: Receiver<BrainRequest>,
        event_tx: Sender<BrainEvent>,
    ) -> Self {
        Self {
            config,
            reasoner,
            request_rx,
            event_tx,
        }
    }

    /// Start the worker thread.
    pub fn start(self) -> JoinHandle<()> {
        thread::spawn(move || {
            info!(enhanced = self.config.enhanced, "brain worker starting");

            while let Ok(request) = self.request_rx.recv() {
                let event = self.interpret(request);
                if self.event_tx.send(event).is_err() {
                    break;
                }
            }

            let _ = self.event_tx.send(BrainEvent::Shutdown);
            info!("brain worker stopped");
        })
    }

    fn interpret(&self, request: BrainRequest) -> BrainEvent {
        let tier = self
            .config
            .effective_tier(ReasoningTier::for_routing(&request.routing));
        let tier_config = self.config.tier(tier);

        let context_window = tier_config.context_exchanges.min(request.history_lines.len());
        let history_start = request.history_lines.len() - context_window;

        let template = match &request.routing {
            RoutingClass::Template(name) => Some(name.as_str()),
            _ => None,
        };

        let workspace = self.reasoner.workspace_context();
        let prompt = prompts::build_prompt(
            workspace.as_deref(),
            &request.history_lines[history_start..],
            &request.transcript.text,
            template,
        );

        debug!(
            tier = %tier,
            routing = %request.routing,
            prompt_len = prompt.len(),
            "interpreting transcript"
        );

        let started = Instant::now();
        let (decision, timed_out) = match self.reasoner.complete(&prompt, tier) {
            Ok(raw) => match Decision::parse(&raw) {
                Ok(decision) => (decision, false),
                Err(e) => {
                    warn!("reasoning output unusable: {}", e);
                    (Decision::clarification(), false)
                }
            },
            Err(WingmanError::ReasoningTimeout(ms)) => {
                warn!(tier = %tier, ceiling_ms = ms, "reasoning timed out");
                (Decision::clarification(), true)
            }
            Err(e) => {
                warn!("reasoning failed: {}", e);
                (Decision::clarification(), false)
            }
        };

        BrainEvent::DecisionReady {
            transcript: request.transcript,
            routing: request.routing,
            tier,
            decision,
            elapsed_ms: started.elapsed().as_millis() as u64,
            timed_out,
        }
    }
}
