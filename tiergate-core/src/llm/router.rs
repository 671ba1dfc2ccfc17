//! Task-aware tier router.
//!
//! Classifies the last user message into a [`TaskType`] and picks a [`Tier`]:
//! - Exact vocabulary match on a task phrase (confidence 0.9)
//! - Domain keyword mapped straight to a tier (confidence 0.8)
//! - Generic complexity keyword buckets (confidence 0.7)
//! - Default task type (confidence 0.5)
//!
//! The chosen tier is bumped one step when the estimated context size does not
//! fit the tier's configured limit.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};

use super::config::TierTable;
use super::types::{estimate_tokens, ChatMessage, ChatRole, Tier};

const HISTORY_CAPACITY: usize = 1_000;

/// Task classification for routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Look up a constant, equation, or definition
    Lookup,
    /// Unit conversion
    Conversion,
    /// Numeric calculation
    Calculation,
    /// Conceptual explanation
    Explanation,
    /// Step-by-step derivation
    Derivation,
    /// Writing or reviewing code
    Code,
    /// Formal proof
    Proof,
    /// Open-ended research question
    Research,
    /// Anything else
    General,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lookup => "lookup",
            Self::Conversion => "conversion",
            Self::Calculation => "calculation",
            Self::Explanation => "explanation",
            Self::Derivation => "derivation",
            Self::Code => "code",
            Self::Proof => "proof",
            Self::Research => "research",
            Self::General => "general",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which rule produced a routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteSource {
    /// Caller forced the tier
    Forced,
    /// Caller supplied the task type
    Explicit,
    /// Task vocabulary phrase
    Vocabulary,
    /// Domain keyword table
    Domain,
    /// Complexity keyword bucket
    Complexity,
    /// Nothing matched
    Default,
}

impl RouteSource {
    pub fn confidence(&self) -> f64 {
        match self {
            Self::Forced | Self::Explicit => 1.0,
            Self::Vocabulary => 0.9,
            Self::Domain => 0.8,
            Self::Complexity => 0.7,
            Self::Default => 0.5,
        }
    }
}

/// Why a request moved to a higher tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    /// Estimated prompt tokens exceed the tier's context limit
    ContextOverflow,
    /// Response contained a low-confidence signal
    LowConfidence,
    /// The backend returned an error response
    BackendError,
    /// The quality gate asked for a stronger tier
    QualityGate,
}

impl std::fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ContextOverflow => write!(f, "context_overflow"),
            Self::LowConfidence => write!(f, "low_confidence"),
            Self::BackendError => write!(f, "backend_error"),
            Self::QualityGate => write!(f, "quality_gate"),
        }
    }
}

/// Keyword buckets for the generic complexity fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexityBuckets {
    pub simple: Vec<String>,
    pub moderate: Vec<String>,
    pub complex: Vec<String>,
}

impl Default for ComplexityBuckets {
    fn default() -> Self {
        Self {
            simple: strings(&["quick", "brief", "simple", "short answer", "one line", "just"]),
            moderate: strings(&["compare", "why", "how does", "analyze", "step by step"]),
            complex: strings(&[
                "rigorous",
                "comprehensive",
                "in depth",
                "in-depth",
                "thorough",
                "from first principles",
            ]),
        }
    }
}

/// Routing tables. Every table is plain data so it can be loaded from config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Phrase → task type, checked in order by substring
    pub task_vocabulary: Vec<(String, TaskType)>,
    /// Domain keyword → tier, checked in order on word boundaries
    pub domain_tiers: Vec<(String, Tier)>,
    pub complexity: ComplexityBuckets,
    /// Base tier per task type; missing entries use `default_tier`
    pub task_tiers: HashMap<TaskType, Tier>,
    pub default_task: TaskType,
    pub default_tier: Tier,
}

impl Default for RouterConfig {
    fn default() -> Self {
        let task_vocabulary = [
            ("convert", TaskType::Conversion),
            ("unit conversion", TaskType::Conversion),
            ("derive", TaskType::Derivation),
            ("derivation", TaskType::Derivation),
            ("prove", TaskType::Proof),
            ("proof", TaskType::Proof),
            ("write code", TaskType::Code),
            ("python", TaskType::Code),
            ("script", TaskType::Code),
            ("simulate", TaskType::Code),
            ("calculate", TaskType::Calculation),
            ("compute", TaskType::Calculation),
            ("solve", TaskType::Calculation),
            ("explain", TaskType::Explanation),
            ("value of", TaskType::Lookup),
            ("look up", TaskType::Lookup),
            ("what is the formula", TaskType::Lookup),
            ("literature", TaskType::Research),
            ("state of the art", TaskType::Research),
        ]
        .into_iter()
        .map(|(phrase, task)| (phrase.to_string(), task))
        .collect();

        let domain_tiers = [
            ("quantum field", Tier::C),
            ("general relativity", Tier::C),
            ("renormalization", Tier::C),
            ("tensor", Tier::C),
            ("lagrangian", Tier::C),
            ("hamiltonian", Tier::C),
            ("quantum", Tier::B),
            ("thermodynamics", Tier::B),
            ("electromagnetism", Tier::B),
            ("maxwell", Tier::B),
            ("optics", Tier::B),
            ("kinematics", Tier::A),
            ("ohm", Tier::A),
            ("density", Tier::A),
        ]
        .into_iter()
        .map(|(keyword, tier)| (keyword.to_string(), tier))
        .collect();

        let task_tiers = HashMap::from([
            (TaskType::Lookup, Tier::A),
            (TaskType::Conversion, Tier::A),
            (TaskType::Calculation, Tier::B),
            (TaskType::Explanation, Tier::B),
            (TaskType::Code, Tier::B),
            (TaskType::Derivation, Tier::C),
            (TaskType::Proof, Tier::C),
            (TaskType::Research, Tier::C),
            (TaskType::General, Tier::B),
        ]);

        Self {
            task_vocabulary,
            domain_tiers,
            complexity: ComplexityBuckets::default(),
            task_tiers,
            default_task: TaskType::General,
            default_tier: Tier::B,
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Routing decision output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub id: Uuid,
    pub tier: Tier,
    pub task_type: TaskType,
    pub confidence: f64,
    pub source: RouteSource,
    /// Tier before context escalation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalated_from: Option<Tier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_reason: Option<EscalationReason>,
    pub estimated_tokens: u64,
    pub timestamp: DateTime<Utc>,
}

impl RouteDecision {
    pub fn is_escalated(&self) -> bool {
        self.escalated_from.is_some()
    }
}

/// Aggregate routing statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouterStats {
    pub total: u64,
    pub by_tier: HashMap<Tier, u64>,
    pub by_task: HashMap<TaskType, u64>,
    pub by_source: HashMap<RouteSource, u64>,
    pub context_escalations: u64,
}

impl RouterStats {
    fn record(&mut self, decision: &RouteDecision) {
        self.total += 1;
        *self.by_tier.entry(decision.tier).or_default() += 1;
        *self.by_task.entry(decision.task_type).or_default() += 1;
        *self.by_source.entry(decision.source).or_default() += 1;
        if decision.escalation_reason == Some(EscalationReason::ContextOverflow) {
            self.context_escalations += 1;
        }
    }
}

/// Compiled keyword matchers.
struct Matchers {
    domains: Vec<(Regex, Tier)>,
    simple: Option<Regex>,
    moderate: Option<Regex>,
    complex: Option<Regex>,
}

fn keyword_regex(keywords: &[String]) -> Result<Option<Regex>> {
    let alternatives: Vec<String> = keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .map(|k| regex::escape(&k.to_lowercase()))
        .collect();
    if alternatives.is_empty() {
        return Ok(None);
    }
    Regex::new(&format!(r"\b(?:{})\b", alternatives.join("|")))
        .map(Some)
        .map_err(|e| Error::config(format!("invalid keyword pattern: {}", e)))
}

impl Matchers {
    fn compile(config: &RouterConfig) -> Result<Self> {
        let mut domains = Vec::with_capacity(config.domain_tiers.len());
        for (keyword, tier) in &config.domain_tiers {
            if let Some(re) = keyword_regex(std::slice::from_ref(keyword))? {
                domains.push((re, *tier));
            }
        }
        Ok(Self {
            domains,
            simple: keyword_regex(&config.complexity.simple)?,
            moderate: keyword_regex(&config.complexity.moderate)?,
            complex: keyword_regex(&config.complexity.complex)?,
        })
    }
}

/// Tier router.
pub struct Router {
    config: RouterConfig,
    tiers: TierTable,
    matchers: Matchers,
    history: Mutex<VecDeque<RouteDecision>>,
    stats: Mutex<RouterStats>,
}

impl Router {
    /// Create a router, compiling its keyword tables.
    pub fn new(config: RouterConfig, tiers: TierTable) -> Result<Self> {
        let matchers = Matchers::compile(&config)?;
        Ok(Self {
            config,
            tiers,
            matchers,
            history: Mutex::new(VecDeque::new()),
            stats: Mutex::new(RouterStats::default()),
        })
    }

    /// Route a conversation to a tier. Never fails.
    pub fn route(
        &self,
        messages: &[ChatMessage],
        explicit_task: Option<TaskType>,
        forced_tier: Option<Tier>,
    ) -> RouteDecision {
        let estimated_tokens = estimate_tokens(messages);

        let decision = if let Some(tier) = forced_tier {
            RouteDecision {
                id: Uuid::new_v4(),
                tier,
                task_type: explicit_task.unwrap_or(self.config.default_task),
                confidence: RouteSource::Forced.confidence(),
                source: RouteSource::Forced,
                escalated_from: None,
                escalation_reason: None,
                estimated_tokens,
                timestamp: Utc::now(),
            }
        } else {
            let (task_type, base_tier, source) = match explicit_task {
                Some(task) => (task, self.tier_for_task(task), RouteSource::Explicit),
                None => self.classify(last_user_message(messages)),
            };
            self.apply_context_limit(task_type, base_tier, source, estimated_tokens)
        };

        debug!(
            tier = %decision.tier,
            task = %decision.task_type,
            confidence = decision.confidence,
            tokens = estimated_tokens,
            "route decision"
        );
        self.record(&decision);
        decision
    }

    /// Classify a query into (task type, base tier, rule).
    pub fn classify(&self, query: &str) -> (TaskType, Tier, RouteSource) {
        let query = query.to_lowercase();

        if let Some((_, task)) = self
            .config
            .task_vocabulary
            .iter()
            .find(|(phrase, _)| !phrase.is_empty() && query.contains(&phrase.to_lowercase()))
        {
            return (*task, self.tier_for_task(*task), RouteSource::Vocabulary);
        }

        if let Some((_, tier)) = self.matchers.domains.iter().find(|(re, _)| re.is_match(&query)) {
            return (self.config.default_task, *tier, RouteSource::Domain);
        }

        let bucket = [
            (&self.matchers.complex, Tier::C),
            (&self.matchers.moderate, Tier::B),
            (&self.matchers.simple, Tier::A),
        ]
        .into_iter()
        .find(|(re, _)| matches!(re, Some(re) if re.is_match(&query)));
        if let Some((_, tier)) = bucket {
            return (self.config.default_task, tier, RouteSource::Complexity);
        }

        let task = self.config.default_task;
        (task, self.tier_for_task(task), RouteSource::Default)
    }

    /// Base tier for a task type.
    pub fn tier_for_task(&self, task: TaskType) -> Tier {
        self.config
            .task_tiers
            .get(&task)
            .copied()
            .unwrap_or(self.config.default_tier)
    }

    fn apply_context_limit(
        &self,
        task_type: TaskType,
        tier: Tier,
        source: RouteSource,
        estimated_tokens: u64,
    ) -> RouteDecision {
        let limit = self.tiers.get(tier).max_context_tokens;
        let (final_tier, escalated_from, reason) = match tier.next() {
            Some(next) if estimated_tokens > limit => {
                (next, Some(tier), Some(EscalationReason::ContextOverflow))
            }
            _ => (tier, None, None),
        };

        RouteDecision {
            id: Uuid::new_v4(),
            tier: final_tier,
            task_type,
            confidence: source.confidence(),
            source,
            escalated_from,
            escalation_reason: reason,
            estimated_tokens,
            timestamp: Utc::now(),
        }
    }

    fn record(&self, decision: &RouteDecision) {
        self.stats.lock().record(decision);
        let mut history = self.history.lock();
        if history.len() == HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(decision.clone());
    }

    pub fn stats(&self) -> RouterStats {
        self.stats.lock().clone()
    }

    /// Most recent decisions, oldest first.
    pub fn recent_decisions(&self, limit: usize) -> Vec<RouteDecision> {
        let history = self.history.lock();
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    pub fn tiers(&self) -> &TierTable {
        &self.tiers
    }
}

fn last_user_message(messages: &[ChatMessage]) -> &str {
    messages
        .iter()
        .rev()
        .find(|m| m.role == ChatRole::User)
        .map(|m| m.content.as_str())
        .unwrap_or("")
}
