//! Quality and drift monitor
//!
//! Scores every completed invocation from six content signals, keeps a
//! per-model ring buffer of assessments for trend analysis, and raises
//! drift and degradation alerts against configurable baselines. A pure
//! consumer of responses: it never mutates routing, but its alerts feed
//! the rollback manager through the orchestrator.

use crate::clock::SharedClock;
use crate::config::QualityConfig;
use crate::types::{Request, Response};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::RwLock;
use tokio::sync::broadcast;

/// The six quality signals, each in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QualitySignals {
    pub coherence: f64,
    pub relevance: f64,
    pub factuality: f64,
    pub completeness: f64,
    pub toxicity: f64,
    pub bias: f64,
}

impl QualitySignals {
    /// Weighted scalar score, clamped to [0, 1]. Toxicity and bias are
    /// penalties.
    pub fn score(&self) -> f64 {
        let raw = 0.20 * self.coherence
            + 0.25 * self.relevance
            + 0.20 * self.factuality
            + 0.10 * self.completeness
            - 0.15 * self.toxicity
            - 0.10 * self.bias;
        raw.clamp(0.0, 1.0)
    }
}

/// One scored response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityAssessment {
    pub score: f64,
    pub signals: QualitySignals,
    pub latency_ms: u64,
    pub prompt_chars: usize,
    pub response_chars: usize,
    pub at_ms: u64,
}

/// What kind of shift an alert describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityAlertKind {
    DataDrift,
    PromptDrift,
    PerformanceRegression,
    QualityDegradation,
}

/// Alert severity mirrors the monitor's two levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityAlertSeverity {
    Warning,
    Critical,
}

/// One quality alert, published on the monitor's bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityAlert {
    pub model_id: String,
    pub kind: QualityAlertKind,
    pub severity: QualityAlertSeverity,
    pub measured: f64,
    pub reference: f64,
    pub at_ms: u64,
}

/// Summary of one model's recent quality.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QualityTrend {
    pub assessments: usize,
    pub mean_score: f64,
    /// Mean of the newer half minus mean of the older half.
    pub half_delta: f64,
}

/// The quality monitor.
pub struct QualityMonitor {
    config: QualityConfig,
    clock: SharedClock,
    windows: DashMap<String, RwLock<VecDeque<QualityAssessment>>>,
    baselines: DashMap<String, f64>,
    alert_tx: broadcast::Sender<QualityAlert>,
}

impl QualityMonitor {
    pub fn new(config: QualityConfig, clock: SharedClock) -> Self {
        let (alert_tx, _) = broadcast::channel(64);
        Self {
            config,
            clock,
            windows: DashMap::new(),
            baselines: DashMap::new(),
            alert_tx,
        }
    }

    /// Subscribe to quality alerts.
    pub fn subscribe(&self) -> broadcast::Receiver<QualityAlert> {
        self.alert_tx.subscribe()
    }

    /// Score one completed response and fold it into the model's window.
    pub fn assess(&self, request: &Request, response: &Response) -> QualityAssessment {
        let signals = score_signals(&request.prompt, &response.text);
        let assessment = QualityAssessment {
            score: signals.score(),
            signals,
            latency_ms: response.latency_ms,
            prompt_chars: request.prompt.chars().count(),
            response_chars: response.text.chars().count(),
            at_ms: self.clock.now_ms(),
        };

        let entry = self
            .windows
            .entry(response.model_id.clone())
            .or_insert_with(|| RwLock::new(VecDeque::new()));
        {
            let mut window = match entry.value().write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            window.push_back(assessment);
            while window.len() > self.config.window_size {
                window.pop_front();
            }
        }
        drop(entry);

        metrics::histogram!(
            "conductor_quality_score",
            "model" => response.model_id.clone(),
        )
        .record(assessment.score);

        self.check_alerts(&response.model_id);
        assessment
    }

    /// Fix the model's baseline to its current mean score.
    pub fn set_baseline_from_window(&self, model_id: &str) -> Option<f64> {
        let trend = self.trend(model_id)?;
        self.baselines.insert(model_id.to_string(), trend.mean_score);
        Some(trend.mean_score)
    }

    /// Set an explicit baseline score.
    pub fn set_baseline(&self, model_id: &str, score: f64) {
        self.baselines.insert(model_id.to_string(), score.clamp(0.0, 1.0));
    }

    /// Current trend for a model, None before any assessment.
    pub fn trend(&self, model_id: &str) -> Option<QualityTrend> {
        let entry = self.windows.get(model_id)?;
        let window = match entry.value().read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if window.is_empty() {
            return None;
        }

        let scores: Vec<f64> = window.iter().map(|a| a.score).collect();
        let mean = scores.iter().sum::<f64>() / scores.len() as f64;
        let half = scores.len() / 2;
        let half_delta = if half >= 1 {
            let older = scores[..half].iter().sum::<f64>() / half as f64;
            let newer = scores[half..].iter().sum::<f64>() / (scores.len() - half) as f64;
            newer - older
        } else {
            0.0
        };

        Some(QualityTrend {
            assessments: scores.len(),
            mean_score: mean,
            half_delta,
        })
    }

    fn check_alerts(&self, model_id: &str) {
        let Some(entry) = self.windows.get(model_id) else {
            return;
        };
        let window = match entry.value().read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Trend analysis needs both halves populated.
        if window.len() < 40 {
            return;
        }

        let half = window.len() / 2;
        let older: Vec<&QualityAssessment> = window.iter().take(half).collect();
        let newer: Vec<&QualityAssessment> = window.iter().skip(half).collect();

        let mean =
            |items: &[&QualityAssessment], f: fn(&QualityAssessment) -> f64| -> f64 {
                items.iter().map(|a| f(a)).sum::<f64>() / items.len() as f64
            };

        let mut alerts = Vec::new();

        // Quality degradation against the baseline (or the older half when
        // no baseline was pinned).
        let newer_score = mean(&newer, |a| a.score);
        let reference_score = self
            .baselines
            .get(model_id)
            .map(|b| *b)
            .unwrap_or_else(|| mean(&older, |a| a.score));
        let drop = reference_score - newer_score;
        if drop >= self.config.degradation_warning {
            alerts.push((
                QualityAlertKind::QualityDegradation,
                newer_score,
                reference_score,
                drop >= self.config.degradation_critical,
            ));
        }

        // Prompt drift: shift in incoming prompt sizes.
        let older_prompt = mean(&older, |a| a.prompt_chars as f64).max(1.0);
        let newer_prompt = mean(&newer, |a| a.prompt_chars as f64);
        let prompt_shift = (newer_prompt - older_prompt).abs() / older_prompt;
        if prompt_shift >= self.config.drift_warning {
            alerts.push((
                QualityAlertKind::PromptDrift,
                newer_prompt,
                older_prompt,
                prompt_shift >= self.config.drift_critical,
            ));
        }

        // Data drift: shift in response sizes.
        let older_resp = mean(&older, |a| a.response_chars as f64).max(1.0);
        let newer_resp = mean(&newer, |a| a.response_chars as f64);
        let resp_shift = (newer_resp - older_resp).abs() / older_resp;
        if resp_shift >= self.config.drift_warning {
            alerts.push((
                QualityAlertKind::DataDrift,
                newer_resp,
                older_resp,
                resp_shift >= self.config.drift_critical,
            ));
        }

        // Performance regression: latency shift.
        let older_latency = mean(&older, |a| a.latency_ms as f64).max(1.0);
        let newer_latency = mean(&newer, |a| a.latency_ms as f64);
        let latency_shift = (newer_latency - older_latency) / older_latency;
        if latency_shift >= self.config.drift_warning {
            alerts.push((
                QualityAlertKind::PerformanceRegression,
                newer_latency,
                older_latency,
                latency_shift >= self.config.drift_critical,
            ));
        }

        for (kind, measured, reference, critical) in alerts {
            let alert = QualityAlert {
                model_id: model_id.to_string(),
                kind,
                severity: if critical {
                    QualityAlertSeverity::Critical
                } else {
                    QualityAlertSeverity::Warning
                },
                measured,
                reference,
                at_ms: self.clock.now_ms(),
            };
            tracing::warn!(
                model = model_id,
                kind = ?alert.kind,
                severity = ?alert.severity,
                measured,
                reference,
                "quality alert"
            );
            let _ = self.alert_tx.send(alert);
        }
    }
}

/// Hedging phrases that lower the factuality signal.
const HEDGES: &[&str] = &[
    "i think",
    "maybe",
    "probably",
    "not sure",
    "i believe",
    "it could be",
];

/// Sweeping phrases that raise the bias signal.
const BIAS_MARKERS: &[&str] = &[
    "obviously",
    "everyone knows",
    "it is well known",
    "all of them are",
    "clearly superior",
];

/// Terms that raise the toxicity signal.
const TOXIC_MARKERS: &[&str] = &["idiot", "moron", "shut up", "worthless"];

/// Heuristic signal extraction. These are proxy signals computed from
/// content alone; embedders with a scoring model can recalibrate the
/// weights in one place (`QualitySignals::score`).
fn score_signals(prompt: &str, response: &str) -> QualitySignals {
    let response_lower = response.to_lowercase();
    let words: Vec<&str> = response_lower.split_whitespace().collect();

    // Coherence: penalize immediate repetition and near-empty answers.
    let coherence = if words.len() < 3 {
        0.2
    } else {
        let repeats = words.windows(2).filter(|w| w[0] == w[1]).count();
        (1.0 - repeats as f64 / words.len() as f64).clamp(0.0, 1.0)
    };

    // Relevance: content-word overlap with the prompt.
    let prompt_lower = prompt.to_lowercase();
    let prompt_words: std::collections::HashSet<&str> = prompt_lower
        .split_whitespace()
        .filter(|w| w.len() > 3)
        .collect();
    let relevance = if prompt_words.is_empty() {
        0.6
    } else {
        let overlap = words
            .iter()
            .filter(|w| prompt_words.contains(**w))
            .count();
        (0.3 + 0.7 * (overlap as f64 / prompt_words.len() as f64)).clamp(0.0, 1.0)
    };

    // Factuality: assertive answers score higher than hedged ones.
    let hedge_hits = HEDGES
        .iter()
        .filter(|h| response_lower.contains(**h))
        .count();
    let factuality = (0.9 - 0.2 * hedge_hits as f64).clamp(0.0, 1.0);

    // Completeness: saturating length credit.
    let completeness = (response.chars().count() as f64 / 200.0).clamp(0.0, 1.0);

    let toxicity = TOXIC_MARKERS
        .iter()
        .filter(|t| response_lower.contains(**t))
        .count()
        .min(3) as f64
        / 3.0;
    let bias = BIAS_MARKERS
        .iter()
        .filter(|b| response_lower.contains(**b))
        .count()
        .min(3) as f64
        / 3.0;

    QualitySignals {
        coherence,
        relevance,
        factuality,
        completeness,
        toxicity,
        bias,
    }
}
