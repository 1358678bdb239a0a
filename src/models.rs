//! Core data models used throughout chatscope.
//!
//! These types represent the raw messages, stitched timeline, stage
//! findings, and report documents that flow through the ingestion and
//! analysis pipeline. All of them serialize to JSON, which is the
//! interchange format for every persisted artifact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sender bucket for messages whose sender could not be determined.
pub const UNKNOWN_SENDER: &str = "Unknown";

/// A file staged for ingestion, body carried as base64.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedFile {
    pub filename: String,
    pub content_type: String,
    pub data: String,
}

/// One unstructured message produced by extraction/parsing, before
/// timeline stitching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    pub source: String,
    pub content: String,
    pub timestamp: Option<String>,
    pub sender: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, serde_json::Value>,
}

impl RawMessage {
    pub fn new(source: &str, content: &str) -> Self {
        Self {
            source: source.to_string(),
            content: content.to_string(),
            timestamp: None,
            sender: None,
            tags: BTreeMap::new(),
        }
    }

    pub fn tagged(mut self, key: &str, value: serde_json::Value) -> Self {
        self.tags.insert(key.to_string(), value);
        self
    }
}

/// A RawMessage placed on the stitched timeline. `index` is dense,
/// zero-based, and reflects final chronological position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineMessage {
    #[serde(flatten)]
    pub raw: RawMessage,
    pub index: usize,
    pub resolved_time: Option<DateTime<Utc>>,
}

/// A silence between two chronologically adjacent messages exceeding the
/// configured threshold. Derived during stitching, never mutated after.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GapRecord {
    pub after_index: usize,
    pub duration_hours: f64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimelineStats {
    pub messages_per_sender: BTreeMap<String, usize>,
    pub avg_message_length: BTreeMap<String, usize>,
    pub total_duration_days: f64,
}

/// The single, deduplicated, chronologically ordered view of a
/// conversation. Immutable once produced; sole hand-off artifact between
/// ingestion and analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeline {
    pub messages: Vec<TimelineMessage>,
    pub total_count: usize,
    pub date_range: DateRange,
    pub gaps: Vec<GapRecord>,
    pub senders: Vec<String>,
    pub stats: TimelineStats,
}

// ============ Stage findings ============

/// A sub-range of the timeline flagged by triage as needing deep analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotZone {
    pub start_index: usize,
    pub end_index: usize,
    pub intensity_score: f64,
    pub brief_summary: String,
    #[serde(default)]
    pub indicators: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedFlag {
    pub r#type: String,
    pub description: String,
    pub confidence: u32,
    #[serde(default)]
    pub message_indices: Vec<usize>,
}

/// Output of the triage stage. The excerpt variant additionally fills the
/// tone/aggression fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriageFindings {
    pub hot_zones: Vec<HotZone>,
    pub red_flags: Vec<RedFlag>,
    pub total_messages_scanned: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tone_score: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hidden_aggression_score: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorExample {
    pub index: usize,
    pub quote: String,
    pub explanation: String,
    pub severity: String,
}

/// Tally of one coded behavior across the analyzed episodes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BehaviorTally {
    pub count: usize,
    pub examples: Vec<BehaviorExample>,
    pub frequency_per_1000: u32,
    pub percentile: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairExample {
    pub index: usize,
    pub quote: String,
    pub outcome: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepairAttempts {
    pub count: usize,
    pub success_rate: u32,
    pub examples: Vec<RepairExample>,
}

/// Behavior-coding specialist output: four negative behaviors plus repair
/// attempts, rolled into a 0-100 health score.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GottmanFindings {
    pub criticism: BehaviorTally,
    pub contempt: BehaviorTally,
    pub defensiveness: BehaviorTally,
    pub stonewalling: BehaviorTally,
    pub repair_attempts: RepairAttempts,
    pub overall_health_score: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedPattern {
    pub name: String,
    pub detected: bool,
    pub confidence: u32,
    pub evidence: String,
    #[serde(default)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentAssessment {
    pub style: String,
    pub confidence: u32,
}

impl Default for AttachmentAssessment {
    fn default() -> Self {
        Self {
            style: "unknown".to_string(),
            confidence: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttachmentStyles {
    pub person_a: AttachmentAssessment,
    pub person_b: AttachmentAssessment,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PronounUsage {
    pub i_count: usize,
    pub we_count: usize,
    pub ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyProfile {
    pub avg_minutes: f64,
    pub pattern: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionLoop {
    pub r#type: String,
    pub description: String,
    pub frequency: u32,
    pub typical_trigger: String,
    pub typical_resolution: String,
}

/// Interaction-dynamics specialist output. The pronoun and latency tables
/// are computed locally from the timeline; the rest comes from the
/// reasoning service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DynamicsFindings {
    pub patterns: Vec<DetectedPattern>,
    pub attachment_style: AttachmentStyles,
    pub pronoun_analysis: BTreeMap<String, PronounUsage>,
    pub latency_analysis: BTreeMap<String, LatencyProfile>,
    pub interaction_loops: Vec<InteractionLoop>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub date: String,
    pub event_type: String,
    pub description: String,
    pub significance: String,
    #[serde(default)]
    pub message_indices: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringTheme {
    pub theme: String,
    pub description: String,
    pub first_occurrence: String,
    pub frequency: u32,
    pub resolution_status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurningPoint {
    pub date: String,
    pub description: String,
    pub impact: String,
    pub before_dynamic: String,
    pub after_dynamic: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryPhase {
    pub period: String,
    pub characterization: String,
    pub sentiment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trajectory {
    pub overall: String,
    pub confidence: u32,
    pub description: String,
    #[serde(default)]
    pub phases: Vec<TrajectoryPhase>,
}

impl Default for Trajectory {
    fn default() -> Self {
        Self {
            overall: "stable".to_string(),
            confidence: 0,
            description: "Insufficient data for trajectory analysis".to_string(),
            phases: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceLink {
    pub current_reference: String,
    pub original_event: String,
    pub pattern: String,
}

/// Longitudinal specialist output: events, themes, turning points, and the
/// overall trajectory of the conversation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChronicleFindings {
    pub event_timeline: Vec<TimelineEvent>,
    pub recurring_themes: Vec<RecurringTheme>,
    pub turning_points: Vec<TurningPoint>,
    pub trajectory: Trajectory,
    pub reference_web: Vec<ReferenceLink>,
}

/// One specialist claim after verification against the raw timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifiedClaim {
    pub claim: String,
    pub agent: String,
    pub evidence: String,
    pub confidence: u32,
    #[serde(default)]
    pub instances: u32,
    pub veto: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub veto_reason: Option<String>,
}

/// Verifier output: every specialist claim with an explicit accept/veto
/// verdict.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerifierFindings {
    pub verified: Vec<VerifiedClaim>,
    pub vetoed: Vec<VerifiedClaim>,
    pub overall_confidence: u32,
    pub methodology_notes: Vec<String>,
}

/// All findings feeding the deep report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepFindings {
    pub triage: TriageFindings,
    pub gottman: GottmanFindings,
    pub dynamics: DynamicsFindings,
    pub chronicle: ChronicleFindings,
    pub verifier: VerifierFindings,
}

// ============ Report ============

/// Section payload discriminator so renderers can treat content
/// generically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Text,
    Score,
    List,
    Table,
    ChartData,
    TimelineEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub heading: String,
    pub kind: SectionKind,
    pub content: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub title: String,
    pub sections: Vec<Section>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub total_messages: usize,
    pub date_range: DateRange,
    pub senders: Vec<String>,
    pub overall_confidence: u32,
    pub overall_health_score: u32,
}

/// Display-ready report document. Purely derived from Timeline + findings;
/// carries no wall-clock field so assembly is byte-idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub case_id: String,
    pub report_type: String,
    pub chapters: Vec<Chapter>,
    pub metadata: ReportMetadata,
}
