//! Domain models for Tally
//!
//! The pipeline's data flow is: `RawEvent` (immutable capture) → rule/analyzer
//! output (`RawCandidate`) → normalized `BillCandidate` → persisted
//! `BillRecord`. Rules are plain data (`Rule` + `RuleBody`), loaded from the
//! store and evaluated by the engine per invocation.

use std::borrow::Cow;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Capture channel a raw event arrived through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    Notification,
    Sms,
    AppWrite,
    ScreenText,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Notification => "notification",
            SourceKind::Sms => "sms",
            SourceKind::AppWrite => "app-write",
            SourceKind::ScreenText => "screen-text",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "notification" => Some(SourceKind::Notification),
            "sms" => Some(SourceKind::Sms),
            "app-write" => Some(SourceKind::AppWrite),
            "screen-text" => Some(SourceKind::ScreenText),
            _ => None,
        }
    }
}

/// Transaction kind of a candidate or bill record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillKind {
    Expense,
    Income,
    Transfer,
}

impl BillKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillKind::Expense => "expense",
            BillKind::Income => "income",
            BillKind::Transfer => "transfer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "expense" | "expend" => Some(BillKind::Expense),
            "income" => Some(BillKind::Income),
            "transfer" => Some(BillKind::Transfer),
            _ => None,
        }
    }
}

/// Raw payload carried by a capture event: free text (notifications, SMS,
/// screen text) or structured key/value data (intercepted app writes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Text(String),
    Structured(serde_json::Value),
}

impl Payload {
    /// Canonical text form of the payload. Structured payloads serialize to
    /// compact JSON so the same object always produces the same bytes.
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            Payload::Text(s) => Cow::Borrowed(s),
            Payload::Structured(v) => Cow::Owned(v.to_string()),
        }
    }

    /// SHA-256 hex digest of the canonical payload text. Identical repeat
    /// submissions hash to the same digest regardless of arrival order of
    /// the delivering source.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.as_text().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Look up a dotted key path in a structured payload ("order.amount").
    /// Returns None for text payloads or missing keys. Scalar values are
    /// rendered without JSON quoting.
    pub fn pluck(&self, path: &str) -> Option<String> {
        let Payload::Structured(root) = self else {
            return None;
        };
        let mut cur = root;
        for part in path.split('.') {
            cur = cur.get(part)?;
        }
        Some(match cur {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

/// One immutable capture of a transaction fragment from a single source.
///
/// Created once per accepted submission and never mutated, except for the
/// archive annotations (`matched`, `rule_name`) which are set exactly once
/// after analysis. Bill records reference events by id (lineage), they do
/// not own them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    pub id: i64,
    /// Source application identifier (package name or similar).
    pub app: String,
    pub kind: SourceKind,
    pub payload: Payload,
    /// Capture timestamp, epoch milliseconds.
    pub captured_at_ms: i64,
    /// SHA-256 hex digest of the payload.
    pub digest: String,
    /// Whether analysis produced a bill candidate from this event.
    pub matched: bool,
    /// Name of the rule (or analyzer label) that matched, if any.
    pub rule_name: Option<String>,
}

/// Who authored a rule. User rules always order before system rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleOrigin {
    System,
    User,
}

impl RuleOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleOrigin::System => "system",
            RuleOrigin::User => "user",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(RuleOrigin::System),
            "user" => Some(RuleOrigin::User),
            _ => None,
        }
    }
}

/// A matching unit scoped to one `(app, kind)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    pub app: String,
    pub kind: SourceKind,
    pub name: String,
    pub origin: RuleOrigin,
    /// Higher priority evaluates first within the same origin.
    pub priority: i64,
    pub enabled: bool,
    /// Bills produced by this rule are recorded without user confirmation.
    pub auto_record: bool,
    pub body: RuleBody,
}

/// Rule behavior, selected by explicit tag rather than runtime reflection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RuleBody {
    /// Single regex whose named capture groups bind candidate fields.
    Pattern(PatternRule),
    /// Ordered extraction program interpreted against the payload.
    Script(ScriptRule),
}

/// Declarative-pattern rule.
///
/// The regex is applied to the payload text; named capture groups bind
/// candidate fields directly: `money`, `time`, `counterparty`,
/// `account_from`, `account_to`, `currency`. Kind and channel come from the
/// rule itself since a pattern rule always describes one message shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternRule {
    pub regex: String,
    pub kind: BillKind,
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

/// Embedded-script rule: a small, data-driven extraction program.
///
/// Steps run in order against the payload. A failed `Require` means the rule
/// does not match (not an error); a malformed step (bad regex, bad field
/// value) is a rule-execution fault and is isolated to this rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptRule {
    pub steps: Vec<ScriptStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ScriptStep {
    /// Abort the rule (no match) unless the payload text matches.
    Require { pattern: String },
    /// Bind a field from the first capture group of a regex.
    Capture { field: CandidateField, pattern: String },
    /// Bind a field from a dotted key path in a structured payload.
    Pluck { field: CandidateField, path: String },
    /// Bind a field to a literal value.
    Set { field: CandidateField, value: String },
}

/// Candidate fields addressable by script steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateField {
    Kind,
    Money,
    Currency,
    Time,
    Counterparty,
    AccountFrom,
    AccountTo,
    Channel,
}

/// Unnormalized output of a rule or the analyzer fallback.
///
/// Field values are whatever the rule/analyzer extracted: money is still
/// text, the timestamp may be in second resolution, names are untrimmed.
/// The normalizer turns this into a `BillCandidate`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawCandidate {
    #[serde(default)]
    pub kind: Option<BillKind>,
    #[serde(default)]
    pub money: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub counterparty: String,
    #[serde(default)]
    pub account_from: String,
    #[serde(default)]
    pub account_to: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub rule_name: String,
    #[serde(default)]
    pub auto_record: bool,
}

/// Normalized, ephemeral extraction result. Never persisted directly;
/// consumed immediately by the merge engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillCandidate {
    pub kind: BillKind,
    /// Fixed-point amount in minor units (exact equality downstream).
    pub money_minor: i64,
    pub currency: String,
    /// Transaction timestamp, epoch milliseconds.
    pub timestamp_ms: i64,
    pub counterparty: String,
    pub account_from: String,
    pub account_to: String,
    pub channel: String,
    pub rule_name: String,
    pub auto_record: bool,
    /// Originating raw event.
    pub event_id: i64,
}

/// Merge lifecycle of a bill record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeState {
    Open,
    Settled,
}

impl MergeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeState::Open => "open",
            MergeState::Settled => "settled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(MergeState::Open),
            "settled" => Some(MergeState::Settled),
            _ => None,
        }
    }
}

/// The canonical persisted transaction, possibly built from many candidates.
///
/// A root record has `parent_id == id` and `group_id == id`. Child records
/// carry their own candidate's values and point at the root through
/// `parent_id`/`group_id`. Root money/timestamp are fixed at creation; later
/// merges only touch the mergeable text fields, channels, and lineage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillRecord {
    pub id: i64,
    pub parent_id: i64,
    pub group_id: i64,
    pub kind: BillKind,
    pub money_minor: i64,
    pub timestamp_ms: i64,
    pub account_from: String,
    pub account_to: String,
    pub counterparty: String,
    pub currency: String,
    /// Distinct channel labels of all contributions, in arrival order.
    pub channels: Vec<String>,
    /// Contributing raw event ids, in merge order.
    pub lineage: Vec<i64>,
    pub state: MergeState,
    pub auto_confirmed: bool,
    pub created_at_ms: i64,
    /// Last merge activity; settlement counts from here.
    pub updated_at_ms: i64,
}

impl BillRecord {
    pub fn is_root(&self) -> bool {
        self.parent_id == self.id
    }
}

/// Fields for creating a rule (id and created_at assigned by the store).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRule {
    pub app: String,
    pub kind: SourceKind,
    pub name: String,
    pub origin: RuleOrigin,
    #[serde(default)]
    pub priority: i64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub auto_record: bool,
    pub body: RuleBody,
}

fn default_true() -> bool {
    true
}

/// One field-level conflict decision taken during a merge, recorded for
/// later audit of why a given name "won".
#[derive(Debug, Clone, Serialize)]
pub struct FieldDecision {
    pub field: &'static str,
    pub source: String,
    pub target: String,
    pub chosen: String,
}

/// Persisted merge-audit row.
#[derive(Debug, Clone, Serialize)]
pub struct MergeAuditEntry {
    pub id: i64,
    pub bill_id: i64,
    pub event_id: i64,
    pub field: String,
    pub source_value: String,
    pub target_value: String,
    pub chosen: String,
    pub created_at_ms: i64,
}

/// A bill cluster as exposed by the group query surface.
#[derive(Debug, Clone, Serialize)]
pub struct BillGroup {
    /// Calendar date of the root's transaction timestamp (UTC).
    pub date: String,
    pub group_id: i64,
    pub member_ids: Vec<i64>,
}

/// User-curated set of canonical account/asset display names.
///
/// Consulted only for merge conflict resolution, never for fingerprinting.
#[derive(Debug, Clone, Default)]
pub struct KnownAssetSet {
    names: HashSet<String>,
}

impl KnownAssetSet {
    pub fn new(names: impl IntoIterator<Item = String>) -> Self {
        Self {
            names: names.into_iter().collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
