//! Rule engine
//!
//! Evaluates an ordered set of declarative rules against a raw payload and
//! returns the first successful extraction. Rules are data: the engine owns
//! no rule state beyond what is supplied per invocation.
//!
//! Ordering is by explicit metadata: user-authored rules before system rules,
//! then priority (higher first), then insertion id. A rule that faults during
//! evaluation is logged and skipped; one bad rule never aborts the whole
//! evaluation.

use regex::Regex;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::{
    BillKind, CandidateField, PatternRule, Payload, RawCandidate, Rule, RuleBody, RuleOrigin,
    ScriptRule, ScriptStep,
};

/// Sort rules into evaluation order: user before system, then priority
/// descending, then insertion id ascending.
pub fn order(rules: &mut [Rule]) {
    rules.sort_by(|a, b| {
        let origin = |r: &Rule| match r.origin {
            RuleOrigin::User => 0,
            RuleOrigin::System => 1,
        };
        origin(a)
            .cmp(&origin(b))
            .then(b.priority.cmp(&a.priority))
            .then(a.id.cmp(&b.id))
    });
}

/// Evaluate rules in order against a payload; first successful extraction
/// wins and evaluation stops. Returns `None` when no rule matched.
pub fn evaluate(rules: &[Rule], payload: &Payload) -> Option<RawCandidate> {
    for rule in rules {
        if !rule.enabled {
            continue;
        }
        match eval_rule(rule, payload) {
            Ok(Some(mut candidate)) => {
                candidate.rule_name = rule.name.clone();
                candidate.auto_record = rule.auto_record;
                debug!(rule = %rule.name, rule_id = rule.id, "rule matched");
                return Some(candidate);
            }
            Ok(None) => {}
            Err(e) => {
                // Rule execution fault: recorded, evaluation continues.
                warn!(rule = %rule.name, rule_id = rule.id, error = %e, "rule evaluation failed");
            }
        }
    }
    None
}

fn eval_rule(rule: &Rule, payload: &Payload) -> Result<Option<RawCandidate>> {
    match &rule.body {
        RuleBody::Pattern(p) => eval_pattern(p, payload),
        RuleBody::Script(s) => eval_script(s, payload),
    }
}

/// A pattern rule matches when its regex captures the payload text; named
/// groups bind candidate fields, rule metadata supplies kind and channel.
fn eval_pattern(rule: &PatternRule, payload: &Payload) -> Result<Option<RawCandidate>> {
    let re = Regex::new(&rule.regex)?;
    let text = payload.as_text();
    let Some(caps) = re.captures(&text) else {
        return Ok(None);
    };

    let group = |name: &str| caps.name(name).map(|m| m.as_str().to_string());
    let Some(money) = group("money") else {
        // A match without an amount is not a usable extraction.
        return Ok(None);
    };

    Ok(Some(RawCandidate {
        kind: Some(rule.kind),
        money: Some(money),
        currency: group("currency").or_else(|| rule.currency.clone()),
        time: group("time"),
        counterparty: group("counterparty").unwrap_or_default(),
        account_from: group("account_from").unwrap_or_default(),
        account_to: group("account_to").unwrap_or_default(),
        channel: rule.channel.clone(),
        ..Default::default()
    }))
}

/// A script rule runs its steps in order. `Require` gates the match;
/// `Capture`/`Pluck` that find nothing leave the field unset rather than
/// failing the rule. A script that never binds an amount does not match.
fn eval_script(rule: &ScriptRule, payload: &Payload) -> Result<Option<RawCandidate>> {
    let text = payload.as_text();
    let mut candidate = RawCandidate::default();

    for step in &rule.steps {
        match step {
            ScriptStep::Require { pattern } => {
                let re = Regex::new(pattern)?;
                if !re.is_match(&text) {
                    return Ok(None);
                }
            }
            ScriptStep::Capture { field, pattern } => {
                let re = Regex::new(pattern)?;
                if let Some(value) = re
                    .captures(&text)
                    .and_then(|caps| caps.get(1))
                    .map(|m| m.as_str().to_string())
                {
                    set_field(&mut candidate, *field, value)?;
                }
            }
            ScriptStep::Pluck { field, path } => {
                if let Some(value) = payload.pluck(path) {
                    set_field(&mut candidate, *field, value)?;
                }
            }
            ScriptStep::Set { field, value } => {
                set_field(&mut candidate, *field, value.clone())?;
            }
        }
    }

    if candidate.money.is_none() {
        return Ok(None);
    }
    Ok(Some(candidate))
}

fn set_field(candidate: &mut RawCandidate, field: CandidateField, value: String) -> Result<()> {
    match field {
        CandidateField::Kind => {
            candidate.kind = Some(
                BillKind::parse(&value)
                    .ok_or_else(|| Error::Rule(format!("unknown bill kind {value:?}")))?,
            );
        }
        CandidateField::Money => candidate.money = Some(value),
        CandidateField::Currency => candidate.currency = Some(value),
        CandidateField::Time => candidate.time = Some(value),
        CandidateField::Counterparty => candidate.counterparty = value,
        CandidateField::AccountFrom => candidate.account_from = value,
        CandidateField::AccountTo => candidate.account_to = value,
        CandidateField::Channel => candidate.channel = value,
    }
    Ok(())
}
