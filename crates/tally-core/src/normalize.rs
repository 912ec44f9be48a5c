//! Candidate normalizer
//!
//! Canonicalizes money, time, and text fields from whatever a rule or the
//! analyzer produced. Money becomes a fixed-point minor-unit integer (never
//! floating point) so the merge engine can compare amounts exactly; time
//! becomes epoch milliseconds; names are trimmed and edge-depunctuated but
//! never guessed at beyond that.

use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{BillCandidate, BillKind, RawCandidate, RawEvent};

/// Epoch values below this are second-resolution and get rescaled.
/// (10^12 ms is Sep 2001; second-resolution stamps stay under it until 33658.)
const MS_THRESHOLD: i64 = 1_000_000_000_000;

/// Normalize a raw extraction into a `BillCandidate`.
///
/// Fails only when the amount is missing or unparseable; every other field
/// degrades to a documented default (kind → expense, time → capture time).
pub fn normalize(raw: RawCandidate, event: &RawEvent) -> Result<BillCandidate> {
    let money_minor = parse_money_minor(raw.money.as_deref().unwrap_or(""))?;
    let timestamp_ms = normalize_timestamp(raw.time.as_deref(), event.captured_at_ms);
    let kind = raw.kind.unwrap_or(BillKind::Expense);

    let candidate = BillCandidate {
        kind,
        money_minor,
        currency: raw.currency.unwrap_or_default().trim().to_string(),
        timestamp_ms,
        counterparty: clean_name(&raw.counterparty),
        account_from: clean_name(&raw.account_from),
        account_to: clean_name(&raw.account_to),
        channel: raw.channel.trim().to_string(),
        rule_name: raw.rule_name.trim().to_string(),
        auto_record: raw.auto_record,
        event_id: event.id,
    };
    debug!(
        kind = kind.as_str(),
        money_minor,
        timestamp_ms,
        rule = %candidate.rule_name,
        "normalized candidate"
    );
    Ok(candidate)
}

/// Parse an amount string into minor units (hundredths).
///
/// Tolerates currency symbols, thousands separators, and surrounding noise;
/// fraction digits beyond the second are discarded. "3433.09" → 343309.
pub fn parse_money_minor(text: &str) -> Result<i64> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    if cleaned.is_empty() || cleaned == "-" {
        return Err(Error::InvalidData(format!("unparseable amount: {text:?}")));
    }

    let negative = cleaned.starts_with('-');
    let unsigned = cleaned.trim_start_matches('-');
    let (whole, frac) = match unsigned.split_once('.') {
        Some((w, f)) => (w, f),
        None => (unsigned, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(Error::InvalidData(format!("unparseable amount: {text:?}")));
    }

    let whole: i64 = if whole.is_empty() {
        0
    } else {
        whole
            .parse()
            .map_err(|_| Error::InvalidData(format!("unparseable amount: {text:?}")))?
    };

    let mut frac_digits = frac.chars().filter(|c| c.is_ascii_digit());
    let tens = frac_digits.next().and_then(|c| c.to_digit(10)).unwrap_or(0) as i64;
    let ones = frac_digits.next().and_then(|c| c.to_digit(10)).unwrap_or(0) as i64;

    let minor = whole
        .checked_mul(100)
        .and_then(|v| v.checked_add(tens * 10 + ones))
        .ok_or_else(|| Error::InvalidData(format!("amount out of range: {text:?}")))?;
    Ok(if negative { -minor } else { minor })
}

/// Normalize a timestamp to epoch milliseconds.
///
/// Second-resolution stamps are detected by magnitude and rescaled; missing
/// or garbage input falls back to the event's capture time.
pub fn normalize_timestamp(time: Option<&str>, fallback_ms: i64) -> i64 {
    let Some(raw) = time else {
        return fallback_ms;
    };
    let parsed: Option<i64> = raw.trim().parse().ok();
    match parsed {
        Some(v) if v > 0 && v < MS_THRESHOLD => v * 1000,
        Some(v) if v >= MS_THRESHOLD => v,
        _ => fallback_ms,
    }
}

/// Trim and edge-depunctuate an account/counterparty name.
///
/// Only ASCII edge punctuation and whitespace (including NBSP and ideographic
/// space) are stripped; interior characters are left alone so canonical names
/// like `交通银行（工资）` survive intact for known-asset comparison.
pub fn clean_name(text: &str) -> String {
    const EDGE: &[char] = &[
        ' ', '\t', '\n', '\r', '\u{a0}', '\u{3000}', '.', ',', ':', ';', '-', '_', '*', '"', '\'',
        '[', ']',
    ];
    let trimmed = text.trim_matches(EDGE);
    // Collapse interior whitespace runs left behind by template extraction.
    let mut out = String::with_capacity(trimmed.len());
    let mut in_space = false;
    for c in trimmed.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}
