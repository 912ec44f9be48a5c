//! Database tests

use super::*;
use crate::models::{
    BillCandidate, BillKind, FieldDecision, MergeState, NewRule, PatternRule, Payload, RuleBody,
    RuleOrigin, ScriptRule, ScriptStep, SourceKind,
};

fn candidate(money_minor: i64, timestamp_ms: i64, event_id: i64) -> BillCandidate {
    BillCandidate {
        kind: BillKind::Expense,
        money_minor,
        currency: "CNY".into(),
        timestamp_ms,
        counterparty: "美团".into(),
        account_from: "微信零钱".into(),
        account_to: String::new(),
        channel: "wechat-pay".into(),
        rule_name: "wechat-pay".into(),
        auto_record: false,
        event_id,
    }
}

// ========== Raw events ==========

#[test]
fn insert_and_fetch_event() {
    let db = Database::in_memory().unwrap();
    let payload = Payload::Text("已支付¥42.10".into());
    let event = db
        .insert_event("com.tencent.mm", SourceKind::Notification, &payload, 1_000)
        .unwrap();

    let fetched = db.get_event(event.id).unwrap().unwrap();
    assert_eq!(fetched.app, "com.tencent.mm");
    assert_eq!(fetched.payload, payload);
    assert_eq!(fetched.digest, payload.digest());
    assert!(!fetched.matched);
}

#[test]
fn structured_payloads_round_trip() {
    let db = Database::in_memory().unwrap();
    let payload = Payload::Structured(serde_json::json!({"order": {"amount": "42.10"}}));
    let event = db
        .insert_event("com.meituan", SourceKind::AppWrite, &payload, 1_000)
        .unwrap();
    let fetched = db.get_event(event.id).unwrap().unwrap();
    assert_eq!(fetched.payload.pluck("order.amount").as_deref(), Some("42.10"));
}

#[test]
fn archive_annotations_and_unmatched_listing() {
    let db = Database::in_memory().unwrap();
    let p1 = Payload::Text("matched one".into());
    let p2 = Payload::Text("unmatched one".into());
    let e1 = db
        .insert_event("app", SourceKind::Sms, &p1, 1_000)
        .unwrap();
    let e2 = db
        .insert_event("app", SourceKind::Sms, &p2, 2_000)
        .unwrap();

    db.archive_event_result(e1.id, true, Some("a-rule")).unwrap();
    db.archive_event_result(e2.id, false, None).unwrap();

    let unmatched = db.list_events(true, 10, 0).unwrap();
    assert_eq!(unmatched.len(), 1);
    assert_eq!(unmatched[0].id, e2.id);

    let all = db.list_events(false, 10, 0).unwrap();
    assert_eq!(all.len(), 2);
    assert!(db.archive_event_result(9999, true, None).is_err());
}

#[test]
fn distinct_apps_are_sorted_and_deduped() {
    let db = Database::in_memory().unwrap();
    for app in ["b.app", "a.app", "b.app"] {
        db.insert_event(app, SourceKind::Notification, &Payload::Text(app.into()), 0)
            .unwrap();
    }
    assert_eq!(db.distinct_apps().unwrap(), vec!["a.app", "b.app"]);
}

// ========== Rules ==========

fn sample_rule(app: &str, origin: RuleOrigin) -> NewRule {
    NewRule {
        app: app.into(),
        kind: SourceKind::Notification,
        name: format!("{app}-rule"),
        origin,
        priority: 5,
        enabled: true,
        auto_record: true,
        body: RuleBody::Pattern(PatternRule {
            regex: r"(?P<money>[0-9.]+)".into(),
            kind: BillKind::Expense,
            channel: "test".into(),
            currency: None,
        }),
    }
}

#[test]
fn rule_crud_round_trip() {
    let db = Database::in_memory().unwrap();
    let rule = db.insert_rule(&sample_rule("com.a", RuleOrigin::User)).unwrap();

    let mut fetched = db.get_rule(rule.id).unwrap().unwrap();
    assert_eq!(fetched.name, "com.a-rule");
    assert!(fetched.auto_record);
    assert!(matches!(fetched.body, RuleBody::Pattern(_)));

    fetched.enabled = false;
    fetched.body = RuleBody::Script(ScriptRule {
        steps: vec![ScriptStep::Require {
            pattern: "pay".into(),
        }],
    });
    db.update_rule(&fetched).unwrap();
    let reloaded = db.get_rule(rule.id).unwrap().unwrap();
    assert!(!reloaded.enabled);
    assert!(matches!(reloaded.body, RuleBody::Script(_)));
}

#[test]
fn system_rules_cannot_be_deleted() {
    let db = Database::in_memory().unwrap();
    let system = db.insert_rule(&sample_rule("com.a", RuleOrigin::System)).unwrap();
    let user = db.insert_rule(&sample_rule("com.b", RuleOrigin::User)).unwrap();

    assert!(db.delete_rule(system.id).is_err());
    db.delete_rule(user.id).unwrap();
    assert!(db.get_rule(user.id).unwrap().is_none());
    assert!(db.delete_rule(9999).is_err());
}

#[test]
fn rules_for_returns_only_enabled_in_scope() {
    let db = Database::in_memory().unwrap();
    db.insert_rule(&sample_rule("com.a", RuleOrigin::System)).unwrap();
    let mut disabled = sample_rule("com.a", RuleOrigin::System);
    disabled.enabled = false;
    db.insert_rule(&disabled).unwrap();
    db.insert_rule(&sample_rule("com.other", RuleOrigin::System)).unwrap();

    let scoped = db.rules_for("com.a", SourceKind::Notification).unwrap();
    assert_eq!(scoped.len(), 1);
    assert!(db
        .rules_for("com.a", SourceKind::Sms)
        .unwrap()
        .is_empty());
}

#[test]
fn list_rules_filters_compose() {
    let db = Database::in_memory().unwrap();
    db.insert_rule(&sample_rule("com.a", RuleOrigin::System)).unwrap();
    db.insert_rule(&sample_rule("com.a", RuleOrigin::User)).unwrap();
    db.insert_rule(&sample_rule("com.b", RuleOrigin::User)).unwrap();

    assert_eq!(db.list_rules(None, None, None).unwrap().len(), 3);
    assert_eq!(db.list_rules(Some("com.a"), None, None).unwrap().len(), 2);
    assert_eq!(
        db.list_rules(Some("com.a"), None, Some(RuleOrigin::User))
            .unwrap()
            .len(),
        1
    );
    assert_eq!(
        db.list_rules(None, Some(SourceKind::Sms), None).unwrap().len(),
        0
    );
}

// ========== Bills ==========

#[test]
fn create_root_self_links() {
    let db = Database::in_memory().unwrap();
    let root = db.create_root(&candidate(4210, 1_000, 1)).unwrap();
    assert_eq!(root.parent_id, root.id);
    assert_eq!(root.group_id, root.id);
    assert_eq!(root.state, MergeState::Open);
    assert_eq!(root.lineage, vec![1]);

    let stored = db.get_bill(root.id).unwrap().unwrap();
    assert!(stored.is_root());
    assert_eq!(stored.channels, vec!["wechat-pay"]);
}

#[test]
fn apply_merge_writes_root_and_child_atomically() {
    let db = Database::in_memory().unwrap();
    let mut root = db.create_root(&candidate(4210, 1_000, 1)).unwrap();

    let child_candidate = candidate(4210, 2_000, 2);
    root.lineage.push(2);
    root.channels.push("unionpay".into());
    root.account_from = "交通银行（工资）".into();
    let decisions = vec![FieldDecision {
        field: "account_from",
        source: "交通银行（工资）".into(),
        target: "微信零钱".into(),
        chosen: "交通银行（工资）".into(),
    }];
    let child = db.apply_merge(&root, &child_candidate, &decisions).unwrap();

    assert_eq!(child.parent_id, root.id);
    assert_eq!(child.state, MergeState::Settled);

    let stored_root = db.get_bill(root.id).unwrap().unwrap();
    assert_eq!(stored_root.lineage, vec![1, 2]);
    assert_eq!(stored_root.account_from, "交通银行（工资）");
    // Root money/timestamp columns are never rewritten by a merge.
    assert_eq!(stored_root.money_minor, 4210);
    assert_eq!(stored_root.timestamp_ms, 1_000);

    let audit = db.merge_audit_for(root.id).unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].event_id, 2);
    assert_eq!(audit[0].chosen, "交通银行（工资）");
}

#[test]
fn find_open_roots_matches_window_and_money_exactly() {
    let db = Database::in_memory().unwrap();
    let root = db.create_root(&candidate(4210, 100_000, 1)).unwrap();

    // Exact money, inside window.
    let hits = db.find_open_roots(4210, 150_000, 60_000, None).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, root.id);

    // Off-by-one money never matches.
    assert!(db.find_open_roots(4211, 150_000, 60_000, None).unwrap().is_empty());
    // Outside the window.
    assert!(db.find_open_roots(4210, 200_000, 60_000, None).unwrap().is_empty());
    // Kind filter.
    assert!(db
        .find_open_roots(4210, 150_000, 60_000, Some(BillKind::Transfer))
        .unwrap()
        .is_empty());
}

#[test]
fn children_are_not_lookup_targets() {
    let db = Database::in_memory().unwrap();
    let root = db.create_root(&candidate(4210, 1_000, 1)).unwrap();
    db.apply_merge(&root, &candidate(4210, 1_500, 2), &[]).unwrap();

    let hits = db.find_open_roots(4210, 1_500, 60_000, None).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, root.id);
}

#[test]
fn settle_operations() {
    let db = Database::in_memory().unwrap();
    let root = db.create_root(&candidate(4210, 1_000, 1)).unwrap();

    assert!(db.settle_bill(root.id).unwrap());
    // Already settled: no-op.
    assert!(!db.settle_bill(root.id).unwrap());
    assert!(db.find_open_roots(4210, 1_000, 60_000, None).unwrap().is_empty());
}

#[test]
fn settle_expired_only_touches_stale_open_roots() {
    let db = Database::in_memory().unwrap();
    let stale = db.create_root(&candidate(4210, 1_000, 1)).unwrap();
    let fresh = db.create_root(&candidate(9999, 1_000, 2)).unwrap();

    let settled = db
        .settle_expired(now_ms() + 200_000, 180_000)
        .unwrap();
    assert_eq!(settled, 2);
    assert_eq!(db.get_bill(stale.id).unwrap().unwrap().state, MergeState::Settled);

    // Nothing left to settle.
    assert_eq!(db.settle_expired(now_ms() + 200_000, 180_000).unwrap(), 0);
    let _ = fresh;
}

#[test]
fn groups_list_with_dates_and_members() {
    let db = Database::in_memory().unwrap();
    // 2023-12-19 in epoch millis.
    let root = db.create_root(&candidate(4210, 1_702_972_951_000, 1)).unwrap();
    db.apply_merge(&root, &candidate(4210, 1_702_972_952_000, 2), &[]).unwrap();
    db.create_root(&candidate(888, 1_703_059_351_000, 3)).unwrap();

    let groups = db.list_groups(10, 0).unwrap();
    assert_eq!(groups.len(), 2);
    // Newest root first.
    assert_eq!(groups[0].date, "2023-12-20");
    assert_eq!(groups[1].date, "2023-12-19");
    assert_eq!(groups[1].group_id, root.id);
    assert_eq!(groups[1].member_ids.len(), 2);

    let members = db.bills_in_group(root.id).unwrap();
    assert_eq!(members.len(), 2);
    assert!(members[0].is_root());
}

#[test]
fn bill_counts_track_state() {
    let db = Database::in_memory().unwrap();
    let root = db.create_root(&candidate(4210, 1_000, 1)).unwrap();
    db.create_root(&candidate(888, 1_000, 2)).unwrap();
    db.settle_bill(root.id).unwrap();

    assert_eq!(db.bill_counts().unwrap(), (2, 1));
}

// ========== Settings & known assets ==========

#[test]
fn settings_upsert() {
    let db = Database::in_memory().unwrap();
    assert!(db.get_setting("merge_window_secs").unwrap().is_none());
    db.set_setting("merge_window_secs", "60").unwrap();
    db.set_setting("merge_window_secs", "90").unwrap();
    assert_eq!(db.get_setting("merge_window_secs").unwrap().as_deref(), Some("90"));
}

#[test]
fn known_assets_membership() {
    let db = Database::in_memory().unwrap();
    db.add_known_asset("交通银行（工资）").unwrap();
    db.add_known_asset("交通银行（工资）").unwrap();
    db.add_known_asset("微信零钱").unwrap();

    let assets = db.known_assets().unwrap();
    assert_eq!(assets.len(), 2);
    assert!(assets.contains("交通银行（工资）"));
    assert!(!assets.contains("银行卡"));

    assert!(db.remove_known_asset("微信零钱").unwrap());
    assert!(!db.remove_known_asset("微信零钱").unwrap());
    assert_eq!(db.list_known_assets().unwrap(), vec!["交通银行（工资）"]);
}
