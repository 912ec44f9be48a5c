//! Server API tests

use super::*;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use tally_core::db::Database;
use tally_core::test_utils;
use tower::ServiceExt;

fn setup_test_app() -> (Router, Database) {
    let db = Database::in_memory().unwrap();
    db.insert_rule(&test_utils::wechat_pay_rule()).unwrap();
    db.insert_rule(&test_utils::unionpay_rule()).unwrap();
    for asset in test_utils::reference_assets() {
        db.add_known_asset(&asset).unwrap();
    }
    let app = create_router_with_analyzer(db.clone(), ServerConfig::default(), None).unwrap();
    (app, db)
}

async fn get_body_json(response: axum::response::Response) -> serde_json::Value {
    let body = response.into_body();
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> axum::response::Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn get(app: &Router, uri: &str) -> axum::response::Response {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn submit(app: &Router, query: &str, data: serde_json::Value) -> serde_json::Value {
    let response = post_json(
        app,
        &format!("/analysis?{query}"),
        serde_json::json!({ "data": data }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    get_body_json(response).await
}

// ========== Analysis API ==========

#[tokio::test]
async fn test_analysis_rule_match() {
    let (app, _db) = setup_test_app();

    let json = submit(
        &app,
        "app=com.tencent.mm&type=notification",
        serde_json::json!("微信支付：已支付¥42.10 美团订单"),
    )
    .await;

    assert_eq!(json["outcome"], "matched");
    assert_eq!(json["bill"]["money_minor"], 4210);
    assert_eq!(json["bill"]["state"], "open");
    assert!(json.get("parent").is_none());
}

#[tokio::test]
async fn test_analysis_duplicate_submission_is_idempotent() {
    let (app, db) = setup_test_app();

    let first = submit(
        &app,
        "app=com.tencent.mm&type=notification",
        serde_json::json!("微信支付：已支付¥42.10"),
    )
    .await;
    assert_eq!(first["outcome"], "matched");

    let second = submit(
        &app,
        "app=com.tencent.mm&type=notification",
        serde_json::json!("微信支付：已支付¥42.10"),
    )
    .await;
    assert_eq!(second["outcome"], "duplicate");

    // Only one event was archived.
    assert_eq!(db.list_events(false, 10, 0).unwrap().len(), 1);
}

#[tokio::test]
async fn test_analysis_unmatched_is_archived() {
    let (app, _db) = setup_test_app();

    let json = submit(
        &app,
        "app=com.tencent.mm&type=notification",
        serde_json::json!("群消息：今晚吃什么"),
    )
    .await;
    assert_eq!(json["outcome"], "unmatched");
    let event_id = json["event_id"].as_i64().unwrap();

    let response = get(&app, "/events?unmatched=true").await;
    assert_eq!(response.status(), StatusCode::OK);
    let events = get_body_json(response).await;
    assert_eq!(events.as_array().unwrap().len(), 1);
    assert_eq!(events[0]["id"], event_id);
    assert_eq!(events[0]["matched"], false);
}

#[tokio::test]
async fn test_analysis_unknown_type_is_rejected() {
    let (app, _db) = setup_test_app();

    let response = post_json(
        &app,
        "/analysis?app=com.tencent.mm&type=carrier-pigeon",
        serde_json::json!({ "data": "已支付¥1.00" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = get_body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("carrier-pigeon"));
}

#[tokio::test]
async fn test_analysis_structured_payload() {
    let (app, db) = setup_test_app();
    db.insert_rule(&tally_core::models::NewRule {
        app: "com.meituan".into(),
        kind: tally_core::models::SourceKind::AppWrite,
        name: "meituan-order".into(),
        origin: tally_core::models::RuleOrigin::User,
        priority: 0,
        enabled: true,
        auto_record: false,
        body: tally_core::models::RuleBody::Script(tally_core::models::ScriptRule {
            steps: vec![
                tally_core::models::ScriptStep::Require {
                    pattern: "pay_done".into(),
                },
                tally_core::models::ScriptStep::Pluck {
                    field: tally_core::models::CandidateField::Money,
                    path: "order.amount".into(),
                },
                tally_core::models::ScriptStep::Set {
                    field: tally_core::models::CandidateField::Channel,
                    value: "meituan-app".into(),
                },
            ],
        }),
    })
    .unwrap();

    let json = submit(
        &app,
        "app=com.meituan&type=app-write",
        serde_json::json!({"event": "pay_done", "order": {"amount": "42.10"}}),
    )
    .await;
    assert_eq!(json["outcome"], "matched");
    assert_eq!(json["bill"]["money_minor"], 4210);
    assert_eq!(json["bill"]["channels"][0], "meituan-app");
}

// ========== Convergence across sources ==========

#[tokio::test]
async fn test_fragments_converge_into_one_group() {
    let (app, _db) = setup_test_app();

    let first = submit(
        &app,
        "app=com.tencent.mm&type=notification",
        serde_json::json!("微信支付：已支付¥42.10"),
    )
    .await;
    let root_id = first["bill"]["id"].as_i64().unwrap();

    let second = submit(
        &app,
        "app=com.unionpay&type=notification",
        serde_json::json!("云闪付：消费42.10元"),
    )
    .await;
    assert_eq!(second["outcome"], "matched");
    assert_eq!(second["parent"]["id"].as_i64().unwrap(), root_id);
    assert_eq!(second["bill"]["parent_id"].as_i64().unwrap(), root_id);

    // Query surface: one group, two members.
    let groups = get_body_json(get(&app, "/bills/groups").await).await;
    assert_eq!(groups.as_array().unwrap().len(), 1);
    assert_eq!(groups[0]["group_id"].as_i64().unwrap(), root_id);
    assert_eq!(groups[0]["member_ids"].as_array().unwrap().len(), 2);

    let members = get_body_json(get(&app, &format!("/bills/group/{root_id}")).await).await;
    assert_eq!(members.as_array().unwrap().len(), 2);

    let root = get_body_json(get(&app, &format!("/bills/{root_id}")).await).await;
    assert_eq!(root["lineage"].as_array().unwrap().len(), 2);
    assert_eq!(root["channels"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_finalized_bill_is_not_reopened() {
    let (app, _db) = setup_test_app();

    let first = submit(
        &app,
        "app=com.tencent.mm&type=notification",
        serde_json::json!("微信支付：已支付¥55.00"),
    )
    .await;
    let root_id = first["bill"]["id"].as_i64().unwrap();

    let response = post_json(
        &app,
        &format!("/bills/{root_id}/finalize"),
        serde_json::json!({}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    // Same fingerprint, after settlement: fresh root.
    let second = submit(
        &app,
        "app=com.unionpay&type=notification",
        serde_json::json!("云闪付：消费55.00元"),
    )
    .await;
    assert_eq!(second["outcome"], "matched");
    assert!(second.get("parent").is_none());
    assert_ne!(second["bill"]["id"].as_i64().unwrap(), root_id);
}

#[tokio::test]
async fn test_finalize_missing_bill_404() {
    let (app, _db) = setup_test_app();
    let response = post_json(&app, "/bills/9999/finalize", serde_json::json!({})).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ========== Rules API ==========

#[tokio::test]
async fn test_rule_lifecycle() {
    let (app, _db) = setup_test_app();

    // Create a user rule.
    let body = serde_json::json!({
        "app": "com.eg.android.AlipayGphone",
        "kind": "notification",
        "name": "alipay-red-packet",
        "origin": "user",
        "priority": 10,
        "body": {
            "type": "pattern",
            "regex": r"收到红包(?P<money>[0-9.]+)元",
            "kind": "income",
            "channel": "alipay[红包]"
        }
    });
    let response = post_json(&app, "/rules", body).await;
    assert_eq!(response.status(), StatusCode::OK);
    let created = get_body_json(response).await;
    let rule_id = created["id"].as_i64().unwrap();
    assert_eq!(created["origin"], "user");
    assert_eq!(created["enabled"], true);

    // List by app/creator.
    let listed = get_body_json(
        get(
            &app,
            "/rules?app=com.eg.android.AlipayGphone&creator=user",
        )
        .await,
    )
    .await;
    assert_eq!(listed.as_array().unwrap().len(), 1);

    // Update.
    let mut rule = created.clone();
    rule["priority"] = serde_json::json!(99);
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("/rules/{rule_id}"))
                .header("content-type", "application/json")
                .body(Body::from(rule.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let updated = get_body_json(response).await;
    assert_eq!(updated["priority"], 99);

    // Delete.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/rules/{rule_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let listed = get_body_json(get(&app, "/rules?creator=user").await).await;
    assert!(listed.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_system_rule_delete_conflicts() {
    let (app, db) = setup_test_app();
    let system = db
        .list_rules(None, None, Some(tally_core::models::RuleOrigin::System))
        .unwrap();
    let id = system[0].id;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/rules/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_apps_listing() {
    let (app, _db) = setup_test_app();
    submit(
        &app,
        "app=com.tencent.mm&type=notification",
        serde_json::json!("微信支付：已支付¥1.00"),
    )
    .await;
    submit(
        &app,
        "app=com.unionpay&type=notification",
        serde_json::json!("云闪付：消费2.00元"),
    )
    .await;

    let apps = get_body_json(get(&app, "/apps").await).await;
    assert_eq!(
        apps.as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect::<Vec<_>>(),
        vec!["com.tencent.mm", "com.unionpay"]
    );
}

// ========== Known assets ==========

#[tokio::test]
async fn test_asset_management() {
    let (app, _db) = setup_test_app();

    let response = post_json(&app, "/assets", serde_json::json!({"name": "icbc-debit-6222"})).await;
    assert_eq!(response.status(), StatusCode::OK);

    let assets = get_body_json(get(&app, "/assets").await).await;
    assert!(assets
        .as_array()
        .unwrap()
        .iter()
        .any(|v| v == "icbc-debit-6222"));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/assets/icbc-debit-6222")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/assets/icbc-debit-6222")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = post_json(&app, "/assets", serde_json::json!({"name": "  "})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ========== Health ==========

#[tokio::test]
async fn test_health_without_analyzer() {
    let (app, _db) = setup_test_app();
    let json = get_body_json(get(&app, "/health").await).await;
    assert_eq!(json["status"], "ok");
    assert!(json["analyzer_available"].is_null());
}
