//! Test utilities for tally-core
//!
//! Canned rules and payloads shared by core and server integration tests.
//! Kept behind the `test-utils` feature so downstream crates can opt in.

use crate::models::{
    BillKind, NewRule, PatternRule, Payload, RuleBody, RuleOrigin, SourceKind,
};

/// Reference known-asset names used across the merge tests.
pub fn reference_assets() -> Vec<String> {
    [
        "交通银行（工资）",
        "招商银行信用卡",
        "招商银行（定存）",
        "支付宝余额",
        "微信零钱",
    ]
    .map(String::from)
    .to_vec()
}

/// A WeChat payment-notification pattern rule.
pub fn wechat_pay_rule() -> NewRule {
    NewRule {
        app: "com.tencent.mm".into(),
        kind: SourceKind::Notification,
        name: "wechat-pay".into(),
        origin: RuleOrigin::System,
        priority: 0,
        enabled: true,
        auto_record: false,
        body: RuleBody::Pattern(PatternRule {
            regex: r"已支付¥(?P<money>[0-9.]+)".into(),
            kind: BillKind::Expense,
            channel: "wechat-pay".into(),
            currency: Some("CNY".into()),
        }),
    }
}

/// A UnionPay spend-notification pattern rule (second source for the same
/// transaction in convergence tests).
pub fn unionpay_rule() -> NewRule {
    NewRule {
        app: "com.unionpay".into(),
        kind: SourceKind::Notification,
        name: "unionpay-spend".into(),
        origin: RuleOrigin::System,
        priority: 0,
        enabled: true,
        auto_record: false,
        body: RuleBody::Pattern(PatternRule {
            regex: r"消费(?P<money>[0-9.]+)元".into(),
            kind: BillKind::Expense,
            channel: "unionpay".into(),
            currency: Some("CNY".into()),
        }),
    }
}

/// A WeChat payment notification payload for the given amount text.
pub fn wechat_payment(amount: &str) -> Payload {
    Payload::Text(format!("微信支付：已支付¥{amount}"))
}

/// A UnionPay spend notification payload for the given amount text.
pub fn unionpay_payment(amount: &str) -> Payload {
    Payload::Text(format!("云闪付：消费{amount}元"))
}
