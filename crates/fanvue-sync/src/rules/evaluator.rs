//! 规则判定（纯函数，无 I/O）

use crate::model::{CanonicalUser, FanUuid};
use crate::rules::{Rule, RuleKind};

/// 单条规则无法判定
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvaluationError {
    /// 本周期洞察查询失败，累计消费未知
    #[error("累计消费未知: {0}")]
    SpendUnknown(FanUuid),
}

/// 判定用户是否满足规则
///
/// 相同输入永远得到相同结果；平台上不存在的用户（[`CanonicalUser::absent`]）
/// 对所有规则返回 `Ok(false)`。`active_subscription: false` 的订阅规则永不成立，
/// 消费规则只对出现在订阅者 / 关注者中的用户成立。
pub fn evaluate(user: &CanonicalUser, rule: &Rule) -> Result<bool, EvaluationError> {
    evaluate_kind(user, &rule.kind)
}

pub fn evaluate_kind(user: &CanonicalUser, kind: &RuleKind) -> Result<bool, EvaluationError> {
    match kind {
        RuleKind::Subscription { active_subscription } => Ok(*active_subscription && user.active_subscription),
        RuleKind::Spending { min_lifetime_spend_cents } => match user.lifetime_spend_cents {
            Some(spent) => Ok(user.on_platform && spent >= *min_lifetime_spend_cents),
            None => Err(EvaluationError::SpendUnknown(user.uuid.clone())),
        },
        RuleKind::TopSpender => Ok(user.top_spender),
        RuleKind::Unlock { content_id } => Ok(user.unlocked_content.contains(content_id)),
        RuleKind::List { .. } => Ok(kind.list_ref().is_some_and(|list| user.lists.contains(&list))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ListKind, ListRef};

    fn user() -> CanonicalUser {
        let mut user = CanonicalUser::present("fan-1".into());
        user.active_subscription = true;
        user.lifetime_spend_cents = Some(2500);
        user.unlocked_content.insert("post-1".to_string());
        user.lists.insert(ListRef::new("vip", ListKind::Custom));
        user
    }

    fn rule(kind: RuleKind) -> Rule {
        Rule::new(kind)
    }

    #[test]
    fn subscription_rule() {
        let sub = rule(RuleKind::Subscription { active_subscription: true });
        assert_eq!(evaluate(&user(), &sub), Ok(true));
        let lapsed = rule(RuleKind::Subscription { active_subscription: false });
        assert_eq!(evaluate(&user(), &lapsed), Ok(false));

        let mut follower = user();
        follower.active_subscription = false;
        assert_eq!(evaluate(&follower, &sub), Ok(false));
        assert_eq!(evaluate(&follower, &lapsed), Ok(false));
    }

    #[test]
    fn zero_threshold_needs_platform_presence() {
        let free = rule(RuleKind::Spending { min_lifetime_spend_cents: 0 });
        assert_eq!(evaluate(&CanonicalUser::present("fan-2".into()), &free), Ok(true));
        assert_eq!(evaluate(&CanonicalUser::absent("ghost".into()), &free), Ok(false));
    }

    #[test]
    fn spending_threshold_is_inclusive() {
        let at = rule(RuleKind::Spending { min_lifetime_spend_cents: 2500 });
        let above = rule(RuleKind::Spending { min_lifetime_spend_cents: 2501 });
        assert_eq!(evaluate(&user(), &at), Ok(true));
        assert_eq!(evaluate(&user(), &above), Ok(false));
    }

    #[test]
    fn unknown_spend_is_an_error() {
        let mut u = user();
        u.lifetime_spend_cents = None;
        let r = rule(RuleKind::Spending { min_lifetime_spend_cents: 1 });
        assert_eq!(evaluate(&u, &r), Err(EvaluationError::SpendUnknown("fan-1".into())));
        // 不依赖消费的规则照常判定
        assert_eq!(evaluate(&u, &rule(RuleKind::TopSpender)), Ok(false));
    }

    #[test]
    fn unlock_and_list_rules() {
        assert_eq!(evaluate(&user(), &rule(RuleKind::Unlock { content_id: "post-1".into() })), Ok(true));
        assert_eq!(evaluate(&user(), &rule(RuleKind::Unlock { content_id: "post-2".into() })), Ok(false));

        let custom = rule(RuleKind::List { list_id: "vip".into(), list_kind: ListKind::Custom });
        let smart = rule(RuleKind::List { list_id: "vip".into(), list_kind: ListKind::Smart });
        assert_eq!(evaluate(&user(), &custom), Ok(true));
        assert_eq!(evaluate(&user(), &smart), Ok(false));
    }

    #[test]
    fn absent_user_fails_every_rule_without_error() {
        let absent = CanonicalUser::absent("ghost".into());
        let rules = [
            RuleKind::Subscription { active_subscription: true },
            RuleKind::Subscription { active_subscription: false },
            RuleKind::Spending { min_lifetime_spend_cents: 1 },
            RuleKind::Spending { min_lifetime_spend_cents: 0 },
            RuleKind::Spending { min_lifetime_spend_cents: -100 },
            RuleKind::TopSpender,
            RuleKind::Unlock { content_id: "post-1".into() },
            RuleKind::List { list_id: "vip".into(), list_kind: ListKind::Custom },
        ];
        for kind in rules {
            assert_eq!(evaluate(&absent, &rule(kind)), Ok(false));
        }
    }

    #[test]
    fn evaluation_is_deterministic() {
        let u = user();
        let r = rule(RuleKind::Spending { min_lifetime_spend_cents: 100 });
        let first = evaluate(&u, &r);
        for _ in 0..10 {
            assert_eq!(evaluate(&u, &r), first);
        }
    }
}
