//! 差异计算（纯函数）- 目标状态 vs 观察到的成员 → 有序动作
//!
//! 规则：
//! - 任一规则成立且未观察到 → grant（对每个已绑定标识）
//! - 已观察到、可解析、且所有规则都不成立 → 按失效策略 revoke / kick / ignore
//! - 任一规则判定出错且没有规则成立 → 本周期不移除
//! - 无法解析的现有成员永远不移除
//! - 所有 grant 排在所有 revoke / kick 之前

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::address_book::AddressBook;
use crate::model::{ActionIntent, ActionKind, CanonicalUser, ExpiryPolicy, FanUuid, Platform, PlatformId, SyncDecision, TargetId};
use crate::rules::{evaluate, RuleSet};
use crate::sync::universe::Universe;

/// 一个周期的动作计划
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    pub grants: Vec<ActionIntent>,
    pub removals: Vec<ActionIntent>,
    /// on_expiry = ignore 保留下来的成员（只记录，不执行）
    pub ignored: Vec<ActionIntent>,
    pub decisions: Vec<SyncDecision>,
    pub evaluation_errors: usize,
    /// 因判定出错而暂缓移除
    pub deferred_removals: usize,
    /// 无法解析的现有成员
    pub unresolved: usize,
    pub targets: usize,
}

impl SyncPlan {
    /// 执行顺序：先全部 grant，再全部移除
    pub fn actions(&self) -> impl Iterator<Item = &ActionIntent> {
        self.grants.iter().chain(self.removals.iter())
    }

    pub fn action_count(&self) -> usize {
        self.grants.len() + self.removals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.action_count() == 0
    }
}

/// 计算单个目标的差异，追加到计划中
pub struct TargetDiff<'a> {
    pub target: &'a TargetId,
    pub rules: &'a RuleSet,
    pub observed: &'a HashSet<PlatformId>,
    pub platform: Platform,
    pub default_expiry: ExpiryPolicy,
}

impl TargetDiff<'_> {
    pub fn plan_into(&self, plan: &mut SyncPlan, universe: &Universe, book: &AddressBook) {
        plan.targets += 1;
        let removal_policy = self.rules.removal_policy(self.default_expiry);

        for uuid in book.uuids() {
            // 只处理能唯一解析回该用户的标识
            let ids: Vec<PlatformId> = book
                .linked_ids(&uuid, self.platform)
                .into_iter()
                .filter(|id| book.resolve(id).as_ref() == Some(&uuid))
                .collect();
            if ids.is_empty() {
                continue;
            }

            let absent;
            let user = match universe.user(&uuid) {
                Some(user) => user,
                None => {
                    absent = CanonicalUser::absent(uuid.clone());
                    &absent
                }
            };

            let mut granting_rule = None;
            let mut errored = false;
            for (index, rule) in self.rules.rules.iter().enumerate() {
                let holds = match evaluate(user, rule) {
                    Ok(holds) => holds,
                    Err(e) => {
                        debug!("规则 {} 对 {} 判定失败: {}", rule, uuid, e);
                        plan.evaluation_errors += 1;
                        errored = true;
                        false
                    }
                };
                if holds && granting_rule.is_none() {
                    granting_rule = Some(index);
                }
                plan.decisions.push(SyncDecision {
                    uuid: uuid.clone(),
                    target: self.target.clone(),
                    rule_index: index,
                    holds,
                });
            }

            match granting_rule {
                Some(index) => {
                    for id in ids.iter().filter(|id| !self.observed.contains(*id)) {
                        let reason = format!("rule #{} ({}) holds", index, self.rules.rules[index]);
                        plan.grants.push(
                            ActionIntent::new(ActionKind::Grant, self.target.clone(), id.clone(), reason)
                                .with_uuid(uuid.clone())
                                .with_rule(index),
                        );
                    }
                }
                None => {
                    for id in ids.iter().filter(|id| self.observed.contains(*id)) {
                        if errored {
                            warn!("⚠️ {} 的规则判定出错，本周期不移除 {} @ {}", uuid, id, self.target);
                            plan.deferred_removals += 1;
                            continue;
                        }
                        plan_removal(plan, removal_policy, self.target, id, &uuid);
                    }
                }
            }
        }

        for id in self.observed {
            if book.resolve(id).is_none() {
                debug!("无法解析的成员 {} @ {}，保持不动", id, self.target);
                plan.unresolved += 1;
            }
        }
    }
}

fn plan_removal(plan: &mut SyncPlan, policy: ExpiryPolicy, target: &TargetId, id: &PlatformId, uuid: &FanUuid) {
    let (kind, bucket) = match policy {
        ExpiryPolicy::RemoveMembership => (ActionKind::Revoke, &mut plan.removals),
        ExpiryPolicy::Kick => (ActionKind::Kick, &mut plan.removals),
        ExpiryPolicy::Ignore => (ActionKind::Ignore, &mut plan.ignored),
    };
    bucket.push(
        ActionIntent::new(kind, target.clone(), id.clone(), "no rule holds")
            .with_uuid(uuid.clone()),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{Rule, RuleKind};

    fn book() -> AddressBook {
        AddressBook::from_yaml_str(
            r#"
alice: ["@alice:hs", "111"]
bob: "@bob:hs"
carol: "@carol:hs"
"#,
        )
        .unwrap()
    }

    fn subscriber(uuid: &str) -> CanonicalUser {
        let mut user = CanonicalUser::present(uuid.into());
        user.active_subscription = true;
        user
    }

    fn subscription_rules() -> RuleSet {
        RuleSet::single(Rule::new(RuleKind::Subscription { active_subscription: true }))
    }

    fn observed(ids: &[&str]) -> HashSet<PlatformId> {
        ids.iter().map(|id| PlatformId::from(*id)).collect()
    }

    fn plan(universe: &Universe, rules: &RuleSet, members: &HashSet<PlatformId>, default: ExpiryPolicy) -> SyncPlan {
        let target = TargetId::from("!room:hs");
        let mut plan = SyncPlan::default();
        TargetDiff {
            target: &target,
            rules,
            observed: members,
            platform: Platform::Matrix,
            default_expiry: default,
        }
        .plan_into(&mut plan, universe, &book());
        plan
    }

    #[test]
    fn grants_missing_and_revokes_lapsed() {
        let universe = Universe::from_users([subscriber("alice"), CanonicalUser::absent("bob".into())]);
        let members = observed(&["@bob:hs"]);
        let plan = plan(&universe, &subscription_rules(), &members, ExpiryPolicy::Kick);

        assert_eq!(plan.grants.len(), 1);
        assert_eq!(plan.grants[0].platform_id.as_str(), "@alice:hs");
        assert_eq!(plan.grants[0].rule_index, Some(0));
        assert_eq!(plan.removals.len(), 1);
        assert_eq!(plan.removals[0].kind, ActionKind::Kick);
        assert_eq!(plan.removals[0].platform_id.as_str(), "@bob:hs");
    }

    #[test]
    fn converged_state_yields_no_actions() {
        let universe = Universe::from_users([subscriber("alice")]);
        let members = observed(&["@alice:hs"]);
        let plan = plan(&universe, &subscription_rules(), &members, ExpiryPolicy::Kick);
        assert!(plan.is_empty());
    }

    #[test]
    fn unresolved_members_are_never_removed() {
        let universe = Universe::default();
        let members = observed(&["@stranger:hs"]);
        let plan = plan(&universe, &subscription_rules(), &members, ExpiryPolicy::Kick);
        assert!(plan.removals.is_empty());
        assert_eq!(plan.unresolved, 1);
    }

    #[test]
    fn ignore_policy_records_without_acting() {
        let universe = Universe::from_users([CanonicalUser::absent("bob".into())]);
        let members = observed(&["@bob:hs"]);
        let rules = subscription_rules().with_expiry(ExpiryPolicy::Ignore);
        let plan = plan(&universe, &rules, &members, ExpiryPolicy::Kick);
        assert!(plan.is_empty());
        assert_eq!(plan.ignored.len(), 1);
        assert_eq!(plan.ignored[0].kind, ActionKind::Ignore);
    }

    #[test]
    fn evaluation_error_defers_removal() {
        let mut carol = CanonicalUser::absent("carol".into());
        carol.lifetime_spend_cents = None;
        let universe = Universe::from_users([carol]);
        let members = observed(&["@carol:hs"]);
        let rules = RuleSet::new(vec![
            Rule::new(RuleKind::Spending { min_lifetime_spend_cents: 100 }),
            Rule::new(RuleKind::TopSpender),
        ]);
        let plan = plan(&universe, &rules, &members, ExpiryPolicy::Kick);
        assert!(plan.removals.is_empty());
        assert_eq!(plan.deferred_removals, 1);
        assert_eq!(plan.evaluation_errors, 1);
    }

    #[test]
    fn evaluation_error_does_not_block_other_granting_rule() {
        let mut carol = subscriber("carol");
        carol.lifetime_spend_cents = None;
        let universe = Universe::from_users([carol]);
        let rules = RuleSet::new(vec![
            Rule::new(RuleKind::Spending { min_lifetime_spend_cents: 100 }),
            Rule::new(RuleKind::Subscription { active_subscription: true }),
        ]);
        let plan = plan(&universe, &rules, &HashSet::new(), ExpiryPolicy::Kick);
        assert_eq!(plan.grants.len(), 1);
        assert_eq!(plan.grants[0].rule_index, Some(1));
    }

    #[test]
    fn only_identifiers_of_the_adapter_platform_are_used() {
        let universe = Universe::from_users([subscriber("alice")]);
        let plan = plan(&universe, &subscription_rules(), &HashSet::new(), ExpiryPolicy::Kick);
        // alice 的 Discord 标识 111 不属于 Matrix
        assert_eq!(plan.grants.len(), 1);
        assert_eq!(plan.decisions.len(), 3);
    }

    #[test]
    fn least_destructive_policy_applies_across_rules() {
        let universe = Universe::from_users([CanonicalUser::absent("bob".into())]);
        let members = observed(&["@bob:hs"]);
        let rules = RuleSet::new(vec![
            Rule::new(RuleKind::Subscription { active_subscription: true }).with_expiry(ExpiryPolicy::Kick),
            Rule::new(RuleKind::TopSpender).with_expiry(ExpiryPolicy::RemoveMembership),
        ]);
        let plan = plan(&universe, &rules, &members, ExpiryPolicy::Kick);
        assert_eq!(plan.removals[0].kind, ActionKind::Revoke);
    }
}
