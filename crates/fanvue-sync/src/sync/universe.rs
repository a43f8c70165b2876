//! 本周期的用户全集 - 远端快照 + 本地交易缓存 → CanonicalUser
//!
//! 订阅者 / 关注者 / 列表的拉取失败会中止整个周期；单个用户的洞察查询
//! 失败只影响依赖累计消费的规则（`lifetime_spend_cents = None`）。
//! 不在订阅者 / 关注者中的用户仍保留本地解锁记录与列表成员身份。

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use crate::address_book::AddressBook;
use crate::api::{collect_fans, collect_list_members, Audience, FanSummary, MonetizationApi};
use crate::error::Result;
use crate::model::{CanonicalUser, FanUuid, ListRef};
use crate::rules::RuleMap;
use crate::storage::TransactionStore;

/// 周期内的洞察缓存：同一用户只查询一次，失败也会被记住
#[derive(Debug, Default)]
pub struct InsightCache {
    entries: HashMap<FanUuid, Option<i64>>,
}

impl InsightCache {
    pub async fn lifetime_spend<A>(&mut self, api: &A, uuid: &FanUuid) -> Option<i64>
    where
        A: MonetizationApi + ?Sized,
    {
        if let Some(cached) = self.entries.get(uuid) {
            return *cached;
        }
        let spend = match api.fan_insights(uuid).await {
            Ok(Some(insights)) => Some(insights.lifetime_spend_cents()),
            Ok(None) => Some(0),
            Err(e) => {
                warn!("获取粉丝洞察失败 {}: {}", uuid, e);
                None
            }
        };
        self.entries.insert(uuid.clone(), spend);
        spend
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 本周期快照
#[derive(Debug, Default)]
pub struct Universe {
    users: HashMap<FanUuid, CanonicalUser>,
    lists: HashMap<ListRef, HashSet<FanUuid>>,
    /// 远端平台上存在的用户数（订阅者 ∪ 关注者）
    platform_users: usize,
}

impl Universe {
    /// 为地址簿中的每个用户构造快照
    pub async fn build<A>(api: &A, store: &TransactionStore, book: &AddressBook, rules: &RuleMap) -> Result<Self>
    where
        A: MonetizationApi + ?Sized,
    {
        info!("👥 拉取订阅者...");
        let subscribers = collect_fans(api, Audience::Subscribers).await?;
        info!("👥 拉取关注者...");
        let followers = collect_fans(api, Audience::Followers).await?;

        let mut lists = HashMap::new();
        for list in rules.referenced_lists() {
            let members: HashSet<FanUuid> = collect_list_members(api, &list).await?.into_iter().collect();
            debug!("列表 {} 有 {} 个成员", list, members.len());
            lists.insert(list, members);
        }

        let subscribed: HashSet<&FanUuid> = subscribers.iter().map(|f| &f.uuid).collect();
        let mut known: HashMap<&FanUuid, &FanSummary> = HashMap::new();
        for fan in subscribers.iter().chain(followers.iter()) {
            let entry = known.entry(&fan.uuid).or_insert(fan);
            if fan.is_top_spender && !entry.is_top_spender {
                *entry = fan;
            }
        }

        let needs_insights = rules.needs_insights();
        let mut insights = InsightCache::default();
        let mut users = HashMap::new();

        for uuid in book.uuids() {
            // 解锁与列表不依赖订阅 / 关注状态
            let unlocked_content = store.unlocked_content(&uuid).await?;
            let user_lists: HashSet<ListRef> = lists
                .iter()
                .filter(|(_, members)| members.contains(&uuid))
                .map(|(list, _)| list.clone())
                .collect();

            let mut user = match known.get(&uuid) {
                Some(fan) => {
                    let mut user = CanonicalUser::present(uuid.clone());
                    user.active_subscription = subscribed.contains(&uuid);
                    user.top_spender = fan.is_top_spender;
                    user.lifetime_spend_cents = if needs_insights {
                        insights.lifetime_spend(api, &uuid).await
                    } else {
                        Some(store.total_spend_cents(&uuid).await?)
                    };
                    user
                }
                None => CanonicalUser::absent(uuid.clone()),
            };
            user.unlocked_content = unlocked_content;
            user.lists = user_lists;
            users.insert(uuid, user);
        }

        let platform_users = known.len();
        info!(
            "✅ 快照完成: 订阅者 {}，关注者 {}，地址簿用户 {}，洞察查询 {}",
            subscribers.len(),
            followers.len(),
            users.len(),
            insights.len()
        );

        Ok(Self {
            users,
            lists,
            platform_users,
        })
    }

    pub fn user(&self, uuid: &FanUuid) -> Option<&CanonicalUser> {
        self.users.get(uuid)
    }

    pub fn users(&self) -> impl Iterator<Item = &CanonicalUser> {
        self.users.values()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn platform_users(&self) -> usize {
        self.platform_users
    }

    pub fn list_members(&self, list: &ListRef) -> Option<&HashSet<FanUuid>> {
        self.lists.get(list)
    }

    /// 测试 / 离线规划用：直接由用户构造
    pub fn from_users(users: impl IntoIterator<Item = CanonicalUser>) -> Self {
        let users: HashMap<FanUuid, CanonicalUser> = users.into_iter().map(|u| (u.uuid.clone(), u)).collect();
        Self {
            platform_users: users.len(),
            users,
            lists: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ListKind;
    use crate::rules::{Rule, RuleKind, RuleSet};
    use crate::testing::{earning, FakeMonetizationApi};
    use crate::sync::ledger::to_record;

    fn book() -> AddressBook {
        AddressBook::from_yaml_str(
            r#"
sub: "@sub:example.org"
follower: "@follower:example.org"
ghost: "@ghost:example.org"
"#,
        )
        .unwrap()
    }

    fn spending_rules() -> RuleMap {
        let mut rules = RuleMap::new();
        rules.insert("1".into(), RuleSet::single(Rule::new(RuleKind::Spending { min_lifetime_spend_cents: 100 })));
        rules.insert("2".into(), RuleSet::single(Rule::new(RuleKind::Spending { min_lifetime_spend_cents: 900 })));
        rules
    }

    #[tokio::test]
    async fn builds_snapshot_for_linked_users() {
        let api = FakeMonetizationApi::new();
        api.add_subscribers(["sub"]);
        api.add_followers(["follower"]);
        api.set_top_spender("follower");
        api.set_lifetime_spend("sub", 1000);
        api.fail_insights_for("follower");

        let store = TransactionStore::open_in_memory().unwrap();
        store
            .record_if_new(&to_record(&earning("tx-1", "follower", "post-1", 0)).unwrap())
            .await
            .unwrap();

        let universe = Universe::build(&api, &store, &book(), &spending_rules()).await.unwrap();
        assert_eq!(universe.len(), 3);
        assert_eq!(universe.platform_users(), 2);

        let sub = universe.user(&"sub".into()).unwrap();
        assert!(sub.active_subscription);
        assert_eq!(sub.lifetime_spend_cents, Some(1000));

        let follower = universe.user(&"follower".into()).unwrap();
        assert!(!follower.active_subscription);
        assert!(follower.top_spender);
        assert_eq!(follower.lifetime_spend_cents, None);
        assert!(follower.unlocked_content.contains("post-1"));

        assert_eq!(universe.user(&"ghost".into()), Some(&CanonicalUser::absent("ghost".into())));
    }

    #[tokio::test]
    async fn insights_are_fetched_once_per_user_per_cycle() {
        let api = FakeMonetizationApi::new();
        api.add_subscribers(["sub", "follower"]);
        let store = TransactionStore::open_in_memory().unwrap();

        Universe::build(&api, &store, &book(), &spending_rules()).await.unwrap();
        // 两个目标都依赖累计消费，但每个用户只查一次；不在平台上的用户不查
        assert_eq!(api.insight_calls(), 2);
    }

    #[tokio::test]
    async fn list_snapshots_are_attached() {
        let api = FakeMonetizationApi::new();
        api.add_subscribers(["sub", "follower"]);
        let vip = ListRef::new("vip", ListKind::Smart);
        api.set_list(vip.clone(), ["sub"]);

        let mut rules = RuleMap::new();
        rules.insert(
            "1".into(),
            RuleSet::single(Rule::new(RuleKind::List { list_id: "vip".into(), list_kind: ListKind::Smart })),
        );
        let store = TransactionStore::open_in_memory().unwrap();
        let universe = Universe::build(&api, &store, &book(), &rules).await.unwrap();

        assert!(universe.user(&"sub".into()).unwrap().lists.contains(&vip));
        assert!(universe.user(&"follower".into()).unwrap().lists.is_empty());
        assert_eq!(universe.list_members(&vip).map(|m| m.len()), Some(1));
        assert_eq!(api.insight_calls(), 0);
    }

    #[tokio::test]
    async fn unfollowed_buyer_keeps_unlocks_and_lists() {
        let api = FakeMonetizationApi::new();
        let vip = ListRef::new("vip", ListKind::Custom);
        api.set_list(vip.clone(), ["ghost"]);
        let store = TransactionStore::open_in_memory().unwrap();
        store
            .record_if_new(&to_record(&earning("tx-1", "ghost", "post-1", 0)).unwrap())
            .await
            .unwrap();

        let mut rules = RuleMap::new();
        rules.insert(
            "1".into(),
            RuleSet::single(Rule::new(RuleKind::List { list_id: "vip".into(), list_kind: ListKind::Custom })),
        );
        let universe = Universe::build(&api, &store, &book(), &rules).await.unwrap();

        let ghost = universe.user(&"ghost".into()).unwrap();
        assert!(!ghost.on_platform);
        assert!(!ghost.active_subscription);
        assert!(ghost.unlocked_content.contains("post-1"));
        assert!(ghost.lists.contains(&vip));
    }

    #[tokio::test]
    async fn listing_outage_aborts() {
        let api = FakeMonetizationApi::new();
        api.fail_listings(true);
        let store = TransactionStore::open_in_memory().unwrap();
        assert!(Universe::build(&api, &store, &book(), &spending_rules()).await.is_err());
    }
}
