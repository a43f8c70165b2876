//! 规则模块 - 声明式成员资格规则及其配置形态
//!
//! 每个同步目标（Discord 角色 / Matrix 房间）对应一个有序规则集；任意一条规则
//! 成立即授予成员资格。规则集在配置中允许三种写法：
//!
//! ```yaml
//! "1234": { type: subscription }                 # 单条规则
//! "5678": [ { type: top_spender }, { type: unlock, content_id: p1 } ]
//! "!room:example.org":
//!   on_expiry: ignore
//!   rules: [ { type: spending, min_lifetime_spend_cents: 5000 } ]
//! ```

pub mod evaluator;

use std::collections::BTreeSet;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::model::{ExpiryPolicy, ListKind, ListRef, TargetId};

pub use evaluator::{evaluate, EvaluationError};

/// 规则类型及其参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleKind {
    /// 订阅有效
    Subscription {
        #[serde(default = "default_true")]
        active_subscription: bool,
    },
    /// 累计消费达到阈值
    #[serde(alias = "spending_threshold")]
    Spending { min_lifetime_spend_cents: i64 },
    /// 平台标记的大额消费者
    TopSpender,
    /// 解锁过指定内容
    #[serde(alias = "content_unlock")]
    Unlock { content_id: String },
    /// 位于指定列表中
    #[serde(alias = "list_membership")]
    List {
        list_id: String,
        #[serde(default)]
        list_kind: ListKind,
    },
}

fn default_true() -> bool {
    true
}

impl RuleKind {
    /// 是否需要单用户洞察查询
    pub fn needs_insights(&self) -> bool {
        matches!(self, Self::Spending { .. })
    }

    pub fn list_ref(&self) -> Option<ListRef> {
        match self {
            Self::List { list_id, list_kind } => Some(ListRef::new(list_id.clone(), *list_kind)),
            _ => None,
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subscription { active_subscription: true } => write!(f, "subscription"),
            Self::Subscription { active_subscription: false } => write!(f, "no_subscription"),
            Self::Spending { min_lifetime_spend_cents } => write!(f, "spending>={}", min_lifetime_spend_cents),
            Self::TopSpender => write!(f, "top_spender"),
            Self::Unlock { content_id } => write!(f, "unlock:{}", content_id),
            Self::List { list_id, list_kind } => write!(f, "list:{}:{}", list_kind.as_str(), list_id),
        }
    }
}

/// 单条规则
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(flatten)]
    pub kind: RuleKind,
    /// 规则级失效策略，覆盖规则集级与平台默认值
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_expiry: Option<ExpiryPolicy>,
}

impl Rule {
    pub fn new(kind: RuleKind) -> Self {
        Self { kind, on_expiry: None }
    }

    pub fn with_expiry(mut self, policy: ExpiryPolicy) -> Self {
        self.on_expiry = Some(policy);
        self
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.kind.fmt(f)
    }
}

/// 一个目标的规则集
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RuleSetRepr", into = "RuleSetRepr")]
pub struct RuleSet {
    pub rules: Vec<Rule>,
    /// 规则集级失效策略
    pub on_expiry: Option<ExpiryPolicy>,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RuleSetRepr {
    Grouped {
        rules: Vec<Rule>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        on_expiry: Option<ExpiryPolicy>,
    },
    Many(Vec<Rule>),
    Single(Rule),
}

impl From<RuleSetRepr> for RuleSet {
    fn from(repr: RuleSetRepr) -> Self {
        match repr {
            RuleSetRepr::Grouped { rules, on_expiry } => Self { rules, on_expiry },
            RuleSetRepr::Many(rules) => Self { rules, on_expiry: None },
            RuleSetRepr::Single(rule) => Self::single(rule),
        }
    }
}

impl From<RuleSet> for RuleSetRepr {
    fn from(set: RuleSet) -> Self {
        RuleSetRepr::Grouped {
            rules: set.rules,
            on_expiry: set.on_expiry,
        }
    }
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules, on_expiry: None }
    }

    pub fn single(rule: Rule) -> Self {
        Self::new(vec![rule])
    }

    pub fn with_expiry(mut self, policy: ExpiryPolicy) -> Self {
        self.on_expiry = Some(policy);
        self
    }

    /// 第 `index` 条规则的有效失效策略：规则级 > 规则集级 > 平台默认
    pub fn effective_expiry(&self, index: usize, platform_default: ExpiryPolicy) -> ExpiryPolicy {
        self.rules
            .get(index)
            .and_then(|r| r.on_expiry)
            .or(self.on_expiry)
            .unwrap_or(platform_default)
    }

    /// 整个目标失去资格时采用的策略：各规则有效策略中破坏性最小者
    pub fn removal_policy(&self, platform_default: ExpiryPolicy) -> ExpiryPolicy {
        (0..self.rules.len())
            .map(|i| self.effective_expiry(i, platform_default))
            .reduce(ExpiryPolicy::least_destructive)
            .unwrap_or(platform_default)
    }
}

/// 目标 → 规则集 的一项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRules {
    pub target: TargetId,
    pub rules: RuleSet,
}

/// 目标 → 规则集（保持配置中的顺序）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleMap {
    entries: Vec<TargetRules>,
}

impl RuleMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入或替换目标的规则集；替换时保留原位置
    pub fn insert(&mut self, target: TargetId, rules: RuleSet) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.target == target) {
            entry.rules = rules;
        } else {
            self.entries.push(TargetRules { target, rules });
        }
    }

    pub fn get(&self, target: &TargetId) -> Option<&RuleSet> {
        self.entries.iter().find(|e| &e.target == target).map(|e| &e.rules)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TargetRules> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn all_rules(&self) -> impl Iterator<Item = &Rule> {
        self.entries.iter().flat_map(|e| e.rules.rules.iter())
    }

    /// 是否有规则需要单用户洞察
    pub fn needs_insights(&self) -> bool {
        self.all_rules().any(|r| r.kind.needs_insights())
    }

    /// 规则引用到的列表（去重，稳定顺序）
    pub fn referenced_lists(&self) -> Vec<ListRef> {
        let mut seen = BTreeSet::new();
        let mut lists = Vec::new();
        for list in self.all_rules().filter_map(|r| r.kind.list_ref()) {
            if seen.insert((list.kind.as_str(), list.id.clone())) {
                lists.push(list);
            }
        }
        lists
    }
}

impl Serialize for RuleMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for entry in &self.entries {
            map.serialize_entry(&entry.target, &entry.rules)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for RuleMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct RuleMapVisitor;

        impl<'de> Visitor<'de> for RuleMapVisitor {
            type Value = RuleMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping of target id to rule set")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<RuleMap, A::Error> {
                let mut map = RuleMap::new();
                while let Some((target, rules)) = access.next_entry::<String, RuleSet>()? {
                    map.insert(TargetId::new(target), rules);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(RuleMapVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_rule_set_shapes_in_order() {
        let yaml = r#"
"1234": { type: subscription }
"5678":
  - type: top_spender
  - type: unlock
    content_id: post-1
    on_expiry: kick
"!vip:example.org":
  on_expiry: ignore
  rules:
    - type: spending
      min_lifetime_spend_cents: 5000
"#;
        let map: RuleMap = serde_yaml::from_str(yaml).unwrap();
        let targets: Vec<&str> = map.iter().map(|e| e.target.as_str()).collect();
        assert_eq!(targets, vec!["1234", "5678", "!vip:example.org"]);

        let single = map.get(&"1234".into()).unwrap();
        assert_eq!(single.rules, vec![Rule::new(RuleKind::Subscription { active_subscription: true })]);

        let many = map.get(&"5678".into()).unwrap();
        assert_eq!(many.rules[0].kind, RuleKind::TopSpender);
        assert_eq!(many.rules[1].on_expiry, Some(ExpiryPolicy::Kick));

        let grouped = map.get(&"!vip:example.org".into()).unwrap();
        assert_eq!(grouped.on_expiry, Some(ExpiryPolicy::Ignore));
        assert_eq!(grouped.rules[0].kind, RuleKind::Spending { min_lifetime_spend_cents: 5000 });
    }

    #[test]
    fn list_rule_defaults_to_custom_list() {
        let rule: Rule = serde_yaml::from_str("{ type: list, list_id: abc }").unwrap();
        assert_eq!(rule.kind.list_ref(), Some(ListRef::new("abc", ListKind::Custom)));
    }

    #[test]
    fn rule_level_expiry_overrides_set_and_default() {
        let set = RuleSet::new(vec![
            Rule::new(RuleKind::TopSpender).with_expiry(ExpiryPolicy::Kick),
            Rule::new(RuleKind::Subscription { active_subscription: true }),
        ])
        .with_expiry(ExpiryPolicy::RemoveMembership);

        assert_eq!(set.effective_expiry(0, ExpiryPolicy::Ignore), ExpiryPolicy::Kick);
        assert_eq!(set.effective_expiry(1, ExpiryPolicy::Ignore), ExpiryPolicy::RemoveMembership);
        assert_eq!(RuleSet::single(Rule::new(RuleKind::TopSpender)).effective_expiry(0, ExpiryPolicy::Kick), ExpiryPolicy::Kick);
    }

    #[test]
    fn removal_policy_is_least_destructive() {
        let set = RuleSet::new(vec![
            Rule::new(RuleKind::TopSpender).with_expiry(ExpiryPolicy::Kick),
            Rule::new(RuleKind::Unlock { content_id: "p".into() }).with_expiry(ExpiryPolicy::Ignore),
        ]);
        assert_eq!(set.removal_policy(ExpiryPolicy::RemoveMembership), ExpiryPolicy::Ignore);

        let set = RuleSet::single(Rule::new(RuleKind::TopSpender));
        assert_eq!(set.removal_policy(ExpiryPolicy::Kick), ExpiryPolicy::Kick);
    }

    #[test]
    fn referenced_lists_are_deduplicated() {
        let mut map = RuleMap::new();
        let list = |id: &str| Rule::new(RuleKind::List { list_id: id.into(), list_kind: ListKind::Smart });
        map.insert("1".into(), RuleSet::new(vec![list("a"), list("b")]));
        map.insert("2".into(), RuleSet::single(list("a")));
        assert_eq!(map.referenced_lists().len(), 2);
        assert!(!map.needs_insights());
    }

    #[test]
    fn serialized_map_keeps_order() {
        let mut map = RuleMap::new();
        map.insert("b".into(), RuleSet::single(Rule::new(RuleKind::TopSpender)));
        map.insert("a".into(), RuleSet::single(Rule::new(RuleKind::TopSpender)));
        let yaml = serde_yaml::to_string(&map).unwrap();
        let back: RuleMap = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, map);
        assert!(yaml.find("b:").unwrap() < yaml.find("a:").unwrap());
    }
}
