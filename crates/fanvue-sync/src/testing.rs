//! 测试用的内存实现：变现平台 API 与社区平台

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;

use crate::api::types::UserRef;
use crate::api::{Audience, CursorPage, EarningItem, EarningsQuery, FanInsights, FanSummary, ListMember, MonetizationApi, Page};
use crate::error::{Result, SyncError};
use crate::model::{ActionIntent, ActionKind, FanUuid, ListKind, ListRef, Platform, PlatformId, TargetId};
use crate::platform::PlatformAdapter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// 测试基准时间 + 分钟偏移
pub fn at_minute(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap() + Duration::minutes(minute)
}

pub fn earning(id: &str, buyer: &str, post: &str, minute: i64) -> EarningItem {
    EarningItem {
        id: Some(id.to_string()),
        post_uuid: Some(post.to_string()),
        user: Some(UserRef { uuid: buyer.into() }),
        sender: None,
        date: Some(at_minute(minute)),
        gross: Some(500),
        source: Some("post".to_string()),
    }
}

#[derive(Default)]
struct FakeState {
    subscribers: Vec<FanSummary>,
    followers: Vec<FanSummary>,
    insights: HashMap<FanUuid, FanInsights>,
    failing_insights: HashSet<FanUuid>,
    earnings: Vec<EarningItem>,
    failing_earnings_page: Option<usize>,
    lists: HashMap<ListRef, Vec<FanUuid>>,
}

/// 内存版变现平台
pub struct FakeMonetizationApi {
    state: Mutex<FakeState>,
    page_size: usize,
    calls: AtomicUsize,
    insight_calls: AtomicUsize,
    fail_listings: AtomicBool,
}

impl Default for FakeMonetizationApi {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeMonetizationApi {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            page_size: 50,
            calls: AtomicUsize::new(0),
            insight_calls: AtomicUsize::new(0),
            fail_listings: AtomicBool::new(false),
        }
    }

    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }

    pub fn add_subscribers<'a>(&self, uuids: impl IntoIterator<Item = &'a str>) {
        self.state.lock().subscribers.extend(uuids.into_iter().map(FanSummary::new));
    }

    pub fn add_followers<'a>(&self, uuids: impl IntoIterator<Item = &'a str>) {
        self.state.lock().followers.extend(uuids.into_iter().map(FanSummary::new));
    }

    pub fn remove_subscriber(&self, uuid: &str) {
        self.state.lock().subscribers.retain(|f| f.uuid.as_str() != uuid);
    }

    pub fn set_top_spender(&self, uuid: &str) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        for fan in state.subscribers.iter_mut().chain(state.followers.iter_mut()) {
            if fan.uuid.as_str() == uuid {
                fan.is_top_spender = true;
            }
        }
    }

    pub fn set_lifetime_spend(&self, uuid: &str, cents: i64) {
        self.state
            .lock()
            .insights
            .insert(uuid.into(), FanInsights::with_lifetime_spend(cents));
    }

    pub fn fail_insights_for(&self, uuid: &str) {
        self.state.lock().failing_insights.insert(uuid.into());
    }

    pub fn push_earnings(&self, items: impl IntoIterator<Item = EarningItem>) {
        self.state.lock().earnings.extend(items);
    }

    pub fn clear_earnings(&self) {
        self.state.lock().earnings.clear();
    }

    /// 第 `page`（从 0 开始）页账本请求失败
    pub fn fail_earnings_page(&self, page: Option<usize>) {
        self.state.lock().failing_earnings_page = page;
    }

    pub fn set_list(&self, list: ListRef, members: impl IntoIterator<Item = &'static str>) {
        self.state
            .lock()
            .lists
            .insert(list, members.into_iter().map(FanUuid::from).collect());
    }

    pub fn list_members(&self, list: &ListRef) -> Vec<FanUuid> {
        self.state.lock().lists.get(list).cloned().unwrap_or_default()
    }

    pub fn fail_listings(&self, fail: bool) {
        self.fail_listings.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn insight_calls(&self) -> usize {
        self.insight_calls.load(Ordering::SeqCst)
    }

    fn page_of<T: Clone>(&self, items: &[T], page: u32) -> Page<T> {
        let start = (page.saturating_sub(1) as usize) * self.page_size;
        let data: Vec<T> = items.iter().skip(start).take(self.page_size).cloned().collect();
        Page::new(data, start + self.page_size < items.len())
    }

    fn listing_outage(&self) -> Result<()> {
        if self.fail_listings.load(Ordering::SeqCst) {
            return Err(SyncError::Remote {
                status: 503,
                body: "listing unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MonetizationApi for FakeMonetizationApi {
    async fn fans_page(&self, audience: Audience, page: u32) -> Result<Page<FanSummary>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.listing_outage()?;
        let state = self.state.lock();
        let items = match audience {
            Audience::Subscribers => &state.subscribers,
            Audience::Followers => &state.followers,
        };
        Ok(self.page_of(items, page))
    }

    async fn fan_insights(&self, uuid: &FanUuid) -> Result<Option<FanInsights>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.insight_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock();
        if state.failing_insights.contains(uuid) {
            return Err(SyncError::Remote {
                status: 500,
                body: "insights unavailable".to_string(),
            });
        }
        Ok(state.insights.get(uuid).cloned())
    }

    async fn earnings_page(&self, query: &EarningsQuery, cursor: Option<&str>) -> Result<CursorPage<EarningItem>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let offset: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let state = self.state.lock();
        if state.failing_earnings_page == Some(offset / self.page_size) {
            return Err(SyncError::Remote {
                status: 502,
                body: "ledger unavailable".to_string(),
            });
        }
        let matching: Vec<EarningItem> = state
            .earnings
            .iter()
            .filter(|item| match (query.start_date, item.date) {
                (Some(start), Some(date)) => date >= start,
                _ => true,
            })
            .filter(|item| match &item.source {
                Some(source) => query.sources.is_empty() || query.sources.contains(source),
                None => true,
            })
            .cloned()
            .collect();
        let data: Vec<EarningItem> = matching.iter().skip(offset).take(self.page_size).cloned().collect();
        let next = offset + self.page_size;
        let next_cursor = (next < matching.len()).then(|| next.to_string());
        Ok(CursorPage::new(data, next_cursor))
    }

    async fn list_members_page(&self, list: &ListRef, page: u32) -> Result<Page<ListMember>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.listing_outage()?;
        let state = self.state.lock();
        let members: Vec<ListMember> = state
            .lists
            .get(list)
            .map(|m| m.iter().map(|uuid| ListMember { uuid: uuid.clone() }).collect())
            .unwrap_or_default();
        Ok(self.page_of(&members, page))
    }

    async fn add_list_member(&self, list_id: &str, uuid: &FanUuid) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        let members = state.lists.entry(ListRef::new(list_id, ListKind::Custom)).or_default();
        if !members.contains(uuid) {
            members.push(uuid.clone());
        }
        Ok(())
    }

    async fn remove_list_member(&self, list_id: &str, uuid: &FanUuid) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        if let Some(members) = state.lists.get_mut(&ListRef::new(list_id, ListKind::Custom)) {
            members.retain(|m| m != uuid);
        }
        Ok(())
    }
}

/// 内存版社区平台：`apply` 直接改写成员表
pub struct MemoryPlatform {
    platform: Platform,
    members: Mutex<HashMap<TargetId, HashSet<PlatformId>>>,
    applied: Mutex<Vec<ActionIntent>>,
    failing: Mutex<HashSet<PlatformId>>,
}

impl MemoryPlatform {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            members: Mutex::new(HashMap::new()),
            applied: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_members<'a>(self, target: &str, ids: impl IntoIterator<Item = &'a str>) -> Self {
        self.members
            .lock()
            .entry(target.into())
            .or_default()
            .extend(ids.into_iter().map(PlatformId::from));
        self
    }

    pub fn members(&self, target: &str) -> HashSet<PlatformId> {
        self.members.lock().get(&TargetId::from(target)).cloned().unwrap_or_default()
    }

    pub fn remove_member(&self, target: &str, id: &str) {
        if let Some(set) = self.members.lock().get_mut(&TargetId::from(target)) {
            set.remove(&PlatformId::from(id));
        }
    }

    pub fn applied(&self) -> Vec<ActionIntent> {
        self.applied.lock().clone()
    }

    pub fn fail_apply_for(&self, id: &str) {
        self.failing.lock().insert(id.into());
    }
}

#[async_trait]
impl PlatformAdapter for MemoryPlatform {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn current_members(&self, target: &TargetId) -> Result<HashSet<PlatformId>> {
        Ok(self.members.lock().get(target).cloned().unwrap_or_default())
    }

    async fn apply(&self, intent: &ActionIntent) -> Result<()> {
        if self.failing.lock().contains(&intent.platform_id) {
            return Err(SyncError::Other(format!("platform rejected {}", intent)));
        }
        self.applied.lock().push(intent.clone());
        let mut members = self.members.lock();
        let set = members.entry(intent.target.clone()).or_default();
        match intent.kind {
            ActionKind::Grant => {
                set.insert(intent.platform_id.clone());
            }
            ActionKind::Revoke | ActionKind::Kick => {
                set.remove(&intent.platform_id);
            }
            ActionKind::Ignore => {}
        }
        Ok(())
    }
}
