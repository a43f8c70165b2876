//! 变现平台 API
//!
//! [`MonetizationApi`] 是同步引擎依赖的接口，按"单页"粒度定义；
//! 本模块的 `*_pages` 函数把它包装成惰性的分页流，只有被消费时才发请求。

pub mod fanvue;
pub mod types;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};

use crate::error::Result;
use crate::model::{FanUuid, ListRef};

pub use fanvue::FanvueApi;
pub use types::{CursorPage, EarningItem, EarningsQuery, FanInsights, FanSummary, ListMember, Page};

/// 粉丝列表
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Audience {
    Subscribers,
    Followers,
}

impl Audience {
    pub fn path(self) -> &'static str {
        match self {
            Self::Subscribers => "/subscribers",
            Self::Followers => "/followers",
        }
    }
}

/// 变现平台接口
#[async_trait]
pub trait MonetizationApi: Send + Sync {
    /// 订阅者 / 关注者的第 `page` 页（从 1 开始）
    async fn fans_page(&self, audience: Audience, page: u32) -> Result<Page<FanSummary>>;

    /// 单个粉丝的洞察；平台上不存在时返回 None
    async fn fan_insights(&self, uuid: &FanUuid) -> Result<Option<FanInsights>>;

    /// 收入账本的一页
    async fn earnings_page(&self, query: &EarningsQuery, cursor: Option<&str>) -> Result<CursorPage<EarningItem>>;

    /// 列表成员的第 `page` 页
    async fn list_members_page(&self, list: &ListRef, page: u32) -> Result<Page<ListMember>>;

    /// 加入自定义列表（已在列表中视为成功）
    async fn add_list_member(&self, list_id: &str, uuid: &FanUuid) -> Result<()>;

    /// 移出自定义列表（不在列表中视为成功）
    async fn remove_list_member(&self, list_id: &str, uuid: &FanUuid) -> Result<()>;
}

/// 页码分页流：`hasMore` 为 false 或遇到空页时结束
fn numbered_pages<'a, T, F, Fut>(fetch: F) -> BoxStream<'a, Result<Vec<T>>>
where
    T: Send + 'a,
    F: Fn(u32) -> Fut + Send + 'a,
    Fut: std::future::Future<Output = Result<Page<T>>> + Send + 'a,
{
    stream::try_unfold((Some(1u32), fetch), |(page, fetch)| async move {
        let Some(page) = page else {
            return Ok(None);
        };
        let result = fetch(page).await?;
        let next = if result.has_more() && !result.data.is_empty() {
            Some(page + 1)
        } else {
            None
        };
        Ok(Some((result.data, (next, fetch))))
    })
    .boxed()
}

pub fn fan_pages<'a, A>(api: &'a A, audience: Audience) -> BoxStream<'a, Result<Vec<FanSummary>>>
where
    A: MonetizationApi + ?Sized,
{
    numbered_pages(move |page| api.fans_page(audience, page))
}

pub fn list_member_pages<'a, A>(api: &'a A, list: &'a ListRef) -> BoxStream<'a, Result<Vec<ListMember>>>
where
    A: MonetizationApi + ?Sized,
{
    numbered_pages(move |page| api.list_members_page(list, page))
}

enum CursorState {
    Start,
    Next(String),
    Done,
}

/// 收入账本分页流：没有 `nextCursor` 时结束
pub fn earning_pages<'a, A>(api: &'a A, query: &'a EarningsQuery) -> BoxStream<'a, Result<Vec<EarningItem>>>
where
    A: MonetizationApi + ?Sized,
{
    stream::try_unfold(CursorState::Start, move |state| async move {
        let cursor = match state {
            CursorState::Done => return Ok(None),
            CursorState::Start => None,
            CursorState::Next(cursor) => Some(cursor),
        };
        let page = api.earnings_page(query, cursor.as_deref()).await?;
        let next = match page.next_cursor {
            Some(c) if !c.is_empty() => CursorState::Next(c),
            _ => CursorState::Done,
        };
        Ok(Some((page.data, next)))
    })
    .boxed()
}

/// 拉取完整的订阅者 / 关注者列表
pub async fn collect_fans<A>(api: &A, audience: Audience) -> Result<Vec<FanSummary>>
where
    A: MonetizationApi + ?Sized,
{
    fan_pages(api, audience).try_concat().await
}

/// 拉取完整的列表成员
pub async fn collect_list_members<A>(api: &A, list: &ListRef) -> Result<Vec<FanUuid>>
where
    A: MonetizationApi + ?Sized,
{
    let members = list_member_pages(api, list).try_concat().await?;
    Ok(members.into_iter().map(|m| m.uuid).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeMonetizationApi;

    #[tokio::test]
    async fn fan_pages_are_lazy() {
        let api = FakeMonetizationApi::new().with_page_size(2);
        api.add_subscribers(["a", "b", "c"]);

        let mut pages = fan_pages(&api, Audience::Subscribers);
        assert_eq!(api.calls(), 0);

        let first = pages.try_next().await.unwrap().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(api.calls(), 1);

        let second = pages.try_next().await.unwrap().unwrap();
        assert_eq!(second.len(), 1);
        assert!(pages.try_next().await.unwrap().is_none());
        assert_eq!(api.calls(), 2);
    }

    #[tokio::test]
    async fn collect_fans_concatenates_pages() {
        let api = FakeMonetizationApi::new().with_page_size(2);
        api.add_followers(["f1", "f2", "f3", "f4", "f5"]);
        let fans = collect_fans(&api, Audience::Followers).await.unwrap();
        let ids: Vec<&str> = fans.iter().map(|f| f.uuid.as_str()).collect();
        assert_eq!(ids, vec!["f1", "f2", "f3", "f4", "f5"]);
    }

    #[tokio::test]
    async fn listing_failure_is_propagated() {
        let api = FakeMonetizationApi::new();
        api.fail_listings(true);
        assert!(collect_fans(&api, Audience::Subscribers).await.is_err());
    }
}
