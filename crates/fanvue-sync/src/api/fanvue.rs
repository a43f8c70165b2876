//! [`MonetizationApi`] 的 HTTP 实现

use async_trait::async_trait;
use reqwest::Method;
use tracing::{debug, warn};

use crate::api::types::{CursorPage, EarningItem, EarningsQuery, FanInsights, FanSummary, ListMember, Page};
use crate::api::{Audience, MonetizationApi};
use crate::error::{Result, SyncError};
use crate::http_client::FanvueHttpClient;
use crate::model::{FanUuid, ListKind, ListRef};
use crate::rate_limiter::WaitPolicy;

pub struct FanvueApi {
    http: FanvueHttpClient,
    page_size: u32,
}

impl FanvueApi {
    pub fn new(http: FanvueHttpClient, page_size: u32) -> Self {
        Self {
            http,
            page_size: page_size.max(1),
        }
    }

    pub fn http(&self) -> &FanvueHttpClient {
        &self.http
    }

    fn page_params(&self, page: u32) -> Vec<(&'static str, String)> {
        vec![("page", page.to_string()), ("size", self.page_size.to_string())]
    }

    fn list_member_path(list_id: &str, uuid: &FanUuid) -> String {
        format!("/lists/{}/{}/members/{}", ListKind::Custom.as_str(), list_id, uuid)
    }
}

#[async_trait]
impl MonetizationApi for FanvueApi {
    async fn fans_page(&self, audience: Audience, page: u32) -> Result<Page<FanSummary>> {
        self.http.get_json(audience.path(), &self.page_params(page)).await
    }

    async fn fan_insights(&self, uuid: &FanUuid) -> Result<Option<FanInsights>> {
        let endpoint = format!("/insights/fans/{}", uuid);
        match self.http.get_json(&endpoint, &[]).await {
            Ok(insights) => Ok(Some(insights)),
            Err(SyncError::Remote { status: 404, .. }) => {
                debug!("粉丝不存在: {}", uuid);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn earnings_page(&self, query: &EarningsQuery, cursor: Option<&str>) -> Result<CursorPage<EarningItem>> {
        let mut params = vec![("size", self.page_size.to_string())];
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor.to_string()));
        }
        if let Some(start) = query.start_date {
            params.push(("startDate", start.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)));
        }
        if !query.sources.is_empty() {
            params.push(("source", query.sources.join(",")));
        }
        self.http.get_json("/insights/earnings", &params).await
    }

    async fn list_members_page(&self, list: &ListRef, page: u32) -> Result<Page<ListMember>> {
        let endpoint = format!("/lists/{}/{}/members", list.kind.as_str(), list.id);
        self.http.get_json(&endpoint, &self.page_params(page)).await
    }

    async fn add_list_member(&self, list_id: &str, uuid: &FanUuid) -> Result<()> {
        let endpoint = Self::list_member_path(list_id, uuid);
        match self
            .http
            .request(Method::POST, &endpoint, &[], None, WaitPolicy::Wait)
            .await
        {
            Ok(_) => Ok(()),
            Err(SyncError::Remote { status: 409, .. }) => {
                debug!("已在列表中: list={}, fan={}", list_id, uuid);
                Ok(())
            }
            Err(e) => {
                warn!("加入列表失败: list={}, fan={}: {}", list_id, uuid, e);
                Err(e)
            }
        }
    }

    async fn remove_list_member(&self, list_id: &str, uuid: &FanUuid) -> Result<()> {
        let endpoint = Self::list_member_path(list_id, uuid);
        match self
            .http
            .request(Method::DELETE, &endpoint, &[], None, WaitPolicy::Wait)
            .await
        {
            Ok(_) => Ok(()),
            Err(SyncError::Remote { status: 404, .. }) => {
                debug!("不在列表中: list={}, fan={}", list_id, uuid);
                Ok(())
            }
            Err(e) => {
                warn!("移出列表失败: list={}, fan={}: {}", list_id, uuid, e);
                Err(e)
            }
        }
    }
}
