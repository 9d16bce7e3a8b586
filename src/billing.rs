//! Billing and usage queries.

use std::sync::Arc;

use reqwest::Method;
use serde_json::Value;

use crate::client::ClientInner;
use crate::errors::Result;

/// Optional filters for `GET billing/usage`.
#[derive(Debug, Clone, Default)]
pub struct UsageQuery {
    /// Inclusive RFC 3339 start of the reporting window.
    pub start_date: Option<String>,
    /// Inclusive RFC 3339 end of the reporting window.
    pub end_date: Option<String>,
    pub currency: Option<String>,
    pub limit: Option<u32>,
    pub page: Option<u32>,
}

#[derive(Clone)]
pub struct BillingClient {
    pub(crate) inner: Arc<ClientInner>,
}

impl BillingClient {
    pub async fn usage(&self, query: UsageQuery) -> Result<Value> {
        let limit = query.limit.map(|v| v.to_string());
        let page = query.page.map(|v| v.to_string());
        let mut params: Vec<(&str, &str)> = Vec::new();
        if let Some(start) = query.start_date.as_deref() {
            params.push(("startDate", start));
        }
        if let Some(end) = query.end_date.as_deref() {
            params.push(("endDate", end));
        }
        if let Some(currency) = query.currency.as_deref() {
            params.push(("currency", currency));
        }
        if let Some(limit) = limit.as_deref() {
            params.push(("limit", limit));
        }
        if let Some(page) = page.as_deref() {
            params.push(("page", page));
        }
        let params = (!params.is_empty()).then_some(params.as_slice());
        self.inner
            .request_json(Method::GET, "billing/usage", params, None, None)
            .await
    }
}
