//! HTTP transport for the review-service JSON API
//!
//! Two endpoints are used: the SEO meta-data endpoint, once per company, to
//! resolve the numeric company id behind a URL slug, and the review data
//! endpoint for each page. Every non-success response is mapped onto a
//! [`FailureClass`] here so the crawling layer never sees raw status codes.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, COOKIE, HeaderMap, HeaderName, HeaderValue, REFERER, RETRY_AFTER, USER_AGENT};
use reqwest::{Client, ClientBuilder, StatusCode};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::crawling::{FetchFailure, ReviewSource};
use crate::domain::{CompanyId, PageRequest, Review, ReviewPage};
use crate::infrastructure::config::HttpConfig;
use crate::infrastructure::credentials::Credential;

const API_PREFIX: &str = "servicegateway-ambitionbox/review-services/v0";

/// reqwest-backed [`ReviewSource`]
pub struct HttpReviewSource {
    client: Client,
    config: HttpConfig,
    /// slug -> numeric company id
    company_ids: RwLock<HashMap<CompanyId, String>>,
}

impl HttpReviewSource {
    /// Builds the client with the site's fixed headers. Cookies are sent per
    /// request from the [`Credential`], so the client keeps no cookie store.
    pub fn new(config: HttpConfig, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_str(&config.accept_language).context("Invalid accept-language header")?,
        );
        headers.insert(
            HeaderName::from_static("appid"),
            HeaderValue::from_str(&config.app_id).context("Invalid appid header")?,
        );
        headers.insert(
            HeaderName::from_static("systemid"),
            HeaderValue::from_str(&config.system_id).context("Invalid systemid header")?,
        );

        let client = ClientBuilder::new()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {e}"))?;

        info!(base_url = %config.base_url, "🌐 HttpReviewSource ready");
        Ok(Self {
            client,
            config,
            company_ids: RwLock::new(HashMap::new()),
        })
    }

    fn base(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn referer(&self, company: &CompanyId) -> String {
        format!("{}/reviews/{}-reviews", self.base(), company)
    }

    async fn get_json(
        &self,
        url: &str,
        query: &[(&str, String)],
        company: &CompanyId,
        credential: &Credential,
    ) -> Result<Value, FetchFailure> {
        let user_agent = credential.user_agent().unwrap_or(&self.config.user_agent);
        let response = self
            .client
            .get(url)
            .query(query)
            .header(COOKIE, credential.cookie_header())
            .header(REFERER, self.referer(company))
            .header(USER_AGENT, user_agent)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| parse_retry_after(v, Utc::now()));
            warn!(company = %company, %status, "❌ HTTP error from review service");
            return Err(classify_status(status, retry_after));
        }

        let body = response.text().await.map_err(|e| classify_transport(&e))?;
        serde_json::from_str(&body).map_err(|e| FetchFailure::permanent(format!("response body is not JSON: {e}")))
    }

    async fn resolve_company_id(&self, company: &CompanyId, credential: &Credential) -> Result<String, FetchFailure> {
        if let Some(id) = self.company_ids.read().await.get(company) {
            return Ok(id.clone());
        }

        let url = format!("{}/{API_PREFIX}/seo/{company}/meta-data", self.base());
        let body = self.get_json(&url, &[("page", "1".to_string())], company, credential).await?;
        let id = extract_company_id(&body)
            .ok_or_else(|| FetchFailure::permanent(format!("no company id in meta-data for '{company}'")))?;

        debug!(company = %company, company_id = %id, "🔎 resolved company id");
        self.company_ids.write().await.insert(company.clone(), id.clone());
        Ok(id)
    }
}

#[async_trait]
impl ReviewSource for HttpReviewSource {
    async fn fetch_page(&self, request: &PageRequest, credential: &Credential) -> Result<ReviewPage, FetchFailure> {
        let company_id = self.resolve_company_id(&request.company_id, credential).await?;
        let url = format!("{}/{API_PREFIX}/review/data/{company_id}", self.base());
        let query = [
            ("page", request.page_number().to_string()),
            ("limit", request.page_size.to_string()),
            ("isReviewRequest", "true".to_string()),
        ];

        let body = self.get_json(&url, &query, &request.company_id, credential).await?;
        parse_review_page(&request.company_id, &body, request.page_number(), request.page_size)
    }
}

/// Maps a non-success status onto the failure taxonomy
pub fn classify_status(status: StatusCode, retry_after: Option<Duration>) -> FetchFailure {
    let message = format!("HTTP {status}");
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FetchFailure::auth_expired(message),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
            FetchFailure::rate_limited(message).with_retry_after(retry_after)
        }
        StatusCode::REQUEST_TIMEOUT => FetchFailure::transient(message),
        s if s.is_server_error() => FetchFailure::transient(message),
        _ => FetchFailure::permanent(message),
    }
}

fn classify_transport(error: &reqwest::Error) -> FetchFailure {
    if error.is_builder() {
        FetchFailure::permanent(format!("invalid request: {error}"))
    } else {
        FetchFailure::transient(format!("request failed: {error}"))
    }
}

/// `Retry-After` is either delta-seconds or an HTTP date
pub fn parse_retry_after(raw: &str, now: DateTime<Utc>) -> Option<Duration> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

fn data_section(body: &Value) -> &Value {
    body.get("data").filter(|d| d.is_object()).unwrap_or(body)
}

/// Numeric id from the meta-data payload, at `data.company.id`
pub fn extract_company_id(body: &Value) -> Option<String> {
    match data_section(body).get("company")?.get("id")? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

/// Reviews at `data.reviews`. `has_more` trusts `data.pagination.totalPages`
/// when present, otherwise a full page implies another one.
pub fn parse_review_page(
    company: &CompanyId,
    body: &Value,
    page_number: u32,
    limit: u32,
) -> Result<ReviewPage, FetchFailure> {
    let data = body
        .get("data")
        .ok_or_else(|| FetchFailure::permanent("response has no 'data' section"))?;
    let raw = data
        .get("reviews")
        .and_then(Value::as_array)
        .ok_or_else(|| FetchFailure::permanent("response has no 'data.reviews' list"))?;

    let reviews: Vec<Review> = raw
        .iter()
        .filter_map(|item| Review::from_api_value(company, item))
        .collect();
    if reviews.len() < raw.len() {
        debug!(company = %company, page = page_number, skipped = raw.len() - reviews.len(), "skipped reviews without an id");
    }

    let total_pages = data
        .get("pagination")
        .and_then(|p| p.get("totalPages"))
        .and_then(|t| t.as_u64().or_else(|| t.as_str().and_then(|s| s.parse().ok())));

    let has_more = match total_pages {
        Some(total) => u64::from(page_number) < total && !raw.is_empty(),
        None => !raw.is_empty() && raw.len() >= limit as usize,
    };

    Ok(ReviewPage { reviews, has_more })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawling::FailureClass;
    use serde_json::json;

    #[test]
    fn status_mapping() {
        let cases = [
            (StatusCode::UNAUTHORIZED, FailureClass::AuthExpired),
            (StatusCode::FORBIDDEN, FailureClass::AuthExpired),
            (StatusCode::TOO_MANY_REQUESTS, FailureClass::RateLimited),
            (StatusCode::SERVICE_UNAVAILABLE, FailureClass::RateLimited),
            (StatusCode::REQUEST_TIMEOUT, FailureClass::TransientNetwork),
            (StatusCode::BAD_GATEWAY, FailureClass::TransientNetwork),
            (StatusCode::INTERNAL_SERVER_ERROR, FailureClass::TransientNetwork),
            (StatusCode::NOT_FOUND, FailureClass::Permanent),
            (StatusCode::BAD_REQUEST, FailureClass::Permanent),
        ];
        for (status, class) in cases {
            assert_eq!(classify_status(status, None).class, class, "{status}");
        }
    }

    #[test]
    fn rate_limit_keeps_retry_after() {
        let failure = classify_status(StatusCode::TOO_MANY_REQUESTS, Some(Duration::from_secs(7)));
        assert_eq!(failure.retry_after, Some(Duration::from_secs(7)));
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY, Some(Duration::from_secs(7))).retry_after, None);
    }

    #[test]
    fn retry_after_formats() {
        let now = DateTime::parse_from_rfc2822("Wed, 21 Oct 2015 07:28:00 GMT")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(parse_retry_after("120", now), Some(Duration::from_secs(120)));
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:30 GMT", now),
            Some(Duration::from_secs(30))
        );
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:27:00 GMT", now), Some(Duration::ZERO));
        assert_eq!(parse_retry_after("soon", now), None);
    }

    #[test]
    fn company_id_from_meta_data() {
        assert_eq!(extract_company_id(&json!({"data": {"company": {"id": 3725}}})), Some("3725".into()));
        assert_eq!(extract_company_id(&json!({"company": {"id": "99"}})), Some("99".into()));
        assert_eq!(extract_company_id(&json!({"data": {"company": {}}})), None);
    }

    #[test]
    fn has_more_from_total_pages() {
        let company = CompanyId::new("acme");
        let body = json!({"data": {
            "reviews": [{"id": "r1"}, {"id": "r2"}],
            "pagination": {"totalPages": 3}
        }});
        assert!(parse_review_page(&company, &body, 2, 20).unwrap().has_more);
        assert!(!parse_review_page(&company, &body, 3, 20).unwrap().has_more);
    }

    #[test]
    fn has_more_falls_back_to_full_page() {
        let company = CompanyId::new("acme");
        let full = json!({"data": {"reviews": [{"id": "r1"}, {"id": "r2"}]}});
        let page = parse_review_page(&company, &full, 1, 2).unwrap();
        assert_eq!(page.reviews.len(), 2);
        assert!(page.has_more);
        assert!(!parse_review_page(&company, &full, 1, 20).unwrap().has_more);
    }

    #[test]
    fn missing_reviews_is_permanent() {
        let company = CompanyId::new("acme");
        let failure = parse_review_page(&company, &json!({"data": {}}), 1, 20).unwrap_err();
        assert_eq!(failure.class, FailureClass::Permanent);
        let failure = parse_review_page(&company, &json!({"message": "x"}), 1, 20).unwrap_err();
        assert_eq!(failure.class, FailureClass::Permanent);
    }
}
