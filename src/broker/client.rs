/// Typed broker client: mint/daily-bars/quote/lookup over the KIS-like REST
/// surface, gated by a rate limiter and a session manager. Owns
/// serialization only; retry policy belongs to callers (collector, engine).
use chrono::NaiveDate;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Result, ScreenerError};
use crate::ratelimit::RateLimiter;
use crate::session::SessionManager;
use crate::types::{DailyBar, Market, Quote, Session};

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    grant_type: &'a str,
    appkey: &'a str,
    appsecret: &'a str,
}

#[derive(Debug, Deserialize)]
struct DailyPriceItem {
    #[serde(alias = "stck_bsop_date", alias = "xymd")]
    trade_date: String,
    #[serde(alias = "stck_oprc", alias = "open")]
    open: String,
    #[serde(alias = "stck_hgpr", alias = "high")]
    high: String,
    #[serde(alias = "stck_lwpr", alias = "low")]
    low: String,
    #[serde(alias = "stck_clpr", alias = "clos")]
    close: String,
    #[serde(alias = "acml_vol", alias = "tvol", default)]
    volume: String,
}

#[derive(Debug, Deserialize)]
struct RecentDailyResponse {
    rt_cd: String,
    msg1: String,
    output: Vec<DailyPriceItem>,
}

#[derive(Debug, Deserialize)]
struct PeriodDailyResponse {
    rt_cd: String,
    msg1: String,
    output2: Vec<DailyPriceItem>,
}

#[derive(Debug, Deserialize)]
struct QuoteOutput {
    stck_prpr: String,
    hts_avls: Option<String>,
    per: Option<String>,
    pbr: Option<String>,
    eps: Option<String>,
    bps: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    rt_cd: String,
    msg1: String,
    output: QuoteOutput,
}

#[derive(Debug, Deserialize)]
struct SearchInfoOutput {
    prdt_name: String,
}

#[derive(Debug, Deserialize)]
struct SearchInfoResponse {
    rt_cd: String,
    msg1: String,
    output: SearchInfoOutput,
}

/// Thin wrapper over the broker's HTTPS surface for one environment.
pub struct BrokerClient {
    client: Client,
    base_url: String,
    app_key: String,
    app_secret: String,
    session: SessionManager,
    rate_limiter: Arc<RateLimiter>,
}

impl BrokerClient {
    pub fn new(
        base_url: String,
        app_key: String,
        app_secret: String,
        session: SessionManager,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("failed to build broker http client");

        BrokerClient {
            client,
            base_url,
            app_key,
            app_secret,
            session,
            rate_limiter,
        }
    }

    async fn token(&self) -> Result<String> {
        self.session.acquire(|| self.mint_token()).await
    }

    /// Mints unconditionally, bypassing the session cache, to confirm a
    /// credential pair is actually accepted by the broker.
    pub async fn validate(&self) -> Result<()> {
        self.mint_token().await?;
        Ok(())
    }

    async fn mint_token(&self) -> Result<Session> {
        self.rate_limiter.acquire().await;

        let url = format!("{}/oauth2/tokenP", self.base_url);
        let body = TokenRequest {
            grant_type: "client_credentials",
            appkey: &self.app_key,
            appsecret: &self.app_secret,
        };

        let resp = self.client.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(ScreenerError::AuthFailure(format!(
                "token mint returned status {}",
                resp.status()
            )));
        }

        let parsed: TokenResponse = resp.json().await.map_err(|e| {
            ScreenerError::AuthFailure(format!("could not parse token response: {e}"))
        })?;

        let now = chrono::Utc::now();
        Ok(Session {
            token: parsed.access_token,
            issued_at: now,
            expires_at: now + chrono::Duration::seconds(parsed.expires_in),
        })
    }

    fn headers(&self, token: &str, tr_id: &str) -> reqwest::header::HeaderMap {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::AUTHORIZATION,
            format!("Bearer {token}").parse().unwrap(),
        );
        headers.insert("appkey", self.app_key.parse().unwrap());
        headers.insert("appsecret", self.app_secret.parse().unwrap());
        headers.insert("tr_id", tr_id.parse().unwrap());
        headers.insert("custtype", "P".parse().unwrap());
        headers
    }

    fn overseas_exchange_code(market: Market) -> &'static str {
        match market {
            Market::Nasdaq => "NAS",
            Market::Nyse => "NYS",
            Market::Amex => "AMS",
            Market::Kospi | Market::Kosdaq => "",
        }
    }

    fn parse_bar(item: &DailyPriceItem) -> Option<DailyBar> {
        let trade_date = NaiveDate::parse_from_str(&item.trade_date, "%Y%m%d").ok()?;
        Some(DailyBar {
            trade_date,
            open: item.open.trim().parse().ok()?,
            high: item.high.trim().parse().ok()?,
            low: item.low.trim().parse().ok()?,
            close: item.close.trim().parse().ok()?,
            volume: item.volume.trim().parse().unwrap_or(0),
        })
    }

    /// Up to `n` most-recent bars, newest-first. The broker caps this
    /// endpoint at roughly 30 bars regardless of `n`; callers that need a
    /// longer history use `period_daily` instead.
    pub async fn recent_daily(&self, market: Market, id: &str, n: usize) -> Result<Vec<DailyBar>> {
        self.rate_limiter.acquire().await;
        let token = self.token().await?;

        if market.is_korean() {
            let url = format!(
                "{}/uapi/domestic-stock/v1/quotations/inquire-daily-price",
                self.base_url
            );
            let resp = self
                .client
                .get(&url)
                .headers(self.headers(&token, "FHKST01010400"))
                .query(&[
                    ("fid_cond_mrkt_div_code", "J"),
                    ("fid_input_iscd", id),
                    ("fid_period_div_code", "D"),
                    ("fid_org_adj_prc", "0"),
                ])
                .send()
                .await?;
            let parsed: RecentDailyResponse = resp.json().await?;
            self.ensure_ok(&parsed.rt_cd, &parsed.msg1)?;
            Ok(parsed
                .output
                .iter()
                .take(n)
                .filter_map(Self::parse_bar)
                .collect())
        } else {
            let url = format!("{}/uapi/overseas-price/v1/quotations/dailyprice", self.base_url);
            let resp = self
                .client
                .get(&url)
                .headers(self.headers(&token, "HHDFS76240000"))
                .query(&[
                    ("EXCD", Self::overseas_exchange_code(market)),
                    ("SYMB", id),
                    ("GUBN", "0"),
                    ("MODP", "0"),
                ])
                .send()
                .await?;
            let parsed: PeriodDailyResponse = resp.json().await?;
            self.ensure_ok(&parsed.rt_cd, &parsed.msg1)?;
            Ok(parsed
                .output2
                .iter()
                .take(n)
                .filter_map(Self::parse_bar)
                .collect())
        }
    }

    /// Bars within `[start, end]`, newest-first. Used for backfill, which
    /// walks six 100-day windows backward from today.
    pub async fn period_daily(
        &self,
        market: Market,
        id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyBar>> {
        self.rate_limiter.acquire().await;
        let token = self.token().await?;

        let url = if market.is_korean() {
            format!(
                "{}/uapi/domestic-stock/v1/quotations/inquire-daily-itemchartprice",
                self.base_url
            )
        } else {
            format!("{}/uapi/overseas-price/v1/quotations/dailyprice", self.base_url)
        };

        let start_str = start.format("%Y%m%d").to_string();
        let end_str = end.format("%Y%m%d").to_string();

        let resp = if market.is_korean() {
            self.client
                .get(&url)
                .headers(self.headers(&token, "FHKST03010100"))
                .query(&[
                    ("FID_COND_MRKT_DIV_CODE", "J"),
                    ("FID_INPUT_ISCD", id),
                    ("FID_INPUT_DATE_1", &start_str),
                    ("FID_INPUT_DATE_2", &end_str),
                    ("FID_PERIOD_DIV_CODE", "D"),
                    ("FID_ORG_ADJ_PRC", "0"),
                ])
                .send()
                .await?
        } else {
            self.client
                .get(&url)
                .headers(self.headers(&token, "HHDFS76240000"))
                .query(&[
                    ("EXCD", Self::overseas_exchange_code(market)),
                    ("SYMB", id),
                    ("GUBN", "0"),
                    ("MODP", "0"),
                    ("BYMD", &end_str),
                ])
                .send()
                .await?
        };

        let parsed: PeriodDailyResponse = resp.json().await?;
        self.ensure_ok(&parsed.rt_cd, &parsed.msg1)?;

        Ok(parsed
            .output2
            .iter()
            .filter_map(Self::parse_bar)
            .filter(|bar| bar.trade_date >= start && bar.trade_date <= end)
            .collect())
    }

    pub async fn current_quote(&self, _market: Market, id: &str) -> Result<Quote> {
        self.rate_limiter.acquire().await;
        let token = self.token().await?;

        let url = format!("{}/uapi/domestic-stock/v1/quotations/inquire-price", self.base_url);
        let resp = self
            .client
            .get(&url)
            .headers(self.headers(&token, "FHKST01010100"))
            .query(&[
                ("fid_cond_mrkt_div_code", "J"),
                ("fid_input_iscd", id),
            ])
            .send()
            .await?;

        let parsed: QuoteResponse = resp.json().await?;
        self.ensure_ok(&parsed.rt_cd, &parsed.msg1)?;

        let o = parsed.output;
        Ok(Quote {
            price: o.stck_prpr.trim().parse().unwrap_or(0.0),
            market_cap: o.hts_avls.and_then(|v| v.trim().parse().ok()),
            per: o.per.and_then(|v| v.trim().parse().ok()),
            pbr: o.pbr.and_then(|v| v.trim().parse().ok()),
            eps: o.eps.and_then(|v| v.trim().parse().ok()),
            bps: o.bps.and_then(|v| v.trim().parse().ok()),
        })
    }

    pub async fn lookup_name(&self, id: &str) -> Result<String> {
        self.rate_limiter.acquire().await;
        let token = self.token().await?;

        let url = format!("{}/uapi/domestic-stock/v1/quotations/search-info", self.base_url);
        let resp = self
            .client
            .get(&url)
            .headers(self.headers(&token, "CTPF1604R"))
            .query(&[("PRDT_TYPE_CD", "300"), ("PDNO", id)])
            .send()
            .await?;

        let parsed: SearchInfoResponse = resp.json().await?;
        self.ensure_ok(&parsed.rt_cd, &parsed.msg1)?;
        Ok(parsed.output.prdt_name)
    }

    fn ensure_ok(&self, rt_cd: &str, msg: &str) -> Result<()> {
        if rt_cd != "0" {
            warn!(rt_cd, msg, "broker returned non-zero status");
            return Err(ScreenerError::BrokerError {
                code: rt_cd.to_string(),
                message: msg.to_string(),
            });
        }
        debug!("broker call succeeded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionManager;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base_url: String, tmp: &tempfile::TempDir) -> BrokerClient {
        let session = SessionManager::new(tmp.path().join("token.json"), 5);
        BrokerClient::new(
            base_url,
            "app-key".to_string(),
            "app-secret".to_string(),
            session,
            Arc::new(RateLimiter::new(50)),
        )
    }

    #[tokio::test]
    async fn mints_token_then_reuses_it_for_a_second_call() {
        let server = MockServer::start().await;
        let tmp = tempfile::tempdir().unwrap();

        Mock::given(method("POST"))
            .and(path("/oauth2/tokenP"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok-123",
                "token_type": "Bearer",
                "expires_in": 86400,
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/uapi/domestic-stock/v1/quotations/inquire-price"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "rt_cd": "0",
                "msg1": "ok",
                "output": {
                    "stck_prpr": "72300",
                    "hts_avls": "4300000",
                    "per": "12.3",
                    "pbr": "1.1",
                    "eps": "5200",
                    "bps": "45000",
                }
            })))
            .mount(&server)
            .await;

        let broker = client(server.uri(), &tmp);
        let q1 = broker.current_quote(Market::Kospi, "005930").await.unwrap();
        let q2 = broker.current_quote(Market::Kospi, "005930").await.unwrap();

        assert_eq!(q1.price, 72300.0);
        assert_eq!(q1.market_cap, Some(4300000));
        assert_eq!(q2.price, q1.price);
    }

    #[tokio::test]
    async fn broker_error_code_surfaces_as_broker_error() {
        let server = MockServer::start().await;
        let tmp = tempfile::tempdir().unwrap();

        Mock::given(method("POST"))
            .and(path("/oauth2/tokenP"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok-123",
                "token_type": "Bearer",
                "expires_in": 86400,
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/uapi/domestic-stock/v1/quotations/search-info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "rt_cd": "1",
                "msg1": "instrument not found",
                "output": { "prdt_name": "" }
            })))
            .mount(&server)
            .await;

        let broker = client(server.uri(), &tmp);
        let err = broker.lookup_name("999999").await.unwrap_err();
        assert!(matches!(err, ScreenerError::BrokerError { .. }));
    }
}
