//! Helix EventSub subscription API
//!
//! `SubscriptionApi` decouples the reconciler from the HTTP client so the
//! reconciliation algorithm can be exercised against an in-memory fake.
//! Every call returns a `Result`; a non-2xx answer is `Error::Api` with the
//! status and body, never silently ignored.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::debug;
use twitch_auth::TokenManager;

use crate::error::{Error, Result};
use crate::types::{CreateSubscription, Subscription, SubscriptionPage};

/// Boxed future returned by `SubscriptionApi` methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The three subscription calls the reconciler needs.
///
/// Uses boxed futures so implementations can sit behind `Arc<dyn SubscriptionApi>`.
pub trait SubscriptionApi: Send + Sync {
    /// Every subscription owned by this app, across all pages.
    fn list(&self) -> BoxFuture<'_, Result<Vec<Subscription>>>;

    /// Delete one subscription by id.
    fn delete<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Create a subscription and return what Helix recorded.
    fn create<'a>(
        &'a self,
        request: &'a CreateSubscription,
    ) -> BoxFuture<'a, Result<Subscription>>;
}

/// `SubscriptionApi` over the Helix REST API.
///
/// Reads the app token from the `TokenManager` on every call, so a refresh
/// done mid-run is picked up by the next request.
pub struct HelixClient {
    tokens: Arc<TokenManager>,
}

impl HelixClient {
    pub fn new(tokens: Arc<TokenManager>) -> Self {
        Self { tokens }
    }

    /// Start a request with the Helix auth headers (`Bearer` + `Client-Id`).
    async fn authorized(&self, method: reqwest::Method) -> Result<reqwest::RequestBuilder> {
        let token = self.tokens.get_token().await?;
        let url = self.tokens.endpoints().subscriptions_url();
        Ok(self
            .tokens
            .http_client()
            .request(method, url)
            .bearer_auth(token.expose())
            .header("Client-Id", self.tokens.client_id()))
    }

    async fn list_all(&self) -> Result<Vec<Subscription>> {
        let mut subscriptions = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut request = self.authorized(reqwest::Method::GET).await?;
            if let Some(after) = &cursor {
                request = request.query(&[("after", after.as_str())]);
            }

            let response = request
                .send()
                .await
                .map_err(|e| Error::Http(format!("listing subscriptions: {e}")))?;
            let page: SubscriptionPage = decode(response).await?;

            debug!(
                page_len = page.data.len(),
                total = page.total,
                "fetched subscription page"
            );
            subscriptions.extend(page.data);

            match page.pagination.cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        Ok(subscriptions)
    }

    async fn delete_one(&self, id: &str) -> Result<()> {
        let response = self
            .authorized(reqwest::Method::DELETE)
            .await?
            .query(&[("id", id)])
            .send()
            .await
            .map_err(|e| Error::Http(format!("deleting subscription {id}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(api_error(response).await);
        }
        Ok(())
    }

    async fn create_one(&self, request: &CreateSubscription) -> Result<Subscription> {
        let response = self
            .authorized(reqwest::Method::POST)
            .await?
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Http(format!("creating {} subscription: {e}", request.kind)))?;

        let page: SubscriptionPage = decode(response).await?;
        page.data
            .into_iter()
            .next()
            .ok_or_else(|| Error::Decode("create response carried no subscription".into()))
    }
}

impl SubscriptionApi for HelixClient {
    fn list(&self) -> BoxFuture<'_, Result<Vec<Subscription>>> {
        Box::pin(self.list_all())
    }

    fn delete<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.delete_one(id))
    }

    fn create<'a>(
        &'a self,
        request: &'a CreateSubscription,
    ) -> BoxFuture<'a, Result<Subscription>> {
        Box::pin(self.create_one(request))
    }
}

/// Turn a non-2xx response into `Error::Api`.
async fn api_error(response: reqwest::Response) -> Error {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("<no body>"));
    Error::Api { status, body }
}

/// Check the status, then parse the JSON body.
async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    if !response.status().is_success() {
        return Err(api_error(response).await);
    }
    response
        .json::<T>()
        .await
        .map_err(|e| Error::Decode(e.to_string()))
}
