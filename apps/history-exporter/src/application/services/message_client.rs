//! Message Client
//!
//! Typed request/response calls on top of raw subscriptions: builds the
//! request body with the current session token, issues the subscription and
//! waits for its single response, bounded by the response timeout.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::application::ports::{RequestError, SubscriptionPort, TokenSource};
use crate::domain::subscription::SubscriptionRequest;

/// Request/response client over a [`SubscriptionPort`].
pub struct MessageClient {
    port: Arc<dyn SubscriptionPort>,
    tokens: Arc<dyn TokenSource>,
    response_timeout: Duration,
    jurisdiction: Option<String>,
}

impl MessageClient {
    /// Create a client issuing subscriptions through `port`.
    #[must_use]
    pub fn new(
        port: Arc<dyn SubscriptionPort>,
        tokens: Arc<dyn TokenSource>,
        response_timeout: Duration,
    ) -> Self {
        Self {
            port,
            tokens,
            response_timeout,
            jurisdiction: None,
        }
    }

    /// Send `jurisdiction` with instrument requests.
    #[must_use]
    pub fn with_jurisdiction(mut self, jurisdiction: Option<String>) -> Self {
        self.jurisdiction = jurisdiction;
        self
    }

    /// Issue `request` and wait for its response body.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Subscribe`] if the subscription cannot be sent and
    /// [`RequestError::Subscription`] if it closes or times out first.
    pub async fn request(&self, request: SubscriptionRequest) -> Result<Bytes, RequestError> {
        let kind = request.kind;
        let pending = self.port.subscribe(request).await?;
        let id = pending.id();

        let body = pending.recv_timeout(self.response_timeout).await?;
        tracing::debug!(subscription_id = id, kind = %kind, bytes = body.len(), "Response received");
        Ok(body)
    }

    /// Fetch one page of the transaction timeline.
    ///
    /// # Errors
    ///
    /// See [`MessageClient::request`].
    pub async fn transactions(&self, after: Option<&str>) -> Result<Bytes, RequestError> {
        let token = self.tokens.tokens().session;
        self.request(SubscriptionRequest::transactions(
            token,
            after.map(str::to_string),
        ))
        .await
    }

    /// Fetch the detail view of one transaction.
    ///
    /// # Errors
    ///
    /// See [`MessageClient::request`].
    pub async fn transaction_detail(&self, transaction_id: &str) -> Result<Bytes, RequestError> {
        let token = self.tokens.tokens().session;
        self.request(SubscriptionRequest::transaction_detail(token, transaction_id))
            .await
    }

    /// Fetch the static data of one instrument.
    ///
    /// # Errors
    ///
    /// See [`MessageClient::request`].
    pub async fn instrument(&self, isin: &str) -> Result<Bytes, RequestError> {
        let token = self.tokens.tokens().session;
        self.request(SubscriptionRequest::instrument(
            token,
            isin,
            self.jurisdiction.clone(),
        ))
        .await
    }
}

impl std::fmt::Debug for MessageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageClient")
            .field("response_timeout", &self.response_timeout)
            .field("jurisdiction", &self.jurisdiction)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{MockTokenSource, SessionTokens, SubscriptionError};
    use crate::application::services::testing::ScriptedPort;
    use crate::domain::subscription::SubscriptionKind;

    fn tokens(session: &str) -> Arc<MockTokenSource> {
        let session = session.to_string();
        let mut mock = MockTokenSource::new();
        mock.expect_tokens().returning(move || SessionTokens {
            session: session.clone(),
            refresh: None,
        });
        Arc::new(mock)
    }

    #[tokio::test]
    async fn request_carries_session_token_and_returns_body() {
        let port = ScriptedPort::new(|_| Some(Bytes::from_static(b"{\"ok\":true}")));
        let client = MessageClient::new(port.clone(), tokens("sess"), Duration::from_secs(1));

        let body = client.transaction_detail("tx-9").await.unwrap();

        assert_eq!(body, Bytes::from_static(b"{\"ok\":true}"));
        let sent = port.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, SubscriptionKind::TimelineDetail);
        assert_eq!(sent[0].token, "sess");
        assert_eq!(sent[0].id.as_deref(), Some("tx-9"));
    }

    #[tokio::test]
    async fn instrument_request_carries_jurisdiction() {
        let port = ScriptedPort::new(|_| Some(Bytes::from_static(b"{}")));
        let client = MessageClient::new(port.clone(), tokens("sess"), Duration::from_secs(1))
            .with_jurisdiction(Some("AT".to_string()));

        client.instrument("DE0007164600").await.unwrap();

        let sent = port.requests();
        assert_eq!(sent[0].jurisdiction.as_deref(), Some("AT"));
        assert_eq!(sent[0].id.as_deref(), Some("DE0007164600"));
    }

    #[tokio::test]
    async fn closed_subscription_is_reported() {
        let port = ScriptedPort::new(|_| None);
        let client = MessageClient::new(port, tokens("sess"), Duration::from_secs(1));

        let err = client.transactions(None).await.unwrap_err();

        assert!(matches!(
            err,
            RequestError::Subscription(SubscriptionError::Closed(1))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_subscription_times_out() {
        let port = ScriptedPort::silent();
        let client = MessageClient::new(port, tokens("sess"), Duration::from_secs(2));

        let err = client.transactions(None).await.unwrap_err();

        assert!(matches!(
            err,
            RequestError::Subscription(SubscriptionError::Timeout { .. })
        ));
    }
}
