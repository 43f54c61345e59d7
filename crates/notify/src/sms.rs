use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kahawa_core::config::SmsConfig;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmsMessage {
    pub to: String,
    pub body: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmsReceipt {
    pub provider_message_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum SmsError {
    #[error("sms transport failed: {0}")]
    Transport(String),
    #[error("sms provider rejected the message with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("could not decode sms provider response: {0}")]
    Decode(String),
    #[error("sms delivery is disabled")]
    Disabled,
}

impl SmsError {
    /// Client errors other than throttling will not succeed on retry.
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::Rejected { status, .. } => (400..500).contains(status) && *status != 429,
            Self::Disabled => true,
            Self::Transport(_) | Self::Decode(_) => false,
        }
    }
}

#[async_trait]
pub trait SmsGateway: Send + Sync {
    async fn send(&self, message: &SmsMessage) -> Result<SmsReceipt, SmsError>;
}

#[derive(Serialize)]
struct ProviderRequest<'a> {
    to: &'a str,
    message: &'a str,
    sender_id: &'a str,
}

#[derive(Deserialize)]
struct ProviderResponse {
    #[serde(default, alias = "id", alias = "messageId")]
    message_id: Option<String>,
}

pub struct HttpSmsGateway {
    client: Client,
    provider_url: String,
    api_key: SecretString,
    sender_id: String,
}

impl HttpSmsGateway {
    pub fn new(
        provider_url: impl Into<String>,
        api_key: SecretString,
        sender_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SmsError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| SmsError::Transport(error.to_string()))?;
        Ok(Self { client, provider_url: provider_url.into(), api_key, sender_id: sender_id.into() })
    }
}

#[async_trait]
impl SmsGateway for HttpSmsGateway {
    async fn send(&self, message: &SmsMessage) -> Result<SmsReceipt, SmsError> {
        let response = self
            .client
            .post(&self.provider_url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&ProviderRequest {
                to: &message.to,
                message: &message.body,
                sender_id: &self.sender_id,
            })
            .send()
            .await
            .map_err(|error| SmsError::Transport(error.to_string()))?;

        let status = response.status();
        let body = response.text().await.map_err(|error| SmsError::Transport(error.to_string()))?;

        if !status.is_success() {
            return Err(SmsError::Rejected { status: status.as_u16(), body });
        }

        if body.trim().is_empty() {
            return Ok(SmsReceipt::default());
        }

        let parsed: ProviderResponse =
            serde_json::from_str(&body).map_err(|error| SmsError::Decode(error.to_string()))?;
        Ok(SmsReceipt { provider_message_id: parsed.message_id })
    }
}

/// Stands in for a provider when SMS is switched off.
#[derive(Default)]
pub struct NoopSmsGateway;

#[async_trait]
impl SmsGateway for NoopSmsGateway {
    async fn send(&self, message: &SmsMessage) -> Result<SmsReceipt, SmsError> {
        info!(
            event_name = "notify.sms.skipped",
            to = %message.to,
            "sms delivery disabled; message dropped"
        );
        Ok(SmsReceipt::default())
    }
}

#[derive(Clone, Default)]
pub struct RecordingSmsGateway {
    sent: Arc<Mutex<Vec<SmsMessage>>>,
    failure: Arc<Mutex<Option<FailureMode>>>,
}

#[derive(Clone, Debug)]
enum FailureMode {
    Transport,
    Rejected(u16),
}

impl RecordingSmsGateway {
    pub fn sent(&self) -> Vec<SmsMessage> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn fail_with_transport_error(&self) {
        self.set_failure(Some(FailureMode::Transport));
    }

    pub fn fail_with_status(&self, status: u16) {
        self.set_failure(Some(FailureMode::Rejected(status)));
    }

    pub fn succeed(&self) {
        self.set_failure(None);
    }

    fn set_failure(&self, mode: Option<FailureMode>) {
        match self.failure.lock() {
            Ok(mut failure) => *failure = mode,
            Err(poisoned) => *poisoned.into_inner() = mode,
        }
    }

    fn current_failure(&self) -> Option<FailureMode> {
        match self.failure.lock() {
            Ok(failure) => failure.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl SmsGateway for RecordingSmsGateway {
    async fn send(&self, message: &SmsMessage) -> Result<SmsReceipt, SmsError> {
        match self.current_failure() {
            Some(FailureMode::Transport) => {
                Err(SmsError::Transport("connection refused".to_owned()))
            }
            Some(FailureMode::Rejected(status)) => {
                Err(SmsError::Rejected { status, body: "rejected by test gateway".to_owned() })
            }
            None => {
                let mut sent = match self.sent.lock() {
                    Ok(sent) => sent,
                    Err(poisoned) => poisoned.into_inner(),
                };
                sent.push(message.clone());
                Ok(SmsReceipt { provider_message_id: Some(format!("rec-{}", sent.len())) })
            }
        }
    }
}

/// Picks the provider gateway when SMS is enabled and configured, the noop
/// gateway otherwise.
pub fn gateway_from_config(config: &SmsConfig) -> Result<Arc<dyn SmsGateway>, SmsError> {
    if !config.enabled {
        return Ok(Arc::new(NoopSmsGateway));
    }

    match (&config.provider_url, &config.api_key) {
        (Some(url), Some(key)) => Ok(Arc::new(HttpSmsGateway::new(
            url.clone(),
            key.clone(),
            config.sender_id.clone(),
            Duration::from_secs(config.timeout_secs.max(1)),
        )?)),
        _ => {
            warn!(
                event_name = "notify.sms.misconfigured",
                "sms enabled without provider_url or api_key"
            );
            Err(SmsError::Disabled)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use kahawa_core::config::AppConfig;
    use secrecy::SecretString;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    use super::{
        gateway_from_config, HttpSmsGateway, RecordingSmsGateway, SmsError, SmsGateway,
        SmsMessage,
    };

    fn message() -> SmsMessage {
        SmsMessage {
            to: "+256781121639".to_owned(),
            body: "REQ-0001 awaiting Finance approval".to_owned(),
        }
    }

    /// Serves one canned HTTP response and hands back the raw request text.
    async fn one_shot_provider(status_line: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let url = format!("http://{}/sms", listener.local_addr().expect("addr"));

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut request = Vec::new();
            let mut buffer = [0_u8; 4096];
            loop {
                let read = socket.read(&mut buffer).await.expect("read");
                request.extend_from_slice(&buffer[..read]);
                let text = String::from_utf8_lossy(&request);
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|line| {
                            let lower = line.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|value| value.trim().parse::<usize>().unwrap_or(0))
                        })
                        .unwrap_or(0);
                    if request.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
                if read == 0 {
                    break;
                }
            }

            let response = format!(
                "{status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.expect("write");
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).into_owned()
        });

        (url, handle)
    }

    fn gateway(url: String) -> HttpSmsGateway {
        HttpSmsGateway::new(
            url,
            SecretString::from("test-key".to_owned()),
            "KAHAWA",
            Duration::from_secs(5),
        )
        .expect("gateway")
    }

    #[tokio::test]
    async fn http_gateway_posts_json_with_bearer_key() {
        let (url, provider) =
            one_shot_provider("HTTP/1.1 200 OK", r#"{"message_id":"msg-77"}"#).await;

        let receipt = gateway(url).send(&message()).await.expect("send");
        assert_eq!(receipt.provider_message_id.as_deref(), Some("msg-77"));

        let request = provider.await.expect("provider task");
        assert!(request.starts_with("POST /sms"));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer test-key"));
        assert!(request.contains(r#""to":"+256781121639""#));
        assert!(request.contains(r#""sender_id":"KAHAWA""#));
    }

    #[tokio::test]
    async fn http_gateway_reports_provider_rejections() {
        let (url, provider) =
            one_shot_provider("HTTP/1.1 422 Unprocessable Entity", r#"{"error":"bad number"}"#)
                .await;

        let error = gateway(url).send(&message()).await.expect_err("rejected");
        provider.await.expect("provider task");

        assert!(matches!(error, SmsError::Rejected { status: 422, .. }));
        assert!(error.is_permanent());
    }

    #[tokio::test]
    async fn http_gateway_maps_connection_failures_to_transport() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let url = format!("http://{}/sms", listener.local_addr().expect("addr"));
        drop(listener);

        let error = gateway(url).send(&message()).await.expect_err("no listener");
        assert!(matches!(error, SmsError::Transport(_)));
        assert!(!error.is_permanent());
    }

    #[tokio::test]
    async fn recording_gateway_records_and_fails_on_demand() {
        let gateway = RecordingSmsGateway::default();
        gateway.send(&message()).await.expect("first send");

        gateway.fail_with_status(503);
        let error = gateway.send(&message()).await.expect_err("forced failure");
        assert!(matches!(error, SmsError::Rejected { status: 503, .. }));
        assert!(!error.is_permanent());

        gateway.succeed();
        gateway.send(&message()).await.expect("recovered");
        assert_eq!(gateway.sent().len(), 2);
    }

    #[test]
    fn disabled_config_selects_noop_gateway_and_enabled_needs_credentials() {
        let mut config = AppConfig::default().sms;
        config.enabled = false;
        assert!(gateway_from_config(&config).is_ok());

        config.enabled = true;
        config.provider_url = None;
        assert!(matches!(gateway_from_config(&config), Err(SmsError::Disabled)));
    }
}
