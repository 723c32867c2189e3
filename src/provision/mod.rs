//! Session provisioning
//!
//! Asks Pipecat Cloud to create a SIP-enabled Daily room and start a bot
//! session for an inbound call.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use url::Url;

/// How long a provisioned room stays valid.
pub const ROOM_TTL_HOURS: i64 = 24;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Pipecat API error: {status} - {body}")]
    Upstream { status: u16, body: String },

    #[error("Failed to call Pipecat API: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid provisioning URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Identifiers of an inbound call, as delivered by the dial-in webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DialinRequest {
    pub from: String,
    pub to: String,
    pub call_id: String,
    pub call_domain: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartRequest<'a> {
    create_daily_room: bool,
    daily_room_properties: RoomProperties<'a>,
    body: StartBody<'a>,
}

#[derive(Debug, Serialize)]
struct RoomProperties<'a> {
    sip: SipProperties<'a>,
    exp: i64,
}

#[derive(Debug, Serialize)]
struct SipProperties<'a> {
    display_name: &'a str,
    sip_mode: &'static str,
    num_endpoints: u32,
}

#[derive(Debug, Serialize)]
struct StartBody<'a> {
    dialin_settings: &'a DialinRequest,
}

impl DialinRequest {
    /// Body for the `/{service}/start` call. The room expires
    /// [`ROOM_TTL_HOURS`] after `now`.
    pub fn start_payload(&self, now: DateTime<Utc>) -> serde_json::Value {
        let request = StartRequest {
            create_daily_room: true,
            daily_room_properties: RoomProperties {
                sip: SipProperties {
                    display_name: &self.from,
                    sip_mode: "dial-in",
                    num_endpoints: 1,
                },
                exp: (now + Duration::hours(ROOM_TTL_HOURS)).timestamp(),
            },
            body: StartBody {
                dialin_settings: self,
            },
        };
        serde_json::json!(request)
    }
}

/// Starts a bot session for an inbound call.
#[async_trait]
pub trait SessionProvisioner: Send + Sync {
    async fn start_dialin_session(&self, request: &DialinRequest) -> Result<(), ProvisionError>;
}

/// [`SessionProvisioner`] backed by the Pipecat Cloud public API.
#[derive(Clone)]
pub struct PipecatCloudProvisioner {
    http_client: reqwest::Client,
    api_url: Url,
    service: String,
    api_key: String,
}

impl std::fmt::Debug for PipecatCloudProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipecatCloudProvisioner")
            .field("api_url", &self.api_url.as_str())
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

impl PipecatCloudProvisioner {
    pub fn new(api_url: Url, service: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            api_url,
            service: service.into(),
            api_key: api_key.into(),
        }
    }

    /// `{api_url}/{service}/start`
    pub fn start_url(&self) -> Result<Url, ProvisionError> {
        let base = self.api_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{}/{}/start", base, self.service))?)
    }
}

#[async_trait]
impl SessionProvisioner for PipecatCloudProvisioner {
    async fn start_dialin_session(&self, request: &DialinRequest) -> Result<(), ProvisionError> {
        let url = self.start_url()?;
        let payload = request.start_payload(Utc::now());
        tracing::debug!(%url, call_id = %request.call_id, "starting dial-in session");

        let response = self
            .http_client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), %body, "Pipecat API error");
            return Err(ProvisionError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        // A success status with an unreadable body is not a started session.
        let body: serde_json::Value = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "unreadable Pipecat API response");
            e
        })?;
        tracing::info!(call_id = %request.call_id, response = %body, "dial-in session started");
        Ok(())
    }
}
