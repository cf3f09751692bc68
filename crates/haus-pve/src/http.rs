//! PVE HTTP API client using reqwest
//!
//! Authenticates either with a root password (ticket + CSRF token) or an API
//! token pair. PVE hosts commonly run with self-signed certificates, so the
//! client accepts invalid certs.

use crate::{CreateCtRequest, PveClient, PveError, Result, TaskStatus, Upid};
use async_trait::async_trait;
use haus_config::{PveAuth, PveConfig};
use serde::Deserialize;
use serde_json::Value;

/// HTTP client for the PVE API
pub struct PveApiClient {
    http: reqwest::Client,
    base_url: String,
    auth: AuthState,
}

enum AuthState {
    Ticket {
        ticket: String,
        csrf_token: String,
    },
    Token {
        header_value: String,
    },
}

#[derive(Deserialize)]
struct ApiEnvelope {
    data: Option<Value>,
}

#[derive(Deserialize)]
struct TicketData {
    ticket: String,
    #[serde(rename = "CSRFPreventionToken")]
    csrf_token: String,
}

impl PveApiClient {
    /// Connect and authenticate against the PVE API
    pub async fn connect(config: &PveConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| PveError::ConnectionError(e.to_string()))?;

        let base_url = format!("https://{}:{}/api2/json", config.host, config.port);

        let auth = match &config.auth {
            PveAuth::Password { password } => {
                let response = http
                    .post(format!("{}/access/ticket", base_url))
                    .form(&[("username", "root@pam"), ("password", password.as_str())])
                    .send()
                    .await
                    .map_err(|e| PveError::ConnectionError(e.to_string()))?;

                if !response.status().is_success() {
                    return Err(PveError::AuthFailed(format!(
                        "ticket request returned {}",
                        response.status()
                    )));
                }

                let envelope: ApiEnvelope = response
                    .json()
                    .await
                    .map_err(|e| PveError::InvalidResponse(e.to_string()))?;
                let data = envelope
                    .data
                    .ok_or_else(|| PveError::InvalidResponse("empty ticket response".into()))?;
                let ticket: TicketData = serde_json::from_value(data)
                    .map_err(|e| PveError::InvalidResponse(e.to_string()))?;

                AuthState::Ticket {
                    ticket: ticket.ticket,
                    csrf_token: ticket.csrf_token,
                }
            }
            PveAuth::Token { token_id, secret } => AuthState::Token {
                header_value: format!("PVEAPIToken={}={}", token_id, secret),
            },
        };

        tracing::debug!("authenticated against {}", base_url);
        Ok(Self {
            http,
            base_url,
            auth,
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder, mutating: bool) -> reqwest::RequestBuilder {
        match &self.auth {
            AuthState::Ticket { ticket, csrf_token } => {
                let request = request.header("Cookie", format!("PVEAuthCookie={}", ticket));
                if mutating {
                    request.header("CSRFPreventionToken", csrf_token)
                } else {
                    request
                }
            }
            AuthState::Token { header_value } => request.header("Authorization", header_value),
        }
    }

    async fn unwrap_data(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(PveError::Api {
                status: status.as_u16(),
                message,
            });
        }
        let envelope: ApiEnvelope = response
            .json()
            .await
            .map_err(|e| PveError::InvalidResponse(e.to_string()))?;
        envelope
            .data
            .ok_or_else(|| PveError::InvalidResponse("missing data field".into()))
    }

    async fn post_task(&self, path: &str, form: &[(&str, String)]) -> Result<Upid> {
        let request = self
            .authorize(self.http.post(format!("{}{}", self.base_url, path)), true)
            .form(form);
        let response = request
            .send()
            .await
            .map_err(|e| PveError::ConnectionError(e.to_string()))?;
        let data = Self::unwrap_data(response).await?;
        match data.as_str() {
            Some(upid) => Ok(Upid::new(upid)),
            None => Err(PveError::InvalidResponse(format!(
                "expected UPID string, got {}",
                data
            ))),
        }
    }
}

#[async_trait]
impl PveClient for PveApiClient {
    async fn create_ct(&self, node: &str, req: &CreateCtRequest) -> Result<Upid> {
        let mut form: Vec<(&str, String)> = vec![
            ("vmid", req.vmid.to_string()),
            ("ostemplate", req.ostemplate.clone()),
            ("hostname", req.hostname.clone()),
            ("memory", req.memory_mb.to_string()),
            ("swap", req.swap_mb.to_string()),
            ("cores", req.cores.to_string()),
            ("rootfs", req.rootfs()),
            ("net0", req.net0()),
            ("password", req.root_password.clone()),
            (
                "unprivileged",
                (if req.unprivileged { "1" } else { "0" }).to_string(),
            ),
        ];
        if let Some(ref nameserver) = req.nameserver {
            form.push(("nameserver", nameserver.clone()));
        }
        if let Some(ref key) = req.ssh_public_key {
            form.push(("ssh-public-keys", key.clone()));
        }
        if let Some(features) = req.features() {
            form.push(("features", features));
        }
        if let Some(tags) = req.tags_param() {
            form.push(("tags", tags));
        }

        self.post_task(&format!("/nodes/{}/lxc", node), &form).await
    }

    async fn start_ct(&self, node: &str, vmid: u32) -> Result<Upid> {
        self.post_task(&format!("/nodes/{}/lxc/{}/status/start", node, vmid), &[])
            .await
    }

    async fn task_status(&self, node: &str, upid: &Upid) -> Result<TaskStatus> {
        let request = self.authorize(
            self.http
                .get(format!("{}/nodes/{}/tasks/{}/status", self.base_url, node, upid)),
            false,
        );
        let response = request
            .send()
            .await
            .map_err(|e| PveError::ConnectionError(e.to_string()))?;
        let data = Self::unwrap_data(response).await?;

        let status = data
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| PveError::InvalidResponse("task status missing".into()))?;
        let exit_status = data
            .get("exitstatus")
            .and_then(Value::as_str)
            .map(|s| s.to_string());

        Ok(TaskStatus {
            running: status == "running",
            exit_status,
        })
    }

    async fn ping(&self) -> Result<()> {
        let request = self.authorize(self.http.get(format!("{}/version", self.base_url)), false);
        let response = request
            .send()
            .await
            .map_err(|e| PveError::ConnectionError(e.to_string()))?;
        Self::unwrap_data(response).await.map(|_| ())
    }
}
