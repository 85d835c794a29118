// HTTP Relay Client
// REST client for the relay control plane

use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Mutex;
use std::time::Duration;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use serde_json::{json, Value};
use zeroize::Zeroizing;
use crate::models::Settings;
use crate::services::{
    ChannelStartRequest, OutputHealth, OutputSpec, OutputTarget, PlatformRegistry, RelayClient,
    RelayError, RelayResult,
};

const PROCESS_ID_PREFIX: &str = "spiritstream_";
const RTMP_DEFAULT_PORT: u16 = 1935;
const RTMPS_DEFAULT_PORT: u16 = 443;

/// Blocking REST client with bearer-token authentication.
/// The token is fetched lazily and refreshed once on a 401.
pub struct HttpRelayClient {
    base_url: String,
    username: String,
    password: Zeroizing<String>,
    client: Client,
    timeout: Duration,
    token: Mutex<Option<Zeroizing<String>>>,
}

impl HttpRelayClient {
    pub fn new(
        base_url: &str,
        username: &str,
        password: &str,
        timeout_secs: u64,
    ) -> RelayResult<Self> {
        let timeout = Duration::from_secs(timeout_secs);
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: Zeroizing::new(password.to_string()),
            client,
            timeout,
            token: Mutex::new(None),
        })
    }

    pub fn from_settings(settings: &Settings) -> RelayResult<Self> {
        Self::new(
            &settings.relay_base_url(),
            &settings.relay_username,
            &settings.relay_password,
            settings.request_timeout_secs,
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn process_path(process_reference: &str) -> String {
        format!("/api/v3/process/{}", urlencoding::encode(process_reference))
    }

    fn login(&self) -> RelayResult<Zeroizing<String>> {
        let response = self
            .client
            .post(self.url("/api/login"))
            .json(&json!({
                "username": self.username,
                "password": self.password.as_str(),
            }))
            .send()?;

        if !response.status().is_success() {
            return Err(RelayError::Auth(format!("login returned {}", response.status())));
        }

        let body: Value = response.json()?;
        let token = body
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| RelayError::InvalidResponse("login response has no access_token".to_string()))?;

        log::debug!("Authenticated with relay at {}", self.base_url);
        Ok(Zeroizing::new(token.to_string()))
    }

    fn token(&self, refresh: bool) -> RelayResult<Zeroizing<String>> {
        let mut guard = self.token.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if refresh {
            *guard = None;
        }
        if let Some(token) = guard.as_ref() {
            return Ok(token.clone());
        }
        let token = self.login()?;
        *guard = Some(token.clone());
        Ok(token)
    }

    /// Send an authenticated request, retrying once with a fresh token on 401
    fn send(&self, build: impl Fn(&Client) -> RequestBuilder) -> RelayResult<Response> {
        let token = self.token(false)?;
        let response = build(&self.client).bearer_auth(token.as_str()).send()?;

        let response = if response.status() == StatusCode::UNAUTHORIZED {
            let token = self.token(true)?;
            build(&self.client).bearer_auth(token.as_str()).send()?
        } else {
            response
        };

        check_status(response)
    }
}

fn check_status(response: Response) -> RelayResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().unwrap_or_default();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(RelayError::Auth(body)),
        StatusCode::NOT_FOUND => Err(RelayError::NotFound(body)),
        _ => Err(RelayError::Http {
            status: status.as_u16(),
            body,
        }),
    }
}

/// Host and port of the ingest server an output URL points at
fn ingest_address(url: &str) -> Option<(String, u16)> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_string();
    let port = parsed.port().or_else(|| match parsed.scheme() {
        "rtmp" => Some(RTMP_DEFAULT_PORT),
        "rtmps" => Some(RTMPS_DEFAULT_PORT),
        _ => parsed.port_or_known_default(),
    })?;
    Some((host, port))
}

/// Relay JSON for one output
fn output_body(output: &OutputSpec) -> Value {
    let mut body = json!({
        "id": output.output_id,
        "address": output.url,
    });
    if let Some(filter) = &output.video_filter {
        body["video_filter"] = json!(filter);
    }
    if !output.encoding.is_passthrough() {
        body["encoding"] = json!(output.encoding);
    }
    body
}

fn process_body(request: &ChannelStartRequest) -> Value {
    json!({
        "id": format!("{PROCESS_ID_PREFIX}{}", request.channel_id),
        "reference": request.name,
        "input": [{ "id": "input_0", "address": request.input_url }],
        "output": request.outputs.iter().map(output_body).collect::<Vec<_>>(),
        "autostart": true,
        "reconnect": true,
    })
}

/// Read one output's health from a process state document.
/// The output counts as connected while the process is running and still
/// lists it.
fn parse_output_health(state: &Value, output_id: &str) -> OutputHealth {
    let running = state.get("exec").and_then(Value::as_str) == Some("running");
    let output = state
        .pointer("/progress/outputs")
        .and_then(Value::as_array)
        .and_then(|outputs| {
            outputs
                .iter()
                .find(|o| o.get("id").and_then(Value::as_str) == Some(output_id))
        });

    match output {
        Some(output) => OutputHealth {
            connected: running,
            bitrate_kbps: output
                .get("bitrate_kbit")
                .and_then(Value::as_f64)
                .map(|b| b.max(0.0) as u32)
                .unwrap_or(0),
            dropped_frames: output.get("dropped").and_then(Value::as_u64).unwrap_or(0),
        },
        None => OutputHealth::default(),
    }
}

impl RelayClient for HttpRelayClient {
    fn start_channel(&self, request: &ChannelStartRequest) -> RelayResult<String> {
        let body = process_body(request);
        let response = self.send(|client| client.post(self.url("/api/v3/process")).json(&body))?;

        let created: Value = response.json()?;
        let process_id = created
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{PROCESS_ID_PREFIX}{}", request.channel_id));

        log::info!("Relay process {process_id} created for '{}'", request.name);
        Ok(process_id)
    }

    fn stop_channel(&self, process_reference: &str) -> RelayResult<()> {
        let path = Self::process_path(process_reference);
        self.send(|client| client.delete(self.url(&path)))?;
        Ok(())
    }

    fn set_output_enabled(&self, target: &OutputTarget, enabled: bool) -> RelayResult<()> {
        let outputs_path = format!("{}/outputs", Self::process_path(&target.process_reference));
        log::debug!(
            "{} relay output {}",
            if enabled { "Adding" } else { "Removing" },
            PlatformRegistry::redact_url(&target.output.url)
        );

        if enabled {
            let body = output_body(&target.output);
            self.send(|client| client.post(self.url(&outputs_path)).json(&body))?;
        } else {
            let path = format!(
                "{outputs_path}/{}",
                urlencoding::encode(&target.output.output_id)
            );
            self.send(|client| client.delete(self.url(&path)))?;
        }
        Ok(())
    }

    fn update_output_encoding(&self, target: &OutputTarget) -> RelayResult<()> {
        let path = format!(
            "{}/outputs/{}/encoding",
            Self::process_path(&target.process_reference),
            urlencoding::encode(&target.output.output_id)
        );
        let body = output_body(&target.output);
        self.send(|client| client.put(self.url(&path)).json(&body))?;
        Ok(())
    }

    fn output_health(&self, target: &OutputTarget) -> RelayResult<OutputHealth> {
        let path = format!("{}/state", Self::process_path(&target.process_reference));
        let state: Value = self.send(|client| client.get(self.url(&path)))?.json()?;
        Ok(parse_output_health(&state, &target.output.output_id))
    }

    /// A detached output has no relay state, so probe its ingest server
    /// directly: reachable counts as connected.
    fn probe_output(&self, target: &OutputTarget) -> RelayResult<OutputHealth> {
        let redacted = PlatformRegistry::redact_url(&target.output.url);
        let (host, port) = ingest_address(&target.output.url)
            .ok_or_else(|| RelayError::NotFound(format!("no ingest address in {redacted}")))?;

        let addrs = (host.as_str(), port)
            .to_socket_addrs()
            .map_err(|e| RelayError::NotFound(format!("{host}:{port}: {e}")))?;
        let connected = addrs
            .into_iter()
            .any(|addr| TcpStream::connect_timeout(&addr, self.timeout).is_ok());

        log::debug!("Ingest probe for {redacted}: reachable={connected}");
        Ok(OutputHealth {
            connected,
            ..OutputHealth::default()
        })
    }
}
