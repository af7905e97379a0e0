
use anyhow::{anyhow, Context, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Url;

/// Authenticated HTTP session against a portico server. Holds the session
/// cookie for WS upgrades plus the CSRF token for mutating calls.
#[derive(Clone)]
pub struct HttpSession {
    base: Url,
    client: reqwest::Client,
    csrf: String,
    cookie_header: String,
    username: String,
}

impl HttpSession {
    pub async fn connect(base: &str, user: &str, pass: &str) -> Result<Self> {
        let base_url = Url::parse(base).context("invalid base URL")?;
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .build()?;
        // POST /login
        let login_url = base_url.join("/login")?;
        let resp = client
            .post(login_url)
            .json(&serde_json::json!({"username": user, "password": pass}))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(anyhow!("login failed: HTTP {}", resp.status()));
        }
        // Capture Set-Cookie headers into a single Cookie string (for WS upgrades)
        let mut cookies: Vec<String> = Vec::new();
        for val in resp.headers().get_all(reqwest::header::SET_COOKIE).iter() {
            if let Ok(s) = val.to_str() {
                // take name=value before first ';'
                if let Some((nv, _)) = s.split_once(';') { cookies.push(nv.trim().to_string()); }
            }
        }
        let v: serde_json::Value = resp.json().await.unwrap_or(serde_json::json!({"status":"error"}));
        if v.get("status").and_then(|s| s.as_str()) != Some("ok") {
            return Err(anyhow!("login failed"));
        }
        // The login body carries the CSRF token for this session
        let csrf = v.get("csrf").and_then(|s| s.as_str()).unwrap_or("").to_string();
        if csrf.is_empty() { return Err(anyhow!("csrf token missing from login response")); }
        let username = v
            .pointer("/session/username")
            .and_then(|s| s.as_str())
            .unwrap_or(user)
            .to_string();
        let cookie_header = if cookies.is_empty() { String::new() } else { cookies.join("; ") };
        Ok(Self { base: base_url, client, csrf, cookie_header, username })
    }

    pub fn ident(&self) -> String { format!("http:{} user={}", self.base, self.username) }
    pub fn username(&self) -> &str { &self.username }

    pub async fn get_json(&self, path: &str) -> Result<serde_json::Value> {
        let url = self.base.join(path)?;
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        let val: serde_json::Value = resp.json().await.unwrap_or(serde_json::json!({"status":"error"}));
        if !status.is_success() {
            return Err(anyhow!("remote error: {}", val));
        }
        Ok(val)
    }

    pub async fn post_json(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
        let url = self.base.join(path)?;
        let mut headers = HeaderMap::new();
        headers.insert("x-csrf-token", HeaderValue::from_str(&self.csrf).unwrap());
        let resp = self.client.post(url).headers(headers).json(body).send().await?;
        let status = resp.status();
        let val: serde_json::Value = resp.json().await.unwrap_or(serde_json::json!({"status":"error"}));
        if !status.is_success() {
            return Err(anyhow!("remote error: {}", val));
        }
        Ok(val)
    }

    pub async fn delete_json(&self, path: &str) -> Result<serde_json::Value> {
        let url = self.base.join(path)?;
        let mut headers = HeaderMap::new();
        headers.insert("x-csrf-token", HeaderValue::from_str(&self.csrf).unwrap());
        let resp = self.client.delete(url).headers(headers).send().await?;
        let status = resp.status();
        let val: serde_json::Value = resp.json().await.unwrap_or(serde_json::json!({"status":"error"}));
        if !status.is_success() {
            return Err(anyhow!("remote error: {}", val));
        }
        Ok(val)
    }

    /// GET /session, the server-side view of this login.
    pub async fn whoami(&self) -> Result<serde_json::Value> {
        self.get_json("/session").await
    }

    /// POST /logout. Always succeeds server-side; local state is dropped by
    /// the caller discarding this session.
    pub async fn logout(&self) -> Result<()> {
        let url = self.base.join("/logout")?;
        let resp = self.client.post(url).send().await?;
        if !resp.status().is_success() {
            return Err(anyhow!("logout failed: HTTP {}", resp.status()));
        }
        Ok(())
    }
}

/// One-shot WebSocket probe session, built from an established HTTP login so
/// the upgrade can present the same session cookie.
#[derive(Clone)]
pub struct WsSession {
    base: Url,
    cookie_header: String,
}

impl WsSession {
    pub fn from_http_session(http: &HttpSession) -> Self {
        Self { base: http.base.clone(), cookie_header: http.cookie_header.clone() }
    }

    pub fn ws_url_from_http_base(&self) -> Result<Url> {
        // Convert http(s)://host[:port][/path] -> ws(s)://host[:port]/ws
        let mut ws = self.base.clone();
        let scheme = ws.scheme().to_string();
        if scheme == "https" { ws.set_scheme("wss").ok(); } else { ws.set_scheme("ws").ok(); }
        let ws2 = ws.join("/ws")?;
        Ok(ws2)
    }

    /// Open one WS connection, send a guard probe for each path and collect
    /// the answers in order. The server closes the socket if the session
    /// dies mid-stream; remaining paths then error out.
    pub async fn probe_paths(&self, paths: &[String]) -> Result<Vec<serde_json::Value>> {
        use tokio_tungstenite::tungstenite::client::IntoClientRequest;
        use tokio_tungstenite::tungstenite::http::HeaderValue as WsHeaderValue;
        let ws_url = self.ws_url_from_http_base()?;
        let mut req = ws_url.as_str().into_client_request()?;
        if !self.cookie_header.is_empty() {
            req.headers_mut().insert("cookie", WsHeaderValue::from_str(&self.cookie_header).unwrap());
        }
        let (mut stream, _resp) = tokio_tungstenite::connect_async(req).await?;
        use futures_util::{SinkExt, StreamExt};
        let mut out = Vec::with_capacity(paths.len());
        for path in paths {
            let probe = serde_json::json!({"path": path}).to_string();
            stream.send(tokio_tungstenite::tungstenite::Message::Text(probe)).await?;
            match stream.next().await {
                Some(Ok(tokio_tungstenite::tungstenite::Message::Text(s))) => {
                    let v: serde_json::Value = serde_json::from_str(&s)
                        .unwrap_or(serde_json::json!({"status":"error","error":"invalid json"}));
                    out.push(v);
                }
                Some(Ok(_)) => return Err(anyhow!("ws: unexpected frame")),
                Some(Err(e)) => return Err(anyhow!("ws: {}", e)),
                None => return Err(anyhow!("ws: connection closed after {} of {} probes", out.len(), paths.len())),
            }
        }
        let _ = stream.close(None).await;
        Ok(out)
    }
}
