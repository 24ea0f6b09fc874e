//! REST client for configurable-http-proxy.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use configs::ProxyConfig;
use reqwest::{StatusCode, Url};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::routing::{Proxy, ProxyError, RouteEntry};
use crate::spawner::{ProcessLaunch, Spawner, SubprocessSpawner};

const START_ATTEMPTS: u32 = 20;
const START_BACKOFF: Duration = Duration::from_millis(250);

pub struct ChpProxy {
    api_url: String,
    public_url: String,
    auth_token: String,
    command: Vec<String>,
    should_start: bool,
    client: reqwest::Client,
    process: Mutex<Option<SubprocessSpawner>>,
}

fn http_err(e: reqwest::Error) -> ProxyError { ProxyError::Http(e.to_string()) }

fn host_port(url: &str) -> Result<(String, u16), ProxyError> {
    let parsed = Url::parse(url).map_err(|e| ProxyError::Launch(format!("{url}: {e}")))?;
    let host = parsed.host_str().unwrap_or("127.0.0.1").to_string();
    let port = parsed.port_or_known_default().unwrap_or(80);
    Ok((host, port))
}

impl ChpProxy {
    pub fn from_config(cfg: &ProxyConfig) -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(http_err)?;
        Ok(Self {
            api_url: cfg.api_url.trim_end_matches('/').to_string(),
            public_url: cfg.public_url.clone(),
            auth_token: cfg.auth_token.clone(),
            command: cfg.command.clone(),
            should_start: cfg.should_start,
            client,
            process: Mutex::new(None),
        })
    }

    fn route_url(&self, routespec: &str) -> String {
        format!("{}/api/routes{}", self.api_url, routespec)
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header(reqwest::header::AUTHORIZATION, format!("token {}", self.auth_token))
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, ProxyError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(ProxyError::Status { status: status.as_u16(), body })
    }

    fn launch(&self) -> Result<ProcessLaunch, ProxyError> {
        let (ip, port) = host_port(&self.public_url)?;
        let (api_ip, api_port) = host_port(&self.api_url)?;
        let mut command = self.command.clone();
        command.extend([
            "--ip".to_string(),
            ip,
            "--port".to_string(),
            port.to_string(),
            "--api-ip".to_string(),
            api_ip,
            "--api-port".to_string(),
            api_port.to_string(),
        ]);
        let mut env: BTreeMap<String, String> = std::env::vars().collect();
        env.insert("CONFIGPROXY_AUTH_TOKEN".into(), self.auth_token.clone());
        Ok(ProcessLaunch { name: "proxy".into(), command, env, ..ProcessLaunch::default() })
    }
}

#[async_trait]
impl Proxy for ChpProxy {
    fn should_start(&self) -> bool { self.should_start }

    async fn start(&self) -> Result<(), ProxyError> {
        let mut process = SubprocessSpawner::new(self.launch()?);
        info!(public_url = %self.public_url, api_url = %self.api_url, "starting proxy");
        process.start().await.map_err(|e| ProxyError::Launch(e.to_string()))?;
        *self.process.lock().await = Some(process);

        let mut last_err = None;
        for _ in 0..START_ATTEMPTS {
            match self.get_all_routes().await {
                Ok(_) => {
                    debug!("proxy api is up");
                    return Ok(());
                }
                Err(e) => last_err = Some(e),
            }
            if let Some(child) = self.process.lock().await.as_mut() {
                if let Ok(Some(status)) = child.poll().await {
                    return Err(ProxyError::Launch(format!("proxy exited with status {status}")));
                }
            }
            tokio::time::sleep(START_BACKOFF).await;
        }
        Err(ProxyError::Launch(format!(
            "proxy api did not come up: {}",
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    async fn stop(&self) -> Result<(), ProxyError> {
        if let Some(mut process) = self.process.lock().await.take() {
            process.stop().await.map_err(|e| ProxyError::Launch(e.to_string()))?;
            info!("proxy stopped");
        }
        Ok(())
    }

    async fn get_all_routes(&self) -> Result<BTreeMap<String, RouteEntry>, ProxyError> {
        let resp = self
            .authorized(self.client.get(format!("{}/api/routes", self.api_url)))
            .send()
            .await
            .map_err(http_err)?;
        let raw: HashMap<String, Map<String, Value>> = Self::check(resp).await?.json().await.map_err(http_err)?;
        Ok(raw
            .into_iter()
            .map(|(spec, mut fields)| {
                let target = match fields.remove("target") {
                    Some(Value::String(t)) => t,
                    _ => String::new(),
                };
                let entry = RouteEntry { routespec: spec.clone(), target, data: Value::Object(fields) };
                (spec, entry)
            })
            .collect())
    }

    async fn add_route(&self, routespec: &str, target: &str, data: &Value) -> Result<(), ProxyError> {
        let mut body = data.as_object().cloned().unwrap_or_default();
        body.insert("target".into(), Value::String(target.to_string()));
        let resp = self
            .authorized(self.client.post(self.route_url(routespec)))
            .json(&body)
            .send()
            .await
            .map_err(http_err)?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn delete_route(&self, routespec: &str) -> Result<(), ProxyError> {
        let resp = self
            .authorized(self.client.delete(self.route_url(routespec)))
            .send()
            .await
            .map_err(http_err)?;
        if resp.status() == StatusCode::NOT_FOUND {
            warn!(route = %routespec, "route already gone");
            return Ok(());
        }
        Self::check(resp).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use std::sync::{Arc, Mutex as StdMutex};

    type Log = Arc<StdMutex<Vec<String>>>;

    fn authed(headers: &HeaderMap) -> bool {
        headers.get("authorization").and_then(|v| v.to_str().ok()) == Some("token sekret")
    }

    async fn fake_chp() -> (String, Log) {
        let log: Log = Arc::default();
        let app = Router::new()
            .route(
                "/api/routes",
                get(|headers: HeaderMap| async move {
                    if !authed(&headers) {
                        return Err(AxumStatus::FORBIDDEN);
                    }
                    Ok(Json(json!({
                        "/": {"target": "http://127.0.0.1:8081", "hub": true},
                        "/services/dash/": {"target": "http://10.0.0.2:9000", "service": "dash", "last_activity": "2024-05-01T10:00:00.000Z"}
                    })))
                }),
            )
            .route(
                "/api/routes/*spec",
                axum::routing::post(|State(log): State<Log>, Path(spec): Path<String>, Json(body): Json<Value>| async move {
                    log.lock().unwrap().push(format!("POST /{spec} {}", body["target"].as_str().unwrap_or("")));
                    AxumStatus::CREATED
                })
                .delete(|State(log): State<Log>, Path(spec): Path<String>| async move {
                    log.lock().unwrap().push(format!("DELETE /{spec}"));
                    AxumStatus::NOT_FOUND
                }),
            )
            .with_state(log.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (format!("http://{addr}"), log)
    }

    fn proxy(api_url: &str, token: &str) -> ChpProxy {
        let cfg = ProxyConfig { api_url: api_url.into(), auth_token: token.into(), ..ProxyConfig::default() };
        ChpProxy::from_config(&cfg).expect("client")
    }

    #[tokio::test]
    async fn lists_routes_splitting_target_from_data() {
        let (url, _) = fake_chp().await;
        let routes = proxy(&url, "sekret").get_all_routes().await.expect("routes");
        assert_eq!(routes.len(), 2);
        let dash = &routes["/services/dash/"];
        assert_eq!(dash.target, "http://10.0.0.2:9000");
        assert_eq!(dash.data["service"], "dash");
        assert!(dash.data.get("target").is_none());
    }

    #[tokio::test]
    async fn wrong_token_is_a_status_error() {
        let (url, _) = fake_chp().await;
        let err = proxy(&url, "wrong").get_all_routes().await.unwrap_err();
        assert!(matches!(err, ProxyError::Status { status: 403, .. }));
    }

    #[tokio::test]
    async fn add_and_delete_hit_route_paths() {
        let (url, log) = fake_chp().await;
        let chp = proxy(&url, "sekret");
        chp.add_route("/services/x/", "http://10.0.0.3:80", &json!({"service": "x"})).await.expect("add");
        chp.delete_route("/services/old/").await.expect("404 on delete is fine");
        assert_eq!(log.lock().unwrap().clone(), vec![
            "POST /services/x/ http://10.0.0.3:80".to_string(),
            "DELETE /services/old/".to_string(),
        ]);
    }

    #[test]
    fn launch_command_carries_addresses_and_token() {
        let cfg = ProxyConfig {
            api_url: "http://127.0.0.1:8001".into(),
            public_url: "http://0.0.0.0:8000".into(),
            auth_token: "t".into(),
            ..ProxyConfig::default()
        };
        let launch = ChpProxy::from_config(&cfg).expect("client").launch().expect("launch");
        assert_eq!(launch.command[0], "configurable-http-proxy");
        assert!(launch.command.windows(2).any(|w| w == ["--api-port", "8001"]));
        assert!(launch.command.windows(2).any(|w| w == ["--port", "8000"]));
        assert_eq!(launch.env["CONFIGPROXY_AUTH_TOKEN"], "t");
    }
}
