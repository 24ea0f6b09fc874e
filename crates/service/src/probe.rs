//! Reachability probes: does anything answer HTTP at a URL yet?

use std::time::Duration;

use async_trait::async_trait;
use configs::TlsConfig;
use thiserror::Error;
use tracing::debug;

const RETRY_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProbeError {
    #[error("timed out after {0:?} waiting for {1}")]
    Timeout(Duration, String),
    #[error("probe client error: {0}")]
    Client(String),
}

#[async_trait]
pub trait Prober: Send + Sync {
    /// Succeeds as soon as any HTTP response arrives within `timeout`.
    async fn wait_up(&self, url: &str, timeout: Duration) -> Result<(), ProbeError>;
}

pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new(tls: &TlsConfig) -> Result<Self, ProbeError> {
        let mut builder = reqwest::Client::builder().danger_accept_invalid_hostnames(tls.accept_invalid_hostnames);
        if let Some(path) = &tls.ca_file {
            let pem = std::fs::read(path).map_err(|e| ProbeError::Client(format!("read {path}: {e}")))?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| ProbeError::Client(e.to_string()))?;
            builder = builder.add_root_certificate(cert);
        }
        let client = builder.build().map_err(|e| ProbeError::Client(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn wait_up(&self, url: &str, timeout: Duration) -> Result<(), ProbeError> {
        let attempt = async {
            loop {
                match self.client.get(url).timeout(timeout).send().await {
                    Ok(resp) => {
                        debug!(url = %url, status = %resp.status(), "endpoint answered");
                        return;
                    }
                    Err(e) => {
                        debug!(url = %url, error = %e, "endpoint not answering yet");
                        tokio::time::sleep(RETRY_INTERVAL).await;
                    }
                }
            }
        };
        tokio::time::timeout(timeout, attempt)
            .await
            .map_err(|_| ProbeError::Timeout(timeout, url.to_string()))
    }
}

/// Prober with scripted answers, counting every call.
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    pub struct ScriptedProber {
        /// Answers in order; once drained every probe times out.
        pub answers: Mutex<VecDeque<bool>>,
        pub probes: AtomicUsize,
    }

    impl ScriptedProber {
        pub fn always_down() -> Self { Self::default() }

        pub fn with_answers(answers: impl IntoIterator<Item = bool>) -> Self {
            Self { answers: Mutex::new(answers.into_iter().collect()), ..Self::default() }
        }

        pub fn probes(&self) -> usize { self.probes.load(Ordering::SeqCst) }
    }

    #[async_trait]
    impl Prober for ScriptedProber {
        async fn wait_up(&self, url: &str, timeout: Duration) -> Result<(), ProbeError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            match self.answers.lock().unwrap().pop_front() {
                Some(true) => Ok(()),
                _ => Err(ProbeError::Timeout(timeout, url.to_string())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Router};

    #[tokio::test]
    async fn any_http_answer_counts_as_up() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let app = Router::new().route("/", get(|| async { (axum::http::StatusCode::NOT_FOUND, "nope") }));
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let prober = HttpProber::new(&TlsConfig::default()).expect("client");
        prober
            .wait_up(&format!("http://{addr}/"), Duration::from_secs(2))
            .await
            .expect("up");
    }

    #[tokio::test]
    async fn closed_port_times_out() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let prober = HttpProber::new(&TlsConfig::default()).expect("client");
        let err = prober
            .wait_up(&format!("http://{addr}/"), Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Timeout(_, _)));
    }

    #[test]
    fn missing_ca_file_is_reported() {
        let tls = TlsConfig { ca_file: Some("/nonexistent/ca.pem".into()), ..TlsConfig::default() };
        assert!(matches!(HttpProber::new(&tls), Err(ProbeError::Client(_))));
    }
}
