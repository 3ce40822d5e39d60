//! Actuator link to the arm controller.
//!
//! The controller is an embedded board that exposes a tiny HTTP API:
//!
//! | request | meaning |
//! |---|---|
//! | `GET {address}/cmd?value={code}` | execute one command code (`a0r`, `b1l`, `x`, …) |
//! | `GET {address}` | liveness page, used as the connectivity probe |
//!
//! Every request is bounded by [`DEFAULT_TIMEOUT`] and sent exactly once;
//! retry policy belongs to whoever drives the cycle.  Outcomes are returned
//! as data ([`DispatchOutcome`], [`ConnectivityResult`]), never as errors.

use std::time::Duration;

use async_trait::async_trait;
use scrub_types::{ConnectivityResult, DispatchErrorKind, DispatchOutcome};
use tracing::{error, info, warn};

/// Upper bound for every request to the controller.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Path of the command endpoint on the controller.
pub const COMMAND_PATH: &str = "/cmd";

/// Anything that can deliver a resolved command code to the arm.
#[async_trait]
pub trait CommandLink: Send + Sync {
    /// Send `command` once and classify the outcome.
    async fn dispatch(&self, command: &str) -> DispatchOutcome;

    /// Check that the controller answers at all.
    async fn probe(&self) -> ConnectivityResult;
}

/// Connection settings for the arm controller.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    /// When `false` every call is simulated and no request leaves the host.
    pub enabled: bool,
    /// Base URL, e.g. `http://192.168.0.131`.
    pub address: String,
    pub timeout: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "http://192.168.0.131".to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Snapshot of the dispatcher settings for status reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceStatus {
    pub enabled: bool,
    pub address: String,
    pub timeout: Duration,
}

/// [`CommandLink`] over HTTP.
pub struct HttpActuator {
    config: DeviceConfig,
    client: reqwest::Client,
}

impl HttpActuator {
    pub fn new(config: DeviceConfig) -> Self {
        if config.enabled {
            info!(address = %config.address, "actuator link enabled");
        } else {
            info!("actuator link disabled; commands will be simulated");
        }
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn status(&self) -> DeviceStatus {
        DeviceStatus {
            enabled: self.config.enabled,
            address: self.config.address.clone(),
            timeout: self.config.timeout,
        }
    }

    fn base_url(&self) -> &str {
        self.config.address.trim_end_matches('/')
    }
}

#[async_trait]
impl CommandLink for HttpActuator {
    async fn dispatch(&self, command: &str) -> DispatchOutcome {
        if !self.config.enabled {
            info!(command, "actuator disabled; simulating command");
            return DispatchOutcome::simulated(command);
        }

        let url = format!("{}{COMMAND_PATH}", self.base_url());
        info!(command, %url, "sending command to actuator");

        let response = match self
            .client
            .get(&url)
            .query(&[("value", command)])
            .timeout(self.config.timeout)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return transport_failure(command, &e),
        };

        let status = response.status();
        if !status.is_success() {
            // The status line already decided the outcome; the body is detail.
            let body = response.text().await.unwrap_or_default();
            error!(command, status = status.as_u16(), "actuator rejected command");
            return DispatchOutcome::failed(
                command,
                DispatchErrorKind::HttpError,
                Some(status.as_u16()),
                format!("HTTP {}: {body}", status.as_u16()),
            );
        }

        match response.text().await {
            Ok(body) => {
                info!(command, status = status.as_u16(), "actuator accepted command");
                DispatchOutcome::delivered(command, status.as_u16(), body)
            }
            Err(e) => transport_failure(command, &e),
        }
    }

    async fn probe(&self) -> ConnectivityResult {
        if !self.config.enabled {
            return ConnectivityResult {
                reachable: true,
                status_code: None,
                error_kind: Some(DispatchErrorKind::Disabled),
                message: "device integration disabled".to_string(),
            };
        }

        match self
            .client
            .get(self.base_url())
            .timeout(self.config.timeout)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => ConnectivityResult {
                reachable: true,
                status_code: Some(response.status().as_u16()),
                error_kind: None,
                message: "controller is reachable".to_string(),
            },
            Ok(response) => {
                let code = response.status().as_u16();
                warn!(status = code, "controller answered the probe with an error status");
                ConnectivityResult {
                    reachable: false,
                    status_code: Some(code),
                    error_kind: Some(DispatchErrorKind::HttpError),
                    message: format!("controller responded with status {code}"),
                }
            }
            Err(e) => {
                let kind = classify(&e);
                error!(error = %e, ?kind, "controller probe failed");
                ConnectivityResult {
                    reachable: false,
                    status_code: None,
                    error_kind: Some(kind),
                    message: match kind {
                        DispatchErrorKind::Timeout => "controller is not responding".to_string(),
                        _ => format!("controller is not reachable: {e}"),
                    },
                }
            }
        }
    }
}

fn classify(e: &reqwest::Error) -> DispatchErrorKind {
    if e.is_timeout() {
        DispatchErrorKind::Timeout
    } else {
        DispatchErrorKind::ConnectionError
    }
}

fn transport_failure(command: &str, e: &reqwest::Error) -> DispatchOutcome {
    let kind = classify(e);
    error!(command, error = %e, ?kind, "actuator request failed");
    let message = match kind {
        DispatchErrorKind::Timeout => "request timeout".to_string(),
        _ => format!("controller not reachable: {e}"),
    };
    DispatchOutcome::failed(command, kind, None, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// One-shot HTTP server: answers the first request with `status`/`body`
    /// after `delay`, and reports the request line it saw.
    async fn serve_once(
        status: &'static str,
        body: &'static str,
        delay: Duration,
    ) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let n = stream.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]);
                let line = request.lines().next().unwrap_or_default().to_string();
                let _ = tx.send(line);
                tokio::time::sleep(delay).await;
                let response = format!(
                    "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
            }
        });
        (format!("http://{addr}"), rx)
    }

    fn enabled(address: String, timeout: Duration) -> HttpActuator {
        HttpActuator::new(DeviceConfig {
            enabled: true,
            address,
            timeout,
        })
    }

    #[test]
    fn default_timeout_is_five_seconds() {
        assert_eq!(DEFAULT_TIMEOUT, Duration::from_secs(5));
        assert_eq!(DeviceConfig::default().timeout, DEFAULT_TIMEOUT);
        assert!(!DeviceConfig::default().enabled);
    }

    #[tokio::test]
    async fn disabled_dispatch_is_simulated_without_network() {
        // Port 9 (discard) on localhost is never contacted in simulation mode.
        let link = HttpActuator::new(DeviceConfig {
            enabled: false,
            address: "http://127.0.0.1:9".to_string(),
            timeout: Duration::from_millis(50),
        });
        let outcome = link.dispatch("a0r").await;
        assert!(outcome.success);
        assert_eq!(outcome.command, "a0r");
        assert_eq!(outcome.error_kind, Some(DispatchErrorKind::Disabled));

        let probe = link.probe().await;
        assert!(probe.reachable);
        assert_eq!(probe.error_kind, Some(DispatchErrorKind::Disabled));
    }

    #[tokio::test]
    async fn dispatch_sends_command_as_query_parameter() {
        let (url, seen) = serve_once("200 OK", "OK", Duration::ZERO).await;
        let link = enabled(url, Duration::from_secs(2));

        let outcome = link.dispatch("b1l").await;
        assert!(outcome.success, "unexpected outcome: {outcome:?}");
        assert_eq!(outcome.status_code, Some(200));
        assert_eq!(outcome.response_body.as_deref(), Some("OK"));
        assert!(outcome.error_kind.is_none());

        let request_line = seen.await.unwrap();
        assert!(request_line.starts_with("GET /cmd?value=b1l "), "{request_line}");
    }

    #[tokio::test]
    async fn non_success_status_is_http_error() {
        let (url, _seen) = serve_once("503 Service Unavailable", "busy", Duration::ZERO).await;
        let link = enabled(url, Duration::from_secs(2));

        let outcome = link.dispatch("a0r").await;
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(DispatchErrorKind::HttpError));
        assert_eq!(outcome.status_code, Some(503));
        assert!(outcome.message.unwrap().contains("busy"));
    }

    #[tokio::test]
    async fn truncated_error_body_is_still_http_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                // Promises 100 bytes, sends 7, then hangs up.
                let _ = stream
                    .write_all(b"HTTP/1.1 500 Internal Server Error\r\ncontent-length: 100\r\n\r\npartial")
                    .await;
            }
        });
        let link = enabled(format!("http://{addr}"), Duration::from_secs(2));

        let outcome = link.dispatch("e1r").await;
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(DispatchErrorKind::HttpError));
        assert_eq!(outcome.status_code, Some(500));
    }

    #[tokio::test]
    async fn slow_controller_is_timeout() {
        let (url, _seen) = serve_once("200 OK", "OK", Duration::from_secs(3)).await;
        let link = enabled(url, Duration::from_millis(200));

        let outcome = link.dispatch("a0r").await;
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(DispatchErrorKind::Timeout));
    }

    #[tokio::test]
    async fn refused_connection_is_connection_error() {
        // Reserve a port, then free it so nothing is listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let link = enabled(format!("http://{addr}"), Duration::from_secs(2));
        let outcome = link.dispatch("a0r").await;
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(DispatchErrorKind::ConnectionError));
    }

    #[tokio::test]
    async fn probe_hits_base_address() {
        let (url, seen) = serve_once("200 OK", "<html>arm</html>", Duration::ZERO).await;
        let link = enabled(format!("{url}/"), Duration::from_secs(2));

        let probe = link.probe().await;
        assert!(probe.reachable);
        assert_eq!(probe.status_code, Some(200));
        assert!(seen.await.unwrap().starts_with("GET / "));
    }

    #[tokio::test]
    async fn probe_reports_timeout() {
        let (url, _seen) = serve_once("200 OK", "", Duration::from_secs(3)).await;
        let link = enabled(url, Duration::from_millis(200));

        let probe = link.probe().await;
        assert!(!probe.reachable);
        assert_eq!(probe.error_kind, Some(DispatchErrorKind::Timeout));
    }

    #[test]
    fn status_reflects_config() {
        let link = HttpActuator::new(DeviceConfig::default());
        let status = link.status();
        assert!(!status.enabled);
        assert_eq!(status.address, "http://192.168.0.131");
        assert_eq!(status.timeout, DEFAULT_TIMEOUT);
    }
}
