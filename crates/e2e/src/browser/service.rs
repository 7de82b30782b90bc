//! Driver process management - spawning and health checking WebDriver binaries

use serde_json::Value;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use super::EngineType;
use crate::error::{E2eError, E2eResult};

/// Time a driver gets to exit after SIGTERM
const STOP_GRACE: Duration = Duration::from_millis(200);

/// Handle to a running driver process
pub struct DriverService {
    child: Child,
    pub base_url: String,
    pub port: u16,
}

impl DriverService {
    /// Spawn a driver binary and wait until it accepts sessions
    pub async fn spawn(config: DriverConfig) -> E2eResult<Self> {
        let port = match config.port {
            Some(port) => port,
            None => find_free_port()?,
        };
        let base_url = format!("http://127.0.0.1:{}", port);

        info!(
            "Spawning {} on port {}",
            config.binary_path.display(),
            port
        );

        let mut cmd = Command::new(&config.binary_path);
        cmd.args(port_args(config.engine, port))
            .args(&config.extra_args)
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let child = cmd.spawn().map_err(|e| {
            E2eError::DriverStartup(format!(
                "Failed to spawn {}: {}",
                config.binary_path.display(),
                e
            ))
        })?;

        let mut service = DriverService {
            child,
            base_url: base_url.clone(),
            port,
        };

        // Wait for driver to be ready
        if let Err(e) = service.wait_for_ready(config.startup_timeout).await {
            let _ = service.shutdown().await;
            return Err(e);
        }

        info!("Driver is ready at {}", base_url);
        Ok(service)
    }

    /// Poll `GET /status` until the driver reports ready
    async fn wait_for_ready(&mut self, timeout_duration: Duration) -> E2eResult<()> {
        let status_url = format!("{}/status", self.base_url);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()?;

        let start = std::time::Instant::now();
        let mut attempts = 0;

        while start.elapsed() < timeout_duration {
            attempts += 1;

            if let Ok(Some(status)) = self.child.try_wait() {
                return Err(E2eError::DriverStartup(format!(
                    "driver exited early with {}",
                    status
                )));
            }

            match client.get(&status_url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    let body: Value = resp.json().await.unwrap_or(Value::Null);
                    let ready = body
                        .pointer("/value/ready")
                        .and_then(Value::as_bool)
                        .unwrap_or(true);
                    if ready {
                        return Ok(());
                    }
                }
                Ok(resp) => {
                    warn!("Driver status returned {}", resp.status());
                }
                Err(e) => {
                    if attempts == 1 {
                        info!("Waiting for driver to start...");
                    }
                    // Connection refused is expected while the driver is starting
                    if !e.is_connect() {
                        warn!("Driver status error: {}", e);
                    }
                }
            }

            sleep(Duration::from_millis(100)).await;
        }

        Err(E2eError::DriverHealthCheck(attempts))
    }

    /// Get the base URL for this driver
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Stop the driver without blocking the runtime
    pub async fn shutdown(&mut self) -> E2eResult<()> {
        if self.has_exited() {
            return Ok(());
        }
        if self.terminate() {
            sleep(STOP_GRACE).await;
        }
        self.kill();
        Ok(())
    }

    /// Blocking stop, for contexts without a runtime such as `Drop`
    pub fn stop(&mut self) -> E2eResult<()> {
        if self.has_exited() {
            return Ok(());
        }
        if self.terminate() {
            std::thread::sleep(STOP_GRACE);
        }
        self.kill();
        Ok(())
    }

    fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }

    /// Ask the driver to exit; true if the signal was delivered
    #[cfg(unix)]
    fn terminate(&self) -> bool {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        info!("Stopping driver (pid: {})", self.child.id());
        let pid = Pid::from_raw(self.child.id() as i32);
        kill(pid, Signal::SIGTERM).is_ok()
    }

    #[cfg(not(unix))]
    fn terminate(&self) -> bool {
        info!("Stopping driver (pid: {})", self.child.id());
        false
    }

    // Force kill if still running
    fn kill(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for DriverService {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Configuration for spawning a driver
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub engine: EngineType,

    /// Path to the driver binary
    pub binary_path: PathBuf,

    /// Port to listen on (None = find free port)
    pub port: Option<u16>,

    /// Timeout for driver startup
    pub startup_timeout: Duration,

    pub extra_args: Vec<String>,
}

impl DriverConfig {
    /// Default binary for a local engine; `None` for the remote engine
    pub fn for_engine(engine: EngineType) -> Option<Self> {
        default_driver_binary(engine).map(|binary| Self {
            engine,
            binary_path: PathBuf::from(binary),
            port: None,
            startup_timeout: Duration::from_secs(30),
            extra_args: Vec::new(),
        })
    }
}

/// Driver binary looked up on `PATH` for each local engine
pub fn default_driver_binary(engine: EngineType) -> Option<&'static str> {
    match engine {
        EngineType::Firefox => Some("geckodriver"),
        EngineType::Chrome | EngineType::HeadlessEngine => Some("chromedriver"),
        EngineType::Edge => Some("msedgedriver"),
        EngineType::Ie => Some("IEDriverServer"),
        EngineType::Safari => Some("safaridriver"),
        EngineType::Opera => Some("operadriver"),
        EngineType::Remote => None,
    }
}

/// Command line that tells a driver which port to bind
fn port_args(engine: EngineType, port: u16) -> Vec<String> {
    match engine {
        EngineType::Ie => vec![format!("/port={}", port)],
        EngineType::Safari => vec!["--port".to_string(), port.to_string()],
        _ => vec![format!("--port={}", port)],
    }
}

/// Find a free port to use
fn find_free_port() -> E2eResult<u16> {
    use std::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_free_port() {
        let port1 = find_free_port().unwrap();
        let port2 = find_free_port().unwrap();

        // Ports should be in valid range
        assert!(port1 > 1024);
        assert!(port2 > 1024);
    }

    #[test]
    fn test_port_args() {
        assert_eq!(port_args(EngineType::Chrome, 9515), vec!["--port=9515"]);
        assert_eq!(port_args(EngineType::Ie, 5555), vec!["/port=5555"]);
        assert_eq!(port_args(EngineType::Safari, 4444), vec!["--port", "4444"]);
    }

    #[test]
    fn test_remote_has_no_local_driver() {
        assert!(DriverConfig::for_engine(EngineType::Remote).is_none());
        assert_eq!(
            DriverConfig::for_engine(EngineType::HeadlessEngine)
                .unwrap()
                .binary_path,
            PathBuf::from("chromedriver")
        );
    }

    #[tokio::test]
    async fn test_missing_binary_fails_to_spawn() {
        let config = DriverConfig {
            binary_path: PathBuf::from("/nonexistent/driver-binary"),
            ..DriverConfig::for_engine(EngineType::Chrome).unwrap()
        };
        let err = DriverService::spawn(config).await.err().unwrap();
        assert!(matches!(err, E2eError::DriverStartup(_)));
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "current_thread")]
    async fn test_shutdown_stops_process_on_single_thread_runtime() {
        let child = Command::new("sleep")
            .arg("30")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap();
        let mut service = DriverService {
            child,
            base_url: "http://127.0.0.1:1".to_string(),
            port: 1,
        };

        let ticker = tokio::spawn(async {
            sleep(Duration::from_millis(10)).await;
        });
        service.shutdown().await.unwrap();

        assert!(service.has_exited());
        assert!(ticker.is_finished());
        service.shutdown().await.unwrap();
    }
}
