use std::net::SocketAddr;
use std::sync::Once;
use std::time::Duration;

use config::Config;
use server::ServeConfig;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

static INIT: Once = Once::new();

fn init_crypto_provider() {
    INIT.call_once(|| {
        rustls::crypto::aws_lc_rs::default_provider()
            .install_default()
            .expect("Failed to install default crypto provider");
    });
}

/// Test client for making HTTP requests to the test server
pub struct TestClient {
    base_url: String,
    client: reqwest::Client,
}

impl TestClient {
    /// Create a new test client for the given base URL
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    /// Send a GET request to the given path
    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.request(reqwest::Method::GET, path).send().await.unwrap()
    }

    /// Send a GET request to the given path on behalf of a proxied client
    pub async fn get_forwarded_for(&self, path: &str, ip: &str) -> reqwest::Response {
        self.request(reqwest::Method::GET, path)
            .header("X-Forwarded-For", ip)
            .send()
            .await
            .unwrap()
    }

    /// Start building a request with the given method and path
    pub fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client.request(method, format!("{}{}", self.base_url, path))
    }
}

/// Test server that manages the lifecycle of a server instance
pub struct TestServer {
    pub client: TestClient,
    pub address: SocketAddr,
    shutdown_signal: CancellationToken,
    handle: Option<JoinHandle<anyhow::Result<()>>>,
}

impl TestServer {
    /// Start a new test server with the given TOML configuration, panicking if it fails to start
    pub async fn start(config_toml: &str) -> Self {
        Self::try_start(config_toml).await.expect("Server failed to start")
    }

    /// Start a new test server with the given TOML configuration
    pub async fn try_start(config_toml: &str) -> anyhow::Result<Self> {
        init_crypto_provider();

        let config: Config = toml::from_str(config_toml)?;

        // Find an available port
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?;
        drop(listener);

        let shutdown_signal = CancellationToken::new();

        let serve_config = ServeConfig {
            listen_address: address,
            config,
            shutdown_signal: shutdown_signal.clone(),
        };

        let handle = tokio::spawn(server::serve(serve_config));
        let client = TestClient::new(format!("http://{address}"));

        // Wait until the server answers, or report why it stopped
        for _ in 0..50 {
            if handle.is_finished() {
                handle.await??;
                anyhow::bail!("Server stopped before accepting connections");
            }

            let ready = client.request(reqwest::Method::GET, "/").send();

            if let Ok(Ok(_)) = timeout(Duration::from_millis(100), ready).await {
                return Ok(TestServer {
                    client,
                    address,
                    shutdown_signal,
                    handle: Some(handle),
                });
            }

            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        shutdown_signal.cancel();
        anyhow::bail!("Server did not start listening on {address}")
    }

    /// Stop the server gracefully and wait for it to finish
    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        self.shutdown_signal.cancel();

        match self.handle.take() {
            Some(handle) => handle.await?,
            None => Ok(()),
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown_signal.cancel();
    }
}
