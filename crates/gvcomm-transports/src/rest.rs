use std::sync::Arc;
use std::time::Duration;

use gvcomm::error::{Error, ErrorKind, Result};
use gvcomm::transport::{Message, Transport, TransportListener};

use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;

use tracing::{debug, warn};

use crate::{Credentials, Listeners};

// Content type of every request body.
const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Configuration of a [`RestTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestConfig {
    server: String,
    port: u16,
    credentials: Option<Credentials>,
    timeout: Duration,
    use_https: bool,
}

impl RestConfig {
    /// Creates a [`RestConfig`] for the server at the given address.
    ///
    /// By default, requests are sent over plain `HTTP`, are not
    /// authenticated and time out after 10 seconds.
    #[must_use]
    pub fn new(server: impl Into<String>, port: u16) -> Self {
        Self {
            server: server.into(),
            port,
            credentials: None,
            timeout: Duration::from_secs(10),
            use_https: false,
        }
    }

    /// Sets the [`Credentials`] used for basic authentication.
    #[must_use]
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets whether requests are sent over `HTTPS`.
    ///
    /// Connecting fails unless the `https` feature is enabled.
    #[must_use]
    pub const fn use_https(mut self, use_https: bool) -> Self {
        self.use_https = use_https;
        self
    }

    /// Returns the base `URL` of the requests.
    #[must_use]
    pub fn base_url(&self) -> String {
        let scheme = if self.use_https { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.server, self.port)
    }
}

/// A [`Transport`] over `REST`.
///
/// Each sent payload becomes a `POST` request to the path named by its
/// channel. Inbound delivery is not supported: subscriptions are accepted
/// but never produce messages.
///
/// Registered [`TransportListener`]s are notified when the transport is
/// connected and disconnected. Since no session is kept between requests,
/// a lost connection surfaces as a failed send instead.
#[derive(Debug)]
pub struct RestTransport {
    config: RestConfig,
    client: Option<Client>,
    listeners: Listeners,
}

impl RestTransport {
    /// Creates a [`RestTransport`].
    #[must_use]
    pub const fn new(config: RestConfig) -> Self {
        Self {
            config,
            client: None,
            listeners: Listeners(Vec::new()),
        }
    }

    /// Registers a [`TransportListener`].
    pub fn add_listener(&mut self, listener: Arc<dyn TransportListener>) {
        self.listeners.add(listener);
    }

    /// Returns the [`RestConfig`].
    #[must_use]
    pub const fn config(&self) -> &RestConfig {
        &self.config
    }
}

impl Transport for RestTransport {
    fn connect(&mut self) -> Result<()> {
        if self.client.is_some() {
            return Ok(());
        }

        let client = if self.config.use_https && !cfg!(feature = "https") {
            Err(Error::new(
                ErrorKind::Connection,
                "HTTPS requested but the `https` feature is disabled",
            ))
        } else {
            Client::builder()
                .timeout(self.config.timeout)
                .https_only(self.config.use_https)
                .build()
                .map_err(|e| {
                    Error::new(
                        ErrorKind::Connection,
                        format!("Impossible to build the HTTP client: {e}"),
                    )
                })
        };

        let client = match client {
            Ok(client) => client,
            Err(error) => {
                self.listeners.notify(|listener| listener.on_connection_failed(&error));
                return Err(error);
            }
        };

        self.client = Some(client);
        debug!("Ready to send requests to {}", self.config.base_url());
        self.listeners.notify(|listener| listener.on_connect());

        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        if self.client.take().is_some() {
            self.listeners.notify(|listener| listener.on_disconnect());
        }
        Ok(())
    }

    fn send(&mut self, channel: &str, payload: &[u8]) -> Result<()> {
        let Some(client) = &self.client else {
            return Err(Error::new(
                ErrorKind::NotConnected,
                "The REST transport is not connected",
            ));
        };

        let url = format!("{}{channel}", self.config.base_url());

        let mut request = client
            .post(&url)
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .body(payload.to_vec());

        if let Some(credentials) = &self.config.credentials {
            request = request.basic_auth(credentials.username(), Some(credentials.password()));
        }

        let response = request.send().map_err(|e| {
            Error::new(
                ErrorKind::SendFailure,
                format!("Request to `{url}` failed: {e}"),
            )
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::new(
                ErrorKind::SendFailure,
                format!("Request to `{url}` rejected with status {status}"),
            ));
        }

        Ok(())
    }

    fn poll(&mut self) -> Option<Message> {
        None
    }

    fn subscribe(&mut self, channel: &str) -> Result<()> {
        warn!("Subscription to `{channel}` ignored: REST does not support inbound messages");
        Ok(())
    }
}
