//! Authenticated portal session.
//!
//! [`Portal`] owns the HTTP client, the session cookies, and the user's
//! credentials. Every request goes through a handshake loop that transparently
//! completes the identity provider login when the portal asks for it, and
//! waits out throttling responses.
//!
//! # Example
//!
//! ```no_run
//! use politodown::{Credentials, Portal, PortalOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let portal = Portal::new(PortalOptions::default())?;
//! portal
//!     .signin(Credentials::new("s123456", "password"), Some("cookies.txt".into()))
//!     .await?;
//! for material in portal.materials(2023).await? {
//!     println!("{}", material.name());
//! }
//! # Ok(())
//! # }
//! ```

mod auth;
mod cookies;

pub use cookies::{
    CookieError, CookieLine, ParseResult, SessionJar, parse_netscape_cookies,
    write_netscape_cookies,
};

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::error::PortalError;
use crate::urls::PortalUrls;
use crate::user_agent;

use auth::Step;

/// Default HTTP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default per-read timeout on a connection.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Default wait after the portal answers 502 because of too many requests.
pub const DEFAULT_THROTTLE_DELAY: Duration = Duration::from_secs(5);

/// Default number of requests on the wire at the same time.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;

/// Default number of lesson pages fetched concurrently.
pub const DEFAULT_LESSON_FETCH_CONCURRENCY: usize = 4;

/// Upper bound on login handshake steps for a single request.
const MAX_HANDSHAKE_STEPS: usize = 12;

/// Upper bound on consecutive throttled answers for a single request.
const MAX_THROTTLE_RETRIES: usize = 5;

/// Portal account credentials.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    /// Creates credentials.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// The account name.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Construction options for [`Portal`].
#[derive(Debug, Clone)]
pub struct PortalOptions {
    /// Portal hosts.
    pub urls: PortalUrls,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Timeout for each read on the connection; large downloads are not capped.
    pub read_timeout: Duration,
    /// Maximum number of requests on the wire at once.
    pub max_in_flight: usize,
    /// Wait before resending a throttled request.
    pub throttle_delay: Duration,
    /// Lesson pages fetched concurrently when listing a videostore.
    pub lesson_fetch_concurrency: usize,
}

impl Default for PortalOptions {
    fn default() -> Self {
        Self {
            urls: PortalUrls::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            throttle_delay: DEFAULT_THROTTLE_DELAY,
            lesson_fetch_concurrency: DEFAULT_LESSON_FETCH_CONCURRENCY,
        }
    }
}

/// A fetched HTML page.
#[derive(Debug, Clone)]
pub struct Page {
    /// Final URL after redirects.
    pub url: Url,
    /// Decoded body.
    pub body: String,
}

#[derive(Debug, Clone)]
enum PendingRequest {
    Get(Url),
    PostForm(Url, Vec<(String, String)>),
}

impl PendingRequest {
    fn url(&self) -> &Url {
        match self {
            Self::Get(url) | Self::PostForm(url, _) => url,
        }
    }
}

/// Authenticated HTTP session against the portal.
///
/// Cheap to clone; clones share the client, cookies, and credentials.
#[derive(Debug, Clone)]
pub struct Portal {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    client: Client,
    urls: PortalUrls,
    jar: Arc<SessionJar>,
    credentials: RwLock<Option<Credentials>>,
    cookie_path: RwLock<Option<PathBuf>>,
    in_flight: Semaphore,
    throttle_delay: Duration,
    lesson_fetch_concurrency: usize,
}

impl Portal {
    /// Builds a session with an empty cookie jar and no credentials.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::ClientBuild`] if the HTTP client cannot be built.
    pub fn new(options: PortalOptions) -> Result<Self, PortalError> {
        let jar = Arc::new(SessionJar::new());
        let client = Client::builder()
            .connect_timeout(options.connect_timeout)
            .read_timeout(options.read_timeout)
            .user_agent(user_agent::default_user_agent())
            .gzip(true)
            .cookie_provider(Arc::clone(&jar))
            .build()
            .map_err(PortalError::ClientBuild)?;

        debug!(
            max_in_flight = options.max_in_flight,
            throttle_ms = options.throttle_delay.as_millis(),
            "creating portal session"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                urls: options.urls,
                jar,
                credentials: RwLock::new(None),
                cookie_path: RwLock::new(None),
                in_flight: Semaphore::new(options.max_in_flight.max(1)),
                throttle_delay: options.throttle_delay,
                lesson_fetch_concurrency: options.lesson_fetch_concurrency.max(1),
            }),
        })
    }

    /// Portal hosts this session talks to.
    #[must_use]
    pub fn urls(&self) -> &PortalUrls {
        &self.inner.urls
    }

    /// Session cookies.
    #[must_use]
    pub fn cookies(&self) -> &SessionJar {
        &self.inner.jar
    }

    pub(crate) fn lesson_fetch_concurrency(&self) -> usize {
        self.inner.lesson_fetch_concurrency
    }

    /// Sets the credentials, loads cookies (if a cookie file is given), and
    /// opens the student home page so the session is established.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::Login`] when the identity provider rejects the
    /// credentials, or any request/cookie error.
    #[instrument(skip(self, credentials), fields(username = %credentials.username()))]
    pub async fn signin(
        &self,
        credentials: Credentials,
        cookie_path: Option<PathBuf>,
    ) -> Result<(), PortalError> {
        *write_lock(&self.inner.credentials) = Some(credentials);
        *write_lock(&self.inner.cookie_path) = cookie_path.clone();

        if let Some(path) = &cookie_path {
            self.inner.jar.load_file(path).await?;
        }

        let home = self.inner.urls.home();
        let response = self.get(home).await?;
        info!(status = response.status().as_u16(), "signed in");
        Ok(())
    }

    /// Returns the signed-in username.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::NotSignedIn`] before `signin`.
    pub fn username(&self) -> Result<String, PortalError> {
        self.credentials().map(|c| c.username)
    }

    fn credentials(&self) -> Result<Credentials, PortalError> {
        read_lock(&self.inner.credentials)
            .clone()
            .ok_or(PortalError::NotSignedIn)
    }

    /// Requests `url`, completing the login handshake if needed.
    ///
    /// The final response is returned whatever its status.
    ///
    /// # Errors
    ///
    /// Returns network errors, [`PortalError::Login`] on rejected
    /// credentials, [`PortalError::NotSignedIn`] when a login is needed
    /// without credentials, or [`PortalError::HandshakeLoop`].
    #[instrument(skip(self), fields(url = %url))]
    pub async fn get(&self, url: Url) -> Result<Response, PortalError> {
        let mut request = PendingRequest::Get(url.clone());
        let mut handshake_steps = 0usize;
        let mut throttled = 0usize;

        loop {
            let response = self.send(&request).await?;
            debug!(
                url = %response.url(),
                status = response.status().as_u16(),
                redirected = response.url() != request.url(),
                "portal response"
            );

            let step = auth::classify(&self.inner.urls, response.url(), response.status());
            match step {
                Step::Done => {
                    self.persist_cookies().await?;
                    return Ok(response);
                }
                Step::Throttled => {
                    throttled += 1;
                    if throttled > MAX_THROTTLE_RETRIES {
                        return Err(PortalError::http_status(response.url().as_str(), 502));
                    }
                    info!(
                        url = %response.url(),
                        delay_ms = self.inner.throttle_delay.as_millis(),
                        "request throttled, retrying"
                    );
                    tokio::time::sleep(self.inner.throttle_delay).await;
                    continue;
                }
                Step::Login => {
                    let credentials = self.credentials()?;
                    request = PendingRequest::PostForm(
                        self.inner.urls.login(),
                        auth::login_form(&credentials.username, &credentials.password),
                    );
                }
                Step::ExpiringPassword => {
                    info!("password is expiring soon");
                    let credentials = self.credentials()?;
                    request = PendingRequest::PostForm(
                        self.inner.urls.login(),
                        auth::expiring_password_form(
                            &credentials.username,
                            &credentials.password,
                        ),
                    );
                }
                Step::SsoForm => {
                    info!("SSO auth request");
                    let page_url = response.url().clone();
                    let body = response
                        .text()
                        .await
                        .map_err(|e| PortalError::request(page_url.as_str(), e))?;
                    let (action, fields) = auth::parse_sso_form(&body, &page_url)?;
                    request = PendingRequest::PostForm(action, fields);
                }
                Step::LoginRejected => {
                    let body = response
                        .text()
                        .await
                        .map_err(|e| PortalError::request(url.as_str(), e))?;
                    let message = auth::parse_login_error(&body);
                    error!(%message, "login rejected");
                    return Err(PortalError::Login { message });
                }
            }

            handshake_steps += 1;
            if handshake_steps >= MAX_HANDSHAKE_STEPS {
                return Err(PortalError::HandshakeLoop {
                    url: url.to_string(),
                    steps: handshake_steps,
                });
            }
        }
    }

    /// Fetches an HTML page and fails on non-success statuses.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::HttpStatus`] on non-success, or any error of [`Portal::get`].
    pub async fn get_page(&self, url: Url) -> Result<Page, PortalError> {
        let response = ensure_success(self.get(url).await?)?;
        let final_url = response.url().clone();
        let body = response
            .text()
            .await
            .map_err(|e| PortalError::request(final_url.as_str(), e))?;
        Ok(Page {
            url: final_url,
            body,
        })
    }

    /// Fetches and decodes a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::Json`] on a malformed body, or any error of [`Portal::get_page`].
    pub async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, PortalError> {
        let page = self.get_page(url).await?;
        serde_json::from_str(&page.body).map_err(|source| PortalError::Json {
            url: page.url.to_string(),
            source,
        })
    }

    async fn send(&self, request: &PendingRequest) -> Result<Response, PortalError> {
        // Only the exchange up to the response headers holds a slot; bodies
        // stream outside of it.
        let _permit = self.inner.in_flight.acquire().await.ok();

        let builder = match request {
            PendingRequest::Get(url) => self.inner.client.get(url.clone()),
            PendingRequest::PostForm(url, fields) => {
                self.inner.client.post(url.clone()).form(fields)
            }
        };
        builder
            .send()
            .await
            .map_err(|e| PortalError::request(request.url().as_str(), e))
    }

    async fn persist_cookies(&self) -> Result<(), PortalError> {
        let path = read_lock(&self.inner.cookie_path).clone();
        let Some(path) = path else {
            return Ok(());
        };
        if self.inner.jar.take_dirty() {
            if let Err(error) = self.inner.jar.save_file(&path).await {
                warn!(path = %path.display(), %error, "failed to save session cookies");
                return Err(error.into());
            }
            debug!(path = %path.display(), "session cookies saved");
        }
        Ok(())
    }
}

/// Converts a non-success response into [`PortalError::HttpStatus`].
///
/// # Errors
///
/// Returns [`PortalError::HttpStatus`] when the status is not 2xx.
pub fn ensure_success(response: Response) -> Result<Response, PortalError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(PortalError::http_status(
            response.url().as_str(),
            status.as_u16(),
        ))
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
