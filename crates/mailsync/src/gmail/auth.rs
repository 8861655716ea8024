//! Gmail OAuth2 authentication
//!
//! Implements the OAuth2 authorization code flow with a loopback redirect,
//! and a file-backed token cache. The sync path only ever reads or refreshes
//! the cached token; the interactive flow runs when the application asks for
//! it explicitly.

use anyhow::{Context, Result, bail};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use url::Url;

/// Source of bearer tokens for API requests
///
/// Implementations must not block on user interaction.
pub trait AccessTokenProvider: Send + Sync {
    fn access_token(&self) -> Result<String>;
}

/// Refresh tokens this many seconds before they expire
const EXPIRY_MARGIN_SECS: i64 = 300;

/// OAuth2 configuration and token management for Gmail
pub struct GmailAuth {
    client_id: String,
    client_secret: String,
    token_path: PathBuf,
}

/// Stored token data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StoredToken {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<i64>,
}

impl StoredToken {
    fn is_fresh(&self, now: i64) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at > now + EXPIRY_MARGIN_SECS)
    }
}

/// Token response from Google
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
    #[allow(dead_code)]
    token_type: String,
}

impl GmailAuth {
    const AUTH_URL: &'static str = "https://accounts.google.com/o/oauth2/v2/auth";
    const TOKEN_URL: &'static str = "https://oauth2.googleapis.com/token";

    /// Read-only access is all the notifier needs
    const GMAIL_READONLY_SCOPE: &'static str = "https://www.googleapis.com/auth/gmail.readonly";

    /// Port range to try for local OAuth callback server
    const PORT_RANGE_START: u16 = 8080;
    const PORT_RANGE_END: u16 = 8090;

    /// Create a new GmailAuth storing tokens in the config directory
    ///
    /// # Arguments
    /// * `client_id` - OAuth2 client ID from Google Cloud Console
    /// * `client_secret` - OAuth2 client secret from Google Cloud Console
    pub fn new(client_id: String, client_secret: String) -> Result<Self> {
        let token_path = config::config_path("gmail-tokens.json")
            .context("Could not determine config directory")?;
        Ok(Self::with_token_path(client_id, client_secret, token_path))
    }

    /// Create a GmailAuth with an explicit token file
    pub fn with_token_path(client_id: String, client_secret: String, token_path: PathBuf) -> Self {
        Self {
            client_id,
            client_secret,
            token_path,
        }
    }

    pub fn token_path(&self) -> &Path {
        &self.token_path
    }

    /// Get a token from the cache, refreshing it if needed
    ///
    /// Fails instead of prompting when no usable token exists.
    pub fn cached_access_token(&self) -> Result<String> {
        let token = self
            .load_token()
            .context("No stored Gmail token; authentication required")?;

        if token.is_fresh(chrono::Utc::now().timestamp()) {
            return Ok(token.access_token);
        }

        let refresh_token = token
            .refresh_token
            .context("Gmail token expired and has no refresh token")?;
        let new_token = self.refresh_access_token(&refresh_token)?;
        self.save_token_response(&new_token)?;
        debug!("[GMAIL] Refreshed access token");
        Ok(new_token.access_token)
    }

    /// Ensure a usable token exists, running the browser flow if necessary
    pub fn authenticate(&self) -> Result<()> {
        match self.cached_access_token() {
            Ok(_) => Ok(()),
            Err(e) => {
                info!("Interactive authentication required: {:#}", e);
                let token = self.authorization_code_auth()?;
                self.save_token_response(&token)
            }
        }
    }

    /// Mark the stored access token as unusable, keeping the refresh token
    ///
    /// Used when the server rejects a token that has not expired locally.
    pub fn invalidate(&self) -> Result<()> {
        let Ok(mut token) = self.load_token() else {
            return Ok(());
        };
        token.expires_at = Some(0);
        config::save_json_file(&self.token_path, &token)
    }

    /// Obtain a new token after the server rejected the current one
    ///
    /// Refreshes with the stored refresh token when possible and falls back
    /// to the interactive flow.
    pub fn reauthenticate(&self) -> Result<()> {
        self.invalidate()?;
        self.authenticate()
    }

    /// Check if the user is already authenticated
    pub fn is_authenticated(&self) -> bool {
        self.cached_access_token().is_ok()
    }

    /// Clear stored tokens (logout)
    pub fn logout(&self) -> Result<()> {
        if self.token_path.exists() {
            fs::remove_file(&self.token_path)?;
        }
        Ok(())
    }

    /// Perform authorization code flow authentication
    fn authorization_code_auth(&self) -> Result<TokenResponse> {
        let (listener, port) = self.start_local_server()?;
        let redirect_uri = format!("http://localhost:{}", port);

        let auth_url = format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent",
            Self::AUTH_URL,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&redirect_uri),
            urlencoding::encode(Self::GMAIL_READONLY_SCOPE),
        );

        println!("\n=== Gmail Authentication Required ===");
        println!("Opening browser for authentication...");
        println!("If the browser doesn't open, visit: {}", auth_url);

        if let Err(e) = open::that(&auth_url) {
            warn!("Failed to open browser: {}. Please open the URL manually.", e);
        }

        println!("Waiting for authorization...");
        let code = self.wait_for_callback(listener)?;

        let mut response = ureq::post(Self::TOKEN_URL)
            .send_form([
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code.as_str()),
                ("grant_type", "authorization_code"),
                ("redirect_uri", redirect_uri.as_str()),
            ])
            .context("Failed to exchange authorization code")?;

        let token: TokenResponse = response
            .body_mut()
            .read_json()
            .context("Failed to parse token response")?;

        println!("Authentication successful!\n");
        Ok(token)
    }

    /// Start a local TCP server on an available port
    fn start_local_server(&self) -> Result<(TcpListener, u16)> {
        for port in Self::PORT_RANGE_START..=Self::PORT_RANGE_END {
            if let Ok(listener) = TcpListener::bind(format!("127.0.0.1:{}", port)) {
                return Ok((listener, port));
            }
        }
        bail!(
            "Could not bind to any port in range {}-{}",
            Self::PORT_RANGE_START,
            Self::PORT_RANGE_END
        )
    }

    /// Wait for OAuth callback and extract authorization code
    fn wait_for_callback(&self, listener: TcpListener) -> Result<String> {
        let (mut stream, _) = listener.accept().context("Failed to accept connection")?;

        let mut request_line = String::new();
        BufReader::new(&stream)
            .read_line(&mut request_line)
            .context("Failed to read request")?;

        let code = parse_callback(&request_line);

        let (status, body) = if code.is_ok() {
            ("200 OK", "Authentication successful! You can close this window.")
        } else {
            ("400 Bad Request", "Authentication failed. Please try again.")
        };
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n<html><body><h1>{}</h1></body></html>",
            status, body
        );
        stream.write_all(response.as_bytes()).ok();

        code
    }

    /// Refresh an access token using a refresh token
    fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenResponse> {
        let response = ureq::post(Self::TOKEN_URL)
            .send_form([
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .context("Failed to refresh access token")?;

        let mut token: TokenResponse = response
            .into_body()
            .read_json()
            .context("Failed to parse refresh token response")?;

        // Google omits the refresh token on refresh
        if token.refresh_token.is_none() {
            token.refresh_token = Some(refresh_token.to_string());
        }

        Ok(token)
    }

    fn load_token(&self) -> Result<StoredToken> {
        config::load_json_file(&self.token_path)
    }

    fn save_token_response(&self, token: &TokenResponse) -> Result<()> {
        let stored = StoredToken {
            access_token: token.access_token.clone(),
            refresh_token: token.refresh_token.clone(),
            expires_at: token
                .expires_in
                .map(|d| chrono::Utc::now().timestamp() + d as i64),
        };
        config::save_json_file(&self.token_path, &stored)
    }
}

impl AccessTokenProvider for GmailAuth {
    fn access_token(&self) -> Result<String> {
        self.cached_access_token()
    }
}

/// Pull the authorization code out of the callback's request line
///
/// Format: `GET /?code=AUTH_CODE&scope=... HTTP/1.1`
fn parse_callback(request_line: &str) -> Result<String> {
    let path = request_line
        .split_whitespace()
        .nth(1)
        .context("Malformed callback request")?;
    let url = Url::parse(&format!("http://localhost{}", path))
        .context("Malformed callback request")?;

    let mut code = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "error" => bail!("OAuth error: {}", value),
            "code" => code = Some(value.into_owned()),
            _ => {}
        }
    }
    code.context("No authorization code received")
}
