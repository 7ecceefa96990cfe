//! System-browser frame for native applications
//!
//! Binds the host and port of a loopback redirect URI (for example
//! `http://127.0.0.1:8765/callback`), sends the user's browser to the
//! authorize URL and resolves with the first request that hits the redirect
//! path. Only `query` response mode works here: browsers never send the
//! fragment to the server.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::timeout;
use url::Url;

use crate::error::{OidcError, Result};
use crate::oidc::frame::{HiddenFrame, HiddenFrameFactory};

const SUCCESS_PAGE: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nConnection: close\r\n\r\nAuthorization complete. You may close this tab.";
const NOT_FOUND_PAGE: &str = "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

/// How long one connection may take to send its request headers.
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Creates [`LoopbackFrame`]s for one redirect URI.
#[derive(Debug, Clone)]
pub struct LoopbackFrameFactory {
    redirect_uri: Url,
    open_browser: bool,
}

impl LoopbackFrameFactory {
    /// Creates a factory listening on `redirect_uri`.
    ///
    /// With `open_browser` the system browser is launched for each
    /// navigation; the URL is always printed to stderr.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::Configuration`] for an unparsable URI. Other
    /// redirect URIs are accepted here but frames can only be created for
    /// `http` URIs with a host.
    pub fn new(redirect_uri: &str, open_browser: bool) -> Result<Self> {
        Ok(Self {
            redirect_uri: Url::parse(redirect_uri)?,
            open_browser,
        })
    }

    fn bind_address(&self) -> Result<String> {
        match self.redirect_uri.host_str() {
            Some(host) if self.redirect_uri.scheme() == "http" => {
                let port = self.redirect_uri.port_or_known_default().unwrap_or(80);
                Ok(format!("{host}:{port}"))
            }
            _ => Err(OidcError::Frame(format!(
                "loopback redirect URI must be http://host:port/path, got {}",
                self.redirect_uri
            ))),
        }
    }
}

#[async_trait]
impl HiddenFrameFactory for LoopbackFrameFactory {
    async fn create(&self) -> Result<Box<dyn HiddenFrame>> {
        let address = self.bind_address()?;
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| OidcError::Frame(format!("failed to bind redirect listener on {address}: {e}")))?;
        tracing::debug!(%address, "Listening for authorization redirect");
        Ok(Box::new(LoopbackFrame {
            listener: Some(listener),
            redirect_uri: self.redirect_uri.clone(),
            open_browser: self.open_browser,
        }))
    }
}

/// One loopback listener plus the browser pointed at it.
#[derive(Debug)]
pub struct LoopbackFrame {
    listener: Option<TcpListener>,
    redirect_uri: Url,
    open_browser: bool,
}

#[async_trait]
impl HiddenFrame for LoopbackFrame {
    async fn set_source(&mut self, url: &Url) -> Result<()> {
        eprintln!("Open the following URL in your browser to sign in:\n{url}");
        if self.open_browser {
            try_open_browser(url.as_str());
        }
        Ok(())
    }

    async fn completion(&mut self) -> Result<Url> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| OidcError::Frame("frame already removed".to_string()))?;
        accept_redirect(listener, &self.redirect_uri).await
    }

    async fn remove(&mut self) {
        self.listener = None;
    }
}

/// Accepts connections until one requests the redirect path, answers it
/// and returns the full redirect URL including its query.
///
/// Each connection is served on its own task, so a browser's idle
/// pre-connection cannot hold up the real callback. Requests for other
/// paths (such as `/favicon.ico`) get a 404.
pub(crate) async fn accept_redirect(listener: &TcpListener, redirect_uri: &Url) -> Result<Url> {
    let (found_tx, mut found_rx) = mpsc::channel::<String>(1);
    // Dropping the set aborts connections still being served.
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _peer) = accepted.map_err(|e| {
                    OidcError::Frame(format!("failed to accept redirect connection: {e}"))
                })?;
                connections.spawn(serve_connection(
                    stream,
                    redirect_uri.path().to_string(),
                    found_tx.clone(),
                ));
            }
            Some(target) = found_rx.recv() => {
                return redirect_uri
                    .join(&target)
                    .map_err(|e| OidcError::Frame(format!("invalid redirect request target: {e}")));
            }
            // Reap finished connections so the set stays small.
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}

/// Reads one request and answers it; forwards the target when it hits
/// `redirect_path`.
async fn serve_connection(stream: TcpStream, redirect_path: String, found: mpsc::Sender<String>) {
    let (read_half, mut write_half) = stream.into_split();

    let request_line = match timeout(REQUEST_READ_TIMEOUT, read_request_line(read_half)).await {
        Ok(Ok(line)) => line,
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "Failed to read redirect request");
            return;
        }
        Err(_) => {
            tracing::debug!("Redirect connection sent no request in time");
            return;
        }
    };

    // "GET /callback?code=...&state=... HTTP/1.1"
    let target = request_line.split_whitespace().nth(1).unwrap_or("/");
    let path = target.split_once('?').map_or(target, |(p, _)| p);

    if path != redirect_path {
        let _ = write_half.write_all(NOT_FOUND_PAGE.as_bytes()).await;
        return;
    }

    let _ = write_half.write_all(SUCCESS_PAGE.as_bytes()).await;
    let _ = write_half.shutdown().await;
    let _ = found.send(target.to_string()).await;
}

/// Returns the request line, consuming headers up to the blank line.
async fn read_request_line(read_half: OwnedReadHalf) -> std::io::Result<String> {
    let mut lines = BufReader::new(read_half).lines();
    let mut request_line = String::new();
    while let Some(line) = lines.next_line().await? {
        if line.is_empty() {
            break;
        }
        if request_line.is_empty() {
            request_line = line;
        }
    }
    Ok(request_line)
}

/// Attempts to open `url` in the user's default browser.
///
/// Failures are ignored; the URL has already been printed.
pub fn try_open_browser(url: &str) {
    #[cfg(target_os = "macos")]
    {
        let _ = std::process::Command::new("open").arg(url).spawn();
    }
    #[cfg(target_os = "linux")]
    {
        let _ = std::process::Command::new("xdg-open").arg(url).spawn();
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        let _ = url;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    async fn send_request(port: u16, target: &str) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream
            .write_all(format!("GET {target} HTTP/1.1\r\nHost: localhost\r\n\r\n").as_bytes())
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[test]
    fn test_factory_rejects_unparsable_redirect() {
        assert!(LoopbackFrameFactory::new("not a url", false).is_err());
    }

    #[tokio::test]
    async fn test_non_http_redirect_cannot_create_frames() {
        for uri in ["https://app.example/cb", "custom:/cb"] {
            let factory = LoopbackFrameFactory::new(uri, false).unwrap();
            assert!(matches!(factory.create().await, Err(OidcError::Frame(_))));
        }
    }

    #[test]
    fn test_bind_address_uses_redirect_host_and_port() {
        let factory = LoopbackFrameFactory::new("http://127.0.0.1:8765/callback", false).unwrap();
        assert_eq!(factory.bind_address().unwrap(), "127.0.0.1:8765");
        let default_port = LoopbackFrameFactory::new("http://localhost/cb", false).unwrap();
        assert_eq!(default_port.bind_address().unwrap(), "localhost:80");
    }

    #[tokio::test]
    async fn test_accept_redirect_returns_callback_url() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let redirect = Url::parse(&format!("http://127.0.0.1:{port}/callback")).unwrap();

        let client = tokio::spawn(async move {
            let favicon = send_request(port, "/favicon.ico").await;
            let callback = send_request(port, "/callback?code=abc&state=s1").await;
            (favicon, callback)
        });

        let url = accept_redirect(&listener, &redirect).await.unwrap();
        assert_eq!(url.path(), "/callback");
        assert_eq!(url.query(), Some("code=abc&state=s1"));

        let (favicon, callback) = client.await.unwrap();
        assert!(favicon.starts_with("HTTP/1.1 404"));
        assert!(callback.starts_with("HTTP/1.1 200"));
    }

    #[tokio::test]
    async fn test_idle_connection_does_not_block_callback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let redirect = Url::parse(&format!("http://127.0.0.1:{port}/callback")).unwrap();

        let client = tokio::spawn(async move {
            // Browsers open speculative connections and may never use them.
            let idle = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            let callback = send_request(port, "/callback?code=abc&state=s1").await;
            (idle, callback)
        });

        let url = tokio::time::timeout(Duration::from_secs(2), accept_redirect(&listener, &redirect))
            .await
            .expect("callback was blocked by the idle connection")
            .unwrap();
        assert_eq!(url.query(), Some("code=abc&state=s1"));

        let (_idle, callback) = client.await.unwrap();
        assert!(callback.starts_with("HTTP/1.1 200"));
    }

    #[tokio::test]
    async fn test_removed_frame_cannot_complete() {
        let factory = LoopbackFrameFactory::new("http://127.0.0.1:0/callback", false).unwrap();
        let mut frame = factory.create().await.unwrap();
        frame.remove().await;
        assert!(matches!(frame.completion().await, Err(OidcError::Frame(_))));
    }
}
