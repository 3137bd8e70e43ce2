//! Static dev server with live reload
//!
//! Serves the output directory over HTTP. HTML responses get a small script
//! that listens on an event stream; when an output file matching the
//! configured globs changes, every connected page reloads.

use std::convert::Infallible;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

use crate::error::{Result, StagehandError};
use crate::paths;
use crate::watch::{self, FileWatcher};

/// Path of the server-sent events endpoint
pub const EVENTS_PATH: &str = "/__stagehand/events";

const RELOAD_SCRIPT: &str = concat!(
    "<script>(function(){var s=new EventSource(\"/__stagehand/events\");",
    "s.addEventListener(\"reload\",function(){location.reload();});})();</script>"
);

/// Where and what to serve
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub host: String,
    pub port: u16,
    /// Absolute directory served at `/`
    pub root: PathBuf,
    /// Root that `files` globs are relative to
    pub project_root: PathBuf,
    /// Output globs whose changes reload the browser
    pub files: Vec<String>,
    pub debounce: Duration,
}

/// A running server
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    _watcher: Option<FileWatcher>,
}

impl ServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.task.await;
        debug!("dev server stopped");
    }
}

/// Bind and start serving in the background
pub fn start(options: ServerOptions) -> Result<ServerHandle> {
    let addr = (options.host.as_str(), options.port)
        .to_socket_addrs()
        .map_err(|e| StagehandError::Server {
            message: format!("cannot resolve {}:{}: {}", options.host, options.port, e),
        })?
        .next()
        .ok_or_else(|| StagehandError::Server {
            message: format!("no address for {}", options.host),
        })?;

    let (reload, _) = broadcast::channel(16);

    let watcher = if options.files.is_empty() {
        None
    } else {
        Some(reload_on_change(&options, reload.clone())?)
    };

    let events_tx = reload;
    let events = warp::path!("__stagehand" / "events")
        .and(warp::get())
        .map(move || {
            let stream = futures::stream::unfold(events_tx.subscribe(), |mut rx| async move {
                loop {
                    match rx.recv().await {
                        Ok(()) => {
                            let event = warp::sse::Event::default().event("reload").data("reload");
                            return Some((Ok::<_, Infallible>(event), rx));
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            });
            warp::sse::reply(warp::sse::keep_alive().stream(stream))
        });

    let root = Arc::new(options.root.clone());
    let files = warp::get()
        .and(warp::path::tail())
        .and_then(move |tail: warp::path::Tail| {
            let root = Arc::clone(&root);
            async move { serve(&root, tail.as_str()).await }
        });

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let (addr, server) = warp::serve(events.or(files))
        .try_bind_with_graceful_shutdown(addr, async move {
            let _ = shutdown_rx.await;
        })
        .map_err(|e| StagehandError::Server {
            message: format!("cannot bind {}: {}", addr, e),
        })?;

    info!(%addr, root = %options.root.display(), "dev server listening");

    Ok(ServerHandle {
        addr,
        shutdown: Some(shutdown_tx),
        task: tokio::spawn(server),
        _watcher: watcher,
    })
}

fn reload_on_change(options: &ServerOptions, reload: broadcast::Sender<()>) -> Result<FileWatcher> {
    let matcher = paths::build_globset(&options.files)?;
    let project_root = options.project_root.clone();

    // The output directory may not exist before the first build
    std::fs::create_dir_all(&options.root)?;

    watch::debounced(&options.root, options.debounce, move |changed| {
        let canonical = project_root.canonicalize().ok();
        let hit = changed.iter().any(|path| {
            paths::relative_str(&project_root, path)
                .or_else(|| canonical.as_deref().and_then(|c| paths::relative_str(c, path)))
                .map(|rel| matcher.is_match(rel))
                .unwrap_or(false)
        });
        if hit {
            let listeners = reload.send(()).unwrap_or(0);
            debug!(listeners, "reload sent");
        }
    })
}

async fn serve(root: &Path, tail: &str) -> std::result::Result<Response, Rejection> {
    let request = percent_decode(tail);
    let path = resolve(root, &request).ok_or_else(warp::reject::not_found)?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| warp::reject::not_found())?;

    let content_type = content_type(&path);
    let body = if content_type.starts_with("text/html") {
        inject_reload(&String::from_utf8_lossy(&bytes)).into_bytes()
    } else {
        bytes
    };

    debug!(path = %path.display(), "served");
    Ok(warp::reply::with_header(body, "content-type", content_type).into_response())
}

/// Map a request path to a file under `root`
///
/// `/` and directories serve their `index.html`, extensionless paths fall
/// back to `<path>.html`. Paths escaping the root never resolve.
pub fn resolve(root: &Path, request: &str) -> Option<PathBuf> {
    let candidate = paths::join_within(root, request)?;

    if candidate.is_file() {
        return Some(candidate);
    }
    if candidate.is_dir() {
        let index = candidate.join("index.html");
        return index.is_file().then_some(index);
    }
    if candidate.extension().is_none() {
        let html = candidate.with_extension("html");
        return html.is_file().then_some(html);
    }
    None
}

/// Insert the live-reload script before `</body>`, or append it
pub fn inject_reload(html: &str) -> String {
    match html.to_ascii_lowercase().rfind("</body>") {
        Some(at) => format!("{}{}{}", &html[..at], RELOAD_SCRIPT, &html[at..]),
        None => format!("{}{}", html, RELOAD_SCRIPT),
    }
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

pub fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "application/javascript; charset=utf-8",
        "json" | "map" => "application/json",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "eot" => "application/vnd.ms-fontobject",
        "txt" => "text/plain; charset=utf-8",
        "xml" => "application/xml",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn site() -> tempfile::TempDir {
        let temp = tempfile::tempdir().unwrap();
        let dist = temp.path().join("dist");
        fs::create_dir_all(dist.join("blog")).unwrap();
        fs::write(dist.join("index.html"), "<html><body><h1>home</h1></body></html>").unwrap();
        fs::write(dist.join("about.html"), "<p>about</p>").unwrap();
        fs::write(dist.join("blog/index.html"), "<body>blog</BODY>").unwrap();
        fs::write(dist.join("app.css"), "a{}").unwrap();
        fs::write(temp.path().join("secret.txt"), "nope").unwrap();
        temp
    }

    #[test]
    fn test_resolve() {
        let temp = site();
        let dist = temp.path().join("dist");

        assert_eq!(resolve(&dist, ""), Some(dist.join("index.html")));
        assert_eq!(resolve(&dist, "/"), Some(dist.join("index.html")));
        assert_eq!(resolve(&dist, "about"), Some(dist.join("about.html")));
        assert_eq!(resolve(&dist, "blog/"), Some(dist.join("blog/index.html")));
        assert_eq!(resolve(&dist, "app.css"), Some(dist.join("app.css")));
        assert_eq!(resolve(&dist, "missing.css"), None);
        assert_eq!(resolve(&dist, "../secret.txt"), None);
    }

    #[test]
    fn test_inject_reload() {
        let html = inject_reload("<html><body><p>x</p></BODY></html>");
        assert!(html.starts_with("<html><body><p>x</p><script>"));
        assert!(html.ends_with("</script></BODY></html>"));

        let fragment = inject_reload("<p>x</p>");
        assert!(fragment.starts_with("<p>x</p><script>"));
        assert!(fragment.contains(EVENTS_PATH));
    }

    #[test]
    fn test_content_type_and_decode() {
        assert_eq!(content_type(Path::new("a/b.CSS")), "text/css; charset=utf-8");
        assert_eq!(content_type(Path::new("fonts/x.woff2")), "font/woff2");
        assert_eq!(content_type(Path::new("LICENSE")), "application/octet-stream");
        assert_eq!(percent_decode("my%20page.html"), "my page.html");
        assert_eq!(percent_decode("100%"), "100%");
    }

    async fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n", path);
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_serves_pages_with_reload_script() {
        let temp = site();
        let server = start(ServerOptions {
            host: "127.0.0.1".to_string(),
            port: 0,
            root: temp.path().join("dist"),
            project_root: temp.path().to_path_buf(),
            files: vec![],
            debounce: Duration::from_millis(50),
        })
        .unwrap();
        let addr = server.addr();

        let home = get(addr, "/").await;
        assert!(home.starts_with("HTTP/1.1 200"));
        assert!(home.contains("<h1>home</h1><script>"));

        let css = get(addr, "/app.css").await;
        assert!(css.contains("text/css"));
        assert!(!css.contains("<script>"));

        let missing = get(addr, "/nope.html").await;
        assert!(missing.starts_with("HTTP/1.1 404"));

        assert!(server.is_running());
        server.shutdown().await;
    }
}
