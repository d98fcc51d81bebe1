//! Remote image fetching.
//!
//! [`HttpFetcher`] downloads one URL per call with a blocking client, so it
//! can run directly on the batch runner's worker threads. An optional proxy
//! endpoint receives the target as `?url=<percent-encoded url>` and answers
//! with the raw bytes.

use bulkimg_core::{FALLBACK_NAME, FetchError, Fetcher, SourceItem, url_file_name};
use reqwest::Url;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use std::time::Duration;
use tracing::debug;

/// Default timeout for one request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_MEDIA_TYPE: &str = "application/octet-stream";

/// Blocking HTTP implementation of [`Fetcher`].
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
    proxy: Option<Url>,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("Mozilla/5.0"));
        headers.insert(ACCEPT, HeaderValue::from_static("image/*,*/*"));

        let client = reqwest::blocking::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Request(e.to_string()))?;

        Ok(Self {
            client,
            proxy: None,
        })
    }

    /// Route every request through a fetch proxy.
    pub fn with_proxy(mut self, proxy: &str) -> Result<Self, FetchError> {
        self.proxy = Some(parse_http_url(proxy)?);
        Ok(self)
    }

    /// The URL actually requested for `url`.
    pub fn request_url(&self, url: &str) -> Result<Url, FetchError> {
        let target = parse_http_url(url)?;
        match &self.proxy {
            Some(proxy) => {
                let mut routed = proxy.clone();
                routed.query_pairs_mut().append_pair("url", target.as_str());
                Ok(routed)
            }
            None => Ok(target),
        }
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<SourceItem, FetchError> {
        let request_url = self.request_url(url)?;
        debug!(url, request = %request_url, "fetching");

        let response = self
            .client
            .get(request_url)
            .send()
            .map_err(|e| FetchError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let media_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| DEFAULT_MEDIA_TYPE.to_string());
        let bytes = response
            .bytes()
            .map_err(|e| FetchError::Body(e.to_string()))?;

        let name = url_file_name(url).unwrap_or_else(|| FALLBACK_NAME.to_string());
        debug!(url, %name, bytes = bytes.len(), %media_type, "fetched");
        Ok(SourceItem::new(name, bytes.to_vec(), media_type))
    }
}

fn parse_http_url(url: &str) -> Result<Url, FetchError> {
    let parsed = Url::parse(url.trim()).map_err(|_| FetchError::InvalidUrl(url.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        _ => Err(FetchError::InvalidUrl(url.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Serve a single canned HTTP response and return the request line seen.
    fn serve_once(response: &'static [u8]) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut request_line = String::new();
            reader.read_line(&mut request_line).unwrap();
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if line == "\r\n" || line.is_empty() {
                    break;
                }
            }
            stream.write_all(response).unwrap();
            request_line
        });
        (format!("http://{addr}"), handle)
    }

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_fetch_names_item_after_url() {
        let (base, server) = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nContent-Length: 4\r\nConnection: close\r\n\r\nPNG!",
        );

        let item = fetcher().fetch(&format!("{base}/photos/cat.png?size=large")).unwrap();

        assert_eq!(item.name, "cat.png");
        assert_eq!(item.media_type, "image/png");
        assert_eq!(item.bytes, b"PNG!");
        assert!(server.join().unwrap().starts_with("GET /photos/cat.png?size=large"));
    }

    #[test]
    fn test_fetch_defaults() {
        let (base, server) = serve_once(b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\nConnection: close\r\n\r\nx");
        let item = fetcher().fetch(&format!("{base}/")).unwrap();
        server.join().unwrap();

        assert_eq!(item.name, FALLBACK_NAME);
        assert_eq!(item.media_type, DEFAULT_MEDIA_TYPE);
    }

    #[test]
    fn test_fetch_non_success_status() {
        let (base, server) =
            serve_once(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
        let err = fetcher().fetch(&format!("{base}/missing.jpg")).unwrap_err();
        server.join().unwrap();
        assert!(matches!(err, FetchError::Status(404)));
    }

    #[test]
    fn test_proxy_request_url() {
        let fetcher = fetcher().with_proxy("https://tools.test/api/proxy").unwrap();
        let url = fetcher
            .request_url("https://img.test/a b.png?x=1&y=2")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://tools.test/api/proxy?url=https%3A%2F%2Fimg.test%2Fa%2520b.png%3Fx%3D1%26y%3D2"
        );
    }

    #[test]
    fn test_rejects_non_http_urls() {
        assert!(matches!(
            fetcher().fetch("file:///etc/passwd"),
            Err(FetchError::InvalidUrl(_))
        ));
        assert!(matches!(
            fetcher().fetch("not a url"),
            Err(FetchError::InvalidUrl(_))
        ));
    }
}
