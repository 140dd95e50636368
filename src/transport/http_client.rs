//! [`Transport`] backed by `reqwest`.

use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::watch;
use url::Url;

use crate::transport::{RequestOptions, Transport, TransportError};

#[derive(Debug, Clone, Default)]
struct Cancellation {
    generation: u64,
    reason: String,
}

#[derive(Debug)]
pub struct ReqwestTransport {
    base: Url,
    client: reqwest::Client,
    cancel: watch::Sender<Cancellation>,
}

impl ReqwestTransport {
    /// `base_url` is the server root, e.g. "http://127.0.0.1:8080".
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        Self::with_client(base_url, reqwest::Client::new())
    }

    pub fn with_client(base_url: &str, client: reqwest::Client) -> Result<Self, TransportError> {
        let base = Url::parse(base_url).map_err(|e| TransportError::InvalidUrl(format!("{base_url}: {e}")))?;
        let (cancel, _) = watch::channel(Cancellation::default());
        Ok(Self { base, client, cancel })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn url(&self, path: &str) -> Result<Url, TransportError> {
        self.base
            .join(path)
            .map_err(|e| TransportError::InvalidUrl(format!("{path}: {e}")))
    }

    fn execute(
        &self,
        builder: Result<reqwest::RequestBuilder, TransportError>,
        options: RequestOptions,
    ) -> BoxFuture<'static, Result<String, TransportError>> {
        // A fresh receiver has already seen the current generation, so only
        // cancellations issued from here on affect this call.
        let mut cancelled = self.cancel.subscribe();

        async move {
            let mut builder = builder?;
            for (name, value) in &options.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if !options.params.is_empty() {
                builder = builder.query(&options.params);
            }
            if let Some(timeout) = options.timeout {
                builder = builder.timeout(timeout);
            }
            let timeout = options.timeout.unwrap_or(Duration::ZERO);

            let request = async move {
                let response = builder.send().await.map_err(|e| map_error(e, timeout))?;
                let status = response.status();
                let body = response.text().await.map_err(|e| map_error(e, timeout))?;
                if !status.is_success() {
                    return Err(TransportError::Status {
                        status: status.as_u16(),
                        body,
                    });
                }
                Ok(body)
            };

            let cancellation = async move {
                match cancelled.changed().await {
                    Ok(()) => cancelled.borrow().reason.clone(),
                    // Transport dropped; let the request run to completion.
                    Err(_) => std::future::pending().await,
                }
            };

            tokio::select! {
                result = request => result,
                reason = cancellation => Err(TransportError::Cancelled { reason }),
            }
        }
        .boxed()
    }
}

fn map_error(error: reqwest::Error, timeout: Duration) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(timeout)
    } else {
        TransportError::Request(error.to_string())
    }
}

impl Transport for ReqwestTransport {
    fn get(&self, path: &str, options: RequestOptions) -> BoxFuture<'static, Result<String, TransportError>> {
        let builder = self.url(path).map(|url| self.client.get(url));
        self.execute(builder, options)
    }

    fn post(
        &self,
        path: &str,
        body: String,
        options: RequestOptions,
    ) -> BoxFuture<'static, Result<String, TransportError>> {
        let builder = self.url(path).map(|url| {
            self.client
                .post(url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body)
        });
        self.execute(builder, options)
    }

    fn cancel_all(&self, reason: &str) {
        self.cancel.send_modify(|c| {
            c.generation = c.generation.wrapping_add(1);
            c.reason = reason.to_string();
        });
        tracing::debug!(reason, "Cancelled in-flight requests");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Router};
    use tokio::net::TcpListener;

    async fn serve(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn test_rejects_bad_base_url() {
        assert!(matches!(
            ReqwestTransport::new("not a url"),
            Err(TransportError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_non_2xx_is_status_error() {
        let base = serve(Router::new().route(
            "/fail",
            get(|| async { (axum::http::StatusCode::SERVICE_UNAVAILABLE, "down") }),
        ))
        .await;
        let transport = ReqwestTransport::new(&base).unwrap();

        let err = transport.get("/fail", RequestOptions::new()).await.unwrap_err();
        assert_eq!(
            err,
            TransportError::Status {
                status: 503,
                body: "down".into()
            }
        );
    }

    #[tokio::test]
    async fn test_headers_and_params_forwarded() {
        let base = serve(Router::new().route(
            "/echo",
            get(|headers: axum::http::HeaderMap, axum::extract::RawQuery(q): axum::extract::RawQuery| async move {
                let header = headers
                    .get("session-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                format!("{header}|{}", q.unwrap_or_default())
            }),
        ))
        .await;
        let transport = ReqwestTransport::new(&base).unwrap();

        let body = transport
            .get(
                "/echo",
                RequestOptions::new().header("session-id", "s1").param("a", "b"),
            )
            .await
            .unwrap();
        assert_eq!(body, "s1|a=b");
    }

    #[tokio::test]
    async fn test_cancel_all_aborts_in_flight() {
        let base = serve(Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        ))
        .await;
        let transport = ReqwestTransport::new(&base).unwrap();

        let call = tokio::spawn(transport.get("/slow", RequestOptions::new()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        transport.cancel_all("shutting down");

        let err = call.await.unwrap().unwrap_err();
        assert_eq!(
            err,
            TransportError::Cancelled {
                reason: "shutting down".into()
            }
        );

        // later calls are unaffected
        let quick = serve(Router::new().route("/ok", get(|| async { "ok" }))).await;
        let transport = ReqwestTransport::new(&quick).unwrap();
        transport.cancel_all("before");
        assert_eq!(transport.get("/ok", RequestOptions::new()).await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_timeout_maps_to_timeout() {
        let base = serve(Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        ))
        .await;
        let transport = ReqwestTransport::new(&base).unwrap();
        let err = transport
            .get("/slow", RequestOptions::new().timeout(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Timeout(Duration::from_millis(50)));
    }
}
