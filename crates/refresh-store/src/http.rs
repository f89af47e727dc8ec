//! Keeps the body of an HTTP resource.

use std::time::Duration;

use bytes::Bytes;
use reqwest::{Client, StatusCode, Url, header};
use thiserror::Error;

use crate::config::StoreConfig;
use crate::engine::UpdateContext;
use crate::error::StoreError;
use crate::store::Store;

/// The user agent sent with every request.
pub const USER_AGENT: &str = concat!("refresh-store/", env!("CARGO_PKG_VERSION"));

/// The timeout for establishing a connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// An error fetching an HTTP resource.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HttpError {
    /// The request did not finish before the update deadline.
    #[error("request timed out")]
    Timeout,
    /// The server responded with a non-success status.
    #[error("server responded with {0}")]
    Status(StatusCode),
    /// The request could not be sent or the body could not be read.
    ///
    /// The attached string contains the underlying error.
    #[error("request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for HttpError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout;
        }
        match err.status() {
            Some(status) => Self::Status(status),
            None => Self::Request(err.to_string()),
        }
    }
}

/// Creates the [`Client`] used by [`HttpStore::new`].
pub fn create_client() -> Result<Client, HttpError> {
    let client = reqwest::ClientBuilder::new()
        .gzip(true)
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_idle_timeout(Duration::from_secs(30))
        .build()?;
    Ok(client)
}

/// A [`Store`] holding the body of an HTTP `GET` request.
///
/// The resource is fetched once per update interval. Unlike a plain `GET`, which hands back the
/// body whatever the status, non-success responses are recorded as [`HttpError::Status`] and
/// their body is discarded. Such an error replaces the previous body until the next successful
/// fetch.
#[derive(Clone, Debug)]
pub struct HttpStore {
    url: Url,
    store: Store<Bytes, HttpError>,
}

impl HttpStore {
    /// Creates a store for `url` with a default client.
    ///
    /// # Panics
    ///
    /// Panics if the config is invalid or when called outside of a tokio runtime.
    pub fn new(url: Url, config: StoreConfig) -> Result<Self, HttpError> {
        Ok(Self::with_client(create_client()?, url, config))
    }

    /// Creates a store for `url` that sends its requests with `client`.
    ///
    /// # Panics
    ///
    /// Panics if the config is invalid or when called outside of a tokio runtime.
    pub fn with_client(client: Client, url: Url, config: StoreConfig) -> Self {
        let producer = {
            let url = url.clone();
            move |ctx: UpdateContext| fetch(client.clone(), url.clone(), ctx)
        };

        Self {
            url,
            store: Store::new(producer, config),
        }
    }

    /// The body of the last response.
    pub fn get(&self) -> Result<Bytes, StoreError<HttpError>> {
        self.store.get()
    }

    /// Waits until the resource was fetched once, see [`Store::wait`].
    pub async fn wait(&self, max_wait: Duration) -> Result<(), StoreError<HttpError>> {
        self.store.wait(max_wait).await
    }

    /// Stops fetching the resource.
    pub fn shutdown(&self) {
        self.store.shutdown()
    }

    /// The fetched URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The underlying store.
    pub fn store(&self) -> &Store<Bytes, HttpError> {
        &self.store
    }
}

async fn fetch(client: Client, url: Url, ctx: UpdateContext) -> Result<Bytes, HttpError> {
    tracing::debug!("Fetching `{}`", url);

    let request = async {
        let response = client
            .get(url.clone())
            .header(header::USER_AGENT, USER_AGENT)
            .timeout(ctx.remaining())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(%status, "Unexpected status fetching `{}`", url);
            return Err(HttpError::Status(status));
        }

        Ok::<_, HttpError>(response.bytes().await?)
    };

    ctx.run(request).await.map_err(|_| HttpError::Timeout)?
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::Router;
    use axum::extract::State;
    use axum::routing::get;

    use super::*;
    use crate::test::{self, Server};

    fn config() -> StoreConfig {
        StoreConfig {
            update_interval: Duration::from_millis(50),
            update_timeout: Duration::from_millis(50),
            ..Default::default()
        }
    }

    async fn counter(State(hits): State<Arc<AtomicUsize>>) -> String {
        let hit = hits.fetch_add(1, Ordering::SeqCst) + 1;
        format!("hit {hit}")
    }

    fn router(hits: Arc<AtomicUsize>) -> Router {
        Router::new()
            .route("/hello.txt", get(|| async { "hello world\n" }))
            .route("/counter", get(counter))
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    "too late"
                }),
            )
            .with_state(hits)
    }

    #[tokio::test]
    async fn test_fetch_body() {
        test::setup();

        let server = Server::new(router(Default::default())).await;
        let store = HttpStore::new(server.url("hello.txt"), config()).unwrap();

        assert_eq!(store.get(), Err(StoreError::Unset));
        store.wait(Duration::from_secs(5)).await.unwrap();
        assert_eq!(store.get(), Ok(Bytes::from_static(b"hello world\n")));
        assert_eq!(store.url().path(), "/hello.txt");
    }

    #[tokio::test]
    async fn test_refetches() {
        test::setup();

        let hits = Arc::new(AtomicUsize::new(0));
        let server = Server::new(router(Arc::clone(&hits))).await;
        let store = HttpStore::new(server.url("/counter"), config()).unwrap();

        store.wait(Duration::from_secs(5)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        store.shutdown();

        let hits = hits.load(Ordering::SeqCst);
        assert!(hits >= 2, "only {hits} requests were made");

        let body = store.get().unwrap();
        assert!(body.starts_with(b"hit "));
    }

    #[tokio::test]
    async fn test_not_found() {
        test::setup();

        let server = Server::new(router(Default::default())).await;
        let store = HttpStore::new(server.url("i-do-not-exist"), config()).unwrap();

        store.wait(Duration::from_secs(5)).await.unwrap();
        assert_eq!(
            store.get(),
            Err(StoreError::Producer(HttpError::Status(StatusCode::NOT_FOUND)))
        );
    }

    #[tokio::test]
    async fn test_timeout() {
        test::setup();

        let server = Server::new(router(Default::default())).await;
        let store = HttpStore::new(server.url("slow"), config()).unwrap();

        store.wait(Duration::from_secs(5)).await.unwrap();
        assert_eq!(store.get(), Err(StoreError::Producer(HttpError::Timeout)));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        test::setup();

        let url = {
            let server = Server::new(router(Default::default())).await;
            server.url("hello.txt")
        };
        // give the aborted server a moment to release its socket
        tokio::time::sleep(Duration::from_millis(20)).await;

        let store = HttpStore::new(url, config()).unwrap();
        store.wait(Duration::from_secs(5)).await.unwrap();
        assert!(matches!(
            store.get(),
            Err(StoreError::Producer(HttpError::Request(_)))
        ));
    }
}
