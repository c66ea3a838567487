use serde::de::DeserializeOwned;
use url::Url;

use super::{
    client::{FetchError, RequestClient, RequestOptions},
    transport::{ApiResponse, Transport},
};

pub const PAGE_HEADER: &str = "x-page";
pub const TOTAL_PAGES_HEADER: &str = "x-total-pages";

/// One page of a listing together with the counters the registry sent along.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub current_page: u32,
    pub total_pages: u32,
}

/// Every item of a paged listing, in page order.
///
/// A page that could not be fetched or decoded does not abort the listing.
/// Its number ends up in `missing_pages` and its items are simply absent, so
/// callers that care about completeness must check it.
#[derive(Debug, Clone, PartialEq)]
pub struct Listing<T> {
    pub items: Vec<T>,
    pub missing_pages: Vec<u32>,
}

impl<T> Listing<T> {
    pub fn is_complete(&self) -> bool {
        self.missing_pages.is_empty()
    }
}

/// `(current, total)` from the pagination headers.
///
/// GitLab drops `X-Total-Pages` on very large collections, in which case the
/// listing is treated as ending at the current page.
fn page_counters(response: &ApiResponse) -> (u32, u32) {
    let current = response
        .header(PAGE_HEADER)
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(1);
    let total = response
        .header(TOTAL_PAGES_HEADER)
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(current);
    (current, total)
}

impl<T: Transport> RequestClient<T> {
    /// Collects a full listing from a `page`-parameterised endpoint.
    ///
    /// The unparameterised first request only establishes the page counters.
    /// Pages are then requested one after another, never concurrently, from
    /// the reported current page through the last one.
    pub async fn fetch_all<I: DeserializeOwned>(
        &self,
        url: &Url,
        options: &RequestOptions,
    ) -> Result<Listing<I>, FetchError> {
        let first = self.get(url, options).await?.ensure_ok(url)?;
        let (first_page, total_pages) = page_counters(&first);
        log::debug!("{} has {} page(s) starting at {}", url, total_pages, first_page);

        let mut listing = Listing {
            items: Vec::new(),
            missing_pages: Vec::new(),
        };
        for page in first_page..=total_pages {
            match self.fetch_page(url, options, page).await {
                Ok(envelope) => {
                    if envelope.total_pages != total_pages {
                        log::debug!(
                            "{} now reports {} page(s) at page {}",
                            url,
                            envelope.total_pages,
                            envelope.current_page,
                        );
                    }
                    listing.items.extend(envelope.items);
                }
                Err(error) => {
                    log::warn!("Skipping page {} of {}: {}", page, url, error);
                    listing.missing_pages.push(page);
                }
            }
        }

        Ok(listing)
    }

    pub async fn fetch_page<I: DeserializeOwned>(
        &self,
        url: &Url,
        options: &RequestOptions,
        page: u32,
    ) -> Result<Page<I>, FetchError> {
        let options = options.clone().with_query("page", page);
        let response = self.get(url, &options).await?.ensure_ok(url)?;
        let (current_page, total_pages) = page_counters(&response);

        Ok(Page {
            items: response.json(url)?,
            current_page,
            total_pages,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde::Deserialize;

    use super::*;
    use crate::gitlab::{
        client::RetryPolicy,
        transport::{ApiRequest, MockTransport, TransportError},
    };

    #[derive(Debug, Deserialize, PartialEq)]
    struct Named {
        name: String,
    }

    fn url() -> Url {
        Url::parse("https://gitlab.example.com/api/v4/projects/1/registry/repositories/2/tags")
            .unwrap()
    }

    fn page(body: &str, page: u32, total: u32) -> ApiResponse {
        ApiResponse::new(200, body)
            .with_header("X-Page", page)
            .with_header("X-Total-Pages", total)
    }

    fn names(listing: &Listing<Named>) -> Vec<&str> {
        listing.items.iter().map(|item| item.name.as_str()).collect()
    }

    fn client(transport: MockTransport) -> RequestClient<MockTransport> {
        RequestClient::new(transport).with_retry_policy(RetryPolicy::fixed(Duration::ZERO))
    }

    fn serve(request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        match request.query_param("page") {
            None => Ok(page(r#"[{"name":"v1"}]"#, 1, 2)),
            Some("1") => Ok(page(r#"[{"name":"v1"}]"#, 1, 2)),
            Some("2") => Ok(page(r#"[{"name":"v2"}]"#, 2, 2)),
            Some(other) => panic!("unexpected page {}", other),
        }
    }

    #[tokio::test]
    async fn test_two_pages_in_order() {
        let mut transport = MockTransport::new();
        transport.expect_send().times(3).returning(serve);

        let listing: Listing<Named> = client(transport)
            .fetch_all(&url(), &RequestOptions::default())
            .await
            .unwrap();

        assert_eq!(names(&listing), vec!["v1", "v2"]);
        assert!(listing.is_complete());
    }

    #[tokio::test]
    async fn test_pages_are_requested_sequentially() {
        let mut seq = mockall::Sequence::new();
        let mut transport = MockTransport::new();
        for expected in [None, Some("1"), Some("2")] {
            transport
                .expect_send()
                .withf(move |request| request.query_param("page") == expected)
                .times(1)
                .in_sequence(&mut seq)
                .returning(serve);
        }

        let listing: Listing<Named> = client(transport)
            .fetch_all(&url(), &RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(listing.items.len(), 2);
    }

    #[tokio::test]
    async fn test_single_page_without_headers() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .times(2)
            .returning(|_| Ok(ApiResponse::new(200, r#"[{"name":"latest"},{"name":"v3"}]"#)));

        let listing: Listing<Named> = client(transport)
            .fetch_all(&url(), &RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(names(&listing), vec!["latest", "v3"]);
    }

    #[tokio::test]
    async fn test_first_request_status_fails_listing() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .times(1)
            .returning(|_| Ok(ApiResponse::new(404, r#"{"message":"404 Not found"}"#)));

        let error = client(transport)
            .fetch_all::<Named>(&url(), &RequestOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(error, FetchError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_first_request_exhausted_fails_listing() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .times(2)
            .returning(|request| Err(TransportError::new(request, "timed out")));

        let options = RequestOptions::default().with_max_retries(2);
        let error = client(transport)
            .fetch_all::<Named>(&url(), &options)
            .await
            .unwrap_err();
        assert!(matches!(error, FetchError::Exhausted { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_lost_page_leaves_gap() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .returning(|request| match request.query_param("page") {
                None | Some("1") => Ok(page(r#"[{"name":"a"}]"#, 1, 3)),
                Some("2") => Err(TransportError::new(request, "connection reset")),
                Some("3") => Ok(page(r#"[{"name":"c"}]"#, 3, 3)),
                Some(other) => panic!("unexpected page {}", other),
            });

        let options = RequestOptions::default().with_max_retries(1);
        let listing: Listing<Named> = client(transport)
            .fetch_all(&url(), &options)
            .await
            .unwrap();

        assert_eq!(names(&listing), vec!["a", "c"]);
        assert_eq!(listing.missing_pages, vec![2]);
        assert!(!listing.is_complete());
    }

    #[tokio::test]
    async fn test_undecodable_page_counts_as_missing() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .returning(|request| match request.query_param("page") {
                None | Some("1") => Ok(page(r#"[{"name":"a"}]"#, 1, 2)),
                _ => Ok(page("<html>502 Bad Gateway</html>", 2, 2)),
            });

        let listing: Listing<Named> = client(transport)
            .fetch_all(&url(), &RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(names(&listing), vec!["a"]);
        assert_eq!(listing.missing_pages, vec![2]);
    }

    #[tokio::test]
    async fn test_fetch_page_envelope() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|request| request.query_param("page") == Some("4"))
            .returning(|_| Ok(page(r#"[{"name":"x"},{"name":"y"}]"#, 4, 9)));

        let envelope: Page<Named> = client(transport)
            .fetch_page(&url(), &RequestOptions::default(), 4)
            .await
            .unwrap();
        assert_eq!(envelope.items.len(), 2);
        assert_eq!(envelope.current_page, 4);
        assert_eq!(envelope.total_pages, 9);
    }

    #[test]
    fn test_page_counters() {
        assert_eq!(page_counters(&page("[]", 2, 5)), (2, 5));
        assert_eq!(page_counters(&ApiResponse::new(200, "[]")), (1, 1));
        assert_eq!(
            page_counters(&ApiResponse::new(200, "[]").with_header("X-Page", 3)),
            (3, 3)
        );
        assert_eq!(
            page_counters(&ApiResponse::new(200, "[]").with_header("X-Total-Pages", "")),
            (1, 1)
        );
    }
}
