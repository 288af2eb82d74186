//! HTTP surface: one module per resource family, shared state, and the
//! router. Handlers translate wire requests into repository lookups and
//! backend page extractions; all coordinate and pagination rules live
//! below this layer.

mod datasets;
mod reads;
mod references;
mod variants;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::backends::CancelFlag;
use crate::cache::IndexCache;
use crate::repo::Repository;
use crate::token::{Cursor, TokenKind, TokenSigner};
use crate::{Error, Result, protocol};

/// Page-size and span limits, fixed at startup.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub default_page_size: usize,
    pub max_page_size: usize,
    /// Largest `[start, end)` span a single bases request may ask for.
    pub max_bases_span: u64,
    /// Bases returned per page within an accepted span.
    pub bases_chunk: u64,
    pub request_timeout: Duration,
}

impl Default for Limits {
    fn default() -> Limits {
        Limits {
            default_page_size: 100,
            max_page_size: 1000,
            max_bases_span: 1 << 20,
            bases_chunk: 65536,
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub signer: TokenSigner,
    pub cache: IndexCache,
    pub limits: Limits,
}

impl AppState {
    pub fn new(repo: Arc<Repository>, signer: TokenSigner, limits: Limits) -> AppState {
        AppState {
            repo,
            signer,
            cache: IndexCache::new(),
            limits,
        }
    }
}

pub fn create_router(state: AppState, cors: bool) -> Router {
    let timeout = state.limits.request_timeout;
    let mut router = Router::new()
        .route("/", get(service_info))
        .route("/service-info", get(service_info))
        .route("/datasets/search", post(datasets::search_datasets))
        .route("/datasets/{id}", get(datasets::get_dataset))
        .route(
            "/referencesets/search",
            post(references::search_reference_sets),
        )
        .route("/referencesets/{id}", get(references::get_reference_set))
        .route("/references/search", post(references::search_references))
        .route("/references/{id}", get(references::get_reference))
        .route("/references/{id}/bases", get(references::get_reference_bases))
        .route("/variantsets/search", post(variants::search_variant_sets))
        .route("/variantsets/{id}", get(variants::get_variant_set))
        .route("/variants/search", post(variants::search_variants))
        .route("/variants/{id}", get(variants::get_variant))
        .route("/callsets/search", post(variants::search_call_sets))
        .route("/callsets/{id}", get(variants::get_call_set))
        .route(
            "/readgroupsets/search",
            post(reads::search_read_group_sets),
        )
        .route("/readgroupsets/{id}", get(reads::get_read_group_set))
        .route("/reads/search", post(reads::search_reads))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            timeout,
        ))
        .with_state(state);

    if cors {
        router = router.layer(CorsLayer::permissive());
    }
    router
}

async fn service_info(State(_state): State<AppState>) -> Json<protocol::ServiceInfo> {
    Json(protocol::ServiceInfo {
        id: "org.ga4gh.ga4ghr".to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        r#type: protocol::ServiceType {
            group: "org.ga4gh".to_string(),
            artifact: "genomics-api".to_string(),
            version: "0.6.0".to_string(),
        },
        description: "GA4GH Genomics API reference server".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Search-request body extractor. Malformed JSON, a body of the wrong
/// shape, and a missing content type all surface as the protocol
/// `BadRequest` body rather than axum's plain-text rejection.
pub(crate) struct ProtocolJson<T>(pub T);

impl<S, T> FromRequest<S> for ProtocolJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request(req: Request, state: &S) -> Result<Self> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection: JsonRejection| Error::BadRequest(rejection.body_text()))?;
        Ok(ProtocolJson(value))
    }
}

/// Sets its cancellation flag when dropped. Handlers hold one across the
/// page-extraction await, so a disconnected client or a fired timeout
/// stops the blocking scan at the next record boundary.
pub(crate) struct CancelOnDrop(pub(crate) CancelFlag);

impl CancelOnDrop {
    pub(crate) fn flag(&self) -> CancelFlag {
        self.0.clone()
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Resolve the page size a search request actually gets: default when
/// absent, clamped silently at the ceiling, rejected below 1.
pub(crate) fn effective_page_size(requested: Option<i32>, limits: &Limits) -> Result<usize> {
    match requested {
        None => Ok(limits.default_page_size),
        Some(size) if size < 1 => Err(Error::BadRequest(format!(
            "pageSize must be positive, got {}",
            size
        ))),
        Some(size) => Ok((size as usize).min(limits.max_page_size)),
    }
}

/// Page over an in-memory catalog listing with an offset cursor.
pub(crate) fn paginate_slice<T: Clone>(
    items: Vec<T>,
    page_size: usize,
    page_token: Option<&str>,
    signer: &TokenSigner,
    kind: TokenKind,
    fingerprint: &str,
    version: &str,
) -> Result<(Vec<T>, String)> {
    let offset = match page_token.filter(|t| !t.is_empty()) {
        Some(token) => match signer.verify(token, kind, fingerprint, version)? {
            Cursor::Offset { offset } => offset as usize,
            _ => {
                return Err(Error::BadToken(
                    "token cursor does not fit this endpoint".to_string(),
                ));
            }
        },
        None => 0,
    };

    let end = offset.saturating_add(page_size).min(items.len());
    let next_page_token = if end < items.len() {
        signer.issue(kind, fingerprint, version, Cursor::Offset { offset: end as u64 })
    } else {
        String::new()
    };
    let records = items
        .into_iter()
        .skip(offset)
        .take(end.saturating_sub(offset))
        .collect();
    Ok((records, next_page_token))
}

/// Incoming interval-search token, or `None` for the first page.
pub(crate) fn verify_interval_token(
    page_token: Option<&str>,
    signer: &TokenSigner,
    kind: TokenKind,
    fingerprint: &str,
    version: &str,
) -> Result<Option<crate::backends::IntervalResume>> {
    match page_token.filter(|t| !t.is_empty()) {
        Some(token) => match signer.verify(token, kind, fingerprint, version)? {
            Cursor::Interval { start, skip } => {
                Ok(Some(crate::backends::IntervalResume { start, skip }))
            }
            _ => Err(Error::BadToken(
                "token cursor does not fit this endpoint".to_string(),
            )),
        },
        None => Ok(None),
    }
}

/// Backend page extraction is synchronous file I/O; run it off the
/// async runtime.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Internal(format!("blocking task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_page_size() {
        let limits = Limits::default();
        assert_eq!(effective_page_size(None, &limits).unwrap(), 100);
        assert_eq!(effective_page_size(Some(5), &limits).unwrap(), 5);
        assert_eq!(effective_page_size(Some(5000), &limits).unwrap(), 1000);
        assert!(effective_page_size(Some(0), &limits).is_err());
        assert!(effective_page_size(Some(-1), &limits).is_err());
    }

    #[test]
    fn test_cancel_guard_sets_flag_on_drop() {
        let guard = CancelOnDrop(CancelFlag::new());
        let flag = guard.flag();
        assert!(!flag.is_cancelled());
        drop(guard);
        assert!(flag.is_cancelled());
    }

    #[test]
    fn test_paginate_slice_walks_to_exhaustion() {
        let signer = TokenSigner::new(b"k".to_vec());
        let items: Vec<i32> = (0..5).collect();

        let (first, token) = paginate_slice(
            items.clone(),
            2,
            None,
            &signer,
            TokenKind::Datasets,
            "fp",
            "v1",
        )
        .unwrap();
        assert_eq!(first, vec![0, 1]);
        assert!(!token.is_empty());

        let (second, token) = paginate_slice(
            items.clone(),
            2,
            Some(&token),
            &signer,
            TokenKind::Datasets,
            "fp",
            "v1",
        )
        .unwrap();
        assert_eq!(second, vec![2, 3]);

        let (third, token) = paginate_slice(
            items,
            2,
            Some(&token),
            &signer,
            TokenKind::Datasets,
            "fp",
            "v1",
        )
        .unwrap();
        assert_eq!(third, vec![4]);
        assert!(token.is_empty());
    }
}
