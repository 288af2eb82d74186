//! Dataset listing and lookup. Datasets come straight from the catalog
//! snapshot; tokens are versioned by the catalog revision.

use axum::Json;
use axum::extract::{Path, State};

use super::{AppState, ProtocolJson, effective_page_size, paginate_slice};
use crate::token::{TokenKind, query_fingerprint};
use crate::{Result, protocol};

pub(super) async fn search_datasets(
    State(state): State<AppState>,
    ProtocolJson(request): ProtocolJson<protocol::SearchDatasetsRequest>,
) -> Result<Json<protocol::SearchDatasetsResponse>> {
    let page_size = effective_page_size(request.page_size, &state.limits)?;
    let fingerprint = query_fingerprint(&protocol::SearchDatasetsRequest {
        page_token: None,
        ..request.clone()
    });
    let version = state.repo.revision_tag();

    let (datasets, next_page_token) = paginate_slice(
        state.repo.datasets(),
        page_size,
        request.page_token.as_deref(),
        &state.signer,
        TokenKind::Datasets,
        &fingerprint,
        &version,
    )?;
    Ok(Json(protocol::SearchDatasetsResponse {
        datasets,
        next_page_token,
    }))
}

pub(super) async fn get_dataset(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<protocol::Dataset>> {
    Ok(Json(state.repo.dataset(&id)?))
}
