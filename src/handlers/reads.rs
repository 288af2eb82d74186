//! Read group sets and read searches.

use axum::Json;
use axum::extract::{Path, State};

use super::{
    AppState, CancelOnDrop, ProtocolJson, effective_page_size, paginate_slice, run_blocking,
    verify_interval_token,
};
use crate::backends::reads as backend;
use crate::backends::{CancelFlag, Deadline};
use crate::repo::ids;
use crate::token::{Cursor, TokenKind, query_fingerprint};
use crate::{Error, Result, protocol};

pub(super) async fn search_read_group_sets(
    State(state): State<AppState>,
    ProtocolJson(request): ProtocolJson<protocol::SearchReadGroupSetsRequest>,
) -> Result<Json<protocol::SearchReadGroupSetsResponse>> {
    if request.dataset_id.is_empty() {
        return Err(Error::BadRequest("datasetId is required".to_string()));
    }
    let page_size = effective_page_size(request.page_size, &state.limits)?;
    let fingerprint = query_fingerprint(&protocol::SearchReadGroupSetsRequest {
        page_token: None,
        ..request.clone()
    });
    let version = state.repo.revision_tag();

    let matches: Vec<protocol::ReadGroupSet> = state
        .repo
        .read_group_sets(&request.dataset_id)?
        .into_iter()
        .filter(|set| request.name.as_ref().is_none_or(|n| &set.name == n))
        .collect();

    let (read_group_sets, next_page_token) = paginate_slice(
        matches,
        page_size,
        request.page_token.as_deref(),
        &state.signer,
        TokenKind::ReadGroupSets,
        &fingerprint,
        &version,
    )?;
    Ok(Json(protocol::SearchReadGroupSetsResponse {
        read_group_sets,
        next_page_token,
    }))
}

pub(super) async fn get_read_group_set(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<protocol::ReadGroupSet>> {
    let resolved = state.repo.read_group_set(&id)?;
    Ok(Json(crate::repo::read_group_set_to_protocol(
        &resolved.dataset,
        &resolved.entry,
    )))
}

pub(super) async fn search_reads(
    State(state): State<AppState>,
    ProtocolJson(request): ProtocolJson<protocol::SearchReadsRequest>,
) -> Result<Json<protocol::SearchReadsResponse>> {
    if request.read_group_set_id.is_empty() {
        return Err(Error::BadRequest("readGroupSetId is required".to_string()));
    }
    if request.reference_name.is_empty() {
        return Err(Error::BadRequest("referenceName is required".to_string()));
    }
    if request.end <= request.start {
        return Err(Error::BadRequest(format!(
            "empty interval [{}, {})",
            request.start, request.end
        )));
    }
    let page_size = effective_page_size(request.page_size, &state.limits)?;
    let resolved = state.repo.read_group_set(&request.read_group_set_id)?;

    // Requested read group ids must belong to this set.
    if let Some(requested) = &request.read_group_ids {
        let set_id = &resolved.id;
        for read_group_id in requested {
            let known = resolved
                .entry
                .read_groups
                .iter()
                .any(|rg| &ids::read_group_id(set_id, &rg.name) == read_group_id);
            if !known {
                return Err(Error::NotFound(format!("read group {}", read_group_id)));
            }
        }
    }

    let fingerprint = query_fingerprint(&protocol::SearchReadsRequest {
        page_token: None,
        ..request.clone()
    });
    let resume = verify_interval_token(
        request.page_token.as_deref(),
        &state.signer,
        TokenKind::Reads,
        &fingerprint,
        &resolved.entry.version,
    )?;

    let deadline = Deadline::after(state.limits.request_timeout);
    let cancel_guard = CancelOnDrop(CancelFlag::new());
    let cancel = cancel_guard.flag();
    let read_group_set_id = resolved.id.clone();
    let path = resolved.abs_path.clone();
    let reference_name = request.reference_name.clone();
    let read_group_ids = request.read_group_ids.clone();
    let (start, end) = (request.start, request.end);
    let page = run_blocking(move || {
        backend::search_page(
            &backend::ReadQuery {
                read_group_set_id: &read_group_set_id,
                path: &path,
                reference_name: &reference_name,
                start,
                end,
                read_group_ids: read_group_ids.as_deref(),
            },
            page_size,
            resume,
            deadline,
            &cancel,
        )
    })
    .await?;

    let next_page_token = match page.resume {
        Some(resume) => state.signer.issue(
            TokenKind::Reads,
            &fingerprint,
            &resolved.entry.version,
            Cursor::Interval {
                start: resume.start,
                skip: resume.skip,
            },
        ),
        None => String::new(),
    };
    Ok(Json(protocol::SearchReadsResponse {
        alignments: page.records,
        next_page_token,
    }))
}
