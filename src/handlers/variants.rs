//! Variant sets, call sets, and variant searches.
//!
//! Interval searches run a backend page extraction per request inside
//! `spawn_blocking`; the continuation token carries the (start, skip)
//! resumption point plus the backing file's version tag.

use axum::Json;
use axum::extract::{Path, State};

use super::{
    AppState, CancelOnDrop, ProtocolJson, effective_page_size, paginate_slice, run_blocking,
    verify_interval_token,
};
use crate::backends::variants::{self as backend, CallSetSelection};
use crate::backends::{CancelFlag, Deadline};
use crate::repo::ids;
use crate::token::{Cursor, TokenKind, query_fingerprint};
use crate::{Error, Result, protocol};

pub(super) async fn search_variant_sets(
    State(state): State<AppState>,
    ProtocolJson(request): ProtocolJson<protocol::SearchVariantSetsRequest>,
) -> Result<Json<protocol::SearchVariantSetsResponse>> {
    if request.dataset_id.is_empty() {
        return Err(Error::BadRequest("datasetId is required".to_string()));
    }
    let page_size = effective_page_size(request.page_size, &state.limits)?;
    let fingerprint = query_fingerprint(&protocol::SearchVariantSetsRequest {
        page_token: None,
        ..request.clone()
    });
    let version = state.repo.revision_tag();

    let (variant_sets, next_page_token) = paginate_slice(
        state.repo.variant_sets(&request.dataset_id)?,
        page_size,
        request.page_token.as_deref(),
        &state.signer,
        TokenKind::VariantSets,
        &fingerprint,
        &version,
    )?;
    Ok(Json(protocol::SearchVariantSetsResponse {
        variant_sets,
        next_page_token,
    }))
}

pub(super) async fn get_variant_set(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<protocol::VariantSet>> {
    let resolved = state.repo.variant_set(&id)?;
    Ok(Json(crate::repo::variant_set_to_protocol(
        &resolved.dataset,
        &resolved.entry,
    )))
}

pub(super) async fn search_call_sets(
    State(state): State<AppState>,
    ProtocolJson(request): ProtocolJson<protocol::SearchCallSetsRequest>,
) -> Result<Json<protocol::SearchCallSetsResponse>> {
    if request.variant_set_id.is_empty() {
        return Err(Error::BadRequest("variantSetId is required".to_string()));
    }
    let page_size = effective_page_size(request.page_size, &state.limits)?;
    let fingerprint = query_fingerprint(&protocol::SearchCallSetsRequest {
        page_token: None,
        ..request.clone()
    });
    let version = state.repo.revision_tag();

    let matches: Vec<protocol::CallSet> = state
        .repo
        .call_sets(&request.variant_set_id)?
        .into_iter()
        .filter(|call_set| request.name.as_ref().is_none_or(|n| &call_set.name == n))
        .collect();

    let (call_sets, next_page_token) = paginate_slice(
        matches,
        page_size,
        request.page_token.as_deref(),
        &state.signer,
        TokenKind::CallSets,
        &fingerprint,
        &version,
    )?;
    Ok(Json(protocol::SearchCallSetsResponse {
        call_sets,
        next_page_token,
    }))
}

pub(super) async fn get_call_set(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<protocol::CallSet>> {
    Ok(Json(state.repo.call_set(&id)?))
}

pub(super) async fn search_variants(
    State(state): State<AppState>,
    ProtocolJson(request): ProtocolJson<protocol::SearchVariantsRequest>,
) -> Result<Json<protocol::SearchVariantsResponse>> {
    if request.variant_set_id.is_empty() {
        return Err(Error::BadRequest("variantSetId is required".to_string()));
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
    let resolved = state.repo.variant_set(&request.variant_set_id)?;
    let call_sets = resolve_call_sets(&resolved.entry.samples, &request)?;

    let fingerprint = query_fingerprint(&protocol::SearchVariantsRequest {
        page_token: None,
        ..request.clone()
    });
    let resume = verify_interval_token(
        request.page_token.as_deref(),
        &state.signer,
        TokenKind::Variants,
        &fingerprint,
        &resolved.entry.version,
    )?;

    let deadline = Deadline::after(state.limits.request_timeout);
    let cancel_guard = CancelOnDrop(CancelFlag::new());
    let cancel = cancel_guard.flag();
    let variant_set_id = resolved.id.clone();
    let path = resolved.abs_path.clone();
    let reference_name = request.reference_name.clone();
    let (start, end) = (request.start, request.end);
    let page = run_blocking(move || {
        backend::search_page(
            &backend::VariantQuery {
                variant_set_id: &variant_set_id,
                path: &path,
                reference_name: &reference_name,
                start,
                end,
                call_sets: &call_sets,
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
            TokenKind::Variants,
            &fingerprint,
            &resolved.entry.version,
            Cursor::Interval {
                start: resume.start,
                skip: resume.skip,
            },
        ),
        None => String::new(),
    };
    Ok(Json(protocol::SearchVariantsResponse {
        variants: page.records,
        next_page_token,
    }))
}

/// Map the requested call set ids onto sample columns; no filter selects
/// every sample in header order.
fn resolve_call_sets(
    samples: &[String],
    request: &protocol::SearchVariantsRequest,
) -> Result<Vec<CallSetSelection>> {
    match &request.call_set_ids {
        None => Ok(samples
            .iter()
            .enumerate()
            .map(|(index, sample)| CallSetSelection {
                call_set_id: ids::call_set_id(&request.variant_set_id, sample),
                sample_name: sample.clone(),
                sample_index: index,
            })
            .collect()),
        Some(requested) => requested
            .iter()
            .map(|call_set_id| {
                let (variant_set_id, sample) = ids::parse_call_set_id(call_set_id)
                    .ok_or_else(|| {
                        Error::BadRequest(format!("malformed callSetId {}", call_set_id))
                    })?;
                if variant_set_id != request.variant_set_id {
                    return Err(Error::BadRequest(format!(
                        "callSetId {} does not belong to variant set {}",
                        call_set_id, request.variant_set_id
                    )));
                }
                let sample_index = samples
                    .iter()
                    .position(|s| s == sample)
                    .ok_or_else(|| Error::NotFound(format!("call set {}", call_set_id)))?;
                Ok(CallSetSelection {
                    call_set_id: call_set_id.clone(),
                    sample_name: sample.to_string(),
                    sample_index,
                })
            })
            .collect(),
    }
}

pub(super) async fn get_variant(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<protocol::Variant>> {
    let parsed = ids::parse_variant_id(&id)
        .ok_or_else(|| Error::NotFound(format!("variant {}", id)))?;
    let resolved = state.repo.variant_set(parsed.variant_set_id)?;

    let call_sets: Vec<CallSetSelection> = resolved
        .entry
        .samples
        .iter()
        .enumerate()
        .map(|(index, sample)| CallSetSelection {
            call_set_id: ids::call_set_id(&resolved.id, sample),
            sample_name: sample.clone(),
            sample_index: index,
        })
        .collect();

    // Point query at the encoded start; the digest picks one record out of
    // any co-located ones.
    let deadline = Deadline::after(state.limits.request_timeout);
    let cancel_guard = CancelOnDrop(CancelFlag::new());
    let cancel = cancel_guard.flag();
    let variant_set_id = resolved.id.clone();
    let path = resolved.abs_path.clone();
    let reference_name = parsed.reference_name.to_string();
    let start = parsed.start;
    let page = run_blocking(move || {
        backend::search_page(
            &backend::VariantQuery {
                variant_set_id: &variant_set_id,
                path: &path,
                reference_name: &reference_name,
                start,
                end: start + 1,
                call_sets: &call_sets,
            },
            1000,
            None,
            deadline,
            &cancel,
        )
    })
    .await?;

    page.records
        .into_iter()
        .find(|variant| variant.id == id && variant.start == parsed.start)
        .map(Json)
        .ok_or_else(|| Error::NotFound(format!("variant {}", id)))
}
