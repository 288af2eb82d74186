//! Reference set and reference metadata, plus base-string retrieval.
//!
//! Bases requests cap the total `[start, end)` span and page through it in
//! fixed chunks; the chunk offset travels in the continuation token.

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;

use super::{AppState, ProtocolJson, effective_page_size, paginate_slice, run_blocking};
use crate::backends::references as backend;
use crate::token::{Cursor, TokenKind, query_fingerprint};
use crate::{Error, Result, protocol};

pub(super) async fn search_reference_sets(
    State(state): State<AppState>,
    ProtocolJson(request): ProtocolJson<protocol::SearchReferenceSetsRequest>,
) -> Result<Json<protocol::SearchReferenceSetsResponse>> {
    let page_size = effective_page_size(request.page_size, &state.limits)?;
    let fingerprint = query_fingerprint(&protocol::SearchReferenceSetsRequest {
        page_token: None,
        ..request.clone()
    });
    let version = state.repo.revision_tag();

    let matches: Vec<protocol::ReferenceSet> = state
        .repo
        .reference_sets()
        .into_iter()
        .filter(|set| {
            request
                .md5checksum
                .as_ref()
                .is_none_or(|md5| &set.md5checksum == md5)
                && request
                    .assembly_id
                    .as_ref()
                    .is_none_or(|assembly| &set.assembly_id == assembly)
        })
        .collect();

    let (reference_sets, next_page_token) = paginate_slice(
        matches,
        page_size,
        request.page_token.as_deref(),
        &state.signer,
        TokenKind::ReferenceSets,
        &fingerprint,
        &version,
    )?;
    Ok(Json(protocol::SearchReferenceSetsResponse {
        reference_sets,
        next_page_token,
    }))
}

pub(super) async fn get_reference_set(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<protocol::ReferenceSet>> {
    Ok(Json(state.repo.reference_set(&id)?))
}

pub(super) async fn search_references(
    State(state): State<AppState>,
    ProtocolJson(request): ProtocolJson<protocol::SearchReferencesRequest>,
) -> Result<Json<protocol::SearchReferencesResponse>> {
    if request.reference_set_id.is_empty() {
        return Err(Error::BadRequest(
            "referenceSetId is required".to_string(),
        ));
    }
    let page_size = effective_page_size(request.page_size, &state.limits)?;
    let fingerprint = query_fingerprint(&protocol::SearchReferencesRequest {
        page_token: None,
        ..request.clone()
    });
    let version = state.repo.revision_tag();

    let matches: Vec<protocol::Reference> = state
        .repo
        .references(&request.reference_set_id)?
        .into_iter()
        .filter(|reference| {
            request
                .md5checksum
                .as_ref()
                .is_none_or(|md5| &reference.md5checksum == md5)
        })
        .collect();

    let (references, next_page_token) = paginate_slice(
        matches,
        page_size,
        request.page_token.as_deref(),
        &state.signer,
        TokenKind::References,
        &fingerprint,
        &version,
    )?;
    Ok(Json(protocol::SearchReferencesResponse {
        references,
        next_page_token,
    }))
}

pub(super) async fn get_reference(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<protocol::Reference>> {
    let resolved = state.repo.reference(&id)?;
    Ok(Json(protocol::Reference {
        id: resolved.id,
        name: resolved.entry.name,
        length: resolved.entry.length,
        md5checksum: resolved.entry.md5,
    }))
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(super) struct BasesQuery {
    start: Option<u64>,
    end: Option<u64>,
    page_token: Option<String>,
}

pub(super) async fn get_reference_bases(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<BasesQuery>,
) -> Result<Json<protocol::ListReferenceBasesResponse>> {
    let resolved = state.repo.reference(&id)?;
    let length = resolved.entry.length;

    let start = query.start.unwrap_or(0);
    if start > length {
        return Err(Error::BadRequest(format!(
            "start {} is past the reference length {}",
            start, length
        )));
    }
    // An end past the declared length truncates.
    let end = query.end.unwrap_or(length).min(length);
    if end < start {
        return Err(Error::BadRequest(format!(
            "end {} precedes start {}",
            end, start
        )));
    }
    let span = end - start;
    if span > state.limits.max_bases_span {
        return Err(Error::RangeTooLarge(format!(
            "span {} exceeds the maximum of {} bases",
            span, state.limits.max_bases_span
        )));
    }

    let fingerprint = query_fingerprint(&(&id, start, end));
    let offset = match query.page_token.as_deref().filter(|t| !t.is_empty()) {
        Some(token) => {
            match state
                .signer
                .verify(token, TokenKind::Bases, &fingerprint, &resolved.version)?
            {
                Cursor::Bases { offset } => offset,
                _ => {
                    return Err(Error::BadToken(
                        "token cursor does not fit this endpoint".to_string(),
                    ));
                }
            }
        }
        None => start,
    };

    let chunk_end = (offset + state.limits.bases_chunk).min(end);
    let sequence = if offset < chunk_end {
        let fasta = resolved.fasta.clone();
        let index = state
            .cache
            .fai_index(&resolved.id, &resolved.version, &fasta)?;
        let name = resolved.entry.name.clone();
        run_blocking(move || backend::fetch_bases(&fasta, &index, &name, offset, chunk_end))
            .await?
    } else {
        String::new()
    };

    let next_page_token = if chunk_end < end {
        state.signer.issue(
            TokenKind::Bases,
            &fingerprint,
            &resolved.version,
            Cursor::Bases { offset: chunk_end },
        )
    } else {
        String::new()
    };

    Ok(Json(protocol::ListReferenceBasesResponse {
        offset,
        sequence,
        next_page_token,
    }))
}
