//! GA4GH Genomics API message set.
//!
//! Plain serde records with camelCase wire names. Equality and
//! serialization are structural; nothing here holds file handles or
//! repository state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Metadata entities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    pub id: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceSet {
    pub id: String,
    pub name: String,
    pub description: String,
    /// md5 of the concatenation of member reference md5s, in declared order.
    pub md5checksum: String,
    pub assembly_id: String,
    pub ncbi_taxon_id: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    pub id: String,
    pub name: String,
    pub length: u64,
    /// md5 of the uppercase sequence bases (SAM M5 convention).
    pub md5checksum: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantSet {
    pub id: String,
    pub dataset_id: String,
    pub reference_set_id: String,
    pub name: String,
    #[serde(default)]
    pub metadata: Vec<VariantSetMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantSetMetadata {
    pub key: String,
    pub value: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSet {
    pub id: String,
    pub name: String,
    pub sample_id: String,
    pub variant_set_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadGroupSet {
    pub id: String,
    pub dataset_id: String,
    pub name: String,
    pub read_groups: Vec<ReadGroup>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadGroup {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_name: Option<String>,
    #[serde(default)]
    pub programs: Vec<Program>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Program {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_line: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

// ---------------------------------------------------------------------------
// Data records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    pub id: String,
    pub variant_set_id: String,
    #[serde(default)]
    pub names: Vec<String>,
    pub reference_name: String,
    /// 0-based inclusive start.
    pub start: u64,
    /// 0-based exclusive end.
    pub end: u64,
    pub reference_bases: String,
    pub alternate_bases: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<f32>,
    #[serde(default)]
    pub info: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub calls: Vec<Call>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Call {
    pub call_set_id: String,
    pub call_set_name: String,
    /// Allele indexes; -1 for a missing allele.
    pub genotype: Vec<i32>,
    pub phaseset: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadAlignment {
    pub id: String,
    pub read_group_id: String,
    pub fragment_name: String,
    pub proper_placement: bool,
    pub duplicate_fragment: bool,
    pub number_reads: i32,
    pub fragment_length: i32,
    pub read_number: i32,
    pub failed_vendor_quality_checks: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alignment: Option<LinearAlignment>,
    pub secondary_alignment: bool,
    pub supplementary_alignment: bool,
    pub aligned_sequence: String,
    pub aligned_quality: Vec<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_mate_position: Option<Position>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinearAlignment {
    pub position: Position,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mapping_quality: Option<i32>,
    pub cigar: Vec<CigarUnit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub reference_name: String,
    /// 0-based.
    pub position: u64,
    pub reverse_strand: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CigarUnit {
    pub operation: CigarOperation,
    pub operation_length: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CigarOperation {
    AlignmentMatch,
    Insert,
    Delete,
    Skip,
    ClipSoft,
    ClipHard,
    Pad,
    SequenceMatch,
    SequenceMismatch,
}

// ---------------------------------------------------------------------------
// Search requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchDatasetsRequest {
    pub page_size: Option<i32>,
    pub page_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchReferenceSetsRequest {
    pub md5checksum: Option<String>,
    pub assembly_id: Option<String>,
    pub page_size: Option<i32>,
    pub page_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchReferencesRequest {
    pub reference_set_id: String,
    pub md5checksum: Option<String>,
    pub page_size: Option<i32>,
    pub page_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchVariantSetsRequest {
    pub dataset_id: String,
    pub page_size: Option<i32>,
    pub page_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchVariantsRequest {
    pub variant_set_id: String,
    pub call_set_ids: Option<Vec<String>>,
    pub reference_name: String,
    pub start: u64,
    pub end: u64,
    pub page_size: Option<i32>,
    pub page_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchCallSetsRequest {
    pub variant_set_id: String,
    pub name: Option<String>,
    pub page_size: Option<i32>,
    pub page_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchReadGroupSetsRequest {
    pub dataset_id: String,
    pub name: Option<String>,
    pub page_size: Option<i32>,
    pub page_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchReadsRequest {
    pub read_group_set_id: String,
    pub read_group_ids: Option<Vec<String>>,
    pub reference_name: String,
    pub start: u64,
    pub end: u64,
    pub page_size: Option<i32>,
    pub page_token: Option<String>,
}

// ---------------------------------------------------------------------------
// Search responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchDatasetsResponse {
    pub datasets: Vec<Dataset>,
    pub next_page_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchReferenceSetsResponse {
    pub reference_sets: Vec<ReferenceSet>,
    pub next_page_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchReferencesResponse {
    pub references: Vec<Reference>,
    pub next_page_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchVariantSetsResponse {
    pub variant_sets: Vec<VariantSet>,
    pub next_page_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchVariantsResponse {
    pub variants: Vec<Variant>,
    pub next_page_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchCallSetsResponse {
    pub call_sets: Vec<CallSet>,
    pub next_page_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchReadGroupSetsResponse {
    pub read_group_sets: Vec<ReadGroupSet>,
    pub next_page_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchReadsResponse {
    pub alignments: Vec<ReadAlignment>,
    pub next_page_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListReferenceBasesResponse {
    /// Start coordinate of the returned chunk, 0-based.
    pub offset: u64,
    pub sequence: String,
    pub next_page_token: String,
}

/// Service descriptor (GA4GH service-info shape).
#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub id: String,
    pub name: String,
    pub r#type: ServiceType,
    pub description: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct ServiceType {
    pub group: String,
    pub artifact: String,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_wire_names() {
        let variant = Variant {
            id: "ds:vs.v:1:9998:abcd1234".to_string(),
            variant_set_id: "ds:vs.v".to_string(),
            names: vec![],
            reference_name: "1".to_string(),
            start: 9998,
            end: 10002,
            reference_bases: "ACGT".to_string(),
            alternate_bases: vec!["A".to_string()],
            quality: None,
            info: BTreeMap::new(),
            calls: vec![],
        };
        let json = serde_json::to_value(&variant).unwrap();
        assert_eq!(json["referenceName"], "1");
        assert_eq!(json["referenceBases"], "ACGT");
        assert_eq!(json["variantSetId"], "ds:vs.v");
        assert!(json.get("quality").is_none());
    }

    #[test]
    fn test_search_request_defaults() {
        let req: SearchVariantsRequest =
            serde_json::from_str(r#"{"variantSetId":"vs1","referenceName":"1","end":100}"#)
                .unwrap();
        assert_eq!(req.variant_set_id, "vs1");
        assert_eq!(req.start, 0);
        assert_eq!(req.end, 100);
        assert!(req.page_token.is_none());
    }

    #[test]
    fn test_cigar_operation_wire_names() {
        let unit = CigarUnit {
            operation: CigarOperation::AlignmentMatch,
            operation_length: 10,
        };
        let json = serde_json::to_value(&unit).unwrap();
        assert_eq!(json["operation"], "ALIGNMENT_MATCH");
        assert_eq!(json["operationLength"], 10);
    }
}
