//! Compound resource ids.
//!
//! Ids are readable colon-joined paths derived only from catalog content,
//! so they are stable across restarts: dataset `1kg`, reference set
//! `rs.GRCh37`, variant set `1kg:vs.calls`, call set `1kg:vs.calls:NA12878`,
//! read group set `1kg:rgs.lowcov`, variant
//! `1kg:vs.calls:1:9998:abcd1234`. Registered names may not contain the
//! separator.

use crate::{Error, Result};

/// Names become id segments; keep them separator- and path-safe.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::BadRequest("name must not be empty".to_string()));
    }
    if name.contains([':', '/', '\\']) || name.contains(char::is_whitespace) {
        return Err(Error::BadRequest(format!(
            "name {:?} contains reserved characters",
            name
        )));
    }
    Ok(())
}

pub fn dataset_id(name: &str) -> String {
    name.to_string()
}

pub fn reference_set_id(name: &str) -> String {
    format!("rs.{}", name)
}

pub fn parse_reference_set_id(id: &str) -> Option<&str> {
    id.strip_prefix("rs.").filter(|name| !name.contains(':'))
}

pub fn reference_id(reference_set_name: &str, contig: &str) -> String {
    format!("rs.{}:{}", reference_set_name, contig)
}

pub fn parse_reference_id(id: &str) -> Option<(&str, &str)> {
    let (set, contig) = id.split_once(':')?;
    Some((set.strip_prefix("rs.")?, contig))
}

pub fn variant_set_id(dataset: &str, name: &str) -> String {
    format!("{}:vs.{}", dataset, name)
}

pub fn parse_variant_set_id(id: &str) -> Option<(&str, &str)> {
    let (dataset, rest) = id.split_once(':')?;
    let name = rest.strip_prefix("vs.")?;
    if name.contains(':') {
        return None;
    }
    Some((dataset, name))
}

pub fn call_set_id(variant_set_id: &str, sample: &str) -> String {
    format!("{}:{}", variant_set_id, sample)
}

pub fn parse_call_set_id(id: &str) -> Option<(&str, &str)> {
    let (variant_set, sample) = id.rsplit_once(':')?;
    parse_variant_set_id(variant_set)?;
    Some((variant_set, sample))
}

pub fn read_group_set_id(dataset: &str, name: &str) -> String {
    format!("{}:rgs.{}", dataset, name)
}

pub fn parse_read_group_set_id(id: &str) -> Option<(&str, &str)> {
    let (dataset, rest) = id.split_once(':')?;
    let name = rest.strip_prefix("rgs.")?;
    if name.contains(':') {
        return None;
    }
    Some((dataset, name))
}

pub fn read_group_id(read_group_set_id: &str, name: &str) -> String {
    format!("{}:{}", read_group_set_id, name)
}

/// Variant ids carry the variant set id, contig, 0-based start, and an
/// allele digest; parse from the right since the set id itself has colons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantId<'a> {
    pub variant_set_id: &'a str,
    pub reference_name: &'a str,
    pub start: u64,
    pub digest: &'a str,
}

pub fn parse_variant_id(id: &str) -> Option<VariantId<'_>> {
    let (rest, digest) = id.rsplit_once(':')?;
    let (rest, start) = rest.rsplit_once(':')?;
    let (variant_set_id, reference_name) = rest.rsplit_once(':')?;
    parse_variant_set_id(variant_set_id)?;
    Some(VariantId {
        variant_set_id,
        reference_name,
        start: start.parse().ok()?,
        digest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("1kg").is_ok());
        assert!(validate_name("GRCh37-lite").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("a:b").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("a b").is_err());
    }

    #[test]
    fn test_variant_set_round_trip() {
        let id = variant_set_id("1kg", "calls");
        assert_eq!(id, "1kg:vs.calls");
        assert_eq!(parse_variant_set_id(&id), Some(("1kg", "calls")));
        assert_eq!(parse_variant_set_id("1kg:rgs.calls"), None);
        assert_eq!(parse_variant_set_id("nonsense"), None);
    }

    #[test]
    fn test_call_set_round_trip() {
        let vs = variant_set_id("1kg", "calls");
        let id = call_set_id(&vs, "NA12878");
        assert_eq!(parse_call_set_id(&id), Some((vs.as_str(), "NA12878")));
        assert_eq!(parse_call_set_id("unknown"), None);
    }

    #[test]
    fn test_reference_ids() {
        assert_eq!(parse_reference_set_id("rs.GRCh37"), Some("GRCh37"));
        assert_eq!(parse_reference_set_id("GRCh37"), None);
        assert_eq!(parse_reference_id("rs.GRCh37:1"), Some(("GRCh37", "1")));
    }

    #[test]
    fn test_variant_id_round_trip() {
        let vs = variant_set_id("1kg", "calls");
        let id = format!("{}:1:9998:abcd1234", vs);
        let parsed = parse_variant_id(&id).unwrap();
        assert_eq!(parsed.variant_set_id, vs);
        assert_eq!(parsed.reference_name, "1");
        assert_eq!(parsed.start, 9998);
        assert_eq!(parsed.digest, "abcd1234");
        assert!(parse_variant_id("unknown").is_none());
    }
}
