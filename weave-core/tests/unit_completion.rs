//! Unit tests for completion document construction
//!
//! Tests interleaving of gathered ledgers, validation, and the request body.

use weave_core::mpu::{CompletionDocument, ContentTag, GatheredTags, PartAssignment, TagLedger};
use weave_core::storage::multipart;
use weave_core::{WeaveError, CONTENT_TAG_LEN};

fn tag(rank: u32, local: u64) -> ContentTag {
    let raw = format!("{:0>width$}", format!("r{}l{}", rank, local), width = CONTENT_TAG_LEN);
    ContentTag::parse(&raw, rank, local).unwrap()
}

fn ledgers(participants: u32, per_rank: u64) -> Vec<TagLedger> {
    (0..participants)
        .map(|rank| {
            let mut ledger = TagLedger::new();
            for local in 0..per_rank {
                ledger.push(tag(rank, local));
            }
            ledger
        })
        .collect()
}

#[test]
fn test_two_ranks_three_parts() {
    let gathered = GatheredTags::from_ledgers(&ledgers(2, 3)).unwrap();
    let doc = CompletionDocument::build(&gathered, &PartAssignment::new(2)).unwrap();

    assert_eq!(doc.len(), 6);
    let order: Vec<(u64, ContentTag)> = doc.parts().iter().map(|p| (p.part_number, p.tag)).collect();
    assert_eq!(
        order,
        vec![
            (0, tag(0, 0)),
            (1, tag(1, 0)),
            (2, tag(0, 1)),
            (3, tag(1, 1)),
            (4, tag(0, 2)),
            (5, tag(1, 2)),
        ]
    );
}

#[test]
fn test_one_based_numbering() {
    let gathered = GatheredTags::from_ledgers(&ledgers(3, 2)).unwrap();
    let doc = CompletionDocument::build(&gathered, &PartAssignment::with_first(3, 1)).unwrap();

    let numbers: Vec<u64> = doc.parts().iter().map(|p| p.part_number).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4, 5, 6]);
    assert!(doc.validate(1).is_ok());
    assert!(doc.validate(0).is_err());
}

#[test]
fn test_participant_count_mismatch() {
    let gathered = GatheredTags::from_ledgers(&ledgers(2, 1)).unwrap();
    let err = CompletionDocument::build(&gathered, &PartAssignment::new(3)).unwrap_err();
    assert!(matches!(err, WeaveError::GatherSizeMismatch { .. }));
}

#[test]
fn test_empty_upload() {
    let gathered = GatheredTags::from_ledgers(&ledgers(4, 0)).unwrap();
    let doc = CompletionDocument::build(&gathered, &PartAssignment::new(4)).unwrap();
    assert!(doc.is_empty());
}

#[test]
fn test_request_body_round_trips_through_parser() {
    let gathered = GatheredTags::from_ledgers(&ledgers(2, 2)).unwrap();
    let doc = CompletionDocument::build(&gathered, &PartAssignment::new(2)).unwrap();

    let parsed = multipart::parse_complete_request(&doc.to_xml()).unwrap();
    assert_eq!(parsed.len(), 4);
    assert_eq!(parsed[1], (1, tag(1, 0).as_str().to_string()));
    assert_eq!(parsed[2].0, 2);
}

#[test]
fn test_content_tag_shape() {
    let quoted = format!("\"{}\"", "f".repeat(CONTENT_TAG_LEN));
    assert!(ContentTag::parse(&quoted, 0, 0).is_ok());

    let err = ContentTag::parse("\"abc\"", 2, 7).unwrap_err();
    assert!(matches!(
        err,
        WeaveError::InvalidContentTag { rank: 2, part_number: 7, len: 3, .. }
    ));
}
