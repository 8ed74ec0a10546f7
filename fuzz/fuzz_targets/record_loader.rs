#![no_main]

use basepair_parity::record_loader::parse_document;
use basepair_parity::stage_registry::StageId;
use basepair_parity::stages::{CompareContext, compare_stage};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&selector, rest)) = data.split_first() else {
        return;
    };
    let stage = StageId::ALL[usize::from(selector) % StageId::ALL.len()];
    let Ok(raw) = std::str::from_utf8(rest) else {
        return;
    };
    let Ok(document) = parse_document(raw, stage.definition()) else {
        return;
    };

    let ctx = CompareContext::default();
    let result = compare_stage(stage, &document, &document, &ctx);
    // Comparing a document with itself may only surface malformed input.
    assert_eq!(result.counts.missing_in_modern, 0);
    assert_eq!(result.counts.extra_in_modern, 0);
    assert_eq!(result.counts.legacy_total, result.counts.modern_total);
});
