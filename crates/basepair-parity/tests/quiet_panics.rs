//! Runs in its own process: the panic hook is process-wide.

use basepair_parity::diagnostics::Diagnostic;
use basepair_parity::stage_registry::StageId;
use basepair_parity::stage_runner::{StageStatus, guarded, silence_panic_output};

#[test]
fn silenced_panics_are_still_reported_as_failures() {
    silence_panic_output();
    let record = guarded(StageId::BasePair, || panic!("matrix row out of range"));
    assert_eq!(record.status, StageStatus::Failed);
    assert_eq!(
        record.diagnostics,
        vec![Diagnostic::WorkerPanic {
            message: "matrix row out of range".to_string()
        }]
    );

    let owned = guarded(StageId::HbondList, || panic!("bond {} unreadable", 3));
    assert!(matches!(
        owned.diagnostics.as_slice(),
        [Diagnostic::WorkerPanic { message }] if message == "bond 3 unreadable"
    ));
}
