//! Projection of the internal approval status onto the native status banner
use crate::task::{ApprovalStatus, NativeStatus, TaskUpdate};

pub fn native_status(internal: ApprovalStatus) -> NativeStatus {
    match internal {
        ApprovalStatus::Approved => NativeStatus::Approved,
        ApprovalStatus::Rejected => NativeStatus::Rejected,
        ApprovalStatus::Draft
        | ApprovalStatus::PendingSubmission
        | ApprovalStatus::PendingApproval
        | ApprovalStatus::Escalated
        | ApprovalStatus::PendingExceptionReview
        | ApprovalStatus::Recalled => NativeStatus::PendingApproval,
    }
}

/// Projects a raw status code from the system of record. Unrecognised codes
/// have no projection and the native field must be left as it is.
pub fn project_code(code: u8) -> Option<NativeStatus> {
    ApprovalStatus::from_code(code).map(native_status)
}

/// Stages the internal status and its projection on the same update so both
/// land in one write.
pub fn stage(values: &mut TaskUpdate, internal: ApprovalStatus) {
    values.status = Some(internal);
    values.native_status = Some(native_status(internal));
}

/// Same as [`stage`] for a raw status code. Returns false, leaving `values`
/// untouched, when the code is unknown.
pub fn stage_code(values: &mut TaskUpdate, code: u8) -> bool {
    match ApprovalStatus::from_code(code) {
        Some(internal) => {
            stage(values, internal);
            true
        }
        None => false,
    }
}
