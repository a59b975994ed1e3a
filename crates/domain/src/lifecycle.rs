//! Legal article transitions and the input gates that guard them.

use thiserror::Error;
use validator::ValidateEmail;

use crate::model::{ArticleStatus, WorkflowAction};

/// Minimum number of characters in a rejection reason.
pub const MIN_REJECTION_REASON_LEN: usize = 10;

/// Minimum number of characters in a submitted UTR.
pub const MIN_UTR_LEN: usize = 3;

const MAX_UTR_LEN: usize = 64;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("cannot {action} an article that is {from}")]
pub struct TransitionError {
    pub action: &'static str,
    pub from: &'static str,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{field}: {message}")]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Returns the status `action` leads to from `from`, or why it is illegal.
///
/// `Feature`/`Unfeature` and `ResendApproval` keep the status unchanged.
pub fn next_status(
    from: ArticleStatus,
    action: WorkflowAction,
) -> Result<ArticleStatus, TransitionError> {
    use ArticleStatus::*;
    use WorkflowAction::*;

    let next = match (action, from) {
        (Approve, Pending) => AwaitingPayment,
        (Reject, Pending | AwaitingPayment | PaymentSubmitted | Rejected) => Rejected,
        (ResendApproval, AwaitingPayment) => AwaitingPayment,
        (SubmitUtr, AwaitingPayment) => PaymentSubmitted,
        (VerifyAndPublish, PaymentSubmitted) => Published,
        (Feature | Unfeature, Published) => Published,
        _ => {
            return Err(TransitionError {
                action: describe(action),
                from: describe_status(from),
            })
        }
    };
    Ok(next)
}

fn describe(action: WorkflowAction) -> &'static str {
    match action {
        WorkflowAction::Submit => "submit",
        WorkflowAction::Approve => "approve",
        WorkflowAction::Reject => "reject",
        WorkflowAction::ResendApproval => "resend approval for",
        WorkflowAction::SubmitUtr => "submit payment for",
        WorkflowAction::VerifyAndPublish => "verify and publish",
        WorkflowAction::Feature => "feature",
        WorkflowAction::Unfeature => "unfeature",
    }
}

fn describe_status(status: ArticleStatus) -> &'static str {
    match status {
        ArticleStatus::Pending => "pending review",
        ArticleStatus::AwaitingPayment => "awaiting payment",
        ArticleStatus::PaymentSubmitted => "awaiting payment verification",
        ArticleStatus::Published => "published",
        ArticleStatus::Rejected => "rejected",
    }
}

/// Checks the reason length on the trimmed text but hands back the reason
/// exactly as supplied.
pub fn validate_rejection_reason(reason: &str) -> Result<String, FieldError> {
    if reason.trim().chars().count() < MIN_REJECTION_REASON_LEN {
        return Err(FieldError::new(
            "rejection_reason",
            format!("must be at least {MIN_REJECTION_REASON_LEN} characters"),
        ));
    }
    Ok(reason.to_string())
}

pub fn validate_utr(utr: &str) -> Result<String, FieldError> {
    let trimmed = utr.trim();
    let len = trimmed.chars().count();
    if len < MIN_UTR_LEN {
        return Err(FieldError::new(
            "utr_number",
            format!("must be at least {MIN_UTR_LEN} characters"),
        ));
    }
    if len > MAX_UTR_LEN {
        return Err(FieldError::new(
            "utr_number",
            format!("must be at most {MAX_UTR_LEN} characters"),
        ));
    }
    Ok(trimmed.to_string())
}

/// Basic shape checks for a submitted manuscript.
pub fn validate_submission(
    title: &str,
    abstract_text: &str,
    file_reference: &str,
) -> Result<(), FieldError> {
    if title.trim().chars().count() < 5 {
        return Err(FieldError::new("title", "must be at least 5 characters"));
    }
    if abstract_text.trim().chars().count() < 50 {
        return Err(FieldError::new("abstract", "must be at least 50 characters"));
    }
    if file_reference.trim().is_empty() {
        return Err(FieldError::new("file_reference", "is required"));
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<String, FieldError> {
    let trimmed = email.trim();
    let dotted_domain = trimmed
        .rsplit_once('@')
        .is_some_and(|(_, domain)| domain.contains('.'));
    if dotted_domain && trimmed.validate_email() {
        Ok(trimmed.to_string())
    } else {
        Err(FieldError::new("email", "must be a valid email address"))
    }
}
