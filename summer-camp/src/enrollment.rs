//! Enrollment lifecycle: pending enrollment, then finalization once the charge is
//! confirmed by the gateway.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{Number, Value};
use thiserror::Error;
use tracing::info;

use crate::records::{
    str_field, without_id, Collection, Document, FinalizeOutcome, UpdateOutcome, CLASS_ID_FIELD,
    DATE_FIELD, EMAIL_FIELD,
};
use crate::store::{DocumentStore, Filter, FinalizeError, Finalization, StoreError, Update};

/// Body of `POST /payment`. Unknown fields are kept on the payment record.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSubmission {
    pub email: String,
    pub class_id: String,
    pub price: f64,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(flatten)]
    pub extra: Document,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmissionError {
    #[error("email is required")]
    MissingEmail,
    #[error("classId is required")]
    MissingClass,
    #[error("price must be a non-negative number")]
    InvalidPrice,
}

#[derive(Debug, Error)]
pub enum EnrollmentError {
    #[error(transparent)]
    Invalid(#[from] SubmissionError),
    #[error("already enrolled")]
    AlreadyEnrolled,
    #[error(transparent)]
    Finalize(#[from] FinalizeError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PaymentSubmission {
    pub fn validate(&self) -> Result<(), SubmissionError> {
        if self.email.trim().is_empty() {
            return Err(SubmissionError::MissingEmail);
        }
        if self.class_id.trim().is_empty() {
            return Err(SubmissionError::MissingClass);
        }
        if !self.price.is_finite() || self.price < 0.0 {
            return Err(SubmissionError::InvalidPrice);
        }
        Ok(())
    }

    /// Builds the payment record and the finalization request, stamping `date`.
    pub fn into_finalization(self, paid_at: DateTime<Utc>) -> Result<Finalization, SubmissionError> {
        self.validate()?;
        let price = Number::from_f64(self.price).ok_or(SubmissionError::InvalidPrice)?;

        let mut payment = without_id(self.extra);
        payment.insert(String::from(EMAIL_FIELD), Value::from(self.email.as_str()));
        payment.insert(String::from(CLASS_ID_FIELD), Value::from(self.class_id.as_str()));
        payment.insert(String::from("price"), Value::Number(price));
        if let Some(transaction_id) = self.transaction_id {
            payment.insert(String::from("transactionId"), Value::String(transaction_id));
        }
        payment.insert(
            String::from(DATE_FIELD),
            Value::String(paid_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );

        Ok(Finalization {
            email: self.email,
            class_id: self.class_id,
            payment,
        })
    }
}

/// Records a pending enrollment unless the user already has one for the class or
/// has already paid for it.
pub async fn enroll(
    store: &dyn DocumentStore,
    enrollment: Document,
) -> Result<UpdateOutcome, EnrollmentError> {
    let email = str_field(&enrollment, EMAIL_FIELD)
        .filter(|email| !email.trim().is_empty())
        .ok_or(SubmissionError::MissingEmail)?
        .to_string();
    let class_id = str_field(&enrollment, CLASS_ID_FIELD)
        .filter(|class_id| !class_id.trim().is_empty())
        .ok_or(SubmissionError::MissingClass)?
        .to_string();

    let key = Filter::eq(EMAIL_FIELD, email.as_str()).and(CLASS_ID_FIELD, class_id.as_str());
    if store
        .find_one(Collection::Enrollments, key.clone())
        .await?
        .is_some()
    {
        return Err(EnrollmentError::AlreadyEnrolled);
    }
    if store
        .find_one(Collection::Payments, key.clone())
        .await?
        .is_some()
    {
        return Err(EnrollmentError::AlreadyEnrolled);
    }

    let outcome = store
        .update_one(Collection::Enrollments, key, Update::set(enrollment), true)
        .await?;
    info!(email = %email, class_id = %class_id, "pending enrollment recorded");
    Ok(outcome)
}

/// Turns a confirmed payment into an enrollment: payment recorded, one seat moved
/// from available to enrolled, pending enrollment removed. All or nothing.
pub async fn finalize(
    store: &dyn DocumentStore,
    submission: PaymentSubmission,
) -> Result<FinalizeOutcome, EnrollmentError> {
    let finalization = submission.into_finalization(Utc::now())?;
    let email = finalization.email.clone();
    let class_id = finalization.class_id.clone();

    let outcome = store.finalize_enrollment(finalization).await?;
    info!(
        email = %email,
        class_id = %class_id,
        payment_id = %outcome.insert_result.inserted_id,
        "enrollment finalized"
    );
    Ok(outcome)
}
