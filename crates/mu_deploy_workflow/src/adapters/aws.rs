use std::fmt::Debug;

use aws_sdk_cloudformation::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};

use crate::error::QueryError;

const TRANSIENT_ERROR_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "TooManyRequestsException",
    "RequestLimitExceeded",
    "ServiceUnavailable",
    "InternalFailure",
];

/// Classifies an SDK failure. Every AWS service client shares the smithy
/// `SdkError` type, so this one helper serves CloudFormation, ELBv2 and SSM.
pub(crate) fn query_error<E, R>(context: &str, error: &SdkError<E, R>) -> QueryError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: Debug,
{
    let message = format!("{context}: {}", DisplayErrorContext(error));
    if is_transient(error) {
        QueryError::Transient(message)
    } else {
        QueryError::Fatal(message)
    }
}

pub(crate) fn is_transient<E, R>(error: &SdkError<E, R>) -> bool
where
    E: ProvideErrorMetadata,
{
    if matches!(
        error,
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_)
    ) {
        return true;
    }
    error
        .code()
        .map(|code| TRANSIENT_ERROR_CODES.contains(&code))
        .unwrap_or(false)
}

pub(crate) fn error_message<E, R>(error: &SdkError<E, R>) -> Option<&str>
where
    E: ProvideErrorMetadata,
{
    error.message()
}
