use thiserror::Error;

use crate::domain::action::ActionKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpstreamService {
    Crm,
    Auth,
    TextGeneration,
}

impl std::fmt::Display for UpstreamService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Crm => "crm",
            Self::Auth => "crm auth",
            Self::TextGeneration => "text generation",
        })
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error("unknown entity `{slug}`")]
    UnknownModule { slug: String },
    #[error("record `{record_id}` was not found in {module}")]
    NotFound { module: String, record_id: String },
    #[error("could not resolve `{value}` for field {field}")]
    UnresolvedReference { field: String, value: String },
    #[error("invalid {module} action: {message}")]
    Validation { module: String, message: String },
    #[error("{action} on {module} requires confirmation")]
    ConfirmationRequired { module: String, action: ActionKind },
    #[error("{service} call failed: {message}")]
    Upstream { service: UpstreamService, message: String, retryable: bool },
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    pub fn validation(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation { module: module.into(), message: message.into() }
    }

    pub fn upstream(service: UpstreamService, message: impl Into<String>, retryable: bool) -> Self {
        Self::Upstream { service, message: message.into(), retryable }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Upstream { retryable: true, .. })
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("unprocessable: {message}")]
    Unprocessable { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested record could not be found.",
            Self::Unprocessable { .. } => {
                "The requested change could not be applied. Review the details and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest { message, .. }
            | Self::NotFound { message, .. }
            | Self::Unprocessable { message, .. }
            | Self::ServiceUnavailable { message, .. }
            | Self::Internal { message, .. } => message,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Unprocessable { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Unprocessable { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let message = value.to_string();
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::UnknownModule { .. }
            | ApplicationError::ConfirmationRequired { .. } => {
                Self::BadRequest { message, correlation_id }
            }
            ApplicationError::NotFound { .. } => Self::NotFound { message, correlation_id },
            ApplicationError::UnresolvedReference { .. } | ApplicationError::Validation { .. } => {
                Self::Unprocessable { message, correlation_id }
            }
            ApplicationError::Upstream { .. } => Self::ServiceUnavailable { message, correlation_id },
            ApplicationError::Configuration(_) => Self::Internal { message, correlation_id },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{ApplicationError, InterfaceError, UpstreamService};

    #[test]
    fn unknown_module_maps_to_bad_request_with_correlation_id() {
        let interface = ApplicationError::UnknownModule { slug: "widgets".to_owned() }
            .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
        assert!(interface.message().contains("widgets"));
    }

    #[test]
    fn unresolved_reference_keeps_field_and_value_in_message() {
        let interface = ApplicationError::UnresolvedReference {
            field: "Account_Name".to_owned(),
            value: "Acme Holdings".to_owned(),
        }
        .into_interface("req-2");

        assert!(matches!(interface, InterfaceError::Unprocessable { .. }));
        assert!(interface.message().contains("Account_Name"));
        assert!(interface.message().contains("Acme Holdings"));
    }

    #[test]
    fn not_found_is_distinct_from_upstream_failure() {
        let missing = ApplicationError::NotFound {
            module: "Deals".to_owned(),
            record_id: "1".to_owned(),
        }
        .into_interface("req-3");
        let upstream = ApplicationError::upstream(UpstreamService::Crm, "status 500", true)
            .into_interface("req-3");

        assert!(matches!(missing, InterfaceError::NotFound { .. }));
        assert!(matches!(upstream, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            upstream.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }

    #[test]
    fn configuration_error_maps_to_internal() {
        let interface =
            ApplicationError::Configuration("missing refresh token".to_owned()).into_interface("req-4");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }
}
