use bacscope_core::types::{ErrorClass, ErrorCode};
use bacscope_datalink::DataLinkError;
use bacscope_store::StoreError;
use thiserror::Error;

/// Broad family of a [`ClientError`], used by callers that only care how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The peer did not answer, aborted or rejected the request.
    Transport,
    /// The exchange failed in a way that calls for a fallback strategy.
    Protocol,
    /// A write could not be carried out.
    Write,
    /// Local setup or a device definition is wrong.
    Configuration,
    /// History store or sidecar problems.
    Persistence,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("datalink error: {0}")]
    DataLink(#[from] DataLinkError),
    #[error("encode error: {0}")]
    Encode(#[from] bacscope_core::EncodeError),
    #[error("decode error: {0}")]
    Decode(#[from] bacscope_core::DecodeError),
    #[error("no response from controller")]
    NoResponseFromController,
    #[error("segmentation not supported by peer")]
    SegmentationNotSupported,
    #[error("service not recognized by peer")]
    UnrecognizedService,
    #[error("remote reject reason {reason}")]
    RemoteReject { reason: u8 },
    #[error("remote abort reason {reason} (server={server})")]
    RemoteAbort { reason: u8, server: bool },
    #[error("remote service error for service choice {service_choice}")]
    RemoteServiceError {
        service_choice: u8,
        error_class_raw: Option<u32>,
        error_code_raw: Option<u32>,
        error_class: Option<ErrorClass>,
        error_code: Option<ErrorCode>,
    },
    #[error("unknown object")]
    UnknownObject,
    #[error("unknown property")]
    UnknownProperty,
    #[error("segment ack negative for sequence {sequence_number}")]
    SegmentNegativeAck { sequence_number: u8 },
    #[error("segmented request too large")]
    SegmentedRequestTooLarge,
    #[error("response payload exceeded {limit} bytes")]
    ResponseTooLarge { limit: usize },
    #[error("unsupported response")]
    UnsupportedResponse,
    #[error("no free invoke id for {0}")]
    TooManyRequests(String),
    #[error("cannot cast value: {0}")]
    WritePropertyCastError(String),
    #[error("write access denied")]
    WriteAccessDenied,
    #[error("buffer overflow")]
    BufferOverflow,
    #[error("initialization error: {0}")]
    InitializationError(String),
    #[error("bad device definition: {0}")]
    BadDeviceDefinition(String),
    #[error("device not connected")]
    DeviceNotConnected,
    #[error("wrong parameter: {0}")]
    WrongParameter(String),
    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DataLink(_)
            | Self::NoResponseFromController
            | Self::UnrecognizedService
            | Self::RemoteReject { .. }
            | Self::RemoteAbort { .. }
            | Self::RemoteServiceError { .. }
            | Self::TooManyRequests(_) => ErrorKind::Transport,
            Self::Encode(_)
            | Self::Decode(_)
            | Self::SegmentationNotSupported
            | Self::UnknownObject
            | Self::UnknownProperty
            | Self::SegmentNegativeAck { .. }
            | Self::SegmentedRequestTooLarge
            | Self::ResponseTooLarge { .. }
            | Self::UnsupportedResponse => ErrorKind::Protocol,
            Self::WritePropertyCastError(_) | Self::WriteAccessDenied | Self::BufferOverflow => {
                ErrorKind::Write
            }
            Self::InitializationError(_)
            | Self::BadDeviceDefinition(_)
            | Self::DeviceNotConnected
            | Self::WrongParameter(_) => ErrorKind::Configuration,
            Self::Persistence(_) => ErrorKind::Persistence,
        }
    }

    /// Whether a later retry of the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NoResponseFromController
                | Self::RemoteAbort { .. }
                | Self::DataLink(_)
                | Self::TooManyRequests(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(ClientError::NoResponseFromController.kind(), ErrorKind::Transport);
        assert_eq!(ClientError::SegmentationNotSupported.kind(), ErrorKind::Protocol);
        assert_eq!(
            ClientError::WritePropertyCastError("x".into()).kind(),
            ErrorKind::Write
        );
        assert_eq!(ClientError::DeviceNotConnected.kind(), ErrorKind::Configuration);
        assert_eq!(
            ClientError::Persistence(StoreError::RemovedPoint("p".into())).kind(),
            ErrorKind::Persistence
        );
    }

    #[test]
    fn reasons_are_short_text() {
        assert_eq!(
            ClientError::NoResponseFromController.to_string(),
            "no response from controller"
        );
        assert_eq!(ClientError::DeviceNotConnected.to_string(), "device not connected");
    }
}
