use thiserror::Error;

use crate::promise::RejectedPromise;

pub type Result<T> = std::result::Result<T, Error>;

/// Error codes of the adapter API. Every [`Error`] maps onto one of these at
/// the C boundary.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenCDMError {
    None = 0,
    Unknown = 1,
    Fail = 2,
    InvalidArg = 3,
    InvalidSession = 4,
    KeySystemNotSupported = 5,
    MoreDataAvailable = 6,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("key system `{0}` is not supported")]
    UnsupportedKeySystem(String),
    #[error("unknown init data type `{0}`")]
    UnknownInitDataType(String),
    #[error("widevine cdm module unavailable")]
    ModuleUnavailable,
    #[error("cdm instance creation failed: {0}")]
    InstanceCreation(String),
    #[error("cdm reported initialization failure")]
    CdmInitFailed,
    #[error("{operation} rejected by cdm: {rejection}")]
    Rejected {
        operation: &'static str,
        rejection: RejectedPromise,
    },
    #[error("cdm dropped the {operation} promise")]
    PromiseDropped { operation: &'static str },
    #[error("cdm needs more data to decrypt the sample")]
    NeedMoreData,
    #[error("no usable key for the sample")]
    NoKey,
    #[error("decrypt failed with cdm status {0}")]
    DecryptFailed(u32),
    #[error("subsample descriptor declares no entries")]
    EmptySubsamples,
    #[error("subsample descriptor truncated: expected {expected} bytes, got {actual}")]
    TruncatedSubsamples { expected: usize, actual: usize },
    #[error("subsample range at offset {offset} (+{len}) exceeds sample of {sample_len} bytes")]
    SubsampleOutOfBounds {
        offset: usize,
        len: usize,
        sample_len: usize,
    },
    #[error("owning system has been destroyed")]
    SystemGone,
}

impl Error {
    pub fn rejected(operation: &'static str, rejection: RejectedPromise) -> Self {
        Self::Rejected {
            operation,
            rejection,
        }
    }

    /// The adapter error code this error surfaces as.
    pub fn open_cdm_error(&self) -> OpenCDMError {
        match self {
            Error::UnsupportedKeySystem(_) => OpenCDMError::KeySystemNotSupported,
            Error::UnknownInitDataType(_) => OpenCDMError::InvalidArg,
            Error::ModuleUnavailable | Error::InstanceCreation(_) | Error::CdmInitFailed => {
                OpenCDMError::Fail
            },
            Error::Rejected { rejection, .. } => rejection.open_cdm_error(),
            Error::PromiseDropped { .. } => OpenCDMError::Unknown,
            Error::NeedMoreData => OpenCDMError::MoreDataAvailable,
            Error::NoKey => OpenCDMError::InvalidSession,
            Error::DecryptFailed(_) => OpenCDMError::Fail,
            Error::EmptySubsamples
            | Error::TruncatedSubsamples { .. }
            | Error::SubsampleOutOfBounds { .. } => OpenCDMError::Fail,
            Error::SystemGone => OpenCDMError::Fail,
        }
    }
}
