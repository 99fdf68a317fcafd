use thiserror::Error;

/// Errors that can occur while encoding or decoding wire data
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerdeError {
    /// A read would overrun the remaining buffer. This is the most common
    /// remote-triggerable failure and must always be reported, never UB.
    #[error("read of {needed} bytes overruns buffer ({remaining} bytes remaining)")]
    UnexpectedEnd { needed: usize, remaining: usize },

    /// A string is too long for its length prefix
    #[error("string of {length} units exceeds the {max} unit limit of its length prefix")]
    StringTooLong { length: usize, max: usize },

    /// A short/long string payload was not valid UTF-8
    #[error("string payload is not valid UTF-8")]
    InvalidUtf8,

    /// A wide string contained an unpaired surrogate
    #[error("wide string contains an unpaired surrogate code unit")]
    InvalidUtf16,
}
