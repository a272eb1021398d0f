use crate::registry::RefToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    InvalidArgument(String),
    InvalidReference(RefToken),
    AllocationFailure,
    InvalidHandle,
}

impl BindError {
    pub(crate) fn arg(msg: impl Into<String>) -> BindError {
        BindError::InvalidArgument(msg.into())
    }
}

impl std::fmt::Display for BindError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BindError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            BindError::InvalidReference(token) => {
                write!(f, "invalid reference token {token} (released or never issued)")
            }
            BindError::AllocationFailure => f.write_str("reference registry is full"),
            BindError::InvalidHandle => f.write_str("handle is closed or was never opened"),
        }
    }
}

impl std::error::Error for BindError {}
