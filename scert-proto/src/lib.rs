pub mod app;
pub mod crypto;
pub mod fragment;
pub mod framing;
pub mod messages;
pub mod registry;

pub use app::*;
pub use crypto::*;
pub use fragment::*;
pub use framing::*;
pub use messages::*;
pub use registry::*;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame too large: {0} bytes (max: {1})")]
    FrameTooLarge(usize, usize),

    #[error("Truncated {what}: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        what: &'static str,
        needed: usize,
        remaining: usize,
    },

    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Fragment sequence violation: {0}")]
    FragmentSequence(String),

    #[error("Cipher error: {0}")]
    Cipher(String),

    #[error("Unexpected message: expected {expected}, got {got}")]
    UnexpectedMessage { expected: &'static str, got: String },
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
