use thiserror::Error;

/// Error kinds surfaced by the encoder, the decoder and the frame queues.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum JxsError {
    #[error("Invalid API version")]
    InvalidApiVersion = 1,
    #[error("Corrupt frame")]
    CorruptFrame = 2,
    #[error("Insufficient resources")]
    InsufficientResources = 3,
    #[error("Undefined error")]
    Undefined = 4,
    #[error("Invalid component")]
    InvalidComponent = 5,
    #[error("Bad parameter")]
    BadParameter = 6,

    // Encoder
    #[error("Encode frame error")]
    EncodeFrameError = 20,

    // Decoder
    #[error("Decoder received an invalid pointer")]
    DecoderInvalidPointer = 40,
    #[error("Invalid bitstream")]
    DecoderInvalidBitstream = 41,
    #[error("Decoder internal error")]
    DecoderInternal = 42,
    #[error("Bitstream too short")]
    DecoderBitstreamTooShort = 43,
    #[error("Bitstream configuration changed, decoder must be reinitialized")]
    DecoderConfigChange = 44,
    #[error("End of codestream")]
    DecoderEndOfCodestream = 45,

    // Frame queues
    #[error("Queue is empty")]
    EmptyQueue = 60,
    #[error("Queue has been shut down")]
    FifoShutdown = 61,
}

pub type Result<T> = core::result::Result<T, JxsError>;
