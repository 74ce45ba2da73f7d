use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, XozError>;

#[derive(Debug, Error)]
pub enum XozError {
    #[error("bad format: {0}")]
    BadFormat(String),

    #[error(
        "extent [blk_nr={blk_nr}, blk_cnt={blk_cnt}] is out of bounds of a block array with {total_blocks} blocks"
    )]
    OutOfBounds {
        blk_nr: u32,
        blk_cnt: u16,
        total_blocks: u32,
    },

    #[error("extent [blk_nr={blk_nr}, blk_cnt={blk_cnt}] overlaps with an already allocated region")]
    Overlap { blk_nr: u32, blk_cnt: u16 },

    #[error("requested {requested} bytes but only {available} bytes are available")]
    NotEnoughRoom { requested: u64, available: u64 },

    #[error(
        "from {available} bytes available, the requested {requested} bytes returned only {got}"
    )]
    UnexpectedShorten {
        requested: u64,
        available: u64,
        got: u64,
    },

    #[error("bad descriptor (type {dsc_type}): {reason}")]
    BadDescriptor { dsc_type: u16, reason: String },

    #[error("[possible bug detected] {0}")]
    InternalBug(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
