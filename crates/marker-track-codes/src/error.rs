use thiserror::Error;

/// Invalid arguments when building or rendering a code.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CodeError {
    #[error("square identifier {id} out of range (max {max})")]
    IdOutOfRange { id: u32, max: u32 },
    #[error("cell size must be > 0")]
    ZeroCellSize,
}

/// Why a quadrilateral could not be read as a marker.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("grid contrast too low (range {range}, need {min})")]
    LowContrast { range: u8, min: u8 },
    #[error("border ring has {light} light cells (max {max})")]
    BorderMismatch { light: usize, max: usize },
    #[error("no unique rotation anchor")]
    NoRotationAnchor,
    #[error("sample line too short ({len} px, need {min})")]
    LineTooShort { len: usize, min: usize },
    #[error("outer border is not dark")]
    MissingOuterBorder,
    #[error("quiet zone is not light")]
    MissingQuietZone,
    #[error("rotation could not be determined")]
    RotationAmbiguous,
    #[error("sample point outside the image")]
    SampleOutsideImage,
    #[error("degenerate quadrilateral")]
    DegenerateQuad,
}
