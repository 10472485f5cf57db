pub mod record;

pub use record::{
    normalize_identifier, AssessmentRecord, BuildingType, Category, ErrorKind, ErrorState,
    NEIGHBORHOOD_COEFFICIENTS, NOT_SPECIFIED,
};
