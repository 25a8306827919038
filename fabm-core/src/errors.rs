use crate::model::Collection;
use crate::parameter::ParameterType;
use thiserror::Error;

/// Error type for failed operations.
///
/// Native errors are polled from the model core after each call that can raise them.
/// Everything else is detected on the host side before crossing the binding boundary.
#[derive(Error, Debug)]
pub enum FabmError {
    #[error("An error occurred while parsing {path}:\n{message}")]
    Configuration { path: String, message: String },
    #[error("{0}")]
    Native(String),
    #[error("Invalid domain shape {0:?}. Domain must have 0 or 1 dimensions.")]
    InvalidDomainShape(Vec<usize>),
    #[error("Domains of rank {0} are not supported; the highest supported rank is 1")]
    UnsupportedRank(usize),
    #[error("No model core is registered for {0}-dimensional domains")]
    NoBackend(usize),
    #[error("You must assign the cell thickness to use {0}")]
    CellThicknessNotSet(&'static str),
    #[error("The model must be started successfully before it can be evaluated")]
    NotStarted,
    #[error("Not all dependencies have been fulfilled: {}", .0.join(", "))]
    UnsetDependencies(Vec<String>),
    #[error("{name} not found in {collection}")]
    NotFound { name: String, collection: Collection },
    #[error("Index {index} is out of bounds for {collection} with {len} entries")]
    IndexOutOfBounds {
        index: usize,
        len: usize,
        collection: Collection,
    },
    #[error("Unknown parameter type code {0}")]
    UnknownParameterType(i32),
    #[error("Parameter {name} has type {expected} but a {found} value was given")]
    ParameterTypeMismatch {
        name: String,
        expected: ParameterType,
        found: ParameterType,
    },
    #[error("Text {0:?} cannot cross the binding boundary (contains a NUL byte)")]
    InvalidText(String),
    #[error("Cannot assign values of shape {found:?} to a variable of shape {expected:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    #[error("{0}")]
    Unsupported(String),
    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}

/// Convenience type for `Result<T, FabmError>`.
pub type FabmResult<T> = Result<T, FabmError>;
