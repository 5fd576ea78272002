use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SurvError>;

#[derive(Error, Debug)]
pub enum SurvError {
    #[error("dimensions don't match: {message}")]
    InvalidDimensions { message: String },

    #[error("optimization blew up: {message}")]
    OptimizationFailed { message: String },

    #[error("model not fitted yet - call fit() first")]
    ModelNotFitted,

    #[error("bad parameter: {parameter} = {value}")]
    InvalidParameter { parameter: String, value: String },

    #[error("numerical issues: {message}")]
    NumericalError { message: String },

    #[error("survival data is broken: {message}")]
    InvalidSurvivalData { message: String },

    #[error("field `{field}` is missing in row {row}")]
    MissingField { field: String, row: usize },

    #[error("field `{field}` has unexpected value `{value}` in row {row}")]
    DataShape {
        field: String,
        value: String,
        row: usize,
    },

    #[error("dataset `{name}` is neither at `{}` nor embedded", path.display())]
    DatasetNotFound { name: String, path: PathBuf },

    #[error("rendering failed: {message}")]
    Render { message: String },

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv failure: {0}")]
    Csv(#[from] csv::Error),

    #[error("json failure: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config failure: {0}")]
    Config(#[from] toml::de::Error),

    #[error("config serialization failure: {0}")]
    ConfigWrite(#[from] toml::ser::Error),
}

impl SurvError {
    pub fn invalid_dimensions(message: impl Into<String>) -> Self {
        Self::InvalidDimensions { message: message.into() }
    }

    pub fn optimization_failed(message: impl Into<String>) -> Self {
        Self::OptimizationFailed { message: message.into() }
    }

    pub fn invalid_parameter(parameter: impl Into<String>, value: impl ToString) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            value: value.to_string(),
        }
    }

    pub fn numerical_error(message: impl Into<String>) -> Self {
        Self::NumericalError { message: message.into() }
    }

    pub fn invalid_survival_data(message: impl Into<String>) -> Self {
        Self::InvalidSurvivalData { message: message.into() }
    }

    pub fn missing_field(field: impl Into<String>, row: usize) -> Self {
        Self::MissingField { field: field.into(), row }
    }

    pub fn render(message: impl ToString) -> Self {
        Self::Render { message: message.to_string() }
    }

    pub fn data_shape(field: impl Into<String>, value: impl ToString, row: usize) -> Self {
        Self::DataShape {
            field: field.into(),
            value: value.to_string(),
            row,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_problem() {
        let err = SurvError::data_shape("differ", "7", 12);
        assert_eq!(err.to_string(), "field `differ` has unexpected value `7` in row 12");

        let err = SurvError::invalid_parameter("tolerance", -1.0);
        assert_eq!(err.to_string(), "bad parameter: tolerance = -1");
    }

    #[test]
    fn test_io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: SurvError = io.into();
        assert!(matches!(err, SurvError::Io(_)));
    }
}
