use crate::error::AppError;
use chrono::{NaiveDate, NaiveTime};
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use rocket::http::Status;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ValidationResponse {
    pub status: String,
    pub errors: HashMap<String, Vec<String>>,
}

impl ValidationResponse {
    pub fn new(errors: HashMap<String, Vec<String>>) -> Self {
        Self {
            status: "error".to_string(),
            errors,
        }
    }

    pub fn with_error(field: &str, message: &str) -> Self {
        let mut errors = HashMap::new();
        errors.insert(field.to_string(), vec![message.to_string()]);
        Self::new(errors)
    }

    pub fn from_field_errors(errors: &validator::ValidationErrors) -> Self {
        let mut error_map = HashMap::new();

        for (field, field_errors) in errors.field_errors() {
            let error_messages: Vec<String> = field_errors
                .iter()
                .map(|error| {
                    error
                        .message
                        .clone()
                        .unwrap_or_else(|| "Invalid value".into())
                        .to_string()
                })
                .collect();

            error_map.insert(field.to_string(), error_messages);
        }

        Self::new(error_map)
    }
}

pub trait ToValidationResponse {
    fn to_validation_response(self) -> Custom<Json<ValidationResponse>>;
}

impl ToValidationResponse for AppError {
    fn to_validation_response(self) -> Custom<Json<ValidationResponse>> {
        let status = self.status_code();

        let body = match &self {
            AppError::InvalidFields(errors) => ValidationResponse::from_field_errors(errors),
            AppError::Database(db_err) => {
                ValidationResponse::with_error("database", &format!("Database error: {}", db_err))
            }
            AppError::Authentication(msg) => ValidationResponse::with_error("authentication", msg),
            AppError::Authorization(msg) => {
                ValidationResponse::with_error("permission", &format!("Permission denied: {}", msg))
            }
            AppError::NotFound(msg) => ValidationResponse::with_error("resource", msg),
            AppError::Validation(msg) => ValidationResponse::with_error("validation", msg),
            AppError::Conflict(msg) => ValidationResponse::with_error("conflict", msg),
            AppError::ExternalService(msg) => {
                ValidationResponse::with_error("service", &format!("Service error: {}", msg))
            }
            AppError::Internal(_) => ValidationResponse::with_error("server", "Internal server error"),
        };

        Custom(status, Json(body))
    }
}

impl ToValidationResponse for Status {
    fn to_validation_response(self) -> Custom<Json<ValidationResponse>> {
        let (field, message) = match self {
            s if s == Status::Forbidden => (
                "permission",
                "You don't have permission to perform this action",
            ),
            s if s == Status::Unauthorized => ("authentication", "Authentication required"),
            s if s == Status::NotFound => ("resource", "Resource not found"),
            s if s == Status::Conflict => ("resource", "Resource already exists"),
            s if s == Status::BadRequest => ("request", "Bad request"),
            s if s == Status::UnprocessableEntity => ("validation", "Validation failed"),
            s if s == Status::InternalServerError => ("server", "Internal server error"),
            s if s == Status::ServiceUnavailable => ("service", "Service unavailable"),
            _ => ("error", "An error occurred"),
        };

        Custom(self, Json(ValidationResponse::with_error(field, message)))
    }
}

/// Runs the `validator` derive rules on a JSON body and unwraps it.
pub trait JsonValidateExt<T> {
    fn validate_custom(self) -> Result<T, AppError>;
}

impl<T: Validate> JsonValidateExt<T> for Json<T> {
    fn validate_custom(self) -> Result<T, AppError> {
        let inner = self.into_inner();
        inner.validate()?;
        Ok(inner)
    }
}

pub fn parse_date(value: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::Validation("Invalid date format. Use YYYY-MM-DD".to_string()))
}

pub fn parse_optional_date(value: Option<&str>) -> Result<Option<NaiveDate>, AppError> {
    value.map(parse_date).transpose()
}

pub fn parse_time(value: &str) -> Result<NaiveTime, AppError> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|_| AppError::Validation("Invalid time format. Use HH:MM".to_string()))
}
