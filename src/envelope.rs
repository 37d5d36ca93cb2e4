//! Uniform `{success, data | error, code}` bodies used by the mobile API.

use axum::{
    extract::{
        multipart::MultipartRejection,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::typed_header::TypedHeaderRejection;
use serde::Serialize;

use crate::error::AppError;

#[derive(Debug)]
pub struct Envelope<T: Serialize> {
    pub data: T,
    pub status: StatusCode,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            data,
            status: StatusCode::OK,
        }
    }

    pub fn created(data: T) -> Self {
        Self {
            data,
            status: StatusCode::CREATED,
        }
    }
}

#[derive(Serialize)]
struct SuccessBody<T: Serialize> {
    success: bool,
    data: T,
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        let body = SuccessBody {
            success: true,
            data: self.data,
        };
        (self.status, Json(body)).into_response()
    }
}

/// An [`AppError`] rendered as a failure envelope.
#[derive(Debug)]
pub struct MobileError(pub AppError);

#[derive(Serialize)]
struct FailureBody {
    success: bool,
    error: String,
    code: &'static str,
}

impl From<AppError> for MobileError {
    fn from(err: AppError) -> Self {
        MobileError(err)
    }
}

macro_rules! mobile_rejection {
    ($($rejection:ty),* $(,)?) => {
        $(
            impl From<$rejection> for MobileError {
                fn from(rejection: $rejection) -> Self {
                    MobileError(AppError::from(rejection))
                }
            }
        )*
    };
}

mobile_rejection!(
    JsonRejection,
    PathRejection,
    QueryRejection,
    MultipartRejection,
    TypedHeaderRejection,
);

impl IntoResponse for MobileError {
    fn into_response(self) -> Response {
        let err = self.0;
        err.log();
        let body = FailureBody {
            success: false,
            error: err.public_message(),
            code: err.code(),
        };
        (err.status(), Json(body)).into_response()
    }
}

pub type MobileResult<T> = Result<Envelope<T>, MobileError>;
