//! Request descriptors.
//!
//! This module provides:
//! - ApiRequest, the description of a single operation against the base endpoint
//! - Parameter encodings and HTTP methods
//! - Multipart form data for uploads
//! - Progress reporting for transfers

mod descriptor;
mod multipart;

pub(crate) use descriptor::flatten_parameters;
pub use descriptor::{ApiRequest, HttpMethod, ParameterEncoding, Progress, ProgressHandler};
pub use multipart::{MultipartContent, MultipartFormData, MultipartPart};
