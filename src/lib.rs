//! Product Photo to 3D Model Worker
//!
//! This library provides the job pipeline behind the model3d-worker system:
//! product images are fetched and normalized, reconstructed into a mesh by a
//! single-view model, exported as binary glTF, published to object storage,
//! and reported back to the system of record through a status webhook.

pub mod app_state;
pub mod config;
pub mod models;
pub mod observability;
pub mod routes;
pub mod services;
