//! Upload-triggered transcode dispatcher
//!
//! Consumes object-created notifications from a queue, runs one ephemeral
//! transcoding container per uploaded object, waits for it to terminate,
//! removes the original upload and only then acknowledges the message.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
