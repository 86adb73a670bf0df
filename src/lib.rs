pub mod api;
pub mod auth;
pub mod config;
pub mod controller;
pub mod domain;
pub mod hardware;
pub mod registration;
pub mod registry;
pub mod telemetry;
