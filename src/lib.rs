pub mod auth;
pub mod chat;
pub mod config;
pub mod consultations;
pub mod db;
pub mod directory;
pub mod error;
pub mod models;
pub mod notifications;
pub mod notifier;
pub mod routes;
pub mod schema;
pub mod state;
pub mod storage;
