//! HTTP service for the CRM assistant: Zoho CRM and text-generation clients,
//! application bootstrap, and the chat routes.

pub mod bootstrap;
pub mod chat;
pub mod health;
pub mod llm;
pub mod zoho;

use axum::Router;

use crate::bootstrap::Application;

pub fn app_router(app: &Application) -> Router {
    chat::router(app.runtime.clone()).merge(health::router(app.registry.clone()))
}
