pub mod action;
pub mod module;
pub mod plan;
pub mod record;
