use clientdesk_core::config::{AppConfig, LoadOptions};
use clientdesk_core::registry::ModuleRegistry;
use clientdesk_server::bootstrap::load_registry;

use super::CommandResult;

const COMMAND: &str = "modules";

/// Lists the module table the agent would use. Falls back to the builtin
/// table when configuration does not load, so the command stays useful
/// before credentials exist.
pub fn run() -> CommandResult {
    let loaded = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => load_registry(&config),
        Err(_) => ModuleRegistry::builtin(),
    };

    match loaded {
        Ok(registry) => CommandResult::success(COMMAND, describe(&registry)),
        Err(error) => CommandResult::failure(COMMAND, "module_registry", error.to_string(), 1),
    }
}

fn describe(registry: &ModuleRegistry) -> String {
    let entries = registry
        .slugs()
        .into_iter()
        .filter_map(|slug| registry.resolve(slug))
        .map(|descriptor| format!("{} ({})", descriptor.slug, descriptor.remote_module))
        .collect::<Vec<_>>();
    format!("{} modules: {}", entries.len(), entries.join(", "))
}
