use clientdesk_agent::conversation::ChatRequest;
use clientdesk_core::config::{ConfigError, LoadOptions};
use clientdesk_core::errors::ApplicationError;
use clientdesk_server::bootstrap::{bootstrap, BootstrapError};

use super::CommandResult;

const COMMAND: &str = "chat";

pub fn run(module: &str, record_id: Option<&str>, confirmed: bool, query: &str) -> CommandResult {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                1,
            );
        }
    };

    let mut request = ChatRequest::new(module, record_id, query);
    request.confirmed = confirmed;

    runtime.block_on(async {
        let app = match bootstrap(LoadOptions::default()).await {
            Ok(app) => app,
            Err(BootstrapError::Config(error)) => return config_failure(error),
            Err(error) => {
                return CommandResult::failure(COMMAND, "bootstrap", error.to_string(), 1);
            }
        };

        match app.runtime.handle(&request).await {
            Ok(response) => match serde_json::to_string_pretty(&response) {
                Ok(output) => CommandResult { exit_code: 0, output },
                Err(error) => CommandResult::failure(COMMAND, "serialization", error.to_string(), 1),
            },
            Err(error) => {
                CommandResult::failure(COMMAND, error_class(&error), error.to_string(), 1)
            }
        }
    })
}

fn config_failure(error: ConfigError) -> CommandResult {
    CommandResult::failure(COMMAND, "config_validation", error.to_string(), 2)
}

fn error_class(error: &ApplicationError) -> &'static str {
    match error {
        ApplicationError::UnknownModule { .. } => "unknown_module",
        ApplicationError::NotFound { .. } => "not_found",
        ApplicationError::UnresolvedReference { .. } => "unresolved_reference",
        ApplicationError::Validation { .. } => "validation",
        ApplicationError::ConfirmationRequired { .. } => "confirmation_required",
        ApplicationError::Upstream { .. } => "upstream",
        ApplicationError::Configuration(_) => "configuration",
    }
}
