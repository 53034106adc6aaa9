use clientdesk_core::config::{AppConfig, LlmProvider, LoadOptions};
use clientdesk_server::bootstrap::load_registry;
use clientdesk_server::zoho::ZohoClient;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn skipped(name: &'static str) -> Self {
        Self {
            name,
            status: CheckStatus::Skipped,
            details: "skipped because configuration did not load".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_module_registry(&config));
            checks.push(check_llm_credentials(&config));
            checks.push(check_crm_token_exchange(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.push(DoctorCheck::skipped("module_registry"));
            checks.push(DoctorCheck::skipped("llm_credentials"));
            checks.push(DoctorCheck::skipped("crm_token_exchange"));
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_module_registry(config: &AppConfig) -> DoctorCheck {
    let source = match &config.crm.modules_path {
        Some(path) => format!("`{}`", path.display()),
        None => "builtin table".to_string(),
    };

    match load_registry(config) {
        Ok(registry) if registry.is_empty() => DoctorCheck {
            name: "module_registry",
            status: CheckStatus::Fail,
            details: format!("{source} defines no modules"),
        },
        Ok(registry) => DoctorCheck {
            name: "module_registry",
            status: CheckStatus::Pass,
            details: format!("{} modules loaded from {source}", registry.len()),
        },
        Err(error) => DoctorCheck {
            name: "module_registry",
            status: CheckStatus::Fail,
            details: error.to_string(),
        },
    }
}

fn check_llm_credentials(config: &AppConfig) -> DoctorCheck {
    let provider = config.llm.provider;
    let needs_key = !matches!(provider, LlmProvider::Ollama);

    if needs_key && config.llm.api_key.is_none() {
        return DoctorCheck {
            name: "llm_credentials",
            status: CheckStatus::Fail,
            details: format!("{provider:?} requires llm.api_key"),
        };
    }

    DoctorCheck {
        name: "llm_credentials",
        status: CheckStatus::Pass,
        details: format!("{provider:?} configured with model `{}`", config.llm.model),
    }
}

fn check_crm_token_exchange(config: &AppConfig) -> DoctorCheck {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck {
                name: "crm_token_exchange",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            };
        }
    };

    let result = runtime.block_on(async {
        let client = ZohoClient::new(&config.crm)
            .map_err(|error| format!("failed to build crm client: {error}"))?;
        client
            .tokens()
            .access_token()
            .await
            .map_err(|error| format!("token exchange failed: {error}"))?;
        Ok::<(), String>(())
    });

    match result {
        Ok(()) => DoctorCheck {
            name: "crm_token_exchange",
            status: CheckStatus::Pass,
            details: format!("access token issued by `{}`", config.crm.auth_url),
        },
        Err(error) => {
            DoctorCheck { name: "crm_token_exchange", status: CheckStatus::Fail, details: error }
        }
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
