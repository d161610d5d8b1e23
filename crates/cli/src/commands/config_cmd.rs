//! `taskloom config`: Configuration management commands.

use taskloom_config::AppConfig;
use taskloom_providers::BackendRegistry;
use super::GlobalOpts;

pub async fn validate(opts: &GlobalOpts) -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating {}", opts.config_path().display());

    match opts.load_config() {
        Ok(config) => {
            println!("   ok   Config parsed and validated");

            let warnings = warnings(&config);
            if warnings.is_empty() {
                println!("   ok   All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   warn {w}");
                }
            }

            println!();
            println!("   Backend:     {}", config.default_backend);
            println!("   Model:       {}", config.default_model.as_deref().unwrap_or("(backend default)"));
            println!("   Planner:     {}", config.planner_backend());
            println!("   Iterations:  {} per agent run", config.agent.max_iterations);
            println!("   Retries:     {} attempts, {}ms base delay", config.retry.max_attempts, config.retry.base_delay_ms);
            let mut roles: Vec<&str> = config.roles.keys().map(|s| s.as_str()).collect();
            roles.sort_unstable();
            println!("   Roles:       {}", roles.join(", "));
        }
        Err(e) => {
            println!("   error {e}");
            return Err(e);
        }
    }

    Ok(())
}

pub async fn show(opts: &GlobalOpts) -> Result<(), Box<dyn std::error::Error>> {
    let config = opts.load_config()?;
    let toml_str = toml::to_string_pretty(&redacted(config))?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path(opts: &GlobalOpts) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", opts.config_path().display());
    Ok(())
}

/// Replace every credential with a placeholder.
fn redacted(mut config: AppConfig) -> AppConfig {
    for backend in config.backends.values_mut() {
        if backend.api_key.is_some() {
            backend.api_key = Some("[REDACTED]".into());
        }
    }
    config
}

/// Problems that pass validation but will fail at run time.
fn warnings(config: &AppConfig) -> Vec<String> {
    let registry = BackendRegistry::from_config(config);
    let mut warnings = Vec::new();

    for name in config.referenced_backends() {
        match registry.entry(&name) {
            None => warnings.push(format!("Backend '{name}' has no known endpoint; set backends.{name}.api_url")),
            Some(entry) if !entry.has_credential => warnings.push(format!(
                "Backend '{name}' has no credential; set {} or backends.{name}.api_key",
                taskloom_config::api_key_env_var(&name)
            )),
            Some(_) => {}
        }
    }

    let mut roles: Vec<_> = config.roles.iter().collect();
    roles.sort_by(|a, b| a.0.cmp(b.0));
    for (name, role) in roles {
        if role.persona.trim().is_empty() {
            warnings.push(format!("Role '{name}' has no persona"));
        }
    }

    warnings
}
