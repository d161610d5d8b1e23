//! `taskloom init`: Write a default config file.

use taskloom_config::AppConfig;
use super::GlobalOpts;

pub async fn run(opts: &GlobalOpts) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = opts.config_path();

    println!("Taskloom setup");
    println!("==============\n");

    if config_path.exists() {
        println!("Config already exists at: {}", config_path.display());
        println!("Edit it manually or delete it and re-run init.");
        return Ok(());
    }

    if let Some(dir) = config_path.parent()
        && !dir.as_os_str().is_empty()
        && !dir.exists()
    {
        std::fs::create_dir_all(dir)?;
        println!("Created config directory: {}", dir.display());
    }

    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("Created {}", config_path.display());
    println!("\nNext steps:");
    println!("   1. Export a credential, e.g. OPENAI_API_KEY, or add api_key under [backends.openai]");
    println!("   2. Run: taskloom backends");
    println!("   3. Run: taskloom run --role backend \"<task>\"");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_loadable_default_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let opts = GlobalOpts {
            config: Some(path.clone()),
            events: false,
        };

        run(&opts).await.unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.default_backend, "openai");
        assert_eq!(config.roles.len(), 4);
    }

    #[tokio::test]
    async fn existing_config_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "default_backend = \"anthropic\"\n").unwrap();
        let opts = GlobalOpts {
            config: Some(path.clone()),
            events: false,
        };

        run(&opts).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "default_backend = \"anthropic\"\n");
    }
}
