use anyhow::{Result, bail};
use kiln_core::Config;
use tracing::info;

/// Write a commented default config to `kiln.toml` in the current directory
pub fn cmd_config_init() -> Result<()> {
  let cwd = std::env::current_dir()?;
  let config_path = Config::project_config_path(&cwd);

  if config_path.exists() {
    bail!(
      "config file already exists: {} (delete it first to regenerate)",
      config_path.display()
    );
  }

  std::fs::write(&config_path, Config::generate_template())?;
  info!(path = %config_path.display(), "Created project config");
  println!("Created project config: {}", config_path.display());
  println!("Edit the file to customize settings.");

  Ok(())
}
