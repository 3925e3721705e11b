//! `streamrelay config`: print the default configuration.

use streamrelay_config::AppConfig;

pub fn print_default() {
    println!(
        "# {}",
        AppConfig::config_dir().join("config.toml").display()
    );
    print!("{}", AppConfig::default_toml());
}
