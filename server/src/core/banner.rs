//! Startup banner

use super::config::{AppConfig, StorageBackend};
use super::constants::APP_NAME;
use super::storage::AppStorage;

/// Check if host binds to all interfaces
pub fn is_all_interfaces(host: &str) -> bool {
    host == "0.0.0.0" || host == "::"
}

/// Print the startup banner with endpoints and storage location
pub fn print_banner(config: &AppConfig, storage: &AppStorage) {
    let host = &config.server.host;
    let port = config.server.port;
    let display_host = if is_all_interfaces(host) {
        "localhost"
    } else {
        host.as_str()
    };

    const W: usize = 14;

    println!();
    println!(
        "  \x1b[1m\x1b[36m{}\x1b[0m \x1b[90mv{}\x1b[0m",
        APP_NAME,
        env!("CARGO_PKG_VERSION")
    );
    println!();
    println!(
        "  \x1b[32m➜\x1b[0m  \x1b[1m{:<W$}\x1b[0m http://{}:{}/notify",
        "Notify:", display_host, port
    );
    println!(
        "  \x1b[33m➜\x1b[0m  \x1b[1m{:<W$}\x1b[0m http://{}:{}/STH/v1/contextEntities",
        "History:", display_host, port
    );

    let resolutions: Vec<&str> = config.server.aggregation.iter().map(|r| r.as_str()).collect();
    println!(
        "  \x1b[90m➜  {:<W$} {} ({})\x1b[0m",
        "Storing:",
        config.database.should_store,
        if resolutions.is_empty() {
            "no resolutions".to_string()
        } else {
            resolutions.join(", ")
        }
    );

    match config.database.backend {
        StorageBackend::Sqlite => println!(
            "  \x1b[90m➜  {:<W$} sqlite {}\x1b[0m",
            "Database:",
            storage.database_path().display()
        ),
        StorageBackend::Memory => println!(
            "  \x1b[90m➜  {:<W$} memory (not persisted)\x1b[0m",
            "Database:"
        ),
    }

    if host == "127.0.0.1" || host == "localhost" {
        println!(
            "  \x1b[90m➜  {:<W$} use --host 0.0.0.0 to expose\x1b[0m",
            "Network:"
        );
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_all_interfaces() {
        assert!(is_all_interfaces("0.0.0.0"));
        assert!(is_all_interfaces("::"));
        assert!(!is_all_interfaces("127.0.0.1"));
    }
}
