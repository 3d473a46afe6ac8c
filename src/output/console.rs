//! Console output utilities.

use console::style;

/// Print an info message.
pub fn print_info(message: &str) {
    println!("{} {}", style("INFO").cyan().bold(), message);
}

/// Print a success message.
pub fn print_success(message: &str) {
    println!("{} {}", style("OK").green().bold(), message);
}

/// Print a warning message.
pub fn print_warning(message: &str) {
    println!("{} {}", style("WARN").yellow().bold(), message);
}

/// Print an error message.
pub fn print_error(message: &str) {
    eprintln!("{} {}", style("ERROR").red().bold(), message);
}

/// Print the application banner.
pub fn print_banner() {
    let banner = r#"
╔═══════════════════════════════════════════════════════╗
║     offline-sync                                      ║
║     Offline course content synchronization            ║
╚═══════════════════════════════════════════════════════╝
"#;
    println!("{}", style(banner).cyan());
}

/// Print configuration summary.
pub fn print_config_summary(download_dir: &str, connection: &str, wifi_only: bool, workers: usize) {
    println!();
    println!("{}", style("Configuration:").bold());
    println!("  Directory:  {}", download_dir);
    println!("  Connection: {}", connection);
    println!("  Wi-Fi only: {}", if wifi_only { "yes" } else { "no" });
    println!("  Workers:    {}", workers);
    println!();
}
