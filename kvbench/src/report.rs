//! Prints the effective settings and the results of a run to stdout.

use std::path::Path;
use std::time::Duration;

use yansi::Paint;

use crate::config::Config;
use crate::harness::RunReport;

/// Returns one `(flag, value)` pair per recognized flag, with the password redacted.
///
/// `config_path` is the configuration file given on the command line, if any.
pub fn settings(config: &Config, config_path: Option<&Path>) -> Vec<(&'static str, String)> {
    let password = match config.password() {
        Some(_) => "[redacted]",
        None => "",
    };
    let config_path = config_path
        .map(|path| path.display().to_string())
        .unwrap_or_default();

    vec![
        ("config", config_path),
        ("endpoint", config.endpoint.clone()),
        ("concurrency", config.concurrency.to_string()),
        ("request-count", config.request_count.to_string()),
        ("enable-watch", config.enable_watch.to_string()),
        ("enable-put", config.enable_put.to_string()),
        ("username", config.username.clone()),
        ("password", password.to_owned()),
        ("key", config.key.clone()),
        ("value", config.value.clone()),
    ]
}

/// Prints the effective settings, one line per flag.
pub fn print_settings(config: &Config, config_path: Option<&Path>) {
    for (name, value) in settings(config, config_path) {
        println!("{:<30}: {}", name.bold(), value);
    }
}

/// Prints the elapsed time and the throughput of a finished run.
pub fn print_report(report: &RunReport) {
    println!(
        "{} {:.6} s",
        "total:".bold().green(),
        report.elapsed.as_secs_f64().bold()
    );

    let puts = report.total_puts();
    if puts > 0 {
        println!(
            "  {} puts, {:.2} puts/s",
            puts.bold(),
            rate(puts, report.elapsed).bold()
        );
    }
    if report.events_observed > 0 {
        println!(
            "  {} watch events, {:.2} events/s",
            report.events_observed.bold(),
            rate(report.events_observed, report.elapsed).bold()
        );
    }
    if let Some(revision) = report.last_revision {
        println!("  last revision: {revision}");
    }
}

fn rate(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { count as f64 / secs } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretBox;

    use crate::config::ConfigSecret;

    use super::*;

    #[test]
    fn lists_every_flag() {
        let names: Vec<_> = settings(&Config::default(), None)
            .into_iter()
            .map(|(name, _)| name)
            .collect();

        assert_eq!(
            names,
            [
                "config",
                "endpoint",
                "concurrency",
                "request-count",
                "enable-watch",
                "enable-put",
                "username",
                "password",
                "key",
                "value",
            ]
        );
    }

    #[test]
    fn redacts_password() {
        let config = Config {
            username: "root".to_owned(),
            password: Some(SecretBox::new(Box::new(ConfigSecret::from("hunter2")))),
            ..Default::default()
        };

        let settings = settings(&config, None);
        assert!(settings.iter().all(|(_, value)| value != "hunter2"));
        assert!(settings.contains(&("password", "[redacted]".to_owned())));
    }

    #[test]
    fn shows_config_path() {
        let config = Config::default();

        let listed = settings(&config, Some(Path::new("/etc/kvbench.yml")));
        assert_eq!(listed[0], ("config", "/etc/kvbench.yml".to_owned()));

        let listed = settings(&config, None);
        assert_eq!(listed[0], ("config", String::new()));
    }

    #[test]
    fn empty_password_is_not_redacted() {
        let config = Config {
            password: Some(SecretBox::new(Box::new(ConfigSecret::from("")))),
            ..Default::default()
        };

        assert!(settings(&config, None).contains(&("password", String::new())));
    }

    #[test]
    fn rate_of_empty_run_is_zero() {
        assert_eq!(rate(10, Duration::ZERO), 0.0);
        assert_eq!(rate(30, Duration::from_secs(2)), 15.0);
    }
}
