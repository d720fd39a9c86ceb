//! Command line entry point shared by the `kvbench-http` and `kvbench-grpc` binaries.

use std::path::PathBuf;

use anyhow::Result;
use argh::FromArgs;
use kvbench_client::{Authenticator, Connect, StoreClient};

use crate::config::{Config, Overrides};
use crate::{connect, harness, observability, report};

/// Drives put and watch load against a key-value store and reports the elapsed time.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'C')]
    config: Option<PathBuf>,

    /// number of concurrent writer tasks [default: 1]
    #[argh(option, short = 'c')]
    concurrency: Option<usize>,

    /// number of puts issued by each writer task [default: 800]
    #[argh(option, short = 'n')]
    request_count: Option<u64>,

    /// address of the store [default: http://localhost:2379]
    #[argh(option, short = 'e')]
    endpoint: Option<String>,

    /// watch the key and wait for all puts to be observed
    #[argh(switch, short = 'w')]
    enable_watch: bool,

    /// run the writer tasks
    #[argh(switch, short = 'p')]
    enable_put: bool,

    /// user to authenticate as
    #[argh(option, short = 'u')]
    username: Option<String>,

    /// password of the user
    #[argh(option)]
    password: Option<String>,

    /// key to put and watch [default: foo]
    #[argh(option)]
    key: Option<String>,

    /// value to put [default: bar]
    #[argh(option)]
    value: Option<String>,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            endpoint: self.endpoint.clone(),
            concurrency: self.concurrency,
            request_count: self.request_count,
            enable_watch: self.enable_watch.then_some(true),
            enable_put: self.enable_put.then_some(true),
            username: self.username.clone(),
            password: self.password.clone(),
            key: self.key.clone(),
            value: self.value.clone(),
        }
    }
}

/// Bootstrap the runtime and run a benchmark with the store client `S`.
pub fn execute<S>() -> Result<()>
where
    S: StoreClient + Authenticator + Connect,
{
    let args: Args = argh::from_env();
    let config = Config::load(args.config.as_deref(), &args.overrides())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("kvbench-rt")
        .enable_all()
        .build()?;
    let _runtime_guard = runtime.enter();

    observability::init_tracing(&config.logging);
    tracing::debug!(?config);

    report::print_settings(&config, args.config.as_deref());

    let result = runtime.block_on(async {
        let store = connect::connect::<S>(&config).await?;
        harness::run(&config, store).await
    });

    let run_report = result.inspect_err(|err| tracing::error!("benchmark failed: {err:#}"))?;
    report::print_report(&run_report);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags() {
        let args = Args::from_args(
            &["kvbench-http"],
            &[
                "-c", "3", "-n", "10", "-e", "127.0.0.1:2379", "-p", "--key", "bench",
            ],
        )
        .unwrap();

        let overrides = args.overrides();
        assert_eq!(overrides.concurrency, Some(3));
        assert_eq!(overrides.request_count, Some(10));
        assert_eq!(overrides.endpoint.as_deref(), Some("127.0.0.1:2379"));
        assert_eq!(overrides.enable_put, Some(true));
        assert_eq!(overrides.enable_watch, None);
        assert_eq!(overrides.key.as_deref(), Some("bench"));
    }

    #[test]
    fn unset_switches_keep_lower_layers() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("KVBENCH__ENABLE_WATCH", "true");

            let args = Args::from_args(&["kvbench-grpc"], &["--request-count", "0"]).unwrap();
            let config = Config::load(None, &args.overrides()).unwrap();

            assert!(config.enable_watch);
            assert!(!config.enable_put);
            assert_eq!(config.request_count, 0);

            Ok(())
        });
    }

    #[test]
    fn empty_password_flag_is_ignored() {
        figment::Jail::expect_with(|_jail| {
            let args = Args::from_args(&["kvbench-http"], &["--password", ""]).unwrap();
            let config = Config::load(None, &args.overrides()).unwrap();

            assert!(config.username.is_empty());
            assert!(config.password.is_none());

            Ok(())
        });
    }
}
