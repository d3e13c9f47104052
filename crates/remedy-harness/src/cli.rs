//! Command-line surface
//!
//! Flags override values from `--config`, which override built-in defaults.
//! Flags without a value on the command line leave the layer below untouched.

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use remedy_core::{ConfigError, HarnessConfig, InjectionRetryPolicy, RemediationMethod};
use std::path::PathBuf;

fn parse_method(raw: &str) -> Result<RemediationMethod, ConfigError> {
    raw.parse()
}

fn parse_retry(raw: &str) -> Result<InjectionRetryPolicy, ConfigError> {
    raw.parse()
}

/// Argument definitions of the `remedy-harness` binary
#[must_use]
pub fn command() -> Command {
    Command::new("remedy-harness")
        .version(crate::VERSION)
        .about("Fault-injection and remediation benchmark for microservice environments")
        .arg(
            Arg::new("config")
                .long("config")
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("experiments")
                .long("experiments")
                .value_parser(value_parser!(usize))
                .help("Number of experiments to run [default: 100]"),
        )
        .arg(
            Arg::new("namespace")
                .long("namespace")
                .help("Kubernetes namespace of the environment [default: default]"),
        )
        .arg(
            Arg::new("wait-interval")
                .long("wait-interval")
                .value_parser(value_parser!(u64))
                .help("Seconds between injection checks [default: 10]"),
        )
        .arg(
            Arg::new("injection-timeout")
                .long("injection-timeout")
                .value_parser(value_parser!(u64))
                .help("Seconds to wait for a fault to take hold [default: 30]"),
        )
        .arg(
            Arg::new("env")
                .long("env")
                .help("Environment: train-ticket, online-boutique or simple-micro [default: train-ticket]"),
        )
        .arg(
            Arg::new("save-path")
                .long("save-path")
                .value_parser(value_parser!(PathBuf))
                .help("Directory conversation traces are written to [default: conversations]"),
        )
        .arg(
            Arg::new("manifest-path")
                .long("manifest-path")
                .value_parser(value_parser!(PathBuf))
                .help("Reference manifest used to restore workloads"),
        )
        .arg(
            Arg::new("remediate-method")
                .long("remediate-method")
                .value_parser(parse_method)
                .help("ThinkRemed (iterative) or SoloGen (single shot) [default: ThinkRemed]"),
        )
        .arg(
            Arg::new("experiment-path")
                .long("experiment-path")
                .value_parser(value_parser!(PathBuf))
                .help("Experiment file, one fault per line; random experiments when absent"),
        )
        .arg(
            Arg::new("enable-strict-restart")
                .long("enable-strict-restart")
                .action(ArgAction::SetTrue)
                .help("Redeploy the environment when a fault does not take hold or a playbook fails"),
        )
        .arg(
            Arg::new("injection-retry")
                .long("injection-retry")
                .value_parser(parse_retry)
                .help("fail or restart-once; overrides the policy implied by strict restart"),
        )
        .arg(
            Arg::new("model")
                .long("model")
                .help("Backbone model identifier"),
        )
        .arg(
            Arg::new("api-base")
                .long("api-base")
                .help("Base URL of the model endpoint"),
        )
        .arg(
            Arg::new("max-iterations")
                .long("max-iterations")
                .value_parser(value_parser!(u32))
                .help("Remediation attempts per trial for ThinkRemed [default: 2]"),
        )
        .arg(
            Arg::new("trial-timeout")
                .long("trial-timeout")
                .value_parser(value_parser!(u64))
                .help("Seconds a trial may spend remediating [default: 1800]"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .value_parser(value_parser!(u64))
                .help("Seed for random experiment selection"),
        )
        .arg(
            Arg::new("redeploy-each-trial")
                .long("redeploy-each-trial")
                .action(ArgAction::SetTrue)
                .help("Redeploy the environment before every trial"),
        )
        .arg(
            Arg::new("kubectl")
                .long("kubectl")
                .help("kubectl binary [default: kubectl]"),
        )
        .arg(
            Arg::new("kubeconfig")
                .long("kubeconfig")
                .value_parser(value_parser!(PathBuf))
                .help("kubeconfig passed to kubectl"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
}

/// Layer defaults, the config file and flags into one configuration
pub fn load_config(matches: &ArgMatches) -> Result<HarnessConfig, ConfigError> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => HarnessConfig::from_toml_file(path)?,
        None => HarnessConfig::default(),
    };

    if let Some(n) = matches.get_one::<usize>("experiments") {
        config.experiments = *n;
    }
    if let Some(ns) = matches.get_one::<String>("namespace") {
        config.namespace.clone_from(ns);
    }
    if let Some(secs) = matches.get_one::<u64>("wait-interval") {
        config.wait_interval_secs = *secs;
    }
    if let Some(secs) = matches.get_one::<u64>("injection-timeout") {
        config.injection_timeout_secs = *secs;
    }
    if let Some(env) = matches.get_one::<String>("env") {
        config.env.clone_from(env);
    }
    if let Some(path) = matches.get_one::<PathBuf>("save-path") {
        config.save_path.clone_from(path);
    }
    if let Some(path) = matches.get_one::<PathBuf>("manifest-path") {
        config.manifest_path.clone_from(path);
    }
    if let Some(method) = matches.get_one::<RemediationMethod>("remediate-method") {
        config.remediate_method = *method;
    }
    if let Some(path) = matches.get_one::<PathBuf>("experiment-path") {
        config.experiment_path = Some(path.clone());
    }
    if matches.get_flag("enable-strict-restart") {
        config.enable_strict_restart = true;
    }
    if let Some(policy) = matches.get_one::<InjectionRetryPolicy>("injection-retry") {
        config.injection_retry = Some(*policy);
    }
    if let Some(model) = matches.get_one::<String>("model") {
        config.model.clone_from(model);
    }
    if let Some(base) = matches.get_one::<String>("api-base") {
        config.api_base = Some(base.clone());
    }
    if let Some(max) = matches.get_one::<u32>("max-iterations") {
        config.max_iterations = Some(*max);
    }
    if let Some(secs) = matches.get_one::<u64>("trial-timeout") {
        config.trial_timeout_secs = *secs;
    }
    if let Some(seed) = matches.get_one::<u64>("seed") {
        config.seed = Some(*seed);
    }
    if matches.get_flag("redeploy-each-trial") {
        config.redeploy_each_trial = true;
    }
    if let Some(bin) = matches.get_one::<String>("kubectl") {
        config.kubectl.clone_from(bin);
    }
    if let Some(path) = matches.get_one::<PathBuf>("kubeconfig") {
        config.kubeconfig = Some(path.clone());
    }

    config.validate()?;
    Ok(config)
}
