use anyhow::{bail, Context};
use remedy_agents::{
    AnsibleRunner, ClusterVerifier, EnvironmentRestarter, HttpChatBackend, IterativeStrategy,
    RemediationStrategy, ShellProbe, SingleShotStrategy,
};
use remedy_chaos::{
    ClusterApi, EnvironmentDeployer, FaultTemplates, Kubectl, RecoveryChecks, ScriptDeployer,
};
use remedy_core::{
    AuxiliaryContext, ConfigError, EnvironmentCatalog, EnvironmentHandle, ExperimentPlan,
    HarnessConfig, RemediationMethod,
};
use remedy_harness::{cli, ClusterRestarter, ExperimentScheduler, TrialOrchestrator};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn auxiliary_context(config: &HarnessConfig) -> AuxiliaryContext {
    let inventory = match tokio::fs::read_to_string(&config.inventory_path).await {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(path = %config.inventory_path.display(), error = %e, "inventory unreadable");
            String::new()
        }
    };
    AuxiliaryContext {
        runtime_description: config.runtime_description.clone(),
        inventory,
        notes: Vec::new(),
    }
}

fn build_strategy(
    config: &HarnessConfig,
    cluster: &Arc<dyn ClusterApi>,
    restarter: Arc<dyn EnvironmentRestarter>,
) -> anyhow::Result<Arc<dyn RemediationStrategy>> {
    let backend = Arc::new(
        HttpChatBackend::from_env(config.model.clone(), config.api_base.clone())
            .context("cannot configure the model backend")?,
    );
    let runner = Arc::new(
        AnsibleRunner::new(&config.workdir, &config.inventory_path)
            .with_timeout(config.playbook_timeout()),
    );
    let verifier = Arc::new(
        ClusterVerifier::new(RecoveryChecks::new(Arc::clone(cluster)))
            .with_settle_delay(config.settle_delay())
            .with_window(config.verify_window(), config.wait_interval()),
    );

    let strategy: Arc<dyn RemediationStrategy> = match config.remediate_method {
        RemediationMethod::SoloGen => Arc::new(SingleShotStrategy::new(backend, runner, verifier)),
        RemediationMethod::ThinkRemed => Arc::new(
            IterativeStrategy::new(
                backend,
                Arc::new(ShellProbe::new(config.probe_timeout())),
                runner,
                verifier,
            )
            .with_restarter(restarter)
            .with_max_probe_rounds(config.max_probe_rounds),
        ),
    };
    Ok(strategy)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli::command().get_matches();
    init_tracing(matches.get_flag("log-json"));

    let config = cli::load_config(&matches).context("invalid configuration")?;
    let catalog = EnvironmentCatalog::for_env(&config.env)
        .ok_or_else(|| ConfigError::UnknownEnvironment(config.env.clone()))?;
    let plan =
        ExperimentPlan::from_config(&config, &catalog).context("cannot build experiment plan")?;
    tracing::info!(
        env = %config.env,
        method = %config.remediate_method,
        experiments = plan.len(),
        "starting run"
    );

    let cluster: Arc<dyn ClusterApi> = Arc::new(
        Kubectl::new(config.kubectl.clone()).with_kubeconfig(config.kubeconfig.clone()),
    );
    let deployer: Arc<dyn EnvironmentDeployer> = Arc::new(ScriptDeployer::new(&config.envs_root));
    let env = EnvironmentHandle::new(config.env.clone(), config.namespace.clone());
    let restarter: Arc<dyn EnvironmentRestarter> = Arc::new(ClusterRestarter::new(
        deployer,
        Arc::clone(&cluster),
        env.clone(),
        config.health,
    ));

    let strategy = build_strategy(&config, &cluster, Arc::clone(&restarter))?;
    let templates = match &config.template_dir {
        Some(dir) => FaultTemplates::from_dir(dir).context("cannot load fault templates")?,
        None => FaultTemplates::builtin(),
    };
    let context = auxiliary_context(&config).await;
    let orchestrator = TrialOrchestrator::new(config.clone(), env, cluster, restarter, strategy)
        .with_templates(templates)
        .with_context(context);

    let report = ExperimentScheduler::new(orchestrator).run(&plan).await?;
    println!("{}", report.summary.generate_text());

    let summary_path = config.save_path.join("summary.json");
    tokio::fs::create_dir_all(&config.save_path).await?;
    tokio::fs::write(&summary_path, serde_json::to_vec_pretty(&report.summary)?)
        .await
        .with_context(|| format!("cannot write {}", summary_path.display()))?;

    if let Some(reason) = report.halted {
        bail!(
            "run halted after {} of {} experiments: {reason}",
            report.results.len(),
            report.planned
        );
    }
    Ok(())
}
