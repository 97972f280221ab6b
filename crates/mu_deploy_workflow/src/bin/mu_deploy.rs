use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use mu_deploy_workflow::adapters::cloudformation::CloudFormationStacks;
use mu_deploy_workflow::adapters::elb::ElbRuleLister;
use mu_deploy_workflow::adapters::ssm::SsmParamStore;
use mu_deploy_workflow::config::DeployConfig;
use mu_deploy_workflow::runtime::service::ServiceDescriptor;
use mu_deploy_workflow::workflows::pipeline::{new_service_deployer, DeployContext};
use mu_deploy_workflow::workflows::waiter::PollingStackWaiter;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Deploys one service into an existing mu environment.
#[derive(Debug, Parser)]
#[command(name = "mu_deploy", version)]
struct Cli {
    /// Target environment, e.g. `dev`.
    #[arg(long, env = "MU_ENVIRONMENT")]
    environment: String,

    /// Service name. Overrides the name in `--service-file`.
    #[arg(long, env = "MU_SERVICE")]
    service: Option<String>,

    /// JSON service descriptor.
    #[arg(long)]
    service_file: Option<PathBuf>,

    /// Pin the listener-rule priority. 0 lets the deployer allocate one.
    #[arg(long)]
    priority: Option<u32>,

    /// Container image to deploy.
    #[arg(long, env = "MU_IMAGE")]
    image: Option<String>,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load_service(cli: &Cli) -> Result<ServiceDescriptor, Box<dyn Error>> {
    let mut service = match &cli.service_file {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .map_err(|error| format!("failed to read {}: {error}", path.display()))?;
            ServiceDescriptor::from_json(&raw)?
        }
        None => ServiceDescriptor::default(),
    };

    if let Some(name) = &cli.service {
        service.name = name.clone();
    }
    if let Some(image) = &cli.image {
        service.image_url = image.clone();
    }
    if let Some(priority) = cli.priority {
        service.priority = priority;
    }
    service.validate()?;
    Ok(service)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();
    let cli = Cli::parse();

    let config = DeployConfig::from_env()?;
    let service = load_service(&cli)?;
    let template_base_url = config.require_template_base_url()?.to_string();

    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let stacks = Arc::new(
        CloudFormationStacks::new(
            aws_sdk_cloudformation::Client::new(&aws_config),
            template_base_url,
        )
        .with_delete_polling(config.wait.poll_interval, config.wait.max_attempts),
    );
    let rules = Arc::new(ElbRuleLister::new(
        aws_sdk_elasticloadbalancingv2::Client::new(&aws_config),
    ));
    let params = Arc::new(SsmParamStore::new(aws_sdk_ssm::Client::new(&aws_config)));

    let cancel = CancellationToken::new();
    let waiter = PollingStackWaiter::new(stacks.clone(), config.wait.clone())
        .with_cancellation(cancel.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!(
                component = "mu_deploy",
                event = "interrupt_received",
                "cancelling outstanding stack waits"
            );
            cancel.cancel();
        }
    });

    let service_name = service.name.clone();
    let context = DeployContext {
        config,
        service,
        waiter: Arc::new(waiter),
        upserter: stacks,
        rule_lister: rules,
        param_store: params,
    };

    info!(
        component = "mu_deploy",
        event = "deploy_requested",
        environment = %cli.environment,
        service = %service_name,
    );

    let mut deployer = new_service_deployer(&context, &cli.environment, &service_name)?;
    let report = deployer.run().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
