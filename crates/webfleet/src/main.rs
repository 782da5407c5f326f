//! webfleet: synthesize and deploy a web application fleet
//!
//! `synth` prints the CloudFormation template for a stack configuration,
//! `deploy` creates or updates the stack, and `destroy` deletes it.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::filter::Directive;
use webfleet::aws::{AwsContext, CloudFormationClient, S3Client, TemplateSource, cfn_stack_tags};
use webfleet::config::{AwsSettings, Overrides, RuntimeFlags, load_stack_config};
use webfleet::deploy::{DeployOutcome, DeployRequest, DestroyOutcome, deploy_stack, destroy_stack};
use webfleet::synth::synthesize;
use webfleet::wait::WaitConfig;
use webfleet_common::defaults::{
    DEFAULT_REGION, DEFAULT_STACK_NAME, DEFAULT_STACK_TIMEOUT, MAX_INLINE_TEMPLATE_BYTES,
};

#[derive(Parser, Debug)]
#[command(name = "webfleet")]
#[command(about = "Web application fleet on CloudFormation")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(ValueEnum, Debug, Clone, Copy, Default)]
enum Format {
    #[default]
    Json,
    Yaml,
}

/// Arguments for the deploy command
#[derive(clap::Args, Debug)]
struct DeployArgs {
    /// Stack configuration file (JSON); the stock stack is used if omitted
    #[arg(short, long, env = "WEBFLEET_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured stack name
    #[arg(long)]
    stack_name: Option<String>,

    /// Override the configured AWS region
    #[arg(long)]
    region: Option<String>,

    /// AWS profile to use (overrides AWS_PROFILE env var)
    #[arg(long, env = "AWS_PROFILE")]
    aws_profile: Option<String>,

    /// S3 bucket for staging templates too large to send inline
    #[arg(long)]
    staging_bucket: Option<String>,

    /// Seconds to wait for the stack to settle
    #[arg(long, default_value_t = DEFAULT_STACK_TIMEOUT)]
    timeout: u64,

    /// Return once the operation has started
    #[arg(long)]
    no_wait: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the CloudFormation template
    Synth {
        /// Stack configuration file (JSON); the stock stack is used if omitted
        #[arg(short, long, env = "WEBFLEET_CONFIG")]
        config: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value_t = Format::Json)]
        format: Format,

        /// Write the template to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Create or update the stack
    Deploy(Box<DeployArgs>),

    /// Delete the stack (dry run unless --execute)
    Destroy {
        #[arg(long, default_value = DEFAULT_STACK_NAME)]
        stack_name: String,

        #[arg(long, default_value = DEFAULT_REGION)]
        region: String,

        /// AWS profile to use (overrides AWS_PROFILE env var)
        #[arg(long, env = "AWS_PROFILE")]
        aws_profile: Option<String>,

        /// Actually delete the stack
        #[arg(long)]
        execute: bool,

        /// Seconds to wait for deletion
        #[arg(long, default_value_t = DEFAULT_STACK_TIMEOUT)]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&e);
        std::process::exit(1);
    }
}

/// Print error in a user-friendly way
fn print_error(e: &anyhow::Error) {
    use std::io::Write;

    let mut stderr = std::io::stderr();
    let _ = writeln!(stderr, "\n\x1b[1;31mError:\x1b[0m {e}");

    let mut source = e.source();
    while let Some(cause) = source {
        let _ = writeln!(stderr, "  \x1b[33mCaused by:\x1b[0m {cause}");
        source = cause.source();
    }

    if std::env::var("RUST_BACKTRACE").is_err() {
        let _ = writeln!(
            stderr,
            "\n\x1b[2mSet RUST_BACKTRACE=1 for a detailed backtrace\x1b[0m"
        );
    } else {
        let backtrace = e.backtrace();
        if backtrace.status() == std::backtrace::BacktraceStatus::Captured {
            let _ = writeln!(stderr, "\n\x1b[2mBacktrace:\x1b[0m\n{backtrace}");
        }
    }
}

fn init_tracing() {
    let mut filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());
    // Keep the SDK quiet unless something goes wrong
    for target in ["aws_config", "aws_smithy_runtime", "aws_sdk_cloudformation", "aws_sdk_s3"] {
        if let Ok(directive) = format!("{target}=warn").parse::<Directive>() {
            filter = filter.add_directive(directive);
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Cancel waits on Ctrl-C
fn cancel_on_interrupt() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, no longer waiting (the stack operation continues in AWS)");
            child.cancel();
        }
    });
    token
}

async fn run() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    match args.command {
        Command::Synth {
            config,
            format,
            output,
        } => handle_synth(config, format, output),
        Command::Deploy(deploy_args) => handle_deploy(*deploy_args).await,
        Command::Destroy {
            stack_name,
            region,
            aws_profile,
            execute,
            timeout,
        } => {
            let aws = AwsSettings {
                region,
                profile: aws_profile,
                staging_bucket: None,
            };
            let flags = RuntimeFlags {
                wait: true,
                timeout: Duration::from_secs(timeout),
            };
            handle_destroy(&stack_name, &aws, &flags, execute).await
        }
    }
}

/// Handle the synth command
fn handle_synth(config: Option<PathBuf>, format: Format, output: Option<PathBuf>) -> Result<()> {
    let config = load_stack_config(config.as_deref(), &Overrides::default())?;
    let stack = synthesize(&config)?;

    let rendered = match format {
        Format::Json => stack.template.to_json_pretty()?,
        Format::Yaml => stack.template.to_yaml()?,
    };

    match output {
        Some(path) => {
            std::fs::write(&path, &rendered)
                .with_context(|| format!("Failed to write template to {}", path.display()))?;
            info!(path = %path.display(), stack = %stack.stack_name, "Template written");
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

/// Handle the deploy command
async fn handle_deploy(args: DeployArgs) -> Result<()> {
    let overrides = Overrides {
        stack_name: args.stack_name,
        region: args.region,
    };
    let config = load_stack_config(args.config.as_deref(), &overrides)?;
    let aws = AwsSettings {
        region: config.region.clone(),
        profile: args.aws_profile,
        staging_bucket: args.staging_bucket,
    };
    let flags = RuntimeFlags {
        wait: !args.no_wait,
        timeout: Duration::from_secs(args.timeout),
    };

    let stack = synthesize(&config)?;
    let body = stack.template.to_json_pretty()?;

    if let Some(profile) = &aws.profile {
        info!(profile = %profile, "Using AWS profile");
    }
    let ctx = AwsContext::new(&aws.region, aws.profile.as_deref()).await;

    let source = if body.len() > MAX_INLINE_TEMPLATE_BYTES {
        let Some(bucket) = &aws.staging_bucket else {
            bail!(
                "Template is {} bytes, over the {MAX_INLINE_TEMPLATE_BYTES} byte inline limit; \
                 pass --staging-bucket",
                body.len()
            );
        };
        let key = webfleet::aws::s3::template_key(&stack.stack_name, chrono::Utc::now());
        let url = S3Client::from_context(&ctx)
            .stage_template(bucket, &key, &body)
            .await?;
        TemplateSource::Url(url)
    } else {
        TemplateSource::Body(body)
    };

    let request = DeployRequest {
        stack_name: stack.stack_name.clone(),
        source,
        tags: cfn_stack_tags(&stack.stack_name, chrono::Utc::now()),
        wait: flags.wait.then(|| WaitConfig::for_stack(flags.timeout)),
    };

    info!(
        stack = %request.stack_name,
        region = %aws.region,
        resources = stack.template.resources().count(),
        "Deploying stack"
    );

    let cfn = CloudFormationClient::from_context(&ctx);
    let cancel = cancel_on_interrupt();
    let report = deploy_stack(&cfn, &request, Some(&cancel)).await?;

    match &report.outcome {
        DeployOutcome::Created { stack_id } => println!("Created {stack_id}"),
        DeployOutcome::Updated { stack_id } => println!("Updated {stack_id}"),
        DeployOutcome::Unchanged => println!("No changes to {}", request.stack_name),
    }
    if !flags.wait {
        println!("Not waiting for completion (--no-wait)");
    }
    for (key, value) in &report.outputs {
        println!("  {key:<22} {value}");
    }
    Ok(())
}

/// Handle the destroy command
async fn handle_destroy(
    stack_name: &str,
    aws: &AwsSettings,
    flags: &RuntimeFlags,
    execute: bool,
) -> Result<()> {
    let mode = if execute { "EXECUTE" } else { "DRY-RUN" };
    info!(stack = %stack_name, region = %aws.region, mode, "Destroying stack");

    let ctx = AwsContext::new(&aws.region, aws.profile.as_deref()).await;
    let cfn = CloudFormationClient::from_context(&ctx);
    let cancel = cancel_on_interrupt();
    let wait = flags.wait.then(|| WaitConfig::for_stack(flags.timeout));

    match destroy_stack(&cfn, stack_name, execute, wait, Some(&cancel)).await? {
        DestroyOutcome::Absent => println!("Stack {stack_name} does not exist"),
        DestroyOutcome::WouldDelete { status } => {
            println!("Stack {stack_name} ({status}) would be deleted");
            println!("\nRun with --execute to actually delete it.");
        }
        DestroyOutcome::Deleted => println!("Deleted {stack_name}"),
    }
    Ok(())
}
