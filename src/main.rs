use clap::Parser;
use tracing_subscriber::EnvFilter;

use dxbench::llm::GroqConfig;
use dxbench::{
    BatchConfig, Config, ConfigRegistry, DiagnosisPipeline, JudgeKind, JudgeReport, JudgeRequest,
    ModelHandler, PromptRegistry, RateLimitAction, RunReport, RunRequest, Storage,
    TrackerRegistry,
};

const DEBUG_MODEL_ALIAS: &str = "dxgpt_debug";
const DEBUG_MODEL: &str = "llama-3.3-70b-versatile";
const DEBUG_PROMPT_ALIAS: &str = "dxgpt_improved";
const DEBUG_SOURCE: &str = "test_PUMCH_ADM";
const DEBUG_NUM_SAMPLES: usize = 5;
const DEBUG_BATCH_SIZE: usize = 5;
const DEBUG_RPM_LIMIT: u32 = 1000;
const DEBUG_MIN_BATCH_INTERVAL: f64 = 10.0;

const DEFAULT_PROMPT_ALIAS: &str = "dxgpt_standard";

#[derive(Parser, Debug)]
#[command(name = "dxbench")]
#[command(version = "0.1.0")]
#[command(about = "Generate differential diagnoses for benchmark cases with batched LLM calls")]
#[command(
    long_about = "Runs in endpoint mode when --model is given and in debug mode otherwise."
)]
struct Args {
    /// Model alias (e.g. llama3-70b-versatile). Selects endpoint mode
    #[arg(long)]
    model: Option<String>,

    /// Prompt template alias
    #[arg(long = "prompt_alias")]
    prompt_alias: Option<String>,

    /// Case source to run on, or "all"
    #[arg(long, default_value = "all")]
    source: String,

    /// Maximum number of cases to process
    #[arg(long = "num_samples", alias = "max_diagnoses")]
    num_samples: Option<usize>,

    /// Items per concurrent chunk
    #[arg(long = "batch_size")]
    batch_size: Option<usize>,

    /// Requests-per-minute ceiling
    #[arg(long = "rpm_limit")]
    rpm_limit: Option<u32>,

    /// Minimum seconds between chunk starts
    #[arg(long = "min_batch_interval")]
    min_batch_interval: Option<f64>,

    /// Per-request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// What to do when a model nears its rate limits (ignore, warn, wait)
    #[arg(long = "tracker_pacing")]
    tracker_pacing: Option<RateLimitAction>,

    /// Database path
    #[arg(long)]
    database: Option<String>,

    /// Import cases from a JSON file and exit
    #[arg(long)]
    import: Option<String>,

    /// Judge stored differentials instead of generating new ones (severity, semantic)
    #[arg(long, requires = "model")]
    judge: Option<JudgeKind>,

    /// Model whose stored differentials are judged; defaults to --model
    #[arg(long = "differential_model", requires = "judge")]
    differential_model: Option<String>,

    /// List model aliases and exit
    #[arg(long = "list_models")]
    list_models: bool,

    /// Call the model one item at a time with blocking requests
    #[arg(long)]
    sequential: bool,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("dxbench={}", level).parse()?)
                .add_directive("reqwest=warn".parse()?),
        )
        .init();

    let mut configs = ConfigRegistry::with_defaults();
    configs.register(DEBUG_MODEL_ALIAS, || {
        Box::new(GroqConfig::new(DEBUG_MODEL_ALIAS, DEBUG_MODEL, 8_192))
    });

    if args.list_models {
        for alias in configs.aliases() {
            println!("{}", alias);
        }
        return Ok(());
    }

    let mut config = Config::from_env()?;
    if let Some(ref database) = args.database {
        config.database_path = database.clone();
    }

    let storage = Storage::new(&config.database_path)?;

    let request = match args.model {
        Some(ref model) => {
            tracing::info!("Endpoint mode with model {}", model);
            apply_overrides(&mut config, &args);
            RunRequest {
                model_alias: model.clone(),
                prompt_alias: args
                    .prompt_alias
                    .clone()
                    .unwrap_or_else(|| DEFAULT_PROMPT_ALIAS.to_string()),
                source: args.source.clone(),
                num_samples: args.num_samples,
                sequential: args.sequential,
            }
        }
        None => {
            tracing::info!("Debug mode with model {}", DEBUG_MODEL_ALIAS);
            config.batch_size = DEBUG_BATCH_SIZE;
            config.rpm_limit = DEBUG_RPM_LIMIT;
            config.min_batch_interval = DEBUG_MIN_BATCH_INTERVAL;
            config.verbose = true;
            RunRequest {
                model_alias: DEBUG_MODEL_ALIAS.to_string(),
                prompt_alias: DEBUG_PROMPT_ALIAS.to_string(),
                source: DEBUG_SOURCE.to_string(),
                num_samples: Some(DEBUG_NUM_SAMPLES),
                sequential: args.sequential,
            }
        }
    };
    config.validate()?;

    // The orchestrator does the pacing, so the handler only records usage.
    let handler = ModelHandler::new(configs, TrackerRegistry::new())
        .with_preflight(RateLimitAction::Ignore)
        .with_buffer_percent(config.rate_limit_buffer);

    let mut pipeline = DiagnosisPipeline::new(
        handler,
        PromptRegistry::with_defaults(),
        storage,
        BatchConfig::from(&config),
    );

    if let Some(ref path) = args.import {
        let imported = pipeline.import_cases(path)?;
        println!("Imported {} cases into {}", imported, config.database_path);
        return Ok(());
    }

    if let Some(kind) = args.judge {
        let judge = JudgeRequest {
            kind,
            judge_alias: request.model_alias.clone(),
            differential_model: args
                .differential_model
                .clone()
                .unwrap_or_else(|| request.model_alias.clone()),
            source: request.source.clone(),
            num_samples: request.num_samples,
        };
        let report = pipeline.judge(&judge).await?;
        print_judge_report(&pipeline, &judge, &report, config.verbose)?;
        return Ok(());
    }

    let report = pipeline.run(&request).await?;
    print_report(&pipeline, &request, &report, config.verbose)?;

    Ok(())
}

fn apply_overrides(config: &mut Config, args: &Args) {
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(rpm_limit) = args.rpm_limit {
        config.rpm_limit = rpm_limit;
    }
    if let Some(interval) = args.min_batch_interval {
        config.min_batch_interval = interval;
    }
    if let Some(timeout) = args.timeout {
        config.request_timeout_secs = Some(timeout);
    }
    if let Some(pacing) = args.tracker_pacing {
        config.tracker_pacing = pacing;
    }
    config.verbose = args.verbose;
}

fn print_report(
    pipeline: &DiagnosisPipeline,
    request: &RunRequest,
    report: &RunReport,
    verbose: bool,
) -> anyhow::Result<()> {
    let mut output = String::new();

    output.push_str(&format!(
        "\n=== {} / {} on {} ===\n\n",
        request.model_alias, request.prompt_alias, request.source
    ));
    output.push_str(&format!("Cases: {}\n", report.cases));
    output.push_str(&format!("Stored: {}\n", report.stored));
    output.push_str(&format!(
        "Calls: {} succeeded, {} failed\n",
        report.stats.successes, report.stats.failures
    ));
    output.push_str(&format!("Tokens: {}\n", report.stats.total_tokens));
    output.push_str(&format!(
        "Elapsed: {:.2}s ({:.1} RPM)\n",
        report.stats.elapsed.as_secs_f64(),
        report.stats.effective_rpm
    ));

    if verbose {
        push_failures(&mut output, &report.failures);
    }
    push_usage(&mut output, pipeline)?;

    println!("{}", output);
    Ok(())
}

fn print_judge_report(
    pipeline: &DiagnosisPipeline,
    request: &JudgeRequest,
    report: &JudgeReport,
    verbose: bool,
) -> anyhow::Result<()> {
    let mut output = String::new();

    output.push_str(&format!(
        "\n=== {} judge {} on {} differentials by {} ===\n\n",
        request.judge_alias, request.kind, request.source, request.differential_model
    ));
    output.push_str(&format!("Differentials: {}\n", report.differentials));
    output.push_str(&format!("Judged: {}\n", report.judged));
    output.push_str(&format!("Verdicts stored: {}\n", report.verdicts));
    output.push_str(&format!(
        "Calls: {} succeeded, {} failed\n",
        report.stats.successes, report.stats.failures
    ));

    if verbose {
        push_failures(&mut output, &report.failures);
    }
    push_usage(&mut output, pipeline)?;

    println!("{}", output);
    Ok(())
}

fn push_failures(output: &mut String, failures: &[dxbench::diagnosis::FailureDetail]) {
    if failures.is_empty() {
        return;
    }
    output.push_str("\nFailures:\n");
    for failure in failures {
        output.push_str(&format!(
            "  - {}: {} {}\n",
            failure.id,
            failure.reason,
            failure.detail.as_deref().unwrap_or_default()
        ));
    }
}

fn push_usage(output: &mut String, pipeline: &DiagnosisPipeline) -> anyhow::Result<()> {
    let usage = pipeline.handler().usage_report();
    if !usage.is_empty() {
        output.push_str("\nUsage by model:\n");
        output.push_str(&serde_json::to_string_pretty(&usage)?);
        output.push('\n');
    }
    Ok(())
}
