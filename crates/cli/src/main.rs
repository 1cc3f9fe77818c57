use std::{
    io::Read,
    path::{Path, PathBuf},
};

use {
    anyhow::{Context, Result},
    clap::{Parser, Subcommand},
    mend_metrics::{counter, shared_store, snapshot_metrics, toolcalls},
    mend_toolcalls::{DetectionConfig, DetectionResult, Detector, Outcome, repair_json_with_depth},
    serde::Serialize,
    serde_json::Value,
};

/// Find, repair and diagnose tool calls in LLM output.
///
/// Each command reads one model response from FILE, or stdin when FILE is
/// omitted, and writes JSON to stdout.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// TOML file with detection settings.
    #[arg(long, global = true, env = "MEND_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    /// Install the Prometheus recorder and print its exposition text last.
    /// Needs a build with the `prometheus` feature.
    #[arg(long, global = true)]
    prometheus: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Detect tool calls; diagnose the response when none are found.
    Detect {
        file: Option<PathBuf>,

        /// Provider label for malformed-call metrics.
        #[arg(long)]
        provider: Option<String>,

        /// Model label for malformed-call metrics.
        #[arg(long)]
        model: Option<String>,

        /// Print the malformed-call counters after the result.
        #[arg(long)]
        metrics: bool,
    },
    /// Repair a single JSON object and print it.
    Repair { file: Option<PathBuf> },
    /// Print why the response carries no usable tool call, or `null`.
    Diagnose { file: Option<PathBuf> },
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum Report<'a> {
    Calls(&'a DetectionResult),
    Diagnosis(Option<&'a mend_toolcalls::Diagnosis>),
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_json);

    #[cfg(feature = "prometheus")]
    let prometheus = if args.prometheus {
        Some(mend_metrics::install_prometheus_recorder()?)
    } else {
        None
    };
    #[cfg(not(feature = "prometheus"))]
    if args.prometheus {
        tracing::warn!("built without the prometheus feature, ignoring --prometheus");
    }

    let config = load_config(args.config.as_deref())?;
    tracing::debug!(?config, "detection config");
    let detector = Detector::new(config);

    match args.command {
        Command::Detect {
            file,
            provider,
            model,
            metrics,
        } => {
            let text = read_input(file.as_deref())?;
            let outcome = detector.detect_or_diagnose(&text);
            match &outcome {
                Outcome::Calls(result) => {
                    count_detected(result);
                    print_json(&Report::Calls(result))?;
                },
                Outcome::Diagnosed(diagnosis) => {
                    if let Some(d) = diagnosis {
                        shared_store().record_diagnosis(provider.as_deref(), model.as_deref(), d);
                    }
                    print_json(&Report::Diagnosis(diagnosis.as_ref()))?;
                },
            }
            if metrics {
                print_json(&snapshot_metrics())?;
            }
        },
        Command::Repair { file } => {
            let text = read_input(file.as_deref())?;
            let repaired = repair_json_with_depth(&text, detector.config().max_autoclose_depth)
                .context("input could not be repaired into a JSON object")?;
            print_json(&repaired)?;
        },
        Command::Diagnose { file } => {
            let text = read_input(file.as_deref())?;
            print_json(&detector.diagnose(&text))?;
        },
    }

    #[cfg(feature = "prometheus")]
    if let Some(handle) = prometheus {
        print!("{}", handle.render());
    }

    Ok(())
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>) -> Result<DetectionConfig> {
    match path {
        Some(path) => DetectionConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(DetectionConfig::default()),
    }
}

fn read_input(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display())),
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("failed to read stdin")?;
            Ok(text)
        },
    }
}

fn count_detected(result: &DetectionResult) {
    if !result.read_only.is_empty() {
        counter!(toolcalls::DETECTED_TOTAL, "kind" => "read_only")
            .increment(result.read_only.len() as u64);
    }
    if result.mutating.is_some() {
        counter!(toolcalls::DETECTED_TOTAL, "kind" => "mutating").increment(1);
    }
}

fn print_json(value: &impl Serialize) -> Result<()> {
    let out: Value = serde_json::to_value(value)?;
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, std::io::Write};

    #[test]
    fn parses_detect_with_labels() {
        let args = Args::try_parse_from([
            "mend",
            "detect",
            "reply.txt",
            "--provider",
            "anthropic",
            "--model",
            "sonnet",
            "--metrics",
        ])
        .unwrap();
        match args.command {
            Command::Detect {
                file,
                provider,
                model,
                metrics,
            } => {
                assert_eq!(file.unwrap(), PathBuf::from("reply.txt"));
                assert_eq!(provider.as_deref(), Some("anthropic"));
                assert_eq!(model.as_deref(), Some("sonnet"));
                assert!(metrics);
            },
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn config_flag_is_global() {
        let args = Args::try_parse_from(["mend", "repair", "--config", "mend.toml"]).unwrap();
        assert_eq!(args.config.unwrap(), PathBuf::from("mend.toml"));
        assert!(matches!(args.command, Command::Repair { file: None }));
    }

    #[test]
    fn subcommand_is_required() {
        assert!(Args::try_parse_from(["mend"]).is_err());
    }

    #[test]
    fn missing_config_uses_defaults() {
        assert_eq!(load_config(None).unwrap(), DetectionConfig::default());
    }

    #[test]
    fn config_file_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "mutating_policy = \"first\"").unwrap();
        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.mutating_policy, mend_toolcalls::MutatingPolicy::First);
    }

    #[test]
    fn unreadable_input_reports_path() {
        let err = read_input(Some(Path::new("/nonexistent/reply.txt"))).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/reply.txt"));
    }

    #[test]
    fn report_shapes() {
        let result = Detector::default()
            .detect_all(r#"{"tool": "web_search", "args": {"query": "q"}}"#);
        let calls = serde_json::to_value(Report::Calls(&result)).unwrap();
        assert_eq!(calls["calls"]["read_only"][0]["tool"], "web_search");
        assert_eq!(calls["calls"]["mutating"], Value::Null);

        let none = serde_json::to_value(Report::Diagnosis(None)).unwrap();
        assert_eq!(none, serde_json::json!({"diagnosis": null}));
    }
}
