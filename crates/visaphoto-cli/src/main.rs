use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use visaphoto_core::codec::OutputFormat;
use visaphoto_pipeline::{Pipeline, PipelineConfig, PrecomputedCutout, ProcessingConfig, SharedExtractor};

#[derive(Parser)]
#[command(name = "visaphoto", about = "Frame portraits as passport photos and check them against visa photo rules")]
struct Cli {
    /// TOML config file (takes precedence over VISAPHOTO_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Frame a photo, write the result and print the compliance report
    Process {
        input: PathBuf,
        /// Output image (default: <input>-passport.<ext> next to the input)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Also write the JSON result to this file
        #[arg(long)]
        report: Option<PathBuf>,
        /// Transparent-background cutout of the input; enables background replacement
        #[arg(long)]
        cutout: Option<PathBuf>,
        #[arg(long, value_enum)]
        format: Option<Format>,
        /// Keep native resolution instead of resampling to print size
        #[arg(long)]
        no_resize: bool,
        /// Center crop instead of landmark-driven framing
        #[arg(long)]
        no_fit_head: bool,
        /// Leave head tilt as is
        #[arg(long)]
        no_tilt: bool,
        /// Skip the brightness/saturation boost
        #[arg(long)]
        no_contrast: bool,
        /// Fail when no face is found
        #[arg(long)]
        require_face: bool,
    },
    /// Score a photo as it is, without reframing it
    Check { input: PathBuf },
    /// Print the effective configuration as TOML
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Jpeg,
    Png,
}

impl From<Format> for OutputFormat {
    fn from(f: Format) -> Self {
        match f {
            Format::Jpeg => OutputFormat::Jpeg,
            Format::Png => OutputFormat::Png,
        }
    }
}

fn default_output(input: &Path, format: OutputFormat) -> PathBuf {
    let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("photo");
    input.with_file_name(format!("{stem}-passport.{}", format.extension()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = match cli.config.as_deref() {
        Some(path) => PipelineConfig::from_path(path),
        None => PipelineConfig::from_env(),
    }
    .context("loading configuration")?;

    match cli.command {
        Commands::Process {
            input,
            output,
            report,
            cutout,
            format,
            no_resize,
            no_fit_head,
            no_tilt,
            no_contrast,
            require_face,
        } => {
            if let Some(format) = format {
                config.output_format = format.into();
            }
            let format = config.output_format;
            let bytes = std::fs::read(&input).with_context(|| format!("reading {}", input.display()))?;

            let mut pipeline = Pipeline::new(config.clone(), SharedExtractor::onnx(config.model_dir.clone()));
            if let Some(path) = &cutout {
                let remover = PrecomputedCutout::load(path).with_context(|| format!("loading cutout {}", path.display()))?;
                pipeline = pipeline.with_background_remover(Arc::new(remover));
            }

            let request = ProcessingConfig {
                resize: !no_resize,
                remove_background: cutout.is_some(),
                fit_head: !no_fit_head,
                fix_head_tilt: !no_tilt,
                adjust_contrast: !no_contrast,
                require_face,
                background_api_key: None,
            };
            let photo = pipeline.process(&bytes, &request).await?;

            let output = output.unwrap_or_else(|| default_output(&input, format));
            std::fs::write(&output, &photo.bytes).with_context(|| format!("writing {}", output.display()))?;
            tracing::info!(
                path = %output.display(),
                width = photo.width,
                height = photo.height,
                all_met = photo.report.all_met(),
                "wrote photo"
            );

            let json = serde_json::to_string_pretty(&photo)?;
            if let Some(path) = report {
                std::fs::write(&path, &json).with_context(|| format!("writing {}", path.display()))?;
            }
            println!("{json}");
        }
        Commands::Check { input } => {
            let bytes = std::fs::read(&input).with_context(|| format!("reading {}", input.display()))?;
            let pipeline = Pipeline::new(config.clone(), SharedExtractor::onnx(config.model_dir.clone()));
            let report = pipeline.check(&bytes).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Config => {
            print!("{}", config.to_file().to_toml_string()?);
        }
    }

    Ok(())
}
