//! omrgrade CLI: grade scanned answer sheets from the command line.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use omrgrade::{
    classify_ratios, fallback_choice, AnswerKey, ClassifierThresholds, DominanceResolver,
    option_letter, Fallback, GradeConfig, Grader, LayoutInference, ScoringPolicy, SheetImage,
    SheetLayout,
};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "omrgrade")]
#[command(about = "Grade scanned or photographed optical-mark answer sheets")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
#[allow(clippy::large_enum_variant)]
enum Commands {
    /// Grade one sheet and write the score report.
    Grade(CliGradeArgs),

    /// Print a summary of a sheet layout file.
    LayoutInfo {
        /// Sheet layout (JSON).
        #[arg(long)]
        layout: PathBuf,
    },

    /// Classify a vector of fill ratios and show the deterministic fallback.
    ClassifyTest(CliClassifyArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CliResolver {
    /// No secondary source; ambiguous questions take the fallback.
    None,
    /// Built-in ratio-dominance second opinion.
    Dominance,
}

#[derive(Debug, Clone, Args)]
struct CliGradeArgs {
    /// Path to the sheet image.
    #[arg(long)]
    image: PathBuf,

    /// Answer key: a JSON list of strings, or one entry per line.
    #[arg(long)]
    key: PathBuf,

    /// Scoring policy (JSON).
    #[arg(long)]
    policy: PathBuf,

    /// Path to write the score report (JSON).
    #[arg(long)]
    out: PathBuf,

    /// Sheet layout (JSON). Without it the layout is inferred from a grid.
    #[arg(long)]
    layout: Option<PathBuf>,

    /// Engine configuration (JSON).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Inferred grid: number of questions.
    #[arg(long)]
    infer_questions: Option<u32>,

    /// Inferred grid: number of question columns.
    #[arg(long)]
    infer_columns: Option<u32>,

    /// Inferred grid: rows per column.
    #[arg(long)]
    infer_rows: Option<u32>,

    /// Inferred grid: options per question.
    #[arg(long)]
    infer_options: Option<u32>,

    /// Secondary decision source for ambiguous questions.
    #[arg(long, value_enum, default_value = "dominance")]
    resolver: CliResolver,

    /// Overall secondary-decision deadline in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,
}

impl CliGradeArgs {
    fn has_inference_overrides(&self) -> bool {
        self.infer_questions.is_some()
            || self.infer_columns.is_some()
            || self.infer_rows.is_some()
            || self.infer_options.is_some()
    }

    /// Merge command-line overrides into the loaded configuration.
    fn apply_overrides(&self, config: &mut GradeConfig) {
        if let Some(ms) = self.timeout_ms {
            config.fusion.timeout_ms = ms;
        }
        if !self.has_inference_overrides() {
            return;
        }
        let grid = config
            .layout_inference
            .get_or_insert_with(LayoutInference::default);
        if let Some(n) = self.infer_questions {
            grid.question_count = n;
        }
        if let Some(c) = self.infer_columns {
            grid.columns = c;
        }
        if let Some(r) = self.infer_rows {
            grid.rows_per_column = r;
        }
        if let Some(k) = self.infer_options {
            grid.options_per_question = k;
        }
        // A bare question count implies a single column.
        if self.infer_rows.is_none() && self.infer_columns.is_none() {
            grid.columns = 1;
            grid.rows_per_column = grid.question_count;
        }
    }
}

#[derive(Debug, Clone, Args)]
struct CliClassifyArgs {
    /// Comma-separated fill ratios, one per option (e.g. 0.05,0.82,0.10).
    #[arg(long)]
    ratios: String,

    /// Override the confident-mark threshold.
    #[arg(long)]
    high: Option<f32>,

    /// Override the blank threshold.
    #[arg(long)]
    low: Option<f32>,

    /// Override the rival-mark threshold.
    #[arg(long)]
    rival: Option<f32>,
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Grade(args) => run_grade(&args),
        Commands::LayoutInfo { layout } => run_layout_info(&layout),
        Commands::ClassifyTest(args) => run_classify_test(&args),
    }
}

// ── layout-info ───────────────────────────────────────────────────────

fn run_layout_info(path: &Path) -> CliResult<()> {
    let layout = SheetLayout::from_json_file(path)?;

    println!("sheet layout '{}'", layout.name);
    println!(
        "  page size:          {} x {} units",
        layout.page_size[0], layout.page_size[1]
    );
    println!("  questions:          {}", layout.n_questions());
    println!("  options (total):    {}", layout.n_options());
    println!("  alignment markers:  {}", layout.alignment_markers.len());

    if let (Some(first), Some(last)) = (layout.questions.first(), layout.questions.last()) {
        let letters: Vec<&str> = first.options.iter().map(|o| o.letter.as_str()).collect();
        println!("  first question:     #{} [{}]", first.number, letters.join(" "));
        println!("  last question:      #{}", last.number);
    }
    for (i, m) in layout.alignment_markers.iter().enumerate() {
        println!(
            "  marker {}:           ({:.1}, {:.1}) size {:.1}",
            i, m.center[0], m.center[1], m.size
        );
    }

    Ok(())
}

// ── classify-test ─────────────────────────────────────────────────────

fn parse_ratios(text: &str) -> CliResult<Vec<f32>> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f32>()
                .map_err(|e| -> CliError { format!("invalid ratio '{}': {}", s, e).into() })
        })
        .collect()
}

fn run_classify_test(args: &CliClassifyArgs) -> CliResult<()> {
    let ratios = parse_ratios(&args.ratios)?;
    if ratios.is_empty() {
        return Err("no ratios given".into());
    }
    if option_letter(ratios.len() - 1).is_none() {
        return Err(format!("at most 26 ratios are supported, got {}", ratios.len()).into());
    }
    let letter = |i: usize| option_letter(i).unwrap_or_else(|| format!("#{}", i + 1));

    let mut config = GradeConfig::default();
    if let Some(high) = args.high {
        config.classify.high = high;
    }
    if let Some(low) = args.low {
        config.classify.low = low;
    }
    if let Some(rival) = args.rival {
        config.classify.rival = rival;
    }
    config.validate()?;
    let thresholds: &ClassifierThresholds = &config.classify;

    let (status, best) = classify_ratios(&ratios, thresholds);

    println!("Ratios:       {:?}", ratios);
    println!(
        "Thresholds:   high={:.2} low={:.2} rival={:.2}",
        thresholds.high, thresholds.low, thresholds.rival
    );
    println!("Status:       {}", status);
    match best {
        Some(i) => println!("Best option:  {} ({:.3})", letter(i), ratios[i]),
        None => println!("Best option:  -"),
    }
    let fallback = match fallback_choice(status, &ratios, &config.fusion) {
        Fallback::Pick(i) => letter(i),
        Fallback::Blank => "BLANK".to_string(),
        Fallback::Invalid => "INVALID".to_string(),
    };
    println!("Fallback:     {}", fallback);

    Ok(())
}

// ── grade ─────────────────────────────────────────────────────────────

fn load_key(path: &Path) -> CliResult<AnswerKey> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| -> CliError { format!("Failed to read key {}: {}", path.display(), e).into() })?;
    let key = if text.trim_start().starts_with('[') {
        serde_json::from_str::<AnswerKey>(&text)?
    } else {
        AnswerKey::from_lines(&text)?
    };
    Ok(key)
}

fn run_grade(args: &CliGradeArgs) -> CliResult<()> {
    tracing::info!("Loading image: {}", args.image.display());

    let bytes = std::fs::read(&args.image).map_err(|e| -> CliError {
        format!("Failed to open image {}: {}", args.image.display(), e).into()
    })?;
    let image = SheetImage::from_bytes(&bytes)?;
    let (w, h) = image.dimensions();
    tracing::info!("Image size: {}x{}", w, h);

    let mut config = match &args.config {
        Some(path) => GradeConfig::from_json_file(path)?,
        None => GradeConfig::default(),
    };
    args.apply_overrides(&mut config);

    let layout = args
        .layout
        .as_deref()
        .map(SheetLayout::from_json_file)
        .transpose()?;
    let key = load_key(&args.key)?;
    let policy = ScoringPolicy::from_json_file(&args.policy)?;

    let grader = match args.resolver {
        CliResolver::None => Grader::with_config(config),
        CliResolver::Dominance => {
            Grader::with_config(config).with_resolver(Arc::new(DominanceResolver::default()))
        }
    };

    let report = grader.analyze(&image, layout.as_ref(), &key, &policy)?;

    tracing::info!(
        "Score {:.2}/{:.2}: {} correct, {} wrong, {} blank, {} invalid",
        report.total,
        report.max_score,
        report.counts.correct,
        report.counts.wrong,
        report.counts.blank,
        report.counts.invalid,
    );
    for d in &report.diagnostics {
        tracing::warn!("{}", d);
    }

    let json = serde_json::to_string_pretty(&report)?;
    std::fs::write(&args.out, &json)?;
    tracing::info!("Results written to {}", args.out.display());

    Ok(())
}
