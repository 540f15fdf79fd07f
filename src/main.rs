//! Command-line front end for the classifier trainer.

use std::io::Write;
use std::path::{Path, PathBuf};

use coachnet::app_dirs;
use coachnet::config::{self, AppSettings};
use coachnet::dataset::{Features, grid_from_image_path};
use coachnet::logging;
use coachnet::ml::classifier::Prediction;
use coachnet::storage::{BLOB_DB_FILE_NAME, SqliteBlobStore};
use coachnet::trainer::{Trainer, TrainingEvent};
use coachnet::variant::{DIGIT_IMAGE_SIDE, VariantConfig, VariantKind};

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let options = parse_args(std::env::args().skip(1).collect())?;
    let settings = match &options.config {
        Some(path) => config::load_from(path),
        None => config::load_or_default(),
    }
    .map_err(|err| err.to_string())?;
    if let Err(err) = logging::init(&settings.logging) {
        eprintln!("Logging disabled: {err}");
    }

    let kind = options.variant.unwrap_or(settings.variant);
    let mut variant = VariantConfig::for_kind(kind).with_settings(&settings.training);
    if let Some(epochs) = options.epochs {
        variant = variant.with_epochs(epochs);
    }
    let store = open_store(&settings)?;
    let mut trainer = Trainer::open(variant, store).map_err(|err| err.to_string())?;

    match options.command {
        Command::Status => print_status(&trainer),
        Command::Train => {
            let outcome = trainer
                .run_training(|stats| {
                    print!(
                        "\repoch {:>4}  loss={:.4}  accuracy={:.3}",
                        stats.epoch + 1,
                        stats.loss,
                        stats.accuracy
                    );
                    let _ = std::io::stdout().flush();
                })
                .map_err(|err| err.to_string())?;
            println!();
            match outcome {
                Some(outcome) => println!(
                    "Trained {} epochs on {} samples in {:.1}s",
                    outcome.summary.epochs,
                    outcome.summary.train_rows + outcome.summary.validation_rows,
                    outcome.elapsed.as_secs_f32()
                ),
                None => println!("Training cancelled"),
            }
        }
        Command::Predict(input) => {
            finish_pending_training(&mut trainer)?;
            let features = input.into_features()?;
            let prediction = trainer
                .predict_and_present(features)
                .map_err(|err| err.to_string())?;
            print_prediction(&prediction, &trainer);
        }
        Command::Random => {
            finish_pending_training(&mut trainer)?;
            match trainer.request_new_sample().map_err(|err| err.to_string())? {
                Some(prediction) => {
                    if let Some(display) = trainer.prediction_display() {
                        println!("input: {}", describe_features(&display.features));
                    }
                    print_prediction(&prediction, &trainer);
                }
                None => {
                    return Err(format!(
                        "The {kind} variant takes drawings; use `predict --image <file>`"
                    ));
                }
            }
        }
        Command::Correct { input, label } => {
            finish_pending_training(&mut trainer)?;
            let features = input.into_features()?;
            trainer
                .correct(features, &label)
                .map_err(|err| err.to_string())?;
            println!(
                "Recorded `{label}` ({} samples). Run `train` to update the model.",
                trainer.samples().len()
            );
        }
        Command::Export { dir } => {
            finish_pending_training(&mut trainer)?;
            let dir = match dir.or_else(|| settings.export.directory.clone()) {
                Some(dir) => dir,
                None => app_dirs::exports_dir().map_err(|err| err.to_string())?,
            };
            let (architecture, weights) = trainer
                .request_download(&dir)
                .map_err(|err| err.to_string())?;
            println!("Wrote {}", architecture.display());
            println!("Wrote {}", weights.display());
        }
        Command::Import {
            architecture,
            weights,
        } => {
            trainer.cancel_handle().cancel();
            finish_pending_training(&mut trainer)?;
            trainer
                .import_model_files(&architecture, &weights)
                .map_err(|err| err.to_string())?;
            println!("Imported model for {kind}");
        }
        Command::Evaluate => {
            finish_pending_training(&mut trainer)?;
            let report = trainer.evaluate().map_err(|err| err.to_string())?;
            println!(
                "accuracy: {:.4} over {} samples",
                report.accuracy, report.samples
            );
            for class in &report.per_class {
                println!(
                    "{:<8}  precision={:.3}  recall={:.3}  f1={:.3}  support={}",
                    class.label, class.precision, class.recall, class.f1, class.support
                );
            }
            println!("confusion matrix (rows=true, cols=pred):");
            for row in &report.confusion {
                let line: String = row.iter().map(|count| format!("{count:6}")).collect();
                println!("{line}");
            }
        }
    }
    Ok(())
}

fn open_store(settings: &AppSettings) -> Result<SqliteBlobStore, String> {
    let path = match &settings.storage.database {
        Some(path) => path.clone(),
        None => app_dirs::app_root_dir()
            .map_err(|err| err.to_string())?
            .join(BLOB_DB_FILE_NAME),
    };
    SqliteBlobStore::open(&path).map_err(|err| err.to_string())
}

/// Drive the automatic first run of a fresh model before serving it.
fn finish_pending_training(trainer: &mut Trainer<SqliteBlobStore>) -> Result<(), String> {
    if !trainer.is_training() {
        return Ok(());
    }
    println!("Training a fresh model...");
    for event in trainer.training_progress() {
        if let TrainingEvent::Epoch(stats) = event.map_err(|err| err.to_string())? {
            print!("\repoch {:>4}  loss={:.4}", stats.epoch + 1, stats.loss);
            let _ = std::io::stdout().flush();
        }
    }
    println!();
    Ok(())
}

fn print_status(trainer: &Trainer<SqliteBlobStore>) {
    let config = trainer.config();
    println!("variant:        {}", config.kind);
    println!("labels:         {}", config.labels.iter().collect::<Vec<_>>().join(", "));
    println!("samples:        {}", trainer.samples().len());
    println!("model:          {:?}", trainer.model_origin());
    println!("training runs:  {}", trainer.model().training_runs());
    println!("parameters:     {}", trainer.model().param_count());
    println!("frozen layers:  {:?}", trainer.model().frozen_layers());
    println!("status:         {:?}", trainer.training_status());
}

fn print_prediction(prediction: &Prediction, trainer: &Trainer<SqliteBlobStore>) {
    println!("prediction: {}", prediction.label);
    if let Some(display) = trainer.prediction_display() {
        for entry in display.confidences {
            println!("  {:<8} {:>6.2}%", entry.label, entry.percent);
        }
    }
}

fn describe_features(features: &Features) -> String {
    match features {
        Features::Rgb([r, g, b]) => format!("rgb({r}, {g}, {b})"),
        Features::Grid(grid) => format!("{}x{} drawing", grid.width, grid.height),
    }
}

#[derive(Debug, Clone)]
enum InputArg {
    Rgb([f32; 3]),
    Image(PathBuf),
}

impl InputArg {
    fn into_features(self) -> Result<Features, String> {
        match self {
            Self::Rgb([r, g, b]) => Ok(Features::rgb(r, g, b)),
            Self::Image(path) => grid_from_image_path(&path, DIGIT_IMAGE_SIDE)
                .map(Features::Grid)
                .map_err(|err| err.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
enum Command {
    Status,
    Train,
    Predict(InputArg),
    Random,
    Correct { input: InputArg, label: String },
    Export { dir: Option<PathBuf> },
    Import { architecture: PathBuf, weights: PathBuf },
    Evaluate,
}

#[derive(Debug, Clone)]
struct CliOptions {
    variant: Option<VariantKind>,
    config: Option<PathBuf>,
    epochs: Option<usize>,
    command: Command,
}

fn parse_args(args: Vec<String>) -> Result<CliOptions, String> {
    let mut variant = None;
    let mut config = None;
    let mut epochs = None;
    let mut positional: Vec<String> = Vec::new();

    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "-h" | "--help" => return Err(help_text()),
            "--variant" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--variant requires a value".to_string())?;
                variant = Some(value.parse::<VariantKind>().map_err(|err| err.to_string())?);
            }
            "--config" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--config requires a value".to_string())?;
                config = Some(PathBuf::from(value));
            }
            "--epochs" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--epochs requires a value".to_string())?;
                epochs = Some(
                    value
                        .parse::<usize>()
                        .map_err(|_| format!("Invalid --epochs value: {value}"))?,
                );
            }
            _ => positional.push(args[idx].clone()),
        }
        idx += 1;
    }

    let command = parse_command(&positional)?;
    Ok(CliOptions {
        variant,
        config,
        epochs,
        command,
    })
}

fn parse_command(args: &[String]) -> Result<Command, String> {
    let Some((name, rest)) = args.split_first() else {
        return Err(help_text());
    };
    match name.as_str() {
        "status" => Ok(Command::Status),
        "train" => Ok(Command::Train),
        "random" => Ok(Command::Random),
        "evaluate" => Ok(Command::Evaluate),
        "predict" => {
            let (input, rest) = parse_input(rest)?;
            if !rest.is_empty() {
                return Err(format!("Unexpected arguments: {}", rest.join(" ")));
            }
            Ok(Command::Predict(input))
        }
        "correct" => {
            let (input, rest) = parse_input(rest)?;
            match rest {
                [label] => Ok(Command::Correct {
                    input,
                    label: label.clone(),
                }),
                _ => Err("correct requires an input followed by a label".to_string()),
            }
        }
        "export" => match rest {
            [] => Ok(Command::Export { dir: None }),
            [dir] => Ok(Command::Export {
                dir: Some(PathBuf::from(dir)),
            }),
            _ => Err("export takes at most one directory".to_string()),
        },
        "import" => match rest {
            [architecture, weights] => Ok(Command::Import {
                architecture: PathBuf::from(architecture),
                weights: PathBuf::from(weights),
            }),
            _ => Err("import requires <architecture.json> <weights.bin>".to_string()),
        },
        unknown => Err(format!("Unknown command: {unknown}\n\n{}", help_text())),
    }
}

fn parse_input(args: &[String]) -> Result<(InputArg, &[String]), String> {
    match args {
        [flag, path, rest @ ..] if flag == "--image" => {
            Ok((InputArg::Image(Path::new(path).to_path_buf()), rest))
        }
        [r, g, b, rest @ ..] => {
            let channel = |value: &String| {
                value
                    .parse::<f32>()
                    .ok()
                    .filter(|v| (0.0..=255.0).contains(v))
                    .ok_or_else(|| format!("Invalid channel value: {value} (expected 0-255)"))
            };
            Ok((InputArg::Rgb([channel(r)?, channel(g)?, channel(b)?]), rest))
        }
        _ => Err("Expected `<r> <g> <b>` or `--image <file>`".to_string()),
    }
}

fn help_text() -> String {
    [
        "coachnet",
        "",
        "Trains a small classifier from labeled examples and corrections.",
        "",
        "Usage:",
        "  coachnet [--variant brightness|color|digit] [--config file.toml] [--epochs n] <command>",
        "",
        "Commands:",
        "  status                         Show dataset and model state.",
        "  train                          Retrain on the full dataset.",
        "  predict <r> <g> <b>            Predict a colour input.",
        "  predict --image <file>         Predict a drawing (digit variant).",
        "  random                         Predict a randomly generated colour.",
        "  correct <input> <label>        Add a labeled sample without retraining.",
        "  export [dir]                   Write <variant>.json and <variant>.weights.bin.",
        "  import <arch.json> <weights>   Replace the model with exported files.",
        "  evaluate                       Score the model on the dataset.",
    ]
    .join("\n")
}
