use std::path::{Path, PathBuf};
use std::process::ExitCode;

use burn::{backend::Autodiff, config::Config};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use voc_ssd::{
    config::{Commands, MultiBoxConfig, SSDCmd, SubCommandInfer, SubCommandTrain, TrainingConfig},
    error::{Result, SsdError},
    inference::{self, DetectThresholds, Detector},
    training::{self, CONFIG_NAME, TrainPaths},
    voc::VocLabels,
};

#[cfg(not(feature = "tch"))]
mod backend {
    use burn::backend::{NdArray, ndarray::NdArrayDevice};

    pub type Backend = NdArray<f32>;

    pub fn device(gpu: i32) -> NdArrayDevice {
        if gpu >= 0 {
            tracing::warn!(gpu, "built without the tch feature, running on the CPU");
        }
        NdArrayDevice::Cpu
    }
}

#[cfg(feature = "tch")]
mod backend {
    use burn::backend::{LibTorch, libtorch::LibTorchDevice};

    pub type Backend = LibTorch<f32>;

    pub fn device(gpu: i32) -> LibTorchDevice {
        if gpu >= 0 {
            LibTorchDevice::Cuda(gpu as usize)
        } else {
            LibTorchDevice::Cpu
        }
    }
}

fn load_config(path: Option<&str>) -> Result<TrainingConfig> {
    match path {
        Some(path) => TrainingConfig::load(path)
            .map_err(|e| SsdError::Config(format!("{path}: {e}"))),
        None => Ok(TrainingConfig::ssd300()),
    }
}

fn run_train(args: SubCommandTrain) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;

    if let Some(batch_size) = args.batchsize {
        config.batch_size = batch_size;
    }
    if let Some(num_workers) = args.loaderjob {
        config.num_workers = num_workers;
    }

    let labels = VocLabels::from_arg(args.classes.as_deref())?;
    let device = backend::device(args.gpu);

    info!(
        classes = ?labels.names(),
        batch_size = config.batch_size,
        workers = config.num_workers,
        "starting training"
    );

    let paths = TrainPaths {
        root: PathBuf::from(args.root),
        split: args.split,
        out: PathBuf::from(args.out),
    };

    training::train::<Autodiff<backend::Backend>>(config, &device, labels, &paths, args.resume)?;

    Ok(())
}

fn run_infer(args: SubCommandInfer) -> Result<()> {
    let labels = VocLabels::from_arg(args.classes.as_deref())?;
    let device = backend::device(args.gpu);
    let model = Path::new(&args.model);

    // anchors follow the config stored next to the snapshot when there is one
    let multibox = match model.parent().map(|dir| dir.join(CONFIG_NAME)) {
        Some(path) if path.exists() => load_config(path.to_str())?.multibox,
        _ => MultiBoxConfig::ssd300(),
    };

    let detector = Detector::<backend::Backend>::from_file(model, &labels, multibox, &device)?;

    inference::infer(
        &detector,
        Path::new(&args.image),
        Path::new(&args.out),
        &labels,
        DetectThresholds {
            nms: args.nms_threshold,
            score: args.score_threshold,
        },
    )?;

    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli_cmd: SSDCmd = argh::from_env();

    let result = match cli_cmd.commands {
        Commands::Train(args) => run_train(args),
        Commands::Infer(args) => run_infer(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "failed");
            ExitCode::FAILURE
        }
    }
}
