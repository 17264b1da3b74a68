use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use burn::{
    data::{dataloader::DataLoaderBuilder, dataset::Dataset},
    module::Module,
    optim::{GradientsParams, Optimizer},
    prelude::*,
    record::CompactRecorder,
    tensor::{backend::AutodiffBackend, cast::ToElement},
};
use tracing::{debug, info, warn};

use crate::{
    config::{SIZE, TrainingConfig},
    data::SSDBatcher,
    dataset::VocDataset,
    error::{Result, SsdError},
    loss::{NEG_POS_RATIO, calculate_loss},
    models::ssd::SSD,
    multibox::MultiBoxEncoder,
    stats::LogReport,
    voc::VocLabels,
};

pub const CONFIG_NAME: &str = "config.json";

/// Where a training run reads its data and writes its results.
#[derive(Debug, Clone)]
pub struct TrainPaths {
    /// VOC root with `Annotations/`, `ImageSets/Main/` and `JPEGImages/`.
    pub root: PathBuf,
    pub split: String,
    /// Receives `config.json`, the `log` and the `model_iter_<n>` snapshots.
    pub out: PathBuf,
}

/// Path of the snapshot taken after `iteration` updates.
pub fn snapshot_path(out: &Path, iteration: usize) -> PathBuf {
    out.join(format!("model_iter_{iteration}"))
}

fn save_snapshot<B: Backend>(model: &SSD<B>, out: &Path, iteration: usize) -> Result<PathBuf> {
    let path = snapshot_path(out, iteration);

    model
        .clone()
        .save_file(path.clone(), &CompactRecorder::new())
        .map_err(|e| SsdError::Recorder {
            path: path.clone(),
            msg: format!("{e:?}"),
        })?;

    info!(iteration, path = %path.display(), "snapshot saved");

    Ok(path)
}

/// Reads the scalar loss of an update, failing when it is NaN or infinite.
pub fn finite_loss<B: Backend>(total: &Tensor<B, 1>, iteration: usize) -> Result<f32> {
    let total = total.clone().into_scalar().to_f32();

    if total.is_finite() {
        Ok(total)
    } else {
        Err(SsdError::NonFiniteLoss { iteration })
    }
}

/// Trains an SSD300 for `config.iterations` updates and returns the final model.
///
/// With `resume`, the weights of `model_iter_<resume>` in the output directory are loaded
/// and the iteration count continues from there. The optimizer state is not part of a
/// snapshot, so momentum starts over.
pub fn train<B: AutodiffBackend>(
    config: TrainingConfig,
    device: &B::Device,
    labels: VocLabels,
    paths: &TrainPaths,
    resume: Option<usize>,
) -> Result<SSD<B>> {
    let out = paths.out.as_path();
    fs::create_dir_all(out).map_err(|e| SsdError::io(out, e))?;

    let config_path = out.join(CONFIG_NAME);
    config
        .save(&config_path)
        .map_err(|e| SsdError::io(&config_path, e))?;

    let encoder = Arc::new(MultiBoxEncoder::new(config.multibox.clone())?);
    let cls_cnt = labels.count();

    let mut model = match resume {
        Some(iteration) => {
            let path = snapshot_path(out, iteration);
            SSD::<B>::from_file(&path, device, cls_cnt, encoder.n_anchors())?
        }
        None => SSD::<B>::new(device, cls_cnt, encoder.n_anchors()),
    };

    B::seed(config.seed);

    let mut optim = config.optimizer.init();

    let dataset = VocDataset::new(&paths.root, &paths.split, labels)?
        .with_difficult(config.use_difficult);
    let n_samples = dataset.len();

    let batcher = SSDBatcher::new(encoder.clone(), SIZE)
        .with_flip_prob(config.flip_prob)
        .with_seed(config.seed);

    let dataloader = DataLoaderBuilder::new(batcher)
        .set_device(device.clone())
        .batch_size(config.batch_size)
        .shuffle(config.seed)
        .num_workers(config.num_workers)
        .build(dataset);

    let mut report = LogReport::new(out, resume)?;

    let mut iteration = resume.unwrap_or(0);
    let mut epoch = iteration * config.batch_size / n_samples;
    let mut last_snapshot = resume;

    info!(
        samples = n_samples,
        classes = cls_cnt,
        anchors = encoder.len(),
        start = iteration,
        iterations = config.iterations,
        "training"
    );

    'training: while iteration < config.iterations {
        epoch += 1;
        let mut updated = false;

        for batch in dataloader.iter() {
            if batch.images.dims()[0] == 0 {
                warn!(epoch, "skipping empty minibatch");
                continue;
            }

            let (pred_loc, pred_conf) = model.forward(batch.images);
            let loss = calculate_loss(pred_loc, pred_conf, batch.loc, batch.conf, NEG_POS_RATIO);

            iteration += 1;
            updated = true;

            let total = finite_loss(&loss.total, iteration)?;

            debug!(iteration, loss = total, ids = ?batch.ids, "minibatch");

            report.update(&loss);

            let grads = loss.total.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optim.step(config.learning_rate, model, grads);

            if iteration % config.log_interval.max(1) == 0 {
                report.report(epoch, iteration, config.learning_rate)?;
            }

            if iteration % config.snapshot_interval.max(1) == 0 {
                save_snapshot(&model, out, iteration)?;
                last_snapshot = Some(iteration);
            }

            if iteration >= config.iterations {
                break 'training;
            }
        }

        if !updated {
            return Err(SsdError::EmptyDataset(paths.root.clone()));
        }
    }

    report.report(epoch, iteration, config.learning_rate)?;

    if last_snapshot != Some(iteration) {
        save_snapshot(&model, out, iteration)?;
    }

    Ok(model)
}
