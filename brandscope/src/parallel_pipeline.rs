// THEORY:
// The per-brand distribution pass renders one full heatmap per brand, and the
// brands are independent of each other. `ParallelPipeline` keeps a pool of
// workers fed by a round-robin dispatcher; each brand becomes one task whose
// result comes back over its own oneshot channel. Rendering is CPU-bound, so
// each worker runs its task on the blocking thread pool.
//
// Results are reassembled into a `BTreeMap`, so the output is identical to the
// sequential path regardless of which worker finishes first.

use crate::config::AnalyticsConfig;
use crate::core_modules::brand_distribution::{
    BrandDistributionEntry, BrandDistributionResult, assemble, brand_heatmap_options, check_scores, compose_entry,
    group_by_brand,
};
use crate::core_modules::color_ramp::color_ramp::ColorRamp;
use crate::core_modules::detection::{Detection, Dimensions, VideoMeta};
use crate::core_modules::spatial_heatmap::HeatmapOptions;
use crate::error::{AnalyticsError, Outcome};
use crate::pipeline::{AnalysisReport, AnalyticsPipeline};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

type EntryResult = Result<Outcome<BrandDistributionEntry>, AnalyticsError>;

pub struct BrandTask {
    pub brand: String,
    pub detections: Vec<Detection>,
    pub video: Dimensions,
    pub options: HeatmapOptions,
    pub result_sender: oneshot::Sender<EntryResult>,
}

pub struct WorkerPool {
    task_sender: mpsc::UnboundedSender<BrandTask>,
    workers: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `worker_count` workers. Must be called within a tokio runtime.
    pub fn new(worker_count: usize, ramp: ColorRamp) -> Self {
        let worker_count = worker_count.max(1);
        let ramp = Arc::new(ramp);
        let (task_sender, mut task_receiver) = mpsc::unbounded_channel::<BrandTask>();

        let (worker_senders, worker_receivers): (Vec<_>, Vec<_>) = (0..worker_count)
            .map(|_| mpsc::unbounded_channel::<BrandTask>())
            .unzip();

        // Dispatcher
        tokio::spawn(async move {
            let mut worker_idx = 0;
            while let Some(task) = task_receiver.recv().await {
                let _ = worker_senders[worker_idx].send(task);
                worker_idx = (worker_idx + 1) % worker_count;
            }
        });

        let workers = worker_receivers
            .into_iter()
            .map(|mut worker_receiver| {
                let ramp = Arc::clone(&ramp);
                tokio::spawn(async move {
                    while let Some(task) = worker_receiver.recv().await {
                        let result = Self::process_task(&ramp, task.brand.clone(), task.detections, task.video, task.options).await;
                        if task.result_sender.send(result).is_err() {
                            log::debug!("result for brand {} dropped by caller", task.brand);
                        }
                    }
                })
            })
            .collect();

        Self { task_sender, workers }
    }

    async fn process_task(
        ramp: &Arc<ColorRamp>,
        brand: String,
        detections: Vec<Detection>,
        video: Dimensions,
        options: HeatmapOptions,
    ) -> EntryResult {
        let ramp = Arc::clone(ramp);
        tokio::task::spawn_blocking(move || compose_entry(&detections, video, &options, &ramp))
            .await
            .map_err(|e| AnalyticsError::Worker(format!("brand {brand}: {e}")))
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Queues one brand and waits for its entry.
    pub async fn compose(
        &self,
        brand: String,
        detections: Vec<Detection>,
        video: Dimensions,
        options: HeatmapOptions,
    ) -> EntryResult {
        let (result_sender, result_receiver) = oneshot::channel();
        let task = BrandTask {
            brand: brand.clone(),
            detections,
            video,
            options,
            result_sender,
        };

        self.task_sender
            .send(task)
            .map_err(|_| AnalyticsError::Worker(format!("failed to queue brand {brand}")))?;

        result_receiver
            .await
            .map_err(|_| AnalyticsError::Worker(format!("no result for brand {brand}")))?
    }
}

pub struct ParallelPipeline {
    pipeline: AnalyticsPipeline,
    worker_pool: WorkerPool,
}

impl ParallelPipeline {
    /// One worker per logical CPU. Must be called within a tokio runtime.
    pub fn new(config: AnalyticsConfig) -> Self {
        Self::with_workers(config, num_cpus::get())
    }

    pub fn with_workers(config: AnalyticsConfig, worker_count: usize) -> Self {
        let pipeline = AnalyticsPipeline::new(config);
        let worker_pool = WorkerPool::new(worker_count, pipeline.ramp().clone());
        Self { pipeline, worker_pool }
    }

    pub fn pipeline(&self) -> &AnalyticsPipeline {
        &self.pipeline
    }

    pub fn worker_count(&self) -> usize {
        self.worker_pool.worker_count()
    }

    /// Per-brand heatmaps, one worker task per brand. A brand whose task fails
    /// is left out and the fault is reported in the diagnostics.
    pub async fn render_brand_distribution(
        &self,
        detections: &[Detection],
        video: &VideoMeta,
    ) -> Outcome<BrandDistributionResult> {
        if detections.is_empty() {
            return Outcome::clean(BrandDistributionResult::empty());
        }
        if let Err(err) = check_scores(detections) {
            log::error!("error generating brand distribution heatmap: {err}");
            return Outcome::degraded(BrandDistributionResult::empty(), err);
        }

        let dims = video.dimensions();
        let options = brand_heatmap_options(self.pipeline.config().distribution_grid_size);
        let groups = group_by_brand(detections);
        log::debug!("rendering {} brands on {} workers", groups.len(), self.worker_count());

        let pending = groups.into_iter().map(|(brand, group)| {
            let options = options.clone();
            async move {
                let result = self.worker_pool.compose(brand.clone(), group, dims, options).await;
                (brand, result)
            }
        });

        let mut failures = Vec::new();
        let mut entries = Vec::new();
        for (brand, result) in join_all(pending).await {
            match result {
                Ok(entry) => entries.push((brand, entry)),
                Err(err) => {
                    log::error!("error generating brand distribution heatmap: {err}");
                    failures.push(err);
                }
            }
        }

        let mut outcome = assemble(entries, detections.len(), dims);
        outcome.diagnostics.extend(failures);
        outcome
    }

    /// `AnalyticsPipeline::generate_report` with the brand distribution computed
    /// on the worker pool.
    pub async fn generate_report(
        &self,
        detections: &[Detection],
        video: &VideoMeta,
        file_id: i64,
        brand_filter: Option<&str>,
    ) -> AnalysisReport {
        let distribution = self.render_brand_distribution(detections, video).await;
        self.pipeline
            .assemble_report(detections, video, file_id, brand_filter, distribution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(brand: &str, cx: f64, cy: f64, score: f64) -> Detection {
        Detection::new([cx - 5.0, cy - 5.0, cx + 5.0, cy + 5.0], score, brand, 0)
    }

    fn detections() -> Vec<Detection> {
        vec![
            det("Nike", 45.0, 45.0, 0.9),
            det("Adidas", 255.0, 105.0, 0.6),
            det("Pepsi", 150.0, 75.0, 0.7),
            det("Nike", 46.0, 44.0, 0.7),
            det("", 10.0, 10.0, 0.5),
        ]
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn matches_sequential_distribution() {
        let parallel = ParallelPipeline::with_workers(AnalyticsConfig::default(), 3);
        assert_eq!(parallel.worker_count(), 3);
        let video = VideoMeta::new(300, 150, 10.0, 1.0);

        let concurrent = parallel.render_brand_distribution(&detections(), &video).await;
        let sequential = parallel.pipeline().render_brand_distribution(&detections(), &video);
        assert!(!concurrent.is_degraded());

        let (a, b) = (concurrent.value, sequential.value);
        assert_eq!(a.total_brands, 4);
        assert_eq!(a.total_detections, b.total_detections);
        assert_eq!(a.brand_data.keys().collect::<Vec<_>>(), b.brand_data.keys().collect::<Vec<_>>());
        for (brand, entry) in &a.brand_data {
            let other = &b.brand_data[brand];
            assert_eq!(entry.detection_count, other.detection_count);
            assert_eq!(entry.positions, other.positions);
            assert_eq!(entry.heatmap_data.intensity_matrix, other.heatmap_data.intensity_matrix);
            assert_eq!(entry.heatmap_data.heatmap_image, other.heatmap_data.heatmap_image);
        }
    }

    #[tokio::test]
    async fn bad_scores_degrade_to_empty() {
        let parallel = ParallelPipeline::with_workers(AnalyticsConfig::default(), 2);
        let video = VideoMeta::new(300, 150, 10.0, 1.0);
        let outcome = parallel
            .render_brand_distribution(&[det("Nike", 5.0, 5.0, f64::INFINITY)], &video)
            .await;
        assert!(outcome.is_degraded());
        assert_eq!(outcome.value.total_brands, 0);
    }

    #[tokio::test]
    async fn report_uses_worker_distribution() {
        let parallel = ParallelPipeline::with_workers(AnalyticsConfig::default(), 2);
        let video = VideoMeta::new(300, 150, 10.0, 1.0);
        let report = parallel.generate_report(&detections(), &video, 4, Some("nike")).await;
        assert_eq!(report.brand_distribution.total_brands, 4);
        assert_eq!(report.heatmap.statistics.total_detections, 2);
        assert_eq!(report.statistics["Unknown"].total_detections, 1);
        assert!(report.diagnostics.is_empty());
    }
}
