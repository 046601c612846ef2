use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::classification::domain::attribute_classifier::ClassifierSet;
use crate::classification::domain::classification_result::{ClassificationResult, LabelCandidate};
use crate::classification::domain::classifier_kind::ClassifierKind;
use crate::detection::domain::region_detector::RegionDetector;
use crate::inference::domain::cycle_phase::{Admission, CyclePhase};
use crate::inference::domain::frame_result_set::FrameResultSet;
use crate::inference::domain::session_stats::SessionStats;
use crate::inference::infrastructure::permit_pool::{Permit, PermitPool};
use crate::inference::infrastructure::result_snapshot::ResultSnapshot;
use crate::inference::infrastructure::worker_pool::WorkerPool;
use crate::pipeline::pipeline_logger::{NullPipelineLogger, PipelineLogger};
use crate::rendering::domain::render_source::RenderSource;
use crate::shared::constants::DEFAULT_CLASSIFICATION_PERMITS;
use crate::shared::face_region::FaceRegion;
use crate::shared::frame::Frame;
use crate::shared::pipeline_fault::{PipelineFault, SendError};
use crate::shared::settings::PipelineSettings;

/// Sizing and timeout knobs for a coordinator.
#[derive(Clone, Debug, PartialEq)]
pub struct CoordinatorConfig {
    /// Classification tasks allowed to run at once (K).
    pub permits: usize,
    /// Raised to `permits + 1` if lower, so the detection job blocked on
    /// permits never occupies the last free worker.
    pub worker_threads: usize,
    pub stall_timeout: Option<Duration>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            permits: DEFAULT_CLASSIFICATION_PERMITS,
            worker_threads: DEFAULT_CLASSIFICATION_PERMITS + 1,
            stall_timeout: None,
        }
    }
}

impl From<&PipelineSettings> for CoordinatorConfig {
    fn from(settings: &PipelineSettings) -> Self {
        Self {
            permits: settings.classification_permits,
            worker_threads: settings.effective_worker_threads(),
            stall_timeout: settings.stall_timeout(),
        }
    }
}

/// Admission control and fan-out/fan-in for the per-frame inference cycle.
///
/// At most one cycle is in flight. A frame offered while the in-flight
/// counter is non-zero is dropped, though it still becomes the frame the
/// compositor shows. An admitted frame runs detection on the worker pool,
/// then one gender and one race task per detected region, each gated by a
/// session-wide permit pool. When the counter returns to zero the cycle's
/// [`FrameResultSet`] is published.
///
/// All bookkeeping happens under one mutex. Completions are tagged with the
/// epoch of the cycle that spawned them; anything from an older epoch is
/// discarded, which is what makes abandoning a stalled cycle safe.
///
/// Cloning yields another handle to the same coordinator.
#[derive(Clone)]
pub struct InferenceCoordinator {
    shared: Arc<Shared>,
}

struct Shared {
    detector: Arc<dyn RegionDetector>,
    classifiers: ClassifierSet,
    permits: PermitPool,
    pool: WorkerPool,
    snapshot: ResultSnapshot,
    stall_timeout: Option<Duration>,
    state: Mutex<State>,
    quiescent: Condvar,
}

struct State {
    in_flight: usize,
    phase: CyclePhase,
    epoch: u64,
    current_frame: Option<Arc<Frame>>,
    cycle: Option<Cycle>,
    stats: SessionStats,
    logger: Box<dyn PipelineLogger>,
}

/// Accumulators for the cycle in flight.
struct Cycle {
    frame: Arc<Frame>,
    started: Instant,
    regions: Vec<FaceRegion>,
    gender: Vec<Option<ClassificationResult>>,
    race: Vec<Option<ClassificationResult>>,
}

impl Cycle {
    fn new(frame: Arc<Frame>) -> Self {
        Self {
            frame,
            started: Instant::now(),
            regions: Vec::new(),
            gender: Vec::new(),
            race: Vec::new(),
        }
    }

    /// Clears the previous accumulators and sizes them for `regions`.
    fn reset(&mut self, regions: &[FaceRegion]) {
        self.regions = regions.to_vec();
        self.gender = vec![None; regions.len()];
        self.race = vec![None; regions.len()];
    }

    fn slot(&mut self, kind: ClassifierKind) -> &mut Vec<Option<ClassificationResult>> {
        match kind {
            ClassifierKind::Gender => &mut self.gender,
            ClassifierKind::Race => &mut self.race,
        }
    }
}

impl InferenceCoordinator {
    pub fn new(
        detector: Arc<dyn RegionDetector>,
        classifiers: ClassifierSet,
        config: CoordinatorConfig,
    ) -> std::io::Result<Self> {
        Self::with_logger(detector, classifiers, config, Box::new(NullPipelineLogger))
    }

    pub fn with_logger(
        detector: Arc<dyn RegionDetector>,
        classifiers: ClassifierSet,
        config: CoordinatorConfig,
        logger: Box<dyn PipelineLogger>,
    ) -> std::io::Result<Self> {
        let permits = PermitPool::new(config.permits);
        let workers = config.worker_threads.max(permits.capacity() + 1);
        let pool = WorkerPool::new(workers, "inference")?;
        log::info!(
            "Inference coordinator: {} classification permit(s), {workers} worker(s), stall timeout {:?}",
            permits.capacity(),
            config.stall_timeout
        );

        Ok(Self {
            shared: Arc::new(Shared {
                detector,
                classifiers,
                permits,
                pool,
                snapshot: ResultSnapshot::new(),
                stall_timeout: config.stall_timeout,
                state: Mutex::new(State {
                    in_flight: 0,
                    phase: CyclePhase::Idle,
                    epoch: 0,
                    current_frame: None,
                    cycle: None,
                    stats: SessionStats::default(),
                    logger,
                }),
                quiescent: Condvar::new(),
            }),
        })
    }

    /// Offers a frame. Never blocks on inference work.
    ///
    /// A well-formed frame always becomes the current frame. It is analysed
    /// only when nothing is in flight; otherwise it is dropped without
    /// touching the counter or the published results. A frame whose buffer
    /// does not match its dimensions is dropped and never displayed.
    pub fn submit_frame(&self, frame: Frame) -> Admission {
        let shared = &self.shared;
        if !frame.is_well_formed() {
            log::warn!(
                "Rejected frame {}: {} byte(s) for {}x{}x{}",
                frame.sequence_id(),
                frame.data().len(),
                frame.width(),
                frame.height(),
                frame.channels()
            );
            let mut state = shared.lock();
            state.stats.dropped += 1;
            state.logger.admission(Admission::Dropped);
            return Admission::Dropped;
        }
        let frame = Arc::new(frame);
        let mut state = shared.lock();
        state.current_frame = Some(Arc::clone(&frame));

        if state.in_flight > 0 && !shared.abandon_if_stalled(&mut state) {
            state.stats.dropped += 1;
            state.logger.admission(Admission::Dropped);
            log::debug!(
                "Dropped frame {} ({} unit(s) in flight, {})",
                frame.sequence_id(),
                state.in_flight,
                state.phase
            );
            return Admission::Dropped;
        }

        state.epoch += 1;
        let epoch = state.epoch;
        state.in_flight = 1;
        state.phase = CyclePhase::Admitted;
        state.cycle = Some(Cycle::new(Arc::clone(&frame)));
        state.stats.admitted += 1;
        state.logger.admission(Admission::Admitted);
        drop(state);

        log::debug!("Admitted frame {} as cycle {epoch}", frame.sequence_id());

        let worker = Arc::clone(shared);
        let job_frame = Arc::clone(&frame);
        if let Err(e) = shared
            .pool
            .execute(move || worker.run_detection(epoch, job_frame))
        {
            shared.on_detection_complete(epoch, &frame, Err(e.into()), Duration::ZERO);
        }
        Admission::Admitted
    }

    /// Blocks until the in-flight counter is zero or `timeout` elapses.
    /// Returns whether the coordinator is quiescent.
    pub fn wait_for_quiescence(&self, timeout: Duration) -> bool {
        let state = self.shared.lock();
        let (state, _) = self
            .shared
            .quiescent
            .wait_timeout_while(state, timeout, |s| s.in_flight > 0)
            .unwrap_or_else(PoisonError::into_inner);
        state.in_flight == 0
    }

    /// Outstanding units of work (detection plus classification).
    pub fn in_flight(&self) -> usize {
        self.shared.lock().in_flight
    }

    pub fn phase(&self) -> CyclePhase {
        self.shared.lock().phase
    }

    pub fn current_frame(&self) -> Option<Arc<Frame>> {
        self.shared.lock().current_frame.clone()
    }

    pub fn latest_results(&self) -> Option<Arc<FrameResultSet>> {
        self.shared.snapshot.latest()
    }

    /// Number of result sets published so far.
    pub fn results_version(&self) -> u64 {
        self.shared.snapshot.version()
    }

    pub fn stats(&self) -> SessionStats {
        self.shared.lock().stats
    }

    pub fn permit_capacity(&self) -> usize {
        self.shared.permits.capacity()
    }

    /// Permits not held by a running classification task.
    pub fn permits_available(&self) -> usize {
        self.shared.permits.available()
    }

    /// Runs `f` against the session logger, under the coordinator lock.
    pub fn with_pipeline_logger<R>(&self, f: impl FnOnce(&mut dyn PipelineLogger) -> R) -> R {
        let mut state = self.shared.lock();
        f(state.logger.as_mut())
    }
}

impl RenderSource for InferenceCoordinator {
    fn current_frame(&self) -> Option<Arc<Frame>> {
        InferenceCoordinator::current_frame(self)
    }

    fn latest_results(&self) -> Option<Arc<FrameResultSet>> {
        InferenceCoordinator::latest_results(self)
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Force-resets a cycle that has been in flight past the stall timeout.
    /// Nothing partial is published. Returns whether the cycle was abandoned.
    fn abandon_if_stalled(&self, state: &mut State) -> bool {
        let Some(timeout) = self.stall_timeout else {
            return false;
        };
        let Some(cycle) = state.cycle.as_ref() else {
            return false;
        };
        let stalled_for = cycle.started.elapsed();
        if stalled_for < timeout {
            return false;
        }
        // Stuck jobs keep their worker and permit after abandonment. With
        // none left over, a new cycle could not run and would only queue.
        if self.permits.available() == 0 || !self.pool.has_idle_worker() {
            log::debug!(
                "Cycle for frame {} stalled but still holds all inference capacity",
                cycle.frame.sequence_id()
            );
            return false;
        }

        log::warn!(
            "Abandoning inference cycle for frame {} after {:.0}ms with {} unit(s) in flight",
            cycle.frame.sequence_id(),
            stalled_for.as_secs_f64() * 1000.0,
            state.in_flight
        );
        state.stats.abandoned += 1;
        state.logger.info("Abandoned a stalled inference cycle");
        state.cycle = None;
        state.in_flight = 0;
        state.phase = CyclePhase::Idle;
        self.quiescent.notify_all();
        true
    }

    fn run_detection(self: Arc<Self>, epoch: u64, frame: Arc<Frame>) {
        {
            let mut state = self.lock();
            if state.epoch != epoch {
                return;
            }
            state.phase = CyclePhase::Detecting;
        }

        let started = Instant::now();
        let detector = Arc::clone(&self.detector);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| detector.detect(&frame)))
            .unwrap_or_else(|_| Err("face detector panicked".into()));
        self.on_detection_complete(epoch, &frame, outcome, started.elapsed());
    }

    /// Fans a detection result out into classification tasks.
    ///
    /// Runs on a worker. Each task first takes a permit (blocking while K
    /// tasks run) and only then bumps the counter. Detection's own unit is
    /// released after the last submission, so the counter cannot touch zero
    /// while the fan-out is still in progress.
    fn on_detection_complete(
        self: &Arc<Self>,
        epoch: u64,
        frame: &Arc<Frame>,
        outcome: Result<Vec<FaceRegion>, SendError>,
        elapsed: Duration,
    ) {
        let mut state = self.lock();
        if state.epoch != epoch || state.cycle.is_none() {
            log::debug!("Discarding detection result for abandoned frame {}", frame.sequence_id());
            return;
        }

        let regions = match outcome {
            Ok(regions) => regions,
            Err(e) => {
                PipelineFault::DetectionFailure {
                    sequence_id: frame.sequence_id(),
                    message: e.to_string(),
                }
                .log();
                state.stats.detection_failures += 1;
                Vec::new()
            }
        };

        state.logger.timing("detect", elapsed.as_secs_f64() * 1000.0);
        state.logger.metric("faces", regions.len() as f64);
        if let Some(cycle) = state.cycle.as_mut() {
            cycle.reset(&regions);
        }

        if regions.is_empty() {
            state.in_flight -= 1;
            self.finish_cycle(&mut state);
            return;
        }
        state.phase = CyclePhase::Classifying;
        drop(state);

        'fan_out: for (index, region) in regions.iter().enumerate() {
            for kind in ClassifierKind::ALL {
                let permit = match self.permits.acquire() {
                    Ok(permit) => permit,
                    Err(e) => {
                        log::error!("Classification permits unavailable: {e}");
                        break 'fan_out;
                    }
                };

                {
                    let mut state = self.lock();
                    if state.epoch != epoch {
                        // Cycle was abandoned while we waited for the permit.
                        return;
                    }
                    state.in_flight += 1;
                }

                let worker = Arc::clone(self);
                let job_frame = Arc::clone(frame);
                let region = *region;
                let submitted = self.pool.execute(move || {
                    worker.run_classification(epoch, job_frame, index, region, kind, permit)
                });
                if let Err(e) = submitted {
                    // The job and its permit were dropped with the closure.
                    let mut state = self.lock();
                    self.settle_classification(
                        &mut state,
                        epoch,
                        frame.sequence_id(),
                        index,
                        region,
                        kind,
                        Err(e.into()),
                    );
                }
            }
        }

        let mut state = self.lock();
        if state.epoch != epoch {
            return;
        }
        state.in_flight -= 1;
        if state.in_flight == 0 {
            self.finish_cycle(&mut state);
        }
    }

    fn run_classification(
        self: Arc<Self>,
        epoch: u64,
        frame: Arc<Frame>,
        index: usize,
        region: FaceRegion,
        kind: ClassifierKind,
        permit: Permit,
    ) {
        let started = Instant::now();
        let classifiers = &self.classifiers;
        // The crop runs under the same guard: a unit must settle whatever
        // happens inside it.
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            match frame.crop(region.to_pixel_rect(frame.width(), frame.height())) {
                Some(face) => classifiers.classify(kind, &face),
                None => Err("face region crops to nothing".into()),
            }
        }))
        .unwrap_or_else(|_| Err(format!("{kind} classification panicked").into()));
        self.on_classifier_complete(epoch, frame.sequence_id(), index, region, kind, outcome, started.elapsed(), permit);
    }

    /// Records one classification outcome and releases its permit and unit.
    #[allow(clippy::too_many_arguments)]
    fn on_classifier_complete(
        &self,
        epoch: u64,
        sequence_id: u64,
        index: usize,
        region: FaceRegion,
        kind: ClassifierKind,
        outcome: Result<Vec<LabelCandidate>, SendError>,
        elapsed: Duration,
        permit: Permit,
    ) {
        let mut state = self.lock();
        drop(permit);
        if state.epoch == epoch {
            state.logger.timing("classify", elapsed.as_secs_f64() * 1000.0);
        }
        self.settle_classification(&mut state, epoch, sequence_id, index, region, kind, outcome);
    }

    #[allow(clippy::too_many_arguments)]
    fn settle_classification(
        &self,
        state: &mut State,
        epoch: u64,
        sequence_id: u64,
        index: usize,
        region: FaceRegion,
        kind: ClassifierKind,
        outcome: Result<Vec<LabelCandidate>, SendError>,
    ) {
        if state.epoch != epoch {
            log::debug!("Discarding late {kind} result for region {index} of frame {sequence_id}");
            return;
        }

        match outcome {
            Ok(candidates) => {
                let result = ClassificationResult::from_candidates(index, region, kind, &candidates);
                if result.is_none() {
                    log::debug!("{kind} classifier had no usable label for region {index} of frame {sequence_id}");
                }
                if let Some(slot) = state
                    .cycle
                    .as_mut()
                    .and_then(|cycle| cycle.slot(kind).get_mut(index))
                {
                    *slot = result;
                }
            }
            Err(e) => {
                PipelineFault::ClassificationFailure {
                    sequence_id,
                    region_index: index,
                    kind,
                    message: e.to_string(),
                }
                .log();
                state.stats.classification_failures += 1;
            }
        }

        match state.in_flight.checked_sub(1) {
            Some(remaining) => state.in_flight = remaining,
            None => {
                log::error!("In-flight counter underflow on frame {sequence_id}");
                state.in_flight = 0;
            }
        }
        if state.in_flight == 0 {
            self.finish_cycle(state);
        }
    }

    /// Publishes the completed cycle and returns to idle.
    fn finish_cycle(&self, state: &mut State) {
        if let Some(cycle) = state.cycle.take() {
            let set = FrameResultSet::assemble(
                cycle.frame.sequence_id(),
                &cycle.regions,
                &cycle.gender,
                &cycle.race,
            );
            log::debug!(
                "Frame {} resolved: {} face(s), {} unresolved",
                set.sequence_id(),
                set.len(),
                set.unresolved()
            );
            self.snapshot.publish(Arc::new(set));
            state.stats.completed += 1;
            state
                .logger
                .timing("cycle", cycle.started.elapsed().as_secs_f64() * 1000.0);
        }
        state.phase = CyclePhase::Idle;
        self.quiescent.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classification::domain::attribute_classifier::AttributeClassifier;
    use crossbeam_channel::{Receiver, Sender};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const WAIT: Duration = Duration::from_secs(5);

    // --- Stubs ---

    /// Returns a fixed list of regions, optionally parking on a gate first.
    struct StubDetector {
        regions: Vec<FaceRegion>,
        gate: Option<Receiver<()>>,
        fail: bool,
        calls: AtomicUsize,
    }

    impl StubDetector {
        fn new(regions: Vec<FaceRegion>) -> Self {
            Self {
                regions,
                gate: None,
                fail: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn gated(regions: Vec<FaceRegion>) -> (Self, Sender<()>) {
            let (tx, rx) = crossbeam_channel::unbounded();
            let mut detector = Self::new(regions);
            detector.gate = Some(rx);
            (detector, tx)
        }

        fn failing() -> Self {
            let mut detector = Self::new(Vec::new());
            detector.fail = true;
            detector
        }
    }

    impl RegionDetector for StubDetector {
        fn detect(&self, _frame: &Frame) -> Result<Vec<FaceRegion>, SendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.recv_timeout(WAIT).map_err(|e| e.to_string())?;
            }
            if self.fail {
                return Err("detector offline".into());
            }
            Ok(self.regions.clone())
        }
    }

    /// Labels a face by the red value of its top-left pixel, so each region
    /// of a test frame can be painted to get a chosen answer.
    struct PixelClassifier {
        labels: &'static [&'static str],
        gate: Option<Receiver<()>>,
        fail_on: Option<u8>,
    }

    impl PixelClassifier {
        fn new(labels: &'static [&'static str]) -> Self {
            Self {
                labels,
                gate: None,
                fail_on: None,
            }
        }
    }

    impl AttributeClassifier for PixelClassifier {
        fn classify(&self, face: &Frame) -> Result<Vec<LabelCandidate>, SendError> {
            if let Some(gate) = &self.gate {
                let _ = gate.recv_timeout(WAIT);
            }

            let value = face.data()[0];
            if self.fail_on == Some(value) {
                return Err("model rejected crop".into());
            }
            let pick = value as usize % self.labels.len();
            Ok(self
                .labels
                .iter()
                .enumerate()
                .map(|(i, l)| LabelCandidate::new(*l, if i == pick { 0.75 } else { 0.25 }))
                .collect())
        }
    }

    const GENDERS: &[&str] = &["Woman", "Man"];
    const RACES: &[&str] = &["asian", "white"];

    /// Left half painted 0, right half painted 1.
    fn two_tone_frame(sequence_id: u64) -> Frame {
        let mut frame = Frame::filled(8, 8, 3, 0, sequence_id);
        for y in 0..8usize {
            for x in 4..8usize {
                frame.data_mut()[(y * 8 + x) * 3] = 1;
            }
        }
        frame
    }

    fn left_face() -> FaceRegion {
        FaceRegion::new(0.0, 0.0, 0.5, 0.5, 1)
    }

    fn right_face() -> FaceRegion {
        FaceRegion::new(0.5, 0.5, 0.5, 0.5, 1)
    }

    fn config(permits: usize) -> CoordinatorConfig {
        CoordinatorConfig {
            permits,
            worker_threads: permits + 1,
            stall_timeout: None,
        }
    }

    fn coordinator(
        detector: StubDetector,
        gender: PixelClassifier,
        race: PixelClassifier,
        permits: usize,
    ) -> InferenceCoordinator {
        InferenceCoordinator::new(
            Arc::new(detector),
            ClassifierSet::new(Arc::new(gender), Arc::new(race)),
            config(permits),
        )
        .unwrap()
    }

    fn plain(regions: Vec<FaceRegion>) -> InferenceCoordinator {
        coordinator(
            StubDetector::new(regions),
            PixelClassifier::new(GENDERS),
            PixelClassifier::new(RACES),
            2,
        )
    }

    // --- Admission ---

    #[test]
    fn test_idle_coordinator_admits() {
        let coord = plain(Vec::new());
        assert_eq!(coord.in_flight(), 0);
        assert!(coord.phase().is_idle());
        assert_eq!(coord.submit_frame(two_tone_frame(1)), Admission::Admitted);
        assert!(coord.wait_for_quiescence(WAIT));
    }

    #[test]
    fn test_frame_during_cycle_is_dropped_but_displayed() {
        let (detector, release) = StubDetector::gated(vec![left_face()]);
        let coord = coordinator(detector, PixelClassifier::new(GENDERS), PixelClassifier::new(RACES), 2);

        assert_eq!(coord.submit_frame(two_tone_frame(1)), Admission::Admitted);
        assert_eq!(coord.in_flight(), 1);
        assert_eq!(coord.submit_frame(two_tone_frame(2)), Admission::Dropped);
        assert_eq!(coord.in_flight(), 1);
        assert_eq!(coord.current_frame().unwrap().sequence_id(), 2);

        release.send(()).unwrap();
        assert!(coord.wait_for_quiescence(WAIT));
        // Results belong to the admitted frame, not the displayed one.
        assert_eq!(coord.latest_results().unwrap().sequence_id(), 1);

        let stats = coord.stats();
        assert_eq!(stats.admitted, 1);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.completed, 1);
    }

    #[test]
    fn test_admits_again_after_quiescence() {
        let coord = plain(vec![left_face()]);
        assert!(coord.submit_frame(two_tone_frame(1)).is_admitted());
        assert!(coord.wait_for_quiescence(WAIT));
        assert!(coord.submit_frame(two_tone_frame(2)).is_admitted());
        assert!(coord.wait_for_quiescence(WAIT));
        assert_eq!(coord.latest_results().unwrap().sequence_id(), 2);
        assert_eq!(coord.results_version(), 2);
    }

    #[test]
    fn test_nothing_published_before_first_cycle() {
        let coord = plain(Vec::new());
        assert!(coord.latest_results().is_none());
        assert!(coord.current_frame().is_none());
    }

    // --- Fan-out / fan-in ---

    #[test]
    fn test_zero_regions_publishes_empty_set() {
        let coord = plain(Vec::new());
        coord.submit_frame(two_tone_frame(5));
        assert!(coord.wait_for_quiescence(WAIT));

        let set = coord.latest_results().unwrap();
        assert_eq!(set.sequence_id(), 5);
        assert!(set.is_empty());
        assert_eq!(coord.in_flight(), 0);
        assert!(coord.phase().is_idle());
    }

    #[test]
    fn test_labels_attach_to_their_own_region() {
        let coord = plain(vec![left_face(), right_face()]);
        coord.submit_frame(two_tone_frame(1));
        assert!(coord.wait_for_quiescence(WAIT));

        let set = coord.latest_results().unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.unresolved(), 0);

        let left = &set.faces()[0];
        assert_eq!(left.index, 0);
        assert_eq!(left.region, left_face());
        assert_eq!(left.gender.label, "Woman");
        assert_eq!(left.race.label, "asian");
        assert_eq!(left.gender.kind, ClassifierKind::Gender);

        let right = &set.faces()[1];
        assert_eq!(right.index, 1);
        assert_eq!(right.gender.label, "Man");
        assert_eq!(right.race.label, "white");
        assert_eq!(right.race.region_index, 1);
    }

    #[test]
    fn test_counter_returns_to_zero_and_permits_return() {
        let coord = plain(vec![left_face(), right_face(), left_face()]);
        coord.submit_frame(two_tone_frame(1));
        assert!(coord.wait_for_quiescence(WAIT));
        assert_eq!(coord.in_flight(), 0);
        assert_eq!(coord.permits_available(), coord.permit_capacity());
    }

    /// Reports each finished call on a channel.
    struct Signalling {
        inner: PixelClassifier,
        done: Sender<()>,
    }

    impl AttributeClassifier for Signalling {
        fn classify(&self, face: &Frame) -> Result<Vec<LabelCandidate>, SendError> {
            let result = self.inner.classify(face);
            let _ = self.done.send(());
            result
        }
    }

    #[test]
    fn test_counter_covers_detection_plus_open_tasks() {
        let mut gender = PixelClassifier::new(GENDERS);
        let (gate_tx, gate_rx) = crossbeam_channel::unbounded();
        gender.gate = Some(gate_rx);
        let (race_done_tx, race_done_rx) = crossbeam_channel::unbounded();
        let race = Signalling {
            inner: PixelClassifier::new(RACES),
            done: race_done_tx,
        };
        let coord = InferenceCoordinator::new(
            Arc::new(StubDetector::new(vec![left_face()])),
            ClassifierSet::new(Arc::new(gender), Arc::new(race)),
            config(2),
        )
        .unwrap();

        coord.submit_frame(two_tone_frame(1));
        race_done_rx.recv_timeout(WAIT).unwrap();
        // Race is done and gender is parked: once detection lets go of its
        // own unit, exactly one remains.
        let deadline = Instant::now() + WAIT;
        while coord.in_flight() != 1 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(coord.in_flight(), 1);
        assert_eq!(coord.phase(), CyclePhase::Classifying);
        assert!(coord.latest_results().is_none());

        gate_tx.send(()).unwrap();
        assert!(coord.wait_for_quiescence(WAIT));
        assert_eq!(coord.latest_results().unwrap().len(), 1);
    }

    // --- Semaphore bound ---

    /// Tracks concurrency across both classifiers and holds each call long
    /// enough for overlap to show.
    struct Tracked {
        inner: PixelClassifier,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl AttributeClassifier for Tracked {
        fn classify(&self, face: &Frame) -> Result<Vec<LabelCandidate>, SendError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(10));
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.inner.classify(face)
        }
    }

    fn peak_concurrency(permits: usize) -> usize {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let tracked = |labels| Tracked {
            inner: PixelClassifier::new(labels),
            active: Arc::clone(&active),
            peak: Arc::clone(&peak),
        };

        let coord = InferenceCoordinator::new(
            Arc::new(StubDetector::new(vec![left_face(), right_face(), left_face(), right_face()])),
            ClassifierSet::new(Arc::new(tracked(GENDERS)), Arc::new(tracked(RACES))),
            CoordinatorConfig {
                permits,
                worker_threads: 8,
                stall_timeout: None,
            },
        )
        .unwrap();
        coord.submit_frame(two_tone_frame(1));
        assert!(coord.wait_for_quiescence(WAIT));
        assert_eq!(coord.latest_results().unwrap().len(), 4);
        peak.load(Ordering::SeqCst)
    }

    #[test]
    fn test_single_permit_serializes_classification() {
        assert_eq!(peak_concurrency(1), 1);
    }

    #[test]
    fn test_two_permits_bound_classification() {
        let peak = peak_concurrency(2);
        assert!((1..=2).contains(&peak), "peak concurrency {peak}");
    }

    #[test]
    fn test_worker_count_is_raised_above_permits() {
        let coord = InferenceCoordinator::new(
            Arc::new(StubDetector::new(vec![left_face(), right_face()])),
            ClassifierSet::new(Arc::new(PixelClassifier::new(GENDERS)), Arc::new(PixelClassifier::new(RACES))),
            CoordinatorConfig {
                permits: 2,
                worker_threads: 1,
                stall_timeout: None,
            },
        )
        .unwrap();
        coord.submit_frame(two_tone_frame(1));
        assert!(coord.wait_for_quiescence(WAIT));
        assert_eq!(coord.latest_results().unwrap().len(), 2);
    }

    // --- Faults ---

    #[test]
    fn test_detection_failure_publishes_empty_set() {
        let coord = coordinator(StubDetector::failing(), PixelClassifier::new(GENDERS), PixelClassifier::new(RACES), 2);
        coord.submit_frame(two_tone_frame(3));
        assert!(coord.wait_for_quiescence(WAIT));
        assert!(coord.latest_results().unwrap().is_empty());
        assert_eq!(coord.stats().detection_failures, 1);
        assert_eq!(coord.in_flight(), 0);
    }

    #[test]
    fn test_classifier_fault_leaves_region_unresolved() {
        let mut race = PixelClassifier::new(RACES);
        race.fail_on = Some(1);
        let coord = coordinator(StubDetector::new(vec![left_face(), right_face()]), PixelClassifier::new(GENDERS), race, 2);

        coord.submit_frame(two_tone_frame(1));
        assert!(coord.wait_for_quiescence(WAIT));

        let set = coord.latest_results().unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.faces()[0].index, 0);
        assert_eq!(set.unresolved(), 1);
        assert_eq!(coord.stats().classification_failures, 1);
        assert_eq!(coord.in_flight(), 0);
        assert_eq!(coord.permits_available(), 2);
    }

    #[test]
    fn test_empty_candidates_leave_region_unresolved() {
        struct Silent;
        impl AttributeClassifier for Silent {
            fn classify(&self, _face: &Frame) -> Result<Vec<LabelCandidate>, SendError> {
                Ok(Vec::new())
            }
        }
        let coord = InferenceCoordinator::new(
            Arc::new(StubDetector::new(vec![left_face()])),
            ClassifierSet::new(Arc::new(PixelClassifier::new(GENDERS)), Arc::new(Silent)),
            config(2),
        )
        .unwrap();
        coord.submit_frame(two_tone_frame(1));
        assert!(coord.wait_for_quiescence(WAIT));
        let set = coord.latest_results().unwrap();
        assert!(set.is_empty());
        assert_eq!(set.unresolved(), 1);
        assert_eq!(coord.stats().classification_failures, 0);
    }

    #[test]
    fn test_panicking_classifier_is_absorbed() {
        struct Panics;
        impl AttributeClassifier for Panics {
            fn classify(&self, _face: &Frame) -> Result<Vec<LabelCandidate>, SendError> {
                panic!("bad model");
            }
        }
        let coord = InferenceCoordinator::new(
            Arc::new(StubDetector::new(vec![left_face()])),
            ClassifierSet::new(Arc::new(Panics), Arc::new(PixelClassifier::new(RACES))),
            config(2),
        )
        .unwrap();
        coord.submit_frame(two_tone_frame(1));
        assert!(coord.wait_for_quiescence(WAIT));
        assert_eq!(coord.latest_results().unwrap().unresolved(), 1);
        assert_eq!(coord.stats().classification_failures, 1);
    }

    // --- Stall timeout ---

    #[test]
    fn test_stalled_cycle_is_abandoned_and_late_results_ignored() {
        let mut gender = PixelClassifier::new(GENDERS);
        let (gate_tx, gate_rx) = crossbeam_channel::unbounded();
        gender.gate = Some(gate_rx);
        let coord = InferenceCoordinator::new(
            Arc::new(StubDetector::new(vec![left_face()])),
            ClassifierSet::new(Arc::new(gender), Arc::new(PixelClassifier::new(RACES))),
            CoordinatorConfig {
                permits: 2,
                worker_threads: 3,
                stall_timeout: Some(Duration::from_millis(20)),
            },
        )
        .unwrap();

        assert!(coord.submit_frame(two_tone_frame(1)).is_admitted());
        assert!(!coord.wait_for_quiescence(Duration::from_millis(40)));

        // Past the timeout the next frame takes over the session.
        assert!(coord.submit_frame(two_tone_frame(2)).is_admitted());
        assert_eq!(coord.stats().abandoned, 1);

        // Let both the stalled and the new gender call through.
        gate_tx.send(()).unwrap();
        gate_tx.send(()).unwrap();
        assert!(coord.wait_for_quiescence(WAIT));

        let set = coord.latest_results().unwrap();
        assert_eq!(set.sequence_id(), 2);
        assert_eq!(coord.results_version(), 1);
        assert_eq!(coord.in_flight(), 0);

        // The stale task's permit still comes home.
        let deadline = Instant::now() + WAIT;
        while coord.permits_available() < 2 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(coord.permits_available(), 2);
    }

    #[test]
    fn test_without_timeout_stalled_cycle_keeps_dropping() {
        let (detector, release) = StubDetector::gated(Vec::new());
        let coord = coordinator(detector, PixelClassifier::new(GENDERS), PixelClassifier::new(RACES), 2);
        coord.submit_frame(two_tone_frame(1));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(coord.submit_frame(two_tone_frame(2)), Admission::Dropped);
        assert_eq!(coord.stats().abandoned, 0);
        release.send(()).unwrap();
        assert!(coord.wait_for_quiescence(WAIT));
    }

    fn stall_config() -> CoordinatorConfig {
        CoordinatorConfig {
            permits: 2,
            worker_threads: 3,
            stall_timeout: Some(Duration::from_millis(20)),
        }
    }

    #[test]
    fn test_stall_with_every_permit_held_keeps_dropping() {
        let (gate_tx, gate_rx) = crossbeam_channel::unbounded();
        let mut gender = PixelClassifier::new(GENDERS);
        gender.gate = Some(gate_rx.clone());
        let mut race = PixelClassifier::new(RACES);
        race.gate = Some(gate_rx);
        let detector = Arc::new(StubDetector::new(vec![left_face()]));
        let coord = InferenceCoordinator::new(
            Arc::clone(&detector) as Arc<dyn RegionDetector>,
            ClassifierSet::new(Arc::new(gender), Arc::new(race)),
            stall_config(),
        )
        .unwrap();

        assert!(coord.submit_frame(two_tone_frame(1)).is_admitted());
        let deadline = Instant::now() + WAIT;
        while coord.permits_available() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(coord.permits_available(), 0);

        // Both classifiers are stuck, so a new cycle could never classify.
        for seq in 2..12 {
            std::thread::sleep(Duration::from_millis(30));
            assert_eq!(coord.submit_frame(two_tone_frame(seq)), Admission::Dropped);
        }
        let stats = coord.stats();
        assert_eq!(stats.abandoned, 0);
        assert_eq!(stats.admitted, 1);
        assert_eq!(detector.calls.load(Ordering::SeqCst), 1);

        gate_tx.send(()).unwrap();
        gate_tx.send(()).unwrap();
        assert!(coord.wait_for_quiescence(WAIT));
        assert_eq!(coord.stats().completed, 1);
        assert_eq!(coord.latest_results().unwrap().sequence_id(), 1);
    }

    #[test]
    fn test_stuck_detectors_are_bounded_by_workers() {
        let (detector, release) = StubDetector::gated(Vec::new());
        let detector = Arc::new(detector);
        let coord = InferenceCoordinator::new(
            Arc::clone(&detector) as Arc<dyn RegionDetector>,
            ClassifierSet::new(Arc::new(PixelClassifier::new(GENDERS)), Arc::new(PixelClassifier::new(RACES))),
            stall_config(),
        )
        .unwrap();

        let mut admissions = Vec::new();
        for seq in 1..10 {
            admissions.push(coord.submit_frame(two_tone_frame(seq)));
            std::thread::sleep(Duration::from_millis(30));
        }

        // One stuck detection per worker, then nothing more is taken on.
        let admitted = admissions.iter().filter(|a| a.is_admitted()).count();
        assert_eq!(admitted, 3);
        assert_eq!(coord.stats().abandoned, 2);
        assert_eq!(detector.calls.load(Ordering::SeqCst), 3);

        for _ in 0..3 {
            release.send(()).unwrap();
        }
        assert!(coord.wait_for_quiescence(WAIT));
        assert_eq!(coord.stats().completed, 1);
    }

    #[test]
    fn test_short_frame_is_rejected_and_admission_continues() {
        let coord = plain(vec![left_face()]);
        let short = Frame::new(vec![0u8; 10], 8, 8, 3, 1);

        assert_eq!(coord.submit_frame(short), Admission::Dropped);
        assert_eq!(coord.in_flight(), 0);
        assert!(coord.current_frame().is_none());

        assert!(coord.submit_frame(two_tone_frame(2)).is_admitted());
        assert!(coord.wait_for_quiescence(WAIT));
        assert_eq!(coord.latest_results().unwrap().sequence_id(), 2);
    }

    #[test]
    fn test_region_that_crops_to_nothing_settles_its_units() {
        // Zero-area region on the pixel grid line x = y = 4.
        let coord = plain(vec![FaceRegion::new(0.5, 0.5, 0.0, 0.0, 1), left_face()]);
        coord.submit_frame(two_tone_frame(1));
        assert!(coord.wait_for_quiescence(WAIT));

        let set = coord.latest_results().unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.faces()[0].index, 1);
        assert_eq!(set.unresolved(), 1);
        assert_eq!(coord.stats().classification_failures, 2);
        assert_eq!(coord.in_flight(), 0);
        assert_eq!(coord.permits_available(), 2);
    }

    #[test]
    fn test_config_from_settings() {
        let settings = PipelineSettings {
            classification_permits: 3,
            worker_threads: 1,
            stall_timeout_ms: Some(250),
            ..Default::default()
        };
        let config = CoordinatorConfig::from(&settings);
        assert_eq!(config.permits, 3);
        assert_eq!(config.worker_threads, 4);
        assert_eq!(config.stall_timeout, Some(Duration::from_millis(250)));
    }
}
