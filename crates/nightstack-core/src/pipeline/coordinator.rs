//! Pipeline sequencing.
//!
//! One coordinator owns the running stack and serializes every mutation
//! of it. Registration is dispatched to a bounded worker pool and may
//! complete out of order; a reorder buffer applies results to the
//! accumulator in file-discovery order so stacking stays deterministic.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;

use tracing::{info, warn};

use crate::calibrate::apply::calibrate;
use crate::calibrate::master::{build_master, MasterFrame};
use crate::error::{NightstackError, Result};
use crate::frame::{FrameOutcome, FrameRecord, FrameType, OutcomeRecord, PixelBuffer, RejectionReason};
use crate::quality::gate::{evaluate, Verdict};
use crate::register::detect::StarList;
use crate::register::solve::{solve_transform, Transform};
use crate::register::{register, CancelToken, Registration, RegistrationFailure};
use crate::stack::accum::{StackAccumulator, StackState, StackSummary};

use super::classify::FrameClassifier;
use super::config::PipelineConfig;

/// At most one master per calibration type. Offering a second master for
/// an occupied slot is an error; rebuilding from a grown batch goes
/// through [`MasterSet::replace`].
#[derive(Debug, Default)]
pub struct MasterSet {
    slots: HashMap<FrameType, MasterFrame>,
}

impl MasterSet {
    pub fn offer(&mut self, master: MasterFrame) -> Result<()> {
        if self.slots.contains_key(&master.frame_type) {
            return Err(NightstackError::MultipleMasterFrames(master.frame_type));
        }
        self.slots.insert(master.frame_type, master);
        Ok(())
    }

    /// Install a rebuilt master, returning the one it supersedes.
    pub fn replace(&mut self, master: MasterFrame) -> Option<MasterFrame> {
        self.slots.insert(master.frame_type, master)
    }

    pub fn get(&self, frame_type: FrameType) -> Option<&MasterFrame> {
        self.slots.get(&frame_type)
    }

    pub fn contains(&self, frame_type: FrameType) -> bool {
        self.slots.contains_key(&frame_type)
    }
}

struct LightJob {
    sequence: u64,
    stack_order: u64,
    path: PathBuf,
    buffer: PixelBuffer,
    exposure_seconds: f64,
}

struct RegisteredLight {
    sequence: u64,
    stack_order: u64,
    path: PathBuf,
    buffer: PixelBuffer,
    exposure_seconds: f64,
    /// Whether a reference star list existed when registration ran.
    had_reference: bool,
    result: std::result::Result<Registration, RegistrationFailure>,
}

/// Sequences classification, registration, quality gating, calibration
/// and stacking for a stream of incoming frames.
pub struct PipelineCoordinator {
    config: Arc<PipelineConfig>,
    classifier: FrameClassifier,
    masters: MasterSet,
    batches: HashMap<FrameType, Vec<PixelBuffer>>,
    built_counts: HashMap<FrameType, usize>,
    accumulator: StackAccumulator,
    pool: rayon::ThreadPool,
    tx: Sender<RegisteredLight>,
    rx: Receiver<RegisteredLight>,
    cancel: CancelToken,
    reference: Option<Arc<StarList>>,
    next_sequence: u64,
    next_stack_order: u64,
    next_to_stack: u64,
    /// Registered, not yet stacked, keyed by discovery order ("Pending").
    ready: BTreeMap<u64, RegisteredLight>,
    /// Lights submitted while paused, awaiting dispatch.
    held: VecDeque<LightJob>,
    in_flight: usize,
    paused: bool,
}

impl PipelineCoordinator {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let threads = config.workers.registration_threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| NightstackError::Pipeline(e.to_string()))?;
        let (tx, rx) = channel();
        let accumulator = StackAccumulator::new(config.stacking.method);
        let classifier = FrameClassifier::new(config.classifier);
        Ok(Self {
            config: Arc::new(config),
            classifier,
            masters: MasterSet::default(),
            batches: HashMap::new(),
            built_counts: HashMap::new(),
            accumulator,
            pool,
            tx,
            rx,
            cancel: CancelToken::new(),
            reference: None,
            next_sequence: 0,
            next_stack_order: 0,
            next_to_stack: 0,
            ready: BTreeMap::new(),
            held: VecDeque::new(),
            in_flight: 0,
            paused: false,
        })
    }

    /// Hand a discovered frame to the pipeline. Calibration frames join
    /// their per-type batch and terminate immediately as MasterSource;
    /// light frames are dispatched for registration and report their
    /// outcome later through [`poll`](Self::poll).
    pub fn submit(&mut self, record: FrameRecord) -> Result<Option<OutcomeRecord>> {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let frame_type = self.classifier.classify(&record);
        match frame_type {
            FrameType::Light => {
                let job = LightJob {
                    sequence,
                    stack_order: self.next_stack_order,
                    path: record.path,
                    buffer: record.buffer,
                    exposure_seconds: record.metadata.exposure_seconds,
                };
                self.next_stack_order += 1;
                if self.paused {
                    self.held.push_back(job);
                } else {
                    self.dispatch(job);
                }
                Ok(None)
            }
            calibration => {
                self.batches
                    .entry(calibration)
                    .or_default()
                    .push(record.buffer);
                Ok(Some(OutcomeRecord {
                    sequence,
                    path: record.path,
                    outcome: FrameOutcome::MasterSource {
                        frame_type: calibration,
                    },
                }))
            }
        }
    }

    fn dispatch(&mut self, job: LightJob) {
        let tx = self.tx.clone();
        let config = Arc::clone(&self.config);
        let reference = self.reference.clone();
        let cancel = self.cancel.clone();
        self.in_flight += 1;
        self.pool.spawn(move || {
            let had_reference = reference.is_some();
            let result = register(
                &job.buffer,
                reference.as_deref(),
                &config.registration,
                &cancel,
            );
            // The receiver hanging up means the coordinator is gone.
            let _ = tx.send(RegisteredLight {
                sequence: job.sequence,
                stack_order: job.stack_order,
                path: job.path,
                buffer: job.buffer,
                exposure_seconds: job.exposure_seconds,
                had_reference,
                result,
            });
        });
    }

    /// Collect finished registrations and fold stackable frames into the
    /// running stack, in discovery order. Non-blocking.
    pub fn poll(&mut self) -> Result<Vec<OutcomeRecord>> {
        self.drain_channel();
        self.apply_ready()
    }

    /// Block until every in-flight registration has finished, then apply
    /// results in discovery order.
    pub fn wait_idle(&mut self) -> Result<Vec<OutcomeRecord>> {
        self.drain_channel();
        while self.in_flight > 0 {
            let msg = self.rx.recv().map_err(|_| {
                NightstackError::Pipeline("registration workers disconnected".into())
            })?;
            self.in_flight -= 1;
            self.ready.insert(msg.stack_order, msg);
        }
        self.apply_ready()
    }

    fn drain_channel(&mut self) {
        while let Ok(msg) = self.rx.try_recv() {
            self.in_flight -= 1;
            self.ready.insert(msg.stack_order, msg);
        }
    }

    fn apply_ready(&mut self) -> Result<Vec<OutcomeRecord>> {
        let mut outcomes = Vec::new();
        if self.paused {
            return Ok(outcomes);
        }

        while let Some(reg) = self.ready.remove(&self.next_to_stack) {
            self.next_to_stack += 1;
            let sequence = reg.sequence;
            let path = reg.path.clone();
            match self.apply_one(reg) {
                Ok(outcome) => outcomes.push(outcome),
                // A structural refusal rejects this frame only; frames
                // already applied in this batch keep their records and
                // later frames still get stacked.
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "frame refused by the stack");
                    outcomes.push(OutcomeRecord {
                        sequence,
                        path,
                        outcome: FrameOutcome::Rejected {
                            reason: RejectionReason::Structural(e.to_string()),
                            metrics: None,
                        },
                    });
                }
            }
        }
        Ok(outcomes)
    }

    fn apply_one(&mut self, reg: RegisteredLight) -> Result<OutcomeRecord> {
        let mut registration = match reg.result {
            Ok(registration) => registration,
            Err(failure) => {
                warn!(path = %reg.path.display(), reason = %failure, "frame not stackable");
                return Ok(OutcomeRecord {
                    sequence: reg.sequence,
                    path: reg.path,
                    outcome: FrameOutcome::Rejected {
                        reason: RejectionReason::Registration(failure),
                        metrics: None,
                    },
                });
            }
        };

        match self.reference.clone() {
            None => {
                // No reference yet: this frame is the reference candidate.
                registration.transform = Transform::identity();
            }
            Some(reference) if !reg.had_reference => {
                // Registered before the reference existed; solve now.
                match solve_transform(&registration.stars, &reference) {
                    Some(transform) => registration.transform = transform,
                    None => {
                        let failure = RegistrationFailure::NoTransformFound;
                        warn!(path = %reg.path.display(), reason = %failure, "frame not stackable");
                        return Ok(OutcomeRecord {
                            sequence: reg.sequence,
                            path: reg.path,
                            outcome: FrameOutcome::Rejected {
                                reason: RejectionReason::Registration(failure),
                                metrics: Some(registration.metrics),
                            },
                        });
                    }
                }
            }
            Some(_) => {}
        }

        match evaluate(
            &registration.metrics,
            &registration.transform,
            &self.config.thresholds,
        ) {
            Verdict::Stackable => {
                let calibrated = calibrate(
                    &reg.buffer,
                    self.masters.get(FrameType::Offset),
                    self.masters.get(FrameType::Dark),
                    self.masters.get(FrameType::Flat),
                )?;
                let summary = self.accumulator.add_frame(
                    &calibrated,
                    &registration.transform,
                    reg.exposure_seconds,
                )?;
                if self.reference.is_none() {
                    // The first light actually folded into the stack
                    // becomes the reference.
                    self.reference = Some(Arc::new(registration.stars.clone()));
                }
                info!(
                    path = %reg.path.display(),
                    frames = summary.frame_count,
                    "frame stacked"
                );
                Ok(OutcomeRecord {
                    sequence: reg.sequence,
                    path: reg.path,
                    outcome: FrameOutcome::Stacked {
                        metrics: registration.metrics,
                        transform: registration.transform,
                        stack_frame_count: summary.frame_count,
                    },
                })
            }
            Verdict::Rejected {
                kind,
                measured,
                threshold,
            } => {
                warn!(
                    path = %reg.path.display(),
                    reason = %kind,
                    measured,
                    threshold,
                    "frame rejected"
                );
                Ok(OutcomeRecord {
                    sequence: reg.sequence,
                    path: reg.path,
                    outcome: FrameOutcome::Rejected {
                        reason: RejectionReason::Quality {
                            kind,
                            measured,
                            threshold,
                        },
                        metrics: Some(registration.metrics),
                    },
                })
            }
        }
    }

    /// Build the master for one calibration type from its current batch.
    /// A first build fills the slot; later builds from a grown batch
    /// replace it.
    pub fn build_master_for(&mut self, frame_type: FrameType) -> Result<usize> {
        let batch = self
            .batches
            .get(&frame_type)
            .filter(|b| !b.is_empty())
            .ok_or(NightstackError::EmptySequence)?;
        let method = self.config.masters.method_for(frame_type);
        let master = build_master(batch, frame_type, method)?;
        let count = master.source_count;
        if self.masters.contains(frame_type) {
            self.masters.replace(master);
        } else {
            self.masters.offer(master)?;
        }
        self.built_counts.insert(frame_type, count);
        Ok(count)
    }

    /// Build or rebuild every master whose batch reached the configured
    /// size and grew since its last build. Returns (type, source count)
    /// per master built.
    pub fn build_ready_masters(&mut self) -> Result<Vec<(FrameType, usize)>> {
        let min_batch = self.config.masters.min_batch.max(1);
        let due: Vec<FrameType> = self
            .batches
            .iter()
            .filter(|(frame_type, batch)| {
                batch.len() >= min_batch
                    && self.built_counts.get(frame_type).copied().unwrap_or(0) < batch.len()
            })
            .map(|(&frame_type, _)| frame_type)
            .collect();

        let mut built = Vec::new();
        for frame_type in due {
            let count = self.build_master_for(frame_type)?;
            built.push((frame_type, count));
        }
        Ok(built)
    }

    /// Accept an externally supplied master for an empty slot.
    pub fn offer_master(&mut self, master: MasterFrame) -> Result<()> {
        self.masters.offer(master)
    }

    pub fn master(&self, frame_type: FrameType) -> Option<&MasterFrame> {
        self.masters.get(frame_type)
    }

    /// Halt dispatch and stack mutation. In-flight registrations finish
    /// and queue as Pending.
    pub fn pause(&mut self) -> Result<()> {
        if self.paused {
            return Ok(());
        }
        self.paused = true;
        if self.accumulator.state() == StackState::Accumulating {
            self.accumulator.pause()?;
        }
        info!("pipeline paused");
        Ok(())
    }

    /// Resume dispatch and apply everything that queued up while paused,
    /// still in discovery order.
    pub fn resume(&mut self) -> Result<Vec<OutcomeRecord>> {
        if !self.paused {
            return self.poll();
        }
        self.paused = false;
        if self.accumulator.state() == StackState::Paused {
            self.accumulator.resume()?;
        }
        while let Some(job) = self.held.pop_front() {
            self.dispatch(job);
        }
        info!("pipeline resumed");
        self.poll()
    }

    /// Cooperatively cancel in-flight registrations.
    pub fn cancel_in_flight(&self) {
        self.cancel.cancel();
    }

    /// Registered frames waiting to be stacked.
    pub fn pending_count(&self) -> usize {
        self.ready.len()
    }

    /// Registrations currently running on the worker pool.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight
    }

    /// Lights submitted while paused, not yet dispatched.
    pub fn held_count(&self) -> usize {
        self.held.len()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn current_stack(&mut self) -> Option<PixelBuffer> {
        self.accumulator.current_stack()
    }

    pub fn stack_summary(&self) -> StackSummary {
        self.accumulator.summary()
    }

    pub fn accumulator(&self) -> &StackAccumulator {
        &self.accumulator
    }

    pub fn accumulator_mut(&mut self) -> &mut StackAccumulator {
        &mut self.accumulator
    }
}
