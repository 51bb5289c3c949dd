//! Optional runtime validation
//!
//! Every `interval` ticks the layer checksums canvas and pointer state and
//! walks the structural invariants of the pools. It also remembers each
//! pointer's checksum at the end of a checked tick and compares it at the
//! start of the next one: pointer state only changes inside a tick.

use crate::canvas::Runtime;
use crate::input::Pointer;
use crate::render::swapchain::MAX_SWAPCHAIN_IMAGES;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

/// One broken invariant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    /// Two canvases share a native window
    SharedWindow {
        /// First canvas
        first: usize,
        /// Second canvas
        second: usize,
    },
    /// Two pointer slots carry the same native id
    DuplicatePointer(u32),
    /// A clear color component is NaN or infinite
    NonFiniteColor(usize),
    /// A canvas claims a display that does not exist
    DanglingDisplay {
        /// Canvas index
        canvas: usize,
        /// Display index
        display: usize,
    },
    /// A pointer is owned by a closed canvas
    DanglingPointerCanvas {
        /// Pointer id
        pointer: u32,
        /// Canvas index
        canvas: usize,
    },
    /// Per-tick edges survived the end of a tick
    StaleEdges(u32),
    /// A swapchain image is owned by a fence slot that does not exist
    ImageOwnerOutOfRange {
        /// Canvas index
        canvas: usize,
        /// Image index
        image: usize,
        /// Recorded owner
        slot: usize,
    },
    /// More swapchain images than the engine supports
    TooManyImages {
        /// Canvas index
        canvas: usize,
        /// Image count
        count: usize,
    },
    /// Pointer state changed outside a tick
    PointerMutatedBetweenTicks(u32),
}

/// Result of one validation pass
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    /// Tick the pass ran after
    pub tick: u64,
    /// Checksum over every canvas record
    pub canvas_checksum: u64,
    /// Checksum over every pointer record
    pub pointer_checksum: u64,
    /// Findings, empty when everything holds
    pub issues: Vec<ValidationIssue>,
}

/// Periodic invariant checker
#[derive(Debug)]
pub struct ValidationLayer {
    interval: u64,
    ticks: u64,
    pointer_sums: Option<HashMap<u32, u64>>,
    pending: Vec<ValidationIssue>,
    last: Option<ValidationReport>,
    failures: u64,
}

impl ValidationLayer {
    /// Check every `interval` ticks (zero is treated as one)
    pub fn new(interval: u64) -> Self {
        Self {
            interval: interval.max(1),
            ticks: 0,
            pointer_sums: None,
            pending: Vec::new(),
            last: None,
            failures: 0,
        }
    }

    /// Called before a tick starts
    pub fn before_tick(&mut self, runtime: &Runtime) {
        let Some(expected) = self.pointer_sums.take() else {
            return;
        };
        for pointer in runtime.pointers() {
            if let Some(&sum) = expected.get(&pointer.id) {
                if sum != pointer_sum(pointer) {
                    self.pending.push(ValidationIssue::PointerMutatedBetweenTicks(pointer.id));
                }
            }
        }
    }

    /// Called after a tick ends; returns the report when this tick was checked
    pub fn after_tick(&mut self, runtime: &Runtime) -> Option<&ValidationReport> {
        self.ticks += 1;
        if self.ticks % self.interval != 0 {
            return None;
        }

        let mut issues = std::mem::take(&mut self.pending);
        check_canvases(runtime, &mut issues);
        check_pointers(runtime, &mut issues);

        let sums: HashMap<u32, u64> = runtime
            .pointers()
            .map(|pointer| (pointer.id, pointer_sum(pointer)))
            .collect();
        let mut ids: Vec<&u32> = sums.keys().collect();
        ids.sort();
        let mut hasher = DefaultHasher::new();
        for id in ids {
            (id, sums[id]).hash(&mut hasher);
        }
        let pointer_checksum = hasher.finish();
        self.pointer_sums = Some(sums);

        for issue in &issues {
            log::warn!("Validation failed at tick {}: {issue:?}", self.ticks);
        }
        if !issues.is_empty() {
            self.failures += 1;
        }

        self.last = Some(ValidationReport {
            tick: self.ticks,
            canvas_checksum: canvas_checksum(runtime),
            pointer_checksum,
            issues,
        });
        self.last.as_ref()
    }

    /// Most recent report
    pub fn last_report(&self) -> Option<&ValidationReport> {
        self.last.as_ref()
    }

    /// Number of passes that found at least one issue
    pub fn failures(&self) -> u64 {
        self.failures
    }
}

fn check_canvases(runtime: &Runtime, issues: &mut Vec<ValidationIssue>) {
    let mut windows = HashMap::new();
    for (handle, canvas) in runtime.canvases() {
        let index = handle.index();
        if let Some(window) = canvas.window() {
            if let Some(first) = windows.insert(window, index) {
                issues.push(ValidationIssue::SharedWindow { first, second: index });
            }
        }
        if !canvas.clear_color().iter().all(|c| c.is_finite()) {
            issues.push(ValidationIssue::NonFiniteColor(index));
        }
        if let Some(display) = canvas.display() {
            if runtime.display(display).is_err() {
                issues.push(ValidationIssue::DanglingDisplay { canvas: index, display });
            }
        }

        let Some(engine) = canvas.presentation() else {
            continue;
        };
        if engine.image_count() > MAX_SWAPCHAIN_IMAGES {
            issues.push(ValidationIssue::TooManyImages {
                canvas: index,
                count: engine.image_count(),
            });
        }
        let slots = engine.sync().frames_in_flight();
        for (image, owner) in engine.sync().images_in_flight().iter().enumerate() {
            if let Some(slot) = *owner {
                if slot >= slots {
                    issues.push(ValidationIssue::ImageOwnerOutOfRange {
                        canvas: index,
                        image,
                        slot,
                    });
                }
            }
        }
    }
}

fn check_pointers(runtime: &Runtime, issues: &mut Vec<ValidationIssue>) {
    let mut ids = HashSet::new();
    for pointer in runtime.pointers() {
        if !ids.insert(pointer.id) {
            issues.push(ValidationIssue::DuplicatePointer(pointer.id));
        }
        if !pointer.pressed.is_empty() || !pointer.released.is_empty() || pointer.scroll.norm() != 0.0 {
            issues.push(ValidationIssue::StaleEdges(pointer.id));
        }
        if let Some(canvas) = pointer.canvas {
            let live = runtime
                .canvases()
                .any(|(handle, _)| handle.index() == canvas);
            if !live {
                issues.push(ValidationIssue::DanglingPointerCanvas {
                    pointer: pointer.id,
                    canvas,
                });
            }
        }
    }
}

fn pointer_sum(pointer: &Pointer) -> u64 {
    let mut hasher = DefaultHasher::new();
    pointer.id.hash(&mut hasher);
    pointer.device.hash(&mut hasher);
    pointer.canvas.hash(&mut hasher);
    pointer.display.hash(&mut hasher);
    pointer.down.bits().hash(&mut hasher);
    pointer.captured.hash(&mut hasher);
    pointer.relative.hash(&mut hasher);
    pointer.pressure.to_bits().hash(&mut hasher);
    for v in [pointer.window_pos, pointer.screen_pos, pointer.display_pos] {
        v.x.to_bits().hash(&mut hasher);
        v.y.to_bits().hash(&mut hasher);
    }
    hasher.finish()
}

fn canvas_checksum(runtime: &Runtime) -> u64 {
    let mut hasher = DefaultHasher::new();
    for (handle, canvas) in runtime.canvases() {
        handle.hash(&mut hasher);
        canvas.geometry().hash(&mut hasher);
        canvas.flags().bits().hash(&mut hasher);
        canvas.display().hash(&mut hasher);
        canvas.title().hash(&mut hasher);
        for c in canvas.clear_color() {
            c.to_bits().hash(&mut hasher);
        }
        canvas.present_state().hash(&mut hasher);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RuntimeConfig;

    #[test]
    fn test_interval_controls_when_reports_are_produced() {
        let mut runtime = Runtime::headless(RuntimeConfig::default()).unwrap();
        runtime.canvas_window(0, 0, 100, 100, "v").unwrap();

        let mut layer = ValidationLayer::new(3);
        let produced: Vec<bool> = (0..6)
            .map(|_| {
                layer.before_tick(&runtime);
                layer.after_tick(&runtime).is_some()
            })
            .collect();
        assert_eq!(produced, vec![false, false, true, false, false, true]);
        assert_eq!(layer.last_report().unwrap().tick, 6);
        assert_eq!(layer.failures(), 0);
    }

    #[test]
    fn test_checksums_track_canvas_changes() {
        let mut runtime = Runtime::headless(RuntimeConfig::default()).unwrap();
        let canvas = runtime.canvas_window(0, 0, 100, 100, "v").unwrap();
        let mut layer = ValidationLayer::new(1);

        let before = layer.after_tick(&runtime).unwrap().canvas_checksum;
        let same = layer.after_tick(&runtime).unwrap().canvas_checksum;
        assert_eq!(before, same);

        runtime.canvas_color(canvas, [0.5, 0.5, 0.5, 1.0]).unwrap();
        let after = layer.after_tick(&runtime).unwrap().canvas_checksum;
        assert_ne!(before, after);
    }

    #[test]
    fn test_pointer_checksum_is_stable_between_checks() {
        let mut runtime = Runtime::headless(RuntimeConfig::default()).unwrap();
        runtime.canvas_window(0, 0, 100, 100, "v").unwrap();
        let mut layer = ValidationLayer::new(1);

        layer.after_tick(&runtime);
        layer.before_tick(&runtime);
        let report = layer.after_tick(&runtime).unwrap();
        assert!(report.issues.is_empty());
    }
}
