//! Browser runtime integration
//!
//! requestAnimationFrame is the host tick. Every frame ticks the installed
//! scheduler's channels, each at its own cadence (every N frames).
//!
//! [`FrameLoop`] holds the loop bookkeeping and builds on every target; the
//! browser glue that drives it is wasm32 only.

use crate::kernel::Channel;

/// A channel and how many frames pass between its ticks
#[derive(Debug, Clone, PartialEq, Eq)]
struct Cadence {
    channel: Channel,
    every: u32,
}

/// Frame loop bookkeeping
///
/// At most one animation frame is ever in flight: the browser keeps calling
/// the closure it was handed, so a second request would replace that closure
/// underneath it.
#[derive(Debug, Default)]
pub struct FrameLoop {
    running: bool,
    frame_requested: bool,
    frame_count: u64,
    cadences: Vec<Cadence>,
}

impl FrameLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin running with `channel` ticked every frame. Returns false if
    /// already running.
    pub fn start(&mut self, channel: Channel) -> bool {
        if self.running {
            return false;
        }
        self.running = true;
        self.cadences = vec![Cadence { channel, every: 1 }];
        true
    }

    /// Stop ticking. A frame already requested still arrives and is ignored.
    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Tick `channel` once every `every_n_frames` frames
    pub fn add_channel(&mut self, channel: Channel, every_n_frames: u32) {
        self.cadences.retain(|c| c.channel != channel);
        self.cadences.push(Cadence {
            channel,
            every: every_n_frames.max(1),
        });
    }

    /// Whether a new frame should be requested now. True at most once per
    /// delivered frame.
    pub fn request_frame(&mut self) -> bool {
        if !self.running || self.frame_requested {
            return false;
        }
        self.frame_requested = true;
        true
    }

    /// A requested frame arrived; returns the channels due this frame, or
    /// `None` once stopped
    pub fn on_frame(&mut self) -> Option<Vec<Channel>> {
        self.frame_requested = false;
        if !self.running {
            return None;
        }
        self.frame_count += 1;
        let frame = self.frame_count;
        Some(
            self.cadences
                .iter()
                .filter(|c| frame % u64::from(c.every) == 0)
                .map(|c| c.channel.clone())
                .collect(),
        )
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

#[cfg(target_arch = "wasm32")]
pub use browser::{add_channel, frame_count, start, stop};

#[cfg(target_arch = "wasm32")]
mod browser {
    use super::FrameLoop;
    use crate::kernel::{Channel, Scheduler};
    use log::{info, warn};
    use std::cell::RefCell;
    use wasm_bindgen::JsCast;
    use wasm_bindgen::prelude::*;

    /// State for the animation frame loop
    struct RuntimeState {
        /// Callback for requestAnimationFrame (stored to prevent GC)
        frame_closure: Option<Closure<dyn FnMut(f64)>>,
        frame_loop: FrameLoop,
        scheduler: Option<Scheduler>,
    }

    thread_local! {
        static STATE: RefCell<RuntimeState> = RefCell::new(RuntimeState {
            frame_closure: None,
            frame_loop: FrameLoop::new(),
            scheduler: None,
        });
    }

    /// Start ticking `scheduler` from the frame loop
    ///
    /// The scheduler's default channel ticks every frame; add slower cadences
    /// with [`add_channel`]. A restart right after [`stop`] reuses the frame
    /// that is still in flight.
    pub fn start(scheduler: Scheduler) {
        #[cfg(feature = "console_error_panic_hook")]
        console_error_panic_hook::set_once();

        let started = STATE.with(|state| {
            let mut state = state.borrow_mut();
            let channel = scheduler.default_channel().clone();
            if !state.frame_loop.start(channel) {
                return false;
            }
            state.scheduler = Some(scheduler);
            true
        });

        if !started {
            warn!("[runtime] Already running");
            return;
        }

        info!("[runtime] Starting frame loop...");
        request_animation_frame();
    }

    /// Tick `channel` once every `every_n_frames` frames
    pub fn add_channel(channel: Channel, every_n_frames: u32) {
        STATE.with(|state| {
            state.borrow_mut().frame_loop.add_channel(channel, every_n_frames);
        });
    }

    /// Stop the runtime loop
    pub fn stop() {
        STATE.with(|state| {
            state.borrow_mut().frame_loop.stop();
        });
        info!("[runtime] Stopped");
    }

    /// Request the next animation frame, unless one is already in flight
    fn request_animation_frame() {
        let Some(window) = web_sys::window() else {
            warn!("[runtime] No window object");
            return;
        };

        STATE.with(|state| {
            let mut state = state.borrow_mut();
            if !state.frame_loop.request_frame() {
                return;
            }
            let closure = Closure::wrap(Box::new(move |timestamp: f64| {
                frame_tick(timestamp);
            }) as Box<dyn FnMut(f64)>);
            let _ = window.request_animation_frame(closure.as_ref().unchecked_ref());
            // Store the closure to prevent it from being dropped
            state.frame_closure = Some(closure);
        });
    }

    /// Called every frame by requestAnimationFrame
    fn frame_tick(_timestamp: f64) {
        // Collect due channels without holding the state across task code
        let due = STATE.with(|state| {
            let mut state = state.borrow_mut();
            let channels = state.frame_loop.on_frame()?;
            let scheduler = state.scheduler.clone()?;
            Some((scheduler, channels))
        });

        let Some((scheduler, channels)) = due else {
            return;
        };

        for channel in &channels {
            scheduler.tick(channel);
        }

        request_animation_frame();
    }

    /// Get current frame count
    pub fn frame_count() -> u64 {
        STATE.with(|state| state.borrow().frame_loop.frame_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_reuses_in_flight_frame() {
        let mut frames = FrameLoop::new();
        assert!(frames.start(Channel::PRIMARY));
        assert!(frames.request_frame());

        frames.stop();
        assert!(frames.start(Channel::PRIMARY));
        // The earlier request has not been delivered yet
        assert!(!frames.request_frame());

        assert_eq!(frames.on_frame(), Some(vec![Channel::PRIMARY]));
        assert!(frames.request_frame());
    }

    #[test]
    fn test_stopped_loop_ignores_frame() {
        let mut frames = FrameLoop::new();
        frames.start(Channel::PRIMARY);
        assert!(frames.request_frame());
        frames.stop();

        assert_eq!(frames.on_frame(), None);
        assert!(!frames.request_frame());
        assert_eq!(frames.frame_count(), 0);
        assert!(!frames.is_running());
    }

    #[test]
    fn test_second_start_is_rejected() {
        let mut frames = FrameLoop::new();
        assert!(frames.start(Channel::PRIMARY));
        assert!(!frames.start(Channel::new("other")));
    }

    #[test]
    fn test_channels_follow_their_cadence() {
        let mut frames = FrameLoop::new();
        let slow = Channel::new("slow");
        frames.start(Channel::PRIMARY);
        frames.add_channel(slow.clone(), 3);

        let mut slow_frames = Vec::new();
        for _ in 0..6 {
            frames.request_frame();
            let due = frames.on_frame().unwrap_or_default();
            assert!(due.contains(&Channel::PRIMARY));
            if due.contains(&slow) {
                slow_frames.push(frames.frame_count());
            }
        }
        assert_eq!(slow_frames, vec![3, 6]);
    }
}
