/// Refresh scheduler: wakes on a cadence, resolves the minute, renders its
/// quote and hands the image to the display sink.
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{Local, Timelike};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{self, JoinError};
use tokio::time::{self, Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::display::{DisplaySink, PresentationError};
use crate::quotes::model::TimeKey;
use crate::quotes::store::QuoteStore;
use crate::render::engine::{RenderError, Renderer};
use crate::services::clock::{TimeSource, TimeSourceError};

/// Messages from key presses and signals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Skip the rest of the wait and render now
    RefreshNow,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Wake at the top of every minute
    MinuteAligned,
    /// Wake a fixed time after the start of the previous render
    Every(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Waiting,
    Rendering,
    Presented,
    Stopped,
}

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("could not resolve the time: {0}")]
    Time(#[from] TimeSourceError),
    #[error("no quote available for {0}")]
    NoQuote(TimeKey),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Present(#[from] PresentationError),
    #[error("time source worker failed: {0}")]
    Worker(#[from] JoinError),
}

pub struct RefreshScheduler {
    store: QuoteStore,
    /// Queried on the blocking pool; NTP lookups can take seconds
    clock: Arc<Mutex<Box<dyn TimeSource>>>,
    renderer: Renderer,
    sink: Box<dyn DisplaySink>,
    cadence: Cadence,
    control_rx: mpsc::Receiver<Control>,
    control_tx: mpsc::Sender<Control>,
    state: SchedulerState,
    last_render: Option<Instant>,
    released: bool,
}

impl RefreshScheduler {
    pub fn new(
        store: QuoteStore,
        clock: Box<dyn TimeSource>,
        renderer: Renderer,
        sink: Box<dyn DisplaySink>,
        cadence: Cadence,
    ) -> Self {
        let (tx, rx) = mpsc::channel(16);
        Self {
            store,
            clock: Arc::new(Mutex::new(clock)),
            renderer,
            sink,
            cadence,
            control_rx: rx,
            control_tx: tx,
            state: SchedulerState::Idle,
            last_render: None,
            released: false,
        }
    }

    /// Sender for stdin and signal listeners
    pub fn control_sender(&self) -> mpsc::Sender<Control> {
        self.control_tx.clone()
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Loop until `Control::Stop`, then release the sink
    pub async fn run(&mut self) {
        info!(
            "Starting refresh loop: {:?}, time from {}, output to {}",
            self.cadence,
            self.describe_clock(),
            self.sink.name()
        );

        loop {
            self.state = SchedulerState::Waiting;
            let delay = self.next_delay();
            debug!("Next render in {:.1}s", delay.as_secs_f32());

            let control = tokio::select! {
                biased;
                Some(control) = self.control_rx.recv() => Some(control),
                _ = time::sleep(delay) => None,
            };

            match control {
                Some(Control::Stop) => {
                    info!("Stop requested");
                    break;
                }
                Some(Control::RefreshNow) => info!("Refresh requested"),
                None => {}
            }

            match self.render_cycle().await {
                Ok(_) => {}
                Err(CycleError::Time(e)) => warn!("Skipping refresh: {}", e),
                Err(e) => error!("Refresh cycle failed: {}", e),
            }
        }

        self.shutdown();
    }

    /// Render and present a single image, then release the sink
    pub async fn run_once(&mut self) -> Result<TimeKey, CycleError> {
        let result = self.render_cycle().await;
        self.shutdown();
        result
    }

    /// Returns the time key of the quote that was shown
    async fn render_cycle(&mut self) -> Result<TimeKey, CycleError> {
        self.state = SchedulerState::Rendering;
        self.last_render = Some(Instant::now());

        let clock = Arc::clone(&self.clock);
        let key = task::spawn_blocking(move || {
            clock.lock().unwrap_or_else(PoisonError::into_inner).now()
        })
        .await??;
        let record = match self.store.lookup(key) {
            Ok(record) => record,
            Err(e) => {
                let record = self
                    .store
                    .lookup_or_earlier(key)
                    .ok_or(CycleError::NoQuote(key))?;
                warn!("{}, showing the quote for {}", e, record.time);
                record
            }
        };
        info!("{}: {}", key, record);

        let bitmap = self.renderer.compose(record)?;
        self.sink.present(&bitmap)?;
        self.state = SchedulerState::Presented;
        Ok(record.time)
    }

    fn next_delay(&self) -> Duration {
        let Some(last) = self.last_render else {
            return Duration::ZERO;
        };
        match self.cadence {
            Cadence::MinuteAligned => until_next_minute(&Local::now()),
            Cadence::Every(interval) => (last + interval).saturating_duration_since(Instant::now()),
        }
    }

    fn describe_clock(&self) -> String {
        self.clock.lock().unwrap_or_else(PoisonError::into_inner).describe()
    }

    fn shutdown(&mut self) {
        self.state = SchedulerState::Stopped;
        self.release_sink();
        info!("Refresh loop stopped");
    }

    fn release_sink(&mut self) {
        if !self.released {
            self.released = true;
            self.sink.release();
        }
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.release_sink();
    }
}

/// Time left until second zero of the next minute
pub fn until_next_minute<T: Timelike>(now: &T) -> Duration {
    // nanosecond() exceeds 1e9 during a leap second
    let millis = now.second() as u64 * 1000 + (now.nanosecond() / 1_000_000).min(999) as u64;
    Duration::from_millis(60_000u64.saturating_sub(millis).max(1))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveTime;
    use tiny_skia::Pixmap;

    use super::*;
    use crate::config::{CanvasSpec, LayoutTuning, Rgb, StyleConfig, StyleSpec};
    use crate::display::testing::RecordingSink;
    use crate::quotes::store::{ColumnOrder, LoadOptions};
    use crate::render::font::{BUILTIN_FAMILY, FontBook};
    use crate::services::clock::FixedClock;

    const TABLE: &str = "\
Time\tQuote_Time\tQuote_Part1\tQuote_Part2\tBook\tAuthor
08:40\ttwenty to nine\tIt was\tand raining.\tA\tX
08:43\teight forty-three\tAt\tshe left.\tB\tY
";

    fn store() -> QuoteStore {
        let options = LoadOptions {
            columns: ColumnOrder::Named,
            ..LoadOptions::default()
        };
        QuoteStore::parse(TABLE, options).unwrap()
    }

    fn renderer() -> Renderer {
        let style = |color| StyleSpec {
            font: BUILTIN_FAMILY.into(),
            size: 10.0,
            color,
            weight: "regular".into(),
        };
        let config = StyleConfig {
            prefix: style(Rgb::BLACK),
            time_phrase: style(Rgb::RED),
            suffix: style(Rgb::BLACK),
            canvas: CanvasSpec {
                width: 160,
                height: 100,
                margin: 8,
                background_color: Rgb::WHITE,
            },
            layout: LayoutTuning::default(),
        };
        Renderer::with_fonts(&config, FontBook::builtin(&config.run_styles()))
    }

    fn key(s: &str) -> TimeKey {
        s.parse().unwrap()
    }

    /// Records when each image arrived and asks for a stop after `stop_after`
    struct TimedSink {
        times: Arc<Mutex<Vec<Instant>>>,
        released: Arc<Mutex<bool>>,
        stop_after: usize,
        tx: mpsc::Sender<Control>,
    }

    impl DisplaySink for TimedSink {
        fn present(&mut self, _bitmap: &Pixmap) -> Result<(), PresentationError> {
            let mut times = self.times.lock().unwrap();
            times.push(Instant::now());
            if times.len() >= self.stop_after {
                let _ = self.tx.try_send(Control::Stop);
            }
            Ok(())
        }

        fn release(&mut self) {
            *self.released.lock().unwrap() = true;
        }

        fn name(&self) -> &'static str {
            "timed"
        }
    }

    /// Fails the first `failures` calls, then reports a fixed minute
    struct FlakyClock {
        failures: usize,
        key: TimeKey,
    }

    impl TimeSource for FlakyClock {
        fn now(&mut self) -> Result<TimeKey, TimeSourceError> {
            if self.failures > 0 {
                self.failures -= 1;
                return Err(TimeSourceError::AllServersFailed(5));
            }
            Ok(self.key)
        }

        fn describe(&self) -> String {
            "flaky".into()
        }
    }

    fn timed_scheduler(
        clock: Box<dyn TimeSource>,
        cadence: Cadence,
        stop_after: usize,
    ) -> (RefreshScheduler, Arc<Mutex<Vec<Instant>>>, Arc<Mutex<bool>>) {
        let times = Arc::new(Mutex::new(Vec::new()));
        let released = Arc::new(Mutex::new(false));
        let mut scheduler = RefreshScheduler::new(
            store(),
            clock,
            renderer(),
            Box::new(RecordingSink::default()),
            cadence,
        );
        // The sink stops the loop through the scheduler's own channel
        scheduler.sink = Box::new(TimedSink {
            times: times.clone(),
            released: released.clone(),
            stop_after,
            tx: scheduler.control_sender(),
        });
        (scheduler, times, released)
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_override_spaces_renders() {
        let (mut scheduler, times, released) = timed_scheduler(
            Box::new(FixedClock(key("08:43"))),
            Cadence::Every(Duration::from_secs(120)),
            2,
        );
        let start = Instant::now();
        scheduler.run().await;

        let times = times.lock().unwrap();
        assert_eq!(times.len(), 2);
        // First image at startup, the next exactly one interval later
        assert_eq!(times[0], start);
        assert_eq!(times[1] - times[0], Duration::from_secs(120));
        assert!(*released.lock().unwrap());
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_now_cuts_wait_short() {
        let (mut scheduler, times, released) = timed_scheduler(
            Box::new(FixedClock(key("08:43"))),
            Cadence::Every(Duration::from_secs(3600)),
            usize::MAX,
        );
        let tx = scheduler.control_sender();
        let start = Instant::now();
        let handle = tokio::spawn(async move {
            scheduler.run().await;
            scheduler
        });

        time::sleep(Duration::from_secs(10)).await;
        tx.send(Control::RefreshNow).await.unwrap();
        tx.send(Control::Stop).await.unwrap();
        let scheduler = handle.await.unwrap();

        let times = times.lock().unwrap();
        assert_eq!(times.len(), 2);
        assert_eq!(times[1] - start, Duration::from_secs(10));
        assert!(*released.lock().unwrap());
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_first_render() {
        let sink = RecordingSink::default();
        let mut scheduler = RefreshScheduler::new(
            store(),
            Box::new(FixedClock(key("08:43"))),
            renderer(),
            Box::new(sink.clone()),
            Cadence::MinuteAligned,
        );
        scheduler.control_sender().send(Control::Stop).await.unwrap();
        scheduler.run().await;

        assert!(sink.frames.lock().unwrap().is_empty());
        assert!(*sink.released.lock().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_source_failure_skips_one_cycle() {
        let clock = FlakyClock {
            failures: 1,
            key: key("08:43"),
        };
        let (mut scheduler, times, _) =
            timed_scheduler(Box::new(clock), Cadence::Every(Duration::from_secs(60)), 1);
        let start = Instant::now();
        scheduler.run().await;

        let times = times.lock().unwrap();
        assert_eq!(times.len(), 1);
        assert_eq!(times[0] - start, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_missing_minute_shows_previous_quote() {
        let sink = RecordingSink::default();
        let mut scheduler = RefreshScheduler::new(
            store(),
            Box::new(FixedClock(key("08:44"))),
            renderer(),
            Box::new(sink.clone()),
            Cadence::MinuteAligned,
        );
        assert_eq!(scheduler.run_once().await.unwrap(), key("08:43"));
        assert_eq!(sink.frames.lock().unwrap().len(), 1);
        assert!(*sink.released.lock().unwrap());
    }

    #[tokio::test]
    async fn test_presentation_failure_is_reported() {
        let sink = RecordingSink {
            fail: true,
            ..RecordingSink::default()
        };
        let mut scheduler = RefreshScheduler::new(
            store(),
            Box::new(FixedClock(key("08:43"))),
            renderer(),
            Box::new(sink.clone()),
            Cadence::MinuteAligned,
        );
        assert!(matches!(scheduler.run_once().await, Err(CycleError::Present(_))));
        assert!(*sink.released.lock().unwrap());
    }

    /// Holds its thread the way an unanswered NTP query does
    struct SlowClock {
        delay: Duration,
        finished: Arc<Mutex<Option<std::time::Instant>>>,
    }

    impl TimeSource for SlowClock {
        fn now(&mut self) -> Result<TimeKey, TimeSourceError> {
            std::thread::sleep(self.delay);
            *self.finished.lock().unwrap() = Some(std::time::Instant::now());
            Ok("08:43".parse().unwrap())
        }

        fn describe(&self) -> String {
            "slow".into()
        }
    }

    #[tokio::test]
    async fn test_slow_time_source_leaves_runtime_free() {
        let finished = Arc::new(Mutex::new(None));
        let clock = SlowClock {
            delay: Duration::from_millis(300),
            finished: finished.clone(),
        };
        let sink = RecordingSink::default();
        let mut scheduler = RefreshScheduler::new(
            store(),
            Box::new(clock),
            renderer(),
            Box::new(sink.clone()),
            Cadence::MinuteAligned,
        );

        // Single-threaded runtime: the ticker only runs if the query is off-thread
        let ticker = async {
            time::sleep(Duration::from_millis(20)).await;
            std::time::Instant::now()
        };
        let (result, ticked) = tokio::join!(scheduler.run_once(), ticker);

        assert_eq!(result.unwrap(), key("08:43"));
        let finished = finished.lock().unwrap().unwrap();
        assert!(ticked < finished);
        assert_eq!(sink.frames.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_dropping_scheduler_releases_sink() {
        let sink = RecordingSink::default();
        let scheduler = RefreshScheduler::new(
            store(),
            Box::new(FixedClock(key("08:43"))),
            renderer(),
            Box::new(sink.clone()),
            Cadence::MinuteAligned,
        );
        drop(scheduler);
        assert!(*sink.released.lock().unwrap());
    }

    #[test]
    fn test_until_next_minute() {
        let t = NaiveTime::from_hms_milli_opt(8, 43, 30, 250).unwrap();
        assert_eq!(until_next_minute(&t), Duration::from_millis(29_750));
        let t = NaiveTime::from_hms_opt(8, 43, 0).unwrap();
        assert_eq!(until_next_minute(&t), Duration::from_secs(60));
        let t = NaiveTime::from_hms_milli_opt(8, 43, 59, 999).unwrap();
        assert_eq!(until_next_minute(&t), Duration::from_millis(1));
    }
}
