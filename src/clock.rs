/*
 *
 *    Monotonic game clock driven by a high resolution tick counter.
 *
 *    current_time = time_base + time_offset, where time_offset is measured from base_counter.
 *    When that offset stops fitting in the time representation the offset is folded into the base
 *    and measuring restarts from the last observed counter.
 *
 *    Time spent suspended is banked and taken out of the next adjusted elapsed time only.
 *
 * */

use std::time::Duration;

use crate::error::OverflowError;

const NANOS_PER_SECOND: i128 = 1_000_000_000;

///Source of raw counter ticks. `frequency` is ticks per second and never changes.
pub trait TickSource: Send {
    fn counter(&self) -> i64;
    fn frequency(&self) -> i64;
}

///The process-wide performance counter.
#[derive(Debug, Clone, Copy)]
pub struct SystemCounter {
    #[cfg(not(windows))]
    anchor: std::time::Instant,
}

impl SystemCounter {
    pub fn new() -> Self {
        Self {
            #[cfg(not(windows))]
            anchor: std::time::Instant::now(),
        }
    }
}

impl Default for SystemCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(windows)]
impl TickSource for SystemCounter {
    fn counter(&self) -> i64 {
        use windows::Win32::System::Performance::QueryPerformanceCounter;
        let mut value = 0i64;
        //Cannot fail on anything newer than XP.
        let _ = unsafe { QueryPerformanceCounter(&mut value) };
        value
    }

    fn frequency(&self) -> i64 {
        use windows::Win32::System::Performance::QueryPerformanceFrequency;
        let mut value = 0i64;
        let _ = unsafe { QueryPerformanceFrequency(&mut value) };
        value.max(1)
    }
}

#[cfg(not(windows))]
impl TickSource for SystemCounter {
    fn counter(&self) -> i64 {
        i64::try_from(self.anchor.elapsed().as_nanos()).unwrap_or(i64::MAX)
    }

    fn frequency(&self) -> i64 {
        NANOS_PER_SECOND as i64
    }
}

///Converts a counter delta into signed nanoseconds.
///The multiply happens in i128; the result must fit an i64.
pub fn counter_to_nanos(delta: i128, frequency: i64) -> Result<i64, OverflowError> {
    if frequency <= 0 {
        return Err(OverflowError);
    }
    let nanos = delta
        .checked_mul(NANOS_PER_SECOND)
        .ok_or(OverflowError)?
        / frequency as i128;
    i64::try_from(nanos).map_err(|_| OverflowError)
}

fn counter_to_duration(delta: i128, frequency: i64) -> Result<Duration, OverflowError> {
    let nanos = counter_to_nanos(delta, frequency)?;
    Ok(Duration::from_nanos(nanos.max(0) as u64))
}

pub struct GameClock {
    source: Box<dyn TickSource>,
    frequency: i64,

    time_base: Duration,
    time_offset: Duration,
    base_counter: i64,
    last_counter: Option<i64>,

    suspended_ticks: i128,
    suspend_depth: u32,
    suspend_start: i64,

    elapsed: Duration,
    elapsed_adjusted: Duration,
}

impl GameClock {
    pub fn new() -> Self {
        Self::with_source(Box::new(SystemCounter::new()))
    }

    pub fn with_source(source: Box<dyn TickSource>) -> Self {
        let frequency = source.frequency();
        let mut clock = Self {
            source,
            frequency,
            time_base: Duration::ZERO,
            time_offset: Duration::ZERO,
            base_counter: 0,
            last_counter: None,
            suspended_ticks: 0,
            suspend_depth: 0,
            suspend_start: 0,
            elapsed: Duration::ZERO,
            elapsed_adjusted: Duration::ZERO,
        };
        clock.reset();
        clock
    }

    pub fn reset(&mut self) {
        self.time_base = Duration::ZERO;
        self.time_offset = Duration::ZERO;
        self.base_counter = self.source.counter();
        self.last_counter = None;
    }

    pub fn suspend(&mut self) {
        self.suspend_depth += 1;
        if self.suspend_depth == 1 {
            self.suspend_start = self.source.counter();
        }
    }

    pub fn resume(&mut self) {
        if self.suspend_depth == 0 {
            log::warn!("GameClock::resume called without a matching suspend");
            return;
        }
        self.suspend_depth -= 1;
        if self.suspend_depth == 0 {
            let counter = self.source.counter();
            self.suspended_ticks += counter as i128 - self.suspend_start as i128;
            self.suspend_start = 0;
        }
    }

    pub fn step(&mut self) {
        let counter = self.source.counter();
        let last = *self.last_counter.get_or_insert(counter);

        self.time_offset = match counter_to_duration(counter as i128 - self.base_counter as i128, self.frequency) {
            Ok(offset) => offset,
            Err(OverflowError) => {
                log::debug!("Clock offset overflowed, rebasing");
                self.time_base = self.time_base.saturating_add(self.time_offset);
                self.base_counter = last;
                match counter_to_duration(counter as i128 - self.base_counter as i128, self.frequency) {
                    Ok(offset) => offset,
                    Err(OverflowError) => {
                        self.base_counter = counter;
                        Duration::ZERO
                    }
                }
            }
        };

        self.elapsed = counter_to_duration(counter as i128 - last as i128, self.frequency)
            .unwrap_or(Duration::ZERO);

        let adjusted_delta = counter as i128 - (last as i128 + self.suspended_ticks);
        self.elapsed_adjusted =
            counter_to_duration(adjusted_delta, self.frequency).unwrap_or(Duration::ZERO);
        self.suspended_ticks = 0;

        self.last_counter = Some(counter);
    }

    ///Real time between the last two steps.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    ///Like `elapsed`, minus time spent suspended.
    pub fn elapsed_adjusted(&self) -> Duration {
        self.elapsed_adjusted
    }

    pub fn current_time(&self) -> Duration {
        self.time_base.saturating_add(self.time_offset)
    }

    pub fn is_suspended(&self) -> bool {
        self.suspend_depth > 0
    }
}

impl Default for GameClock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for GameClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameClock")
            .field("current_time", &self.current_time())
            .field("elapsed", &self.elapsed)
            .field("elapsed_adjusted", &self.elapsed_adjusted)
            .field("suspend_depth", &self.suspend_depth)
            .finish()
    }
}

///Counter whose value is set by hand. Cloning shares the value.
#[cfg(test)]
#[derive(Debug, Clone)]
pub(crate) struct ManualCounter {
    value: std::sync::Arc<std::sync::atomic::AtomicI64>,
    frequency: i64,
}

#[cfg(test)]
impl ManualCounter {
    pub fn new(frequency: i64) -> Self {
        Self {
            value: Default::default(),
            frequency,
        }
    }

    pub fn set(&self, value: i64) {
        self.value.store(value, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn advance(&self, ticks: i64) {
        self.value.fetch_add(ticks, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl TickSource for ManualCounter {
    fn counter(&self) -> i64 {
        self.value.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn frequency(&self) -> i64 {
        self.frequency
    }
}
