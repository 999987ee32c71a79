//! Interval tasks with an explicit start/stop lifecycle.
//!
//! Time comes from a [`Clock`], so tests drive tasks with a [`ManualClock`]
//! instead of sleeping. Tasks never run callbacks themselves: the owner
//! polls them and acts on the number of periods that elapsed.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

pub trait Clock {
    /// Time elapsed since an arbitrary, fixed epoch
    fn now(&self) -> Duration;
}

/// Monotonic wall clock
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }
}

/// Clock advanced by hand. Clones share the same time.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct ManualClock(std::rc::Rc<std::cell::Cell<Duration>>);

#[cfg(test)]
impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.0.set(self.0.get() + by);
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.0.get()
    }
}

/// Auto-refresh choices offered to operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshInterval {
    #[default]
    Off,
    Secs30,
    Secs60,
    Secs300,
}

impl RefreshInterval {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "off" | "0" => Some(Self::Off),
            "30" | "30s" => Some(Self::Secs30),
            "60" | "60s" | "1m" => Some(Self::Secs60),
            "300" | "300s" | "5m" => Some(Self::Secs300),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Secs30 => "30",
            Self::Secs60 => "60",
            Self::Secs300 => "300",
        }
    }

    pub fn period(&self) -> Option<Duration> {
        match self {
            Self::Off => None,
            Self::Secs30 => Some(Duration::from_secs(30)),
            Self::Secs60 => Some(Duration::from_secs(60)),
            Self::Secs300 => Some(Duration::from_secs(300)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IntervalTask {
    interval: RefreshInterval,
    next_fire: Option<Duration>,
}

impl IntervalTask {
    pub fn new(interval: RefreshInterval) -> Self {
        Self {
            interval,
            next_fire: None,
        }
    }

    /// Start counting from `now`. An `Off` task stays stopped.
    pub fn start(&mut self, now: Duration) -> bool {
        match self.interval.period() {
            Some(period) => {
                self.next_fire = Some(now + period);
                true
            }
            None => {
                self.next_fire = None;
                false
            }
        }
    }

    /// Stop and discard any pending fire
    pub fn stop(&mut self) {
        self.next_fire = None;
    }

    pub fn is_running(&self) -> bool {
        self.next_fire.is_some()
    }

    /// Whole seconds until the next fire, never below 1 while running
    pub fn countdown(&self, now: Duration) -> Option<u64> {
        let next = self.next_fire?;
        let remaining = next.saturating_sub(now);
        let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
        Some(secs.max(1))
    }

    /// Number of periods elapsed since the last fire; advances the schedule
    pub fn poll(&mut self, now: Duration) -> u32 {
        let (Some(next), Some(period)) = (self.next_fire, self.interval.period()) else {
            return 0;
        };
        if now < next {
            return 0;
        }
        let behind = now - next;
        let fired = 1 + (behind.as_nanos() / period.as_nanos()) as u32;
        self.next_fire = Some(next + period * fired);
        fired
    }
}

/// Named interval tasks owned by one component
#[derive(Debug, Default)]
pub struct Scheduler {
    tasks: BTreeMap<String, IntervalTask>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a stopped task
    pub fn add(&mut self, name: &str, interval: RefreshInterval) {
        self.tasks
            .insert(name.to_string(), IntervalTask::new(interval));
    }

    pub fn start(&mut self, name: &str, now: Duration) -> bool {
        self.tasks
            .get_mut(name)
            .map(|t| t.start(now))
            .unwrap_or(false)
    }

    pub fn stop(&mut self, name: &str) {
        if let Some(task) = self.tasks.get_mut(name) {
            task.stop();
        }
    }

    pub fn stop_all(&mut self) {
        for task in self.tasks.values_mut() {
            task.stop();
        }
    }

    pub fn task(&self, name: &str) -> Option<&IntervalTask> {
        self.tasks.get(name)
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.tasks.get(name).is_some_and(|t| t.is_running())
    }

    /// Names of tasks that fired since the last call, in name order.
    /// Several elapsed periods count as a single fire.
    pub fn due(&mut self, now: Duration) -> Vec<String> {
        self.tasks
            .iter_mut()
            .filter_map(|(name, task)| (task.poll(now) > 0).then(|| name.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_refresh_interval_parse() {
        assert_eq!(RefreshInterval::from_str("off"), Some(RefreshInterval::Off));
        assert_eq!(RefreshInterval::from_str("30"), Some(RefreshInterval::Secs30));
        assert_eq!(RefreshInterval::from_str("1m"), Some(RefreshInterval::Secs60));
        assert_eq!(RefreshInterval::from_str("300"), Some(RefreshInterval::Secs300));
        assert_eq!(RefreshInterval::from_str("45"), None);
        assert_eq!(RefreshInterval::Secs300.as_str(), "300");
        assert_eq!(RefreshInterval::Off.period(), None);
    }

    #[test]
    fn test_off_task_never_starts() {
        let mut task = IntervalTask::new(RefreshInterval::Off);
        assert!(!task.start(secs(0)));
        assert!(!task.is_running());
        assert_eq!(task.poll(secs(1000)), 0);
        assert_eq!(task.countdown(secs(0)), None);
    }

    #[test]
    fn test_countdown_and_fire_with_manual_clock() {
        let clock = ManualClock::new();
        let mut task = IntervalTask::new(RefreshInterval::Secs30);
        assert!(task.start(clock.now()));
        assert_eq!(task.countdown(clock.now()), Some(30));

        clock.advance(secs(29));
        assert_eq!(task.poll(clock.now()), 0);
        assert_eq!(task.countdown(clock.now()), Some(1));

        clock.advance(Duration::from_millis(500));
        assert_eq!(task.countdown(clock.now()), Some(1));

        clock.advance(Duration::from_millis(500));
        assert_eq!(task.poll(clock.now()), 1);
        assert_eq!(task.countdown(clock.now()), Some(30));
        assert_eq!(task.poll(clock.now()), 0);
    }

    #[test]
    fn test_poll_counts_missed_periods() {
        let mut task = IntervalTask::new(RefreshInterval::Secs60);
        task.start(secs(0));
        assert_eq!(task.poll(secs(185)), 3);
        // next fire is at 240
        assert_eq!(task.countdown(secs(185)), Some(55));
    }

    #[test]
    fn test_stop_discards_pending_fire() {
        let mut task = IntervalTask::new(RefreshInterval::Secs30);
        task.start(secs(0));
        task.stop();
        assert!(!task.is_running());
        assert_eq!(task.poll(secs(120)), 0);
    }

    #[test]
    fn test_scheduler_due() {
        let clock = ManualClock::new();
        let mut sched = Scheduler::new();
        sched.add("venues", RefreshInterval::Secs30);
        sched.add("analytics", RefreshInterval::Secs60);
        sched.add("disabled", RefreshInterval::Off);

        assert!(sched.start("venues", clock.now()));
        assert!(sched.start("analytics", clock.now()));
        assert!(!sched.start("disabled", clock.now()));
        assert!(!sched.start("missing", clock.now()));

        clock.advance(secs(30));
        assert_eq!(sched.due(clock.now()), vec!["venues".to_string()]);

        clock.advance(secs(30));
        assert_eq!(
            sched.due(clock.now()),
            vec!["analytics".to_string(), "venues".to_string()]
        );

        sched.stop("venues");
        clock.advance(secs(60));
        assert_eq!(sched.due(clock.now()), vec!["analytics".to_string()]);

        sched.stop_all();
        clock.advance(secs(600));
        assert!(sched.due(clock.now()).is_empty());
        assert!(!sched.is_running("analytics"));
    }

    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::new();
        let other = clock.clone();
        clock.advance(secs(5));
        assert_eq!(other.now(), secs(5));
    }
}
