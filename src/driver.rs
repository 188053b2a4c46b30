//! Scheduling glue.
//!
//! The engines never block and never own a thread: something external calls
//! [`Tick::tick`] repeatedly. That something can be a hand-rolled loop, the
//! cooperative [`Scheduler`] below, or the tokio [`drive`] adapter for
//! applications already running a current-thread runtime.

use std::time::Duration;

/// One cooperative unit of work.
pub trait Tick {
    /// Run one non-blocking pass.
    fn tick(&mut self);
}

/// Round-robin cooperative scheduler.
///
/// Tasks are ticked in registration order; nothing is removed automatically.
/// Useful for tests and simulations where several engines share one thread
/// and one manual clock.
#[derive(Default)]
pub struct Scheduler<'a> {
    tasks: Vec<Box<dyn Tick + 'a>>,
}

impl<'a> Scheduler<'a> {
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    pub fn add(&mut self, task: impl Tick + 'a) {
        self.tasks.push(Box::new(task));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tick every task once.
    pub fn tick_all(&mut self) {
        for task in &mut self.tasks {
            task.tick();
        }
    }

    /// Tick every task `rounds` times.
    pub fn run_for(&mut self, rounds: usize) {
        for _ in 0..rounds {
            self.tick_all();
        }
    }
}

/// Drive a task from a tokio interval until `until` returns true.
///
/// Intended for current-thread runtimes: the engines hold `Rc` state and are
/// deliberately not `Send`, so await this future directly instead of
/// spawning it.
pub async fn drive<L, F>(task: &mut L, period: Duration, mut until: F)
where
    L: Tick,
    F: FnMut(&L) -> bool,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        task.tick();
        if until(task) {
            return;
        }
    }
}
