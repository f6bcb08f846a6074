use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard},
    task::{Context, Poll, Waker},
    thread,
    time::{Duration, Instant},
};

use futures::{
    future::{select, Either},
    pin_mut,
};
use parse_display::Display;


#[derive(Default)]
struct Alarm {
    rung: bool,
    waker: Option<Waker>,
}

fn lock(alarm: &Mutex<Alarm>) -> MutexGuard<'_, Alarm> {
    alarm.lock().unwrap_or_else(|e| e.into_inner())
}

/// Completes once `deadline` has passed.
///
/// The first pending poll arms a thread that wakes the task at the deadline.
struct Deadline {
    deadline: Instant,
    alarm: Option<Arc<Mutex<Alarm>>>,
}

impl Deadline {
    fn arm(deadline: Instant) -> Arc<Mutex<Alarm>> {
        let alarm = Arc::new(Mutex::new(Alarm::default()));
        let ringer = alarm.clone();
        thread::spawn(move || {
            thread::sleep(deadline.saturating_duration_since(Instant::now()));
            let waker = {
                let mut alarm = lock(&ringer);
                alarm.rung = true;
                alarm.waker.take()
            };
            if let Some(waker) = waker {
                waker.wake();
            }
        });
        alarm
    }
}

impl Future for Deadline {
    type Output = ();
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if Instant::now() >= self.deadline {
            return Poll::Ready(());
        }
        let deadline = self.deadline;
        let alarm = self.alarm.get_or_insert_with(|| Deadline::arm(deadline));
        let mut alarm = lock(alarm);
        if alarm.rung {
            return Poll::Ready(());
        }
        if !alarm.waker.as_ref().is_some_and(|w| w.will_wake(cx.waker())) {
            alarm.waker = Some(cx.waker().clone());
        }
        Poll::Pending
    }
}

pub async fn sleep(duration: Duration) {
    if duration > Duration::ZERO {
        Deadline {
            deadline: Instant::now() + duration,
            alarm: None,
        }
        .await
    }
}

#[derive(Debug, Display, PartialEq, Eq)]
#[display("timed out")]
pub struct TimeoutError {
    _private: (),
}
impl TimeoutError {
    fn new() -> Self {
        Self { _private: () }
    }
}

impl std::error::Error for TimeoutError {}

/// Runs `fut`, giving up after `duration`.
pub async fn with_timeout_async<T>(
    fut: impl Future<Output = T>,
    duration: Duration,
) -> Result<T, TimeoutError> {
    let timeout = sleep(duration);
    pin_mut!(fut);
    pin_mut!(timeout);
    match select(fut, timeout).await {
        Either::Left((value, _)) => Ok(value),
        Either::Right(_) => Err(TimeoutError::new()),
    }
}
