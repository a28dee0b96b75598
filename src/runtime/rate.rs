//! Debounce and throttle gates.
//!
//! A gate sits in front of one operation of one widget and decides when an
//! exchange actually happens. Callers folded into a later exchange resolve
//! with that exchange's outcome; callers dropped by the policy resolve with
//! `null`.
//!
//! ```text
//! debounce(100)           call call call ........ fire
//!                          0    20   40        140
//! debounce(100, immediate) fire call call ........ (window closes at 140)
//! throttle(100)           fire call call | fire(last)
//!                          0    20   40   100
//! ```

use std::{sync::Arc, time::Duration};

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use super::RuntimeError;
use crate::protocol::RatePolicy;

pub(crate) type Outcome = Result<Value, RuntimeError>;

/// Performs the exchange once a gate decides to fire.
pub(crate) type Fire = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Outcome> + Send + Sync>;

#[derive(Default)]
struct GateState {
    /// Bumped on every call; a timer only acts if it is still current
    generation: u64,
    window_open: bool,
    pending: Option<Vec<Value>>,
    waiters: Vec<oneshot::Sender<Outcome>>,
}

impl GateState {
    fn wait(&mut self, args: Vec<Value>) -> oneshot::Receiver<Outcome> {
        let (tx, rx) = oneshot::channel();
        self.pending = Some(args);
        self.waiters.push(tx);
        rx
    }
}

#[derive(Clone)]
pub(crate) struct RateGate {
    policy: RatePolicy,
    fire: Fire,
    state: Arc<Mutex<GateState>>,
}

impl RateGate {
    pub fn new(policy: RatePolicy, fire: Fire) -> Self {
        Self {
            policy,
            fire,
            state: Arc::default(),
        }
    }

    pub async fn submit(&self, args: Vec<Value>) -> Outcome {
        match self.policy {
            RatePolicy::Debounce {
                wait_ms,
                immediate: false,
            } => self.debounce(args, Duration::from_millis(wait_ms)).await,
            RatePolicy::Debounce {
                wait_ms,
                immediate: true,
            } => self.debounce_leading(args, Duration::from_millis(wait_ms)).await,
            RatePolicy::Throttle {
                wait_ms,
                leading,
                trailing,
            } => {
                self.throttle(args, Duration::from_millis(wait_ms), leading, trailing)
                    .await
            }
        }
    }

    async fn debounce(&self, args: Vec<Value>, wait: Duration) -> Outcome {
        let (rx, generation) = {
            let mut state = self.state.lock();
            state.generation += 1;
            (state.wait(args), state.generation)
        };

        let gate = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            let (args, waiters) = {
                let mut state = gate.state.lock();
                if state.generation != generation {
                    return;
                }
                (state.pending.take(), std::mem::take(&mut state.waiters))
            };
            if let Some(args) = args {
                resolve(waiters, (gate.fire)(args).await);
            }
        });

        rx.await.unwrap_or(Err(RuntimeError::Abandoned))
    }

    async fn debounce_leading(&self, args: Vec<Value>, wait: Duration) -> Outcome {
        let (fire_now, generation) = {
            let mut state = self.state.lock();
            state.generation += 1;
            let fire_now = !state.window_open;
            state.window_open = true;
            (fire_now, state.generation)
        };

        // Every call pushes the window end further out
        let gate = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            let mut state = gate.state.lock();
            if state.generation == generation {
                state.window_open = false;
            }
        });

        if fire_now {
            (self.fire)(args).await
        } else {
            Ok(Value::Null)
        }
    }

    async fn throttle(&self, args: Vec<Value>, wait: Duration, leading: bool, trailing: bool) -> Outcome {
        enum Entry {
            Dropped,
            Queued(oneshot::Receiver<Outcome>),
            Opened(Option<oneshot::Receiver<Outcome>>),
        }

        let entry = {
            let mut state = self.state.lock();
            if state.window_open {
                if trailing {
                    Entry::Queued(state.wait(args.clone()))
                } else {
                    Entry::Dropped
                }
            } else {
                state.window_open = true;
                Entry::Opened((!leading).then(|| state.wait(args.clone())))
            }
        };

        match entry {
            Entry::Dropped => Ok(Value::Null),
            Entry::Queued(rx) => rx.await.unwrap_or(Err(RuntimeError::Abandoned)),
            Entry::Opened(queued) => {
                let gate = self.clone();
                tokio::spawn(async move { gate.run_window(wait, trailing).await });
                match queued {
                    None => (self.fire)(args).await,
                    Some(rx) => rx.await.unwrap_or(Err(RuntimeError::Abandoned)),
                }
            }
        }
    }

    /// Close the window after `wait`, firing the trailing call if any.
    /// A trailing fire opens a fresh window.
    async fn run_window(&self, wait: Duration, trailing: bool) {
        loop {
            tokio::time::sleep(wait).await;
            let (args, waiters) = {
                let mut state = self.state.lock();
                let args = state.pending.take();
                let waiters = std::mem::take(&mut state.waiters);
                if !(trailing && args.is_some()) {
                    state.window_open = false;
                }
                (args, waiters)
            };
            match args {
                Some(args) if trailing => resolve(waiters, (self.fire)(args).await),
                _ => {
                    resolve(waiters, Ok(Value::Null));
                    return;
                }
            }
        }
    }
}

fn resolve(waiters: Vec<oneshot::Sender<Outcome>>, outcome: Outcome) {
    for waiter in waiters {
        let _ = waiter.send(outcome.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    struct Recorder {
        start: Instant,
        fired: Mutex<Vec<(Duration, Vec<Value>)>>,
        count: AtomicUsize,
    }

    fn recorder() -> (Arc<Recorder>, Fire) {
        let rec = Arc::new(Recorder {
            start: Instant::now(),
            fired: Mutex::new(Vec::new()),
            count: AtomicUsize::new(0),
        });
        let r = Arc::clone(&rec);
        let fire: Fire = Arc::new(move |args: Vec<Value>| {
            let r = Arc::clone(&r);
            Box::pin(async move {
                let n = r.count.fetch_add(1, Ordering::SeqCst) + 1;
                r.fired.lock().push((r.start.elapsed(), args));
                Ok(json!(n))
            })
        });
        (rec, fire)
    }

    async fn burst(gate: &RateGate, calls: usize, gap_ms: u64) -> Vec<Outcome> {
        let mut handles = Vec::new();
        for i in 0..calls {
            let g = gate.clone();
            handles.push(tokio::spawn(async move { g.submit(vec![json!(i)]).await }));
            if i + 1 < calls {
                tokio::time::sleep(Duration::from_millis(gap_ms)).await;
            }
        }
        let mut out = Vec::new();
        for h in handles {
            out.push(h.await.unwrap());
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_coalesces_burst_into_one_exchange() {
        let (rec, fire) = recorder();
        let gate = RateGate::new(
            RatePolicy::Debounce {
                wait_ms: 100,
                immediate: false,
            },
            fire,
        );

        // Five calls, 12ms apart: last one at 48ms
        let outcomes = burst(&gate, 5, 12).await;

        assert_eq!(rec.count.load(Ordering::SeqCst), 1);
        let fired = rec.fired.lock();
        assert_eq!(fired[0].1, vec![json!(4)]);
        let at = fired[0].0.as_millis();
        assert!((148..=150).contains(&at), "fired at {at}ms");
        assert!(outcomes.iter().all(|o| o == &Ok(json!(1))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_immediate_fires_first_only() {
        let (rec, fire) = recorder();
        let gate = RateGate::new(
            RatePolicy::Debounce {
                wait_ms: 100,
                immediate: true,
            },
            fire,
        );

        let outcomes = burst(&gate, 3, 20).await;
        assert_eq!(outcomes[0], Ok(json!(1)));
        assert_eq!(outcomes[1], Ok(Value::Null));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(rec.count.load(Ordering::SeqCst), 1);
        assert_eq!(rec.fired.lock()[0].1, vec![json!(0)]);

        // Window closed: next call fires again
        assert_eq!(gate.submit(vec![json!(9)]).await, Ok(json!(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_leading_and_trailing() {
        let (rec, fire) = recorder();
        let gate = RateGate::new(
            RatePolicy::Throttle {
                wait_ms: 100,
                leading: true,
                trailing: true,
            },
            fire,
        );

        let outcomes = burst(&gate, 4, 20).await;
        assert_eq!(outcomes[0], Ok(json!(1)));
        assert_eq!(&outcomes[1..], &[Ok(json!(2)), Ok(json!(2)), Ok(json!(2))]);

        let fired = rec.fired.lock();
        assert_eq!(fired.len(), 2);
        assert_eq!(fired[0].0.as_millis(), 0);
        assert_eq!(fired[1].1, vec![json!(3)]);
        assert_eq!(fired[1].0.as_millis(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_without_trailing_drops_extra_calls() {
        let (rec, fire) = recorder();
        let gate = RateGate::new(
            RatePolicy::Throttle {
                wait_ms: 100,
                leading: true,
                trailing: false,
            },
            fire,
        );
        let outcomes = burst(&gate, 3, 10).await;
        assert_eq!(outcomes, vec![Ok(json!(1)), Ok(Value::Null), Ok(Value::Null)]);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(rec.count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_trailing_only() {
        let (rec, fire) = recorder();
        let gate = RateGate::new(
            RatePolicy::Throttle {
                wait_ms: 50,
                leading: false,
                trailing: true,
            },
            fire,
        );
        let outcomes = burst(&gate, 2, 10).await;
        assert_eq!(outcomes, vec![Ok(json!(1)), Ok(json!(1))]);
        let fired = rec.fired.lock();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].0.as_millis(), 50);
        assert_eq!(fired[0].1, vec![json!(1)]);
    }
}
