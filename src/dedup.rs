use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;

/// Collapses concurrent requests for the same key into one underlying call.
///
/// The first caller for a key runs the work; callers arriving while it is in
/// flight wait for and share its result. The key is released as soon as the
/// work settles, so the next call after that starts a fresh request.
#[derive(Debug)]
pub struct SingleFlight<T> {
    inflight: Mutex<HashMap<String, watch::Receiver<Option<T>>>>,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }
}

enum Role<T> {
    Leader(watch::Sender<Option<T>>),
    Follower(watch::Receiver<Option<T>>),
}

struct InflightGuard<'a, T> {
    owner: &'a SingleFlight<T>,
    key: &'a str,
}

impl<T> Drop for InflightGuard<'_, T> {
    fn drop(&mut self) {
        self.owner
            .inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(self.key);
    }
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub async fn run<F, Fut>(&self, key: &str, work: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let mut work = Some(work);
        loop {
            let role = {
                let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
                match inflight.get(key) {
                    Some(receiver) => Role::Follower(receiver.clone()),
                    None => {
                        let (sender, receiver) = watch::channel(None);
                        inflight.insert(key.to_string(), receiver);
                        Role::Leader(sender)
                    }
                }
            };

            match role {
                Role::Leader(sender) => {
                    let guard = InflightGuard { owner: self, key };
                    // A follower never reaches this branch, so the work is still here.
                    let Some(work) = work.take() else {
                        drop(guard);
                        continue;
                    };
                    let value = work().await;
                    drop(guard);
                    let _ = sender.send(Some(value.clone()));
                    return value;
                }
                Role::Follower(mut receiver) => {
                    if let Ok(settled) = receiver.wait_for(Option::is_some).await {
                        if let Some(value) = &*settled {
                            return value.clone();
                        }
                    }
                    // The leader was cancelled before settling; retry and possibly lead.
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SingleFlight;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn concurrent_calls_share_one_execution() {
        let flight = Arc::new(SingleFlight::<usize>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let work = |calls: Arc<AtomicUsize>| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            calls.fetch_add(1, Ordering::SeqCst) + 41
        };

        let (a, b) = tokio::join!(
            flight.run("all", || work(calls.clone())),
            flight.run("all", || work(calls.clone()))
        );
        assert_eq!((a, b), (41, 41));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!flight.is_in_flight("all"));

        let c = flight.run("all", || work(calls.clone())).await;
        assert_eq!(c, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn follower_takes_over_when_leader_is_cancelled() {
        let flight = Arc::new(SingleFlight::<&'static str>::new());

        let leader = {
            let flight = flight.clone();
            tokio::spawn(async move {
                flight
                    .run("all", || async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        "leader"
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert!(flight.is_in_flight("all"));

        let follower = {
            let flight = flight.clone();
            tokio::spawn(async move { flight.run("all", || async { "follower" }).await })
        };
        tokio::task::yield_now().await;
        leader.abort();

        assert_eq!(follower.await.expect("follower"), "follower");
        assert!(!flight.is_in_flight("all"));
    }
}
