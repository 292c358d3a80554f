use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Why a frontier stopped handing out work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Queue drained with no expansion in flight.
    Completed,
    /// Node budget used up.
    BudgetReached,
    /// Cancelled by the deadline supervisor.
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// Newly visited and counted against the budget. Not queued until
    /// [`Frontier::enqueue`] is called.
    Claimed,
    AlreadyVisited,
    BudgetExhausted,
}

struct FrontierState {
    queue: VecDeque<String>,
    visited: HashSet<String>,
    claimed: usize,
    in_flight: usize,
    dropped: usize,
    closed: Option<Termination>,
}

/// Work queue, visited set and node budget behind one lock.
///
/// A name is visited and counted in one critical section, so at most
/// `max_nodes` distinct names are ever claimed or dequeued. Claiming and
/// queueing are separate steps: the claimer queues a name only once it is
/// ready to be expanded.
pub struct Frontier {
    state: Mutex<FrontierState>,
    notify: Notify,
    max_nodes: usize,
    capacity: usize,
}

impl Frontier {
    /// The seed is visited, counted and queued before any worker starts.
    pub fn seeded(seed: impl Into<String>, max_nodes: usize) -> Self {
        let seed = seed.into();
        let capacity = max_nodes.max(1);
        let mut queue = VecDeque::with_capacity(capacity);
        queue.push_back(seed.clone());

        Self {
            state: Mutex::new(FrontierState {
                queue,
                visited: HashSet::from([seed]),
                claimed: 1,
                in_flight: 0,
                dropped: 0,
                closed: None,
            }),
            notify: Notify::new(),
            max_nodes,
            capacity,
        }
    }

    /// Treat `names` as already expanded: they are neither counted nor queued.
    pub fn mark_visited<I>(&self, names: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut state = self.lock();
        state.visited.extend(names);
    }

    fn lock(&self) -> MutexGuard<'_, FrontierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Visit `name` if it is new and the budget allows. Never blocks.
    pub fn claim(&self, name: &str) -> Claim {
        let mut state = self.lock();
        if state.visited.contains(name) {
            return Claim::AlreadyVisited;
        }
        if state.claimed >= self.max_nodes {
            return Claim::BudgetExhausted;
        }

        state.visited.insert(name.to_string());
        state.claimed += 1;
        Claim::Claimed
    }

    /// Queue a claimed name for expansion. Never blocks; a full queue drops it.
    pub fn enqueue(&self, name: impl Into<String>) {
        let name = name.into();
        let mut state = self.lock();
        if state.queue.len() < self.capacity {
            state.queue.push_back(name);
        } else {
            state.dropped += 1;
            warn!(concept = %name, "work queue full, dropping");
        }
        drop(state);

        self.notify.notify_waiters();
    }

    /// Next name to expand, or `None` once the frontier is closed.
    ///
    /// Waits while the queue is empty but other expansions are still in
    /// flight. Closes with `BudgetReached` as soon as the budget is spent.
    pub async fn next(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.lock();
                if state.closed.is_some() {
                    return None;
                }
                if state.claimed >= self.max_nodes {
                    self.close(&mut state, Termination::BudgetReached);
                    return None;
                }
                if let Some(name) = state.queue.pop_front() {
                    state.in_flight += 1;
                    return Some(name);
                } else if state.in_flight == 0 {
                    self.close(&mut state, Termination::Completed);
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Marks one expansion handed out by [`next`](Self::next) as done.
    pub fn complete(&self) {
        let mut state = self.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        drop(state);
        self.notify.notify_waiters();
    }

    /// Stop handing out work. In-flight expansions are left to finish.
    pub fn cancel(&self) {
        let mut state = self.lock();
        if state.closed.is_none() {
            self.close(&mut state, Termination::TimedOut);
        }
    }

    fn close(&self, state: &mut FrontierState, reason: Termination) {
        debug!(?reason, claimed = state.claimed, "frontier closed");
        state.closed = Some(reason);
        self.notify.notify_waiters();
    }

    pub fn termination(&self) -> Option<Termination> {
        self.lock().closed
    }

    pub fn is_cancelled(&self) -> bool {
        self.termination() == Some(Termination::TimedOut)
    }

    pub fn is_visited(&self, name: &str) -> bool {
        self.lock().visited.contains(name)
    }

    pub fn visited(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().visited.iter().cloned().collect();
        names.sort();
        names
    }

    pub fn claimed(&self) -> usize {
        self.lock().claimed
    }

    pub fn dropped(&self) -> usize {
        self.lock().dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_seed_is_visited_and_counted() {
        let frontier = Frontier::seeded("Seed", 3);
        assert!(frontier.is_visited("Seed"));
        assert_eq!(frontier.claimed(), 1);
        assert_eq!(frontier.claim("Seed"), Claim::AlreadyVisited);
        assert_eq!(frontier.next().await.as_deref(), Some("Seed"));
    }

    #[tokio::test]
    async fn test_budget_caps_claims() {
        let frontier = Frontier::seeded("Seed", 3);
        assert_eq!(frontier.claim("A1"), Claim::Claimed);
        assert_eq!(frontier.claim("B1"), Claim::Claimed);
        assert_eq!(frontier.claim("C1"), Claim::BudgetExhausted);
        assert_eq!(frontier.claimed(), 3);
        assert!(!frontier.is_visited("C1"));
    }

    #[tokio::test]
    async fn test_claimed_name_waits_for_enqueue() {
        let frontier = Frontier::seeded("Root", 10);
        assert_eq!(frontier.next().await.as_deref(), Some("Root"));
        assert_eq!(frontier.claim("Pending"), Claim::Claimed);
        assert_eq!(frontier.claim("Failed"), Claim::Claimed);

        frontier.enqueue("Pending");
        frontier.complete();

        assert_eq!(frontier.next().await.as_deref(), Some("Pending"));
        frontier.complete();
        assert_eq!(frontier.next().await, None);
        assert_eq!(frontier.termination(), Some(Termination::Completed));
        assert!(frontier.is_visited("Failed"));
    }

    #[test]
    fn test_marked_names_are_not_counted() {
        let frontier = Frontier::seeded("Seed", 5);
        frontier.mark_visited(["Old".to_string()]);
        assert_eq!(frontier.claim("Old"), Claim::AlreadyVisited);
        assert_eq!(frontier.claimed(), 1);
    }

    #[tokio::test]
    async fn test_budget_of_one_closes_immediately() {
        let frontier = Frontier::seeded("Only", 1);
        assert_eq!(frontier.next().await, None);
        assert_eq!(frontier.termination(), Some(Termination::BudgetReached));
    }

    #[tokio::test]
    async fn test_drains_to_completed() {
        let frontier = Frontier::seeded("Root", 10);
        let root = frontier.next().await.unwrap();
        assert_eq!(root, "Root");
        assert_eq!(frontier.claim("Leaf"), Claim::Claimed);
        frontier.enqueue("Leaf");
        frontier.complete();

        assert_eq!(frontier.next().await.as_deref(), Some("Leaf"));
        frontier.complete();
        assert_eq!(frontier.next().await, None);
        assert_eq!(frontier.termination(), Some(Termination::Completed));
    }

    #[tokio::test]
    async fn test_idle_worker_waits_for_in_flight_discovery() {
        let frontier = Arc::new(Frontier::seeded("Root", 10));
        frontier.next().await.unwrap();

        let waiter = {
            let frontier = frontier.clone();
            tokio::spawn(async move { frontier.next().await })
        };
        frontier.claim("Discovered");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        frontier.enqueue("Discovered");
        assert_eq!(waiter.await.unwrap().as_deref(), Some("Discovered"));
    }

    #[tokio::test]
    async fn test_cancel_wakes_waiters() {
        let frontier = Arc::new(Frontier::seeded("Root", 10));
        frontier.next().await.unwrap();

        let waiter = {
            let frontier = frontier.clone();
            tokio::spawn(async move { frontier.next().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        frontier.cancel();

        assert_eq!(waiter.await.unwrap(), None);
        assert!(frontier.is_cancelled());
    }
}
