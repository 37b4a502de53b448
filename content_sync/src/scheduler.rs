//! Decides which group to poll next and how long to wait afterwards.
//!
//! `SchedulerState` is the pure state machine and can be driven
//! synchronously. `Scheduler` wraps it with the primary polling loop, the
//! optional background loop and the control surface the rest of the node
//! uses (jump-in, focus changes, stop).

use crate::config::{GroupConfig, SchedulerConfig};
use crate::handlers::MergeReport;
use crate::pipeline::FetchPipeline;
use anyhow::{bail, Result};
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Some group is believed to have unseen content.
    Active,
    /// Every known group came back empty on its last poll.
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionReason {
    JumpIn,
    Active,
    Idle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub group_id: String,
    pub reason: SelectionReason,
}

#[derive(Debug, Clone)]
pub struct SchedulerState {
    groups: Vec<String>,
    saturated: HashSet<String>,
    jump_queue: VecDeque<String>,
    active_group: Option<String>,
    mode: SyncMode,
    history: VecDeque<String>,
    history_limit: usize,
}

impl SchedulerState {
    pub fn new(groups: Vec<String>, active_group: Option<String>, history_limit: usize) -> Self {
        let mut state = Self {
            groups: Vec::new(),
            saturated: HashSet::new(),
            jump_queue: VecDeque::new(),
            active_group,
            mode: SyncMode::Active,
            history: VecDeque::new(),
            history_limit: history_limit.max(1),
        };
        state.set_groups(groups);
        state
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    pub fn is_lazy(&self) -> bool {
        self.mode == SyncMode::Idle
    }

    pub fn active_group(&self) -> Option<&str> {
        self.active_group.as_deref()
    }

    pub fn is_saturated(&self, group_id: &str) -> bool {
        self.saturated.contains(group_id)
    }

    pub fn history(&self) -> impl Iterator<Item = &str> {
        self.history.iter().map(String::as_str)
    }

    pub fn pending_jumps(&self) -> impl Iterator<Item = &str> {
        self.jump_queue.iter().map(String::as_str)
    }

    fn knows(&self, group_id: &str) -> bool {
        self.groups.iter().any(|g| g == group_id)
    }

    /// Returns false if the group was already known.
    pub fn add_group(&mut self, group_id: &str) -> bool {
        if self.knows(group_id) {
            return false;
        }
        self.groups.push(group_id.to_string());
        self.mode = SyncMode::Active;
        true
    }

    pub fn remove_group(&mut self, group_id: &str) -> bool {
        let before = self.groups.len();
        self.groups.retain(|g| g != group_id);
        if self.groups.len() == before {
            return false;
        }
        self.saturated.remove(group_id);
        self.jump_queue.retain(|g| g != group_id);
        self.history.retain(|g| g != group_id);
        if self.active_group.as_deref() == Some(group_id) {
            self.active_group = None;
        }
        self.settle_mode();
        true
    }

    /// Replaces the group list, keeping saturation for groups that stay.
    pub fn set_groups(&mut self, groups: Vec<String>) {
        let mut deduped = Vec::with_capacity(groups.len());
        for group in groups {
            if !group.is_empty() && !deduped.contains(&group) {
                deduped.push(group);
            }
        }
        self.saturated.retain(|g| deduped.contains(g));
        self.jump_queue.retain(|g| deduped.contains(g));
        self.history.retain(|g| deduped.contains(g));
        if let Some(active) = &self.active_group {
            if !deduped.contains(active) {
                self.active_group = None;
            }
        }
        self.groups = deduped;
        self.settle_mode();
    }

    pub fn set_active_group(&mut self, group_id: Option<String>) {
        self.active_group = group_id;
    }

    /// Queues `group_id` ahead of everything else and clears its saturation.
    /// Unknown groups are ignored.
    pub fn jump_in(&mut self, group_id: &str) -> bool {
        if !self.knows(group_id) {
            return false;
        }
        self.saturated.remove(group_id);
        if !self.jump_queue.iter().any(|g| g == group_id) {
            self.jump_queue.push_back(group_id.to_string());
        }
        self.mode = SyncMode::Active;
        true
    }

    /// Manual refresh: every group is assumed to have new content.
    pub fn refresh_all(&mut self) {
        self.saturated.clear();
        if !self.groups.is_empty() {
            self.mode = SyncMode::Active;
        }
    }

    /// Picks the next group to poll and records it in the history.
    pub fn next(&mut self) -> Option<Selection> {
        while let Some(group_id) = self.jump_queue.pop_front() {
            if self.knows(&group_id) {
                return Some(self.select(group_id, SelectionReason::JumpIn));
            }
        }
        if self.groups.is_empty() {
            return None;
        }
        let picked = match self.mode {
            SyncMode::Active => self
                .first_unsaturated()
                .map(|g| (g, SelectionReason::Active)),
            SyncMode::Idle => None,
        };
        let (group_id, reason) = match picked {
            Some(picked) => picked,
            None => (self.least_recently_polled()?, SelectionReason::Idle),
        };
        Some(self.select(group_id, reason))
    }

    /// Folds a finished fetch back in. Returns the new mode when it changed.
    pub fn record_result(&mut self, group_id: &str, fetched: usize) -> Option<SyncMode> {
        let before = self.mode;
        if !self.knows(group_id) {
            return None;
        }
        if fetched == 0 {
            self.saturated.insert(group_id.to_string());
            self.settle_mode();
        } else {
            self.saturated.remove(group_id);
            self.mode = SyncMode::Active;
        }
        (self.mode != before).then_some(self.mode)
    }

    /// A failed fetch counts as saturated so a broken group cannot pin the
    /// loop in Active mode.
    pub fn record_error(&mut self, group_id: &str) -> Option<SyncMode> {
        self.record_result(group_id, 0)
    }

    fn first_unsaturated(&self) -> Option<String> {
        if let Some(active) = &self.active_group {
            if self.knows(active) && !self.is_saturated(active) {
                return Some(active.clone());
            }
        }
        self.groups
            .iter()
            .find(|g| !self.is_saturated(g))
            .cloned()
    }

    /// Never-polled groups first, then the one whose last poll is oldest.
    fn least_recently_polled(&self) -> Option<String> {
        self.groups
            .iter()
            .min_by_key(|g| self.history.iter().rposition(|h| h == *g))
            .cloned()
    }

    fn select(&mut self, group_id: String, reason: SelectionReason) -> Selection {
        self.history.push_back(group_id.clone());
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
        Selection { group_id, reason }
    }

    /// Idle once every group is saturated, including when there are none.
    fn settle_mode(&mut self) {
        self.mode = if self.groups.iter().all(|g| self.saturated.contains(g)) {
            SyncMode::Idle
        } else {
            SyncMode::Active
        };
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerSnapshot {
    pub mode: SyncMode,
    pub groups: Vec<String>,
    pub active_group: Option<String>,
    pub saturated: Vec<String>,
    pub running: bool,
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    pipeline: FetchPipeline,
    config: SchedulerConfig,
    state: Mutex<SchedulerState>,
    advance: Notify,
    lazy: watch::Sender<bool>,
    started: AtomicBool,
    stopped: AtomicBool,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(pipeline: FetchPipeline, config: SchedulerConfig, groups: &GroupConfig) -> Self {
        let state = SchedulerState::new(
            groups.initial_groups.clone(),
            groups.active_group.clone(),
            config.history_limit,
        );
        let (lazy, _) = watch::channel(state.is_lazy());
        Self {
            inner: Arc::new(SchedulerInner {
                pipeline,
                config,
                state: Mutex::new(state),
                advance: Notify::new(),
                lazy,
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Spawns the polling loops. Calling it again while running is a no-op;
    /// a stopped scheduler cannot be started again.
    pub fn start(&self) -> Result<()> {
        if self.inner.stopped.load(Ordering::SeqCst) {
            bail!("scheduler has been stopped; create a new instance");
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut tasks = lock(&self.inner.tasks);
        let main = self.inner.clone();
        tasks.push(tokio::spawn(async move { main.run_main_loop().await }));
        if self.inner.config.background_batch > 0 {
            let background = self.inner.clone();
            tasks.push(tokio::spawn(
                async move { background.run_background_loop().await },
            ));
        }
        tracing::info!(
            groups = self.inner.state().groups().len(),
            background_batch = self.inner.config.background_batch,
            "scheduler started"
        );
        Ok(())
    }

    /// Stops both loops and waits for them to exit. A fetch already under way
    /// runs to completion first, so its page is merged and the cursor moves.
    pub async fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.cancel.cancel();
        self.inner.advance.notify_one();
        let tasks: Vec<_> = lock(&self.inner.tasks).drain(..).collect();
        for task in tasks {
            if let Err(err) = task.await {
                tracing::warn!(error = ?err, "scheduler task ended abnormally");
            }
        }
        tracing::info!("scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst) && !self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Cuts the current pause short.
    pub fn advance(&self) {
        self.inner.advance.notify_one();
    }

    pub fn jump_in(&self, group_id: &str) -> bool {
        let queued = self.inner.state().jump_in(group_id);
        if queued {
            tracing::debug!(group_id = %group_id, "jump-in requested");
            self.inner.publish_mode();
            self.advance();
        } else {
            tracing::debug!(group_id = %group_id, "jump-in for unknown group ignored");
        }
        queued
    }

    pub fn refresh_all(&self) {
        self.inner.state().refresh_all();
        self.inner.publish_mode();
        self.advance();
    }

    pub fn set_active_group(&self, group_id: Option<String>) {
        self.inner.state().set_active_group(group_id);
    }

    pub fn add_group(&self, group_id: &str) -> bool {
        let added = self.inner.state().add_group(group_id);
        if added {
            self.inner.publish_mode();
            self.advance();
        }
        added
    }

    pub fn remove_group(&self, group_id: &str) -> bool {
        let removed = self.inner.state().remove_group(group_id);
        if removed {
            self.inner.pipeline.projections().forget(group_id);
            self.inner.publish_mode();
        }
        removed
    }

    pub fn set_groups(&self, groups: Vec<String>) {
        self.inner.state().set_groups(groups);
        self.inner.publish_mode();
        self.advance();
    }

    /// True while every group is saturated. The push accelerator only keeps
    /// its connection open in this mode.
    pub fn lazy_mode(&self) -> watch::Receiver<bool> {
        self.inner.lazy.subscribe()
    }

    pub fn is_lazy(&self) -> bool {
        *self.inner.lazy.borrow()
    }

    /// Token cancelled when the scheduler stops.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    pub fn pipeline(&self) -> &FetchPipeline {
        &self.inner.pipeline
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        let state = self.inner.state();
        let mut saturated: Vec<String> = state
            .groups()
            .iter()
            .filter(|g| state.is_saturated(g))
            .cloned()
            .collect();
        saturated.sort();
        SchedulerSnapshot {
            mode: state.mode(),
            groups: state.groups().to_vec(),
            active_group: state.active_group().map(str::to_string),
            saturated,
            running: self.is_running(),
        }
    }

    /// Runs one selection and fetch without pausing. Returns `None` when no
    /// group is known.
    pub async fn run_once(&self) -> Option<(Selection, Result<MergeReport>)> {
        self.inner.run_once().await
    }
}

impl SchedulerInner {
    fn state(&self) -> MutexGuard<'_, SchedulerState> {
        lock(&self.state)
    }

    fn publish_mode(&self) {
        let lazy = self.state().is_lazy();
        self.lazy.send_if_modified(|current| {
            if *current == lazy {
                return false;
            }
            *current = lazy;
            true
        });
    }

    fn record(&self, group_id: &str, result: &Result<MergeReport>) {
        let transition = match result {
            Ok(report) => self.state().record_result(group_id, report.fetched),
            Err(err) => {
                tracing::warn!(group_id = %group_id, error = ?err, "group fetch failed");
                self.state().record_error(group_id)
            }
        };
        if let Some(mode) = transition {
            tracing::info!(mode = ?mode, group_id = %group_id, "sync mode changed");
        }
        self.publish_mode();
    }

    async fn run_once(&self) -> Option<(Selection, Result<MergeReport>)> {
        let selection = self.state().next()?;
        let result = self
            .pipeline
            .fetch_group(&selection.group_id, self.config.page_size)
            .await;
        self.record(&selection.group_id, &result);
        Some((selection, result))
    }

    fn pause_after(&self, selection: Option<&Selection>) -> Duration {
        match selection {
            Some(selection) if selection.reason == SelectionReason::JumpIn => {
                self.config.jump_delay
            }
            _ if self.state().mode() == SyncMode::Active => self.config.active_interval,
            _ => self.config.idle_interval,
        }
    }

    async fn run_main_loop(self: Arc<Self>) {
        while !self.stopped.load(Ordering::SeqCst) {
            let selection = self.run_once().await.map(|(selection, _)| selection);
            let pause = self.pause_after(selection.as_ref());
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = self.advance.notified() => {}
                _ = tokio::time::sleep(pause) => {}
            }
        }
        tracing::debug!("primary poll loop exited");
    }

    fn background_groups(&self) -> Vec<String> {
        let state = self.state();
        let active = state.active_group();
        let groups: Vec<String> = state
            .groups()
            .iter()
            .filter(|g| active != Some(g.as_str()))
            .cloned()
            .collect();
        groups
    }

    /// Polls every group except the focused one in small concurrent chunks.
    async fn run_background_loop(self: Arc<Self>) {
        let batch = self.config.background_batch.max(1);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.background_interval) => {}
            }
            let groups = self.background_groups();
            for chunk in groups.chunks(batch) {
                if self.cancel.is_cancelled() {
                    break;
                }
                let fetches = chunk.iter().map(|group_id| {
                    let pipeline = self.pipeline.clone();
                    let page_size = self.config.page_size;
                    async move {
                        let result = pipeline.fetch_group(group_id, page_size).await;
                        (group_id, result)
                    }
                });
                let results = join_all(fetches).await;
                for (group_id, result) in results {
                    self.record(group_id, &result);
                }
            }
        }
        tracing::debug!("background poll loop exited");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(groups: &[&str]) -> SchedulerState {
        SchedulerState::new(groups.iter().map(|g| g.to_string()).collect(), None, 150)
    }

    fn pick(state: &mut SchedulerState) -> (String, SelectionReason) {
        let selection = state.next().unwrap();
        (selection.group_id, selection.reason)
    }

    #[test]
    fn starts_active_and_prefers_the_focused_group() {
        let mut state = state(&["a", "b", "c"]);
        state.set_active_group(Some("b".into()));
        assert_eq!(state.mode(), SyncMode::Active);
        assert_eq!(pick(&mut state), ("b".into(), SelectionReason::Active));

        state.record_result("b", 0);
        assert_eq!(pick(&mut state), ("a".into(), SelectionReason::Active));
    }

    #[test]
    fn all_saturated_enters_idle_and_new_content_reactivates() {
        let mut state = state(&["a", "b"]);
        assert_eq!(state.record_result("a", 0), None);
        assert_eq!(state.record_result("b", 0), Some(SyncMode::Idle));
        assert!(state.is_lazy());

        assert_eq!(state.record_result("a", 3), Some(SyncMode::Active));
        assert!(!state.is_saturated("a"));
    }

    #[test]
    fn jump_queue_is_fifo_deduplicated_and_first() {
        let mut state = state(&["a", "b", "c"]);
        state.record_result("a", 0);
        state.record_result("b", 0);
        state.record_result("c", 0);

        assert!(state.jump_in("c"));
        assert!(state.jump_in("b"));
        assert!(state.jump_in("c"));
        assert!(!state.jump_in("zzz"));
        assert_eq!(state.mode(), SyncMode::Active);
        assert!(!state.is_saturated("c"));

        assert_eq!(pick(&mut state), ("c".into(), SelectionReason::JumpIn));
        assert_eq!(pick(&mut state), ("b".into(), SelectionReason::JumpIn));
        assert_eq!(pick(&mut state).1, SelectionReason::Active);
    }

    #[test]
    fn removed_groups_drop_out_of_the_jump_queue() {
        let mut state = state(&["a", "b"]);
        state.jump_in("b");
        state.remove_group("b");
        state.record_result("a", 0);
        assert_eq!(pick(&mut state), ("a".into(), SelectionReason::Idle));
    }

    #[test]
    fn idle_round_robins_least_recently_polled() {
        let mut state = state(&["a", "b", "c"]);
        for g in ["a", "b", "c"] {
            state.record_result(g, 0);
        }
        assert!(state.is_lazy());

        let order: Vec<String> = (0..6).map(|_| pick(&mut state).0).collect();
        assert_eq!(order, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn never_polled_group_goes_first_when_idle() {
        let mut state = state(&["a", "b"]);
        assert_eq!(pick(&mut state).0, "a");
        state.record_result("a", 0);
        assert_eq!(pick(&mut state).0, "b");
        state.record_result("b", 0);
        state.add_group("c");
        state.record_result("c", 0);
        assert_eq!(pick(&mut state).0, "c");
    }

    #[test]
    fn history_is_bounded() {
        let mut state = SchedulerState::new(vec!["a".into(), "b".into()], None, 3);
        for _ in 0..10 {
            state.next();
        }
        assert_eq!(state.history().count(), 3);
    }

    #[test]
    fn errors_count_as_saturated() {
        let mut state = state(&["a"]);
        assert_eq!(state.record_error("a"), Some(SyncMode::Idle));
    }

    #[test]
    fn set_groups_keeps_known_saturation() {
        let mut state = state(&["a", "b"]);
        state.record_result("a", 0);
        state.set_groups(vec!["a".into(), "c".into(), "a".into()]);
        assert_eq!(state.groups(), ["a".to_string(), "c".to_string()]);
        assert!(state.is_saturated("a"));
        assert!(!state.is_saturated("c"));
        assert_eq!(state.mode(), SyncMode::Active);
    }

    #[test]
    fn refresh_all_clears_saturation() {
        let mut state = state(&["a", "b"]);
        state.record_result("a", 0);
        state.record_result("b", 0);
        state.refresh_all();
        assert_eq!(state.mode(), SyncMode::Active);
        assert!(!state.is_saturated("a"));
    }
}
