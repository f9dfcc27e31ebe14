//! Background timer that fires due scheduled links. Each tick sweeps the
//! publish_links table for rows whose scheduled_at has passed and hands them
//! to the dispatcher with system authority: the link's existence proves a
//! writer approved the destination when it was created, so later grant
//! revocations do not strand an accepted schedule. A failed send stays
//! scheduled and is picked up again on the next tick.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use rusqlite::params;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::providers::ProviderRegistry;
use crate::publish::dispatch;
use crate::publish::status::format_timestamp;
use crate::state::DbPool;

/// The result of one send attempted by a sweep.
#[derive(Debug, Clone, Serialize)]
pub struct SweepOutcome {
    pub post_id: String,
    pub network_id: String,
    pub external_post_id: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub attempted: usize,
    pub posted: usize,
    pub failed: usize,
    pub outcomes: Vec<SweepOutcome>,
}

/// A link due to fire within some window, joined with its network name.
#[derive(Debug, Clone, Serialize)]
pub struct UpcomingPost {
    pub post_id: String,
    pub network_id: String,
    pub network_name: String,
    pub content_id: String,
    pub scheduled_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub check_interval_minutes: u64,
    pub ticks: u64,
    pub posted: u64,
    pub failures: u64,
    pub next_check_at: Option<String>,
}

pub struct Scheduler {
    db: DbPool,
    providers: Arc<ProviderRegistry>,
    check_interval_minutes: u64,
    running: AtomicBool,
    ticks: AtomicU64,
    posted: AtomicU64,
    failures: AtomicU64,
    next_check_at: Mutex<Option<String>>,
}

impl Scheduler {
    pub fn new(db: DbPool, providers: Arc<ProviderRegistry>, check_interval_minutes: u64) -> Self {
        Self {
            db,
            providers,
            check_interval_minutes: check_interval_minutes.max(1),
            running: AtomicBool::new(false),
            ticks: AtomicU64::new(0),
            posted: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            next_check_at: Mutex::new(None),
        }
    }

    /// The tick loop. The first tick fires immediately, so posts that came
    /// due while the server was down go out at startup. Spawn this onto the
    /// runtime; it exits after `stop`.
    pub async fn run(self: Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("scheduler is already running");
            return;
        }

        let period = Duration::from_secs(self.check_interval_minutes * 60);
        tracing::info!(interval_minutes = self.check_interval_minutes, "scheduler started");

        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            if !self.running.load(Ordering::SeqCst) {
                tracing::info!("scheduler stopped");
                break;
            }

            self.ticks.fetch_add(1, Ordering::SeqCst);
            {
                let mut next = self.next_check_at.lock().unwrap();
                *next = Some(format_timestamp(
                    Utc::now() + chrono::Duration::seconds(period.as_secs() as i64),
                ));
            }

            match self.sweep().await {
                Ok(report) if report.attempted > 0 => {
                    tracing::info!(
                        attempted = report.attempted,
                        posted = report.posted,
                        failed = report.failed,
                        "scheduler sweep finished"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "scheduler sweep failed"),
            }
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// One pass over every due link, all sends in flight concurrently. Also
    /// the manual-check entry point; the admin surface calls it directly.
    pub async fn sweep(&self) -> AppResult<SweepReport> {
        let due: Vec<(String, String)> = {
            let conn = self.db.get()?;
            let mut stmt = conn.prepare(
                "SELECT post_id, network_id FROM publish_links
                 WHERE posted_at IS NULL
                   AND scheduled_at IS NOT NULL AND scheduled_at <= ?1
                 ORDER BY scheduled_at",
            )?;
            let rows = stmt.query_map(params![format_timestamp(Utc::now())], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            rows.collect::<Result<_, _>>()?
        };

        let sends = due.iter().map(|(post_id, network_id)| {
            dispatch::dispatch_to_network(&self.db, &self.providers, post_id, network_id, None)
        });
        let results = join_all(sends).await;

        let mut report = SweepReport {
            attempted: due.len(),
            posted: 0,
            failed: 0,
            outcomes: Vec::with_capacity(due.len()),
        };
        for ((post_id, network_id), result) in due.into_iter().zip(results) {
            match result {
                Ok(external_post_id) => {
                    report.posted += 1;
                    report.outcomes.push(SweepOutcome {
                        post_id,
                        network_id,
                        external_post_id: Some(external_post_id),
                        error: None,
                    });
                }
                Err(e) => {
                    // The link keeps its schedule; the next tick retries it.
                    tracing::warn!(
                        post = %post_id,
                        network = %network_id,
                        error = %e,
                        "scheduled send failed, will retry"
                    );
                    report.failed += 1;
                    report.outcomes.push(SweepOutcome {
                        post_id,
                        network_id,
                        external_post_id: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        self.posted.fetch_add(report.posted as u64, Ordering::SeqCst);
        self.failures.fetch_add(report.failed as u64, Ordering::SeqCst);
        Ok(report)
    }

    /// Links set to fire within the next `hours` hours, soonest first.
    /// Overdue links are the sweep's business, not this read's.
    pub fn upcoming(&self, hours: i64) -> AppResult<Vec<UpcomingPost>> {
        let now = Utc::now();
        let horizon = chrono::Duration::try_hours(hours.max(0))
            .and_then(|span| now.checked_add_signed(span))
            .ok_or_else(|| AppError::BadRequest("hours is out of range".into()))?;
        let conn = self.db.get()?;
        let mut stmt = conn.prepare(
            "SELECT pl.post_id, pl.network_id, n.name, pl.content_id, pl.scheduled_at
             FROM publish_links pl
             JOIN networks n ON n.id = pl.network_id
             WHERE pl.posted_at IS NULL
               AND pl.scheduled_at IS NOT NULL
               AND pl.scheduled_at >= ?1 AND pl.scheduled_at <= ?2
             ORDER BY pl.scheduled_at",
        )?;
        let rows = stmt.query_map(params![format_timestamp(now), format_timestamp(horizon)], |row| {
            Ok(UpcomingPost {
                post_id: row.get(0)?,
                network_id: row.get(1)?,
                network_name: row.get(2)?,
                content_id: row.get(3)?,
                scheduled_at: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            running: self.is_running(),
            check_interval_minutes: self.check_interval_minutes,
            ticks: self.ticks.load(Ordering::SeqCst),
            posted: self.posted.load(Ordering::SeqCst),
            failures: self.failures.load(Ordering::SeqCst),
            next_check_at: self.next_check_at.lock().unwrap().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::providers::{NetworkKind, Provider, ProviderError, TokenMap};
    use crate::publish::links;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct FixedProvider {
        external_id: Option<&'static str>,
    }

    #[async_trait]
    impl Provider for FixedProvider {
        fn required_tokens(&self) -> &[&str] {
            &[]
        }

        async fn send_post(
            &self,
            _text: &str,
            _attachments: &[PathBuf],
            _tokens: &TokenMap,
        ) -> Result<Option<String>, ProviderError> {
            match self.external_id {
                Some(id) => Ok(Some(id.to_string())),
                None => Err(ProviderError::Failure("network is down".into())),
            }
        }

        async fn metrics(
            &self,
            _external_post_id: &str,
            _tokens: &TokenMap,
        ) -> Result<serde_json::Value, ProviderError> {
            Ok(serde_json::Value::Null)
        }
    }

    fn registry(external_id: Option<&'static str>) -> Arc<ProviderRegistry> {
        let mut registry = ProviderRegistry::new();
        registry.register(NetworkKind::Mastodon, Arc::new(FixedProvider { external_id }));
        Arc::new(registry)
    }

    fn test_pool() -> (DbPool, TempDir) {
        let temp = TempDir::new().unwrap();
        let pool = db::create_pool(&temp.path().join("test.db")).unwrap();
        db::run_migrations(&pool).unwrap();
        (pool, temp)
    }

    fn fixture(pool: &DbPool) {
        let conn = pool.get().unwrap();
        conn.execute_batch(
            "INSERT INTO users (id, username, password_hash) VALUES
                 ('alice', 'alice', 'x'), ('bob', 'bob', 'x');
             INSERT INTO posts (id, creator_id) VALUES ('p1', 'alice');
             INSERT INTO contents (id, post_id, body) VALUES ('c1', 'p1', 'timed');
             INSERT INTO networks (id, owner_id, kind, name) VALUES ('n1', 'alice', 'mastodon', 'Fedi');
             INSERT INTO publish_links (id, post_id, network_id, content_id) VALUES ('l1', 'p1', 'n1', 'c1');",
        )
        .unwrap();
    }

    fn set_schedule(pool: &DbPool, link_id: &str, offset_hours: i64) {
        let conn = pool.get().unwrap();
        let at = format_timestamp(Utc::now() + chrono::Duration::hours(offset_hours));
        conn.execute(
            "UPDATE publish_links SET scheduled_at = ?2 WHERE id = ?1",
            params![link_id, at],
        )
        .unwrap();
    }

    #[tokio::test]
    async fn sweep_fires_due_links_and_leaves_future_ones() {
        let (pool, _temp) = test_pool();
        fixture(&pool);
        {
            let conn = pool.get().unwrap();
            conn.execute_batch(
                "INSERT INTO contents (id, post_id, body) VALUES ('c2', 'p1', 'later');
                 INSERT INTO networks (id, owner_id, kind, name) VALUES ('n2', 'alice', 'mastodon', 'Fedi2');
                 INSERT INTO publish_links (id, post_id, network_id, content_id) VALUES ('l2', 'p1', 'n2', 'c2');",
            )
            .unwrap();
        }
        set_schedule(&pool, "l1", -1);
        set_schedule(&pool, "l2", 1);

        let scheduler = Scheduler::new(pool.clone(), registry(Some("ext-1")), 1);
        let report = scheduler.sweep().await.unwrap();

        assert_eq!(report.attempted, 1);
        assert_eq!(report.posted, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(report.outcomes[0].network_id, "n1");
        assert_eq!(report.outcomes[0].external_post_id.as_deref(), Some("ext-1"));

        let conn = pool.get().unwrap();
        assert!(links::load_link(&conn, "p1", "n1").unwrap().status.is_posted());
        let later = links::load_link(&conn, "p1", "n2").unwrap();
        assert!(!later.status.is_posted());
        assert!(later.status.scheduled_at().is_some());
    }

    #[tokio::test]
    async fn failed_sends_keep_their_schedule_and_retry() {
        let (pool, _temp) = test_pool();
        fixture(&pool);
        set_schedule(&pool, "l1", -1);

        let down = Scheduler::new(pool.clone(), registry(None), 1);
        let report = down.sweep().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.posted, 0);
        assert!(report.outcomes[0].error.is_some());

        // Schedule survived the failure.
        {
            let conn = pool.get().unwrap();
            let link = links::load_link(&conn, "p1", "n1").unwrap();
            assert!(link.status.scheduled_at().is_some());
        }

        // Next tick, network recovered: the same row goes out.
        let up = Scheduler::new(pool.clone(), registry(Some("ext-2")), 1);
        let report = up.sweep().await.unwrap();
        assert_eq!(report.posted, 1);

        let conn = pool.get().unwrap();
        let link = links::load_link(&conn, "p1", "n1").unwrap();
        assert_eq!(link.status.external_id(), Some("ext-2"));
    }

    #[tokio::test]
    async fn sweeps_run_with_system_authority() {
        let (pool, _temp) = test_pool();
        fixture(&pool);
        {
            // The link was scheduled by bob under a write grant that has
            // since been revoked. The schedule still fires.
            let conn = pool.get().unwrap();
            conn.execute(
                "UPDATE networks SET owner_id = 'bob' WHERE id = 'n1'",
                [],
            )
            .unwrap();
        }
        set_schedule(&pool, "l1", -1);

        let scheduler = Scheduler::new(pool.clone(), registry(Some("ext-1")), 1);
        let report = scheduler.sweep().await.unwrap();
        assert_eq!(report.posted, 1);
    }

    #[tokio::test]
    async fn sweep_with_nothing_due_is_empty() {
        let (pool, _temp) = test_pool();
        fixture(&pool);

        let scheduler = Scheduler::new(pool.clone(), registry(Some("ext-1")), 1);
        let report = scheduler.sweep().await.unwrap();
        assert_eq!(report.attempted, 0);
        assert!(report.outcomes.is_empty());
    }

    #[tokio::test]
    async fn unsupported_kind_is_recorded_and_kept() {
        let (pool, _temp) = test_pool();
        fixture(&pool);
        set_schedule(&pool, "l1", -1);

        let scheduler = Scheduler::new(pool.clone(), Arc::new(ProviderRegistry::new()), 1);
        let report = scheduler.sweep().await.unwrap();
        assert_eq!(report.failed, 1);

        let conn = pool.get().unwrap();
        let link = links::load_link(&conn, "p1", "n1").unwrap();
        assert!(link.status.scheduled_at().is_some());
    }

    #[tokio::test]
    async fn upcoming_respects_the_window_and_orders_by_time() {
        let (pool, _temp) = test_pool();
        fixture(&pool);
        {
            let conn = pool.get().unwrap();
            conn.execute_batch(
                "INSERT INTO contents (id, post_id, body) VALUES ('c2', 'p1', 'later');
                 INSERT INTO networks (id, owner_id, kind, name) VALUES ('n2', 'alice', 'mastodon', 'Fedi2');
                 INSERT INTO publish_links (id, post_id, network_id, content_id) VALUES ('l2', 'p1', 'n2', 'c2');
                 INSERT INTO networks (id, owner_id, kind, name) VALUES ('n3', 'alice', 'mastodon', 'Fedi3');
                 INSERT INTO publish_links (id, post_id, network_id, content_id) VALUES ('l3', 'p1', 'n3', 'c1');
                 INSERT INTO networks (id, owner_id, kind, name) VALUES ('n4', 'alice', 'mastodon', 'Fedi4');
                 INSERT INTO publish_links (id, post_id, network_id, content_id) VALUES ('l4', 'p1', 'n4', 'c1');",
            )
            .unwrap();
        }
        set_schedule(&pool, "l1", 30);
        set_schedule(&pool, "l2", 2);
        set_schedule(&pool, "l3", 1);
        // Overdue, so the sweep's problem, not an upcoming post.
        set_schedule(&pool, "l4", -5);

        let scheduler = Scheduler::new(pool.clone(), registry(Some("ext-1")), 1);
        let upcoming = scheduler.upcoming(24).unwrap();
        assert_eq!(upcoming.len(), 2);
        assert_eq!(upcoming[0].network_id, "n3");
        assert_eq!(upcoming[1].network_id, "n2");
        assert_eq!(upcoming[0].network_name, "Fedi3");
    }

    #[tokio::test]
    async fn upcoming_rejects_out_of_range_hours() {
        let (pool, _temp) = test_pool();
        fixture(&pool);

        let scheduler = Scheduler::new(pool.clone(), registry(Some("ext-1")), 1);
        let err = scheduler.upcoming(i64::MAX).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn status_tracks_counters() {
        let (pool, _temp) = test_pool();
        fixture(&pool);
        set_schedule(&pool, "l1", -1);

        let scheduler = Scheduler::new(pool.clone(), registry(None), 5);
        let status = scheduler.status();
        assert!(!status.running);
        assert_eq!(status.check_interval_minutes, 5);
        assert_eq!(status.ticks, 0);
        assert!(status.next_check_at.is_none());

        scheduler.sweep().await.unwrap();
        let status = scheduler.status();
        assert_eq!(status.failures, 1);
        assert_eq!(status.posted, 0);
    }

    #[tokio::test]
    async fn run_loop_stops_cleanly() {
        let (pool, _temp) = test_pool();
        fixture(&pool);

        let scheduler = Arc::new(Scheduler::new(pool.clone(), registry(Some("ext-1")), 1));
        let handle = tokio::spawn(Arc::clone(&scheduler).run());

        // First tick fires immediately.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(scheduler.is_running());
        assert!(scheduler.status().ticks >= 1);

        scheduler.stop();
        assert!(!scheduler.is_running());
        handle.abort();
    }
}
