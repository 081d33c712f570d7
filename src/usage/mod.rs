use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::identity::IdentityProvider;
use crate::models::{Subject, UsageAggregate};
use crate::platform::{
    AppForegroundTime, ForegroundEvents, ForegroundTransition, Granularity, TransitionKind,
    UsageStatsProvider,
};
use crate::store::{collections, to_fields, RemoteStateClient};

// Set to false to silence per-run logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

const MILLIS_PER_MINUTE: u64 = 60_000;
const DAYS_PER_WEEK: u64 = 7;
/// How far back the raw event log is read on the fallback path.
const FALLBACK_LOOKBACK_DAYS: i64 = 7;

/// Reconciled screen time for one app, in minutes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppUsage {
    pub app_id: String,
    pub daily_minutes: u64,
    pub weekly_minutes: u64,
}

pub struct UsageConfig {
    pub period: std::time::Duration,
    pub noise_floor_minutes: u64,
    pub system_app_prefixes: Vec<String>,
}

pub struct UsageDeps {
    pub subject: Subject,
    pub identity: Arc<dyn IdentityProvider>,
    pub store: Arc<dyn RemoteStateClient>,
    pub stats: Arc<dyn UsageStatsProvider>,
    pub events: Arc<dyn ForegroundEvents>,
}

fn sum_by_app(rows: &[AppForegroundTime]) -> BTreeMap<String, u64> {
    let mut totals = BTreeMap::new();
    for row in rows {
        *totals.entry(row.app_id.clone()).or_insert(0) += row.foreground_millis;
    }
    totals
}

/// Merges the three overlapping stats windows into per-app totals.
///
/// The weekly total is the best available multi-day figure (weekly
/// granularity preferred over monthly, falling back to today's figure for
/// apps the multi-day windows have not seen). The daily total is the direct
/// daily-window figure when present, otherwise `weekly / 7` — a documented
/// estimate, not an exact value.
pub fn reconcile(
    daily: &[AppForegroundTime],
    weekly: &[AppForegroundTime],
    monthly: &[AppForegroundTime],
) -> Vec<AppUsage> {
    let daily = sum_by_app(daily);
    let weekly = sum_by_app(weekly);
    let monthly = sum_by_app(monthly);

    let mut apps: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
    apps.extend(daily.keys().cloned());
    apps.extend(weekly.keys().cloned());
    apps.extend(monthly.keys().cloned());

    let mut usages = Vec::new();
    for app in &apps {
        let direct_daily = daily.get(app).copied();
        let weekly_millis = weekly
            .get(app)
            .or_else(|| monthly.get(app))
            .copied()
            .or(direct_daily)
            .unwrap_or(0);
        if weekly_millis == 0 {
            continue;
        }

        let weekly_minutes = weekly_millis / MILLIS_PER_MINUTE;
        let daily_minutes = match direct_daily {
            Some(millis) => millis / MILLIS_PER_MINUTE,
            None => weekly_minutes / DAYS_PER_WEEK,
        };

        usages.push(AppUsage {
            app_id: app.clone(),
            daily_minutes,
            weekly_minutes,
        });
    }
    usages
}

/// Reconstructs usage from the raw transition log by pairing consecutive
/// enter/leave events per app. Some OS builds return nothing from the stats
/// facility; this path trades accuracy for availability. Only pairs whose
/// enter falls within today contribute to the daily bucket; an enter with no
/// matching leave is closed at the window end.
pub fn rebuild_from_events(
    events: &[ForegroundTransition],
    day_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Vec<AppUsage> {
    let mut open: BTreeMap<String, DateTime<Utc>> = BTreeMap::new();
    let mut weekly_millis: BTreeMap<String, u64> = BTreeMap::new();
    let mut daily_millis: BTreeMap<String, u64> = BTreeMap::new();

    let close = |app: &str,
                 entered: DateTime<Utc>,
                 left: DateTime<Utc>,
                 weekly: &mut BTreeMap<String, u64>,
                 daily: &mut BTreeMap<String, u64>| {
        let duration = (left - entered).num_milliseconds().max(0) as u64;
        *weekly.entry(app.to_string()).or_insert(0) += duration;
        if entered >= day_start {
            *daily.entry(app.to_string()).or_insert(0) += duration;
        }
    };

    for event in events {
        match event.kind {
            TransitionKind::EnterForeground => {
                // A second enter without a leave restarts the pair.
                open.insert(event.app_id.clone(), event.at);
            }
            TransitionKind::LeaveForeground => {
                if let Some(entered) = open.remove(&event.app_id) {
                    close(
                        &event.app_id,
                        entered,
                        event.at,
                        &mut weekly_millis,
                        &mut daily_millis,
                    );
                }
            }
        }
    }
    for (app, entered) in std::mem::take(&mut open) {
        close(&app, entered, window_end, &mut weekly_millis, &mut daily_millis);
    }

    weekly_millis
        .into_iter()
        .filter(|(_, millis)| *millis > 0)
        .map(|(app_id, millis)| AppUsage {
            daily_minutes: daily_millis.get(&app_id).copied().unwrap_or(0) / MILLIS_PER_MINUTE,
            weekly_minutes: millis / MILLIS_PER_MINUTE,
            app_id,
        })
        .collect()
}

/// Drops platform/system applications and apps under the weekly noise floor.
pub fn filter_noise(usages: Vec<AppUsage>, config: &UsageConfig) -> Vec<AppUsage> {
    usages
        .into_iter()
        .filter(|usage| {
            !config
                .system_app_prefixes
                .iter()
                .any(|prefix| usage.app_id.starts_with(prefix.as_str()))
        })
        .filter(|usage| usage.weekly_minutes >= config.noise_floor_minutes)
        .collect()
}

async fn run_once(deps: &UsageDeps, config: &UsageConfig) -> Result<()> {
    let now = Utc::now();
    let day_start = now.date_naive().and_time(NaiveTime::MIN).and_utc();
    let month_back = now - ChronoDuration::days(30);

    let daily = deps
        .stats
        .usage_stats(Granularity::Daily, day_start, now)
        .await
        .context("daily usage query failed")?;
    let weekly = deps
        .stats
        .usage_stats(Granularity::Weekly, month_back, now)
        .await
        .context("weekly usage query failed")?;
    let monthly = deps
        .stats
        .usage_stats(Granularity::Monthly, month_back, now)
        .await
        .context("monthly usage query failed")?;

    let mut usages = reconcile(&daily, &weekly, &monthly);
    if usages.is_empty() {
        let events = deps
            .events
            .events_between(now - ChronoDuration::days(FALLBACK_LOOKBACK_DAYS), now)
            .await
            .context("transition log query failed")?;
        usages = rebuild_from_events(&events, day_start, now);
        log_info!("usage stats empty, rebuilt {} apps from the event log", usages.len());
    }

    let usages = filter_noise(usages, config);
    let uploaded = usages.len();

    for usage in usages {
        let aggregate = UsageAggregate {
            subject_id: deps.subject.id.clone(),
            app_id: usage.app_id,
            daily_minutes: usage.daily_minutes,
            weekly_minutes: usage.weekly_minutes,
            last_updated: now,
        };
        let doc_id = UsageAggregate::doc_id(&aggregate.subject_id, &aggregate.app_id);
        deps.store
            .set(
                collections::USAGE_AGGREGATES,
                &doc_id,
                to_fields(&aggregate)?,
                false,
            )
            .await
            .with_context(|| format!("failed to upload aggregate {doc_id}"))?;
    }

    log_info!("uploaded {uploaded} usage aggregates for {}", deps.subject);
    Ok(())
}

/// Aggregation loop: one run immediately on startup, then one per period. A
/// failed run is logged and skipped; the next period retries, so a flaky
/// stats facility cannot put the loop into a tight failure storm.
pub async fn usage_loop(deps: UsageDeps, config: UsageConfig, cancel: CancellationToken) -> Result<()> {
    let mut ticker = interval(config.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if deps.identity.current_subject().await.as_ref() != Some(&deps.subject) {
                    log_info!("subject signed out; usage aggregator stopping");
                    return Ok(());
                }
                if let Err(err) = run_once(&deps, &config).await {
                    log_warn!("usage aggregation run skipped: {err:?}");
                }
            }
            _ = cancel.cancelled() => {
                log_info!("usage aggregator shutting down");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::identity::StaticIdentity;
    use crate::store::MemoryStore;

    fn row(app: &str, millis: u64) -> AppForegroundTime {
        AppForegroundTime {
            app_id: app.to_string(),
            foreground_millis: millis,
        }
    }

    fn config() -> UsageConfig {
        UsageConfig {
            period: std::time::Duration::from_secs(900),
            noise_floor_minutes: 1,
            system_app_prefixes: vec!["com.android.".into()],
        }
    }

    fn by_app(usages: &[AppUsage], app: &str) -> AppUsage {
        usages
            .iter()
            .find(|u| u.app_id == app)
            .cloned()
            .unwrap_or_else(|| panic!("no usage row for {app}"))
    }

    #[test]
    fn weekly_only_app_estimates_daily_as_a_seventh() {
        let usages = reconcile(&[], &[row("app.a", 70 * MILLIS_PER_MINUTE)], &[]);
        let usage = by_app(&usages, "app.a");
        assert_eq!(usage.weekly_minutes, 70);
        assert_eq!(usage.daily_minutes, 10);
    }

    #[test]
    fn direct_daily_figure_beats_the_estimate() {
        let usages = reconcile(
            &[row("app.a", 25 * MILLIS_PER_MINUTE)],
            &[row("app.a", 70 * MILLIS_PER_MINUTE)],
            &[],
        );
        let usage = by_app(&usages, "app.a");
        assert_eq!(usage.daily_minutes, 25);
        assert_eq!(usage.weekly_minutes, 70);
    }

    #[test]
    fn monthly_total_backs_up_a_missing_weekly_row() {
        let usages = reconcile(&[], &[], &[row("app.a", 140 * MILLIS_PER_MINUTE)]);
        let usage = by_app(&usages, "app.a");
        assert_eq!(usage.weekly_minutes, 140);
        assert_eq!(usage.daily_minutes, 20);
    }

    #[test]
    fn weekly_granularity_is_preferred_over_monthly() {
        let usages = reconcile(
            &[],
            &[row("app.a", 70 * MILLIS_PER_MINUTE)],
            &[row("app.a", 300 * MILLIS_PER_MINUTE)],
        );
        assert_eq!(by_app(&usages, "app.a").weekly_minutes, 70);
    }

    #[test]
    fn duplicate_rows_for_one_app_are_summed() {
        let usages = reconcile(
            &[],
            &[
                row("app.a", 30 * MILLIS_PER_MINUTE),
                row("app.a", 40 * MILLIS_PER_MINUTE),
            ],
            &[],
        );
        assert_eq!(by_app(&usages, "app.a").weekly_minutes, 70);
    }

    #[test]
    fn apps_with_no_foreground_time_are_dropped() {
        let usages = reconcile(&[], &[row("app.a", 0)], &[]);
        assert!(usages.is_empty());
    }

    #[test]
    fn daily_only_app_keeps_its_figure_for_both_buckets() {
        let usages = reconcile(&[row("app.new", 12 * MILLIS_PER_MINUTE)], &[], &[]);
        let usage = by_app(&usages, "app.new");
        assert_eq!(usage.daily_minutes, 12);
        assert_eq!(usage.weekly_minutes, 12);
    }

    #[test]
    fn event_pairs_are_summed_per_app() {
        let day_start = Utc::now().date_naive().and_time(NaiveTime::MIN).and_utc();
        let t = |minutes: i64| day_start + ChronoDuration::minutes(minutes);
        let events = vec![
            ForegroundTransition {
                app_id: "app.a".into(),
                kind: TransitionKind::EnterForeground,
                at: t(0),
            },
            ForegroundTransition {
                app_id: "app.a".into(),
                kind: TransitionKind::LeaveForeground,
                at: t(10),
            },
            ForegroundTransition {
                app_id: "app.b".into(),
                kind: TransitionKind::EnterForeground,
                at: t(10),
            },
            ForegroundTransition {
                app_id: "app.b".into(),
                kind: TransitionKind::LeaveForeground,
                at: t(15),
            },
        ];

        let usages = rebuild_from_events(&events, day_start, t(20));
        assert_eq!(by_app(&usages, "app.a").daily_minutes, 10);
        assert_eq!(by_app(&usages, "app.b").daily_minutes, 5);
    }

    #[test]
    fn pairs_entered_before_today_skip_the_daily_bucket() {
        let day_start = Utc::now().date_naive().and_time(NaiveTime::MIN).and_utc();
        let events = vec![
            ForegroundTransition {
                app_id: "app.a".into(),
                kind: TransitionKind::EnterForeground,
                at: day_start - ChronoDuration::minutes(30),
            },
            ForegroundTransition {
                app_id: "app.a".into(),
                kind: TransitionKind::LeaveForeground,
                at: day_start - ChronoDuration::minutes(10),
            },
        ];

        let usages = rebuild_from_events(&events, day_start, day_start);
        let usage = by_app(&usages, "app.a");
        assert_eq!(usage.weekly_minutes, 20);
        assert_eq!(usage.daily_minutes, 0);
    }

    #[test]
    fn open_pair_is_closed_at_the_window_end() {
        let day_start = Utc::now().date_naive().and_time(NaiveTime::MIN).and_utc();
        let events = vec![ForegroundTransition {
            app_id: "app.a".into(),
            kind: TransitionKind::EnterForeground,
            at: day_start,
        }];

        let usages = rebuild_from_events(&events, day_start, day_start + ChronoDuration::minutes(8));
        assert_eq!(by_app(&usages, "app.a").daily_minutes, 8);
    }

    #[test]
    fn noise_floor_and_system_apps_are_filtered() {
        let usages = vec![
            AppUsage {
                app_id: "com.android.systemui".into(),
                daily_minutes: 100,
                weekly_minutes: 500,
            },
            AppUsage {
                app_id: "app.tiny".into(),
                daily_minutes: 0,
                weekly_minutes: 0,
            },
            AppUsage {
                app_id: "app.real".into(),
                daily_minutes: 10,
                weekly_minutes: 70,
            },
        ];

        let kept = filter_noise(usages, &config());
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].app_id, "app.real");
    }

    struct ScriptedStats {
        daily: Vec<AppForegroundTime>,
        weekly: Vec<AppForegroundTime>,
        monthly: Vec<AppForegroundTime>,
    }

    #[async_trait]
    impl UsageStatsProvider for ScriptedStats {
        async fn usage_stats(
            &self,
            granularity: Granularity,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
        ) -> Result<Vec<AppForegroundTime>> {
            Ok(match granularity {
                Granularity::Daily => self.daily.clone(),
                Granularity::Weekly => self.weekly.clone(),
                Granularity::Monthly => self.monthly.clone(),
            })
        }
    }

    struct ScriptedEvents {
        events: Mutex<Vec<ForegroundTransition>>,
    }

    #[async_trait]
    impl ForegroundEvents for ScriptedEvents {
        async fn events_between(
            &self,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
        ) -> Result<Vec<ForegroundTransition>> {
            Ok(self.events.lock().unwrap().clone())
        }
    }

    fn deps(store: MemoryStore, stats: ScriptedStats, events: Vec<ForegroundTransition>) -> UsageDeps {
        let subject = Subject::new("subj-1");
        UsageDeps {
            identity: Arc::new(StaticIdentity::signed_in(subject.clone())),
            subject,
            store: Arc::new(store),
            stats: Arc::new(stats),
            events: Arc::new(ScriptedEvents {
                events: Mutex::new(events),
            }),
        }
    }

    #[tokio::test]
    async fn run_uploads_one_aggregate_per_surviving_app() {
        let store = MemoryStore::new();
        let stats = ScriptedStats {
            daily: vec![row("app.a", 25 * MILLIS_PER_MINUTE)],
            weekly: vec![
                row("app.a", 70 * MILLIS_PER_MINUTE),
                row("com.android.systemui", 900 * MILLIS_PER_MINUTE),
            ],
            monthly: vec![],
        };
        let deps = deps(store.clone(), stats, vec![]);

        run_once(&deps, &config()).await.unwrap();

        let ids = store.doc_ids(collections::USAGE_AGGREGATES).await;
        assert_eq!(ids, vec!["subj-1_app.a".to_string()]);

        let aggregate: UsageAggregate = store
            .get(collections::USAGE_AGGREGATES, "subj-1_app.a")
            .await
            .unwrap()
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(aggregate.daily_minutes, 25);
        assert_eq!(aggregate.weekly_minutes, 70);
    }

    #[tokio::test]
    async fn empty_stats_fall_back_to_the_event_log() {
        let store = MemoryStore::new();
        let day_start = Utc::now().date_naive().and_time(NaiveTime::MIN).and_utc();
        let events = vec![
            ForegroundTransition {
                app_id: "app.a".into(),
                kind: TransitionKind::EnterForeground,
                at: day_start,
            },
            ForegroundTransition {
                app_id: "app.a".into(),
                kind: TransitionKind::LeaveForeground,
                at: day_start + ChronoDuration::minutes(5),
            },
        ];
        let stats = ScriptedStats {
            daily: vec![],
            weekly: vec![],
            monthly: vec![],
        };
        let deps = deps(store.clone(), stats, events);

        run_once(&deps, &config()).await.unwrap();

        let aggregate: UsageAggregate = store
            .get(collections::USAGE_AGGREGATES, "subj-1_app.a")
            .await
            .unwrap()
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(aggregate.daily_minutes, 5);
        assert_eq!(aggregate.weekly_minutes, 5);
    }

    #[tokio::test]
    async fn reupload_overwrites_the_previous_aggregate() {
        let store = MemoryStore::new();
        let stats = ScriptedStats {
            daily: vec![row("app.a", 25 * MILLIS_PER_MINUTE)],
            weekly: vec![row("app.a", 70 * MILLIS_PER_MINUTE)],
            monthly: vec![],
        };
        let deps = deps(store.clone(), stats, vec![]);

        run_once(&deps, &config()).await.unwrap();
        run_once(&deps, &config()).await.unwrap();

        let ids = store.doc_ids(collections::USAGE_AGGREGATES).await;
        assert_eq!(ids.len(), 1);
    }
}
