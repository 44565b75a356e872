use crate::browser::{BrowserSession, SessionProvider};
use crate::db::{RunJournal, RunRecord};
use crate::errors::{CrawlError, SessionError};
use crate::extract::{extract, has_poll_items};
use crate::models::{RankedEntry, RunOutcome};
use crate::notify::{Notifier, failure_message, success_message};
use crate::ranking::merge;
use crate::sheets::SheetStore;
use chrono::{Local, Utc};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout, timeout_at};
use uuid::Uuid;

const RENDER_POLL_INTERVAL: Duration = Duration::from_millis(250);
// Notification and teardown run after the deadline; they get their own bound
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub target_url: String,
    pub run_tag: String,
    /// Upper bound on waiting for poll items to show up after navigation.
    pub render_wait: Duration,
    /// Upper bound on session start through persist.
    pub run_deadline: Duration,
}

/// One scrape -> rank -> persist -> notify cycle over injected collaborators.
pub struct CrawlWorkflow {
    sessions: Arc<dyn SessionProvider>,
    store: SheetStore,
    notifier: Arc<dyn Notifier>,
    journal: Option<Arc<RunJournal>>,
    settings: WorkflowSettings,
    run_lock: Mutex<()>,
}

impl CrawlWorkflow {
    pub fn new(
        sessions: Arc<dyn SessionProvider>,
        store: SheetStore,
        notifier: Arc<dyn Notifier>,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            sessions,
            store,
            notifier,
            journal: None,
            settings,
            run_lock: Mutex::new(()),
        }
    }

    pub fn with_journal(mut self, journal: Arc<RunJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    // Never fails: errors end up in the returned outcome and the failure message.
    // The browser session, once started, is closed exactly once.
    pub async fn run_once(&self) -> RunOutcome {
        let _running = match self.run_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                warn!("Previous run still in progress; skipping this trigger");
                return RunOutcome::Skipped;
            }
        };

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let deadline = Instant::now() + self.settings.run_deadline;
        info!("Run {} starting", run_id);

        // Session creation runs as its own task so a deadline hit does not drop a
        // session chromedriver is about to hand back; see `close_late_session`.
        let mut starting = tokio::spawn({
            let sessions = Arc::clone(&self.sessions);
            async move { sessions.start().await }
        });

        let outcome = match timeout_at(deadline, &mut starting).await {
            Ok(Ok(Ok(mut session))) => {
                let result = match timeout_at(deadline, self.drive(session.as_mut())).await {
                    Ok(result) => result,
                    Err(_) => Err(CrawlError::Deadline(self.settings.run_deadline)),
                };
                let outcome = into_outcome(run_id, result);
                self.notify(&outcome).await;
                self.teardown(session.as_mut()).await;
                outcome
            }
            Ok(Ok(Err(e))) => {
                let outcome = into_outcome(run_id, Err(e.into()));
                self.notify(&outcome).await;
                outcome
            }
            Ok(Err(e)) => {
                let outcome = into_outcome(run_id, Err(SessionError::Aborted(e.to_string()).into()));
                self.notify(&outcome).await;
                outcome
            }
            Err(_) => {
                close_late_session(starting);
                let outcome = into_outcome(run_id, Err(CrawlError::Deadline(self.settings.run_deadline)));
                self.notify(&outcome).await;
                outcome
            }
        };

        self.record(run_id, started_at, &outcome).await;
        outcome
    }

    async fn drive(&self, session: &mut dyn BrowserSession) -> Result<Vec<RankedEntry>, CrawlError> {
        info!("Navigating to {}", self.settings.target_url);
        session.navigate(&self.settings.target_url).await?;

        self.wait_for_render(session).await;
        let source = session.page_source().await?;
        let entries = extract(&source)?;
        info!("Extracted {} poll items", entries.len());

        let previous = self.store.read_previous_ranks().await?;
        let ranked = merge(&entries, &previous);

        self.store.persist(&ranked, Local::now().fixed_offset()).await?;
        Ok(ranked)
    }

    // Best effort: poll until items appear or the wait runs out, then let extraction decide
    async fn wait_for_render(&self, session: &mut dyn BrowserSession) {
        let give_up = Instant::now() + self.settings.render_wait;
        loop {
            match session.page_source().await {
                Ok(source) if has_poll_items(&source) => {
                    debug!("Poll items rendered");
                    return;
                }
                Ok(_) => {}
                Err(e) => warn!("Page source unavailable while waiting for render: {}", e),
            }
            if Instant::now() >= give_up {
                warn!("Poll items not visible after {:?}; extracting anyway", self.settings.render_wait);
                return;
            }
            sleep(RENDER_POLL_INTERVAL).await;
        }
    }

    async fn notify(&self, outcome: &RunOutcome) {
        let text = match outcome {
            RunOutcome::Success(_) => success_message(&self.settings.run_tag),
            RunOutcome::Failure(message) => failure_message(&self.settings.run_tag, message),
            RunOutcome::Skipped => return,
        };
        match timeout(CLEANUP_TIMEOUT, self.notifier.send(&text)).await {
            Ok(Ok(())) => info!("Notified: {}", text),
            Ok(Err(e)) => error!("Failed to send notification {:?}: {}", text, e),
            Err(_) => error!("Notification {:?} timed out", text),
        }
    }

    async fn teardown(&self, session: &mut dyn BrowserSession) {
        match timeout(CLEANUP_TIMEOUT, session.quit()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("{}", e),
            Err(_) => error!("Session teardown timed out"),
        }
    }

    async fn record(&self, run_id: Uuid, started_at: chrono::DateTime<Utc>, outcome: &RunOutcome) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.record(&RunRecord::new(run_id, started_at, outcome)).await {
                error!("Failed to journal run {}: {}", run_id, e);
            }
        }
    }
}

// The run already failed on its deadline; if a session still shows up, quit it
// so no headless Chrome is left behind.
fn close_late_session(mut starting: JoinHandle<Result<Box<dyn BrowserSession>, SessionError>>) {
    tokio::spawn(async move {
        match timeout(CLEANUP_TIMEOUT, &mut starting).await {
            Ok(Ok(Ok(mut session))) => {
                warn!("Browser session arrived after the deadline; closing it");
                if let Err(e) = session.quit().await {
                    error!("{}", e);
                }
            }
            Ok(_) => {}
            Err(_) => {
                error!("Session start still pending after the deadline; abandoning it");
                starting.abort();
            }
        }
    });
}

fn into_outcome(run_id: Uuid, result: Result<Vec<RankedEntry>, CrawlError>) -> RunOutcome {
    match result {
        Ok(rows) => {
            info!("Run {} done: {} entries persisted", run_id, rows.len());
            RunOutcome::Success(rows)
        }
        Err(e) => {
            error!("Run {} failed: {}", run_id, e);
            RunOutcome::Failure(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{NotificationError, TeardownError};
    use crate::sheets::tests::FakeSheet;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    const POLL_PAGE: &str = r#"<html><body><ul>
        <li class="poll_list_item"><span class="poll_label">A</span><span class="txt">50표</span></li>
        <li class="poll_list_item"><span class="poll_label">B</span><span class="txt">120표</span></li>
        <li class="poll_list_item"><span class="poll_label">C</span><span class="txt">120표</span></li>
    </ul></body></html>"#;

    const LOADING_PAGE: &str = r#"<html><body><div class="loading"></div></body></html>"#;

    #[derive(Default)]
    struct Calls {
        starts: usize,
        navigations: Vec<String>,
        sources: usize,
        quits: usize,
    }

    struct FakeProvider {
        source: String,
        start_delay: Duration,
        fail_start: bool,
        hang_navigate: bool,
        // page_source calls answered with a page that has no poll items yet
        loading_polls: usize,
        first_source_fails: bool,
        fail_quit: bool,
        calls: Arc<StdMutex<Calls>>,
    }

    impl FakeProvider {
        fn serving(source: &str) -> Self {
            Self {
                source: source.to_string(),
                start_delay: Duration::ZERO,
                fail_start: false,
                hang_navigate: false,
                loading_polls: 0,
                first_source_fails: false,
                fail_quit: false,
                calls: Arc::default(),
            }
        }
    }

    struct FakeSession {
        source: String,
        hang_navigate: bool,
        loading_polls: usize,
        first_source_fails: bool,
        fail_quit: bool,
        calls: Arc<StdMutex<Calls>>,
    }

    #[async_trait]
    impl SessionProvider for FakeProvider {
        async fn start(&self) -> Result<Box<dyn BrowserSession>, SessionError> {
            self.calls.lock().unwrap().starts += 1;
            if !self.start_delay.is_zero() {
                sleep(self.start_delay).await;
            }
            if self.fail_start {
                return Err(SessionError::WebDriver {
                    kind: "session not created".into(),
                    message: "Chrome failed to start".into(),
                });
            }
            Ok(Box::new(FakeSession {
                source: self.source.clone(),
                hang_navigate: self.hang_navigate,
                loading_polls: self.loading_polls,
                first_source_fails: self.first_source_fails,
                fail_quit: self.fail_quit,
                calls: self.calls.clone(),
            }))
        }
    }

    #[async_trait]
    impl BrowserSession for FakeSession {
        async fn navigate(&mut self, url: &str) -> Result<(), SessionError> {
            self.calls.lock().unwrap().navigations.push(url.to_string());
            if self.hang_navigate {
                std::future::pending::<()>().await;
            }
            Ok(())
        }

        async fn page_source(&mut self) -> Result<String, SessionError> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                calls.sources += 1;
                calls.sources
            };
            if self.first_source_fails && call == 1 {
                return Err(SessionError::WebDriver {
                    kind: "no such element".into(),
                    message: "document not ready".into(),
                });
            }
            if call <= self.loading_polls {
                return Ok(LOADING_PAGE.to_string());
            }
            Ok(self.source.clone())
        }

        async fn quit(&mut self) -> Result<(), TeardownError> {
            self.calls.lock().unwrap().quits += 1;
            if self.fail_quit {
                return Err(TeardownError("chromedriver went away".into()));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        fail: bool,
        sent: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, text: &str) -> Result<(), NotificationError> {
            self.sent.lock().unwrap().push(text.to_string());
            if self.fail {
                return Err(NotificationError::Rejected("Forbidden: bot was blocked by the user".into()));
            }
            Ok(())
        }
    }

    fn settings() -> WorkflowSettings {
        WorkflowSettings {
            target_url: "https://cafe.example/poll".into(),
            run_tag: "[test]".into(),
            render_wait: Duration::ZERO,
            run_deadline: Duration::from_secs(5),
        }
    }

    fn workflow(
        provider: FakeProvider,
        sheet: Arc<FakeSheet>,
        notifier: Arc<RecordingNotifier>,
    ) -> CrawlWorkflow {
        CrawlWorkflow::new(
            Arc::new(provider),
            SheetStore::new(sheet, 1, "득표 결과"),
            notifier,
            settings(),
        )
    }

    #[tokio::test]
    async fn successful_run_persists_ranks_and_reports_done() {
        let provider = FakeProvider::serving(POLL_PAGE);
        let calls = provider.calls.clone();
        let sheet = Arc::new(FakeSheet::with_rows(&[("A", json!(1)), ("B", json!(3))]));
        let notifier = Arc::new(RecordingNotifier::default());

        let outcome = workflow(provider, sheet.clone(), notifier.clone()).run_once().await;

        let RunOutcome::Success(rows) = outcome else {
            panic!("expected success, got {outcome:?}");
        };
        let summary: Vec<(&str, u32, Option<i64>)> = rows
            .iter()
            .map(|r| (r.name.as_str(), r.current_rank, r.rank_delta))
            .collect();
        assert_eq!(summary, vec![("B", 1, Some(2)), ("C", 2, None), ("A", 3, Some(-2))]);

        assert_eq!(sheet.cell("A2"), Some(json!("B")));
        assert_eq!(sheet.cell("E4"), Some(json!(3)));
        assert_eq!(*notifier.sent.lock().unwrap(), vec!["[test] crawling Done".to_string()]);

        let calls = calls.lock().unwrap();
        assert_eq!(calls.navigations, vec!["https://cafe.example/poll".to_string()]);
        assert_eq!(calls.quits, 1);
    }

    #[tokio::test]
    async fn persist_failure_notifies_once_and_closes_session_once() {
        let provider = FakeProvider::serving(POLL_PAGE);
        let calls = provider.calls.clone();
        let sheet = Arc::new(FakeSheet {
            fail_writes: true,
            ..FakeSheet::default()
        });
        let notifier = Arc::new(RecordingNotifier::default());

        let outcome = workflow(provider, sheet, notifier.clone()).run_once().await;

        assert_eq!(
            outcome,
            RunOutcome::Failure("spreadsheet API returned 429: quota exceeded".into())
        );
        let sent = notifier.sent.lock().unwrap();
        assert_eq!(*sent, vec!["[test] spreadsheet API returned 429: quota exceeded".to_string()]);
        assert!(!sent.iter().any(|m| m.ends_with("crawling Done")));
        assert_eq!(calls.lock().unwrap().quits, 1);
    }

    #[tokio::test]
    async fn failing_notifier_does_not_mask_the_failure() {
        let provider = FakeProvider::serving("<html><body>잠시 후 다시 시도해주세요</body></html>");
        let calls = provider.calls.clone();
        let notifier = Arc::new(RecordingNotifier {
            fail: true,
            ..RecordingNotifier::default()
        });

        let outcome = workflow(provider, Arc::new(FakeSheet::default()), notifier.clone())
            .run_once()
            .await;

        assert_eq!(
            outcome,
            RunOutcome::Failure("fetch Error: no poll items found on the page".into())
        );
        assert_eq!(notifier.sent.lock().unwrap().len(), 1);
        assert_eq!(calls.lock().unwrap().quits, 1);
    }

    #[tokio::test]
    async fn read_failure_stops_before_anything_is_written() {
        let provider = FakeProvider::serving(POLL_PAGE);
        let sheet = Arc::new(FakeSheet {
            fail_reads: true,
            ..FakeSheet::default()
        });
        let notifier = Arc::new(RecordingNotifier::default());

        let outcome = workflow(provider, sheet.clone(), notifier).run_once().await;

        assert!(matches!(outcome, RunOutcome::Failure(_)));
        assert_eq!(*sheet.flushes.lock().unwrap(), 0);
        assert_eq!(*sheet.title.lock().unwrap(), "");
    }

    #[tokio::test]
    async fn session_start_failure_is_reported_without_teardown() {
        let mut provider = FakeProvider::serving(POLL_PAGE);
        provider.fail_start = true;
        let calls = provider.calls.clone();
        let notifier = Arc::new(RecordingNotifier::default());

        let outcome = workflow(provider, Arc::new(FakeSheet::default()), notifier.clone())
            .run_once()
            .await;

        assert_eq!(
            outcome,
            RunOutcome::Failure("webdriver error session not created: Chrome failed to start".into())
        );
        assert_eq!(notifier.sent.lock().unwrap().len(), 1);
        let calls = calls.lock().unwrap();
        assert_eq!(calls.starts, 1);
        assert_eq!(calls.quits, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_browser_hits_the_deadline_and_still_closes() {
        let mut provider = FakeProvider::serving(POLL_PAGE);
        provider.hang_navigate = true;
        let calls = provider.calls.clone();
        let notifier = Arc::new(RecordingNotifier::default());
        let mut flow = workflow(provider, Arc::new(FakeSheet::default()), notifier.clone());
        flow.settings.run_deadline = Duration::from_millis(50);

        let outcome = flow.run_once().await;

        assert_eq!(outcome, RunOutcome::Failure("run exceeded its 50ms deadline".into()));
        assert_eq!(
            *notifier.sent.lock().unwrap(),
            vec!["[test] run exceeded its 50ms deadline".to_string()]
        );
        assert_eq!(calls.lock().unwrap().quits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_session_start_hits_the_deadline_and_the_late_session_is_closed() {
        let mut provider = FakeProvider::serving(POLL_PAGE);
        provider.start_delay = Duration::from_millis(200);
        let calls = provider.calls.clone();
        let notifier = Arc::new(RecordingNotifier::default());
        let mut flow = workflow(provider, Arc::new(FakeSheet::default()), notifier.clone());
        flow.settings.run_deadline = Duration::from_millis(50);

        let outcome = flow.run_once().await;

        assert_eq!(outcome, RunOutcome::Failure("run exceeded its 50ms deadline".into()));
        assert_eq!(notifier.sent.lock().unwrap().len(), 1);

        sleep(Duration::from_millis(500)).await;
        let calls = calls.lock().unwrap();
        assert_eq!(calls.starts, 1);
        assert!(calls.navigations.is_empty());
        assert_eq!(calls.quits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn render_wait_polls_until_items_appear() {
        let mut provider = FakeProvider::serving(POLL_PAGE);
        provider.loading_polls = 3;
        provider.first_source_fails = true;
        let calls = provider.calls.clone();
        let notifier = Arc::new(RecordingNotifier::default());
        let mut flow = workflow(provider, Arc::new(FakeSheet::default()), notifier.clone());
        flow.settings.render_wait = Duration::from_secs(2);
        let began = Instant::now();

        let outcome = flow.run_once().await;

        assert!(matches!(outcome, RunOutcome::Success(ref rows) if rows.len() == 3));
        // error, loading, loading, ready; then the extraction read
        assert_eq!(calls.lock().unwrap().sources, 5);
        assert!(began.elapsed() >= Duration::from_millis(750));
        assert!(began.elapsed() < Duration::from_secs(2));
        assert_eq!(*notifier.sent.lock().unwrap(), vec!["[test] crawling Done".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn render_wait_gives_up_at_its_bound() {
        let mut provider = FakeProvider::serving(POLL_PAGE);
        provider.loading_polls = usize::MAX;
        let calls = provider.calls.clone();
        let notifier = Arc::new(RecordingNotifier::default());
        let mut flow = workflow(provider, Arc::new(FakeSheet::default()), notifier);
        flow.settings.render_wait = Duration::from_secs(1);

        let outcome = flow.run_once().await;

        assert_eq!(
            outcome,
            RunOutcome::Failure("fetch Error: no poll items found on the page".into())
        );
        // polls at 0, 250, 500, 750 and 1000ms, then the extraction read
        let calls = calls.lock().unwrap();
        assert_eq!(calls.sources, 6);
        assert_eq!(calls.quits, 1);
    }

    #[tokio::test]
    async fn teardown_failure_keeps_the_success() {
        let mut provider = FakeProvider::serving(POLL_PAGE);
        provider.fail_quit = true;
        let calls = provider.calls.clone();
        let sheet = Arc::new(FakeSheet::default());
        let notifier = Arc::new(RecordingNotifier::default());

        let outcome = workflow(provider, sheet, notifier).run_once().await;

        assert!(matches!(outcome, RunOutcome::Success(_)));
        assert_eq!(calls.lock().unwrap().quits, 1);
    }

    #[tokio::test]
    async fn overlapping_trigger_is_skipped() {
        let provider = FakeProvider::serving(POLL_PAGE);
        let calls = provider.calls.clone();
        let notifier = Arc::new(RecordingNotifier::default());
        let flow = workflow(provider, Arc::new(FakeSheet::default()), notifier.clone());

        let _held = flow.run_lock.lock().await;
        assert_eq!(flow.run_once().await, RunOutcome::Skipped);

        assert_eq!(calls.lock().unwrap().starts, 0);
        assert!(notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn runs_are_journaled() {
        let journal = Arc::new(RunJournal::connect("sqlite::memory:").await.unwrap());
        let notifier = Arc::new(RecordingNotifier::default());
        let flow = workflow(
            FakeProvider::serving(POLL_PAGE),
            Arc::new(FakeSheet::default()),
            notifier,
        )
        .with_journal(journal.clone());

        flow.run_once().await;

        let runs = journal.recent_runs(5).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].outcome, "success");
        assert_eq!(runs[0].entries, 3);
    }
}
