use chrono::Utc;
use gigwatch::collaborator::{CollaboratorClient, CollaboratorEndpoint, CollaboratorRequest};
use gigwatch::contexts::page::{ProjectDetails, TrackButton};
use gigwatch::contexts::popup::CheckState;
use gigwatch::contexts::Confirmation;
use gigwatch::models::{JobSnapshot, QuickSettingsForm, Settings};
use gigwatch::protocol::Repository;
use gigwatch::AppCore;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

// A poller stand-in that honors the message contract and writes discovery
// results through the same store the controllers read.
fn spawn_stub_collaborator(mut endpoint: CollaboratorEndpoint, repository: Repository) {
    tokio::spawn(async move {
        let mut batch = 0u32;
        while let Some(envelope) = endpoint.recv().await {
            let reply = match envelope.request {
                CollaboratorRequest::CheckNow => {
                    batch += 1;
                    let job = JobSnapshot {
                        id: format!("job-{batch}"),
                        title: format!("Scraped listing {batch}"),
                        url: format!("https://example.com/project/{batch}"),
                        seen_at: Utc::now(),
                    };
                    match repository.record_discovery(vec![job]).await {
                        Ok(fresh) => json!({ "success": true, "newJobs": fresh }),
                        Err(error) => json!({ "success": false, "error": error.to_string() }),
                    }
                }
                CollaboratorRequest::ClearHistory => match repository.clear_discovery().await {
                    Ok(()) => json!({ "success": true }),
                    Err(error) => json!({ "success": false, "error": error.to_string() }),
                },
                CollaboratorRequest::DebugFetch => json!({ "success": true, "length": 2048 }),
                _ => json!({ "success": true }),
            };
            let _ = envelope.reply.send(reply);
        }
    });
}

async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    false
}

fn open_core(dir: &tempfile::TempDir) -> (AppCore, CollaboratorEndpoint) {
    let (client, endpoint) = CollaboratorClient::channel();
    let core = AppCore::open(dir.path(), client).expect("open core");
    (core, endpoint)
}

#[tokio::test]
async fn a_toggle_on_the_page_reaches_every_other_surface() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (core, _endpoint) = open_core(&dir);

    let page = Arc::new(
        core.page("https://example.com/project/12345-build-a-bot")
            .expect("page controller"),
    );
    let popup = Arc::new(core.popup());
    let dashboard = Arc::new(core.dashboard());

    popup.refresh().await.expect("popup load");
    dashboard.refresh().await.expect("dashboard load");
    page.refresh().await.expect("page load");

    let _page_watch = page.clone().watch_changes();
    let _popup_watch = popup.clone().watch_changes();
    let _dashboard_watch = dashboard.clone().watch_changes();

    page.toggle(ProjectDetails {
        title: "Build a bot".to_string(),
        url: "https://example.com/project/12345-build-a-bot".to_string(),
        status: "open".to_string(),
        communications: 1,
    })
    .await
    .expect("toggle");

    assert!(
        wait_until(|| {
            let popup = popup.clone();
            async move {
                popup
                    .snapshot()
                    .await
                    .tracked
                    .iter()
                    .any(|p| p.id == "12345")
            }
        })
        .await,
        "popup never saw the tracked project"
    );
    assert!(
        wait_until(|| {
            let dashboard = dashboard.clone();
            async move {
                dashboard
                    .snapshot()
                    .await
                    .tracked
                    .iter()
                    .any(|p| p.id == "12345")
            }
        })
        .await,
        "dashboard never saw the tracked project"
    );

    // Untracking from the dashboard flips the page button back.
    assert!(dashboard
        .untrack("12345", Confirmation::Confirmed)
        .await
        .expect("untrack"));
    assert!(
        wait_until(|| {
            let page = page.clone();
            async move { page.button().await == TrackButton::Untracked }
        })
        .await,
        "page button never resynchronized"
    );
}

#[tokio::test]
async fn background_discovery_flows_through_the_store_to_both_surfaces() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (core, endpoint) = open_core(&dir);
    spawn_stub_collaborator(endpoint, core.repository().clone());

    let popup = Arc::new(core.popup());
    let dashboard = Arc::new(core.dashboard());
    popup.refresh().await.expect("popup load");
    dashboard.refresh().await.expect("dashboard load");
    let _dashboard_watch = dashboard.clone().watch_changes();

    assert_eq!(popup.check_now().await, CheckState::Found(1));
    let snapshot = popup.snapshot().await;
    assert_eq!(snapshot.stats.today_count, 1);
    assert_eq!(snapshot.total_seen, 1);
    assert!(snapshot.stats.last_check.is_some());

    assert!(
        wait_until(|| {
            let dashboard = dashboard.clone();
            async move { dashboard.snapshot().await.total_seen == 1 }
        })
        .await,
        "dashboard never saw the discovery"
    );

    // Clearing history resets the ledger for everyone.
    let reply = popup
        .clear_history(Confirmation::Confirmed)
        .await
        .expect("clear")
        .expect("sent");
    assert!(reply.success);
    assert!(
        wait_until(|| {
            let dashboard = dashboard.clone();
            async move {
                let snapshot = dashboard.snapshot().await;
                snapshot.total_seen == 0 && snapshot.stats.today_count == 0
            }
        })
        .await,
        "dashboard never saw the cleared ledger"
    );
}

#[tokio::test]
async fn popup_quick_save_keeps_the_dashboard_settings_intact() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (core, endpoint) = open_core(&dir);
    spawn_stub_collaborator(endpoint, core.repository().clone());

    let popup = core.popup();
    let dashboard = core.dashboard();

    dashboard
        .save_settings(Settings {
            keywords_include: "rust".to_string(),
            telegram_token: "token-1".to_string(),
            telegram_chat_id: "chat-1".to_string(),
            quiet_hours_enabled: true,
            quiet_hours_start: "23:00".to_string(),
            ..Settings::default()
        })
        .await
        .expect("dashboard save");

    popup
        .save_quick_settings(QuickSettingsForm {
            development: false,
            ai: true,
            all: true,
            sound: false,
            interval: 5,
        })
        .await
        .expect("popup save");

    dashboard.refresh().await.expect("dashboard reload");
    let settings = dashboard
        .snapshot()
        .await
        .settings
        .expect("settings loaded");

    // Popup-owned fields took the popup's values…
    assert!(!settings.development);
    assert!(settings.all);
    assert!(!settings.sound);
    assert_eq!(settings.interval, 5);
    // …and dashboard-owned fields survived the popup's save.
    assert_eq!(settings.keywords_include, "rust");
    assert_eq!(settings.telegram_token, "token-1");
    assert!(settings.quiet_hours_enabled);
    assert_eq!(settings.quiet_hours_start, "23:00");
}

#[tokio::test]
async fn a_context_tolerates_its_own_change_notification() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (core, _endpoint) = open_core(&dir);

    let dashboard = Arc::new(core.dashboard());
    dashboard.refresh().await.expect("load");
    let _watch = dashboard.clone().watch_changes();

    // The writer's own notification re-reads what it just wrote.
    dashboard
        .save_proposal("dear client, …")
        .await
        .expect("save proposal");

    assert!(
        wait_until(|| {
            let dashboard = dashboard.clone();
            async move { dashboard.snapshot().await.proposal_template == "dear client, …" }
        })
        .await,
        "proposal never settled"
    );
    assert!(dashboard.notice().await.is_none());
}
