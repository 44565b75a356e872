mod browser;
mod config;
mod db;
mod errors;
mod extract;
mod models;
mod notify;
mod ranking;
mod sheets;
mod tasks;
mod workflow;

use browser::WebDriverProvider;
use config::Config;
use db::RunJournal;
use log::{error, info, warn};
use notify::TelegramNotifier;
use sheets::{GoogleSheetsClient, SheetStore};
use std::sync::Arc;
use workflow::{CrawlWorkflow, WorkflowSettings};

#[tokio::main]
async fn main() {
    // Initialize logging
    dotenvy::dotenv().ok();
    env_logger::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return;
        }
    };

    let sheets = match GoogleSheetsClient::new(&config.client_email, &config.private_key, &config.sheet_id).await {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Failed to set up spreadsheet client: {}", e);
            return;
        }
    };

    let workflow = CrawlWorkflow::new(
        Arc::new(WebDriverProvider::new(&config.webdriver_url, &config.user_data_dir)),
        SheetStore::new(sheets, config.sheet_index, &config.sheet_title_prefix),
        Arc::new(TelegramNotifier::new(&config.telegram_token, &config.chat_id)),
        WorkflowSettings {
            target_url: config.target_url.clone(),
            run_tag: config.run_tag.clone(),
            render_wait: config.render_wait,
            run_deadline: config.run_deadline,
        },
    );

    // The journal is a convenience; the crawler runs without it
    let workflow = match RunJournal::connect(&config.database_url).await {
        Ok(journal) => {
            let journal = Arc::new(journal);
            if let Ok(runs) = journal.recent_runs(1).await {
                if let Some(last) = runs.first() {
                    info!("Last run {} at {}: {}", last.id, last.started_at.to_rfc3339(), last.outcome);
                }
            }
            workflow.with_journal(journal)
        }
        Err(e) => {
            warn!("Run journal unavailable ({}); continuing without it", e);
            workflow
        }
    };

    tokio::select! {
        _ = tasks::hourly_crawl::run_hourly(Arc::new(workflow), config.run_on_start) => {}
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }
}
