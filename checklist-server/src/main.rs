//! Checklist server binary.
//!
//! Serves checklists over WebSocket. The bind address comes from the first
//! argument, then `CHECKLIST_BIND_ADDR`, then the default `127.0.0.1:9090`.
//! A demo checklist is created on startup and its id logged.

use log::info;

use checklist_collab::server::{ChecklistServer, ServerConfig};
use checklist_core::{Checklist, ChecklistSettings, Item};

const BIND_ADDR_ENV: &str = "CHECKLIST_BIND_ADDR";

fn config_from_env() -> ServerConfig {
    let defaults = ServerConfig::default();
    let bind_addr = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(BIND_ADDR_ENV).ok())
        .unwrap_or(defaults.bind_addr);
    ServerConfig { bind_addr, ..defaults }
}

fn demo_checklist() -> Checklist {
    let settings = ChecklistSettings {
        title: "Groceries".to_string(),
        remove_on_check: false,
        users: Vec::new(),
    };
    let mut checklist = Checklist::new("demo", settings);
    checklist.items = vec![
        Item::new("demo-1", "Buy milk", 0),
        Item::new("demo-2", "2%", 1),
        Item::new("demo-3", "Call Bob", 0),
    ];
    checklist
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = config_from_env();
    info!("Starting checklist server on {}", config.bind_addr);

    let server = ChecklistServer::new(config);
    let demo = server.import_checklist(demo_checklist()).await;
    info!("Demo checklist available as {demo}");

    server.run().await
}
