//! Example: Watch published snapshots and print input flag changes.

use std::collections::HashMap;

use unii_lan_bridge::{InputStatusFlags, PanelConfig, UniiPanel};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = PanelConfig::builder()
        .panel_ip("192.168.1.100")
        .shared_key("secret12")
        .poll_interval_ms(2000)
        .build();

    let mut panel = UniiPanel::connect(config).await?;
    let mut snapshots = panel.watch_snapshots();
    let mut last: HashMap<u16, InputStatusFlags> = HashMap::new();

    println!("Listening for input changes (Ctrl+C to stop)...\n");

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    println!("Snapshot channel closed");
                    break;
                }
                let Some(snapshot) = snapshots.borrow_and_update().clone() else {
                    continue;
                };
                for input in &snapshot.inputs {
                    let flags = input.flags();
                    let Some(old) = last.insert(input.id, flags) else {
                        continue;
                    };
                    let changed = InputStatusFlags::changed(old, flags);
                    if changed.is_empty() {
                        continue;
                    }
                    println!("Input {} ({}) changed:", input.id, input.name);
                    for (name, flag) in changed.iter_names() {
                        let sign = if flags.contains(flag) { '+' } else { '-' };
                        println!("  {} {}", sign, name);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nDisconnecting...");
                break;
            }
        }
    }

    panel.disconnect().await?;
    Ok(())
}
