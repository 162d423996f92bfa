//! Example: Connect to a UNii panel and print the catalog and current state.

use unii_lan_bridge::{PanelConfig, ProtocolGeneration, UniiPanel};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = PanelConfig::builder()
        .panel_ip("192.168.1.100")
        .panel_port(6502)
        .shared_key("secret12")
        .generation(ProtocolGeneration::Standard)
        .build();

    println!("Connecting to panel...");
    let mut panel = UniiPanel::connect(config).await?;

    let catalog = panel.catalog().await;
    println!("\n--- Catalog ---");
    println!("  Sections: {}", catalog.sections.len());
    for info in catalog.inputs.values() {
        println!(
            "  Input {:3}: {:16} type={:2} {:?}",
            info.id, info.name, info.sensor_type, info.category
        );
    }

    if let Some(snapshot) = panel.latest_snapshot() {
        println!("\n--- Sections ({}) ---", snapshot.sections.len());
        for section in &snapshot.sections {
            println!(
                "  {:12} {:?} armed={}",
                section.name,
                section.armed_state,
                section.is_armed()
            );
        }

        println!("\n--- Inputs ({}) ---", snapshot.inputs.len());
        for input in &snapshot.inputs {
            println!(
                "  Input {:3}: {:16} open={} bypassed={} tamper={} low_battery={}",
                input.id,
                input.name,
                input.is_open(),
                input.is_bypassed(),
                input.tamper,
                input.low_battery
            );
        }
    }

    println!("\nPress Ctrl+C to disconnect...");
    tokio::signal::ctrl_c().await?;
    panel.disconnect().await?;
    println!("Disconnected.");

    Ok(())
}
