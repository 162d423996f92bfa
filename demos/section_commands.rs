//! Example: Arm and disarm sections, bypass an input.

use unii_lan_bridge::{PanelConfig, UniiError, UniiPanel};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = PanelConfig::builder()
        .panel_ip("192.168.1.100")
        .shared_key("secret12")
        .user_code("1234")
        .build();

    let mut panel = UniiPanel::connect(config).await?;

    // Show current section states
    if let Some(snapshot) = panel.latest_snapshot() {
        for section in &snapshot.sections {
            println!(
                "Section {}: {} ({:?})",
                section.id, section.name, section.armed_state
            );
        }
    }

    // Bypass input 3 so the section can arm with it open
    println!("\nBypassing input 3...");
    match panel.bypass_input(3, "1234").await {
        Ok(()) => println!("Input 3 bypassed"),
        Err(e) => println!("Error bypassing input 3: {}", e),
    }

    // Arm section 1 with the configured code
    println!("\nArming section 1...");
    match panel.arm_section(1).await {
        Ok(()) => println!("Section 1 armed"),
        Err(UniiError::CommandRejected { code, .. }) => {
            println!("Section 1 arm rejected by panel (code {})", code)
        }
        Err(e) => println!("Error arming section 1: {}", e),
    }

    // Wait a bit then disarm
    tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;

    println!("\nDisarming section 1...");
    match panel.disarm_section(1, "1234").await {
        Ok(()) => println!("Section 1 disarmed"),
        Err(e) => println!("Error disarming section 1: {}", e),
    }

    match panel.unbypass_input(3, "1234").await {
        Ok(()) => println!("Input 3 bypass removed"),
        Err(e) => println!("Error removing bypass on input 3: {}", e),
    }

    panel.disconnect().await?;
    Ok(())
}
