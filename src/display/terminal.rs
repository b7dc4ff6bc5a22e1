// src/display/terminal.rs
//! Terminal status screen for the fused tracker

use crate::{
    error::Result,
    tracker::{LocationFuser, ProviderStatus, TimedReading, TrackerStatus},
};
use chrono::{DateTime, Utc};
use crossterm::{
    cursor::{Hide, MoveTo, Show},
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{Clear, ClearType, DisableLineWrap, EnableLineWrap},
};
use std::{
    io::{self, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::sleep;

pub struct TerminalDisplay;

impl TerminalDisplay {
    pub fn new() -> Self {
        Self
    }

    /// Redraw the tracker status once a second until `running` clears
    pub async fn run(&self, fuser: LocationFuser, running: Arc<AtomicBool>) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(stdout, Hide, DisableLineWrap)?;

        // Set up Ctrl+C handler
        let running_clone = Arc::clone(&running);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                running_clone.store(false, Ordering::Relaxed);
            }
        });

        while running.load(Ordering::Relaxed) {
            execute!(stdout, Clear(ClearType::All), MoveTo(0, 0))?;
            render_status(&mut stdout, &fuser.status())?;
            stdout.flush()?;
            sleep(Duration::from_secs(1)).await;
        }

        execute!(stdout, Show, EnableLineWrap)?;
        println!("\nShutting down...");
        Ok(())
    }
}

impl Default for TerminalDisplay {
    fn default() -> Self {
        Self::new()
    }
}

/// Render one frame of the status screen.
///
/// Ages are measured against `status.as_of`, the tracker's own clock.
pub fn render_status(out: &mut impl Write, status: &TrackerStatus) -> Result<()> {
    execute!(
        out,
        SetForegroundColor(Color::Green),
        Print("=".repeat(60)),
        Print("\n"),
        Print("Location Tracker - Fused Satellite/Network Position"),
        Print("\n"),
        Print("=".repeat(60)),
        Print("\n"),
        ResetColor
    )?;

    let state = if status.running { "running" } else { "stopped" };
    execute!(out, Print(format!("Tracking: {}\n\n", state)))?;

    render_fused_section(out, status.fused.as_ref(), status.as_of)?;
    render_provider_section(out, &status.gps, Color::Cyan, status.as_of)?;
    render_provider_section(out, &status.network, Color::Magenta, status.as_of)?;

    execute!(
        out,
        SetForegroundColor(Color::Green),
        Print("=".repeat(60)),
        Print("\n"),
        Print("Press Ctrl+C to exit"),
        Print("\n"),
        ResetColor
    )?;

    Ok(())
}

fn render_fused_section(
    out: &mut impl Write,
    fused: Option<&TimedReading>,
    now: DateTime<Utc>,
) -> Result<()> {
    execute!(
        out,
        SetForegroundColor(Color::Yellow),
        Print("FUSED POSITION:\n"),
        ResetColor
    )?;

    match fused {
        Some(timed) => {
            let r = &timed.reading;
            execute!(
                out,
                Print(format!("  Provider:  {:>12}\n", r.provider)),
                Print(format!("  Latitude:  {:>12.6}°\n", r.latitude)),
                Print(format!("  Longitude: {:>12.6}°\n", r.longitude)),
                Print(format!("  Accuracy:  {:>12.1} m\n", r.accuracy)),
                Print(format!("  Speed:     {:>12.1} m/s\n", r.speed)),
                Print(format!("  Bearing:   {:>12.1}°\n", r.bearing)),
                Print(format!("  Age:       {:>12} s\n\n", age_secs(timed, now)))
            )?;
        }
        None => {
            execute!(out, Print("  No fix\n\n"))?;
        }
    }

    Ok(())
}

fn render_provider_section(
    out: &mut impl Write,
    provider: &ProviderStatus,
    color: Color,
    now: DateTime<Utc>,
) -> Result<()> {
    execute!(
        out,
        SetForegroundColor(color),
        Print(format!("{} PROVIDER:\n", provider.kind.name().to_uppercase())),
        ResetColor
    )?;

    let last = match &provider.last {
        Some(timed) => format!(
            "{:.6}, {:.6} ({} s ago)",
            timed.reading.latitude,
            timed.reading.longitude,
            age_secs(timed, now)
        ),
        None => "none".to_string(),
    };

    execute!(
        out,
        Print(format!("  Running:   {}\n", yes_no(provider.running))),
        Print(format!("  Fresh:     {}\n", yes_no(provider.has_fresh))),
        Print(format!("  Any:       {}\n", yes_no(provider.has_any))),
        Print(format!("  Last:      {}\n\n", last))
    )?;

    Ok(())
}

fn age_secs(timed: &TimedReading, now: DateTime<Utc>) -> i64 {
    now.signed_duration_since(timed.received_at).num_seconds()
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::{ProviderKind, Reading};
    use chrono::TimeZone;

    fn provider(kind: ProviderKind) -> ProviderStatus {
        ProviderStatus {
            kind,
            running: true,
            has_fresh: false,
            has_any: false,
            last: None,
        }
    }

    #[test]
    fn test_render_without_fix() {
        let status = TrackerStatus {
            as_of: Utc::now(),
            running: true,
            fused: None,
            gps: provider(ProviderKind::Gps),
            network: provider(ProviderKind::Network),
        };
        let mut out = Vec::new();
        render_status(&mut out, &status).unwrap();

        let text = String::from_utf8_lossy(&out);
        assert!(text.contains("No fix"));
        assert!(text.contains("GPS PROVIDER"));
        assert!(text.contains("NETWORK PROVIDER"));
    }

    #[test]
    fn test_render_with_fix() {
        let now = Utc::now();
        let reading = Reading::new(ProviderKind::Network, 42.438878, -71.119277, now);
        let status = TrackerStatus {
            as_of: now,
            running: true,
            fused: Some(TimedReading::new(reading, now)),
            gps: provider(ProviderKind::Gps),
            network: provider(ProviderKind::Network),
        };
        let mut out = Vec::new();
        render_status(&mut out, &status).unwrap();

        let text = String::from_utf8_lossy(&out);
        assert!(text.contains("42.438878"));
        assert!(text.contains("network"));
    }

    #[test]
    fn test_ages_follow_snapshot_clock() {
        let received = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let as_of = received + chrono::Duration::seconds(90);
        let timed = TimedReading::new(Reading::new(ProviderKind::Gps, 1.0, 2.0, received), received);
        let mut gps = provider(ProviderKind::Gps);
        gps.last = Some(timed.clone());
        let status = TrackerStatus {
            as_of,
            running: true,
            fused: Some(timed),
            gps,
            network: provider(ProviderKind::Network),
        };
        let mut out = Vec::new();
        render_status(&mut out, &status).unwrap();

        let text = String::from_utf8_lossy(&out);
        assert!(text.contains(&format!("Age:       {:>12} s", 90)));
        assert!(text.contains("(90 s ago)"));
    }
}
