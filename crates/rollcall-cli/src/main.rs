use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall face attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture enrollment samples for a roster subject
    Enroll {
        /// StudentID from the roster
        subject_id: i64,
        /// Number of face samples to capture (0 = daemon default)
        #[arg(short, long, default_value_t = 0)]
        count: u32,
        /// Wait until the session ends
        #[arg(short, long)]
        wait: bool,
    },
    /// Stop the running enrollment session
    StopEnroll,
    /// Confirm a subject in front of the camera and mark attendance
    Attend {
        /// StudentID to confirm
        subject_id: i64,
        /// Wait until the session ends
        #[arg(short, long)]
        wait: bool,
    },
    /// Stop the running recognition session
    StopAttend,
    /// Retrain the recognition model from the dataset
    Train {
        /// Wait until training finishes
        #[arg(short, long)]
        wait: bool,
    },
    /// Show daemon status
    Status,
    /// List active roster entries
    Roster,
    /// List capture devices (bypasses the daemon)
    Devices,
    /// Run camera diagnostics (bypasses the daemon)
    Test {
        /// Camera index (/dev/videoN)
        #[arg(short, long, default_value_t = 0)]
        index: u32,
        /// Number of frames to grab
        #[arg(short, long, default_value_t = 10)]
        frames: u32,
    },
}

#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    async fn enroll(&self, subject_id: i64, target_count: u32) -> zbus::Result<()>;
    async fn stop_enroll(&self) -> zbus::Result<bool>;
    async fn attend(&self, subject_id: i64) -> zbus::Result<()>;
    async fn stop_attend(&self) -> zbus::Result<bool>;
    async fn train(&self) -> zbus::Result<()>;
    async fn status(&self) -> zbus::Result<String>;
    async fn roster(&self) -> zbus::Result<String>;
}

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices => return list_devices(),
        Commands::Test { index, frames } => return camera_test(index, frames),
        _ => {}
    }

    let conn = zbus::Connection::session()
        .await
        .context("cannot connect to the session bus")?;
    let proxy = AttendanceProxy::new(&conn)
        .await
        .context("rollcalld is not reachable")?;

    match cli.command {
        Commands::Enroll {
            subject_id,
            count,
            wait,
        } => {
            proxy.enroll(subject_id, count).await?;
            println!("Capturing samples for subject {subject_id}...");
            if wait {
                let capture = wait_for_section(&proxy, "capture").await?;
                report("capture", &capture);
            }
        }
        Commands::StopEnroll => {
            if proxy.stop_enroll().await? {
                println!("Capture stopped.");
            } else {
                println!("No capture session was running.");
            }
        }
        Commands::Attend { subject_id, wait } => {
            proxy.attend(subject_id).await?;
            println!("Looking for subject {subject_id}. Blink to confirm.");
            if wait {
                let recognition = wait_for_section(&proxy, "recognition").await?;
                report("recognition", &recognition);
            }
        }
        Commands::StopAttend => {
            if proxy.stop_attend().await? {
                println!("Process stopped.");
            } else {
                println!("No recognition session was running.");
            }
        }
        Commands::Train { wait } => {
            proxy.train().await?;
            println!("Training faces... Please wait.");
            if wait {
                let training = wait_for_section(&proxy, "training").await?;
                report("training", &training);
            }
        }
        Commands::Status => {
            let status: serde_json::Value = serde_json::from_str(&proxy.status().await?)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Roster => {
            let entries: Vec<serde_json::Value> = serde_json::from_str(&proxy.roster().await?)?;
            if entries.is_empty() {
                println!("No active students.");
            }
            for entry in entries {
                println!(
                    "{} (ID: {})",
                    entry["full_name"].as_str().unwrap_or(""),
                    entry["subject_id"]
                );
            }
        }
        Commands::Devices | Commands::Test { .. } => unreachable!("handled without the daemon"),
    }

    Ok(())
}

/// Poll daemon status until `section` leaves its running state.
async fn wait_for_section(proxy: &AttendanceProxy<'_>, section: &str) -> Result<serde_json::Value> {
    let mut last = String::new();
    loop {
        let status: serde_json::Value = serde_json::from_str(&proxy.status().await?)?;
        let value = status[section].clone();
        let state = value["state"].as_str().unwrap_or("idle");
        if state != "running" {
            return Ok(value);
        }

        let line = match section {
            "capture" => format!("Captured {}/{}", value["captured"], value["target"]),
            "recognition" => format!("Blinks: {}", value["blinks"]),
            _ => value["message"].as_str().unwrap_or_default().to_string(),
        };
        if line != last {
            println!("{line}");
            last = line;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn report(section: &str, value: &serde_json::Value) {
    match (section, value["state"].as_str().unwrap_or("idle")) {
        ("capture", "completed") => println!("Capture complete ({} samples).", value["captured"]),
        ("capture", "stopped") => println!("Capture stopped after {} samples.", value["captured"]),
        ("recognition", "matched") => println!(
            "Attendance marked for {}!",
            value["name"].as_str().unwrap_or("Known User")
        ),
        ("recognition", "stopped") => println!("Process stopped."),
        ("training", "succeeded" | "failed") => {
            println!("{}", value["message"].as_str().unwrap_or_default())
        }
        (_, "error") => println!("Error: {}", value["message"].as_str().unwrap_or_default()),
        (_, state) => println!("{section}: {state}"),
    }
}

fn list_devices() -> Result<()> {
    let devices = rollcall_hw::Camera::list_devices();
    if devices.is_empty() {
        println!("No capture devices found.");
    }
    for dev in devices {
        println!("{}  {}  [{}] {}", dev.index, dev.path, dev.driver, dev.name);
        if !dev.bus.is_empty() {
            println!("      bus: {}", dev.bus);
        }
    }
    Ok(())
}

fn camera_test(index: u32, frames: u32) -> Result<()> {
    if frames == 0 {
        bail!("--frames must be at least 1");
    }
    println!("Running camera diagnostics on /dev/video{index}...");
    let mut camera = rollcall_hw::Camera::open(index)?;
    println!(
        "Opened {}x{} ({:?})",
        camera.width, camera.height, camera.fourcc
    );

    let started = Instant::now();
    let mut brightness = Vec::with_capacity(frames as usize);
    for _ in 0..frames {
        let frame = camera.capture_frame()?;
        brightness.push(frame.avg_brightness());
        println!(
            "frame {:>4}  {}x{}  brightness {:6.1}",
            frame.sequence,
            frame.width,
            frame.height,
            frame.avg_brightness()
        );
    }
    let elapsed = started.elapsed();
    tracing::debug!(index, frames, elapsed_ms = elapsed.as_millis() as u64, "camera test finished");
    let mean = brightness.iter().sum::<f32>() / brightness.len() as f32;
    println!(
        "{} frames in {:.2}s ({:.1} fps), mean brightness {:.1}",
        frames,
        elapsed.as_secs_f64(),
        frames as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        mean
    );
    Ok(())
}
