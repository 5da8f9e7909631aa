//! Headless rig driver: scan cameras, run a timed recording, or serve the
//! remote control protocol until interrupted.

use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use camrig::camera::{sim::SimSdk, CameraHandleSet};
use camrig::config::RigConfig;
use camrig::pipeline::Recorder;
use camrig::trigger::{scan_ports, TriggerController};
use camrig::types::{PreviewMode, Session};
use camrig::RemoteControlServer;

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: camrig <list|record|view|serve> [args]");
        eprintln!("  list                      enumerate cameras and serial ports");
        eprintln!("  record <session> <secs>   run a timed recording");
        eprintln!("  view <secs>               run a multi-camera preview");
        eprintln!("  serve                     accept remote control until ctrl-c");
        std::process::exit(1);
    }

    let config = RigConfig::load_or_default();
    if let Err(e) = config.validate() {
        bail!("invalid configuration: {e}");
    }

    match args[1].as_str() {
        "list" => {
            camrig::init_logging();
            cmd_list(config)
        }
        "record" => {
            camrig::init_logging();
            cmd_record(&args, config)
        }
        "view" => {
            camrig::init_logging();
            cmd_view(&args, config)
        }
        "serve" => {
            init_file_logging()?;
            cmd_serve(config)
        }
        other => bail!("unknown command: {other}"),
    }
}

/// Unattended serve sessions log to a timestamped file under `logs/`.
fn init_file_logging() -> Result<()> {
    let log_dir = PathBuf::from("logs");
    std::fs::create_dir_all(&log_dir)?;
    let path = log_dir.join(format!(
        "camrig_{}.log",
        chrono::Local::now().format("%m%d_%H%M")
    ));
    let file = std::fs::File::create(&path).context("failed to create log file")?;
    eprintln!("logging to {path:?}");
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "camrig=debug");
    }
    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(Box::new(file)))
        .init();
    Ok(())
}

/// The synthetic rig stands in until a vendor backend is attached; it keeps
/// every command usable on a machine without cameras.
fn connected_recorder(config: RigConfig) -> Result<Recorder> {
    let mut cams = CameraHandleSet::new(SimSdk::with_cameras(4));
    cams.enumerate();
    cams.connect().context("camera connect failed")?;

    let mut recorder = Recorder::new(cams, config);
    camrig::settings::auto_load_defaults(&mut recorder);
    Ok(recorder)
}

fn attach_trigger(recorder: &mut Recorder) {
    let mut trigger = TriggerController::new(recorder.config().trigger.clone());
    if trigger.open() {
        trigger.ping();
        recorder.set_trigger(trigger);
    }
}

fn shutdown_flag() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&flag);
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    })
    .context("failed to install ctrl-c handler")?;
    Ok(flag)
}

fn cmd_list(config: RigConfig) -> Result<()> {
    let mut cams = CameraHandleSet::new(SimSdk::with_cameras(4));
    println!("Cameras:");
    for ident in cams.enumerate() {
        println!("  {} (SN {})", ident.name, ident.serial);
    }
    println!("Serial ports:");
    let ports = scan_ports();
    if ports.is_empty() {
        println!("  <none>");
    } else {
        for port in ports {
            let marker = if Some(&port) == config.trigger.port.as_ref() {
                " (configured)"
            } else {
                ""
            };
            println!("  {port}{marker}");
        }
    }
    Ok(())
}

fn cmd_record(args: &[String], config: RigConfig) -> Result<()> {
    if args.len() < 4 {
        bail!("usage: camrig record <session_id> <seconds>");
    }
    let session_id = args[2].clone();
    let seconds: u64 = args[3].parse().context("seconds must be a number")?;
    let save_dir: PathBuf = config.recording.save_path.clone();

    let mut recorder = connected_recorder(config)?;
    attach_trigger(&mut recorder);
    let defaults = recorder.defaults();
    let session = Session {
        id: session_id,
        fps: defaults.fps,
        codec: defaults.codec.clone(),
        crf: defaults.crf,
        use_hw_trigger: defaults.hw_trigger && recorder.trigger().is_some(),
        save_dir,
    };

    let shutdown = shutdown_flag()?;
    recorder.start_record(session)?;
    println!("recording for {seconds}s (ctrl-c to stop early)...");

    let deadline = std::time::Instant::now() + Duration::from_secs(seconds);
    while std::time::Instant::now() < deadline && !shutdown.load(Ordering::SeqCst) {
        if let Err(e) = recorder.tick() {
            eprintln!("recording aborted: {e}");
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    recorder.stop()?;

    for record in recorder.writer_records() {
        println!("  {}: {:?} [{:?}]", record.cam_name, record.path, record.state());
    }
    Ok(())
}

fn cmd_view(args: &[String], config: RigConfig) -> Result<()> {
    if args.len() < 3 {
        bail!("usage: camrig view <seconds>");
    }
    let seconds: u64 = args[2].parse().context("seconds must be a number")?;

    let mut recorder = connected_recorder(config)?;
    let shutdown = shutdown_flag()?;
    recorder.start_preview(PreviewMode::Multi, false)?;

    let mut frames: u64 = 0;
    let deadline = std::time::Instant::now() + Duration::from_secs(seconds);
    while std::time::Instant::now() < deadline && !shutdown.load(Ordering::SeqCst) {
        if let Err(e) = recorder.tick() {
            eprintln!("preview aborted: {e}");
            break;
        }
        for slot in 0..recorder.cams().len() {
            while recorder.poll_preview(slot).is_some() {
                frames += 1;
            }
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    recorder.stop()?;
    println!("drained {frames} preview frame(s)");
    Ok(())
}

fn cmd_serve(config: RigConfig) -> Result<()> {
    let host = config.remote.host.clone();
    let port = config.remote.port;

    let mut recorder = connected_recorder(config)?;
    attach_trigger(&mut recorder);
    let mut server =
        RemoteControlServer::bind(&host, port).context("remote server bind failed")?;

    let shutdown = shutdown_flag()?;
    println!("serving remote control on {host}:{port} (ctrl-c to quit)");
    camrig::control::run(&mut recorder, &mut server, &shutdown);
    Ok(())
}
