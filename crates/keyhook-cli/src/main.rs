use std::{
    path::PathBuf,
    sync::{Arc, mpsc},
    time::Duration,
};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use keyhook::{
    HookContext, KeyChord, Keys, Verdict,
    platform::{HookPlatform, simulated::SimulatedPlatform},
};

mod config;

use config::BindingFile;

/// How long the simulation waits for notifications after the last key
const SETTLE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[derive(Parser, Debug)]
#[command(name = "keyhook")]
#[command(about = "Global keyboard hooks for key chords", long_about = None)]
struct Args {
    /// Path to RON binding file
    config: PathBuf,

    /// Validate the bindings, print them and exit
    #[arg(long)]
    check: bool,

    /// Run the bindings against a simulated keyboard, pressing this chord.
    /// Repeat to press several in turn (e.g. --simulate "Control + A" --simulate "Control + ,")
    #[arg(long, value_name = "CHORD", conflicts_with = "check")]
    simulate: Vec<String>,

    /// Lock the keyboard down for this many seconds
    #[arg(long, value_name = "SECONDS", conflicts_with_all = ["check", "simulate"])]
    lockdown: Option<u64>,

    /// Set the log level
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Only initialize tracing if RUST_LOG is set or log level is explicitly provided
    if std::env::var("RUST_LOG").is_ok() || args.log_level.is_some() {
        let log_level = match args.log_level.clone().unwrap_or(LogLevel::Info) {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        };

        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .without_time()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false),
            )
            .with(
                EnvFilter::from_default_env()
                    .add_directive(format!("keyhook={log_level}").parse()?)
                    .add_directive(format!("keyhook_cli={log_level}").parse()?),
            )
            .init();
    }

    let bindings = BindingFile::load(&args.config)?;
    info!("Loaded {} bindings from {}", bindings.hooks.len(), args.config.display());

    if args.check {
        let platform = layout_platform();
        for binding in &bindings.hooks {
            let keys = binding.keys.format_with(|key| platform.virtual_key_to_char(key));
            println!("{}: {}", binding.name, keys);
        }
        return Ok(());
    }

    if !args.simulate.is_empty() {
        return simulate(&bindings, &parse_chords(&args.simulate)?);
    }

    run_native(&bindings, args.lockdown)
}

/// Platform whose keyboard layout is used to print chords
fn layout_platform() -> Arc<dyn HookPlatform> {
    #[cfg(windows)]
    {
        Arc::new(keyhook::platform::win32::Win32Platform::new())
    }
    #[cfg(not(windows))]
    {
        Arc::new(SimulatedPlatform::new())
    }
}

/// Physical key held down to produce each modifier in a simulated chord
const MODIFIER_KEYS: [(Keys, Keys); 4] = [
    (Keys::WIN_LOGO, Keys::L_WIN),
    (Keys::CONTROL, Keys::L_CONTROL_KEY),
    (Keys::SHIFT, Keys::L_SHIFT_KEY),
    (Keys::ALT, Keys::L_MENU),
];

fn parse_chords(chords: &[String]) -> Result<Vec<KeyChord>> {
    chords
        .iter()
        .map(|chord| {
            chord
                .parse::<KeyChord>()
                .with_context(|| format!("Invalid chord '{}'", chord.trim()))
        })
        .collect()
}

/// Press and release chords on a simulated keyboard and report what the hooks did
fn simulate(bindings: &BindingFile, chords: &[KeyChord]) -> Result<()> {
    let platform = Arc::new(SimulatedPlatform::new());
    let context = HookContext::new(platform.clone()).context("Failed to create hook context")?;
    let mut hooks = bindings.create_hooks(&context)?;

    let (tx, rx) = mpsc::channel();
    for (hook, binding) in hooks.iter_mut().zip(&bindings.hooks) {
        let tx = tx.clone();
        let label = format!("{} ({})", binding.name, context.format_chord(&binding.keys));
        hook.on_pressed(move |_| {
            let _ = tx.send(label.clone());
        });
        hook.engage()?;
    }
    drop(tx);

    for chord in chords {
        if chord.key_code().is_none() {
            warn!("Skipping '{}': no key to press", chord);
            continue;
        }

        let held: Vec<Keys> = MODIFIER_KEYS
            .iter()
            .filter(|(modifier, _)| chord.modifiers().contains(*modifier))
            .map(|(_, key)| *key)
            .collect();
        for key in &held {
            platform.set_key_down(*key, true);
        }
        let verdict = platform.press(chord.key_code())?;
        platform.release(chord.key_code())?;
        for key in &held {
            platform.set_key_down(*key, false);
        }

        let chord = context.format_chord(chord);
        match verdict {
            Verdict::Block => println!("{chord}: blocked"),
            Verdict::Pass(_) => println!("{chord}: passed"),
        }
    }

    while let Ok(label) = rx.recv_timeout(SETTLE) {
        println!("pressed {label}");
    }
    Ok(())
}

#[cfg(not(windows))]
fn run_native(_bindings: &BindingFile, _lockdown: Option<u64>) -> Result<()> {
    anyhow::bail!("Native keyboard hooks are only available on Windows; use --check or --simulate")
}

#[cfg(windows)]
fn run_native(bindings: &BindingFile, lockdown: Option<u64>) -> Result<()> {
    use std::time::Instant;

    use keyhook::platform::win32::Win32Platform;
    use tao::event::{Event, StartCause};
    use tao::event_loop::{ControlFlow, EventLoopBuilder};
    use tracing::error;

    #[derive(Debug)]
    enum UserEvent {
        Shutdown,
    }

    // Hooks must be installed on the thread that pumps messages
    let event_loop = EventLoopBuilder::<UserEvent>::with_user_event().build();
    let proxy = event_loop.create_proxy();

    let context = HookContext::new(Arc::new(Win32Platform::new()))
        .context("Failed to create hook context")?;
    let mut hooks = bindings.create_hooks(&context)?;
    for (hook, binding) in hooks.iter_mut().zip(&bindings.hooks) {
        let label = format!("{} ({})", binding.name, context.format_chord(&binding.keys));
        hook.on_pressed(move |_| info!("Pressed {}", label));
        hook.engage()
            .with_context(|| format!("Failed to engage {}", binding.name))?;
    }
    info!("{} hooks engaged, press Ctrl+C to exit", hooks.len());

    let deadline = match lockdown {
        Some(seconds) => {
            let lockdown = context.lockdown();
            lockdown.on_key_event(|event| info!("Lockdown {:?}: {}", event.state, event.keys));
            lockdown.engage().context("Failed to engage lockdown")?;
            info!("Keyboard locked down for {} seconds", seconds);
            Some(Instant::now() + Duration::from_secs(seconds))
        }
        None => None,
    };

    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Runtime::new() {
            Ok(rt) => rt,
            Err(e) => {
                error!("Failed to create tokio runtime: {}", e);
                return;
            }
        };
        runtime.block_on(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = proxy.send_event(UserEvent::Shutdown);
            }
        });
    });

    event_loop.run(move |event, _, control_flow| {
        *control_flow = match deadline {
            Some(deadline) if context.is_locked_down() => ControlFlow::WaitUntil(deadline),
            _ => ControlFlow::Wait,
        };

        match event {
            Event::NewEvents(StartCause::ResumeTimeReached { .. }) => {
                context.lockdown().release();
                info!("Keyboard lockdown released");
                *control_flow = ControlFlow::Wait;
            }
            Event::UserEvent(UserEvent::Shutdown) => {
                info!("Shutdown requested, exiting event loop");
                context.lockdown().release();
                for hook in hooks.iter_mut() {
                    hook.dispose();
                }
                *control_flow = ControlFlow::Exit;
            }
            _ => {}
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulate_takes_punctuation_chords() {
        let args = Args::try_parse_from([
            "keyhook",
            "bindings.ron",
            "--simulate",
            "Control + ,",
            "--simulate",
            "Control + ;",
            "--simulate",
            "Alt + F4",
        ])
        .unwrap();

        let chords = parse_chords(&args.simulate).unwrap();
        assert_eq!(
            chords,
            vec![
                KeyChord::new(Keys::CONTROL | Keys::OEM_COMMA),
                KeyChord::new(Keys::CONTROL | Keys::OEM_SEMICOLON),
                KeyChord::new(Keys::ALT | Keys::F4),
            ]
        );
    }

    #[test]
    fn test_simulate_rejects_bad_chords() {
        let err = parse_chords(&["Control + Nope".to_string()]).unwrap_err();
        assert!(err.to_string().contains("Control + Nope"));
    }

    #[test]
    fn test_simulate_conflicts_with_check() {
        let result =
            Args::try_parse_from(["keyhook", "bindings.ron", "--check", "--simulate", "F1"]);
        assert!(result.is_err());
    }
}
