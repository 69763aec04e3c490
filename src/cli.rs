use anyhow::{Result, anyhow};
use pico_args::Arguments;
use std::{env, path::PathBuf, process::Command};

use crate::{config, ipc, replay};

pub fn run() -> Result<()> {
    let mut pargs = Arguments::from_env();

    // Hidden daemon mode (spawned by `start`)
    if pargs.contains("--daemon") {
        return ipc::run_daemon();
    }

    if env::args().len() == 1 {
        print_help();
        return Ok(());
    }

    if pargs.contains("-h") || pargs.contains("--help") {
        print_help();
        return Ok(());
    }

    let subcmd: Option<String> = pargs.free_from_str().ok();

    match subcmd.as_deref() {
        Some("help") => {
            let topic: Option<String> = pargs.free_from_str().ok();
            match topic {
                Some(t) => print_subcmd_help(&t),
                None => print_help(),
            }
            Ok(())
        }

        Some("start") => {
            let exe = env::current_exe()?;
            let child = Command::new(exe).arg("--daemon").spawn()?;
            println!("airgestd: started daemon (pid={})", child.id());
            Ok(())
        }

        Some("stop") => request("shutdown"),
        Some("status") => request("status"),
        Some("record") => request("record"),
        Some("cancel") => request("cancel"),
        Some("listen") => request("listen"),
        Some("unlisten") => request("unlisten"),
        Some("reset") => request("reset"),
        Some("reload") => request("reload"),
        Some("list") => request("list"),
        Some("doctor") => request("doctor"),
        Some("watch") => ipc::watch(),

        Some("use") => {
            let name: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: airgestd use <profile_name>"))?;
            let r = ipc::client_request(serde_json::json!({"op": "use", "profile": name}))?;
            print_response(&r);
            Ok(())
        }

        Some("replay") => {
            let profile_path: Option<PathBuf> = pargs.opt_value_from_str("--profile")?;
            let record: PathBuf = pargs.free_from_str().map_err(|_| {
                anyhow!("usage: airgestd replay [--profile <file>] <record.jsonl> [<listen.jsonl>]")
            })?;
            let listen: Option<PathBuf> = pargs.opt_free_from_str()?;
            let profile = match profile_path {
                Some(p) => config::read_profile(&p)?,
                None => config::builtin_profile()?,
            };
            replay::run(&profile, &record, listen.as_deref())
        }

        Some(other) => {
            eprintln!("unknown subcommand: {other}\n");
            print_help();
            Ok(())
        }

        None => {
            print_help();
            Ok(())
        }
    }
}

fn request(op: &str) -> Result<()> {
    let r = ipc::client_request(serde_json::json!({ "op": op }))?;
    print_response(&r);
    Ok(())
}

fn print_help() {
    println!(
        r#"airgestd: accelerometer gesture daemon

USAGE:
  airgestd help [command]        Show general or command-specific help
  airgestd start                 Start the daemon
  airgestd stop                  Stop the daemon
  airgestd status                Show daemon and engine state
  airgestd record                Start the guided recording protocol
  airgestd cancel                Abandon the recording protocol
  airgestd listen                Recognize the trained gesture
  airgestd unlisten              Stop recognizing
  airgestd reset                 Forget recorded examples and the model
  airgestd watch                 Stream recognitions and engine events
  airgestd reload                Reload active profile
  airgestd use <name>            Switch active profile
  airgestd list                  List profiles
  airgestd doctor                Diagnose permissions/devices
  airgestd replay <rec> [<lis>]  Train and listen offline from JSONL streams

TIPS:
  - Profiles: ~/.config/airgestd/profiles
  - Active profile pointer: ~/.config/airgestd/active
  - RUST_LOG=debug shows per-gesture detail
"#
    );
}

fn print_subcmd_help(cmd: &str) {
    match cmd {
        "start" => println!("usage: airgestd start\nStarts the background daemon."),
        "stop" => println!("usage: airgestd stop\nStops the running daemon."),
        "status" => println!(
            "usage: airgestd status\nShows active profile, devices, socket and engine mode/phase."
        ),
        "record" => println!(
            "usage: airgestd record\nRuns the 10-phase recording protocol; follow the prompts with `airgestd watch`.\nExamples add to the ones already recorded; see `reset`."
        ),
        "cancel" => println!("usage: airgestd cancel\nStops the recording protocol; examples so far are kept."),
        "listen" => println!(
            "usage: airgestd listen\nRecognizes the trained gesture and runs its bound action.\nFails until a model has been trained."
        ),
        "unlisten" => println!("usage: airgestd unlisten\nStops recognizing; a gesture in progress is dropped."),
        "reset" => println!("usage: airgestd reset\nClears recorded examples and the trained model."),
        "watch" => println!(
            "usage: airgestd watch\nPrints one JSON line per event, e.g. {{\"activate\":true}}."
        ),
        "reload" => println!(
            "usage: airgestd reload\nReloads the current profile; keeps last good on error."
        ),
        "use" => {
            println!("usage: airgestd use <name>\nSwitches active profile to <name> and reloads.")
        }
        "list" => println!("usage: airgestd list\nLists available profiles."),
        "doctor" => println!(
            "usage: airgestd doctor\nChecks permissions and lists detected accelerometers."
        ),
        "replay" => println!(
            "usage: airgestd replay [--profile <file>] <record.jsonl> [<listen.jsonl>]\nRuns the recording protocol over <record.jsonl>, trains, then listens to <listen.jsonl>.\nLines look like {{\"axis\":\"x\",\"value\":-31.5,\"t_ms\":120}}."
        ),
        _ => {
            eprintln!("unknown command: {cmd}\n");
            print_help();
        }
    }
}

fn print_response(v: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(v).unwrap_or_default());
}
